use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::cli::{AddArgs, Cli, Command, ConfigCommand, PatchArgs};
use crate::config;
use crate::error::GraftError;
use crate::template::{Renderer, Template, Values, Variable};
use crate::{patch, workspace};

const CONFIG_FILE: &str = "graft.toml";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConfigPathSource {
    Explicit,
    Discovered,
    UserDefault,
}

impl ConfigPathSource {
    fn as_str(&self) -> &'static str {
        match self {
            ConfigPathSource::Explicit => "explicit",
            ConfigPathSource::Discovered => "discovered",
            ConfigPathSource::UserDefault => "user-default",
        }
    }
}

#[derive(Clone, Debug)]
struct ResolvedConfigPath {
    path: Utf8PathBuf,
    source: ConfigPathSource,
    /// Directory placements and directive targets are relative to.
    root: Utf8PathBuf,
}

impl ResolvedConfigPath {
    /// Where `config generate` and `config set-template` write by default.
    fn writable_path(&self) -> Utf8PathBuf {
        match self.source {
            ConfigPathSource::UserDefault => self.root.join(CONFIG_FILE),
            _ => self.path.clone(),
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let ctx = CliContext::from(&cli);
    ctx.apply_chdir()?;

    match cli.command {
        Command::Add(args) => handle_add(&ctx, args),
        Command::Patch(args) => handle_patch(&ctx, args),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

fn handle_add(ctx: &CliContext, args: AddArgs) -> Result<()> {
    let cwd = current_working_dir()?;
    let resolved = ctx.resolve_config_path(&cwd)?;
    let config = config::load_or_default(&resolved.path)?;

    let root = match args.root {
        Some(root) => absolute(&cwd, utf8(root)?),
        None => resolved.root.clone(),
    };
    let template_dir = match args.template {
        Some(template) => absolute(&cwd, utf8(template)?),
        None => {
            let template = config.template.as_deref().ok_or_else(|| {
                anyhow!(
                    "no template selected; pass --template or set `template` in {}",
                    resolved.path
                )
            })?;
            root.join(template)
        }
    };

    let prefix = config.workdir_prefix();
    workspace::ensure_no_stale_workdirs(&cwd, prefix)?;

    let template = Template::load(&template_dir)?;
    let renderer = Renderer::new();
    let overrides = parse_data(&args.data)?;
    let values = if args.defaults {
        template.collect_values(&renderer, &overrides, |_, default| Ok(default.to_owned()))?
    } else {
        template.collect_values(&renderer, &overrides, ask_variable)?
    };

    let directory = template.directory_name(&renderer, &values)?;
    if !directory.starts_with(prefix) {
        bail!(
            "template {} generates `{}`, which does not start with the configured prefix `{}`",
            template.root(),
            directory,
            prefix
        );
    }
    let workdir = cwd.join(&directory);
    let moves = workspace::plan_moves(
        &renderer,
        &values,
        &resolved.path,
        &config.placements,
        &workdir,
        &root,
    )?;
    let directives = config
        .directives
        .as_deref()
        .map(|name| renderer.render(&resolved.path, name, &values))
        .transpose()?
        .map(|name| workdir.join(name));

    if ctx.dry_run {
        print_plan(&template, &values, &workdir, &moves, directives.as_deref());
        return Ok(());
    }

    let generated = template.materialize(&renderer, &values, &cwd)?;
    println!("Generated {}", generated);

    workspace::relocate(&moves)?;
    for mv in &moves {
        println!("  moved {} -> {}", relative_to(&mv.from, &generated), mv.to);
    }

    if let Some(path) = directives {
        if path.exists() {
            let applied = patch::apply_directives_in(&path, &root)?;
            println!("Applied {} insertion(s) from {}", applied, relative_to(&path, &generated));
        } else {
            warn!(%path, "template did not generate the configured directive file");
        }
    }

    workspace::remove_workdir(&generated)?;
    println!("Removed {}", generated);
    Ok(())
}

fn print_plan(
    template: &Template,
    values: &Values,
    workdir: &Utf8Path,
    moves: &[workspace::Move],
    directives: Option<&Utf8Path>,
) {
    println!("[dry-run] template {}", template.root());
    for (name, value) in values.iter() {
        println!("[dry-run]   {} = {}", name, value);
    }
    println!("[dry-run] would generate {}", workdir);
    for mv in moves {
        println!("[dry-run] would move {} -> {}", relative_to(&mv.from, workdir), mv.to);
    }
    if let Some(path) = directives {
        println!("[dry-run] would apply {}", relative_to(path, workdir));
    }
    println!("[dry-run] would remove {}", workdir);
}

fn handle_patch(ctx: &CliContext, args: PatchArgs) -> Result<()> {
    let cwd = current_working_dir()?;
    let path = absolute(&cwd, utf8(args.directives)?);
    let base = match args.base {
        Some(base) => absolute(&cwd, utf8(base)?),
        None => cwd,
    };

    if ctx.dry_run {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading directive file {}", path))?;
        for directive in patch::parse_directives(&path, &raw)? {
            println!(
                "[dry-run] would insert {} line(s) below `{}` in {}",
                directive.lines.len(),
                directive.anchor,
                patch::resolve_target(&base, &directive.target)
            );
        }
        return Ok(());
    }

    let applied = patch::apply_directives_in(&path, &base)?;
    info!(%path, applied, "directive file applied");
    Ok(())
}

fn handle_config(ctx: &CliContext, command: Option<ConfigCommand>) -> Result<()> {
    let cwd = current_working_dir()?;
    let resolved = ctx.resolve_config_path(&cwd)?;
    let config_path = &resolved.path;
    match command {
        Some(ConfigCommand::Path) => {
            println!("Config path: {} ({})", config_path, resolved.source.as_str());
            Ok(())
        }
        None | Some(ConfigCommand::Show) => {
            if !config_path.exists() {
                println!("No config found at {}.", config_path);
                println!("Use `graft config generate` to scaffold a default configuration.");
                return Ok(());
            }

            let config = config::load_from_path(config_path)?;
            println!("Config path: {} ({})", config_path, resolved.source.as_str());
            println!("Project root: {}", resolved.root);
            println!("{}", config::format_summary(&config));
            Ok(())
        }
        Some(ConfigCommand::Check) => {
            let config = config::load_from_path(config_path)?;
            let template = config
                .template
                .as_deref()
                .ok_or_else(|| anyhow!("{} does not set `template`", config_path))?;
            let template = Template::load(&resolved.root.join(template))?;

            // Render every placement with default values to catch unknown placeholders.
            let renderer = Renderer::new();
            let values =
                template.collect_values(&renderer, &BTreeMap::new(), |_, default| {
                    Ok(default.to_owned())
                })?;
            let workdir = resolved.root.join(template.directory_name(&renderer, &values)?);
            workspace::plan_moves(
                &renderer,
                &values,
                config_path,
                &config.placements,
                &workdir,
                &resolved.root,
            )?;
            if let Some(directives) = config.directives.as_deref() {
                renderer.render(config_path, directives, &values)?;
            }

            println!("Config OK: {} ({})", config_path, resolved.source.as_str());
            println!("{}", config::format_summary(&config));
            Ok(())
        }
        Some(ConfigCommand::Generate { path, force }) => {
            let target = match path {
                Some(path) => absolute(&cwd, utf8(path)?),
                None => resolved.writable_path(),
            };
            config::write_example_config(&target, force)?;
            if force {
                println!("Overwrote config at {}", target);
            } else {
                println!("Wrote example config to {}", target);
            }
            Ok(())
        }
        Some(ConfigCommand::SetTemplate { path }) => {
            let target = resolved.writable_path();
            config::set_template(&target, &path)?;
            println!("Set template to `{}` in {}", path, target);
            Ok(())
        }
    }
}

fn parse_data(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --data `{}`; expected KEY=VALUE", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid --data `{}`; key must not be empty", pair);
        }
        data.insert(key.to_owned(), value.to_owned());
    }
    Ok(data)
}

fn ask_variable(variable: &Variable, default: &str) -> crate::error::Result<String> {
    let label = if default.is_empty() {
        format!("{}: ", variable.label())
    } else {
        format!("{} [{}]: ", variable.label(), default)
    };
    let answer = prompt(&label)
        .map_err(|err| GraftError::io(format!("reading value for `{}`", variable.name), err))?;
    let answer = answer.trim();
    if answer.is_empty() {
        Ok(default.to_owned())
    } else {
        Ok(answer.to_owned())
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::Write::flush(&mut io::stdout())?;
    let mut buf = String::new();
    io::stdin().read_line(&mut buf)?;
    Ok(buf.trim_end_matches(['\n', '\r']).to_owned())
}

fn relative_to<'a>(path: &'a Utf8Path, base: &Utf8Path) -> &'a Utf8Path {
    path.strip_prefix(base).unwrap_or(path)
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| anyhow!("path {} is not valid UTF-8", path.display()))
}

fn absolute(cwd: &Utf8Path, path: Utf8PathBuf) -> Utf8PathBuf {
    if path.is_absolute() { path } else { cwd.join(path) }
}

fn current_working_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("determining current directory")?;
    utf8(cwd).context("current directory is not valid UTF-8")
}

struct CliContext {
    chdir: Option<PathBuf>,
    file: Option<PathBuf>,
    dry_run: bool,
}

impl CliContext {
    fn apply_chdir(&self) -> Result<()> {
        if let Some(path) = &self.chdir {
            std::env::set_current_dir(path)
                .with_context(|| format!("changing directory to {}", path.display()))?;
        }
        Ok(())
    }

    fn resolve_config_path(&self, cwd: &Utf8Path) -> Result<ResolvedConfigPath> {
        if let Some(path) = &self.file {
            let path = absolute(cwd, utf8(path.clone())?);
            let root = path
                .parent()
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| cwd.to_path_buf());
            return Ok(ResolvedConfigPath {
                path,
                source: ConfigPathSource::Explicit,
                root,
            });
        }

        let mut dir = cwd.to_path_buf();
        loop {
            let preferred = dir.join(CONFIG_FILE);
            if preferred.exists() {
                return Ok(ResolvedConfigPath {
                    path: preferred,
                    source: ConfigPathSource::Discovered,
                    root: dir,
                });
            }

            let hidden = dir.join(".graft").join("config.toml");
            if hidden.exists() {
                return Ok(ResolvedConfigPath {
                    path: hidden,
                    source: ConfigPathSource::Discovered,
                    root: dir,
                });
            }

            let Some(parent) = dir.parent() else {
                break;
            };
            dir = parent.to_path_buf();
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow!("unable to determine user configuration directory"))?;
        path.push("graft");
        path.push("config.toml");
        Ok(ResolvedConfigPath {
            path: utf8(path)?,
            source: ConfigPathSource::UserDefault,
            root: cwd.to_path_buf(),
        })
    }
}

impl From<&Cli> for CliContext {
    fn from(cli: &Cli) -> Self {
        Self {
            chdir: cli.chdir.clone(),
            file: cli.file.clone(),
            dry_run: cli.dry_run,
        }
    }
}
