use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use serde::Deserialize;
use toml_edit::{DocumentMut, value};

use crate::templates;

pub const DEFAULT_WORKDIR_PREFIX: &str = "cookiecutter-template-";

/// Project configuration loaded from `graft.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraftConfig {
    /// Template directory, relative to the project root.
    pub template: Option<String>,
    /// Prefix every generated directory name must carry.
    pub workdir_prefix: Option<String>,
    /// Directive file inside the generated directory (rendered).
    pub directives: Option<String>,
    #[serde(default)]
    pub placements: Vec<Placement>,
}

impl GraftConfig {
    pub fn workdir_prefix(&self) -> &str {
        self.workdir_prefix
            .as_deref()
            .unwrap_or(DEFAULT_WORKDIR_PREFIX)
    }
}

/// Move of one generated file into the project tree. Both sides are rendered.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Placement {
    pub from: String,
    pub to: String,
}

/// Load a configuration file from disk and deserialize it.
pub fn load_from_path(path: &Utf8Path) -> Result<GraftConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path))
}

/// Like [`load_from_path`], but a missing file yields the default config.
pub fn load_or_default(path: &Utf8Path) -> Result<GraftConfig> {
    if path.exists() {
        load_from_path(path)
    } else {
        Ok(GraftConfig::default())
    }
}

pub fn write_example_config(path: &Utf8Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        bail!("{} already exists; rerun with --force to overwrite", path);
    }

    templates::write_template(path, "config/example.graft.toml")
}

pub fn set_template(path: &Utf8Path, template: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent))?;
        }
    }

    let mut doc: DocumentMut = if path.exists() {
        let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        raw.parse()
            .with_context(|| format!("parsing config {}", path))?
    } else {
        DocumentMut::new()
    };

    doc["template"] = value(template);

    fs::write(path, doc.to_string()).with_context(|| format!("writing config {}", path))
}

pub fn format_summary(config: &GraftConfig) -> String {
    let mut out = String::new();
    let template = config.template.as_deref().unwrap_or("<unset>");
    let directives = config.directives.as_deref().unwrap_or("<none>");

    let _ = writeln!(out, "Template: {}", template);
    let _ = writeln!(out, "Work directory prefix: {}", config.workdir_prefix());
    let _ = writeln!(out, "Directive file: {}", directives);
    let _ = writeln!(out, "Placements: {}", config.placements.len());
    for placement in &config.placements {
        let _ = writeln!(out, "  - {} -> {}", placement.from, placement.to);
    }

    out
}
