use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "graft",
    version,
    about = "Materialize a template and graft the generated files into a project"
)]
pub struct Cli {
    #[arg(short = 'C', long = "chdir", global = true)]
    pub chdir: Option<PathBuf>,
    /// Configuration file (default: nearest graft.toml).
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<PathBuf>,
    #[arg(short = 'n', long = "dry-run", global = true)]
    pub dry_run: bool,
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate files from the template and move them into the project.
    Add(AddArgs),
    /// Apply a directive file to the files it names, then delete it.
    Patch(PatchArgs),
    /// Configuration display, validation, and generation.
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Template directory (overrides `template` from the config).
    #[arg(long = "template")]
    pub template: Option<PathBuf>,
    /// Project root that placements and directives are relative to.
    #[arg(long = "root")]
    pub root: Option<PathBuf>,
    /// Set a template variable without prompting (repeatable).
    #[arg(short = 'd', long = "data", value_name = "KEY=VALUE")]
    pub data: Vec<String>,
    /// Accept every default instead of prompting.
    #[arg(long = "defaults")]
    pub defaults: bool,
}

#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Directive file to apply.
    pub directives: PathBuf,
    /// Directory relative target paths resolve against (default: current directory).
    #[arg(long = "base")]
    pub base: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Show,
    Path,
    /// Load the config and validate the template and placements it names.
    Check,
    Generate {
        #[arg()]
        path: Option<PathBuf>,
        #[arg(long = "force", default_value_t = false)]
        force: bool,
    },
    /// Point the config at a template directory.
    SetTemplate {
        path: String,
    },
}

/// Helper entry point so `main` can stay minimal.
pub fn parse() -> Cli {
    Cli::parse()
}
