//! Template scaffolding that grafts generated files into an existing project.
//!
//! The flow behind `graft add`: refuse to run over a stale generated
//! directory ([`workspace`]), render the template ([`template`]), move the
//! generated files to their destinations, apply the generated directive file
//! ([`patch`]), then remove the emptied directory.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod patch;
pub mod runner;
pub mod template;
pub mod templates;
pub mod util;
pub mod workspace;

pub use error::{GraftError, Result};
pub use patch::{apply_directives, apply_directives_in, insert_after_anchor};
