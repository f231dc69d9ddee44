use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures raised by the scaffolding pipeline.
///
/// Every variant is fatal to the run; the CLI layer adds context via `anyhow`.
#[derive(Debug, Error)]
pub enum GraftError {
    #[error("line `{anchor}` was not found in {path}")]
    AnchorNotFound { anchor: String, path: Utf8PathBuf },

    #[error(
        "found directories starting with `{prefix}` in {dir}: {}; remove them or change the working directory",
        found.join(", ")
    )]
    DirectoryPrecondition {
        prefix: String,
        dir: Utf8PathBuf,
        found: Vec<String>,
    },

    #[error("cannot patch {path}: anchor text is empty")]
    EmptyAnchor { path: Utf8PathBuf },

    #[error("{path}:{line}: {reason}")]
    MalformedDirective {
        path: Utf8PathBuf,
        line: usize,
        reason: String,
    },

    #[error("template {path}: {reason}")]
    Template { path: Utf8PathBuf, reason: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl GraftError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn template(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = GraftError> = std::result::Result<T, E>;
