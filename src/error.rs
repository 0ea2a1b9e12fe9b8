//! Error types shared by the library layers.
//!
//! `CommandError` covers configuration / dispatch failures that are surfaced to
//! a single calling operation. Launch and runtime failures never use it: they
//! are folded into a failed `CommandResult` instead.

use thiserror::Error;

use crate::command::CommandKind;
use crate::template::TemplateError;

pub type Result<T, E = CommandError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unsupported command kind: {0}")]
    UnsupportedKind(String),

    #[error("command '{name}' not found in group '{group}' of category '{category}'")]
    NotFound {
        category: String,
        group: String,
        name: String,
    },

    #[error("category '{0}' does not exist")]
    CategoryNotFound(String),

    #[error("group '{group}' does not exist in category '{category}'")]
    GroupNotFound { category: String, group: String },

    #[error(
        "Cannot remove group '{group}' from category '{category}' because it contains {count} command(s). Remove all commands from the group first."
    )]
    GroupNotEmpty {
        category: String,
        group: String,
        count: usize,
    },

    #[error(
        "Cannot remove category '{category}' because it contains {count} group(s). Remove all groups from the category first."
    )]
    CategoryNotEmpty { category: String, count: usize },

    #[error("command '{0}' is not toggleable")]
    NotToggleable(String),

    #[error("invalid {kind} metadata: {reason}")]
    InvalidMetadata { kind: CommandKind, reason: String },

    #[error("malformed command record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("config I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CommandError {
    pub(crate) fn invalid(kind: CommandKind, reason: impl Into<String>) -> Self {
        CommandError::InvalidMetadata {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        CommandError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
