use crate::meta::ScenarioKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Input table does not have the IAMC shape (missing or mixed columns, duplicate rows).
    #[error("invalid IAMC table: {0}")]
    Schema(String),

    #[error("filter by `{key}` not supported: {reason}")]
    UnsupportedFilter { key: String, reason: String },

    #[error("meta conflict between scenarios: {}", join_keys(.keys))]
    MetaConflict { keys: Vec<ScenarioKey> },

    #[error("duplicate rows in `data`:\n{}", .rows.join("\n"))]
    DuplicateRow { rows: Vec<String> },

    #[error("renaming the index would create duplicate scenarios: {}", join_keys(.keys))]
    DuplicateKey { keys: Vec<ScenarioKey> },

    #[error("renaming index and data columns simultaneously is not supported")]
    ConflictingRename,

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Excel(#[from] calamine::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn unsupported_filter(key: &str, reason: impl Into<String>) -> Self {
        Error::UnsupportedFilter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

fn join_keys(keys: &[ScenarioKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
