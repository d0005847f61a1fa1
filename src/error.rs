use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error in {}: {reason}", file.display())]
    Parse { file: PathBuf, reason: String },

    #[error("read error {}: {source}", file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("graph write failed: {0}")]
    GraphWrite(String),

    #[error("graph read failed: {0}")]
    GraphRead(String),

    #[error("invalid relationship type {relationship:?}. Allowed: {}", allowed.join(", "))]
    Validation {
        relationship: String,
        allowed: Vec<&'static str>,
    },

    #[error("query blocked for safety: contains {keyword}. Read-only queries only.")]
    Safety { keyword: &'static str },

    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl Error {
    /// Stable identifier used in transport error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "parse_error",
            Error::Io { .. } => "io_error",
            Error::GraphWrite(_) => "graph_write_error",
            Error::GraphRead(_) => "graph_read_error",
            Error::Validation { .. } => "validation_error",
            Error::Safety { .. } => "safety_error",
            Error::InvalidParams(_) => "invalid_params",
        }
    }

    pub(crate) fn write(err: impl std::fmt::Display) -> Self {
        Error::GraphWrite(err.to_string())
    }

    pub(crate) fn read(err: impl std::fmt::Display) -> Self {
        Error::GraphRead(err.to_string())
    }
}
