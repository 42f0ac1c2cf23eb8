//! Render error types

use std::path::PathBuf;
use thiserror::Error;

use programstore::{ProgramError, RepositoryError, WatchError};

/// Errors raised while creating or executing templates
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Program {0} not found")]
    NotFound(String),

    #[error("Program creation is not allowed")]
    CreationDisabled,

    #[error("Invalid delimiters: expected exactly two, got {0:?}")]
    InvalidDelimiters(Vec<String>),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Template syntax error: {0}")]
    Syntax(#[from] handlebars::TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid glob mask '{mask}': {source}")]
    InvalidMask {
        mask: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Error walking directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Watch(WatchError),

    #[error("Render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Rendering requires a tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error("Render cancelled")]
    Cancelled,
}

impl RenderError {
    /// Check if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            RenderError::Cancelled => true,
            RenderError::Program(e) => e.is_cancelled(),
            RenderError::Repository(e) => e.is_cancelled(),
            RenderError::Watch(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Attach a path to an IO error
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::File {
            path: path.into(),
            source,
        }
    }
}

impl From<WatchError> for RenderError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::Cancelled => RenderError::Cancelled,
            WatchError::InvalidMask { mask, source } => RenderError::InvalidMask { mask, source },
            other => RenderError::Watch(other),
        }
    }
}
