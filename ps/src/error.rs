//! Error types for program definitions, the repository and the file watcher

use std::path::PathBuf;
use thiserror::Error;

use crate::parameter::ParameterType;

/// Errors raised while parsing, binding or executing a single program
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Unknown flag '{flag}' for program '{program}'")]
    UnknownFlag { program: String, flag: String },

    #[error("Unknown argument '{arg}' for program '{program}'")]
    UnknownArg { program: String, arg: String },

    #[error("Program '{program}' has no flag or argument named '{name}'")]
    UnknownParameter { program: String, name: String },

    #[error("Missing required value for '{name}'")]
    MissingValue { name: String },

    #[error("Type mismatch for '{name}': expected {expected}, got {value}")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        value: String,
    },

    #[error("Invalid program definition: {0}")]
    Definition(String),

    #[error("Failed to parse program definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Program '{name}' has no path to execute")]
    NoPath { name: String },

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} exited with {status}: {stderr}")]
    ExitStatus {
        path: String,
        status: String,
        stderr: String,
    },

    #[error("Program output is not valid UTF-8: {0}")]
    Output(#[from] std::string::FromUtf8Error),

    #[error("Program execution cancelled")]
    Cancelled,
}

impl ProgramError {
    /// Check if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProgramError::Cancelled)
    }

    /// Check if this error came from spawning or running the child process
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            ProgramError::NoPath { .. }
                | ProgramError::Spawn { .. }
                | ProgramError::ExitStatus { .. }
                | ProgramError::Output(_)
        )
    }
}

/// Errors raised by the program repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Could not read repository {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error walking repository: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Could not load program from {path}: {source}")]
    Program {
        path: PathBuf,
        #[source]
        source: ProgramError,
    },

    #[error("Program {name} already exists (defined in {existing} and {duplicate})")]
    DuplicateName {
        name: String,
        existing: PathBuf,
        duplicate: PathBuf,
    },

    #[error("Repository lock poisoned")]
    LockPoisoned,

    #[error("Watch error: {0}")]
    Watch(WatchError),

    #[error("Repository watch cancelled")]
    Cancelled,
}

impl RepositoryError {
    /// Check if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepositoryError::Cancelled)
    }
}

impl From<WatchError> for RepositoryError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::Cancelled => RepositoryError::Cancelled,
            other => RepositoryError::Watch(other),
        }
    }
}

/// Errors raised by the polling file watcher
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Invalid glob mask '{mask}': {source}")]
    InvalidMask {
        mask: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Watch handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Watch scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Watch cancelled")]
    Cancelled,
}

impl WatchError {
    /// Check if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WatchError::Cancelled)
    }

    /// Wrap an arbitrary handler failure
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WatchError::Handler(Box::new(err))
    }
}
