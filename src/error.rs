// src/error.rs

//! Error types for galley
//!
//! One crate-wide error enum; every variant names the offending input
//! so failures can be diagnosed from the pipeline boundary without
//! digging through logs.

use std::path::PathBuf;
use thiserror::Error;

use crate::version::{InvalidDependency, InvalidVersion};

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or invalid recipe definition
    #[error("{path}: {message}")]
    RecipeParse { path: PathBuf, message: String },

    /// The shell process failed to produce a parseable symbol dump
    #[error("shell evaluation failed: {0}")]
    ShellEvaluation(String),

    /// A source could not be retrieved
    #[error("failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    /// A fetched source's SHA-256 digest differs from the declared one
    #[error("checksum mismatch for '{url}': expected {expected}, actual {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// Malformed or unextractable source archive
    #[error("failed to extract '{archive}': {message}")]
    Extract { archive: PathBuf, message: String },

    /// A recipe script executed in the container exited non-zero
    #[error("{script}() exited with status {status}")]
    BuildScript { script: String, status: i32 },

    /// I/O failure while emitting an ipk member
    #[error("failed to write archive member '{member}': {source}")]
    ArchiveWrite {
        member: String,
        source: std::io::Error,
    },

    /// A hook handler failed
    #[error("hook '{module}' failed on {event}: {message}")]
    Hook {
        event: &'static str,
        module: String,
        message: String,
    },

    /// Cancellation was requested
    #[error("build canceled")]
    Canceled,

    #[error("invalid version: {0}")]
    Version(#[from] InvalidVersion),

    #[error("invalid dependency: {0}")]
    Dependency(#[from] InvalidDependency),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a `RecipeParse` error for the recipe at `path`.
    pub fn recipe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::RecipeParse {
            path: path.into(),
            message: message.into(),
        }
    }
}
