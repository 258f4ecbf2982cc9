// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Instruction not found in schedule graph: {0}")]
    UnknownInstruction(String),

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Computation not found: {0}")]
    UnknownComputation(String),

    /// The ready set drained while nodes were still unscheduled.
    #[error("Cycle detected in computation '{computation}': {remaining} node(s) never became ready")]
    Cycle {
        computation: String,
        remaining: usize,
    },

    #[error("Invalid schedule for computation '{computation}': {reason}")]
    InvalidSchedule { computation: String, reason: String },

    #[error("Internal scheduler error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedError>;
