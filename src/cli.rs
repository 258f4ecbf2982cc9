// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::{SchedulingMode, TargetPlatform};

/// Command-line arguments for `lhsched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lhsched",
    version,
    about = "Reorder dataflow computations to hide async collective latency.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the module file (TOML).
    #[arg(long, value_name = "PATH", default_value = "module.toml")]
    pub module: String,

    /// Override `[module].mode` (latency-hiding, early-late, both).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<SchedulingMode>,

    /// Override `[module].target` (generic, gpu).
    #[arg(long, value_name = "TARGET")]
    pub target: Option<TargetPlatform>,

    /// Device memory in bytes, GPU target only.
    #[arg(long, value_name = "BYTES")]
    pub device_memory: Option<u64>,

    /// Print per-computation statistics after the schedule.
    #[arg(long)]
    pub stats: bool,

    /// Only print computations whose name matches this regex.
    #[arg(long, value_name = "REGEX")]
    pub computation: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LHSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the module, but don't schedule.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
