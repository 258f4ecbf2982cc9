// src/config/mod.rs

//! Module files: TOML descriptions of a module plus scheduler settings.
//!
//! - `model.rs`: the serde data model.
//! - `loader.rs`: reading files.
//! - `validate.rs`: reference and cycle checks, then building the module.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ComputationConfig, GpuSection, InstructionConfig, ModuleFile, ModuleSection, ProfileSection,
    RawModuleFile, SchedulerConfig, ShapeConfig,
};
