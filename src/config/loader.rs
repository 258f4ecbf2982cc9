// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{ModuleFile, RawModuleFile};
use crate::errors::Result;

/// Read a module file and deserialize it into a [`RawModuleFile`].
///
/// No semantic checks happen here; use [`load_and_validate`] for those.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawModuleFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawModuleFile> {
    let raw: RawModuleFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Read, validate and build the module described by `path`.
///
/// Checks for:
/// - unknown instruction and computation references,
/// - dependency cycles inside a computation and in the call graph,
/// - zero overlap limits,
/// - declared schedules that are not valid orders.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ModuleFile> {
    let raw = load_from_path(&path)?;
    ModuleFile::try_from(raw)
}
