#![allow(dead_code)]

use std::io::Write;

use lhsched::config::{ModuleFile, load_and_validate};
use lhsched::errors::Result;
use tempfile::NamedTempFile;

pub use lhsched_test_utils::init_tracing;

/// Write `contents` to a temp file and load it the way the CLI does.
pub fn load_module_toml(contents: &str) -> Result<ModuleFile> {
    let mut file = NamedTempFile::new().expect("temp file");
    write!(file, "{contents}").expect("write module file");
    load_and_validate(file.path())
}

pub fn position(names: &[String], name: &str) -> usize {
    names
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("'{name}' missing from {names:?}"))
}

/// Whether the `[start, done]` windows of two async pairs overlap.
pub fn windows_overlap(names: &[String], a: (&str, &str), b: (&str, &str)) -> bool {
    let (a0, a1) = (position(names, a.0), position(names, a.1));
    let (b0, b1) = (position(names, b.0), position(names, b.1));
    a0 < b1 && b0 < a1
}
