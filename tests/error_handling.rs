// tests/error_handling.rs

mod common;

use common::load_module_toml;
use lhsched::config::load_and_validate;
use lhsched::errors::SchedError;

#[test]
fn control_cycle_returns_structured_error() {
    let result = load_module_toml(
        r#"
[module]
name = "cyclic"

[[computation]]
name = "main"

[[computation.instruction]]
name = "a"
opcode = "negate"
control_predecessors = ["b"]

[[computation.instruction]]
name = "b"
opcode = "negate"
operands = ["a"]
"#,
    );

    match result {
        Err(SchedError::DependencyCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("main"));
        }
        Err(e) => panic!("Expected DependencyCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn recursive_calls_are_rejected() {
    let result = load_module_toml(
        r#"
[module]
name = "recursive"

[[computation]]
name = "f"

[[computation.instruction]]
name = "c"
opcode = "call"
calls = ["g"]

[[computation]]
name = "g"

[[computation.instruction]]
name = "c"
opcode = "call"
calls = ["f"]
"#,
    );

    match result {
        Err(SchedError::DependencyCycle(msg)) => assert!(msg.contains("recursive call graph")),
        other => panic!("Expected DependencyCycle error, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn unknown_operand_returns_config_error() {
    let result = load_module_toml(
        r#"
[module]
name = "dangling"

[[computation]]
name = "main"

[[computation.instruction]]
name = "a"
opcode = "negate"
operands = ["NonExistent"]
"#,
    );

    match result {
        Err(SchedError::ConfigError(msg)) => {
            assert!(msg.contains("unknown instruction"));
            assert!(msg.contains("NonExistent"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn self_dependency_returns_config_error() {
    let result = load_module_toml(
        r#"
[module]
name = "selfish"

[[computation]]
name = "main"

[[computation.instruction]]
name = "a"
opcode = "negate"
operands = ["a"]
"#,
    );
    assert!(matches!(result, Err(SchedError::ConfigError(msg)) if msg.contains("itself")));
}

#[test]
fn unknown_callee_returns_unknown_computation() {
    let result = load_module_toml(
        r#"
[module]
name = "missing_callee"

[[computation]]
name = "main"

[[computation.instruction]]
name = "c"
opcode = "call"
calls = ["nowhere"]
"#,
    );
    assert!(matches!(result, Err(SchedError::UnknownComputation(msg)) if msg.contains("nowhere")));
}

#[test]
fn zero_overlap_limit_is_rejected() {
    let result = load_module_toml(
        r#"
[module]
name = "zero"

[scheduler]
all_reduce_overlap_limit = 0

[[computation]]
name = "main"

[[computation.instruction]]
name = "p"
opcode = "parameter"
"#,
    );
    assert!(
        matches!(result, Err(SchedError::ConfigError(msg)) if msg.contains("all_reduce_overlap_limit"))
    );
}

#[test]
fn slop_outside_percent_range_is_rejected() {
    let result = load_module_toml(
        r#"
[module]
name = "slop"

[gpu]
memory_limit_slop_percent = 150

[[computation]]
name = "main"

[[computation.instruction]]
name = "p"
opcode = "parameter"
"#,
    );
    assert!(matches!(result, Err(SchedError::ConfigError(msg)) if msg.contains("slop")));
}

#[test]
fn declared_schedule_must_respect_operands() {
    let result = load_module_toml(
        r#"
[module]
name = "bad_order"

[[computation]]
name = "main"
schedule = ["n", "p"]

[[computation.instruction]]
name = "p"
opcode = "parameter"

[[computation.instruction]]
name = "n"
opcode = "negate"
operands = ["p"]
"#,
    );
    assert!(matches!(result, Err(SchedError::InvalidSchedule { computation, .. }) if computation == "main"));
}

#[test]
fn unknown_opcode_is_a_toml_error() {
    let result = load_module_toml(
        r#"
[module]
name = "bad_opcode"

[[computation]]
name = "main"

[[computation.instruction]]
name = "p"
opcode = "teleport"
"#,
    );
    assert!(matches!(result, Err(SchedError::TomlError(_))));
}

#[test]
fn empty_module_is_rejected() {
    let result = load_module_toml("[module]\nname = \"empty\"\n");
    assert!(matches!(result, Err(SchedError::ConfigError(msg)) if msg.contains("at least one")));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_and_validate(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(SchedError::IoError(_))));
}
