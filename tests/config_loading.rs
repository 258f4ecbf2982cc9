// tests/config_loading.rs

mod common;

use common::load_module_toml;
use lhsched::config::{SchedulerConfig, load_from_str};
use lhsched::hlo::{HloOpcode, ScheduleHint, Shape};
use lhsched::types::{SchedulingMode, TargetPlatform};
use lhsched_test_utils::builders::scheduled_names;

const MINIMAL: &str = r#"
[module]
name = "minimal"

[[computation]]
name = "main"

[[computation.instruction]]
name = "p"
opcode = "parameter"
shape = 8
"#;

#[test]
fn defaults_apply_when_sections_are_missing() {
    let file = load_module_toml(MINIMAL).unwrap();

    assert_eq!(file.scheduler, SchedulerConfig::default());
    assert_eq!(file.scheduler.all_reduce_overlap_limit, 1);
    assert_eq!(file.scheduler.memory_limit, u64::MAX);
    assert_eq!(file.mode, SchedulingMode::LatencyHiding);
    assert_eq!(file.target, TargetPlatform::Generic);
    assert_eq!(file.gpu.memory_limit_slop_percent, 95);
    assert!(file.gpu.enable_latency_hiding_scheduler);
    assert!(file.profile.is_none());
    assert!(!file.module.has_schedule());
}

#[test]
fn full_module_file_is_parsed() {
    let file = load_module_toml(
        r#"
[module]
name = "full"
entry = "main"
mode = "both"
target = "gpu"

[scheduler]
all_gather_overlap_limit = 3
schedule_send_recvs = true
aggressive_scheduling_policies = true
memory_limit = 4096

[gpu]
device_memory_bytes = 1048576
memory_limit_slop_percent = 80

[profile]
costs = { n = 12.5 }
latencies = [{ from = "s", to = "d", latency_us = 40.0 }]

[[computation]]
name = "body"

[[computation.instruction]]
name = "bp"
opcode = "parameter"
shape = [4, 4]

[[computation]]
name = "main"

[[computation.instruction]]
name = "p"
opcode = "parameter"
shape = [4, 4]

[[computation.instruction]]
name = "w"
opcode = "while"
shape = [4, 4]
operands = ["p"]
calls = ["body"]

[[computation.instruction]]
name = "g"
opcode = "get-tuple-element"
shape = 4
operands = ["w"]
tuple_index = 1

[[computation.instruction]]
name = "n"
opcode = "custom-call"
shape = 4
operands = ["g"]
custom_call_target = "__cublas$gemm"
schedule = "latest"
attributes = { force_earliest_schedule = "true" }
"#,
    )
    .unwrap();

    assert_eq!(file.mode, SchedulingMode::Both);
    assert_eq!(file.target, TargetPlatform::Gpu);
    assert_eq!(file.scheduler.all_gather_overlap_limit, 3);
    assert_eq!(file.scheduler.all_reduce_overlap_limit, 1);
    assert!(file.scheduler.schedule_send_recvs);
    assert_eq!(file.scheduler.memory_limit, 4096);
    assert_eq!(file.gpu.device_memory_bytes, 1 << 20);
    assert_eq!(file.gpu.memory_limit_slop_percent, 80);

    let profile = file.profile.as_ref().unwrap();
    assert_eq!(profile.cost("n"), Some(12.5));
    assert_eq!(profile.latency("s", "d"), Some(40.0));

    let module = &file.module;
    assert_eq!(module.entry_computation().name(), "main");
    let main = module.computation("main").unwrap();
    let w = main.instruction_by_name("w").unwrap();
    assert_eq!(w.opcode, HloOpcode::While);
    assert_eq!(w.called_computations, vec!["body".to_string()]);
    assert_eq!(w.shape, Shape::Tuple(vec![Shape::array(4), Shape::array(4)]));

    let n = main.instruction_by_name("n").unwrap();
    assert_eq!(n.custom_call_target.as_deref(), Some("__cublas$gemm"));
    assert_eq!(n.schedule_hint, Some(ScheduleHint::Latest));
    assert!(n.attribute_flag("force_earliest_schedule"));
    assert_eq!(main.instruction_by_name("g").unwrap().tuple_index, Some(1));
}

#[test]
fn out_of_order_declarations_are_sorted_by_dependency() {
    let file = load_module_toml(
        r#"
[module]
name = "shuffled"

[[computation]]
name = "main"

[[computation.instruction]]
name = "use"
opcode = "add"
shape = 8
operands = ["x", "p"]

[[computation.instruction]]
name = "x"
opcode = "negate"
shape = 8
operands = ["p"]

[[computation.instruction]]
name = "p"
opcode = "parameter"
shape = 8
"#,
    )
    .unwrap();

    let main = file.module.computation("main").unwrap();
    let order: Vec<&str> = main.instructions().iter().map(|i| i.name.as_str()).collect();
    assert_eq!(order, ["p", "x", "use"]);
    assert_eq!(main.root().unwrap().name, "use");
}

#[test]
fn reordering_keeps_the_last_declared_sink_as_root() {
    let file = load_module_toml(
        r#"
[module]
name = "two_sinks"

[[computation]]
name = "main"

[[computation.instruction]]
name = "side"
opcode = "negate"
shape = 8
operands = ["p"]

[[computation.instruction]]
name = "out"
opcode = "add"
shape = 8
operands = ["x", "p"]

[[computation.instruction]]
name = "x"
opcode = "negate"
shape = 8
operands = ["q"]

[[computation.instruction]]
name = "q"
opcode = "parameter"
shape = 8

[[computation.instruction]]
name = "p"
opcode = "parameter"
shape = 8
"#,
    )
    .unwrap();

    let main = file.module.computation("main").unwrap();
    assert_eq!(main.instruction_count(), 5);
    assert_eq!(main.root().unwrap().name, "out");
}

#[test]
fn declared_schedule_is_installed() {
    let file = load_module_toml(
        r#"
[module]
name = "scheduled"

[[computation]]
name = "main"
schedule = ["p", "b", "a", "r"]

[[computation.instruction]]
name = "p"
opcode = "parameter"
shape = 8

[[computation.instruction]]
name = "a"
opcode = "negate"
shape = 8
operands = ["p"]

[[computation.instruction]]
name = "b"
opcode = "exponential"
shape = 8
operands = ["p"]

[[computation.instruction]]
name = "r"
opcode = "add"
shape = 8
operands = ["a", "b"]
"#,
    )
    .unwrap();

    assert_eq!(scheduled_names(&file.module, "main"), ["p", "b", "a", "r"]);
}

#[test]
fn parse_without_validation_keeps_raw_names() {
    let raw = load_from_str(MINIMAL).unwrap();
    assert_eq!(raw.module.name, "minimal");
    assert_eq!(raw.computations.len(), 1);
    assert_eq!(raw.computations[0].instructions[0].name, "p");
}
