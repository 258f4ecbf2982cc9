// tests/gpu_target.rs

mod common;

use common::{init_tracing, load_module_toml, position, windows_overlap};
use lhsched::schedule_module_file;
use lhsched_test_utils::builders::scheduled_names;

fn two_all_gathers(all_gather_limit: u32, stream_limit: u32) -> String {
    format!(
        r#"
[module]
name = "two_all_gathers"
target = "gpu"

[scheduler]
all_gather_overlap_limit = {all_gather_limit}
parallel_collective_overlap_limit = {stream_limit}

[[computation]]
name = "main"

[[computation.instruction]]
name = "p0"
opcode = "parameter"
shape = 1024

[[computation.instruction]]
name = "p1"
opcode = "parameter"
shape = 1024

[[computation.instruction]]
name = "ags0"
opcode = "all-gather-start"
shape = 2048
operands = ["p0"]

[[computation.instruction]]
name = "agd0"
opcode = "all-gather-done"
shape = 2048
operands = ["ags0"]

[[computation.instruction]]
name = "ags1"
opcode = "all-gather-start"
shape = 2048
operands = ["p1"]

[[computation.instruction]]
name = "agd1"
opcode = "all-gather-done"
shape = 2048
operands = ["ags1"]

[[computation.instruction]]
name = "c0"
opcode = "add"
shape = 1024
operands = ["p0", "p1"]

[[computation.instruction]]
name = "c1"
opcode = "multiply"
shape = 1024
operands = ["c0", "p0"]

[[computation.instruction]]
name = "root"
opcode = "tuple"
shape = [2048, 2048, 1024]
operands = ["agd0", "agd1", "c1"]
"#
    )
}

#[test]
fn collective_stream_limit_serializes_collectives() {
    init_tracing();
    let mut file = load_module_toml(&two_all_gathers(2, 1)).unwrap();
    schedule_module_file(&mut file).unwrap();
    let names = scheduled_names(&file.module, "main");

    assert!(
        !windows_overlap(&names, ("ags0", "agd0"), ("ags1", "agd1")),
        "stream limit 1 should serialize: {names:?}"
    );
}

#[test]
fn collectives_overlap_when_the_stream_allows_it() {
    let mut file = load_module_toml(&two_all_gathers(2, 2)).unwrap();
    schedule_module_file(&mut file).unwrap();
    let names = scheduled_names(&file.module, "main");

    assert!(windows_overlap(&names, ("ags0", "agd0"), ("ags1", "agd1")), "{names:?}");
}

const FORCED: &str = r#"
[module]
name = "forced"
target = "gpu"

[[computation]]
name = "main"

[[computation.instruction]]
name = "p"
opcode = "parameter"
shape = 16

[[computation.instruction]]
name = "x"
opcode = "negate"
shape = 16
operands = ["p"]

[[computation.instruction]]
name = "y"
opcode = "negate"
shape = 16
operands = ["p"]
attributes = { force_earliest_schedule = "true" }

[[computation.instruction]]
name = "root"
opcode = "tuple"
shape = [16, 16]
operands = ["x", "y"]
"#;

#[test]
fn force_earliest_attribute_moves_instruction_up() {
    let mut file = load_module_toml(FORCED).unwrap();
    schedule_module_file(&mut file).unwrap();
    let names = scheduled_names(&file.module, "main");

    assert!(position(&names, "y") < position(&names, "x"), "{names:?}");

    // Without the attribute the input order is kept.
    let mut plain = load_module_toml(&FORCED.replace("attributes = { force_earliest_schedule = \"true\" }", ""))
        .unwrap();
    schedule_module_file(&mut plain).unwrap();
    assert_eq!(scheduled_names(&plain.module, "main"), ["p", "x", "y", "root"]);
}

#[test]
fn disabled_latency_hiding_only_runs_early_late() {
    let toml = two_all_gathers(2, 2).replace(
        "[scheduler]",
        "[gpu]\nenable_latency_hiding_scheduler = false\n\n[scheduler]",
    );
    let mut file = load_module_toml(&toml).unwrap();
    schedule_module_file(&mut file).unwrap();
    let names = scheduled_names(&file.module, "main");

    // Starts float right behind their parameters, dones sink to the root.
    assert_eq!(position(&names, "ags0"), position(&names, "p0") + 1);
    assert_eq!(position(&names, "ags1"), position(&names, "p1") + 1);
    let root = position(&names, "root");
    assert_eq!(root, names.len() - 1);
    assert!(position(&names, "agd0") + 2 >= root && position(&names, "agd1") + 2 >= root);
}
