// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod gpu;
pub mod hlo;
pub mod logging;
pub mod sched;
pub mod types;

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ModuleFile;
use crate::gpu::{GpuScheduleOptions, schedule_gpu_module};
use crate::hlo::{HloComputation, HloModule, InstrId};
use crate::sched::{
    ApproximateLatencyEstimator, GenericAsyncTracker, LatencyHidingScheduler, SchedulingSummary,
    select_latency_estimator,
};
use crate::types::TargetPlatform;

/// High-level entry point used by `main.rs`.
///
/// Loads the module file, applies CLI overrides, schedules every
/// computation and prints the resulting order.
pub fn run(args: CliArgs) -> Result<()> {
    let module_path = PathBuf::from(&args.module);
    let mut file = load_and_validate(&module_path)
        .with_context(|| format!("loading module file {}", module_path.display()))?;
    apply_cli_overrides(&mut file, &args);

    let filter = args
        .computation
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --computation regex")?;

    if args.dry_run {
        print!("{}", render_dry_run(&file));
        debug!("dry-run complete (no scheduling)");
        return Ok(());
    }

    let summary = schedule_module_file(&mut file)?;
    info!(
        module = file.module.name(),
        changed = summary.changed_computations,
        memory_peak = summary.memory_peak,
        "scheduling finished"
    );

    print!("{}", render_schedule(&file.module, filter.as_ref()));
    if args.stats {
        print!("{}", render_statistics(&summary, filter.as_ref()));
    }
    Ok(())
}

fn apply_cli_overrides(file: &mut ModuleFile, args: &CliArgs) {
    if let Some(mode) = args.mode {
        file.mode = mode;
    }
    if let Some(target) = args.target {
        file.target = target;
    }
    if let Some(bytes) = args.device_memory {
        file.gpu.device_memory_bytes = bytes;
    }
}

/// Schedule the module in `file` for its target and install the result.
pub fn schedule_module_file(file: &mut ModuleFile) -> crate::errors::Result<SchedulingSummary> {
    match file.target {
        TargetPlatform::Generic => {
            let estimator = select_latency_estimator(
                &file.scheduler,
                file.profile.clone(),
                Box::new(ApproximateLatencyEstimator::new()),
            );
            let tracker = Box::new(GenericAsyncTracker::new(file.scheduler.clone()));
            LatencyHidingScheduler::new(estimator, tracker, file.scheduler.clone())
                .with_mode(file.mode)
                .run(&mut file.module)
        }
        TargetPlatform::Gpu => {
            let options = GpuScheduleOptions {
                config: file.scheduler.clone(),
                device_memory_bytes: file.gpu.device_memory_bytes,
                memory_limit_slop_percent: file.gpu.memory_limit_slop_percent,
                enable_latency_hiding_scheduler: file.gpu.enable_latency_hiding_scheduler,
                mode: file.mode,
                profile: file.profile.clone(),
            };
            schedule_gpu_module(&mut file.module, &options)
        }
    }
}

/// Hex blake3 digest of the instruction names of `sequence`, in order.
pub fn sequence_fingerprint(comp: &HloComputation, sequence: &[InstrId]) -> String {
    let mut hasher = blake3::Hasher::new();
    for &id in sequence {
        let name = comp.instruction(id).map(|i| i.name.as_str()).unwrap_or("?");
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

fn matches_filter(filter: Option<&Regex>, name: &str) -> bool {
    filter.is_none_or(|re| re.is_match(name))
}

/// One block per computation: header with fingerprint, then one
/// instruction name per line.
pub fn render_schedule(module: &HloModule, filter: Option<&Regex>) -> String {
    let schedule = module.schedule_or_post_order();
    let mut out = String::new();
    for comp in module.computations() {
        if !matches_filter(filter, comp.name()) {
            continue;
        }
        let Some(sequence) = schedule.sequence(comp.name()) else {
            continue;
        };
        let _ = writeln!(
            out,
            "computation {} ({} instructions, blake3 {})",
            comp.name(),
            sequence.len(),
            sequence_fingerprint(comp, sequence)
        );
        for &id in sequence {
            if let Some(instr) = comp.instruction(id) {
                let _ = writeln!(out, "  {}", instr.name);
            }
        }
    }
    out
}

pub fn render_statistics(summary: &SchedulingSummary, filter: Option<&Regex>) -> String {
    let mut out = String::new();
    for stats in &summary.statistics {
        if matches_filter(filter, &stats.computation) {
            let _ = writeln!(out, "{stats}");
        }
    }
    let _ = writeln!(out, "module memory peak: {}", summary.memory_peak);
    out
}

/// Dry-run output: settings, then computations with their instructions.
pub fn render_dry_run(file: &ModuleFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "lhsched dry-run");
    let _ = writeln!(out, "  module = {}", file.module.name());
    let _ = writeln!(out, "  mode = {}", file.mode);
    let _ = writeln!(out, "  target = {}", file.target);
    let _ = writeln!(out, "  scheduler = {:?}", file.scheduler);
    let _ = writeln!(out);

    let entry = file.module.entry_computation().name();
    let _ = writeln!(out, "computations ({}):", file.module.computations().len());
    for comp in file.module.computations() {
        let marker = if comp.name() == entry { " (entry)" } else { "" };
        let _ = writeln!(out, "  - {}{marker}", comp.name());
        for instr in comp.instructions() {
            let operands: Vec<&str> = instr
                .operands
                .iter()
                .filter_map(|&o| comp.instruction(o).map(|i| i.name.as_str()))
                .collect();
            let _ = write!(out, "      {} = {}", instr.name, instr.opcode.as_str());
            if operands.is_empty() {
                let _ = writeln!(out);
            } else {
                let _ = writeln!(out, "({})", operands.join(", "));
            }
        }
    }
    out
}
