// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::config::model::{ComputationConfig, ModuleFile, RawModuleFile};
use crate::errors::{Result, SchedError};
use crate::hlo::{HloComputation, HloInstruction, HloModule, HloSchedule, InstrId, Shape};
use crate::sched::ProfileStatistics;

impl TryFrom<RawModuleFile> for ModuleFile {
    type Error = SchedError;

    fn try_from(raw: RawModuleFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_module(&raw)?;

        let computations = raw
            .computations
            .iter()
            .map(build_computation)
            .collect::<Result<Vec<_>>>()?;
        let mut module = HloModule::new(&raw.module.name, computations, raw.module.entry.as_deref())?;
        install_declared_schedule(&mut module, &raw.computations)?;

        Ok(ModuleFile {
            module,
            mode: raw.module.mode,
            target: raw.module.target,
            scheduler: raw.scheduler,
            gpu: raw.gpu,
            profile: raw.profile.as_ref().map(ProfileStatistics::from),
        })
    }
}

fn validate_raw_module(raw: &RawModuleFile) -> Result<()> {
    ensure_has_computations(raw)?;
    validate_scheduler_config(raw)?;
    validate_references(raw)?;
    validate_instruction_dags(raw)?;
    validate_call_graph(raw)?;
    Ok(())
}

fn ensure_has_computations(raw: &RawModuleFile) -> Result<()> {
    if raw.computations.is_empty() {
        return Err(SchedError::ConfigError(
            "module must contain at least one [[computation]] section".to_string(),
        ));
    }
    for comp in &raw.computations {
        if comp.instructions.is_empty() {
            return Err(SchedError::ConfigError(format!(
                "computation '{}' has no instructions",
                comp.name
            )));
        }
    }
    Ok(())
}

fn validate_scheduler_config(raw: &RawModuleFile) -> Result<()> {
    let cfg = &raw.scheduler;
    let limits = [
        ("collective_permute_overlap_limit", cfg.collective_permute_overlap_limit),
        ("all_to_all_overlap_limit", cfg.all_to_all_overlap_limit),
        ("all_gather_overlap_limit", cfg.all_gather_overlap_limit),
        ("all_reduce_overlap_limit", cfg.all_reduce_overlap_limit),
        ("send_recv_overlap_limit", cfg.send_recv_overlap_limit),
        ("send_recv_host_overlap_limit", cfg.send_recv_host_overlap_limit),
        ("parallel_collective_overlap_limit", cfg.parallel_collective_overlap_limit),
    ];
    for (name, value) in limits {
        if value == 0 {
            return Err(SchedError::ConfigError(format!(
                "[scheduler].{name} must be >= 1 (got 0)"
            )));
        }
    }

    let slop = raw.gpu.memory_limit_slop_percent;
    if slop == 0 || slop > 100 {
        return Err(SchedError::ConfigError(format!(
            "[gpu].memory_limit_slop_percent must be in 1..=100 (got {slop})"
        )));
    }
    Ok(())
}

fn validate_references(raw: &RawModuleFile) -> Result<()> {
    let computation_names: Vec<&str> = raw.computations.iter().map(|c| c.name.as_str()).collect();

    if let Some(entry) = &raw.module.entry {
        if !computation_names.contains(&entry.as_str()) {
            return Err(SchedError::UnknownComputation(format!(
                "{entry} (named as [module].entry)"
            )));
        }
    }

    for comp in &raw.computations {
        let names: Vec<&str> = comp.instructions.iter().map(|i| i.name.as_str()).collect();
        for instr in &comp.instructions {
            for dep in instr.operands.iter().chain(&instr.control_predecessors) {
                if dep == &instr.name {
                    return Err(SchedError::ConfigError(format!(
                        "instruction '{}' in '{}' cannot depend on itself",
                        instr.name, comp.name
                    )));
                }
                if !names.contains(&dep.as_str()) {
                    return Err(SchedError::ConfigError(format!(
                        "instruction '{}' in '{}' references unknown instruction '{}'",
                        instr.name, comp.name, dep
                    )));
                }
            }
            for callee in &instr.calls {
                if !computation_names.contains(&callee.as_str()) {
                    return Err(SchedError::UnknownComputation(format!(
                        "{callee} (called by '{}' in '{}')",
                        instr.name, comp.name
                    )));
                }
            }
        }
        if let Some(schedule) = &comp.schedule {
            for name in schedule {
                if !names.contains(&name.as_str()) {
                    return Err(SchedError::ConfigError(format!(
                        "schedule of '{}' names unknown instruction '{}'",
                        comp.name, name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Instruction order for building: declaration order when it already puts
/// operands first, otherwise a topological order that still ends with the
/// last declared sink.
fn build_order(comp: &ComputationConfig) -> Result<Vec<usize>> {
    // Edge direction: operand -> user.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for instr in &comp.instructions {
        graph.add_node(instr.name.as_str());
    }
    for instr in &comp.instructions {
        for dep in instr.operands.iter().chain(&instr.control_predecessors) {
            graph.add_edge(dep.as_str(), instr.name.as_str(), ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        SchedError::DependencyCycle(format!(
            "cycle detected in computation '{}' involving instruction '{}'",
            comp.name,
            cycle.node_id()
        ))
    })?;

    let index: HashMap<&str, usize> = comp
        .instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.name.as_str(), i))
        .collect();

    let declared_is_topological = comp.instructions.iter().enumerate().all(|(i, instr)| {
        instr
            .operands
            .iter()
            .chain(&instr.control_predecessors)
            .all(|dep| index.get(dep.as_str()).is_some_and(|&d| d < i))
    });
    if declared_is_topological {
        return Ok((0..comp.instructions.len()).collect());
    }

    // The root is the last declared instruction nothing depends on; a sink
    // can always move to the end.
    let root = comp
        .instructions
        .iter()
        .rposition(|instr| graph.neighbors(instr.name.as_str()).next().is_none());
    let mut built: Vec<usize> = order
        .into_iter()
        .filter_map(|name| index.get(name).copied())
        .filter(|&i| Some(i) != root)
        .collect();
    built.extend(root);

    debug!(computation = %comp.name, "instructions reordered to satisfy dependencies");
    Ok(built)
}

fn validate_instruction_dags(raw: &RawModuleFile) -> Result<()> {
    for comp in &raw.computations {
        build_order(comp)?;
    }
    Ok(())
}

fn validate_call_graph(raw: &RawModuleFile) -> Result<()> {
    // Edge direction: caller -> callee.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for comp in &raw.computations {
        graph.add_node(comp.name.as_str());
    }
    for comp in &raw.computations {
        for instr in &comp.instructions {
            for callee in &instr.calls {
                graph.add_edge(comp.name.as_str(), callee.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SchedError::DependencyCycle(format!(
            "recursive call graph involving computation '{}'",
            cycle.node_id()
        ))),
    }
}

fn build_computation(cfg: &ComputationConfig) -> Result<HloComputation> {
    let mut comp = HloComputation::new(&cfg.name);
    let mut ids: HashMap<&str, InstrId> = HashMap::new();

    for i in build_order(cfg)? {
        let ic = &cfg.instructions[i];
        let resolve = |names: &[String]| -> Vec<InstrId> {
            names.iter().filter_map(|n| ids.get(n.as_str()).copied()).collect()
        };

        let mut instr = HloInstruction::new(&ic.name, ic.opcode, Shape::from(&ic.shape))
            .with_operands(resolve(&ic.operands))
            .with_control_predecessors(resolve(&ic.control_predecessors));
        for callee in &ic.calls {
            instr = instr.with_called_computation(callee);
        }
        if let Some(target) = &ic.custom_call_target {
            instr = instr.with_custom_call_target(target);
        }
        if let Some(hint) = ic.schedule {
            instr = instr.with_schedule_hint(hint);
        }
        if let Some(index) = ic.tuple_index {
            instr = instr.with_tuple_index(index);
        }
        for (key, value) in &ic.attributes {
            instr = instr.with_attribute(key, value);
        }

        let id = comp.add_instruction(instr)?;
        ids.insert(ic.name.as_str(), id);
    }
    Ok(comp)
}

fn install_declared_schedule(module: &mut HloModule, computations: &[ComputationConfig]) -> Result<()> {
    if computations.iter().all(|c| c.schedule.is_none()) {
        return Ok(());
    }

    let mut schedule = HloSchedule::from_post_order(module);
    for cfg in computations {
        let Some(names) = &cfg.schedule else {
            continue;
        };
        let comp = module.computation(&cfg.name)?;
        let sequence = names
            .iter()
            .map(|n| {
                comp.instruction_by_name(n)
                    .map(|i| i.id)
                    .ok_or_else(|| SchedError::UnknownInstruction(format!("{n} in '{}'", cfg.name)))
            })
            .collect::<Result<Vec<_>>>()?;
        schedule.set_sequence(&cfg.name, sequence);
    }
    module.set_schedule(schedule)
}
