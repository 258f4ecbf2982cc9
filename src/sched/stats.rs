// src/sched/stats.rs

//! Post-hoc statistics for a finished schedule.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::errors::Result;
use crate::hlo::{HloComputation, InstrId, ShapeSizeFn};
use crate::sched::async_tracker::AsyncTracker;
use crate::sched::graph::{HloScheduleGraph, NodeIndex};
use crate::sched::latency::{LatencyEstimator, TimeCost, is_async_pair};
use crate::sched::memory::{ModulePressureState, sequence_memory_peak};
use crate::sched::resource::{KnownResource, Resource, ResourceUsageType};

/// Cycles lost waiting on async work, per resource, plus totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatistics {
    pub computation: String,
    pub wasted_cycles: BTreeMap<Resource, f64>,
    pub total_cycles: f64,
    pub memory_peak: u64,
}

impl SchedulerStatistics {
    pub fn total_wasted_cycles(&self) -> f64 {
        self.wasted_cycles.values().sum()
    }
}

impl fmt::Display for SchedulerStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "computation: {}", self.computation)?;
        for (resource, cycles) in &self.wasted_cycles {
            writeln!(f, "  wasted cycles [{resource}]: {cycles}")?;
        }
        writeln!(f, "  total wasted cycles: {}", self.total_wasted_cycles())?;
        writeln!(f, "  total cycles: {}", self.total_cycles)?;
        write!(f, "  memory peak: {} bytes", self.memory_peak)
    }
}

/// Walk `sequence` forward. Each async done waits until its start's
/// latency has elapsed; the wait is charged to the resource it releases.
pub fn compute_statistics(
    computation: &HloComputation,
    sequence: &[InstrId],
    latency_estimator: &dyn LatencyEstimator,
    async_tracker: &dyn AsyncTracker,
    shape_size: ShapeSizeFn,
    pressure_states: Option<&ModulePressureState>,
) -> Result<SchedulerStatistics> {
    let graph = HloScheduleGraph::new(computation, sequence, latency_estimator, async_tracker)?;

    let mut wasted_cycles: BTreeMap<Resource, f64> = BTreeMap::new();
    let mut finish: HashMap<NodeIndex, TimeCost> = HashMap::new();
    let mut time: TimeCost = 0.0;

    for index in 0..graph.len() {
        let node = graph.node(index);
        if node.is_supported_async_done() {
            let resource = node
                .resources()
                .iter()
                .find(|(_, usage)| *usage == ResourceUsageType::Release)
                .map(|(r, _)| *r)
                .unwrap_or(Resource::Known(KnownResource::NoResource));
            for edge in node.predecessors() {
                let start = graph.node(edge.target());
                if !is_async_pair(start, node) {
                    continue;
                }
                let Some(&started) = finish.get(&edge.target()) else {
                    continue;
                };
                let wait = (edge.latency() - (time - started)).max(0.0);
                *wasted_cycles.entry(resource).or_insert(0.0) += wait;
                time += wait;
            }
        }
        time += node.cost();
        finish.insert(index, time);
    }

    Ok(SchedulerStatistics {
        computation: computation.name().to_string(),
        wasted_cycles,
        total_cycles: time,
        memory_peak: sequence_memory_peak(computation, sequence, shape_size, pressure_states),
    })
}
