// src/sched/core.rs

//! Bottom-up list scheduler for a single computation.
//!
//! Starting from the root, the core repeatedly picks the best node whose
//! successors are all scheduled, appends it to a reversed sequence and
//! advances a logical clock. The forward order is the reverse of that
//! sequence.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::errors::{Result, SchedError};
use crate::hlo::{HloComputation, HloModule, InstrId, ShapeSizeFn, shape_size_bytes};
use crate::sched::async_tracker::AsyncTracker;
use crate::sched::graph::{HloScheduleGraph, NodeIndex};
use crate::sched::latency::{LatencyEstimator, TimeCost};
use crate::sched::memory::{MemoryPressureState, MemoryPressureTracker, ModulePressureState};
use crate::sched::resource::{Resource, ResourceUsageType};

/// Everything the comparator looks at for one ready node.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCandidate {
    pub node: NodeIndex,
    pub instr: InstrId,
    pub original_position: usize,
    pub force_delay: bool,
    pub async_depth: TimeCost,
    pub ready_time: TimeCost,
    pub is_supported_async_done: bool,
    pub resource_feasible: bool,
    /// `(increase, peak)` from the memory tracker.
    pub memory: (i64, u64),
}

/// The rule that decided between two candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateReason {
    /// Only one candidate was considered.
    Only,
    TargetRule,
    ForceDelay,
    AsyncDepth,
    Memory,
    AsyncDone,
    Stall,
    OriginalPosition,
}

impl fmt::Display for CandidateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateReason::Only => "only-candidate",
            CandidateReason::TargetRule => "target-rule",
            CandidateReason::ForceDelay => "force-delay",
            CandidateReason::AsyncDepth => "async-depth",
            CandidateReason::Memory => "memory",
            CandidateReason::AsyncDone => "async-done",
            CandidateReason::Stall => "stall",
            CandidateReason::OriginalPosition => "original-position",
        };
        f.write_str(s)
    }
}

/// Platform hook consulted before the default comparison chain. Returns
/// `Some(true)` when the first candidate should win, `Some(false)` when the
/// second should, `None` to defer.
pub type TargetSchedulingRule = Box<dyn Fn(&ScheduleCandidate, &ScheduleCandidate) -> Option<bool>>;

/// Structured result of one scheduling step.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleStep {
    pub scheduled: InstrId,
    pub schedule_time: TimeCost,
    pub reason: CandidateReason,
    /// False when every ready node violated a resource limit.
    pub feasible: bool,
    pub newly_ready: Vec<InstrId>,
}

/// Working state for one computation.
#[derive(Debug)]
pub struct SchedulingState<'a> {
    graph: HloScheduleGraph<'a>,
    ready_set: Vec<NodeIndex>,
    max_concurrent_resource: BTreeMap<Resource, u32>,
    resources_in_flight: BTreeMap<Resource, u32>,
    new_sequence_reversed: Vec<InstrId>,
    current_time: TimeCost,
    memory_tracker: MemoryPressureTracker<'a>,
    module: Option<&'a HloModule>,
}

impl<'a> SchedulingState<'a> {
    pub fn graph(&self) -> &HloScheduleGraph<'a> {
        &self.graph
    }

    pub fn ready_set(&self) -> &[NodeIndex] {
        &self.ready_set
    }

    pub fn current_time(&self) -> TimeCost {
        self.current_time
    }

    pub fn resources_in_flight(&self, resource: Resource) -> u32 {
        self.resources_in_flight.get(&resource).copied().unwrap_or(0)
    }

    pub fn max_concurrent_resource(&self, resource: Resource) -> u32 {
        self.max_concurrent_resource
            .get(&resource)
            .copied()
            .unwrap_or(u32::MAX)
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_tracker.memory_usage()
    }

    pub fn is_done(&self) -> bool {
        self.ready_set.is_empty()
    }

    pub fn scheduled_count(&self) -> usize {
        self.new_sequence_reversed.len()
    }
}

/// Output of scheduling one computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationSchedule {
    pub sequence: Vec<InstrId>,
    pub memory_state: MemoryPressureState,
}

/// Default candidate selection and node bookkeeping.
pub struct DefaultSchedulerCore<'s> {
    latency_estimator: &'s dyn LatencyEstimator,
    async_tracker: &'s dyn AsyncTracker,
    config: &'s SchedulerConfig,
    target_rule: Option<&'s TargetSchedulingRule>,
}

impl fmt::Debug for DefaultSchedulerCore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultSchedulerCore")
            .field("latency_estimator", &self.latency_estimator)
            .field("async_tracker", &self.async_tracker)
            .field("config", &self.config)
            .field("target_rule", &self.target_rule.is_some())
            .finish()
    }
}

/// Winner when exactly one side satisfies `cond`.
fn choose(a_cond: bool, b_cond: bool, reason: CandidateReason) -> Option<(bool, CandidateReason)> {
    (a_cond != b_cond).then_some((a_cond, reason))
}

impl<'s> DefaultSchedulerCore<'s> {
    pub fn new(
        latency_estimator: &'s dyn LatencyEstimator,
        async_tracker: &'s dyn AsyncTracker,
        config: &'s SchedulerConfig,
        target_rule: Option<&'s TargetSchedulingRule>,
    ) -> Self {
        Self {
            latency_estimator,
            async_tracker,
            config,
            target_rule,
        }
    }

    /// Build the graph and seed the ready set with nodes that have no
    /// successors.
    pub fn initialize_scheduling_state<'a>(
        &self,
        computation: &'a HloComputation,
        sequence: &[InstrId],
        module: Option<&'a HloModule>,
        pressure_states: Option<&'a ModulePressureState>,
    ) -> Result<SchedulingState<'a>> {
        let graph = HloScheduleGraph::new(computation, sequence, self.latency_estimator, self.async_tracker)?;
        let ready_set = graph.bottom_nodes();

        let shape_size: ShapeSizeFn = match pressure_states {
            Some(states) => states.shape_size(),
            None => shape_size_bytes,
        };
        let mut memory_tracker =
            MemoryPressureTracker::with_default_analysis(computation, shape_size, pressure_states);
        let initial_live = pressure_states
            .and_then(|s| s.pressure_state(computation.name()))
            .map(|s| s.live_ids_at_bottom.clone())
            .unwrap_or_default();
        memory_tracker.initialize(&initial_live, 0);

        debug!(
            computation = computation.name(),
            nodes = graph.len(),
            ready = ready_set.len(),
            "scheduling state initialised"
        );

        Ok(SchedulingState {
            graph,
            ready_set,
            max_concurrent_resource: self.async_tracker.concurrent_resource_limits(),
            resources_in_flight: BTreeMap::new(),
            new_sequence_reversed: Vec::new(),
            current_time: 0.0,
            memory_tracker,
            module,
        })
    }

    /// Whether scheduling `node` now keeps every resource within its cap.
    fn is_resource_feasible(&self, state: &SchedulingState<'_>, node: NodeIndex) -> bool {
        let n = state.graph.node(node);
        for (resource, usage) in n.resources() {
            if *usage == ResourceUsageType::Release
                && state.resources_in_flight(*resource) + 1 > state.max_concurrent_resource(*resource)
            {
                return false;
            }
        }
        if n.instr().called_computations.is_empty() || !n.resources().is_empty() {
            return true;
        }
        state.max_concurrent_resource.iter().all(|(&resource, &limit)| {
            let needed = self
                .async_tracker
                .num_resources_per_instruction(resource, n.instr(), state.module);
            needed == 0 || state.resources_in_flight(resource).saturating_add(needed) <= limit
        })
    }

    fn candidate(&self, state: &SchedulingState<'_>, node: NodeIndex) -> ScheduleCandidate {
        let n = state.graph.node(node);
        ScheduleCandidate {
            node,
            instr: n.instr().id,
            original_position: n.original_position(),
            force_delay: n.force_delay(),
            async_depth: n.async_depth(),
            ready_time: n.ready_time(),
            is_supported_async_done: n.is_supported_async_done(),
            resource_feasible: self.is_resource_feasible(state, node),
            memory: state.memory_tracker.memory_pressure_difference(n.instr()),
        }
    }

    /// `(a wins, deciding rule)`.
    fn compare(
        &self,
        state: &SchedulingState<'_>,
        a: &ScheduleCandidate,
        b: &ScheduleCandidate,
    ) -> (bool, CandidateReason) {
        if let Some(rule) = self.target_rule {
            if let Some(a_wins) = rule(a, b) {
                return (a_wins, CandidateReason::TargetRule);
            }
        }
        if let Some(r) = choose(!a.force_delay, !b.force_delay, CandidateReason::ForceDelay) {
            return r;
        }
        if a.async_depth != b.async_depth {
            return (a.async_depth > b.async_depth, CandidateReason::AsyncDepth);
        }
        if self.config.memory_limit != u64::MAX {
            let usage = state.memory_tracker.memory_usage();
            let limit = self.config.memory_limit;
            let a_fits = usage.saturating_add(a.memory.1) <= limit;
            let b_fits = usage.saturating_add(b.memory.1) <= limit;
            if let Some(r) = choose(a_fits, b_fits, CandidateReason::Memory) {
                return r;
            }
            if !a_fits && !b_fits && a.memory.0 != b.memory.0 {
                return (a.memory.0 < b.memory.0, CandidateReason::Memory);
            }
        }
        if self.config.aggressive_scheduling_policies {
            if let Some(r) = choose(
                a.is_supported_async_done,
                b.is_supported_async_done,
                CandidateReason::AsyncDone,
            ) {
                return r;
            }
        }
        let now = state.current_time;
        if let Some(r) = choose(a.ready_time <= now, b.ready_time <= now, CandidateReason::Stall) {
            return r;
        }
        if a.ready_time > now && a.ready_time != b.ready_time {
            return (a.ready_time < b.ready_time, CandidateReason::Stall);
        }
        (
            a.original_position > b.original_position,
            CandidateReason::OriginalPosition,
        )
    }

    /// Pick the best ready node. Infeasible nodes are considered only when
    /// nothing feasible is ready.
    pub fn find_and_extract_best_node_available(
        &self,
        state: &SchedulingState<'_>,
    ) -> Option<(ScheduleCandidate, CandidateReason)> {
        let all: Vec<ScheduleCandidate> = state
            .ready_set
            .iter()
            .map(|&n| self.candidate(state, n))
            .collect();
        let feasible: Vec<&ScheduleCandidate> = all.iter().filter(|c| c.resource_feasible).collect();
        let pool: Vec<&ScheduleCandidate> = if feasible.is_empty() {
            if !all.is_empty() {
                warn!(
                    computation = state.graph.computation().name(),
                    ready = all.len(),
                    "every ready node exceeds a resource limit; scheduling best effort"
                );
            }
            all.iter().collect()
        } else {
            feasible
        };

        let mut iter = pool.into_iter();
        let mut best = iter.next()?;
        // Reported reason: the rule under which `best` took the lead, or
        // first held it when it was never displaced.
        let mut reason = CandidateReason::Only;
        for c in iter {
            let (c_wins, why) = self.compare(state, c, best);
            if c_wins {
                best = c;
                reason = why;
            } else if reason == CandidateReason::Only {
                reason = why;
            }
        }
        Some((best.clone(), reason))
    }

    /// Commit `node` to the schedule and release its predecessors.
    fn schedule_node(&self, state: &mut SchedulingState<'_>, node: NodeIndex) -> (TimeCost, Vec<InstrId>) {
        let (instr, cost, ready_time) = {
            let n = state.graph.node(node);
            (n.instr(), n.cost(), n.ready_time())
        };
        let schedule_time = state.current_time.max(ready_time);
        {
            let n = state.graph.node_mut(node);
            n.set_ready_time(schedule_time);
            n.set_scheduled();
        }
        state.current_time = schedule_time + cost;
        state.ready_set.retain(|&r| r != node);
        state.new_sequence_reversed.push(instr.id);

        for (resource, usage) in state.graph.node(node).resources().to_vec() {
            let in_flight = state.resources_in_flight.entry(resource).or_insert(0);
            match usage {
                ResourceUsageType::Release => *in_flight += 1,
                ResourceUsageType::Occupy => *in_flight = in_flight.saturating_sub(1),
            }
        }

        state.memory_tracker.update_buffers(instr);

        for edge in state.graph.node(node).successors().to_vec() {
            state.graph.decrement_indegree(edge.target());
        }

        let mut newly_ready = Vec::new();
        for edge in state.graph.node(node).predecessors().to_vec() {
            let pred = edge.target();
            if state.graph.decrement_outdegree(pred) != 0 {
                continue;
            }
            let ready_time = state
                .graph
                .node(pred)
                .successors()
                .iter()
                .map(|e| state.graph.node(e.target()).ready_time() + e.latency())
                .fold(0.0, TimeCost::max);
            state.graph.node_mut(pred).set_ready_time(ready_time);
            state.ready_set.push(pred);
            newly_ready.push(state.graph.node(pred).instr().id);
        }

        trace!(
            instr = %instr.name,
            schedule_time,
            current_time = state.current_time,
            memory = state.memory_tracker.memory_usage(),
            "scheduled node"
        );
        (schedule_time, newly_ready)
    }

    /// Run one step. Returns `None` once the ready set is empty.
    pub fn schedule_step(&self, state: &mut SchedulingState<'_>) -> Option<ScheduleStep> {
        let (best, reason) = self.find_and_extract_best_node_available(state)?;
        let (schedule_time, newly_ready) = self.schedule_node(state, best.node);
        Some(ScheduleStep {
            scheduled: best.instr,
            schedule_time,
            reason,
            feasible: best.resource_feasible,
            newly_ready,
        })
    }

    /// Forward order once the ready set has drained.
    pub fn finish(&self, state: SchedulingState<'_>) -> Result<ComputationSchedule> {
        let total = state.graph.len();
        let scheduled = state.new_sequence_reversed.len();
        if scheduled != total {
            return Err(SchedError::Cycle {
                computation: state.graph.computation().name().to_string(),
                remaining: total - scheduled,
            });
        }
        let mut sequence = state.new_sequence_reversed;
        sequence.reverse();
        Ok(ComputationSchedule {
            sequence,
            memory_state: state.memory_tracker.pressure_state().clone(),
        })
    }

    /// Schedule a whole computation starting from `sequence`.
    pub fn schedule_computation(
        &self,
        computation: &HloComputation,
        sequence: &[InstrId],
        module: Option<&HloModule>,
        pressure_states: Option<&ModulePressureState>,
    ) -> Result<ComputationSchedule> {
        let mut state = self.initialize_scheduling_state(computation, sequence, module, pressure_states)?;
        while let Some(step) = self.schedule_step(&mut state) {
            if !step.feasible {
                debug!(
                    computation = computation.name(),
                    instr = step.scheduled,
                    "scheduled over a resource limit"
                );
            }
        }
        let out = self.finish(state)?;
        info!(
            computation = computation.name(),
            instructions = out.sequence.len(),
            memory_peak = out.memory_state.memory_peak,
            "computation scheduled"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlo::{HloInstruction, HloOpcode, Shape};
    use crate::sched::async_tracker::GenericAsyncTracker;
    use crate::sched::latency::ApproximateLatencyEstimator;

    fn add(c: &mut HloComputation, name: &str, op: HloOpcode, operands: &[InstrId]) -> InstrId {
        c.add_instruction(HloInstruction::new(name, op, Shape::array(4)).with_operands(operands.to_vec()))
            .unwrap()
    }

    fn names(c: &HloComputation, seq: &[InstrId]) -> Vec<String> {
        seq.iter().map(|&i| c.instruction(i).unwrap().name.clone()).collect()
    }

    #[test]
    fn independent_nodes_keep_input_order() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let a = add(&mut c, "a", HloOpcode::Negate, &[p]);
        let b = add(&mut c, "b", HloOpcode::Negate, &[p]);
        add(&mut c, "t", HloOpcode::Tuple, &[a, b]);

        let cfg = SchedulerConfig::default();
        let tracker = GenericAsyncTracker::new(cfg.clone());
        let core = DefaultSchedulerCore::new(&ApproximateLatencyEstimator, &tracker, &cfg, None);
        let out = core.schedule_computation(&c, &c.post_order(), None, None).unwrap();
        assert_eq!(names(&c, &out.sequence), vec!["p", "a", "b", "t"]);
    }

    #[test]
    fn first_step_schedules_the_root() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let a = add(&mut c, "a", HloOpcode::Negate, &[p]);
        add(&mut c, "r", HloOpcode::Negate, &[a]);

        let cfg = SchedulerConfig::default();
        let tracker = GenericAsyncTracker::new(cfg.clone());
        let core = DefaultSchedulerCore::new(&ApproximateLatencyEstimator, &tracker, &cfg, None);
        let mut state = core
            .initialize_scheduling_state(&c, &c.post_order(), None, None)
            .unwrap();

        let step = core.schedule_step(&mut state).unwrap();
        assert_eq!(step.scheduled, 2);
        assert_eq!(step.reason, CandidateReason::Only);
        assert_eq!(step.newly_ready, vec![a]);
        assert_eq!(state.current_time(), ApproximateLatencyEstimator::LOW_COST);
    }

    #[test]
    fn target_rule_runs_first() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let a = add(&mut c, "a", HloOpcode::Negate, &[p]);
        let b = add(&mut c, "b", HloOpcode::Negate, &[p]);
        add(&mut c, "t", HloOpcode::Tuple, &[a, b]);

        // Prefer the smaller position bottom-up, i.e. reverse the default tie-break.
        let rule: TargetSchedulingRule = Box::new(|x: &ScheduleCandidate, y: &ScheduleCandidate| {
            (x.original_position != y.original_position).then(|| x.original_position < y.original_position)
        });
        let cfg = SchedulerConfig::default();
        let tracker = GenericAsyncTracker::new(cfg.clone());
        let core = DefaultSchedulerCore::new(&ApproximateLatencyEstimator, &tracker, &cfg, Some(&rule));
        let out = core.schedule_computation(&c, &c.post_order(), None, None).unwrap();
        assert_eq!(names(&c, &out.sequence), vec!["p", "b", "a", "t"]);
    }

    #[test]
    fn reason_names_the_rule_that_picked_the_winner() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let x = add(&mut c, "x", HloOpcode::Negate, &[p]);
        let y = add(&mut c, "y", HloOpcode::Negate, &[p]);
        let z = add(&mut c, "z", HloOpcode::Negate, &[p]);

        // Only decides between x and y.
        let rule: TargetSchedulingRule = Box::new(move |a: &ScheduleCandidate, b: &ScheduleCandidate| {
            match (a.instr, b.instr) {
                (i, j) if i == y && j == x => Some(true),
                (i, j) if i == x && j == y => Some(false),
                _ => None,
            }
        });
        let cfg = SchedulerConfig::default();
        let tracker = GenericAsyncTracker::new(cfg.clone());
        let core = DefaultSchedulerCore::new(&ApproximateLatencyEstimator, &tracker, &cfg, Some(&rule));
        let mut state = core
            .initialize_scheduling_state(&c, &c.post_order(), None, None)
            .unwrap();
        let zi = state.graph.node_index(z).unwrap();
        state.graph.node_mut(zi).set_force_delay(true);

        let (picked, reason) = core.find_and_extract_best_node_available(&state).unwrap();
        assert_eq!(picked.instr, y);
        assert_eq!(reason, CandidateReason::TargetRule);
    }

    #[test]
    fn cycle_in_control_edges_is_fatal() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let a = add(&mut c, "a", HloOpcode::Negate, &[p]);
        add(&mut c, "b", HloOpcode::Negate, &[a]);

        let cfg = SchedulerConfig::default();
        let tracker = GenericAsyncTracker::new(cfg.clone());
        let core = DefaultSchedulerCore::new(&ApproximateLatencyEstimator, &tracker, &cfg, None);
        let mut state = core
            .initialize_scheduling_state(&c, &c.post_order(), None, None)
            .unwrap();
        // b -> a as an extra ordering edge closes the loop a -> b -> a.
        let (ai, bi) = (state.graph.node_index(a).unwrap(), state.graph.node_index(2).unwrap());
        assert!(state.graph.add_control_edge(bi, ai, 0.0));
        state.ready_set = state.graph.bottom_nodes();
        assert!(state.ready_set.is_empty());

        while core.schedule_step(&mut state).is_some() {}
        let err = core.finish(state).unwrap_err();
        assert!(matches!(err, SchedError::Cycle { remaining: 3, .. }));
    }
}
