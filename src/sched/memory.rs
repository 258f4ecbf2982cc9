// src/sched/memory.rs

//! Memory pressure simulation for the bottom-up walk.
//!
//! Walking a computation from its root upwards, a buffer becomes live when
//! its last user (first one seen bottom-up) is scheduled and dies at its
//! defining instruction. Estimates are advisory: unknown buffers and
//! instructions are skipped, never reported as errors.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::hlo::{
    AliasAnalysis, BufferId, HloAliasAnalysis, HloComputation, HloInstruction, HloModule,
    HloOpcode, HloSchedule, InstrId, ShapeIndex, ShapeSizeFn,
};

/// Size and origin of one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub id: BufferId,
    pub first_definition: InstrId,
    pub size: u64,
    /// Defined by a parameter of the entry computation. Such buffers are
    /// live for the whole program and never counted.
    pub entry_parameter: bool,
}

/// Per-computation buffer table derived from an alias analysis.
#[derive(Debug, Clone, Default)]
pub struct BufferInfoTracker {
    buffers: Vec<BufferInfo>,
    output_buffers: Vec<Vec<(ShapeIndex, BufferId)>>,
    defined_buffers: Vec<Vec<BufferId>>,
}

impl BufferInfoTracker {
    pub fn new(computation: &HloComputation, alias: &dyn AliasAnalysis, shape_size: ShapeSizeFn) -> Self {
        let buffers: Vec<BufferInfo> = alias
            .buffers()
            .iter()
            .map(|b| BufferInfo {
                id: b.id,
                first_definition: b.defining_instruction,
                size: shape_size(&b.shape),
                entry_parameter: computation.is_entry()
                    && computation
                        .instruction(b.defining_instruction)
                        .is_some_and(|i| i.opcode == HloOpcode::Parameter),
            })
            .collect();

        let count = computation.instruction_count();
        let output_buffers = (0..count).map(|id| alias.output_buffers(id).to_vec()).collect();
        let mut defined_buffers = vec![Vec::new(); count];
        for b in &buffers {
            if let Some(slot) = defined_buffers.get_mut(b.first_definition) {
                slot.push(b.id);
            }
        }

        Self {
            buffers,
            output_buffers,
            defined_buffers,
        }
    }

    pub fn buffer_info(&self, id: BufferId) -> Option<&BufferInfo> {
        self.buffers.get(id)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Buffers backing every output position of `instr`.
    pub fn output_buffers(&self, instr: InstrId) -> &[(ShapeIndex, BufferId)] {
        self.output_buffers.get(instr).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Buffers whose first definition is `instr`.
    pub fn defined_buffers(&self, instr: InstrId) -> &[BufferId] {
        self.defined_buffers.get(instr).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Snapshot handed to callers of a computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPressureState {
    pub memory_peak: u64,
    pub live_ids_at_bottom: Vec<BufferId>,
}

/// Live-set tracker for one computation.
#[derive(Debug)]
pub struct MemoryPressureTracker<'a> {
    computation: &'a HloComputation,
    buffers: BufferInfoTracker,
    callee_states: Option<&'a ModulePressureState>,
    live: Vec<bool>,
    live_memory_usage: u64,
    initial_memory_pressure: u64,
    pressure_state: MemoryPressureState,
}

impl<'a> MemoryPressureTracker<'a> {
    pub fn new(
        computation: &'a HloComputation,
        alias: &dyn AliasAnalysis,
        shape_size: ShapeSizeFn,
        callee_states: Option<&'a ModulePressureState>,
    ) -> Self {
        let buffers = BufferInfoTracker::new(computation, alias, shape_size);
        let live = vec![false; buffers.buffer_count()];
        Self {
            computation,
            buffers,
            callee_states,
            live,
            live_memory_usage: 0,
            initial_memory_pressure: 0,
            pressure_state: MemoryPressureState::default(),
        }
    }

    /// Tracker over the default opcode-driven alias analysis.
    pub fn with_default_analysis(
        computation: &'a HloComputation,
        shape_size: ShapeSizeFn,
        callee_states: Option<&'a ModulePressureState>,
    ) -> Self {
        let alias = HloAliasAnalysis::run(computation);
        Self::new(computation, &alias, shape_size, callee_states)
    }

    /// Reset the live set to `initial_live_buffers` plus the root's outputs.
    pub fn initialize(&mut self, initial_live_buffers: &[BufferId], initial_memory_pressure: u64) {
        self.live.iter_mut().for_each(|l| *l = false);
        self.live_memory_usage = 0;
        self.initial_memory_pressure = initial_memory_pressure;

        let root_buffers: Vec<BufferId> = self
            .computation
            .root_id()
            .map(|root| {
                self.buffers
                    .output_buffers(root)
                    .iter()
                    .map(|(_, b)| *b)
                    .collect()
            })
            .unwrap_or_default();

        for &id in initial_live_buffers.iter().chain(&root_buffers) {
            let Some(info) = self.buffers.buffer_info(id) else {
                continue;
            };
            if info.entry_parameter || self.live[id] {
                continue;
            }
            self.live[id] = true;
            self.live_memory_usage += info.size;
        }

        self.pressure_state = MemoryPressureState {
            memory_peak: self.live_memory_usage,
            live_ids_at_bottom: self.live_ids(),
        };
    }

    fn live_ids(&self) -> Vec<BufferId> {
        self.live
            .iter()
            .enumerate()
            .filter_map(|(id, &l)| l.then_some(id))
            .collect()
    }

    fn should_skip_allocation(consumer: &HloInstruction, index: &ShapeIndex, info: &BufferInfo) -> bool {
        (consumer.opcode.is_pass_through() && !index.is_empty()) || info.entry_parameter
    }

    /// Operand buffers that scheduling `instr` would make live.
    fn buffers_made_live(&self, instr: &HloInstruction) -> BTreeSet<BufferId> {
        let mut out = BTreeSet::new();
        for &op in &instr.operands {
            for (index, id) in self.buffers.output_buffers(op) {
                let Some(info) = self.buffers.buffer_info(*id) else {
                    continue;
                };
                if Self::should_skip_allocation(instr, index, info) || self.live[*id] {
                    continue;
                }
                out.insert(*id);
            }
        }
        out
    }

    /// Live buffers that die when `instr` is scheduled.
    fn buffers_freed(&self, instr: &HloInstruction) -> impl Iterator<Item = BufferId> + '_ {
        let defined = if instr.opcode == HloOpcode::Parameter {
            &[][..]
        } else {
            self.buffers.defined_buffers(instr.id)
        };
        defined.iter().copied().filter(|&id| self.live[id])
    }

    fn callee_peak(&self, instr: &HloInstruction) -> u64 {
        let Some(states) = self.callee_states else {
            return 0;
        };
        instr
            .called_computations
            .iter()
            .filter_map(|c| states.pressure_state(c))
            .map(|s| s.memory_peak)
            .max()
            .unwrap_or(0)
    }

    fn size_of(&self, ids: impl IntoIterator<Item = BufferId>) -> u64 {
        ids.into_iter()
            .filter_map(|id| self.buffers.buffer_info(id))
            .map(|b| b.size)
            .sum()
    }

    /// `(increase, peak)` if `instr` were scheduled next. `peak` is relative
    /// to the current usage and covers the moment operands and outputs are
    /// live together.
    pub fn memory_pressure_difference(&self, instr: &HloInstruction) -> (i64, u64) {
        let allocated = self.size_of(self.buffers_made_live(instr));
        let freed = self.size_of(self.buffers_freed(instr));
        let peak = allocated.max(self.callee_peak(instr));
        (allocated as i64 - freed as i64, peak)
    }

    /// Commit the effect of scheduling `instr`.
    pub fn update_buffers(&mut self, instr: &HloInstruction) {
        let (_, peak) = self.memory_pressure_difference(instr);
        self.pressure_state.memory_peak = self
            .pressure_state
            .memory_peak
            .max(self.live_memory_usage + peak);

        for id in self.buffers_made_live(instr) {
            self.live[id] = true;
            self.live_memory_usage += self.buffers.buffer_info(id).map_or(0, |b| b.size);
        }
        let freed: Vec<BufferId> = self.buffers_freed(instr).collect();
        for id in freed {
            self.live[id] = false;
            self.live_memory_usage -= self.buffers.buffer_info(id).map_or(0, |b| b.size);
        }
    }

    /// Current usage including pressure inherited from callers.
    pub fn memory_usage(&self) -> u64 {
        self.live_memory_usage + self.initial_memory_pressure
    }

    pub fn initial_memory_pressure(&self) -> u64 {
        self.initial_memory_pressure
    }

    pub fn pressure_state(&self) -> &MemoryPressureState {
        &self.pressure_state
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.live.get(id).copied().unwrap_or(false)
    }
}

/// Replay `sequence` (forward order) bottom-up through a fresh tracker.
pub fn replay_sequence(
    computation: &HloComputation,
    sequence: &[InstrId],
    shape_size: ShapeSizeFn,
    callee_states: Option<&ModulePressureState>,
) -> MemoryPressureState {
    let mut tracker = MemoryPressureTracker::with_default_analysis(computation, shape_size, callee_states);
    tracker.initialize(&[], 0);
    for &id in sequence.iter().rev() {
        if let Some(instr) = computation.instruction(id) {
            tracker.update_buffers(instr);
        }
    }
    tracker.pressure_state().clone()
}

/// Peak memory of running `sequence`.
pub fn sequence_memory_peak(
    computation: &HloComputation,
    sequence: &[InstrId],
    shape_size: ShapeSizeFn,
    callee_states: Option<&ModulePressureState>,
) -> u64 {
    replay_sequence(computation, sequence, shape_size, callee_states).memory_peak
}

/// Pressure states of every computation in a module, filled callee-first.
#[derive(Debug, Clone)]
pub struct ModulePressureState {
    shape_size: ShapeSizeFn,
    states: HashMap<String, MemoryPressureState>,
    memory_peak: u64,
}

impl ModulePressureState {
    pub fn new(shape_size: ShapeSizeFn) -> Self {
        Self {
            shape_size,
            states: HashMap::new(),
            memory_peak: 0,
        }
    }

    /// Replay every computation of `module` in callee-first order using the
    /// sequences from `schedule` (post-order where a sequence is missing).
    pub fn initialize_pressure_states(&mut self, module: &HloModule, schedule: &HloSchedule) {
        self.states.clear();
        self.memory_peak = 0;
        for comp in module.computations_post_order() {
            let post_order;
            let sequence = match schedule.sequence(comp.name()) {
                Some(s) => s,
                None => {
                    post_order = comp.post_order();
                    &post_order
                }
            };
            let state = replay_sequence(comp, sequence, self.shape_size, Some(self));
            debug!(
                computation = comp.name(),
                memory_peak = state.memory_peak,
                "initial memory pressure"
            );
            self.update_pressure_state(comp.name(), state);
        }
    }

    pub fn shape_size(&self) -> ShapeSizeFn {
        self.shape_size
    }

    pub fn computation_has_state(&self, computation: &str) -> bool {
        self.states.contains_key(computation)
    }

    pub fn pressure_state(&self, computation: &str) -> Option<&MemoryPressureState> {
        self.states.get(computation)
    }

    pub fn update_pressure_state(&mut self, computation: &str, state: MemoryPressureState) {
        self.memory_peak = self.memory_peak.max(state.memory_peak);
        self.states.insert(computation.to_string(), state);
    }

    /// Largest peak seen across all computations.
    pub fn memory_peak(&self) -> u64 {
        self.memory_peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlo::{Shape, shape_size_bytes};

    /// p -> a(1000) -> a2(10); p -> b(1000) -> b2(10); root = tuple(a2, b2)
    fn two_chains() -> HloComputation {
        let mut c = HloComputation::new("c");
        c.set_entry(true);
        let p = c
            .add_instruction(HloInstruction::new("p", HloOpcode::Parameter, Shape::array(10)))
            .unwrap();
        let a = c
            .add_instruction(HloInstruction::new("a", HloOpcode::Broadcast, Shape::array(1000)).with_operands([p]))
            .unwrap();
        let b = c
            .add_instruction(HloInstruction::new("b", HloOpcode::Broadcast, Shape::array(1000)).with_operands([p]))
            .unwrap();
        let a2 = c
            .add_instruction(HloInstruction::new("a2", HloOpcode::Reduce, Shape::array(10)).with_operands([a]))
            .unwrap();
        let b2 = c
            .add_instruction(HloInstruction::new("b2", HloOpcode::Reduce, Shape::array(10)).with_operands([b]))
            .unwrap();
        c.add_instruction(
            HloInstruction::new(
                "root",
                HloOpcode::Tuple,
                Shape::Tuple(vec![Shape::array(10), Shape::array(10)]),
            )
            .with_operands([a2, b2]),
        )
        .unwrap();
        c
    }

    #[test]
    fn root_outputs_start_live() {
        let c = two_chains();
        let mut t = MemoryPressureTracker::with_default_analysis(&c, shape_size_bytes, None);
        t.initialize(&[], 5);
        // tuple pointer (16) + two 10-byte elements
        assert_eq!(t.memory_usage(), 36 + 5);
        assert_eq!(t.pressure_state().live_ids_at_bottom.len(), 3);
    }

    #[test]
    fn difference_does_not_mutate() {
        let c = two_chains();
        let mut t = MemoryPressureTracker::with_default_analysis(&c, shape_size_bytes, None);
        t.initialize(&[], 0);
        let root = c.root().unwrap();
        t.update_buffers(root);
        assert_eq!(t.memory_usage(), 20);

        let b2 = c.instruction_by_name("b2").unwrap();
        assert_eq!(t.memory_pressure_difference(b2), (990, 1000));
        assert_eq!(t.memory_pressure_difference(b2), (990, 1000));
        assert_eq!(t.memory_usage(), 20);

        t.update_buffers(b2);
        assert_eq!(t.memory_usage(), 1010);
        assert_eq!(t.pressure_state().memory_peak, 1020);
    }

    #[test]
    fn interleaving_lowers_the_peak() {
        let c = two_chains();
        let id = |n: &str| c.instruction_by_name(n).unwrap().id;
        let naive = [id("p"), id("a"), id("b"), id("a2"), id("b2"), id("root")];
        let better = [id("p"), id("a"), id("a2"), id("b"), id("b2"), id("root")];
        assert_eq!(sequence_memory_peak(&c, &naive, shape_size_bytes, None), 2010);
        assert_eq!(sequence_memory_peak(&c, &better, shape_size_bytes, None), 1020);
    }

    #[test]
    fn parameters_never_release() {
        let mut c = HloComputation::new("body");
        let p = c
            .add_instruction(HloInstruction::new("p", HloOpcode::Parameter, Shape::array(64)))
            .unwrap();
        c.add_instruction(HloInstruction::new("n", HloOpcode::Negate, Shape::array(8)).with_operands([p]))
            .unwrap();
        let seq = c.post_order();
        // Non-entry parameter stays live up to the top of the walk.
        assert_eq!(sequence_memory_peak(&c, &seq, shape_size_bytes, None), 72);
    }

    #[test]
    fn callee_peak_is_carried_into_callers() {
        let mut body = HloComputation::new("body");
        let p = body
            .add_instruction(HloInstruction::new("p", HloOpcode::Parameter, Shape::array(8)))
            .unwrap();
        let big = body
            .add_instruction(HloInstruction::new("big", HloOpcode::Broadcast, Shape::array(4096)).with_operands([p]))
            .unwrap();
        body.add_instruction(HloInstruction::new("r", HloOpcode::Reduce, Shape::array(8)).with_operands([big]))
            .unwrap();

        let mut main = HloComputation::new("main");
        let mp = main
            .add_instruction(HloInstruction::new("p", HloOpcode::Parameter, Shape::array(8)))
            .unwrap();
        main.add_instruction(
            HloInstruction::new("w", HloOpcode::Call, Shape::array(8))
                .with_operands([mp])
                .with_called_computation("body"),
        )
        .unwrap();

        let module = HloModule::new("m", vec![body, main], Some("main")).unwrap();
        let mut states = ModulePressureState::new(shape_size_bytes);
        states.initialize_pressure_states(&module, &module.schedule_or_post_order());

        let body_peak = states.pressure_state("body").unwrap().memory_peak;
        assert!(body_peak >= 4096);
        let main_peak = states.pressure_state("main").unwrap().memory_peak;
        assert!(main_peak >= body_peak);
        assert_eq!(states.memory_peak(), main_peak.max(body_peak));
    }
}
