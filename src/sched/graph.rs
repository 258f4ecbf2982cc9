// src/sched/graph.rs

//! Arena-backed scheduling graph for one computation.
//!
//! Nodes live in a `Vec` and refer to each other by index; edges are
//! `(target, latency)` pairs stored on both endpoints.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::errors::{Result, SchedError};
use crate::hlo::{HloComputation, HloInstruction, InstrId, ScheduleHint};
use crate::sched::async_tracker::AsyncTracker;
use crate::sched::latency::{LatencyEstimator, TimeCost, is_async_pair};
use crate::sched::resource::ResourcePair;

pub type NodeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HloEdge {
    target: NodeIndex,
    latency: TimeCost,
}

impl HloEdge {
    pub fn new(target: NodeIndex, latency: TimeCost) -> Self {
        Self { target, latency }
    }

    pub fn target(&self) -> NodeIndex {
        self.target
    }

    pub fn latency(&self) -> TimeCost {
        self.latency
    }
}

/// Scheduling metadata wrapped around one instruction.
#[derive(Debug, Clone)]
pub struct HloGraphNode<'a> {
    instr: &'a HloInstruction,
    original_position: usize,
    cost: TimeCost,
    async_depth: TimeCost,
    depth: TimeCost,
    force_delay: bool,
    resources: Vec<ResourcePair>,
    ready_time: TimeCost,
    indegree: usize,
    outdegree: usize,
    scheduled: bool,
    supported_async_start: bool,
    supported_async_done: bool,
    predecessors: Vec<HloEdge>,
    successors: Vec<HloEdge>,
}

impl<'a> HloGraphNode<'a> {
    fn new(instr: &'a HloInstruction, original_position: usize) -> Self {
        Self {
            instr,
            original_position,
            cost: 0.0,
            async_depth: 0.0,
            depth: 0.0,
            force_delay: false,
            resources: Vec::new(),
            ready_time: 0.0,
            indegree: 0,
            outdegree: 0,
            scheduled: false,
            supported_async_start: false,
            supported_async_done: false,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn instr(&self) -> &'a HloInstruction {
        self.instr
    }

    pub fn original_position(&self) -> usize {
        self.original_position
    }

    pub fn cost(&self) -> TimeCost {
        self.cost
    }

    pub fn async_depth(&self) -> TimeCost {
        self.async_depth
    }

    pub fn depth(&self) -> TimeCost {
        self.depth
    }

    pub fn force_delay(&self) -> bool {
        self.force_delay
    }

    pub fn set_force_delay(&mut self, force_delay: bool) {
        self.force_delay = force_delay;
    }

    pub fn resources(&self) -> &[ResourcePair] {
        &self.resources
    }

    pub fn ready_time(&self) -> TimeCost {
        self.ready_time
    }

    pub(crate) fn set_ready_time(&mut self, t: TimeCost) {
        self.ready_time = t;
    }

    /// Number of predecessors not yet scheduled.
    pub fn indegree(&self) -> usize {
        self.indegree
    }

    /// Number of successors not yet scheduled.
    pub fn outdegree(&self) -> usize {
        self.outdegree
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub(crate) fn set_scheduled(&mut self) {
        self.scheduled = true;
    }

    pub fn is_supported_async_start(&self) -> bool {
        self.supported_async_start
    }

    pub fn is_supported_async_done(&self) -> bool {
        self.supported_async_done
    }

    pub fn predecessors(&self) -> &[HloEdge] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[HloEdge] {
        &self.successors
    }
}

/// Nodes and edges for one computation, in the order given by the input
/// sequence.
#[derive(Debug)]
pub struct HloScheduleGraph<'a> {
    computation: &'a HloComputation,
    nodes: Vec<HloGraphNode<'a>>,
    index_of: HashMap<InstrId, NodeIndex>,
}

impl<'a> HloScheduleGraph<'a> {
    /// Build the graph for `sequence`, a valid order of every instruction of
    /// `computation`.
    pub fn new(
        computation: &'a HloComputation,
        sequence: &[InstrId],
        latency_estimator: &dyn LatencyEstimator,
        async_tracker: &dyn AsyncTracker,
    ) -> Result<Self> {
        let mut nodes = Vec::with_capacity(sequence.len());
        let mut index_of = HashMap::with_capacity(sequence.len());

        for (pos, &id) in sequence.iter().enumerate() {
            let instr = computation.instruction(id).ok_or_else(|| {
                SchedError::UnknownInstruction(format!("id {id} in '{}'", computation.name()))
            })?;
            let mut node = HloGraphNode::new(instr, pos);
            node.cost = latency_estimator.node_cost(instr);
            node.resources = async_tracker.resources_from_instruction(instr);
            node.supported_async_start = async_tracker.is_supported_async_start(instr);
            node.supported_async_done = async_tracker.is_supported_async_done(instr);
            node.force_delay = instr.schedule_hint == Some(ScheduleHint::Earliest);
            if index_of.insert(id, pos).is_some() {
                return Err(SchedError::InvalidSchedule {
                    computation: computation.name().to_string(),
                    reason: format!("instruction '{}' appears twice", instr.name),
                });
            }
            nodes.push(node);
        }

        let mut graph = Self {
            computation,
            nodes,
            index_of,
        };

        for to in 0..graph.nodes.len() {
            let instr = graph.nodes[to].instr;
            let mut preds: Vec<NodeIndex> = Vec::new();
            for &p in instr.operands.iter().chain(&instr.control_predecessors) {
                let from = graph.node_index(p)?;
                if !preds.contains(&from) {
                    preds.push(from);
                }
            }
            for from in preds {
                let latency = latency_estimator.latency_between(&graph.nodes[from], &graph.nodes[to]);
                graph.push_edge(from, to, latency);
            }
        }

        graph.initialize_graph_analysis();
        async_tracker.post_process_schedule_graph(&mut graph);
        Ok(graph)
    }

    fn push_edge(&mut self, from: NodeIndex, to: NodeIndex, latency: TimeCost) {
        self.nodes[from].successors.push(HloEdge::new(to, latency));
        self.nodes[from].outdegree += 1;
        self.nodes[to].predecessors.push(HloEdge::new(from, latency));
        self.nodes[to].indegree += 1;
    }

    /// Add an ordering edge `from -> to` (e.g. from a target hook). Returns
    /// false if the edge already exists.
    pub fn add_control_edge(&mut self, from: NodeIndex, to: NodeIndex, latency: TimeCost) -> bool {
        if self.nodes[from].successors.iter().any(|e| e.target == to) {
            return false;
        }
        self.push_edge(from, to, latency);
        self.initialize_graph_analysis();
        true
    }

    /// Async depth and latency-weighted depth, computed top-down in
    /// dependency order. Nodes on a cycle keep zero; the scheduler reports
    /// the cycle later.
    fn initialize_graph_analysis(&mut self) {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.predecessors.len()).collect();
        let mut queue: VecDeque<NodeIndex> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .collect();

        while let Some(n) = queue.pop_front() {
            let mut async_depth: TimeCost = 0.0;
            let mut depth: TimeCost = 0.0;
            for edge in &self.nodes[n].predecessors {
                let pred = &self.nodes[edge.target];
                let async_latency = if is_async_pair(pred, &self.nodes[n]) {
                    edge.latency
                } else {
                    0.0
                };
                async_depth = async_depth.max(pred.async_depth + async_latency);
                depth = depth.max(pred.depth + pred.cost + edge.latency);
            }
            self.nodes[n].async_depth = async_depth;
            self.nodes[n].depth = depth;

            for i in 0..self.nodes[n].successors.len() {
                let succ = self.nodes[n].successors[i].target;
                remaining[succ] -= 1;
                if remaining[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }

        trace!(
            computation = self.computation.name(),
            nodes = self.nodes.len(),
            "schedule graph analysis initialised"
        );
    }

    pub fn computation(&self) -> &'a HloComputation {
        self.computation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[HloGraphNode<'a>] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> &HloGraphNode<'a> {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut HloGraphNode<'a> {
        &mut self.nodes[index]
    }

    pub fn node_index(&self, id: InstrId) -> Result<NodeIndex> {
        self.index_of.get(&id).copied().ok_or_else(|| {
            let name = self
                .computation
                .instruction(id)
                .map(|i| i.name.clone())
                .unwrap_or_else(|| format!("id {id}"));
            SchedError::UnknownInstruction(format!("{name} in '{}'", self.computation.name()))
        })
    }

    pub fn node_for(&self, id: InstrId) -> Result<&HloGraphNode<'a>> {
        Ok(&self.nodes[self.node_index(id)?])
    }

    /// Instruction ids in the order the graph was built from.
    pub fn original_order(&self) -> Vec<InstrId> {
        self.nodes.iter().map(|n| n.instr.id).collect()
    }

    /// Nodes without successors: where bottom-up scheduling starts.
    pub fn bottom_nodes(&self) -> Vec<NodeIndex> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].successors.is_empty())
            .collect()
    }

    pub(crate) fn decrement_outdegree(&mut self, index: NodeIndex) -> usize {
        let node = &mut self.nodes[index];
        node.outdegree = node.outdegree.saturating_sub(1);
        node.outdegree
    }

    pub(crate) fn decrement_indegree(&mut self, index: NodeIndex) {
        let node = &mut self.nodes[index];
        node.indegree = node.indegree.saturating_sub(1);
    }
}
