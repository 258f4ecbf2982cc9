// src/sched/latency.rs

//! Pluggable cost model: how long an instruction runs, and how long a
//! value takes to travel along an edge.

use std::collections::HashMap;
use std::fmt::Debug;

use tracing::warn;

use crate::config::SchedulerConfig;
use crate::hlo::{HloInstruction, HloOpcode};
use crate::sched::graph::HloGraphNode;

/// Logical time unit used throughout the scheduler.
pub type TimeCost = f64;

/// Strategy estimating node cost and edge latency.
pub trait LatencyEstimator: Debug {
    /// Latency of the edge `from -> to` (producer to consumer).
    fn latency_between(&self, from: &HloGraphNode<'_>, to: &HloGraphNode<'_>) -> TimeCost;

    /// Execution cost of a single instruction.
    fn node_cost(&self, instr: &HloInstruction) -> TimeCost;

    /// Conversion factor for reporting and for profiles measured in
    /// microseconds.
    fn cycles_per_microsecond(&self) -> f64;
}

/// True when `to` is the done matching the async start `from`.
pub fn is_async_pair(from: &HloGraphNode<'_>, to: &HloGraphNode<'_>) -> bool {
    from.is_supported_async_start()
        && to.is_supported_async_done()
        && to.instr().operands.contains(&from.instr().id)
}

/// Three-tier model: cheap elementwise work, medium compute-heavy ops and a
/// high async latency, sized so about five medium ops fit in one async
/// window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateLatencyEstimator;

impl ApproximateLatencyEstimator {
    pub const LOW_LATENCY: TimeCost = 1.0;
    pub const MEDIUM_COST: TimeCost = 1000.0;
    pub const HIGH_LATENCY: TimeCost = 5000.0;
    pub const LOW_COST: TimeCost = 1.0;

    pub fn new() -> Self {
        Self
    }
}

impl LatencyEstimator for ApproximateLatencyEstimator {
    fn latency_between(&self, from: &HloGraphNode<'_>, to: &HloGraphNode<'_>) -> TimeCost {
        if is_async_pair(from, to) {
            Self::HIGH_LATENCY
        } else {
            Self::LOW_LATENCY
        }
    }

    fn node_cost(&self, instr: &HloInstruction) -> TimeCost {
        match instr.opcode {
            HloOpcode::Fusion
            | HloOpcode::Convolution
            | HloOpcode::Dot
            | HloOpcode::CustomCall => Self::MEDIUM_COST,
            _ => Self::LOW_COST,
        }
    }

    fn cycles_per_microsecond(&self) -> f64 {
        1.0
    }
}

/// Measured costs keyed by instruction name, in microseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileStatistics {
    costs_us: HashMap<String, f64>,
    latencies_us: HashMap<(String, String), f64>,
}

impl ProfileStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cost(&mut self, instr: impl Into<String>, cost_us: f64) {
        self.costs_us.insert(instr.into(), cost_us);
    }

    pub fn add_latency(&mut self, from: impl Into<String>, to: impl Into<String>, latency_us: f64) {
        self.latencies_us.insert((from.into(), to.into()), latency_us);
    }

    pub fn cost(&self, instr: &str) -> Option<f64> {
        self.costs_us.get(instr).copied()
    }

    pub fn latency(&self, from: &str, to: &str) -> Option<f64> {
        self.latencies_us
            .get(&(from.to_string(), to.to_string()))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.costs_us.is_empty() && self.latencies_us.is_empty()
    }
}

/// Uses profiled numbers where available and defers to `inner` otherwise.
#[derive(Debug)]
pub struct ProfileGuidedLatencyEstimator {
    inner: Box<dyn LatencyEstimator>,
    profile: ProfileStatistics,
}

impl ProfileGuidedLatencyEstimator {
    pub fn new(inner: Box<dyn LatencyEstimator>, profile: ProfileStatistics) -> Self {
        Self { inner, profile }
    }
}

impl LatencyEstimator for ProfileGuidedLatencyEstimator {
    fn latency_between(&self, from: &HloGraphNode<'_>, to: &HloGraphNode<'_>) -> TimeCost {
        match self.profile.latency(&from.instr().name, &to.instr().name) {
            Some(us) => us * self.cycles_per_microsecond(),
            None => self.inner.latency_between(from, to),
        }
    }

    fn node_cost(&self, instr: &HloInstruction) -> TimeCost {
        match self.profile.cost(&instr.name) {
            Some(us) => us * self.cycles_per_microsecond(),
            None => self.inner.node_cost(instr),
        }
    }

    fn cycles_per_microsecond(&self) -> f64 {
        self.inner.cycles_per_microsecond()
    }
}

/// Profile-guided estimator over `fallback` when `use_real_cost_model` is
/// set and a non-empty profile exists, `fallback` otherwise.
pub fn select_latency_estimator(
    config: &SchedulerConfig,
    profile: Option<ProfileStatistics>,
    fallback: Box<dyn LatencyEstimator>,
) -> Box<dyn LatencyEstimator> {
    if !config.use_real_cost_model {
        return fallback;
    }
    match profile {
        Some(profile) if !profile.is_empty() => {
            Box::new(ProfileGuidedLatencyEstimator::new(fallback, profile))
        }
        _ => {
            warn!("use_real_cost_model is set but no profile was supplied; using approximate costs");
            fallback
        }
    }
}
