// src/sched/mod.rs

//! Latency-hiding list scheduling.
//!
//! - `graph`: per-computation node/edge arena.
//! - `latency`, `async_tracker`, `resource`: pluggable cost and resource
//!   models.
//! - `memory`: live-buffer simulation.
//! - `core`: the bottom-up list scheduler for one computation.
//! - `postprocess`: early/late rewrite.
//! - `pass`: module-level driver.
//! - `stats`: post-hoc statistics.

pub mod async_tracker;
pub mod core;
pub mod graph;
pub mod latency;
pub mod memory;
pub mod pass;
pub mod postprocess;
pub mod resource;
pub mod stats;

pub use async_tracker::{AsyncTracker, GenericAsyncTracker};
pub use self::core::{
    CandidateReason, ComputationSchedule, DefaultSchedulerCore, ScheduleCandidate, ScheduleStep,
    SchedulingState, TargetSchedulingRule,
};
pub use graph::{HloEdge, HloGraphNode, HloScheduleGraph, NodeIndex};
pub use latency::{
    ApproximateLatencyEstimator, LatencyEstimator, ProfileGuidedLatencyEstimator, ProfileStatistics,
    TimeCost, select_latency_estimator,
};
pub use memory::{
    BufferInfoTracker, MemoryPressureState, MemoryPressureTracker, ModulePressureState,
    replay_sequence, sequence_memory_peak,
};
pub use pass::{LatencyHidingScheduler, SchedulingSummary};
pub use postprocess::schedule_as_early_or_late_as_possible;
pub use resource::{KnownResource, Resource, ResourceUsageType};
pub use stats::{SchedulerStatistics, compute_statistics};
