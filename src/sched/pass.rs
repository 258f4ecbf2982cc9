// src/sched/pass.rs

//! Module-level driver: schedules every computation callee-first and
//! installs the result as the module's schedule.

use std::fmt;

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::errors::Result;
use crate::hlo::schedule::verify_sequence;
use crate::hlo::{HloModule, HloSchedule, InstrId, ShapeSizeFn, shape_size_bytes};
use crate::sched::async_tracker::AsyncTracker;
use crate::sched::core::{DefaultSchedulerCore, TargetSchedulingRule};
use crate::sched::latency::LatencyEstimator;
use crate::sched::memory::{ModulePressureState, replay_sequence};
use crate::sched::postprocess::schedule_as_early_or_late_as_possible;
use crate::sched::stats::{SchedulerStatistics, compute_statistics};
use crate::types::SchedulingMode;

/// What one run of the pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulingSummary {
    /// One entry per computation, callee-first.
    pub statistics: Vec<SchedulerStatistics>,
    /// Largest per-computation peak after scheduling.
    pub memory_peak: u64,
    /// Number of computations whose order changed.
    pub changed_computations: usize,
}

impl SchedulingSummary {
    pub fn changed(&self) -> bool {
        self.changed_computations > 0
    }

    pub fn statistics_for(&self, computation: &str) -> Option<&SchedulerStatistics> {
        self.statistics.iter().find(|s| s.computation == computation)
    }
}

/// The latency-hiding scheduling pass.
pub struct LatencyHidingScheduler {
    latency_estimator: Box<dyn LatencyEstimator>,
    async_tracker: Box<dyn AsyncTracker>,
    config: SchedulerConfig,
    target_rule: Option<TargetSchedulingRule>,
    shape_size: ShapeSizeFn,
    mode: SchedulingMode,
}

impl fmt::Debug for LatencyHidingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyHidingScheduler")
            .field("latency_estimator", &self.latency_estimator)
            .field("async_tracker", &self.async_tracker)
            .field("config", &self.config)
            .field("target_rule", &self.target_rule.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

impl LatencyHidingScheduler {
    pub fn new(
        latency_estimator: Box<dyn LatencyEstimator>,
        async_tracker: Box<dyn AsyncTracker>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            latency_estimator,
            async_tracker,
            config,
            target_rule: None,
            shape_size: shape_size_bytes,
            mode: SchedulingMode::LatencyHiding,
        }
    }

    pub fn with_target_rule(mut self, rule: TargetSchedulingRule) -> Self {
        self.target_rule = Some(rule);
        self
    }

    pub fn with_shape_size(mut self, shape_size: ShapeSizeFn) -> Self {
        self.shape_size = shape_size;
        self
    }

    pub fn with_mode(mut self, mode: SchedulingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Schedule every computation of `module`. On error the module keeps
    /// whatever schedule it had before.
    pub fn run(&self, module: &mut HloModule) -> Result<SchedulingSummary> {
        let (schedule, summary) = self.schedule_module(module)?;
        module.set_schedule(schedule)?;

        info!(
            module = module.name(),
            changed = summary.changed_computations,
            memory_peak = summary.memory_peak,
            "scheduling pass complete"
        );
        Ok(summary)
    }

    /// Compute a new schedule for every computation without touching
    /// `module`.
    pub fn schedule_module(&self, module: &HloModule) -> Result<(HloSchedule, SchedulingSummary)> {
        let base = module.schedule_or_post_order();
        let mut pressure = ModulePressureState::new(self.shape_size);
        pressure.initialize_pressure_states(module, &base);

        let core = DefaultSchedulerCore::new(
            self.latency_estimator.as_ref(),
            self.async_tracker.as_ref(),
            &self.config,
            self.target_rule.as_ref(),
        );

        info!(
            module = module.name(),
            mode = %self.mode,
            computations = module.computations().len(),
            "running scheduling pass"
        );

        let mut schedule = HloSchedule::new();
        let mut summary = SchedulingSummary::default();

        for comp in module.computations_post_order() {
            let original: Vec<InstrId> = match base.sequence(comp.name()) {
                Some(seq) => seq.to_vec(),
                None => comp.post_order(),
            };

            let mut sequence = original.clone();
            if self.mode.runs_early_late() {
                sequence = schedule_as_early_or_late_as_possible(comp, &sequence)?;
            }
            let state = if self.mode.runs_latency_hiding() {
                let out = core.schedule_computation(comp, &sequence, Some(module), Some(&pressure))?;
                sequence = out.sequence;
                out.memory_state
            } else {
                replay_sequence(comp, &sequence, self.shape_size, Some(&pressure))
            };
            verify_sequence(comp, &sequence)?;
            pressure.update_pressure_state(comp.name(), state);

            let stats = compute_statistics(
                comp,
                &sequence,
                self.latency_estimator.as_ref(),
                self.async_tracker.as_ref(),
                self.shape_size,
                Some(&pressure),
            )?;
            debug!(
                computation = comp.name(),
                total_cycles = stats.total_cycles,
                wasted = stats.total_wasted_cycles(),
                memory_peak = stats.memory_peak,
                "computation statistics"
            );

            if sequence != original {
                summary.changed_computations += 1;
            }
            summary.statistics.push(stats);
            schedule.set_sequence(comp.name(), sequence);
        }

        summary.memory_peak = pressure.memory_peak();
        Ok((schedule, summary))
    }
}
