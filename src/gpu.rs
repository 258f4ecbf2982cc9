// src/gpu.rs

//! GPU flavour of the scheduler: an extra stream resource shared by all
//! collectives, cuBLAS/cuDNN-aware costs and a memory limit derived from
//! device memory.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::errors::Result;
use crate::hlo::{HloInstruction, HloModule, HloOpcode, Shape, ShapeSizeFn, shape_size_bytes};
use crate::sched::async_tracker::{AsyncTracker, GenericAsyncTracker, count_occupiers};
use crate::sched::graph::{HloGraphNode, HloScheduleGraph};
use crate::sched::latency::{
    ApproximateLatencyEstimator, LatencyEstimator, ProfileStatistics, TimeCost, select_latency_estimator,
};
use crate::sched::pass::{LatencyHidingScheduler, SchedulingSummary};
use crate::sched::resource::{Resource, ResourcePair};
use crate::types::SchedulingMode;

/// Frontend attribute forcing an instruction to the top of the schedule.
pub const ATTR_FORCE_EARLIEST_SCHEDULE: &str = "force_earliest_schedule";

/// Target resource 0 (`gpu-async-stream-collectives`): the stream all async
/// collectives share.
pub const GPU_ASYNC_STREAM_COLLECTIVES: Resource = Resource::TargetDefined(0);

#[derive(Debug)]
pub struct GpuAsyncTracker {
    inner: GenericAsyncTracker,
    occupier_cache: RefCell<HashMap<(String, Resource), u32>>,
}

impl GpuAsyncTracker {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: GenericAsyncTracker::new(config),
            occupier_cache: RefCell::new(HashMap::new()),
        }
    }
}

impl AsyncTracker for GpuAsyncTracker {
    fn config(&self) -> &SchedulerConfig {
        self.inner.config()
    }

    fn resources_from_instruction(&self, instr: &HloInstruction) -> Vec<ResourcePair> {
        let mut resources = self.inner.resources_from_instruction(instr);
        let usage = resources.first().map(|(_, u)| *u);
        if let Some(usage) = usage {
            if !instr.effective_async_opcode().is_send_recv() {
                resources.push((GPU_ASYNC_STREAM_COLLECTIVES, usage));
            }
        }
        resources
    }

    fn num_target_defined_resources(&self) -> u32 {
        1
    }

    fn num_available_resources(&self, resource: Resource) -> u32 {
        if resource == GPU_ASYNC_STREAM_COLLECTIVES {
            return self.config().parallel_collective_overlap_limit;
        }
        self.inner.num_available_resources(resource)
    }

    fn occupiers_in_computation(&self, module: &HloModule, computation: &str, resource: Resource) -> u32 {
        let key = (computation.to_string(), resource);
        if let Some(&n) = self.occupier_cache.borrow().get(&key) {
            return n;
        }
        let n = count_occupiers(self, module, computation, resource);
        self.occupier_cache.borrow_mut().insert(key, n);
        n
    }

    fn post_process_schedule_graph(&self, graph: &mut HloScheduleGraph<'_>) {
        for index in 0..graph.len() {
            if graph.node(index).instr().attribute_flag(ATTR_FORCE_EARLIEST_SCHEDULE) {
                debug!(instr = %graph.node(index).instr().name, "forcing earliest schedule");
                graph.node_mut(index).set_force_delay(true);
            }
        }
    }
}

fn is_library_call(instr: &HloInstruction) -> bool {
    instr.opcode == HloOpcode::CustomCall
        && instr.custom_call_target.as_deref().is_some_and(|t| {
            t == "__cublas$gemm" || t == "__cublas$lt$matmul" || t.starts_with("__cudnn$conv")
        })
}

/// Approximate costs, except that only cuBLAS/cuDNN custom calls are
/// expensive and synchronous collectives have no async latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuLatencyEstimator {
    inner: ApproximateLatencyEstimator,
}

impl GpuLatencyEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LatencyEstimator for GpuLatencyEstimator {
    fn latency_between(&self, from: &HloGraphNode<'_>, to: &HloGraphNode<'_>) -> TimeCost {
        if from.instr().is_sync_collective() {
            return ApproximateLatencyEstimator::LOW_LATENCY;
        }
        self.inner.latency_between(from, to)
    }

    fn node_cost(&self, instr: &HloInstruction) -> TimeCost {
        if instr.opcode == HloOpcode::CustomCall {
            return if is_library_call(instr) {
                ApproximateLatencyEstimator::MEDIUM_COST
            } else {
                ApproximateLatencyEstimator::LOW_COST
            };
        }
        self.inner.node_cost(instr)
    }

    fn cycles_per_microsecond(&self) -> f64 {
        self.inner.cycles_per_microsecond()
    }
}

fn total_bytes(shape: &Shape, shape_size: ShapeSizeFn) -> u64 {
    shape
        .indices()
        .iter()
        .filter_map(|index| shape.subshape(index))
        .map(shape_size)
        .sum()
}

/// Memory left for temporaries: `slop_percent` of device memory minus
/// entry parameters and outputs. Saturates at zero.
pub fn scheduler_memory_limit(module: &HloModule, device_memory_bytes: u64, slop_percent: u32) -> u64 {
    let entry = module.entry_computation();
    let params: u64 = entry
        .parameters()
        .map(|p| total_bytes(&p.shape, shape_size_bytes))
        .sum();
    let outputs = entry
        .root()
        .map(|r| total_bytes(&r.shape, shape_size_bytes))
        .unwrap_or(0);
    let budget = device_memory_bytes.saturating_mul(u64::from(slop_percent)) / 100;
    budget.saturating_sub(params + outputs)
}

#[derive(Debug, Clone)]
pub struct GpuScheduleOptions {
    pub config: SchedulerConfig,
    pub device_memory_bytes: u64,
    pub memory_limit_slop_percent: u32,
    pub enable_latency_hiding_scheduler: bool,
    pub mode: SchedulingMode,
    pub profile: Option<ProfileStatistics>,
}

impl Default for GpuScheduleOptions {
    fn default() -> Self {
        Self {
            config: SchedulerConfig::default(),
            device_memory_bytes: 16 * 1024 * 1024 * 1024,
            memory_limit_slop_percent: 95,
            enable_latency_hiding_scheduler: true,
            mode: SchedulingMode::LatencyHiding,
            profile: None,
        }
    }
}

/// Build the GPU scheduler for `module` and run it.
pub fn schedule_gpu_module(module: &mut HloModule, options: &GpuScheduleOptions) -> Result<SchedulingSummary> {
    let mut config = options.config.clone();
    config.memory_limit = scheduler_memory_limit(
        module,
        options.device_memory_bytes,
        options.memory_limit_slop_percent,
    );
    let mode = if options.enable_latency_hiding_scheduler {
        options.mode
    } else {
        SchedulingMode::EarlyLate
    };
    info!(
        module = module.name(),
        memory_limit = config.memory_limit,
        %mode,
        "scheduling for gpu"
    );

    let estimator = select_latency_estimator(&config, options.profile.clone(), Box::new(GpuLatencyEstimator::new()));
    let tracker = Box::new(GpuAsyncTracker::new(config.clone()));
    LatencyHidingScheduler::new(estimator, tracker, config)
        .with_mode(mode)
        .run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlo::HloComputation;
    use crate::sched::resource::ResourceUsageType;

    fn instr(op: HloOpcode) -> HloInstruction {
        HloInstruction::new(op.as_str(), op, Shape::array(16))
    }

    #[test]
    fn collectives_share_the_stream_resource() {
        let tracker = GpuAsyncTracker::new(SchedulerConfig {
            parallel_collective_overlap_limit: 2,
            schedule_send_recvs: true,
            ..SchedulerConfig::default()
        });
        assert_eq!(
            tracker.resources_from_instruction(&instr(HloOpcode::AllGatherStart)),
            vec![
                (Resource::ALL_GATHER, ResourceUsageType::Occupy),
                (GPU_ASYNC_STREAM_COLLECTIVES, ResourceUsageType::Occupy),
            ]
        );
        assert_eq!(
            tracker.resources_from_instruction(&instr(HloOpcode::Send)),
            vec![(Resource::SEND_RECV, ResourceUsageType::Occupy)]
        );
        assert_eq!(tracker.concurrent_resource_limits()[&GPU_ASYNC_STREAM_COLLECTIVES], 2);
        assert_eq!(GPU_ASYNC_STREAM_COLLECTIVES.id(), 10_000);
    }

    #[test]
    fn library_calls_are_medium_cost() {
        let est = GpuLatencyEstimator::new();
        let gemm = instr(HloOpcode::CustomCall).with_custom_call_target("__cublas$gemm");
        let conv = instr(HloOpcode::CustomCall).with_custom_call_target("__cudnn$convForward");
        let other = instr(HloOpcode::CustomCall).with_custom_call_target("my_kernel");
        assert_eq!(est.node_cost(&gemm), ApproximateLatencyEstimator::MEDIUM_COST);
        assert_eq!(est.node_cost(&conv), ApproximateLatencyEstimator::MEDIUM_COST);
        assert_eq!(est.node_cost(&other), ApproximateLatencyEstimator::LOW_COST);
    }

    #[test]
    fn memory_limit_subtracts_parameters_and_outputs() {
        let mut main = HloComputation::new("main");
        let p = main
            .add_instruction(HloInstruction::new("p", HloOpcode::Parameter, Shape::array(100)))
            .unwrap();
        main.add_instruction(HloInstruction::new("r", HloOpcode::Negate, Shape::array(50)).with_operands([p]))
            .unwrap();
        let module = HloModule::new("m", vec![main], None).unwrap();

        assert_eq!(scheduler_memory_limit(&module, 1000, 90), 900 - 150);
        assert_eq!(scheduler_memory_limit(&module, 100, 90), 0);
    }

    #[test]
    fn force_earliest_attribute_sets_force_delay() {
        let mut c = HloComputation::new("c");
        let p = c
            .add_instruction(HloInstruction::new("p", HloOpcode::Parameter, Shape::array(4)))
            .unwrap();
        let f = c
            .add_instruction(
                instr(HloOpcode::Negate)
                    .with_operands([p])
                    .with_attribute(ATTR_FORCE_EARLIEST_SCHEDULE, "true"),
            )
            .unwrap();
        let tracker = GpuAsyncTracker::new(SchedulerConfig::default());
        let graph = HloScheduleGraph::new(&c, &c.post_order(), &GpuLatencyEstimator::new(), &tracker).unwrap();
        assert!(graph.node_for(f).unwrap().force_delay());
        assert!(!graph.node_for(p).unwrap().force_delay());
    }
}
