// src/sched/async_tracker.rs

//! Classification of asynchronous start/done pairs and the resources they
//! hold while in flight.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use crate::config::SchedulerConfig;
use crate::hlo::{HloInstruction, HloModule, HloOpcode, ScheduleHint};
use crate::sched::graph::HloScheduleGraph;
use crate::sched::resource::{KnownResource, Resource, ResourcePair, ResourceUsageType};

/// Knows which instructions are async and what they occupy.
///
/// Targets customise behaviour by overriding the provided methods.
pub trait AsyncTracker: Debug {
    fn config(&self) -> &SchedulerConfig;

    fn is_supported_async_start(&self, instr: &HloInstruction) -> bool {
        match instr.opcode {
            HloOpcode::AllReduceStart
            | HloOpcode::AllGatherStart
            | HloOpcode::CollectivePermuteStart
            | HloOpcode::CopyStart => !instr.is_sync_collective(),
            HloOpcode::AsyncStart => {
                instr.effective_async_opcode().is_collective() && !instr.is_sync_collective()
            }
            HloOpcode::Send | HloOpcode::Recv => self.config().schedule_send_recvs,
            HloOpcode::CustomCall => instr.schedule_hint == Some(ScheduleHint::Earliest),
            _ => false,
        }
    }

    fn is_supported_async_done(&self, instr: &HloInstruction) -> bool {
        match instr.opcode {
            HloOpcode::AllReduceDone
            | HloOpcode::AllGatherDone
            | HloOpcode::CollectivePermuteDone
            | HloOpcode::CopyDone => !instr.is_sync_collective(),
            HloOpcode::AsyncDone => {
                instr.effective_async_opcode().is_collective() && !instr.is_sync_collective()
            }
            HloOpcode::SendDone | HloOpcode::RecvDone => self.config().schedule_send_recvs,
            HloOpcode::CustomCall => instr.schedule_hint == Some(ScheduleHint::Latest),
            _ => false,
        }
    }

    /// Resources an instruction occupies (async start) or releases (async
    /// done). Empty for everything else.
    fn resources_from_instruction(&self, instr: &HloInstruction) -> Vec<ResourcePair> {
        let usage = if self.is_supported_async_start(instr) {
            ResourceUsageType::Occupy
        } else if self.is_supported_async_done(instr) {
            ResourceUsageType::Release
        } else {
            return Vec::new();
        };
        match generic_resource_for(instr, self.config()) {
            Some(resource) => vec![(resource, usage)],
            None => Vec::new(),
        }
    }

    fn num_target_defined_resources(&self) -> u32 {
        0
    }

    /// Maximum number of concurrent occupiers of `resource`.
    fn num_available_resources(&self, resource: Resource) -> u32 {
        let cfg = self.config();
        match resource {
            Resource::Known(KnownResource::NoResource) => u32::MAX,
            Resource::Known(KnownResource::CollectivePermute) => cfg.collective_permute_overlap_limit,
            Resource::Known(KnownResource::AllToAll) => cfg.all_to_all_overlap_limit,
            Resource::Known(KnownResource::AllGather) => cfg.all_gather_overlap_limit,
            Resource::Known(KnownResource::AllReduce) => cfg.all_reduce_overlap_limit,
            Resource::Known(KnownResource::SendRecv) => cfg.send_recv_overlap_limit,
            Resource::Known(KnownResource::SendHost)
            | Resource::Known(KnownResource::RecvHost) => cfg.send_recv_host_overlap_limit,
            Resource::TargetDefined(_) => 1,
        }
    }

    /// Caps for every resource this tracker can hand out.
    fn concurrent_resource_limits(&self) -> BTreeMap<Resource, u32> {
        let known = [
            KnownResource::AllToAll,
            KnownResource::AllGather,
            KnownResource::AllReduce,
            KnownResource::CollectivePermute,
            KnownResource::SendRecv,
            KnownResource::SendHost,
            KnownResource::RecvHost,
        ];
        known
            .into_iter()
            .map(Resource::Known)
            .chain((0..self.num_target_defined_resources()).map(Resource::TargetDefined))
            .map(|r| (r, self.num_available_resources(r)))
            .collect()
    }

    /// Units of `resource` held while `instr` executes. Instructions that
    /// call computations (loops, calls, conditionals) hold whatever their
    /// callees occupy.
    fn num_resources_per_instruction(
        &self,
        resource: Resource,
        instr: &HloInstruction,
        module: Option<&HloModule>,
    ) -> u32 {
        let direct = self
            .resources_from_instruction(instr)
            .iter()
            .any(|(r, _)| *r == resource);
        if instr.called_computations.is_empty()
            || self.is_supported_async_start(instr)
            || self.is_supported_async_done(instr)
        {
            return u32::from(direct);
        }
        let Some(module) = module else {
            return u32::from(direct);
        };
        instr
            .called_computations
            .iter()
            .map(|callee| self.occupiers_in_computation(module, callee, resource))
            .max()
            .unwrap_or(0)
    }

    /// Number of occupiers of `resource` inside a computation, nested calls
    /// included.
    fn occupiers_in_computation(&self, module: &HloModule, computation: &str, resource: Resource) -> u32 {
        count_occupiers(self, module, computation, resource)
    }

    /// Hook run once the schedule graph is built.
    fn post_process_schedule_graph(&self, _graph: &mut HloScheduleGraph<'_>) {}
}

/// Uncached occupier count; trackers memoise this in
/// [`AsyncTracker::occupiers_in_computation`].
pub fn count_occupiers<T: AsyncTracker + ?Sized>(
    tracker: &T,
    module: &HloModule,
    computation: &str,
    resource: Resource,
) -> u32 {
    let Ok(comp) = module.computation(computation) else {
        return 0;
    };
    comp.instructions()
        .iter()
        .map(|instr| {
            let own = tracker
                .resources_from_instruction(instr)
                .iter()
                .filter(|(r, usage)| *r == resource && *usage == ResourceUsageType::Occupy)
                .count() as u32;
            let nested = instr
                .called_computations
                .iter()
                .filter(|_| !tracker.is_supported_async_start(instr))
                .map(|callee| tracker.occupiers_in_computation(module, callee, resource))
                .max()
                .unwrap_or(0);
            own + nested
        })
        .sum()
}

/// Resource a generic async op maps onto, if any.
pub fn generic_resource_for(instr: &HloInstruction, config: &SchedulerConfig) -> Option<Resource> {
    let host = instr.is_host_transfer();
    match instr.effective_async_opcode() {
        HloOpcode::AllReduce
        | HloOpcode::AllReduceStart
        | HloOpcode::AllReduceDone
        | HloOpcode::ReduceScatter => Some(Resource::ALL_REDUCE),
        HloOpcode::AllGather | HloOpcode::AllGatherStart | HloOpcode::AllGatherDone => {
            Some(Resource::ALL_GATHER)
        }
        HloOpcode::CollectivePermute
        | HloOpcode::CollectivePermuteStart
        | HloOpcode::CollectivePermuteDone => Some(Resource::COLLECTIVE_PERMUTE),
        HloOpcode::AllToAll => Some(Resource::ALL_TO_ALL),
        HloOpcode::Send | HloOpcode::SendDone => Some(if host {
            Resource::SEND_HOST
        } else {
            Resource::SEND_RECV
        }),
        HloOpcode::Recv | HloOpcode::RecvDone => Some(match (host, config.force_send_recv_to_use_same_resource) {
            (true, true) => Resource::SEND_HOST,
            (true, false) => Resource::RECV_HOST,
            (false, _) => Resource::SEND_RECV,
        }),
        _ => None,
    }
}

/// Tracker driven purely by [`SchedulerConfig`].
#[derive(Debug)]
pub struct GenericAsyncTracker {
    config: SchedulerConfig,
    occupier_cache: RefCell<HashMap<(String, Resource), u32>>,
}

impl GenericAsyncTracker {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            occupier_cache: RefCell::new(HashMap::new()),
        }
    }
}

impl AsyncTracker for GenericAsyncTracker {
    fn config(&self) -> &SchedulerConfig {
        &self.config
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
}
