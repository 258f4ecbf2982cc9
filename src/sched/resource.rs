// src/sched/resource.rs

//! Concurrency-limited resources occupied by asynchronous operations.

use std::fmt;

/// Numeric ids at or above this bound belong to target-defined resources.
pub const TARGET_DEFINED_RESOURCES_BOUND: u32 = 10_000;

/// Resources the generic tracker knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownResource {
    NoResource,
    AllToAll,
    AllGather,
    AllReduce,
    CollectivePermute,
    SendRecv,
    SendHost,
    RecvHost,
}

impl KnownResource {
    pub fn as_str(self) -> &'static str {
        match self {
            KnownResource::NoResource => "no-resource",
            KnownResource::AllToAll => "all-to-all",
            KnownResource::AllGather => "all-gather",
            KnownResource::AllReduce => "all-reduce",
            KnownResource::CollectivePermute => "collective-permute",
            KnownResource::SendRecv => "send-recv",
            KnownResource::SendHost => "send-host",
            KnownResource::RecvHost => "recv-host",
        }
    }
}

/// A concurrency domain. Target-defined resources are numbered from zero
/// within the target and reported as `TARGET_DEFINED_RESOURCES_BOUND + n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Known(KnownResource),
    TargetDefined(u32),
}

impl Resource {
    pub const ALL_TO_ALL: Resource = Resource::Known(KnownResource::AllToAll);
    pub const ALL_GATHER: Resource = Resource::Known(KnownResource::AllGather);
    pub const ALL_REDUCE: Resource = Resource::Known(KnownResource::AllReduce);
    pub const COLLECTIVE_PERMUTE: Resource = Resource::Known(KnownResource::CollectivePermute);
    pub const SEND_RECV: Resource = Resource::Known(KnownResource::SendRecv);
    pub const SEND_HOST: Resource = Resource::Known(KnownResource::SendHost);
    pub const RECV_HOST: Resource = Resource::Known(KnownResource::RecvHost);

    /// Numeric id as exposed in diagnostics.
    pub fn id(self) -> u32 {
        match self {
            Resource::Known(k) => k as u32,
            Resource::TargetDefined(n) => TARGET_DEFINED_RESOURCES_BOUND + n,
        }
    }

    pub fn is_target_defined(self) -> bool {
        matches!(self, Resource::TargetDefined(_))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Known(k) => f.write_str(k.as_str()),
            Resource::TargetDefined(n) => write!(f, "target-{n}"),
        }
    }
}

/// How an instruction interacts with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsageType {
    /// The async start takes a unit of the resource.
    Occupy,
    /// The matching done gives it back.
    Release,
}

pub type ResourcePair = (Resource, ResourceUsageType);
