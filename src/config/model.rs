// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::hlo::{HloModule, HloOpcode, ScheduleHint, Shape};
use crate::sched::ProfileStatistics;
use crate::types::{SchedulingMode, TargetPlatform};

/// Module description as read from a TOML file.
///
/// ```toml
/// [module]
/// name = "two_all_reduces"
/// entry = "main"
/// mode = "latency-hiding"
///
/// [scheduler]
/// all_reduce_overlap_limit = 2
///
/// [[computation]]
/// name = "main"
///
/// [[computation.instruction]]
/// name = "p0"
/// opcode = "parameter"
/// shape = 1024
///
/// [[computation.instruction]]
/// name = "ars0"
/// opcode = "all-reduce-start"
/// shape = 1024
/// operands = ["p0"]
/// ```
///
/// Instructions reference each other by name within their computation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawModuleFile {
    pub module: ModuleSection,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub gpu: GpuSection,

    #[serde(default)]
    pub profile: Option<ProfileSection>,

    #[serde(default, rename = "computation")]
    pub computations: Vec<ComputationConfig>,
}

/// `[module]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSection {
    pub name: String,

    /// Entry computation; the last `[[computation]]` when omitted.
    #[serde(default)]
    pub entry: Option<String>,

    #[serde(default)]
    pub mode: SchedulingMode,

    #[serde(default)]
    pub target: TargetPlatform,
}

/// Tunables of the scheduler (`[scheduler]`). Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_overlap_limit")]
    pub collective_permute_overlap_limit: u32,
    #[serde(default = "default_overlap_limit")]
    pub all_to_all_overlap_limit: u32,
    #[serde(default = "default_overlap_limit")]
    pub all_gather_overlap_limit: u32,
    #[serde(default = "default_overlap_limit")]
    pub all_reduce_overlap_limit: u32,
    #[serde(default = "default_overlap_limit")]
    pub send_recv_overlap_limit: u32,
    #[serde(default = "default_overlap_limit")]
    pub send_recv_host_overlap_limit: u32,
    /// Cap on the GPU collective stream.
    #[serde(default = "default_overlap_limit")]
    pub parallel_collective_overlap_limit: u32,
    #[serde(default)]
    pub schedule_send_recvs: bool,
    /// Host recvs share the host send resource.
    #[serde(default)]
    pub force_send_recv_to_use_same_resource: bool,
    /// Prefer measured costs from `[profile]`.
    #[serde(default)]
    pub use_real_cost_model: bool,
    #[serde(default)]
    pub aggressive_scheduling_policies: bool,
    /// Bytes. Unlimited when absent.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
}

fn default_overlap_limit() -> u32 {
    1
}

fn default_memory_limit() -> u64 {
    u64::MAX
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collective_permute_overlap_limit: default_overlap_limit(),
            all_to_all_overlap_limit: default_overlap_limit(),
            all_gather_overlap_limit: default_overlap_limit(),
            all_reduce_overlap_limit: default_overlap_limit(),
            send_recv_overlap_limit: default_overlap_limit(),
            send_recv_host_overlap_limit: default_overlap_limit(),
            parallel_collective_overlap_limit: default_overlap_limit(),
            schedule_send_recvs: false,
            force_send_recv_to_use_same_resource: false,
            use_real_cost_model: false,
            aggressive_scheduling_policies: false,
            memory_limit: default_memory_limit(),
        }
    }
}

/// `[gpu]` section, only read for `target = "gpu"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GpuSection {
    #[serde(default = "default_device_memory_bytes")]
    pub device_memory_bytes: u64,

    #[serde(default = "default_slop_percent")]
    pub memory_limit_slop_percent: u32,

    #[serde(default = "default_true")]
    pub enable_latency_hiding_scheduler: bool,
}

fn default_device_memory_bytes() -> u64 {
    16 * 1024 * 1024 * 1024
}

fn default_slop_percent() -> u32 {
    95
}

fn default_true() -> bool {
    true
}

impl Default for GpuSection {
    fn default() -> Self {
        Self {
            device_memory_bytes: default_device_memory_bytes(),
            memory_limit_slop_percent: default_slop_percent(),
            enable_latency_hiding_scheduler: default_true(),
        }
    }
}

/// `[profile]` section: measured costs in microseconds.
///
/// ```toml
/// [profile]
/// costs = { dot0 = 120.0 }
/// latencies = [{ from = "ars0", to = "ard0", latency_us = 40.0 }]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSection {
    #[serde(default)]
    pub costs: BTreeMap<String, f64>,

    #[serde(default)]
    pub latencies: Vec<LatencyEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatencyEntry {
    pub from: String,
    pub to: String,
    pub latency_us: f64,
}

impl From<&ProfileSection> for ProfileStatistics {
    fn from(section: &ProfileSection) -> Self {
        let mut profile = ProfileStatistics::new();
        for (name, cost) in &section.costs {
            profile.add_cost(name.clone(), *cost);
        }
        for entry in &section.latencies {
            profile.add_latency(entry.from.clone(), entry.to.clone(), entry.latency_us);
        }
        profile
    }
}

/// `[[computation]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputationConfig {
    pub name: String,

    /// Existing order to start from, by instruction name.
    #[serde(default)]
    pub schedule: Option<Vec<String>>,

    #[serde(default, rename = "instruction")]
    pub instructions: Vec<InstructionConfig>,
}

/// `[[computation.instruction]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstructionConfig {
    pub name: String,

    pub opcode: HloOpcode,

    #[serde(default)]
    pub shape: ShapeConfig,

    #[serde(default)]
    pub operands: Vec<String>,

    #[serde(default)]
    pub control_predecessors: Vec<String>,

    /// Called computations.
    #[serde(default)]
    pub calls: Vec<String>,

    #[serde(default)]
    pub custom_call_target: Option<String>,

    /// `"earliest"` or `"latest"`.
    #[serde(default)]
    pub schedule: Option<ScheduleHint>,

    /// For `get-tuple-element`.
    #[serde(default)]
    pub tuple_index: Option<usize>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Either a byte count or a (nested) list for a tuple: `shape = 64` or
/// `shape = [64, [8, 8]]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ShapeConfig {
    Bytes(u64),
    Tuple(Vec<ShapeConfig>),
}

impl Default for ShapeConfig {
    fn default() -> Self {
        ShapeConfig::Bytes(0)
    }
}

impl From<&ShapeConfig> for Shape {
    fn from(cfg: &ShapeConfig) -> Self {
        match cfg {
            ShapeConfig::Bytes(b) => Shape::array(*b),
            ShapeConfig::Tuple(elements) => Shape::Tuple(elements.iter().map(Shape::from).collect()),
        }
    }
}

/// Validated module file: the module is built and any declared schedule is
/// installed.
#[derive(Debug, Clone)]
pub struct ModuleFile {
    pub module: HloModule,
    pub mode: SchedulingMode,
    pub target: TargetPlatform,
    pub scheduler: SchedulerConfig,
    pub gpu: GpuSection,
    pub profile: Option<ProfileStatistics>,
}
