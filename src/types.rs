use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which scheduling pass to run over each computation.
///
/// - `LatencyHiding`: the bottom-up list scheduler (default).
/// - `EarlyLate`: only float async starts up and async dones down.
/// - `Both`: early/late over the incoming order, then the list scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingMode {
    #[default]
    LatencyHiding,
    EarlyLate,
    Both,
}

impl SchedulingMode {
    pub fn runs_latency_hiding(self) -> bool {
        matches!(self, SchedulingMode::LatencyHiding | SchedulingMode::Both)
    }

    pub fn runs_early_late(self) -> bool {
        matches!(self, SchedulingMode::EarlyLate | SchedulingMode::Both)
    }
}

impl FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "latency-hiding" | "lhs" => Ok(SchedulingMode::LatencyHiding),
            "early-late" => Ok(SchedulingMode::EarlyLate),
            "both" => Ok(SchedulingMode::Both),
            other => Err(format!(
                "invalid mode: {other} (expected \"latency-hiding\", \"early-late\" or \"both\")"
            )),
        }
    }
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulingMode::LatencyHiding => "latency-hiding",
            SchedulingMode::EarlyLate => "early-late",
            SchedulingMode::Both => "both",
        })
    }
}

/// Cost model and resource flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    #[default]
    Generic,
    Gpu,
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" => Ok(TargetPlatform::Generic),
            "gpu" => Ok(TargetPlatform::Gpu),
            other => Err(format!(
                "invalid target: {other} (expected \"generic\" or \"gpu\")"
            )),
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetPlatform::Generic => "generic",
            TargetPlatform::Gpu => "gpu",
        })
    }
}
