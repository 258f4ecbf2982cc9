// src/hlo/schedule.rs

use std::collections::BTreeMap;

use crate::errors::{Result, SchedError};
use crate::hlo::computation::HloComputation;
use crate::hlo::instruction::InstrId;
use crate::hlo::module::HloModule;

/// Linear instruction order for every computation of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HloSchedule {
    sequences: BTreeMap<String, Vec<InstrId>>,
}

impl HloSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_post_order(module: &HloModule) -> Self {
        let mut schedule = Self::new();
        for comp in module.computations() {
            schedule.set_sequence(comp.name(), comp.post_order());
        }
        schedule
    }

    pub fn set_sequence(&mut self, computation: &str, sequence: Vec<InstrId>) {
        self.sequences.insert(computation.to_string(), sequence);
    }

    pub fn sequence(&self, computation: &str) -> Option<&[InstrId]> {
        self.sequences.get(computation).map(|s| s.as_slice())
    }

    pub fn sequences(&self) -> impl Iterator<Item = (&str, &[InstrId])> {
        self.sequences.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Check that every computation has a sequence that is a permutation of
    /// its instructions respecting operand and control dependencies.
    pub fn verify(&self, module: &HloModule) -> Result<()> {
        for comp in module.computations() {
            let seq = self.sequence(comp.name()).ok_or_else(|| {
                SchedError::InvalidSchedule {
                    computation: comp.name().to_string(),
                    reason: "no sequence".to_string(),
                }
            })?;
            verify_sequence(comp, seq)?;
        }
        Ok(())
    }
}

/// Verify one sequence against its computation.
pub fn verify_sequence(comp: &HloComputation, seq: &[InstrId]) -> Result<()> {
    let invalid = |reason: String| SchedError::InvalidSchedule {
        computation: comp.name().to_string(),
        reason,
    };

    if seq.len() != comp.instruction_count() {
        return Err(invalid(format!(
            "sequence has {} instructions, computation has {}",
            seq.len(),
            comp.instruction_count()
        )));
    }

    let mut position = vec![usize::MAX; comp.instruction_count()];
    for (pos, &id) in seq.iter().enumerate() {
        let slot = position
            .get_mut(id)
            .ok_or_else(|| invalid(format!("unknown instruction id {id}")))?;
        if *slot != usize::MAX {
            return Err(invalid(format!(
                "instruction '{}' scheduled twice",
                comp.instructions()[id].name
            )));
        }
        *slot = pos;
    }

    for instr in comp.instructions() {
        for &pred in instr.operands.iter().chain(&instr.control_predecessors) {
            if position[pred] > position[instr.id] {
                return Err(invalid(format!(
                    "'{}' is scheduled after its user '{}'",
                    comp.instructions()[pred].name, instr.name
                )));
            }
        }
    }
    Ok(())
}
