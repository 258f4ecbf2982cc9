// src/hlo/computation.rs

use std::collections::HashMap;

use crate::errors::{Result, SchedError};
use crate::hlo::instruction::{HloInstruction, InstrId};
use crate::hlo::opcode::HloOpcode;

/// A list of instructions in post-order (operands before users). The last
/// instruction is the root.
#[derive(Debug, Clone)]
pub struct HloComputation {
    name: String,
    instructions: Vec<HloInstruction>,
    by_name: HashMap<String, InstrId>,
    is_entry: bool,
}

impl HloComputation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            by_name: HashMap::new(),
            is_entry: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_entry(&self) -> bool {
        self.is_entry
    }

    pub(crate) fn set_entry(&mut self, is_entry: bool) {
        self.is_entry = is_entry;
    }

    /// Append an instruction, wiring `users` and `control_successors` of the
    /// instructions it references.
    ///
    /// Operands and control predecessors must already be present, which
    /// keeps the instruction list in post-order.
    pub fn add_instruction(&mut self, mut instr: HloInstruction) -> Result<InstrId> {
        let id = self.instructions.len();
        if self.by_name.contains_key(&instr.name) {
            return Err(SchedError::ConfigError(format!(
                "computation '{}' has duplicate instruction name '{}'",
                self.name, instr.name
            )));
        }
        for &operand in instr.operands.iter().chain(&instr.control_predecessors) {
            if operand >= id {
                return Err(SchedError::ConfigError(format!(
                    "instruction '{}' in '{}' references an instruction that is not defined before it",
                    instr.name, self.name
                )));
            }
        }

        instr.id = id;
        instr.users.clear();
        instr.control_successors.clear();

        let mut seen_operands = Vec::with_capacity(instr.operands.len());
        for &operand in &instr.operands {
            if !seen_operands.contains(&operand) {
                seen_operands.push(operand);
                self.instructions[operand].users.push(id);
            }
        }
        for &pred in &instr.control_predecessors {
            if !self.instructions[pred].control_successors.contains(&id) {
                self.instructions[pred].control_successors.push(id);
            }
        }

        self.by_name.insert(instr.name.clone(), id);
        self.instructions.push(instr);
        Ok(id)
    }

    pub fn instructions(&self) -> &[HloInstruction] {
        &self.instructions
    }

    pub(crate) fn instructions_mut(&mut self) -> &mut [HloInstruction] {
        &mut self.instructions
    }

    pub fn instruction(&self, id: InstrId) -> Option<&HloInstruction> {
        self.instructions.get(id)
    }

    pub fn instruction_by_name(&self, name: &str) -> Option<&HloInstruction> {
        self.by_name.get(name).map(|&id| &self.instructions[id])
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn root(&self) -> Option<&HloInstruction> {
        self.instructions.last()
    }

    pub fn root_id(&self) -> Option<InstrId> {
        self.instructions.len().checked_sub(1)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &HloInstruction> {
        self.instructions
            .iter()
            .filter(|i| i.opcode == HloOpcode::Parameter)
    }

    /// Post-order ids, i.e. the order instructions were added.
    pub fn post_order(&self) -> Vec<InstrId> {
        (0..self.instructions.len()).collect()
    }

    /// Names of computations called by any instruction, in first-seen order.
    pub fn called_computations(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for instr in &self.instructions {
            for callee in &instr.called_computations {
                if !out.contains(&callee.as_str()) {
                    out.push(callee);
                }
            }
        }
        out
    }
}
