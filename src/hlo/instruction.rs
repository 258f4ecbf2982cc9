// src/hlo/instruction.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::hlo::opcode::HloOpcode;
use crate::hlo::shape::Shape;

/// Dense index of an instruction inside its computation.
pub type InstrId = usize;

/// Frontend attribute marking a collective that must run synchronously.
pub const ATTR_IS_SYNC: &str = "is_sync";
/// Frontend attribute marking send/recv traffic with the host.
pub const ATTR_IS_HOST_TRANSFER: &str = "is_host_transfer";

/// Placement request carried by custom calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleHint {
    /// Place as early as operands allow (`SCHEDULE_EARLIEST`).
    Earliest,
    /// Place as late as users allow (`SCHEDULE_LATEST`).
    Latest,
}

/// One node of the dataflow graph.
///
/// `users` and `control_successors` are derived when the instruction is
/// added to a computation.
#[derive(Debug, Clone)]
pub struct HloInstruction {
    pub id: InstrId,
    pub name: String,
    pub opcode: HloOpcode,
    pub shape: Shape,
    pub operands: Vec<InstrId>,
    pub users: Vec<InstrId>,
    pub control_predecessors: Vec<InstrId>,
    pub control_successors: Vec<InstrId>,
    pub called_computations: Vec<String>,
    pub custom_call_target: Option<String>,
    pub schedule_hint: Option<ScheduleHint>,
    /// For `async-start`/`async-done`: root opcode of the wrapped computation.
    pub async_wrapped_opcode: Option<HloOpcode>,
    /// For `get-tuple-element`.
    pub tuple_index: Option<usize>,
    pub attributes: BTreeMap<String, String>,
}

impl HloInstruction {
    pub fn new(name: impl Into<String>, opcode: HloOpcode, shape: Shape) -> Self {
        Self {
            id: 0,
            name: name.into(),
            opcode,
            shape,
            operands: Vec::new(),
            users: Vec::new(),
            control_predecessors: Vec::new(),
            control_successors: Vec::new(),
            called_computations: Vec::new(),
            custom_call_target: None,
            schedule_hint: None,
            async_wrapped_opcode: None,
            tuple_index: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = InstrId>) -> Self {
        self.operands = operands.into_iter().collect();
        self
    }

    pub fn with_control_predecessors(mut self, preds: impl IntoIterator<Item = InstrId>) -> Self {
        self.control_predecessors = preds.into_iter().collect();
        self
    }

    pub fn with_called_computation(mut self, name: impl Into<String>) -> Self {
        self.called_computations.push(name.into());
        self
    }

    pub fn with_custom_call_target(mut self, target: impl Into<String>) -> Self {
        self.custom_call_target = Some(target.into());
        self
    }

    pub fn with_schedule_hint(mut self, hint: ScheduleHint) -> Self {
        self.schedule_hint = Some(hint);
        self
    }

    pub fn with_tuple_index(mut self, index: usize) -> Self {
        self.tuple_index = Some(index);
        self
    }

    pub fn with_async_wrapped_opcode(mut self, opcode: HloOpcode) -> Self {
        self.async_wrapped_opcode = Some(opcode);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn operand(&self, i: usize) -> Option<InstrId> {
        self.operands.get(i).copied()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// True if the attribute is present and spelled `true`.
    pub fn attribute_flag(&self, key: &str) -> bool {
        self.attribute(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn is_sync_collective(&self) -> bool {
        self.attribute_flag(ATTR_IS_SYNC)
    }

    pub fn is_host_transfer(&self) -> bool {
        self.attribute_flag(ATTR_IS_HOST_TRANSFER)
    }

    pub fn is_custom_call_with_hint(&self, hint: ScheduleHint) -> bool {
        self.opcode == HloOpcode::CustomCall && self.schedule_hint == Some(hint)
    }

    /// Opcode that decides which resource an async op occupies: the wrapped
    /// opcode for generic `async-*` ops, the instruction's own otherwise.
    pub fn effective_async_opcode(&self) -> HloOpcode {
        match self.opcode {
            HloOpcode::AsyncStart | HloOpcode::AsyncDone => {
                self.async_wrapped_opcode.unwrap_or(self.opcode)
            }
            op => op,
        }
    }
}
