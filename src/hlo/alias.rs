// src/hlo/alias.rs

//! Buffer identity oracle.
//!
//! The memory tracker only needs to know, for every output position of an
//! instruction, which logical buffer backs it and which instruction first
//! defined that buffer. [`HloAliasAnalysis`] derives that from opcodes.

use crate::hlo::computation::HloComputation;
use crate::hlo::instruction::InstrId;
use crate::hlo::opcode::HloOpcode;
use crate::hlo::shape::{Shape, ShapeIndex};

pub type BufferId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HloBuffer {
    pub id: BufferId,
    pub defining_instruction: InstrId,
    pub defining_index: ShapeIndex,
    pub shape: Shape,
}

/// Maps instruction output positions to buffers.
pub trait AliasAnalysis {
    fn buffers(&self) -> &[HloBuffer];

    /// `(index, buffer)` for every position of the instruction's output.
    fn output_buffers(&self, instr: InstrId) -> &[(ShapeIndex, BufferId)];

    fn buffer(&self, id: BufferId) -> Option<&HloBuffer> {
        self.buffers().get(id)
    }
}

/// Opcode-driven alias analysis for a single computation.
#[derive(Debug, Clone, Default)]
pub struct HloAliasAnalysis {
    buffers: Vec<HloBuffer>,
    positions: Vec<Vec<(ShapeIndex, BufferId)>>,
}

impl HloAliasAnalysis {
    pub fn run(comp: &HloComputation) -> Self {
        let mut analysis = Self {
            buffers: Vec::new(),
            positions: Vec::with_capacity(comp.instruction_count()),
        };

        for instr in comp.instructions() {
            let positions = match instr.opcode {
                HloOpcode::GetTupleElement => instr
                    .tuple_index
                    .zip(instr.operand(0))
                    .map(|(k, op)| analysis.sub_positions(op, k))
                    .filter(|p| !p.is_empty()),
                HloOpcode::Bitcast | HloOpcode::While => instr
                    .operand(0)
                    .map(|op| analysis.positions[op].clone()),
                HloOpcode::Tuple => {
                    let mut positions =
                        vec![(Vec::new(), analysis.new_buffer(instr.id, Vec::new(), &instr.shape))];
                    for (i, &op) in instr.operands.iter().enumerate() {
                        for (index, buffer) in &analysis.positions[op] {
                            let mut prefixed = Vec::with_capacity(index.len() + 1);
                            prefixed.push(i);
                            prefixed.extend_from_slice(index);
                            positions.push((prefixed, *buffer));
                        }
                    }
                    Some(positions)
                }
                _ => None,
            };

            let positions = positions.unwrap_or_else(|| {
                instr
                    .shape
                    .indices()
                    .into_iter()
                    .map(|index| {
                        let shape = instr
                            .shape
                            .subshape(&index)
                            .cloned()
                            .unwrap_or_else(|| instr.shape.clone());
                        let buffer = analysis.new_buffer(instr.id, index.clone(), &shape);
                        (index, buffer)
                    })
                    .collect()
            });
            analysis.positions.push(positions);
        }

        analysis
    }

    fn new_buffer(&mut self, defining_instruction: InstrId, index: ShapeIndex, shape: &Shape) -> BufferId {
        let id = self.buffers.len();
        self.buffers.push(HloBuffer {
            id,
            defining_instruction,
            defining_index: index,
            shape: shape.clone(),
        });
        id
    }

    /// Positions of `operand` below tuple element `k`, re-rooted at `{}`.
    fn sub_positions(&self, operand: InstrId, k: usize) -> Vec<(ShapeIndex, BufferId)> {
        self.positions[operand]
            .iter()
            .filter(|(index, _)| index.first() == Some(&k))
            .map(|(index, buffer)| (index[1..].to_vec(), *buffer))
            .collect()
    }
}

impl AliasAnalysis for HloAliasAnalysis {
    fn buffers(&self) -> &[HloBuffer] {
        &self.buffers
    }

    fn output_buffers(&self, instr: InstrId) -> &[(ShapeIndex, BufferId)] {
        self.positions
            .get(instr)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }
}
