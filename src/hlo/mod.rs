// src/hlo/mod.rs

//! Minimal dataflow IR consumed by the scheduler.
//!
//! - [`instruction`] / [`computation`] / [`module`] model the graph: nodes
//!   with operands, users, control edges and called computations.
//! - [`schedule`] holds a linear order per computation.
//! - [`alias`] answers "which buffer backs this output position".
//! - [`shape`] provides byte sizes for memory accounting.

pub mod alias;
pub mod computation;
pub mod instruction;
pub mod module;
pub mod opcode;
pub mod schedule;
pub mod shape;

pub use alias::{AliasAnalysis, BufferId, HloAliasAnalysis, HloBuffer};
pub use computation::HloComputation;
pub use instruction::{HloInstruction, InstrId, ScheduleHint};
pub use module::HloModule;
pub use opcode::HloOpcode;
pub use schedule::HloSchedule;
pub use shape::{Shape, ShapeIndex, ShapeSizeFn, shape_size_bytes};
