#![allow(dead_code)]

use std::collections::HashMap;

use lhsched::hlo::{HloComputation, HloInstruction, HloModule, HloOpcode, InstrId, Shape};

/// Builds a computation by instruction name.
///
/// ```ignore
/// let comp = ComputationBuilder::new("main")
///     .param("p", 64)
///     .op("ars", HloOpcode::AllReduceStart, 64, &["p"])
///     .op("ard", HloOpcode::AllReduceDone, 64, &["ars"])
///     .build();
/// ```
pub struct ComputationBuilder {
    comp: HloComputation,
    ids: HashMap<String, InstrId>,
}

impl ComputationBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            comp: HloComputation::new(name),
            ids: HashMap::new(),
        }
    }

    pub fn param(self, name: &str, bytes: u64) -> Self {
        self.op(name, HloOpcode::Parameter, bytes, &[])
    }

    pub fn op(self, name: &str, opcode: HloOpcode, bytes: u64, operands: &[&str]) -> Self {
        let instr = HloInstruction::new(name, opcode, Shape::array(bytes));
        self.instr(instr, operands)
    }

    /// Add a prepared instruction; `operands` are resolved by name.
    pub fn instr(mut self, instr: HloInstruction, operands: &[&str]) -> Self {
        let operand_ids: Vec<InstrId> = operands.iter().map(|o| self.id(o)).collect();
        let name = instr.name.clone();
        let id = self
            .comp
            .add_instruction(instr.with_operands(operand_ids))
            .expect("builder instruction should be valid");
        self.ids.insert(name, id);
        self
    }

    /// Id of an instruction added earlier.
    pub fn id(&self, name: &str) -> InstrId {
        *self
            .ids
            .get(name)
            .unwrap_or_else(|| panic!("unknown instruction '{name}' in builder"))
    }

    pub fn build(self) -> HloComputation {
        self.comp
    }
}

/// Wrap a single computation in a module.
pub fn single_computation_module(comp: HloComputation) -> HloModule {
    HloModule::new("test", vec![comp], None).expect("single computation module should build")
}

/// Instruction names of `sequence`, in order.
pub fn names(comp: &HloComputation, sequence: &[InstrId]) -> Vec<String> {
    sequence
        .iter()
        .map(|&id| comp.instruction(id).expect("id in computation").name.clone())
        .collect()
}

/// Names of the installed schedule of `computation`.
pub fn scheduled_names(module: &HloModule, computation: &str) -> Vec<String> {
    let comp = module.computation(computation).expect("computation exists");
    let schedule = module.schedule().expect("module has a schedule");
    names(comp, schedule.sequence(computation).expect("sequence exists"))
}
