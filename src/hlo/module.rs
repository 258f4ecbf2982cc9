// src/hlo/module.rs

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::errors::{Result, SchedError};
use crate::hlo::computation::HloComputation;
use crate::hlo::instruction::{ATTR_IS_HOST_TRANSFER, ATTR_IS_SYNC};
use crate::hlo::opcode::HloOpcode;
use crate::hlo::schedule::HloSchedule;

/// A set of computations with one entry, plus an optional schedule.
#[derive(Debug, Clone)]
pub struct HloModule {
    name: String,
    computations: Vec<HloComputation>,
    by_name: HashMap<String, usize>,
    entry: usize,
    schedule: Option<HloSchedule>,
}

impl HloModule {
    /// Assemble a module.
    ///
    /// The entry is the computation named by `entry`, or the last one when
    /// `entry` is `None`. Every called computation must exist. Wrapped
    /// opcodes of `async-start`/`async-done` are resolved here and dones
    /// inherit the async flags of their start.
    pub fn new(
        name: impl Into<String>,
        mut computations: Vec<HloComputation>,
        entry: Option<&str>,
    ) -> Result<Self> {
        if computations.is_empty() {
            return Err(SchedError::ConfigError(
                "module must contain at least one computation".to_string(),
            ));
        }

        let mut by_name = HashMap::new();
        for (i, comp) in computations.iter().enumerate() {
            if by_name.insert(comp.name().to_string(), i).is_some() {
                return Err(SchedError::ConfigError(format!(
                    "duplicate computation name '{}'",
                    comp.name()
                )));
            }
        }

        let entry = match entry {
            Some(n) => *by_name
                .get(n)
                .ok_or_else(|| SchedError::UnknownComputation(n.to_string()))?,
            None => computations.len() - 1,
        };
        for (i, comp) in computations.iter_mut().enumerate() {
            comp.set_entry(i == entry);
        }

        for comp in &computations {
            for callee in comp.called_computations() {
                if !by_name.contains_key(callee) {
                    return Err(SchedError::UnknownComputation(format!(
                        "{callee} (called from '{}')",
                        comp.name()
                    )));
                }
            }
        }

        let mut module = Self {
            name: name.into(),
            computations,
            by_name,
            entry,
            schedule: None,
        };
        module.resolve_async_wrapped_opcodes();
        module.propagate_async_flags();
        Ok(module)
    }

    fn resolve_async_wrapped_opcodes(&mut self) {
        let root_opcodes: HashMap<String, HloOpcode> = self
            .computations
            .iter()
            .filter_map(|c| c.root().map(|r| (c.name().to_string(), r.opcode)))
            .collect();

        for comp in &mut self.computations {
            let instrs = comp.instructions_mut();
            for id in 0..instrs.len() {
                let wrapped = match instrs[id].opcode {
                    HloOpcode::AsyncStart => instrs[id]
                        .called_computations
                        .first()
                        .and_then(|c| root_opcodes.get(c).copied()),
                    HloOpcode::AsyncDone => instrs[id]
                        .called_computations
                        .first()
                        .and_then(|c| root_opcodes.get(c).copied())
                        .or_else(|| {
                            instrs[id]
                                .operand(0)
                                .and_then(|start| instrs[start].async_wrapped_opcode)
                        }),
                    _ => continue,
                };
                if instrs[id].async_wrapped_opcode.is_none() {
                    instrs[id].async_wrapped_opcode = wrapped;
                }
            }
        }
    }

    /// Dones inherit the `is_sync` / `is_host_transfer` flags of their start,
    /// so classification never needs to look through operands.
    fn propagate_async_flags(&mut self) {
        for comp in &mut self.computations {
            let instrs = comp.instructions_mut();
            for id in 0..instrs.len() {
                if !instrs[id].opcode.is_async_done() {
                    continue;
                }
                let Some(start) = instrs[id].operand(0) else {
                    continue;
                };
                for key in [ATTR_IS_SYNC, ATTR_IS_HOST_TRANSFER] {
                    if let Some(v) = instrs[start].attributes.get(key).cloned() {
                        instrs[id].attributes.entry(key.to_string()).or_insert(v);
                    }
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn computations(&self) -> &[HloComputation] {
        &self.computations
    }

    pub fn computation(&self, name: &str) -> Result<&HloComputation> {
        self.by_name
            .get(name)
            .map(|&i| &self.computations[i])
            .ok_or_else(|| SchedError::UnknownComputation(name.to_string()))
    }

    pub fn entry_computation(&self) -> &HloComputation {
        &self.computations[self.entry]
    }

    pub fn has_schedule(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn schedule(&self) -> Option<&HloSchedule> {
        self.schedule.as_ref()
    }

    /// Install a schedule after verifying it against this module.
    pub fn set_schedule(&mut self, schedule: HloSchedule) -> Result<()> {
        schedule.verify(self)?;
        self.schedule = Some(schedule);
        Ok(())
    }

    /// The installed schedule, or one built from each computation's
    /// post-order when none is installed.
    pub fn schedule_or_post_order(&self) -> HloSchedule {
        match &self.schedule {
            Some(s) => s.clone(),
            None => HloSchedule::from_post_order(self),
        }
    }

    /// Computations ordered so that every callee precedes its callers.
    /// Computations unreachable from the entry are appended in declaration
    /// order.
    pub fn computations_post_order(&self) -> Vec<&HloComputation> {
        let mut order: Vec<usize> = Vec::with_capacity(self.computations.len());
        let mut visited: HashSet<usize> = HashSet::new();

        let mut roots: Vec<usize> = vec![self.entry];
        roots.extend((0..self.computations.len()).filter(|&i| i != self.entry));

        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            // Iterative DFS: (index, expanded).
            let mut stack = vec![(root, false)];
            while let Some((idx, expanded)) = stack.pop() {
                if expanded {
                    order.push(idx);
                    continue;
                }
                if !visited.insert(idx) {
                    continue;
                }
                stack.push((idx, true));
                for callee in self.computations[idx].called_computations().into_iter().rev() {
                    match self.by_name.get(callee) {
                        Some(&c) if !visited.contains(&c) => stack.push((c, false)),
                        Some(_) => {}
                        None => warn!(callee, "called computation missing from module"),
                    }
                }
            }
        }

        order.into_iter().map(|i| &self.computations[i]).collect()
    }
}
