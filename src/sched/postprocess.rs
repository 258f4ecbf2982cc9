// src/sched/postprocess.rs

//! Early/late rewrite of a valid order: async starts move up to the first
//! point where their inputs exist, async dones move down to just before
//! their first consumer. Everything else keeps its relative order.
//!
//! Instructions that neither float up nor down are "anchors". Every floating
//! instruction is assigned the gap between two anchors it ends up in: early
//! ones take the lowest gap their inputs allow, late ones the highest gap
//! their users allow. Late gaps only ever grow, so alternating the two
//! sweeps reaches a fixed point. Each gap is then emitted in a fixed
//! topological order (early before late, then by id), which makes the
//! rewrite a fixed point of itself.

use tracing::debug;

use crate::errors::{Result, SchedError};
use crate::hlo::{HloComputation, HloInstruction, InstrId, ScheduleHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Early,
    Late,
    Anchor,
}

fn is_early(instr: &HloInstruction) -> bool {
    (instr.opcode.is_async_start() && !instr.is_sync_collective())
        || instr.is_custom_call_with_hint(ScheduleHint::Earliest)
}

fn is_late(computation: &HloComputation, instr: &HloInstruction) -> bool {
    if instr.is_custom_call_with_hint(ScheduleHint::Latest) {
        return true;
    }
    instr.opcode.is_async_done()
        && instr
            .operand(0)
            .and_then(|start| computation.instruction(start))
            .is_some_and(is_early)
}

fn placement(computation: &HloComputation, instr: &HloInstruction) -> Placement {
    if is_early(instr) {
        Placement::Early
    } else if is_late(computation, instr) {
        Placement::Late
    } else {
        Placement::Anchor
    }
}

fn lookup<'c>(computation: &'c HloComputation, id: InstrId) -> Result<&'c HloInstruction> {
    computation.instruction(id).ok_or_else(|| {
        SchedError::UnknownInstruction(format!("id {id} in '{}'", computation.name()))
    })
}

fn inputs(instr: &HloInstruction) -> impl Iterator<Item = InstrId> + '_ {
    instr.operands.iter().chain(&instr.control_predecessors).copied()
}

fn outputs(instr: &HloInstruction) -> impl Iterator<Item = InstrId> + '_ {
    instr.users.iter().chain(&instr.control_successors).copied()
}

/// Float early ops up and late ops down in `sequence`.
pub fn schedule_as_early_or_late_as_possible(
    computation: &HloComputation,
    sequence: &[InstrId],
) -> Result<Vec<InstrId>> {
    let count = computation.instruction_count();
    let internal = |what: String| {
        SchedError::Internal(format!("early/late pass on '{}': {what}", computation.name()))
    };

    let mut seen = vec![false; count];
    for &id in sequence {
        lookup(computation, id)?;
        if std::mem::replace(&mut seen[id], true) {
            return Err(internal(format!("instruction id {id} appears twice")));
        }
    }
    if sequence.len() != count {
        return Err(internal(format!(
            "sequence has {} instructions, computation has {count}",
            sequence.len()
        )));
    }

    let instrs = computation.instructions();
    let placements: Vec<Placement> = instrs.iter().map(|i| placement(computation, i)).collect();

    // Anchor slots, and the starting gap of every instruction: the number of
    // anchors in front of it.
    let mut anchors: Vec<InstrId> = Vec::new();
    let mut slot = vec![0usize; count];
    let mut gap = vec![0usize; count];
    for &id in sequence {
        gap[id] = anchors.len();
        if placements[id] == Placement::Anchor {
            slot[id] = anchors.len();
            anchors.push(id);
        }
    }
    let last_gap = anchors.len();

    let late_count = placements.iter().filter(|&&p| p == Placement::Late).count();
    let max_rounds = late_count * (last_gap + 1) + 1;
    let mut rounds = 0;
    loop {
        rounds += 1;
        if rounds > max_rounds {
            return Err(internal("placement did not settle".to_string()));
        }

        for &id in sequence {
            if placements[id] != Placement::Early {
                continue;
            }
            gap[id] = inputs(&instrs[id])
                .map(|i| match placements[i] {
                    Placement::Anchor => slot[i] + 1,
                    _ => gap[i],
                })
                .max()
                .unwrap_or(0);
        }

        let mut changed = false;
        for &id in sequence.iter().rev() {
            if placements[id] != Placement::Late {
                continue;
            }
            let latest = outputs(&instrs[id])
                .map(|u| match placements[u] {
                    Placement::Anchor => slot[u],
                    _ => gap[u],
                })
                .min()
                .unwrap_or(last_gap);
            if latest != gap[id] {
                gap[id] = latest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut buckets: Vec<Vec<InstrId>> = vec![Vec::new(); last_gap + 1];
    for &id in sequence {
        if placements[id] != Placement::Anchor {
            buckets[gap[id]].push(id);
        }
    }

    let mut out: Vec<InstrId> = Vec::with_capacity(count);
    for (g, bucket) in buckets.iter().enumerate() {
        emit_bucket(computation, bucket, &placements, &mut out)?;
        if let Some(&anchor) = anchors.get(g) {
            out.push(anchor);
        }
    }

    debug!(
        computation = computation.name(),
        rounds,
        moved = out.iter().zip(sequence).filter(|(a, b)| a != b).count(),
        "early/late pass complete"
    );
    Ok(out)
}

/// Emit one gap in dependency order, early ops first, then by id.
fn emit_bucket(
    computation: &HloComputation,
    bucket: &[InstrId],
    placements: &[Placement],
    out: &mut Vec<InstrId>,
) -> Result<()> {
    let instrs = computation.instructions();
    let mut pending: Vec<usize> = bucket
        .iter()
        .map(|&id| inputs(&instrs[id]).filter(|i| bucket.contains(i)).count())
        .collect();
    let mut emitted = vec![false; bucket.len()];

    for _ in 0..bucket.len() {
        let next = (0..bucket.len())
            .filter(|&k| !emitted[k] && pending[k] == 0)
            .min_by_key(|&k| (placements[bucket[k]] == Placement::Late, bucket[k]))
            .ok_or_else(|| {
                SchedError::Internal(format!(
                    "early/late pass on '{}': dependency cycle among floating instructions",
                    computation.name()
                ))
            })?;
        emitted[next] = true;
        out.push(bucket[next]);
        for succ in outputs(&instrs[bucket[next]]) {
            if let Some(k) = bucket.iter().position(|&b| b == succ) {
                pending[k] = pending[k].saturating_sub(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlo::{HloOpcode, Shape};

    fn add(c: &mut HloComputation, name: &str, op: HloOpcode, operands: &[InstrId]) -> InstrId {
        c.add_instruction(HloInstruction::new(name, op, Shape::array(4)).with_operands(operands.to_vec()))
            .unwrap()
    }

    fn names(c: &HloComputation, seq: &[InstrId]) -> Vec<String> {
        seq.iter().map(|&i| c.instruction(i).unwrap().name.clone()).collect()
    }

    fn chain_with_async() -> HloComputation {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let c1 = add(&mut c, "c1", HloOpcode::Negate, &[p]);
        let s = add(&mut c, "start", HloOpcode::AllReduceStart, &[p]);
        let d = add(&mut c, "done", HloOpcode::AllReduceDone, &[s]);
        let c2 = add(&mut c, "c2", HloOpcode::Negate, &[c1]);
        let c3 = add(&mut c, "c3", HloOpcode::Negate, &[c2]);
        add(&mut c, "use", HloOpcode::Add, &[d, c3]);
        c
    }

    #[test]
    fn start_moves_up_and_done_moves_down() {
        let c = chain_with_async();
        let out = schedule_as_early_or_late_as_possible(&c, &c.post_order()).unwrap();
        assert_eq!(
            names(&c, &out),
            vec!["p", "start", "c1", "c2", "c3", "done", "use"]
        );
    }

    #[test]
    fn applying_twice_changes_nothing() {
        let c = chain_with_async();
        let once = schedule_as_early_or_late_as_possible(&c, &c.post_order()).unwrap();
        let twice = schedule_as_early_or_late_as_possible(&c, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sync_collectives_stay_put() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let c1 = add(&mut c, "c1", HloOpcode::Negate, &[p]);
        let s = c
            .add_instruction(
                HloInstruction::new("start", HloOpcode::AllReduceStart, Shape::array(4))
                    .with_operands([p])
                    .with_attribute("is_sync", "true"),
            )
            .unwrap();
        let d = add(&mut c, "done", HloOpcode::AllReduceDone, &[s]);
        add(&mut c, "use", HloOpcode::Add, &[d, c1]);
        let seq = c.post_order();
        let out = schedule_as_early_or_late_as_possible(&c, &seq).unwrap();
        assert_eq!(out, seq);
    }

    #[test]
    fn hinted_custom_calls_move() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let a = add(&mut c, "a", HloOpcode::Negate, &[p]);
        let early = c
            .add_instruction(
                HloInstruction::new("early", HloOpcode::CustomCall, Shape::array(4))
                    .with_operands([p])
                    .with_schedule_hint(ScheduleHint::Earliest),
            )
            .unwrap();
        let late = c
            .add_instruction(
                HloInstruction::new("late", HloOpcode::CustomCall, Shape::array(4))
                    .with_operands([p])
                    .with_schedule_hint(ScheduleHint::Latest),
            )
            .unwrap();
        let b = add(&mut c, "b", HloOpcode::Negate, &[a]);
        add(&mut c, "root", HloOpcode::Tuple, &[early, late, b]);

        let out = schedule_as_early_or_late_as_possible(&c, &c.post_order()).unwrap();
        assert_eq!(names(&c, &out), vec!["p", "early", "a", "b", "late", "root"]);
    }

    #[test]
    fn start_behind_a_hinted_consumer_settles_in_one_application() {
        let mut c = HloComputation::new("c");
        let p = add(&mut c, "p", HloOpcode::Parameter, &[]);
        let s0 = add(&mut c, "s0", HloOpcode::AllReduceStart, &[p]);
        let d0 = add(&mut c, "d0", HloOpcode::AllReduceDone, &[s0]);
        let x = add(&mut c, "c", HloOpcode::Add, &[p]);
        let e = c
            .add_instruction(
                HloInstruction::new("e", HloOpcode::CustomCall, Shape::array(4))
                    .with_operands([d0, x])
                    .with_schedule_hint(ScheduleHint::Earliest),
            )
            .unwrap();
        let s1 = add(&mut c, "s1", HloOpcode::AllReduceStart, &[x]);
        let d1 = add(&mut c, "d1", HloOpcode::AllReduceDone, &[s1]);
        add(&mut c, "root", HloOpcode::Tuple, &[e, d1]);

        let once = schedule_as_early_or_late_as_possible(&c, &c.post_order()).unwrap();
        assert_eq!(
            names(&c, &once),
            vec!["p", "s0", "c", "s1", "d0", "e", "d1", "root"]
        );
        let twice = schedule_as_early_or_late_as_possible(&c, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let c = chain_with_async();
        let err = schedule_as_early_or_late_as_possible(&c, &[0, 1, 1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, SchedError::Internal(_)));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let c = chain_with_async();
        let err = schedule_as_early_or_late_as_possible(&c, &[0, 99]).unwrap_err();
        assert!(matches!(err, SchedError::UnknownInstruction(_)));
    }
}
