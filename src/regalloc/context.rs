//! `allocate_function`: the register-allocation driver loop (§4.C).
//!
//! Runs liveness, builds the interference graph, colors it, and either rewrites every vreg
//! operand to its assigned physical register or spills the nodes coloring couldn't fit and
//! starts over. Converges because `spill::rewrite` strictly reduces the number of distinct
//! program points a given vreg is live across (a spilled vreg is live only between its one def
//! or use and the adjacent Load/Store, never across a whole block anymore).

use crate::isa::CallConv;
use crate::mir::{MIRFunction, MachineOperand};
use crate::regalloc::coloring::{color, ColoringResult};
use crate::regalloc::interference::InterferenceGraph;
use crate::regalloc::liveness::Liveness;
use crate::regalloc::spill;
use crate::result::{CodegenError, CodegenResult};
use std::collections::{HashMap, HashSet};

/// The outcome of allocating one function: every callee-saved physical register actually used by
/// the body, needed by §4.D prologue/epilogue construction to decide which ones to push/pop.
pub struct AllocationResult {
    pub callee_saved_used: HashSet<crate::isa::x86::registers::RegUnit>,
}

/// A hard ceiling on spill/recolor rounds. Each round strictly shrinks the live range of every
/// spilled vreg, so in practice this never comes close; it exists only to turn a hypothetical
/// non-terminating allocator bug into a diagnosable error instead of a hang.
const MAX_ROUNDS: usize = 64;

/// Allocate physical registers for every vreg in `mir`, rewriting its operands in place.
pub fn allocate_function(mir: &mut MIRFunction, call_conv: CallConv) -> CodegenResult<AllocationResult> {
    for round in 0..MAX_ROUNDS {
        let liveness = Liveness::compute(mir);
        let graph = InterferenceGraph::build(mir, &liveness, call_conv);

        match color(&graph, call_conv) {
            ColoringResult::Colored(colors) => {
                log::debug!("{}: colored in {} round(s)", mir.name, round + 1);
                return Ok(apply_colors(mir, &colors, call_conv));
            }
            ColoringResult::Spill(spilled) => {
                log::trace!("{}: round {round} spilled {} vreg(s)", mir.name, spilled.len());
                spill::rewrite(mir, &spilled);
            }
        }
    }

    Err(CodegenError::invariant(
        format!(
            "register allocation for {} did not converge after {} rounds",
            mir.name, MAX_ROUNDS
        ),
        None,
    ))
}

fn apply_colors(
    mir: &mut MIRFunction,
    colors: &HashMap<crate::mir::VReg, crate::isa::x86::registers::RegUnit>,
    call_conv: CallConv,
) -> AllocationResult {
    let caller_saved = call_conv.caller_saved();
    let mut callee_saved_used = HashSet::new();

    for inst in mir.insts_mut() {
        if let Some(d) = inst.dest {
            if let Some(&color) = colors.get(&d) {
                inst.dest = Some(crate::mir::VReg::physical(color));
                if !caller_saved.contains(color) {
                    callee_saved_used.insert(color);
                }
            }
        }
        for op in inst.operands.iter_mut() {
            if let MachineOperand::Register { vreg, .. } = op {
                if let Some(&color) = colors.get(&*vreg) {
                    *vreg = crate::mir::VReg::physical(color);
                    if !caller_saved.contains(color) {
                        callee_saved_used.insert(color);
                    }
                }
            }
        }
    }

    AllocationResult { callee_saved_used }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, Function, InstructionData, Type};
    use crate::mir::select::lower_function;

    fn void_fn(ret: Type) -> Function {
        Function::new(
            "f",
            Type::Function {
                params: vec![],
                ret: Box::new(ret),
            },
        )
    }

    #[test]
    fn simple_function_allocates_without_spilling() {
        let mut f = void_fn(Type::I64);
        let b = Block::new(0);
        f.layout.append_block(b);
        let a = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 1,
        });
        f.layout.append_inst(a, b);
        let c = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 2,
        });
        f.layout.append_inst(c, b);
        let sum = f.dfg.make_inst(InstructionData::Binary {
            op: crate::ir::BinOp::Add,
            ty: Type::I64,
            lhs: a,
            rhs: c,
        });
        f.layout.append_inst(sum, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(sum) });
        f.layout.append_inst(ret, b);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        allocate_function(&mut mir, CallConv::SystemV).unwrap();

        for inst in mir.insts_mut() {
            if let Some(d) = inst.dest {
                assert!(!d.is_virtual(), "every dest must be colored to a physical register");
            }
            for op in inst.operands.iter() {
                if let MachineOperand::Register { vreg, .. } = op {
                    assert!(!vreg.is_virtual(), "every operand must be colored");
                }
            }
        }
    }

    #[test]
    fn reallocating_an_already_colored_function_is_a_no_op() {
        let mut f = void_fn(Type::I64);
        let b = Block::new(0);
        f.layout.append_block(b);
        let imm = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 5,
        });
        f.layout.append_inst(imm, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, b);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        allocate_function(&mut mir, CallConv::SystemV).unwrap();
        let first_pass: Vec<_> = mir.insts_mut().map(|i| i.dest).collect();

        allocate_function(&mut mir, CallConv::SystemV).unwrap();
        let second_pass: Vec<_> = mir.insts_mut().map(|i| i.dest).collect();

        assert_eq!(first_pass, second_pass);
    }
}
