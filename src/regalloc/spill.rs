//! Spill rewriting (§4.C step 5).
//!
//! A spilled vreg gets one frame slot. Every instruction that defines it gains a `Store` to that
//! slot immediately afterward; every instruction that reads it gains a fresh `Load` into a new
//! vreg immediately before, and the read operand is rewritten to use that new vreg instead. The
//! spilled vreg itself keeps its old id purely as the frame-slot key; it is never again read or
//! written as a register once rewriting finishes, so it drops out of the next liveness/
//! interference round on its own.

use crate::mir::{MInst, MIRFunction, MOpcode, MachineOperand, VReg};
use std::collections::HashMap;

/// Rewrite `mir` so that every vreg in `spilled` is backed by a frame slot instead of a register,
/// inserting `Store`s after defs and `Load`s before uses. Returns the frame-slot index chosen for
/// each spilled vreg, for diagnostics.
pub fn rewrite(mir: &mut MIRFunction, spilled: &[VReg]) -> HashMap<VReg, usize> {
    let mut slots = HashMap::new();
    for &v in spilled {
        let idx = mir.add_frame_object(8, 8);
        slots.insert(v, idx);
    }

    for block in mir.block_order.clone() {
        let old_insts = std::mem::take(&mut mir.blocks.get_mut(&block).unwrap().insts);
        let mut new_insts = Vec::with_capacity(old_insts.len());

        for mut inst in old_insts {
            // Loads for every spilled vreg this instruction reads, immediately before it.
            for op in inst.operands.iter_mut() {
                if let MachineOperand::Register { vreg, size_bits } = op {
                    if let Some(&idx) = slots.get(&*vreg) {
                        let fresh = mir.new_vreg();
                        let offset = mir.frame_offset(idx);
                        new_insts.push(
                            MInst::new(MOpcode::Load, *size_bits)
                                .with_dest(fresh)
                                .with_operand(MachineOperand::FrameSlot { offset }),
                        );
                        *vreg = fresh;
                    }
                }
            }

            let spilled_dest = inst
                .dest
                .and_then(|d| slots.get(&d).map(|&idx| (d, idx)));

            new_insts.push(inst.clone());

            if let Some((d, idx)) = spilled_dest {
                let offset = mir.frame_offset(idx);
                new_insts.push(
                    MInst::new(MOpcode::Store, inst.size_bits)
                        .with_operand(MachineOperand::FrameSlot { offset })
                        .with_operand(MachineOperand::Register {
                            vreg: d,
                            size_bits: inst.size_bits,
                        }),
                );
            }
        }

        mir.blocks.get_mut(&block).unwrap().insts = new_insts;
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, Function, InstructionData, Type};
    use crate::isa::CallConv;
    use crate::mir::select::lower_function;

    #[test]
    fn spilling_a_def_adds_a_store_right_after_it() {
        let mut f = Function::new(
            "f",
            Type::Function {
                params: vec![],
                ret: Box::new(Type::I64),
            },
        );
        let b = Block::new(0);
        f.layout.append_block(b);
        let imm = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 9,
        });
        f.layout.append_inst(imm, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, b);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let def_vreg = mir.blocks[&b].insts[0].dest.unwrap();
        let before_len = mir.blocks[&b].insts.len();

        let slots = rewrite(&mut mir, &[def_vreg]);
        assert!(slots.contains_key(&def_vreg));

        let after = &mir.blocks[&b].insts;
        // One Store inserted after the def, one Load inserted before the Ret's use.
        assert_eq!(after.len(), before_len + 2);
        assert_eq!(after[1].opcode, MOpcode::Store);
        assert_eq!(after[2].opcode, MOpcode::Load);
    }
}
