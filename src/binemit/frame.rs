//! Frame materialization (§4.D): classify a function's frame kind and splice in the
//! prologue/epilogue instructions register allocation left for this pass to add.
//!
//! Runs after `regalloc::allocate_function`, so `mir.locals_size` already includes any spill
//! slots on top of the original `Alloca`s, and `AllocationResult::callee_saved_used` is final.

use crate::isa::x86::registers::{RegUnit, RBP};
use crate::isa::CallConv;
use crate::mir::{MIRFunction, MInst, MOpcode, MachineOperand, VReg};
use std::collections::HashSet;

/// Which of the three frame shapes a function needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// No locals, no spills, calls nothing: the body can run directly off the caller's stack.
    None,
    /// No locals or spills but calls out: needs a minimal, frame-pointer-free reservation so the
    /// callee it invokes has a correctly aligned stack.
    Minimal,
    /// Everything else: a full `RBP`-based frame.
    Full,
}

fn align16(n: u32) -> u32 {
    (n + 15) & !15
}

fn frame_kind(mir: &MIRFunction) -> FrameKind {
    if mir.locals_size == 0 {
        if mir.leaf {
            FrameKind::None
        } else {
            FrameKind::Minimal
        }
    } else {
        FrameKind::Full
    }
}

/// Bytes the prologue reserves below the return address (or below the saved `RBP`, for `Full`),
/// including the Windows shadow space where applicable (§6.1).
fn reserve_bytes(kind: FrameKind, mir: &MIRFunction, call_conv: CallConv) -> u32 {
    let aligned = align16(mir.locals_size);
    let shadow = call_conv.shadow_space_bytes();
    match kind {
        FrameKind::None => 0,
        FrameKind::Minimal => aligned + 8 + shadow,
        // No `+8` in the general case: `push rbp` already accounts for the 8 bytes `Minimal`
        // reserves explicitly. Under a shadow-space convention (§6.1) the reservation grows to
        // `4*8 + 8` on top of the frame regardless, so the `+8` reappears there alongside it.
        FrameKind::Full => {
            if shadow > 0 {
                aligned + 8 + shadow
            } else {
                aligned
            }
        }
    }
}

fn adjust_stack(delta: i64) -> MInst {
    MInst::new(MOpcode::AdjustStack, 64).with_operand(MachineOperand::Immediate(delta as u64))
}

fn push(reg: RegUnit) -> MInst {
    MInst::new(MOpcode::Push, 64).with_operand(MachineOperand::Register {
        vreg: VReg::physical(reg),
        size_bits: 64,
    })
}

fn pop(reg: RegUnit) -> MInst {
    MInst::new(MOpcode::Pop, 64).with_operand(MachineOperand::Register {
        vreg: VReg::physical(reg),
        size_bits: 64,
    })
}

/// Classify `mir`'s frame and splice in its prologue (at the top of the entry block) and its
/// epilogue (immediately before every `Ret`). Returns the chosen kind, which the encoder needs
/// for nothing further — the instructions it spliced in already say everything.
pub fn insert_frame_instructions(
    mir: &mut MIRFunction,
    call_conv: CallConv,
    callee_saved_used: &HashSet<RegUnit>,
) -> FrameKind {
    let kind = frame_kind(mir);
    let reserve = reserve_bytes(kind, mir, call_conv);
    let mut callee_saved: Vec<RegUnit> = callee_saved_used.iter().copied().collect();
    callee_saved.sort_unstable();

    if kind == FrameKind::None {
        return kind;
    }

    let mut prologue = Vec::new();
    let mut epilogue = Vec::new();

    if kind == FrameKind::Full {
        prologue.push(push(RBP));
        prologue.push(MInst::new(MOpcode::FramePointerSet, 64));
    }
    for &reg in &callee_saved {
        prologue.push(push(reg));
    }
    if reserve > 0 {
        prologue.push(adjust_stack(reserve as i64));
    }

    if reserve > 0 {
        epilogue.push(adjust_stack(-(reserve as i64)));
    }
    for &reg in callee_saved.iter().rev() {
        epilogue.push(pop(reg));
    }
    if kind == FrameKind::Full {
        epilogue.push(MInst::new(MOpcode::FramePointerRestore, 64));
        epilogue.push(pop(RBP));
    }

    if let Some(&entry) = mir.block_order.first() {
        let insts = &mut mir.blocks.get_mut(&entry).expect("undeclared entry block").insts;
        let mut spliced = prologue;
        spliced.append(insts);
        *insts = spliced;
    }

    for &block in &mir.block_order.clone() {
        let insts = &mut mir.blocks.get_mut(&block).expect("undeclared block").insts;
        let mut i = 0;
        while i < insts.len() {
            if insts[i].opcode == MOpcode::Ret {
                for (offset, inst) in epilogue.iter().cloned().enumerate() {
                    insts.insert(i + offset, inst);
                }
                i += epilogue.len() + 1;
            } else {
                i += 1;
            }
        }
    }

    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, Function, InstructionData, Type};
    use crate::mir::select::lower_function;
    use crate::regalloc::allocate_function;

    fn ret_i64_fn() -> Function {
        Function::new("f", Type::Function { params: vec![], ret: Box::new(Type::I64) })
    }

    #[test]
    fn leaf_with_no_locals_gets_no_frame() {
        let mut f = ret_i64_fn();
        let b = Block::new(0);
        f.layout.append_block(b);
        let imm = f.dfg.make_inst(InstructionData::Immediate { ty: Type::I64, value: 1 });
        f.layout.append_inst(imm, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, b);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let alloc = allocate_function(&mut mir, CallConv::SystemV).unwrap();
        let kind = insert_frame_instructions(&mut mir, CallConv::SystemV, &alloc.callee_saved_used);
        assert_eq!(kind, FrameKind::None);
        assert!(!mir.insts_mut().any(|i| i.opcode == MOpcode::AdjustStack));
    }

    #[test]
    fn function_with_a_local_gets_a_full_frame() {
        let mut f = ret_i64_fn();
        let b = Block::new(0);
        f.layout.append_block(b);
        let slot = f.dfg.make_inst(InstructionData::Alloca { size: 8, ty: Type::I64 });
        f.layout.append_inst(slot, b);
        let val = f.dfg.make_inst(InstructionData::Immediate { ty: Type::I64, value: 7 });
        f.layout.append_inst(val, b);
        let store = f.dfg.make_inst(InstructionData::Store { addr: slot, value: val });
        f.layout.append_inst(store, b);
        let load = f.dfg.make_inst(InstructionData::Load { ty: Type::I64, addr: slot });
        f.layout.append_inst(load, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(load) });
        f.layout.append_inst(ret, b);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let alloc = allocate_function(&mut mir, CallConv::SystemV).unwrap();
        let kind = insert_frame_instructions(&mut mir, CallConv::SystemV, &alloc.callee_saved_used);
        assert_eq!(kind, FrameKind::Full);

        let entry = mir.block_order[0];
        let first = &mir.blocks[&entry].insts[0];
        assert_eq!(first.opcode, MOpcode::Push);
    }
}
