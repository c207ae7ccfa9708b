//! Instruction selection: IR to MIR (§4.B).
//!
//! Lowering runs in two passes over the IR, both in layout order. Pass 1 assigns a virtual
//! register to every value-producing instruction up front, which is what lets a loop header's
//! `Phi` reference a value defined later in the same loop body (a back edge) without the
//! selector needing general DAG-scheduling machinery: by the time pass 2 reaches any operand
//! reference, that operand already has a vreg whether or not it's been *selected* yet. Pass 2
//! walks the same order again and emits each instruction's `MInst`(s), folding cheap,
//! side-effect-free operands (immediates, frame-slot addresses, static/function references)
//! directly into the consuming instruction's operand list instead of materializing them into
//! their own register first, the way a tree-pattern selector folds leaves into their parent
//! (§4.B "instruction selection").

use crate::entity::EntityRef;
use crate::ir::{BinOp, Block, CmpKind, Function, InstructionData, Type};
use crate::isa::CallConv;
use crate::mir::entities::VReg;
use crate::mir::function::MIRFunction;
use crate::mir::instructions::{MInst, MOpcode, MachineOperand};
use crate::result::{CodegenError, CodegenResult};
use std::collections::HashMap;

/// Lower one IR function to MIR. `is_leaf` comes from `FunctionFlags::leaf`, already computed by
/// the builder from whether the body contains a `Call` (§3.2).
pub fn lower_function(
    func: &Function,
    call_conv: CallConv,
    is_leaf: bool,
) -> CodegenResult<MIRFunction> {
    let mut mir = MIRFunction::new(func.name.clone(), is_leaf);
    let mut vregs: HashMap<crate::ir::Inst, VReg> = HashMap::new();
    let mut frame_slots: HashMap<crate::ir::Inst, usize> = HashMap::new();

    // Pass 1: pre-assign a vreg to every instruction that produces a value, and a frame slot to
    // every `Alloca`, before anything is selected.
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            match func.dfg.inst(inst) {
                InstructionData::Alloca { size, ty } => {
                    let idx = mir.add_frame_object(*size, ty.align_of());
                    frame_slots.insert(inst, idx);
                    vregs.insert(inst, mir.new_vreg());
                }
                data if data.has_result() => {
                    vregs.insert(inst, mir.new_vreg());
                }
                _ => {}
            }
        }
    }

    // Entry-block parameters: materialize each one out of its ABI argument register (§4.B, §6.1).
    let arg_regs = call_conv.arg_registers();
    if arg_regs.len() < func.params.len() {
        return Err(CodegenError::Unsupported {
            construct: "stack-passed arguments",
            detail: format!(
                "{} parameters exceed the {} available argument registers",
                func.params.len(),
                arg_regs.len()
            ),
        });
    }
    for &param_inst in func.params.iter() {
        mir.param_vregs.push(vregs[&param_inst]);
    }

    for block in func.layout.blocks() {
        mir.start_block(block);
    }

    // Materialize parameters into the entry block, ahead of everything else the body does.
    if let Some(entry) = func.layout.entry_block() {
        for (i, &param_inst) in func.params.iter().enumerate() {
            let dest = vregs[&param_inst];
            let size_bits = func.dfg.inst(param_inst).result_type().reg_size_bits();
            mir.push(
                entry,
                MInst::new(MOpcode::Mov, size_bits)
                    .with_dest(dest)
                    .with_operand(MachineOperand::Register {
                        vreg: VReg::physical(arg_regs[i]),
                        size_bits,
                    }),
            );
        }
    }

    // Pass 2: select each instruction in layout order.
    for block in func.layout.blocks() {
        log::trace!("{}: selecting {block}", func.name);
        for inst in func.layout.block_insts(block) {
            select_inst(func, block, inst, call_conv, &vregs, &frame_slots, &mut mir)?;
        }
    }

    lower_phis(func, &vregs, &frame_slots, &mut mir);

    Ok(mir)
}

/// PHI lowering (§4.B): a Phi itself emits no `MInst` (pass 2 skips it); instead, for each
/// `(pred_block, value)` argument, a `Mov` into the Phi's pre-assigned vreg is inserted at the
/// end of `pred_block`, before its terminator. This runs after pass 2 so every predecessor block
/// already has its terminator in place to insert ahead of.
fn lower_phis(
    func: &Function,
    vregs: &HashMap<crate::ir::Inst, VReg>,
    frame_slots: &HashMap<crate::ir::Inst, usize>,
    mir: &mut MIRFunction,
) {
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            if let InstructionData::Phi { ty, args } = func.dfg.inst(inst) {
                let dest = vregs[&inst];
                let size_bits = ty.reg_size_bits().max(8);
                for arg in args {
                    let src = operand_of(func, arg.value, vregs, frame_slots, mir);
                    mir.insert_before_terminator(
                        arg.pred,
                        MInst::new(MOpcode::Mov, size_bits)
                            .with_dest(dest)
                            .with_operand(src),
                    );
                }
            }
        }
    }
}

/// Resolve `operand_inst` (a value used by some other instruction) to the `MachineOperand` that
/// should appear in the consuming `MInst`, folding it in place when cheap and otherwise pointing
/// at its pre-assigned vreg.
fn operand_of(
    func: &Function,
    operand_inst: crate::ir::Inst,
    vregs: &HashMap<crate::ir::Inst, VReg>,
    frame_slots: &HashMap<crate::ir::Inst, usize>,
    mir: &MIRFunction,
) -> MachineOperand {
    match func.dfg.inst(operand_inst) {
        InstructionData::Immediate { value, .. } => MachineOperand::Immediate(*value),
        InstructionData::StaticRef { var } => MachineOperand::StaticRef(*var),
        InstructionData::FuncRef { func: f } => MachineOperand::Function(*f),
        InstructionData::Alloca { .. } => {
            let idx = frame_slots[&operand_inst];
            MachineOperand::FrameSlot {
                offset: mir.frame_offset(idx),
            }
        }
        data => MachineOperand::Register {
            vreg: vregs[&operand_inst],
            size_bits: data.result_type().reg_size_bits().max(8),
        },
    }
}

fn reg_operand(
    vregs: &HashMap<crate::ir::Inst, VReg>,
    inst: crate::ir::Inst,
    size_bits: u32,
) -> MachineOperand {
    MachineOperand::Register {
        vreg: vregs[&inst],
        size_bits: size_bits.max(8),
    }
}

#[allow(clippy::too_many_arguments)]
fn select_inst(
    func: &Function,
    block: Block,
    inst: crate::ir::Inst,
    call_conv: CallConv,
    vregs: &HashMap<crate::ir::Inst, VReg>,
    frame_slots: &HashMap<crate::ir::Inst, usize>,
    mir: &mut MIRFunction,
) -> CodegenResult<()> {
    let data = func.dfg.inst(inst).clone();
    let size_bits = data.result_type().reg_size_bits().max(8);

    match data {
        InstructionData::Immediate { .. }
        | InstructionData::Alloca { .. }
        | InstructionData::StaticRef { .. }
        | InstructionData::FuncRef { .. } => {
            // Pure addressing/constant leaves; folded directly into whatever consumes them by
            // `operand_of`. Emit nothing unless the value is never consumed at all, in which
            // case its side-effect-free result is simply unobserved (no instruction needed).
        }

        InstructionData::LitString { bytes } => {
            let name = format!(".Lstrdata{}", inst.index());
            mir.string_literals.push((name.clone(), bytes));
            let dest = vregs[&inst];
            mir.push(
                block,
                MInst::new(MOpcode::Lea, 64)
                    .with_dest(dest)
                    .with_operand(MachineOperand::Name(name)),
            );
        }

        InstructionData::Parameter { .. } => {
            // Materialized by the ABI argument-register pre-pass in `lower_function`.
        }

        InstructionData::Load { ty, addr } => {
            let dest = vregs[&inst];
            let src = operand_of(func, addr, vregs, frame_slots, mir);
            mir.push(
                block,
                MInst::new(MOpcode::Load, ty.reg_size_bits().max(8))
                    .with_dest(dest)
                    .with_operand(src),
            );
        }

        InstructionData::Store { addr, value } => {
            let dest = operand_of(func, addr, vregs, frame_slots, mir);
            let src = operand_of(func, value, vregs, frame_slots, mir);
            let ty = func.dfg.inst(value).result_type();
            mir.push(
                block,
                MInst::new(MOpcode::Store, ty.reg_size_bits().max(8))
                    .with_operand(dest)
                    .with_operand(src),
            );
        }

        InstructionData::Binary { op, ty, lhs, rhs } => {
            select_binary(func, block, inst, op, ty, lhs, rhs, vregs, frame_slots, mir)?;
        }

        InstructionData::Compare { kind, lhs, rhs } => {
            let dest = vregs[&inst];
            let l = operand_of(func, lhs, vregs, frame_slots, mir);
            let r = operand_of(func, rhs, vregs, frame_slots, mir);
            let cmp_size = func.dfg.inst(lhs).result_type().reg_size_bits().max(8);
            mir.push(
                block,
                MInst::new(MOpcode::Cmp, cmp_size)
                    .with_operand(l)
                    .with_operand(r),
            );
            mir.push(
                block,
                MInst::new(MOpcode::SetCC(kind), 8).with_dest(dest),
            );
        }

        InstructionData::Not { ty, operand } => {
            let dest = vregs[&inst];
            let src = operand_of(func, operand, vregs, frame_slots, mir);
            mir.push(
                block,
                MInst::new(MOpcode::Mov, ty.reg_size_bits().max(8))
                    .with_dest(dest)
                    .with_operand(src),
            );
            mir.push(
                block,
                MInst::new(MOpcode::Not, ty.reg_size_bits().max(8))
                    .with_dest(dest)
                    .with_operand(reg_operand(vregs, inst, size_bits)),
            );
        }

        InstructionData::Copy { ty, operand } | InstructionData::Truncate { ty, operand } => {
            let dest = vregs[&inst];
            let src = operand_of(func, operand, vregs, frame_slots, mir);
            mir.push(
                block,
                MInst::new(MOpcode::Mov, ty.reg_size_bits().max(8))
                    .with_dest(dest)
                    .with_operand(src),
            );
        }

        InstructionData::SignExtend { ty, operand } => {
            let dest = vregs[&inst];
            let src = operand_of(func, operand, vregs, frame_slots, mir);
            mir.push(
                block,
                MInst::new(MOpcode::Movsx, ty.reg_size_bits())
                    .with_dest(dest)
                    .with_operand(src),
            );
        }

        InstructionData::ZeroExtend { ty, operand } => {
            let dest = vregs[&inst];
            let src = operand_of(func, operand, vregs, frame_slots, mir);
            mir.push(
                block,
                MInst::new(MOpcode::Movzx, ty.reg_size_bits())
                    .with_dest(dest)
                    .with_operand(src),
            );
        }

        InstructionData::Branch { dest } => {
            mir.push(
                block,
                MInst::new(MOpcode::Jmp, 0).with_operand(MachineOperand::Block(dest)),
            );
        }

        InstructionData::BranchConditional {
            cond,
            then_block,
            else_block,
        } => {
            let c = operand_of(func, cond, vregs, frame_slots, mir);
            mir.push(
                block,
                MInst::new(MOpcode::Cmp, 8)
                    .with_operand(c)
                    .with_operand(MachineOperand::Immediate(0)),
            );
            mir.push(
                block,
                MInst::new(MOpcode::Jcc(CmpKind::Ne), 0)
                    .with_operand(MachineOperand::Block(then_block)),
            );
            mir.push(
                block,
                MInst::new(MOpcode::Jmp, 0).with_operand(MachineOperand::Block(else_block)),
            );
        }

        InstructionData::Return { value } => {
            if let Some(v) = value {
                let ret_size = func.dfg.inst(v).result_type().reg_size_bits().max(8);
                let src = operand_of(func, v, vregs, frame_slots, mir);
                mir.push(
                    block,
                    MInst::new(MOpcode::Mov, ret_size)
                        .with_dest(VReg::physical(call_conv.return_register()))
                        .with_operand(src),
                );
            }
            mir.push(block, MInst::new(MOpcode::Ret, 0));
        }

        InstructionData::Unreachable => {
            mir.push(block, MInst::new(MOpcode::Ud2, 0));
        }

        InstructionData::Call {
            ty,
            callee,
            args,
            tail_call: _,
        } => {
            select_call(func, block, inst, ty, callee, &args, call_conv, vregs, frame_slots, mir)?;
        }

        InstructionData::Phi { .. } => {
            // Never lowered directly: its feeders are `Copy` instructions (see
            // `IrBuilder::codegen_if`/loop helpers) that already share this Phi's vreg
            // (`ir_to_mir` Open Question 1), so the Phi instruction itself contributes nothing
            // further once pass 1 has assigned it a vreg.
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn select_binary(
    func: &Function,
    block: Block,
    inst: crate::ir::Inst,
    op: BinOp,
    ty: Type,
    lhs: crate::ir::Inst,
    rhs: crate::ir::Inst,
    vregs: &HashMap<crate::ir::Inst, VReg>,
    frame_slots: &HashMap<crate::ir::Inst, usize>,
    mir: &mut MIRFunction,
) -> CodegenResult<()> {
    let dest = vregs[&inst];
    let size_bits = ty.reg_size_bits().max(8);
    let l = operand_of(func, lhs, vregs, frame_slots, mir);
    let r = operand_of(func, rhs, vregs, frame_slots, mir);

    match op {
        BinOp::Div | BinOp::Mod => {
            // Signed divide: dividend sign-extended into rdx:rax, divisor in any other GPR,
            // quotient in rax, remainder in rdx (§4.C precoloring).
            mir.push(
                block,
                MInst::new(MOpcode::Mov, size_bits)
                    .with_dest(VReg::physical(crate::isa::x86::registers::RAX))
                    .with_operand(l),
            );
            // `IDiv` divides rdx:rax by the divisor; rdx must hold rax's sign, not whatever the
            // allocator last left there, or the quotient/remainder is wrong (or `#DE` faults).
            mir.push(block, MInst::new(MOpcode::Cdq, size_bits));
            mir.push(block, MInst::new(MOpcode::IDiv, size_bits).with_operand(r));
            let result_reg = if op == BinOp::Div {
                crate::isa::x86::registers::RAX
            } else {
                crate::isa::x86::registers::RDX
            };
            mir.push(
                block,
                MInst::new(MOpcode::Mov, size_bits)
                    .with_dest(dest)
                    .with_operand(MachineOperand::Register {
                        vreg: VReg::physical(result_reg),
                        size_bits,
                    }),
            );
        }
        BinOp::Shl | BinOp::Sar | BinOp::Shr => {
            // Shift count must be an immediate or `cl` (§4.C precoloring).
            mir.push(
                block,
                MInst::new(MOpcode::Mov, size_bits).with_dest(dest).with_operand(l),
            );
            let count = match &r {
                MachineOperand::Immediate(_) => r,
                _ => {
                    mir.push(
                        block,
                        MInst::new(MOpcode::Mov, 8)
                            .with_dest(VReg::physical(crate::isa::x86::registers::RCX))
                            .with_operand(r),
                    );
                    MachineOperand::Register {
                        vreg: VReg::physical(crate::isa::x86::registers::RCX),
                        size_bits: 8,
                    }
                }
            };
            let opcode = match op {
                BinOp::Shl => MOpcode::Shl,
                BinOp::Sar => MOpcode::Sar,
                BinOp::Shr => MOpcode::Shr,
                _ => unreachable!(),
            };
            mir.push(
                block,
                MInst::new(opcode, size_bits)
                    .with_dest(dest)
                    .with_operand(reg_operand(vregs, inst, size_bits))
                    .with_operand(count),
            );
        }
        _ => {
            let opcode = match op {
                BinOp::Add => MOpcode::Add,
                BinOp::Sub => MOpcode::Sub,
                BinOp::Mul => MOpcode::IMul,
                BinOp::And => MOpcode::And,
                BinOp::Or => MOpcode::Or,
                _ => unreachable!(),
            };
            mir.push(
                block,
                MInst::new(MOpcode::Mov, size_bits).with_dest(dest).with_operand(l),
            );
            mir.push(
                block,
                MInst::new(opcode, size_bits)
                    .with_dest(dest)
                    .with_operand(reg_operand(vregs, inst, size_bits))
                    .with_operand(r),
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn select_call(
    func: &Function,
    block: Block,
    inst: crate::ir::Inst,
    ty: Type,
    callee: crate::ir::Callee,
    args: &[crate::ir::Inst],
    call_conv: CallConv,
    vregs: &HashMap<crate::ir::Inst, VReg>,
    frame_slots: &HashMap<crate::ir::Inst, usize>,
    mir: &mut MIRFunction,
) -> CodegenResult<()> {
    let arg_regs = call_conv.arg_registers();
    if args.len() > arg_regs.len() {
        return Err(CodegenError::Unsupported {
            construct: "stack-passed call arguments",
            detail: format!(
                "{} arguments exceed the {} available argument registers",
                args.len(),
                arg_regs.len()
            ),
        });
    }

    let shadow = call_conv.shadow_space_bytes();
    if shadow > 0 {
        mir.push(
            block,
            MInst::new(MOpcode::AdjustStack, 64)
                .with_operand(MachineOperand::Immediate(shadow as u64)),
        );
    }

    // Materialize every argument into its ABI register ahead of the call (§4.B "call-argument
    // materialization").
    for (i, &arg) in args.iter().enumerate() {
        let arg_ty = func.dfg.inst(arg).result_type();
        let src = operand_of(func, arg, vregs, frame_slots, mir);
        mir.push(
            block,
            MInst::new(MOpcode::Mov, arg_ty.reg_size_bits().max(8))
                .with_dest(VReg::physical(arg_regs[i]))
                .with_operand(src),
        );
    }

    let mut call_inst = match callee {
        crate::ir::Callee::Direct(func_id) => MInst::new(MOpcode::CallDirect, 64)
            .with_operand(MachineOperand::Function(func_id)),
        crate::ir::Callee::Indirect(v) => {
            let target = operand_of(func, v, vregs, frame_slots, mir);
            MInst::new(MOpcode::CallIndirect, 64).with_operand(target)
        }
    };
    if !matches!(ty, Type::Void) {
        // `dest` here is the real clobber: the call writes its result into the ABI return
        // register, not the IR value's own vreg (that comes from the `Mov` right below). Setting
        // it to the final vreg instead would never get killed backward through liveness, since
        // nothing else in the call sequence defines that vreg — the physical register would read
        // as live all the way up through the function that produces this call's arguments.
        call_inst = call_inst.with_dest(VReg::physical(call_conv.return_register()));
    }
    mir.push(block, call_inst);

    if !matches!(ty, Type::Void) {
        let dest = vregs[&inst];
        mir.push(
            block,
            MInst::new(MOpcode::Mov, ty.reg_size_bits().max(8))
                .with_dest(dest)
                .with_operand(MachineOperand::Register {
                    vreg: VReg::physical(call_conv.return_register()),
                    size_bits: ty.reg_size_bits().max(8),
                }),
        );
    }

    if shadow > 0 {
        mir.push(
            block,
            MInst::new(MOpcode::AdjustStack, 64)
                .with_operand(MachineOperand::Immediate((shadow as i64).wrapping_neg() as u64)),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, Callee, Function, InstructionData, PhiArg};

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
    fn empty_function_lowers_to_mov_and_ret() {
        let mut f = void_fn(Type::I64);
        let entry = Block::new(0);
        f.layout.append_block(entry);
        let imm = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 42,
        });
        f.layout.append_inst(imm, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, entry);

        let mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let (_, block) = mir.blocks_in_order().next().unwrap();
        assert_eq!(block.insts.len(), 2);
        assert_eq!(block.insts[0].opcode, MOpcode::Mov);
        assert_eq!(block.insts[1].opcode, MOpcode::Ret);
    }

    #[test]
    fn direct_call_materializes_argument_registers() {
        let mut f = void_fn(Type::Void);
        let entry = Block::new(0);
        f.layout.append_block(entry);
        let callee: crate::ir::FuncId = crate::entity::EntityRef::new(0);
        let arg = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 7,
        });
        f.layout.append_inst(arg, entry);
        let call = f.dfg.make_inst(InstructionData::Call {
            ty: Type::Void,
            callee: Callee::Direct(callee),
            args: smallvec::smallvec![arg],
            tail_call: false,
        });
        f.layout.append_inst(call, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { value: None });
        f.layout.append_inst(ret, entry);

        let mir = lower_function(&f, CallConv::SystemV, false).unwrap();
        let (_, block) = mir.blocks_in_order().next().unwrap();
        let arg_mov = &block.insts[0];
        assert_eq!(arg_mov.opcode, MOpcode::Mov);
        assert_eq!(
            arg_mov.dest,
            Some(VReg::physical(crate::isa::x86::registers::RDI))
        );
    }

    /// §4.B PHI lowering: each Phi argument becomes a `Mov` into the Phi's vreg, inserted at the
    /// end of its predecessor block, *before* that block's terminator.
    #[test]
    fn phi_lowering_inserts_copies_before_predecessor_terminators() {
        let mut f = void_fn(Type::I64);
        let entry = Block::new(0);
        let then_b = Block::new(1);
        let else_b = Block::new(2);
        let join_b = Block::new(3);
        f.layout.append_block(entry);
        f.layout.append_block(then_b);
        f.layout.append_block(else_b);
        f.layout.append_block(join_b);

        let cond = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::Bool,
            value: 1,
        });
        f.layout.append_inst(cond, entry);
        let br = f.dfg.make_inst(InstructionData::BranchConditional {
            cond,
            then_block: then_b,
            else_block: else_b,
        });
        f.layout.append_inst(br, entry);

        let then_val = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 1,
        });
        f.layout.append_inst(then_val, then_b);
        let then_jmp = f.dfg.make_inst(InstructionData::Branch { dest: join_b });
        f.layout.append_inst(then_jmp, then_b);

        let else_val = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 2,
        });
        f.layout.append_inst(else_val, else_b);
        let else_jmp = f.dfg.make_inst(InstructionData::Branch { dest: join_b });
        f.layout.append_inst(else_jmp, else_b);

        let phi = f.dfg.make_inst(InstructionData::Phi {
            ty: Type::I64,
            args: smallvec::smallvec![
                PhiArg {
                    pred: then_b,
                    value: then_val
                },
                PhiArg {
                    pred: else_b,
                    value: else_val
                },
            ],
        });
        f.layout.append_inst(phi, join_b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(phi) });
        f.layout.append_inst(ret, join_b);

        let mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let then_mir = &mir.blocks[&then_b];
        // [Mov into phi's vreg, Jmp] — the copy precedes the terminator.
        assert_eq!(then_mir.insts.len(), 2);
        assert_eq!(then_mir.insts[0].opcode, MOpcode::Mov);
        assert_eq!(then_mir.insts[1].opcode, MOpcode::Jmp);

        let else_mir = &mir.blocks[&else_b];
        assert_eq!(else_mir.insts[0].opcode, MOpcode::Mov);
        assert_eq!(else_mir.insts[1].opcode, MOpcode::Jmp);

        // Both copies target the same vreg: the Phi's.
        assert_eq!(then_mir.insts[0].dest, else_mir.insts[0].dest);
    }
}
