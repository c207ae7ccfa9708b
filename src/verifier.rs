//! Structural verification (§8): runs after IR construction and again after MIR lowering when
//! `Flags::enable_verifier` is set.
//!
//! `Function::check_basic_invariants`/`check_use_list_biconditional` check everything a single
//! function can attest to on its own; the two checks added here need a `ControlFlowGraph`, so
//! they live at this level rather than as `Function` methods.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Function, InstructionData};
use crate::mir::{MIRFunction, MachineOperand};
use crate::result::{CodegenError, CodegenResult};

/// Run every structural check on `func` (§3.2 invariants 1-5, §8). Cheap enough to run on every
/// compile when `enable_verifier` is set; not on the hot path of a release embedding.
pub fn verify_function(func: &Function) -> CodegenResult<()> {
    func.check_basic_invariants()
        .map_err(|what| CodegenError::invariant(what, None))?;
    func.check_use_list_biconditional()
        .map_err(|what| CodegenError::invariant(what, None))?;
    verify_parameters_confined_to_entry(func)?;

    let mut cfg = ControlFlowGraph::new();
    cfg.compute(func);
    verify_phi_predecessors(func, &cfg)?;
    Ok(())
}

/// Invariant 5: a `Parameter` instruction may only appear in the entry block.
fn verify_parameters_confined_to_entry(func: &Function) -> CodegenResult<()> {
    let entry = match func.layout.blocks().next() {
        Some(b) => b,
        None => return Ok(()),
    };
    for block in func.layout.blocks() {
        if block == entry {
            continue;
        }
        for inst in func.layout.block_insts(block) {
            if matches!(func.dfg.inst(inst), InstructionData::Parameter { .. }) {
                return Err(CodegenError::invariant(
                    format!("{inst} is a Parameter outside the entry block"),
                    Some(block),
                ));
            }
        }
    }
    Ok(())
}

/// Invariant 4: every `Phi` argument names a real CFG predecessor of its own block, and every
/// predecessor is covered by exactly one argument.
fn verify_phi_predecessors(func: &Function, cfg: &ControlFlowGraph) -> CodegenResult<()> {
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            let InstructionData::Phi { args, .. } = func.dfg.inst(inst) else {
                continue;
            };
            for arg in args {
                if !cfg.is_predecessor(block, arg.pred) {
                    return Err(CodegenError::invariant(
                        format!("{inst} names {} as a Phi predecessor, which does not branch to {block}", arg.pred),
                        Some(block),
                    ));
                }
            }
            let covered = args.len();
            let actual = cfg.pred_iter(block).count();
            if covered != actual {
                return Err(CodegenError::invariant(
                    format!("{inst} has {covered} Phi argument(s) but {block} has {actual} predecessor(s)"),
                    Some(block),
                ));
            }
        }
    }
    Ok(())
}

/// Post-allocation sanity check (§4.C/§4.D boundary): every `MInst` operand and `dest` must have
/// been colored to a physical register by the time frame materialization and encoding run.
pub fn verify_mir_allocated(mir: &MIRFunction) -> CodegenResult<()> {
    for (block, mir_block) in mir.blocks_in_order() {
        for inst in &mir_block.insts {
            if let Some(dest) = inst.dest {
                if dest.is_virtual() {
                    return Err(CodegenError::invariant(
                        format!("{dest} in {:?} is still virtual after register allocation", inst.opcode),
                        Some(block),
                    ));
                }
            }
            for op in &inst.operands {
                if let MachineOperand::Register { vreg, .. } = op {
                    if vreg.is_virtual() {
                        return Err(CodegenError::invariant(
                            format!("{vreg} in {:?} is still virtual after register allocation", inst.opcode),
                            Some(block),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, PhiArg, Type};

    fn func() -> Function {
        Function::new("f", Type::Function { params: vec![], ret: Box::new(Type::I64) })
    }

    #[test]
    fn well_formed_function_passes() {
        let mut f = func();
        let entry = Block::new(0);
        f.layout.append_block(entry);
        let imm = f.dfg.make_inst(InstructionData::Immediate { ty: Type::I64, value: 1 });
        f.layout.append_inst(imm, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, entry);
        assert!(verify_function(&f).is_ok());
    }

    #[test]
    fn phi_argument_naming_a_non_predecessor_is_rejected() {
        let mut f = func();
        let entry = Block::new(0);
        let join = Block::new(1);
        let stray = Block::new(2);
        f.layout.append_block(entry);
        f.layout.append_block(join);
        f.layout.append_block(stray);

        let jmp = f.dfg.make_inst(InstructionData::Branch { dest: join });
        f.layout.append_inst(jmp, entry);

        let val = f.dfg.make_inst(InstructionData::Immediate { ty: Type::I64, value: 9 });
        f.layout.append_inst(val, stray);
        let stray_jmp = f.dfg.make_inst(InstructionData::Branch { dest: join });
        f.layout.append_inst(stray_jmp, stray);

        let phi = f.dfg.make_inst(InstructionData::Phi {
            ty: Type::I64,
            args: smallvec::smallvec![PhiArg { pred: stray, value: val }],
        });
        f.layout.append_inst(phi, join);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(phi) });
        f.layout.append_inst(ret, join);

        // `join`'s only real predecessor is `entry`; the Phi names `stray` instead.
        assert!(verify_function(&f).is_err());
    }
}
