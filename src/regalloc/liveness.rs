//! Liveness analysis over a selected `MIRFunction` (§4.C step 1).
//!
//! A vreg is live at a program point iff some path forward from that point uses it before it is
//! redefined. Computed as the standard backward dataflow fixpoint over MIR blocks: `live_out[b] =
//! union of live_in[s] for every successor s`, `live_in[b] = uses[b] ∪ (live_out[b] - defs[b])`.

use crate::ir::Block;
use crate::mir::{MInst, MIRFunction, MOpcode, MachineOperand, VReg};
use std::collections::{HashMap, HashSet};

/// Live-in / live-out vreg sets, one per MIR block.
#[derive(Default)]
pub struct Liveness {
    pub live_in: HashMap<Block, HashSet<VReg>>,
    pub live_out: HashMap<Block, HashSet<VReg>>,
}

/// The block `inst` transfers control to, if it names one directly.
fn branch_target(inst: &MInst) -> Option<Block> {
    match inst.opcode {
        MOpcode::Jmp | MOpcode::Jcc(_) => inst.operands.iter().find_map(|op| match op {
            MachineOperand::Block(b) => Some(*b),
            _ => None,
        }),
        _ => None,
    }
}

/// Successors of `block`. A conditional jump lowers to a `Jcc` (taken target) immediately
/// followed by a `Jmp` (fallthrough target, §4.B), so this walks backward from the end of the
/// block collecting every trailing branch's target, not just the last instruction's.
fn successors(mir: &MIRFunction, block: Block) -> Vec<Block> {
    let insts = match mir.blocks.get(&block) {
        Some(b) => &b.insts,
        None => return vec![],
    };
    let mut targets = vec![];
    for inst in insts.iter().rev() {
        match branch_target(inst) {
            Some(t) => targets.push(t),
            None => break,
        }
    }
    targets
}

/// Every vreg `inst` reads, for liveness purposes (its `dest` is excluded; see `MInst::reads`).
fn uses(inst: &MInst) -> impl Iterator<Item = VReg> + '_ {
    inst.reads()
}

impl Liveness {
    /// Compute live-in/live-out sets for every block in `mir` by iterating to a fixpoint.
    pub fn compute(mir: &MIRFunction) -> Self {
        let mut live_in: HashMap<Block, HashSet<VReg>> = HashMap::new();
        let mut live_out: HashMap<Block, HashSet<VReg>> = HashMap::new();
        for (block, _) in mir.blocks_in_order() {
            live_in.insert(block, HashSet::new());
            live_out.insert(block, HashSet::new());
        }

        let blocks: Vec<Block> = mir.block_order.clone();
        let mut changed = true;
        while changed {
            changed = false;
            // Process in reverse layout order; backward dataflow converges faster when blocks
            // are visited roughly in reverse execution order.
            for &block in blocks.iter().rev() {
                let mut out = HashSet::new();
                for succ in successors(mir, block) {
                    out.extend(live_in[&succ].iter().copied());
                }

                let mir_block = &mir.blocks[&block];
                let mut cur = out.clone();
                for inst in mir_block.insts.iter().rev() {
                    if let Some(d) = inst.dest {
                        cur.remove(&d);
                    }
                    for v in uses(inst) {
                        cur.insert(v);
                    }
                }

                if out != live_out[&block] {
                    live_out.insert(block, out);
                    changed = true;
                }
                if cur != live_in[&block] {
                    live_in.insert(block, cur);
                    changed = true;
                }
            }
        }

        Liveness { live_in, live_out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::Block;
    use crate::isa::CallConv;
    use crate::mir::select::lower_function;

    #[test]
    fn value_defined_before_loop_and_used_after_is_live_through_header() {
        use crate::ir::{Function, InstructionData, Type};

        let mut f = Function::new(
            "f",
            Type::Function {
                params: vec![Type::I64],
                ret: Box::new(Type::I64),
            },
        );
        let entry = Block::new(0);
        let header = Block::new(1);
        let body = Block::new(2);
        let exit = Block::new(3);
        f.layout.append_block(entry);
        f.layout.append_block(header);
        f.layout.append_block(body);
        f.layout.append_block(exit);

        // A parameter, not an immediate: the selector cannot re-materialize it at the use site,
        // so its register genuinely has to survive the whole loop (unlike a folded constant).
        let x = f.dfg.make_inst(InstructionData::Parameter {
            ty: Type::I64,
            index: 0,
        });
        f.layout.append_inst(x, entry);
        f.params = vec![x];
        let to_header = f.dfg.make_inst(InstructionData::Branch { dest: header });
        f.layout.append_inst(to_header, entry);

        let cond = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::Bool,
            value: 0,
        });
        f.layout.append_inst(cond, header);
        let br = f.dfg.make_inst(InstructionData::BranchConditional {
            cond,
            then_block: body,
            else_block: exit,
        });
        f.layout.append_inst(br, header);

        let back = f.dfg.make_inst(InstructionData::Branch { dest: header });
        f.layout.append_inst(back, body);

        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(x) });
        f.layout.append_inst(ret, exit);

        let mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let liveness = Liveness::compute(&mir);

        // `x`'s vreg must be live on every path from entry down to the `Ret` in `exit`,
        // including all the way around the loop header/body.
        let x_vreg = mir.param_vregs[0];
        assert!(liveness.live_out[&entry].contains(&x_vreg));
        assert!(liveness.live_in[&header].contains(&x_vreg));
        assert!(liveness.live_out[&header].contains(&x_vreg));
        assert!(liveness.live_in[&body].contains(&x_vreg));
        assert!(liveness.live_in[&exit].contains(&x_vreg));
    }
}
