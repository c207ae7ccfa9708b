//! Interference graph construction (§4.C step 2).
//!
//! Two vregs interfere if there is some program point where both are simultaneously live. Built
//! by a single backward walk per block reusing the `Liveness` result: starting from `live_out`,
//! walk instructions in reverse, adding an edge between an instruction's `dest` and everything
//! currently live (excluding itself), then updating the live set the same way liveness does.
//!
//! `CallDirect`/`CallIndirect` additionally interfere with every caller-saved physical register
//! against every vreg live across the call (§4.C "instruction register interference": a value
//! that must survive a call cannot be colored to a register the callee is free to clobber).
//! `IDiv`/`IMod`/`Cdq` likewise interfere with `rax` and `rdx` against every vreg live across them
//! (§4.C step 2 "DIV/MOD conflict with rax and rdx"): the divisor operand and the quotient/
//! remainder `Mov`s that straddle the division already pin their own vregs to `rax`/`rdx` via
//! ordinary dest/read edges, but a *third* vreg merely live across the division — never itself
//! read or written by it — would otherwise see no edge against `rdx` at all, since `rdx` is
//! never an operand of the `IDiv`/`Cdq` MInsts themselves, only an implicit clobber.
//! Shift-count (`cl`) precoloring is not modeled here because the selector already assigns that
//! operand a fixed physical vreg directly (`mir::select`); a physical `VReg` already *is* its own
//! color (`VReg::as_physical`), so an ordinary interference edge against it is sufficient there.

use crate::isa::CallConv;
use crate::isa::x86::registers::{RAX, RDX};
use crate::mir::{MIRFunction, MOpcode, VReg};
use crate::regalloc::liveness::Liveness;
use std::collections::{HashMap, HashSet};

/// An undirected interference graph over vregs (including physical ones, which appear only as
/// neighbors of virtual vregs, never as nodes to be colored themselves; see `coloring`).
#[derive(Default)]
pub struct InterferenceGraph {
    edges: HashMap<VReg, HashSet<VReg>>,
}

impl InterferenceGraph {
    pub(crate) fn add_edge(&mut self, a: VReg, b: VReg) {
        if a == b {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Ensure `v` has an (initially empty) entry, so isolated vregs still get a color.
    fn touch(&mut self, v: VReg) {
        self.edges.entry(v).or_default();
    }

    pub fn neighbors(&self, v: VReg) -> impl Iterator<Item = VReg> + '_ {
        self.edges.get(&v).into_iter().flatten().copied()
    }

    pub fn degree(&self, v: VReg) -> usize {
        self.edges.get(&v).map_or(0, |s| s.len())
    }

    pub fn nodes(&self) -> impl Iterator<Item = VReg> + '_ {
        self.edges.keys().copied()
    }

    /// Build the interference graph for `mir` from its already-computed `liveness`.
    pub fn build(mir: &MIRFunction, liveness: &Liveness, call_conv: CallConv) -> Self {
        let mut graph = InterferenceGraph::default();
        let caller_saved = call_conv.caller_saved();

        for (block, mir_block) in mir.blocks_in_order() {
            let mut live: HashSet<VReg> = liveness.live_out[&block].clone();
            for inst in mir_block.insts.iter().rev() {
                if let Some(d) = inst.dest {
                    graph.touch(d);
                    for &other in live.iter() {
                        if other != d {
                            graph.add_edge(d, other);
                        }
                    }
                }

                // The call's own `dest` (set only for liveness bookkeeping — selection always
                // follows a call with an explicit `Mov` off the ABI return register, §4.B) isn't
                // live during the call itself, so it's deliberately excluded here: only values
                // live *across* the call need protection from its caller-saved clobber.
                if matches!(inst.opcode, MOpcode::CallDirect | MOpcode::CallIndirect) {
                    for &v in live.iter() {
                        for unit in caller_saved.iter() {
                            graph.add_edge(v, VReg::physical(unit));
                        }
                    }
                }

                if matches!(inst.opcode, MOpcode::IDiv | MOpcode::IMod | MOpcode::Cdq) {
                    let rax = VReg::physical(RAX);
                    let rdx = VReg::physical(RDX);
                    for &v in live.iter() {
                        graph.add_edge(v, rax);
                        graph.add_edge(v, rdx);
                    }
                }

                if let Some(d) = inst.dest {
                    live.remove(&d);
                }
                for v in inst.reads() {
                    live.insert(v);
                    graph.touch(v);
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, Function, InstructionData, Type};
    use crate::mir::select::lower_function;

    #[test]
    fn two_params_live_at_once_interfere() {
        let mut f = Function::new(
            "f",
            Type::Function {
                params: vec![Type::I64, Type::I64],
                ret: Box::new(Type::I64),
            },
        );
        let b = Block::new(0);
        f.layout.append_block(b);
        let a = f.dfg.make_inst(InstructionData::Parameter {
            ty: Type::I64,
            index: 0,
        });
        f.layout.append_inst(a, b);
        let c = f.dfg.make_inst(InstructionData::Parameter {
            ty: Type::I64,
            index: 1,
        });
        f.layout.append_inst(c, b);
        f.params = vec![a, c];
        let sum = f.dfg.make_inst(InstructionData::Binary {
            op: crate::ir::BinOp::Add,
            ty: Type::I64,
            lhs: a,
            rhs: c,
        });
        f.layout.append_inst(sum, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(sum) });
        f.layout.append_inst(ret, b);

        let mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        let liveness = Liveness::compute(&mir);
        let graph = InterferenceGraph::build(&mir, &liveness, CallConv::SystemV);

        // Both parameters are materialized into their own vregs by the ABI pre-pass (§4.B) and
        // are simultaneously live right up until the `Add` consumes them.
        let a_vreg = mir.param_vregs[0];
        let c_vreg = mir.param_vregs[1];
        assert!(graph.neighbors(a_vreg).any(|v| v == c_vreg));
    }

    #[test]
    fn value_live_across_call_interferes_with_caller_saved() {
        use crate::ir::{Callee, FuncId};
        use smallvec::SmallVec;

        let mut f = Function::new(
            "f",
            Type::Function {
                params: vec![Type::I64],
                ret: Box::new(Type::I64),
            },
        );
        let b = Block::new(0);
        f.layout.append_block(b);
        let kept = f.dfg.make_inst(InstructionData::Parameter {
            ty: Type::I64,
            index: 0,
        });
        f.layout.append_inst(kept, b);
        f.params = vec![kept];
        let callee: FuncId = EntityRef::new(0);
        let call = f.dfg.make_inst(InstructionData::Call {
            ty: Type::Void,
            callee: Callee::Direct(callee),
            args: SmallVec::new(),
            tail_call: false,
        });
        f.layout.append_inst(call, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(kept) });
        f.layout.append_inst(ret, b);

        let mir = lower_function(&f, CallConv::SystemV, false).unwrap();
        let liveness = Liveness::compute(&mir);
        let graph = InterferenceGraph::build(&mir, &liveness, CallConv::SystemV);

        let kept_vreg = mir.param_vregs[0];
        let rax = VReg::physical(crate::isa::x86::registers::RAX);
        assert!(graph.neighbors(kept_vreg).any(|v| v == rax));
    }
}
