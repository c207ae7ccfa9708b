//! A control flow graph represented as mappings of blocks to their predecessors and successors.
//!
//! Grounded on the teacher's `flowgraph.rs`, simplified to plain `Vec`/`HashSet` storage since
//! this crate doesn't carry `cranelift-bforest`: functions in this language are small enough
//! that a B-tree-backed forest buys nothing here.

use crate::entity::SecondaryMap;
use crate::ir::{Block, Function, Inst};
use std::collections::HashSet;

#[derive(Clone, Default)]
struct CfgNode {
    /// Branch instructions that jump to this block, paired with the block containing them.
    predecessors: Vec<(Inst, Block)>,
    /// Blocks this block's terminator can jump to.
    successors: HashSet<Block>,
}

/// Predecessor/successor relation over a function's blocks, recomputed from the current layout
/// and instructions whenever `compute` is called (never incrementally maintained; callers
/// recompute after any edit, matching the teacher's `valid` flag being cleared on edits, except
/// that here we simply don't cache staleness: recompute is linear in instruction count, which is
/// cheap enough for this crate's functions).
#[derive(Clone, Default)]
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CfgNode>,
}

impl ControlFlowGraph {
    /// An empty, uncomputed graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)compute predecessor/successor sets from `func`'s current instructions.
    pub fn compute(&mut self, func: &Function) {
        self.data.clear();
        for block in func.layout.blocks() {
            if let Some(term) = func.layout.last_inst(block) {
                let mut targets = vec![];
                match func.dfg.inst(term) {
                    crate::ir::InstructionData::Branch { dest } => targets.push(*dest),
                    crate::ir::InstructionData::BranchConditional {
                        then_block,
                        else_block,
                        ..
                    } => {
                        targets.push(*then_block);
                        targets.push(*else_block);
                    }
                    _ => {}
                }
                for dest in targets {
                    self.data[block].successors.insert(dest);
                    self.data[dest].predecessors.push((term, block));
                }
            }
        }
    }

    /// Iterate over the predecessor blocks of `block`.
    pub fn pred_iter(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.data.get(block).predecessors.iter().map(|(_, b)| *b)
    }

    /// Iterate over the successor blocks of `block`.
    pub fn succ_iter(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.data.get(block).successors.iter().copied()
    }

    /// Is `maybe_pred` a CFG predecessor of `block`? Used to check invariant 4 (every Phi
    /// argument's predecessor is a real predecessor).
    pub fn is_predecessor(&self, block: Block, maybe_pred: Block) -> bool {
        self.pred_iter(block).any(|p| p == maybe_pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{InstructionData, Type};

    #[test]
    fn branch_conditional_registers_both_successors() {
        let mut f = crate::ir::Function::new(
            "f",
            Type::Function {
                params: vec![],
                ret: Box::new(Type::Void),
            },
        );
        let entry = Block::new(0);
        let then_b = Block::new(1);
        let else_b = Block::new(2);
        f.layout.append_block(entry);
        f.layout.append_block(then_b);
        f.layout.append_block(else_b);

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

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&f);
        assert!(cfg.is_predecessor(then_b, entry));
        assert!(cfg.is_predecessor(else_b, entry));
        assert_eq!(cfg.succ_iter(entry).count(), 2);
    }
}
