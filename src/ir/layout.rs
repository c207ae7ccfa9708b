//! Ordering of blocks and instructions within a function.
//!
//! Per DESIGN NOTES, the doubly-linked intrusive lists the source used for O(1) splice are
//! replaced with arena indices: each block and instruction is a plain `Inst`/`Block` key, and
//! links are `Option<Inst>`/`Option<Block>` stored in small side tables here rather than raw
//! pointers embedded in the node itself.

use crate::entity::{PrimaryMap, SecondaryMap};
use crate::ir::{Block, Inst};

#[derive(Clone, Copy, Default)]
struct BlockNode {
    prev: Option<Block>,
    next: Option<Block>,
    first_inst: Option<Inst>,
    last_inst: Option<Inst>,
}

#[derive(Clone, Copy, Default)]
struct InstNode {
    block: Option<Block>,
    prev: Option<Inst>,
    next: Option<Inst>,
}

/// The ordering of blocks (and, within each block, instructions) that the rest of the pipeline
/// observes. Block naming/"layout order" in the spec is exactly this structure's block chain;
/// emission order in §4.E/§5 follows it exactly.
#[derive(Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    insts: SecondaryMap<Inst, InstNode>,
    first_block: Option<Block>,
    last_block: Option<Block>,
    num_blocks: usize,
}

impl Layout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `block` to the end of the block order.
    pub fn append_block(&mut self, block: Block) {
        let node = BlockNode {
            prev: self.last_block,
            next: None,
            first_inst: None,
            last_inst: None,
        };
        if let Some(last) = self.last_block {
            self.blocks[last].next = Some(block);
        } else {
            self.first_block = Some(block);
        }
        self.blocks[block] = node;
        self.last_block = Some(block);
        self.num_blocks += 1;
    }

    /// Append `inst` to the end of `block`'s instruction list.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        let prev = self.blocks[block].last_inst;
        self.insts[inst] = InstNode {
            block: Some(block),
            prev,
            next: None,
        };
        if let Some(p) = prev {
            self.insts[p].next = Some(inst);
        } else {
            self.blocks[block].first_inst = Some(inst);
        }
        self.blocks[block].last_inst = Some(inst);
    }

    /// Insert `inst` immediately before `before`, in the same block.
    pub fn insert_inst_before(&mut self, inst: Inst, before: Inst) {
        let block = self.insts[before].block.expect("detached instruction");
        let prev = self.insts[before].prev;
        self.insts[inst] = InstNode {
            block: Some(block),
            prev,
            next: Some(before),
        };
        self.insts[before].prev = Some(inst);
        match prev {
            Some(p) => self.insts[p].next = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
    }

    /// Which block, if any, currently contains `inst`.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts.get(inst).block
    }

    /// Iterate over blocks in layout order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            layout: self,
            cur: self.first_block,
        }
    }

    /// Iterate over the instructions of `block` in program order.
    pub fn block_insts(&self, block: Block) -> Insts<'_> {
        Insts {
            layout: self,
            cur: self.blocks.get(block).first_inst,
        }
    }

    /// The last instruction in `block` (its terminator, once the block is closed).
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks.get(block).last_inst
    }

    /// The entry block, i.e. the first block appended.
    pub fn entry_block(&self) -> Option<Block> {
        self.first_block
    }

    /// Number of blocks in the layout.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }
}

/// Iterator over blocks in layout order.
pub struct Blocks<'a> {
    layout: &'a Layout,
    cur: Option<Block>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block;
    fn next(&mut self) -> Option<Block> {
        let b = self.cur?;
        self.cur = self.layout.blocks.get(b).next;
        Some(b)
    }
}

/// Iterator over a block's instructions in program order.
pub struct Insts<'a> {
    layout: &'a Layout,
    cur: Option<Inst>,
}

impl<'a> Iterator for Insts<'a> {
    type Item = Inst;
    fn next(&mut self) -> Option<Inst> {
        let i = self.cur?;
        self.cur = self.layout.insts.get(i).next;
        Some(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn blocks_iterate_in_append_order() {
        let mut l = Layout::new();
        let b0 = Block::new(0);
        let b1 = Block::new(1);
        l.append_block(b0);
        l.append_block(b1);
        assert_eq!(l.blocks().collect::<Vec<_>>(), vec![b0, b1]);
        assert_eq!(l.entry_block(), Some(b0));
    }

    #[test]
    fn instructions_iterate_in_program_order() {
        let mut l = Layout::new();
        let b0 = Block::new(0);
        l.append_block(b0);
        let i0 = Inst::new(0);
        let i1 = Inst::new(1);
        let i2 = Inst::new(2);
        l.append_inst(i0, b0);
        l.append_inst(i1, b0);
        l.insert_inst_before(i2, i1);
        assert_eq!(l.block_insts(b0).collect::<Vec<_>>(), vec![i0, i2, i1]);
        assert_eq!(l.last_inst(b0), Some(i1));
    }
}
