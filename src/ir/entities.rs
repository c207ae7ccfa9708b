//! IR entity references.
//!
//! Blocks, instructions and static variables are never linked by raw pointer. Each is a `u32`
//! index into an arena owned by the `Function` (or `Module`, for statics and function
//! references) that created it. Because every IR instruction that produces a value *is* the
//! value; unlike Cranelift, which separates `Inst` from its (possibly several) result
//! `Value`s, an `Inst` reference doubles as an SSA value reference; there is no separate
//! `Value` type in this IR.

use crate::entity::entity_impl;

/// A reference to a basic block within a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A reference to an instruction within a function. Instructions that yield a value are
/// referenced directly as that value by other instructions' operands.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A reference to a static (global) variable, scoped to the owning `Module`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticVar(u32);
entity_impl!(StaticVar, "static");

/// A reference to a function, scoped to the owning `Module`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "func");

/// Any entity that can be named in a diagnostic.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum AnyEntity {
    /// The function as a whole.
    Function,
    /// A block.
    Block(Block),
    /// An instruction (or the value it produces).
    Inst(Inst),
    /// A static variable.
    StaticVar(StaticVar),
}

impl core::fmt::Display for AnyEntity {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            AnyEntity::Function => write!(f, "function"),
            AnyEntity::Block(b) => b.fmt(f),
            AnyEntity::Inst(i) => i.fmt(f),
            AnyEntity::StaticVar(s) => s.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn entities_print_with_prefix() {
        assert_eq!(Block::new(3).to_string(), "block3");
        assert_eq!(Inst::new(12).to_string(), "inst12");
        assert_eq!(StaticVar::new(0).to_string(), "static0");
    }
}
