//! `Function` and `Module`: the top-level IR containers (§3.2).

use crate::entity::PrimaryMap;
use crate::ir::{DataFlowGraph, FuncId, Inst, Layout, StaticVar as StaticVarId, Type};
use std::collections::HashSet;

/// Per-function attribute flags (§3.2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    /// Evaluable entirely at compile time; reserved for a future constant-folding pass.
    pub consteval: bool,
    /// Always inline at call sites; currently advisory (no inliner lives in this crate, §1).
    pub forceinline: bool,
    /// Exported with external linkage.
    pub global: bool,
    /// Does not call back into code that could observe caller-saved register contents across a
    /// call boundary it doesn't itself make, i.e. contains no `Call` instruction. Drives the
    /// `None`/`Minimal` frame-kind distinction (§4.D).
    pub leaf: bool,
    /// Never returns; its only terminators are `Unreachable` or tail-calls to other `noreturn`
    /// functions.
    pub noreturn: bool,
    /// Free of observable side effects for identical arguments.
    pub pure_fn: bool,
    /// Declared but not defined in this module; has no body, no frame, no encoding.
    pub is_extern: bool,
}

/// A single IR function (§3.2).
#[derive(Clone)]
pub struct Function {
    /// Source-level name (pre name-mangling, §6.3).
    pub name: String,
    /// Function type: parameter types and return type.
    pub ty: Type,
    /// Attribute flags.
    pub flags: FunctionFlags,
    /// Data-flow graph owning every instruction.
    pub dfg: DataFlowGraph,
    /// Block and instruction ordering.
    pub layout: Layout,
    /// Parameter instructions, in declaration order (each is an `InstructionData::Parameter` in
    /// the entry block).
    pub params: Vec<Inst>,
    /// Sum of all `Alloca` sizes seen so far; filled in during alloca lowering (§4.B).
    pub locals_total_size: u32,
    /// Bitset of physical registers assigned to this function by the allocator; `0` before
    /// register allocation runs.
    pub registers_in_use: u32,
}

impl Function {
    /// Start a new, empty function with no blocks yet.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            flags: FunctionFlags::default(),
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            params: Vec::new(),
            locals_total_size: 0,
            registers_in_use: 0,
        }
    }

    /// Parameter types, taken from `self.ty`.
    pub fn param_types(&self) -> &[Type] {
        match &self.ty {
            Type::Function { params, .. } => params,
            _ => &[],
        }
    }

    /// Return type, taken from `self.ty`.
    pub fn return_type(&self) -> Type {
        match &self.ty {
            Type::Function { ret, .. } => (**ret).clone(),
            _ => Type::Void,
        }
    }

    /// Is `block` closed, i.e. does its last instruction terminate it? (invariant 3)
    pub fn block_is_closed(&self, block: crate::ir::Block) -> bool {
        match self.layout.last_inst(block) {
            Some(last) => self.dfg.inst(last).is_terminator(),
            None => false,
        }
    }

    /// Check every structural invariant from §3.2/§8 that can be checked locally (no CFG
    /// needed). Returns the first violation found, if any. A full check including the
    /// Phi-predecessor invariant additionally needs a `ControlFlowGraph` (see
    /// `crate::verifier::verify_function`).
    pub fn check_basic_invariants(&self) -> Result<(), String> {
        for block in self.layout.blocks() {
            let insts: Vec<Inst> = self.layout.block_insts(block).collect();
            if insts.is_empty() {
                return Err(format!("{block} has no instructions"));
            }
            for (i, inst) in insts.iter().enumerate() {
                let is_last = i + 1 == insts.len();
                let terminator = self.dfg.inst(*inst).is_terminator();
                if terminator != is_last {
                    return Err(format!(
                        "{inst} in {block}: terminator must be exactly the last instruction"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Collect the set of `Inst`s actually referenced by `users` for every value (invariant 2
    /// sanity check used by tests and the verifier): for every instruction `u`, every operand `v`
    /// it lists must have `u` in `v`'s user set, and vice versa.
    pub fn check_use_list_biconditional(&self) -> Result<(), String> {
        for block in self.layout.blocks() {
            for inst in self.layout.block_insts(block) {
                let mut operands = HashSet::new();
                self.dfg.inst(inst).for_each_child(|v| {
                    operands.insert(v);
                });
                for v in &operands {
                    if !self.dfg.users(*v).any(|u| u == inst) {
                        return Err(format!("{inst} uses {v} but is missing from its user set"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Linkage of a module-level declaration (§3.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// Visible only within its defining function/block.
    Local,
    /// Visible within the module but not exported.
    Internal,
    /// Exported with a `function`/`static` symbol (§3.4).
    Exported,
    /// Declared, defined elsewhere; becomes an `external` symbol.
    Imported,
}

/// A module-level static variable (§3.2).
#[derive(Clone)]
pub struct StaticVarData {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Linkage.
    pub linkage: Linkage,
    /// Literal initializer bytes, if any (an uninitialized static gets a BSS-style zero-fill
    /// section entry instead, §6.2).
    pub init: Option<Vec<u8>>,
    /// Whether anything in the module actually references this static; statics that are never
    /// referenced still get a symbol table entry (so separately compiled units can still see
    /// them) but the encoder skips emitting dead private ones in a later optimization pass,
    /// which is out of scope here (§1).
    pub referenced: bool,
}

/// The whole compilation unit: every function and static variable the builder produced from one
/// AST (§3.2).
#[derive(Clone, Default)]
pub struct Module {
    /// Functions, in declaration order.
    pub functions: PrimaryMap<FuncId, Function>,
    /// Static variables, in declaration order.
    pub statics: PrimaryMap<StaticVarId, StaticVarData>,
}

impl Module {
    /// An empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new function and return its id.
    pub fn declare_function(&mut self, func: Function) -> FuncId {
        self.functions.push(func)
    }

    /// Declare a new static variable and return its id.
    pub fn declare_static(&mut self, data: StaticVarData) -> StaticVarId {
        self.statics.push(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Block, InstructionData};

    #[test]
    fn empty_block_fails_basic_invariants() {
        let mut f = Function::new("f", Type::Function {
            params: vec![],
            ret: Box::new(Type::I64),
        });
        let b = Block::new(0);
        f.layout.append_block(b);
        assert!(f.check_basic_invariants().is_err());
    }

    #[test]
    fn single_terminator_passes() {
        let mut f = Function::new("f", Type::Function {
            params: vec![],
            ret: Box::new(Type::I64),
        });
        let b = Block::new(0);
        f.layout.append_block(b);
        let imm = f.dfg.make_inst(InstructionData::Immediate {
            ty: Type::I64,
            value: 42,
        });
        f.layout.append_inst(imm, b);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, b);
        assert!(f.check_basic_invariants().is_ok());
        assert!(f.check_use_list_biconditional().is_ok());
        assert!(f.block_is_closed(b));
    }
}
