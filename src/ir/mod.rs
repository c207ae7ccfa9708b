//! The intermediate representation (§3): SSA values and instructions, organized into blocks and
//! functions, with a module tying everything a compilation unit produces together.
//!
//! Mirrors the teacher's `ir` module layout (`entities`/`types`/`instructions`/`dfg`/`layout`/
//! `function`), flattened into re-exports here so the rest of the crate can write `ir::Block`,
//! `ir::Inst`, etc. without reaching into submodules directly.

pub mod builder;
pub mod dfg;
pub mod display;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod layout;
pub mod types;

pub use builder::IrBuilder;
pub use dfg::DataFlowGraph;
pub use entities::{AnyEntity, Block, FuncId, Inst, StaticVar};
pub use function::{Function, FunctionFlags, Linkage, Module, StaticVarData};
pub use instructions::{BinOp, Callee, CmpKind, InstructionData, PhiArg};
pub use layout::Layout;
pub use types::{StructType, Type};
