//! Machine IR (§3.3): the x86-64-specific instruction stream produced by instruction selection,
//! consumed by the register allocator and encoder.
//!
//! Mirrors the `ir` module's split between entities/instructions/the function container; unlike
//! `ir`, there is no separate `dfg`/`layout` pair here; `MIRBlock` holds a plain `Vec<MInst>` in
//! program order directly, since MIR is never edited through a use-list the way SSA IR is (§4.C
//! reads it read-only for liveness, then rewrites register operands to physical in place).

pub mod entities;
pub mod function;
pub mod instructions;
pub mod select;

pub use entities::VReg;
pub use function::{FrameObject, MIRBlock, MIRFunction};
pub use instructions::{MInst, MOpcode, MachineOperand};
pub use select::lower_function;
