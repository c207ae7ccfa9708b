//! Register allocation (§4.C): liveness, interference, graph coloring, and spill rewriting over
//! an already-selected `MIRFunction`.
//!
//! Mirrors the teacher's `regalloc` module split (liveness / coloring / spilling as separate
//! passes driven by a `Context`), simplified to the single classic Chaitin-Briggs loop §4.C
//! describes rather than cranelift's SSA-based single-pass allocator: this crate's functions are
//! small enough that a textbook build/simplify/color/spill cycle is the right amount of
//! engineering, not cranelift's `Coalescing`/`VirtRegs`/conventional-SSA machinery.

pub mod coloring;
pub mod context;
pub mod interference;
pub mod liveness;
pub mod spill;

pub use context::{allocate_function, AllocationResult};
pub use liveness::Liveness;
