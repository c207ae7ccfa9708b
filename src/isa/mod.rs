//! Target description: the x86-64 machine model plus compile-time flags (§5, §6.1, §A.3).

pub mod x86;

pub use x86::{registers, CallConv};

/// Options that vary a compilation without changing the target architecture (§5 "Flags").
///
/// `Flags` is threaded through every phase of `CodegenContext::compile` read-only; nothing in
/// `mir`, `regalloc`, or `binemit` mutates it.
#[derive(Clone, Copy, Debug)]
pub struct Flags {
    /// Calling convention new functions/calls are lowered against.
    pub call_conv: CallConv,
    /// Run `crate::verifier::verify_function` after IR construction and again after MIR lowering
    /// (§8). Expensive; meant for debug builds of this crate and its test suite, not hot paths.
    pub enable_verifier: bool,
    /// Emit a `function`/`static` symbol-table entry for every definition, including ones nothing
    /// in the module references. When false, unreferenced internal definitions are still encoded
    /// (dead-definition elimination is an optimization pass and out of scope, §1) but get no
    /// symbol table entry.
    pub emit_symbols: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            call_conv: CallConv::SystemV,
            enable_verifier: true,
            emit_symbols: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_system_v_with_verifier_on() {
        let flags = Flags::default();
        assert_eq!(flags.call_conv, CallConv::SystemV);
        assert!(flags.enable_verifier);
    }
}
