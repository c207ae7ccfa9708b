//! Error types produced by this crate.
//!
//! Every fallible entry point returns a `CodegenResult<T>`. There are no warnings at this level:
//! a `CodegenError` always means the top-level `compile` call tears down its `CodegenContext`
//! and produces no object file (spec §7).

use crate::ir::Block;
use std::string::String;

/// Any error that can occur while building IR, lowering it to MIR, allocating registers, or
/// encoding machine code.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The IR builder looked up a symbol that has no binding in any enclosing scope.
    #[error("unresolved reference to `{symbol}`")]
    Unresolved {
        /// The offending symbol name.
        symbol: String,
    },

    /// A reachable construct this back end does not implement (e.g. more than four stack-passed
    /// arguments on a convention that has not wired up stack argument slots yet).
    #[error("unsupported construct: {construct} ({detail})")]
    Unsupported {
        /// Short name of the construct.
        construct: &'static str,
        /// Human-readable detail, e.g. which operand or argument index.
        detail: String,
    },

    /// A structural invariant was violated by a pass. This always indicates a bug in this crate,
    /// not in the input program; it is still surfaced as a `Result` rather than a panic so an
    /// embedding driver can report "internal compiler error" and exit cleanly instead of
    /// unwinding through arbitrary caller frames.
    #[error("invariant violation: {what}")]
    Invariant {
        /// Description of the violated invariant.
        what: String,
    },

    /// The encoder was asked to encode a displacement or immediate that doesn't fit the
    /// instruction's field width. Always a bug upstream: the allocator/selector must produce
    /// operands representable in the chosen encoding.
    #[error("encoding limit exceeded: {what}")]
    EncodingLimit {
        /// Description of what overflowed, e.g. "disp8 out of range: 200".
        what: String,
    },
}

impl CodegenError {
    /// Build an `Unresolved` error for `symbol`.
    pub fn unresolved(symbol: impl Into<String>) -> Self {
        CodegenError::Unresolved {
            symbol: symbol.into(),
        }
    }

    /// Build an `Invariant` error, optionally naming the block where the check failed.
    pub fn invariant(what: impl Into<String>, block: Option<Block>) -> Self {
        let what = what.into();
        let what = match block {
            Some(b) => format!("{what} (in {b})"),
            None => what,
        };
        CodegenError::Invariant { what }
    }
}

/// The result type returned by every fallible operation in this crate.
pub type CodegenResult<T> = Result<T, CodegenError>;
