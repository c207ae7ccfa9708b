//! Resolved types, as handed down by the type checker (§3.1).
//!
//! This module implements the interface the core *consumes*; it does not implement type
//! checking. Every AST node the builder walks carries one of these, already resolved.

use std::sync::Arc;

/// A resolved, canonical type.
///
/// Struct and array types are heap-allocated (`Arc`) so that `Type` stays `Copy`-free but cheap
/// to clone; two structurally identical struct types are only `==` if they share an `Arc`
/// (canonicalization is the type checker's job; `canonicalize` here just normalizes wrapper
/// nesting, e.g. collapsing `Pointer(Pointer(Void))` variants introduced by repeated lowering).
#[derive(Clone, Debug)]
pub enum Type {
    /// Zero-sized; the result of a statement-like expression or a call to a function with no
    /// return value.
    Void,
    /// A boolean; stored as a single byte, `0` or `1`.
    Bool,
    /// A fixed-width integer.
    Integer {
        /// Width in bits: 8, 16, 32 or 64.
        bits: u32,
        /// Two's-complement signed vs. unsigned.
        signed: bool,
    },
    /// The type of an unsuffixed integer literal before it unifies with a concrete integer type.
    /// Per SPEC_FULL §C.3 this converts to `Integer` as an identity, never a narrowing.
    IntegerLiteral,
    /// A pointer to another type.
    Pointer(Box<Type>),
    /// A fixed-size array of a homogeneous element type.
    Array {
        /// Element type.
        element: Box<Type>,
        /// Element count.
        len: u64,
    },
    /// A named aggregate with ordered, typed fields.
    Struct(Arc<StructType>),
    /// A function type: parameter types plus a return type.
    Function {
        /// Parameter types in declaration order.
        params: Vec<Type>,
        /// Return type (`Type::Void` if the function returns nothing).
        ret: Box<Type>,
    },
}

/// The definition of a named struct type.
#[derive(Debug, PartialEq, Eq)]
pub struct StructType {
    /// Struct name, used only for diagnostics and name mangling.
    pub name: String,
    /// Fields in declaration order. Only the field *type* participates in name mangling
    /// (§6.3); field names are not mangled.
    pub fields: Vec<Type>,
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        use Type::*;
        match (self, other) {
            (Void, Void) | (Bool, Bool) | (IntegerLiteral, IntegerLiteral) => true,
            (Integer { bits: b1, signed: s1 }, Integer { bits: b2, signed: s2 }) => {
                b1 == b2 && s1 == s2
            }
            (Pointer(a), Pointer(b)) => a == b,
            (
                Array { element: e1, len: l1 },
                Array { element: e2, len: l2 },
            ) => l1 == l2 && e1 == e2,
            (Struct(a), Struct(b)) => Arc::ptr_eq(a, b) || a == b,
            (
                Function { params: p1, ret: r1 },
                Function { params: p2, ret: r2 },
            ) => p1 == p2 && r1 == r2,
            _ => false,
        }
    }
}
impl Eq for Type {}

impl Type {
    /// The canonical `i64`-equivalent integer type used for untyped literals and pointer
    /// arithmetic scratch values.
    pub const I64: Type = Type::Integer {
        bits: 64,
        signed: true,
    };

    /// Collapse an `IntegerLiteral` to the concrete `Integer` type it unified with, and flatten
    /// any redundant wrapper nesting. Idempotent: `t.canonicalize() == t.canonicalize().canonicalize()`.
    pub fn canonicalize(&self) -> Type {
        match self {
            Type::IntegerLiteral => Type::I64,
            Type::Pointer(inner) => Type::Pointer(Box::new(inner.canonicalize())),
            Type::Array { element, len } => Type::Array {
                element: Box::new(element.canonicalize()),
                len: *len,
            },
            other => other.clone(),
        }
    }

    /// Size in bytes, as the encoder and frame materializer need it.
    pub fn size_of(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Bool => 1,
            Type::Integer { bits, .. } => bits / 8,
            Type::IntegerLiteral => 8,
            Type::Pointer(_) => 8,
            Type::Array { element, len } => element.size_of() * (*len as u32),
            Type::Struct(s) => s.fields.iter().map(Type::size_of).sum(),
            Type::Function { .. } => 8, // function pointers
        }
    }

    /// Required alignment in bytes.
    pub fn align_of(&self) -> u32 {
        match self {
            Type::Void => 1,
            Type::Bool => 1,
            Type::Integer { bits, .. } => (bits / 8).max(1),
            Type::IntegerLiteral => 8,
            Type::Pointer(_) | Type::Function { .. } => 8,
            Type::Array { element, .. } => element.align_of(),
            Type::Struct(s) => s.fields.iter().map(Type::align_of).max().unwrap_or(1),
        }
    }

    /// Is this an integer (fixed-width or literal)?
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer { .. } | Type::IntegerLiteral)
    }

    /// Is this a pointer?
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Is this type's integer representation signed? Non-integers are conservatively
    /// `false`.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Type::Integer { signed: true, .. } | Type::IntegerLiteral
        )
    }

    /// The machine register width (8/16/32/64) this type is held in, for operand size tags
    /// (§3.3 invariants). Aggregates wider than 8 bytes are passed/held in memory, not a
    /// register; callers that need per-field widths should walk `StructType::fields`.
    pub fn reg_size_bits(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Bool => 8,
            Type::Integer { bits, .. } => *bits,
            Type::IntegerLiteral => 64,
            Type::Pointer(_) | Type::Function { .. } => 64,
            Type::Array { .. } | Type::Struct(_) => 64,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Integer { bits, signed } => write!(f, "{}{}", if *signed { "i" } else { "u" }, bits),
            Type::IntegerLiteral => write!(f, "{{integer}}"),
            Type::Pointer(inner) => write!(f, "*{inner}"),
            Type::Array { element, len } => write!(f, "[{element}; {len}]"),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_collapses_integer_literal() {
        assert_eq!(Type::IntegerLiteral.canonicalize(), Type::I64);
        assert_eq!(Type::I64.canonicalize(), Type::I64);
    }

    #[test]
    fn sizes_match_x86_64_abi() {
        assert_eq!(Type::I64.size_of(), 8);
        assert_eq!(Type::Bool.size_of(), 1);
        assert_eq!(Type::Pointer(Box::new(Type::I64)).size_of(), 8);
        let arr = Type::Array {
            element: Box::new(Type::I64),
            len: 4,
        };
        assert_eq!(arr.size_of(), 32);
    }

    #[test]
    fn struct_size_is_sum_of_fields() {
        let s = Type::Struct(Arc::new(StructType {
            name: "Point".into(),
            fields: vec![Type::I64, Type::I64],
        }));
        assert_eq!(s.size_of(), 16);
    }
}
