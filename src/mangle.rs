//! Name mangling (§6.3): encodes a function's source name and structural type into one linker
//! symbol, so two functions named the same in different scopes (or overloaded by signature, if a
//! future front end allows that) never collide in the object's flat symbol namespace.

use crate::ir::{Function, StructType, Type};

/// The mangled symbol for `f`, or its bare source name if mangling does not apply to it.
///
/// `main` and any `extern`/imported declaration keep their source name verbatim: `main` is the
/// process entry point a loader looks up by that exact name, and an imported function's name is
/// how the linker finds its real definition elsewhere.
pub fn mangle_function(f: &Function) -> String {
    if f.name == "main" || f.flags.is_extern {
        return f.name.clone();
    }
    format!("_XF{}{}{}", f.name.len(), f.name, mangle_type(&f.ty))
}

/// The mangled symbol for a module-level static, following the same main/extern exemption.
pub fn mangle_static(name: &str, ty: &Type, is_extern: bool) -> String {
    if is_extern {
        return name.to_string();
    }
    format!("_XS{}{}{}", name.len(), name, mangle_type(ty))
}

/// Structural type encoding (§6.3): `P<T>` pointer, `A<n>E<T>` array, `F<ret><params…>E`
/// function, `<len><name>` everything else (primitive or named aggregate). Struct members
/// participate in their own struct's mangling only by type, never by field name.
fn mangle_type(ty: &Type) -> String {
    let ty = ty.canonicalize();
    match &ty {
        Type::Pointer(inner) => format!("P{}", mangle_type(inner)),
        Type::Array { element, len } => format!("A{}E{}", len, mangle_type(element)),
        Type::Function { params, ret } => {
            let mut s = format!("F{}", mangle_type(ret));
            for p in params {
                s.push_str(&mangle_type(p));
            }
            s.push('E');
            s
        }
        Type::Struct(s) => named(&s.name),
        other => named(&primitive_name(other)),
    }
}

fn named(name: &str) -> String {
    format!("{}{}", name.len(), name)
}

/// The primitive-type token used inside a mangled name. Never observes `IntegerLiteral` or
/// further `Pointer`/`Array`/`Function`/`Struct` wrappers; `mangle_type` canonicalizes and
/// dispatches those first.
fn primitive_name(ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::Bool => "bool".to_string(),
        Type::Integer { bits, signed } => format!("{}{}", if *signed { "i" } else { "u" }, bits),
        _ => unreachable!("primitive_name called on a non-primitive type: {ty:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn func(name: &str, params: Vec<Type>, ret: Type) -> Function {
        Function::new(name, Type::Function { params, ret: Box::new(ret) })
    }

    #[test]
    fn main_is_never_mangled() {
        let f = func("main", vec![], Type::I64);
        assert_eq!(mangle_function(&f), "main");
    }

    #[test]
    fn extern_function_keeps_source_name() {
        let mut f = func("printf", vec![Type::Pointer(Box::new(Type::I64))], Type::I64);
        f.flags.is_extern = true;
        assert_eq!(mangle_function(&f), "printf");
    }

    #[test]
    fn ordinary_function_gets_structural_encoding() {
        let f = func("add", vec![Type::I64, Type::I64], Type::I64);
        let mangled = mangle_function(&f);
        assert!(mangled.starts_with("_XF3add"));
        assert!(mangled.contains("i64"));
    }

    #[test]
    fn pointer_and_array_types_nest() {
        let ptr_to_array = Type::Pointer(Box::new(Type::Array {
            element: Box::new(Type::I64),
            len: 4,
        }));
        let mangled = mangle_type(&ptr_to_array);
        assert_eq!(mangled, "PA4E3i64");
    }

    #[test]
    fn struct_type_mangles_by_name_only() {
        let s = Type::Struct(Arc::new(StructType {
            name: "Point".into(),
            fields: vec![Type::I64, Type::I64],
        }));
        assert_eq!(mangle_type(&s), "5Point");
    }
}
