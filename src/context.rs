//! `CodegenContext`: the top-level driver (§3, §5, §7) tying the AST walk, verifier, selector,
//! allocator and encoder into one `compile` call.
//!
//! Mirrors the teacher's `Context::compile` shape (verify, then lower, one function at a time,
//! accumulating into a single output artifact) but replaces its ELF-specific `MachBuffer`
//! machinery with this crate's generic `Object`.

use crate::ast::Program;
use crate::binemit;
use crate::ir::{Linkage, Module};
use crate::isa::Flags;
use crate::ir::builder::IrBuilder;
use crate::mangle;
use crate::mir::select::lower_function;
use crate::object::{Object, Section, SectionPayload, Symbol, SymbolKind};
use crate::regalloc::allocate_function;
use crate::result::CodegenResult;
use crate::verifier;

/// Owns the flags a compilation runs under; stateless otherwise; safe to reuse across multiple
/// `compile_program`/`compile_module` calls.
pub struct CodegenContext {
    flags: Flags,
}

impl CodegenContext {
    pub fn new(flags: Flags) -> Self {
        CodegenContext { flags }
    }

    /// Build `program` into IR and compile it straight through to an `Object` (§7 "compile").
    pub fn compile_program(&self, program: &Program) -> CodegenResult<Object> {
        let module = IrBuilder::new().build_program(program)?;
        self.compile_module(module)
    }

    /// Compile an already-built `Module` (the entry point for a caller that constructs its own
    /// `Module` without going through `ast`/`IrBuilder`, e.g. a test or an alternate front end).
    pub fn compile_module(&self, module: Module) -> CodegenResult<Object> {
        let mut obj = Object::new();

        for (_, func) in module.functions.iter() {
            if func.flags.is_extern {
                // No body to encode; any call to it becomes an `External` relocation target
                // resolved by the linker, so it still needs a symbol-table entry naming it.
                obj.add_symbol(Symbol {
                    name: mangle::mangle_function(func),
                    kind: SymbolKind::External,
                    section: String::new(),
                    offset: 0,
                });
                continue;
            }

            if self.flags.enable_verifier {
                verifier::verify_function(func)?;
            }

            log::debug!("lowering {} to MIR", func.name);
            let mut mir = lower_function(func, self.flags.call_conv, func.flags.leaf)?;
            let alloc = allocate_function(&mut mir, self.flags.call_conv)?;

            if self.flags.enable_verifier {
                verifier::verify_mir_allocated(&mir)?;
            }

            binemit::insert_frame_instructions(&mut mir, self.flags.call_conv, &alloc.callee_saved_used);

            let name = mangle::mangle_function(func);
            binemit::emit_function(&mut obj, &mir, &name, &module, self.flags.call_conv)?;

            if self.flags.emit_symbols && func.flags.global {
                if let Some(last) = obj.symbols.last_mut() {
                    if last.name == name {
                        last.kind = SymbolKind::Export;
                    }
                }
            }
        }

        self.emit_statics(&mut obj, &module)?;
        obj.resolve_local_labels()?;
        Ok(obj)
    }

    /// Place every module-level static in `.data` (initialized) or `.bss` (a zero fill), with a
    /// symbol naming it. An `Imported` static gets only an `External` symbol; it contributes no
    /// bytes here (§6.2).
    fn emit_statics(&self, obj: &mut Object, module: &Module) -> CodegenResult<()> {
        for (_, data) in module.statics.iter() {
            let name = mangle::mangle_static(&data.name, &data.ty, matches!(data.linkage, Linkage::Imported));

            if matches!(data.linkage, Linkage::Imported) {
                obj.add_symbol(Symbol {
                    name,
                    kind: SymbolKind::External,
                    section: String::new(),
                    offset: 0,
                });
                continue;
            }

            let kind = if matches!(data.linkage, Linkage::Exported) {
                SymbolKind::Export
            } else {
                SymbolKind::Static
            };

            match &data.init {
                Some(bytes) => {
                    obj.declare_section(".data", true, false);
                    let section = obj.section_named_mut(".data").expect("just declared");
                    let offset = section.len();
                    Object::write_n_bytes(section, bytes);
                    obj.add_symbol(Symbol { name, kind, section: ".data".into(), offset });
                }
                None => {
                    let size = data.ty.size_of();
                    obj.declare_section(".bss", true, false);
                    let offset = grow_bss(obj, size);
                    obj.add_symbol(Symbol { name, kind, section: ".bss".into(), offset });
                }
            }
        }
        Ok(())
    }
}

/// Grow `.bss`'s fill count by `size` bytes, returning the offset the new region starts at.
/// `.bss` is declared with a `Fill` payload rather than `Bytes` so an emitter backing this object
/// model doesn't have to materialize megabytes of zeros for an uninitialized array (§3.4
/// `SectionPayload::Fill`).
fn grow_bss(obj: &mut Object, size: u32) -> u32 {
    let section = obj.section_named_mut(".bss").expect("just declared");
    match &mut section.payload {
        SectionPayload::Bytes(b) if b.is_empty() => {
            section.payload = SectionPayload::Fill { value: 0, count: size };
            0
        }
        SectionPayload::Fill { count, .. } => {
            let offset = *count;
            *count += size;
            offset
        }
        SectionPayload::Bytes(_) => {
            panic!("`.bss` section unexpectedly holds real bytes")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DeclLinkage, Expr, ExprKind, FunctionDecl, Stmt};
    use crate::ir::Type;

    fn ctx() -> CodegenContext {
        CodegenContext::new(Flags::default())
    }

    fn int(v: u64) -> Expr {
        Expr { kind: ExprKind::IntLiteral(v), ty: Type::I64 }
    }

    #[test]
    fn compiling_a_constant_returning_main_produces_a_mov_and_ret() {
        let program = Program {
            functions: vec![FunctionDecl {
                name: "main".into(),
                params: vec![],
                ret: Type::I64,
                body: Some(vec![Stmt::Return(Some(int(42)))]),
                linkage: DeclLinkage::Exported,
            }],
            statics: vec![],
        };

        let obj = ctx().compile_program(&program).unwrap();
        let bytes = match &obj.sections[crate::object::CODE_SECTION].payload {
            SectionPayload::Bytes(b) => b,
            _ => unreachable!(),
        };
        assert_eq!(&bytes[..], &[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
        assert!(obj.symbol_named("main").is_some());
    }

    #[test]
    fn compiling_two_functions_with_a_call_produces_an_unresolved_local_call() {
        let program = Program {
            functions: vec![
                FunctionDecl {
                    name: "helper".into(),
                    params: vec![],
                    ret: Type::I64,
                    body: Some(vec![Stmt::Return(Some(int(7)))]),
                    linkage: DeclLinkage::Internal,
                },
                FunctionDecl {
                    name: "main".into(),
                    params: vec![],
                    ret: Type::I64,
                    body: Some(vec![Stmt::Return(Some(Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(Expr { kind: ExprKind::Var("helper".into()), ty: Type::I64 }),
                            args: vec![],
                        },
                        ty: Type::I64,
                    }))]),
                    linkage: DeclLinkage::Exported,
                },
            ],
            statics: vec![],
        };

        let obj = ctx().compile_program(&program).unwrap();
        assert!(obj.relocations.iter().any(|r| r.kind == crate::object::RelocationKind::Disp32PcRel));
    }
}
