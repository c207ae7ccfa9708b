//! Black-box scenarios driving `CodegenContext::compile_program` from a hand-built AST straight
//! through to object bytes, covering the cases a unit test inside any one pipeline stage can't see
//! end to end: Phi collapsing to real branches, a local variable's store/load through its frame
//! slot, and a string literal becoming static data reached by a RIP-relative relocation.

use codegen_core::ast::{BinOpToken, DeclLinkage, Expr, ExprKind, FunctionDecl, Param, Program, Stmt};
use codegen_core::ir::Type;
use codegen_core::object::{RelocationKind, SectionPayload, SymbolKind, CODE_SECTION};
use codegen_core::{CodegenContext, Flags};

fn ctx() -> CodegenContext {
    CodegenContext::new(Flags::default())
}

fn int(v: u64) -> Expr {
    Expr { kind: ExprKind::IntLiteral(v), ty: Type::I64 }
}

fn var(name: &str) -> Expr {
    Expr { kind: ExprKind::Var(name.into()), ty: Type::I64 }
}

fn code_bytes(obj: &codegen_core::Object) -> Vec<u8> {
    match &obj.sections[CODE_SECTION].payload {
        SectionPayload::Bytes(b) => b.clone(),
        SectionPayload::Fill { .. } => panic!("code section should never be a fill"),
    }
}

/// Find `needle` as a contiguous run inside `haystack`, for asserting an opcode sequence shows up
/// somewhere without committing to the exact offset register allocation lands it at.
fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// `fn add(a: integer, b: integer): integer = a + b` under System V: both arguments already sit in
/// their ABI registers, so the selector should just fold them straight into one `ADD`/`RET` — no
/// spill, no frame.
#[test]
fn two_argument_add_needs_no_frame() {
    let program = Program {
        functions: vec![FunctionDecl {
            name: "add".into(),
            params: vec![
                Param { name: "a".into(), ty: Type::I64 },
                Param { name: "b".into(), ty: Type::I64 },
            ],
            ret: Type::I64,
            body: Some(vec![Stmt::Return(Some(Expr {
                kind: ExprKind::Binary { op: BinOpToken::Add, lhs: Box::new(var("a")), rhs: Box::new(var("b")) },
                ty: Type::I64,
            }))]),
            linkage: DeclLinkage::Exported,
        }],
        statics: vec![],
    };

    let obj = ctx().compile_program(&program).unwrap();
    let bytes = code_bytes(&obj);
    // however the two params get colored, the body is add/ret with no push/frame setup: a
    // two-argument leaf with no locals gets `FrameKind::None` (§4.D), so the very last byte is
    // `ret` and nothing in the stream ever pushes `rbp`.
    assert_eq!(*bytes.last().unwrap(), 0xC3);
    assert!(!bytes.contains(&0x55), "a leaf with no locals must not push rbp");
    assert!(obj.symbol_named("_XF3add").is_some() || obj.symbols.iter().any(|s| s.name.contains("add")));
}

/// `fn main(): integer = if 1 { 10 } else { 20 }`. Both arms are immediates that fall through to
/// the join block, so the builder attaches a Phi argument from each one (§4.A `codegen_if`); MIR
/// lowering must turn that Phi into a copy into one shared register on each incoming edge, and the
/// two arms must end up as two real, distinct branch targets in the emitted code (a conditional
/// branch plus an unconditional one joining back together).
#[test]
fn if_else_with_immediate_arms_collapses_to_two_branch_targets() {
    let program = Program {
        functions: vec![FunctionDecl {
            name: "main".into(),
            params: vec![],
            ret: Type::I64,
            body: Some(vec![Stmt::Return(Some(Expr {
                kind: ExprKind::If {
                    cond: Box::new(int(1)),
                    then: vec![Stmt::Expr(int(10))],
                    else_: Some(vec![Stmt::Expr(int(20))]),
                },
                ty: Type::I64,
            }))]),
            linkage: DeclLinkage::Exported,
        }],
        statics: vec![],
    };

    let obj = ctx().compile_program(&program).unwrap();
    let bytes = code_bytes(&obj);
    // a conditional jump (0F 8x) deciding which arm runs, and a plain jump (E9) at the end of the
    // arm that falls through to the join block; both get resolved to local displacements and
    // leave no relocations or `.L` symbols behind.
    assert!(bytes.iter().zip(bytes.iter().skip(1)).any(|(a, b)| *a == 0x0F && (0x80..=0x8F).contains(b)));
    assert!(bytes.contains(&0xE9));
    assert!(obj.relocations.is_empty());
    assert!(!obj.symbols.iter().any(|s| s.name.starts_with(".L")));
}

/// `fn main(): integer { x: integer = 5; return x; }`. The local forces a full, `rbp`-based frame
/// (§4.D): one `Alloca`-backed store of the initializer, one load back out of the same slot.
#[test]
fn function_with_one_local_gets_a_full_frame_with_store_and_load() {
    let program = Program {
        functions: vec![FunctionDecl {
            name: "main".into(),
            params: vec![],
            ret: Type::I64,
            body: Some(vec![
                Stmt::VarDecl { name: "x".into(), ty: Type::I64, init: Some(int(5)) },
                Stmt::Return(Some(var("x"))),
            ]),
            linkage: DeclLinkage::Exported,
        }],
        statics: vec![],
    };

    let obj = ctx().compile_program(&program).unwrap();
    let bytes = code_bytes(&obj);
    // `push rbp; mov rbp, rsp` opens a full frame, and its mirror (`mov rsp, rbp; pop rbp`) closes
    // it right before the final `ret`.
    assert_eq!(bytes[0], 0x55);
    assert!(contains_subsequence(&bytes, &[0x48, 0x89, 0xE5]));
    assert!(contains_subsequence(&bytes, &[0x48, 0x89, 0xEC]));
    assert_eq!(*bytes.last().unwrap(), 0xC3);
    assert_eq!(bytes[bytes.len() - 2], 0x5D); // `pop rbp` immediately precedes `ret`
    // `mov [rbp-8], imm32` stores the initializer; some register load then reads it back before
    // returning. The store's ModR/M (mod=01, rm=101 for rbp) with a `-8` displacement is fixed
    // regardless of which physical register regalloc eventually assigns the local to.
    assert!(contains_subsequence(&bytes, &[0xC7, 0x45, 0xF8]));
}

/// `extern fn puts(s: ptr<integer8>): integer;` called with one string-literal argument: the
/// string becomes a local static with an embedded NUL, the call's argument register gets loaded
/// from its address, and the call itself leaves an unresolved relocation against the external
/// symbol for the linker to patch (§8 scenario 5, §6.2).
#[test]
fn calling_an_extern_function_with_a_string_literal_argument() {
    let program = Program {
        functions: vec![
            FunctionDecl {
                name: "puts".into(),
                params: vec![Param { name: "s".into(), ty: Type::Pointer(Box::new(Type::Integer { bits: 8, signed: false })) }],
                ret: Type::I64,
                body: None,
                linkage: DeclLinkage::Imported,
            },
            FunctionDecl {
                name: "main".into(),
                params: vec![],
                ret: Type::I64,
                body: Some(vec![Stmt::Return(Some(Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(Expr { kind: ExprKind::Var("puts".into()), ty: Type::I64 }),
                        args: vec![Expr { kind: ExprKind::StringLiteral("hi".into()), ty: Type::Pointer(Box::new(Type::Integer { bits: 8, signed: false })) }],
                    },
                    ty: Type::I64,
                }))]),
                linkage: DeclLinkage::Exported,
            },
        ],
        statics: vec![],
    };

    let obj = ctx().compile_program(&program).unwrap();

    assert!(obj.symbol_named("puts").map(|s| s.kind == SymbolKind::External).unwrap_or(false));
    assert!(obj
        .relocations
        .iter()
        .any(|r| r.kind == RelocationKind::Disp32PcRel && r.symbol == "puts"));

    // the string's bytes (`h`, `i`, the builder's appended NUL) land in `.data` under a mangled
    // static symbol, never inlined into the code stream.
    let data = obj.section_named(".data").expect("string literal needs a data section");
    let data_bytes = match &data.payload {
        SectionPayload::Bytes(b) => b,
        SectionPayload::Fill { .. } => panic!(".data should hold real bytes here"),
    };
    assert!(contains_subsequence(data_bytes, &[b'h', b'i', 0x00]));
    assert!(obj
        .symbols
        .iter()
        .any(|s| s.section == ".data" && s.kind == SymbolKind::Static));
}
