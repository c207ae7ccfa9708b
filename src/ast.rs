//! The typed AST interface the IR builder consumes (§3.1).
//!
//! This crate does not implement a lexer, parser, or type checker (§1 Non-goals): those are
//! external collaborators. This module defines the minimal shape of a fully type-checked AST
//! that `ir::builder` walks, matching the fields §3.1 enumerates. A real front end would hand
//! the builder its own AST type implementing an equivalent shape; this one exists so the builder
//! and its tests have something concrete to walk.

use crate::ir::Type;

/// A binary operator token, as resolved by the parser. Short-circuit `&&`/`||` are excluded:
/// §4.A assumes they have already been desugared to `if` by the front end (out of scope here).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOpToken {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
}

/// Linkage of a top-level declaration (mirrors `ir::Linkage`; kept separate because the AST's
/// notion of linkage is a source-level annotation, resolved to `ir::Linkage` during lowering).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeclLinkage {
    Local,
    Internal,
    Exported,
    Imported,
}

/// A typed expression node. Every node carries its resolved `Type` (§3.1); `kind` holds the
/// operation.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

/// The operation an expression node performs.
#[derive(Clone, Debug)]
pub enum ExprKind {
    /// An integer literal.
    IntLiteral(u64),
    /// A string literal.
    StringLiteral(String),
    /// A reference to a local, parameter, or global variable by name.
    Var(String),
    /// `op rhs`, excluding boolean negation (rare enough in this language to model as `Not`).
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// `lhs op rhs`.
    Binary {
        op: BinOpToken,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs = rhs`.
    Assign { lhs: Box<Expr>, rhs: Box<Expr> },
    /// `callee(args...)`.
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `expr as ty`.
    Cast { expr: Box<Expr>, to: Type },
    /// `if cond { then } else { else_ }`; `else_` is `None` for a conditional with no else arm.
    If {
        cond: Box<Expr>,
        then: Vec<Stmt>,
        else_: Option<Vec<Stmt>>,
    },
    /// `while cond { body }`.
    While { cond: Box<Expr>, body: Vec<Stmt> },
    /// `for (init; cond; step) { body }`.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        body: Vec<Stmt>,
    },
    /// `{ stmts... }` used as an expression; its value is that of its last statement.
    Block(Vec<Stmt>),
    /// `base.field`.
    Member { base: Box<Expr>, field: usize },
}

/// Prefix unary operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Bitwise complement.
    Not,
}

/// A statement.
#[derive(Clone, Debug)]
pub enum Stmt {
    /// A bare expression, evaluated for effect (and as the block's value if last).
    Expr(Expr),
    /// `name : ty = init;`, a local variable declaration.
    VarDecl {
        name: String,
        ty: Type,
        init: Option<Expr>,
    },
    /// `return expr;` or bare `return;`.
    Return(Option<Expr>),
}

/// A function parameter declaration.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A top-level function declaration.
#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    /// `None` for `ext`-declared functions with no body.
    pub body: Option<Vec<Stmt>>,
    pub linkage: DeclLinkage,
}

impl FunctionDecl {
    /// The function's full type, as consumed by `ir::Function::new`.
    pub fn ty(&self) -> Type {
        Type::Function {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.ret.clone()),
        }
    }
}

/// A top-level variable declaration.
#[derive(Clone, Debug)]
pub struct StaticDecl {
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
    pub linkage: DeclLinkage,
}

/// A whole compilation unit as the front end hands it to the IR builder.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub functions: Vec<FunctionDecl>,
    pub statics: Vec<StaticDecl>,
}
