//! The IR builder (§4.A): both the low-level constructor operations and the AST walk that drives
//! them.
//!
//! Construction never retries. A structural invariant violation (attaching an instruction past
//! a terminator, asking for the insert point with no current function) is a programming error
//! and is checked with `debug_assert!`, consistent with §4.A "Failure semantics". The one error
//! that *does* propagate through `CodegenResult` is name resolution, because an unresolved
//! symbol can legitimately originate from a malformed (but type-checker-approved, in a
//! multi-file setting) program rather than from a bug in this crate.

use crate::ast::{
    BinOpToken, DeclLinkage, Expr, ExprKind, FunctionDecl, Program, Stmt, StaticDecl, UnaryOp,
};
use crate::ir::function::{FunctionFlags, Linkage, StaticVarData};
use crate::ir::{
    BinOp, Block, Callee, CmpKind, FuncId, Function, Inst, InstructionData, Module, PhiArg,
    StaticVar, Type,
};
use crate::entity::EntityRef;
use crate::result::{CodegenError, CodegenResult};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Where a lexically scoped name's value lives.
#[derive(Copy, Clone)]
enum VarSlot {
    /// Held directly as an SSA value, never stored to memory: safe only for a parameter that is
    /// never reassigned and never addressed (no `Assign` target, no `Member` base) anywhere in
    /// the function, so there is nothing for a later use to see but this one definition.
    Direct(Inst),
    /// Backed by an `Alloca`; every reference through this slot round-trips through
    /// `Load`/`Store` (§4.A "Variable declaration"/"Assignment").
    Address(Inst),
}

/// Lexically scoped mapping from source names to the IR values that hold them (§4.A "Variable
/// reference").
type Scope = HashMap<String, VarSlot>;

/// Drives IR construction for an entire `Program` into a `Module`.
pub struct IrBuilder {
    module: Module,
    cur_func: Option<FuncId>,
    cur_block: Option<Block>,
    next_block_num: u32,
    scopes: Vec<Scope>,
    func_table: HashMap<String, FuncId>,
    global_table: HashMap<String, StaticVar>,
}

impl IrBuilder {
    /// Start with an empty module.
    pub fn new() -> Self {
        Self {
            module: Module::new(),
            cur_func: None,
            cur_block: None,
            next_block_num: 0,
            scopes: Vec::new(),
            func_table: HashMap::new(),
            global_table: HashMap::new(),
        }
    }

    // ---- graph inspection helpers ----

    fn func(&self) -> &Function {
        &self.module.functions[self.cur_func.expect("no current function")]
    }

    fn func_mut(&mut self) -> &mut Function {
        &mut self.module.functions[self.cur_func.expect("no current function")]
    }

    fn cur_block(&self) -> Block {
        self.cur_block.expect("no current insert point")
    }

    fn block_closed(&self, block: Block) -> bool {
        self.func().block_is_closed(block)
    }

    // ---- entity lifecycle (§4.A "Also:") ----

    /// Allocate a detached block, not yet part of any function's layout.
    pub fn block_create(&mut self) -> Block {
        let b = Block::new(self.next_block_num as usize);
        self.next_block_num += 1;
        b
    }

    /// Attach `block` to the current function's layout and make it the insert point.
    pub fn block_attach(&mut self, block: Block) {
        self.func_mut().layout.append_block(block);
        self.cur_block = Some(block);
    }

    /// Start a new function: reset the block counter, declare its entry block, and make it the
    /// insert point. Does not yet create parameter allocas; see `build_function`.
    pub fn function(&mut self, name: impl Into<String>, ty: Type) -> FuncId {
        let name = name.into();
        self.next_block_num = 0;
        let func = Function::new(name.clone(), ty);
        let id = self.module.declare_function(func);
        self.func_table.insert(name, id);
        self.cur_func = Some(id);
        self.scopes.clear();
        self.scopes.push(Scope::new());
        let entry = self.block_create();
        self.block_attach(entry);
        id
    }

    fn append(&mut self, data: InstructionData) -> Inst {
        let block = self.cur_block();
        debug_assert!(
            !self.block_closed(block),
            "attaching an instruction past a terminator in {block}"
        );
        let inst = self.func_mut().dfg.make_inst(data);
        self.func_mut().layout.append_inst(inst, block);
        inst
    }

    // ---- value constructors ----

    /// Build an integer/bool constant.
    pub fn immediate(&mut self, ty: Type, value: u64) -> Inst {
        self.append(InstructionData::Immediate { ty, value })
    }

    /// The `index`-th function parameter. Only valid while the insert point is the entry block
    /// (invariant 5).
    pub fn parameter(&mut self, ty: Type, index: usize) -> Inst {
        debug_assert!(
            Some(self.cur_block()) == self.func().layout.entry_block(),
            "Parameter may only appear in the entry block"
        );
        self.append(InstructionData::Parameter { ty, index })
    }

    /// Reserve `size_of(ty)` bytes of stack storage.
    pub fn stack_allocate(&mut self, ty: Type) -> Inst {
        let size = ty.size_of();
        self.append(InstructionData::Alloca { size, ty })
    }

    /// The address of a static variable.
    pub fn static_reference(&mut self, var: StaticVar) -> Inst {
        self.append(InstructionData::StaticRef { var })
    }

    /// Declare a module-level static variable and return its reference, matching the builder's
    /// `create_static` (§4.A).
    pub fn create_static(
        &mut self,
        name: impl Into<String>,
        ty: Type,
        linkage: Linkage,
        init: Option<Vec<u8>>,
    ) -> StaticVar {
        let name = name.into();
        let id = self.module.declare_static(StaticVarData {
            name: name.clone(),
            ty,
            linkage,
            init,
            referenced: false,
        });
        self.global_table.insert(name, id);
        id
    }

    /// Load a value of `ty` from `addr`.
    pub fn load(&mut self, ty: Type, addr: Inst) -> Inst {
        self.append(InstructionData::Load { ty, addr })
    }

    /// Store `value` to `addr`.
    pub fn store(&mut self, value: Inst, addr: Inst) -> Inst {
        self.append(InstructionData::Store { addr, value })
    }

    /// A binary arithmetic/bitwise op.
    pub fn binary(&mut self, op: BinOp, ty: Type, lhs: Inst, rhs: Inst) -> Inst {
        self.append(InstructionData::Binary { op, ty, lhs, rhs })
    }

    /// A comparison, yielding `Type::Bool`.
    pub fn comparison(&mut self, kind: CmpKind, lhs: Inst, rhs: Inst) -> Inst {
        self.append(InstructionData::Compare { kind, lhs, rhs })
    }

    /// Bitwise complement.
    pub fn not_(&mut self, ty: Type, operand: Inst) -> Inst {
        self.append(InstructionData::Not { ty, operand })
    }

    /// Identity copy (same-width cast, or a Phi feeder).
    pub fn copy(&mut self, ty: Type, operand: Inst) -> Inst {
        self.append(InstructionData::Copy { ty, operand })
    }

    /// Unconditional jump.
    pub fn branch(&mut self, dest: Block) -> Inst {
        self.append(InstructionData::Branch { dest })
    }

    /// Two-way conditional jump.
    pub fn branch_conditional(&mut self, cond: Inst, then_block: Block, else_block: Block) -> Inst {
        self.append(InstructionData::BranchConditional {
            cond,
            then_block,
            else_block,
        })
    }

    /// Return, optionally with a value.
    pub fn return_(&mut self, value: Option<Inst>) -> Inst {
        self.append(InstructionData::Return { value })
    }

    /// Marks the current point as provably unreachable (for a block with no fallthrough
    /// possible); `mark_unreachable` below is the version that retrofits an *already closed*
    /// block.
    pub fn unreachable(&mut self) -> Inst {
        self.append(InstructionData::Unreachable)
    }

    /// Begin a direct call; add arguments with `add_argument`, finish with nothing further: the
    /// returned `Inst` is already attached.
    pub fn direct_call(&mut self, ty: Type, func: FuncId, args: Vec<Inst>) -> Inst {
        self.append(InstructionData::Call {
            ty,
            callee: Callee::Direct(func),
            args: SmallVec::from_vec(args),
            tail_call: false,
        })
    }

    /// An indirect call through a function-pointer value.
    pub fn indirect_call(&mut self, ty: Type, callee: Inst, args: Vec<Inst>) -> Inst {
        self.append(InstructionData::Call {
            ty,
            callee: Callee::Indirect(callee),
            args: SmallVec::from_vec(args),
            tail_call: false,
        })
    }

    /// Append one more argument to an already-built call, updating its use-list entry.
    pub fn add_argument(&mut self, call: Inst, value: Inst) {
        if let InstructionData::Call { args, .. } = self.func_mut().dfg.inst_mut(call) {
            args.push(value);
        }
        self.func_mut().dfg.register_extra_user(value, call);
    }

    /// Create an empty Phi node in the current block.
    pub fn phi(&mut self, ty: Type) -> Inst {
        self.append(InstructionData::Phi {
            ty,
            args: SmallVec::new(),
        })
    }

    /// Add one incoming edge to a Phi, updating the use-list entry for `value`.
    pub fn phi_argument(&mut self, phi: Inst, pred: Block, value: Inst) {
        if let InstructionData::Phi { args, .. } = self.func_mut().dfg.inst_mut(phi) {
            args.push(PhiArg { pred, value });
        }
        self.func_mut().dfg.register_extra_user(value, phi);
    }

    // ---- graph maintenance (§4.A) ----

    /// Every user of `old` now uses `new`.
    pub fn replace_uses(&mut self, old: Inst, new: Inst) {
        self.func_mut().dfg.replace_uses(old, new);
    }

    /// Detach and free `inst`. `inst` must have no remaining users.
    pub fn remove(&mut self, inst: Inst) {
        self.func_mut().dfg.remove(inst);
    }

    /// Retarget every Phi that named `block` as a predecessor (dropping that argument), then
    /// replace `block`'s terminator with `Unreachable`.
    pub fn mark_unreachable(&mut self, block: Block) {
        let func = self.func_mut();
        let term = func
            .layout
            .last_inst(block)
            .expect("mark_unreachable on an empty block");

        let mut targets = vec![];
        func.dfg.inst_mut(term).map_block_targets(|b| {
            targets.push(b);
            b
        });

        for target in targets {
            for inst in func.layout.block_insts(target).collect::<Vec<_>>() {
                let mut dropped = vec![];
                if let InstructionData::Phi { args, .. } = func.dfg.inst_mut(inst) {
                    args.retain(|a| {
                        let keep = a.pred != block;
                        if !keep {
                            dropped.push(a.value);
                        }
                        keep
                    });
                }
                for value in dropped {
                    let still_used = matches!(
                        func.dfg.inst(inst),
                        InstructionData::Phi { args, .. } if args.iter().any(|a| a.value == value)
                    );
                    if !still_used {
                        func.dfg.drop_user(value, inst);
                    }
                }
            }
        }

        let mut operands = vec![];
        func.dfg.inst(term).for_each_child(|v| operands.push(v));
        for v in operands {
            func.dfg.drop_user(v, term);
        }
        *func.dfg.inst_mut(term) = InstructionData::Unreachable;
    }

    // ---- AST walk (§4.A "IR construction from the AST") ----

    /// Build a whole program into a fresh `Module`.
    pub fn build_program(mut self, program: &Program) -> CodegenResult<Module> {
        for decl in &program.statics {
            self.declare_static(decl)?;
        }
        // Pre-declare every function signature first so forward/mutually-recursive calls
        // resolve regardless of declaration order.
        for decl in &program.functions {
            let id = self.module.declare_function(Function {
                flags: FunctionFlags {
                    global: decl.linkage == DeclLinkage::Exported,
                    is_extern: decl.body.is_none(),
                    leaf: !contains_call(decl),
                    ..FunctionFlags::default()
                },
                ..Function::new(decl.name.clone(), decl.ty())
            });
            self.func_table.insert(decl.name.clone(), id);
        }
        for decl in &program.functions {
            if decl.body.is_some() {
                self.build_function(decl)?;
            }
        }
        Ok(self.module)
    }

    fn declare_static(&mut self, decl: &StaticDecl) -> CodegenResult<StaticVar> {
        let init = match &decl.init {
            Some(Expr {
                kind: ExprKind::IntLiteral(v),
                ty,
            }) => Some(v.to_le_bytes()[..ty.size_of() as usize].to_vec()),
            Some(Expr {
                kind: ExprKind::StringLiteral(s),
                ..
            }) => {
                let mut bytes = s.clone().into_bytes();
                bytes.push(0);
                Some(bytes)
            }
            Some(_) => {
                return Err(CodegenError::Unsupported {
                    construct: "static initializer",
                    detail: "only literal initializers are supported".into(),
                })
            }
            None => None,
        };
        let linkage = match decl.linkage {
            DeclLinkage::Local => Linkage::Local,
            DeclLinkage::Internal => Linkage::Internal,
            DeclLinkage::Exported => Linkage::Exported,
            DeclLinkage::Imported => Linkage::Imported,
        };
        let id = self.module.declare_static(StaticVarData {
            name: decl.name.clone(),
            ty: decl.ty.clone(),
            linkage,
            init,
            referenced: false,
        });
        self.global_table.insert(decl.name.clone(), id);
        Ok(id)
    }

    fn build_function(&mut self, decl: &FunctionDecl) -> CodegenResult<()> {
        log::trace!("building IR for {}", decl.name);
        let id = self.func_table[&decl.name];
        self.cur_func = Some(id);
        self.next_block_num = 0;
        self.scopes.clear();
        self.scopes.push(Scope::new());

        let entry = self.block_create();
        self.block_attach(entry);

        let addressed = addressed_names(decl);
        let mut param_insts = Vec::with_capacity(decl.params.len());
        for (i, param) in decl.params.iter().enumerate() {
            let p = self.parameter(param.ty.clone(), i);
            let entry_slot = if addressed.contains(&param.name) {
                let slot = self.stack_allocate(param.ty.clone());
                self.store(p, slot);
                VarSlot::Address(slot)
            } else {
                VarSlot::Direct(p)
            };
            self.scopes.last_mut().unwrap().insert(param.name.clone(), entry_slot);
            param_insts.push(p);
        }
        self.func_mut().params = param_insts;

        let ret_ty = decl.ret.clone();
        let body = decl.body.as_ref().expect("build_function requires a body");
        let last_val = self.codegen_block_stmts(body)?;

        if !self.block_closed(self.cur_block()) {
            let value = if matches!(ret_ty, Type::Void) {
                None
            } else {
                Some(last_val.unwrap_or_else(|| self.immediate(ret_ty.clone(), 0)))
            };
            self.return_(value);
        }
        Ok(())
    }

    fn codegen_block_stmts(&mut self, stmts: &[Stmt]) -> CodegenResult<Option<Inst>> {
        self.scopes.push(Scope::new());
        let mut last = None;
        for stmt in stmts {
            if self.block_closed(self.cur_block()) {
                break;
            }
            last = self.codegen_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(last)
    }

    fn codegen_stmt(&mut self, stmt: &Stmt) -> CodegenResult<Option<Inst>> {
        match stmt {
            Stmt::Expr(e) => Ok(Some(self.codegen_expr(e)?)),
            Stmt::VarDecl { name, ty, init } => {
                let slot = self.stack_allocate(ty.clone());
                if let Some(init_expr) = init {
                    let v = self.codegen_expr(init_expr)?;
                    self.store(v, slot);
                }
                self.scopes.last_mut().unwrap().insert(name.clone(), VarSlot::Address(slot));
                Ok(None)
            }
            Stmt::Return(opt) => {
                let value = match opt {
                    Some(e) => Some(self.codegen_expr(e)?),
                    None => None,
                };
                self.return_(value);
                Ok(None)
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<VarSlot> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn codegen_expr(&mut self, expr: &Expr) -> CodegenResult<Inst> {
        match &expr.kind {
            ExprKind::IntLiteral(v) => Ok(self.immediate(expr.ty.canonicalize(), *v)),
            ExprKind::StringLiteral(s) => {
                let mut bytes = s.clone().into_bytes();
                bytes.push(0);
                let var = self.create_static(
                    format!(".Lstr{}", self.global_table.len()),
                    Type::Array {
                        element: Box::new(Type::Integer { bits: 8, signed: false }),
                        len: bytes.len() as u64,
                    },
                    Linkage::Local,
                    Some(bytes),
                );
                Ok(self.static_reference(var))
            }
            ExprKind::Var(name) => {
                if let Some(slot) = self.lookup(name) {
                    Ok(match slot {
                        VarSlot::Direct(v) => v,
                        VarSlot::Address(addr) => self.load(expr.ty.canonicalize(), addr),
                    })
                } else if let Some(&var) = self.global_table.get(name) {
                    let addr = self.static_reference(var);
                    Ok(self.load(expr.ty.canonicalize(), addr))
                } else {
                    Err(CodegenError::unresolved(name.clone()))
                }
            }
            ExprKind::Unary { op, operand } => {
                let v = self.codegen_expr(operand)?;
                match op {
                    UnaryOp::Not => Ok(self.not_(expr.ty.canonicalize(), v)),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.codegen_expr(lhs)?;
                let r = self.codegen_expr(rhs)?;
                let signed = lhs.ty.is_signed();
                Ok(self.binary_or_compare(*op, expr.ty.canonicalize(), l, r, signed))
            }
            ExprKind::Assign { lhs, rhs } => {
                let addr = self.codegen_expr_for_address(lhs)?;
                let value = self.codegen_expr(rhs)?;
                self.store(value, addr);
                Ok(value)
            }
            ExprKind::Call { callee, args } => {
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.codegen_expr(a)?);
                }
                let ty = expr.ty.canonicalize();
                if let ExprKind::Var(name) = &callee.kind {
                    if self.lookup(name).is_none() {
                        if let Some(&fid) = self.func_table.get(name) {
                            return Ok(self.direct_call(ty, fid, arg_vals));
                        }
                        return Err(CodegenError::unresolved(name.clone()));
                    }
                }
                let callee_val = self.codegen_expr(callee)?;
                Ok(self.indirect_call(ty, callee_val, arg_vals))
            }
            ExprKind::Cast { expr: inner, to } => {
                let v = self.codegen_expr(inner)?;
                let to = to.canonicalize();
                let from_bits = inner.ty.reg_size_bits();
                let to_bits = to.reg_size_bits();
                Ok(if to_bits > from_bits {
                    if to.is_signed() {
                        self.append(InstructionData::SignExtend { ty: to, operand: v })
                    } else {
                        self.append(InstructionData::ZeroExtend { ty: to, operand: v })
                    }
                } else if to_bits < from_bits {
                    self.append(InstructionData::Truncate { ty: to, operand: v })
                } else {
                    self.copy(to, v)
                })
            }
            ExprKind::If { cond, then, else_ } => self.codegen_if(expr.ty.canonicalize(), cond, then, else_.as_deref()),
            ExprKind::While { cond, body } => self.codegen_while(cond, body),
            ExprKind::For { init, cond, step, body } => {
                self.codegen_for(init.as_deref(), cond.as_deref(), step.as_deref(), body)
            }
            ExprKind::Block(stmts) => {
                let v = self.codegen_block_stmts(stmts)?;
                Ok(v.unwrap_or_else(|| self.immediate(expr.ty.canonicalize(), 0)))
            }
            ExprKind::Member { .. } => {
                let addr = self.codegen_expr_for_address(expr)?;
                Ok(self.load(expr.ty.canonicalize(), addr))
            }
        }
    }

    /// Codegen `expr` for its *address* rather than its value ("for address" stops one
    /// dereference level earlier than the rvalue path, §4.A "Assignment").
    fn codegen_expr_for_address(&mut self, expr: &Expr) -> CodegenResult<Inst> {
        match &expr.kind {
            ExprKind::Var(name) => {
                if let Some(slot) = self.lookup(name) {
                    match slot {
                        VarSlot::Address(addr) => Ok(addr),
                        // `addressed_names` marks every `Assign`/`Member` target `Address`
                        // before any codegen runs, so a `Direct` name reaching here means that
                        // pre-pass disagrees with this walk — a builder bug, not a source error.
                        VarSlot::Direct(_) => Err(CodegenError::invariant(
                            "addressed name was not pre-assigned a stack slot",
                            None,
                        )),
                    }
                } else if let Some(&var) = self.global_table.get(name) {
                    Ok(self.static_reference(var))
                } else {
                    Err(CodegenError::unresolved(name.clone()))
                }
            }
            ExprKind::Member { base, field } => {
                let base_addr = self.codegen_expr_for_address(base)?;
                let offset = field_offset(&base.ty, *field);
                let ptr_ty = Type::Pointer(Box::new(Type::Void));
                let off_imm = self.immediate(ptr_ty.clone(), offset as u64);
                Ok(self.binary(BinOp::Add, ptr_ty, base_addr, off_imm))
            }
            _ => Err(CodegenError::Unsupported {
                construct: "lvalue expression",
                detail: "only variables and member accesses are assignable".into(),
            }),
        }
    }

    fn binary_or_compare(&mut self, op: BinOpToken, ty: Type, l: Inst, r: Inst, signed: bool) -> Inst {
        match op {
            BinOpToken::Add => self.binary(BinOp::Add, ty, l, r),
            BinOpToken::Sub => self.binary(BinOp::Sub, ty, l, r),
            BinOpToken::Mul => self.binary(BinOp::Mul, ty, l, r),
            BinOpToken::Div => self.binary(BinOp::Div, ty, l, r),
            BinOpToken::Mod => self.binary(BinOp::Mod, ty, l, r),
            BinOpToken::Shl => self.binary(BinOp::Shl, ty, l, r),
            BinOpToken::Shr => {
                let op = if signed { BinOp::Sar } else { BinOp::Shr };
                self.binary(op, ty, l, r)
            }
            BinOpToken::BitAnd => self.binary(BinOp::And, ty, l, r),
            BinOpToken::BitOr => self.binary(BinOp::Or, ty, l, r),
            BinOpToken::Lt => self.comparison(CmpKind::Lt, l, r),
            BinOpToken::Le => self.comparison(CmpKind::Le, l, r),
            BinOpToken::Gt => self.comparison(CmpKind::Gt, l, r),
            BinOpToken::Ge => self.comparison(CmpKind::Ge, l, r),
            BinOpToken::EqEq => self.comparison(CmpKind::Eq, l, r),
            BinOpToken::NotEq => self.comparison(CmpKind::Ne, l, r),
        }
    }

    fn codegen_if(
        &mut self,
        ty: Type,
        cond: &Expr,
        then: &[Stmt],
        else_: Option<&[Stmt]>,
    ) -> CodegenResult<Inst> {
        let then_b = self.block_create();
        let else_b = self.block_create();
        let join_b = self.block_create();

        let cond_v = self.codegen_expr(cond)?;
        self.branch_conditional(cond_v, then_b, else_b);

        self.block_attach(then_b);
        let then_val = self.codegen_block_stmts(then)?;
        let then_val = then_val.unwrap_or_else(|| self.immediate(ty.clone(), 0));
        let then_end = self.cur_block();
        let then_falls_through = !self.block_closed(then_end);
        if then_falls_through {
            self.branch(join_b);
        }

        self.block_attach(else_b);
        let else_val = match else_ {
            Some(stmts) => self
                .codegen_block_stmts(stmts)?
                .unwrap_or_else(|| self.immediate(ty.clone(), 0)),
            None => self.immediate(ty.clone(), 0),
        };
        let else_end = self.cur_block();
        let else_falls_through = !self.block_closed(else_end);
        if else_falls_through {
            self.branch(join_b);
        }

        // A Phi argument is only valid for a predecessor edge that actually exists (invariant 4):
        // an arm that already terminated with `return` never reaches `join_b`.
        self.block_attach(join_b);
        let phi = self.phi(ty);
        if then_falls_through {
            self.phi_argument(phi, then_end, then_val);
        }
        if else_falls_through {
            self.phi_argument(phi, else_end, else_val);
        }
        Ok(phi)
    }

    fn codegen_while(&mut self, cond: &Expr, body: &[Stmt]) -> CodegenResult<Inst> {
        let header_b = self.block_create();
        let body_b = self.block_create();
        let exit_b = self.block_create();

        self.branch(header_b);

        self.block_attach(header_b);
        let cond_v = self.codegen_expr(cond)?;
        self.branch_conditional(cond_v, body_b, exit_b);

        self.block_attach(body_b);
        self.codegen_block_stmts(body)?;
        if !self.block_closed(self.cur_block()) {
            self.branch(header_b);
        }

        self.block_attach(exit_b);
        Ok(self.immediate(Type::Void, 0))
    }

    fn codegen_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> CodegenResult<Inst> {
        self.scopes.push(Scope::new());
        if let Some(init) = init {
            self.codegen_stmt(init)?;
        }

        let header_b = self.block_create();
        let body_b = self.block_create();
        let exit_b = self.block_create();

        self.branch(header_b);

        self.block_attach(header_b);
        match cond {
            Some(cond) => {
                let cond_v = self.codegen_expr(cond)?;
                self.branch_conditional(cond_v, body_b, exit_b);
            }
            None => {
                self.branch(body_b);
            }
        }

        self.block_attach(body_b);
        self.codegen_block_stmts(body)?;
        if !self.block_closed(self.cur_block()) {
            if let Some(step) = step {
                self.codegen_expr(step)?;
            }
            self.branch(header_b);
        }

        self.block_attach(exit_b);
        self.scopes.pop();
        Ok(self.immediate(Type::Void, 0))
    }
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn field_offset(ty: &Type, field: usize) -> u32 {
    match ty {
        Type::Struct(s) => s.fields[..field].iter().map(Type::size_of).sum(),
        _ => 0,
    }
}

/// Every name that `codegen_expr_for_address` will be asked for: an `Assign` target, or the
/// (transitive) base variable of a `Member` access used either as an assignment target or read
/// as a value. A parameter outside this set is never reassigned and never addressed, so
/// `build_function` keeps it in its parameter register instead of spilling it to an `Alloca`.
fn addressed_names(decl: &FunctionDecl) -> HashSet<String> {
    fn mark_root(expr: &Expr, set: &mut HashSet<String>) {
        match &expr.kind {
            ExprKind::Var(name) => {
                set.insert(name.clone());
            }
            ExprKind::Member { base, .. } => mark_root(base, set),
            _ => {}
        }
    }
    fn walk_stmt(stmt: &Stmt, set: &mut HashSet<String>) {
        match stmt {
            Stmt::Expr(e) => walk_expr(e, set),
            Stmt::VarDecl { init, .. } => {
                if let Some(e) = init {
                    walk_expr(e, set);
                }
            }
            Stmt::Return(e) => {
                if let Some(e) = e {
                    walk_expr(e, set);
                }
            }
        }
    }
    fn walk_expr(expr: &Expr, set: &mut HashSet<String>) {
        match &expr.kind {
            ExprKind::IntLiteral(_) | ExprKind::StringLiteral(_) | ExprKind::Var(_) => {}
            ExprKind::Unary { operand, .. } => walk_expr(operand, set),
            ExprKind::Binary { lhs, rhs, .. } => {
                walk_expr(lhs, set);
                walk_expr(rhs, set);
            }
            ExprKind::Assign { lhs, rhs } => {
                mark_root(lhs, set);
                walk_expr(rhs, set);
            }
            ExprKind::Call { callee, args } => {
                walk_expr(callee, set);
                args.iter().for_each(|a| walk_expr(a, set));
            }
            ExprKind::Cast { expr, .. } => walk_expr(expr, set),
            ExprKind::If { cond, then, else_ } => {
                walk_expr(cond, set);
                then.iter().for_each(|s| walk_stmt(s, set));
                if let Some(e) = else_ {
                    e.iter().for_each(|s| walk_stmt(s, set));
                }
            }
            ExprKind::While { cond, body } => {
                walk_expr(cond, set);
                body.iter().for_each(|s| walk_stmt(s, set));
            }
            ExprKind::For { init, cond, step, body } => {
                if let Some(s) = init {
                    walk_stmt(s, set);
                }
                if let Some(e) = cond {
                    walk_expr(e, set);
                }
                if let Some(e) = step {
                    walk_expr(e, set);
                }
                body.iter().for_each(|s| walk_stmt(s, set));
            }
            ExprKind::Block(stmts) => stmts.iter().for_each(|s| walk_stmt(s, set)),
            // Read as a value: still needs the base's address to compute the field offset from.
            ExprKind::Member { base, .. } => mark_root(base, set),
        }
    }

    let mut set = HashSet::new();
    if let Some(body) = &decl.body {
        body.iter().for_each(|s| walk_stmt(s, &mut set));
    }
    set
}

fn contains_call(decl: &FunctionDecl) -> bool {
    fn stmt_has_call(stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Expr(e) => expr_has_call(e),
            Stmt::VarDecl { init, .. } => init.as_ref().map_or(false, expr_has_call),
            Stmt::Return(e) => e.as_ref().map_or(false, expr_has_call),
        }
    }
    fn expr_has_call(expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Call { .. } => true,
            ExprKind::Unary { operand, .. } => expr_has_call(operand),
            ExprKind::Binary { lhs, rhs, .. } => expr_has_call(lhs) || expr_has_call(rhs),
            ExprKind::Assign { lhs, rhs } => expr_has_call(lhs) || expr_has_call(rhs),
            ExprKind::Cast { expr, .. } => expr_has_call(expr),
            ExprKind::If { cond, then, else_ } => {
                expr_has_call(cond)
                    || then.iter().any(stmt_has_call)
                    || else_.as_ref().map_or(false, |e| e.iter().any(stmt_has_call))
            }
            ExprKind::While { cond, body } => expr_has_call(cond) || body.iter().any(stmt_has_call),
            ExprKind::For { init, cond, step, body } => {
                init.as_deref().map_or(false, stmt_has_call)
                    || cond.as_deref().map_or(false, expr_has_call)
                    || step.as_deref().map_or(false, expr_has_call)
                    || body.iter().any(stmt_has_call)
            }
            ExprKind::Block(stmts) => stmts.iter().any(stmt_has_call),
            ExprKind::Member { base, .. } => expr_has_call(base),
            ExprKind::IntLiteral(_) | ExprKind::StringLiteral(_) | ExprKind::Var(_) => false,
        }
    }
    decl.body
        .as_ref()
        .map_or(false, |b| b.iter().any(stmt_has_call))
}
