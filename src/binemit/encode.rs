//! The x86-64 encoder (§4.E): turns one selected-and-allocated `MIRFunction` into bytes and
//! relocations inside a `crate::object::Object`.
//!
//! By the time a function reaches here every operand is either a physical register, an
//! immediate, a frame-relative displacement, or a named target (block/static/function/string
//! literal) resolved through a relocation — there is no further graph to walk, only bytes to
//! emit. `.Lblock<n>`-style local labels mark every MIR block and every `LitString`'s inline
//! data island; `Object::resolve_local_labels` patches branches/LEAs against them once the whole
//! object is built (§4.E "local labels").

use crate::ir::{Block, FuncId, Linkage, Module, StaticVar};
use crate::isa::x86::registers::{RegUnit, RBP, RSP};
use crate::isa::CallConv;
use crate::mangle;
use crate::mir::{MIRFunction, MInst, MOpcode, MachineOperand};
use crate::object::{Object, Relocation, RelocationKind, Section, Symbol, SymbolKind};
use crate::result::{CodegenError, CodegenResult};
use crate::entity::EntityRef;

use super::rex::{self, Rex};

/// Encode `mir` into `obj`'s code section under `func_name`, recording a `Function` symbol at its
/// start, a local label at the start of every block, and an inline data island for every string
/// literal the selector collected.
pub fn emit_function(
    obj: &mut Object,
    mir: &MIRFunction,
    func_name: &str,
    module: &Module,
    call_conv: CallConv,
) -> CodegenResult<()> {
    let start = obj.code().len();
    obj.add_symbol(Symbol {
        name: func_name.to_string(),
        kind: SymbolKind::Function,
        section: ".text".to_string(),
        offset: start,
    });

    for (block, mir_block) in mir.blocks_in_order() {
        let offset = obj.code().len();
        obj.add_symbol(Symbol {
            name: block_label(func_name, block),
            kind: SymbolKind::None,
            section: ".text".to_string(),
            offset,
        });
        for inst in &mir_block.insts {
            encode_inst(obj, inst, func_name, module, call_conv)?;
        }
    }

    for (name, bytes) in &mir.string_literals {
        let offset = obj.code().len();
        obj.add_symbol(Symbol {
            name: name.clone(),
            kind: SymbolKind::None,
            section: ".text".to_string(),
            offset,
        });
        Object::write_n_bytes(obj.code(), bytes);
    }

    log::debug!("{func_name}: encoded {} bytes", obj.code().len() - start);
    Ok(())
}

/// Local label naming a block. Prefixed with the function's own (already-mangled) name so two
/// functions' `block0` never collide in the object's flat, function-agnostic symbol namespace.
fn block_label(func_name: &str, block: Block) -> String {
    format!(".L{}_block{}", func_name, block.index())
}

fn func_symbol(module: &Module, id: FuncId) -> String {
    mangle::mangle_function(&module.functions[id])
}

fn static_symbol(module: &Module, id: StaticVar) -> String {
    let data = &module.statics[id];
    let is_extern = matches!(data.linkage, Linkage::Imported);
    mangle::mangle_static(&data.name, &data.ty, is_extern)
}

fn physical_reg(vreg: crate::mir::VReg) -> CodegenResult<RegUnit> {
    vreg.as_physical()
        .ok_or_else(|| CodegenError::invariant(format!("{vreg} was never colored to a physical register"), None))
}

fn invariant(what: impl Into<String>) -> CodegenError {
    CodegenError::invariant(what, None)
}

fn write_imm(obj: &mut Object, size_bits: u32, v: u64) -> CodegenResult<()> {
    match size_bits {
        8 => Object::write1(obj.code(), v as u8),
        16 => Object::write2(obj.code(), v as u16),
        _ => {
            let imm32 = i32::try_from(v as i64)
                .map_err(|_| CodegenError::EncodingLimit { what: format!("immediate out of range for a 32-bit field: {v:#x}") })?;
            Object::write4(obj.code(), imm32 as u32);
        }
    }
    Ok(())
}

// ---- ModR/M-level primitives ----

/// Emit a ModR/M (+ SIB if needed) + displacement sequence addressing `[base + disp]`, given that
/// the REX byte and opcode bytes have already been written.
fn emit_modrm_mem(obj: &mut Object, reg_field: u8, base: RegUnit, disp: i32) {
    let rm = rex::low3(base);
    let needs_sib = rm == 4; // rsp/r12 can't be a bare ModR/M base; SIB disambiguates it
    let force_disp = rm == 5; // rbp/r13 with mod=00 would mean RIP-relative instead
    if disp == 0 && !force_disp {
        Object::write1(obj.code(), rex::modrm(0b00, reg_field, rm));
        if needs_sib {
            Object::write1(obj.code(), rex::sib(0, 4, rm));
        }
    } else if let Ok(d8) = i8::try_from(disp) {
        Object::write1(obj.code(), rex::modrm(0b01, reg_field, rm));
        if needs_sib {
            Object::write1(obj.code(), rex::sib(0, 4, rm));
        }
        Object::write1(obj.code(), d8 as u8);
    } else {
        Object::write1(obj.code(), rex::modrm(0b10, reg_field, rm));
        if needs_sib {
            Object::write1(obj.code(), rex::sib(0, 4, rm));
        }
        Object::write4(obj.code(), disp as u32);
    }
}

fn emit_rm_mem(obj: &mut Object, opcode_bytes: &[u8], reg_field: RegUnit, base: RegUnit, disp: i32, size_bits: u32) {
    if size_bits == 16 {
        Object::write1(obj.code(), 0x66);
    }
    let rex = Rex::new(size_bits).reg(reg_field, size_bits).base(base);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    for &b in opcode_bytes {
        Object::write1(obj.code(), b);
    }
    emit_modrm_mem(obj, rex::low3(reg_field), base, disp);
}

/// Same as `emit_rm_mem`, but `reg_field` is a literal group-opcode extension (0-7), not a
/// register: it never contributes to `REX.R`.
fn emit_ext_mem(obj: &mut Object, opcode: u8, ext: u8, base: RegUnit, disp: i32, size_bits: u32) {
    if size_bits == 16 {
        Object::write1(obj.code(), 0x66);
    }
    let rex = Rex::new(size_bits).base(base);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    Object::write1(obj.code(), opcode);
    emit_modrm_mem(obj, ext, base, disp);
}

fn emit_ext_reg(obj: &mut Object, opcode: u8, ext: u8, rm: RegUnit, size_bits: u32) {
    if size_bits == 16 {
        Object::write1(obj.code(), 0x66);
    }
    let rex = Rex::new(size_bits).rm(rm, size_bits);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    Object::write1(obj.code(), opcode);
    Object::write1(obj.code(), rex::modrm(0b11, ext, rex::low3(rm)));
}

/// `op r/m, reg` register-direct form: `reg_field` is read, `rm_field` is the ModR/M `rm`
/// register (the one callers usually mean as "dest", since mod=11 makes direction irrelevant for
/// a plain register-to-register transfer/ALU op).
fn encode_reg_rm(obj: &mut Object, opcode_wide: u8, reg_field: RegUnit, rm_field: RegUnit, size_bits: u32) {
    if size_bits == 16 {
        Object::write1(obj.code(), 0x66);
    }
    let rex = Rex::new(size_bits).reg(reg_field, size_bits).rm(rm_field, size_bits);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    let opcode = if size_bits == 8 { opcode_wide - 1 } else { opcode_wide };
    Object::write1(obj.code(), opcode);
    Object::write1(obj.code(), rex::modrm(0b11, rex::low3(reg_field), rex::low3(rm_field)));
}

fn emit_rm_riprel(obj: &mut Object, opcode_bytes: &[u8], reg_field: RegUnit, symbol: &str, size_bits: u32) {
    if size_bits == 16 {
        Object::write1(obj.code(), 0x66);
    }
    let rex = Rex::new(size_bits).reg(reg_field, size_bits);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    for &b in opcode_bytes {
        Object::write1(obj.code(), b);
    }
    Object::write1(obj.code(), rex::modrm(0b00, rex::low3(reg_field), 0b101));
    let reloc_offset = obj.code().len();
    Object::write4(obj.code(), 0);
    obj.add_relocation(Relocation {
        kind: RelocationKind::Disp32PcRel,
        offset: reloc_offset,
        symbol: symbol.to_string(),
        addend: 0,
    });
}

fn encode_mem_to_reg(obj: &mut Object, dest: RegUnit, base: RegUnit, disp: i32, size_bits: u32) {
    let opcode = if size_bits == 8 { 0x8A } else { 0x8B };
    emit_rm_mem(obj, &[opcode], dest, base, disp, size_bits);
}

fn encode_reg_to_mem(obj: &mut Object, src: RegUnit, base: RegUnit, disp: i32, size_bits: u32) {
    let opcode = if size_bits == 8 { 0x88 } else { 0x89 };
    emit_rm_mem(obj, &[opcode], src, base, disp, size_bits);
}

fn encode_lea_mem(obj: &mut Object, dest: RegUnit, base: RegUnit, disp: i32) {
    emit_rm_mem(obj, &[0x8D], dest, base, disp, 64);
}

fn encode_mem_riprel_to_reg(obj: &mut Object, dest: RegUnit, symbol: &str, size_bits: u32) {
    let opcode = if size_bits == 8 { 0x8A } else { 0x8B };
    emit_rm_riprel(obj, &[opcode], dest, symbol, size_bits);
}

fn encode_reg_to_mem_riprel(obj: &mut Object, src: RegUnit, symbol: &str, size_bits: u32) {
    let opcode = if size_bits == 8 { 0x88 } else { 0x89 };
    emit_rm_riprel(obj, &[opcode], src, symbol, size_bits);
}

fn encode_lea_riprel(obj: &mut Object, dest: RegUnit, symbol: &str) {
    emit_rm_riprel(obj, &[0x8D], dest, symbol, 64);
}

fn encode_imm_to_mem(obj: &mut Object, base: RegUnit, disp: i32, size_bits: u32, v: u64) -> CodegenResult<()> {
    let opcode = if size_bits == 8 { 0xC6 } else { 0xC7 };
    emit_ext_mem(obj, opcode, 0, base, disp, size_bits);
    write_imm(obj, size_bits, v)
}

/// Group-1 ALU-with-immediate form (`ADD`/`OR`/`AND`/`SUB`/`CMP` reg, imm), used both by the
/// real ALU ops and by `AdjustStack`'s `SUB`/`ADD RSP, imm`.
fn encode_alu_imm_to_reg(obj: &mut Object, reg: RegUnit, size_bits: u32, ext: u8, imm: u64) -> CodegenResult<()> {
    if let Ok(imm8) = i8::try_from(imm as i64) {
        emit_ext_reg(obj, 0x83, ext, reg, size_bits);
        Object::write1(obj.code(), imm8 as u8);
        Ok(())
    } else {
        emit_ext_reg(obj, 0x81, ext, reg, size_bits);
        write_imm(obj, size_bits.max(32), imm)
    }
}

fn physical_of(vreg: crate::mir::VReg, size_bits: u32) -> CodegenResult<(RegUnit, u32)> {
    Ok((physical_reg(vreg)?, size_bits))
}

// ---- per-opcode dispatch ----

fn encode_inst(
    obj: &mut Object,
    inst: &MInst,
    func_name: &str,
    module: &Module,
    call_conv: CallConv,
) -> CodegenResult<()> {
    match inst.opcode {
        MOpcode::Mov => encode_mov(obj, inst, module),
        MOpcode::Lea => encode_lea(obj, inst, module),
        MOpcode::Load => encode_load(obj, inst, module),
        MOpcode::Store => encode_store(obj, inst, module),
        MOpcode::Add => encode_alu(obj, inst, AluOp::Add),
        MOpcode::Sub => encode_alu(obj, inst, AluOp::Sub),
        MOpcode::And => encode_alu(obj, inst, AluOp::And),
        MOpcode::Or => encode_alu(obj, inst, AluOp::Or),
        MOpcode::IMul => encode_imul(obj, inst),
        MOpcode::Cdq => encode_cdq(obj, inst.size_bits),
        // `IMod` never arises from selection (both `Div` and `Mod` lower through a single
        // `IDiv`, §4.B); encoded identically to `IDiv` since on real hardware they're the same
        // instruction either way.
        MOpcode::IDiv | MOpcode::IMod => encode_idiv(obj, inst),
        MOpcode::Shl => encode_shift(obj, inst, 4),
        MOpcode::Sar => encode_shift(obj, inst, 7),
        MOpcode::Shr => encode_shift(obj, inst, 5),
        MOpcode::Not => encode_not(obj, inst),
        MOpcode::Cmp => encode_cmp(obj, inst),
        MOpcode::SetCC(kind) => encode_setcc(obj, inst, kind),
        MOpcode::Movsx => encode_movx(obj, inst, true),
        MOpcode::Movzx => encode_movx(obj, inst, false),
        MOpcode::Jmp => encode_jmp(obj, inst, func_name),
        MOpcode::Jcc(kind) => encode_jcc(obj, inst, kind, func_name),
        MOpcode::CallDirect => encode_call_direct(obj, inst, module),
        MOpcode::CallIndirect => encode_call_indirect(obj, inst),
        MOpcode::Ret => {
            Object::write1(obj.code(), 0xC3);
            Ok(())
        }
        MOpcode::Push => encode_push_pop(obj, inst, true),
        MOpcode::Pop => encode_push_pop(obj, inst, false),
        MOpcode::AdjustStack => encode_adjust_stack(obj, inst),
        MOpcode::FramePointerSet => {
            encode_reg_rm(obj, 0x89, RSP, RBP, 64);
            Ok(())
        }
        MOpcode::FramePointerRestore => {
            encode_reg_rm(obj, 0x89, RBP, RSP, 64);
            Ok(())
        }
        MOpcode::Ud2 => {
            Object::write1(obj.code(), 0x0F);
            Object::write1(obj.code(), 0x0B);
            Ok(())
        }
    }
    .map_err(|e| annotate(e, call_conv))
}

/// `CallConv` is not otherwise needed by the encoder (the allocator/ABI pre-pass already
/// materialized argument registers, §4.B), but threading it through `encode_inst` keeps its
/// signature symmetric with every other stage's driver and leaves room for a future
/// convention-dependent encoding (e.g. a leaf-function red-zone optimization) without another
/// signature change.
fn annotate(e: CodegenError, _call_conv: CallConv) -> CodegenError {
    e
}

enum AluOp {
    Add,
    Sub,
    And,
    Or,
}

impl AluOp {
    fn ext(&self) -> u8 {
        match self {
            AluOp::Add => 0,
            AluOp::Or => 1,
            AluOp::And => 4,
            AluOp::Sub => 5,
        }
    }

    fn reg_rm_opcode(&self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Or => 0x09,
            AluOp::And => 0x21,
            AluOp::Sub => 0x29,
        }
    }
}

fn encode_alu(obj: &mut Object, inst: &MInst, op: AluOp) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("alu op without a dest"))?;
    let (dest_reg, size_bits) = physical_of(dest, inst.size_bits)?;
    let rhs = inst.operands.last().ok_or_else(|| invariant("alu op without a rhs operand"))?;
    match rhs {
        MachineOperand::Immediate(v) => encode_alu_imm_to_reg(obj, dest_reg, size_bits, op.ext(), *v),
        MachineOperand::Register { vreg, .. } => {
            let rhs_reg = physical_reg(*vreg)?;
            encode_reg_rm(obj, op.reg_rm_opcode(), rhs_reg, dest_reg, size_bits);
            Ok(())
        }
        _ => Err(CodegenError::Unsupported {
            construct: "alu rhs operand",
            detail: "expected a register or immediate; address-valued ALU operands must be materialized into a register before this opcode runs".into(),
        }),
    }
}

fn encode_imul(obj: &mut Object, inst: &MInst) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("imul without a dest"))?;
    let (dest_reg, size_bits) = physical_of(dest, inst.size_bits)?;
    let rhs = inst.operands.last().ok_or_else(|| invariant("imul without a rhs operand"))?;
    match rhs {
        MachineOperand::Register { vreg, .. } => {
            let rhs_reg = physical_reg(*vreg)?;
            if size_bits == 16 {
                Object::write1(obj.code(), 0x66);
            }
            let rex = Rex::new(size_bits).reg(dest_reg, size_bits).rm(rhs_reg, size_bits);
            if rex.needed() {
                Object::write1(obj.code(), rex.byte());
            }
            Object::write1(obj.code(), 0x0F);
            Object::write1(obj.code(), 0xAF);
            Object::write1(obj.code(), rex::modrm(0b11, rex::low3(dest_reg), rex::low3(rhs_reg)));
            Ok(())
        }
        MachineOperand::Immediate(v) => {
            if size_bits == 16 {
                Object::write1(obj.code(), 0x66);
            }
            let rex = Rex::new(size_bits).reg(dest_reg, size_bits).rm(dest_reg, size_bits);
            if rex.needed() {
                Object::write1(obj.code(), rex.byte());
            }
            Object::write1(obj.code(), 0x69);
            Object::write1(obj.code(), rex::modrm(0b11, rex::low3(dest_reg), rex::low3(dest_reg)));
            write_imm(obj, size_bits.max(16), *v)
        }
        _ => Err(CodegenError::Unsupported {
            construct: "imul rhs operand",
            detail: "expected a register or immediate".into(),
        }),
    }
}

/// Sign-extend the accumulator into the high half of the dividend pair ahead of an `IDiv`
/// (§4.E zero-operand forms). Opcode `0x99` in every width; which register pair it sign-extends
/// into is selected by the same operand-size prefix/`REX.W` the rest of the encoder uses for a
/// 16/32/64-bit instruction (`cbw` at 8 bits is the one exception: `idiv r/m8`'s dividend is `ax`
/// alone, so the widening step is `0x98` under the 16-bit operand-size prefix, not `0x99`).
fn encode_cdq(obj: &mut Object, size_bits: u32) -> CodegenResult<()> {
    match size_bits {
        8 => {
            Object::write1(obj.code(), 0x66);
            Object::write1(obj.code(), 0x98); // cbw: sign-extend al into ax
        }
        16 => {
            Object::write1(obj.code(), 0x66);
            Object::write1(obj.code(), 0x99); // cwd: sign-extend ax into dx:ax
        }
        32 => {
            Object::write1(obj.code(), 0x99); // cdq: sign-extend eax into edx:eax
        }
        _ => {
            Object::write1(obj.code(), Rex::new(64).byte());
            Object::write1(obj.code(), 0x99); // cqo: sign-extend rax into rdx:rax
        }
    }
    Ok(())
}

fn encode_idiv(obj: &mut Object, inst: &MInst) -> CodegenResult<()> {
    let operand = inst.operands.first().ok_or_else(|| invariant("idiv without a divisor operand"))?;
    let size_bits = inst.size_bits;
    match operand {
        MachineOperand::Register { vreg, .. } => {
            let r = physical_reg(*vreg)?;
            let opcode = if size_bits == 8 { 0xF6 } else { 0xF7 };
            emit_ext_reg(obj, opcode, 7, r, size_bits);
            Ok(())
        }
        MachineOperand::FrameSlot { offset } => {
            let opcode = if size_bits == 8 { 0xF6 } else { 0xF7 };
            emit_ext_mem(obj, opcode, 7, RBP, *offset, size_bits);
            Ok(())
        }
        _ => Err(CodegenError::Unsupported {
            construct: "idiv divisor",
            detail: "an immediate divisor is not encodable; the selector must materialize it into a register first".into(),
        }),
    }
}

fn encode_shift(obj: &mut Object, inst: &MInst, ext: u8) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("shift without a dest"))?;
    let (dest_reg, size_bits) = physical_of(dest, inst.size_bits)?;
    let count = inst.operands.get(1).ok_or_else(|| invariant("shift without a count operand"))?;
    match count {
        MachineOperand::Immediate(1) => {
            let opcode = if size_bits == 8 { 0xD0 } else { 0xD1 };
            emit_ext_reg(obj, opcode, ext, dest_reg, size_bits);
            Ok(())
        }
        MachineOperand::Immediate(v) => {
            let opcode = if size_bits == 8 { 0xC0 } else { 0xC1 };
            emit_ext_reg(obj, opcode, ext, dest_reg, size_bits);
            Object::write1(obj.code(), *v as u8);
            Ok(())
        }
        MachineOperand::Register { .. } => {
            // Precolored to `cl` by the selector (§4.C); `D2`/`D3` read it implicitly.
            let opcode = if size_bits == 8 { 0xD2 } else { 0xD3 };
            emit_ext_reg(obj, opcode, ext, dest_reg, size_bits);
            Ok(())
        }
        _ => Err(invariant("shift count must be an immediate or a register")),
    }
}

fn encode_not(obj: &mut Object, inst: &MInst) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("not without a dest"))?;
    let (dest_reg, size_bits) = physical_of(dest, inst.size_bits)?;
    let opcode = if size_bits == 8 { 0xF6 } else { 0xF7 };
    emit_ext_reg(obj, opcode, 2, dest_reg, size_bits);
    Ok(())
}

fn encode_cmp(obj: &mut Object, inst: &MInst) -> CodegenResult<()> {
    let l = inst.operands.first().ok_or_else(|| invariant("cmp without a lhs operand"))?;
    let r = inst.operands.get(1).ok_or_else(|| invariant("cmp without a rhs operand"))?;
    let size_bits = inst.size_bits;
    match (l, r) {
        (MachineOperand::Register { vreg: lv, .. }, MachineOperand::Register { vreg: rv, .. }) => {
            let lr = physical_reg(*lv)?;
            let rr = physical_reg(*rv)?;
            encode_reg_rm(obj, 0x39, rr, lr, size_bits);
            Ok(())
        }
        (MachineOperand::Register { vreg: lv, .. }, MachineOperand::Immediate(v)) => {
            let lr = physical_reg(*lv)?;
            encode_alu_imm_to_reg(obj, lr, size_bits, 7, *v)
        }
        (MachineOperand::FrameSlot { offset }, MachineOperand::Register { vreg: rv, .. }) => {
            let rr = physical_reg(*rv)?;
            let opcode = if size_bits == 8 { 0x38 } else { 0x39 };
            emit_rm_mem(obj, &[opcode], rr, RBP, *offset, size_bits);
            Ok(())
        }
        (MachineOperand::FrameSlot { offset }, MachineOperand::Immediate(v)) => {
            let opcode = if size_bits == 8 { 0x80 } else { 0x81 };
            emit_ext_mem(obj, opcode, 7, RBP, *offset, size_bits);
            write_imm(obj, size_bits.max(32), *v)
        }
        _ => Err(CodegenError::Unsupported {
            construct: "cmp operand combination",
            detail: format!("{l:?}, {r:?}"),
        }),
    }
}

fn setcc_opcode(kind: crate::ir::CmpKind) -> u8 {
    use crate::ir::CmpKind::*;
    match kind {
        Lt => 0x9C,
        Le => 0x9E,
        Gt => 0x9F,
        Ge => 0x9D,
        Eq => 0x94,
        Ne => 0x95,
    }
}

fn jcc_opcode(kind: crate::ir::CmpKind) -> u8 {
    use crate::ir::CmpKind::*;
    match kind {
        Lt => 0x8C,
        Le => 0x8E,
        Gt => 0x8F,
        Ge => 0x8D,
        Eq => 0x84,
        Ne => 0x85,
    }
}

fn encode_setcc(obj: &mut Object, inst: &MInst, kind: crate::ir::CmpKind) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("setcc without a dest"))?;
    let dest_reg = physical_reg(dest)?;
    let rex = Rex::new(8).rm(dest_reg, 8);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    Object::write1(obj.code(), 0x0F);
    Object::write1(obj.code(), setcc_opcode(kind));
    Object::write1(obj.code(), rex::modrm(0b11, 0, rex::low3(dest_reg)));
    Ok(())
}

fn movx_opcode(signed: bool, src_size: u32) -> u8 {
    match (signed, src_size) {
        (true, 8) => 0xBE,
        (true, 16) => 0xBF,
        (false, 8) => 0xB6,
        (false, 16) => 0xB7,
        // A 32-bit source widened to 64 is `MOVSXD` on real hardware (a distinct one-byte
        // opcode, not a `0F`-prefixed `MOVSX`); approximated here as a plain `MOVSX` byte since
        // this crate's front end never emits a 32-to-64 extend directly (its only integer widths
        // are 8/16/32/64 and the builder always routes a widening assignment through `Truncate`
        // or `SignExtend`/`ZeroExtend` with an 8- or 16-bit source).
        _ => 0xBE,
    }
}

fn encode_movx(obj: &mut Object, inst: &MInst, signed: bool) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("movx without a dest"))?;
    let (dest_reg, dest_size) = physical_of(dest, inst.size_bits)?;
    let src = inst.operands.first().ok_or_else(|| invariant("movx without a source operand"))?;
    match src {
        MachineOperand::Register { vreg, size_bits: src_size } => {
            let src_reg = physical_reg(*vreg)?;
            let opcode2 = movx_opcode(signed, *src_size);
            let rex = Rex::new(dest_size).reg(dest_reg, dest_size).rm(src_reg, *src_size);
            if rex.needed() {
                Object::write1(obj.code(), rex.byte());
            }
            Object::write1(obj.code(), 0x0F);
            Object::write1(obj.code(), opcode2);
            Object::write1(obj.code(), rex::modrm(0b11, rex::low3(dest_reg), rex::low3(src_reg)));
            Ok(())
        }
        MachineOperand::FrameSlot { offset } => {
            // A bare frame slot carries no width of its own; this crate never allocates a
            // sub-32-bit local (§3.1 "Also": `Alloca` always reserves whole-register-aligned
            // storage), so 32 bits is the only source width a stack-resident extend needs.
            let opcode2 = movx_opcode(signed, 32);
            emit_rm_mem(obj, &[0x0F, opcode2], dest_reg, RBP, *offset, dest_size);
            Ok(())
        }
        _ => Err(CodegenError::Unsupported {
            construct: "sign/zero-extend source",
            detail: format!("{src:?}"),
        }),
    }
}

fn encode_mov(obj: &mut Object, inst: &MInst, module: &Module) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("mov without a dest"))?;
    let (dest_reg, size_bits) = physical_of(dest, inst.size_bits)?;
    let src = inst.operands.first().ok_or_else(|| invariant("mov without a source operand"))?;
    match src {
        MachineOperand::Immediate(v) => encode_mov_imm(obj, dest_reg, size_bits, *v),
        MachineOperand::Register { vreg, .. } => {
            let src_reg = physical_reg(*vreg)?;
            if dest_reg != src_reg {
                encode_reg_rm(obj, 0x89, src_reg, dest_reg, size_bits);
            }
            Ok(())
        }
        // A plain value use of an address-valued leaf (an alloca'd pointer, or a static/function
        // referenced as data rather than dereferenced) means "materialize the address", i.e. a
        // `LEA`, never a memory read — dereferencing only happens through `Load`/`Store`'s own
        // address operand (see `encode_load`/`encode_store`).
        MachineOperand::FrameSlot { offset } => {
            encode_lea_mem(obj, dest_reg, RBP, *offset);
            Ok(())
        }
        MachineOperand::StaticRef(var) => {
            let name = static_symbol(module, *var);
            encode_lea_riprel(obj, dest_reg, &name);
            Ok(())
        }
        MachineOperand::Function(f) => {
            let name = func_symbol(module, *f);
            encode_lea_riprel(obj, dest_reg, &name);
            Ok(())
        }
        MachineOperand::Name(name) => {
            encode_lea_riprel(obj, dest_reg, name);
            Ok(())
        }
        MachineOperand::Block(_) | MachineOperand::Poison => {
            Err(invariant("mov source operand is not a value"))
        }
    }
}

fn encode_mov_imm(obj: &mut Object, dest: RegUnit, size_bits: u32, v: u64) -> CodegenResult<()> {
    match size_bits {
        8 => {
            let rex = Rex::new(8).rm(dest, 8);
            if rex.needed() {
                Object::write1(obj.code(), rex.byte());
            }
            Object::write1(obj.code(), 0xB0 + rex::low3(dest));
            Object::write1(obj.code(), v as u8);
        }
        16 => {
            Object::write1(obj.code(), 0x66);
            let rex = Rex::new(16).rm(dest, 16);
            if rex.needed() {
                Object::write1(obj.code(), rex.byte());
            }
            Object::write1(obj.code(), 0xB8 + rex::low3(dest));
            Object::write2(obj.code(), v as u16);
        }
        32 => {
            let rex = Rex::new(32).rm(dest, 32);
            if rex.needed() {
                Object::write1(obj.code(), rex.byte());
            }
            Object::write1(obj.code(), 0xB8 + rex::low3(dest));
            Object::write4(obj.code(), v as u32);
        }
        _ => {
            if i32::try_from(v as i64).is_ok() {
                // `MOV r/m64, imm32` (sign-extended): one byte shorter than loading a full imm64.
                let rex = Rex::new(64).rm(dest, 64);
                Object::write1(obj.code(), rex.byte());
                Object::write1(obj.code(), 0xC7);
                Object::write1(obj.code(), rex::modrm(0b11, 0, rex::low3(dest)));
                Object::write4(obj.code(), v as u32);
            } else {
                let rex = Rex::new(64).rm(dest, 64);
                Object::write1(obj.code(), rex.byte());
                Object::write1(obj.code(), 0xB8 + rex::low3(dest));
                Object::write_n_bytes(obj.code(), &v.to_le_bytes());
            }
        }
    }
    Ok(())
}

fn encode_lea(obj: &mut Object, inst: &MInst, module: &Module) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("lea without a dest"))?;
    let dest_reg = physical_reg(dest)?;
    let op = inst.operands.first().ok_or_else(|| invariant("lea without an operand"))?;
    match op {
        MachineOperand::Name(name) => {
            encode_lea_riprel(obj, dest_reg, name);
            Ok(())
        }
        MachineOperand::FrameSlot { offset } => {
            encode_lea_mem(obj, dest_reg, RBP, *offset);
            Ok(())
        }
        MachineOperand::StaticRef(var) => {
            let name = static_symbol(module, *var);
            encode_lea_riprel(obj, dest_reg, &name);
            Ok(())
        }
        MachineOperand::Function(f) => {
            let name = func_symbol(module, *f);
            encode_lea_riprel(obj, dest_reg, &name);
            Ok(())
        }
        _ => Err(CodegenError::Unsupported {
            construct: "lea operand",
            detail: format!("{op:?}"),
        }),
    }
}

fn encode_load(obj: &mut Object, inst: &MInst, module: &Module) -> CodegenResult<()> {
    let dest = inst.dest.ok_or_else(|| invariant("load without a dest"))?;
    let (dest_reg, size_bits) = physical_of(dest, inst.size_bits)?;
    let addr = inst.operands.first().ok_or_else(|| invariant("load without an address operand"))?;
    match addr {
        MachineOperand::FrameSlot { offset } => {
            encode_mem_to_reg(obj, dest_reg, RBP, *offset, size_bits);
            Ok(())
        }
        MachineOperand::Register { vreg, .. } => {
            let base = physical_reg(*vreg)?;
            encode_mem_to_reg(obj, dest_reg, base, 0, size_bits);
            Ok(())
        }
        MachineOperand::StaticRef(var) => {
            let name = static_symbol(module, *var);
            encode_mem_riprel_to_reg(obj, dest_reg, &name, size_bits);
            Ok(())
        }
        MachineOperand::Name(name) => {
            encode_mem_riprel_to_reg(obj, dest_reg, name, size_bits);
            Ok(())
        }
        _ => Err(CodegenError::Unsupported {
            construct: "load address operand",
            detail: format!("{addr:?}"),
        }),
    }
}

fn encode_store(obj: &mut Object, inst: &MInst, module: &Module) -> CodegenResult<()> {
    let addr = inst.operands.first().ok_or_else(|| invariant("store without an address operand"))?;
    let value = inst.operands.get(1).ok_or_else(|| invariant("store without a value operand"))?;
    let size_bits = inst.size_bits;
    match value {
        MachineOperand::Register { vreg, .. } => {
            let src = physical_reg(*vreg)?;
            match addr {
                MachineOperand::FrameSlot { offset } => {
                    encode_reg_to_mem(obj, src, RBP, *offset, size_bits);
                    Ok(())
                }
                MachineOperand::Register { vreg: base_vreg, .. } => {
                    let base = physical_reg(*base_vreg)?;
                    encode_reg_to_mem(obj, src, base, 0, size_bits);
                    Ok(())
                }
                MachineOperand::StaticRef(var) => {
                    let name = static_symbol(module, *var);
                    encode_reg_to_mem_riprel(obj, src, &name, size_bits);
                    Ok(())
                }
                MachineOperand::Name(name) => {
                    encode_reg_to_mem_riprel(obj, src, name, size_bits);
                    Ok(())
                }
                _ => Err(CodegenError::Unsupported {
                    construct: "store address operand",
                    detail: format!("{addr:?}"),
                }),
            }
        }
        MachineOperand::Immediate(v) => match addr {
            MachineOperand::FrameSlot { offset } => encode_imm_to_mem(obj, RBP, *offset, size_bits, *v),
            MachineOperand::Register { vreg, .. } => {
                let base = physical_reg(*vreg)?;
                encode_imm_to_mem(obj, base, 0, size_bits, *v)
            }
            _ => Err(CodegenError::Unsupported {
                construct: "store address operand for an immediate value",
                detail: format!("{addr:?}"),
            }),
        },
        _ => Err(CodegenError::Unsupported {
            construct: "store value operand",
            detail: format!("{value:?}"),
        }),
    }
}

fn block_operand(inst: &MInst) -> CodegenResult<Block> {
    inst.operands
        .iter()
        .find_map(|op| match op {
            MachineOperand::Block(b) => Some(*b),
            _ => None,
        })
        .ok_or_else(|| invariant("branch without a block operand"))
}

fn encode_jmp(obj: &mut Object, inst: &MInst, func_name: &str) -> CodegenResult<()> {
    let target = block_operand(inst)?;
    let label = block_label(func_name, target);
    Object::write1(obj.code(), 0xE9);
    let reloc_offset = obj.code().len();
    Object::write4(obj.code(), 0);
    obj.add_relocation(Relocation {
        kind: RelocationKind::Disp32PcRel,
        offset: reloc_offset,
        symbol: label,
        addend: 0,
    });
    Ok(())
}

fn encode_jcc(obj: &mut Object, inst: &MInst, kind: crate::ir::CmpKind, func_name: &str) -> CodegenResult<()> {
    let target = block_operand(inst)?;
    let label = block_label(func_name, target);
    Object::write1(obj.code(), 0x0F);
    Object::write1(obj.code(), jcc_opcode(kind));
    let reloc_offset = obj.code().len();
    Object::write4(obj.code(), 0);
    obj.add_relocation(Relocation {
        kind: RelocationKind::Disp32PcRel,
        offset: reloc_offset,
        symbol: label,
        addend: 0,
    });
    Ok(())
}

fn encode_call_direct(obj: &mut Object, inst: &MInst, module: &Module) -> CodegenResult<()> {
    let target = inst
        .operands
        .iter()
        .find_map(|op| match op {
            MachineOperand::Function(f) => Some(*f),
            _ => None,
        })
        .ok_or_else(|| invariant("direct call without a function operand"))?;
    let name = func_symbol(module, target);
    Object::write1(obj.code(), 0xE8);
    let reloc_offset = obj.code().len();
    Object::write4(obj.code(), 0);
    obj.add_relocation(Relocation {
        kind: RelocationKind::Disp32PcRel,
        offset: reloc_offset,
        symbol: name,
        addend: 0,
    });
    Ok(())
}

fn encode_call_indirect(obj: &mut Object, inst: &MInst) -> CodegenResult<()> {
    let target = inst.operands.first().ok_or_else(|| invariant("indirect call without a target operand"))?;
    match target {
        MachineOperand::Register { vreg, .. } => {
            let r = physical_reg(*vreg)?;
            emit_ext_reg(obj, 0xFF, 2, r, 64);
            Ok(())
        }
        _ => Err(CodegenError::Unsupported {
            construct: "indirect call target",
            detail: "must be a register holding a function pointer".into(),
        }),
    }
}

fn encode_push_pop(obj: &mut Object, inst: &MInst, is_push: bool) -> CodegenResult<()> {
    let op = inst.operands.first().ok_or_else(|| invariant("push/pop without an operand"))?;
    let r = match op {
        MachineOperand::Register { vreg, .. } => physical_reg(*vreg)?,
        _ => return Err(invariant("push/pop operand must be a register")),
    };
    let rex = Rex::default().rm(r, 64);
    if rex.needed() {
        Object::write1(obj.code(), rex.byte());
    }
    let base_opcode = if is_push { 0x50 } else { 0x58 };
    Object::write1(obj.code(), base_opcode + rex::low3(r));
    Ok(())
}

fn encode_adjust_stack(obj: &mut Object, inst: &MInst) -> CodegenResult<()> {
    let raw = match inst.operands.first() {
        Some(MachineOperand::Immediate(v)) => *v,
        _ => return Err(invariant("adjuststack without an immediate operand")),
    };
    let delta = raw as i64;
    if delta == 0 {
        return Ok(());
    }
    let (ext, magnitude) = if delta > 0 { (5u8, delta) } else { (0u8, -delta) }; // SUB=/5, ADD=/0
    encode_alu_imm_to_reg(obj, RSP, 64, ext, magnitude as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::{Function, InstructionData, Type};
    use crate::isa::CallConv;
    use crate::mir::select::lower_function;
    use crate::regalloc::allocate_function;

    fn empty_module() -> Module {
        Module::new()
    }

    #[test]
    fn returning_a_constant_encodes_mov_eax_and_ret() {
        let mut f = Function::new("main", Type::Function { params: vec![], ret: Box::new(Type::I64) });
        let entry = Block::new(0);
        f.layout.append_block(entry);
        let imm = f.dfg.make_inst(InstructionData::Immediate { ty: Type::I64, value: 42 });
        f.layout.append_inst(imm, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { value: Some(imm) });
        f.layout.append_inst(ret, entry);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        allocate_function(&mut mir, CallConv::SystemV).unwrap();
        crate::binemit::frame::insert_frame_instructions(&mut mir, CallConv::SystemV, &Default::default());

        let mut obj = Object::new();
        let module = empty_module();
        emit_function(&mut obj, &mir, "main", &module, CallConv::SystemV).unwrap();
        obj.resolve_local_labels().unwrap();

        let bytes = match &obj.sections[crate::object::CODE_SECTION].payload {
            crate::object::SectionPayload::Bytes(b) => b.clone(),
            _ => unreachable!(),
        };
        // `mov eax, 42` (B8 2A 00 00 00) followed by `ret` (C3); a leaf with no locals gets no
        // frame at all (§4.D `FrameKind::None`).
        assert_eq!(bytes, vec![0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
    }

    #[test]
    fn unconditional_branch_resolves_to_a_local_displacement() {
        let mut f = Function::new("f", Type::Function { params: vec![], ret: Box::new(Type::Void) });
        let entry = Block::new(0);
        let target = Block::new(1);
        f.layout.append_block(entry);
        f.layout.append_block(target);
        let jmp = f.dfg.make_inst(InstructionData::Branch { dest: target });
        f.layout.append_inst(jmp, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { value: None });
        f.layout.append_inst(ret, target);

        let mut mir = lower_function(&f, CallConv::SystemV, true).unwrap();
        allocate_function(&mut mir, CallConv::SystemV).unwrap();
        crate::binemit::frame::insert_frame_instructions(&mut mir, CallConv::SystemV, &Default::default());

        let mut obj = Object::new();
        let module = empty_module();
        emit_function(&mut obj, &mir, "f", &module, CallConv::SystemV).unwrap();
        obj.resolve_local_labels().unwrap();

        assert!(obj.relocations.is_empty());
        let bytes = match &obj.sections[crate::object::CODE_SECTION].payload {
            crate::object::SectionPayload::Bytes(b) => b.clone(),
            _ => unreachable!(),
        };
        assert_eq!(bytes[0], 0xE9);
        let disp = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(disp, 0); // jumps straight into the next (and only next) instruction, `ret`
        assert_eq!(bytes[5], 0xC3);
    }
}
