//! ModR/M, SIB and REX prefix primitives (§4.E).
//!
//! Grounded on the same bit layout `cranelift-assembler-x64`'s `rex.rs` packs, but reshaped into
//! a small fluent builder (`Rex::reg`/`rm`/`index`/`base`) that matches how this crate's encoder
//! visits operands one at a time, rather than that crate's whole-instruction `RexFlags` struct.
//! This module only knows how to pack/unpack three bytes; it never decides which opcode precedes
//! them.

use crate::isa::x86::registers::RegUnit;

/// Pack a ModR/M byte: `mode` (2 bits), `reg` (3 bits, a register or a sub-opcode extension),
/// `rm` (3 bits, a register or the start of a memory form).
pub fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode & 0b11) << 6 | (reg & 0b111) << 3 | (rm & 0b111)
}

/// Pack a SIB byte: `scale` (2 bits, log2 of 1/2/4/8), `index`, `base`.
pub fn sib(scale: u8, index: u8, base: u8) -> u8 {
    (scale & 0b11) << 6 | (index & 0b111) << 3 | (base & 0b111)
}

/// The low 3 bits of a register number, as they appear in a ModR/M `reg`/`rm` field or a SIB
/// `index`/`base` field; the 4th bit travels separately, in `REX.R`/`REX.X`/`REX.B`.
pub fn low3(r: RegUnit) -> u8 {
    r & 0b111
}

fn high_bit(r: RegUnit) -> bool {
    r >= 8
}

/// REX prefix flags, accumulated as an instruction's operands are visited and emitted (or
/// elided) once the whole instruction is known.
#[derive(Clone, Copy, Default)]
pub struct Rex {
    w: bool,
    r: bool,
    x: bool,
    b: bool,
    /// Forced on when an 8-bit operand names `rsp`, `rbp`, `rsi` or `rdi`, which would otherwise
    /// be read as `ah`/`ch`/`dh`/`bh` — the REX trigger `needs_rex_extension` explicitly does not
    /// cover (§4.E "REX encoding rule", `registers::needs_rex_extension` doc comment).
    force: bool,
}

impl Rex {
    /// Start from an operand size: 64-bit operands always need `REX.W`.
    pub fn new(size_bits: u32) -> Self {
        Rex {
            w: size_bits == 64,
            ..Rex::default()
        }
    }

    /// Record a register occupying the ModR/M `reg` field.
    pub fn reg(mut self, r: RegUnit, size_bits: u32) -> Self {
        self.r = high_bit(r);
        self.note_low_byte(r, size_bits);
        self
    }

    /// Record a register occupying the ModR/M `rm` field, or a bare register-direct operand.
    pub fn rm(mut self, r: RegUnit, size_bits: u32) -> Self {
        self.b = high_bit(r);
        self.note_low_byte(r, size_bits);
        self
    }

    /// Record a register occupying the SIB `index` field.
    pub fn index(mut self, r: RegUnit) -> Self {
        self.x = high_bit(r);
        self
    }

    /// Record a register occupying the SIB `base` field (also the ModR/M `rm`-as-memory-base).
    pub fn base(mut self, r: RegUnit) -> Self {
        self.b = high_bit(r);
        self
    }

    fn note_low_byte(&mut self, r: RegUnit, size_bits: u32) {
        if size_bits == 8 && (4..=7).contains(&r) {
            self.force = true;
        }
    }

    /// Whether a REX prefix byte must actually be emitted.
    pub fn needed(&self) -> bool {
        self.w || self.r || self.x || self.b || self.force
    }

    /// The prefix byte itself, `0100WRXB`.
    pub fn byte(&self) -> u8 {
        0x40 | (self.w as u8) << 3 | (self.r as u8) << 2 | (self.x as u8) << 1 | (self.b as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x86::registers::{RAX, RBP, RDI, R8};

    #[test]
    fn sixty_four_bit_operand_always_needs_w() {
        assert!(Rex::new(64).needed());
        assert!(!Rex::new(32).needed());
    }

    #[test]
    fn extended_register_needs_rex_even_at_32_bits() {
        assert!(Rex::new(32).rm(R8, 32).needed());
        assert!(!Rex::new(32).rm(RAX, 32).needed());
    }

    #[test]
    fn eight_bit_rdi_forces_rex_to_disambiguate_from_dh() {
        assert!(Rex::new(8).rm(RDI, 8).needed());
        assert!(!Rex::new(8).rm(RAX, 8).needed());
    }

    #[test]
    fn eight_bit_rbp_forces_rex_too() {
        assert!(Rex::new(8).reg(RBP, 8).needed());
    }

    #[test]
    fn modrm_packs_fields_into_expected_bit_positions() {
        assert_eq!(modrm(0b11, 0b010, 0b101), 0b11_010_101);
        assert_eq!(sib(0b01, 0b100, 0b011), 0b01_100_011);
    }
}
