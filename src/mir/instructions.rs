//! Target-specific machine instructions: the selector's output and the allocator/encoder's input
//! (§4.B, §4.C, §4.E).

use crate::ir::{Block, CmpKind, FuncId, StaticVar};
use crate::mir::entities::VReg;
use smallvec::SmallVec;

/// A machine opcode. Generic opcodes (`Copy`, `LoadImm`, ...) are target-independent shapes every
/// ISA back end would need; everything below the `-- x86-64 --` marker is specific to this
/// crate's single supported target and mirrors the encoder forms of §4.E directly, so selection
/// and encoding agree on vocabulary.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MOpcode {
    /// Move between two registers, or materialize an immediate/address into one. Degenerates to
    /// a no-op once the allocator colors both sides to the same physical register (an identity
    /// copy is simply never encoded, §4.D note on coalescing left to the allocator, §B).
    Mov,
    /// Load the address of a frame slot, static, or function into a register (`LEA`).
    Lea,
    /// Load from memory into a register.
    Load,
    /// Store a register (or immediate) to memory.
    Store,

    Add,
    Sub,
    IMul,
    /// Sign-extend the accumulator into the high half of the dividend pair ahead of an `IDiv`
    /// (`cbw`/`cwd`/`cdq`/`cqo` depending on operand width, §4.E zero-operand forms). Always
    /// emitted immediately before the `IDiv`/`IMod` it feeds; without it `rdx` holds whatever the
    /// allocator last left there instead of the dividend's sign.
    Cdq,
    /// Signed divide; clobbers `rdx` in addition to `rax` and reads both as the 128-bit dividend
    /// (§4.C precoloring: `DIV`/`MOD` clobber `rax`/`rdx`).
    IDiv,
    /// Signed remainder; same clobbers as `IDiv`, result taken from `rdx`.
    IMod,
    Shl,
    /// Arithmetic (sign-preserving) right shift.
    Sar,
    /// Logical (zero-filling) right shift.
    Shr,
    And,
    Or,
    Not,

    /// Compare two operands, setting flags; always immediately followed by a `SetCC`/`Jcc`.
    Cmp,
    /// Materialize a comparison's flags as a 0/1 byte in a register.
    SetCC(CmpKind),

    /// Sign-extend.
    Movsx,
    /// Zero-extend.
    Movzx,

    /// Unconditional jump to an MIR block.
    Jmp,
    /// Conditional jump to an MIR block, falling through otherwise.
    Jcc(CmpKind),

    /// Call a statically known function by name.
    CallDirect,
    /// Call through a register holding a function pointer.
    CallIndirect,
    Ret,

    /// Save/restore a callee-saved register across the function body (§4.D prologue/epilogue).
    Push,
    Pop,

    /// Reserve/release frame space (`SUB`/`ADD RSP`, §4.D).
    AdjustStack,
    /// Maintain the Full-frame base pointer (`MOV RSP,RBP` / `MOV RBP,RSP`, §4.D).
    FramePointerSet,
    FramePointerRestore,

    /// Traps; emitted for constructs that are reachable only because the verifier is disabled,
    /// never by normal lowering.
    Ud2,
}

/// An operand of an `MInst`. Unlike the IR's `Inst`-doubles-as-value model, a `MachineOperand` is
/// a flat tagged union: by the time MIR exists, "what kind of thing is this" has already been
/// decided by the selector and the encoder needs no further graph traversal to emit it.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineOperand {
    /// An immediate constant.
    Immediate(u64),
    /// A register (physical after allocation, virtual before).
    Register { vreg: VReg, size_bits: u32 },
    /// A frame-relative memory operand: `[rbp - offset]` once the frame layout is final.
    FrameSlot { offset: i32 },
    /// An MIR block, as a branch target.
    Block(Block),
    /// A module function, as a direct call/LEA target.
    Function(FuncId),
    /// A module static variable, as a data-section reference.
    StaticRef(StaticVar),
    /// An external symbol referenced only by name (e.g. a `printf@plt` call target); has no
    /// definition in this module's `Function`/`StaticVar` tables.
    Name(String),
    /// A placeholder for an operand the selector intentionally left unfilled (e.g. the unused
    /// second operand of a unary op); the encoder must never observe one.
    Poison,
}

/// A single machine instruction.
#[derive(Clone, Debug)]
pub struct MInst {
    pub opcode: MOpcode,
    /// The register this instruction defines, if any.
    pub dest: Option<VReg>,
    /// Up to three operands inline; wider operand lists (rare; `CallDirect`/`CallIndirect`
    /// leave their argument registers implicit since they're already-colored physical `Mov`s
    /// emitted before the call, not operands *of* the call) spill to the heap via `SmallVec`.
    pub operands: SmallVec<[MachineOperand; 3]>,
    /// Source width in bits, used by the encoder to pick the REX.W / operand-size prefix.
    pub size_bits: u32,
}

impl MInst {
    pub fn new(opcode: MOpcode, size_bits: u32) -> Self {
        MInst {
            opcode,
            dest: None,
            operands: SmallVec::new(),
            size_bits,
        }
    }

    pub fn with_dest(mut self, dest: VReg) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn with_operand(mut self, op: MachineOperand) -> Self {
        self.operands.push(op);
        self
    }

    /// Every register this instruction reads, for liveness (§4.C). `dest` is excluded; a
    /// register that is both read and written (none currently are, since every x86-64 form this
    /// selector emits is two-address only at the encoding layer, resolved by the `Mov` the
    /// selector inserts ahead of an in-place op) would need to appear in both `reads` and as
    /// `dest`.
    pub fn reads(&self) -> impl Iterator<Item = VReg> + '_ {
        self.operands.iter().filter_map(|op| match op {
            MachineOperand::Register { vreg, .. } => Some(*vreg),
            _ => None,
        })
    }
}
