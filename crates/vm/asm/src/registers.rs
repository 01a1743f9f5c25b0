//! Register, condition and scale identifiers.

use serde::Serialize;

/// General purpose registers, numbered as in the instruction encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterId {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl RegisterId {
    pub const ALL: [RegisterId; 16] = [
        RegisterId::Rax,
        RegisterId::Rcx,
        RegisterId::Rdx,
        RegisterId::Rbx,
        RegisterId::Rsp,
        RegisterId::Rbp,
        RegisterId::Rsi,
        RegisterId::Rdi,
        RegisterId::R8,
        RegisterId::R9,
        RegisterId::R10,
        RegisterId::R11,
        RegisterId::R12,
        RegisterId::R13,
        RegisterId::R14,
        RegisterId::R15,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Low three bits, as they appear in ModRM/SIB/opcode fields.
    pub fn low_bits(self) -> u8 {
        self.code() & 7
    }

    /// Needs REX.R/X/B to be addressed.
    pub fn is_extended(self) -> bool {
        self.code() >= 8
    }

    /// As a byte register, needs a REX prefix to mean spl/bpl/sil/dil
    /// instead of ah/ch/dh/bh.
    pub fn byte_needs_rex(self) -> bool {
        self.code() >= 4
    }

    /// rsp and r12 in the r/m field mean "SIB follows".
    pub(crate) fn forces_sib(self) -> bool {
        self.low_bits() == RegisterId::Rsp.code()
    }

    /// rbp and r13 with mod=00 mean "disp32, no base".
    pub(crate) fn forbids_no_displacement(self) -> bool {
        self.low_bits() == RegisterId::Rbp.code()
    }
}

/// Condition codes for `jcc` and `setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Condition {
    Overflow = 0,
    NoOverflow = 1,
    Below = 2,
    AboveOrEqual = 3,
    Equal = 4,
    NotEqual = 5,
    BelowOrEqual = 6,
    Above = 7,
    Sign = 8,
    NotSign = 9,
    Parity = 10,
    NoParity = 11,
    Less = 12,
    GreaterOrEqual = 13,
    LessOrEqual = 14,
    Greater = 15,
}

impl Condition {
    const ALL: [Condition; 16] = [
        Condition::Overflow,
        Condition::NoOverflow,
        Condition::Below,
        Condition::AboveOrEqual,
        Condition::Equal,
        Condition::NotEqual,
        Condition::BelowOrEqual,
        Condition::Above,
        Condition::Sign,
        Condition::NotSign,
        Condition::Parity,
        Condition::NoParity,
        Condition::Less,
        Condition::GreaterOrEqual,
        Condition::LessOrEqual,
        Condition::Greater,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// The opposite condition; pairs differ only in the lowest bit.
    pub fn invert(self) -> Self {
        Self::ALL[usize::from((self.code() ^ 1) & 0xf)]
    }
}

/// Index scale of a base+index address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Scale {
    One = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
}

impl Scale {
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// `[base + offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub base: RegisterId,
    pub offset: i32,
}

impl Address {
    pub fn new(base: RegisterId, offset: i32) -> Self {
        Self { base, offset }
    }
}

/// `[base + index * scale + offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseIndex {
    base: RegisterId,
    index: RegisterId,
    scale: Scale,
    offset: i32,
}

impl BaseIndex {
    /// rsp cannot be an index: its encoding means "no index".
    pub fn new(base: RegisterId, index: RegisterId, scale: Scale, offset: i32) -> Option<Self> {
        if index == RegisterId::Rsp {
            return None;
        }
        Some(Self {
            base,
            index,
            scale,
            offset,
        })
    }

    pub fn base(&self) -> RegisterId {
        self.base
    }

    pub fn index(&self) -> RegisterId {
        self.index
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }
}
