//! Instruction byte layout: prefixes, REX, opcode, ModRM, SIB,
//! displacement and immediates.

use crate::buffer::AssemblerBuffer;
use crate::registers::{BaseIndex, RegisterId};

/// Operand-size override.
pub(crate) const PREFIX_OPERAND_SIZE: u8 = 0x66;
/// Escape for two-byte opcodes.
pub(crate) const OP_2BYTE_ESCAPE: u8 = 0x0f;

const REX_BASE: u8 = 0x40;
const SIB_NO_INDEX: u8 = 4;

/// How a memory displacement is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisplacementForm {
    /// Shortest encoding the base register allows.
    Shortest,
    /// Always one byte, so it can be repatched in place.
    Force8,
    /// Always four bytes.
    Force32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    NoDisp,
    Disp8,
    Disp32,
}

impl Mode {
    fn bits(self) -> u8 {
        match self {
            Mode::NoDisp => 0x00,
            Mode::Disp8 => 0x40,
            Mode::Disp32 => 0x80,
        }
    }

    fn select(base: RegisterId, offset: i32, form: DisplacementForm) -> Self {
        match form {
            DisplacementForm::Force8 => Mode::Disp8,
            DisplacementForm::Force32 => Mode::Disp32,
            DisplacementForm::Shortest if offset == 0 && !base.forbids_no_displacement() => Mode::NoDisp,
            DisplacementForm::Shortest if i8::try_from(offset).is_ok() => Mode::Disp8,
            DisplacementForm::Shortest => Mode::Disp32,
        }
    }
}

/// The r/m operand of a ModRM-encoded instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RmOperand {
    Register(RegisterId),
    Memory {
        base: RegisterId,
        offset: i32,
        form: DisplacementForm,
    },
    Indexed(BaseIndex),
}

impl RmOperand {
    pub(crate) fn memory(base: RegisterId, offset: i32) -> Self {
        RmOperand::Memory {
            base,
            offset,
            form: DisplacementForm::Shortest,
        }
    }
}

/// Operand size of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Width {
    /// r/m is a byte register.
    Byte,
    Dword,
    Qword,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Formatter {
    pub(crate) buffer: AssemblerBuffer,
}

impl Formatter {
    pub(crate) fn size(&self) -> usize {
        self.buffer.code_size()
    }

    pub(crate) fn prefix(&mut self, byte: u8) {
        self.buffer.put_byte(byte);
    }

    /// `opcode` with ModRM; `reg` is a register code or an opcode extension.
    pub(crate) fn op(&mut self, opcode: &[u8], reg: u8, rm: RmOperand, width: Width) {
        self.rex(width == Width::Qword, reg, &rm, width == Width::Byte);
        for byte in opcode {
            self.buffer.put_byte(*byte);
        }
        self.modrm(reg, rm);
    }

    /// `opcode + reg` forms (push, pop, mov reg, imm).
    pub(crate) fn op_plus_register(&mut self, opcode: u8, reg: RegisterId, wide: bool) {
        if wide || reg.is_extended() {
            self.buffer
                .put_byte(REX_BASE | (u8::from(wide) << 3) | u8::from(reg.is_extended()));
        }
        self.buffer.put_byte(opcode | reg.low_bits());
    }

    /// Opcode with no operands.
    pub(crate) fn op_bare(&mut self, opcode: &[u8]) {
        for byte in opcode {
            self.buffer.put_byte(*byte);
        }
    }

    pub(crate) fn immediate8(&mut self, value: i8) {
        self.buffer.put_byte_signed(value);
    }

    pub(crate) fn immediate16(&mut self, value: i16) {
        self.buffer.put_short(value);
    }

    pub(crate) fn immediate32(&mut self, value: i32) {
        self.buffer.put_int(value);
    }

    pub(crate) fn immediate64(&mut self, value: i64) {
        self.buffer.put_int64(value);
    }

    fn rex(&mut self, wide: bool, reg: u8, rm: &RmOperand, byte_rm: bool) {
        let (index_ext, base_ext, byte_reg) = match rm {
            RmOperand::Register(r) => (false, r.is_extended(), byte_rm && r.byte_needs_rex()),
            RmOperand::Memory { base, .. } => (false, base.is_extended(), false),
            RmOperand::Indexed(address) => (address.index().is_extended(), address.base().is_extended(), false),
        };
        let reg_ext = reg >= 8;
        if wide || reg_ext || index_ext || base_ext || byte_reg {
            self.buffer.put_byte(
                REX_BASE
                    | (u8::from(wide) << 3)
                    | (u8::from(reg_ext) << 2)
                    | (u8::from(index_ext) << 1)
                    | u8::from(base_ext),
            );
        }
    }

    fn modrm(&mut self, reg: u8, rm: RmOperand) {
        let reg_bits = (reg & 7) << 3;
        match rm {
            RmOperand::Register(r) => self.buffer.put_byte(0xc0 | reg_bits | r.low_bits()),
            RmOperand::Memory { base, offset, form } => {
                let mode = Mode::select(base, offset, form);
                if base.forces_sib() {
                    self.buffer.put_byte(mode.bits() | reg_bits | SIB_NO_INDEX);
                    self.buffer.put_byte((SIB_NO_INDEX << 3) | base.low_bits());
                } else {
                    self.buffer.put_byte(mode.bits() | reg_bits | base.low_bits());
                }
                self.displacement(mode, offset);
            }
            RmOperand::Indexed(address) => {
                let mode = Mode::select(address.base(), address.offset(), DisplacementForm::Shortest);
                self.buffer.put_byte(mode.bits() | reg_bits | SIB_NO_INDEX);
                self.buffer.put_byte(
                    (address.scale().bits() << 6) | (address.index().low_bits() << 3) | address.base().low_bits(),
                );
                self.displacement(mode, address.offset());
            }
        }
    }

    fn displacement(&mut self, mode: Mode, offset: i32) {
        match mode {
            Mode::NoDisp => {}
            Mode::Disp8 => self.buffer.put_byte_signed(i8::try_from(offset).unwrap_or_default()),
            Mode::Disp32 => self.buffer.put_int(offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(rm: RmOperand) -> Vec<u8> {
        let mut formatter = Formatter::default();
        // mov eax, r/m32
        formatter.op(&[0x8b], RegisterId::Rax.code(), rm, Width::Dword);
        formatter.buffer.data().to_vec()
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(encode(RmOperand::memory(RegisterId::Rbx, 0)), vec![0x8b, 0x03]);
        assert_eq!(encode(RmOperand::memory(RegisterId::Rbx, -8)), vec![0x8b, 0x43, 0xf8]);
        assert_eq!(
            encode(RmOperand::memory(RegisterId::Rbx, 0x100)),
            vec![0x8b, 0x83, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_forced_forms() {
        let forced8 = RmOperand::Memory {
            base: RegisterId::Rbx,
            offset: 0,
            form: DisplacementForm::Force8,
        };
        assert_eq!(encode(forced8), vec![0x8b, 0x43, 0x00]);
        let forced32 = RmOperand::Memory {
            base: RegisterId::Rbx,
            offset: 4,
            form: DisplacementForm::Force32,
        };
        assert_eq!(encode(forced32), vec![0x8b, 0x83, 0x04, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_rex_only_when_needed() {
        let mut formatter = Formatter::default();
        formatter.op(&[0x89], RegisterId::Rcx.code(), RmOperand::Register(RegisterId::Rax), Width::Dword);
        formatter.op(&[0x89], RegisterId::R9.code(), RmOperand::Register(RegisterId::Rax), Width::Dword);
        formatter.op(&[0x89], RegisterId::Rcx.code(), RmOperand::Register(RegisterId::Rax), Width::Qword);
        assert_eq!(
            formatter.buffer.data(),
            &[0x89, 0xc8, 0x44, 0x89, 0xc8, 0x48, 0x89, 0xc8]
        );
    }
}
