//! x86-64 instruction emitter.
//!
//! Every instruction appends to an [`AssemblerBuffer`]. Instructions that may
//! be patched later return a handle recording the buffer offset just after
//! them. Jumps are always emitted in their rel32 form; the link buffer
//! shrinks them to rel8 when the final displacement allows it.

use crate::buffer::AssemblerBuffer;
use crate::formatter::{DisplacementForm, Formatter, OP_2BYTE_ESCAPE, PREFIX_OPERAND_SIZE, RmOperand, Width};
use crate::registers::{Address, BaseIndex, Condition, RegisterId};

const OP_PUSH: u8 = 0x50;
const OP_POP: u8 = 0x58;
const OP_MOV_EV_GV: u8 = 0x89;
const OP_MOV_GV_EV: u8 = 0x8b;
const OP_LEA: u8 = 0x8d;
const OP_MOV_EAX_IV: u8 = 0xb8;
const OP_MOV_EV_IZ: u8 = 0xc7;
const OP_GROUP1_EV_IZ: u8 = 0x81;
const OP_GROUP1_EV_IB: u8 = 0x83;
const OP_IMUL_GV_EV_IZ: u8 = 0x69;
const OP_IMUL_GV_EV_IB: u8 = 0x6b;
const OP_GROUP2_EV_IB: u8 = 0xc1;
const OP_GROUP2_EV_1: u8 = 0xd1;
const OP_GROUP2_EV_CL: u8 = 0xd3;
const OP_GROUP3_EV: u8 = 0xf7;
const OP_GROUP5_EV: u8 = 0xff;
const OP_TEST_EV_GV: u8 = 0x85;
const OP_CALL_REL32: u8 = 0xe8;
const OP_JMP_REL32: u8 = 0xe9;
const OP_RET: u8 = 0xc3;
const OP_NOP: u8 = 0x90;
const OP_INT3: u8 = 0xcc;
const OP_HLT: u8 = 0xf4;
const OP2_IMUL_GV_EV: u8 = 0xaf;
const OP2_MOVZX_GV_EB: u8 = 0xb6;
const OP2_JCC_REL32: u8 = 0x80;
const OP2_SETCC: u8 = 0x90;

const GROUP3_OP_TEST: u8 = 0;
const GROUP3_OP_NOT: u8 = 2;
const GROUP3_OP_NEG: u8 = 3;
const GROUP5_OP_CALLN: u8 = 2;
const GROUP5_OP_JMPN: u8 = 4;

/// Length of an `E9 rel32` jump, the widest patch written over a watchpoint.
pub const MAX_JUMP_REPLACEMENT_SIZE: usize = 5;

/// Emitter tuning knobs.
#[derive(Debug, Clone)]
pub struct AsmConfig {
    /// Shrink internally linked jumps to rel8 at link time when they fit.
    pub compact_branches: bool,
    /// Bytes reserved after a watchpoint label before another label may start.
    pub watchpoint_tail: usize,
}

impl Default for AsmConfig {
    fn default() -> Self {
        Self {
            compact_branches: true,
            watchpoint_tail: MAX_JUMP_REPLACEMENT_SIZE,
        }
    }
}

/// Arithmetic group 1 operations; the value is the ModRM extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

impl AluOp {
    fn extension(self) -> u8 {
        self as u8
    }

    /// `op r/m, reg`
    fn store_opcode(self) -> u8 {
        (self.extension() << 3) | 0x01
    }

    /// `op reg, r/m`
    fn load_opcode(self) -> u8 {
        (self.extension() << 3) | 0x03
    }
}

/// Shift group 2 operations; the value is the ModRM extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Position in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    offset: usize,
}

impl Label {
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Jmp,
    Jcc(Condition),
}

impl JumpKind {
    /// Width of the rel32 form.
    pub fn long_width(self) -> usize {
        match self {
            JumpKind::Jmp => 5,
            JumpKind::Jcc(_) => 6,
        }
    }
}

/// A jump awaiting a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jump {
    index: usize,
    end: usize,
}

impl Jump {
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

/// A rel32 call awaiting an external target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    index: usize,
    end: usize,
}

impl Call {
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

/// A 64-bit immediate that can be repatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLabelPtr {
    end: usize,
}

/// A 32-bit immediate that can be repatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLabel32 {
    end: usize,
}

/// An 8-bit immediate or displacement that can be repatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLabelCompact {
    end: usize,
}

/// Anything that names a byte offset in the emitted code.
pub trait CodeOffset {
    /// Offset in the unlinked buffer (the end of the instruction for patch handles).
    fn code_offset(&self) -> usize;
}

impl CodeOffset for Label {
    fn code_offset(&self) -> usize {
        self.offset
    }
}

impl CodeOffset for Jump {
    fn code_offset(&self) -> usize {
        self.end
    }
}

impl CodeOffset for Call {
    fn code_offset(&self) -> usize {
        self.end
    }
}

impl CodeOffset for DataLabelPtr {
    fn code_offset(&self) -> usize {
        self.end
    }
}

impl CodeOffset for DataLabel32 {
    fn code_offset(&self) -> usize {
        self.end
    }
}

impl CodeOffset for DataLabelCompact {
    fn code_offset(&self) -> usize {
        self.end
    }
}

/// Absolute address in the executable pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct CodePtr(u64);

impl CodePtr {
    pub fn new(address: u64) -> Self {
        Self(address)
    }

    pub fn address(self) -> u64 {
        self.0
    }

    pub fn offset_by(self, bytes: usize) -> Self {
        Self(self.0.saturating_add(u64::try_from(bytes).unwrap_or(u64::MAX)))
    }
}

impl std::fmt::Display for CodePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JumpTarget {
    Unlinked,
    Label(usize),
    External(CodePtr),
}

#[derive(Debug, Clone)]
pub(crate) struct JumpRecord {
    pub(crate) end: usize,
    pub(crate) kind: JumpKind,
    pub(crate) target: JumpTarget,
}

impl JumpRecord {
    pub(crate) fn start(&self) -> usize {
        self.end.saturating_sub(self.kind.long_width())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    pub(crate) end: usize,
    pub(crate) target: Option<CodePtr>,
}

#[derive(Debug, Clone, Default)]
pub struct Assembler {
    formatter: Formatter,
    config: AsmConfig,
    pub(crate) jumps: Vec<JumpRecord>,
    pub(crate) calls: Vec<CallRecord>,
    pub(crate) watchpoints: Vec<usize>,
    watchpoint_tail_end: usize,
}

impl Assembler {
    pub fn new() -> Self {
        Self::with_config(AsmConfig::default())
    }

    pub fn with_config(config: AsmConfig) -> Self {
        Self {
            formatter: Formatter::default(),
            config,
            jumps: Vec::new(),
            calls: Vec::new(),
            watchpoints: Vec::new(),
            watchpoint_tail_end: 0,
        }
    }

    pub fn config(&self) -> &AsmConfig {
        &self.config
    }

    pub fn code_size(&self) -> usize {
        self.formatter.size()
    }

    pub fn buffer(&self) -> &AssemblerBuffer {
        &self.formatter.buffer
    }

    pub(crate) fn into_code(self) -> Vec<u8> {
        self.formatter.buffer.into_vec()
    }

    // ─── Labels and padding ────────────────────────────────────────

    /// Current position, first padding with nops past any watchpoint tail.
    pub fn label(&mut self) -> Label {
        while self.code_size() < self.watchpoint_tail_end {
            self.nop();
        }
        Label {
            offset: self.code_size(),
        }
    }

    /// A position that may later be overwritten with a jump; the following
    /// bytes are reserved for it.
    pub fn label_for_watchpoint(&mut self) -> Label {
        let label = self.label();
        self.watchpoints.push(label.offset);
        self.watchpoint_tail_end = label.offset.saturating_add(self.config.watchpoint_tail);
        label
    }

    /// Pad with `hlt` to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> Label {
        if alignment > 1 {
            while self.code_size() % alignment != 0 {
                self.hlt();
            }
        }
        self.label()
    }

    // ─── Stack ─────────────────────────────────────────────────────

    pub fn push(&mut self, reg: RegisterId) {
        self.formatter.op_plus_register(OP_PUSH, reg, false);
    }

    pub fn pop(&mut self, reg: RegisterId) {
        self.formatter.op_plus_register(OP_POP, reg, false);
    }

    // ─── Moves ─────────────────────────────────────────────────────

    pub fn mov32_rr(&mut self, dst: RegisterId, src: RegisterId) {
        self.formatter
            .op(&[OP_MOV_EV_GV], src.code(), RmOperand::Register(dst), Width::Dword);
    }

    pub fn mov64_rr(&mut self, dst: RegisterId, src: RegisterId) {
        self.formatter
            .op(&[OP_MOV_EV_GV], src.code(), RmOperand::Register(dst), Width::Qword);
    }

    pub fn mov32_rm(&mut self, dst: RegisterId, address: Address) {
        self.formatter.op(
            &[OP_MOV_GV_EV],
            dst.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Dword,
        );
    }

    pub fn mov64_rm(&mut self, dst: RegisterId, address: Address) {
        self.formatter.op(
            &[OP_MOV_GV_EV],
            dst.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Qword,
        );
    }

    pub fn mov32_rm_indexed(&mut self, dst: RegisterId, address: BaseIndex) {
        self.formatter
            .op(&[OP_MOV_GV_EV], dst.code(), RmOperand::Indexed(address), Width::Dword);
    }

    pub fn mov32_mr(&mut self, address: Address, src: RegisterId) {
        self.formatter.op(
            &[OP_MOV_EV_GV],
            src.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Dword,
        );
    }

    pub fn mov64_mr(&mut self, address: Address, src: RegisterId) {
        self.formatter.op(
            &[OP_MOV_EV_GV],
            src.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Qword,
        );
    }

    /// 16-bit store, behind the operand-size prefix.
    pub fn mov16_mr(&mut self, address: Address, src: RegisterId) {
        self.formatter.prefix(PREFIX_OPERAND_SIZE);
        self.formatter.op(
            &[OP_MOV_EV_GV],
            src.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Dword,
        );
    }

    pub fn mov16_mi(&mut self, address: Address, imm: i16) {
        self.formatter.prefix(PREFIX_OPERAND_SIZE);
        self.formatter.op(
            &[OP_MOV_EV_IZ],
            0,
            RmOperand::memory(address.base, address.offset),
            Width::Dword,
        );
        self.formatter.immediate16(imm);
    }

    pub fn mov32_ri(&mut self, dst: RegisterId, imm: i32) {
        self.formatter.op_plus_register(OP_MOV_EAX_IV, dst, false);
        self.formatter.immediate32(imm);
    }

    /// Sign-extended 32-bit immediate into a 64-bit register.
    pub fn mov64_ri(&mut self, dst: RegisterId, imm: i32) {
        self.formatter
            .op(&[OP_MOV_EV_IZ], 0, RmOperand::Register(dst), Width::Qword);
        self.formatter.immediate32(imm);
    }

    /// Full 64-bit immediate; the handle allows repatching the pointer.
    pub fn mov64_ri64(&mut self, dst: RegisterId, imm: u64) -> DataLabelPtr {
        self.formatter.op_plus_register(OP_MOV_EAX_IV, dst, true);
        self.formatter.immediate64(i64::from_le_bytes(imm.to_le_bytes()));
        DataLabelPtr { end: self.code_size() }
    }

    pub fn mov32_mi(&mut self, address: Address, imm: i32) {
        self.formatter.op(
            &[OP_MOV_EV_IZ],
            0,
            RmOperand::memory(address.base, address.offset),
            Width::Dword,
        );
        self.formatter.immediate32(imm);
    }

    /// Load with a one-byte displacement that can be repatched.
    pub fn mov32_rm_compact(&mut self, dst: RegisterId, base: RegisterId, offset: i8) -> DataLabelCompact {
        self.formatter.op(
            &[OP_MOV_GV_EV],
            dst.code(),
            RmOperand::Memory {
                base,
                offset: i32::from(offset),
                form: DisplacementForm::Force8,
            },
            Width::Dword,
        );
        DataLabelCompact { end: self.code_size() }
    }

    /// Load with a four-byte displacement regardless of its value.
    pub fn mov32_rm_disp32(&mut self, dst: RegisterId, address: Address) -> DataLabel32 {
        self.formatter.op(
            &[OP_MOV_GV_EV],
            dst.code(),
            RmOperand::Memory {
                base: address.base,
                offset: address.offset,
                form: DisplacementForm::Force32,
            },
            Width::Dword,
        );
        DataLabel32 { end: self.code_size() }
    }

    pub fn lea64(&mut self, dst: RegisterId, address: Address) {
        self.formatter.op(
            &[OP_LEA],
            dst.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Qword,
        );
    }

    pub fn movzx8_rr(&mut self, dst: RegisterId, src: RegisterId) {
        self.formatter.op(
            &[OP_2BYTE_ESCAPE, OP2_MOVZX_GV_EB],
            dst.code(),
            RmOperand::Register(src),
            Width::Byte,
        );
    }

    // ─── Arithmetic ────────────────────────────────────────────────

    pub fn alu32_rr(&mut self, op: AluOp, dst: RegisterId, src: RegisterId) {
        self.formatter
            .op(&[op.store_opcode()], src.code(), RmOperand::Register(dst), Width::Dword);
    }

    pub fn alu64_rr(&mut self, op: AluOp, dst: RegisterId, src: RegisterId) {
        self.formatter
            .op(&[op.store_opcode()], src.code(), RmOperand::Register(dst), Width::Qword);
    }

    pub fn alu32_rm(&mut self, op: AluOp, dst: RegisterId, address: Address) {
        self.formatter.op(
            &[op.load_opcode()],
            dst.code(),
            RmOperand::memory(address.base, address.offset),
            Width::Dword,
        );
    }

    /// Picks the sign-extended imm8 form whenever `imm` fits.
    pub fn alu32_ri(&mut self, op: AluOp, dst: RegisterId, imm: i32) {
        self.alu_ri(op, RmOperand::Register(dst), imm, Width::Dword);
    }

    pub fn alu64_ri(&mut self, op: AluOp, dst: RegisterId, imm: i32) {
        self.alu_ri(op, RmOperand::Register(dst), imm, Width::Qword);
    }

    pub fn alu32_mi(&mut self, op: AluOp, address: Address, imm: i32) {
        self.alu_ri(op, RmOperand::memory(address.base, address.offset), imm, Width::Dword);
    }

    fn alu_ri(&mut self, op: AluOp, rm: RmOperand, imm: i32, width: Width) {
        match i8::try_from(imm) {
            Ok(short) => {
                self.formatter.op(&[OP_GROUP1_EV_IB], op.extension(), rm, width);
                self.formatter.immediate8(short);
            }
            Err(_) => {
                self.formatter.op(&[OP_GROUP1_EV_IZ], op.extension(), rm, width);
                self.formatter.immediate32(imm);
            }
        }
    }

    /// `cmp reg, imm8` with the immediate kept one byte wide for repatching.
    pub fn cmp32_ri_compact(&mut self, reg: RegisterId, imm: i8) -> DataLabelCompact {
        self.formatter.op(
            &[OP_GROUP1_EV_IB],
            AluOp::Cmp.extension(),
            RmOperand::Register(reg),
            Width::Dword,
        );
        self.formatter.immediate8(imm);
        DataLabelCompact { end: self.code_size() }
    }

    /// `cmp reg, imm32` even when the immediate would fit in a byte.
    pub fn cmp32_ri_force32(&mut self, reg: RegisterId, imm: i32) -> DataLabel32 {
        self.formatter.op(
            &[OP_GROUP1_EV_IZ],
            AluOp::Cmp.extension(),
            RmOperand::Register(reg),
            Width::Dword,
        );
        self.formatter.immediate32(imm);
        DataLabel32 { end: self.code_size() }
    }

    pub fn add32_rr(&mut self, dst: RegisterId, src: RegisterId) {
        self.alu32_rr(AluOp::Add, dst, src);
    }

    pub fn sub32_rr(&mut self, dst: RegisterId, src: RegisterId) {
        self.alu32_rr(AluOp::Sub, dst, src);
    }

    pub fn cmp32_rr(&mut self, lhs: RegisterId, rhs: RegisterId) {
        self.alu32_rr(AluOp::Cmp, lhs, rhs);
    }

    pub fn cmp32_ri(&mut self, lhs: RegisterId, imm: i32) {
        self.alu32_ri(AluOp::Cmp, lhs, imm);
    }

    pub fn imul32_rr(&mut self, dst: RegisterId, src: RegisterId) {
        self.formatter.op(
            &[OP_2BYTE_ESCAPE, OP2_IMUL_GV_EV],
            dst.code(),
            RmOperand::Register(src),
            Width::Dword,
        );
    }

    pub fn imul32_rri(&mut self, dst: RegisterId, src: RegisterId, imm: i32) {
        match i8::try_from(imm) {
            Ok(short) => {
                self.formatter
                    .op(&[OP_IMUL_GV_EV_IB], dst.code(), RmOperand::Register(src), Width::Dword);
                self.formatter.immediate8(short);
            }
            Err(_) => {
                self.formatter
                    .op(&[OP_IMUL_GV_EV_IZ], dst.code(), RmOperand::Register(src), Width::Dword);
                self.formatter.immediate32(imm);
            }
        }
    }

    pub fn shift32_cl(&mut self, op: ShiftOp, reg: RegisterId) {
        self.formatter
            .op(&[OP_GROUP2_EV_CL], op as u8, RmOperand::Register(reg), Width::Dword);
    }

    /// Shift by a constant; counts are masked to five bits as the CPU does.
    pub fn shift32_ri(&mut self, op: ShiftOp, reg: RegisterId, count: u8) {
        let count = count & 0x1f;
        if count == 1 {
            self.formatter
                .op(&[OP_GROUP2_EV_1], op as u8, RmOperand::Register(reg), Width::Dword);
            return;
        }
        self.formatter
            .op(&[OP_GROUP2_EV_IB], op as u8, RmOperand::Register(reg), Width::Dword);
        self.formatter.immediate8(i8::from_le_bytes([count]));
    }

    pub fn neg32(&mut self, reg: RegisterId) {
        self.formatter
            .op(&[OP_GROUP3_EV], GROUP3_OP_NEG, RmOperand::Register(reg), Width::Dword);
    }

    pub fn not32(&mut self, reg: RegisterId) {
        self.formatter
            .op(&[OP_GROUP3_EV], GROUP3_OP_NOT, RmOperand::Register(reg), Width::Dword);
    }

    pub fn test32_rr(&mut self, lhs: RegisterId, rhs: RegisterId) {
        self.formatter
            .op(&[OP_TEST_EV_GV], rhs.code(), RmOperand::Register(lhs), Width::Dword);
    }

    pub fn test32_ri(&mut self, reg: RegisterId, imm: i32) {
        self.formatter
            .op(&[OP_GROUP3_EV], GROUP3_OP_TEST, RmOperand::Register(reg), Width::Dword);
        self.formatter.immediate32(imm);
    }

    pub fn setcc(&mut self, condition: Condition, dst: RegisterId) {
        self.formatter.op(
            &[OP_2BYTE_ESCAPE, OP2_SETCC | condition.code()],
            0,
            RmOperand::Register(dst),
            Width::Byte,
        );
    }

    // ─── Control flow ──────────────────────────────────────────────

    pub fn jmp(&mut self) -> Jump {
        self.formatter.op_bare(&[OP_JMP_REL32]);
        self.formatter.immediate32(0);
        self.record_jump(JumpKind::Jmp)
    }

    pub fn jcc(&mut self, condition: Condition) -> Jump {
        self.formatter
            .op_bare(&[OP_2BYTE_ESCAPE, OP2_JCC_REL32 | condition.code()]);
        self.formatter.immediate32(0);
        self.record_jump(JumpKind::Jcc(condition))
    }

    pub fn jmp_r(&mut self, target: RegisterId) {
        self.formatter
            .op(&[OP_GROUP5_EV], GROUP5_OP_JMPN, RmOperand::Register(target), Width::Dword);
    }

    pub fn call(&mut self) -> Call {
        self.formatter.op_bare(&[OP_CALL_REL32]);
        self.formatter.immediate32(0);
        let end = self.code_size();
        self.calls.push(CallRecord { end, target: None });
        Call {
            index: self.calls.len().saturating_sub(1),
            end,
        }
    }

    pub fn call_r(&mut self, target: RegisterId) {
        self.formatter
            .op(&[OP_GROUP5_EV], GROUP5_OP_CALLN, RmOperand::Register(target), Width::Dword);
    }

    pub fn ret(&mut self) {
        self.formatter.op_bare(&[OP_RET]);
    }

    pub fn nop(&mut self) {
        self.formatter.op_bare(&[OP_NOP]);
    }

    pub fn int3(&mut self) {
        self.formatter.op_bare(&[OP_INT3]);
    }

    pub fn hlt(&mut self) {
        self.formatter.op_bare(&[OP_HLT]);
    }

    fn record_jump(&mut self, kind: JumpKind) -> Jump {
        let end = self.code_size();
        self.jumps.push(JumpRecord {
            end,
            kind,
            target: JumpTarget::Unlinked,
        });
        Jump {
            index: self.jumps.len().saturating_sub(1),
            end,
        }
    }

    // ─── Linking within the buffer ─────────────────────────────────

    /// Resolve `jump` to `target`, writing the rel32 displacement now.
    pub fn link_jump(&mut self, jump: Jump, target: Label) {
        let Some(record) = self.jumps.get_mut(jump.index) else {
            return;
        };
        record.target = JumpTarget::Label(target.offset);
        let displacement = displacement32(record.end, target.offset);
        self.formatter.buffer.set_int32_before(record.end, displacement);
    }

    /// Resolve `jump` to the current position.
    pub fn link_jump_here(&mut self, jump: Jump) -> Label {
        let here = self.label();
        self.link_jump(jump, here);
        here
    }

    pub(crate) fn set_external_jump(&mut self, jump: Jump, target: CodePtr) {
        if let Some(record) = self.jumps.get_mut(jump.index) {
            record.target = JumpTarget::External(target);
        }
    }

    pub(crate) fn set_external_call(&mut self, call: Call, target: CodePtr) {
        if let Some(record) = self.calls.get_mut(call.index) {
            record.target = Some(target);
        }
    }
}

/// `to - from` for offsets within one buffer.
fn displacement32(from: usize, to: usize) -> i32 {
    let from = i64::try_from(from).unwrap_or(i64::MAX);
    let to = i64::try_from(to).unwrap_or(i64::MAX);
    i32::try_from(to.saturating_sub(from)).unwrap_or_default()
}
