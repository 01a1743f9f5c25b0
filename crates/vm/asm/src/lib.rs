//! # kestrel-asm
//!
//! x86-64 machine-code emitter with label linking, branch compaction and
//! bounds-checked patching of finalized code.
//!
//! ## Architecture
//!
//! ```text
//! Assembler ──► AssemblerBuffer (growable, little-endian)
//!    │  labels, jumps (always rel32), calls, patchable immediates
//!    ▼
//! LinkBuffer::finalize
//!    │  rel32 → rel8 where the final displacement fits
//!    │  external links: calls, jumps, pointers
//!    ▼
//! ExecutablePool ──► MachineCode (region at a synthetic address)
//!    relink_jump / relink_call / repatch_compact / repatch_int32 /
//!    repatch_pointer / replace_with_jump
//! ```
//!
//! Code is never executed: the pool models executable memory so that
//! linking, patching and decoding can be checked byte for byte.

pub mod assembler;
pub mod buffer;
pub mod decode;
pub mod error;
mod formatter;
pub mod link_buffer;
pub mod pool;
pub mod registers;

#[cfg(test)]
mod tests;

pub use assembler::{
    AluOp, AsmConfig, Assembler, Call, CodeOffset, CodePtr, DataLabel32, DataLabelCompact, DataLabelPtr, Jump,
    JumpKind, Label, ShiftOp, MAX_JUMP_REPLACEMENT_SIZE,
};
pub use buffer::AssemblerBuffer;
pub use decode::{BranchKind, BranchTarget, branch_target};
pub use error::AsmError;
pub use link_buffer::{LinkBuffer, LinkedCode};
pub use pool::{ExecutablePool, MachineCode};
pub use registers::{Address, BaseIndex, Condition, RegisterId, Scale};
