//! Error types for the tiering crate.

use kestrel_asm::AsmError;
use kestrel_syntax::ParseError;

use crate::call_link::CallSiteId;
use crate::code_block::CodeBlockId;
use crate::executable::ExecutableId;
use crate::types::Specialization;

/// Errors raised while linking, compiling or running code blocks.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// The unit (or a lazily parsed function body) failed to parse.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Emitting, linking or patching machine code failed.
    #[error("assembler error: {0}")]
    Asm(#[from] AsmError),

    /// A tier compiler rejected the unit.
    #[error("compilation failed: {0}")]
    CompilationFailed(String),

    /// Not even the baseline tier could be produced.
    #[error("no viable tier for executable {executable}: {reason}")]
    NoViableTier {
        /// Executable that cannot run.
        executable: ExecutableId,
        /// Why the baseline compile failed.
        reason: String,
    },

    /// Jettison was requested for a chain whose live block has no alternative.
    #[error("code block chain of executable {executable} ({specialization}) has no alternative")]
    NoAlternative {
        executable: ExecutableId,
        specialization: Specialization,
    },

    /// The chain has no live block yet.
    #[error("executable {executable} has no live {specialization} code block")]
    NoLiveBlock {
        executable: ExecutableId,
        specialization: Specialization,
    },

    /// The executable has no chain for this specialization
    /// (for example `Construct` on a program).
    #[error("executable {executable} has no {specialization} chain")]
    NoSuchChain {
        executable: ExecutableId,
        specialization: Specialization,
    },

    /// An executable handle does not name a linked executable.
    #[error("unknown executable {0}")]
    UnknownExecutable(ExecutableId),

    /// A code block handle names a released arena slot.
    #[error("unknown code block {0}")]
    UnknownCodeBlock(CodeBlockId),

    /// A call site handle was never created or was removed.
    #[error("unknown call site {0}")]
    UnknownCallSite(CallSiteId),
}
