//! Tier compiler interface.
//!
//! The driver does not know how a tier produces code. Each tier registers
//! a [`TierCompiler`]; the driver hands it a [`CompileRequest`] and gets
//! back either code, a capability no-op (`Ok(None)`) or an error.

use std::sync::Arc;

use kestrel_asm::{CodePtr, ExecutablePool, MachineCode};
use serde::Serialize;

use crate::error::JitError;
use crate::thunks::RuntimeThunks;
use crate::types::{JitConfig, Specialization, Tier};
use crate::unlinked::UnlinkedUnit;

/// Where callers enter a code block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryPoints {
    /// Main entry; the caller guarantees enough arguments.
    pub entry: CodePtr,
    /// Pads missing arguments before falling into the main entry.
    pub arity_check: CodePtr,
}

/// Everything a tier compiler may look at.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub unit: &'a Arc<UnlinkedUnit>,
    pub specialization: Specialization,
    pub config: &'a JitConfig,
    pub pool: &'a ExecutablePool,
    pub thunks: &'a RuntimeThunks,
}

/// Output of a successful tier compile.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    /// `None` for tiers that run through the interpreter.
    pub code: Option<Arc<MachineCode>>,
    pub entries: EntryPoints,
    /// Absolute addresses that are overwritten with jumps on jettison.
    pub watchpoints: Vec<CodePtr>,
}

/// A code generator for one tier.
///
/// Implementations must be side-effect free on failure: anything they
/// allocate in the pool before returning an error is released when its
/// last handle drops.
pub trait TierCompiler: Send + Sync {
    /// The tier this compiler produces.
    fn tier(&self) -> Tier;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Compile `request.unit`.
    ///
    /// `Ok(None)` means the unit cannot use this tier at all (a capability
    /// check said no), which callers treat as "stay at the current tier".
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Option<CompiledCode>, JitError>;
}
