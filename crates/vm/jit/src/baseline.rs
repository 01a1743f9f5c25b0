//! Tier 0.
//!
//! Baseline blocks carry no machine code: callers enter them through the
//! interpreter dispatch thunks. Producing one cannot fail, which is what
//! makes the baseline the tier every chain can fall back to.

use crate::backend::{CompileRequest, CompiledCode, EntryPoints, TierCompiler};
use crate::error::JitError;
use crate::types::Tier;

#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineCompiler;

impl TierCompiler for BaselineCompiler {
    fn tier(&self) -> Tier {
        Tier::Baseline
    }

    fn name(&self) -> &'static str {
        "baseline"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Option<CompiledCode>, JitError> {
        Ok(Some(CompiledCode {
            code: None,
            entries: EntryPoints {
                entry: request.thunks.dispatch(),
                arity_check: request.thunks.arity_dispatch(),
            },
            watchpoints: Vec::new(),
        }))
    }
}
