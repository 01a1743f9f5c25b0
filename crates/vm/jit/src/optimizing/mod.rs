//! Tier 1: speculative int32 machine code.
//!
//! The optimizing compiler handles a small, closed subset of the language:
//! local variables and parameters holding int32 values, integer
//! arithmetic and bitwise operators, comparisons in conditions, the
//! structured loops and `return`. Anything it cannot prove stays int32
//! leaves through the OSR exit thunk at run time.
//!
//! Two kinds of "no":
//!
//! - A unit that uses dynamic scoping (`eval`, `with`, `catch`,
//!   `arguments`) or reads a variable that is not a local can never run
//!   here. The compiler returns `Ok(None)` and the driver keeps the block
//!   at its current tier.
//! - A unit that merely contains an unsupported construct, or whose code
//!   is too large, fails with [`JitError::CompilationFailed`] and is
//!   retried later with back-off.

mod codegen;

use std::fmt;

use kestrel_asm::LinkBuffer;
use kestrel_syntax::{CodeFeatures, Expr, Identifier};
use rustc_hash::FxHashMap;

use crate::backend::{CompileRequest, CompiledCode, EntryPoints, TierCompiler};
use crate::error::JitError;
use crate::types::{Specialization, Tier};
use crate::unlinked::UnlinkedUnit;

use self::codegen::{CodeGenerator, Generated};

/// Bytes per local slot.
pub const SLOT_SIZE: u32 = 8;

/// Features that make a unit's variables unresolvable at compile time.
pub fn blocking_features() -> CodeFeatures {
    CodeFeatures::USES_EVAL
        .union(CodeFeatures::USES_WITH)
        .union(CodeFeatures::USES_CATCH)
        .union(CodeFeatures::USES_ARGUMENTS)
}

/// Why a unit can never use the optimizing tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incapability {
    /// The unit has one of the [`blocking_features`].
    Features(CodeFeatures),
    /// The unit reads or writes a name that is not one of its locals.
    FreeVariable(Identifier),
}

impl fmt::Display for Incapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incapability::Features(features) => write!(f, "uses {features}"),
            Incapability::FreeVariable(name) => write!(f, "free variable '{name}'"),
        }
    }
}

/// Stack slots of a unit's locals: parameters first, in order, then
/// declared variables and functions.
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    slots: FxHashMap<Identifier, u32>,
    parameter_count: u32,
    slot_count: u32,
}

impl FrameLayout {
    /// Program and eval code keep their variables on the global object,
    /// so the global layout is empty.
    pub fn for_unit(unit: &UnlinkedUnit, specialization: Specialization) -> Self {
        let mut frame = Self::default();
        if specialization == Specialization::Global {
            return frame;
        }
        for parameter in unit.parameters() {
            // a repeated parameter name binds the later slot
            frame.slots.insert(parameter.clone(), frame.slot_count);
            frame.slot_count = frame.slot_count.saturating_add(1);
        }
        frame.parameter_count = frame.slot_count;
        for name in unit.declared_variables().into_iter().chain(unit.declared_functions()) {
            if !frame.slots.contains_key(&name) {
                frame.slots.insert(name, frame.slot_count);
                frame.slot_count = frame.slot_count.saturating_add(1);
            }
        }
        frame
    }

    pub fn slot(&self, name: &str) -> Option<u32> {
        self.slots.get(name).copied()
    }

    /// Byte offset of `name` from the locals base.
    pub fn offset_of(&self, name: &str) -> Option<i32> {
        self.slot(name).and_then(slot_offset)
    }

    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }
}

pub(crate) fn slot_offset(slot: u32) -> Option<i32> {
    i32::try_from(u64::from(slot).saturating_mul(u64::from(SLOT_SIZE))).ok()
}

/// Decide whether `unit` can run in optimized code at all.
pub fn check_capability(unit: &UnlinkedUnit, specialization: Specialization) -> Result<FrameLayout, Incapability> {
    let features = unit.features();
    if features.intersects(blocking_features()) {
        let mut found = CodeFeatures::NONE;
        for flag in [
            CodeFeatures::USES_EVAL,
            CodeFeatures::USES_WITH,
            CodeFeatures::USES_CATCH,
            CodeFeatures::USES_ARGUMENTS,
        ] {
            if features.contains(flag) {
                found.insert(flag);
            }
        }
        return Err(Incapability::Features(found));
    }

    let frame = FrameLayout::for_unit(unit, specialization);
    if let Some(name) = unit
        .declared_variables()
        .into_iter()
        .find(|name| frame.slot(name).is_none())
    {
        return Err(Incapability::FreeVariable(name));
    }
    let mut free = None;
    unit.ast().walk_exprs(unit.statements(), |_, expr| {
        if free.is_none()
            && let Expr::Resolve(name) = expr
            && frame.slot(name).is_none()
        {
            free = Some(name.clone());
        }
    });
    match free {
        Some(name) => Err(Incapability::FreeVariable(name)),
        None => Ok(frame),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizingCompiler;

impl TierCompiler for OptimizingCompiler {
    fn tier(&self) -> Tier {
        Tier::Optimized
    }

    fn name(&self) -> &'static str {
        "optimizing"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Option<CompiledCode>, JitError> {
        let unit = request.unit;
        let frame = match check_capability(unit, request.specialization) {
            Ok(frame) => frame,
            Err(reason) => {
                tracing::debug!(
                    url = unit.source().provider().url(),
                    specialization = %request.specialization,
                    reason = %reason,
                    "Optimizing tier declined unit"
                );
                return Ok(None);
            }
        };

        let Generated {
            asm,
            entry,
            arity_entry,
            arity_fixup,
            construct_alloc,
            osr_exits,
        } = CodeGenerator::new(unit.ast(), &frame).generate(unit.statements(), request.specialization)?;

        // Compaction only shrinks code, so the unlinked size bounds the final one.
        let size = asm.code_size();
        if request.config.is_code_oversized(size) {
            return Err(JitError::CompilationFailed(format!(
                "{size} bytes of code exceeds the limit of {} bytes",
                request.config.max_code_size
            )));
        }

        let mut link = LinkBuffer::new(asm, request.pool);
        for exit in osr_exits {
            link.link_jump(exit, request.thunks.osr_exit());
        }
        if let Some(call) = arity_fixup {
            link.link_call(call, request.thunks.arity_fixup());
        }
        if let Some(call) = construct_alloc {
            link.link_call(call, request.thunks.construct_alloc());
        }
        let linked = link.finalize()?;
        let entries = EntryPoints {
            entry: linked.location_of(&entry),
            arity_check: linked.location_of(&arity_entry),
        };
        let watchpoints = linked.watchpoints();
        Ok(Some(CompiledCode {
            code: Some(linked.into_code()),
            entries,
            watchpoints,
        }))
    }
}
