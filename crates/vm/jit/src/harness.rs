//! Execution harness.
//!
//! Decides where an invocation enters a chain and drives tier-up from
//! invocation counts. Nothing is executed: an [`Invocation`] records the
//! entry address the call would have jumped to.

use kestrel_asm::CodePtr;
use serde::Serialize;

use crate::code_block::{CodeBlock, CodeBlockId};
use crate::driver::JitDriver;
use crate::error::JitError;
use crate::executable::ExecutableId;
use crate::thunks::RuntimeThunks;
use crate::types::{CompileOutcome, JitMetrics, Specialization, Tier};

/// Entry chosen for one call of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntrySelection {
    pub entry: CodePtr,
    /// Tier of the code behind `entry`.
    pub tier: Tier,
    /// The caller passed fewer arguments than the function declares.
    pub arity_checked: bool,
}

/// Pick the entry for a call of `block` with `argument_count` arguments.
///
/// Baseline blocks enter through the dispatch thunks. Higher tiers use
/// their compiled entries, but only when machine code actually exists;
/// otherwise the call runs in the interpreter like a baseline block.
pub fn select_entry(block: &CodeBlock, thunks: &RuntimeThunks, argument_count: u32) -> EntrySelection {
    let parameters = u32::try_from(block.unit().parameters().len()).unwrap_or(u32::MAX);
    let arity_checked = argument_count < parameters;
    match (block.tier(), block.code()) {
        (Tier::Baseline, _) | (_, None) => EntrySelection {
            entry: if arity_checked {
                thunks.arity_dispatch()
            } else {
                thunks.dispatch()
            },
            tier: Tier::Baseline,
            arity_checked,
        },
        (tier, Some(_)) => {
            let entries = block.entries();
            EntrySelection {
                entry: if arity_checked {
                    entries.arity_check
                } else {
                    entries.entry
                },
                tier,
                arity_checked,
            }
        }
    }
}

/// One simulated call through the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub executable: ExecutableId,
    pub specialization: Specialization,
    /// Block that was live when the call was made.
    pub block: CodeBlockId,
    pub entry: CodePtr,
    /// Tier the call ran at.
    pub tier: Tier,
    pub arity_checked: bool,
    /// Result of the tier-up this call triggered, if its counter fired.
    pub tier_up: Option<CompileOutcome>,
}

impl JitDriver {
    /// Make sure the chain has a live block, compiling the baseline if not.
    pub fn prepare(
        &mut self,
        executable: ExecutableId,
        specialization: Specialization,
    ) -> Result<CodeBlockId, JitError> {
        if let Some(live) = self.live_block(executable, specialization)? {
            return Ok(live);
        }
        self.compile_if_appropriate(executable, specialization, Tier::Baseline)?;
        self.live_block(executable, specialization)?
            .ok_or(JitError::NoLiveBlock {
                executable,
                specialization,
            })
    }

    /// Call `executable` with `argument_count` arguments.
    ///
    /// The entry is taken from the block that is live before the call.
    /// Calls into baseline code count towards tier-up; when the counter
    /// fires the optimizing tier is attempted right away, so the next
    /// call may enter different code.
    pub fn invoke(
        &mut self,
        executable: ExecutableId,
        specialization: Specialization,
        argument_count: u32,
    ) -> Result<Invocation, JitError> {
        let live = self.prepare(executable, specialization)?;
        let block = self.block(live)?;
        let selection = select_entry(block, self.thunks(), argument_count);
        let next_tier = (block.tier() == Tier::Baseline)
            .then(|| block.tier().next())
            .flatten();
        JitMetrics::bump(&self.metrics().invocations);

        let mut tier_up = None;
        if let Some(next) = next_tier
            && self.tick_counter(live)?
            && self.config().enabled
        {
            tracing::debug!(executable = %executable, specialization = %specialization, "Tier-up counter fired");
            tier_up = Some(self.compile_if_appropriate(executable, specialization, next)?);
        }

        Ok(Invocation {
            executable,
            specialization,
            block: live,
            entry: selection.entry,
            tier: selection.tier,
            arity_checked: selection.arity_checked,
            tier_up,
        })
    }
}
