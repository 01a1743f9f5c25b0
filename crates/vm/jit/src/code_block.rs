//! Code blocks and their arena.
//!
//! Code blocks are records in a slot arena addressed by [`CodeBlockId`].
//! A chain of versions is a singly linked list through `alternative`:
//! the live block points at the block it superseded. Tiering up and
//! jettisoning only move indices around; releasing a block frees its
//! slot (and with it the last handle to its machine code).

use std::fmt;
use std::sync::Arc;

use kestrel_asm::{CodePtr, MachineCode};
use serde::Serialize;

use crate::backend::EntryPoints;
use crate::call_link::CallSiteId;
use crate::counter::TierUpCounter;
use crate::executable::ExecutableId;
use crate::types::{Specialization, Tier};
use crate::unlinked::UnlinkedUnit;

/// Generational handle into a [`CodeBlockArena`]. A handle to a released
/// block never resolves again, even after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CodeBlockId {
    index: u32,
    generation: u32,
}

impl CodeBlockId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for CodeBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb{}.{}", self.index, self.generation)
    }
}

/// One compiled version of an executable for one entry convention.
#[derive(Debug)]
pub struct CodeBlock {
    pub(crate) unit: Arc<UnlinkedUnit>,
    pub(crate) owner: ExecutableId,
    pub(crate) specialization: Specialization,
    pub(crate) tier: Tier,
    pub(crate) code: Option<Arc<MachineCode>>,
    pub(crate) entries: EntryPoints,
    pub(crate) alternative: Option<CodeBlockId>,
    pub(crate) incoming_calls: Vec<CallSiteId>,
    pub(crate) counter: TierUpCounter,
    pub(crate) watchpoints: Vec<CodePtr>,
    pub(crate) reoptimization_retry_counter: u32,
}

impl CodeBlock {
    pub fn unit(&self) -> &Arc<UnlinkedUnit> {
        &self.unit
    }

    pub fn owner(&self) -> ExecutableId {
        self.owner
    }

    pub fn specialization(&self) -> Specialization {
        self.specialization
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Machine code, absent for blocks that run through the interpreter.
    pub fn code(&self) -> Option<&Arc<MachineCode>> {
        self.code.as_ref()
    }

    pub fn entries(&self) -> EntryPoints {
        self.entries
    }

    pub fn alternative(&self) -> Option<CodeBlockId> {
        self.alternative
    }

    pub fn incoming_calls(&self) -> &[CallSiteId] {
        &self.incoming_calls
    }

    pub fn counter(&self) -> &TierUpCounter {
        &self.counter
    }

    pub fn watchpoints(&self) -> &[CodePtr] {
        &self.watchpoints
    }

    pub fn reoptimization_retry_counter(&self) -> u32 {
        self.reoptimization_retry_counter
    }

    /// Bump the retry counter, saturating at `max`.
    pub(crate) fn count_reoptimization(&mut self, max: u32) {
        self.reoptimization_retry_counter = self.reoptimization_retry_counter.saturating_add(1).min(max);
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    block: Option<CodeBlock>,
}

/// Slot arena with a free list.
#[derive(Debug, Default)]
pub struct CodeBlockArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl CodeBlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: CodeBlock) -> CodeBlockId {
        self.len = self.len.saturating_add(1);
        if let Some(index) = self.free.pop()
            && let Some(slot) = self.slots.get_mut(index as usize)
        {
            slot.block = Some(block);
            return CodeBlockId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            block: Some(block),
        });
        CodeBlockId { index, generation: 0 }
    }

    pub fn get(&self, id: CodeBlockId) -> Option<&CodeBlock> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_ref())
    }

    pub fn get_mut(&mut self, id: CodeBlockId) -> Option<&mut CodeBlock> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.block.as_mut())
    }

    pub fn contains(&self, id: CodeBlockId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a block and free its slot for reuse.
    pub fn release(&mut self, id: CodeBlockId) -> Option<CodeBlock> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)?;
        let block = slot.block.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len = self.len.saturating_sub(1);
        Some(block)
    }

    /// Number of blocks currently allocated.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walk a chain from `head` through the alternatives.
    pub fn chain(&self, head: Option<CodeBlockId>) -> Vec<CodeBlockId> {
        let mut ids = Vec::new();
        let mut cursor = head;
        while let Some(id) = cursor {
            let Some(block) = self.get(id) else { break };
            ids.push(id);
            cursor = block.alternative;
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use kestrel_syntax::{ParserOptions, SourceProvider};

    use super::*;
    use crate::types::JitConfig;

    fn block(tier: Tier, alternative: Option<CodeBlockId>) -> CodeBlock {
        let provider = SourceProvider::new("arena.js", "1;");
        let unit = UnlinkedUnit::program(&provider.full_range(), &ParserOptions::default()).unwrap();
        CodeBlock {
            unit,
            owner: ExecutableId(0),
            specialization: Specialization::Global,
            tier,
            code: None,
            entries: EntryPoints::default(),
            alternative,
            incoming_calls: Vec::new(),
            counter: TierUpCounter::after_warm_up(&JitConfig::default(), 0),
            watchpoints: Vec::new(),
            reoptimization_retry_counter: 0,
        }
    }

    #[test]
    fn test_released_slot_is_reused_with_new_generation() {
        let mut arena = CodeBlockArena::new();
        let first = arena.insert(block(Tier::Baseline, None));
        assert!(arena.release(first).is_some());
        let second = arena.insert(block(Tier::Baseline, None));
        assert_eq!(first.index(), second.index(), "slot reused");
        assert_ne!(first, second);
        assert!(arena.get(first).is_none(), "stale handle does not resolve");
        assert!(arena.release(first).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_chain_walks_alternatives() {
        let mut arena = CodeBlockArena::new();
        let baseline = arena.insert(block(Tier::Baseline, None));
        let optimized = arena.insert(block(Tier::Optimized, Some(baseline)));
        assert_eq!(arena.chain(Some(optimized)), vec![optimized, baseline]);
        assert!(arena.chain(None).is_empty());
    }

    #[test]
    fn test_retry_counter_saturates() {
        let mut arena = CodeBlockArena::new();
        let id = arena.insert(block(Tier::Baseline, None));
        let block = arena.get_mut(id).unwrap();
        for _ in 0..10 {
            block.count_reoptimization(3);
        }
        assert_eq!(block.reoptimization_retry_counter(), 3);
    }
}
