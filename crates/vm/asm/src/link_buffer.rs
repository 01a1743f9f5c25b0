//! Finalization: branch compaction, external links and copy into the pool.
//!
//! Internally linked jumps are shrunk from rel32 to rel8 in one forward
//! pass. Jumps are visited in address order; a backward target already has
//! its final position, and for a forward target the rel32 displacement is
//! an upper bound of the final one because later jumps can only shrink.

use std::sync::Arc;

use crate::assembler::{Assembler, Call, CodeOffset, CodePtr, DataLabelPtr, Jump, JumpKind, JumpTarget};
use crate::error::AsmError;
use crate::pool::{ExecutablePool, MachineCode};

const OP_JMP_REL8: u8 = 0xeb;
const OP_JCC_REL8: u8 = 0x70;
const SHORT_JUMP_WIDTH: usize = 2;

/// Maps offsets of the unlinked buffer to offsets of the compacted code.
#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
    /// (end of a compacted jump, bytes removed up to and including it)
    shrinks: Vec<(usize, usize)>,
}

impl OffsetMap {
    pub fn map(&self, offset: usize) -> usize {
        let index = self.shrinks.partition_point(|(end, _)| *end <= offset);
        let removed = index
            .checked_sub(1)
            .and_then(|last| self.shrinks.get(last))
            .map_or(0, |(_, removed)| *removed);
        offset.saturating_sub(removed)
    }

    fn removed(&self) -> usize {
        self.shrinks.last().map_or(0, |(_, removed)| *removed)
    }

    fn push(&mut self, end: usize, shrink: usize) {
        let removed = self.removed().saturating_add(shrink);
        self.shrinks.push((end, removed));
    }

    pub fn compacted_count(&self) -> usize {
        self.shrinks.len()
    }
}

pub struct LinkBuffer<'a> {
    asm: Assembler,
    pool: &'a ExecutablePool,
    pointers: Vec<(usize, u64)>,
}

impl<'a> LinkBuffer<'a> {
    pub fn new(asm: Assembler, pool: &'a ExecutablePool) -> Self {
        Self {
            asm,
            pool,
            pointers: Vec::new(),
        }
    }

    pub fn link_call(&mut self, call: Call, target: CodePtr) {
        self.asm.set_external_call(call, target);
    }

    pub fn link_jump(&mut self, jump: Jump, target: CodePtr) {
        self.asm.set_external_jump(jump, target);
    }

    pub fn link_pointer(&mut self, label: DataLabelPtr, value: u64) {
        self.pointers.push((label.code_offset(), value));
    }

    pub fn finalize(self) -> Result<LinkedCode, AsmError> {
        let Self { asm, pool, pointers } = self;
        let compact_branches = asm.config().compact_branches;
        let watchpoint_tail = asm.config().watchpoint_tail;

        let mut order: Vec<usize> = (0..asm.jumps.len()).collect();
        order.sort_by_key(|index| asm.jumps.get(*index).map_or(0, |jump| jump.end));

        if let Some(unlinked) = asm.jumps.iter().find(|jump| jump.target == JumpTarget::Unlinked) {
            return Err(AsmError::UnresolvedJump { at: unlinked.start() });
        }
        if let Some(unlinked) = asm.calls.iter().find(|call| call.target.is_none()) {
            return Err(AsmError::UnresolvedCall {
                at: unlinked.end.saturating_sub(5),
            });
        }

        let in_watchpoint = |start: usize| {
            asm.watchpoints
                .iter()
                .any(|wp| start >= *wp && start < wp.saturating_add(watchpoint_tail))
        };

        let mut map = OffsetMap::default();
        let mut compacted = vec![false; asm.jumps.len()];
        for index in &order {
            let Some(jump) = asm.jumps.get(*index) else { continue };
            let JumpTarget::Label(target) = jump.target else { continue };
            if !compact_branches || in_watchpoint(jump.start()) {
                continue;
            }
            let fits = if target <= jump.start() {
                let new_start = jump.start().saturating_sub(map.removed());
                short_displacement(new_start, map.map(target)).is_some()
            } else if target >= jump.end {
                target.saturating_sub(jump.end) <= usize::from(i8::MAX.unsigned_abs())
            } else {
                false
            };
            if fits {
                map.push(jump.end, jump.kind.long_width().saturating_sub(SHORT_JUMP_WIDTH));
                if let Some(flag) = compacted.get_mut(*index) {
                    *flag = true;
                }
            }
        }

        let code = asm.buffer().data();
        let mut out = Vec::with_capacity(code.len().saturating_sub(map.removed()));
        let mut cursor = 0;
        for index in &order {
            let (Some(jump), Some(true)) = (asm.jumps.get(*index), compacted.get(*index)) else {
                continue;
            };
            out.extend_from_slice(code.get(cursor..jump.start()).unwrap_or_default());
            out.push(short_opcode(jump.kind));
            out.push(0);
            cursor = jump.end;
        }
        out.extend_from_slice(code.get(cursor..).unwrap_or_default());

        for (index, jump) in asm.jumps.iter().enumerate() {
            let JumpTarget::Label(target) = jump.target else { continue };
            let end = map.map(jump.end);
            let target = map.map(target);
            if compacted.get(index).copied().unwrap_or(false) {
                let start = end.saturating_sub(SHORT_JUMP_WIDTH);
                let displacement = short_displacement(start, target).ok_or(AsmError::DisplacementOutOfRange {
                    from: offset_u64(end),
                    to: offset_u64(target),
                    bits: 8,
                })?;
                write_at(&mut out, end.saturating_sub(1), &displacement.to_le_bytes());
            } else {
                let displacement = i32::try_from(offset_i64(target).saturating_sub(offset_i64(end))).map_err(|_| {
                    AsmError::DisplacementOutOfRange {
                        from: offset_u64(end),
                        to: offset_u64(target),
                        bits: 32,
                    }
                })?;
                write_at(&mut out, end.saturating_sub(4), &displacement.to_le_bytes());
            }
        }

        let size = out.len();
        let machine_code = pool.allocate(out)?;
        let base = machine_code.base();
        for jump in asm.jumps.iter() {
            if let JumpTarget::External(target) = jump.target {
                pool.relink_jump(base.offset_by(map.map(jump.end)), target)?;
            }
        }
        for call in asm.calls.iter() {
            if let Some(target) = call.target {
                pool.relink_call(base.offset_by(map.map(call.end)), target)?;
            }
        }
        for (end, value) in &pointers {
            pool.repatch_pointer(base.offset_by(map.map(*end)), *value)?;
        }

        tracing::debug!(
            base = %base,
            size,
            jumps = asm.jumps.len(),
            compacted = map.compacted_count(),
            "Linked machine code"
        );
        Ok(LinkedCode {
            code: machine_code,
            map,
            watchpoints: asm.watchpoints.clone(),
        })
    }
}

/// Finalized code plus the offset translation needed to find labels in it.
#[derive(Debug, Clone)]
pub struct LinkedCode {
    code: Arc<MachineCode>,
    map: OffsetMap,
    watchpoints: Vec<usize>,
}

impl LinkedCode {
    pub fn code(&self) -> &Arc<MachineCode> {
        &self.code
    }

    pub fn into_code(self) -> Arc<MachineCode> {
        self.code
    }

    pub fn entry(&self) -> CodePtr {
        self.code.base()
    }

    /// Address of a label, or of the end of a patchable instruction.
    pub fn location_of(&self, offset: &impl CodeOffset) -> CodePtr {
        self.code.base().offset_by(self.map.map(offset.code_offset()))
    }

    pub fn watchpoints(&self) -> Vec<CodePtr> {
        self.watchpoints
            .iter()
            .map(|offset| self.code.base().offset_by(self.map.map(*offset)))
            .collect()
    }

    pub fn compacted_jumps(&self) -> usize {
        self.map.compacted_count()
    }
}

fn short_opcode(kind: JumpKind) -> u8 {
    match kind {
        JumpKind::Jmp => OP_JMP_REL8,
        JumpKind::Jcc(condition) => OP_JCC_REL8 | condition.code(),
    }
}

/// rel8 displacement of a short jump starting at `start`, if it fits.
fn short_displacement(start: usize, target: usize) -> Option<i8> {
    let end = offset_i64(start).saturating_add(2);
    i8::try_from(offset_i64(target).saturating_sub(end)).ok()
}

fn offset_i64(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

fn offset_u64(offset: usize) -> u64 {
    u64::try_from(offset).unwrap_or(u64::MAX)
}

fn write_at(out: &mut [u8], at: usize, bytes: &[u8]) {
    if let Some(slot) = out.get_mut(at..at.saturating_add(bytes.len())) {
        slot.copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_map() {
        let mut map = OffsetMap::default();
        map.push(10, 3);
        map.push(30, 4);
        assert_eq!(map.map(5), 5);
        assert_eq!(map.map(10), 7);
        assert_eq!(map.map(29), 26);
        assert_eq!(map.map(30), 23);
        assert_eq!(map.map(100), 93);
    }
}
