//! Simulated executable memory.
//!
//! Finalized code is copied into regions of a shared pool at synthetic,
//! non-overlapping addresses. Every patch names a raw address and is
//! bounds-checked against the region that contains it.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, RwLock};

use crate::assembler::CodePtr;
use crate::error::AsmError;

/// Regions start on this boundary.
pub const REGION_ALIGNMENT: u64 = 16;
/// Unmapped bytes left between regions so neighbours never touch.
const REGION_GUARD: u64 = 64;
/// Default first address handed out.
pub const DEFAULT_POOL_BASE: u64 = 0x7f00_0000_0000;

const OP_JMP_REL32: u8 = 0xe9;

#[derive(Debug)]
struct PoolInner {
    next_base: u64,
    regions: BTreeMap<u64, Vec<u8>>,
    bytes_in_use: usize,
}

impl PoolInner {
    /// Region base and byte range of `[address, address + len)`.
    fn locate(&self, address: u64, len: usize) -> Result<(u64, Range<usize>), AsmError> {
        let out_of_bounds = || AsmError::OutOfBounds { address, len };
        let (base, bytes) = self
            .regions
            .range(..=address)
            .next_back()
            .ok_or_else(out_of_bounds)?;
        let start = usize::try_from(address.saturating_sub(*base)).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > bytes.len() {
            return Err(out_of_bounds());
        }
        Ok((*base, start..end))
    }

    fn slice(&self, address: u64, len: usize) -> Result<&[u8], AsmError> {
        let (base, range) = self.locate(address, len)?;
        self.regions
            .get(&base)
            .and_then(|bytes| bytes.get(range))
            .ok_or(AsmError::OutOfBounds { address, len })
    }

    fn slice_mut(&mut self, address: u64, len: usize) -> Result<&mut [u8], AsmError> {
        let (base, range) = self.locate(address, len)?;
        self.regions
            .get_mut(&base)
            .and_then(|bytes| bytes.get_mut(range))
            .ok_or(AsmError::OutOfBounds { address, len })
    }
}

/// Shared handle to the executable address space.
#[derive(Debug, Clone)]
pub struct ExecutablePool {
    inner: Arc<RwLock<PoolInner>>,
}

impl Default for ExecutablePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BASE)
    }
}

impl ExecutablePool {
    pub fn new(base: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PoolInner {
                next_base: base.next_multiple_of(REGION_ALIGNMENT),
                regions: BTreeMap::new(),
                bytes_in_use: 0,
            })),
        }
    }

    /// Copy `code` into a fresh region.
    pub fn allocate(&self, code: Vec<u8>) -> Result<Arc<MachineCode>, AsmError> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        let size = code.len();
        let base = inner.next_base;
        let span = u64::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(REGION_GUARD))
            .and_then(|span| base.checked_add(span))
            .ok_or(AsmError::PoolExhausted)?;
        inner.next_base = span.next_multiple_of(REGION_ALIGNMENT);
        inner.regions.insert(base, code);
        inner.bytes_in_use = inner.bytes_in_use.saturating_add(size);
        tracing::trace!(base = format_args!("{base:#x}"), size, "Allocated code region");
        Ok(Arc::new(MachineCode {
            pool: self.clone(),
            base: CodePtr::new(base),
            size,
        }))
    }

    fn release(&self, base: CodePtr) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        if let Some(bytes) = inner.regions.remove(&base.address()) {
            inner.bytes_in_use = inner.bytes_in_use.saturating_sub(bytes.len());
        }
    }

    pub fn region_count(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.regions.len()
    }

    pub fn bytes_in_use(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.bytes_in_use
    }

    pub fn read(&self, address: CodePtr, len: usize) -> Result<Vec<u8>, AsmError> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.slice(address.address(), len).map(|bytes| bytes.to_vec())
    }

    fn write(&self, address: u64, bytes: &[u8]) -> Result<(), AsmError> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        inner
            .slice_mut(address, bytes.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    // ─── Patching ──────────────────────────────────────────────────

    /// Point the rel32 jump ending at `from` to `to`.
    pub fn relink_jump(&self, from: CodePtr, to: CodePtr) -> Result<(), AsmError> {
        self.set_rel32(from, to)
    }

    /// Point the rel32 call ending at `from` to `to`.
    pub fn relink_call(&self, from: CodePtr, to: CodePtr) -> Result<(), AsmError> {
        self.set_rel32(from, to)
    }

    /// Overwrite the one-byte operand ending at `at`.
    pub fn repatch_compact(&self, at: CodePtr, value: i32) -> Result<(), AsmError> {
        let narrow = i8::try_from(value).map_err(|_| AsmError::ImmediateOutOfRange {
            value: i64::from(value),
            bits: 8,
        })?;
        self.write(before(at, 1)?, &narrow.to_le_bytes())
    }

    /// Overwrite the four-byte operand ending at `at`.
    pub fn repatch_int32(&self, at: CodePtr, value: i32) -> Result<(), AsmError> {
        self.write(before(at, 4)?, &value.to_le_bytes())
    }

    /// Overwrite the eight-byte immediate ending at `at`.
    pub fn repatch_pointer(&self, at: CodePtr, value: u64) -> Result<(), AsmError> {
        self.write(before(at, 8)?, &value.to_le_bytes())
    }

    pub fn read_pointer(&self, at: CodePtr) -> Result<u64, AsmError> {
        let bytes = self.read(CodePtr::new(before(at, 8)?), 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(word))
    }

    pub fn read_int32(&self, at: CodePtr) -> Result<i32, AsmError> {
        let bytes = self.read(CodePtr::new(before(at, 4)?), 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes);
        Ok(i32::from_le_bytes(word))
    }

    /// Overwrite the instruction(s) at `at` with `jmp rel32` to `to`.
    pub fn replace_with_jump(&self, at: CodePtr, to: CodePtr) -> Result<(), AsmError> {
        let end = at.offset_by(5);
        let displacement = rel32(end, to)?;
        let mut bytes = [OP_JMP_REL32, 0, 0, 0, 0];
        bytes[1..].copy_from_slice(&displacement.to_le_bytes());
        self.write(at.address(), &bytes)
    }

    fn set_rel32(&self, end: CodePtr, to: CodePtr) -> Result<(), AsmError> {
        let displacement = rel32(end, to)?;
        self.write(before(end, 4)?, &displacement.to_le_bytes())
    }
}

fn before(at: CodePtr, len: u64) -> Result<u64, AsmError> {
    at.address().checked_sub(len).ok_or(AsmError::OutOfBounds {
        address: at.address(),
        len: usize::try_from(len).unwrap_or(usize::MAX),
    })
}

/// Displacement of a rel32 branch ending at `end` and landing on `to`.
pub(crate) fn rel32(end: CodePtr, to: CodePtr) -> Result<i32, AsmError> {
    let delta = i128::from(to.address()) - i128::from(end.address());
    i32::try_from(delta).map_err(|_| AsmError::DisplacementOutOfRange {
        from: end.address(),
        to: to.address(),
        bits: 32,
    })
}

/// A finalized code region. Dropping the last handle frees the region.
#[derive(Debug)]
pub struct MachineCode {
    pool: ExecutablePool,
    base: CodePtr,
    size: usize,
}

impl MachineCode {
    pub fn base(&self) -> CodePtr {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pool(&self) -> &ExecutablePool {
        &self.pool
    }

    pub fn contains(&self, address: CodePtr) -> bool {
        address >= self.base && address < self.base.offset_by(self.size)
    }

    /// Current bytes, patches included.
    pub fn bytes(&self) -> Result<Vec<u8>, AsmError> {
        self.pool.read(self.base, self.size)
    }

    pub fn hex(&self) -> Result<String, AsmError> {
        self.bytes().map(hex::encode)
    }
}

impl Drop for MachineCode {
    fn drop(&mut self) {
        self.pool.release(self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_are_disjoint_and_aligned() {
        let pool = ExecutablePool::new(0x1000);
        let first = pool.allocate(vec![0x90; 10]).unwrap();
        let second = pool.allocate(vec![0xc3]).unwrap();
        assert_eq!(first.base().address(), 0x1000);
        assert_eq!(second.base().address() % REGION_ALIGNMENT, 0);
        assert!(second.base() > first.base().offset_by(first.size()));
        assert_eq!(pool.region_count(), 2);
    }

    #[test]
    fn test_drop_releases_region() {
        let pool = ExecutablePool::default();
        let code = pool.allocate(vec![0xc3; 4]).unwrap();
        assert_eq!(pool.bytes_in_use(), 4);
        drop(code);
        assert_eq!(pool.region_count(), 0);
        assert_eq!(pool.bytes_in_use(), 0);
    }

    #[test]
    fn test_patch_past_region_end_fails() {
        let pool = ExecutablePool::new(0x1000);
        let code = pool.allocate(vec![0x90; 4]).unwrap();
        let err = pool.repatch_int32(code.base().offset_by(6), 1).unwrap_err();
        assert!(matches!(err, AsmError::OutOfBounds { .. }), "got {err:?}");
        let err = pool.repatch_int32(CodePtr::new(0x10), 1).unwrap_err();
        assert!(matches!(err, AsmError::OutOfBounds { .. }), "got {err:?}");
    }
}
