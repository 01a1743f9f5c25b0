//! Shared helpers for kestrel-asm tests.

use crate::assembler::{AsmConfig, Assembler};
use crate::link_buffer::{LinkBuffer, LinkedCode};
use crate::pool::ExecutablePool;

/// Base address of test pools.
pub const TEST_POOL_BASE: u64 = 0x10_0000;

pub fn test_pool() -> ExecutablePool {
    ExecutablePool::new(TEST_POOL_BASE)
}

/// Bytes emitted by `emit` on a fresh assembler, before linking.
pub fn encode(emit: impl FnOnce(&mut Assembler)) -> Vec<u8> {
    let mut asm = Assembler::new();
    emit(&mut asm);
    asm.buffer().data().to_vec()
}

/// Finalize without external links.
pub fn finalize(asm: Assembler, pool: &ExecutablePool) -> LinkedCode {
    LinkBuffer::new(asm, pool)
        .finalize()
        .expect("code with only internal links finalizes")
}

/// Assembler that never shrinks jumps.
pub fn long_jumps_only() -> Assembler {
    Assembler::with_config(AsmConfig {
        compact_branches: false,
        ..AsmConfig::default()
    })
}
