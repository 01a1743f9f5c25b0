//! Error types for the machine-code emitter.

/// Failures while linking or patching machine code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    /// A jump was never linked to a label or an external address.
    #[error("jump at offset {at} was never linked")]
    UnresolvedJump { at: usize },

    /// A call was never linked to an external address.
    #[error("call at offset {at} was never linked")]
    UnresolvedCall { at: usize },

    /// A relative branch target is farther away than its displacement allows.
    #[error("displacement from {from:#x} to {to:#x} does not fit in {bits} bits")]
    DisplacementOutOfRange { from: u64, to: u64, bits: u8 },

    /// A narrow immediate or displacement does not fit its encoded width.
    #[error("value {value} does not fit in {bits} bits")]
    ImmediateOutOfRange { value: i64, bits: u8 },

    /// A patch or read falls outside every allocated code region.
    #[error("access of {len} bytes at {address:#x} is outside any code region")]
    OutOfBounds { address: u64, len: usize },

    /// The bytes at an offset do not decode as a branch.
    #[error("no branch instruction at offset {offset} (found {found})")]
    NotABranch { offset: usize, found: String },

    /// The simulated executable address space is exhausted.
    #[error("executable pool exhausted")]
    PoolExhausted,
}
