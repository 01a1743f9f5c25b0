//! Tiering types.
//!
//! Configuration, tier tags and counters shared by the driver, the tier
//! compilers and the execution harness.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_asm::pool::DEFAULT_POOL_BASE;
use serde::Serialize;

use crate::code_block::CodeBlockId;

/// Code quality level of a code block. Ordered: a higher tier is faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    /// Tier 0: runs through the interpreter dispatch thunk.
    Baseline,
    /// Tier 1: speculative int32 machine code.
    Optimized,
}

impl Tier {
    /// The tier a tier-up attempt from `self` targets, if any.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Baseline => Some(Tier::Optimized),
            Tier::Optimized => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Baseline => f.write_str("baseline"),
            Tier::Optimized => f.write_str("optimized"),
        }
    }
}

/// Entry convention a code block is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Specialization {
    /// Plain call of a function.
    Call,
    /// `new` of a function: the entry materializes `this` first.
    Construct,
    /// Program or eval code.
    Global,
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specialization::Call => f.write_str("call"),
            Specialization::Construct => f.write_str("construct"),
            Specialization::Global => f.write_str("global"),
        }
    }
}

/// Result of [`crate::driver::JitDriver::compile_if_appropriate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompileOutcome {
    /// A new block was spliced in front of the chain and is live.
    Compiled(CodeBlockId),
    /// The live block already runs at (or above) the requested tier.
    AlreadyAtTier,
    /// The tier compiler declined the unit; the live block is unchanged.
    StayedAtTier,
    /// The tier compiler failed; the live block is unchanged.
    Failed,
}

impl CompileOutcome {
    pub fn compiled(self) -> Option<CodeBlockId> {
        match self {
            CompileOutcome::Compiled(block) => Some(block),
            _ => None,
        }
    }
}

/// Configuration for the tiering system.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// When false the harness never tiers up past the baseline.
    pub enabled: bool,
    /// Baseline invocations before an optimizing compile is attempted.
    /// Doubled for every recorded reoptimization.
    pub threshold_for_optimize_after_warm_up: u32,
    /// Shorter threshold used after an explicit "optimize soon" hint.
    pub threshold_for_optimize_soon: u32,
    /// Cap on the reoptimization retry counter (and thus on the back-off).
    pub reoptimization_retry_counter_max: u32,
    /// Largest optimized code, in bytes, the optimizing compiler accepts.
    pub max_code_size: usize,
    /// First address of the simulated executable pool.
    pub executable_pool_base: u64,
}

impl JitConfig {
    /// Check if emitted code exceeds the optimizing tier's size limit.
    pub fn is_code_oversized(&self, len: usize) -> bool {
        len > self.max_code_size
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_for_optimize_after_warm_up: 1000,
            threshold_for_optimize_soon: 100,
            reoptimization_retry_counter_max: 8,
            max_code_size: 64 * 1024,
            executable_pool_base: DEFAULT_POOL_BASE,
        }
    }
}

/// Atomic counters for tiering events.
#[derive(Debug)]
pub struct JitMetrics {
    /// Code blocks produced by any tier compiler.
    pub compilations: AtomicU64,
    /// Tier compiles that returned an error and were rolled back.
    pub compile_failures: AtomicU64,
    /// Optimizing compiles declined by the capability check.
    pub capability_skips: AtomicU64,
    /// Optimized blocks thrown away.
    pub jettisons: AtomicU64,
    /// Incoming call sites pointed back at the slow path.
    pub calls_unlinked: AtomicU64,
    /// Call sites (re)linked to a live entry.
    pub calls_relinked: AtomicU64,
    /// Invocations routed through the harness.
    pub invocations: AtomicU64,
}

/// Point-in-time copy of [`JitMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub compilations: u64,
    pub compile_failures: u64,
    pub capability_skips: u64,
    pub jettisons: u64,
    pub calls_unlinked: u64,
    pub calls_relinked: u64,
    pub invocations: u64,
}

impl JitMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            compilations: AtomicU64::new(0),
            compile_failures: AtomicU64::new(0),
            capability_skips: AtomicU64::new(0),
            jettisons: AtomicU64::new(0),
            calls_unlinked: AtomicU64::new(0),
            calls_relinked: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters to zero. Not available in production builds.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset(&self) {
        self.compilations.store(0, Ordering::Relaxed);
        self.compile_failures.store(0, Ordering::Relaxed);
        self.capability_skips.store(0, Ordering::Relaxed);
        self.jettisons.store(0, Ordering::Relaxed);
        self.calls_unlinked.store(0, Ordering::Relaxed);
        self.calls_relinked.store(0, Ordering::Relaxed);
        self.invocations.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            compilations: self.compilations.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            capability_skips: self.capability_skips.load(Ordering::Relaxed),
            jettisons: self.jettisons.load(Ordering::Relaxed),
            calls_unlinked: self.calls_unlinked.load(Ordering::Relaxed),
            calls_relinked: self.calls_relinked.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
        }
    }
}

impl Default for JitMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_reset() {
        let metrics = JitMetrics::new();
        metrics.compilations.store(3, Ordering::Relaxed);
        metrics.compile_failures.store(2, Ordering::Relaxed);
        JitMetrics::bump(&metrics.jettisons);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.compilations, 3);
        assert_eq!(snapshot.compile_failures, 2);
        assert_eq!(snapshot.jettisons, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(Tier::Baseline < Tier::Optimized);
        assert_eq!(Tier::Baseline.next(), Some(Tier::Optimized));
        assert_eq!(Tier::Optimized.next(), None);
    }

    #[test]
    fn test_oversized_code() {
        let config = JitConfig {
            max_code_size: 16,
            ..JitConfig::default()
        };
        assert!(!config.is_code_oversized(16));
        assert!(config.is_code_oversized(17));
    }
}
