//! Tier-up execution counter.
//!
//! Each baseline code block counts its invocations towards a threshold.
//! Crossing the threshold makes the block a candidate for the optimizing
//! tier. Thresholds back off exponentially with the block's reoptimization
//! retry counter, so code that keeps failing or getting jettisoned is
//! retried less and less often.

use serde::Serialize;

use crate::types::JitConfig;

/// How the current threshold was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CounterMode {
    /// Regular warm-up threshold.
    WarmUp,
    /// Shortened threshold after an "optimize soon" hint.
    Soon,
    /// Never fires until a new threshold is set.
    Deferred,
}

/// Invocation counter with a back-off threshold.
#[derive(Debug, Clone, Serialize)]
pub struct TierUpCounter {
    count: u32,
    threshold: u32,
    mode: CounterMode,
}

/// `base * 2^retries`, clipped to `[1, i32::MAX]`.
pub fn clip_threshold(base: u32, retries: u32) -> u32 {
    let scaled = u64::from(base)
        .checked_shl(retries)
        .filter(|value| value >> retries == u64::from(base))
        .unwrap_or(u64::MAX);
    let max = u64::from(i32::MAX.unsigned_abs());
    u32::try_from(scaled.clamp(1, max)).unwrap_or(i32::MAX.unsigned_abs())
}

impl TierUpCounter {
    /// A counter warming up from zero.
    pub fn after_warm_up(config: &JitConfig, retries: u32) -> Self {
        let mut counter = Self {
            count: 0,
            threshold: 1,
            mode: CounterMode::WarmUp,
        };
        counter.optimize_after_warm_up(config, retries);
        counter
    }

    pub fn optimize_after_warm_up(&mut self, config: &JitConfig, retries: u32) {
        self.set_threshold(
            clip_threshold(config.threshold_for_optimize_after_warm_up, retries),
            CounterMode::WarmUp,
        );
    }

    pub fn optimize_soon(&mut self, config: &JitConfig, retries: u32) {
        self.set_threshold(
            clip_threshold(config.threshold_for_optimize_soon, retries),
            CounterMode::Soon,
        );
    }

    pub fn dont_optimize_anytime_soon(&mut self) {
        self.count = 0;
        self.mode = CounterMode::Deferred;
    }

    fn set_threshold(&mut self, threshold: u32, mode: CounterMode) {
        self.count = 0;
        self.threshold = threshold;
        self.mode = mode;
    }

    /// Count one invocation. Returns true exactly once per threshold
    /// crossing; the counter then restarts.
    pub fn tick(&mut self) -> bool {
        if self.mode == CounterMode::Deferred {
            return false;
        }
        self.count = self.count.saturating_add(1);
        if self.count < self.threshold {
            return false;
        }
        self.count = 0;
        true
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    /// Invocations left before the counter fires, if it can fire at all.
    pub fn remaining(&self) -> Option<u32> {
        match self.mode {
            CounterMode::Deferred => None,
            _ => Some(self.threshold.saturating_sub(self.count)),
        }
    }
}
