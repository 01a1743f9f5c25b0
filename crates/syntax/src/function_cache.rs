//! Cache of already-validated function bodies.
//!
//! Keyed by the absolute offset of a body's opening brace. A hit lets the
//! parser jump straight to the closing brace and replay the body's
//! free-variable summary instead of re-lexing it. Entries record the
//! strictness of the context they were parsed in; a lookup only hits when
//! the current context has the same strictness, since a body checked under
//! one set of rules says nothing about the other.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::scope::FunctionSummary;

/// Cached facts about one function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFunction {
    /// Offset of the `{`.
    pub open_brace: usize,
    /// Offset of the matching `}`.
    pub close_brace: usize,
    /// Line of the `}`.
    pub close_line: u32,
    /// Start offset of the line holding the `}`.
    pub close_line_start: usize,
    /// Strictness inherited by the body when it was parsed.
    pub context_strict: bool,
    /// Free-variable summary of the body; `summary.strict` is the body's
    /// own final strictness.
    pub summary: FunctionSummary,
}

impl CachedFunction {
    pub fn body_length(&self) -> usize {
        self.close_brace.saturating_sub(self.open_brace)
    }
}

/// Shared, thread-safe function cache.
///
/// Cloning yields another handle to the same entries.
#[derive(Debug, Clone, Default)]
pub struct FunctionCache {
    inner: Arc<RwLock<FxHashMap<usize, CachedFunction>>>,
}

impl FunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `open_brace` if it was parsed in a context of the same
    /// strictness.
    pub fn lookup(&self, open_brace: usize, context_strict: bool) -> Option<CachedFunction> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let entries = self.inner.read().unwrap();
        entries
            .get(&open_brace)
            .filter(|entry| entry.context_strict == context_strict)
            .cloned()
    }

    pub fn insert(&self, entry: CachedFunction) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut entries = self.inner.write().unwrap();
        entries.insert(entry.open_brace, entry);
    }

    pub fn len(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let entries = self.inner.read().unwrap();
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut entries = self.inner.write().unwrap();
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(open_brace: usize, context_strict: bool) -> CachedFunction {
        CachedFunction {
            open_brace,
            close_brace: open_brace + 100,
            close_line: 3,
            close_line_start: open_brace + 90,
            context_strict,
            summary: FunctionSummary::default(),
        }
    }

    #[test]
    fn test_lookup_checks_context_strictness() {
        let cache = FunctionCache::new();
        cache.insert(entry(10, false));

        assert!(cache.lookup(10, false).is_some());
        assert!(
            cache.lookup(10, true).is_none(),
            "non-strict entry must not serve a strict context"
        );
        assert!(cache.lookup(11, false).is_none());
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = FunctionCache::new();
        let other = cache.clone();
        other.insert(entry(4, true));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(4, true).map(|e| e.body_length()), Some(100));
        cache.clear();
        assert!(other.is_empty());
    }
}
