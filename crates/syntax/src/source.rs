//! Source buffers.
//!
//! A [`SourceProvider`] owns the immutable text of one script together with
//! its function-body cache. Parsers never see the provider directly; they
//! work on a [`SourceRange`], a window into the provider that keeps
//! absolute byte offsets so nested ranges (a function body carved out of a
//! program) report the same positions as the enclosing parse did.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::function_cache::FunctionCache;

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`SourceProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ProviderId(u64);

impl ProviderId {
    fn fresh() -> Self {
        Self(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owner of a script's text.
#[derive(Debug)]
pub struct SourceProvider {
    id: ProviderId,
    url: String,
    text: Arc<str>,
    first_line: u32,
    function_cache: FunctionCache,
}

impl SourceProvider {
    pub fn new(url: impl Into<String>, text: impl Into<Arc<str>>) -> Arc<Self> {
        Self::with_first_line(url, text, 1)
    }

    /// Provider for text embedded at `first_line` of a larger document.
    pub fn with_first_line(
        url: impl Into<String>,
        text: impl Into<Arc<str>>,
        first_line: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::fresh(),
            url: url.into(),
            text: text.into(),
            first_line: first_line.max(1),
            function_cache: FunctionCache::new(),
        })
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// Cache of already-checked function bodies, keyed by open-brace offset.
    pub fn function_cache(&self) -> &FunctionCache {
        &self.function_cache
    }

    /// Range covering the whole text.
    pub fn full_range(self: &Arc<Self>) -> SourceRange {
        SourceRange {
            provider: Arc::clone(self),
            start: 0,
            end: self.text.len(),
            first_line: self.first_line,
            start_column: 1,
        }
    }
}

/// An immutable window `[start, end)` into a provider's text.
#[derive(Clone)]
pub struct SourceRange {
    provider: Arc<SourceProvider>,
    start: usize,
    end: usize,
    first_line: u32,
    start_column: u32,
}

impl SourceRange {
    /// Carve out `[start, end)` (absolute offsets) and recompute the anchor
    /// line and column from the provider text.
    ///
    /// Returns `None` when the bounds are reversed, past the end of the
    /// text, or not on character boundaries.
    pub fn sub_range(&self, start: usize, end: usize) -> Option<SourceRange> {
        let text = self.provider.text();
        if start > end || end > text.len() {
            return None;
        }
        if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            return None;
        }
        let (line, line_start) = line_of(text, start, self.provider.first_line);
        let column = column_of(text, line_start, start);
        Some(SourceRange {
            provider: Arc::clone(&self.provider),
            start,
            end,
            first_line: line,
            start_column: column,
        })
    }

    pub fn provider(&self) -> &Arc<SourceProvider> {
        &self.provider
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider.id
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    pub fn start_column(&self) -> u32 {
        self.start_column
    }

    /// Offset of the first character of `first_line`.
    pub fn first_line_start(&self) -> usize {
        line_of(self.provider.text(), self.start, self.provider.first_line).1
    }

    pub fn text(&self) -> &str {
        self.provider
            .text()
            .get(self.start..self.end)
            .unwrap_or_default()
    }

    /// Ranges of the same provider are comparable; ranges of different
    /// providers never are.
    pub fn same_provider(&self, other: &SourceRange) -> bool {
        self.provider.id == other.provider.id
    }
}

impl PartialEq for SourceRange {
    fn eq(&self, other: &Self) -> bool {
        self.same_provider(other) && self.start == other.start && self.end == other.end
    }
}

impl Eq for SourceRange {}

impl fmt::Debug for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRange")
            .field("provider", &self.provider.id)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("first_line", &self.first_line)
            .field("start_column", &self.start_column)
            .finish()
    }
}

/// A point in the text: absolute byte offset plus its line anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct Position {
    offset: usize,
    line: u32,
    line_start: usize,
}

impl Position {
    /// `None` unless `offset >= line_start`.
    pub fn new(offset: usize, line: u32, line_start: usize) -> Option<Self> {
        (offset >= line_start).then_some(Self {
            offset,
            line,
            line_start,
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn line_start(&self) -> usize {
        self.line_start
    }

    /// 1-based byte column.
    pub fn column(&self) -> usize {
        self.offset.saturating_sub(self.line_start).saturating_add(1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column())
    }
}

/// ECMAScript line terminators: LF, CR, LS, PS.
pub fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Line number containing `offset` and the offset where that line starts.
/// CRLF counts as a single terminator.
fn line_of(text: &str, offset: usize, first_line: u32) -> (u32, usize) {
    let mut line = first_line;
    let mut line_start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if index >= offset {
            break;
        }
        if !is_line_terminator(c) {
            continue;
        }
        if c == '\r' && matches!(chars.peek(), Some((_, '\n'))) {
            continue;
        }
        line = line.saturating_add(1);
        line_start = index.saturating_add(c.len_utf8());
    }
    (line, line_start.min(offset))
}

fn column_of(text: &str, line_start: usize, offset: usize) -> u32 {
    let chars = text
        .get(line_start..offset)
        .map(|prefix| prefix.chars().count())
        .unwrap_or_default();
    u32::try_from(chars).unwrap_or(u32::MAX).saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_range_recomputes_anchor() {
        let provider = SourceProvider::new("t.js", "var a;\nfunction f() {\n  return 1;\n}\n");
        let full = provider.full_range();
        let brace = full.text().find('{').unwrap();
        let body = full.sub_range(brace, full.len()).unwrap();

        assert_eq!(body.first_line(), 2);
        assert_eq!(body.start_column(), 14);
        assert_eq!(body.start(), brace, "offsets stay absolute");
        assert!(body.text().starts_with('{'));
    }

    #[test]
    fn test_sub_range_rejects_bad_bounds() {
        let provider = SourceProvider::new("t.js", "héllo");
        let full = provider.full_range();
        assert!(full.sub_range(3, 1).is_none());
        assert!(full.sub_range(0, 99).is_none());
        // 'é' is two bytes starting at 1
        assert!(full.sub_range(2, 3).is_none());
    }

    #[test]
    fn test_ranges_compare_by_provider() {
        let a = SourceProvider::new("a.js", "x");
        let b = SourceProvider::new("b.js", "x");
        assert_ne!(a.full_range(), b.full_range());
        assert_eq!(a.full_range(), a.full_range());
        assert!(!a.full_range().same_provider(&b.full_range()));
    }

    #[test]
    fn test_position_invariant() {
        assert!(Position::new(3, 1, 4).is_none());
        let p = Position::new(7, 2, 4).unwrap();
        assert_eq!(p.column(), 4);
    }

    #[test]
    fn test_crlf_counts_once() {
        let provider = SourceProvider::with_first_line("t.js", "a\r\nb\rc", 10);
        let full = provider.full_range();
        assert_eq!(full.sub_range(3, 4).unwrap().first_line(), 11);
        assert_eq!(full.sub_range(5, 6).unwrap().first_line(), 12);
    }
}
