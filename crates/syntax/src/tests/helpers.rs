//! Shared helpers for kestrel-syntax tests.

use std::sync::Arc;

use crate::error::{ParseErrorKind, ParseResult};
use crate::parser::{ParseMode, ParseOutput, ParsedUnit, ParserOptions, check_syntax, parse_unit};
use crate::source::{SourceProvider, SourceRange};
use crate::syntax_checker::SyntaxChecker;

/// URL given to every test provider.
pub const TEST_URL: &str = "test.js";

/// Fresh provider over `text`, with its own empty function cache.
pub fn provider(text: &str) -> Arc<SourceProvider> {
    SourceProvider::new(TEST_URL, text)
}

/// Whole-source range of a fresh provider.
pub fn range(text: &str) -> SourceRange {
    provider(text).full_range()
}

/// Options with the function cache switched off.
pub fn uncached() -> ParserOptions {
    ParserOptions {
        use_function_cache: false,
        ..ParserOptions::default()
    }
}

/// Parse `text` as a program into a full tree.
pub fn parse_full(text: &str) -> ParseResult<ParsedUnit> {
    parse_unit(&range(text), &ParseMode::Program, &ParserOptions::default())
}

/// Validate `text` as a program without building a tree.
pub fn check(text: &str) -> ParseResult<ParseOutput<SyntaxChecker>> {
    check_syntax(&range(text), &ParseMode::Program, &ParserOptions::default())
}

/// Error kind from both builders, asserting that they agree.
pub fn error_kind(text: &str) -> Option<ParseErrorKind> {
    let full = parse_full(text).err().map(|err| err.kind);
    let checked = check(text).err().map(|err| err.kind);
    assert_eq!(full, checked, "builders disagree on {text:?}");
    full
}
