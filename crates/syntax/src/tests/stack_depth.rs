//! Deeply nested input fails with `StackExhausted` instead of overflowing.

use super::helpers::range;
use crate::error::ParseErrorKind;
use crate::parser::{ParseMode, ParserOptions, check_syntax, parse_unit};

fn nested_parens(depth: usize) -> String {
    format!("x = {}1{};", "(".repeat(depth), ")".repeat(depth))
}

fn small_budget() -> ParserOptions {
    ParserOptions {
        max_depth: 64,
        ..ParserOptions::default()
    }
}

fn kinds(text: &str, options: &ParserOptions) -> (Option<ParseErrorKind>, Option<ParseErrorKind>) {
    let full = parse_unit(&range(text), &ParseMode::Program, options)
        .err()
        .map(|err| err.kind);
    let checked = check_syntax(&range(text), &ParseMode::Program, options)
        .err()
        .map(|err| err.kind);
    (full, checked)
}

#[test]
fn shallow_nesting_fits_the_budget() {
    let (full, checked) = kinds(&nested_parens(10), &small_budget());
    assert_eq!(full, None);
    assert_eq!(checked, None);
}

#[test]
fn deep_parentheses_exhaust_the_budget() {
    let (full, checked) = kinds(&nested_parens(1_000), &small_budget());
    assert_eq!(full, Some(ParseErrorKind::StackExhausted));
    assert_eq!(checked, Some(ParseErrorKind::StackExhausted));
}

#[test]
fn deep_blocks_exhaust_the_budget() {
    let text = format!("{}x;{}", "{".repeat(1_000), "}".repeat(1_000));
    let (full, checked) = kinds(&text, &small_budget());
    assert_eq!(full, Some(ParseErrorKind::StackExhausted));
    assert_eq!(checked, Some(ParseErrorKind::StackExhausted));
}

#[test]
fn deep_function_nesting_exhausts_the_budget() {
    let text = format!("{}{}", "function f() {".repeat(200), "}".repeat(200));
    let (full, checked) = kinds(&text, &small_budget());
    assert_eq!(full, Some(ParseErrorKind::StackExhausted));
    assert_eq!(checked, Some(ParseErrorKind::StackExhausted));
}

#[test]
fn right_recursive_assignment_exhausts_the_budget() {
    let text = format!("{}1;", "a = ".repeat(1_000));
    let (full, _) = kinds(&text, &small_budget());
    assert_eq!(full, Some(ParseErrorKind::StackExhausted));
}

#[test]
fn default_budget_is_enforced() {
    // Debug frames are large; give the parser room to reach its own limit.
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024 * 1024)
        .spawn(|| kinds(&nested_parens(100_000), &ParserOptions::default()))
        .expect("spawn parser thread");
    let (full, checked) = handle.join().expect("parser thread did not overflow");
    assert_eq!(full, Some(ParseErrorKind::StackExhausted));
    assert_eq!(checked, Some(ParseErrorKind::StackExhausted));
}
