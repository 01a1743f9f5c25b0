//! Directive prologue handling: a `"use strict"` directive restarts the
//! enclosing source elements exactly once under strict rules.

use proptest::prelude::*;

use super::helpers::{check, error_kind, parse_full};
use crate::error::ParseErrorKind;

#[test]
fn use_strict_program_reparses_once() {
    let unit = parse_full("\"use strict\"; var a=1+2;").expect("strict program parses");
    assert!(unit.is_strict(), "directive makes the program strict");
    assert_eq!(unit.stats.reparses, 1);
    assert_eq!(unit.numeric_constants(), vec![3.0], "1+2 folds to a single constant");
    assert_eq!(unit.constant_count, 2, "directive string plus the folded 3");
    assert_eq!(unit.variables.len(), 1);
}

#[test]
fn checker_sees_the_same_directive() {
    let output = check("\"use strict\"; var a=1+2;").expect("strict program checks");
    assert!(output.is_strict());
    assert_eq!(output.stats.reparses, 1);
}

#[test]
fn second_directive_does_not_reparse_again() {
    let unit = parse_full("'use strict'; 'use strict'; x;").expect("parses");
    assert!(unit.is_strict());
    assert_eq!(unit.stats.reparses, 1);
}

#[test]
fn directive_after_other_directives_still_counts() {
    assert_eq!(error_kind("'foo'; 'use strict'; with (a) {}"), Some(ParseErrorKind::Early));
}

#[test]
fn escaped_directive_is_not_strict() {
    let unit = parse_full("'use\\x20strict'; with (a) {}").expect("escaped directive stays sloppy");
    assert!(!unit.is_strict());
    assert_eq!(unit.stats.reparses, 0);
}

#[test]
fn directive_after_statement_is_ignored() {
    let unit = parse_full("x; 'use strict'; with (a) {}").expect("late directive is only an expression");
    assert!(!unit.is_strict());
    assert_eq!(unit.stats.reparses, 0);
}

#[test]
fn non_trivial_string_expression_ends_prologue() {
    let unit = parse_full("'use strict' + 1; with (a) {}").expect("not a directive");
    assert!(!unit.is_strict());
}

#[test]
fn strict_words_relexed_after_reparse() {
    // `implements` lexes as an identifier first; the re-parse must reject it.
    assert_eq!(error_kind("'use strict'; var implements = 1;"), Some(ParseErrorKind::Early));
    assert_eq!(error_kind("var implements = 1;"), None);
}

#[test]
fn function_body_directive_is_local() {
    let unit = parse_full("function f() { 'use strict'; return 1; } with (a) {}").expect("outer stays sloppy");
    assert!(!unit.is_strict());
    let function = &unit.ast.functions()[0];
    assert!(function.summary.strict, "function body is strict");
}

#[test]
fn strict_function_rejects_eval_parameter() {
    assert_eq!(
        error_kind("function f(eval) { 'use strict'; }"),
        Some(ParseErrorKind::Early)
    );
    assert_eq!(error_kind("function f(eval) { }"), None);
}

proptest! {
    /// Any run of sloppy-safe statements after a strict directive causes
    /// exactly one re-parse.
    #[test]
    fn exactly_one_reparse(count in 0usize..8, value in 0u32..1000) {
        let mut text = String::from("'use strict';");
        for i in 0..count {
            text.push_str(&format!(" var v{i} = {value} + {i};"));
        }
        let unit = parse_full(&text).expect("generated program parses");
        prop_assert_eq!(unit.stats.reparses, 1, "reparses for {}", text);
        prop_assert!(unit.is_strict());
        prop_assert_eq!(unit.variables.len(), count);
    }
}
