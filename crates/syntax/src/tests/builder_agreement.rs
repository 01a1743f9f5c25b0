//! The full builder and the syntax checker must accept and reject the
//! same inputs, and full parses must be deterministic.

use proptest::prelude::*;

use super::helpers::{check, error_kind, parse_full};

const VALID: &[&str] = &[
    "",
    "var a = 1, b = a + 2;",
    "if (a) b(); else c();",
    "for (var i = 0; i < 10; i++) { continue; }",
    "for (k in o) break;",
    "for (var k in o) {}",
    "for (var i = ('a' in o); i; ) {}",
    "while (true) { break; }",
    "switch (x) { case 1: y(); break; default: z(); }",
    "try { a(); } catch (e) { b(e); } finally { c(); }",
    "var o = { a: 1, 'b': 2, 3: 4, get c() { return 1; }, set c(v) {} };",
    "var f = function named(x, y) { return x * y; };",
    "new Foo; new Foo(1)(2); new new X()();",
    "a = b ? c : d, e;",
    "x = /ab+c/gi.test(s);",
    "var arr = [1, , 2, , ];",
    "x = typeof y === 'undefined' && !z || void 0;",
    "throw new Error('x');",
    "debugger;",
    "var x = y\n(z)",
    "label: { break label; }",
    "x = 'a' in o;",
    "function outer() { function inner() { return this; } return inner; }",
    "(function () { 'use strict'; var x = 1; })();",
    "o.if = o.class;",
    "var a = [], i = 0; a[i+1] = 2;",
    "a[i++] = 0;",
    "f(a+b).x = 1;",
    "for (a[i+1] in o);",
    "o[k, j] = 1;",
    "a[f(b, c)] = [d + 1, e || 2][0];",
    "o[{ k: i + 1 }.k] += 1;",
];

const INVALID: &[&str] = &[
    "var = 1;",
    "a + ;",
    "1 = 2;",
    "if (a b();",
    "for (var i = 0; i < 3) {}",
    "switch (x) { default: ; default: ; }",
    "try {}",
    "function () {}",
    "var o = { a: 1 b: 2 };",
    "x = /a/gg;",
    "'use strict'; with (o) {}",
    "return;",
    "{",
    "a.;",
];

#[test]
fn valid_corpus_accepted_by_both() {
    for text in VALID {
        assert_eq!(error_kind(text), None, "{text:?} should parse");
    }
}

#[test]
fn invalid_corpus_rejected_by_both() {
    for text in INVALID {
        assert!(error_kind(text).is_some(), "{text:?} should be rejected");
    }
}

#[test]
fn statement_counts_agree() {
    for text in VALID {
        let full = parse_full(text).expect("valid corpus parses");
        let checked = check(text).expect("valid corpus checks");
        assert_eq!(full.statements.len(), checked.statements, "statement count for {text:?}");
        assert_eq!(full.features, checked.features, "features for {text:?}");
    }
}

#[test]
fn full_parse_is_deterministic() {
    for text in VALID {
        let first = parse_full(text).expect("parses");
        let second = parse_full(text).expect("parses");
        assert_eq!(first.dump(), second.dump(), "dump differs for {text:?}");
        assert_eq!(first.stats, second.stats);
    }
}

/// Small expression generator over identifiers, numbers and operators.
fn arb_expression() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        "[a-e]",
        (0u32..100).prop_map(|n| n.to_string()),
        Just("this".to_string()),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "*", "<<", "&&", "==", "in"]), inner.clone())
                .prop_map(|(a, op, b)| format!("{a} {op} {b}")),
            inner.clone().prop_map(|e| format!("({e})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a}[{b}]")),
            (inner.clone(), inner.clone(), inner.clone()).prop_map(|(a, b, c)| format!("{a} ? {b} : {c}")),
            inner.prop_map(|e| format!("f({e})")),
        ]
    })
}

/// Arbitrary short token soup, mostly invalid.
fn arb_soup() -> impl Strategy<Value = String> {
    let token = prop::sample::select(vec![
        "a", "1", "=", "+", "(", ")", "{", "}", ";", "var", "if", "for", "in", ",", "\n", "'s'", "++", "?", ":",
        "function", "return", ".", "[", "]",
    ]);
    prop::collection::vec(token, 0..16).prop_map(|tokens| tokens.join(" "))
}

proptest! {
    /// Generated expressions parse under both builders.
    #[test]
    fn generated_expressions_parse(expr in arb_expression()) {
        let text = format!("x = {expr};");
        prop_assert_eq!(error_kind(&text), None, "rejected {}", text);
    }

    /// Operators inside a subscript leave the member assignable.
    #[test]
    fn generated_subscripts_stay_assignable(a in arb_expression(), b in arb_expression(), c in arb_expression()) {
        let text = format!("({a})[{b}] = {c};");
        prop_assert_eq!(error_kind(&text), None, "rejected {}", text);
    }

    /// Both builders reach the same verdict on arbitrary token sequences.
    #[test]
    fn builders_agree_on_soup(text in arb_soup()) {
        let full = parse_full(&text).err().map(|err| err.kind);
        let checked = check(&text).err().map(|err| err.kind);
        prop_assert_eq!(full, checked, "builders disagree on {:?}", text);
    }
}
