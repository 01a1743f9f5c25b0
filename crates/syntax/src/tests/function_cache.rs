//! Reuse of nested function bodies across parses of one provider.

use super::helpers::{provider, uncached};
use crate::parser::{ParserOptions, parse_program};

const LONG_FUNCTION: &str = "var total = 0;\n\
function accumulate(values) {\n\
    var sum = 0;\n\
    for (var i = 0; i < values.length; i++) { sum += values[i]; }\n\
    total = total + sum;\n\
    return sum;\n\
}\n\
accumulate([1, 2, 3]);\n";

#[test]
fn second_parse_hits_the_cache() {
    let source = provider(LONG_FUNCTION);
    let options = ParserOptions::default();

    let first = parse_program(&source.full_range(), &options).expect("first parse");
    assert_eq!(first.stats.cache_hits, 0);
    assert_eq!(first.stats.cache_misses, 1);
    assert_eq!(first.stats.cache_inserts, 1);
    assert_eq!(source.function_cache().len(), 1);

    let second = parse_program(&source.full_range(), &options).expect("second parse");
    assert_eq!(second.stats.cache_hits, 1, "body is served from the cache");
    assert_eq!(second.stats.cache_misses, 0);
    assert!(
        second.stats.tokens_lexed < first.stats.tokens_lexed,
        "cached body is skipped: {} vs {}",
        second.stats.tokens_lexed,
        first.stats.tokens_lexed
    );
    assert_eq!(
        first.ast.functions(),
        second.ast.functions(),
        "cached summary reproduces the literal"
    );
    assert_eq!(first.dump(), second.dump());
}

#[test]
fn short_bodies_are_not_cached() {
    let source = provider("function f() { return 1; } f();");
    let unit = parse_program(&source.full_range(), &ParserOptions::default()).expect("parses");
    assert_eq!(unit.stats.cache_inserts, 0);
    assert!(source.function_cache().is_empty());
}

#[test]
fn disabled_cache_is_never_consulted() {
    let source = provider(LONG_FUNCTION);
    let options = uncached();
    for _ in 0..2 {
        let unit = parse_program(&source.full_range(), &options).expect("parses");
        assert_eq!(unit.stats.cache_hits, 0);
        assert_eq!(unit.stats.cache_misses, 0);
    }
    assert!(source.function_cache().is_empty());
}

#[test]
fn separate_providers_do_not_share_entries() {
    let options = ParserOptions::default();
    let first = provider(LONG_FUNCTION);
    parse_program(&first.full_range(), &options).expect("parses");
    let second = provider(LONG_FUNCTION);
    let unit = parse_program(&second.full_range(), &options).expect("parses");
    assert_eq!(unit.stats.cache_hits, 0);
}
