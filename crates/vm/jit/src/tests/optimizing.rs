//! Code emitted by the optimizing tier and its capability check.

use std::sync::Arc;

use kestrel_syntax::ParserOptions;

use super::helpers::{branch_destination, driver, link_function, link_program, range, test_config};
use crate::driver::JitDriver;
use crate::optimizing::{FrameLayout, Incapability, check_capability};
use crate::types::{CompileOutcome, JitConfig, Specialization, Tier};
use crate::unlinked::UnlinkedUnit;

fn function_unit(text: &str, name: &str) -> Arc<UnlinkedUnit> {
    let program = UnlinkedUnit::program(&range(text), &ParserOptions::default()).unwrap();
    program.function_named(name).unwrap().unit().unwrap()
}

fn optimize(driver: &mut JitDriver, executable: crate::ExecutableId, specialization: Specialization) -> CompileOutcome {
    driver
        .compile_if_appropriate(executable, specialization, Tier::Optimized)
        .unwrap()
}

#[test]
fn add_is_emitted_with_overflow_exit() {
    let mut driver = driver();
    let add = link_function(&mut driver, "function add(a, b) { return a + b; }", "add");
    let id = optimize(&mut driver, add, Specialization::Call)
        .compiled()
        .expect("add is int32 code");
    let block = driver.block(id).unwrap();
    let code = block.code().unwrap();
    let base = code.base();
    let bytes = code.bytes().unwrap();

    assert_eq!(code.size(), 33);
    assert_eq!(block.entries().arity_check, base);
    assert_eq!(block.entries().entry, base.offset_by(10));
    // cmp esi, 2; jge main; call arity_fixup
    assert_eq!(bytes[..5], [0x83, 0xfe, 0x02, 0x7d, 0x05]);
    assert_eq!(bytes[5], 0xe8);
    assert_eq!(branch_destination(&driver, base.offset_by(5)), driver.thunks().arity_fixup());
    assert_eq!(branch_destination(&driver, base.offset_by(3)), block.entries().entry);
    // mov eax,[rdi]; push rax; mov eax,[rdi+8]; mov edx,eax; pop rax; add eax,edx
    assert_eq!(
        bytes[10..21],
        [0x8b, 0x07, 0x50, 0x8b, 0x47, 0x08, 0x89, 0xc2, 0x58, 0x01, 0xd0]
    );
    assert_eq!(bytes[21..23], [0x0f, 0x80], "jo rel32");
    assert_eq!(branch_destination(&driver, base.offset_by(21)), driver.thunks().osr_exit());
    assert_eq!(bytes[27], 0xc3);
    assert_eq!(bytes[28], 0xe9, "falling off the end leaves");
    assert_eq!(branch_destination(&driver, base.offset_by(28)), driver.thunks().osr_exit());
    assert!(block.watchpoints().is_empty());
}

#[test]
fn construct_entry_allocates_this() {
    let mut driver = driver();
    let id = link_function(&mut driver, "function id(a) { return a; }", "id");
    let call = optimize(&mut driver, id, Specialization::Call).compiled().unwrap();
    let construct = optimize(&mut driver, id, Specialization::Construct).compiled().unwrap();

    let call_block = driver.block(call).unwrap();
    let call_code = call_block.code().unwrap();
    let bytes = call_code.bytes().unwrap();
    assert_eq!(call_code.size(), 18);
    assert_eq!(bytes[..3], [0x83, 0xfe, 0x01]);
    assert_eq!(bytes[10..13], [0x8b, 0x07, 0xc3]);

    let block = driver.block(construct).unwrap();
    let code = block.code().unwrap();
    let bytes = code.bytes().unwrap();
    let entry = block.entries().entry;
    assert_eq!(entry, code.base().offset_by(10));
    assert_eq!(bytes[10], 0xe8, "main entry starts with a call");
    assert_eq!(branch_destination(&driver, entry), driver.thunks().construct_alloc());
    assert_eq!(bytes[15..18], [0x8b, 0x07, 0xc3]);
    assert!(!Arc::ptr_eq(call_code, code), "specializations get their own code");
}

#[test]
fn global_code_has_no_arity_check() {
    let mut driver = driver();
    let program = link_program(&mut driver, "7;");
    let id = optimize(&mut driver, program, Specialization::Global).compiled().unwrap();
    let block = driver.block(id).unwrap();
    let code = block.code().unwrap();
    assert_eq!(block.entries().entry, block.entries().arity_check);
    assert_eq!(block.entries().entry, code.base());
    let bytes = code.bytes().unwrap();
    assert_eq!(bytes[..6], [0xb8, 0x07, 0x00, 0x00, 0x00, 0xe9]);
}

#[test]
fn loops_carry_a_watchpoint() {
    let mut driver = driver();
    let count = link_function(
        &mut driver,
        "function count(n) { var i = 0; while (i < n) { i = i + 1; } return i; }",
        "count",
    );
    let id = optimize(&mut driver, count, Specialization::Call).compiled().unwrap();
    let block = driver.block(id).unwrap();
    assert_eq!(block.watchpoints().len(), 1);
    assert!(block.code().unwrap().contains(block.watchpoints()[0]));
}

#[test]
fn supported_subset_compiles() {
    let sources = [
        ("function f(a, b) { return a * b; }", "f"),
        ("function f(a) { return -a; }", "f"),
        ("function f(a, b) { return (a << 3) ^ (b >>> 1) | ~a; }", "f"),
        ("function f(n) { var s = 0; for (var i = 0; i < n; i++) { if ((i & 1) == 0) continue; s += i; } return s; }", "f"),
        ("function f(a) { do { a--; if (a < 10) break; } while (a); return a; }", "f"),
        ("function f(a, b) { return a > b ? a : (b, a); }", "f"),
        ("function f(a, b) { if (!(a < 0) && (b >= 1 || a != b)) { return ++a; } return b--; }", "f"),
    ];
    for (text, name) in sources {
        let mut driver = driver();
        let function = link_function(&mut driver, text, name);
        let outcome = optimize(&mut driver, function, Specialization::Call);
        assert!(outcome.compiled().is_some(), "{text} gave {outcome:?}");
    }
}

#[test]
fn unsupported_constructs_fail() {
    let sources = [
        ("function f(o) { return o.x; }", "f"),
        ("function f() { return 0.5; }", "f"),
        ("function f(a) { return a / 2; }", "f"),
        ("function f(a) { var b = a < 1; return b; }", "f"),
    ];
    for (text, name) in sources {
        let mut driver = driver();
        let function = link_function(&mut driver, text, name);
        let outcome = optimize(&mut driver, function, Specialization::Call);
        assert_eq!(outcome, CompileOutcome::Failed, "{text}");
        assert_eq!(driver.live_tier(function, Specialization::Call).unwrap(), Some(Tier::Baseline));
    }
}

#[test]
fn oversized_code_fails() {
    let config = JitConfig {
        max_code_size: 16,
        ..test_config()
    };
    let mut driver = JitDriver::new(config).unwrap();
    let add = link_function(&mut driver, "function add(a, b) { return a + b; }", "add");
    assert_eq!(optimize(&mut driver, add, Specialization::Call), CompileOutcome::Failed);
    assert_eq!(driver.metrics().snapshot().compile_failures, 1);
}

#[test]
fn dynamic_scoping_is_declined() {
    let sources = [
        ("function f() { return g; }", "f"),
        ("function f(a) { eval('a'); return a; }", "f"),
        ("function f(o) { with (o) { return 1; } }", "f"),
        ("function f() { try { return 1; } catch (e) { return 2; } }", "f"),
    ];
    for (text, name) in sources {
        let mut driver = driver();
        let function = link_function(&mut driver, text, name);
        let outcome = optimize(&mut driver, function, Specialization::Call);
        assert_eq!(outcome, CompileOutcome::StayedAtTier, "{text}");
    }

    let mut driver = driver();
    let program = link_program(&mut driver, "var x = 1;");
    assert_eq!(
        optimize(&mut driver, program, Specialization::Global),
        CompileOutcome::StayedAtTier,
        "global variables live on the global object"
    );
}

#[test]
fn capability_reports_the_reason() {
    let unit = function_unit("function f(a) { return a + g; }", "f");
    let err = check_capability(&unit, Specialization::Call).unwrap_err();
    assert_eq!(err, Incapability::FreeVariable("g".into()));
    assert_eq!(err.to_string(), "free variable 'g'");

    let unit = function_unit("function f() { return arguments[0]; }", "f");
    assert!(matches!(
        check_capability(&unit, Specialization::Call),
        Err(Incapability::Features(_))
    ));
}

#[test]
fn frame_puts_parameters_first() {
    let unit = function_unit("function f(a, b) { var c = a; var a; return c + b; }", "f");
    let frame = FrameLayout::for_unit(&unit, Specialization::Call);
    assert_eq!(frame.slot("a"), Some(0));
    assert_eq!(frame.slot("b"), Some(1));
    assert_eq!(frame.slot("c"), Some(2));
    assert_eq!(frame.offset_of("c"), Some(16));
    assert_eq!(frame.parameter_count(), 2);
    assert_eq!(frame.slot_count(), 3, "redeclaring a parameter adds no slot");

    let global = FrameLayout::for_unit(&unit, Specialization::Global);
    assert_eq!(global.slot_count(), 0);
}
