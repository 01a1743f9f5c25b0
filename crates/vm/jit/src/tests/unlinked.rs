//! Unlinked units and executables linked from them.

use std::sync::Arc;

use kestrel_syntax::ParserOptions;

use super::helpers::{driver, link_program, range};
use crate::types::Specialization;
use crate::unlinked::{UnitKind, UnlinkedUnit};

#[test]
fn strict_program_folds_its_constants() {
    let mut driver = driver();
    let program = link_program(&mut driver, "\"use strict\"; var a=1+2;");
    let unit = driver.executable(program).unwrap().unit().clone();
    assert_eq!(unit.kind(), UnitKind::Program);
    assert!(unit.is_strict());
    assert_eq!(unit.numeric_constants(), &[3.0]);
    assert_eq!(unit.stats().reparses, 1);
    assert_eq!(unit.declared_variables(), vec![Arc::<str>::from("a")]);
}

#[test]
fn closures_share_one_function_unit() {
    let program = UnlinkedUnit::program(
        &range("function make(x) { return x + 1; } make(1); make(2);"),
        &ParserOptions::default(),
    )
    .unwrap();
    let make = program.function_named("make").unwrap();
    assert!(!make.is_parsed(), "bodies are parsed lazily");

    let mut driver = driver();
    let first = driver.link_function(make).unwrap();
    assert!(make.is_parsed());
    let second = driver.link_function(make).unwrap();
    assert_ne!(first, second, "every closure is its own executable");

    let first_unit = driver.executable(first).unwrap().unit();
    let second_unit = driver.executable(second).unwrap().unit();
    assert!(Arc::ptr_eq(first_unit, second_unit), "the body was parsed once");
    assert_eq!(first_unit.kind(), UnitKind::Function);
    assert_eq!(first_unit.parameters(), &[Arc::<str>::from("x")]);
    assert_eq!(first_unit.stats().reparses, 0);
}

#[test]
fn closures_keep_separate_chains() {
    let program = UnlinkedUnit::program(&range("function f(a) { return a; }"), &ParserOptions::default()).unwrap();
    let f = program.function_named("f").unwrap();
    let mut driver = driver();
    let first = driver.link_function(f).unwrap();
    let second = driver.link_function(f).unwrap();

    let block = driver.prepare(first, Specialization::Call).unwrap();
    assert_eq!(driver.live_block(second, Specialization::Call).unwrap(), None);
    assert_eq!(driver.block(block).unwrap().owner(), first);
}

#[test]
fn eval_units_link_as_global_code() {
    let mut driver = driver();
    let eval = driver
        .link_eval(&range("var y = 2; y;"), &ParserOptions::default())
        .unwrap();
    let executable = driver.executable(eval).unwrap();
    assert_eq!(executable.unit().kind(), UnitKind::Eval);
    assert!(!executable.is_function());
    assert_eq!(executable.specializations(), &[Specialization::Global]);
}

#[test]
fn parse_errors_surface_at_link_time() {
    let mut driver = driver();
    let err = driver
        .link_program(&range("var = ;"), &ParserOptions::default())
        .unwrap_err();
    assert!(matches!(err, crate::JitError::Parse(_)), "got {err:?}");
    assert!(driver.executables().is_empty());
}
