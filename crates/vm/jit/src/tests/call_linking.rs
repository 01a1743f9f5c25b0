//! Linking call sites to live entries.

use super::helpers::{driver, link_function, link_program};
use crate::call_link::CallSiteLocation;
use crate::error::JitError;
use crate::types::{Specialization, Tier};

const ADD: &str = "function add(a, b) { return a + b; }";

#[test]
fn new_sites_start_on_the_slow_path() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let site = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    let record = driver.call_sites().get(site).unwrap();
    assert!(!record.is_linked());
    assert!(matches!(record.location(), CallSiteLocation::Machine { .. }));
    assert_eq!(record.target().unwrap(), driver.thunks().virtual_call_slow_path());
    assert_eq!(driver.live_block(add, Specialization::Call).unwrap(), None, "creating a site compiles nothing");
}

#[test]
fn linking_is_idempotent() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let site = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    let first = driver.link_call(site, add, Specialization::Call).unwrap();
    let second = driver.link_call(site, add, Specialization::Call).unwrap();
    assert_eq!(first, second);

    let live = driver.live_block(add, Specialization::Call).unwrap().unwrap();
    assert_eq!(driver.block(live).unwrap().incoming_calls(), &[site], "registered once");
    let record = driver.call_sites().get(site).unwrap();
    assert_eq!(record.linked_to(), Some(live));
    assert_eq!(record.target().unwrap(), first);
    assert_eq!(driver.metrics().snapshot().calls_relinked, 2);
}

#[test]
fn short_calls_take_the_arity_entry() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let short = driver.create_interpreter_call_site(add, Specialization::Call, 1).unwrap();
    let full = driver.create_interpreter_call_site(add, Specialization::Call, 3).unwrap();

    assert_eq!(
        driver.link_call(short, add, Specialization::Call).unwrap(),
        driver.thunks().arity_dispatch()
    );
    assert_eq!(driver.link_call(full, add, Specialization::Call).unwrap(), driver.thunks().dispatch());

    let optimized = driver
        .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
        .unwrap()
        .compiled()
        .unwrap();
    let entries = driver.block(optimized).unwrap().entries();
    assert_eq!(driver.resolve_call(short).unwrap(), entries.arity_check);
    assert_eq!(driver.resolve_call(full).unwrap(), entries.entry);
    assert!(matches!(
        driver.call_sites().get(short).unwrap().location(),
        CallSiteLocation::Interpreter { target } if *target == entries.arity_check
    ));
}

#[test]
fn tier_up_unlinks_the_old_block() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let sites: Vec<_> = (0..3)
        .map(|_| driver.create_call_site(add, Specialization::Call, 2).unwrap())
        .collect();
    for site in &sites {
        driver.link_call(*site, add, Specialization::Call).unwrap();
    }
    let baseline = driver.live_block(add, Specialization::Call).unwrap().unwrap();

    driver
        .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
        .unwrap();
    assert!(driver.block(baseline).unwrap().incoming_calls().is_empty());
    for site in &sites {
        assert!(!driver.call_sites().get(*site).unwrap().is_linked());
    }
    assert_eq!(driver.metrics().snapshot().calls_unlinked, 3);
}

#[test]
fn unlink_reports_the_count() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let live = driver.prepare(add, Specialization::Call).unwrap();
    assert_eq!(driver.unlink_incoming_calls(live).unwrap(), 0);

    let site = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    driver.link_call(site, add, Specialization::Call).unwrap();
    assert_eq!(driver.unlink_incoming_calls(live).unwrap(), 1);
    assert_eq!(driver.unlink_incoming_calls(live).unwrap(), 0, "already unlinked");
}

#[test]
fn removed_sites_leave_their_block() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let site = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    driver.link_call(site, add, Specialization::Call).unwrap();
    let live = driver.live_block(add, Specialization::Call).unwrap().unwrap();

    driver.remove_call_site(site).unwrap();
    assert!(driver.block(live).unwrap().incoming_calls().is_empty());
    assert!(driver.call_sites().is_empty());
    let err = driver.resolve_call(site).unwrap_err();
    assert!(matches!(err, JitError::UnknownCallSite(_)), "got {err:?}");
}

#[test]
fn relinking_to_another_callee_moves_the_site() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let other = link_function(&mut driver, ADD, "add");
    let site = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    driver.link_call(site, add, Specialization::Call).unwrap();
    let first = driver.live_block(add, Specialization::Call).unwrap().unwrap();

    driver.link_call(site, other, Specialization::Call).unwrap();
    let second = driver.live_block(other, Specialization::Call).unwrap().unwrap();
    assert!(driver.block(first).unwrap().incoming_calls().is_empty());
    assert_eq!(driver.block(second).unwrap().incoming_calls(), &[site]);
    assert_eq!(driver.call_sites().get(site).unwrap().callee(), other);
}

#[test]
fn construct_and_call_sites_are_separate() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let call = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    let construct = driver.create_call_site(add, Specialization::Construct, 2).unwrap();
    driver.link_call(call, add, Specialization::Call).unwrap();
    driver.link_call(construct, add, Specialization::Construct).unwrap();

    driver
        .compile_if_appropriate(add, Specialization::Construct, Tier::Optimized)
        .unwrap();
    assert!(driver.call_sites().get(call).unwrap().is_linked(), "call chain untouched");
    assert!(!driver.call_sites().get(construct).unwrap().is_linked());
}

#[test]
fn programs_have_no_construct_sites() {
    let mut driver = driver();
    let program = link_program(&mut driver, "1;");
    let err = driver
        .create_call_site(program, Specialization::Construct, 0)
        .unwrap_err();
    assert!(matches!(err, JitError::NoSuchChain { .. }), "got {err:?}");
}
