//! Jettisoning optimized code.

use std::sync::Arc;

use super::helpers::{WARM_UP, branch_destination, driver, link_function, link_program};
use crate::error::JitError;
use crate::types::{CompileOutcome, Specialization, Tier};

const COUNT: &str = "function count(n) { var i = 0; while (i < n) { i = i + 1; } return i; }";

#[test]
fn jettison_falls_back_to_the_alternative() {
    let mut driver = driver();
    let count = link_function(&mut driver, COUNT, "count");
    let baseline = driver.prepare(count, Specialization::Call).unwrap();
    let optimized = driver
        .compile_if_appropriate(count, Specialization::Call, Tier::Optimized)
        .unwrap()
        .compiled()
        .unwrap();
    let regions = driver.pool().region_count();

    let live = driver.jettison(count, Specialization::Call).unwrap();
    assert_eq!(live, baseline);
    assert_eq!(driver.live_tier(count, Specialization::Call).unwrap(), Some(Tier::Baseline));
    assert!(driver.block(optimized).is_err(), "jettisoned block is released");
    assert_eq!(driver.chain(count, Specialization::Call).unwrap(), vec![baseline]);
    assert_eq!(driver.pool().region_count(), regions - 1, "its code region is freed");

    let fallback = driver.block(baseline).unwrap();
    assert_eq!(fallback.reoptimization_retry_counter(), 1);
    assert_eq!(fallback.counter().threshold(), WARM_UP << 1);
    assert_eq!(driver.metrics().snapshot().jettisons, 1);
}

#[test]
fn watchpoints_are_patched_to_the_osr_exit() {
    let mut driver = driver();
    let count = link_function(&mut driver, COUNT, "count");
    let optimized = driver
        .compile_if_appropriate(count, Specialization::Call, Tier::Optimized)
        .unwrap()
        .compiled()
        .unwrap();
    let block = driver.block(optimized).unwrap();
    // keep the region alive so the patch can be inspected
    let code = Arc::clone(block.code().unwrap());
    let watchpoint = block.watchpoints()[0];
    let before = driver.pool().read(watchpoint, 1).unwrap();
    assert_ne!(before, [0xe9]);

    driver.jettison(count, Specialization::Call).unwrap();
    assert_eq!(driver.pool().read(watchpoint, 1).unwrap(), [0xe9]);
    assert_eq!(branch_destination(&driver, watchpoint), driver.thunks().osr_exit());
    drop(code);
}

#[test]
fn baseline_has_no_alternative() {
    let mut driver = driver();
    let count = link_function(&mut driver, COUNT, "count");
    let err = driver.jettison(count, Specialization::Call).unwrap_err();
    assert!(matches!(err, JitError::NoLiveBlock { .. }), "got {err:?}");

    driver.prepare(count, Specialization::Call).unwrap();
    let err = driver.jettison(count, Specialization::Call).unwrap_err();
    assert!(matches!(err, JitError::NoAlternative { .. }), "got {err:?}");
    assert_eq!(driver.live_tier(count, Specialization::Call).unwrap(), Some(Tier::Baseline));
}

#[test]
fn incoming_calls_are_unlinked() {
    let mut driver = driver();
    let count = link_function(&mut driver, COUNT, "count");
    driver
        .compile_if_appropriate(count, Specialization::Call, Tier::Optimized)
        .unwrap();
    let optimized = driver.live_block(count, Specialization::Call).unwrap().unwrap();
    let machine = driver.create_call_site(count, Specialization::Call, 1).unwrap();
    let interpreter = driver
        .create_interpreter_call_site(count, Specialization::Call, 1)
        .unwrap();
    let entry = driver.link_call(machine, count, Specialization::Call).unwrap();
    assert_eq!(entry, driver.block(optimized).unwrap().entries().entry);
    driver.link_call(interpreter, count, Specialization::Call).unwrap();
    assert_eq!(driver.block(optimized).unwrap().incoming_calls().len(), 2);

    let baseline = driver.jettison(count, Specialization::Call).unwrap();
    let slow_path = driver.thunks().virtual_call_slow_path();
    for site in [machine, interpreter] {
        let record = driver.call_sites().get(site).unwrap();
        assert!(!record.is_linked());
        assert_eq!(record.target().unwrap(), slow_path);
    }
    assert_eq!(driver.metrics().snapshot().calls_unlinked, 2);

    assert_eq!(driver.resolve_call(machine).unwrap(), driver.thunks().dispatch());
    assert_eq!(driver.block(baseline).unwrap().incoming_calls(), &[machine]);
}

#[test]
fn chain_can_tier_up_again() {
    let mut driver = driver();
    let count = link_function(&mut driver, COUNT, "count");
    driver
        .compile_if_appropriate(count, Specialization::Call, Tier::Optimized)
        .unwrap();
    driver.jettison(count, Specialization::Call).unwrap();

    // the back-off doubled the threshold
    let threshold = WARM_UP << 1;
    for _ in 1..threshold {
        let invocation = driver.invoke(count, Specialization::Call, 1).unwrap();
        assert_eq!(invocation.tier_up, None);
    }
    let crossing = driver.invoke(count, Specialization::Call, 1).unwrap();
    let again = crossing.tier_up.and_then(CompileOutcome::compiled).unwrap();
    assert_eq!(driver.block(again).unwrap().reoptimization_retry_counter(), 1, "inherited");
    assert_eq!(driver.chain(count, Specialization::Call).unwrap().len(), 2);
}

#[test]
fn global_code_jettisons_too() {
    let mut driver = driver();
    let program = link_program(&mut driver, "7;");
    driver
        .compile_if_appropriate(program, Specialization::Global, Tier::Optimized)
        .unwrap();
    let live = driver.jettison(program, Specialization::Global).unwrap();
    assert_eq!(driver.block(live).unwrap().tier(), Tier::Baseline);
}
