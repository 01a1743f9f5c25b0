//! compile_if_appropriate, counters and the harness.

use std::sync::Arc;

use proptest::prelude::*;

use super::helpers::{FailingCompiler, WARM_UP, driver, link_function, link_program, test_config};
use crate::backend::TierCompiler;
use crate::baseline::BaselineCompiler;
use crate::counter::CounterMode;
use crate::driver::JitDriver;
use crate::error::JitError;
use crate::optimizing::OptimizingCompiler;
use crate::types::{CompileOutcome, JitConfig, Specialization, Tier};

const ADD: &str = "function add(a, b) { return a + b; }";

#[test]
fn baseline_is_created_on_first_use() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    assert_eq!(driver.live_tier(add, Specialization::Call).unwrap(), None);

    let live = driver.prepare(add, Specialization::Call).unwrap();
    let block = driver.block(live).unwrap();
    assert_eq!(block.tier(), Tier::Baseline);
    assert!(block.code().is_none(), "baseline runs through the interpreter");
    assert_eq!(block.entries().entry, driver.thunks().dispatch());
    assert_eq!(block.alternative(), None);
    assert_eq!(driver.prepare(add, Specialization::Call).unwrap(), live, "prepare is idempotent");
    assert_eq!(driver.metrics().snapshot().compilations, 1);
}

#[test]
fn optimizing_compile_splices_a_new_block() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    let baseline = driver.prepare(add, Specialization::Call).unwrap();

    let outcome = driver
        .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
        .unwrap();
    let optimized = outcome.compiled().expect("compiled");
    assert_eq!(driver.live_block(add, Specialization::Call).unwrap(), Some(optimized));
    let block = driver.block(optimized).unwrap();
    assert_eq!(block.tier(), Tier::Optimized);
    assert_eq!(block.alternative(), Some(baseline));
    let code = block.code().expect("optimized code has machine code");
    assert!(code.contains(block.entries().entry));
    assert!(code.contains(block.entries().arity_check));
    assert_eq!(driver.chain(add, Specialization::Call).unwrap(), vec![optimized, baseline]);

    assert_eq!(
        driver
            .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
            .unwrap(),
        CompileOutcome::AlreadyAtTier
    );
    assert_eq!(
        driver
            .compile_if_appropriate(add, Specialization::Call, Tier::Baseline)
            .unwrap(),
        CompileOutcome::AlreadyAtTier,
        "never tiers down"
    );
}

#[test]
fn failed_compile_keeps_baseline_and_calls_resolvable() {
    let mut driver = driver();
    let failing = FailingCompiler::always(OptimizingCompiler);
    driver.register_compiler(failing.clone());
    let add = link_function(&mut driver, ADD, "add");
    let baseline = driver.prepare(add, Specialization::Call).unwrap();

    let site = driver.create_call_site(add, Specialization::Call, 2).unwrap();
    let entry = driver.link_call(site, add, Specialization::Call).unwrap();
    assert_eq!(entry, driver.thunks().dispatch());

    let outcome = driver
        .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
        .unwrap();
    assert_eq!(outcome, CompileOutcome::Failed);
    assert_eq!(failing.attempts(), 1);
    assert_eq!(driver.live_block(add, Specialization::Call).unwrap(), Some(baseline));
    let block = driver.block(baseline).unwrap();
    assert_eq!(block.tier(), Tier::Baseline);
    assert!(block.code().is_none(), "machine code handle unchanged");
    assert_eq!(driver.arena().len(), 1, "no block left behind");

    // the site was unlinked for the attempt and now lands on the slow path
    let record = driver.call_sites().get(site).unwrap();
    assert!(!record.is_linked());
    assert_eq!(record.target().unwrap(), driver.thunks().virtual_call_slow_path());

    let relinked = driver.resolve_call(site).unwrap();
    assert_eq!(relinked, driver.thunks().dispatch(), "baseline entry is reachable again");
    assert_eq!(driver.call_sites().get(site).unwrap().target().unwrap(), relinked);
    assert_eq!(driver.block(baseline).unwrap().incoming_calls(), &[site]);

    let metrics = driver.metrics().snapshot();
    assert_eq!(metrics.compile_failures, 1);
    assert_eq!(metrics.calls_unlinked, 1);
}

#[test]
fn failures_back_off_exponentially() {
    let mut driver = driver();
    driver.register_compiler(FailingCompiler::always(OptimizingCompiler));
    let add = link_function(&mut driver, ADD, "add");
    let baseline = driver.prepare(add, Specialization::Call).unwrap();

    for retries in 1..=3 {
        driver
            .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
            .unwrap();
        let block = driver.block(baseline).unwrap();
        assert_eq!(block.reoptimization_retry_counter(), retries);
        assert_eq!(
            block.counter().threshold(),
            WARM_UP << retries,
            "threshold doubles per retry"
        );
    }
}

#[test]
fn retry_counter_is_capped() {
    let config = JitConfig {
        reoptimization_retry_counter_max: 2,
        ..test_config()
    };
    let mut driver = JitDriver::new(config).unwrap();
    driver.register_compiler(FailingCompiler::always(OptimizingCompiler));
    let add = link_function(&mut driver, ADD, "add");
    let baseline = driver.prepare(add, Specialization::Call).unwrap();
    for _ in 0..5 {
        driver
            .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
            .unwrap();
    }
    let block = driver.block(baseline).unwrap();
    assert_eq!(block.reoptimization_retry_counter(), 2);
    assert_eq!(block.counter().threshold(), WARM_UP << 2);
}

#[test]
fn capability_no_op_stays_at_tier() {
    let mut driver = driver();
    let uses_arguments = link_function(
        &mut driver,
        "function count() { return arguments.length; }",
        "count",
    );
    let baseline = driver.prepare(uses_arguments, Specialization::Call).unwrap();

    let outcome = driver
        .compile_if_appropriate(uses_arguments, Specialization::Call, Tier::Optimized)
        .unwrap();
    assert_eq!(outcome, CompileOutcome::StayedAtTier);
    assert_eq!(
        driver.live_block(uses_arguments, Specialization::Call).unwrap(),
        Some(baseline)
    );
    let block = driver.block(baseline).unwrap();
    assert_eq!(block.counter().mode(), CounterMode::Deferred);
    assert_eq!(block.reoptimization_retry_counter(), 0, "not a failure");
    let metrics = driver.metrics().snapshot();
    assert_eq!(metrics.capability_skips, 1);
    assert_eq!(metrics.compile_failures, 0);
}

#[test]
fn baseline_failure_is_fatal() {
    let mut driver = driver();
    driver.register_compiler(FailingCompiler::always(BaselineCompiler));
    let program = link_program(&mut driver, "var x = 1;");
    let err = driver.prepare(program, Specialization::Global).unwrap_err();
    assert!(matches!(err, JitError::NoViableTier { .. }), "got {err:?}");
    assert_eq!(driver.live_block(program, Specialization::Global).unwrap(), None);
    assert!(driver.arena().is_empty());
}

#[test]
fn wrong_specialization_is_rejected() {
    let mut driver = driver();
    let program = link_program(&mut driver, "1;");
    let err = driver
        .compile_if_appropriate(program, Specialization::Construct, Tier::Baseline)
        .unwrap_err();
    assert!(matches!(err, JitError::NoSuchChain { .. }), "got {err:?}");
}

#[test]
fn call_and_construct_tier_independently() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    driver
        .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
        .unwrap();
    assert_eq!(driver.live_tier(add, Specialization::Call).unwrap(), Some(Tier::Optimized));
    assert_eq!(driver.live_tier(add, Specialization::Construct).unwrap(), None);

    driver.prepare(add, Specialization::Construct).unwrap();
    assert_eq!(
        driver.live_tier(add, Specialization::Construct).unwrap(),
        Some(Tier::Baseline)
    );
}

#[test]
fn invocations_tier_up_at_the_threshold() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");

    for call in 1..WARM_UP {
        let invocation = driver.invoke(add, Specialization::Call, 2).unwrap();
        assert_eq!(invocation.tier, Tier::Baseline, "call {call}");
        assert_eq!(invocation.entry, driver.thunks().dispatch());
        assert_eq!(invocation.tier_up, None);
    }
    let crossing = driver.invoke(add, Specialization::Call, 2).unwrap();
    assert_eq!(crossing.tier, Tier::Baseline, "the crossing call still ran baseline code");
    let optimized = crossing
        .tier_up
        .and_then(CompileOutcome::compiled)
        .expect("threshold crossing compiles");

    let next = driver.invoke(add, Specialization::Call, 2).unwrap();
    assert_eq!(next.tier, Tier::Optimized);
    assert_eq!(next.block, optimized);
    assert_eq!(next.entry, driver.block(optimized).unwrap().entries().entry);

    let short = driver.invoke(add, Specialization::Call, 1).unwrap();
    assert!(short.arity_checked);
    assert_eq!(short.entry, driver.block(optimized).unwrap().entries().arity_check);
    assert_eq!(driver.metrics().snapshot().invocations, u64::from(WARM_UP) + 2);
}

#[test]
fn disabled_jit_never_tiers_up() {
    let config = JitConfig {
        enabled: false,
        ..test_config()
    };
    let mut driver = JitDriver::new(config).unwrap();
    let add = link_function(&mut driver, ADD, "add");
    for _ in 0..WARM_UP * 3 {
        let invocation = driver.invoke(add, Specialization::Call, 2).unwrap();
        assert_eq!(invocation.tier, Tier::Baseline);
        assert_eq!(invocation.tier_up, None);
    }
    assert_eq!(driver.metrics().snapshot().compilations, 1, "only the baseline");
}

#[test]
fn optimize_soon_shortens_the_threshold() {
    let mut driver = driver();
    let add = link_function(&mut driver, ADD, "add");
    driver.optimize_soon(add, Specialization::Call).unwrap();
    let live = driver.live_block(add, Specialization::Call).unwrap().unwrap();
    let counter = driver.block(live).unwrap().counter();
    assert_eq!(counter.mode(), CounterMode::Soon);
    assert_eq!(counter.threshold(), 2);

    driver.invoke(add, Specialization::Call, 2).unwrap();
    let second = driver.invoke(add, Specialization::Call, 2).unwrap();
    assert!(second.tier_up.and_then(CompileOutcome::compiled).is_some());
}

#[derive(Debug, Clone)]
enum Step {
    Compile { fail: bool },
    Jettison,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<bool>().prop_map(|fail| Step::Compile { fail }),
        Just(Step::Jettison),
    ]
}

proptest! {
    #[test]
    fn chain_is_never_left_half_advanced(steps in proptest::collection::vec(step(), 1..24)) {
        let mut driver = driver();
        let failing = FailingCompiler::times(OptimizingCompiler, 0);
        driver.register_compiler(Arc::clone(&failing) as Arc<dyn TierCompiler>);
        let add = link_function(&mut driver, ADD, "add");
        driver.prepare(add, Specialization::Call).unwrap();

        for step in steps {
            let before = driver.live_block(add, Specialization::Call).unwrap().unwrap();
            let before_tier = driver.block(before).unwrap().tier();
            match step {
                Step::Compile { fail } => {
                    failing.fail_next(u32::from(fail));
                    let outcome = driver
                        .compile_if_appropriate(add, Specialization::Call, Tier::Optimized)
                        .unwrap();
                    let live = driver.live_block(add, Specialization::Call).unwrap().unwrap();
                    let block = driver.block(live).unwrap();
                    match outcome {
                        CompileOutcome::Compiled(id) => {
                            prop_assert_eq!(id, live);
                            prop_assert_eq!(block.tier(), Tier::Optimized);
                            prop_assert!(block.code().is_some());
                        }
                        _ => {
                            prop_assert_eq!(live, before, "live block unchanged");
                            prop_assert_eq!(block.tier(), before_tier);
                        }
                    }
                }
                Step::Jettison => match driver.jettison(add, Specialization::Call) {
                    Ok(live) => {
                        prop_assert_eq!(before_tier, Tier::Optimized);
                        prop_assert!(driver.block(live).unwrap().tier() < before_tier);
                        prop_assert!(driver.block(before).is_err(), "jettisoned block released");
                    }
                    Err(err) => {
                        prop_assert_eq!(before_tier, Tier::Baseline);
                        let no_alternative = matches!(err, JitError::NoAlternative { .. });
                        prop_assert!(no_alternative, "got {:?}", err);
                    }
                },
            }
        }
    }
}
