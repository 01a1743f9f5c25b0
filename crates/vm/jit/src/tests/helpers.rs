//! Shared helpers for kestrel-jit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use kestrel_asm::{CodePtr, branch_target};
use kestrel_syntax::{ParserOptions, SourceProvider, SourceRange};

use crate::backend::{CompileRequest, CompiledCode, TierCompiler};
use crate::driver::JitDriver;
use crate::error::JitError;
use crate::executable::ExecutableId;
use crate::types::{JitConfig, Tier};

/// Base address of test pools.
pub const TEST_POOL_BASE: u64 = 0x20_0000;

/// Warm-up threshold used by [`test_config`].
pub const WARM_UP: u32 = 4;

pub fn test_config() -> JitConfig {
    JitConfig {
        threshold_for_optimize_after_warm_up: WARM_UP,
        threshold_for_optimize_soon: 2,
        executable_pool_base: TEST_POOL_BASE,
        ..JitConfig::default()
    }
}

pub fn driver() -> JitDriver {
    JitDriver::new(test_config()).expect("thunks generate")
}

pub fn range(text: &str) -> SourceRange {
    SourceProvider::new("jit-test.js", text).full_range()
}

pub fn link_program(driver: &mut JitDriver, text: &str) -> ExecutableId {
    driver
        .link_program(&range(text), &ParserOptions::default())
        .expect("program parses")
}

/// Link a closure of the function `name` declared in `text`.
pub fn link_function(driver: &mut JitDriver, text: &str, name: &str) -> ExecutableId {
    let program = crate::unlinked::UnlinkedUnit::program(&range(text), &ParserOptions::default()).expect("program parses");
    let function = program.function_named(name).expect("function is declared").clone();
    driver.link_function(&function).expect("body parses")
}

/// Decode the branch at `at` and return where it lands.
pub fn branch_destination(driver: &JitDriver, at: CodePtr) -> CodePtr {
    // the branch may end its region, so try the widest read first
    let bytes = [6, 5, 2]
        .into_iter()
        .find_map(|len| driver.pool().read(at, len).ok())
        .expect("branch is inside a region");
    branch_target(&bytes, 0, at).expect("a branch").target
}

/// Wraps a tier compiler and fails a chosen number of compiles.
#[derive(Debug)]
pub struct FailingCompiler<C> {
    inner: C,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl<C: TierCompiler> FailingCompiler<C> {
    /// Fail every compile.
    pub fn always(inner: C) -> Arc<Self> {
        Self::times(inner, u32::MAX)
    }

    /// Fail the next `failures` compiles, then defer to `inner`.
    pub fn times(inner: C, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl<C: TierCompiler> TierCompiler for FailingCompiler<C> {
    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn name(&self) -> &'static str {
        "failing"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Option<CompiledCode>, JitError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let failing = self
            .failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(JitError::CompilationFailed("injected failure".to_string()));
        }
        self.inner.compile(request)
    }
}
