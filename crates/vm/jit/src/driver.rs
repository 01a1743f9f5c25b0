//! The tiering driver.
//!
//! Owns every executable, the code-block arena, the call-link table and
//! the executable pool. All chain surgery happens here:
//!
//! - [`JitDriver::compile_if_appropriate`] advances a chain by one tier or
//!   leaves it exactly as it was;
//! - [`JitDriver::jettison`] drops the live block back to its alternative;
//! - call sites are linked to live entries and unlinked again whenever
//!   the block they point at stops being live.
//!
//! Compilation is synchronous: the thread that is about to run the code
//! blocks until the tier compiler returns.

use std::sync::Arc;

use kestrel_asm::{CodePtr, ExecutablePool};
use kestrel_syntax::{ParserOptions, SourceRange};
use rustc_hash::FxHashMap;

use crate::backend::{CompileRequest, CompiledCode, TierCompiler};
use crate::baseline::BaselineCompiler;
use crate::call_link::{CallLinkTable, CallSiteId, CallSiteLocation, emit_call_stub};
use crate::code_block::{CodeBlock, CodeBlockArena, CodeBlockId};
use crate::counter::TierUpCounter;
use crate::error::JitError;
use crate::executable::{Executable, ExecutableId};
use crate::harness::select_entry;
use crate::optimizing::OptimizingCompiler;
use crate::thunks::RuntimeThunks;
use crate::types::{CompileOutcome, JitConfig, JitMetrics, Specialization, Tier};
use crate::unlinked::{UnlinkedFunction, UnlinkedUnit};

pub struct JitDriver {
    config: JitConfig,
    pool: ExecutablePool,
    thunks: RuntimeThunks,
    arena: CodeBlockArena,
    executables: Vec<Executable>,
    calls: CallLinkTable,
    compilers: FxHashMap<Tier, Arc<dyn TierCompiler>>,
    metrics: Arc<JitMetrics>,
}

impl std::fmt::Debug for JitDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitDriver")
            .field("config", &self.config)
            .field("executables", &self.executables.len())
            .field("code_blocks", &self.arena.len())
            .field("call_sites", &self.calls.len())
            .finish_non_exhaustive()
    }
}

impl JitDriver {
    /// Create a driver with the baseline and optimizing compilers registered.
    pub fn new(config: JitConfig) -> Result<Self, JitError> {
        let pool = ExecutablePool::new(config.executable_pool_base);
        let thunks = RuntimeThunks::generate(&pool)?;
        let mut driver = Self {
            config,
            pool,
            thunks,
            arena: CodeBlockArena::new(),
            executables: Vec::new(),
            calls: CallLinkTable::new(),
            compilers: FxHashMap::default(),
            metrics: Arc::new(JitMetrics::new()),
        };
        driver.register_compiler(Arc::new(BaselineCompiler));
        driver.register_compiler(Arc::new(OptimizingCompiler));
        Ok(driver)
    }

    /// Install `compiler` for its tier, replacing any previous one.
    pub fn register_compiler(&mut self, compiler: Arc<dyn TierCompiler>) {
        tracing::debug!(tier = %compiler.tier(), compiler = compiler.name(), "Registered tier compiler");
        self.compilers.insert(compiler.tier(), compiler);
    }

    pub fn compiler(&self, tier: Tier) -> Option<&Arc<dyn TierCompiler>> {
        self.compilers.get(&tier)
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn pool(&self) -> &ExecutablePool {
        &self.pool
    }

    pub fn thunks(&self) -> &RuntimeThunks {
        &self.thunks
    }

    pub fn arena(&self) -> &CodeBlockArena {
        &self.arena
    }

    pub fn call_sites(&self) -> &CallLinkTable {
        &self.calls
    }

    pub fn metrics(&self) -> &Arc<JitMetrics> {
        &self.metrics
    }

    // ─── Linking ───────────────────────────────────────────────────

    pub fn link_program(&mut self, source: &SourceRange, options: &ParserOptions) -> Result<ExecutableId, JitError> {
        let unit = UnlinkedUnit::program(source, options)?;
        Ok(self.link_unit(unit))
    }

    pub fn link_eval(&mut self, source: &SourceRange, options: &ParserOptions) -> Result<ExecutableId, JitError> {
        let unit = UnlinkedUnit::eval(source, options)?;
        Ok(self.link_unit(unit))
    }

    /// Link a closure of `function`, parsing its body if this is the first one.
    pub fn link_function(&mut self, function: &UnlinkedFunction) -> Result<ExecutableId, JitError> {
        let unit = function.unit()?;
        Ok(self.link_unit(unit))
    }

    /// Bind an already built unit to a new executable. No code exists yet.
    pub fn link_unit(&mut self, unit: Arc<UnlinkedUnit>) -> ExecutableId {
        let id = ExecutableId(u32::try_from(self.executables.len()).unwrap_or(u32::MAX));
        tracing::debug!(executable = %id, kind = ?unit.kind(), "Linked executable");
        self.executables.push(Executable::new(id, unit));
        id
    }

    pub fn executable(&self, id: ExecutableId) -> Result<&Executable, JitError> {
        self.executables.get(id.index()).ok_or(JitError::UnknownExecutable(id))
    }

    pub fn executables(&self) -> &[Executable] {
        &self.executables
    }

    // ─── Chains ────────────────────────────────────────────────────

    pub fn block(&self, id: CodeBlockId) -> Result<&CodeBlock, JitError> {
        self.arena.get(id).ok_or(JitError::UnknownCodeBlock(id))
    }

    /// The live block of a chain; `None` before the first compile.
    pub fn live_block(
        &self,
        executable: ExecutableId,
        specialization: Specialization,
    ) -> Result<Option<CodeBlockId>, JitError> {
        let chain = self
            .executable(executable)?
            .chain(specialization)
            .ok_or(JitError::NoSuchChain {
                executable,
                specialization,
            })?;
        Ok(chain.live)
    }

    pub fn live_tier(&self, executable: ExecutableId, specialization: Specialization) -> Result<Option<Tier>, JitError> {
        self.live_block(executable, specialization)?
            .map(|id| self.block(id).map(CodeBlock::tier))
            .transpose()
    }

    /// Block ids from the live block down to the oldest alternative.
    pub fn chain(&self, executable: ExecutableId, specialization: Specialization) -> Result<Vec<CodeBlockId>, JitError> {
        Ok(self.arena.chain(self.live_block(executable, specialization)?))
    }

    fn set_live(
        &mut self,
        executable: ExecutableId,
        specialization: Specialization,
        live: CodeBlockId,
    ) -> Result<(), JitError> {
        let chain = self
            .executables
            .get_mut(executable.index())
            .ok_or(JitError::UnknownExecutable(executable))?
            .chain_mut(specialization)
            .ok_or(JitError::NoSuchChain {
                executable,
                specialization,
            })?;
        chain.live = Some(live);
        Ok(())
    }

    // ─── Tiering ───────────────────────────────────────────────────

    /// Try to move a chain up to `target`.
    ///
    /// Either a new block at `target` becomes live, or the live block and
    /// its code stay exactly as they were. Only a failed baseline compile
    /// is an error ([`JitError::NoViableTier`]); failures at higher tiers
    /// are reported as [`CompileOutcome::Failed`].
    pub fn compile_if_appropriate(
        &mut self,
        executable: ExecutableId,
        specialization: Specialization,
        target: Tier,
    ) -> Result<CompileOutcome, JitError> {
        if target > Tier::Baseline {
            self.prepare(executable, specialization)?;
        }
        let old = self.live_block(executable, specialization)?;
        if let Some(old) = old
            && self.block(old)?.tier() >= target
        {
            return Ok(CompileOutcome::AlreadyAtTier);
        }

        if let Some(old) = old {
            self.unlink_incoming_calls(old)?;
        }

        let unit = self.executable(executable)?.unit().clone();
        let compiler = self.compilers.get(&target).cloned();
        let result = match &compiler {
            Some(compiler) => compiler.compile(&CompileRequest {
                unit: &unit,
                specialization,
                config: &self.config,
                pool: &self.pool,
                thunks: &self.thunks,
            }),
            None => Err(JitError::CompilationFailed(format!("no compiler registered for the {target} tier"))),
        };

        match (result, old) {
            (Ok(Some(compiled)), _) => {
                let id = self.install(executable, specialization, target, unit, old, compiled)?;
                Ok(CompileOutcome::Compiled(id))
            }
            (Ok(None), None) => Err(JitError::NoViableTier {
                executable,
                reason: format!("the {target} compiler declined the unit"),
            }),
            (Err(error), None) => Err(JitError::NoViableTier {
                executable,
                reason: error.to_string(),
            }),
            (Ok(None), Some(old)) => {
                let block = self.arena.get_mut(old).ok_or(JitError::UnknownCodeBlock(old))?;
                block.counter.dont_optimize_anytime_soon();
                JitMetrics::bump(&self.metrics.capability_skips);
                tracing::info!(
                    executable = %executable,
                    specialization = %specialization,
                    tier = %target,
                    "Tier not applicable, staying at current tier"
                );
                Ok(CompileOutcome::StayedAtTier)
            }
            (Err(error), Some(old)) => {
                let block = self.arena.get_mut(old).ok_or(JitError::UnknownCodeBlock(old))?;
                block.count_reoptimization(self.config.reoptimization_retry_counter_max);
                block
                    .counter
                    .optimize_after_warm_up(&self.config, block.reoptimization_retry_counter);
                JitMetrics::bump(&self.metrics.compile_failures);
                tracing::info!(
                    executable = %executable,
                    specialization = %specialization,
                    tier = %target,
                    retries = block.reoptimization_retry_counter,
                    error = %error,
                    "Tier compile failed, keeping previous code block"
                );
                Ok(CompileOutcome::Failed)
            }
        }
    }

    /// Splice a freshly compiled block in front of the chain.
    fn install(
        &mut self,
        executable: ExecutableId,
        specialization: Specialization,
        tier: Tier,
        unit: Arc<UnlinkedUnit>,
        alternative: Option<CodeBlockId>,
        compiled: CompiledCode,
    ) -> Result<CodeBlockId, JitError> {
        // validate before touching the arena so a bad handle leaves nothing behind
        self.live_block(executable, specialization)?;
        let retries = alternative
            .and_then(|id| self.arena.get(id))
            .map_or(0, CodeBlock::reoptimization_retry_counter);
        let size = compiled.code.as_ref().map_or(0, |code| code.size());
        let id = self.arena.insert(CodeBlock {
            unit,
            owner: executable,
            specialization,
            tier,
            code: compiled.code,
            entries: compiled.entries,
            alternative,
            incoming_calls: Vec::new(),
            counter: TierUpCounter::after_warm_up(&self.config, retries),
            watchpoints: compiled.watchpoints,
            reoptimization_retry_counter: retries,
        });
        self.set_live(executable, specialization, id)?;
        JitMetrics::bump(&self.metrics.compilations);
        tracing::info!(
            executable = %executable,
            specialization = %specialization,
            tier = %tier,
            block = %id,
            bytes = size,
            "Compiled code block"
        );
        Ok(id)
    }

    /// Throw away the live block and make its alternative live again.
    ///
    /// Returns the new live block.
    pub fn jettison(
        &mut self,
        executable: ExecutableId,
        specialization: Specialization,
    ) -> Result<CodeBlockId, JitError> {
        let live = self
            .live_block(executable, specialization)?
            .ok_or(JitError::NoLiveBlock {
                executable,
                specialization,
            })?;
        let block = self.block(live)?;
        let alternative = block
            .alternative()
            .filter(|id| self.arena.contains(*id))
            .ok_or(JitError::NoAlternative {
                executable,
                specialization,
            })?;
        let tier = block.tier();
        let watchpoints = block.watchpoints().to_vec();

        self.unlink_incoming_calls(live)?;
        let osr_exit = self.thunks.osr_exit();
        for watchpoint in &watchpoints {
            self.pool.replace_with_jump(*watchpoint, osr_exit)?;
        }
        self.set_live(executable, specialization, alternative)?;
        self.arena.release(live);

        let fallback = self
            .arena
            .get_mut(alternative)
            .ok_or(JitError::UnknownCodeBlock(alternative))?;
        fallback.count_reoptimization(self.config.reoptimization_retry_counter_max);
        fallback
            .counter
            .optimize_after_warm_up(&self.config, fallback.reoptimization_retry_counter);
        JitMetrics::bump(&self.metrics.jettisons);
        tracing::info!(
            executable = %executable,
            specialization = %specialization,
            from = %tier,
            to = %fallback.tier,
            watchpoints = watchpoints.len(),
            retries = fallback.reoptimization_retry_counter,
            "Jettisoned code block"
        );
        Ok(alternative)
    }

    /// Make the live block's counter fire after the short threshold.
    pub fn optimize_soon(&mut self, executable: ExecutableId, specialization: Specialization) -> Result<(), JitError> {
        let live = self.prepare(executable, specialization)?;
        let block = self.arena.get_mut(live).ok_or(JitError::UnknownCodeBlock(live))?;
        block
            .counter
            .optimize_soon(&self.config, block.reoptimization_retry_counter);
        Ok(())
    }

    /// Count one execution of `block`. True when the counter fires.
    pub(crate) fn tick_counter(&mut self, block: CodeBlockId) -> Result<bool, JitError> {
        let block = self.arena.get_mut(block).ok_or(JitError::UnknownCodeBlock(block))?;
        Ok(block.counter.tick())
    }

    // ─── Call linking ──────────────────────────────────────────────

    /// Emit a machine-code call site for `callee`. It starts out unlinked,
    /// calling the virtual-call slow path.
    pub fn create_call_site(
        &mut self,
        callee: ExecutableId,
        specialization: Specialization,
        argument_count: u32,
    ) -> Result<CallSiteId, JitError> {
        self.live_block(callee, specialization)?;
        let location = emit_call_stub(&self.pool, self.thunks.virtual_call_slow_path())?;
        Ok(self.calls.insert(callee, specialization, argument_count, location))
    }

    /// Record an interpreter-level call of `callee`, initially unlinked.
    pub fn create_interpreter_call_site(
        &mut self,
        callee: ExecutableId,
        specialization: Specialization,
        argument_count: u32,
    ) -> Result<CallSiteId, JitError> {
        self.live_block(callee, specialization)?;
        let location = CallSiteLocation::Interpreter {
            target: self.thunks.virtual_call_slow_path(),
        };
        Ok(self.calls.insert(callee, specialization, argument_count, location))
    }

    /// Point `site` at the current entry of `callee` and register it as an
    /// incoming call of the live block. Creates the baseline if needed.
    pub fn link_call(
        &mut self,
        site: CallSiteId,
        callee: ExecutableId,
        specialization: Specialization,
    ) -> Result<CodePtr, JitError> {
        let live = self.prepare(callee, specialization)?;
        self.detach(site)?;
        self.calls.retarget(site, callee, specialization)?;
        let argument_count = self
            .calls
            .get(site)
            .ok_or(JitError::UnknownCallSite(site))?
            .argument_count();
        let block = self.arena.get_mut(live).ok_or(JitError::UnknownCodeBlock(live))?;
        let entry = select_entry(block, &self.thunks, argument_count).entry;
        self.calls.link(site, live, entry)?;
        block.incoming_calls.push(site);
        JitMetrics::bump(&self.metrics.calls_relinked);
        tracing::debug!(site = %site, callee = %callee, block = %live, entry = %entry, "Linked call site");
        Ok(entry)
    }

    /// The slow path: relink an unlinked site to its callee's live entry.
    pub fn resolve_call(&mut self, site: CallSiteId) -> Result<CodePtr, JitError> {
        let record = self.calls.get(site).ok_or(JitError::UnknownCallSite(site))?;
        let (callee, specialization) = (record.callee(), record.specialization());
        self.link_call(site, callee, specialization)
    }

    /// Point every incoming call of `block` back at the slow path.
    /// Returns how many sites were unlinked.
    pub fn unlink_incoming_calls(&mut self, block: CodeBlockId) -> Result<usize, JitError> {
        let slow_path = self.thunks.virtual_call_slow_path();
        let record = self.arena.get_mut(block).ok_or(JitError::UnknownCodeBlock(block))?;
        let sites = std::mem::take(&mut record.incoming_calls);
        for site in &sites {
            self.calls.unlink(*site, slow_path)?;
            JitMetrics::bump(&self.metrics.calls_unlinked);
        }
        if !sites.is_empty() {
            tracing::debug!(block = %block, sites = sites.len(), "Unlinked incoming calls");
        }
        Ok(sites.len())
    }

    /// Forget a call site, removing it from the block it is linked to.
    pub fn remove_call_site(&mut self, site: CallSiteId) -> Result<(), JitError> {
        self.detach(site)?;
        self.calls.remove(site).ok_or(JitError::UnknownCallSite(site))?;
        Ok(())
    }

    fn detach(&mut self, site: CallSiteId) -> Result<(), JitError> {
        let record = self.calls.get(site).ok_or(JitError::UnknownCallSite(site))?;
        if let Some(linked) = record.linked_to()
            && let Some(block) = self.arena.get_mut(linked)
        {
            block.incoming_calls.retain(|incoming| *incoming != site);
        }
        Ok(())
    }
}
