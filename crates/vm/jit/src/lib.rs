//! # kestrel-jit
//!
//! Unlinked units, linked executables and the tiering driver.
//!
//! ## Architecture
//!
//! ```text
//! SourceRange ──► UnlinkedUnit (Arc, immutable) ──► Executable
//!                   └── UnlinkedFunction ─ lazy ─┘     │  one CodeChain per specialization
//!                                                      ▼
//!                 CodeBlockArena:  live ──alternative──► older ──► ... ──► baseline
//!                                   ▲
//!   JitDriver ── compile_if_appropriate / jettison / link_call / resolve_call
//!       │
//!       ├── TierCompiler (Baseline: dispatch thunk, Optimized: int32 x86-64)
//!       ├── RuntimeThunks (dispatch, slow path, OSR exit, arity fixup, construct)
//!       └── ExecutablePool (kestrel-asm)
//! ```
//!
//! - [`driver::JitDriver`] owns all state; chain updates are index swaps in
//!   the [`code_block::CodeBlockArena`].
//! - [`harness`] picks entries and ticks [`counter::TierUpCounter`]s; a
//!   counter crossing its threshold triggers the optimizing tier.
//! - Tier compilers sit behind [`backend::TierCompiler`] so tests can
//!   inject failures.

pub mod backend;
pub mod baseline;
pub mod call_link;
pub mod code_block;
pub mod counter;
pub mod driver;
pub mod error;
pub mod executable;
pub mod harness;
pub mod optimizing;
pub mod thunks;
pub mod types;
pub mod unlinked;

#[cfg(test)]
mod tests;

pub use backend::{CompileRequest, CompiledCode, EntryPoints, TierCompiler};
pub use call_link::{CallSite, CallSiteId, CallSiteLocation};
pub use code_block::{CodeBlock, CodeBlockId};
pub use driver::JitDriver;
pub use error::JitError;
pub use executable::{Executable, ExecutableId};
pub use harness::{EntrySelection, Invocation, select_entry};
pub use thunks::{RuntimeThunks, ThunkKind};
pub use types::{CompileOutcome, JitConfig, JitMetrics, MetricsSnapshot, Specialization, Tier};
pub use unlinked::{UnitKind, UnlinkedFunction, UnlinkedUnit};
