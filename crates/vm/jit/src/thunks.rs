//! Runtime thunks.
//!
//! Fixed entry points generated once per driver. Compiled code and call
//! sites jump or call into them when they need the runtime: to run a
//! block in the interpreter, to resolve an unlinked call, to leave
//! speculative code, to pad missing arguments or to allocate `this`.
//!
//! Every thunk loads its id into `eax` and jumps to a shared trap. Code is
//! never executed, so the trap only has to be a recognizable instruction.

use std::sync::Arc;

use kestrel_asm::{Assembler, CodePtr, ExecutablePool, LinkBuffer, MachineCode, RegisterId};
use serde::Serialize;

use crate::error::JitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ThunkKind {
    /// Interpreter entry for baseline blocks.
    Dispatch,
    /// Interpreter entry that pads missing arguments first.
    ArityDispatch,
    /// Where unlinked call sites land; relinks them to the live entry.
    VirtualCallSlowPath,
    /// Leaves optimized code and resumes in the baseline block.
    OsrExit,
    /// Pads missing arguments for compiled arity-check entries.
    ArityFixup,
    /// Allocates `this` for construct entries.
    ConstructAlloc,
}

impl ThunkKind {
    pub const ALL: [ThunkKind; 6] = [
        ThunkKind::Dispatch,
        ThunkKind::ArityDispatch,
        ThunkKind::VirtualCallSlowPath,
        ThunkKind::OsrExit,
        ThunkKind::ArityFixup,
        ThunkKind::ConstructAlloc,
    ];

    /// Value placed in `eax` before trapping.
    pub fn id(self) -> i32 {
        match self {
            ThunkKind::Dispatch => 1,
            ThunkKind::ArityDispatch => 2,
            ThunkKind::VirtualCallSlowPath => 3,
            ThunkKind::OsrExit => 4,
            ThunkKind::ArityFixup => 5,
            ThunkKind::ConstructAlloc => 6,
        }
    }

    fn slot(self) -> usize {
        match self {
            ThunkKind::Dispatch => 0,
            ThunkKind::ArityDispatch => 1,
            ThunkKind::VirtualCallSlowPath => 2,
            ThunkKind::OsrExit => 3,
            ThunkKind::ArityFixup => 4,
            ThunkKind::ConstructAlloc => 5,
        }
    }
}

/// Generated thunk region and the address of each thunk in it.
#[derive(Debug, Clone)]
pub struct RuntimeThunks {
    code: Arc<MachineCode>,
    addresses: [CodePtr; ThunkKind::ALL.len()],
}

impl RuntimeThunks {
    pub fn generate(pool: &ExecutablePool) -> Result<Self, JitError> {
        let mut asm = Assembler::new();
        let mut starts = Vec::with_capacity(ThunkKind::ALL.len());
        let mut exits = Vec::with_capacity(ThunkKind::ALL.len());
        for kind in ThunkKind::ALL {
            starts.push(asm.label());
            asm.mov32_ri(RegisterId::Rax, kind.id());
            exits.push(asm.jmp());
        }
        let trap = asm.label();
        asm.int3();
        for exit in exits {
            asm.link_jump(exit, trap);
        }

        let linked = LinkBuffer::new(asm, pool).finalize()?;
        let mut addresses = [CodePtr::default(); ThunkKind::ALL.len()];
        for (slot, start) in addresses.iter_mut().zip(&starts) {
            *slot = linked.location_of(start);
        }
        let code = linked.into_code();
        tracing::debug!(base = %code.base(), size = code.size(), "Generated runtime thunks");
        Ok(Self { code, addresses })
    }

    pub fn address(&self, kind: ThunkKind) -> CodePtr {
        self.addresses.get(kind.slot()).copied().unwrap_or_default()
    }

    pub fn dispatch(&self) -> CodePtr {
        self.address(ThunkKind::Dispatch)
    }

    pub fn arity_dispatch(&self) -> CodePtr {
        self.address(ThunkKind::ArityDispatch)
    }

    pub fn virtual_call_slow_path(&self) -> CodePtr {
        self.address(ThunkKind::VirtualCallSlowPath)
    }

    pub fn osr_exit(&self) -> CodePtr {
        self.address(ThunkKind::OsrExit)
    }

    pub fn arity_fixup(&self) -> CodePtr {
        self.address(ThunkKind::ArityFixup)
    }

    pub fn construct_alloc(&self) -> CodePtr {
        self.address(ThunkKind::ConstructAlloc)
    }

    /// Which thunk starts at `address`, if any.
    pub fn kind_of(&self, address: CodePtr) -> Option<ThunkKind> {
        ThunkKind::ALL.into_iter().find(|kind| self.address(*kind) == address)
    }

    pub fn code(&self) -> &Arc<MachineCode> {
        &self.code
    }
}
