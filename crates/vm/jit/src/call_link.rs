//! Call-site link records.
//!
//! A call site remembers which executable and entry convention it calls
//! and, while linked, which code block it was linked to. Linked sites are
//! registered as incoming calls on that block so they can be pointed back
//! at the virtual-call slow path when the block stops being live.

use std::fmt;
use std::sync::Arc;

use kestrel_asm::{Assembler, CodePtr, ExecutablePool, LinkBuffer, MachineCode, branch_target};
use serde::Serialize;

use crate::code_block::CodeBlockId;
use crate::error::JitError;
use crate::executable::ExecutableId;
use crate::types::Specialization;

const CALL_REL32_WIDTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallSiteId(pub(crate) u32);

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site#{}", self.0)
    }
}

/// Where the call instruction lives.
#[derive(Debug, Clone)]
pub enum CallSiteLocation {
    /// A `call rel32` in machine code, identified by its return address.
    Machine {
        code: Arc<MachineCode>,
        return_address: CodePtr,
    },
    /// A call made by the interpreter, which keeps its target as data.
    Interpreter { target: CodePtr },
}

#[derive(Debug, Clone)]
pub struct CallSite {
    callee: ExecutableId,
    specialization: Specialization,
    argument_count: u32,
    location: CallSiteLocation,
    linked_to: Option<CodeBlockId>,
}

impl CallSite {
    pub fn callee(&self) -> ExecutableId {
        self.callee
    }

    pub fn specialization(&self) -> Specialization {
        self.specialization
    }

    pub fn argument_count(&self) -> u32 {
        self.argument_count
    }

    pub fn location(&self) -> &CallSiteLocation {
        &self.location
    }

    /// Block the site is registered on, if linked.
    pub fn linked_to(&self) -> Option<CodeBlockId> {
        self.linked_to
    }

    pub fn is_linked(&self) -> bool {
        self.linked_to.is_some()
    }

    /// Address the site currently transfers control to.
    pub fn target(&self) -> Result<CodePtr, JitError> {
        match &self.location {
            CallSiteLocation::Interpreter { target } => Ok(*target),
            CallSiteLocation::Machine { code, return_address } => {
                let start = CodePtr::new(return_address.address().saturating_sub(CALL_REL32_WIDTH as u64));
                let bytes = code.pool().read(start, CALL_REL32_WIDTH)?;
                Ok(branch_target(&bytes, 0, start)?.target)
            }
        }
    }

    /// Point the site at `target`. Re-applying the same target is a no-op.
    fn point_at(&mut self, target: CodePtr) -> Result<(), JitError> {
        match &mut self.location {
            CallSiteLocation::Interpreter { target: current } => *current = target,
            CallSiteLocation::Machine { code, return_address } => {
                code.pool().relink_call(*return_address, target)?;
            }
        }
        Ok(())
    }
}

/// All call sites known to the driver.
#[derive(Debug, Default)]
pub struct CallLinkTable {
    sites: Vec<Option<CallSite>>,
}

impl CallLinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        callee: ExecutableId,
        specialization: Specialization,
        argument_count: u32,
        location: CallSiteLocation,
    ) -> CallSiteId {
        let id = CallSiteId(u32::try_from(self.sites.len()).unwrap_or(u32::MAX));
        self.sites.push(Some(CallSite {
            callee,
            specialization,
            argument_count,
            location,
            linked_to: None,
        }));
        id
    }

    pub fn get(&self, id: CallSiteId) -> Option<&CallSite> {
        self.sites.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn remove(&mut self, id: CallSiteId) -> Option<CallSite> {
        self.sites.get_mut(id.0 as usize).and_then(Option::take)
    }

    /// Change what `id` calls. The site keeps its current target until linked.
    pub(crate) fn retarget(
        &mut self,
        id: CallSiteId,
        callee: ExecutableId,
        specialization: Specialization,
    ) -> Result<(), JitError> {
        let site = self.site_mut(id)?;
        site.callee = callee;
        site.specialization = specialization;
        Ok(())
    }

    /// Link `id` to `block` at `entry`.
    pub(crate) fn link(&mut self, id: CallSiteId, block: CodeBlockId, entry: CodePtr) -> Result<(), JitError> {
        let site = self.site_mut(id)?;
        site.point_at(entry)?;
        site.linked_to = Some(block);
        Ok(())
    }

    /// Point `id` at the slow path and forget its block.
    pub(crate) fn unlink(&mut self, id: CallSiteId, slow_path: CodePtr) -> Result<(), JitError> {
        let site = self.site_mut(id)?;
        site.point_at(slow_path)?;
        site.linked_to = None;
        Ok(())
    }

    fn site_mut(&mut self, id: CallSiteId) -> Result<&mut CallSite, JitError> {
        self.sites
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(JitError::UnknownCallSite(id))
    }

    pub fn len(&self) -> usize {
        self.sites.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Emit a `call slow_path; ret` stub to stand for a machine-level caller.
pub(crate) fn emit_call_stub(pool: &ExecutablePool, slow_path: CodePtr) -> Result<CallSiteLocation, JitError> {
    let mut asm = Assembler::new();
    let call = asm.call();
    asm.ret();
    let mut link = LinkBuffer::new(asm, pool);
    link.link_call(call, slow_path);
    let linked = link.finalize()?;
    let return_address = linked.location_of(&call);
    Ok(CallSiteLocation::Machine {
        code: linked.into_code(),
        return_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_site_repoints_idempotently() {
        let pool = ExecutablePool::new(0x1000);
        let slow_path = CodePtr::new(0x9000);
        let mut table = CallLinkTable::new();
        let location = emit_call_stub(&pool, slow_path).unwrap();
        let id = table.insert(ExecutableId(0), Specialization::Call, 0, location);
        assert_eq!(table.get(id).unwrap().target().unwrap(), slow_path);

        let entry = CodePtr::new(0xa000);
        table.unlink(id, entry).unwrap();
        table.unlink(id, entry).unwrap();
        assert_eq!(table.get(id).unwrap().target().unwrap(), entry);
        assert!(!table.get(id).unwrap().is_linked());
    }

    #[test]
    fn test_removed_site_is_unknown() {
        let mut table = CallLinkTable::new();
        let id = table.insert(
            ExecutableId(0),
            Specialization::Call,
            1,
            CallSiteLocation::Interpreter {
                target: CodePtr::new(0),
            },
        );
        assert!(table.remove(id).is_some());
        let err = table.unlink(id, CodePtr::new(4)).unwrap_err();
        assert!(matches!(err, JitError::UnknownCallSite(_)), "got {err:?}");
        assert!(table.is_empty());
    }
}
