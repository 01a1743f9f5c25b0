//! Linked executables.
//!
//! An executable binds an unlinked unit to one execution context and owns
//! one code-block chain per entry convention. Programs and eval code have
//! a single global chain; functions have independent call and construct
//! chains that tier up separately.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::code_block::CodeBlockId;
use crate::types::Specialization;
use crate::unlinked::{UnitKind, UnlinkedUnit};

/// Handle of an executable in the driver's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ExecutableId(pub(crate) u32);

impl ExecutableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExecutableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Head of a version chain. Older versions hang off the live block's
/// `alternative` link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeChain {
    pub live: Option<CodeBlockId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    Program { global: CodeChain },
    Eval { global: CodeChain },
    Function { call: CodeChain, construct: CodeChain },
}

/// A unit bound to an execution context.
#[derive(Debug)]
pub struct Executable {
    id: ExecutableId,
    unit: Arc<UnlinkedUnit>,
    kind: ExecutableKind,
}

impl Executable {
    pub(crate) fn new(id: ExecutableId, unit: Arc<UnlinkedUnit>) -> Self {
        let kind = match unit.kind() {
            UnitKind::Program => ExecutableKind::Program {
                global: CodeChain::default(),
            },
            UnitKind::Eval => ExecutableKind::Eval {
                global: CodeChain::default(),
            },
            UnitKind::Function => ExecutableKind::Function {
                call: CodeChain::default(),
                construct: CodeChain::default(),
            },
        };
        Self { id, unit, kind }
    }

    pub fn id(&self) -> ExecutableId {
        self.id
    }

    pub fn unit(&self) -> &Arc<UnlinkedUnit> {
        &self.unit
    }

    pub fn kind(&self) -> &ExecutableKind {
        &self.kind
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ExecutableKind::Function { .. })
    }

    /// Specializations this executable has chains for.
    pub fn specializations(&self) -> &'static [Specialization] {
        match self.kind {
            ExecutableKind::Program { .. } | ExecutableKind::Eval { .. } => &[Specialization::Global],
            ExecutableKind::Function { .. } => &[Specialization::Call, Specialization::Construct],
        }
    }

    pub fn chain(&self, specialization: Specialization) -> Option<&CodeChain> {
        match (&self.kind, specialization) {
            (ExecutableKind::Program { global } | ExecutableKind::Eval { global }, Specialization::Global) => {
                Some(global)
            }
            (ExecutableKind::Function { call, .. }, Specialization::Call) => Some(call),
            (ExecutableKind::Function { construct, .. }, Specialization::Construct) => Some(construct),
            _ => None,
        }
    }

    pub(crate) fn chain_mut(&mut self, specialization: Specialization) -> Option<&mut CodeChain> {
        match (&mut self.kind, specialization) {
            (ExecutableKind::Program { global } | ExecutableKind::Eval { global }, Specialization::Global) => {
                Some(global)
            }
            (ExecutableKind::Function { call, .. }, Specialization::Call) => Some(call),
            (ExecutableKind::Function { construct, .. }, Specialization::Construct) => Some(construct),
            _ => None,
        }
    }

    pub fn live(&self, specialization: Specialization) -> Option<CodeBlockId> {
        self.chain(specialization).and_then(|chain| chain.live)
    }
}

#[cfg(test)]
mod tests {
    use kestrel_syntax::{ParserOptions, SourceProvider};

    use super::*;

    #[test]
    fn test_chains_follow_unit_kind() {
        let provider = SourceProvider::new("exe.js", "function f(a) { return a; }");
        let unit = UnlinkedUnit::program(&provider.full_range(), &ParserOptions::default()).unwrap();
        let program = Executable::new(ExecutableId(0), unit.clone());
        assert!(program.chain(Specialization::Global).is_some());
        assert!(program.chain(Specialization::Call).is_none());

        let body = unit.functions()[0].unit().unwrap();
        let function = Executable::new(ExecutableId(1), body);
        assert!(function.is_function());
        assert_eq!(function.specializations(), &[Specialization::Call, Specialization::Construct]);
        assert_eq!(function.live(Specialization::Construct), None);
        assert!(function.chain(Specialization::Global).is_none());
    }
}
