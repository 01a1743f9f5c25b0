//! Minimal decoder for the branch forms the assembler emits.

use crate::assembler::CodePtr;
use crate::error::AsmError;
use crate::registers::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Jump,
    Call,
    Conditional(Condition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTarget {
    pub kind: BranchKind,
    /// Instruction length in bytes.
    pub width: usize,
    pub target: CodePtr,
}

/// Decode the branch at `offset` of `code`, which is loaded at `base`.
pub fn branch_target(code: &[u8], offset: usize, base: CodePtr) -> Result<BranchTarget, AsmError> {
    let not_a_branch = |found: &[u8]| AsmError::NotABranch {
        offset,
        found: hex::encode(found),
    };
    let rest = code.get(offset..).unwrap_or_default();
    let (kind, width, displacement) = match rest {
        [0xeb, d, ..] => (BranchKind::Jump, 2, i64::from(i8::from_le_bytes([*d]))),
        [0xe9, a, b, c, d, ..] => (BranchKind::Jump, 5, i64::from(i32::from_le_bytes([*a, *b, *c, *d]))),
        [0xe8, a, b, c, d, ..] => (BranchKind::Call, 5, i64::from(i32::from_le_bytes([*a, *b, *c, *d]))),
        [op @ 0x70..=0x7f, d, ..] => {
            let condition = Condition::from_code(op & 0x0f).ok_or_else(|| not_a_branch(&rest[..2]))?;
            (BranchKind::Conditional(condition), 2, i64::from(i8::from_le_bytes([*d])))
        }
        [0x0f, op @ 0x80..=0x8f, a, b, c, d, ..] => {
            let condition = Condition::from_code(op & 0x0f).ok_or_else(|| not_a_branch(&rest[..2]))?;
            (
                BranchKind::Conditional(condition),
                6,
                i64::from(i32::from_le_bytes([*a, *b, *c, *d])),
            )
        }
        other => return Err(not_a_branch(other.get(..2).unwrap_or(other))),
    };
    let end = base.address().saturating_add(u64::try_from(offset.saturating_add(width)).unwrap_or(u64::MAX));
    let target = i128::from(end) + i128::from(displacement);
    let target = u64::try_from(target).map_err(|_| not_a_branch(rest.get(..width).unwrap_or(rest)))?;
    Ok(BranchTarget {
        kind,
        width,
        target: CodePtr::new(target),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_forms() {
        let base = CodePtr::new(0x1000);
        let code = [0xeb, 0xfe, 0x74, 0x02, 0xe9, 0x00, 0x01, 0x00, 0x00];
        let short = branch_target(&code, 0, base).unwrap();
        assert_eq!((short.kind, short.width, short.target), (BranchKind::Jump, 2, base));
        let conditional = branch_target(&code, 2, base).unwrap();
        assert_eq!(conditional.kind, BranchKind::Conditional(Condition::Equal));
        assert_eq!(conditional.target, CodePtr::new(0x1006));
        let long = branch_target(&code, 4, base).unwrap();
        assert_eq!(long.width, 5);
        assert_eq!(long.target, CodePtr::new(0x1000 + 9 + 0x100));
    }

    #[test]
    fn test_non_branch_is_rejected() {
        let err = branch_target(&[0x90, 0x90], 0, CodePtr::new(0)).unwrap_err();
        assert!(matches!(err, AsmError::NotABranch { offset: 0, .. }), "got {err:?}");
        assert!(branch_target(&[0xe9, 0x00], 0, CodePtr::new(0)).is_err(), "truncated rel32");
    }
}
