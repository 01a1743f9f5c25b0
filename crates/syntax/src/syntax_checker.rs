//! Validation-only tree builder.
//!
//! Expressions collapse to an [`ExprTag`] carrying just enough to answer
//! the parser's classification queries; lists are element counts.

use std::sync::Arc;

use crate::ast::{AssignOp, BinaryOp, LogicalOp, PropertyKind, UnaryOp, UpdateOp};
use crate::token::Identifier;
use crate::tree_builder::{ForHead, FunctionInfo, TreeBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprTag {
    Resolve,
    Dot,
    Bracket,
    Call,
    Literal,
    Function,
    Other,
}

/// Property seen by the checker: only its name and kind survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedProperty {
    pub name: Arc<str>,
    pub kind: PropertyKind,
}

#[derive(Debug, Default)]
pub struct SyntaxChecker {
    constant_count: usize,
    declared: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckerCheckpoint {
    constant_count: usize,
    declared: usize,
}

impl SyntaxChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `var`/`const` bindings seen (duplicates included).
    pub fn declared_count(&self) -> usize {
        self.declared
    }

    fn literal(&mut self) -> ExprTag {
        self.constant_count = self.constant_count.saturating_add(1);
        ExprTag::Literal
    }
}

impl TreeBuilder for SyntaxChecker {
    type Expression = ExprTag;
    type Statement = ();
    type SourceElements = usize;
    type Property = CheckedProperty;
    type PropertyList = usize;
    type ArgumentList = usize;
    type ElementList = usize;
    type VarDeclarations = usize;
    type ClauseList = usize;
    type Checkpoint = CheckerCheckpoint;

    const CAN_USE_FUNCTION_CACHE: bool = true;
    const NEEDS_FREE_VARIABLE_INFO: bool = false;

    fn checkpoint(&self) -> CheckerCheckpoint {
        CheckerCheckpoint {
            constant_count: self.constant_count,
            declared: self.declared,
        }
    }

    fn rewind(&mut self, checkpoint: CheckerCheckpoint) {
        self.constant_count = checkpoint.constant_count;
        self.declared = checkpoint.declared;
    }

    fn is_resolve(&self, expr: &ExprTag) -> bool {
        *expr == ExprTag::Resolve
    }

    fn is_location(&self, expr: &ExprTag) -> bool {
        matches!(expr, ExprTag::Resolve | ExprTag::Dot | ExprTag::Bracket)
    }

    fn is_call(&self, expr: &ExprTag) -> bool {
        *expr == ExprTag::Call
    }

    fn this_expr(&mut self) -> ExprTag {
        ExprTag::Other
    }

    fn resolve(&mut self, _name: &Identifier) -> ExprTag {
        ExprTag::Resolve
    }

    fn number(&mut self, _value: f64) -> ExprTag {
        self.literal()
    }

    fn string(&mut self, _value: &Arc<str>) -> ExprTag {
        self.literal()
    }

    fn boolean(&mut self, _value: bool) -> ExprTag {
        self.literal()
    }

    fn null(&mut self) -> ExprTag {
        self.literal()
    }

    fn regexp(&mut self, _pattern: &str, _flags: &str) -> ExprTag {
        ExprTag::Other
    }

    fn append_element(&mut self, list: &mut usize, _element: Option<ExprTag>) {
        *list = list.saturating_add(1);
    }

    fn array(&mut self, _elements: usize, _trailing_holes: u32) -> ExprTag {
        ExprTag::Other
    }

    fn property(&mut self, key: &Arc<str>, kind: PropertyKind, _value: ExprTag) -> CheckedProperty {
        CheckedProperty {
            name: key.clone(),
            kind,
        }
    }

    fn accessor(&mut self, key: &Arc<str>, kind: PropertyKind, _function: FunctionInfo) -> CheckedProperty {
        CheckedProperty {
            name: key.clone(),
            kind,
        }
    }

    fn append_property(&mut self, list: &mut usize, _property: CheckedProperty) {
        *list = list.saturating_add(1);
    }

    fn object(&mut self, _properties: usize) -> ExprTag {
        ExprTag::Other
    }

    fn function_expr(&mut self, _function: FunctionInfo) -> ExprTag {
        ExprTag::Function
    }

    fn dot(&mut self, _base: ExprTag, _name: &Identifier) -> ExprTag {
        ExprTag::Dot
    }

    fn bracket(&mut self, _base: ExprTag, _subscript: ExprTag) -> ExprTag {
        ExprTag::Bracket
    }

    fn append_argument(&mut self, list: &mut usize, _argument: ExprTag) {
        *list = list.saturating_add(1);
    }

    fn call(&mut self, _callee: ExprTag, _arguments: usize) -> ExprTag {
        ExprTag::Call
    }

    fn new_expr(&mut self, _callee: ExprTag, _arguments: Option<usize>) -> ExprTag {
        ExprTag::Other
    }

    fn prefix(&mut self, _op: UpdateOp, _target: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn postfix(&mut self, _op: UpdateOp, _target: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn unary(&mut self, _op: UnaryOp, _operand: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn binary(&mut self, _op: BinaryOp, _lhs: ExprTag, _rhs: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn logical(&mut self, _op: LogicalOp, _lhs: ExprTag, _rhs: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn conditional(&mut self, _test: ExprTag, _consequent: ExprTag, _alternate: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn assignment(&mut self, _op: AssignOp, _target: ExprTag, _value: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn comma(&mut self, _lhs: ExprTag, _rhs: ExprTag) -> ExprTag {
        ExprTag::Other
    }

    fn append_statement(&mut self, elements: &mut usize, _statement: ()) {
        *elements = elements.saturating_add(1);
    }

    fn append_var(&mut self, declarations: &mut usize, _name: &Identifier, _init: Option<ExprTag>) {
        *declarations = declarations.saturating_add(1);
    }

    fn empty_statement(&mut self, _line: u32) {}

    fn expression_statement(&mut self, _expr: ExprTag, _line: u32) {}

    fn var_statement(&mut self, _declarations: usize, _line: u32) {}

    fn const_statement(&mut self, _declarations: usize, _line: u32) {}

    fn function_declaration(&mut self, _function: FunctionInfo, _line: u32) {}

    fn block(&mut self, _body: usize, _line: u32) {}

    fn if_statement(&mut self, _test: ExprTag, _consequent: (), _alternate: Option<()>, _line: u32) {}

    fn do_while(&mut self, _body: (), _test: ExprTag, _line: u32) {}

    fn while_statement(&mut self, _test: ExprTag, _body: (), _line: u32) {}

    fn for_statement(&mut self, _head: ForHead<Self>, _body: (), _line: u32) {}

    fn continue_statement(&mut self, _label: Option<&Identifier>, _line: u32) {}

    fn break_statement(&mut self, _label: Option<&Identifier>, _line: u32) {}

    fn return_statement(&mut self, _value: Option<ExprTag>, _line: u32) {}

    fn with_statement(&mut self, _object: ExprTag, _body: (), _line: u32) {}

    fn append_clause(&mut self, clauses: &mut usize, _test: Option<ExprTag>, _body: usize) {
        *clauses = clauses.saturating_add(1);
    }

    fn switch_statement(&mut self, _discriminant: ExprTag, _clauses: usize, _line: u32) {}

    fn labeled(&mut self, _label: &Identifier, _body: (), _line: u32) {}

    fn throw_statement(&mut self, _value: ExprTag, _line: u32) {}

    fn try_statement(
        &mut self,
        _block: (),
        _catch: Option<(Identifier, ())>,
        _finally: Option<()>,
        _line: u32,
    ) {
    }

    fn debugger_statement(&mut self, _line: u32) {}

    fn declare_var(&mut self, _name: &Identifier, _is_const: bool) {
        self.declared = self.declared.saturating_add(1);
    }

    fn constant_count(&self) -> usize {
        self.constant_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locations() {
        let mut checker = SyntaxChecker::new();
        let base = checker.resolve(&Arc::from("o"));
        let dot = checker.dot(base, &Arc::from("p"));
        let call = checker.call(dot, 0);
        assert!(checker.is_location(&dot));
        assert!(!checker.is_location(&call));
        assert!(checker.is_call(&call));
    }

    #[test]
    fn test_rewind_restores_constant_count() {
        let mut checker = SyntaxChecker::new();
        checker.number(1.0);
        let checkpoint = checker.checkpoint();
        checker.null();
        checker.boolean(true);
        checker.rewind(checkpoint);
        assert_eq!(checker.constant_count(), 1);
    }
}
