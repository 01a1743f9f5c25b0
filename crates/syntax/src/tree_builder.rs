//! The capability trait the parser builds through.
//!
//! The parser never constructs nodes itself. Every production calls into a
//! [`TreeBuilder`], so the same grammar code either builds a full tree
//! ([`AstBuilder`](crate::ast_builder::AstBuilder)) or only validates
//! ([`SyntaxChecker`](crate::syntax_checker::SyntaxChecker)). Anything that
//! decides accept/reject lives in the parser and uses only the
//! classification queries below, which both builders answer identically.

use std::sync::Arc;

use crate::ast::{AssignOp, BinaryOp, LogicalOp, PropertyKind, UnaryOp, UpdateOp};
use crate::scope::FunctionSummary;
use crate::source::SourceRange;
use crate::token::Identifier;

/// Everything the parser learned about a function literal.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: Option<Identifier>,
    pub params: Vec<Identifier>,
    /// `{` through `}` inclusive.
    pub body: SourceRange,
    pub summary: FunctionSummary,
    pub is_declaration: bool,
}

/// Head of a `for (...)` statement.
pub enum ForHead<B: TreeBuilder + ?Sized> {
    Plain {
        init: ForInitializer<B>,
        test: Option<B::Expression>,
        update: Option<B::Expression>,
    },
    In {
        target: ForInBinding<B>,
        object: B::Expression,
    },
}

pub enum ForInitializer<B: TreeBuilder + ?Sized> {
    None,
    Var(B::VarDeclarations),
    Expression(B::Expression),
}

pub enum ForInBinding<B: TreeBuilder + ?Sized> {
    Var(Identifier, Option<B::Expression>),
    Expression(B::Expression),
}

pub trait TreeBuilder {
    type Expression: Clone;
    type Statement;
    type SourceElements: Default;
    type Property;
    type PropertyList: Default;
    type ArgumentList: Default;
    type ElementList: Default;
    type VarDeclarations: Default;
    type ClauseList: Default;
    type Checkpoint: Copy;

    /// Nested function bodies may be served from the provider's cache.
    const CAN_USE_FUNCTION_CACHE: bool;
    /// Free variables of nested functions are recorded as captured.
    const NEEDS_FREE_VARIABLE_INFO: bool;

    fn checkpoint(&self) -> Self::Checkpoint;
    /// Forget everything built since `checkpoint`.
    fn rewind(&mut self, checkpoint: Self::Checkpoint);

    // ─── Classification ────────────────────────────────────────────

    fn is_resolve(&self, expr: &Self::Expression) -> bool;
    /// Identifier, property-by-name or property-by-index.
    fn is_location(&self, expr: &Self::Expression) -> bool;
    /// Calls are tolerated as assignment targets (runtime error).
    fn is_call(&self, expr: &Self::Expression) -> bool;

    // ─── Expressions ───────────────────────────────────────────────

    fn this_expr(&mut self) -> Self::Expression;
    fn resolve(&mut self, name: &Identifier) -> Self::Expression;
    fn number(&mut self, value: f64) -> Self::Expression;
    fn string(&mut self, value: &Arc<str>) -> Self::Expression;
    fn boolean(&mut self, value: bool) -> Self::Expression;
    fn null(&mut self) -> Self::Expression;
    fn regexp(&mut self, pattern: &str, flags: &str) -> Self::Expression;

    fn append_element(&mut self, list: &mut Self::ElementList, element: Option<Self::Expression>);
    fn array(&mut self, elements: Self::ElementList, trailing_holes: u32) -> Self::Expression;

    fn property(&mut self, key: &Arc<str>, kind: PropertyKind, value: Self::Expression) -> Self::Property;
    fn accessor(&mut self, key: &Arc<str>, kind: PropertyKind, function: FunctionInfo) -> Self::Property;
    fn append_property(&mut self, list: &mut Self::PropertyList, property: Self::Property);
    fn object(&mut self, properties: Self::PropertyList) -> Self::Expression;

    fn function_expr(&mut self, function: FunctionInfo) -> Self::Expression;

    fn dot(&mut self, base: Self::Expression, name: &Identifier) -> Self::Expression;
    fn bracket(&mut self, base: Self::Expression, subscript: Self::Expression) -> Self::Expression;
    fn append_argument(&mut self, list: &mut Self::ArgumentList, argument: Self::Expression);
    fn call(&mut self, callee: Self::Expression, arguments: Self::ArgumentList) -> Self::Expression;
    fn new_expr(&mut self, callee: Self::Expression, arguments: Option<Self::ArgumentList>) -> Self::Expression;

    fn prefix(&mut self, op: UpdateOp, target: Self::Expression) -> Self::Expression;
    fn postfix(&mut self, op: UpdateOp, target: Self::Expression) -> Self::Expression;
    /// May fold a numeric operand.
    fn unary(&mut self, op: UnaryOp, operand: Self::Expression) -> Self::Expression;
    /// May fold two numeric operands.
    fn binary(&mut self, op: BinaryOp, lhs: Self::Expression, rhs: Self::Expression) -> Self::Expression;
    fn logical(&mut self, op: LogicalOp, lhs: Self::Expression, rhs: Self::Expression) -> Self::Expression;
    fn conditional(
        &mut self,
        test: Self::Expression,
        consequent: Self::Expression,
        alternate: Self::Expression,
    ) -> Self::Expression;
    fn assignment(&mut self, op: AssignOp, target: Self::Expression, value: Self::Expression) -> Self::Expression;
    fn comma(&mut self, lhs: Self::Expression, rhs: Self::Expression) -> Self::Expression;

    // ─── Statements ────────────────────────────────────────────────

    fn append_statement(&mut self, elements: &mut Self::SourceElements, statement: Self::Statement);
    fn append_var(
        &mut self,
        declarations: &mut Self::VarDeclarations,
        name: &Identifier,
        init: Option<Self::Expression>,
    );

    fn empty_statement(&mut self, line: u32) -> Self::Statement;
    fn expression_statement(&mut self, expr: Self::Expression, line: u32) -> Self::Statement;
    fn var_statement(&mut self, declarations: Self::VarDeclarations, line: u32) -> Self::Statement;
    fn const_statement(&mut self, declarations: Self::VarDeclarations, line: u32) -> Self::Statement;
    fn function_declaration(&mut self, function: FunctionInfo, line: u32) -> Self::Statement;
    fn block(&mut self, body: Self::SourceElements, line: u32) -> Self::Statement;
    fn if_statement(
        &mut self,
        test: Self::Expression,
        consequent: Self::Statement,
        alternate: Option<Self::Statement>,
        line: u32,
    ) -> Self::Statement;
    fn do_while(&mut self, body: Self::Statement, test: Self::Expression, line: u32) -> Self::Statement;
    fn while_statement(&mut self, test: Self::Expression, body: Self::Statement, line: u32) -> Self::Statement;
    fn for_statement(&mut self, head: ForHead<Self>, body: Self::Statement, line: u32) -> Self::Statement;
    fn continue_statement(&mut self, label: Option<&Identifier>, line: u32) -> Self::Statement;
    fn break_statement(&mut self, label: Option<&Identifier>, line: u32) -> Self::Statement;
    fn return_statement(&mut self, value: Option<Self::Expression>, line: u32) -> Self::Statement;
    fn with_statement(&mut self, object: Self::Expression, body: Self::Statement, line: u32) -> Self::Statement;
    fn append_clause(
        &mut self,
        clauses: &mut Self::ClauseList,
        test: Option<Self::Expression>,
        body: Self::SourceElements,
    );
    fn switch_statement(
        &mut self,
        discriminant: Self::Expression,
        clauses: Self::ClauseList,
        line: u32,
    ) -> Self::Statement;
    fn labeled(&mut self, label: &Identifier, body: Self::Statement, line: u32) -> Self::Statement;
    fn throw_statement(&mut self, value: Self::Expression, line: u32) -> Self::Statement;
    fn try_statement(
        &mut self,
        block: Self::Statement,
        catch: Option<(Identifier, Self::Statement)>,
        finally: Option<Self::Statement>,
        line: u32,
    ) -> Self::Statement;
    fn debugger_statement(&mut self, line: u32) -> Self::Statement;

    // ─── Unit-level bookkeeping ────────────────────────────────────

    /// A `var`/`const` binding of the unit being built.
    fn declare_var(&mut self, name: &Identifier, is_const: bool);
    /// Literal constants created so far.
    fn constant_count(&self) -> usize;
}
