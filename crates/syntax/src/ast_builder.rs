//! Full-tree builder.

use std::sync::Arc;

use crate::ast::{
    AssignOp, Ast, AstMark, BinaryOp, Expr, ExprId, ForInTarget, ForInit, FunctionId,
    FunctionLiteral, LogicalOp, Property, PropertyKind, Stmt, StmtId, StmtKind, SwitchClause,
    UnaryOp, UpdateOp, VarDeclaration,
};
use crate::token::Identifier;
use crate::tree_builder::{ForHead, ForInBinding, ForInitializer, FunctionInfo, TreeBuilder};

/// A `var` or `const` binding declared by the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredVariable {
    pub name: Identifier,
    pub is_const: bool,
}

/// Builds an [`Ast`], folding constant arithmetic as it goes.
#[derive(Debug, Default)]
pub struct AstBuilder {
    ast: Ast,
    constant_count: usize,
    variables: Vec<DeclaredVariable>,
    function_declarations: Vec<FunctionId>,
}

#[derive(Debug, Clone, Copy)]
pub struct AstCheckpoint {
    mark: AstMark,
    constant_count: usize,
    variables: usize,
    function_declarations: usize,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn into_parts(self) -> (Ast, Vec<DeclaredVariable>, Vec<FunctionId>) {
        (self.ast, self.variables, self.function_declarations)
    }

    fn expr(&mut self, expr: Expr) -> ExprId {
        self.ast.push_expr(expr)
    }

    fn stmt(&mut self, kind: StmtKind, line: u32) -> StmtId {
        self.ast.push_stmt(Stmt { kind, line })
    }

    fn constant(&mut self, expr: Expr) -> ExprId {
        self.constant_count = self.constant_count.saturating_add(1);
        self.expr(expr)
    }

    fn number_of(&self, id: ExprId) -> Option<f64> {
        match self.ast.expr(id) {
            Some(Expr::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Replace two folded numeric operands with one constant.
    fn folded(&mut self, value: f64) -> ExprId {
        self.constant_count = self.constant_count.saturating_sub(1);
        self.expr(Expr::Number(value))
    }

    fn function_literal(&mut self, function: FunctionInfo) -> FunctionId {
        self.ast.push_function(FunctionLiteral {
            name: function.name,
            params: function.params,
            body: function.body,
            summary: function.summary,
            is_declaration: function.is_declaration,
        })
    }

    fn declarations(&self, list: Vec<(Identifier, Option<ExprId>)>) -> Vec<VarDeclaration> {
        list.into_iter()
            .map(|(name, init)| VarDeclaration { name, init })
            .collect()
    }
}

impl TreeBuilder for AstBuilder {
    type Expression = ExprId;
    type Statement = StmtId;
    type SourceElements = Vec<StmtId>;
    type Property = Property;
    type PropertyList = Vec<Property>;
    type ArgumentList = Vec<ExprId>;
    type ElementList = Vec<Option<ExprId>>;
    type VarDeclarations = Vec<(Identifier, Option<ExprId>)>;
    type ClauseList = Vec<SwitchClause>;
    type Checkpoint = AstCheckpoint;

    const CAN_USE_FUNCTION_CACHE: bool = false;
    const NEEDS_FREE_VARIABLE_INFO: bool = true;

    fn checkpoint(&self) -> AstCheckpoint {
        AstCheckpoint {
            mark: self.ast.mark(),
            constant_count: self.constant_count,
            variables: self.variables.len(),
            function_declarations: self.function_declarations.len(),
        }
    }

    fn rewind(&mut self, checkpoint: AstCheckpoint) {
        self.ast.truncate(checkpoint.mark);
        self.constant_count = checkpoint.constant_count;
        self.variables.truncate(checkpoint.variables);
        self.function_declarations
            .truncate(checkpoint.function_declarations);
    }

    fn is_resolve(&self, expr: &ExprId) -> bool {
        matches!(self.ast.expr(*expr), Some(Expr::Resolve(_)))
    }

    fn is_location(&self, expr: &ExprId) -> bool {
        self.ast.expr(*expr).is_some_and(Expr::is_location)
    }

    fn is_call(&self, expr: &ExprId) -> bool {
        matches!(self.ast.expr(*expr), Some(Expr::Call { .. }))
    }

    fn this_expr(&mut self) -> ExprId {
        self.expr(Expr::This)
    }

    fn resolve(&mut self, name: &Identifier) -> ExprId {
        self.expr(Expr::Resolve(name.clone()))
    }

    fn number(&mut self, value: f64) -> ExprId {
        self.constant(Expr::Number(value))
    }

    fn string(&mut self, value: &Arc<str>) -> ExprId {
        self.constant(Expr::String(value.clone()))
    }

    fn boolean(&mut self, value: bool) -> ExprId {
        self.constant(Expr::Boolean(value))
    }

    fn null(&mut self) -> ExprId {
        self.constant(Expr::Null)
    }

    fn regexp(&mut self, pattern: &str, flags: &str) -> ExprId {
        self.expr(Expr::RegExp {
            pattern: Arc::from(pattern),
            flags: Arc::from(flags),
        })
    }

    fn append_element(&mut self, list: &mut Vec<Option<ExprId>>, element: Option<ExprId>) {
        list.push(element);
    }

    fn array(&mut self, elements: Vec<Option<ExprId>>, trailing_holes: u32) -> ExprId {
        self.expr(Expr::Array {
            elements,
            trailing_holes,
        })
    }

    fn property(&mut self, key: &Arc<str>, kind: PropertyKind, value: ExprId) -> Property {
        Property {
            key: key.clone(),
            kind,
            value,
        }
    }

    fn accessor(&mut self, key: &Arc<str>, kind: PropertyKind, function: FunctionInfo) -> Property {
        let function = self.function_literal(function);
        let value = self.expr(Expr::Function(function));
        Property {
            key: key.clone(),
            kind,
            value,
        }
    }

    fn append_property(&mut self, list: &mut Vec<Property>, property: Property) {
        list.push(property);
    }

    fn object(&mut self, properties: Vec<Property>) -> ExprId {
        self.expr(Expr::Object(properties))
    }

    fn function_expr(&mut self, function: FunctionInfo) -> ExprId {
        let function = self.function_literal(function);
        self.expr(Expr::Function(function))
    }

    fn dot(&mut self, base: ExprId, name: &Identifier) -> ExprId {
        self.expr(Expr::Dot {
            base,
            name: name.clone(),
        })
    }

    fn bracket(&mut self, base: ExprId, subscript: ExprId) -> ExprId {
        self.expr(Expr::Bracket { base, subscript })
    }

    fn append_argument(&mut self, list: &mut Vec<ExprId>, argument: ExprId) {
        list.push(argument);
    }

    fn call(&mut self, callee: ExprId, arguments: Vec<ExprId>) -> ExprId {
        self.expr(Expr::Call { callee, arguments })
    }

    fn new_expr(&mut self, callee: ExprId, arguments: Option<Vec<ExprId>>) -> ExprId {
        self.expr(Expr::New { callee, arguments })
    }

    fn prefix(&mut self, op: UpdateOp, target: ExprId) -> ExprId {
        self.expr(Expr::Prefix { op, target })
    }

    fn postfix(&mut self, op: UpdateOp, target: ExprId) -> ExprId {
        self.expr(Expr::Postfix { op, target })
    }

    fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        if let Some(n) = self.number_of(operand) {
            let folded = match op {
                UnaryOp::Negate => Some(-n),
                UnaryOp::BitNot => Some(f64::from(!to_int32(n))),
                _ => None,
            };
            if let Some(value) = folded {
                return self.expr(Expr::Number(value));
            }
        }
        self.expr(Expr::Unary { op, operand })
    }

    fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let left = self.number_of(lhs);
        let right = self.number_of(rhs);
        if let (Some(a), Some(b)) = (left, right)
            && let Some(value) = fold_binary(op, a, b)
        {
            return self.folded(value);
        }
        if op == BinaryOp::Mul {
            // keep the ToNumber conversion of the other operand
            if left == Some(1.0) {
                return self.expr(Expr::Unary {
                    op: UnaryOp::Plus,
                    operand: rhs,
                });
            }
            if right == Some(1.0) {
                return self.expr(Expr::Unary {
                    op: UnaryOp::Plus,
                    operand: lhs,
                });
            }
        }
        self.expr(Expr::Binary { op, lhs, rhs })
    }

    fn logical(&mut self, op: LogicalOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.expr(Expr::Logical { op, lhs, rhs })
    }

    fn conditional(&mut self, test: ExprId, consequent: ExprId, alternate: ExprId) -> ExprId {
        self.expr(Expr::Conditional {
            test,
            consequent,
            alternate,
        })
    }

    fn assignment(&mut self, op: AssignOp, target: ExprId, value: ExprId) -> ExprId {
        self.expr(Expr::Assign { op, target, value })
    }

    fn comma(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        if let Some(Expr::Comma(exprs)) = self.ast.expr(lhs) {
            let mut exprs = exprs.clone();
            exprs.push(rhs);
            return self.expr(Expr::Comma(exprs));
        }
        self.expr(Expr::Comma(vec![lhs, rhs]))
    }

    fn append_statement(&mut self, elements: &mut Vec<StmtId>, statement: StmtId) {
        elements.push(statement);
    }

    fn append_var(
        &mut self,
        declarations: &mut Vec<(Identifier, Option<ExprId>)>,
        name: &Identifier,
        init: Option<ExprId>,
    ) {
        declarations.push((name.clone(), init));
    }

    fn empty_statement(&mut self, line: u32) -> StmtId {
        self.stmt(StmtKind::Empty, line)
    }

    fn expression_statement(&mut self, expr: ExprId, line: u32) -> StmtId {
        self.stmt(StmtKind::Expression(expr), line)
    }

    fn var_statement(&mut self, declarations: Vec<(Identifier, Option<ExprId>)>, line: u32) -> StmtId {
        let declarations = self.declarations(declarations);
        self.stmt(StmtKind::Var(declarations), line)
    }

    fn const_statement(&mut self, declarations: Vec<(Identifier, Option<ExprId>)>, line: u32) -> StmtId {
        let declarations = self.declarations(declarations);
        self.stmt(StmtKind::Const(declarations), line)
    }

    fn function_declaration(&mut self, function: FunctionInfo, line: u32) -> StmtId {
        let function = self.function_literal(function);
        self.function_declarations.push(function);
        self.stmt(StmtKind::FunctionDeclaration(function), line)
    }

    fn block(&mut self, body: Vec<StmtId>, line: u32) -> StmtId {
        self.stmt(StmtKind::Block(body), line)
    }

    fn if_statement(
        &mut self,
        test: ExprId,
        consequent: StmtId,
        alternate: Option<StmtId>,
        line: u32,
    ) -> StmtId {
        self.stmt(
            StmtKind::If {
                test,
                consequent,
                alternate,
            },
            line,
        )
    }

    fn do_while(&mut self, body: StmtId, test: ExprId, line: u32) -> StmtId {
        self.stmt(StmtKind::DoWhile { body, test }, line)
    }

    fn while_statement(&mut self, test: ExprId, body: StmtId, line: u32) -> StmtId {
        self.stmt(StmtKind::While { test, body }, line)
    }

    fn for_statement(&mut self, head: ForHead<Self>, body: StmtId, line: u32) -> StmtId {
        let kind = match head {
            ForHead::Plain { init, test, update } => {
                let init = match init {
                    ForInitializer::None => ForInit::None,
                    ForInitializer::Var(declarations) => {
                        ForInit::Var(self.declarations(declarations))
                    }
                    ForInitializer::Expression(expr) => ForInit::Expression(expr),
                };
                StmtKind::For {
                    init,
                    test,
                    update,
                    body,
                }
            }
            ForHead::In { target, object } => {
                let target = match target {
                    ForInBinding::Var(name, init) => {
                        ForInTarget::Var(VarDeclaration { name, init })
                    }
                    ForInBinding::Expression(expr) => ForInTarget::Expression(expr),
                };
                StmtKind::ForIn {
                    target,
                    object,
                    body,
                }
            }
        };
        self.stmt(kind, line)
    }

    fn continue_statement(&mut self, label: Option<&Identifier>, line: u32) -> StmtId {
        self.stmt(StmtKind::Continue(label.cloned()), line)
    }

    fn break_statement(&mut self, label: Option<&Identifier>, line: u32) -> StmtId {
        self.stmt(StmtKind::Break(label.cloned()), line)
    }

    fn return_statement(&mut self, value: Option<ExprId>, line: u32) -> StmtId {
        self.stmt(StmtKind::Return(value), line)
    }

    fn with_statement(&mut self, object: ExprId, body: StmtId, line: u32) -> StmtId {
        self.stmt(StmtKind::With { object, body }, line)
    }

    fn append_clause(&mut self, clauses: &mut Vec<SwitchClause>, test: Option<ExprId>, body: Vec<StmtId>) {
        clauses.push(SwitchClause { test, body });
    }

    fn switch_statement(&mut self, discriminant: ExprId, clauses: Vec<SwitchClause>, line: u32) -> StmtId {
        self.stmt(
            StmtKind::Switch {
                discriminant,
                clauses,
            },
            line,
        )
    }

    fn labeled(&mut self, label: &Identifier, body: StmtId, line: u32) -> StmtId {
        self.stmt(
            StmtKind::Labeled {
                label: label.clone(),
                body,
            },
            line,
        )
    }

    fn throw_statement(&mut self, value: ExprId, line: u32) -> StmtId {
        self.stmt(StmtKind::Throw(value), line)
    }

    fn try_statement(
        &mut self,
        block: StmtId,
        catch: Option<(Identifier, StmtId)>,
        finally: Option<StmtId>,
        line: u32,
    ) -> StmtId {
        self.stmt(
            StmtKind::Try {
                block,
                catch,
                finally,
            },
            line,
        )
    }

    fn debugger_statement(&mut self, line: u32) -> StmtId {
        self.stmt(StmtKind::Debugger, line)
    }

    fn declare_var(&mut self, name: &Identifier, is_const: bool) {
        if self.variables.iter().any(|v| v.name == *name) {
            return;
        }
        self.variables.push(DeclaredVariable {
            name: name.clone(),
            is_const,
        });
    }

    fn constant_count(&self) -> usize {
        self.constant_count
    }
}

// ─── Constant folding ──────────────────────────────────────────────

/// ECMAScript ToInt32.
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ECMAScript ToUint32.
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulo = n.trunc().rem_euclid(4_294_967_296.0);
    modulo as u32
}

/// Value of `a op b` for the operators that fold, using JS semantics.
pub fn fold_binary(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    let shift = to_uint32(b) & 0x1f;
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::LeftShift => f64::from(to_int32(a).wrapping_shl(shift)),
        BinaryOp::RightShift => f64::from(to_int32(a) >> shift),
        BinaryOp::UnsignedRightShift => f64::from(to_uint32(a) >> shift),
        BinaryOp::BitAnd => f64::from(to_int32(a) & to_int32(b)),
        BinaryOp::BitOr => f64::from(to_int32(a) | to_int32(b)),
        BinaryOp::BitXor => f64::from(to_int32(a) ^ to_int32(b)),
        _ => return None,
    };
    Some(value)
}
