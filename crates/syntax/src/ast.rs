//! Arena-allocated syntax tree.
//!
//! Nodes live in flat vectors inside [`Ast`] and refer to their children by
//! index, so the tree has no cycles and no per-node allocation. Function
//! literals only record their body's source range: bodies are validated
//! with the syntax checker and re-parsed on demand when the function is
//! compiled.

use std::fmt::{self, Write};
use std::ops::Index;
use std::sync::Arc;

use crate::scope::FunctionSummary;
use crate::source::SourceRange;
use crate::token::Identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Defines an operator enum plus its source spelling.
macro_rules! define_ops {
    ($name:ident { $( $variant:ident => $text:literal ),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_ops!(BinaryOp {
    Add => "+",
    Sub => "-",
    Mul => "*",
    Div => "/",
    Mod => "%",
    LeftShift => "<<",
    RightShift => ">>",
    UnsignedRightShift => ">>>",
    BitAnd => "&",
    BitOr => "|",
    BitXor => "^",
    Equal => "==",
    NotEqual => "!=",
    StrictEqual => "===",
    StrictNotEqual => "!==",
    Less => "<",
    Greater => ">",
    LessEqual => "<=",
    GreaterEqual => ">=",
    InstanceOf => "instanceof",
    In => "in",
});

define_ops!(LogicalOp {
    And => "&&",
    Or => "||",
});

define_ops!(UnaryOp {
    Plus => "+",
    Negate => "-",
    BitNot => "~",
    Not => "!",
    TypeOf => "typeof",
    Void => "void",
    Delete => "delete",
});

define_ops!(UpdateOp {
    Increment => "++",
    Decrement => "--",
});

define_ops!(AssignOp {
    Assign => "=",
    Add => "+=",
    Sub => "-=",
    Mul => "*=",
    Div => "/=",
    Mod => "%=",
    LeftShift => "<<=",
    RightShift => ">>=",
    UnsignedRightShift => ">>>=",
    BitAnd => "&=",
    BitOr => "|=",
    BitXor => "^=",
});

impl AssignOp {
    /// The arithmetic performed by a compound assignment.
    pub fn binary_op(self) -> Option<BinaryOp> {
        let op = match self {
            AssignOp::Assign => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
            AssignOp::LeftShift => BinaryOp::LeftShift,
            AssignOp::RightShift => BinaryOp::RightShift,
            AssignOp::UnsignedRightShift => BinaryOp::UnsignedRightShift,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
        };
        Some(op)
    }
}

/// Kind of an object literal property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Constant,
    Getter,
    Setter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Canonical key text (numbers are printed as JS would print them).
    pub key: Arc<str>,
    pub kind: PropertyKind,
    pub value: ExprId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub name: Option<Identifier>,
    pub params: Vec<Identifier>,
    /// `{` through `}` inclusive.
    pub body: SourceRange,
    pub summary: FunctionSummary,
    pub is_declaration: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(Arc<str>),
    Boolean(bool),
    Null,
    This,
    RegExp { pattern: Arc<str>, flags: Arc<str> },
    Resolve(Identifier),
    Array { elements: Vec<Option<ExprId>>, trailing_holes: u32 },
    Object(Vec<Property>),
    Function(FunctionId),
    Dot { base: ExprId, name: Identifier },
    Bracket { base: ExprId, subscript: ExprId },
    New { callee: ExprId, arguments: Option<Vec<ExprId>> },
    Call { callee: ExprId, arguments: Vec<ExprId> },
    Prefix { op: UpdateOp, target: ExprId },
    Postfix { op: UpdateOp, target: ExprId },
    Unary { op: UnaryOp, operand: ExprId },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    Logical { op: LogicalOp, lhs: ExprId, rhs: ExprId },
    Conditional { test: ExprId, consequent: ExprId, alternate: ExprId },
    Assign { op: AssignOp, target: ExprId, value: ExprId },
    Comma(Vec<ExprId>),
}

impl Expr {
    pub fn is_location(&self) -> bool {
        matches!(self, Expr::Resolve(_) | Expr::Dot { .. } | Expr::Bracket { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDeclaration {
    pub name: Identifier,
    pub init: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    None,
    Var(Vec<VarDeclaration>),
    Expression(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInTarget {
    Var(VarDeclaration),
    Expression(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchClause {
    /// `None` for `default:`.
    pub test: Option<ExprId>,
    pub body: Vec<StmtId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Empty,
    Expression(ExprId),
    Var(Vec<VarDeclaration>),
    Const(Vec<VarDeclaration>),
    FunctionDeclaration(FunctionId),
    Block(Vec<StmtId>),
    If { test: ExprId, consequent: StmtId, alternate: Option<StmtId> },
    DoWhile { body: StmtId, test: ExprId },
    While { test: ExprId, body: StmtId },
    For { init: ForInit, test: Option<ExprId>, update: Option<ExprId>, body: StmtId },
    ForIn { target: ForInTarget, object: ExprId, body: StmtId },
    Continue(Option<Identifier>),
    Break(Option<Identifier>),
    Return(Option<ExprId>),
    With { object: ExprId, body: StmtId },
    Switch { discriminant: ExprId, clauses: Vec<SwitchClause> },
    Labeled { label: Identifier, body: StmtId },
    Throw(ExprId),
    Try { block: StmtId, catch: Option<(Identifier, StmtId)>, finally: Option<StmtId> },
    Debugger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

/// Node storage for one parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    functions: Vec<FunctionLiteral>,
}

impl Ast {
    pub fn push_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(u32::try_from(self.exprs.len()).unwrap_or(u32::MAX));
        self.exprs.push(expr);
        id
    }

    pub fn push_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(u32::try_from(self.stmts.len()).unwrap_or(u32::MAX));
        self.stmts.push(stmt);
        id
    }

    pub fn push_function(&mut self, function: FunctionLiteral) -> FunctionId {
        let id = FunctionId(u32::try_from(self.functions.len()).unwrap_or(u32::MAX));
        self.functions.push(function);
        id
    }

    pub fn expr(&self, id: ExprId) -> Option<&Expr> {
        self.exprs.get(id.index())
    }

    pub fn stmt(&self, id: StmtId) -> Option<&Stmt> {
        self.stmts.get(id.index())
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionLiteral> {
        self.functions.get(id.index())
    }

    pub fn functions(&self) -> &[FunctionLiteral] {
        &self.functions
    }

    pub fn node_count(&self) -> usize {
        self.exprs.len().saturating_add(self.stmts.len())
    }

    /// Arena sizes, used to drop nodes built by an abandoned speculative parse.
    pub(crate) fn mark(&self) -> AstMark {
        AstMark {
            exprs: self.exprs.len(),
            stmts: self.stmts.len(),
            functions: self.functions.len(),
        }
    }

    pub(crate) fn truncate(&mut self, mark: AstMark) {
        self.exprs.truncate(mark.exprs);
        self.stmts.truncate(mark.stmts);
        self.functions.truncate(mark.functions);
    }

    /// Visit every expression reachable from `roots` in source order.
    /// Function bodies are not descended into.
    pub fn walk_exprs(&self, roots: &[StmtId], mut visit: impl FnMut(ExprId, &Expr)) {
        let mut stack: Vec<Node> = roots.iter().rev().map(|id| Node::Stmt(*id)).collect();
        while let Some(node) = stack.pop() {
            let mut children: Vec<Node> = Vec::new();
            match node {
                Node::Stmt(id) => {
                    if let Some(stmt) = self.stmt(id) {
                        stmt_children(&stmt.kind, &mut children);
                    }
                }
                Node::Expr(id) => {
                    if let Some(expr) = self.expr(id) {
                        visit(id, expr);
                        expr_children(expr, &mut children);
                    }
                }
            }
            stack.extend(children.into_iter().rev());
        }
    }

    /// Numeric literals reachable from `roots`, after folding.
    pub fn numeric_constants(&self, roots: &[StmtId]) -> Vec<f64> {
        let mut constants = Vec::new();
        self.walk_exprs(roots, |_, expr| {
            if let Expr::Number(n) = expr {
                constants.push(*n);
            }
        });
        constants
    }

    /// Deterministic indented rendering of `roots`, used for shape
    /// comparison and by the CLI.
    pub fn dump(&self, roots: &[StmtId]) -> String {
        let mut out = String::new();
        for root in roots {
            self.dump_stmt(&mut out, *root, 0);
        }
        out
    }

    fn dump_stmt(&self, out: &mut String, id: StmtId, depth: usize) {
        let Some(stmt) = self.stmt(id) else {
            line(out, depth, "<dangling statement>");
            return;
        };
        let child = depth.saturating_add(1);
        match &stmt.kind {
            StmtKind::Empty => line(out, depth, "Empty"),
            StmtKind::Expression(expr) => {
                line(out, depth, "ExpressionStatement");
                self.dump_expr(out, *expr, child);
            }
            StmtKind::Var(decls) | StmtKind::Const(decls) => {
                let name = if matches!(stmt.kind, StmtKind::Var(_)) { "Var" } else { "Const" };
                line(out, depth, name);
                for decl in decls {
                    self.dump_declaration(out, decl, child);
                }
            }
            StmtKind::FunctionDeclaration(function) => {
                self.dump_function(out, *function, depth, "FunctionDeclaration");
            }
            StmtKind::Block(body) => {
                line(out, depth, "Block");
                for stmt in body {
                    self.dump_stmt(out, *stmt, child);
                }
            }
            StmtKind::If { test, consequent, alternate } => {
                line(out, depth, "If");
                self.dump_expr(out, *test, child);
                self.dump_stmt(out, *consequent, child);
                if let Some(alternate) = alternate {
                    self.dump_stmt(out, *alternate, child);
                }
            }
            StmtKind::DoWhile { body, test } => {
                line(out, depth, "DoWhile");
                self.dump_stmt(out, *body, child);
                self.dump_expr(out, *test, child);
            }
            StmtKind::While { test, body } => {
                line(out, depth, "While");
                self.dump_expr(out, *test, child);
                self.dump_stmt(out, *body, child);
            }
            StmtKind::For { init, test, update, body } => {
                line(out, depth, "For");
                match init {
                    ForInit::None => line(out, child, "<no init>"),
                    ForInit::Var(decls) => {
                        line(out, child, "Var");
                        for decl in decls {
                            self.dump_declaration(out, decl, child.saturating_add(1));
                        }
                    }
                    ForInit::Expression(expr) => self.dump_expr(out, *expr, child),
                }
                self.dump_optional_expr(out, *test, child, "<no test>");
                self.dump_optional_expr(out, *update, child, "<no update>");
                self.dump_stmt(out, *body, child);
            }
            StmtKind::ForIn { target, object, body } => {
                line(out, depth, "ForIn");
                match target {
                    ForInTarget::Var(decl) => self.dump_declaration(out, decl, child),
                    ForInTarget::Expression(expr) => self.dump_expr(out, *expr, child),
                }
                self.dump_expr(out, *object, child);
                self.dump_stmt(out, *body, child);
            }
            StmtKind::Continue(label) => line(out, depth, &labelled("Continue", label.as_deref())),
            StmtKind::Break(label) => line(out, depth, &labelled("Break", label.as_deref())),
            StmtKind::Return(value) => {
                line(out, depth, "Return");
                if let Some(value) = value {
                    self.dump_expr(out, *value, child);
                }
            }
            StmtKind::With { object, body } => {
                line(out, depth, "With");
                self.dump_expr(out, *object, child);
                self.dump_stmt(out, *body, child);
            }
            StmtKind::Switch { discriminant, clauses } => {
                line(out, depth, "Switch");
                self.dump_expr(out, *discriminant, child);
                for clause in clauses {
                    match clause.test {
                        Some(test) => {
                            line(out, child, "Case");
                            self.dump_expr(out, test, child.saturating_add(1));
                        }
                        None => line(out, child, "Default"),
                    }
                    for stmt in &clause.body {
                        self.dump_stmt(out, *stmt, child.saturating_add(1));
                    }
                }
            }
            StmtKind::Labeled { label, body } => {
                line(out, depth, &format!("Label {label}"));
                self.dump_stmt(out, *body, child);
            }
            StmtKind::Throw(expr) => {
                line(out, depth, "Throw");
                self.dump_expr(out, *expr, child);
            }
            StmtKind::Try { block, catch, finally } => {
                line(out, depth, "Try");
                self.dump_stmt(out, *block, child);
                if let Some((name, body)) = catch {
                    line(out, child, &format!("Catch {name}"));
                    self.dump_stmt(out, *body, child.saturating_add(1));
                }
                if let Some(finally) = finally {
                    line(out, child, "Finally");
                    self.dump_stmt(out, *finally, child.saturating_add(1));
                }
            }
            StmtKind::Debugger => line(out, depth, "Debugger"),
        }
    }

    fn dump_declaration(&self, out: &mut String, decl: &VarDeclaration, depth: usize) {
        line(out, depth, &format!("Declare {}", decl.name));
        if let Some(init) = decl.init {
            self.dump_expr(out, init, depth.saturating_add(1));
        }
    }

    fn dump_optional_expr(&self, out: &mut String, expr: Option<ExprId>, depth: usize, absent: &str) {
        match expr {
            Some(expr) => self.dump_expr(out, expr, depth),
            None => line(out, depth, absent),
        }
    }

    fn dump_function(&self, out: &mut String, id: FunctionId, depth: usize, label: &str) {
        match self.function(id) {
            Some(function) => line(
                out,
                depth,
                &format!(
                    "{label} {}({}) body@{}..{}{}",
                    function.name.as_deref().unwrap_or("<anonymous>"),
                    function.params.join(", "),
                    function.body.start(),
                    function.body.end(),
                    if function.summary.strict { " strict" } else { "" }
                ),
            ),
            None => line(out, depth, "<dangling function>"),
        }
    }

    fn dump_expr(&self, out: &mut String, id: ExprId, depth: usize) {
        let Some(expr) = self.expr(id) else {
            line(out, depth, "<dangling expression>");
            return;
        };
        let child = depth.saturating_add(1);
        match expr {
            Expr::Number(n) => line(out, depth, &format!("Number {}", format_number(*n))),
            Expr::String(s) => line(out, depth, &format!("String {s:?}")),
            Expr::Boolean(b) => line(out, depth, &format!("Boolean {b}")),
            Expr::Null => line(out, depth, "Null"),
            Expr::This => line(out, depth, "This"),
            Expr::RegExp { pattern, flags } => line(out, depth, &format!("RegExp /{pattern}/{flags}")),
            Expr::Resolve(name) => line(out, depth, &format!("Resolve {name}")),
            Expr::Array { elements, trailing_holes } => {
                line(out, depth, &format!("Array holes={trailing_holes}"));
                for element in elements {
                    match element {
                        Some(element) => self.dump_expr(out, *element, child),
                        None => line(out, child, "<hole>"),
                    }
                }
            }
            Expr::Object(properties) => {
                line(out, depth, "Object");
                for property in properties {
                    line(out, child, &format!("{:?} {}", property.kind, property.key));
                    self.dump_expr(out, property.value, child.saturating_add(1));
                }
            }
            Expr::Function(function) => self.dump_function(out, *function, depth, "Function"),
            Expr::Dot { base, name } => {
                line(out, depth, &format!("Dot .{name}"));
                self.dump_expr(out, *base, child);
            }
            Expr::Bracket { base, subscript } => {
                line(out, depth, "Bracket");
                self.dump_expr(out, *base, child);
                self.dump_expr(out, *subscript, child);
            }
            Expr::New { callee, arguments } => {
                line(out, depth, "New");
                self.dump_expr(out, *callee, child);
                for argument in arguments.iter().flatten() {
                    self.dump_expr(out, *argument, child);
                }
            }
            Expr::Call { callee, arguments } => {
                line(out, depth, "Call");
                self.dump_expr(out, *callee, child);
                for argument in arguments {
                    self.dump_expr(out, *argument, child);
                }
            }
            Expr::Prefix { op, target } => {
                line(out, depth, &format!("Prefix {op}"));
                self.dump_expr(out, *target, child);
            }
            Expr::Postfix { op, target } => {
                line(out, depth, &format!("Postfix {op}"));
                self.dump_expr(out, *target, child);
            }
            Expr::Unary { op, operand } => {
                line(out, depth, &format!("Unary {op}"));
                self.dump_expr(out, *operand, child);
            }
            Expr::Binary { op, lhs, rhs } => {
                line(out, depth, &format!("Binary {op}"));
                self.dump_expr(out, *lhs, child);
                self.dump_expr(out, *rhs, child);
            }
            Expr::Logical { op, lhs, rhs } => {
                line(out, depth, &format!("Logical {op}"));
                self.dump_expr(out, *lhs, child);
                self.dump_expr(out, *rhs, child);
            }
            Expr::Conditional { test, consequent, alternate } => {
                line(out, depth, "Conditional");
                self.dump_expr(out, *test, child);
                self.dump_expr(out, *consequent, child);
                self.dump_expr(out, *alternate, child);
            }
            Expr::Assign { op, target, value } => {
                line(out, depth, &format!("Assign {op}"));
                self.dump_expr(out, *target, child);
                self.dump_expr(out, *value, child);
            }
            Expr::Comma(exprs) => {
                line(out, depth, "Comma");
                for expr in exprs {
                    self.dump_expr(out, *expr, child);
                }
            }
        }
    }
}

impl Index<ExprId> for Ast {
    type Output = Expr;

    fn index(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }
}

impl Index<StmtId> for Ast {
    type Output = Stmt;

    fn index(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AstMark {
    exprs: usize,
    stmts: usize,
    functions: usize,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Stmt(StmtId),
    Expr(ExprId),
}

fn declaration_children(decls: &[VarDeclaration], out: &mut Vec<Node>) {
    out.extend(decls.iter().filter_map(|decl| decl.init).map(Node::Expr));
}

fn stmt_children(kind: &StmtKind, out: &mut Vec<Node>) {
    match kind {
        StmtKind::Empty
        | StmtKind::FunctionDeclaration(_)
        | StmtKind::Continue(_)
        | StmtKind::Break(_)
        | StmtKind::Debugger => {}
        StmtKind::Expression(expr) | StmtKind::Throw(expr) => out.push(Node::Expr(*expr)),
        StmtKind::Var(decls) | StmtKind::Const(decls) => declaration_children(decls, out),
        StmtKind::Block(body) => out.extend(body.iter().map(|id| Node::Stmt(*id))),
        StmtKind::If { test, consequent, alternate } => {
            out.push(Node::Expr(*test));
            out.push(Node::Stmt(*consequent));
            out.extend(alternate.map(Node::Stmt));
        }
        StmtKind::DoWhile { body, test } => {
            out.push(Node::Stmt(*body));
            out.push(Node::Expr(*test));
        }
        StmtKind::While { test, body } => {
            out.push(Node::Expr(*test));
            out.push(Node::Stmt(*body));
        }
        StmtKind::For { init, test, update, body } => {
            match init {
                ForInit::None => {}
                ForInit::Var(decls) => declaration_children(decls, out),
                ForInit::Expression(expr) => out.push(Node::Expr(*expr)),
            }
            out.extend(test.map(Node::Expr));
            out.extend(update.map(Node::Expr));
            out.push(Node::Stmt(*body));
        }
        StmtKind::ForIn { target, object, body } => {
            match target {
                ForInTarget::Var(decl) => out.extend(decl.init.map(Node::Expr)),
                ForInTarget::Expression(expr) => out.push(Node::Expr(*expr)),
            }
            out.push(Node::Expr(*object));
            out.push(Node::Stmt(*body));
        }
        StmtKind::Return(value) => out.extend(value.map(Node::Expr)),
        StmtKind::With { object, body } => {
            out.push(Node::Expr(*object));
            out.push(Node::Stmt(*body));
        }
        StmtKind::Switch { discriminant, clauses } => {
            out.push(Node::Expr(*discriminant));
            for clause in clauses {
                out.extend(clause.test.map(Node::Expr));
                out.extend(clause.body.iter().map(|id| Node::Stmt(*id)));
            }
        }
        StmtKind::Labeled { body, .. } => out.push(Node::Stmt(*body)),
        StmtKind::Try { block, catch, finally } => {
            out.push(Node::Stmt(*block));
            out.extend(catch.as_ref().map(|(_, body)| Node::Stmt(*body)));
            out.extend(finally.map(Node::Stmt));
        }
    }
}

fn expr_children(expr: &Expr, out: &mut Vec<Node>) {
    match expr {
        Expr::Number(_)
        | Expr::String(_)
        | Expr::Boolean(_)
        | Expr::Null
        | Expr::This
        | Expr::RegExp { .. }
        | Expr::Resolve(_)
        | Expr::Function(_) => {}
        Expr::Array { elements, .. } => out.extend(elements.iter().flatten().map(|id| Node::Expr(*id))),
        Expr::Object(properties) => out.extend(properties.iter().map(|p| Node::Expr(p.value))),
        Expr::Dot { base, .. } => out.push(Node::Expr(*base)),
        Expr::Bracket { base, subscript } => {
            out.push(Node::Expr(*base));
            out.push(Node::Expr(*subscript));
        }
        Expr::New { callee, arguments } => {
            out.push(Node::Expr(*callee));
            out.extend(arguments.iter().flatten().map(|id| Node::Expr(*id)));
        }
        Expr::Call { callee, arguments } => {
            out.push(Node::Expr(*callee));
            out.extend(arguments.iter().map(|id| Node::Expr(*id)));
        }
        Expr::Prefix { target, .. } | Expr::Postfix { target, .. } => out.push(Node::Expr(*target)),
        Expr::Unary { operand, .. } => out.push(Node::Expr(*operand)),
        Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
            out.push(Node::Expr(*lhs));
            out.push(Node::Expr(*rhs));
        }
        Expr::Conditional { test, consequent, alternate } => {
            out.push(Node::Expr(*test));
            out.push(Node::Expr(*consequent));
            out.push(Node::Expr(*alternate));
        }
        Expr::Assign { target, value, .. } => {
            out.push(Node::Expr(*target));
            out.push(Node::Expr(*value));
        }
        Expr::Comma(exprs) => out.extend(exprs.iter().map(|id| Node::Expr(*id))),
    }
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    let _ = writeln!(out, "{text}");
}

fn labelled(name: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{name} {label}"),
        None => name.to_string(),
    }
}

/// Number formatting close enough to JS `ToString` for integral values,
/// which is what property keys and dumps need.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{n:.0}");
    }
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(-f64::INFINITY), "-Infinity");
    }

    #[test]
    fn test_truncate_drops_speculative_nodes() {
        let mut ast = Ast::default();
        let kept = ast.push_expr(Expr::Number(1.0));
        let mark = ast.mark();
        ast.push_expr(Expr::Null);
        ast.truncate(mark);
        assert_eq!(ast.node_count(), 1);
        assert_eq!(ast.expr(kept), Some(&Expr::Number(1.0)));
    }

    #[test]
    fn test_compound_assignment_ops() {
        assert_eq!(AssignOp::Assign.binary_op(), None);
        assert_eq!(AssignOp::UnsignedRightShift.binary_op(), Some(BinaryOp::UnsignedRightShift));
        assert_eq!(AssignOp::BitXor.to_string(), "^=");
    }
}
