//! Code generation for the optimizing tier.
//!
//! Register use: `rdi` points at the locals (one 8-byte slot each, the
//! int32 value in the low half) and `esi` holds the argument count on
//! entry. Expression values end up in `eax`, right-hand operands in
//! `edx`, shift counts and scratch values in `ecx`. Intermediate values
//! are spilled with push/pop.
//!
//! Every speculation (overflow, negative zero, uint32 results, results
//! that are not int32 at all) is a jump to the OSR exit thunk; the
//! caller links them once the thunk address is known.

use std::fmt;

use kestrel_asm::{Address, AluOp, Assembler, Call, Condition, Jump, Label, RegisterId, ShiftOp};
use kestrel_syntax::ast::{
    AssignOp, Ast, BinaryOp, Expr, ExprId, ForInit, LogicalOp, StmtId, StmtKind, UnaryOp, UpdateOp, VarDeclaration,
};

use super::{FrameLayout, slot_offset};
use crate::error::JitError;
use crate::types::Specialization;

const VALUE: RegisterId = RegisterId::Rax;
const OPERAND: RegisterId = RegisterId::Rdx;
const SCRATCH: RegisterId = RegisterId::Rcx;
const LOCALS: RegisterId = RegisterId::Rdi;
const ARGUMENT_COUNT: RegisterId = RegisterId::Rsi;

/// Unlinked output of [`CodeGenerator::generate`].
#[derive(Debug)]
pub(crate) struct Generated {
    pub asm: Assembler,
    pub entry: Label,
    pub arity_entry: Label,
    pub arity_fixup: Option<Call>,
    pub construct_alloc: Option<Call>,
    pub osr_exits: Vec<Jump>,
}

/// Pending `break`/`continue` jumps of the innermost loops.
#[derive(Debug, Default)]
struct LoopTargets {
    breaks: Vec<Jump>,
    continues: Vec<Jump>,
}

pub(crate) struct CodeGenerator<'a> {
    asm: Assembler,
    ast: &'a Ast,
    frame: &'a FrameLayout,
    osr_exits: Vec<Jump>,
    loops: Vec<LoopTargets>,
}

fn unsupported(what: impl fmt::Display) -> JitError {
    JitError::CompilationFailed(format!("unsupported {what}"))
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn new(ast: &'a Ast, frame: &'a FrameLayout) -> Self {
        Self {
            asm: Assembler::new(),
            ast,
            frame,
            osr_exits: Vec::new(),
            loops: Vec::new(),
        }
    }

    pub(crate) fn generate(mut self, body: &[StmtId], specialization: Specialization) -> Result<Generated, JitError> {
        let arity_entry = self.asm.label();
        let mut arity_fixup = None;
        let entry = if specialization == Specialization::Global {
            arity_entry
        } else {
            let parameters = i32::try_from(self.frame.parameter_count()).map_err(|_| unsupported("parameter count"))?;
            self.asm.cmp32_ri(ARGUMENT_COUNT, parameters);
            let enough = self.asm.jcc(Condition::GreaterOrEqual);
            arity_fixup = Some(self.asm.call());
            self.asm.link_jump_here(enough)
        };
        let construct_alloc = (specialization == Specialization::Construct).then(|| self.asm.call());

        // Locals start out as int32 zero.
        for slot in self.frame.parameter_count()..self.frame.slot_count() {
            let offset = slot_offset(slot).ok_or_else(|| unsupported("frame size"))?;
            self.asm.mov32_mi(Address::new(LOCALS, offset), 0);
        }

        for stmt in body {
            self.statement(*stmt)?;
        }
        // Falling off the end produces `undefined`, which only the baseline can represent.
        self.exit_always();

        Ok(Generated {
            asm: self.asm,
            entry,
            arity_entry,
            arity_fixup,
            construct_alloc,
            osr_exits: self.osr_exits,
        })
    }

    // ─── Speculation exits ─────────────────────────────────────────

    fn exit_if(&mut self, condition: Condition) {
        let exit = self.asm.jcc(condition);
        self.osr_exits.push(exit);
    }

    fn exit_always(&mut self) {
        let exit = self.asm.jmp();
        self.osr_exits.push(exit);
    }

    // ─── Statements ────────────────────────────────────────────────

    fn statement(&mut self, id: StmtId) -> Result<(), JitError> {
        let ast = self.ast;
        let stmt = ast.stmt(id).ok_or_else(|| unsupported("dangling statement"))?;
        match &stmt.kind {
            StmtKind::Empty => Ok(()),
            StmtKind::Expression(expr) => self.expr(*expr),
            StmtKind::Var(decls) | StmtKind::Const(decls) => self.declarations(decls),
            StmtKind::Block(body) => body.iter().try_for_each(|stmt| self.statement(*stmt)),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => self.if_statement(*test, *consequent, *alternate),
            StmtKind::While { test, body } => self.while_loop(*test, *body),
            StmtKind::DoWhile { body, test } => self.do_while_loop(*body, *test),
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.for_loop(init, *test, *update, *body),
            StmtKind::Break(None) => {
                let jump = self.asm.jmp();
                let targets = self.loops.last_mut().ok_or_else(|| unsupported("break outside a loop"))?;
                targets.breaks.push(jump);
                Ok(())
            }
            StmtKind::Continue(None) => {
                let jump = self.asm.jmp();
                let targets = self
                    .loops
                    .last_mut()
                    .ok_or_else(|| unsupported("continue outside a loop"))?;
                targets.continues.push(jump);
                Ok(())
            }
            StmtKind::Return(Some(value)) => {
                self.expr(*value)?;
                self.asm.ret();
                Ok(())
            }
            StmtKind::Return(None) => {
                self.exit_always();
                Ok(())
            }
            other => Err(unsupported(format_args!(
                "{} at line {}",
                statement_name(other),
                stmt.line
            ))),
        }
    }

    fn declarations(&mut self, decls: &[VarDeclaration]) -> Result<(), JitError> {
        for decl in decls {
            if let Some(init) = decl.init {
                let slot = self.slot(&decl.name)?;
                self.expr(init)?;
                self.asm.mov32_mr(slot, VALUE);
            }
        }
        Ok(())
    }

    fn if_statement(&mut self, test: ExprId, consequent: StmtId, alternate: Option<StmtId>) -> Result<(), JitError> {
        let skip = self.branch(test, false)?;
        self.statement(consequent)?;
        match alternate {
            Some(alternate) => {
                let done = self.asm.jmp();
                self.link_here(skip);
                self.statement(alternate)?;
                self.asm.link_jump_here(done);
            }
            None => self.link_here(skip),
        }
        Ok(())
    }

    fn while_loop(&mut self, test: ExprId, body: StmtId) -> Result<(), JitError> {
        let head = self.asm.label_for_watchpoint();
        let exits = self.branch(test, false)?;
        let targets = self.loop_body(body)?;
        let back = self.asm.jmp();
        self.asm.link_jump(back, head);
        self.link_to(targets.continues, head);
        self.link_here(exits.into_iter().chain(targets.breaks));
        Ok(())
    }

    fn do_while_loop(&mut self, body: StmtId, test: ExprId) -> Result<(), JitError> {
        let head = self.asm.label_for_watchpoint();
        let targets = self.loop_body(body)?;
        self.link_here(targets.continues);
        let again = self.branch(test, true)?;
        self.link_to(again, head);
        self.link_here(targets.breaks);
        Ok(())
    }

    fn for_loop(
        &mut self,
        init: &ForInit,
        test: Option<ExprId>,
        update: Option<ExprId>,
        body: StmtId,
    ) -> Result<(), JitError> {
        match init {
            ForInit::None => {}
            ForInit::Var(decls) => self.declarations(decls)?,
            ForInit::Expression(expr) => self.expr(*expr)?,
        }
        let head = self.asm.label_for_watchpoint();
        let exits = match test {
            Some(test) => self.branch(test, false)?,
            None => Vec::new(),
        };
        let targets = self.loop_body(body)?;
        self.link_here(targets.continues);
        if let Some(update) = update {
            self.expr(update)?;
        }
        let back = self.asm.jmp();
        self.asm.link_jump(back, head);
        self.link_here(exits.into_iter().chain(targets.breaks));
        Ok(())
    }

    fn loop_body(&mut self, body: StmtId) -> Result<LoopTargets, JitError> {
        self.loops.push(LoopTargets::default());
        let result = self.statement(body);
        let targets = self.loops.pop().unwrap_or_default();
        result.map(|()| targets)
    }

    fn link_here(&mut self, jumps: impl IntoIterator<Item = Jump>) {
        let here = self.asm.label();
        self.link_to(jumps, here);
    }

    fn link_to(&mut self, jumps: impl IntoIterator<Item = Jump>, target: Label) {
        for jump in jumps {
            self.asm.link_jump(jump, target);
        }
    }

    // ─── Conditions ────────────────────────────────────────────────

    /// Evaluate `test` for control flow. Returns the jumps taken when its
    /// truth value equals `when`; otherwise execution falls through.
    fn branch(&mut self, test: ExprId, when: bool) -> Result<Vec<Jump>, JitError> {
        match self.node(test)? {
            Expr::Binary { op, lhs, rhs } => match comparison(*op) {
                Some(condition) => {
                    self.operands(*lhs, *rhs)?;
                    self.asm.cmp32_rr(VALUE, OPERAND);
                    let condition = if when { condition } else { condition.invert() };
                    Ok(vec![self.asm.jcc(condition)])
                }
                None => self.truthiness(test, when),
            },
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.branch(*operand, !when),
            Expr::Logical { op, lhs, rhs } => {
                // the operand value that decides without looking at `rhs`
                let decisive = *op == LogicalOp::Or;
                if decisive == when {
                    let mut jumps = self.branch(*lhs, when)?;
                    jumps.extend(self.branch(*rhs, when)?);
                    Ok(jumps)
                } else {
                    let skip = self.branch(*lhs, decisive)?;
                    let jumps = self.branch(*rhs, when)?;
                    self.link_here(skip);
                    Ok(jumps)
                }
            }
            _ => self.truthiness(test, when),
        }
    }

    fn truthiness(&mut self, test: ExprId, when: bool) -> Result<Vec<Jump>, JitError> {
        self.expr(test)?;
        self.asm.test32_rr(VALUE, VALUE);
        let condition = if when { Condition::NotEqual } else { Condition::Equal };
        Ok(vec![self.asm.jcc(condition)])
    }

    // ─── Expressions ───────────────────────────────────────────────

    fn node(&self, id: ExprId) -> Result<&'a Expr, JitError> {
        let ast = self.ast;
        ast.expr(id).ok_or_else(|| unsupported("dangling expression"))
    }

    fn slot(&self, name: &str) -> Result<Address, JitError> {
        let offset = self
            .frame
            .offset_of(name)
            .ok_or_else(|| unsupported(format_args!("non-local variable '{name}'")))?;
        Ok(Address::new(LOCALS, offset))
    }

    /// The slot of an assignment or update target.
    fn target(&self, id: ExprId) -> Result<Address, JitError> {
        match self.node(id)? {
            Expr::Resolve(name) => self.slot(name),
            other => Err(unsupported(format_args!("assignment to {}", expression_name(other)))),
        }
    }

    /// Leave the value of `id` in `eax`.
    fn expr(&mut self, id: ExprId) -> Result<(), JitError> {
        match self.node(id)? {
            Expr::Number(value) => {
                let value = int32(*value).ok_or_else(|| unsupported(format_args!("non-int32 literal {value}")))?;
                self.asm.mov32_ri(VALUE, value);
            }
            Expr::Resolve(name) => {
                let slot = self.slot(name)?;
                self.asm.mov32_rm(VALUE, slot);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.operands(*lhs, *rhs)?;
                self.apply(*op)?;
            }
            Expr::Unary { op, operand } => self.unary(*op, *operand)?,
            Expr::Prefix { op, target } => self.update(*op, *target, true)?,
            Expr::Postfix { op, target } => self.update(*op, *target, false)?,
            Expr::Assign { op, target, value } => self.assign(*op, *target, *value)?,
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let otherwise = self.branch(*test, false)?;
                self.expr(*consequent)?;
                let done = self.asm.jmp();
                self.link_here(otherwise);
                self.expr(*alternate)?;
                self.asm.link_jump_here(done);
            }
            Expr::Comma(exprs) => {
                for expr in exprs {
                    self.expr(*expr)?;
                }
            }
            other => return Err(unsupported(expression_name(other))),
        }
        Ok(())
    }

    /// `lhs` in `eax`, `rhs` in `edx`.
    fn operands(&mut self, lhs: ExprId, rhs: ExprId) -> Result<(), JitError> {
        self.expr(lhs)?;
        self.asm.push(VALUE);
        self.expr(rhs)?;
        self.asm.mov32_rr(OPERAND, VALUE);
        self.asm.pop(VALUE);
        Ok(())
    }

    /// `eax = eax <op> edx`.
    fn apply(&mut self, op: BinaryOp) -> Result<(), JitError> {
        match op {
            BinaryOp::Add => {
                self.asm.add32_rr(VALUE, OPERAND);
                self.exit_if(Condition::Overflow);
            }
            BinaryOp::Sub => {
                self.asm.sub32_rr(VALUE, OPERAND);
                self.exit_if(Condition::Overflow);
            }
            BinaryOp::Mul => {
                // a zero product is -0 when either factor is negative
                self.asm.mov32_rr(SCRATCH, VALUE);
                self.asm.alu32_rr(AluOp::Or, SCRATCH, OPERAND);
                self.asm.imul32_rr(VALUE, OPERAND);
                self.exit_if(Condition::Overflow);
                self.asm.test32_rr(VALUE, VALUE);
                let nonzero = self.asm.jcc(Condition::NotEqual);
                self.asm.test32_rr(SCRATCH, SCRATCH);
                self.exit_if(Condition::Sign);
                self.asm.link_jump_here(nonzero);
            }
            BinaryOp::BitAnd => self.asm.alu32_rr(AluOp::And, VALUE, OPERAND),
            BinaryOp::BitOr => self.asm.alu32_rr(AluOp::Or, VALUE, OPERAND),
            BinaryOp::BitXor => self.asm.alu32_rr(AluOp::Xor, VALUE, OPERAND),
            BinaryOp::LeftShift => self.shift(ShiftOp::Shl),
            BinaryOp::RightShift => self.shift(ShiftOp::Sar),
            BinaryOp::UnsignedRightShift => {
                self.shift(ShiftOp::Shr);
                // above i32::MAX the result is a uint32
                self.asm.test32_rr(VALUE, VALUE);
                self.exit_if(Condition::Sign);
            }
            other if comparison(other).is_some() => {
                return Err(unsupported(format_args!("comparison '{other}' as a value")));
            }
            other => return Err(unsupported(format_args!("operator '{other}'"))),
        }
        Ok(())
    }

    fn shift(&mut self, op: ShiftOp) {
        self.asm.mov32_rr(SCRATCH, OPERAND);
        self.asm.shift32_cl(op, VALUE);
    }

    fn unary(&mut self, op: UnaryOp, operand: ExprId) -> Result<(), JitError> {
        match op {
            UnaryOp::Plus => self.expr(operand),
            UnaryOp::Negate => {
                self.expr(operand)?;
                // -0 is not an int32
                self.asm.test32_rr(VALUE, VALUE);
                self.exit_if(Condition::Equal);
                self.asm.neg32(VALUE);
                self.exit_if(Condition::Overflow);
                Ok(())
            }
            UnaryOp::BitNot => {
                self.expr(operand)?;
                self.asm.not32(VALUE);
                Ok(())
            }
            other => Err(unsupported(format_args!("operator '{other}' as a value"))),
        }
    }

    fn update(&mut self, op: UpdateOp, target: ExprId, prefix: bool) -> Result<(), JitError> {
        let slot = self.target(target)?;
        let step = match op {
            UpdateOp::Increment => AluOp::Add,
            UpdateOp::Decrement => AluOp::Sub,
        };
        self.asm.mov32_rm(VALUE, slot);
        let updated = if prefix { VALUE } else { OPERAND };
        if !prefix {
            self.asm.mov32_rr(OPERAND, VALUE);
        }
        self.asm.alu32_ri(step, updated, 1);
        self.exit_if(Condition::Overflow);
        self.asm.mov32_mr(slot, updated);
        Ok(())
    }

    fn assign(&mut self, op: AssignOp, target: ExprId, value: ExprId) -> Result<(), JitError> {
        let slot = self.target(target)?;
        self.expr(value)?;
        if let Some(binary) = op.binary_op() {
            self.asm.mov32_rr(OPERAND, VALUE);
            self.asm.mov32_rm(VALUE, slot);
            self.apply(binary)?;
        }
        self.asm.mov32_mr(slot, VALUE);
        Ok(())
    }
}

/// `value` as an int32, if it is one. -0 is not.
fn int32(value: f64) -> Option<i32> {
    if value.fract() != 0.0 || (value == 0.0 && value.is_sign_negative()) {
        return None;
    }
    if value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return None;
    }
    Some(value as i32)
}

fn comparison(op: BinaryOp) -> Option<Condition> {
    let condition = match op {
        BinaryOp::Less => Condition::Less,
        BinaryOp::Greater => Condition::Greater,
        BinaryOp::LessEqual => Condition::LessOrEqual,
        BinaryOp::GreaterEqual => Condition::GreaterOrEqual,
        BinaryOp::Equal | BinaryOp::StrictEqual => Condition::Equal,
        BinaryOp::NotEqual | BinaryOp::StrictNotEqual => Condition::NotEqual,
        _ => return None,
    };
    Some(condition)
}

fn statement_name(kind: &StmtKind) -> &'static str {
    match kind {
        StmtKind::Empty => "empty statement",
        StmtKind::Expression(_) => "expression statement",
        StmtKind::Var(_) => "var declaration",
        StmtKind::Const(_) => "const declaration",
        StmtKind::FunctionDeclaration(_) => "function declaration",
        StmtKind::Block(_) => "block",
        StmtKind::If { .. } => "if statement",
        StmtKind::DoWhile { .. } => "do-while loop",
        StmtKind::While { .. } => "while loop",
        StmtKind::For { .. } => "for loop",
        StmtKind::ForIn { .. } => "for-in loop",
        StmtKind::Continue(_) => "labeled continue",
        StmtKind::Break(_) => "labeled break",
        StmtKind::Return(_) => "return",
        StmtKind::With { .. } => "with statement",
        StmtKind::Switch { .. } => "switch statement",
        StmtKind::Labeled { .. } => "labeled statement",
        StmtKind::Throw(_) => "throw statement",
        StmtKind::Try { .. } => "try statement",
        StmtKind::Debugger => "debugger statement",
    }
}

fn expression_name(expr: &Expr) -> &'static str {
    match expr {
        Expr::Number(_) => "number",
        Expr::String(_) => "string literal",
        Expr::Boolean(_) => "boolean literal",
        Expr::Null => "null",
        Expr::This => "this",
        Expr::RegExp { .. } => "regular expression",
        Expr::Resolve(_) => "variable",
        Expr::Array { .. } => "array literal",
        Expr::Object(_) => "object literal",
        Expr::Function(_) => "function expression",
        Expr::Dot { .. } => "property access",
        Expr::Bracket { .. } => "element access",
        Expr::New { .. } => "new expression",
        Expr::Call { .. } => "call",
        Expr::Prefix { .. } => "prefix update",
        Expr::Postfix { .. } => "postfix update",
        Expr::Unary { .. } => "unary expression",
        Expr::Binary { .. } => "binary expression",
        Expr::Logical { .. } => "logical expression as a value",
        Expr::Conditional { .. } => "conditional expression",
        Expr::Assign { .. } => "assignment",
        Expr::Comma(_) => "comma expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_literals() {
        assert_eq!(int32(7.0), Some(7));
        assert_eq!(int32(-2_147_483_648.0), Some(i32::MIN));
        assert_eq!(int32(2_147_483_648.0), None, "past i32::MAX");
        assert_eq!(int32(0.5), None);
        assert_eq!(int32(-0.0), None, "negative zero");
        assert_eq!(int32(f64::NAN), None);
    }

    #[test]
    fn test_comparisons_invert() {
        let less = comparison(BinaryOp::Less).unwrap();
        assert_eq!(less.invert(), Condition::GreaterOrEqual);
        assert_eq!(comparison(BinaryOp::Add), None);
    }
}
