//! Expression productions, literals and function literals.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ast::{AssignOp, BinaryOp, LogicalOp, PropertyKind, UnaryOp, UpdateOp, format_number};
use crate::error::{ParseErrorKind, ParseResult};
use crate::function_cache::CachedFunction;
use crate::lexer::LexMode;
use crate::scope::{CodeFeatures, is_eval_or_arguments};
use crate::source::SourceRange;
use crate::syntax_checker::SyntaxChecker;
use crate::token::{Identifier, TokenKind, TokenValue};
use crate::tree_builder::{FunctionInfo, TreeBuilder};

use super::Parser;

#[derive(Debug, Clone, Copy)]
enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(kind: TokenKind) -> Option<Operator> {
    let op = match kind {
        TokenKind::Or => return Some(Operator::Logical(LogicalOp::Or)),
        TokenKind::And => return Some(Operator::Logical(LogicalOp::And)),
        TokenKind::BitOr => BinaryOp::BitOr,
        TokenKind::BitXor => BinaryOp::BitXor,
        TokenKind::BitAnd => BinaryOp::BitAnd,
        TokenKind::EqEq => BinaryOp::Equal,
        TokenKind::NotEq => BinaryOp::NotEqual,
        TokenKind::EqEqEq => BinaryOp::StrictEqual,
        TokenKind::NotEqEq => BinaryOp::StrictNotEqual,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::LessEq => BinaryOp::LessEqual,
        TokenKind::GreaterEq => BinaryOp::GreaterEqual,
        TokenKind::InstanceOf => BinaryOp::InstanceOf,
        TokenKind::In => BinaryOp::In,
        TokenKind::LShift => BinaryOp::LeftShift,
        TokenKind::RShift => BinaryOp::RightShift,
        TokenKind::URShift => BinaryOp::UnsignedRightShift,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Times => BinaryOp::Mul,
        TokenKind::Divide => BinaryOp::Div,
        TokenKind::Mod => BinaryOp::Mod,
        _ => return None,
    };
    Some(Operator::Binary(op))
}

fn assign_operator(kind: TokenKind) -> Option<AssignOp> {
    let op = match kind {
        TokenKind::Eq => AssignOp::Assign,
        TokenKind::PlusEq => AssignOp::Add,
        TokenKind::MinusEq => AssignOp::Sub,
        TokenKind::TimesEq => AssignOp::Mul,
        TokenKind::DivideEq => AssignOp::Div,
        TokenKind::ModEq => AssignOp::Mod,
        TokenKind::LShiftEq => AssignOp::LeftShift,
        TokenKind::RShiftEq => AssignOp::RightShift,
        TokenKind::URShiftEq => AssignOp::UnsignedRightShift,
        TokenKind::AndEq => AssignOp::BitAnd,
        TokenKind::OrEq => AssignOp::BitOr,
        TokenKind::XorEq => AssignOp::BitXor,
        _ => return None,
    };
    Some(op)
}

fn unary_operator(kind: TokenKind) -> Option<UnaryOp> {
    let op = match kind {
        TokenKind::Plus => UnaryOp::Plus,
        TokenKind::Minus => UnaryOp::Negate,
        TokenKind::BitNot => UnaryOp::BitNot,
        TokenKind::Not => UnaryOp::Not,
        TokenKind::TypeOf => UnaryOp::TypeOf,
        TokenKind::Void => UnaryOp::Void,
        TokenKind::Delete => UnaryOp::Delete,
        _ => return None,
    };
    Some(op)
}

fn update_operator(kind: TokenKind) -> Option<UpdateOp> {
    match kind {
        TokenKind::PlusPlus => Some(UpdateOp::Increment),
        TokenKind::MinusMinus => Some(UpdateOp::Decrement),
        _ => None,
    }
}

fn accessor_kind(word: &str) -> Option<PropertyKind> {
    match word {
        "get" => Some(PropertyKind::Getter),
        "set" => Some(PropertyKind::Setter),
        _ => None,
    }
}

/// Regular expression flags: any of `g`, `i`, `m`, each at most once.
pub(crate) fn valid_regexp_flags(flags: &str) -> bool {
    let mut seen = [false; 3];
    for c in flags.chars() {
        let slot = match c {
            'g' => 0,
            'i' => 1,
            'm' => 2,
            _ => return false,
        };
        if seen[slot] {
            return false;
        }
        seen[slot] = true;
    }
    true
}

/// Kinds already seen for one object literal key.
#[derive(Debug, Clone, Copy, Default)]
struct SeenProperty {
    data: bool,
    getter: bool,
    setter: bool,
}

enum ParsedProperty<B: TreeBuilder> {
    Property(B::Property, Arc<str>, PropertyKind),
    /// Loose parse met an accessor and must be redone with validation.
    NeedsValidation,
}

impl Parser<'_> {
    pub(super) fn with_allows_in<T>(
        &mut self,
        allows_in: bool,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let saved = std::mem::replace(&mut self.allows_in, allows_in);
        let result = f(self);
        self.allows_in = saved;
        result
    }

    /// Operators nested inside brackets, parentheses or literals say nothing
    /// about whether the enclosing expression is still assignable.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let saved = self.non_lhs_count;
        let result = f(self);
        self.non_lhs_count = saved;
        result
    }

    fn bump_non_lhs(&mut self) {
        self.non_lhs_count = self.non_lhs_count.saturating_add(1);
        self.non_trivial_expression_count = self.non_trivial_expression_count.saturating_add(1);
    }

    fn last_identifier_is_eval_or_arguments(&self) -> bool {
        self.last_identifier
            .as_deref()
            .is_some_and(is_eval_or_arguments)
    }

    /// Shared target validation for assignment and `++`/`--`.
    fn check_assignment_target<B: TreeBuilder>(&mut self, b: &B, target: &B::Expression) -> ParseResult<()> {
        if !b.is_location(target) && !b.is_call(target) {
            return Err(self.early("Invalid left-hand side in assignment"));
        }
        if b.is_resolve(target) {
            if self.strict() && self.last_identifier_is_eval_or_arguments() {
                return Err(self.early(format!(
                    "Cannot modify '{}' in strict mode",
                    self.last_identifier.as_deref().unwrap_or_default()
                )));
            }
            if let Some(name) = self.last_identifier.clone() {
                self.scope.write_variable(&name);
            }
        }
        Ok(())
    }

    // ─── Comma and assignment ──────────────────────────────────────

    pub(super) fn parse_expression<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        let mut expr = self.parse_assignment(b)?;
        while self.eat(TokenKind::Comma) {
            self.bump_non_lhs();
            let rhs = self.parse_assignment(b)?;
            expr = b.comma(expr, rhs);
        }
        Ok(expr)
    }

    pub(super) fn parse_assignment<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        self.guarded(|p| p.parse_assignment_inner(b))
    }

    fn parse_assignment_inner<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        let non_lhs_before = self.non_lhs_count;
        let lhs = self.parse_conditional(b)?;
        if self.non_lhs_count != non_lhs_before {
            return Ok(lhs);
        }
        let Some(op) = assign_operator(self.token.kind) else {
            return Ok(lhs);
        };
        self.check_assignment_target(b, &lhs)?;
        self.next();
        self.assignment_count = self.assignment_count.saturating_add(1);
        self.bump_non_lhs();
        let value = self.parse_assignment(b)?;
        Ok(b.assignment(op, lhs, value))
    }

    fn parse_conditional<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        let test = self.parse_binary(b)?;
        if !self.eat(TokenKind::Question) {
            return Ok(test);
        }
        self.bump_non_lhs();
        let consequent = self.with_allows_in(true, |p| p.parse_assignment(b))?;
        self.consume(TokenKind::Colon)?;
        let alternate = self.parse_assignment(b)?;
        Ok(b.conditional(test, consequent, alternate))
    }

    // ─── Binary operators ──────────────────────────────────────────

    fn current_binary_operator(&self) -> Option<(Operator, u8)> {
        if self.token.kind == TokenKind::In && !self.allows_in {
            return None;
        }
        let precedence = self.token.kind.binary_precedence()?;
        Some((binary_operator(self.token.kind)?, precedence))
    }

    /// Precedence climbing over an operand stack and an operator stack.
    fn parse_binary<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        let mut operands: Vec<B::Expression> = Vec::new();
        let mut operators: Vec<(Operator, u8)> = Vec::new();
        let mut current = self.parse_unary(b)?;

        while let Some((op, precedence)) = self.current_binary_operator() {
            self.next();
            self.bump_non_lhs();
            while let Some(&(top, top_precedence)) = operators.last() {
                if top_precedence < precedence {
                    break;
                }
                operators.pop();
                let Some(lhs) = operands.pop() else { break };
                current = reduce(b, top, lhs, current);
            }
            operands.push(current);
            operators.push((op, precedence));
            current = self.parse_unary(b)?;
        }

        while let (Some((op, _)), Some(lhs)) = (operators.pop(), operands.pop()) {
            current = reduce(b, op, lhs, current);
        }
        Ok(current)
    }

    // ─── Unary, postfix, member ────────────────────────────────────

    fn parse_unary<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        self.guarded(|p| p.parse_unary_inner(b))
    }

    fn parse_unary_inner<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        if let Some(op) = unary_operator(self.token.kind) {
            self.next();
            self.bump_non_lhs();
            let operand = self.parse_unary(b)?;
            if op == UnaryOp::Delete && self.strict() && b.is_resolve(&operand) {
                return Err(self.early("Cannot delete unqualified property in strict mode"));
            }
            return Ok(b.unary(op, operand));
        }
        if let Some(op) = update_operator(self.token.kind) {
            self.next();
            self.bump_non_lhs();
            let target = self.parse_unary(b)?;
            self.check_assignment_target(b, &target)?;
            return Ok(b.prefix(op, target));
        }

        let expr = self.parse_member(b)?;
        if let Some(op) = update_operator(self.token.kind)
            && !self.token.newline_before
        {
            self.check_assignment_target(b, &expr)?;
            self.next();
            self.bump_non_lhs();
            return Ok(b.postfix(op, expr));
        }
        Ok(expr)
    }

    fn parse_member<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        self.guarded(|p| p.parse_member_inner(b))
    }

    fn parse_member_inner<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        let mut pending_news = 0u32;
        while self.eat(TokenKind::New) {
            pending_news = pending_news.saturating_add(1);
        }

        let mut base = if self.eat(TokenKind::Function) {
            let name = self.current_identifier();
            if name.is_some() {
                self.next();
            }
            let function = self.parse_function_tail::<B>(name, false)?;
            b.function_expr(function)
        } else {
            self.parse_primary(b)?
        };

        loop {
            match self.token.kind {
                TokenKind::OpenBracket => {
                    self.next();
                    let subscript = self.nested(|p| p.with_allows_in(true, |p| p.parse_expression(b)))?;
                    self.consume(TokenKind::CloseBracket)?;
                    base = b.bracket(base, subscript);
                }
                TokenKind::OpenParen => {
                    if pending_news > 0 {
                        pending_news -= 1;
                        let arguments = self.parse_arguments(b)?;
                        base = b.new_expr(base, Some(arguments));
                    } else {
                        let is_eval_call = b.is_resolve(&base)
                            && self.last_identifier.as_deref() == Some("eval");
                        let arguments = self.parse_arguments(b)?;
                        if is_eval_call {
                            self.scope.set_uses_eval();
                        }
                        base = b.call(base, arguments);
                    }
                }
                TokenKind::Dot => {
                    self.next_with(LexMode::IgnoreReservedWords);
                    let name = match (&self.token.kind, &self.token.value) {
                        (TokenKind::Identifier, TokenValue::Identifier(name)) => name.clone(),
                        _ => return Err(self.unexpected()),
                    };
                    self.next();
                    base = b.dot(base, &name);
                }
                _ => break,
            }
            self.non_trivial_expression_count = self.non_trivial_expression_count.saturating_add(1);
        }

        for _ in 0..pending_news {
            self.non_trivial_expression_count = self.non_trivial_expression_count.saturating_add(1);
            base = b.new_expr(base, None);
        }
        Ok(base)
    }

    fn parse_arguments<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::ArgumentList> {
        self.consume(TokenKind::OpenParen)?;
        let mut arguments = B::ArgumentList::default();
        if self.eat(TokenKind::CloseParen) {
            return Ok(arguments);
        }
        loop {
            let argument = self.nested(|p| p.with_allows_in(true, |p| p.parse_assignment(b)))?;
            b.append_argument(&mut arguments, argument);
            if self.eat(TokenKind::CloseParen) {
                return Ok(arguments);
            }
            self.consume(TokenKind::Comma)?;
        }
    }

    // ─── Primary ───────────────────────────────────────────────────

    fn parse_primary<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        match self.token.kind {
            TokenKind::OpenBrace => self.parse_object_literal(b),
            TokenKind::OpenBracket => self.parse_array_literal(b),
            TokenKind::OpenParen => {
                self.next();
                let expr = self.nested(|p| p.with_allows_in(true, |p| p.parse_expression(b)))?;
                self.consume(TokenKind::CloseParen)?;
                Ok(expr)
            }
            TokenKind::This => {
                self.next();
                self.scope.add_feature(CodeFeatures::USES_THIS);
                Ok(b.this_expr())
            }
            TokenKind::Number => {
                let value = self.token.number().unwrap_or(f64::NAN);
                self.next();
                Ok(b.number(value))
            }
            TokenKind::String => {
                let value = self.token.string().cloned().unwrap_or_else(|| Arc::from(""));
                self.next();
                Ok(b.string(&value))
            }
            TokenKind::Null => {
                self.next();
                Ok(b.null())
            }
            TokenKind::True | TokenKind::False => {
                let value = self.at(TokenKind::True);
                self.next();
                Ok(b.boolean(value))
            }
            TokenKind::Divide | TokenKind::DivideEq => self.parse_regexp(b),
            _ => {
                let Some(name) = self.current_identifier() else {
                    return Err(self.unexpected());
                };
                self.next();
                self.scope.use_variable(&name, false);
                let expr = b.resolve(&name);
                self.last_identifier = Some(name);
                Ok(expr)
            }
        }
    }

    fn parse_regexp<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        let (pattern, flags) = self
            .lexer
            .scan_regexp(&self.token)
            .map_err(|message| self.error(ParseErrorKind::Lexical, message))?;
        if !valid_regexp_flags(&flags) {
            return Err(self.error(
                ParseErrorKind::Syntax,
                format!("Invalid regular expression flags '{flags}'"),
            ));
        }
        // The lexer already sits after the flags.
        self.last_token_end = self.lexer.offset();
        self.last_line = self.token.start.line();
        self.token = self.lexer.next_token(LexMode::Normal, self.strict());
        Ok(b.regexp(&pattern, &flags))
    }

    fn parse_array_literal<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        self.consume(TokenKind::OpenBracket)?;
        let mut elements = B::ElementList::default();
        let mut pending_holes = 0u32;
        loop {
            if self.eat(TokenKind::CloseBracket) {
                return Ok(b.array(elements, pending_holes));
            }
            if self.eat(TokenKind::Comma) {
                pending_holes = pending_holes.saturating_add(1);
                continue;
            }
            for _ in 0..pending_holes {
                b.append_element(&mut elements, None);
            }
            pending_holes = 0;
            let element = self.nested(|p| p.with_allows_in(true, |p| p.parse_assignment(b)))?;
            b.append_element(&mut elements, Some(element));
            if self.eat(TokenKind::CloseBracket) {
                return Ok(b.array(elements, 0));
            }
            self.consume(TokenKind::Comma)?;
        }
    }

    // ─── Object literals ───────────────────────────────────────────

    /// Loose parse first; an accessor forces a validated re-parse from the
    /// `{` under the duplicate-property rules.
    fn parse_object_literal<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        if self.strict() {
            return self.parse_object_literal_validated(b);
        }
        let start = self.checkpoint();
        let builder_start = b.checkpoint();
        if let Some(expr) = self.parse_object_literal_loose(b)? {
            return Ok(expr);
        }
        tracing::trace!(offset = start.lexer.offset, "Object literal has accessors, re-parsing");
        self.rewind(start);
        b.rewind(builder_start);
        self.parse_object_literal_validated(b)
    }

    fn parse_object_literal_loose<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<Option<B::Expression>> {
        self.consume_with(TokenKind::OpenBrace, LexMode::IgnoreReservedWords)?;
        let mut properties = B::PropertyList::default();
        while !self.eat(TokenKind::CloseBrace) {
            match self.parse_property(b, false)? {
                ParsedProperty::Property(property, _, _) => b.append_property(&mut properties, property),
                ParsedProperty::NeedsValidation => return Ok(None),
            }
            if !self.at(TokenKind::CloseBrace) {
                self.consume_with(TokenKind::Comma, LexMode::IgnoreReservedWords)?;
            }
        }
        Ok(Some(b.object(properties)))
    }

    fn parse_object_literal_validated<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        self.consume_with(TokenKind::OpenBrace, LexMode::IgnoreReservedWords)?;
        let mut properties = B::PropertyList::default();
        let mut seen: FxHashMap<Arc<str>, SeenProperty> = FxHashMap::default();
        while !self.at(TokenKind::CloseBrace) {
            let position = self.token.start;
            let ParsedProperty::Property(property, key, kind) = self.parse_property(b, true)? else {
                return Err(self.unexpected());
            };
            let entry = seen.entry(key.clone()).or_default();
            let duplicate = match kind {
                PropertyKind::Constant => (entry.data && self.strict()) || entry.getter || entry.setter,
                PropertyKind::Getter => entry.data || entry.getter,
                PropertyKind::Setter => entry.data || entry.setter,
            };
            if duplicate {
                return Err(crate::error::ParseError::new(
                    ParseErrorKind::Early,
                    format!("Duplicate property '{key}' in object literal"),
                    position,
                ));
            }
            match kind {
                PropertyKind::Constant => entry.data = true,
                PropertyKind::Getter => entry.getter = true,
                PropertyKind::Setter => entry.setter = true,
            }
            b.append_property(&mut properties, property);
            if !self.at(TokenKind::CloseBrace) {
                self.consume_with(TokenKind::Comma, LexMode::IgnoreReservedWords)?;
            }
        }
        self.next();
        Ok(b.object(properties))
    }

    fn consume_with(&mut self, kind: TokenKind, mode: LexMode) -> ParseResult<()> {
        if !self.at(kind) {
            return Err(self.expected(kind));
        }
        self.next_with(mode);
        Ok(())
    }

    /// Canonical key of the current token if it can name a property.
    fn property_key(&self) -> Option<Arc<str>> {
        match (&self.token.kind, &self.token.value) {
            (TokenKind::Identifier, TokenValue::Identifier(name)) => Some(name.clone()),
            (TokenKind::String, TokenValue::String { value, .. }) => Some(value.clone()),
            (TokenKind::Number, TokenValue::Number(n)) => Some(Arc::from(format_number(*n))),
            _ => None,
        }
    }

    fn parse_property<B: TreeBuilder>(&mut self, b: &mut B, validated: bool) -> ParseResult<ParsedProperty<B>> {
        let Some(key) = self.property_key() else {
            return Err(self.unexpected());
        };
        let accessor = match &self.token.kind {
            TokenKind::Identifier => accessor_kind(&key),
            _ => None,
        };
        self.next_with(LexMode::IgnoreReservedWords);

        if let Some(kind) = accessor
            && !self.at(TokenKind::Colon)
        {
            if !validated {
                return Ok(ParsedProperty::NeedsValidation);
            }
            let Some(name) = self.property_key() else {
                return Err(self.unexpected());
            };
            self.next();
            let function = self.parse_function_tail::<B>(None, false)?;
            let expected_params = if kind == PropertyKind::Getter { 0 } else { 1 };
            if function.params.len() != expected_params {
                let message = if kind == PropertyKind::Getter {
                    "Getter must not have any parameters"
                } else {
                    "Setter must have exactly one parameter"
                };
                return Err(self.error(ParseErrorKind::Syntax, message));
            }
            let property = b.accessor(&name, kind, function);
            return Ok(ParsedProperty::Property(property, name, kind));
        }

        self.consume(TokenKind::Colon)?;
        let value = self.nested(|p| p.with_allows_in(true, |p| p.parse_assignment(b)))?;
        let property = b.property(&key, PropertyKind::Constant, value);
        Ok(ParsedProperty::Property(property, key, PropertyKind::Constant))
    }

    // ─── Function literals ─────────────────────────────────────────

    /// Parameters and body of a function literal; the current token is the
    /// `(`. Bodies are always validated with a fresh [`SyntaxChecker`] and
    /// may be served from the function cache.
    pub(super) fn parse_function_tail<B: TreeBuilder>(
        &mut self,
        name: Option<Identifier>,
        is_declaration: bool,
    ) -> ParseResult<FunctionInfo> {
        self.guarded(|p| {
            let context_strict = p.strict();
            if context_strict && name.as_deref().is_some_and(is_eval_or_arguments) {
                return Err(p.early("Function name may not be 'eval' or 'arguments' in strict mode"));
            }
            p.push_scope(true);
            let result = p.parse_function_scope(name.as_ref(), context_strict);
            let scope = p.pop_scope(B::NEEDS_FREE_VARIABLE_INFO);
            let (params, body) = result?;
            Ok(FunctionInfo {
                name,
                params,
                body,
                summary: scope.summary(),
                is_declaration,
            })
        })
    }

    fn parse_function_scope(
        &mut self,
        name: Option<&Identifier>,
        context_strict: bool,
    ) -> ParseResult<(Vec<Identifier>, SourceRange)> {
        self.consume(TokenKind::OpenParen)?;
        let mut params = Vec::new();
        if !self.at(TokenKind::CloseParen) {
            loop {
                let Some(param) = self.current_identifier() else {
                    return Err(self.unexpected());
                };
                if !self.scope.declare_parameter(&param) && self.strict() {
                    return Err(self.early(format!("Invalid or duplicate parameter '{param}' in strict mode")));
                }
                params.push(param);
                self.next();
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CloseParen)?;
        if !self.at(TokenKind::OpenBrace) {
            return Err(self.expected(TokenKind::OpenBrace));
        }

        let open_brace = self.token.start.offset();
        let use_cache = self.options.use_function_cache && SyntaxChecker::CAN_USE_FUNCTION_CACHE;
        let cached = if use_cache {
            self.cache.lookup(open_brace, context_strict)
        } else {
            None
        };

        let close_brace = match cached {
            Some(entry) => {
                self.stats.cache_hits = self.stats.cache_hits.saturating_add(1);
                tracing::trace!(open_brace, close_brace = entry.close_brace, "Function cache hit");
                self.scope.restore_summary(&entry.summary);
                self.lexer
                    .skip_to(entry.close_brace, entry.close_line, entry.close_line_start);
                self.last_token_end = self.token.end;
                self.last_line = self.token.start.line();
                self.token = self.lexer.next_token(LexMode::Normal, self.strict());
                if !self.at(TokenKind::CloseBrace) {
                    return Err(self.expected(TokenKind::CloseBrace));
                }
                entry.close_brace
            }
            None => {
                if use_cache {
                    self.stats.cache_misses = self.stats.cache_misses.saturating_add(1);
                }
                self.next();
                let saved_depth = std::mem::replace(&mut self.statement_depth, 0);
                let mut checker = SyntaxChecker::new();
                let body = self.with_allows_in(true, |p| p.parse_source_elements(&mut checker, true));
                self.statement_depth = saved_depth;
                body?;
                if !self.at(TokenKind::CloseBrace) {
                    return Err(self.expected(TokenKind::CloseBrace));
                }
                let close = self.token.start;
                if use_cache
                    && close.offset().saturating_sub(open_brace) > self.options.min_cached_function_length
                {
                    self.cache.insert(CachedFunction {
                        open_brace,
                        close_brace: close.offset(),
                        close_line: close.line(),
                        close_line_start: close.line_start(),
                        context_strict,
                        summary: self.scope.summary(),
                    });
                    self.stats.cache_inserts = self.stats.cache_inserts.saturating_add(1);
                }
                close.offset()
            }
        };

        if self.strict() && name.is_some_and(|name| is_eval_or_arguments(name)) {
            return Err(self.early("Function name may not be 'eval' or 'arguments' in strict mode"));
        }
        let body = self
            .source
            .sub_range(open_brace, close_brace.saturating_add(1))
            .ok_or_else(|| self.error(ParseErrorKind::Syntax, "Function body lies outside the source"))?;
        self.next();
        Ok((params, body))
    }
}

fn reduce<B: TreeBuilder>(b: &mut B, op: Operator, lhs: B::Expression, rhs: B::Expression) -> B::Expression {
    match op {
        Operator::Binary(op) => b.binary(op, lhs, rhs),
        Operator::Logical(op) => b.logical(op, lhs, rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regexp_flags() {
        assert!(valid_regexp_flags(""));
        assert!(valid_regexp_flags("gim"));
        assert!(!valid_regexp_flags("gg"));
        assert!(!valid_regexp_flags("y"));
    }

    #[test]
    fn test_operator_tables_agree_with_precedence() {
        for kind in [TokenKind::Plus, TokenKind::Or, TokenKind::In, TokenKind::URShift] {
            assert!(binary_operator(kind).is_some());
            assert!(kind.binary_precedence().is_some(), "{kind:?} has no precedence");
        }
        assert!(binary_operator(TokenKind::Eq).is_none());
        assert_eq!(assign_operator(TokenKind::URShiftEq), Some(AssignOp::UnsignedRightShift));
    }
}
