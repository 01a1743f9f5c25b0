//! Statement productions.

use crate::error::{ParseErrorKind, ParseResult};
use crate::scope::{CodeFeatures, is_eval_or_arguments};
use crate::token::{Identifier, TokenKind};
use crate::tree_builder::{ForHead, ForInBinding, ForInitializer, TreeBuilder};

use super::Parser;

impl Parser<'_> {
    pub(super) fn parse_statement<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        self.guarded(|p| {
            p.statement_depth = p.statement_depth.saturating_add(1);
            let result = p.parse_statement_inner(b);
            p.statement_depth = p.statement_depth.saturating_sub(1);
            result
        })
    }

    fn parse_statement_inner<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        match self.token.kind {
            TokenKind::OpenBrace => self.parse_block(b),
            TokenKind::Var => self.parse_var_statement(b),
            TokenKind::Const => self.parse_const_statement(b),
            TokenKind::Function => self.parse_function_declaration(b),
            TokenKind::Semicolon => {
                let line = self.line();
                self.next();
                Ok(b.empty_statement(line))
            }
            TokenKind::If => self.parse_if(b),
            TokenKind::Do => self.parse_do_while(b),
            TokenKind::While => self.parse_while(b),
            TokenKind::For => self.parse_for(b),
            TokenKind::Continue => self.parse_continue(b),
            TokenKind::Break => self.parse_break(b),
            TokenKind::Return => self.parse_return(b),
            TokenKind::With => self.parse_with(b),
            TokenKind::Switch => self.parse_switch(b),
            TokenKind::Throw => self.parse_throw(b),
            TokenKind::Try => self.parse_try(b),
            TokenKind::Debugger => {
                let line = self.line();
                self.next();
                self.auto_semicolon()?;
                Ok(b.debugger_statement(line))
            }
            TokenKind::Identifier | TokenKind::ReservedIfStrict if self.lexer.next_is_colon() => {
                self.parse_labeled(b)
            }
            _ => self.parse_expression_statement(b),
        }
    }

    pub(super) fn parse_block<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.consume(TokenKind::OpenBrace)?;
        let body = self.parse_source_elements(b, false)?;
        self.consume(TokenKind::CloseBrace)?;
        Ok(b.block(body, line))
    }

    fn parse_expression_statement<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        let expr = self.parse_expression(b)?;
        self.auto_semicolon()?;
        Ok(b.expression_statement(expr, line))
    }

    // ─── Declarations ──────────────────────────────────────────────

    /// One `name [= value]` with the current token on the name.
    fn parse_var_declarator<B: TreeBuilder>(
        &mut self,
        b: &mut B,
        is_const: bool,
    ) -> ParseResult<(Identifier, Option<B::Expression>)> {
        let Some(name) = self.current_identifier() else {
            return Err(self.unexpected());
        };
        if !self.declare_var_name(&name) && self.strict() {
            return Err(self.early(format!("Cannot declare a variable named '{name}' in strict mode")));
        }
        b.declare_var(&name, is_const);
        self.next();
        let init = if self.eat(TokenKind::Eq) {
            Some(self.parse_assignment(b)?)
        } else {
            None
        };
        Ok((name, init))
    }

    /// Declarators after `var`/`const` (the current token).
    fn parse_var_declarations<B: TreeBuilder>(&mut self, b: &mut B, is_const: bool) -> ParseResult<B::VarDeclarations> {
        let mut declarations = B::VarDeclarations::default();
        loop {
            self.next();
            let (name, init) = self.parse_var_declarator(b, is_const)?;
            b.append_var(&mut declarations, &name, init);
            if !self.at(TokenKind::Comma) {
                return Ok(declarations);
            }
        }
    }

    fn parse_var_statement<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        let declarations = self.parse_var_declarations(b, false)?;
        self.auto_semicolon()?;
        Ok(b.var_statement(declarations, line))
    }

    fn parse_const_statement<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        if self.strict() {
            return Err(self.early("'const' is not supported in strict mode"));
        }
        let line = self.line();
        let declarations = self.parse_var_declarations(b, true)?;
        self.auto_semicolon()?;
        Ok(b.const_statement(declarations, line))
    }

    fn parse_function_declaration<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        if self.strict() && self.statement_depth != 1 {
            return Err(self.early("In strict mode functions may only be declared at top level or in a function body"));
        }
        let line = self.line();
        self.next();
        let Some(name) = self.current_identifier() else {
            return Err(self.unexpected());
        };
        self.declare_var_name(&name);
        self.next();
        let function = self.parse_function_tail::<B>(Some(name), true)?;
        Ok(b.function_declaration(function, line))
    }

    // ─── Control flow ──────────────────────────────────────────────

    fn parse_condition<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Expression> {
        self.consume(TokenKind::OpenParen)?;
        let test = self.parse_expression(b)?;
        self.consume(TokenKind::CloseParen)?;
        Ok(test)
    }

    fn parse_if<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let test = self.parse_condition(b)?;
        let consequent = self.parse_statement(b)?;
        let alternate = if self.eat(TokenKind::Else) {
            Some(self.parse_statement(b)?)
        } else {
            None
        };
        Ok(b.if_statement(test, consequent, alternate, line))
    }

    fn parse_loop_body<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        self.scope.enter_loop();
        let body = self.parse_statement(b);
        self.scope.exit_loop();
        body
    }

    fn parse_do_while<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let body = self.parse_loop_body(b)?;
        self.consume(TokenKind::While)?;
        let test = self.parse_condition(b)?;
        // `do ; while (x) y` is legal: the `;` after `)` is always optional.
        self.eat(TokenKind::Semicolon);
        Ok(b.do_while(body, test, line))
    }

    fn parse_while<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let test = self.parse_condition(b)?;
        let body = self.parse_loop_body(b)?;
        Ok(b.while_statement(test, body, line))
    }

    fn parse_for<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        self.consume(TokenKind::OpenParen)?;

        let init = if self.at(TokenKind::Var) {
            self.next();
            let (name, init) = self.with_allows_in(false, |p| p.parse_var_declarator(b, false))?;
            if self.eat(TokenKind::In) {
                let object = self.parse_expression(b)?;
                self.consume(TokenKind::CloseParen)?;
                let body = self.parse_loop_body(b)?;
                let head = ForHead::In {
                    target: ForInBinding::Var(name, init),
                    object,
                };
                return Ok(b.for_statement(head, body, line));
            }
            let mut declarations = B::VarDeclarations::default();
            b.append_var(&mut declarations, &name, init);
            while self.eat(TokenKind::Comma) {
                let (name, init) = self.with_allows_in(false, |p| p.parse_var_declarator(b, false))?;
                b.append_var(&mut declarations, &name, init);
            }
            ForInitializer::Var(declarations)
        } else if self.at(TokenKind::Semicolon) {
            ForInitializer::None
        } else {
            let non_lhs_before = self.non_lhs_count;
            let expr = self.with_allows_in(false, |p| p.parse_expression(b))?;
            if self.at(TokenKind::In) {
                if self.non_lhs_count != non_lhs_before || !(b.is_location(&expr) || b.is_call(&expr)) {
                    return Err(self.early("Invalid left-hand side in for-in"));
                }
                self.next();
                let object = self.parse_expression(b)?;
                self.consume(TokenKind::CloseParen)?;
                let body = self.parse_loop_body(b)?;
                let head = ForHead::In {
                    target: ForInBinding::Expression(expr),
                    object,
                };
                return Ok(b.for_statement(head, body, line));
            }
            ForInitializer::Expression(expr)
        };

        self.consume(TokenKind::Semicolon)?;
        let test = if self.at(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression(b)?)
        };
        self.consume(TokenKind::Semicolon)?;
        let update = if self.at(TokenKind::CloseParen) {
            None
        } else {
            Some(self.parse_expression(b)?)
        };
        self.consume(TokenKind::CloseParen)?;
        let body = self.parse_loop_body(b)?;
        Ok(b.for_statement(ForHead::Plain { init, test, update }, body, line))
    }

    /// Label operand of `break`/`continue`, if one is present on the same line.
    fn jump_label(&mut self) -> Option<Identifier> {
        if self.can_insert_semicolon() {
            return None;
        }
        self.current_identifier()
    }

    fn parse_continue<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let label = self.jump_label();
        match &label {
            None => {
                if !self.continue_is_valid() {
                    return Err(self.early("'continue' is only valid inside a loop statement"));
                }
            }
            Some(name) => {
                match self.find_label(name) {
                    None => return Err(self.early(format!("Label '{name}' is not defined"))),
                    Some(false) => {
                        return Err(self.early(format!("Cannot continue to the non-loop label '{name}'")));
                    }
                    Some(true) => {}
                }
                self.next();
            }
        }
        self.auto_semicolon()?;
        Ok(b.continue_statement(label.as_ref(), line))
    }

    fn parse_break<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let label = self.jump_label();
        match &label {
            None => {
                if !self.break_is_valid() {
                    return Err(self.early("'break' is only valid inside a switch or loop statement"));
                }
            }
            Some(name) => {
                if self.find_label(name).is_none() {
                    return Err(self.early(format!("Label '{name}' is not defined")));
                }
                self.next();
            }
        }
        self.auto_semicolon()?;
        Ok(b.break_statement(label.as_ref(), line))
    }

    fn parse_return<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        if !self.in_function() {
            return Err(self.error(
                ParseErrorKind::Syntax,
                "Return statements are only valid inside functions",
            ));
        }
        let line = self.line();
        self.next();
        let value = if self.can_insert_semicolon() {
            None
        } else {
            Some(self.parse_expression(b)?)
        };
        self.auto_semicolon()?;
        Ok(b.return_statement(value, line))
    }

    fn parse_throw<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        if self.token.newline_before {
            return Err(self.error(ParseErrorKind::Syntax, "Illegal newline after throw"));
        }
        let value = self.parse_expression(b)?;
        self.auto_semicolon()?;
        Ok(b.throw_statement(value, line))
    }

    fn parse_with<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        if self.strict() {
            return Err(self.early("'with' statements are not valid in strict mode"));
        }
        let line = self.line();
        self.next();
        let object = self.parse_condition(b)?;
        self.scope.add_feature(CodeFeatures::USES_WITH);
        self.scope.set_needs_full_activation();
        let body = self.parse_statement(b)?;
        Ok(b.with_statement(object, body, line))
    }

    fn parse_switch<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let discriminant = self.parse_condition(b)?;
        self.consume(TokenKind::OpenBrace)?;
        self.scope.enter_switch();
        let clauses = self.parse_switch_clauses(b);
        self.scope.exit_switch();
        let clauses = clauses?;
        self.consume(TokenKind::CloseBrace)?;
        Ok(b.switch_statement(discriminant, clauses, line))
    }

    fn parse_switch_clauses<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::ClauseList> {
        let mut clauses = B::ClauseList::default();
        let mut seen_default = false;
        loop {
            let test = match self.token.kind {
                TokenKind::Case => {
                    self.next();
                    Some(self.parse_expression(b)?)
                }
                TokenKind::Default => {
                    if seen_default {
                        return Err(self.error(
                            ParseErrorKind::Syntax,
                            "More than one default clause in switch statement",
                        ));
                    }
                    seen_default = true;
                    self.next();
                    None
                }
                TokenKind::CloseBrace => return Ok(clauses),
                _ => return Err(self.unexpected()),
            };
            self.consume(TokenKind::Colon)?;
            let mut body = B::SourceElements::default();
            while !matches!(
                self.token.kind,
                TokenKind::Case | TokenKind::Default | TokenKind::CloseBrace | TokenKind::Eof
            ) {
                let statement = self.parse_statement(b)?;
                b.append_statement(&mut body, statement);
            }
            b.append_clause(&mut clauses, test, body);
        }
    }

    fn parse_labeled<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        let Some(label) = self.current_identifier() else {
            return Err(self.unexpected());
        };
        if self.find_label(&label).is_some() {
            return Err(self.early(format!("Label '{label}' has already been declared")));
        }
        self.next();
        self.consume(TokenKind::Colon)?;
        let is_loop = matches!(
            self.token.kind,
            TokenKind::For | TokenKind::While | TokenKind::Do
        );
        self.scope.push_label(label.clone(), is_loop);
        let body = self.parse_statement(b);
        self.scope.pop_label();
        Ok(b.labeled(&label, body?, line))
    }

    fn parse_try<B: TreeBuilder>(&mut self, b: &mut B) -> ParseResult<B::Statement> {
        let line = self.line();
        self.next();
        let block = self.parse_block(b)?;

        let catch = if self.eat(TokenKind::Catch) {
            self.consume(TokenKind::OpenParen)?;
            let Some(name) = self.current_identifier() else {
                return Err(self.unexpected());
            };
            if self.strict() && is_eval_or_arguments(&name) {
                return Err(self.early(format!("Cannot use '{name}' as a catch parameter in strict mode")));
            }
            self.next();
            self.consume(TokenKind::CloseParen)?;

            self.scope.add_feature(CodeFeatures::USES_CATCH);
            self.push_scope(false);
            self.scope.prevent_new_declarations();
            self.scope.declare_variable(&name);
            let body = self.parse_block(b);
            self.pop_scope(B::NEEDS_FREE_VARIABLE_INFO);
            Some((name, body?))
        } else {
            None
        };

        let finally = if self.eat(TokenKind::Finally) {
            Some(self.parse_block(b)?)
        } else {
            None
        };

        if catch.is_none() && finally.is_none() {
            return Err(self.error(
                ParseErrorKind::Syntax,
                "Try statements must have at least a catch or finally block",
            ));
        }
        Ok(b.try_statement(block, catch, finally, line))
    }
}
