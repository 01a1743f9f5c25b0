//! Recursive-descent parser, generic over a [`TreeBuilder`].
//!
//! Every production is a method `parse_x<B: TreeBuilder>(&mut self, b: &mut B)`
//! returning [`ParseResult`]; the first error is propagated with `?` and
//! never replaced. Recursion depth is bounded by a [`DepthGuard`].
//!
//! Speculative parses (the directive prologue and object literals holding
//! accessors) take a [`ParserCheckpoint`] together with a builder
//! checkpoint, and on rewind re-lex from the saved offset under the new
//! rules.

mod expressions;
mod statements;

use serde::Serialize;

use crate::ast::{Ast, FunctionId, StmtId};
use crate::ast_builder::{AstBuilder, DeclaredVariable};
use crate::error::{ParseError, ParseErrorKind, ParseResult};
use crate::function_cache::FunctionCache;
use crate::lexer::{LexMode, Lexer, LexerCheckpoint};
use crate::scope::{CodeFeatures, Scope};
use crate::source::SourceRange;
use crate::syntax_checker::SyntaxChecker;
use crate::token::{Identifier, Token, TokenKind, TokenValue};
use crate::tree_builder::TreeBuilder;

/// Parser tuning knobs.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Maximum nesting of guarded productions before the parse fails with
    /// [`ParseErrorKind::StackExhausted`].
    pub max_depth: usize,
    /// Bodies shorter than this (in bytes, braces excluded) are not cached.
    pub min_cached_function_length: usize,
    /// Consult and fill the provider's function cache.
    pub use_function_cache: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_depth: 512,
            min_cached_function_length: 64,
            use_function_cache: true,
        }
    }
}

/// Counters for one parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub tokens_lexed: u64,
    pub reparses: u32,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub cache_inserts: u32,
}

/// What kind of unit the source range holds.
#[derive(Debug, Clone, Default)]
pub enum ParseMode {
    #[default]
    Program,
    Eval,
    /// A function body `{ ... }` with its enclosing seed.
    Function {
        name: Option<Identifier>,
        params: Vec<Identifier>,
        /// Inherited from the context the literal appeared in.
        strict: bool,
    },
}

impl ParseMode {
    pub fn is_function(&self) -> bool {
        matches!(self, ParseMode::Function { .. })
    }
}

/// Result of a successful parse with builder `B`.
#[derive(Debug)]
pub struct ParseOutput<B: TreeBuilder> {
    pub builder: B,
    pub statements: B::SourceElements,
    pub features: CodeFeatures,
    pub captured_variables: Vec<Identifier>,
    pub constant_count: usize,
    pub stats: ParseStats,
    pub last_line: u32,
}

impl<B: TreeBuilder> ParseOutput<B> {
    pub fn is_strict(&self) -> bool {
        self.features.is_strict()
    }
}

/// A fully built unit: the tree plus everything the compiler needs.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub ast: Ast,
    pub statements: Vec<StmtId>,
    pub variables: Vec<DeclaredVariable>,
    pub function_declarations: Vec<FunctionId>,
    pub features: CodeFeatures,
    pub captured_variables: Vec<Identifier>,
    pub constant_count: usize,
    pub stats: ParseStats,
    pub last_line: u32,
}

impl ParsedUnit {
    pub fn is_strict(&self) -> bool {
        self.features.is_strict()
    }

    pub fn dump(&self) -> String {
        self.ast.dump(&self.statements)
    }

    /// Numeric literals of the top-level code in source order.
    pub fn numeric_constants(&self) -> Vec<f64> {
        self.ast.numeric_constants(&self.statements)
    }
}

impl From<ParseOutput<AstBuilder>> for ParsedUnit {
    fn from(output: ParseOutput<AstBuilder>) -> Self {
        let (ast, variables, function_declarations) = output.builder.into_parts();
        Self {
            ast,
            statements: output.statements,
            variables,
            function_declarations,
            features: output.features,
            captured_variables: output.captured_variables,
            constant_count: output.constant_count,
            stats: output.stats,
            last_line: output.last_line,
        }
    }
}

/// Parse `source` with an explicit builder.
pub fn parse<B: TreeBuilder>(
    source: &SourceRange,
    mode: &ParseMode,
    options: &ParserOptions,
    builder: B,
) -> ParseResult<ParseOutput<B>> {
    let mut parser = Parser::new(source, mode, options);
    let result = parser.parse_root(builder, mode);
    if let Err(err) = &result {
        tracing::debug!(url = source.provider().url(), error = %err, "Parse failed");
    }
    result
}

/// Parse a unit into a full tree.
pub fn parse_unit(source: &SourceRange, mode: &ParseMode, options: &ParserOptions) -> ParseResult<ParsedUnit> {
    parse(source, mode, options, AstBuilder::new()).map(ParsedUnit::from)
}

/// Parse a whole program into a full tree.
pub fn parse_program(source: &SourceRange, options: &ParserOptions) -> ParseResult<ParsedUnit> {
    parse_unit(source, &ParseMode::Program, options)
}

/// Validate `source` without building a tree.
pub fn check_syntax(
    source: &SourceRange,
    mode: &ParseMode,
    options: &ParserOptions,
) -> ParseResult<ParseOutput<SyntaxChecker>> {
    parse(source, mode, options, SyntaxChecker::new())
}

// ─── Depth guard ───────────────────────────────────────────────────

/// Recursion budget shared by every recursive production.
#[derive(Debug, Clone, Copy)]
pub struct DepthGuard {
    depth: usize,
    max_depth: usize,
}

impl DepthGuard {
    pub fn new(max_depth: usize) -> Self {
        Self { depth: 0, max_depth }
    }

    /// Claim one level; fails once the budget is spent.
    pub fn enter(&mut self) -> bool {
        if self.depth >= self.max_depth {
            return false;
        }
        self.depth = self.depth.saturating_add(1);
        true
    }

    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

// ─── Parser state ──────────────────────────────────────────────────

/// Everything needed to resume parsing at a token boundary.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParserCheckpoint {
    lexer: LexerCheckpoint,
    last_token_end: usize,
    last_line: u32,
    non_lhs_count: u32,
    assignment_count: u32,
    non_trivial_expression_count: u32,
}

pub(crate) struct Parser<'a> {
    source: &'a SourceRange,
    lexer: Lexer<'a>,
    token: Token,
    last_token_end: usize,
    last_line: u32,
    options: &'a ParserOptions,
    cache: FunctionCache,
    guard: DepthGuard,
    /// Innermost scope; enclosing ones live in `outer`.
    scope: Scope,
    outer: Vec<Scope>,
    statement_depth: u32,
    /// Expressions that can no longer be assignment targets.
    non_lhs_count: u32,
    assignment_count: u32,
    /// Anything beyond a lone primary; used to recognise directives.
    non_trivial_expression_count: u32,
    /// Name of the most recently parsed identifier reference.
    last_identifier: Option<Identifier>,
    /// Whether a binary `in` may appear (false in a `for` initializer).
    allows_in: bool,
    stats: ParseStats,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a SourceRange, mode: &ParseMode, options: &'a ParserOptions) -> Self {
        let (strict, is_function) = match mode {
            ParseMode::Function { strict, .. } => (*strict, true),
            ParseMode::Program | ParseMode::Eval => (false, false),
        };
        let mut lexer = Lexer::new(source);
        let token = lexer.next_token(LexMode::Normal, strict);
        Self {
            source,
            lexer,
            last_token_end: source.start(),
            last_line: token.start.line(),
            token,
            options,
            cache: source.provider().function_cache().clone(),
            guard: DepthGuard::new(options.max_depth),
            scope: Scope::new(strict, is_function),
            outer: Vec::new(),
            statement_depth: 0,
            non_lhs_count: 0,
            assignment_count: 0,
            non_trivial_expression_count: 0,
            last_identifier: None,
            allows_in: true,
            stats: ParseStats::default(),
        }
    }

    fn parse_root<B: TreeBuilder>(&mut self, mut builder: B, mode: &ParseMode) -> ParseResult<ParseOutput<B>> {
        let statements = match mode {
            ParseMode::Program | ParseMode::Eval => self.parse_source_elements(&mut builder, true)?,
            ParseMode::Function { name, params, .. } => {
                for param in params {
                    if !self.scope.declare_parameter(param) && self.strict() {
                        return Err(self.early(format!("Invalid parameter '{param}' in strict mode")));
                    }
                }
                self.consume(TokenKind::OpenBrace)?;
                let statements = self.parse_source_elements(&mut builder, true)?;
                if self.strict()
                    && let Some(name) = name
                    && crate::scope::is_eval_or_arguments(name)
                {
                    return Err(self.early(format!("Function name '{name}' is not allowed in strict mode")));
                }
                self.consume(TokenKind::CloseBrace)?;
                statements
            }
        };
        if self.token.kind != TokenKind::Eof {
            return Err(self.unexpected());
        }
        self.stats.tokens_lexed = self.lexer.tokens_lexed();
        Ok(ParseOutput {
            constant_count: builder.constant_count(),
            builder,
            statements,
            features: self.scope.features(),
            captured_variables: self.scope.captured_variables(),
            stats: self.stats,
            last_line: self.last_line,
        })
    }

    // ─── Tokens ────────────────────────────────────────────────────

    fn strict(&self) -> bool {
        self.scope.strict()
    }

    fn next(&mut self) {
        self.next_with(LexMode::Normal);
    }

    fn next_with(&mut self, mode: LexMode) {
        self.last_token_end = self.token.end;
        self.last_line = self.token.start.line();
        self.token = self.lexer.next_token(mode, self.strict());
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.token.kind == kind
    }

    /// Consume `kind` if it is the current token.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.expected(kind))
        }
    }

    fn line(&self) -> u32 {
        self.token.start.line()
    }

    /// Identifier usable as a binding or reference in the current mode.
    fn current_identifier(&self) -> Option<Identifier> {
        match self.token.kind {
            TokenKind::Identifier => self.token.identifier().cloned(),
            TokenKind::ReservedIfStrict if !self.strict() => self.token.identifier().cloned(),
            _ => None,
        }
    }

    /// The statement ends here: `;`, `}`, end of input, or a line break.
    fn can_insert_semicolon(&self) -> bool {
        matches!(
            self.token.kind,
            TokenKind::Semicolon | TokenKind::CloseBrace | TokenKind::Eof
        ) || self.token.newline_before
    }

    fn auto_semicolon(&mut self) -> ParseResult<()> {
        if self.eat(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.can_insert_semicolon() {
            return Ok(());
        }
        Err(self.unexpected())
    }

    // ─── Errors ────────────────────────────────────────────────────

    fn error(&self, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        ParseError::new(kind, message, self.token.start)
    }

    fn early(&self, message: impl Into<String>) -> ParseError {
        self.error(ParseErrorKind::Early, message)
    }

    /// Error for the current token, reporting lexer diagnostics as such.
    fn unexpected(&self) -> ParseError {
        match (&self.token.kind, &self.token.value) {
            (TokenKind::Error, TokenValue::Error(message)) => {
                self.error(ParseErrorKind::Lexical, message.clone())
            }
            (TokenKind::Reserved, _) => self.early(format!("Unexpected reserved word {}", self.token.describe())),
            (TokenKind::ReservedIfStrict, _) if self.strict() => {
                self.early(format!("Unexpected reserved word {} in strict mode", self.token.describe()))
            }
            _ => self.error(
                ParseErrorKind::Syntax,
                format!("Unexpected {}", self.token.describe()),
            ),
        }
    }

    fn expected(&self, kind: TokenKind) -> ParseError {
        if self.token.kind == TokenKind::Error {
            return self.unexpected();
        }
        self.error(
            ParseErrorKind::Syntax,
            format!("Expected {} but found {}", kind.name(), self.token.describe()),
        )
    }

    // ─── Recursion ─────────────────────────────────────────────────

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if !self.guard.enter() {
            return Err(self.error(
                ParseErrorKind::StackExhausted,
                format!("Nesting exceeds the depth budget of {}", self.options.max_depth),
            ));
        }
        let result = f(self);
        self.guard.exit();
        result
    }

    // ─── Checkpoints ───────────────────────────────────────────────

    fn checkpoint(&self) -> ParserCheckpoint {
        ParserCheckpoint {
            lexer: LexerCheckpoint::before(&self.token),
            last_token_end: self.last_token_end,
            last_line: self.last_line,
            non_lhs_count: self.non_lhs_count,
            assignment_count: self.assignment_count,
            non_trivial_expression_count: self.non_trivial_expression_count,
        }
    }

    /// Resume at `checkpoint`, re-lexing its token under the current rules.
    fn rewind(&mut self, checkpoint: ParserCheckpoint) {
        self.lexer.reset(checkpoint.lexer);
        self.token = self.lexer.next_token(LexMode::Normal, self.strict());
        self.last_token_end = checkpoint.last_token_end;
        self.last_line = checkpoint.last_line;
        self.non_lhs_count = checkpoint.non_lhs_count;
        self.assignment_count = checkpoint.assignment_count;
        self.non_trivial_expression_count = checkpoint.non_trivial_expression_count;
    }

    // ─── Scopes ────────────────────────────────────────────────────

    fn push_scope(&mut self, is_function: bool) {
        let child = Scope::new(self.strict(), is_function);
        let parent = std::mem::replace(&mut self.scope, child);
        self.outer.push(parent);
    }

    /// Pop the innermost scope, folding its free variables into the parent.
    fn pop_scope(&mut self, track_closed_variables: bool) -> Scope {
        let Some(parent) = self.outer.pop() else {
            return self.scope.clone();
        };
        let child = std::mem::replace(&mut self.scope, parent);
        self.scope
            .collect_free_variables(&child, track_closed_variables);
        child
    }

    /// Scopes from the innermost outwards, stopping at the enclosing
    /// function boundary (inclusive).
    fn function_scopes(&self) -> impl Iterator<Item = &Scope> {
        let mut reached_boundary = false;
        std::iter::once(&self.scope)
            .chain(self.outer.iter().rev())
            .take_while(move |scope| {
                if reached_boundary {
                    return false;
                }
                reached_boundary = scope.is_function_boundary();
                true
            })
    }

    /// Declare a `var` in the nearest scope that accepts declarations.
    fn declare_var_name(&mut self, name: &Identifier) -> bool {
        if self.scope.allows_new_declarations() {
            return self.scope.declare_variable(name);
        }
        for scope in self.outer.iter_mut().rev() {
            if scope.allows_new_declarations() {
                return scope.declare_variable(name);
            }
        }
        false
    }

    fn in_function(&self) -> bool {
        self.function_scopes().any(Scope::is_function)
    }

    fn break_is_valid(&self) -> bool {
        self.function_scopes().any(Scope::break_is_valid)
    }

    fn continue_is_valid(&self) -> bool {
        self.function_scopes().any(Scope::continue_is_valid)
    }

    fn find_label(&self, name: &str) -> Option<bool> {
        self.function_scopes().find_map(|scope| scope.label(name))
    }

    // ─── Source elements ───────────────────────────────────────────

    /// Statements up to `}` or end of input. With `check_directives`, a
    /// leading `"use strict"` switches to strict mode and restarts the
    /// list from its first token.
    fn parse_source_elements<B: TreeBuilder>(
        &mut self,
        b: &mut B,
        check_directives: bool,
    ) -> ParseResult<B::SourceElements> {
        let start = self.checkpoint();
        let builder_start = b.checkpoint();
        let mut elements = B::SourceElements::default();
        let mut in_prologue = check_directives;
        while !matches!(self.token.kind, TokenKind::Eof | TokenKind::CloseBrace) {
            let directive = match (&self.token.kind, &self.token.value) {
                (TokenKind::String, TokenValue::String { value, has_escape }) if in_prologue => {
                    Some((value.clone(), *has_escape))
                }
                _ => None,
            };
            let non_trivial_before = self.non_trivial_expression_count;
            let statement = self.parse_statement(b)?;
            b.append_statement(&mut elements, statement);

            let Some((value, has_escape)) = directive else {
                in_prologue = false;
                continue;
            };
            if self.non_trivial_expression_count != non_trivial_before {
                in_prologue = false;
                continue;
            }
            if value.as_ref() == "use strict" && !has_escape && !self.strict() {
                self.scope.set_strict();
                if !self.scope.is_valid_strict_mode() {
                    return Err(self.early("Invalid parameter or function name in strict mode"));
                }
                self.stats.reparses = self.stats.reparses.saturating_add(1);
                tracing::debug!(offset = start.lexer.offset, "Strict directive, re-parsing");
                self.rewind(start);
                b.rewind(builder_start);
                return self.parse_source_elements(b, false);
            }
        }
        Ok(elements)
    }
}
