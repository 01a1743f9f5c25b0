//! Unlinked compiled units.
//!
//! An [`UnlinkedUnit`] is a parse result bound to no execution context.
//! It is immutable and shared through `Arc`: every executable linked from
//! it, and every closure of one of its function literals, refers to the
//! same unit. Function bodies are not parsed with their parent; each
//! literal gets an [`UnlinkedFunction`] that parses its body the first
//! time it is linked and memoizes the result.

use std::sync::{Arc, OnceLock};

use kestrel_syntax::ast::{Ast, FunctionId, FunctionLiteral};
use kestrel_syntax::scope::FunctionSummary;
use kestrel_syntax::{
    CodeFeatures, Identifier, ParseMode, ParseStats, ParsedUnit, ParserOptions, SourceRange, StmtId, parse_unit,
};
use serde::Serialize;

use crate::error::JitError;

/// What kind of code a unit holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitKind {
    Program,
    Eval,
    Function,
}

/// A parsed unit, independent of any runtime binding.
#[derive(Debug)]
pub struct UnlinkedUnit {
    kind: UnitKind,
    source: SourceRange,
    name: Option<Identifier>,
    parameters: Vec<Identifier>,
    parsed: ParsedUnit,
    functions: Vec<Arc<UnlinkedFunction>>,
    numeric_constants: Vec<f64>,
}

impl UnlinkedUnit {
    /// Parse a whole program.
    pub fn program(source: &SourceRange, options: &ParserOptions) -> Result<Arc<Self>, JitError> {
        Self::build(UnitKind::Program, source, None, Vec::new(), &ParseMode::Program, options)
    }

    /// Parse eval code.
    pub fn eval(source: &SourceRange, options: &ParserOptions) -> Result<Arc<Self>, JitError> {
        Self::build(UnitKind::Eval, source, None, Vec::new(), &ParseMode::Eval, options)
    }

    fn build(
        kind: UnitKind,
        source: &SourceRange,
        name: Option<Identifier>,
        parameters: Vec<Identifier>,
        mode: &ParseMode,
        options: &ParserOptions,
    ) -> Result<Arc<Self>, JitError> {
        let parsed = parse_unit(source, mode, options)?;
        let strict = parsed.is_strict();
        let functions = parsed
            .ast
            .functions()
            .iter()
            .map(|literal| Arc::new(UnlinkedFunction::new(literal, strict, options)))
            .collect();
        let numeric_constants = parsed.numeric_constants();
        tracing::debug!(
            url = source.provider().url(),
            kind = ?kind,
            strict,
            functions = parsed.ast.functions().len(),
            reparses = parsed.stats.reparses,
            cache_hits = parsed.stats.cache_hits,
            "Built unlinked unit"
        );
        Ok(Arc::new(Self {
            kind,
            source: source.clone(),
            name,
            parameters,
            parsed,
            functions,
            numeric_constants,
        }))
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn source(&self) -> &SourceRange {
        &self.source
    }

    /// Function name, for function units.
    pub fn name(&self) -> Option<&Identifier> {
        self.name.as_ref()
    }

    /// Formal parameters, for function units.
    pub fn parameters(&self) -> &[Identifier] {
        &self.parameters
    }

    pub fn ast(&self) -> &Ast {
        &self.parsed.ast
    }

    /// Top-level statements (the body, for function units).
    pub fn statements(&self) -> &[StmtId] {
        &self.parsed.statements
    }

    pub fn parsed(&self) -> &ParsedUnit {
        &self.parsed
    }

    pub fn features(&self) -> CodeFeatures {
        self.parsed.features
    }

    pub fn is_strict(&self) -> bool {
        self.parsed.is_strict()
    }

    /// `var`/`const` names in declaration order.
    pub fn declared_variables(&self) -> Vec<Identifier> {
        self.parsed.variables.iter().map(|variable| variable.name.clone()).collect()
    }

    /// Names of function declarations in source order.
    pub fn declared_functions(&self) -> Vec<Identifier> {
        self.parsed
            .function_declarations
            .iter()
            .filter_map(|id| self.parsed.ast.function(*id))
            .filter_map(|literal| literal.name.clone())
            .collect()
    }

    pub fn constant_count(&self) -> usize {
        self.parsed.constant_count
    }

    pub fn captured_variables(&self) -> &[Identifier] {
        &self.parsed.captured_variables
    }

    /// Numeric literals of this unit's own code, after folding.
    pub fn numeric_constants(&self) -> &[f64] {
        &self.numeric_constants
    }

    pub fn stats(&self) -> ParseStats {
        self.parsed.stats
    }

    /// Nested function literals, indexed like the AST's function table.
    pub fn functions(&self) -> &[Arc<UnlinkedFunction>] {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> Option<&Arc<UnlinkedFunction>> {
        self.functions.get(id.index())
    }

    /// The nested function declared or expressed with `name`.
    pub fn function_named(&self, name: &str) -> Option<&Arc<UnlinkedFunction>> {
        self.functions
            .iter()
            .find(|function| function.name().is_some_and(|own| &**own == name))
    }
}

/// A function literal whose body is parsed on first use.
#[derive(Debug)]
pub struct UnlinkedFunction {
    name: Option<Identifier>,
    parameters: Vec<Identifier>,
    body: SourceRange,
    context_strict: bool,
    summary: FunctionSummary,
    is_declaration: bool,
    options: ParserOptions,
    unit: OnceLock<Arc<UnlinkedUnit>>,
}

impl UnlinkedFunction {
    fn new(literal: &FunctionLiteral, context_strict: bool, options: &ParserOptions) -> Self {
        Self {
            name: literal.name.clone(),
            parameters: literal.params.clone(),
            body: literal.body.clone(),
            context_strict,
            summary: literal.summary.clone(),
            is_declaration: literal.is_declaration,
            options: options.clone(),
            unit: OnceLock::new(),
        }
    }

    pub fn name(&self) -> Option<&Identifier> {
        self.name.as_ref()
    }

    pub fn parameters(&self) -> &[Identifier] {
        &self.parameters
    }

    /// `{` through `}` of the body, positioned in the enclosing source.
    pub fn body(&self) -> &SourceRange {
        &self.body
    }

    /// Summary recorded by the syntax checker when the parent was parsed.
    pub fn summary(&self) -> &FunctionSummary {
        &self.summary
    }

    pub fn is_declaration(&self) -> bool {
        self.is_declaration
    }

    /// Strict because of its context or its own directive.
    pub fn is_strict(&self) -> bool {
        self.context_strict || self.summary.strict
    }

    pub fn is_parsed(&self) -> bool {
        self.unit.get().is_some()
    }

    /// The body's unit, parsing it on first use.
    pub fn unit(&self) -> Result<Arc<UnlinkedUnit>, JitError> {
        if let Some(unit) = self.unit.get() {
            return Ok(unit.clone());
        }
        let mode = ParseMode::Function {
            name: self.name.clone(),
            params: self.parameters.clone(),
            strict: self.context_strict,
        };
        let unit = UnlinkedUnit::build(
            UnitKind::Function,
            &self.body,
            self.name.clone(),
            self.parameters.clone(),
            &mode,
            &self.options,
        )?;
        tracing::debug!(
            name = self.name.as_deref().unwrap_or("<anonymous>"),
            start = self.body.start(),
            "Parsed function body on first link"
        );
        Ok(self.unit.get_or_init(|| unit).clone())
    }
}
