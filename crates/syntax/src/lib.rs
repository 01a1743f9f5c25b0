//! # kestrel-syntax
//!
//! Source buffers, the ES5 tokenizer and a recursive-descent parser that
//! runs in one of two modes behind the same grammar code.
//!
//! ## Architecture
//!
//! ```text
//! SourceProvider ──► SourceRange ──► Lexer ──► Parser<'_>
//!   (text, cache)     (window)                   │
//!                                                ├── AstBuilder     full arena Ast, constant folding
//!                                                └── SyntaxChecker  tags only, used for nested bodies
//! ```
//!
//! - [`parser::parse_program`] builds a full [`ast::Ast`] for a program.
//! - [`parser::check_syntax`] only validates and reports features.
//! - Nested function bodies are always checked with a [`SyntaxChecker`]
//!   and cached per provider by opening-brace offset
//!   ([`function_cache::FunctionCache`]); they are parsed into a tree later,
//!   on demand, in [`parser::ParseMode::Function`].
//!
//! Both builders implement [`tree_builder::TreeBuilder`] and must agree on
//! accept/reject for every input.

pub mod ast;
pub mod ast_builder;
pub mod error;
pub mod function_cache;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod source;
pub mod syntax_checker;
pub mod token;
pub mod tree_builder;

#[cfg(test)]
mod tests;

pub use ast::{Ast, Expr, ExprId, Stmt, StmtId, StmtKind};
pub use ast_builder::AstBuilder;
pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use parser::{
    ParseMode, ParseOutput, ParseStats, ParsedUnit, ParserOptions, check_syntax, parse, parse_program,
    parse_unit,
};
pub use scope::CodeFeatures;
pub use source::{Position, SourceProvider, SourceRange};
pub use syntax_checker::SyntaxChecker;
pub use token::Identifier;
