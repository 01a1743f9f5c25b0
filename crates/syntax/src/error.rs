//! Parse error types.

use std::fmt;

use crate::source::Position;

/// Category of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ParseErrorKind {
    /// Malformed token: bad escape, unterminated string, stray character.
    Lexical,
    /// Token stream does not match the grammar.
    Syntax,
    /// Grammatically valid but rejected early: duplicate strict
    /// parameters, bad `break` target, reserved word misuse, invalid
    /// assignment target.
    Early,
    /// Nesting exceeded the configured depth budget.
    StackExhausted,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseErrorKind::Lexical => "lexical error",
            ParseErrorKind::Syntax => "syntax error",
            ParseErrorKind::Early => "early error",
            ParseErrorKind::StackExhausted => "stack exhausted",
        };
        f.write_str(name)
    }
}

/// A parse failure. The first failure of a parse is the one reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at {position}: {message}")]
pub struct ParseError {
    /// What went wrong.
    pub kind: ParseErrorKind,
    /// Human-readable description naming the failing token where possible.
    pub message: String,
    /// Position of the failing token.
    pub position: Position,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
        }
    }

    pub fn is_stack_exhausted(&self) -> bool {
        self.kind == ParseErrorKind::StackExhausted
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
