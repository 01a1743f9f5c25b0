//! Token kinds and the token record produced by the lexer.

use std::sync::Arc;

use crate::source::Position;

/// Interned-by-sharing identifier text.
pub type Identifier = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    Invalid,
    Literal,
    Punctuation,
    Operator,
    Keyword,
    Identifier,
    Reserved,
}

/// Generates `TokenKind` with `category()` and `name()`.
macro_rules! define_tokens {
    ( $( $variant:ident => $category:ident ),* $(,)? ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum TokenKind {
            $( $variant, )*
        }

        impl TokenKind {
            pub fn category(self) -> TokenCategory {
                match self {
                    $( TokenKind::$variant => TokenCategory::$category, )*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( TokenKind::$variant => stringify!($variant), )*
                }
            }
        }
    };
}

define_tokens! {
    And                 => Operator,
    AndEq               => Operator,
    BitAnd              => Operator,
    BitNot              => Operator,
    BitOr               => Operator,
    BitXor              => Operator,
    Break               => Keyword,
    Case                => Keyword,
    Catch               => Keyword,
    CloseBrace          => Punctuation,
    CloseBracket        => Punctuation,
    CloseParen          => Punctuation,
    Colon               => Punctuation,
    Comma               => Punctuation,
    Const               => Keyword,
    Continue            => Keyword,
    Debugger            => Keyword,
    Default             => Keyword,
    Delete              => Keyword,
    Divide              => Operator,
    DivideEq            => Operator,
    Do                  => Keyword,
    Dot                 => Punctuation,
    Else                => Keyword,
    Eof                 => Invalid,
    Eq                  => Operator,
    EqEq                => Operator,
    EqEqEq              => Operator,
    Error               => Invalid,
    False               => Keyword,
    Finally             => Keyword,
    For                 => Keyword,
    Function            => Keyword,
    Greater             => Operator,
    GreaterEq           => Operator,
    Identifier          => Identifier,
    If                  => Keyword,
    In                  => Keyword,
    InstanceOf          => Keyword,
    LShift              => Operator,
    LShiftEq            => Operator,
    Less                => Operator,
    LessEq              => Operator,
    Minus               => Operator,
    MinusEq             => Operator,
    MinusMinus          => Operator,
    Mod                 => Operator,
    ModEq               => Operator,
    New                 => Keyword,
    Not                 => Operator,
    NotEq               => Operator,
    NotEqEq             => Operator,
    Null                => Keyword,
    Number              => Literal,
    OpenBrace           => Punctuation,
    OpenBracket         => Punctuation,
    OpenParen           => Punctuation,
    Or                  => Operator,
    OrEq                => Operator,
    Plus                => Operator,
    PlusEq              => Operator,
    PlusPlus            => Operator,
    Question            => Punctuation,
    RShift              => Operator,
    RShiftEq            => Operator,
    Reserved            => Reserved,
    ReservedIfStrict    => Reserved,
    Return              => Keyword,
    Semicolon           => Punctuation,
    String              => Literal,
    Switch              => Keyword,
    This                => Keyword,
    Throw               => Keyword,
    Times               => Operator,
    TimesEq             => Operator,
    True                => Keyword,
    Try                 => Keyword,
    TypeOf              => Keyword,
    URShift             => Operator,
    URShiftEq           => Operator,
    Var                 => Keyword,
    Void                => Keyword,
    While               => Keyword,
    With                => Keyword,
    XorEq               => Operator,
}

impl TokenKind {
    /// Keywords and reserved words can still name properties.
    pub fn is_identifier_name(self) -> bool {
        matches!(
            self.category(),
            TokenCategory::Identifier | TokenCategory::Keyword | TokenCategory::Reserved
        ) || matches!(self, TokenKind::In | TokenKind::InstanceOf)
    }

    pub fn is_assignment_operator(self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::TimesEq
                | TokenKind::DivideEq
                | TokenKind::ModEq
                | TokenKind::LShiftEq
                | TokenKind::RShiftEq
                | TokenKind::URShiftEq
                | TokenKind::AndEq
                | TokenKind::OrEq
                | TokenKind::XorEq
        )
    }

    /// Binding power of a binary operator token, `None` for anything else.
    /// Higher binds tighter; all binary operators are left-associative.
    pub fn binary_precedence(self) -> Option<u8> {
        let precedence = match self {
            TokenKind::Or => 1,
            TokenKind::And => 2,
            TokenKind::BitOr => 3,
            TokenKind::BitXor => 4,
            TokenKind::BitAnd => 5,
            TokenKind::EqEq | TokenKind::NotEq | TokenKind::EqEqEq | TokenKind::NotEqEq => 6,
            TokenKind::Less
            | TokenKind::Greater
            | TokenKind::LessEq
            | TokenKind::GreaterEq
            | TokenKind::InstanceOf
            | TokenKind::In => 7,
            TokenKind::LShift | TokenKind::RShift | TokenKind::URShift => 8,
            TokenKind::Plus | TokenKind::Minus => 9,
            TokenKind::Times | TokenKind::Divide | TokenKind::Mod => 10,
            _ => return None,
        };
        Some(precedence)
    }
}

/// Decoded payload of a token.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TokenValue {
    #[default]
    None,
    Identifier(Identifier),
    Number(f64),
    String {
        value: Arc<str>,
        /// The literal contained at least one escape or line continuation.
        has_escape: bool,
    },
    /// Lexer diagnostic for `TokenKind::Error`.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    /// Position of the first character.
    pub start: Position,
    /// Offset one past the last character.
    pub end: usize,
    /// A line terminator occurred between the previous token and this one.
    pub newline_before: bool,
}

impl Token {
    pub fn identifier(&self) -> Option<&Identifier> {
        match &self.value {
            TokenValue::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn number(&self) -> Option<f64> {
        match self.value {
            TokenValue::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&Arc<str>> {
        match &self.value {
            TokenValue::String { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Text used in diagnostics.
    pub fn describe(&self) -> String {
        match (&self.kind, &self.value) {
            (TokenKind::Eof, _) => "end of input".to_string(),
            (_, TokenValue::Identifier(name)) => format!("'{name}'"),
            (_, TokenValue::String { value, .. }) => format!("string '{value}'"),
            (_, TokenValue::Number(n)) => format!("number {n}"),
            (kind, _) => format!("'{}'", kind.name()),
        }
    }
}
