//! ES5 tokenizer.
//!
//! The parser drives the lexer one token at a time and rewinds it through
//! [`LexerCheckpoint`]s. A checkpoint captures everything needed to re-lex a
//! token exactly: its offset, the line bookkeeping, and whether a line
//! terminator preceded it (which the trivia skip would otherwise no longer
//! see, since the trivia lies before the checkpoint).

use std::sync::Arc;

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;

use crate::source::{Position, SourceRange, is_line_terminator};
use crate::token::{Token, TokenKind, TokenValue};

lazy_static! {
    static ref KEYWORDS: FxHashMap<&'static str, TokenKind> = {
        let mut table = FxHashMap::default();
        for (word, kind) in [
            ("break", TokenKind::Break),
            ("case", TokenKind::Case),
            ("catch", TokenKind::Catch),
            ("const", TokenKind::Const),
            ("continue", TokenKind::Continue),
            ("debugger", TokenKind::Debugger),
            ("default", TokenKind::Default),
            ("delete", TokenKind::Delete),
            ("do", TokenKind::Do),
            ("else", TokenKind::Else),
            ("false", TokenKind::False),
            ("finally", TokenKind::Finally),
            ("for", TokenKind::For),
            ("function", TokenKind::Function),
            ("if", TokenKind::If),
            ("in", TokenKind::In),
            ("instanceof", TokenKind::InstanceOf),
            ("new", TokenKind::New),
            ("null", TokenKind::Null),
            ("return", TokenKind::Return),
            ("switch", TokenKind::Switch),
            ("this", TokenKind::This),
            ("throw", TokenKind::Throw),
            ("true", TokenKind::True),
            ("try", TokenKind::Try),
            ("typeof", TokenKind::TypeOf),
            ("var", TokenKind::Var),
            ("void", TokenKind::Void),
            ("while", TokenKind::While),
            ("with", TokenKind::With),
            ("class", TokenKind::Reserved),
            ("enum", TokenKind::Reserved),
            ("export", TokenKind::Reserved),
            ("extends", TokenKind::Reserved),
            ("import", TokenKind::Reserved),
            ("super", TokenKind::Reserved),
            ("implements", TokenKind::ReservedIfStrict),
            ("interface", TokenKind::ReservedIfStrict),
            ("let", TokenKind::ReservedIfStrict),
            ("package", TokenKind::ReservedIfStrict),
            ("private", TokenKind::ReservedIfStrict),
            ("protected", TokenKind::ReservedIfStrict),
            ("public", TokenKind::ReservedIfStrict),
            ("static", TokenKind::ReservedIfStrict),
            ("yield", TokenKind::ReservedIfStrict),
        ] {
            table.insert(word, kind);
        }
        table
    };
}

/// How identifiers spelled like keywords are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    Normal,
    /// After `.` and for object literal keys: every word is an identifier.
    IgnoreReservedWords,
}

/// Saved lexer state sufficient to re-lex from a token boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexerCheckpoint {
    pub offset: usize,
    pub line: u32,
    pub line_start: usize,
    pub newline_before: bool,
}

impl LexerCheckpoint {
    /// Checkpoint that re-lexes `token` itself.
    pub fn before(token: &Token) -> Self {
        Self {
            offset: token.start.offset(),
            line: token.start.line(),
            line_start: token.start.line_start(),
            newline_before: token.newline_before,
        }
    }
}

pub struct Lexer<'a> {
    text: &'a str,
    end: usize,
    pos: usize,
    line: u32,
    line_start: usize,
    pending_newline: bool,
    tokens_lexed: u64,
}

impl<'a> Lexer<'a> {
    pub fn new(range: &'a SourceRange) -> Self {
        Self {
            text: range.provider().text(),
            end: range.end(),
            pos: range.start(),
            line: range.first_line(),
            line_start: range.first_line_start(),
            pending_newline: false,
            tokens_lexed: 0,
        }
    }

    /// Number of tokens produced so far, including re-lexed ones.
    pub fn tokens_lexed(&self) -> u64 {
        self.tokens_lexed
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn reset(&mut self, checkpoint: LexerCheckpoint) {
        self.pos = checkpoint.offset;
        self.line = checkpoint.line;
        self.line_start = checkpoint.line_start;
        self.pending_newline = checkpoint.newline_before;
    }

    /// Cheap lookahead used for labels: is the next significant character
    /// a `:`? Does not move the lexer.
    pub fn next_is_colon(&self) -> bool {
        let mut probe = Lexer {
            text: self.text,
            end: self.end,
            pos: self.pos,
            line: self.line,
            line_start: self.line_start,
            pending_newline: false,
            tokens_lexed: 0,
        };
        probe.skip_trivia().is_ok() && probe.peek() == Some(':')
    }

    fn position(&self, offset: usize) -> Position {
        Position::new(offset, self.line, self.line_start.min(offset)).unwrap_or_default()
    }

    fn peek(&self) -> Option<char> {
        if self.pos >= self.end {
            return None;
        }
        self.text.get(self.pos..self.end)?.chars().next()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        let mut chars = self.text.get(self.pos..self.end)?.chars();
        chars.nth(ahead)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos = self.pos.saturating_add(c.len_utf8());
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Consume a line terminator already known to be at `pos`.
    fn bump_line_terminator(&mut self) {
        if let Some(c) = self.bump() {
            if c == '\r' {
                self.eat('\n');
            }
            self.line = self.line.saturating_add(1);
            self.line_start = self.pos;
        }
    }

    fn skip_trivia(&mut self) -> Result<(), String> {
        loop {
            match self.peek() {
                Some(c) if is_line_terminator(c) => {
                    self.bump_line_terminator();
                    self.pending_newline = true;
                }
                Some(c) if is_whitespace(c) => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if is_line_terminator(c) {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => return Err("Unterminated multi-line comment".to_string()),
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(c) if is_line_terminator(c) => {
                                self.bump_line_terminator();
                                self.pending_newline = true;
                            }
                            Some(_) => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Lex the next token.
    pub fn next_token(&mut self, mode: LexMode, strict: bool) -> Token {
        self.tokens_lexed = self.tokens_lexed.saturating_add(1);
        if let Err(message) = self.skip_trivia() {
            let start = self.position(self.pos);
            return self.error_token(start, message);
        }
        let newline_before = std::mem::take(&mut self.pending_newline);
        let start = self.position(self.pos);
        let Some(c) = self.peek() else {
            return Token {
                kind: TokenKind::Eof,
                value: TokenValue::None,
                start,
                end: self.pos,
                newline_before: true,
            };
        };

        let result = if is_identifier_start(c) || c == '\\' {
            self.lex_identifier(mode)
        } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            self.lex_number(strict)
        } else if c == '"' || c == '\'' {
            self.lex_string(strict)
        } else {
            self.lex_punctuator()
        };

        match result {
            Ok((kind, value)) => Token {
                kind,
                value,
                start,
                end: self.pos,
                newline_before,
            },
            Err(message) => {
                let mut token = self.error_token(start, message);
                token.newline_before = newline_before;
                token
            }
        }
    }

    fn error_token(&self, start: Position, message: String) -> Token {
        Token {
            kind: TokenKind::Error,
            value: TokenValue::Error(message),
            start,
            end: self.pos,
            newline_before: false,
        }
    }

    fn lex_identifier(&mut self, mode: LexMode) -> Result<(TokenKind, TokenValue), String> {
        let mut name = String::new();
        let mut escaped = false;
        let mut first = true;
        loop {
            match self.peek() {
                Some('\\') => {
                    self.bump();
                    if !self.eat('u') {
                        return Err("Invalid escape in identifier".to_string());
                    }
                    let c = self
                        .lex_hex_char(4)
                        .ok_or_else(|| "Invalid unicode escape in identifier".to_string())?;
                    let valid = if first {
                        is_identifier_start(c)
                    } else {
                        is_identifier_part(c)
                    };
                    if !valid {
                        return Err(format!("Invalid identifier character U+{:04X}", u32::from(c)));
                    }
                    name.push(c);
                    escaped = true;
                }
                Some(c) if (first && is_identifier_start(c)) || (!first && is_identifier_part(c)) => {
                    self.bump();
                    name.push(c);
                }
                _ => break,
            }
            first = false;
        }

        if !escaped
            && mode == LexMode::Normal
            && let Some(kind) = KEYWORDS.get(name.as_str())
        {
            return Ok((*kind, TokenValue::Identifier(Arc::from(name))));
        }
        Ok((TokenKind::Identifier, TokenValue::Identifier(Arc::from(name))))
    }

    fn lex_hex_char(&mut self, digits: usize) -> Option<char> {
        let mut value: u32 = 0;
        for _ in 0..digits {
            let digit = self.peek()?.to_digit(16)?;
            self.bump();
            value = value.checked_mul(16)?.checked_add(digit)?;
        }
        char::from_u32(value)
    }

    fn lex_number(&mut self, strict: bool) -> Result<(TokenKind, TokenValue), String> {
        let start = self.pos;
        let value = if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut value = 0f64;
            let mut any = false;
            while let Some(digit) = self.peek().and_then(|c| c.to_digit(16)) {
                self.bump();
                value = value * 16.0 + f64::from(digit);
                any = true;
            }
            if !any {
                return Err("Hexadecimal literal needs at least one digit".to_string());
            }
            value
        } else if self.peek() == Some('0') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            let digits = self.text.get(digits_start..self.pos).unwrap_or_default();
            if strict {
                return Err("Octal literals are not allowed in strict mode".to_string());
            }
            if digits.bytes().all(|b| b <= b'7') {
                digits
                    .bytes()
                    .fold(0f64, |acc, b| acc * 8.0 + f64::from(b.saturating_sub(b'0')))
            } else {
                digits
                    .parse::<f64>()
                    .map_err(|e| format!("Invalid numeric literal: {e}"))?
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            if self.peek() == Some('.') {
                self.bump();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return Err("Exponent needs at least one digit".to_string());
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
            self.text
                .get(start..self.pos)
                .unwrap_or_default()
                .parse::<f64>()
                .map_err(|e| format!("Invalid numeric literal: {e}"))?
        };

        if self.peek().is_some_and(|c| is_identifier_start(c) || c.is_ascii_digit()) {
            return Err("Identifier starts immediately after numeric literal".to_string());
        }
        Ok((TokenKind::Number, TokenValue::Number(value)))
    }

    fn lex_string(&mut self, strict: bool) -> Result<(TokenKind, TokenValue), String> {
        let Some(quote) = self.bump() else {
            return Err("Unterminated string literal".to_string());
        };
        let mut value = String::new();
        let mut has_escape = false;
        loop {
            let Some(c) = self.peek() else {
                return Err("Unterminated string literal".to_string());
            };
            if c == quote {
                self.bump();
                break;
            }
            if is_line_terminator(c) {
                return Err("Unterminated string literal".to_string());
            }
            if c != '\\' {
                self.bump();
                value.push(c);
                continue;
            }
            self.bump();
            has_escape = true;
            let Some(escape) = self.peek() else {
                return Err("Unterminated string literal".to_string());
            };
            if is_line_terminator(escape) {
                self.bump_line_terminator();
                continue;
            }
            self.bump();
            match escape {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'v' => value.push('\u{b}'),
                'x' => value.push(
                    self.lex_hex_char(2)
                        .ok_or_else(|| "Invalid hexadecimal escape".to_string())?,
                ),
                'u' => value.push(
                    self.lex_hex_char(4)
                        .ok_or_else(|| "Invalid unicode escape".to_string())?,
                ),
                '0' if !self.peek().is_some_and(|d| d.is_ascii_digit()) => value.push('\0'),
                '0'..='7' => {
                    if strict {
                        return Err("Octal escapes are not allowed in strict mode".to_string());
                    }
                    let mut code = escape.to_digit(8).unwrap_or_default();
                    // up to three digits, and a value no larger than 0o377
                    let max_digits = if escape <= '3' { 2 } else { 1 };
                    for _ in 0..max_digits {
                        match self.peek().and_then(|d| d.to_digit(8)) {
                            Some(digit) => {
                                self.bump();
                                code = code * 8 + digit;
                            }
                            None => break,
                        }
                    }
                    value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                }
                other => value.push(other),
            }
        }
        Ok((
            TokenKind::String,
            TokenValue::String {
                value: Arc::from(value),
                has_escape,
            },
        ))
    }

    fn lex_punctuator(&mut self) -> Result<(TokenKind, TokenValue), String> {
        let Some(c) = self.bump() else {
            return Ok((TokenKind::Eof, TokenValue::None));
        };
        let kind = match c {
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            '[' => TokenKind::OpenBracket,
            ']' => TokenKind::CloseBracket,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '~' => TokenKind::BitNot,
            '=' => {
                if self.eat('=') {
                    if self.eat('=') { TokenKind::EqEqEq } else { TokenKind::EqEq }
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') { TokenKind::NotEqEq } else { TokenKind::NotEq }
                } else {
                    TokenKind::Not
                }
            }
            '+' => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusEq
                } else {
                    TokenKind::Minus
                }
            }
            '*' => if self.eat('=') { TokenKind::TimesEq } else { TokenKind::Times },
            '/' => if self.eat('=') { TokenKind::DivideEq } else { TokenKind::Divide },
            '%' => if self.eat('=') { TokenKind::ModEq } else { TokenKind::Mod },
            '^' => if self.eat('=') { TokenKind::XorEq } else { TokenKind::BitXor },
            '&' => {
                if self.eat('&') {
                    TokenKind::And
                } else if self.eat('=') {
                    TokenKind::AndEq
                } else {
                    TokenKind::BitAnd
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::Or
                } else if self.eat('=') {
                    TokenKind::OrEq
                } else {
                    TokenKind::BitOr
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') { TokenKind::LShiftEq } else { TokenKind::LShift }
                } else if self.eat('=') {
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('>') {
                        if self.eat('=') { TokenKind::URShiftEq } else { TokenKind::URShift }
                    } else if self.eat('=') {
                        TokenKind::RShiftEq
                    } else {
                        TokenKind::RShift
                    }
                } else if self.eat('=') {
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                }
            }
            other => return Err(format!("Unexpected character '{}'", other.escape_default())),
        };
        Ok((kind, TokenValue::None))
    }

    /// Rescan a `/` or `/=` token at `token_start` as a regular expression
    /// literal. Returns `(pattern, flags)` and leaves the lexer after the
    /// flags.
    pub fn scan_regexp(&mut self, token_start: &Token) -> Result<(String, String), String> {
        self.reset(LexerCheckpoint::before(token_start));
        self.pending_newline = false;
        if !self.eat('/') {
            return Err("Expected regular expression".to_string());
        }
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            let Some(c) = self.peek() else {
                return Err("Unterminated regular expression literal".to_string());
            };
            if is_line_terminator(c) {
                return Err("Unterminated regular expression literal".to_string());
            }
            self.bump();
            match c {
                '/' if !in_class => break,
                '[' => in_class = true,
                ']' => in_class = false,
                '\\' => {
                    pattern.push(c);
                    match self.peek() {
                        Some(next) if !is_line_terminator(next) => {
                            self.bump();
                            pattern.push(next);
                        }
                        _ => return Err("Unterminated regular expression literal".to_string()),
                    }
                    continue;
                }
                _ => {}
            }
            pattern.push(c);
        }
        let mut flags = String::new();
        while let Some(c) = self.peek().filter(|c| is_identifier_part(*c)) {
            self.bump();
            flags.push(c);
        }
        Ok((pattern, flags))
    }

    /// Jump to `offset` (used to skip a cached function body). The caller
    /// supplies the line bookkeeping recorded for that offset.
    pub fn skip_to(&mut self, offset: usize, line: u32, line_start: usize) {
        self.reset(LexerCheckpoint {
            offset,
            line,
            line_start,
            newline_before: false,
        });
    }
}

fn is_whitespace(c: char) -> bool {
    matches!(
        c,
        '\t' | '\u{b}' | '\u{c}' | ' ' | '\u{a0}' | '\u{feff}'
    ) || (!c.is_ascii() && c.is_whitespace() && !is_line_terminator(c))
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '$' || c == '_' || (!c.is_ascii() && c.is_alphabetic())
}

fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c)
        || c.is_ascii_digit()
        || (!c.is_ascii() && c.is_alphanumeric())
        || c == '\u{200c}'
        || c == '\u{200d}'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceProvider;

    fn lex_all(text: &str, strict: bool) -> Vec<Token> {
        let provider = SourceProvider::new("lex.js", text);
        let range = provider.full_range();
        let mut lexer = Lexer::new(&range);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token(LexMode::Normal, strict);
            let done = matches!(token.kind, TokenKind::Eof | TokenKind::Error);
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex_all(text, false).iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_punctuators_longest_match() {
        assert_eq!(
            kinds("a >>>= b !== c"),
            vec![
                TokenKind::Identifier,
                TokenKind::URShiftEq,
                TokenKind::Identifier,
                TokenKind::NotEqEq,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = lex_all("0x1F 1.5e2 .5 017 019", false);
        let values: Vec<f64> = tokens.iter().filter_map(Token::number).collect();
        assert_eq!(values, vec![31.0, 150.0, 0.5, 15.0, 19.0]);
    }

    #[test]
    fn test_octal_rejected_in_strict_mode() {
        let tokens = lex_all("017", true);
        assert_eq!(tokens[0].kind, TokenKind::Error);
        let tokens = lex_all("'\\101'", true);
        assert_eq!(tokens[0].kind, TokenKind::Error);
        let tokens = lex_all("'\\101'", false);
        assert_eq!(tokens[0].string().map(|s| s.as_ref()), Some("A"));
    }

    #[test]
    fn test_string_escape_flag() {
        let tokens = lex_all(r#""use strict" "use\x20strict""#, false);
        assert_eq!(
            tokens[0].value,
            TokenValue::String {
                value: Arc::from("use strict"),
                has_escape: false
            }
        );
        assert_eq!(
            tokens[1].value,
            TokenValue::String {
                value: Arc::from("use strict"),
                has_escape: true
            }
        );
    }

    #[test]
    fn test_newline_tracking() {
        let tokens = lex_all("a /* x\n */ b\n// c\nd", false);
        assert!(tokens[1].newline_before, "block comment with newline counts");
        assert!(tokens[2].newline_before);
        assert_eq!(tokens[2].start.line(), 4);
        assert_eq!(tokens[2].start.column(), 1);
    }

    #[test]
    fn test_reserved_words() {
        assert_eq!(kinds("class")[0], TokenKind::Reserved);
        assert_eq!(kinds("yield")[0], TokenKind::ReservedIfStrict);
        assert_eq!(kinds("v\\u0061r")[0], TokenKind::Identifier);
    }

    #[test]
    fn test_checkpoint_reset_relexes_identically() {
        let provider = SourceProvider::new("lex.js", "a\n  b c");
        let range = provider.full_range();
        let mut lexer = Lexer::new(&range);
        lexer.next_token(LexMode::Normal, false);
        let b = lexer.next_token(LexMode::Normal, false);
        lexer.next_token(LexMode::Normal, false);
        lexer.reset(LexerCheckpoint::before(&b));
        let again = lexer.next_token(LexMode::Normal, false);
        assert_eq!(again, b);
    }

    #[test]
    fn test_scan_regexp() {
        let provider = SourceProvider::new("lex.js", "/a[/]b\\//gi;");
        let range = provider.full_range();
        let mut lexer = Lexer::new(&range);
        let slash = lexer.next_token(LexMode::Normal, false);
        assert_eq!(slash.kind, TokenKind::Divide);
        let (pattern, flags) = lexer.scan_regexp(&slash).unwrap();
        assert_eq!(pattern, "a[/]b\\/");
        assert_eq!(flags, "gi");
        assert_eq!(lexer.next_token(LexMode::Normal, false).kind, TokenKind::Semicolon);
    }

    #[test]
    fn test_next_is_colon() {
        let provider = SourceProvider::new("lex.js", "outer /* c */ : x");
        let range = provider.full_range();
        let mut lexer = Lexer::new(&range);
        lexer.next_token(LexMode::Normal, false);
        assert!(lexer.next_is_colon());
    }
}
