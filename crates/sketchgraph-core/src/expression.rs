//! Unit-annotated arithmetic evaluation for mate-connector quantities.
//!
//! Quantity parameters carry expressions such as `2.5 in + 1 in` or
//! `(90 deg) / 2`. Units are stripped, anything outside the arithmetic
//! alphabet is dropped, and the remainder is evaluated by a small
//! recursive-descent parser:
//!
//! ```text
//! Expression → Additive
//! Additive       = Multiplicative (('+' | '-') Multiplicative)*
//! Multiplicative = Unary (('*' | '/') Unary)*
//! Unary          = ('+' | '-') Unary | Primary
//! Primary        = Number | '(' Additive ')'
//! ```
//!
//! No other evaluation path exists; the grammar above is the whole language.

use thiserror::Error;
use tracing::warn;

/// Unit tokens removed before evaluation, in removal order.
const UNIT_TOKENS: &[&str] = &["in", "deg"];

/// Deepest parenthesis or unary-operator nesting the parser will follow.
pub const MAX_NESTING_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("invalid number literal \"{0}\"")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not finite")]
    NonFinite,
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Outcome of a fallible evaluation with the `0.0` fallback applied.
///
/// `value` is always usable; `fallback` tells an explicit zero apart from a
/// zero produced because the expression could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    pub fallback: Option<ExpressionError>,
}

impl Evaluation {
    pub fn exact(value: f64) -> Self {
        Self {
            value,
            fallback: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Lowercase, strip unit tokens and drop characters outside `0-9 + - * / ( ) .`
/// (spaces are kept as separators).
pub fn sanitize_expression(text: &str) -> String {
    let mut cleaned = text.to_lowercase();
    for unit in UNIT_TOKENS {
        cleaned = cleaned.replace(unit, "");
    }
    cleaned
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.' | ' '))
        .collect()
}

pub fn try_evaluate_expression(text: &str) -> Result<f64, ExpressionError> {
    let cleaned = sanitize_expression(text);
    let tokens = tokenize(&cleaned)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.parse_additive()?;
    if let Some(token) = parser.peek() {
        return Err(match token.kind {
            TokenKind::RParen => ExpressionError::UnbalancedParentheses,
            _ => ExpressionError::UnexpectedToken(token.offset),
        });
    }
    if !value.is_finite() {
        return Err(ExpressionError::NonFinite);
    }
    Ok(value)
}

pub fn evaluate_with_status(text: &str) -> Evaluation {
    match try_evaluate_expression(text) {
        Ok(value) => Evaluation::exact(value),
        Err(err) => {
            warn!(expression = text, error = %err, "unparsable expression, using 0.0");
            Evaluation {
                value: 0.0,
                fallback: Some(err),
            }
        }
    }
}

/// Evaluate without the `0.0` fallback.
pub fn evaluate_strict(text: &str) -> crate::error::Result<f64> {
    Ok(try_evaluate_expression(text)?)
}

/// Evaluate, reporting `0.0` for anything unparsable.
/// Use [`evaluate_with_status`] when the fallback must be distinguishable.
pub fn evaluate_expression(text: &str) -> f64 {
    evaluate_with_status(text).value
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenKind {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let kind = match bytes[i] {
            b' ' => {
                i += 1;
                continue;
            }
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'0'..=b'9' | b'.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let literal = &input[start..i];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(literal.to_string()))?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    offset: start,
                });
                continue;
            }
            _ => return Err(ExpressionError::UnexpectedToken(i)),
        };
        tokens.push(Token { kind, offset: i });
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ExpressionError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_additive(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.parse_multiplicative()?;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Plus => {
                    self.bump();
                    value += self.parse_multiplicative()?;
                }
                TokenKind::Minus => {
                    self.bump();
                    value -= self.parse_multiplicative()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_multiplicative(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.parse_unary()?;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Star => {
                    self.bump();
                    value *= self.parse_unary()?;
                }
                TokenKind::Slash => {
                    self.bump();
                    let divisor = self.parse_unary()?;
                    if divisor == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_unary(&mut self) -> Result<f64, ExpressionError> {
        match self.peek().map(|t| t.kind) {
            Some(TokenKind::Minus) => {
                self.bump();
                Ok(-self.nested(Self::parse_unary)?)
            }
            Some(TokenKind::Plus) => {
                self.bump();
                self.nested(Self::parse_unary)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<f64, ExpressionError> {
        let token = self.bump().ok_or(ExpressionError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number(value) => Ok(value),
            TokenKind::LParen => {
                let value = self.nested(Self::parse_additive)?;
                match self.bump() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(value),
                    None => Err(ExpressionError::UnbalancedParentheses),
                    Some(other) => Err(ExpressionError::UnexpectedToken(other.offset)),
                }
            }
            TokenKind::RParen => Err(ExpressionError::UnbalancedParentheses),
            _ => Err(ExpressionError::UnexpectedToken(token.offset)),
        }
    }
}
