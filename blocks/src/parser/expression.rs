use std::ops::Range;

use crate::formula::{BinaryOperator, Expr, Function, UnaryOperator, Variable};
use crate::parser::error::ParseError;

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Token {
    Number(f64),
    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,   // == (also ===)
    BangEq, // != (also !==)
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,
    PipePipe,
    Bang,
    Question,
    Colon,
    Comma,
    Dot,

    // Grouping
    LParen,
    RParen,
}

type Spanned = (Token, Range<usize>);

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse formula text into an expression tree.
///
/// Identifiers are resolved here: the only variables are `primary`,
/// `dependent` and `deltaPrimary`; `PI` and the supported math functions may
/// carry a `Math.` prefix.
pub fn parse_formula(source: &str, file_id: usize) -> Result<Expr, ParseError> {
    let tokens = tokenize(source, file_id)?;
    if tokens.is_empty() {
        return Err(ParseError::error("empty formula", 0..source.len(), file_id));
    }
    let mut parser = ExprParser::new(tokens, source.len(), file_id);
    let expr = parser.parse_expr(0)?;
    if !parser.at_end() {
        return Err(parser.error_here("unexpected tokens after expression"));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Text tokenizer: raw text string → Token stream
// ---------------------------------------------------------------------------

fn tokenize(text: &str, file_id: usize) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let len = chars.len();
    let byte_at = |i: usize| if i < len { chars[i].0 } else { text.len() };
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let (start, c) = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }

            // Numbers: 12, 0.51, .5, 1e-3
            '0'..='9' | '.' if c != '.' || (i + 1 < len && chars[i + 1].1.is_ascii_digit()) => {
                while i < len && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                if i < len && matches!(chars[i].1, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < len && matches!(chars[j].1, '+' | '-') {
                        j += 1;
                    }
                    if j < len && chars[j].1.is_ascii_digit() {
                        i = j;
                        while i < len && chars[i].1.is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let span = start..byte_at(i);
                let literal = &text[span.clone()];
                let value = literal.parse::<f64>().map_err(|_| {
                    ParseError::error(format!("invalid number '{}'", literal), span.clone(), file_id)
                })?;
                tokens.push((Token::Number(value), span));
            }

            // Identifiers
            'a'..='z' | 'A'..='Z' | '_' => {
                while i < len && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let span = start..byte_at(i);
                tokens.push((Token::Ident(text[span.clone()].to_string()), span));
            }

            // Two-character operators
            '=' => {
                i += 1;
                if i < len && chars[i].1 == '=' {
                    i += 1;
                    if i < len && chars[i].1 == '=' {
                        i += 1;
                    }
                    tokens.push((Token::EqEq, start..byte_at(i)));
                } else {
                    return Err(ParseError::error(
                        "assignment is not allowed in formulas",
                        start..byte_at(i),
                        file_id,
                    )
                    .with_note("use '==' to compare values"));
                }
            }
            '!' => {
                i += 1;
                if i < len && chars[i].1 == '=' {
                    i += 1;
                    if i < len && chars[i].1 == '=' {
                        i += 1;
                    }
                    tokens.push((Token::BangEq, start..byte_at(i)));
                } else {
                    tokens.push((Token::Bang, start..byte_at(i)));
                }
            }
            '>' | '<' => {
                i += 1;
                let with_eq = i < len && chars[i].1 == '=';
                if with_eq {
                    i += 1;
                }
                let token = match (c, with_eq) {
                    ('>', true) => Token::GtEq,
                    ('>', false) => Token::Gt,
                    ('<', true) => Token::LtEq,
                    _ => Token::Lt,
                };
                tokens.push((token, start..byte_at(i)));
            }
            '&' | '|' => {
                i += 1;
                if i < len && chars[i].1 == c {
                    i += 1;
                    let token = if c == '&' { Token::AmpAmp } else { Token::PipePipe };
                    tokens.push((token, start..byte_at(i)));
                } else {
                    return Err(ParseError::error(
                        format!("bitwise '{}' is not supported", c),
                        start..byte_at(i),
                        file_id,
                    ));
                }
            }

            // Single-character operators
            '+' | '-' | '*' | '/' | '%' | '?' | ':' | ',' | '.' | '(' | ')' => {
                i += 1;
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '?' => Token::Question,
                    ':' => Token::Colon,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                };
                tokens.push((token, start..byte_at(i)));
            }

            _ => {
                return Err(ParseError::error(
                    format!("unexpected character '{}'", c),
                    start..byte_at(i + 1),
                    file_id,
                ));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Token kind (for matching without payloads)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenKind {
    Number,
    Ident,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    BangEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,
    PipePipe,
    Bang,
    Question,
    Colon,
    Comma,
    Dot,
    LParen,
    RParen,
}

fn token_kind(t: &Token) -> TokenKind {
    match t {
        Token::Number(_) => TokenKind::Number,
        Token::Ident(_) => TokenKind::Ident,
        Token::Plus => TokenKind::Plus,
        Token::Minus => TokenKind::Minus,
        Token::Star => TokenKind::Star,
        Token::Slash => TokenKind::Slash,
        Token::Percent => TokenKind::Percent,
        Token::EqEq => TokenKind::EqEq,
        Token::BangEq => TokenKind::BangEq,
        Token::Gt => TokenKind::Gt,
        Token::Lt => TokenKind::Lt,
        Token::GtEq => TokenKind::GtEq,
        Token::LtEq => TokenKind::LtEq,
        Token::AmpAmp => TokenKind::AmpAmp,
        Token::PipePipe => TokenKind::PipePipe,
        Token::Bang => TokenKind::Bang,
        Token::Question => TokenKind::Question,
        Token::Colon => TokenKind::Colon,
        Token::Comma => TokenKind::Comma,
        Token::Dot => TokenKind::Dot,
        Token::LParen => TokenKind::LParen,
        Token::RParen => TokenKind::RParen,
    }
}

fn describe(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Number => "number",
        TokenKind::Ident => "identifier",
        TokenKind::Plus => "'+'",
        TokenKind::Minus => "'-'",
        TokenKind::Star => "'*'",
        TokenKind::Slash => "'/'",
        TokenKind::Percent => "'%'",
        TokenKind::EqEq => "'=='",
        TokenKind::BangEq => "'!='",
        TokenKind::Gt => "'>'",
        TokenKind::Lt => "'<'",
        TokenKind::GtEq => "'>='",
        TokenKind::LtEq => "'<='",
        TokenKind::AmpAmp => "'&&'",
        TokenKind::PipePipe => "'||'",
        TokenKind::Bang => "'!'",
        TokenKind::Question => "'?'",
        TokenKind::Colon => "':'",
        TokenKind::Comma => "','",
        TokenKind::Dot => "'.'",
        TokenKind::LParen => "'('",
        TokenKind::RParen => "')'",
    }
}

// ---------------------------------------------------------------------------
// Pratt parser
// ---------------------------------------------------------------------------

struct ExprParser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Byte length of the source; used for end-of-input spans.
    end: usize,
    file_id: usize,
}

// Binding powers (precedence). Higher = tighter binding.
// Left bp, right bp. For left-assoc: right = left + 1. For right-assoc: right = left.
const BP_CONDITIONAL: u8 = 2;     // ? :
const BP_OR: u8 = 4;              // ||
const BP_AND: u8 = 6;             // &&
const BP_EQUALITY: u8 = 8;        // == !=
const BP_COMPARISON: u8 = 10;     // < > <= >=
const BP_ADDITIVE: u8 = 12;       // + -
const BP_MULTIPLICATIVE: u8 = 14; // * / %
const BP_UNARY: u8 = 16;          // ! -

impl ExprParser {
    fn new(tokens: Vec<Spanned>, end: usize, file_id: usize) -> Self {
        ExprParser { tokens, pos: 0, end, file_id }
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|(t, _)| token_kind(t))
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Span of the next token, or an empty span at the end of input.
    fn here(&self) -> Range<usize> {
        match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => self.end..self.end,
        }
    }

    fn error_here(&self, msg: impl Into<String>) -> ParseError {
        ParseError::error(msg, self.here(), self.file_id)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Range<usize>, ParseError> {
        match self.peek_kind() {
            Some(k) if k == kind => Ok(self.advance().map(|(_, s)| s).unwrap_or_default()),
            Some(k) => Err(self.error_here(format!(
                "expected {}, found {}",
                describe(kind),
                describe(k)
            ))),
            None => Err(self.error_here(format!("expected {}, found end of formula", describe(kind)))),
        }
    }

    // ------------------------------------------------------------------
    // Pratt parser core
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_prefix()?;

        loop {
            let Some(kind) = self.peek_kind() else { break };
            let Some((l_bp, r_bp)) = infix_bp(kind) else { break };

            if l_bp < min_bp {
                break;
            }

            // Conditional: both branches are mandatory.
            if kind == TokenKind::Question {
                self.advance();
                let true_branch = self.parse_expr(0)?;
                self.expect(TokenKind::Colon)?;
                let false_branch = self.parse_expr(r_bp)?;
                left = Expr::Conditional {
                    condition: Box::new(left),
                    true_branch: Box::new(true_branch),
                    false_branch: Box::new(false_branch),
                };
                continue;
            }

            self.advance();
            let right = self.parse_expr(r_bp)?;

            let operator = match kind {
                TokenKind::Plus => BinaryOperator::Addition,
                TokenKind::Minus => BinaryOperator::Subtraction,
                TokenKind::Star => BinaryOperator::Multiplication,
                TokenKind::Slash => BinaryOperator::Division,
                TokenKind::Percent => BinaryOperator::Modulo,
                TokenKind::EqEq => BinaryOperator::Equality,
                TokenKind::BangEq => BinaryOperator::Inequality,
                TokenKind::Gt => BinaryOperator::GreaterThan,
                TokenKind::Lt => BinaryOperator::LessThan,
                TokenKind::GtEq => BinaryOperator::GreaterThanOrEqual,
                TokenKind::LtEq => BinaryOperator::LessThanOrEqual,
                TokenKind::AmpAmp => BinaryOperator::LogicalAnd,
                TokenKind::PipePipe => BinaryOperator::LogicalOr,
                _ => return Err(self.error_here("unexpected infix operator")),
            };

            left = Expr::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let Some((token, span)) = self.advance() else {
            return Err(self.error_here("unexpected end of formula"));
        };

        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => self.parse_identifier(name, span),

            Token::Bang => {
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(Expr::Unary {
                    operator: UnaryOperator::LogicalNot,
                    operand: Box::new(operand),
                })
            }
            Token::Minus => {
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(Expr::Unary {
                    operator: UnaryOperator::Negation,
                    operand: Box::new(operand),
                })
            }
            Token::Plus => self.parse_expr(BP_UNARY),

            Token::LParen => {
                let expr = self.parse_expr(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }

            other => Err(ParseError::error(
                format!("unexpected {}", describe(token_kind(&other))),
                span,
                self.file_id,
            )),
        }
    }

    /// Variables, constants, `Math.` members and function calls.
    fn parse_identifier(&mut self, name: String, span: Range<usize>) -> Result<Expr, ParseError> {
        let (name, span) = if name == "Math" {
            self.expect(TokenKind::Dot)?;
            match self.advance() {
                Some((Token::Ident(member), member_span)) => (member, span.start..member_span.end),
                _ => return Err(ParseError::error("expected a member after 'Math.'", span, self.file_id)),
            }
        } else {
            (name, span)
        };

        match name.as_str() {
            "true" => return Ok(Expr::Boolean(true)),
            "false" => return Ok(Expr::Boolean(false)),
            "PI" => return Ok(Expr::Number(std::f64::consts::PI)),
            _ => {}
        }

        if let Some(variable) = Variable::from_name(&name) {
            return Ok(Expr::Variable(variable));
        }

        if let Some(function) = Function::from_name(&name) {
            self.expect(TokenKind::LParen)?;
            let arguments = self.parse_arguments()?;
            if arguments.len() != function.arity() {
                return Err(ParseError::error(
                    format!(
                        "'{}' takes {} argument(s), got {}",
                        function.name(),
                        function.arity(),
                        arguments.len()
                    ),
                    span,
                    self.file_id,
                ));
            }
            return Ok(Expr::Call { function, arguments });
        }

        Err(ParseError::error(format!("unknown identifier '{}'", name), span, self.file_id)
            .with_note("formulas may use: primary, dependent, deltaPrimary"))
    }

    /// Comma-separated arguments after an opening parenthesis.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut arguments = Vec::new();
        if self.peek_kind() == Some(TokenKind::RParen) {
            self.advance();
            return Ok(arguments);
        }
        loop {
            arguments.push(self.parse_expr(0)?);
            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                _ => {
                    self.expect(TokenKind::RParen)?;
                    return Ok(arguments);
                }
            }
        }
    }
}

/// Infix binding powers: returns (left_bp, right_bp) or None if not infix.
fn infix_bp(kind: TokenKind) -> Option<(u8, u8)> {
    match kind {
        TokenKind::Question => Some((BP_CONDITIONAL, BP_CONDITIONAL)),
        TokenKind::PipePipe => Some((BP_OR, BP_OR + 1)),
        TokenKind::AmpAmp => Some((BP_AND, BP_AND + 1)),
        TokenKind::EqEq | TokenKind::BangEq => Some((BP_EQUALITY, BP_EQUALITY + 1)),
        TokenKind::Gt | TokenKind::Lt | TokenKind::GtEq | TokenKind::LtEq => {
            Some((BP_COMPARISON, BP_COMPARISON + 1))
        }
        TokenKind::Plus | TokenKind::Minus => Some((BP_ADDITIVE, BP_ADDITIVE + 1)),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => {
            Some((BP_MULTIPLICATIVE, BP_MULTIPLICATIVE + 1))
        }
        _ => None,
    }
}
