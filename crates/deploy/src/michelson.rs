//! Reader for the subset of Michelson used by storage literals, plus the
//! literal encoders the storage templates write with.
//!
//! Rendered storages are parsed back before they are submitted, so a
//! malformed template fails locally instead of in the node's typechecker.

use num_bigint::BigInt;
use thiserror::Error;

/// A Michelson expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(BigInt),
    String(String),
    Bytes(Vec<u8>),
    Prim {
        name: String,
        args: Vec<Expr>,
        annots: Vec<String>,
    },
    Seq(Vec<Expr>),
}

impl Expr {
    /// Arguments of a primitive application. Empty for every other node.
    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Prim { args, .. } => args,
            _ => &[],
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Expr::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Expr]> {
        match self {
            Expr::Seq(items) => Some(items),
            _ => None,
        }
    }
}

/// Error produced while reading a Michelson expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at byte {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// A character that has no representation inside a Michelson string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("character {0:?} cannot appear in a Michelson string")]
pub struct UnsupportedChar(pub char);

/// Render `value` as a double-quoted Michelson string literal.
pub fn quote(value: &str) -> Result<String, UnsupportedChar> {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            ' ' => out.push(' '),
            c if c.is_ascii_graphic() => out.push(c),
            c => return Err(UnsupportedChar(c)),
        }
    }
    out.push('"');
    Ok(out)
}

/// Render raw bytes as a `0x`-prefixed lowercase hex literal.
pub fn bytes_literal(data: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(data))
}

/// Parse a complete Michelson expression.
///
/// The top level may be an unparenthesised application (`Pair 1 2`), which
/// is how storages are usually written on the command line.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };

    let expr = parser.application()?;
    if let Some((offset, token)) = parser.next() {
        return Err(ParseError::new(
            offset,
            format!("unexpected trailing {}", token.describe()),
        ));
    }

    Ok(expr)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semi,
    Int(BigInt),
    Str(String),
    Bytes(Vec<u8>),
    Ident(String),
    Annot(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::LBrace => "`{`".to_string(),
            Token::RBrace => "`}`".to_string(),
            Token::Semi => "`;`".to_string(),
            Token::Int(value) => format!("integer {value}"),
            Token::Str(_) => "string".to_string(),
            Token::Bytes(_) => "bytes".to_string(),
            Token::Ident(name) => format!("primitive `{name}`"),
            Token::Annot(annot) => format!("annotation `{annot}`"),
        }
    }
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_annot_char(b: u8) -> bool {
    is_ident_char(b) || matches!(b, b'.' | b'%' | b'@')
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = src[i + 2..]
                    .find("*/")
                    .ok_or_else(|| ParseError::new(start, "unterminated comment"))?;
                i += 2 + close + 2;
            }
            b'(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            b')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            b'{' => {
                tokens.push((start, Token::LBrace));
                i += 1;
            }
            b'}' => {
                tokens.push((start, Token::RBrace));
                i += 1;
            }
            b';' => {
                tokens.push((start, Token::Semi));
                i += 1;
            }
            b'"' => {
                let (value, next) = read_string(src, i)?;
                tokens.push((start, Token::Str(value)));
                i = next;
            }
            b'0' if bytes.get(i + 1) == Some(&b'x') => {
                i += 2;
                while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let data = hex::decode(&src[start + 2..i])
                    .map_err(|e| ParseError::new(start, format!("invalid bytes literal: {e}")))?;
                tokens.push((start, Token::Bytes(data)));
            }
            b'-' | b'0'..=b'9' => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let value = src[start..i]
                    .parse::<BigInt>()
                    .map_err(|_| ParseError::new(start, "invalid integer literal"))?;
                tokens.push((start, Token::Int(value)));
            }
            b'@' | b'%' | b':' => {
                i += 1;
                while i < bytes.len() && is_annot_char(bytes[i]) {
                    i += 1;
                }
                tokens.push((start, Token::Annot(src[start..i].to_string())));
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                tokens.push((start, Token::Ident(src[start..i].to_string())));
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('\u{fffd}');
                return Err(ParseError::new(start, format!("unexpected character {ch:?}")));
            }
        }
    }

    Ok(tokens)
}

/// Read a string literal starting at the opening quote. Returns the decoded
/// value and the offset just past the closing quote.
fn read_string(src: &str, open: usize) -> Result<(String, usize), ParseError> {
    let bytes = src.as_bytes();
    let mut value = String::new();
    let mut i = open + 1;

    loop {
        match bytes.get(i) {
            None => return Err(ParseError::new(open, "unterminated string")),
            Some(b'"') => return Ok((value, i + 1)),
            Some(b'\\') => {
                let unescaped = match bytes.get(i + 1) {
                    Some(b'"') => '"',
                    Some(b'\\') => '\\',
                    Some(b'n') => '\n',
                    Some(b't') => '\t',
                    Some(b'r') => '\r',
                    _ => return Err(ParseError::new(i, "invalid escape sequence")),
                };
                value.push(unescaped);
                i += 2;
            }
            Some(&b) if b == b' ' || b.is_ascii_graphic() => {
                value.push(b as char);
                i += 1;
            }
            Some(_) => return Err(ParseError::new(i, "invalid character in string")),
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn next_or_eof(&mut self) -> Result<(usize, Token), ParseError> {
        self.next()
            .ok_or_else(|| ParseError::new(self.end, "unexpected end of input"))
    }

    /// A primitive with its arguments, or any single atom.
    fn application(&mut self) -> Result<Expr, ParseError> {
        let (offset, token) = self.next_or_eof()?;
        let Token::Ident(name) = token else {
            return self.atom_from(offset, token);
        };

        let mut args = Vec::new();
        let mut annots = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Annot(_)) => {
                    if let Some((_, Token::Annot(annot))) = self.next() {
                        annots.push(annot);
                    }
                }
                Some(
                    Token::LParen
                    | Token::LBrace
                    | Token::Int(_)
                    | Token::Str(_)
                    | Token::Bytes(_)
                    | Token::Ident(_),
                ) => args.push(self.atom()?),
                _ => break,
            }
        }

        Ok(Expr::Prim { name, args, annots })
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let (offset, token) = self.next_or_eof()?;
        self.atom_from(offset, token)
    }

    fn atom_from(&mut self, offset: usize, token: Token) -> Result<Expr, ParseError> {
        match token {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Str(value) => Ok(Expr::String(value)),
            Token::Bytes(value) => Ok(Expr::Bytes(value)),
            Token::Ident(name) => Ok(Expr::Prim {
                name,
                args: Vec::new(),
                annots: Vec::new(),
            }),
            Token::LParen => {
                let inner = self.application()?;
                match self.next_or_eof()? {
                    (_, Token::RParen) => Ok(inner),
                    (at, other) => Err(ParseError::new(
                        at,
                        format!("expected `)`, found {}", other.describe()),
                    )),
                }
            }
            Token::LBrace => self.sequence(),
            other => Err(ParseError::new(
                offset,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    fn sequence(&mut self) -> Result<Expr, ParseError> {
        let mut items = Vec::new();
        loop {
            if matches!(self.peek(), Some(Token::RBrace)) {
                self.pos += 1;
                break;
            }

            items.push(self.application()?);

            match self.next_or_eof()? {
                (_, Token::Semi) => continue,
                (_, Token::RBrace) => break,
                (at, other) => {
                    return Err(ParseError::new(
                        at,
                        format!("expected `;` or `}}`, found {}", other.describe()),
                    ));
                }
            }
        }

        Ok(Expr::Seq(items))
    }
}
