//! Tokenizer for the rule language.

use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A lowercase identifier: a predicate name or a symbol constant.
    Name(String),
    /// An identifier starting with an uppercase letter or `_`.
    Var(String),
    Wildcard,
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    Arrow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    /// `.pred`
    Pred,
    /// `.clear_derived()`
    ClearDerived,
    /// Malformed input; the payload describes the problem.
    Invalid(String),
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(s) => write!(f, "name `{s}`"),
            Token::Var(s) => write!(f, "variable `{s}`"),
            Token::Wildcard => f.write_str("`_`"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Int(i) => write!(f, "integer {i}"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Comma => f.write_str("`,`"),
            Token::Dot => f.write_str("`.`"),
            Token::Colon => f.write_str("`:`"),
            Token::Arrow => f.write_str("`:-`"),
            Token::Eq => f.write_str("`=`"),
            Token::Ne => f.write_str("`!=`"),
            Token::Lt => f.write_str("`<`"),
            Token::Le => f.write_str("`<=`"),
            Token::Gt => f.write_str("`>`"),
            Token::Ge => f.write_str("`>=`"),
            Token::Not => f.write_str("`not`"),
            Token::Pred => f.write_str("`.pred`"),
            Token::ClearDerived => f.write_str("`.clear_derived()`"),
            Token::Invalid(msg) => f.write_str(msg),
        }
    }
}

/// A line/column position, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub pos: Pos,
}

/// A single-pass token stream over a source string.
pub struct Lexer<'a> {
    src: &'a str,
    index: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            index: 0,
            line: 1,
            col: 1,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.index..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '%' {
                while !matches!(self.bump(), Some('\n') | None) {}
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> &'a str {
        let start = self.index;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        &self.src[start..self.index]
    }

    fn string(&mut self) -> Token {
        // opening quote
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Token::Invalid("unterminated string literal".into()),
                Some('"') => return Token::Str(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(c) => return Token::Invalid(format!("unknown escape `\\{c}`")),
                    None => return Token::Invalid("unterminated string literal".into()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn integer(&mut self) -> Token {
        let start = self.index;
        if self.peek() == Some('-') {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let text = &self.src[start..self.index];
        match text.parse::<i64>() {
            Ok(i) => Token::Int(i),
            Err(_) => Token::Invalid(format!("integer literal `{text}` out of range")),
        }
    }

    fn directive(&mut self) -> Token {
        let after = &self.rest()[1..];
        let boundary = |s: &str| !matches!(s.chars().next(), Some(c) if c.is_ascii_alphanumeric() || c == '_');
        if let Some(tail) = after.strip_prefix("pred") {
            if boundary(tail) {
                self.bump_n(5);
                return Token::Pred;
            }
        }
        if after.starts_with("clear_derived()") {
            self.bump_n(1 + "clear_derived()".len());
            return Token::ClearDerived;
        }
        self.bump();
        Token::Dot
    }
}

impl Iterator for Lexer<'_> {
    type Item = Spanned;

    fn next(&mut self) -> Option<Spanned> {
        self.skip_trivia();
        let pos = Pos {
            line: self.line,
            col: self.col,
        };
        let c = self.peek()?;
        let mut chars = self.rest().chars();
        chars.next();
        let second = chars.next();
        let token = match c {
            '"' => self.string(),
            '.' => self.directive(),
            '-' if matches!(second, Some(d) if d.is_ascii_digit()) => self.integer(),
            c if c.is_ascii_digit() => self.integer(),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.ident();
                if word == "_" {
                    Token::Wildcard
                } else if word == "not" {
                    Token::Not
                } else if c.is_ascii_uppercase() || c == '_' {
                    Token::Var(word.to_string())
                } else {
                    Token::Name(word.to_string())
                }
            }
            _ => {
                let (token, len) = match (c, second) {
                    (':', Some('-')) => (Token::Arrow, 2),
                    (':', _) => (Token::Colon, 1),
                    ('!', Some('=')) => (Token::Ne, 2),
                    ('<', Some('>')) => (Token::Ne, 2),
                    ('<', Some('=')) => (Token::Le, 2),
                    ('<', _) => (Token::Lt, 1),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('>', _) => (Token::Gt, 1),
                    ('=', _) => (Token::Eq, 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    (',', _) => (Token::Comma, 1),
                    (c, _) => (Token::Invalid(format!("unexpected character `{c}`")), 1),
                };
                self.bump_n(len);
                token
            }
        };
        Some(Spanned { token, pos })
    }
}
