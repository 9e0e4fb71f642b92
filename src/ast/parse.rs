//! Parse rule-language source into a [`Program`].

use std::iter::Peekable;

use thiserror::Error;

use super::lex::{Lexer, Pos, Spanned, Token};
use super::*;

pub fn parse_program(input: &str) -> Result<Program, ParseError> {
    Parser::new(input).program()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0}: expected {1}, found {2}")]
    Expected(Pos, &'static str, String),
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(&'static str),
    #[error("{0}: {1}")]
    InvalidToken(Pos, String),
    #[error("{0}: fact {1} contains a variable; facts must be ground")]
    VariableInFact(Pos, String),
    #[error("{0}: unknown argument type `{1}`, expected symbol, int or range")]
    UnknownType(Pos, String),
    #[error("{0}: duplicate .clear_derived() directive")]
    DuplicateDirective(Pos),
    #[error("{0}: builtin `{1}` takes {2} arguments, found {3}")]
    BuiltinArity(Pos, &'static str, usize, usize),
    #[error("{0}: builtin `{1}` cannot be declared, asserted or derived")]
    BuiltinAsPredicate(Pos, String),
}

struct Parser<'a> {
    tokens: Peekable<Lexer<'a>>,
}

type Res<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            tokens: Lexer::new(input).peekable(),
        }
    }

    fn peek(&mut self) -> Res<Option<&Spanned>> {
        match self.tokens.peek() {
            Some(Spanned {
                token: Token::Invalid(msg),
                pos,
            }) => Err(ParseError::InvalidToken(*pos, msg.clone())),
            other => Ok(other),
        }
    }

    fn peek_is(&mut self, token: &Token) -> Res<bool> {
        Ok(matches!(self.peek()?, Some(s) if &s.token == token))
    }

    fn next(&mut self, expected: &'static str) -> Res<Spanned> {
        self.peek()?;
        self.tokens.next().ok_or(ParseError::UnexpectedEof(expected))
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Res<Pos> {
        let s = self.next(expected)?;
        if s.token == token {
            Ok(s.pos)
        } else {
            Err(ParseError::Expected(s.pos, expected, s.token.to_string()))
        }
    }

    fn name(&mut self, expected: &'static str) -> Res<(Pos, Symbol)> {
        let s = self.next(expected)?;
        match s.token {
            Token::Name(n) => Ok((s.pos, Symbol::from(n.as_str()))),
            other => Err(ParseError::Expected(s.pos, expected, other.to_string())),
        }
    }

    /// Parses `sep`-separated items up to and including the closing `)`.
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Res<T>) -> Res<Vec<T>> {
        let mut items = vec![];
        if self.peek_is(&Token::RParen)? {
            self.next("`)`")?;
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            let s = self.next("`,` or `)`")?;
            match s.token {
                Token::Comma => continue,
                Token::RParen => return Ok(items),
                other => return Err(ParseError::Expected(s.pos, "`,` or `)`", other.to_string())),
            }
        }
    }

    fn program(mut self) -> Res<Program> {
        let mut program = Program::default();
        loop {
            let (pos, token) = match self.peek()? {
                Some(s) => (s.pos, s.token.clone()),
                None => break,
            };
            match token {
                Token::Pred => {
                    self.next(".pred")?;
                    program.decls.push(self.decl()?);
                }
                Token::ClearDerived => {
                    self.next(".clear_derived()")?;
                    if program.clear_derived {
                        return Err(ParseError::DuplicateDirective(pos));
                    }
                    program.clear_derived = true;
                    if self.peek_is(&Token::Dot)? {
                        self.next("`.`")?;
                    }
                }
                _ => self.clause(&mut program)?,
            }
        }
        Ok(program)
    }

    fn decl(&mut self) -> Res<PredDecl> {
        let (pos, name) = self.name("predicate name")?;
        if Builtin::from_name(name.as_str()).is_some() {
            return Err(ParseError::BuiltinAsPredicate(pos, name.to_string()));
        }
        self.expect(Token::LParen, "`(`")?;
        let args = self.list(|p| {
            let (_, arg) = p.name("argument name")?;
            let mut ty = ArgType::Unknown;
            if p.peek_is(&Token::Colon)? {
                p.next("`:`")?;
                let (pos, ty_name) = p.name("argument type")?;
                ty = ArgType::from_name(ty_name.as_str())
                    .ok_or_else(|| ParseError::UnknownType(pos, ty_name.to_string()))?;
            }
            Ok(ArgDecl { name: arg, ty })
        })?;
        self.expect(Token::Dot, "`.`")?;
        Ok(PredDecl { name, args })
    }

    fn clause(&mut self, program: &mut Program) -> Res<()> {
        let (pos, head) = self.atom()?;
        if Builtin::from_name(head.name.as_str()).is_some() {
            return Err(ParseError::BuiltinAsPredicate(pos, head.name.to_string()));
        }
        let s = self.next("`.` or `:-`")?;
        match s.token {
            Token::Dot => {
                if !head.args.iter().all(Term::is_ground) {
                    return Err(ParseError::VariableInFact(pos, head.to_string()));
                }
                program.facts.push(head);
            }
            Token::Arrow => {
                let mut body = vec![self.literal()?];
                loop {
                    let s = self.next("`,` or `.`")?;
                    match s.token {
                        Token::Comma => body.push(self.literal()?),
                        Token::Dot => break,
                        other => {
                            return Err(ParseError::Expected(s.pos, "`,` or `.`", other.to_string()))
                        }
                    }
                }
                program.rules.push(Rule { head, body });
            }
            other => return Err(ParseError::Expected(s.pos, "`.` or `:-`", other.to_string())),
        }
        Ok(())
    }

    fn atom(&mut self) -> Res<(Pos, Atom)> {
        let (pos, name) = self.name("predicate name")?;
        self.expect(Token::LParen, "`(`")?;
        let args = self.list(|p| p.term())?;
        Ok((pos, Atom { name, args }))
    }

    fn term(&mut self) -> Res<Term> {
        let s = self.next("term")?;
        Ok(match s.token {
            Token::Var(v) => Term::Var(Symbol::from(v.as_str())),
            Token::Wildcard => Term::Wildcard,
            Token::Str(s) => Term::Str(s),
            Token::Int(i) => Term::Int(i),
            Token::Name(n) => Term::Name(Symbol::from(n.as_str())),
            other => return Err(ParseError::Expected(s.pos, "term", other.to_string())),
        })
    }

    fn literal(&mut self) -> Res<Literal> {
        if self.peek_is(&Token::Not)? {
            self.next("`not`")?;
            let (pos, atom) = self.atom()?;
            return atom_literal(pos, atom, true);
        }
        // A name followed by `(` is an atom; anything else starts a comparison.
        let first = self.next("literal")?;
        let lhs = match first.token {
            Token::Name(n) if self.peek_is(&Token::LParen)? => {
                self.next("`(`")?;
                let args = self.list(|p| p.term())?;
                let atom = Atom {
                    name: Symbol::from(n.as_str()),
                    args,
                };
                return atom_literal(first.pos, atom, false);
            }
            Token::Name(n) => Term::Name(Symbol::from(n.as_str())),
            Token::Var(v) => Term::Var(Symbol::from(v.as_str())),
            Token::Wildcard => Term::Wildcard,
            Token::Str(s) => Term::Str(s),
            Token::Int(i) => Term::Int(i),
            other => return Err(ParseError::Expected(first.pos, "literal", other.to_string())),
        };
        let s = self.next("comparison operator")?;
        let op = match s.token {
            Token::Eq => None,
            Token::Ne => Some(CmpOp::Ne),
            Token::Lt => Some(CmpOp::Lt),
            Token::Le => Some(CmpOp::Le),
            Token::Gt => Some(CmpOp::Gt),
            Token::Ge => Some(CmpOp::Ge),
            other => {
                return Err(ParseError::Expected(
                    s.pos,
                    "comparison operator",
                    other.to_string(),
                ))
            }
        };
        let rhs = self.term()?;
        Ok(match op {
            None => Literal::Eq(lhs, rhs),
            Some(op) => Literal::Cmp(op, lhs, rhs),
        })
    }
}

fn atom_literal(pos: Pos, atom: Atom, negated: bool) -> Res<Literal> {
    match Builtin::from_name(atom.name.as_str()) {
        Some(builtin) => {
            if atom.args.len() != builtin.arity() {
                return Err(ParseError::BuiltinArity(
                    pos,
                    builtin.name(),
                    builtin.arity(),
                    atom.args.len(),
                ));
            }
            Ok(Literal::Builtin {
                builtin,
                args: atom.args,
                negated,
            })
        }
        None if negated => Ok(Literal::Not(atom)),
        None => Ok(Literal::Atom(atom)),
    }
}
