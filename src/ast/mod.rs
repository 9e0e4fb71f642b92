//! The untyped syntax tree of the rule language, as produced by the
//! [parser](parse) and by the [compiled container](compiled).

pub mod compiled;
pub mod lex;
pub mod parse;

use std::fmt::{self, Display, Formatter};

pub use crate::builtins::Builtin;
use crate::util::ListDisplay;
use crate::ArgType;
pub use compiled::{compile_program, decode_program, is_compiled, DecodeError, EncodeError, MAGIC};
pub use parse::{parse_program, ParseError};
pub use symbol_table::GlobalSymbol as Symbol;

/// A parsed rule file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Set by the `.clear_derived()` directive: derived facts are dropped
    /// before this program is installed.
    pub clear_derived: bool,
    pub decls: Vec<PredDecl>,
    pub facts: Vec<Atom>,
    pub rules: Vec<Rule>,
}

/// `.pred name(arg: type, ...).`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredDecl {
    pub name: Symbol,
    pub args: Vec<ArgDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDecl {
    pub name: Symbol,
    pub ty: ArgType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Var(Symbol),
    Wildcard,
    /// A quoted string literal.
    Str(String),
    Int(i64),
    /// A bare lowercase name used as a symbol constant.
    Name(Symbol),
}

impl Term {
    pub fn is_ground(&self) -> bool {
        !matches!(self, Term::Var(_) | Term::Wildcard)
    }

    pub fn var(&self) -> Option<Symbol> {
        match self {
            Term::Var(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub name: Symbol,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(name: impl Into<Symbol>, args: Vec<Term>) -> Self {
        Atom {
            name: name.into(),
            args,
        }
    }
}

/// An ordered comparison. Equality is a separate [`Literal::Eq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Atom(Atom),
    Not(Atom),
    Eq(Term, Term),
    Cmp(CmpOp, Term, Term),
    Builtin {
        builtin: Builtin,
        args: Vec<Term>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub head: Atom,
    pub body: Vec<Literal>,
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Wildcard => f.write_str("_"),
            Term::Str(s) => write!(f, "\"{}\"", escape(s)),
            Term::Int(i) => write!(f, "{i}"),
            Term::Name(n) => write!(f, "{n}"),
        }
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, ListDisplay(&self.args, ", "))
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Atom(a) => write!(f, "{a}"),
            Literal::Not(a) => write!(f, "not {a}"),
            Literal::Eq(l, r) => write!(f, "{l} = {r}"),
            Literal::Cmp(op, l, r) => write!(f, "{l} {} {r}", op.as_str()),
            Literal::Builtin {
                builtin,
                args,
                negated,
            } => {
                if *negated {
                    f.write_str("not ")?;
                }
                write!(f, "{}({})", builtin.name(), ListDisplay(args, ", "))
            }
        }
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} :- {}.", self.head, ListDisplay(&self.body, ", "))
    }
}

impl Display for PredDecl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, ".pred {}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match arg.ty {
                ArgType::Unknown => write!(f, "{}", arg.name)?,
                ty => write!(f, "{}: {ty}", arg.name)?,
            }
        }
        f.write_str(").")
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.clear_derived {
            writeln!(f, ".clear_derived()")?;
        }
        for decl in &self.decls {
            writeln!(f, "{decl}")?;
        }
        for fact in &self.facts {
            writeln!(f, "{fact}.")?;
        }
        for rule in &self.rules {
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reparses_to_the_same_program() {
        let src = r#"
            .clear_derived()
            .pred dep(pkg: symbol, on: symbol, min: range).
            dep("app", "serde\n\"x\"", 3).
            dep(app, core, -1).
            orphan(P) :- dep(P, _, _), not used(P), P != "root", match("^a.*", P).
        "#;
        let program = parse_program(src).unwrap();
        let again = parse_program(&program.to_string()).unwrap();
        assert_eq!(program, again);
    }
}
