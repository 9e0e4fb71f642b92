//! The intermediate representation: resolved predicates, rules over numbered
//! variables with typed constants, and the join plans the evaluator runs.
//!
//! [`build`] translates a parsed [`Program`] against a predicate table,
//! checking arities, argument types, capacity limits and rule safety, then
//! [stratifies](stratify) the result and computes [plans](plan).

pub mod plan;
pub mod stratify;

use std::fmt::{self, Display};

use thiserror::Error;

use crate::ast::{self, Atom, CmpOp, Literal, Program, Symbol, Term};
use crate::builtins::Builtin;
use crate::util::{HashMap, IndexMap};
use crate::{ArgType, Limits, SymbolTable, Tuple, Value, ValueKind};
pub use plan::{Plan, Step};
pub use stratify::stratify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PredId(pub u32);

impl PredId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for PredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Everything known about one predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredDef {
    pub name: Symbol,
    pub types: Vec<ArgType>,
    /// Argument names from the latest `.pred` declaration.
    pub arg_names: Vec<Option<Symbol>>,
    pub stratum: usize,
    /// Whether some rule of the current program derives this predicate.
    pub is_idb: bool,
}

impl PredDef {
    pub fn arity(&self) -> usize {
        self.types.len()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("predicate {pred} has arity {expected}, but is used with {found} arguments")]
    ArityMismatch {
        pred: Symbol,
        expected: usize,
        found: usize,
    },
    #[error("argument {column} of {pred} has type {expected}, found {found}")]
    TypeMismatch {
        pred: Symbol,
        column: usize,
        expected: ArgType,
        found: String,
    },
    #[error("argument {column} of {pred} is declared {declared}, but was already {existing}")]
    DeclarationConflict {
        pred: Symbol,
        column: usize,
        declared: ArgType,
        existing: ArgType,
    },
    #[error("argument {column} of {pred} is declared {ty}, but a stored fact holds a {found} value")]
    StoredFactConflict {
        pred: Symbol,
        column: usize,
        ty: ArgType,
        found: ValueKind,
    },
    #[error("variable {var} is used both as {first} and as {second} in rule `{rule}`")]
    VariableType {
        rule: String,
        var: Symbol,
        first: ArgType,
        second: ArgType,
    },
    #[error("unsafe rule `{rule}`: variable {var} in {position} is not bound by a positive body literal")]
    UnsafeVariable {
        rule: String,
        var: Symbol,
        position: &'static str,
    },
    #[error("unsafe rule `{rule}`: wildcard used in {position}")]
    UnsafeWildcard {
        rule: String,
        position: &'static str,
    },
    #[error("program is not stratifiable: {pred} depends negatively on itself")]
    NotStratifiable { pred: Symbol },
    #[error("`{0}` is a builtin and cannot be used as a predicate")]
    ReservedName(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("too many predicates (limit {limit})")]
    TooManyPredicates { limit: usize },
    #[error("predicate {pred} has arity {arity} (limit {limit})")]
    ArityTooLarge {
        pred: Symbol,
        arity: usize,
        limit: usize,
    },
    #[error("rule `{rule}` has {found} body literals (limit {limit})")]
    TooManyBodyLiterals {
        rule: String,
        found: usize,
        limit: usize,
    },
    #[error("rule `{rule}` has {found} variables (limit {limit})")]
    TooManyVariables {
        rule: String,
        found: usize,
        limit: usize,
    },
}

/// The predicates known to an engine, addressed by [`PredId`].
#[derive(Debug, Clone, Default)]
pub struct PredTable {
    defs: Vec<PredDef>,
    by_name: HashMap<Symbol, PredId>,
}

impl PredTable {
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, name: Symbol) -> Option<PredId> {
        self.by_name.get(&name).copied()
    }

    pub fn def(&self, id: PredId) -> &PredDef {
        &self.defs[id.index()]
    }

    pub(crate) fn def_mut(&mut self, id: PredId) -> &mut PredDef {
        &mut self.defs[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PredId, &PredDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, d)| (PredId(i as u32), d))
    }

    fn create(
        &mut self,
        name: Symbol,
        types: Vec<ArgType>,
        limits: &Limits,
    ) -> Result<PredId, crate::Error> {
        if Builtin::from_name(name.as_str()).is_some() {
            return Err(ValidationError::ReservedName(name.to_string()).into());
        }
        if self.defs.len() >= limits.max_predicates {
            return Err(CapacityError::TooManyPredicates {
                limit: limits.max_predicates,
            }
            .into());
        }
        if types.len() > limits.max_arity {
            return Err(CapacityError::ArityTooLarge {
                pred: name,
                arity: types.len(),
                limit: limits.max_arity,
            }
            .into());
        }
        let id = PredId(self.defs.len() as u32);
        log::trace!("new predicate {name}/{} as {id}", types.len());
        self.defs.push(PredDef {
            name,
            arg_names: vec![None; types.len()],
            types,
            stratum: 0,
            is_idb: false,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Declares a predicate, or narrows the types of an existing one.
    /// `Unknown` leaves a column as it is.
    pub fn declare(
        &mut self,
        name: Symbol,
        types: &[ArgType],
        limits: &Limits,
    ) -> Result<PredId, crate::Error> {
        let Some(id) = self.get(name) else {
            return self.create(name, types.to_vec(), limits);
        };
        let def = self.def_mut(id);
        if def.arity() != types.len() {
            return Err(ValidationError::ArityMismatch {
                pred: name,
                expected: def.arity(),
                found: types.len(),
            }
            .into());
        }
        for (column, (&declared, existing)) in types.iter().zip(def.types.iter_mut()).enumerate() {
            match (declared, *existing) {
                (ArgType::Unknown, _) => {}
                (d, ArgType::Unknown) => *existing = d,
                (d, e) if d == e => {}
                (d, e) => {
                    return Err(ValidationError::DeclarationConflict {
                        pred: name,
                        column,
                        declared: d,
                        existing: e,
                    }
                    .into())
                }
            }
        }
        Ok(id)
    }

    /// Looks a predicate up by name, creating it with unknown argument types
    /// if it does not exist yet.
    pub fn resolve(
        &mut self,
        name: Symbol,
        arity: usize,
        limits: &Limits,
    ) -> Result<PredId, crate::Error> {
        match self.get(name) {
            Some(id) if self.def(id).arity() == arity => Ok(id),
            Some(id) => Err(ValidationError::ArityMismatch {
                pred: name,
                expected: self.def(id).arity(),
                found: arity,
            }
            .into()),
            None => self.create(name, vec![ArgType::Unknown; arity], limits),
        }
    }
}

pub type VarId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrTerm {
    Var(VarId),
    Const(Value),
    Wildcard,
}

impl IrTerm {
    pub fn var(&self) -> Option<VarId> {
        match self {
            IrTerm::Var(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrAtom {
    pub pred: PredId,
    pub args: Vec<IrTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrLiteral {
    Atom(IrAtom),
    Not(IrAtom),
    Eq(IrTerm, IrTerm),
    Cmp(CmpOp, IrTerm, IrTerm),
    Builtin {
        builtin: Builtin,
        args: Vec<IrTerm>,
        negated: bool,
    },
}

impl IrLiteral {
    /// The variables that must be bound before this literal can be checked.
    /// Empty for positive atoms, which bind instead.
    pub fn required_vars(&self) -> Vec<VarId> {
        let terms: Vec<&IrTerm> = match self {
            IrLiteral::Atom(_) => vec![],
            IrLiteral::Not(a) => a.args.iter().collect(),
            IrLiteral::Eq(l, r) | IrLiteral::Cmp(_, l, r) => vec![l, r],
            IrLiteral::Builtin { args, .. } => args.iter().collect(),
        };
        terms.into_iter().filter_map(IrTerm::var).collect()
    }

    pub fn positive_pred(&self) -> Option<PredId> {
        match self {
            IrLiteral::Atom(a) => Some(a.pred),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IrRule {
    pub head: IrAtom,
    pub body: Vec<IrLiteral>,
    /// Source names of the variables, indexed by [`VarId`].
    pub vars: Vec<Symbol>,
    /// One plan per positive body literal, driving from its delta.
    pub plans: Vec<Plan>,
    /// A plan reading full relations only.
    pub naive: Plan,
    /// The rule as written, for messages.
    pub source: String,
}

/// A translated program, ready to be committed to an engine.
#[derive(Debug, Clone, Default)]
pub struct IrProgram {
    pub rules: Vec<IrRule>,
    pub facts: Vec<(PredId, Tuple)>,
    pub max_stratum: usize,
    pub clear_derived: bool,
}

/// Translates `program` into IR, registering its predicates in `preds`.
///
/// `preds` is updated in place (declarations narrow types, undeclared
/// predicates are created, strata are recomputed), so callers that need the
/// old table on failure should pass a copy.
pub fn build(
    program: &Program,
    preds: &mut PredTable,
    symbols: &mut dyn SymbolTable,
    limits: &Limits,
) -> Result<IrProgram, crate::Error> {
    for decl in &program.decls {
        let types: Vec<ArgType> = decl.args.iter().map(|a| a.ty).collect();
        let id = preds.declare(decl.name, &types, limits)?;
        preds.def_mut(id).arg_names = decl.args.iter().map(|a| Some(a.name)).collect();
    }

    let mut facts = Vec::with_capacity(program.facts.len());
    for fact in &program.facts {
        let pred = preds.resolve(fact.name, fact.args.len(), limits)?;
        let def = preds.def(pred);
        let values = fact
            .args
            .iter()
            .zip(&def.types)
            .enumerate()
            .map(|(column, (term, &ty))| {
                constant(term, ty, symbols).map_err(|found| ValidationError::TypeMismatch {
                    pred: def.name,
                    column,
                    expected: ty,
                    found,
                })
            })
            .collect::<Result<Tuple, _>>()?;
        facts.push((pred, values));
    }

    let mut rules = Vec::with_capacity(program.rules.len());
    for rule in &program.rules {
        rules.push(RuleBuilder::new(rule, preds, symbols, limits).build()?);
    }

    let max_stratum = stratify(preds, &rules)?;
    for rule in &mut rules {
        rule.plans = plan::driver_plans(rule);
        rule.naive = Plan::new(rule, None);
    }
    log::debug!(
        "built {} rules over {} predicates, {} strata",
        rules.len(),
        preds.len(),
        max_stratum + 1
    );
    Ok(IrProgram {
        rules,
        facts,
        max_stratum,
        clear_derived: program.clear_derived,
    })
}

/// The value of a ground term stored under a column of type `ty`. On a type
/// error, returns the offending term as written.
fn constant(term: &Term, ty: ArgType, symbols: &mut dyn SymbolTable) -> Result<Value, String> {
    match (term, ty) {
        (Term::Str(_) | Term::Name(_), ArgType::Int | ArgType::Range) => Err(term.to_string()),
        (Term::Str(s), _) => Ok(Value::Symbol(symbols.intern(s))),
        (Term::Name(n), _) => Ok(Value::Symbol(symbols.intern(n.as_str()))),
        (Term::Int(_), ArgType::Symbol) => Err(term.to_string()),
        (Term::Int(i), ArgType::Range) => Ok(Value::Range(*i)),
        (Term::Int(i), _) => Ok(Value::Int(*i)),
        (Term::Var(_) | Term::Wildcard, _) => Err(term.to_string()),
    }
}

struct RuleBuilder<'a> {
    rule: &'a ast::Rule,
    preds: &'a mut PredTable,
    symbols: &'a mut dyn SymbolTable,
    limits: &'a Limits,
    source: String,
    /// Variables in order of first appearance, with their inferred type.
    vars: IndexMap<Symbol, ArgType>,
}

impl<'a> RuleBuilder<'a> {
    fn new(
        rule: &'a ast::Rule,
        preds: &'a mut PredTable,
        symbols: &'a mut dyn SymbolTable,
        limits: &'a Limits,
    ) -> Self {
        RuleBuilder {
            rule,
            preds,
            symbols,
            limits,
            source: rule.to_string(),
            vars: Default::default(),
        }
    }

    fn build(mut self) -> Result<IrRule, crate::Error> {
        let rule = self.rule;
        if rule.body.len() > self.limits.max_body_literals {
            return Err(CapacityError::TooManyBodyLiterals {
                rule: self.source.clone(),
                found: rule.body.len(),
                limit: self.limits.max_body_literals,
            }
            .into());
        }

        // Positive atoms bind variables and fix their types.
        let mut body: Vec<Option<IrLiteral>> = vec![None; rule.body.len()];
        for (i, lit) in rule.body.iter().enumerate() {
            if let Literal::Atom(atom) = lit {
                body[i] = Some(IrLiteral::Atom(self.atom(atom, true)?));
            }
        }
        let bound = self.vars.len();

        for (i, lit) in rule.body.iter().enumerate() {
            let ir = match lit {
                Literal::Atom(_) => continue,
                Literal::Not(atom) => {
                    let atom = self.atom(atom, false)?;
                    self.check_bound(&atom.args, bound, "a negated literal", true)?;
                    IrLiteral::Not(atom)
                }
                Literal::Eq(l, r) => {
                    let (l, r) = self.operands(l, r)?;
                    self.check_bound(&[l, r], bound, "an equality", false)?;
                    IrLiteral::Eq(l, r)
                }
                Literal::Cmp(op, l, r) => {
                    let (l, r) = self.operands(l, r)?;
                    self.check_bound(&[l, r], bound, "a comparison", false)?;
                    IrLiteral::Cmp(*op, l, r)
                }
                Literal::Builtin {
                    builtin,
                    args,
                    negated,
                } => {
                    let args = args
                        .iter()
                        .map(|t| self.term(t, ArgType::Unknown))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.check_bound(&args, bound, "a builtin call", false)?;
                    IrLiteral::Builtin {
                        builtin: *builtin,
                        args,
                        negated: *negated,
                    }
                }
            };
            body[i] = Some(ir);
        }

        let head = self.atom(&rule.head, false)?;
        self.check_bound(&head.args, bound, "the head", false)?;

        if self.vars.len() > self.limits.max_rule_vars {
            return Err(CapacityError::TooManyVariables {
                rule: self.source.clone(),
                found: self.vars.len(),
                limit: self.limits.max_rule_vars,
            }
            .into());
        }

        Ok(IrRule {
            head,
            body: body.into_iter().flatten().collect(),
            vars: self.vars.keys().copied().collect(),
            plans: vec![],
            naive: Plan::default(),
            source: self.source,
        })
    }

    /// Translates an atom. In a positive atom (`binding`), variables are
    /// registered and take the column's type; elsewhere their type is
    /// checked against the column's.
    fn atom(&mut self, atom: &Atom, binding: bool) -> Result<IrAtom, crate::Error> {
        let pred = self.preds.resolve(atom.name, atom.args.len(), self.limits)?;
        let types = self.preds.def(pred).types.clone();
        let mut args = Vec::with_capacity(atom.args.len());
        for (column, (term, &ty)) in atom.args.iter().zip(&types).enumerate() {
            let arg = match term {
                Term::Var(v) => {
                    if binding || self.vars.contains_key(v) {
                        self.unify(*v, ty)?;
                    }
                    self.var(*v)
                }
                Term::Wildcard => IrTerm::Wildcard,
                _ => IrTerm::Const(constant(term, ty, self.symbols).map_err(|found| {
                    ValidationError::TypeMismatch {
                        pred: atom.name,
                        column,
                        expected: ty,
                        found,
                    }
                })?),
            };
            args.push(arg);
        }
        Ok(IrAtom { pred, args })
    }

    fn var(&mut self, v: Symbol) -> IrTerm {
        let entry = self.vars.entry(v);
        let id = entry.index();
        entry.or_insert(ArgType::Unknown);
        IrTerm::Var(id)
    }

    /// Records that `v` is used at type `ty`.
    fn unify(&mut self, v: Symbol, ty: ArgType) -> Result<(), ValidationError> {
        let known = self.vars.entry(v).or_insert(ArgType::Unknown);
        match (*known, ty) {
            (_, ArgType::Unknown) => Ok(()),
            (ArgType::Unknown, ty) => {
                *known = ty;
                Ok(())
            }
            (k, ty) if k == ty => Ok(()),
            (k, ty) => Err(ValidationError::VariableType {
                rule: self.source.clone(),
                var: v,
                first: k,
                second: ty,
            }),
        }
    }

    /// Translates a term outside of an atom. Integer literals take the type
    /// `hint`, so that `X < 3` compares ranges when `X` is a range.
    fn term(&mut self, term: &Term, hint: ArgType) -> Result<IrTerm, ValidationError> {
        Ok(match term {
            Term::Var(v) => self.var(*v),
            Term::Wildcard => IrTerm::Wildcard,
            Term::Int(i) if hint == ArgType::Range => IrTerm::Const(Value::Range(*i)),
            Term::Int(i) => IrTerm::Const(Value::Int(*i)),
            Term::Str(s) => IrTerm::Const(Value::Symbol(self.symbols.intern(s))),
            Term::Name(n) => IrTerm::Const(Value::Symbol(self.symbols.intern(n.as_str()))),
        })
    }

    fn operands(&mut self, l: &Term, r: &Term) -> Result<(IrTerm, IrTerm), ValidationError> {
        let (lt, rt) = (self.var_type(l), self.var_type(r));
        Ok((self.term(l, rt)?, self.term(r, lt)?))
    }

    fn var_type(&self, t: &Term) -> ArgType {
        match t {
            Term::Var(v) => self.vars.get(v).copied().unwrap_or_default(),
            _ => ArgType::Unknown,
        }
    }

    /// Every variable among `terms` must have been bound by a positive atom,
    /// that is, have an id below `bound`.
    fn check_bound(
        &self,
        terms: &[IrTerm],
        bound: usize,
        position: &'static str,
        wildcards_allowed: bool,
    ) -> Result<(), ValidationError> {
        for t in terms {
            match t {
                IrTerm::Var(v) if *v >= bound => {
                    return Err(ValidationError::UnsafeVariable {
                        rule: self.source.clone(),
                        var: self.vars.get_index(*v).map(|(s, _)| *s).unwrap_or_else(|| "_".into()),
                        position,
                    })
                }
                IrTerm::Wildcard if !wildcards_allowed => {
                    return Err(ValidationError::UnsafeWildcard {
                        rule: self.source.clone(),
                        position,
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;
    use crate::symbol::Interner;
    use crate::Error;

    fn build_str(src: &str) -> Result<(IrProgram, PredTable), Error> {
        let program = parse_program(src)?;
        let mut preds = PredTable::default();
        let mut symbols = Interner::default();
        let ir = build(&program, &mut preds, &mut symbols, &Limits::default())?;
        Ok((ir, preds))
    }

    #[test]
    fn translates_the_path_program() {
        let (ir, preds) = build_str(
            r#".pred edge(a: symbol, b: symbol).
               edge("x", "y").
               path(A, B) :- edge(A, B).
               path(A, C) :- path(A, B), edge(B, C)."#,
        )
        .unwrap();
        assert_eq!(ir.facts.len(), 1);
        assert_eq!(ir.rules.len(), 2);
        let path = preds.get("path".into()).unwrap();
        assert!(preds.def(path).is_idb);
        assert_eq!(preds.def(path).types, vec![ArgType::Unknown; 2]);
        assert_eq!(ir.rules[1].vars.len(), 3);
        assert_eq!(ir.rules[1].plans.len(), 2);
    }

    #[test]
    fn literals_are_typed_by_column() {
        let (ir, _) = build_str(".pred v(n: symbol, lo: range). v(serde, 3).").unwrap();
        assert_eq!(ir.facts[0].1[1], Value::Range(3));
        assert!(matches!(ir.facts[0].1[0], Value::Symbol(_)));

        let err = build_str(".pred v(n: symbol, lo: range). v(3, 3).").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::TypeMismatch { column: 0, .. })
        ));
        let err = build_str(".pred v(n: int). v(\"x\").").unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::TypeMismatch { .. })));
    }

    #[test]
    fn comparison_literals_follow_the_variable_type() {
        let (ir, _) = build_str(".pred v(lo: range). w(X) :- v(X), X < 5.").unwrap();
        assert_eq!(
            ir.rules[0].body[1],
            IrLiteral::Cmp(CmpOp::Lt, IrTerm::Var(0), IrTerm::Const(Value::Range(5)))
        );
    }

    #[test]
    fn unsafe_rules_are_rejected() {
        for src in [
            "p(X) :- q(Y).",
            "p(X) :- q(X), not r(Y).",
            "p(X) :- q(X), Y != X.",
            "p(X) :- q(X), X = Y.",
            "p(X) :- q(X), contains(X, Y).",
        ] {
            let err = build_str(src).unwrap_err();
            assert!(
                matches!(err, Error::Validation(ValidationError::UnsafeVariable { .. })),
                "{src}: {err}"
            );
        }
        let err = build_str("p(_) :- q(X).").unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnsafeWildcard { .. })));
        // wildcards are fine in negations
        build_str("p(X) :- q(X), not r(X, _).").unwrap();
    }

    #[test]
    fn arity_and_declarations_are_checked() {
        let err = build_str("e(1, 2). p(X) :- e(X).").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::ArityMismatch { expected: 2, found: 1, .. })
        ));
        let err = build_str(".pred e(a: int). .pred e(a: symbol).").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DeclarationConflict { .. })
        ));
        let (_, preds) = build_str("e(1). .pred e(a: int).").unwrap();
        assert_eq!(preds.def(PredId(0)).types, vec![ArgType::Int]);
    }

    #[test]
    fn variables_have_one_type() {
        let err = build_str(".pred a(x: int). .pred b(x: symbol). c(X) :- a(X), b(X).")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::VariableType { .. })));
    }

    #[test]
    fn capacity_limits_apply() {
        let program = parse_program("p(A) :- q(A), q(A), q(A).").unwrap();
        let limits = Limits {
            max_body_literals: 2,
            ..Limits::default()
        };
        let err = build(
            &program,
            &mut PredTable::default(),
            &mut Interner::default(),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Capacity(CapacityError::TooManyBodyLiterals { found: 3, .. })
        ));

        let limits = Limits {
            max_predicates: 1,
            ..Limits::default()
        };
        let err = build(
            &parse_program("a(1). b(1).").unwrap(),
            &mut PredTable::default(),
            &mut Interner::default(),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Capacity(CapacityError::TooManyPredicates { .. })));
    }
}
