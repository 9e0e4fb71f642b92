//! Stratified semi-naive evaluation.
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

use instant::{Duration, Instant};
use smallvec::SmallVec;

use crate::ast::CmpOp;
use crate::builtins::{Builtin, Matcher};
use crate::ir::{IrAtom, IrLiteral, IrRule, IrTerm, Plan, PredId, PredTable, Step, ValidationError};
use crate::relation::{Relation, Source};
use crate::util::{truncate_message, HashMap};
use crate::{Config, Error, SymbolTable, Tuple, Value};

/// Called after every round with the current stratum. Returning `true`
/// reports a change made outside the engine and forces another round.
pub type RoundHook = Box<dyn FnMut(usize) -> bool>;

/// Statistics of one call to [`Engine::evaluate`](crate::Engine::evaluate).
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Whether any relation grew.
    pub updated: bool,
    pub rounds_per_stratum: Vec<usize>,
    pub time_per_stratum: Vec<Duration>,
    /// Tuples added to each predicate, by predicate name.
    pub derived_per_pred: HashMap<String, usize>,
    /// Head tuples produced by each rule, keyed by the rule's source text,
    /// including ones already known.
    pub num_matches_per_rule: HashMap<String, usize>,
    pub search_time_per_rule: HashMap<String, Duration>,
}

impl RunReport {
    pub fn total_rounds(&self) -> usize {
        self.rounds_per_stratum.iter().sum()
    }

    pub fn total_derived(&self) -> usize {
        self.derived_per_pred.values().sum()
    }

    fn add_rule(&mut self, rule: &str, matches: usize, time: Duration) {
        *self.num_matches_per_rule.entry_ref(rule).or_default() += matches;
        *self.search_time_per_rule.entry_ref(rule).or_default() += time;
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut rules: Vec<_> = self.search_time_per_rule.iter().collect();
        rules.sort_by_key(|(_, time)| std::cmp::Reverse(**time));
        for (rule, time) in rules {
            let name = truncate_message(rule.replace('\n', " "), 80);
            let matches = self.num_matches_per_rule.get(rule).copied().unwrap_or(0);
            writeln!(
                f,
                "Rule {name}: search {:.3}s, num matches {matches}",
                time.as_secs_f64()
            )?;
        }
        for (stratum, (rounds, time)) in self
            .rounds_per_stratum
            .iter()
            .zip(&self.time_per_stratum)
            .enumerate()
        {
            writeln!(
                f,
                "Stratum {stratum}: {rounds} rounds, {:.3}s",
                time.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

pub(crate) struct Evaluator<'a> {
    pub(crate) preds: &'a PredTable,
    pub(crate) rules: &'a [IrRule],
    pub(crate) relations: &'a mut [Relation],
    pub(crate) symbols: &'a dyn SymbolTable,
    pub(crate) matcher: &'a dyn Matcher,
    pub(crate) config: &'a Config,
    pub(crate) hook: Option<&'a mut RoundHook>,
}

impl Evaluator<'_> {
    /// Runs every stratum up to `max_stratum` to a fixpoint.
    pub(crate) fn run(mut self, max_stratum: usize) -> Result<RunReport, Error> {
        let mut report = RunReport::default();
        for stratum in 0..=max_stratum {
            let start = Instant::now();
            let rounds = self.run_stratum(stratum, &mut report)?;
            report.rounds_per_stratum.push(rounds);
            report.time_per_stratum.push(start.elapsed());
        }
        report.updated = report.total_derived() > 0;
        Ok(report)
    }

    fn run_stratum(&mut self, stratum: usize, report: &mut RunReport) -> Result<usize, Error> {
        let (table, all_rules) = (self.preds, self.rules);
        let preds: Vec<PredId> = table
            .iter()
            .filter(|(_, def)| def.stratum == stratum)
            .map(|(id, _)| id)
            .collect();
        let rules: Vec<&IrRule> = all_rules
            .iter()
            .filter(|r| table.def(r.head.pred).stratum == stratum)
            .collect();
        if rules.is_empty() && self.hook.is_none() {
            for &p in &preds {
                self.relations[p.index()].acknowledge_provider_delta();
            }
            return Ok(0);
        }
        for &p in &preds {
            self.relations[p.index()].prepare_delta_from_base();
        }
        log::debug!(
            "stratum {stratum}: {} predicates, {} rules",
            preds.len(),
            rules.len()
        );

        let mut round = 0;
        loop {
            round += 1;
            for &p in &preds {
                self.relations[p.index()].clear_next();
            }
            for &rule in &rules {
                for plan in self.plans_for(rule, stratum, round) {
                    let start = Instant::now();
                    let derived = self.search(rule, plan)?;
                    report.add_rule(&rule.source, derived.len(), start.elapsed());
                    log::trace!("{} produced {} tuples", rule.source, derived.len());
                    self.stage(&rule.head, derived)?;
                }
            }

            let mut changed = false;
            for &p in &preds {
                changed |= self.relations[p.index()].promote_next()?;
            }
            for &p in &preds {
                let relation = &mut self.relations[p.index()];
                if relation.sync_provider_delta() {
                    changed = true;
                    *report
                        .derived_per_pred
                        .entry_ref(table.def(p).name.as_str())
                        .or_default() += relation.delta_len();
                }
            }
            if let Some(hook) = self.hook.as_mut() {
                if hook(stratum) {
                    log::debug!("stratum {stratum}: round hook reported a change");
                    changed = true;
                }
            }
            log::debug!("stratum {stratum}: round {round} done, changed: {changed}");
            if !changed {
                return Ok(round);
            }
        }
    }

    /// The plans to run for `rule` in the given round.
    fn plans_for<'r>(&self, rule: &'r IrRule, stratum: usize, round: usize) -> Vec<&'r Plan> {
        if !self.config.seminaive {
            return vec![&rule.naive];
        }
        let recursive: Vec<&Plan> = rule
            .plans
            .iter()
            .filter(|plan| {
                plan.driver
                    .and_then(|d| rule.body[d].positive_pred())
                    .is_some_and(|p| self.preds.def(p).stratum == stratum)
            })
            .collect();
        match (recursive.is_empty(), round) {
            (false, _) => recursive,
            (true, 1) => vec![&rule.naive],
            (true, _) => vec![],
        }
    }

    fn search(&self, rule: &IrRule, plan: &Plan) -> Result<Vec<Tuple>, Error> {
        let search = Search {
            relations: &*self.relations,
            symbols: self.symbols,
            matcher: self.matcher,
            rule,
        };
        let mut out = vec![];
        search.step(&plan.steps, smallvec::smallvec![None; rule.vars.len()], &mut out)?;
        Ok(out)
    }

    fn stage(&mut self, head: &IrAtom, derived: Vec<Tuple>) -> Result<(), Error> {
        let def = self.preds.def(head.pred);
        let relation = &mut self.relations[head.pred.index()];
        for t in derived {
            for (column, (v, ty)) in t.iter().zip(&def.types).enumerate() {
                if !ty.admits(v.kind()) {
                    return Err(ValidationError::TypeMismatch {
                        pred: def.name,
                        column,
                        expected: *ty,
                        found: v.kind().to_string(),
                    }
                    .into());
                }
            }
            relation.next_insert_unique(t)?;
        }
        Ok(())
    }
}

type Env = SmallVec<[Option<Value>; 8]>;

/// Matching of one rule body against read-only relations.
struct Search<'a> {
    relations: &'a [Relation],
    symbols: &'a dyn SymbolTable,
    matcher: &'a dyn Matcher,
    rule: &'a IrRule,
}

impl Search<'_> {
    fn step(&self, steps: &[Step], env: Env, out: &mut Vec<Tuple>) -> Result<(), Error> {
        let Some((first, rest)) = steps.split_first() else {
            out.push(self.instantiate(&self.rule.head, &env)?);
            return Ok(());
        };
        match *first {
            Step::Filter { literal } => {
                if self.check(&self.rule.body[literal], &env)? {
                    self.step(rest, env, out)?;
                }
                Ok(())
            }
            Step::Scan {
                literal,
                delta,
                key,
            } => {
                let IrLiteral::Atom(atom) = &self.rule.body[literal] else {
                    return Err(Error::Internal(format!(
                        "scan of a non-atom literal in `{}`",
                        self.rule.source
                    )));
                };
                let relation = &self.relations[atom.pred.index()];
                if !delta {
                    if let Some(t) = ground(&atom.args, &env) {
                        if relation.contains(&t)? {
                            self.step(rest, env, out)?;
                        }
                        return Ok(());
                    }
                }
                let key = match key {
                    Some(c) => Some((c, value(&atom.args[c], &env).ok_or_else(|| self.unbound())?)),
                    None => None,
                };
                let source = if delta { Source::Delta } else { Source::Full };
                relation.scan(source, key, |t| {
                    let mut env = env.clone();
                    if bind(&atom.args, t, &mut env) {
                        self.step(rest, env, out)?;
                    }
                    Ok::<_, Error>(true)
                })
            }
        }
    }

    fn unbound(&self) -> Error {
        Error::Internal(format!("unbound variable in `{}`", self.rule.source))
    }

    fn resolve(&self, t: &IrTerm, env: &Env) -> Result<Value, Error> {
        value(t, env).ok_or_else(|| self.unbound())
    }

    fn instantiate(&self, atom: &IrAtom, env: &Env) -> Result<Tuple, Error> {
        atom.args.iter().map(|t| self.resolve(t, env)).collect()
    }

    fn check(&self, literal: &IrLiteral, env: &Env) -> Result<bool, Error> {
        match literal {
            IrLiteral::Atom(_) => Err(Error::Internal(format!(
                "positive atom used as a filter in `{}`",
                self.rule.source
            ))),
            IrLiteral::Not(atom) => {
                let relation = &self.relations[atom.pred.index()];
                if let Some(t) = ground(&atom.args, env) {
                    return Ok(!relation.contains(&t)?);
                }
                let key = atom
                    .args
                    .iter()
                    .enumerate()
                    .find_map(|(c, t)| value(t, env).map(|v| (c, v)));
                let mut found = false;
                relation.scan(Source::Full, key, |t| {
                    found = bind(&atom.args, t, &mut env.clone());
                    Ok::<_, Error>(!found)
                })?;
                Ok(!found)
            }
            IrLiteral::Eq(l, r) => Ok(self.resolve(l, env)? == self.resolve(r, env)?),
            IrLiteral::Cmp(op, l, r) => {
                let (l, r) = (self.resolve(l, env)?, self.resolve(r, env)?);
                Ok(match op {
                    CmpOp::Ne => l != r,
                    CmpOp::Lt => self.compare(l, r).is_lt(),
                    CmpOp::Le => self.compare(l, r).is_le(),
                    CmpOp::Gt => self.compare(l, r).is_gt(),
                    CmpOp::Ge => self.compare(l, r).is_ge(),
                })
            }
            IrLiteral::Builtin {
                builtin,
                args,
                negated,
            } => {
                let holds = self.builtin(*builtin, args, env)?;
                Ok(holds != *negated)
            }
        }
    }

    /// Integers and ranges compare numerically, symbols by their text, and
    /// values of different kinds by kind.
    fn compare(&self, l: Value, r: Value) -> Ordering {
        match (l, r) {
            (Value::Int(a) | Value::Range(a), Value::Int(b) | Value::Range(b)) => a.cmp(&b),
            (Value::Symbol(a), Value::Symbol(b)) => {
                match (self.symbols.resolve(a), self.symbols.resolve(b)) {
                    (Some(a), Some(b)) => a.cmp(b),
                    _ => a.cmp(&b),
                }
            }
            (l, r) => l.cmp(&r),
        }
    }

    fn builtin(&self, builtin: Builtin, args: &[IrTerm], env: &Env) -> Result<bool, Error> {
        let mut text: SmallVec<[String; 2]> = SmallVec::new();
        for arg in args {
            match self.resolve(arg, env)? {
                Value::Symbol(s) => match self.symbols.resolve(s) {
                    Some(s) => text.push(s.to_string()),
                    None => return Ok(false),
                },
                Value::Int(i) | Value::Range(i) => text.push(i.to_string()),
                Value::Fact(_) => return Ok(false),
            }
        }
        match text.as_slice() {
            [a, b] => Ok(builtin.apply(self.matcher, a, b)?),
            _ => Err(Error::Internal(format!(
                "builtin {} called with {} arguments",
                builtin.name(),
                text.len()
            ))),
        }
    }
}

fn value(t: &IrTerm, env: &Env) -> Option<Value> {
    match t {
        IrTerm::Var(v) => env[*v],
        IrTerm::Const(c) => Some(*c),
        IrTerm::Wildcard => None,
    }
}

/// The tuple `args` denotes if every argument is known.
fn ground(args: &[IrTerm], env: &Env) -> Option<Tuple> {
    args.iter().map(|t| value(t, env)).collect()
}

/// Matches `tuple` against `args`, extending `env`. Returns whether the
/// tuple matched; `env` is unspecified otherwise.
fn bind(args: &[IrTerm], tuple: &[Value], env: &mut Env) -> bool {
    args.iter().zip(tuple).all(|(arg, v)| match arg {
        IrTerm::Wildcard => true,
        IrTerm::Const(c) => c == v,
        IrTerm::Var(x) => match env[*x] {
            Some(bound) => bound == *v,
            None => {
                env[*x] = Some(*v);
                true
            }
        },
    })
}
