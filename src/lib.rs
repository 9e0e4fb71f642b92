//! # rulr
//! rulr is a small Datalog engine for checking policy rules over facts
//! supplied by a host program.
//!
//! A program declares predicates, states ground facts and derives new facts
//! with rules that may use negation, comparisons and a few string builtins:
//!
//! ```text
//! .pred edge(a: symbol, b: symbol).
//! edge("x", "y"). edge("y", "z").
//! path(A, B) :- edge(A, B).
//! path(A, C) :- path(A, B), edge(B, C).
//! ```
//!
//! Programs are stratified so that negation only observes complete
//! relations, and each stratum is evaluated semi-naively. A relation can be
//! backed by a [`RelationProvider`] instead of explicit tuples, such as
//! [`Eqrel`] for equivalence relations or the [`EGraph`] providers for
//! congruence closure.
pub mod ast;
pub mod builtins;
mod cli;
mod eval;
mod index;
pub mod ir;
pub mod provider;
mod relation;
pub mod symbol;
pub mod unionfind;
pub mod util;
mod value;

use std::borrow::Cow;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use thiserror::Error;

use ast::{DecodeError, EncodeError, ParseError, Program};
use builtins::{MatchError, Matcher, RegexMatcher};
use ir::{CapacityError, IrProgram, PredDef, PredTable, ValidationError};
use relation::Relation;
use util::{truncate_message, IndexSet};

#[cfg(feature = "bin")]
pub use cli::bin::*;
pub use cli::read_program;
pub use eval::{RoundHook, RunReport};
pub use ir::PredId;
pub use provider::{Congruence, EGraph, EgraphEq, Eqrel, Explicit, ProviderError, RelationProvider};
pub use symbol::{Interner, SymbolTable};
pub use value::{tuple, ArgType, FactId, Tuple, Value, ValueKind};

/// Messages returned by [`Error::bounded_message`] are at most this long.
pub const MAX_ERROR_MESSAGE: usize = 512;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Builtin(#[from] MatchError),
    #[error("IO error: {0}: {1}")]
    Io(PathBuf, io::Error),
    #[error("unknown predicate {0}")]
    UnknownPredicate(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The error message, truncated to [`MAX_ERROR_MESSAGE`] bytes.
    pub fn bounded_message(&self) -> String {
        truncate_message(self.to_string(), MAX_ERROR_MESSAGE)
    }
}

/// Capacity bounds checked when predicates are registered and rules are
/// loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_predicates: usize,
    pub max_body_literals: usize,
    pub max_rule_vars: usize,
    pub max_arity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_predicates: 1024,
            max_body_literals: 64,
            max_rule_vars: 64,
            max_arity: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Drive rules from the facts derived in the previous round only. When
    /// off, every rule is matched against full relations in every round.
    pub seminaive: bool,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            seminaive: true,
            limits: Limits::default(),
        }
    }
}

/// Interned nested tuples, the payload of [`Value::Fact`].
#[derive(Debug, Clone, Default)]
pub struct FactTable {
    facts: IndexSet<Tuple>,
}

impl FactTable {
    pub fn intern(&mut self, values: &[Value]) -> FactId {
        if let Some(i) = self.facts.get_index_of(values) {
            return FactId(i as u32);
        }
        let (i, _) = self.facts.insert_full(Tuple::from_slice(values));
        FactId(i as u32)
    }

    pub fn get(&self, id: FactId) -> Option<&[Value]> {
        self.facts.get_index(id.0 as usize).map(|t| t.as_slice())
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// A source of host facts for one predicate, polled at the start of every
/// evaluation. A lighter alternative to a [`RelationProvider`].
pub trait FactSource {
    fn facts(&mut self) -> Vec<Tuple>;
}

impl<F: FnMut() -> Vec<Tuple>> FactSource for F {
    fn facts(&mut self) -> Vec<Tuple> {
        self()
    }
}

/// A read-only snapshot of one relation.
#[derive(Debug, Clone)]
pub struct RelationView<'a> {
    pub pred: PredId,
    pub tuples: Cow<'a, [Tuple]>,
}

impl RelationView<'_> {
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Value]> {
        self.tuples.iter().map(|t| t.as_slice())
    }
}

/// The engine: predicates, their relations and the loaded program.
pub struct Engine {
    config: Config,
    symbols: Box<dyn SymbolTable>,
    matcher: Box<dyn Matcher>,
    preds: PredTable,
    relations: Vec<Relation>,
    program: IrProgram,
    facts: FactTable,
    /// Program facts staged by a load, inserted by the next evaluation.
    staged: Vec<(PredId, Tuple)>,
    sources: Vec<(PredId, Box<dyn FactSource>)>,
    round_hook: Option<RoundHook>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Engine {
            config,
            symbols: Box::<Interner>::default(),
            matcher: Box::<RegexMatcher>::default(),
            preds: Default::default(),
            relations: vec![],
            program: Default::default(),
            facts: Default::default(),
            staged: vec![],
            sources: vec![],
            round_hook: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_seminaive(&mut self, seminaive: bool) {
        self.config.seminaive = seminaive;
    }

    /// Replaces the symbol table. Symbols already stored in relations keep
    /// their ids, so this should happen before any fact is inserted.
    pub fn set_symbol_table(&mut self, symbols: Box<dyn SymbolTable>) {
        self.symbols = symbols;
    }

    pub fn symbols(&self) -> &dyn SymbolTable {
        &*self.symbols
    }

    pub fn intern(&mut self, s: &str) -> Value {
        Value::Symbol(self.symbols.intern(s))
    }

    /// Replaces the implementation of the `match` builtin.
    pub fn set_matcher(&mut self, matcher: Box<dyn Matcher>) {
        self.matcher = matcher;
    }

    fn sync_relations(&mut self) {
        for (id, def) in self.preds.iter().skip(self.relations.len()) {
            log::trace!("relation for {} ({id})", def.name);
            self.relations.push(Relation::new(def.arity()));
        }
    }

    /// Registers a predicate, or narrows the argument types of a known one.
    pub fn declare_predicate(&mut self, name: &str, types: &[ArgType]) -> Result<PredId, Error> {
        let mut preds = self.preds.clone();
        let id = preds.declare(name.into(), types, &self.config.limits)?;
        self.check_stored_facts(&preds)?;
        self.preds = preds;
        self.sync_relations();
        Ok(id)
    }

    pub fn pred_id(&self, name: &str) -> Option<PredId> {
        self.preds.get(name.into())
    }

    pub fn pred_name(&self, pred: PredId) -> Option<&str> {
        self.pred_def(pred).map(|d| d.name.as_str())
    }

    pub fn pred_def(&self, pred: PredId) -> Option<&PredDef> {
        (pred.index() < self.preds.len()).then(|| self.preds.def(pred))
    }

    pub fn preds(&self) -> &PredTable {
        &self.preds
    }

    fn known(&self, pred: PredId) -> Result<&PredDef, Error> {
        self.pred_def(pred)
            .ok_or_else(|| Error::UnknownPredicate(pred.to_string()))
    }

    /// Backs `pred` with `provider`. Facts already stored are moved into it.
    pub fn set_provider(
        &mut self,
        pred: PredId,
        provider: Box<dyn RelationProvider>,
    ) -> Result<(), Error> {
        let def = self.known(pred)?;
        if provider.arity() != def.arity() {
            return Err(ProviderError::Arity {
                provider: provider.name().to_string(),
                expected: def.arity(),
                found: provider.arity(),
            }
            .into());
        }
        log::debug!("{} is now backed by {}", def.name, provider.name());
        self.relations[pred.index()].set_provider(provider)?;
        Ok(())
    }

    /// Registers a source of host facts for `pred`, polled by every
    /// [`Engine::evaluate`].
    pub fn set_fact_source(
        &mut self,
        pred: PredId,
        source: impl FactSource + 'static,
    ) -> Result<(), Error> {
        self.known(pred)?;
        self.sources.push((pred, Box::new(source)));
        Ok(())
    }

    /// Inserts a host fact. Host facts survive [`Engine::clear_derived`].
    pub fn insert_fact(&mut self, pred: PredId, values: &[Value]) -> Result<bool, Error> {
        let def = self.known(pred)?;
        if values.len() != def.arity() {
            return Err(ValidationError::ArityMismatch {
                pred: def.name,
                expected: def.arity(),
                found: values.len(),
            }
            .into());
        }
        for (column, (v, ty)) in values.iter().zip(&def.types).enumerate() {
            if !ty.admits(v.kind()) {
                return Err(ValidationError::TypeMismatch {
                    pred: def.name,
                    column,
                    expected: *ty,
                    found: self.render(*v),
                }
                .into());
            }
        }
        Ok(self.relations[pred.index()].insert_fact(values)?)
    }

    pub fn intern_fact(&mut self, values: &[Value]) -> Value {
        Value::Fact(self.facts.intern(values))
    }

    pub fn lookup_fact(&self, id: FactId) -> Option<&[Value]> {
        self.facts.get(id)
    }

    /// Parses and loads rule source. See [`Engine::load_program`].
    pub fn load_str(&mut self, source: &str) -> Result<(), Error> {
        let program = ast::parse_program(source)?;
        self.load_program(&program)
    }

    /// Loads a file holding either rule source or a compiled program,
    /// recognized by its magic bytes.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
        if ast::is_compiled(&bytes) {
            log::debug!("loading compiled program {}", path.display());
            let program = ast::decode_program(&bytes)?;
            return self.load_program(&program);
        }
        let source = std::str::from_utf8(&bytes).map_err(|e| {
            Error::Io(
                path.to_path_buf(),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;
        self.load_str(source)
    }

    /// Installs `program`, replacing the rules of the previous one.
    /// Relations keep their contents unless the program starts with
    /// `.clear_derived()`.
    ///
    /// The program's facts are checked here but staged: they become host
    /// facts at the start of the next [`Engine::evaluate`], where a provider
    /// rejecting one of them is reported. On error the engine is left as it
    /// was.
    pub fn load_program(&mut self, program: &Program) -> Result<(), Error> {
        let mut preds = self.preds.clone();
        let mut built = ir::build(program, &mut preds, &mut *self.symbols, &self.config.limits)?;
        self.check_stored_facts(&preds)?;

        if built.clear_derived {
            self.clear_derived();
        }
        self.preds = preds;
        self.sync_relations();
        for rule in &built.rules {
            for plan in rule.plans.iter().chain([&rule.naive]) {
                for (pred, column) in plan.index_requests(rule) {
                    self.relations[pred.index()].ensure_index(column);
                }
            }
        }
        log::info!(
            "loaded {} declarations, {} facts and {} rules",
            program.decls.len(),
            built.facts.len(),
            built.rules.len()
        );
        self.staged.append(&mut built.facts);
        self.program = built;
        Ok(())
    }

    /// Inserts the staged program facts. A fact that fails stays staged
    /// together with the ones after it.
    fn insert_staged(&mut self) -> Result<(), Error> {
        let mut staged = mem::take(&mut self.staged).into_iter();
        while let Some((pred, values)) = staged.next() {
            if let Err(e) = self.relations[pred.index()].insert_fact(&values) {
                self.staged = std::iter::once((pred, values)).chain(staged).collect();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Type narrowing in `preds` must agree with what the relations hold.
    fn check_stored_facts(&self, preds: &PredTable) -> Result<(), Error> {
        for (id, relation) in self.relations.iter().enumerate() {
            let id = PredId(id as u32);
            let (old, new) = (self.preds.def(id), preds.def(id));
            let narrowed: Vec<usize> = (0..new.arity())
                .filter(|&c| new.types[c] != old.types[c])
                .collect();
            if narrowed.is_empty() {
                continue;
            }
            let staged = self.staged.iter().filter(|(p, _)| *p == id).map(|(_, t)| t);
            let stored = relation.tuples().unwrap_or_default();
            for t in stored.iter().chain(staged) {
                for &column in &narrowed {
                    let ty = new.types[column];
                    if !ty.admits(t[column].kind()) {
                        return Err(ValidationError::StoredFactConflict {
                            pred: new.name,
                            column,
                            ty,
                            found: t[column].kind(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the loaded program to a fixpoint.
    pub fn evaluate(&mut self) -> Result<RunReport, Error> {
        self.insert_staged()?;
        let mut sources = mem::take(&mut self.sources);
        let mut pulled = Ok(());
        'sources: for (pred, source) in &mut sources {
            for t in source.facts() {
                if let Err(e) = self.insert_fact(*pred, &t) {
                    pulled = Err(e);
                    break 'sources;
                }
            }
        }
        self.sources = sources;
        pulled?;

        let report = eval::Evaluator {
            preds: &self.preds,
            rules: &self.program.rules,
            relations: &mut self.relations,
            symbols: &*self.symbols,
            matcher: &*self.matcher,
            config: &self.config,
            hook: self.round_hook.as_mut(),
        }
        .run(self.program.max_stratum)?;
        log::info!(
            "evaluation finished: {} rounds, {} new tuples",
            report.total_rounds(),
            report.total_derived()
        );
        Ok(report)
    }

    /// Installs a callback run after every round. See [`RoundHook`].
    pub fn set_round_hook(&mut self, hook: impl FnMut(usize) -> bool + 'static) {
        self.round_hook = Some(Box::new(hook));
    }

    /// Drops every derived tuple, keeping host facts, so that a different
    /// program can be evaluated over the same input.
    pub fn clear_derived(&mut self) {
        for (id, relation) in self.relations.iter_mut().enumerate() {
            relation.clear_derived(self.preds.def(PredId(id as u32)).is_idb);
        }
        log::debug!("cleared derived facts");
    }

    pub fn relation(&self, pred: PredId) -> Result<RelationView<'_>, Error> {
        self.known(pred)?;
        Ok(RelationView {
            pred,
            tuples: self.relations[pred.index()].tuples()?,
        })
    }

    /// The tuples of the predicate called `name`, rendered as strings.
    pub fn relation_strings(&self, name: &str) -> Result<Vec<Vec<String>>, Error> {
        let pred = self
            .pred_id(name)
            .ok_or_else(|| Error::UnknownPredicate(name.to_string()))?;
        let view = self.relation(pred)?;
        Ok(view
            .iter()
            .map(|t| t.iter().map(|v| self.render(*v)).collect())
            .collect())
    }

    /// Renders a value: symbols as their text, facts as parenthesized
    /// tuples.
    pub fn render(&self, value: Value) -> String {
        match value {
            Value::Symbol(s) => match self.symbols.resolve(s) {
                Some(text) => text.to_string(),
                None => value.to_string(),
            },
            Value::Int(i) | Value::Range(i) => i.to_string(),
            Value::Fact(id) => match self.facts.get(id) {
                Some(values) => {
                    let parts: Vec<String> = values.iter().map(|v| self.render(*v)).collect();
                    format!("({})", parts.join(", "))
                }
                None => value.to_string(),
            },
        }
    }
}
