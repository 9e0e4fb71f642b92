//! Relation providers: pluggable storage for a predicate ("bring your own data
//! structure").
//!
//! A predicate without a provider keeps its tuples in the engine's own
//! buffers. A predicate with a provider routes every insertion, membership
//! test and scan through the [`RelationProvider`] trait instead, which lets a
//! relation such as an equivalence be stored in O(N) space while still
//! answering for all O(N²) pairs.

pub mod egraph;
pub mod eqrel;

use thiserror::Error;

use crate::util::IndexSet;
use crate::{Tuple, Value};

pub use egraph::{Congruence, EGraph, EgraphEq};
pub use eqrel::Eqrel;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider}: expected a tuple of arity {expected}, found {found}")]
    Arity {
        provider: String,
        expected: usize,
        found: usize,
    },
    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: &'static str,
    },
    #[error("{0}")]
    Failed(String),
}

/// Storage for one relation.
///
/// Only [`add`](RelationProvider::add) and
/// [`contains`](RelationProvider::contains) are mandatory; the remaining
/// capabilities return `None` (or do nothing) by default, and the engine
/// falls back to whatever the provider does support.
pub trait RelationProvider {
    /// A short name used in error messages.
    fn name(&self) -> &str;

    fn arity(&self) -> usize;

    /// Inserts a tuple, returning whether the relation grew.
    fn add(&mut self, tuple: &[Value]) -> Result<bool, ProviderError>;

    fn contains(&self, tuple: &[Value]) -> Result<bool, ProviderError>;

    /// All tuples whose `column` equals `key`.
    fn lookup(&self, _column: usize, _key: Value) -> Option<Vec<Tuple>> {
        None
    }

    /// Every tuple of the relation.
    fn iterate(&self) -> Option<Vec<Tuple>> {
        None
    }

    /// Calls `f` on every tuple until it returns `false`. Full scans during
    /// evaluation go through here, so providers that can enumerate their
    /// tuples without materializing them should override it. The default
    /// walks the result of [`iterate`](RelationProvider::iterate).
    fn for_each(&self, f: &mut dyn FnMut(&[Value]) -> bool) -> Result<(), ProviderError> {
        let all = self.iterate().ok_or_else(|| ProviderError::Unsupported {
            provider: self.name().to_string(),
            capability: "iterate",
        })?;
        for t in &all {
            if !f(t) {
                break;
            }
        }
        Ok(())
    }

    /// Whether tuples were added since the last acknowledgement.
    fn has_delta(&self) -> bool {
        false
    }

    /// The tuples added since the last acknowledgement, if tracked.
    fn delta(&self) -> Option<Vec<Tuple>> {
        None
    }

    fn acknowledge_delta(&mut self) {}

    /// Drops every tuple. Called when derived facts are cleared.
    fn clear(&mut self) {}
}

pub(crate) fn check_arity(
    provider: &dyn RelationProvider,
    tuple: &[Value],
) -> Result<(), ProviderError> {
    if tuple.len() == provider.arity() {
        Ok(())
    } else {
        Err(ProviderError::Arity {
            provider: provider.name().to_string(),
            expected: provider.arity(),
            found: tuple.len(),
        })
    }
}

/// A hash set of materialized tuples in insertion order.
#[derive(Debug, Clone)]
pub struct Explicit {
    arity: usize,
    tuples: IndexSet<Tuple>,
    acknowledged: usize,
}

impl Explicit {
    pub fn new(arity: usize) -> Self {
        Explicit {
            arity,
            tuples: Default::default(),
            acknowledged: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl RelationProvider for Explicit {
    fn name(&self) -> &str {
        "explicit"
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn add(&mut self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(&*self, tuple)?;
        Ok(self.tuples.insert(Tuple::from_slice(tuple)))
    }

    fn contains(&self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(self, tuple)?;
        Ok(self.tuples.contains(tuple))
    }

    fn lookup(&self, column: usize, key: Value) -> Option<Vec<Tuple>> {
        Some(
            self.tuples
                .iter()
                .filter(|t| t.get(column) == Some(&key))
                .cloned()
                .collect(),
        )
    }

    fn iterate(&self) -> Option<Vec<Tuple>> {
        Some(self.tuples.iter().cloned().collect())
    }

    fn for_each(&self, f: &mut dyn FnMut(&[Value]) -> bool) -> Result<(), ProviderError> {
        for t in &self.tuples {
            if !f(t) {
                break;
            }
        }
        Ok(())
    }

    fn has_delta(&self) -> bool {
        self.acknowledged < self.tuples.len()
    }

    fn delta(&self) -> Option<Vec<Tuple>> {
        Some(self.tuples.iter().skip(self.acknowledged).cloned().collect())
    }

    fn acknowledge_delta(&mut self) {
        self.acknowledged = self.tuples.len();
    }

    fn clear(&mut self) {
        self.tuples.clear();
        self.acknowledged = 0;
    }
}
