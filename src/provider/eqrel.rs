//! A binary equivalence relation stored as a union-find.
use super::{check_arity, ProviderError, RelationProvider};
use crate::unionfind::Equivalence;
use crate::{tuple, Tuple, Value};

/// Stores an equivalence relation in space linear in the number of elements.
///
/// Adding `(a, b)` merges the classes of `a` and `b`; the relation then holds
/// every pair within a class, including `(a, a)` for every element seen. An
/// element never mentioned is not related to itself.
#[derive(Debug, Clone, Default)]
pub struct Eqrel {
    eq: Equivalence<Value>,
}

impl Eqrel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct elements.
    pub fn len(&self) -> usize {
        self.eq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eq.is_empty()
    }

    /// The canonical representative of `v`, if known.
    pub fn find(&self, v: Value) -> Option<Value> {
        self.eq.find(&v)
    }

    pub fn same(&self, a: Value, b: Value) -> bool {
        self.eq.same(&a, &b)
    }
}

/// `lookup` over an equivalence: pairs of `key` with every member of its class.
pub(super) fn class_lookup(eq: &Equivalence<Value>, column: usize, key: Value) -> Vec<Tuple> {
    eq.class(&key)
        .into_iter()
        .map(|m| match column {
            0 => tuple(&[key, m]),
            _ => tuple(&[m, key]),
        })
        .collect()
}

pub(super) fn pairs_to_tuples(pairs: Vec<(Value, Value)>) -> Vec<Tuple> {
    pairs.into_iter().map(|(a, b)| tuple(&[a, b])).collect()
}

impl RelationProvider for Eqrel {
    fn name(&self) -> &str {
        "eqrel"
    }

    fn arity(&self) -> usize {
        2
    }

    fn add(&mut self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(&*self, tuple)?;
        let known = self.eq.len();
        let merged = self.eq.union(tuple[0], tuple[1]);
        Ok(merged || self.eq.len() != known)
    }

    fn contains(&self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(self, tuple)?;
        Ok(self.eq.same(&tuple[0], &tuple[1]))
    }

    fn lookup(&self, column: usize, key: Value) -> Option<Vec<Tuple>> {
        (column < 2).then(|| class_lookup(&self.eq, column, key))
    }

    fn iterate(&self) -> Option<Vec<Tuple>> {
        Some(pairs_to_tuples(self.eq.pairs()))
    }

    fn for_each(&self, f: &mut dyn FnMut(&[Value]) -> bool) -> Result<(), ProviderError> {
        self.eq.for_each_pair(|&a, &b| f(&[a, b]));
        Ok(())
    }

    fn has_delta(&self) -> bool {
        self.eq.has_pending()
    }

    fn delta(&self) -> Option<Vec<Tuple>> {
        Some(pairs_to_tuples(self.eq.pending()))
    }

    fn acknowledge_delta(&mut self) {
        self.eq.acknowledge()
    }

    fn clear(&mut self) {
        self.eq.clear()
    }
}
