//! Per-predicate storage used by the evaluator.
//!
//! A [`Relation`] holds three buffers: `base` (everything known so far),
//! `delta` (what became known in the last round) and `next` (what the current
//! round derived). When a [`RelationProvider`] is installed the provider
//! replaces `base` and the membership set; `delta` and `next` are kept here.
use std::borrow::Cow;

use crate::index::ColumnIndex;
use crate::provider::{ProviderError, RelationProvider};
use crate::util::{HashMap, HashSet};
use crate::{Tuple, Value};

/// Which buffer a scan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Full,
    Delta,
}

pub(crate) struct Relation {
    base: Vec<Tuple>,
    /// Parallel to `base`: whether the tuple was inserted by the host.
    edb: Vec<bool>,
    /// Offsets into `base`.
    members: HashMap<Tuple, usize>,
    delta: Vec<Tuple>,
    next: Vec<Tuple>,
    next_members: HashSet<Tuple>,
    indexes: Vec<Option<ColumnIndex>>,
    provider: Option<Box<dyn RelationProvider>>,
}

impl Relation {
    pub(crate) fn new(arity: usize) -> Relation {
        Relation {
            base: vec![],
            edb: vec![],
            members: Default::default(),
            delta: vec![],
            next: vec![],
            next_members: Default::default(),
            indexes: (0..arity).map(|_| None).collect(),
            provider: None,
        }
    }

    /// Installs a provider. Tuples already stored move into it.
    pub(crate) fn set_provider(
        &mut self,
        mut provider: Box<dyn RelationProvider>,
    ) -> Result<(), ProviderError> {
        for t in self.base.drain(..) {
            provider.add(&t)?;
        }
        self.edb.clear();
        self.members.clear();
        self.delta.clear();
        self.next.clear();
        self.next_members.clear();
        for ix in self.indexes.iter_mut().flatten() {
            ix.clear();
        }
        self.provider = Some(provider);
        Ok(())
    }

    pub(crate) fn delta_len(&self) -> usize {
        self.delta.len()
    }

    /// Appends a tuple not yet in `base`, keeping the membership set and the
    /// column indexes in sync.
    fn append(&mut self, t: Tuple, edb: bool) {
        let offset = self.base.len();
        for ix in self.indexes.iter_mut().flatten() {
            ix.add(t[ix.column()], offset);
        }
        self.members.insert(t.clone(), offset);
        self.base.push(t);
        self.edb.push(edb);
    }

    /// Inserts a host fact. Returns whether the relation grew.
    pub(crate) fn insert_fact(&mut self, t: &[Value]) -> Result<bool, ProviderError> {
        if let Some(p) = &mut self.provider {
            return p.add(t);
        }
        match self.members.get(t) {
            Some(&offset) => {
                self.edb[offset] = true;
                Ok(false)
            }
            None => {
                self.append(Tuple::from_slice(t), true);
                Ok(true)
            }
        }
    }

    pub(crate) fn contains(&self, t: &[Value]) -> Result<bool, ProviderError> {
        match &self.provider {
            Some(p) => p.contains(t),
            None => Ok(self.members.contains_key(t)),
        }
    }

    /// Builds the index on `column` if it does not exist yet.
    pub(crate) fn ensure_index(&mut self, column: usize) {
        if self.provider.is_some() || self.indexes[column].is_some() {
            return;
        }
        let mut ix = ColumnIndex::new(column);
        for (i, t) in self.base.iter().enumerate() {
            ix.add(t[column], i);
        }
        self.indexes[column] = Some(ix);
    }

    fn rebuild_indexes(&mut self) {
        for ix in self.indexes.iter_mut().flatten() {
            ix.clear();
            for (i, t) in self.base.iter().enumerate() {
                ix.add(t[ix.column()], i);
            }
        }
    }

    /// Every tuple of the relation.
    pub(crate) fn tuples(&self) -> Result<Cow<'_, [Tuple]>, ProviderError> {
        match &self.provider {
            None => Ok(Cow::Borrowed(&self.base)),
            Some(p) => p
                .iterate()
                .map(Cow::Owned)
                .ok_or_else(|| ProviderError::Unsupported {
                    provider: p.name().to_string(),
                    capability: "iterate",
                }),
        }
    }

    /// Calls `f` on every tuple of `source` whose `key` column holds the
    /// given value (every tuple if `key` is `None`). Stops early when `f`
    /// returns `false`.
    pub(crate) fn scan<E>(
        &self,
        source: Source,
        key: Option<(usize, Value)>,
        mut f: impl FnMut(&[Value]) -> Result<bool, E>,
    ) -> Result<(), E>
    where
        E: From<ProviderError>,
    {
        let matches = |t: &[Value]| key.map_or(true, |(c, v)| t[c] == v);
        if source == Source::Delta {
            for t in self.delta.iter().filter(|t| matches(t.as_slice())) {
                if !f(t)? {
                    break;
                }
            }
            return Ok(());
        }
        match (&self.provider, key) {
            (None, Some((c, v))) if self.indexes[c].is_some() => {
                if let Some(ix) = &self.indexes[c] {
                    for &i in ix.get(&v) {
                        let t = &self.base[i as usize];
                        if t[c] == v && !f(t)? {
                            break;
                        }
                    }
                }
            }
            (None, _) => {
                for t in self.base.iter().filter(|t| matches(t.as_slice())) {
                    if !f(t)? {
                        break;
                    }
                }
            }
            (Some(p), Some((c, v))) => match p.lookup(c, v) {
                Some(rows) => {
                    for t in rows.iter().filter(|t| matches(t.as_slice())) {
                        if !f(t)? {
                            break;
                        }
                    }
                }
                None => stream(&**p, matches, &mut f)?,
            },
            (Some(p), None) => stream(&**p, matches, &mut f)?,
        }
        Ok(())
    }

    /// Snapshots the current contents into `delta`, so that the first round
    /// of a stratum treats every known tuple as new.
    pub(crate) fn prepare_delta_from_base(&mut self) {
        self.next.clear();
        self.next_members.clear();
        match &mut self.provider {
            None => self.delta = self.base.clone(),
            Some(p) => {
                self.delta = match p.iterate() {
                    Some(all) => all,
                    None => p.delta().unwrap_or_default(),
                };
                p.acknowledge_delta();
            }
        }
    }

    /// Forgets what the provider reports as new without reading it.
    pub(crate) fn acknowledge_provider_delta(&mut self) {
        if let Some(p) = &mut self.provider {
            p.acknowledge_delta();
        }
    }

    pub(crate) fn clear_next(&mut self) {
        self.next.clear();
        self.next_members.clear();
    }

    /// Stages a derived tuple unless it is already known or staged.
    pub(crate) fn next_insert_unique(&mut self, t: Tuple) -> Result<bool, ProviderError> {
        if self.contains(&t)? || self.next_members.contains(&t) {
            return Ok(false);
        }
        self.next_members.insert(t.clone());
        self.next.push(t);
        Ok(true)
    }

    /// Moves the staged tuples into `base` and makes the new ones the next
    /// `delta`. Returns whether anything was added.
    ///
    /// For a provider-backed relation the staged tuples are added to the
    /// provider; call [`Relation::sync_provider_delta`] once every relation
    /// of the stratum has been promoted, since adding to one provider can
    /// grow another that shares its state.
    pub(crate) fn promote_next(&mut self) -> Result<bool, ProviderError> {
        let next = std::mem::take(&mut self.next);
        self.next_members.clear();
        self.delta.clear();
        match &mut self.provider {
            Some(p) => {
                for t in next {
                    if p.add(&t)? {
                        self.delta.push(t);
                    }
                }
            }
            None => {
                for t in next {
                    if !self.members.contains_key(&t) {
                        self.delta.push(t.clone());
                        self.append(t, false);
                    }
                }
            }
        }
        Ok(!self.delta.is_empty())
    }

    /// Replaces `delta` by what the provider reports as new, then
    /// acknowledges it. Returns whether `delta` is non-empty.
    pub(crate) fn sync_provider_delta(&mut self) -> bool {
        if let Some(p) = &mut self.provider {
            if p.has_delta() {
                if let Some(d) = p.delta() {
                    self.delta = d;
                }
            }
            p.acknowledge_delta();
        }
        !self.delta.is_empty()
    }

    /// Drops derived tuples. Host facts survive unless the relation is a
    /// provider-backed IDB relation, which is cleared entirely.
    pub(crate) fn clear_derived(&mut self, is_idb: bool) {
        self.delta.clear();
        self.clear_next();
        if let Some(p) = &mut self.provider {
            if is_idb {
                p.clear();
            }
            return;
        }
        let base = std::mem::take(&mut self.base);
        let edb = std::mem::take(&mut self.edb);
        self.members.clear();
        for (t, is_edb) in base.into_iter().zip(edb) {
            if is_edb {
                self.members.insert(t.clone(), self.base.len());
                self.base.push(t);
                self.edb.push(true);
            }
        }
        self.rebuild_indexes();
    }
}

/// Feeds the provider's tuples that pass `keep` to `f` without
/// materializing the relation.
fn stream<E>(
    provider: &dyn RelationProvider,
    keep: impl Fn(&[Value]) -> bool,
    f: &mut impl FnMut(&[Value]) -> Result<bool, E>,
) -> Result<(), E>
where
    E: From<ProviderError>,
{
    let mut failed = None;
    provider.for_each(&mut |t: &[Value]| {
        if !keep(t) {
            return true;
        }
        match f(t) {
            Ok(more) => more,
            Err(e) => {
                failed = Some(e);
                false
            }
        }
    })?;
    failed.map_or(Ok(()), Err)
}
