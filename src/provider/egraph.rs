//! Congruence closure over function-like relations.
//!
//! An [`EGraph`] couples an equivalence relation with tables of nodes
//! `op(args...) = result`. Two nodes of the same table with the same opcode
//! whose operands are pairwise equivalent have equivalent results. The graph
//! is shared between one [`EgraphEq`] provider, exposing the equivalence, and
//! any number of [`Congruence`] providers, one per table.
use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use super::eqrel::{class_lookup, pairs_to_tuples};
use super::{check_arity, ProviderError, RelationProvider};
use crate::unionfind::Equivalence;
use crate::util::{HEntry, HashMap, IndexSet};
use crate::{Tuple, Value};

type Operands = SmallVec<[Value; 3]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    table: usize,
    op: Value,
    args: Operands,
}

#[derive(Debug, Clone)]
struct NodeTable {
    operands: usize,
    /// Raw `op, args..., result` tuples in insertion order.
    nodes: IndexSet<Tuple>,
    acknowledged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EGraph {
    eq: Equivalence<Value>,
    tables: Vec<NodeTable>,
    /// Canonical node to the result of the first node seen with that key.
    memo: HashMap<NodeKey, Value>,
}

impl EGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh graph ready to be handed to several providers.
    pub fn shared() -> Rc<RefCell<EGraph>> {
        Rc::new(RefCell::new(EGraph::new()))
    }

    fn add_table(&mut self, operands: usize) -> usize {
        self.tables.push(NodeTable {
            operands,
            nodes: Default::default(),
            acknowledged: 0,
        });
        self.tables.len() - 1
    }

    /// The representative of `v`; values never unioned are their own.
    pub fn canonical(&self, v: Value) -> Value {
        self.eq.find(&v).unwrap_or(v)
    }

    pub fn same(&self, a: Value, b: Value) -> bool {
        self.eq.same(&a, &b)
    }

    pub fn n_nodes(&self) -> usize {
        self.tables.iter().map(|t| t.nodes.len()).sum()
    }

    fn key(&self, table: usize, node: &[Value]) -> NodeKey {
        let operands = self.tables[table].operands;
        NodeKey {
            table,
            op: node[0],
            args: node[1..=operands]
                .iter()
                .map(|&v| self.canonical(v))
                .collect(),
        }
    }

    /// Asserts `a = b` and restores congruence. Returns whether the
    /// equivalence relation grew.
    pub fn union(&mut self, a: Value, b: Value) -> bool {
        let known = self.eq.len();
        let merged = self.eq.union(a, b);
        if merged {
            self.rebuild();
        }
        merged || self.eq.len() != known
    }

    /// Adds the node `op(args...) = result` to `table`. Returns whether the
    /// node was new.
    fn add_node(&mut self, table: usize, node: &[Value]) -> bool {
        if !self.tables[table].nodes.insert(Tuple::from_slice(node)) {
            return false;
        }
        let result = node[node.len() - 1];
        let key = self.key(table, node);
        match self.memo.entry(key) {
            HEntry::Occupied(existing) => {
                let existing = *existing.get();
                if self.eq.union(existing, result) {
                    log::trace!("congruent node {node:?}: {existing} = {result}");
                    self.rebuild();
                }
            }
            HEntry::Vacant(slot) => {
                slot.insert(result);
            }
        }
        true
    }

    /// Restores congruence after unions, returning the number of unions it
    /// performed.
    pub fn rebuild(&mut self) -> usize {
        let mut updates = 0;
        loop {
            let new = self.rebuild_one();
            updates += new;
            if new == 0 {
                break;
            }
        }
        if updates > 0 {
            log::debug!("congruence closure performed {updates} unions");
        }
        updates
    }

    fn rebuild_one(&mut self) -> usize {
        let mut memo: HashMap<NodeKey, Value> = Default::default();
        let mut merges = vec![];
        for (t, table) in self.tables.iter().enumerate() {
            for node in &table.nodes {
                let result = node[node.len() - 1];
                match memo.entry(self.key(t, node)) {
                    HEntry::Occupied(existing) => merges.push((*existing.get(), result)),
                    HEntry::Vacant(slot) => {
                        slot.insert(result);
                    }
                }
            }
        }
        self.memo = memo;
        merges
            .into_iter()
            .filter(|&(a, b)| self.eq.union(a, b))
            .count()
    }

    fn clear_table(&mut self, table: usize) {
        let t = &mut self.tables[table];
        t.nodes.clear();
        t.acknowledged = 0;
        self.rebuild();
    }

    fn clear_eq(&mut self) {
        self.eq.clear();
        self.rebuild();
    }
}

/// The equivalence relation of an [`EGraph`], arity 2. Behaves like
/// [`Eqrel`](super::Eqrel), except that equivalences implied by congruence
/// show up as well.
#[derive(Debug, Clone)]
pub struct EgraphEq {
    graph: Rc<RefCell<EGraph>>,
}

impl EgraphEq {
    pub fn new(graph: Rc<RefCell<EGraph>>) -> Self {
        EgraphEq { graph }
    }
}

impl RelationProvider for EgraphEq {
    fn name(&self) -> &str {
        "egraph_eq"
    }

    fn arity(&self) -> usize {
        2
    }

    fn add(&mut self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(&*self, tuple)?;
        Ok(self.graph.borrow_mut().union(tuple[0], tuple[1]))
    }

    fn contains(&self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(self, tuple)?;
        Ok(self.graph.borrow().same(tuple[0], tuple[1]))
    }

    fn lookup(&self, column: usize, key: Value) -> Option<Vec<Tuple>> {
        (column < 2).then(|| class_lookup(&self.graph.borrow().eq, column, key))
    }

    fn iterate(&self) -> Option<Vec<Tuple>> {
        Some(pairs_to_tuples(self.graph.borrow().eq.pairs()))
    }

    fn for_each(&self, f: &mut dyn FnMut(&[Value]) -> bool) -> Result<(), ProviderError> {
        self.graph.borrow().eq.for_each_pair(|&a, &b| f(&[a, b]));
        Ok(())
    }

    fn has_delta(&self) -> bool {
        self.graph.borrow().eq.has_pending()
    }

    fn delta(&self) -> Option<Vec<Tuple>> {
        Some(pairs_to_tuples(self.graph.borrow().eq.pending()))
    }

    fn acknowledge_delta(&mut self) {
        self.graph.borrow_mut().eq.acknowledge()
    }

    fn clear(&mut self) {
        self.graph.borrow_mut().clear_eq()
    }
}

/// One node table of an [`EGraph`]. Tuples are `op, arg_1, ..., arg_n,
/// result` with `n` operands, so the relation has arity `n + 2`.
///
/// The relation's contents are the nodes as they were added; congruence only
/// affects the equivalence relation.
#[derive(Debug, Clone)]
pub struct Congruence {
    graph: Rc<RefCell<EGraph>>,
    table: usize,
    arity: usize,
}

impl Congruence {
    pub const MAX_OPERANDS: usize = 3;

    pub fn new(graph: Rc<RefCell<EGraph>>, operands: usize) -> Result<Self, ProviderError> {
        if operands == 0 || operands > Self::MAX_OPERANDS {
            return Err(ProviderError::Failed(format!(
                "congruence tables take 1 to {} operands, not {operands}",
                Self::MAX_OPERANDS
            )));
        }
        let table = graph.borrow_mut().add_table(operands);
        Ok(Congruence {
            graph,
            table,
            arity: operands + 2,
        })
    }
}

impl RelationProvider for Congruence {
    fn name(&self) -> &str {
        "congruence"
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn add(&mut self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(&*self, tuple)?;
        Ok(self.graph.borrow_mut().add_node(self.table, tuple))
    }

    fn contains(&self, tuple: &[Value]) -> Result<bool, ProviderError> {
        check_arity(self, tuple)?;
        Ok(self.graph.borrow().tables[self.table].nodes.contains(tuple))
    }

    fn lookup(&self, column: usize, key: Value) -> Option<Vec<Tuple>> {
        let graph = self.graph.borrow();
        Some(
            graph.tables[self.table]
                .nodes
                .iter()
                .filter(|t| t.get(column) == Some(&key))
                .cloned()
                .collect(),
        )
    }

    fn iterate(&self) -> Option<Vec<Tuple>> {
        let graph = self.graph.borrow();
        Some(graph.tables[self.table].nodes.iter().cloned().collect())
    }

    fn for_each(&self, f: &mut dyn FnMut(&[Value]) -> bool) -> Result<(), ProviderError> {
        let graph = self.graph.borrow();
        for t in &graph.tables[self.table].nodes {
            if !f(t) {
                break;
            }
        }
        Ok(())
    }

    fn has_delta(&self) -> bool {
        let graph = self.graph.borrow();
        let t = &graph.tables[self.table];
        t.acknowledged < t.nodes.len()
    }

    fn delta(&self) -> Option<Vec<Tuple>> {
        let graph = self.graph.borrow();
        let t = &graph.tables[self.table];
        Some(t.nodes.iter().skip(t.acknowledged).cloned().collect())
    }

    fn acknowledge_delta(&mut self) {
        let mut graph = self.graph.borrow_mut();
        let t = &mut graph.tables[self.table];
        t.acknowledged = t.nodes.len();
    }

    fn clear(&mut self) {
        self.graph.borrow_mut().clear_table(self.table)
    }
}
