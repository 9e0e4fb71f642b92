//! Union-find over dense ids, and [`Equivalence`], a union-find keyed by
//! arbitrary values that also tracks class membership and the pairs that
//! became equivalent since the last acknowledgement.

use std::fmt::Debug;
use std::hash::Hash;
use std::mem;

use crate::util::IndexSet;

pub trait UnifyKey: Hash + Eq + Clone + Debug {}
impl<K: Hash + Eq + Clone + Debug> UnifyKey for K {}

/// A union-by-rank union-find with path halving.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parents: Vec<usize>,
    ranks: Vec<u8>,
    n_unions: usize,
}

impl UnionFind {
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn n_unions(&self) -> usize {
        self.n_unions
    }

    pub fn make_set(&mut self) -> usize {
        let id = self.parents.len();
        self.parents.push(id);
        self.ranks.push(0);
        id
    }

    /// Find the representative without compressing paths.
    pub fn find(&self, mut current: usize) -> usize {
        while current != self.parents[current] {
            current = self.parents[current];
        }
        current
    }

    pub fn find_mut(&mut self, mut current: usize) -> usize {
        while current != self.parents[current] {
            let grandparent = self.parents[self.parents[current]];
            self.parents[current] = grandparent;
            current = grandparent;
        }
        current
    }

    /// Merges the classes of `a` and `b`. Returns `(root, child)` of the
    /// merge, or `None` if they were already in the same class.
    pub fn union(&mut self, a: usize, b: usize) -> Option<(usize, usize)> {
        let a = self.find_mut(a);
        let b = self.find_mut(b);
        if a == b {
            return None;
        }
        let (root, child) = if self.ranks[a] >= self.ranks[b] {
            (a, b)
        } else {
            (b, a)
        };
        if self.ranks[root] == self.ranks[child] {
            self.ranks[root] += 1;
        }
        self.parents[child] = root;
        self.n_unions += 1;
        Some((root, child))
    }

    /// Hangs the root `child` below the root `root`.
    pub fn link(&mut self, root: usize, child: usize) {
        debug_assert!(self.parents[root] == root && self.parents[child] == child);
        self.parents[child] = root;
        self.ranks[root] = self.ranks[root].max(self.ranks[child] + 1);
        self.n_unions += 1;
    }

    /// Points `node` straight at `root`, which must already be its
    /// representative.
    pub fn relink(&mut self, node: usize, root: usize) {
        debug_assert_eq!(self.find(node), root);
        self.parents[node] = root;
    }

    pub fn clear(&mut self) {
        self.parents.clear();
        self.ranks.clear();
        self.n_unions = 0;
    }
}

/// An equivalence relation over keys of type `K`.
///
/// Classes are kept flat: every key points directly at its representative,
/// so [`Equivalence::same`] and [`Equivalence::find`] take one hop. A union
/// relinks the members of the smaller class, which costs O(log n) amortized
/// per key over any sequence of unions.
///
/// Besides answering membership, it records every ordered pair that became
/// equivalent (including `(k, k)` for a key seen for the first time) until
/// [`Equivalence::acknowledge`] is called.
#[derive(Debug, Clone)]
pub struct Equivalence<K> {
    keys: IndexSet<K>,
    uf: UnionFind,
    /// Members of each class, stored at the class root.
    members: Vec<Vec<usize>>,
    pending: Vec<(usize, usize)>,
}

impl<K> Default for Equivalence<K> {
    fn default() -> Self {
        Self {
            keys: Default::default(),
            uf: Default::default(),
            members: Default::default(),
            pending: Default::default(),
        }
    }
}

impl<K: UnifyKey> Equivalence<K> {
    /// Number of distinct keys seen.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn n_unions(&self) -> usize {
        self.uf.n_unions()
    }

    fn index(&self, key: &K) -> Option<usize> {
        self.keys.get_index_of(key)
    }

    fn key(&self, index: usize) -> K {
        self.keys[index].clone()
    }

    /// Registers `key` in a singleton class if it is new.
    pub fn insert(&mut self, key: K) -> usize {
        if let Some(i) = self.index(&key) {
            return i;
        }
        let (i, _) = self.keys.insert_full(key);
        let id = self.uf.make_set();
        debug_assert_eq!(i, id);
        self.members.push(vec![i]);
        self.pending.push((i, i));
        i
    }

    /// Merges the classes of `a` and `b`, returning whether anything changed.
    pub fn union(&mut self, a: K, b: K) -> bool {
        let a = self.insert(a);
        let b = self.insert(b);
        self.union_indices(a, b)
    }

    fn union_indices(&mut self, a: usize, b: usize) -> bool {
        let (a, b) = (self.uf.find(a), self.uf.find(b));
        if a == b {
            return false;
        }
        let (root, child) = if self.members[a].len() >= self.members[b].len() {
            (a, b)
        } else {
            (b, a)
        };
        self.uf.link(root, child);
        let moved = mem::take(&mut self.members[child]);
        for &m in &moved {
            self.uf.relink(m, root);
        }
        for &x in &self.members[root] {
            for &y in &moved {
                self.pending.push((x, y));
                self.pending.push((y, x));
            }
        }
        self.members[root].extend(moved);
        true
    }

    /// Whether `a` and `b` are known and in the same class.
    pub fn same(&self, a: &K, b: &K) -> bool {
        match (self.index(a), self.index(b)) {
            (Some(a), Some(b)) => self.uf.find(a) == self.uf.find(b),
            _ => false,
        }
    }

    /// The canonical representative of `key`'s class, if `key` is known.
    pub fn find(&self, key: &K) -> Option<K> {
        let i = self.index(key)?;
        Some(self.key(self.uf.find(i)))
    }

    /// Every member of `key`'s class (including `key`), if `key` is known.
    pub fn class(&self, key: &K) -> Vec<K> {
        match self.index(key) {
            Some(i) => self.members[self.uf.find(i)]
                .iter()
                .map(|&m| self.key(m))
                .collect(),
            None => vec![],
        }
    }

    /// Every ordered pair of equivalent keys. Quadratic in class sizes.
    pub fn pairs(&self) -> Vec<(K, K)> {
        let mut out = vec![];
        for class in &self.members {
            for &x in class {
                for &y in class {
                    out.push((self.key(x), self.key(y)));
                }
            }
        }
        out
    }

    /// Calls `f` on every ordered pair of equivalent keys, class by class,
    /// until it returns `false`.
    pub fn for_each_pair(&self, mut f: impl FnMut(&K, &K) -> bool) {
        for class in &self.members {
            for &x in class {
                for &y in class {
                    if !f(&self.keys[x], &self.keys[y]) {
                        return;
                    }
                }
            }
        }
    }

    /// The classes with at least one member.
    pub fn classes(&self) -> Vec<Vec<K>> {
        self.members
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| c.iter().map(|&m| self.key(m)).collect())
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The pairs that became equivalent since the last acknowledgement.
    pub fn pending(&self) -> Vec<(K, K)> {
        self.pending
            .iter()
            .map(|&(x, y)| (self.key(x), self.key(y)))
            .collect()
    }

    pub fn acknowledge(&mut self) {
        self.pending.clear();
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.uf.clear();
        self.members.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_find() {
        let n = 10;
        let mut uf = UnionFind::default();
        for _ in 0..n {
            uf.make_set();
        }

        // build up one set
        uf.union(0, 1);
        uf.union(0, 2);
        uf.union(0, 3);

        // build up another set
        uf.union(6, 7);
        uf.union(6, 8);
        uf.union(6, 9);

        assert!(uf.union(3, 1).is_none());
        for i in 0..n {
            uf.find_mut(i);
        }
        let expected = [0, 0, 0, 0, 4, 5, 6, 6, 6, 6];
        for (i, e) in expected.iter().enumerate() {
            assert_eq!(uf.find(i), uf.find(*e));
        }
        assert_ne!(uf.find(0), uf.find(6));
        assert_eq!(uf.n_unions(), 6);
    }

    #[test]
    fn union_by_rank_keeps_the_taller_root() {
        let mut uf = UnionFind::default();
        for _ in 0..4 {
            uf.make_set();
        }
        let (root, _) = uf.union(0, 1).unwrap();
        // {2} has rank 0 and must hang below the rank-1 root
        assert_eq!(uf.union(2, 0), Some((root, 2)));
        assert_eq!(uf.union(3, 2), Some((root, 3)));
    }

    #[test]
    fn equivalence_closure() {
        let mut eq = Equivalence::default();
        eq.union("a", "b");
        eq.union("b", "c");
        assert!(eq.same(&"a", &"c"));
        assert!(eq.same(&"c", &"a"));
        assert!(eq.same(&"b", &"b"));
        assert!(!eq.same(&"a", &"d"));
        assert!(!eq.same(&"d", &"d"));
        let mut class = eq.class(&"c");
        class.sort();
        assert_eq!(class, vec!["a", "b", "c"]);
        assert_eq!(eq.pairs().len(), 9);
    }

    #[test]
    fn equivalence_classes_stay_flat() {
        let mut eq = Equivalence::default();
        for i in 0..16 {
            eq.union(i, i + 1);
        }
        eq.union(100, 101);
        eq.union(101, 0);
        for i in 0..eq.len() {
            let parent = eq.uf.parents[i];
            assert_eq!(eq.uf.parents[parent], parent, "key {i} is two hops deep");
        }
        assert!(eq.same(&100, &16));
        assert_eq!(eq.n_unions(), 18);
    }

    #[test]
    fn pending_pairs_cover_exactly_the_new_equivalences() {
        let mut eq = Equivalence::default();
        eq.union(1, 2);
        let mut pending = eq.pending();
        pending.sort();
        assert_eq!(pending, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
        eq.acknowledge();
        assert!(!eq.has_pending());

        assert!(!eq.union(2, 1));
        assert!(!eq.has_pending());

        eq.union(3, 1);
        let mut pending = eq.pending();
        pending.sort();
        assert_eq!(pending, vec![(1, 3), (2, 3), (3, 1), (3, 2), (3, 3)]);
    }
}
