//! Column-level indexes on the `base` buffer of a relation.
use smallvec::SmallVec;

use crate::{util::HashMap, Value};

pub(crate) type Offset = u32;

/// Maps the integer payload of one column to the offsets of the tuples
/// holding it. Values of different kinds may share a bucket, so callers
/// still compare the column after a lookup.
#[derive(Clone, Debug)]
pub(crate) struct ColumnIndex {
    column: usize,
    ids: HashMap<u64, SmallVec<[Offset; 4]>>,
}

impl ColumnIndex {
    pub(crate) fn new(column: usize) -> ColumnIndex {
        ColumnIndex {
            column,
            ids: Default::default(),
        }
    }

    pub(crate) fn column(&self) -> usize {
        self.column
    }

    pub(crate) fn add(&mut self, v: Value, i: usize) {
        self.ids.entry(v.bits()).or_default().push(i as Offset);
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear()
    }

    pub(crate) fn get(&self, v: &Value) -> &[Offset] {
        self.ids.get(&v.bits()).map(|x| x.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_by_payload() {
        let mut ix = ColumnIndex::new(1);
        ix.add(Value::Symbol(7), 0);
        ix.add(Value::Symbol(7), 3);
        ix.add(Value::Int(7), 4);
        ix.add(Value::Symbol(8), 5);
        assert_eq!(ix.column(), 1);
        assert_eq!(ix.get(&Value::Symbol(7)), &[0, 3, 4]);
        assert_eq!(ix.get(&Value::Symbol(9)), &[] as &[Offset]);
        ix.clear();
        assert!(ix.get(&Value::Symbol(8)).is_empty());
    }
}
