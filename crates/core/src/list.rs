//! Reference-counted copy-on-write ordered lists.

use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// A shared list of values with clone-on-shared mutation.
///
/// Mutators that see a shared backing store clone it first, so a holder of
/// the original list never observes the change.
#[derive(Debug, Clone, Default)]
pub struct List(Arc<Vec<Value>>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(len: usize) -> Self {
        List(Arc::new(Vec::with_capacity(len)))
    }

    pub fn from_vec(values: Vec<Value>) -> Self {
        List(Arc::new(values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of holders sharing the backing storage.
    pub fn refs(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn get(&self, pos: usize) -> &Value {
        &self.0[pos]
    }

    pub fn first(&self) -> Option<&Value> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Value> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Appends an element.
    pub fn add(&mut self, value: Value) {
        Arc::make_mut(&mut self.0).push(value);
    }

    /// Inserts at `pos`; caller has range-checked.
    pub fn insert(&mut self, pos: usize, value: Value) {
        Arc::make_mut(&mut self.0).insert(pos, value);
    }

    /// Replaces the element at `pos`; caller has range-checked.
    pub fn replace(&mut self, pos: usize, value: Value) {
        Arc::make_mut(&mut self.0)[pos] = value;
    }

    /// Deletes the element at `pos`; caller has range-checked.
    pub fn delete(&mut self, pos: usize) {
        Arc::make_mut(&mut self.0).remove(pos);
    }

    /// Deletes the first element equal to `value`, if present.
    pub fn delete_element(&mut self, value: &Value) {
        if let Some(pos) = self.search(value, 0) {
            self.delete(pos);
        }
    }

    /// Appends every element of `other`.
    pub fn append(&mut self, other: &List) {
        Arc::make_mut(&mut self.0).extend(other.iter().cloned());
    }

    /// Index of the first element equal to `value` at or past `offset`.
    pub fn search(&self, value: &Value, offset: usize) -> Option<usize> {
        self.0[offset.min(self.0.len())..]
            .iter()
            .position(|v| v == value)
            .map(|at| offset + at)
    }

    /// The sublist `[start, start + len)`; caller has range-checked.
    pub fn sublist(&self, start: usize, len: usize) -> List {
        List(Arc::new(self.0[start..start + len].to_vec()))
    }

    pub fn reverse(&mut self) {
        Arc::make_mut(&mut self.0).reverse();
    }

    /// Adds `value` unless an equal element is already present.
    pub fn setadd(&mut self, value: Value) {
        if self.search(&value, 0).is_none() {
            self.add(value);
        }
    }

    /// Removes the first element equal to `value`, if present.
    pub fn setremove(&mut self, value: &Value) {
        if let Some(pos) = self.search(value, 0) {
            self.delete(pos);
        }
    }

    /// Removes duplicates, keeping first occurrences.
    pub fn toset(&mut self) {
        let values = Arc::make_mut(&mut self.0);
        let mut kept: Vec<Value> = Vec::with_capacity(values.len());
        for v in values.drain(..) {
            if !kept.contains(&v) {
                kept.push(v);
            }
        }
        *values = kept;
    }

    /// Appends every element of `other` not already present.
    pub fn union(&mut self, other: &List) {
        for v in other.iter() {
            if self.search(v, 0).is_none() {
                self.add(v.clone());
            }
        }
    }

    /// Returns `[unique_to_self, intersection, unique_to_other]`.
    pub fn factor(&self, other: &List) -> List {
        let mut only_left = self.clone();
        let mut only_right = other.clone();
        let mut intersection = List::new();
        for i in (0..only_right.len()).rev() {
            let candidate = only_right.get(i).clone();
            if let Some(pos) = only_left.search(&candidate, 0) {
                intersection.add(candidate);
                only_left.delete(pos);
                only_right.delete(i);
            }
        }
        List::from_vec(vec![
            Value::List(only_left),
            Value::List(intersection),
            Value::List(only_right),
        ])
    }

    /// Sorts by the canonical total order over values.
    pub fn qsort(&mut self) {
        Arc::make_mut(&mut self.0).sort_by(Value::order);
    }

    /// Element-wise equality.
    pub fn eq_elements(&self, other: &List) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.len() == other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Element-wise total order, then by length.
    pub fn order(&self, other: &List) -> Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ordering::Equal;
        }
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let diff = a.order(b);
            if diff != Ordering::Equal {
                return diff;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.eq_elements(other)
    }
}

impl Eq for List {}

impl FromIterator<Value> for List {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        List(Arc::new(iter.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> List {
        values.iter().map(|&n| Value::Int(n)).collect()
    }

    #[test]
    fn shared_lists_copy_on_write() {
        let mut a = ints(&[1, 2, 3]);
        let b = a.clone();
        assert_eq!(a.refs(), 2);
        a.add(Value::Int(4));
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn set_operations() {
        let mut l = ints(&[1, 2]);
        l.setadd(Value::Int(2));
        assert_eq!(l.len(), 2);
        l.setadd(Value::Int(3));
        assert_eq!(l.len(), 3);
        l.setremove(&Value::Int(1));
        assert_eq!(l, ints(&[2, 3]));

        let mut dup = ints(&[1, 1, 2, 3, 2]);
        dup.toset();
        assert_eq!(dup, ints(&[1, 2, 3]));
    }

    #[test]
    fn union_and_factor() {
        let mut a = ints(&[1, 2, 3]);
        a.union(&ints(&[2, 4]));
        assert_eq!(a, ints(&[1, 2, 3, 4]));

        let factor = ints(&[1, 2, 3]).factor(&ints(&[2, 3, 5]));
        assert_eq!(factor.get(0), &Value::List(ints(&[1])));
        assert_eq!(factor.get(1), &Value::List(ints(&[3, 2])));
        assert_eq!(factor.get(2), &Value::List(ints(&[5])));
    }

    #[test]
    fn qsort_uses_canonical_order() {
        let mut l = ints(&[3, 1, 2]);
        l.qsort();
        assert_eq!(l, ints(&[1, 2, 3]));
    }

    #[test]
    fn list_order_is_elementwise_then_length() {
        assert_eq!(ints(&[1, 2]).order(&ints(&[1, 3])), Ordering::Less);
        assert_eq!(ints(&[1, 2]).order(&ints(&[1, 2, 0])), Ordering::Less);
        assert_eq!(ints(&[2]).order(&ints(&[1, 9])), Ordering::Greater);
    }
}
