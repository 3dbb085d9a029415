//! Reference-counted copy-on-write dictionaries.
//!
//! A dictionary is a parallel pair of key and value lists threaded by an
//! index hash table: `hashtab[h]` holds the first key index in bucket `h`,
//! and `links[i]` the next key index in the same bucket. Key order is
//! insertion order; deletion compacts the lists.

use crate::list::List;
use crate::string::CmmString;
use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;

const STARTING_BUCKETS: usize = 8;

#[derive(Debug, Clone)]
struct DictInner {
    keys: List,
    values: List,
    links: Vec<i32>,
    hashtab: Vec<i32>,
}

/// A shared dictionary with clone-on-shared mutation.
#[derive(Debug, Clone)]
pub struct Dict(Arc<DictInner>);

impl DictInner {
    fn empty() -> Self {
        DictInner {
            keys: List::new(),
            values: List::new(),
            links: Vec::new(),
            hashtab: vec![-1; STARTING_BUCKETS],
        }
    }

    fn bucket(&self, key: &Value) -> usize {
        (key.hash() % self.hashtab.len() as u64) as usize
    }

    fn find(&self, key: &Value) -> Option<usize> {
        let mut ind = self.hashtab[self.bucket(key)];
        while ind != -1 {
            let i = ind as usize;
            if self.keys.get(i) == key {
                return Some(i);
            }
            ind = self.links[i];
        }
        None
    }

    fn insert_link(&mut self, ind: usize) {
        let bucket = self.bucket(self.keys.get(ind)) % self.hashtab.len();
        self.links[ind] = self.hashtab[bucket];
        self.hashtab[bucket] = ind as i32;
    }

    fn rehash(&mut self) {
        let buckets = (self.hashtab.len() * 2).max(STARTING_BUCKETS);
        self.hashtab = vec![-1; buckets];
        self.links = vec![-1; self.keys.len()];
        for ind in 0..self.keys.len() {
            self.insert_link(ind);
        }
    }

    fn rebuild(&mut self) {
        let buckets = self.hashtab.len().max(STARTING_BUCKETS);
        self.hashtab = vec![-1; buckets];
        self.links = vec![-1; self.keys.len()];
        for ind in 0..self.keys.len() {
            self.insert_link(ind);
        }
    }
}

impl Dict {
    pub fn new() -> Self {
        Dict(Arc::new(DictInner::empty()))
    }

    /// Builds a dictionary from parallel key and value lists. Later
    /// duplicates of a key override earlier ones.
    pub fn from_keys_values(keys: &List, values: &List) -> Self {
        let mut dict = Dict::new();
        for (k, v) in keys.iter().zip(values.iter()) {
            dict.add(k.clone(), v.clone());
        }
        dict
    }

    /// Builds a dictionary from a list of `[key, value]` pairs, or `None` if
    /// any element is not a two-element list.
    pub fn from_slices(pairs: &List) -> Option<Self> {
        let mut dict = Dict::new();
        for pair in pairs.iter() {
            match pair {
                Value::List(assoc) if assoc.len() == 2 => {
                    dict.add(assoc.get(0).clone(), assoc.get(1).clone());
                }
                _ => return None,
            }
        }
        Some(dict)
    }

    pub fn len(&self) -> usize {
        self.0.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.keys.is_empty()
    }

    pub fn keys(&self) -> &List {
        &self.0.keys
    }

    pub fn values(&self) -> &List {
        &self.0.values
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.0.find(key).is_some()
    }

    /// The value bound to `key`, or `None` (the operator layer reports
    /// `~keynf`).
    pub fn find(&self, key: &Value) -> Option<&Value> {
        self.0.find(key).map(|ind| self.0.values.get(ind))
    }

    /// Binds `key` to `value`, replacing any existing binding in place.
    pub fn add(&mut self, key: Value, value: Value) {
        let inner = Arc::make_mut(&mut self.0);
        if let Some(ind) = inner.find(&key) {
            inner.values.replace(ind, value);
            return;
        }
        inner.keys.add(key);
        inner.values.add(value);
        inner.links.push(-1);
        let ind = inner.keys.len() - 1;
        if inner.keys.len() > inner.hashtab.len() {
            inner.rehash();
        } else {
            inner.insert_link(ind);
        }
    }

    /// Removes the binding for `key`. Returns false if absent. The key and
    /// value lists are compacted.
    pub fn del(&mut self, key: &Value) -> bool {
        let inner = Arc::make_mut(&mut self.0);
        match inner.find(key) {
            None => false,
            Some(ind) => {
                inner.keys.delete(ind);
                inner.values.delete(ind);
                inner.rebuild();
                true
            }
        }
    }

    /// Structural equality: same keys bound to equal values, in order.
    pub fn eq_entries(&self, other: &Dict) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.keys == other.0.keys && self.0.values == other.0.values
    }

    /// Total order: key lists, then value lists.
    pub fn order(&self, other: &Dict) -> Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ordering::Equal;
        }
        self.0
            .keys
            .order(&other.0.keys)
            .then_with(|| self.0.values.order(&other.0.values))
    }

    /// Appends the literal form `#[[k, v], ...]` to `out`.
    pub fn add_literal_to(&self, out: &mut CmmString) {
        out.add("#[");
        for (i, (k, v)) in self.0.keys.iter().zip(self.0.values.iter()).enumerate() {
            if i > 0 {
                out.add(", ");
            }
            out.add_char('[');
            k.add_literal_to(out);
            out.add(", ");
            v.add_literal_to(out);
            out.add_char(']');
        }
        out.add_char(']');
    }
}

impl Default for Dict {
    fn default() -> Self {
        Dict::new()
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.eq_entries(other)
    }
}

impl Eq for Dict {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Value {
        Value::symbol(crate::ident::get(s))
    }

    #[test]
    fn add_find_del() {
        let mut dict = Dict::new();
        dict.add(Value::Int(1), Value::Str("one".into()));
        dict.add(sym("two"), Value::Int(2));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.find(&Value::Int(1)), Some(&Value::Str("one".into())));
        assert_eq!(dict.find(&sym("two")), Some(&Value::Int(2)));
        assert!(dict.find(&Value::Int(3)).is_none());

        assert!(dict.del(&Value::Int(1)));
        assert!(!dict.del(&Value::Int(1)));
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.find(&sym("two")), Some(&Value::Int(2)));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut dict = Dict::new();
        for n in 0..20 {
            dict.add(Value::Int(n), Value::Int(n * n));
        }
        let keys: Vec<i64> = dict
            .keys()
            .iter()
            .map(|k| match k {
                Value::Int(n) => *n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, (0..20).collect::<Vec<i64>>());
        // Replacement keeps the slot.
        dict.add(Value::Int(3), Value::Int(0));
        assert_eq!(dict.keys().len(), 20);
        assert_eq!(dict.find(&Value::Int(3)), Some(&Value::Int(0)));
    }

    #[test]
    fn shared_dicts_copy_on_write() {
        let mut a = Dict::new();
        a.add(Value::Int(1), Value::Int(10));
        let b = a.clone();
        a.add(Value::Int(2), Value::Int(20));
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn from_slices_rejects_malformed_pairs() {
        let pairs = List::from_vec(vec![Value::Int(1)]);
        assert!(Dict::from_slices(&pairs).is_none());

        let good = List::from_vec(vec![Value::List(List::from_vec(vec![
            Value::Int(1),
            Value::Int(2),
        ]))]);
        let dict = Dict::from_slices(&good).expect("pairs should build");
        assert_eq!(dict.find(&Value::Int(1)), Some(&Value::Int(2)));
    }
}
