//! A small association list, used for the graph's back-edges.
//!
//! Every execution node maps its parents to the Link on that edge.  Almost
//! all nodes have exactly one parent, and a shared dependency rarely more
//! than a handful, so a vector of pairs beats a hash map here: lookups
//! walk at most a few entries, and iteration preserves insertion order,
//! which keeps trace output and the upward cycle search deterministic.

use std::borrow::Borrow;

pub struct SmallMap<K, V>(Vec<(K, V)>);

impl<K, V> Default for SmallMap<K, V> {
    fn default() -> Self {
        SmallMap(Vec::new())
    }
}

impl<K: PartialEq, V> SmallMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing any existing entry for the key.  Edge bookkeeping
    /// depends on the replacement: reconnecting a parent whose edge was
    /// torn down must not leave two links for the same edge behind, since
    /// unlink() removes exactly one.
    pub fn insert(&mut self, k: K, v: V) {
        match self.get_mut(&k) {
            Some(slot) => *slot = v,
            None => self.0.push((k, v)),
        }
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.0
            .iter()
            .find(|(k, _)| k.borrow() == q)
            .map(|(_, v)| v)
    }

    /// Mutable lookup, used to merge the flags of a duplicate dependency
    /// into the already-stored Link instead of stacking a second edge.
    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.0
            .iter_mut()
            .find(|(k, _)| (*k).borrow() == q)
            .map(|(_, v)| v)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.get(q).is_some()
    }

    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let i = self.0.iter().position(|(k, _)| k.borrow() == q)?;
        Some(self.0.remove(i).1)
    }

    /// The oldest surviving entry.  Error traces follow one arbitrary but
    /// stable path to the root, and this is how the path is chosen.
    pub fn first(&self) -> Option<(&K, &V)> {
        self.0.first().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<(K, V)> {
        self.0.iter()
    }
}
