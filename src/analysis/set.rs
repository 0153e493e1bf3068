//! An insertion-ordered set keyed by an equality predicate rather than
//! `Eq`/`Hash`. Dependency records and policies compare through symbolic
//! function equivalence, which cannot back a hash, so every deduplicating
//! collection in the analyzer goes through this container. Sizes stay in the
//! tens to low hundreds, making the O(n·m) unions acceptable.

use std::fmt;

#[derive(Clone)]
pub struct EqSet<K> {
    eq: fn(&K, &K) -> bool,
    elems: Vec<K>,
}

impl<K: Clone> EqSet<K> {
    pub fn new(eq: fn(&K, &K) -> bool) -> Self {
        Self {
            eq,
            elems: Vec::new(),
        }
    }

    pub fn contains(&self, k: &K) -> bool {
        self.elems.iter().any(|e| (self.eq)(e, k))
    }

    /// Adds `k` unless an equal element is already present. Returns whether
    /// the set grew.
    pub fn insert(&mut self, k: K) -> bool {
        if self.contains(&k) {
            return false;
        }
        self.elems.push(k);
        true
    }

    pub fn remove(&mut self, k: &K) -> bool {
        match self.elems.iter().position(|e| (self.eq)(e, k)) {
            Some(i) => {
                self.elems.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn union(&mut self, other: &EqSet<K>) {
        for e in &other.elems {
            self.insert(e.clone());
        }
    }

    /// Keeps only the elements the other set also contains; the receiver's
    /// order is preserved.
    pub fn intersect(&mut self, other: &EqSet<K>) {
        self.elems.retain(|e| other.contains(e));
    }

    pub fn retain(&mut self, keep: impl FnMut(&K) -> bool) {
        self.elems.retain(keep);
    }

    /// Set equality: same size, and every element of each side is matched by
    /// some element of the other.
    pub fn equal(&self, other: &EqSet<K>) -> bool {
        self.len() == other.len()
            && other.elems.iter().all(|o| self.contains(o))
            && self.elems.iter().all(|e| other.contains(e))
    }

    pub fn elems(&self) -> &[K] {
        &self.elems
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }
}

impl<K: Clone> Extend<K> for EqSet<K> {
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        for k in iter {
            self.insert(k);
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for EqSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(&self.elems).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mod3_eq(a: &i64, b: &i64) -> bool {
        a.rem_euclid(3) == b.rem_euclid(3)
    }

    fn set_of(elems: &[i64]) -> EqSet<i64> {
        let mut s = EqSet::new(mod3_eq);
        s.extend(elems.iter().copied());
        s
    }

    #[test]
    fn insert_dedupes_through_the_predicate() {
        let mut s = EqSet::new(mod3_eq);
        assert!(s.insert(1));
        assert!(s.insert(2));
        assert!(!s.insert(4)); // 4 ≡ 1 (mod 3)
        assert_eq!(s.elems(), &[1, 2]);
    }

    #[test]
    fn union_and_intersect_preserve_receiver_order() {
        let mut s = set_of(&[0, 1]);
        s.union(&set_of(&[2, 3]));
        assert_eq!(s.elems(), &[0, 1, 2]);

        s.intersect(&set_of(&[2, 0]));
        assert_eq!(s.elems(), &[0, 2]);
    }

    #[test]
    fn remove_uses_the_predicate() {
        let mut s = set_of(&[0, 1, 2]);
        assert!(s.remove(&4));
        assert_eq!(s.elems(), &[0, 2]);
        assert!(!s.remove(&7));
    }

    #[test]
    fn equality_is_order_insensitive() {
        assert!(set_of(&[0, 1, 2]).equal(&set_of(&[2, 0, 1])));
        assert!(!set_of(&[0, 1]).equal(&set_of(&[0, 1, 2])));
        assert!(!set_of(&[0, 1]).equal(&set_of(&[0, 2])));
    }
}
