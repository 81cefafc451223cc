//! [`TinySecondaryMap`]: a sparse map keyed by a [`Key`] already allocated elsewhere.
//!
//! Used where a record is optional for a given key allocated in a [`crate::TinyMap`] -- e.g. not
//! every federate has registered filters, not every handle has a target set yet.

use std::{fmt::Debug, marker::PhantomData, ops::{Index, IndexMut}};

use crate::Key;

/// A map keyed by an externally-allocated [`Key`], with holes for absent entries.
///
/// See the [module-level documentation](self) for more information.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TinySecondaryMap<K: Key, V> {
    data: Vec<Option<V>>,
    num_values: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    _k: PhantomData<K>,
}

impl<K: Key + Debug, V: Debug> Debug for TinySecondaryMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Key, V> Default for TinySecondaryMap<K, V> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            num_values: 0,
            _k: PhantomData,
        }
    }
}

impl<K: Key, V> Index<K> for TinySecondaryMap<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &Self::Output {
        self.data[key.index()]
            .as_ref()
            .expect("no entry for key")
    }
}

impl<K: Key, V> IndexMut<K> for TinySecondaryMap<K, V> {
    fn index_mut(&mut self, key: K) -> &mut Self::Output {
        self.data[key.index()]
            .as_mut()
            .expect("no entry for key")
    }
}

impl<K: Key, V> TinySecondaryMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            num_values: 0,
            _k: PhantomData,
        }
    }

    /// Inserts `value` at `key`, growing the backing storage with holes as needed.
    ///
    /// Returns the value previously stored at `key`, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let index = key.index();
        if index >= self.data.len() {
            self.data.resize_with(index + 1, || None);
        }
        let previous = self.data[index].replace(value);
        if previous.is_none() {
            self.num_values += 1;
        }
        previous
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        let index = key.index();
        let removed = self.data.get_mut(index).and_then(Option::take);
        if removed.is_some() {
            self.num_values -= 1;
        }
        removed
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.data.get(key.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.data.get_mut(key.index()).and_then(Option::as_mut)
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of present (non-hole) entries.
    pub fn len(&self) -> usize {
        self.num_values
    }

    pub fn is_empty(&self) -> bool {
        self.num_values == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (K::from(index), value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.data
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (K::from(index), value)))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.data.iter().filter_map(Option::as_ref)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.data.iter_mut().filter_map(Option::as_mut)
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.is_some().then(|| K::from(index)))
    }
}

impl<K: Key, V> IntoIterator for TinySecondaryMap<K, V> {
    type Item = (K, V);
    type IntoIter = std::iter::FilterMap<
        std::iter::Enumerate<std::vec::IntoIter<Option<V>>>,
        fn((usize, Option<V>)) -> Option<(K, V)>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.data
            .into_iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|value| (K::from(index), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_type;

    key_type!(pub K);

    #[test]
    fn insert_get_remove() {
        let mut m = TinySecondaryMap::<K, &str>::new();
        let k0 = K::from(0usize);
        let k5 = K::from(5usize);
        assert_eq!(m.insert(k5, "five"), None);
        assert_eq!(m.len(), 1);
        assert!(m.get(k0).is_none());
        assert_eq!(m[k5], "five");
        assert_eq!(m.remove(k5), Some("five"));
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn iter_skips_holes() {
        let mut m = TinySecondaryMap::<K, i32>::new();
        m.insert(K::from(0usize), 0);
        m.insert(K::from(3usize), 3);
        let collected: Vec<_> = m.iter().map(|(k, v)| (k.index(), *v)).collect();
        assert_eq!(collected, vec![(0, 0), (3, 3)]);
    }
}
