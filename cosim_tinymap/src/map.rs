//! [`TinyMap`]: an append-only, densely-keyed map.
//!
//! Keys are allocated in insertion order; there is no removal. This matches every primary
//! registry in the federation core (federates, handles, brokers): entries are created once at
//! registration time and live for the lifetime of the participant.

use std::{
    fmt::Debug,
    iter::Enumerate,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

use crate::Key;

/// A map that uses a custom key type to densely index its values.
///
/// See the [module-level documentation](self) for more information.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TinyMap<K: Key, V> {
    data: Vec<V>,
    #[cfg_attr(feature = "serde", serde(skip))]
    _k: PhantomData<K>,
}

impl<K: Key + Debug, V: Debug> Debug for TinyMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Key, V> Default for TinyMap<K, V> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            _k: PhantomData,
        }
    }
}

impl<K: Key, V> Index<K> for TinyMap<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &Self::Output {
        &self.data[key.index()]
    }
}

impl<K: Key, V> IndexMut<K> for TinyMap<K, V> {
    fn index_mut(&mut self, key: K) -> &mut Self::Output {
        &mut self.data[key.index()]
    }
}

pub struct Iter<'a, K: Key, V> {
    inner: Enumerate<std::slice::Iter<'a, V>>,
    _k: PhantomData<K>,
}

impl<'a, K: Key, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(index, value)| (K::from(index), value))
    }
}

impl<K: Key, V> TinyMap<K, V> {
    /// Creates an empty `TinyMap`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            _k: PhantomData,
        }
    }

    /// Inserts a new value into the map and returns the freshly-allocated key.
    pub fn insert(&mut self, value: V) -> K {
        let key = K::from(self.data.len());
        self.data.push(value);
        key
    }

    /// Inserts a value built from its own about-to-be-allocated key.
    pub fn insert_with_key<F>(&mut self, f: F) -> K
    where
        F: FnOnce(K) -> V,
    {
        let key = K::from(self.data.len());
        self.data.push(f(key));
        key
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.data.get(key.index())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.data.get_mut(key.index())
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.data.len()).map(K::from)
    }

    pub fn values(&self) -> std::slice::Iter<'_, V> {
        self.data.iter()
    }

    pub fn values_mut(&mut self) -> std::slice::IterMut<'_, V> {
        self.data.iter_mut()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.data.iter().enumerate(),
            _k: PhantomData,
        }
    }
}

impl<K: Key, V> FromIterator<V> for TinyMap<K, V> {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Self {
            data: iter.into_iter().collect(),
            _k: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_type;

    key_type!(pub K);

    #[test]
    fn insert_and_index() {
        let mut m = TinyMap::<K, i32>::new();
        let k1 = m.insert(10);
        let k2 = m.insert(20);
        assert_eq!(m[k1], 10);
        assert_eq!(m[k2], 20);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn insert_with_key_sees_its_own_key() {
        let mut m = TinyMap::<K, K>::new();
        let k = m.insert_with_key(|k| k);
        assert_eq!(m[k], k);
    }
}
