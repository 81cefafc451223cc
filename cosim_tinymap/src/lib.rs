//! Small, dense, integer-keyed map types used throughout `cosim` for routing tables, handle
//! registries and dependency records.
//!
//! The federation core never needs generic hashing: every key space (local federate ids,
//! interface handles, route ids, ...) is densely allocated by its owner, so a `Vec`-backed map
//! indexed directly by the key's integer value is both simpler and faster than a `HashMap`.
#![deny(clippy::all)]

pub mod map;
pub mod secondary;

pub use map::TinyMap;
pub use secondary::TinySecondaryMap;

/// A type that can be used as a key into a [`TinyMap`]/[`TinySecondaryMap`].
///
/// Keys are produced by the map itself on insertion; callers should not construct them from
/// arbitrary integers except when decoding a key that was previously observed on the wire.
pub trait Key: From<usize> + Copy + Eq + Ord {
    fn index(&self) -> usize;
}

/// Declare a newtype wrapping `u64` that implements [`Key`].
#[macro_export]
macro_rules! key_type {
    ($(#[$outer:meta])* $vis:vis $name:ident) => {
        $(#[$outer])*
        #[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        $vis struct $name(u64);

        impl $crate::Key for $name {
            fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                Self(value as _)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

key_type!(
    /// A generic default key, useful in tests and examples.
    pub DefaultKey
);

#[cfg(test)]
mod tests {
    use super::*;

    key_type!(pub TestKey);

    #[test]
    fn key_roundtrips_through_index() {
        let k = TestKey::from(42usize);
        assert_eq!(k.index(), 42);
    }
}
