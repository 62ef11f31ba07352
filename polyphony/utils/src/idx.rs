//! Typed integer indices and the arenas they address.
use serde::{Deserialize, Serialize};
use std::{marker::PhantomData, ops};

pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    fn new(input: usize) -> Self;
}

#[macro_export]
/// Implements [IndexRef](crate::idx::IndexRef) for a newtype over `u32`
/// (or the given backing type), together with a `Display` that prefixes the
/// raw index with `$prefix`.
macro_rules! impl_index {
    ($struct_name: ident, $prefix: literal) => {
        impl_index!($struct_name, u32, $prefix);
    };

    ($struct_name: ident, $backing_ty: ty, $prefix: literal) => {
        impl $crate::idx::IndexRef for $struct_name {
            fn index(&self) -> usize {
                self.0 as usize
            }

            fn new(input: usize) -> Self {
                Self(input as $backing_ty)
            }
        }

        impl From<usize> for $struct_name {
            fn from(input: usize) -> Self {
                $crate::idx::IndexRef::new(input)
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

/// A vector addressed by a typed index. Entries are never removed, so ids
/// stay valid for the lifetime of the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedMap<K, D>
where
    K: IndexRef,
{
    data: Vec<D>,
    #[serde(skip)]
    phantom: PhantomData<K>,
}

impl<K, D> Default for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D> IndexedMap<K, D>
where
    K: IndexRef,
{
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: Vec::with_capacity(size),
            phantom: PhantomData,
        }
    }

    pub fn get(&self, index: K) -> Option<&D> {
        self.data.get(index.index())
    }

    pub fn get_mut(&mut self, index: K) -> Option<&mut D> {
        self.data.get_mut(index.index())
    }

    /// Inserts `item` and returns its key.
    pub fn push(&mut self, item: D) -> K {
        let idx = K::new(self.data.len());
        self.data.push(item);
        idx
    }

    /// The key that the next call to [IndexedMap::push] will return.
    pub fn peek_next_idx(&self) -> K {
        K::new(self.data.len())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, idx: K) -> bool {
        idx.index() < self.data.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.data.len()).map(K::new)
    }

    pub fn values(&self) -> impl Iterator<Item = &D> {
        self.data.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut D)> {
        self.data.iter_mut().enumerate().map(|(i, v)| (K::new(i), v))
    }

    /// Two distinct mutable entries at once. Returns None if the indices are
    /// equal or out of range.
    pub fn split_mut_indices(
        &mut self,
        idx1: K,
        idx2: K,
    ) -> Option<(&mut D, &mut D)> {
        let (i1, i2) = (idx1.index(), idx2.index());
        if i1 == i2 || i1 >= self.data.len() || i2 >= self.data.len() {
            return None;
        }
        if i1 < i2 {
            let (lo, hi) = self.data.split_at_mut(i2);
            Some((&mut lo[i1], &mut hi[0]))
        } else {
            let (lo, hi) = self.data.split_at_mut(i1);
            Some((&mut hi[0], &mut lo[i2]))
        }
    }
}

impl<K, D> ops::Index<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<K, D> ops::IndexMut<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    struct TestIdx(u32);
    impl_index!(TestIdx, "t");

    #[test]
    fn split_mut_returns_in_argument_order() {
        let mut map: IndexedMap<TestIdx, u32> = IndexedMap::new();
        let a = map.push(1);
        let b = map.push(2);
        let (x, y) = map.split_mut_indices(b, a).unwrap();
        assert_eq!((*x, *y), (2, 1));
        assert!(map.split_mut_indices(a, a).is_none());
        assert_eq!(format!("{b}"), "t1");
    }

    proptest! {
        #[test]
        fn pushed_keys_address_their_values(items in prop::collection::vec(any::<u32>(), 0..64)) {
            let mut map: IndexedMap<TestIdx, u32> = IndexedMap::new();
            let keys: Vec<_> = items.iter().map(|i| map.push(*i)).collect();
            for (k, v) in keys.iter().zip(items.iter()) {
                prop_assert_eq!(map[*k], *v);
            }
            prop_assert_eq!(map.len(), items.len());
        }
    }
}
