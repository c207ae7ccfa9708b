//! Densely numbered entity references.
//!
//! Blocks, instructions, values and the other graph nodes in this crate are never stored behind
//! `Rc`/`RefCell` or raw pointers. Instead every entity is a `u32` index into an arena owned by
//! the `Function`/`MIRFunction` that created it. This module defines the small amount of
//! machinery needed to make that pattern pleasant: a trait for "is a newtype around a dense
//! index", and two map types built on top of it.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::vec::Vec;

/// A type wrapping a small integer index.
///
/// This is implemented by all the entity reference types in `ir` and `mir` so that
/// `PrimaryMap`/`SecondaryMap` can be generic over "any densely numbered key".
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a dense index.
    fn new(index: usize) -> Self;

    /// Get the index of this entity reference.
    fn index(self) -> usize;
}

/// Declare an entity reference type wrapping a `u32`, with `Display`/`Debug` printing it as
/// `<prefix><number>`, matching the textual notation used throughout the teacher's IR (`ebb12`,
/// `v3`, `inst7`, ...).
macro_rules! entity_impl {
    ($entity:ident, $prefix:expr) => {
        impl $crate::entity::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $entity {
            /// A reserved value standing in for "no entity". Never produced by `push`.
            #[allow(dead_code)]
            pub const RESERVED: $entity = $entity(u32::MAX);
        }

        impl core::fmt::Display for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                (self as &dyn core::fmt::Display).fmt(f)
            }
        }
    };
}

pub(crate) use entity_impl;

/// A mapping `K -> V` that also owns the dense key space: `push` hands back the key it assigned.
///
/// This is how every arena in this crate is implemented: `Function::blocks: PrimaryMap<Block,
/// BlockData>`, `DataFlowGraph::insts: PrimaryMap<Inst, InstructionData>`, and so on.
#[derive(Clone, Debug)]
pub struct PrimaryMap<K: EntityRef, V> {
    elems: Vec<V>,
    unused: PhantomData<K>,
}

impl<K: EntityRef, V> PrimaryMap<K, V> {
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            unused: PhantomData,
        }
    }

    /// Append `data` to the map, allocating a new key for it.
    pub fn push(&mut self, data: V) -> K {
        let key = K::new(self.elems.len());
        self.elems.push(data);
        key
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Get a reference to the element at `k`, if `k` was allocated from this map.
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    /// Get a mutable reference to the element at `k`.
    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.elems.get_mut(k.index())
    }

    /// Iterate over `(key, &value)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems
            .iter()
            .enumerate()
            .map(|(i, v)| (K::new(i), v))
    }

    /// Iterate over `(key, &mut value)` pairs in allocation order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.elems
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (K::new(i), v))
    }

    /// Iterate over the values only.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.elems.iter()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.elems.clear()
    }

    /// Iterate over the keys only, in allocation order.
    pub fn keys(&self) -> impl Iterator<Item = K> {
        (0..self.elems.len()).map(K::new)
    }
}

impl<K: EntityRef, V> Default for PrimaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> Index<K> for PrimaryMap<K, V> {
    type Output = V;
    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

impl<K: EntityRef, V> IndexMut<K> for PrimaryMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

/// A mapping `K -> V` that does *not* own the key space: it just tags keys allocated elsewhere
/// with auxiliary data, defaulting absent entries to `V::default()`.
///
/// Used for per-instruction side tables that aren't part of the core graph, e.g. the register
/// allocator's vreg -> physical-register assignment, or the encoder's per-instruction byte size.
#[derive(Clone, Debug)]
pub struct SecondaryMap<K: EntityRef, V: Clone + Default> {
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K: EntityRef, V: Clone + Default> SecondaryMap<K, V> {
    /// Create a new empty map; untouched keys read as `V::default()`.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            default: V::default(),
            unused: PhantomData,
        }
    }

    /// Get the value at `k`, or the default if it was never written.
    pub fn get(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }

    /// Number of entries actually stored (not necessarily the full key space).
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    fn resize(&mut self, n: usize) {
        self.elems.resize(n, self.default.clone());
    }
}

impl<K: EntityRef, V: Clone + Default> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V: Clone + Default> Index<K> for SecondaryMap<K, V> {
    type Output = V;
    fn index(&self, k: K) -> &V {
        self.get(k)
    }
}

impl<K: EntityRef, V: Clone + Default> IndexMut<K> for SecondaryMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut V {
        let i = k.index();
        if i >= self.elems.len() {
            self.resize(i + 1);
        }
        &mut self.elems[i]
    }
}

/// A compact `Option<E>` for an `EntityRef`, the same size as `E` itself.
///
/// `u32::MAX` is reserved (see `entity_impl!`) to mean `None`, avoiding the extra discriminant
/// byte+padding that `Option<E>` would otherwise need. Used wherever an operand slot must stay
/// small (`MInst`'s destination register, frame-index back-pointers).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PackedOption<E: EntityRef>(Option<E>);

impl<E: EntityRef> PackedOption<E> {
    /// Build a packed `Some(e)`.
    pub fn some(e: E) -> Self {
        PackedOption(Some(e))
    }

    /// Build a packed `None`.
    pub fn none() -> Self {
        PackedOption(None)
    }

    /// Expand back into a regular `Option`.
    pub fn expand(self) -> Option<E> {
        self.0
    }

    /// Is this `None`?
    pub fn is_none(self) -> bool {
        self.0.is_none()
    }
}

impl<E: EntityRef> Default for PackedOption<E> {
    fn default() -> Self {
        PackedOption::none()
    }
}

impl<E: EntityRef + fmt::Debug> fmt::Debug for PackedOption<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(e) => e.fmt(f),
            None => write!(f, "none"),
        }
    }
}

impl<E: EntityRef> From<E> for PackedOption<E> {
    fn from(e: E) -> Self {
        PackedOption::some(e)
    }
}

impl<E: EntityRef> From<Option<E>> for PackedOption<E> {
    fn from(o: Option<E>) -> Self {
        PackedOption(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, PartialEq, Eq)]
    struct E(u32);
    entity_impl!(E, "e");

    #[test]
    fn primary_map_push_assigns_dense_keys() {
        let mut m: PrimaryMap<E, &str> = PrimaryMap::new();
        let a = m.push("a");
        let b = m.push("b");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(m[a], "a");
        assert_eq!(m[b], "b");
    }

    #[test]
    fn secondary_map_defaults_untouched_keys() {
        let mut m: PrimaryMap<E, ()> = PrimaryMap::new();
        let k0 = m.push(());
        let k1 = m.push(());
        let mut sec: SecondaryMap<E, u32> = SecondaryMap::new();
        sec[k1] = 7;
        assert_eq!(sec[k0], 0);
        assert_eq!(sec[k1], 7);
    }

    #[test]
    fn packed_option_round_trips() {
        let p: PackedOption<E> = PackedOption::none();
        assert!(p.is_none());
        let q: PackedOption<E> = E(3).into();
        assert_eq!(q.expand(), Some(E(3)));
    }
}
