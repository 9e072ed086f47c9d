// SIP: SIAL instruction processor, distributed block runtime.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2024 by
//     Dr Maxim Orlovsky <orlovsky@ubideco.org>
//
// Copyright (C) 2021-2024 UBIDECO Labs,
//     Laboratories for Distributed and Cognitive Computing, Switzerland.
//     All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

use crate::block::{ArrayId, BlockId, RegionId};
use crate::constants::MAX_RANK;
use crate::error::StorageBug;

/// Identity under which blocks are kept in a [`BlockStorage`].
///
/// Point identities never overlap unless equal; region identities may overlap, and the
/// storage must reject such insertions.
pub trait BlockKey: Copy + Display {
    /// Total order used by the underlying ordered map.
    type SortKey: Ord + Copy + Debug;

    /// Whether keys are single blocks, for which overlap means equality.
    const POINT: bool;

    fn array_id(&self) -> ArrayId;

    /// Same identity within another array.
    fn with_array(&self, array_id: ArrayId) -> Self;

    fn sort_key(&self) -> Self::SortKey;

    /// Largest sort key of a stored identity which may enclose this one.
    fn enclosing_probe(&self) -> Self::SortKey;

    fn encloses(&self, other: &Self) -> bool;

    fn overlaps(&self, other: &Self) -> bool;
}

impl BlockKey for BlockId {
    type SortKey = [i32; MAX_RANK];
    const POINT: bool = true;

    #[inline]
    fn array_id(&self) -> ArrayId { BlockId::array_id(self) }
    #[inline]
    fn with_array(&self, array_id: ArrayId) -> Self { BlockId::new(array_id, self.index_values()) }
    #[inline]
    fn sort_key(&self) -> Self::SortKey { *self.index_values() }
    #[inline]
    fn enclosing_probe(&self) -> Self::SortKey { *self.index_values() }
    #[inline]
    fn encloses(&self, other: &Self) -> bool { self == other }
    #[inline]
    fn overlaps(&self, other: &Self) -> bool { self == other }
}

impl BlockKey for RegionId {
    type SortKey = ([i32; MAX_RANK], [i32; MAX_RANK]);
    const POINT: bool = false;

    #[inline]
    fn array_id(&self) -> ArrayId { RegionId::array_id(self) }
    #[inline]
    fn with_array(&self, array_id: ArrayId) -> Self { RegionId::with_array(self, array_id) }
    #[inline]
    fn sort_key(&self) -> Self::SortKey { self.raw_bounds() }
    #[inline]
    fn enclosing_probe(&self) -> Self::SortKey { (self.raw_bounds().0, [i32::MAX; MAX_RANK]) }
    #[inline]
    fn encloses(&self, other: &Self) -> bool { RegionId::encloses(self, other) }
    #[inline]
    fn overlaps(&self, other: &Self) -> bool { RegionId::overlaps(self, other) }
}

type PerArrayMap<K, B> = BTreeMap<<K as BlockKey>::SortKey, (K, B)>;

/// Blocks owned by a single process, grouped per array.
///
/// The storage owns every block put into it; blocks leave it only through
/// [`BlockStorage::remove_and_take`] or are destroyed with their array.
#[derive(Debug)]
pub struct BlockStorage<K: BlockKey, B> {
    arrays: BTreeMap<ArrayId, PerArrayMap<K, B>>,
}

impl<K: BlockKey, B> Default for BlockStorage<K, B> {
    fn default() -> Self { BlockStorage { arrays: BTreeMap::new() } }
}

impl<K: BlockKey, B> BlockStorage<K, B> {
    #[inline]
    pub fn new() -> Self { default!() }

    /// Returns block with exactly this identity, if present.
    pub fn lookup(&self, id: &K) -> Option<&B> {
        self.arrays
            .get(&id.array_id())
            .and_then(|map| map.get(&id.sort_key()))
            .map(|(_, block)| block)
    }

    pub fn lookup_mut(&mut self, id: &K) -> Option<&mut B> {
        self.arrays
            .get_mut(&id.array_id())
            .and_then(|map| map.get_mut(&id.sort_key()))
            .map(|(_, block)| block)
    }

    #[inline]
    pub fn contains(&self, id: &K) -> bool { self.lookup(id).is_some() }

    /// Inserts new block, returning mutable reference to it.
    ///
    /// # Errors
    ///
    /// If a block with the same identity is present, or - for region keys - if the region
    /// overlaps any stored region of the same array.
    pub fn insert(&mut self, id: K, block: B) -> Result<&mut B, StorageBug> {
        let map = self.arrays.entry(id.array_id()).or_default();
        let key = id.sort_key();
        if map.contains_key(&key) {
            return Err(StorageBug::DuplicateBlock(id.to_string()));
        }
        if !K::POINT {
            if let Some((other, _)) = map.values().find(|(other, _)| other.overlaps(&id)) {
                return Err(StorageBug::OverlappingRegion(id.to_string(), other.to_string()));
            }
        }
        Ok(&mut map.entry(key).or_insert((id, block)).1)
    }

    /// Removes block from the storage, transferring its ownership to the caller.
    pub fn remove_and_take(&mut self, id: &K) -> Result<B, StorageBug> {
        self.arrays
            .get_mut(&id.array_id())
            .and_then(|map| map.remove(&id.sort_key()))
            .map(|(_, block)| block)
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))
    }

    /// Destroys all blocks of the array, returning their number.
    pub fn delete_array(&mut self, array_id: ArrayId) -> usize {
        self.arrays
            .remove(&array_id)
            .map(|map| map.len())
            .unwrap_or_default()
    }

    /// Finds the stored block which is equal to or encloses `id`.
    pub fn find_enclosing(&self, id: &K) -> Option<(&K, &B)> {
        let map = self.arrays.get(&id.array_id())?;
        if let Some((key, block)) = map.get(&id.sort_key()) {
            return Some((key, block));
        }
        map.range(..=id.enclosing_probe())
            .rev()
            .map(|(_, (key, block))| (key, block))
            .find(|(key, _)| key.encloses(id))
    }

    /// Identities of all blocks of the array in storage order.
    pub fn ids_of(&self, array_id: ArrayId) -> Vec<K> {
        self.arrays
            .get(&array_id)
            .map(|map| map.values().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    pub fn blocks_of(&self, array_id: ArrayId) -> impl Iterator<Item = (&K, &B)> {
        self.arrays
            .get(&array_id)
            .into_iter()
            .flat_map(|map| map.values().map(|(id, block)| (id, block)))
    }

    pub fn blocks_of_mut(&mut self, array_id: ArrayId) -> impl Iterator<Item = (&K, &mut B)> {
        self.arrays
            .get_mut(&array_id)
            .into_iter()
            .flat_map(|map| map.values_mut().map(|(id, block)| (&*id, block)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut B)> {
        self.arrays
            .values_mut()
            .flat_map(|map| map.values_mut().map(|(id, block)| (&*id, block)))
    }

    /// Arrays having at least one stored block.
    pub fn array_ids(&self) -> Vec<ArrayId> {
        self.arrays
            .iter()
            .filter(|(_, map)| !map.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize { self.arrays.values().map(BTreeMap::len).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{Block, BlockShape};

    fn block(size: usize) -> Block { Block::zeroed(BlockShape::new(&[size])) }

    #[test]
    fn point_blocks() {
        let mut storage = BlockStorage::<BlockId, Block>::new();
        let a = BlockId::new(1, &[1, 1]);
        let b = BlockId::new(1, &[1, 2]);
        let c = BlockId::new(2, &[1, 1]);
        storage.insert(a, block(2)).unwrap();
        storage.insert(b, block(3)).unwrap();
        storage.insert(c, block(4)).unwrap();
        assert_eq!(storage.len(), 3);
        assert_eq!(storage.lookup(&b).map(Block::size), Some(3));
        assert!(storage.lookup(&BlockId::new(1, &[2, 2])).is_none());
        assert_eq!(
            storage.insert(a, block(1)).unwrap_err(),
            StorageBug::DuplicateBlock(a.to_string())
        );
        assert_eq!(storage.ids_of(1), vec![a, b]);

        let taken = storage.remove_and_take(&a).unwrap();
        assert_eq!(taken.size(), 2);
        assert!(storage.remove_and_take(&a).is_err());

        assert_eq!(storage.delete_array(1), 1);
        assert_eq!(storage.delete_array(1), 0);
        assert_eq!(storage.array_ids(), vec![2]);
        assert_eq!(storage.find_enclosing(&c).map(|(id, _)| *id), Some(c));
    }

    #[test]
    fn regions() {
        let mut storage = BlockStorage::<RegionId, Block>::new();
        let left = RegionId::new(4, &[1, 1], &[5, 10]).unwrap();
        let right = RegionId::new(4, &[6, 1], &[10, 10]).unwrap();
        storage.insert(left, Block::zeroed(left.shape())).unwrap();
        storage.insert(right, Block::zeroed(right.shape())).unwrap();

        let crossing = RegionId::new(4, &[5, 5], &[6, 6]).unwrap();
        assert!(matches!(
            storage.insert(crossing, Block::zeroed(crossing.shape())),
            Err(StorageBug::OverlappingRegion(_, _))
        ));

        let inside = RegionId::new(4, &[7, 2], &[9, 3]).unwrap();
        assert_eq!(storage.find_enclosing(&inside).map(|(id, _)| *id), Some(right));
        let same_lower = RegionId::new(4, &[1, 1], &[2, 2]).unwrap();
        assert_eq!(storage.find_enclosing(&same_lower).map(|(id, _)| *id), Some(left));
        assert!(storage.find_enclosing(&crossing).is_none());
        assert!(storage.find_enclosing(&RegionId::new(5, &[1, 1], &[1, 1]).unwrap()).is_none());
    }

    #[test]
    fn enclosing_not_predecessor() {
        // the enclosing region is not the lexicographic predecessor of the probe
        let mut storage = BlockStorage::<RegionId, ()>::new();
        let tall = RegionId::new(1, &[1, 5], &[3, 8]).unwrap();
        let flat = RegionId::new(1, &[2, 1], &[2, 3]).unwrap();
        storage.insert(tall, ()).unwrap();
        storage.insert(flat, ()).unwrap();
        let probe = RegionId::new(1, &[2, 6], &[2, 6]).unwrap();
        assert_eq!(storage.find_enclosing(&probe).map(|(id, _)| *id), Some(tall));
    }
}
