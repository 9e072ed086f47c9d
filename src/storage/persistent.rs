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

use super::{BlockKey, BlockStorage};
use crate::block::ArrayId;
use crate::error::SipError;

/// Arrays marked persistent during the current program, with their labels.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct PersistentMarks {
    marks: BTreeMap<ArrayId, String>,
}

impl PersistentMarks {
    #[inline]
    pub fn new() -> Self { default!() }

    /// Marks the array to be saved under the label at the end of the program. Marking the same
    /// array again replaces the label.
    pub fn mark(&mut self, array_id: ArrayId, label: impl ToString) {
        let label = label.to_string();
        if let Some(prev) = self.marks.insert(array_id, label.clone()) {
            if prev != label {
                warn!("array {array_id} was marked persistent as '{prev}', now as '{label}'");
            }
        }
    }

    #[inline]
    pub fn is_marked(&self, array_id: ArrayId) -> bool { self.marks.contains_key(&array_id) }

    #[inline]
    pub fn is_empty(&self) -> bool { self.marks.is_empty() }

    /// Takes all marks, leaving the set empty for the next program.
    pub fn take(&mut self) -> Vec<(ArrayId, String)> {
        core::mem::take(&mut self.marks).into_iter().collect()
    }
}

/// Arrays kept between programs of a single-process job, keyed by their labels.
///
/// Blocks migrate in and out of the store by ownership transfer; they are never copied.
#[derive(Debug)]
pub struct PersistentStore<K: BlockKey, B> {
    arrays: BTreeMap<String, Vec<(K, B)>>,
}

impl<K: BlockKey, B> Default for PersistentStore<K, B> {
    fn default() -> Self { PersistentStore { arrays: BTreeMap::new() } }
}

impl<K: BlockKey, B> PersistentStore<K, B> {
    #[inline]
    pub fn new() -> Self { default!() }

    #[inline]
    pub fn contains(&self, label: &str) -> bool { self.arrays.contains_key(label) }

    pub fn labels(&self) -> impl Iterator<Item = &str> { self.arrays.keys().map(String::as_str) }

    /// Moves all blocks of the array into the store. An array previously saved under the same
    /// label is replaced.
    pub fn save(
        &mut self,
        label: &str,
        array_id: ArrayId,
        storage: &mut BlockStorage<K, B>,
    ) -> Result<usize, SipError> {
        let mut blocks = vec![];
        for id in storage.ids_of(array_id) {
            let block = storage.remove_and_take(&id)?;
            blocks.push((id, block));
        }
        let count = blocks.len();
        if self.arrays.insert(label.to_owned(), blocks).is_some() {
            debug!("persistent array '{label}' is replaced");
        }
        Ok(count)
    }

    /// Moves blocks saved under the label back into the storage as blocks of the array.
    pub fn restore(
        &mut self,
        label: &str,
        array_id: ArrayId,
        storage: &mut BlockStorage<K, B>,
    ) -> Result<usize, SipError> {
        let blocks = self
            .arrays
            .remove(label)
            .ok_or_else(|| SipError::input(format!("no persistent array is saved as '{label}'")))?;
        let count = blocks.len();
        for (id, block) in blocks {
            storage.insert(id.with_array(array_id), block)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{Block, BlockId, BlockShape, RegionId};

    #[test]
    fn marks() {
        let mut marks = PersistentMarks::new();
        marks.mark(3, "energy");
        marks.mark(3, "energy2");
        marks.mark(5, "t2");
        assert!(marks.is_marked(3));
        assert_eq!(marks.take(), vec![(3, s!("energy2")), (5, s!("t2"))]);
        assert!(marks.is_empty());
    }

    #[test]
    fn blocks_move_between_programs() {
        let mut store = PersistentStore::<BlockId, Block>::new();
        let mut first = BlockStorage::new();
        let mut block = Block::zeroed(BlockShape::new(&[2]));
        block.fill(7.0).unwrap();
        first.insert(BlockId::new(2, &[1, 3]), block).unwrap();
        first.insert(BlockId::new(4, &[1, 1]), Block::zeroed(BlockShape::new(&[1]))).unwrap();

        assert_eq!(store.save("x", 2, &mut first).unwrap(), 1);
        assert!(first.lookup(&BlockId::new(2, &[1, 3])).is_none());
        assert_eq!(first.len(), 1);

        let mut second = BlockStorage::new();
        assert_eq!(store.restore("x", 0, &mut second).unwrap(), 1);
        let restored = second.lookup(&BlockId::new(0, &[1, 3])).unwrap();
        assert_eq!(restored.data().unwrap(), &[7.0, 7.0]);
        assert!(store.restore("x", 0, &mut second).is_err());
    }

    #[test]
    fn regions_keep_bounds() {
        let mut store = PersistentStore::<RegionId, Block>::new();
        let mut storage = BlockStorage::new();
        let region = RegionId::new(1, &[1, 1], &[3, 2]).unwrap();
        storage.insert(region, Block::zeroed(region.shape())).unwrap();
        store.save("static", 1, &mut storage).unwrap();
        assert_eq!(store.labels().collect::<Vec<_>>(), vec!["static"]);
        store.restore("static", 6, &mut storage).unwrap();
        assert_eq!(storage.ids_of(6), vec![region.with_array(6)]);
    }
}
