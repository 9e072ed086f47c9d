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

use std::sync::Arc;

use super::{BlockHandle, BlockOps};
use crate::block::{ArrayId, Block, BlockId, RegionId};
use crate::error::{SipError, StorageBug};
use crate::storage::{BlockStorage, PersistentMarks, PersistentStore};
use crate::tables::{ArrayMetadata, ProgramTables};

/// Arrays a worker keeps between programs.
#[derive(Debug, Default)]
pub struct LocalPersistence {
    blocks: PersistentStore<BlockId, Block>,
    regions: PersistentStore<RegionId, Block>,
}

impl LocalPersistence {
    #[inline]
    pub fn new() -> Self { default!() }

    /// Labels of all kept arrays.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = self
            .blocks
            .labels()
            .chain(self.regions.labels())
            .map(str::to_owned)
            .collect::<Vec<_>>();
        labels.sort();
        labels
    }
}

/// Block operations on arrays kept in worker memory.
///
/// In single-process jobs every array lives here. In distributed jobs the worker client
/// delegates local and contiguous arrays to it.
#[derive(Debug)]
pub struct LocalBlockOps {
    tables: Arc<ProgramTables>,
    blocks: BlockStorage<BlockId, Block>,
    statics: BlockStorage<RegionId, Block>,
    marks: PersistentMarks,
    persistence: LocalPersistence,
    section: i32,
}

impl LocalBlockOps {
    pub fn with(tables: Arc<ProgramTables>, persistence: LocalPersistence) -> Self {
        LocalBlockOps {
            tables,
            blocks: BlockStorage::new(),
            statics: BlockStorage::new(),
            marks: PersistentMarks::new(),
            persistence,
            section: 0,
        }
    }

    #[inline]
    pub fn section(&self) -> i32 { self.section }

    #[inline]
    pub fn num_blocks(&self) -> usize { self.blocks.len() + self.statics.len() }

    /// Gives back the arrays kept for the next program.
    pub fn into_persistence(self) -> LocalPersistence { self.persistence }

    fn checked_data(&self, id: &BlockId, data: Vec<f64>) -> Result<Vec<f64>, SipError> {
        let expected = self.tables.block_element_count(id)?;
        if data.len() != expected {
            return Err(StorageBug::WrongSize(expected, data.len()).into());
        }
        Ok(data)
    }

    fn block_for_updating(&mut self, id: &BlockId) -> Result<&mut Block, SipError> {
        if !self.blocks.contains(id) {
            let shape = self.tables.block_shape(id)?;
            self.blocks.insert(*id, Block::zeroed(shape))?;
        }
        Ok(self
            .blocks
            .lookup_mut(id)
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))?)
    }

    fn label(&self, string_slot: i32) -> Result<String, SipError> {
        Ok(self.tables.string_literal(string_slot)?.to_owned())
    }
}

impl BlockOps for LocalBlockOps {
    fn get(&mut self, id: &BlockId, line: i32) -> Result<BlockHandle, SipError> {
        if !self.blocks.contains(id) {
            warn!("block {id} is read at line {line} before being written; using zeros");
            self.block_for_updating(id)?;
        }
        Ok(BlockHandle::new(*id))
    }

    fn read(&mut self, handle: BlockHandle) -> Result<&Block, SipError> {
        let id = handle.id();
        Ok(self
            .blocks
            .lookup(&id)
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))?)
    }

    fn put_replace(&mut self, id: &BlockId, data: Vec<f64>, _line: i32) -> Result<(), SipError> {
        let data = self.checked_data(id, data)?;
        self.block_for_updating(id)?.replace(data)?;
        Ok(())
    }

    fn put_accumulate(
        &mut self,
        id: &BlockId,
        data: Vec<f64>,
        _line: i32,
    ) -> Result<(), SipError> {
        let data = self.checked_data(id, data)?;
        self.block_for_updating(id)?.accumulate(&data)?;
        Ok(())
    }

    fn put_initialize(&mut self, id: &BlockId, value: f64, _line: i32) -> Result<(), SipError> {
        Ok(self.block_for_updating(id)?.fill(value)?)
    }

    fn put_increment(&mut self, id: &BlockId, value: f64, _line: i32) -> Result<(), SipError> {
        Ok(self.block_for_updating(id)?.increment(value)?)
    }

    fn put_scale(&mut self, id: &BlockId, value: f64, _line: i32) -> Result<(), SipError> {
        Ok(self.block_for_updating(id)?.scale(value)?)
    }

    fn delete(&mut self, array_id: ArrayId, line: i32) -> Result<(), SipError> {
        let count = self.blocks.delete_array(array_id) + self.statics.delete_array(array_id);
        debug!("deleted {count} local blocks of array {array_id} at line {line}");
        Ok(())
    }

    fn set_persistent(
        &mut self,
        array_id: ArrayId,
        string_slot: i32,
        _line: i32,
    ) -> Result<(), SipError> {
        let label = self.label(string_slot)?;
        self.marks.mark(array_id, label);
        Ok(())
    }

    fn restore_persistent(
        &mut self,
        array_id: ArrayId,
        string_slot: i32,
        line: i32,
    ) -> Result<(), SipError> {
        let label = self.label(string_slot)?;
        let count = if self.tables.is_contiguous(array_id) {
            self.persistence.regions.restore(&label, array_id, &mut self.statics)?
        } else {
            self.persistence.blocks.restore(&label, array_id, &mut self.blocks)?
        };
        debug!("restored {count} blocks of '{label}' as array {array_id} at line {line}");
        Ok(())
    }

    fn create_static(&mut self, array_id: ArrayId, data: Vec<f64>) -> Result<(), SipError> {
        let region = self.tables.static_region(array_id)?;
        let block = if data.is_empty() {
            Block::zeroed(region.shape())
        } else {
            Block::with_data(region.shape(), data)?
        };
        self.statics.insert(region, block)?;
        Ok(())
    }

    fn static_slice(&self, region: &RegionId) -> Result<Block, SipError> {
        let (whole, block) = self
            .statics
            .find_enclosing(region)
            .ok_or_else(|| StorageBug::MissingBlock(region.to_string()))?;
        Ok(block.extract_slice(whole, region)?)
    }

    fn barrier(&mut self) -> Result<(), SipError> {
        self.section += 1;
        Ok(())
    }

    fn end_program(&mut self) -> Result<(), SipError> {
        for (array_id, label) in self.marks.take() {
            let count = if self.tables.is_contiguous(array_id) {
                self.persistence.regions.save(&label, array_id, &mut self.statics)?
            } else {
                self.persistence.blocks.save(&label, array_id, &mut self.blocks)?
            };
            info!("array {array_id} kept as '{label}' ({count} blocks)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tables::{ArrayInfo, ArrayKind, IndexRange};

    fn tables() -> Arc<ProgramTables> {
        let mut tables = ProgramTables::new("local");
        tables.add_array(ArrayInfo::new("a", ArrayKind::Local, vec![IndexRange::uniform(2, 2)]));
        tables.add_array(ArrayInfo::new("s", ArrayKind::Static, vec![
            IndexRange::uniform(2, 2),
            IndexRange::uniform(1, 3),
        ]));
        tables.add_string("kept");
        Arc::new(tables)
    }

    #[test]
    fn block_arithmetics() {
        let mut ops = LocalBlockOps::with(tables(), LocalPersistence::new());
        let id = BlockId::new(0, &[2]);
        ops.put_replace(&id, vec![1.0, 2.0], 1).unwrap();
        ops.put_accumulate(&id, vec![1.0, 1.0], 2).unwrap();
        ops.put_scale(&id, 2.0, 3).unwrap();
        ops.put_increment(&id, 0.5, 4).unwrap();
        let handle = ops.get(&id, 5).unwrap();
        assert_eq!(ops.read(handle).unwrap().data().unwrap(), &[4.5, 6.5]);
        assert!(ops.put_replace(&id, vec![1.0], 6).is_err());

        let fresh = ops.get(&BlockId::new(0, &[1]), 7).unwrap();
        assert_eq!(ops.read(fresh).unwrap().data().unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn static_slices() {
        let mut ops = LocalBlockOps::with(tables(), LocalPersistence::new());
        ops.create_static(1, (1..=12).map(f64::from).collect()).unwrap();
        let part = RegionId::new(1, &[3, 2], &[4, 3]).unwrap();
        let slice = ops.static_slice(&part).unwrap();
        assert_eq!(slice.data().unwrap(), &[7.0, 8.0, 11.0, 12.0]);
        assert!(ops.static_slice(&RegionId::new(1, &[4, 1], &[5, 1]).unwrap()).is_err());
    }

    #[test]
    fn kept_between_programs() {
        let mut ops = LocalBlockOps::with(tables(), LocalPersistence::new());
        ops.put_initialize(&BlockId::new(0, &[1]), 3.0, 1).unwrap();
        ops.set_persistent(0, 0, 2).unwrap();
        ops.end_program().unwrap();
        assert_eq!(ops.num_blocks(), 0);
        let persistence = ops.into_persistence();
        assert_eq!(persistence.labels(), vec![s!("kept")]);

        let mut ops = LocalBlockOps::with(tables(), persistence);
        ops.restore_persistent(0, 0, 1).unwrap();
        let handle = ops.get(&BlockId::new(0, &[1]), 2).unwrap();
        assert_eq!(ops.read(handle).unwrap().data().unwrap(), &[3.0, 3.0]);
        assert!(ops.restore_persistent(0, 0, 3).is_err());
    }
}
