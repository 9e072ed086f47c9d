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
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ArrayFile, ArrayLayout, BlockStorage, ServerBlock};
use crate::block::{ArrayId, BlockId};
use crate::constants::{ARRAY_FILE_EXT, PERSISTENT_FILE_EXT};
use crate::error::{SipError, StorageBug};
use crate::tables::{ArrayMetadata, ProgramTables};
use crate::topology::DataDistribution;
use crate::transport::{Endpoint, Rank};

/// Parameters of the disk-tiered storage of a single server.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct DiskConfig {
    /// Rank of the server; part of every file name.
    pub rank: Rank,
    /// Directory for array files.
    pub scratch_dir: PathBuf,
    /// Maximal number of bytes of block data kept in memory.
    pub memory_budget: usize,
}

/// Server block storage with demand paging of served arrays into per-array files.
///
/// Blocks of served arrays are evicted when the resident data exceed the memory budget,
/// least recently used array first. Evicted dirty blocks are written to the array file; blocks
/// having pending transfers are never evicted.
#[derive(Debug)]
pub struct DiskTieredStorage {
    config: DiskConfig,
    tables: Arc<ProgramTables>,
    distribution: Arc<DataDistribution>,
    blocks: BlockStorage<BlockId, ServerBlock>,
    files: BTreeMap<ArrayId, ArrayFile>,
    last_use: BTreeMap<ArrayId, u64>,
    clock: u64,
    resident_bytes: usize,
}

impl DiskTieredStorage {
    pub fn with(
        config: DiskConfig,
        tables: Arc<ProgramTables>,
        distribution: Arc<DataDistribution>,
    ) -> Self {
        DiskTieredStorage {
            config,
            tables,
            distribution,
            blocks: BlockStorage::new(),
            files: BTreeMap::new(),
            last_use: BTreeMap::new(),
            clock: 0,
            resident_bytes: 0,
        }
    }

    #[inline]
    pub fn resident_bytes(&self) -> usize { self.resident_bytes }

    #[inline]
    pub fn contains(&self, id: &BlockId) -> bool { self.blocks.contains(id) }

    /// Path of the scratch file of the array for the current program.
    pub fn array_file_path(&self, array_id: ArrayId) -> PathBuf {
        self.config.scratch_dir.join(format!(
            "server.{}.{}.{array_id}.{ARRAY_FILE_EXT}",
            self.config.rank, self.tables.name
        ))
    }

    /// Path of the persistent file holding the array saved under the label.
    pub fn persistent_file_path(&self, label: &str) -> PathBuf {
        persistent_file_path(&self.config.scratch_dir, self.config.rank, label)
    }

    /// Returns the block if it exists, reading its data from disk when they are not in memory.
    pub fn block_for_reading(
        &mut self,
        id: &BlockId,
    ) -> Result<Option<&mut ServerBlock>, SipError> {
        let resident = match self.blocks.lookup(id) {
            None => return Ok(None),
            Some(block) => {
                block.check_state(id)?;
                block.is_resident()
            }
        };
        if !resident {
            self.page_in(id)?;
        }
        self.touch(id.array_id());
        Ok(self.blocks.lookup_mut(id))
    }

    /// Returns the block for overwriting as a whole: data on disk are not read, and a missing
    /// block is created filled with zeros.
    pub fn block_for_writing(&mut self, id: &BlockId) -> Result<&mut ServerBlock, SipError> {
        match self.blocks.lookup(id).map(ServerBlock::is_resident) {
            None => self.create(id)?,
            Some(false) => {
                let size = self.element_count(id)?;
                self.make_room(size * 8)?;
                self.lookup_mut(id)?.allocate()?;
                self.resident_bytes += size * 8;
            }
            Some(true) => self.lookup_mut(id)?.mark_dirty(),
        }
        self.checked(id)
    }

    /// Returns the block for modification of its existing data; a missing block is created
    /// filled with zeros.
    pub fn block_for_updating(&mut self, id: &BlockId) -> Result<&mut ServerBlock, SipError> {
        match self.blocks.lookup(id).map(ServerBlock::is_resident) {
            None => self.create(id)?,
            Some(false) => {
                self.page_in(id)?;
                self.lookup_mut(id)?.mark_dirty();
            }
            Some(true) => self.lookup_mut(id)?.mark_dirty(),
        }
        self.checked(id)
    }

    /// Resets consistency trackers of all blocks at the start of a new section.
    pub fn reset_consistency(&mut self) -> Result<(), SipError> {
        for (id, block) in self.blocks.iter_mut() {
            block.tracker_mut().reset(*id)?;
        }
        Ok(())
    }

    /// Completes, without blocking, the pending transfers of all blocks whose data arrived.
    pub fn handle_pending(&mut self, endpoint: &mut Endpoint) -> Result<(), SipError> {
        for (_, block) in self.blocks.iter_mut() {
            let (data, pending) = block.parts_mut();
            if !pending.is_empty() {
                pending.try_handle_all(data, endpoint)?;
            }
        }
        Ok(())
    }

    /// Forces all pending transfers of the array, or of all arrays, to completion.
    pub fn wait_pending(
        &mut self,
        array_id: Option<ArrayId>,
        endpoint: &mut Endpoint,
    ) -> Result<(), SipError> {
        for (id, block) in self.blocks.iter_mut() {
            if array_id.map(|array_id| array_id == id.array_id()).unwrap_or(true) {
                let (data, pending) = block.parts_mut();
                pending.wait_all(data, endpoint)?;
            }
        }
        Ok(())
    }

    /// Drops all pending transfers when the job is failing.
    pub fn abandon_pending(&mut self) {
        for (_, block) in self.blocks.iter_mut() {
            block.parts_mut().1.abandon();
        }
    }

    /// Destroys all blocks of the array together with its file.
    pub fn delete_array(&mut self, array_id: ArrayId) -> Result<usize, SipError> {
        if let Some((id, _)) = self
            .blocks
            .blocks_of(array_id)
            .find(|(_, block)| !block.pending().is_empty())
        {
            return Err(StorageBug::PendingDropped(format!("transfer of block {id}")).into());
        }
        let freed = self
            .blocks
            .blocks_of(array_id)
            .map(|(_, block)| block.resident_bytes())
            .sum::<usize>();
        self.resident_bytes -= freed;
        let count = self.blocks.delete_array(array_id);
        self.last_use.remove(&array_id);
        if let Some(file) = self.files.remove(&array_id) {
            file.remove()?;
        }
        debug!("deleted {count} blocks of array {array_id}");
        Ok(count)
    }

    /// Writes all blocks of the array to the file and moves the file under the label.
    ///
    /// Dirty in-memory blocks are written; blocks which are only on disk are already in the
    /// file. The array leaves the storage.
    pub fn save_persistent(
        &mut self,
        array_id: ArrayId,
        label: &str,
    ) -> Result<PathBuf, SipError> {
        self.ensure_file(array_id)?;
        let file = self
            .files
            .get_mut(&array_id)
            .ok_or_else(|| SipError::Check(format!("array file for {array_id} is missing")))?;
        let mut written = 0usize;
        for (id, block) in self.blocks.blocks_of_mut(array_id) {
            block.check_state(id)?;
            if block.is_dirty() {
                file.write_block(id, block.block().data()?)?;
                block.stored();
                written += 1;
            }
        }
        let dest = self.persistent_file_path(label);
        let file = self
            .files
            .remove(&array_id)
            .ok_or_else(|| SipError::Check(format!("array file for {array_id} is missing")))?;
        let path = file.close_into(&dest)?;
        self.resident_bytes -= self
            .blocks
            .blocks_of(array_id)
            .map(|(_, block)| block.resident_bytes())
            .sum::<usize>();
        self.blocks.delete_array(array_id);
        self.last_use.remove(&array_id);
        info!(
            "array {array_id} saved as '{label}' into {} ({written} blocks written)",
            path.display()
        );
        Ok(path)
    }

    /// Brings the array saved under the label back as the array with the given id. Blocks are
    /// read from the file on demand.
    pub fn restore_persistent(
        &mut self,
        array_id: ArrayId,
        label: &str,
    ) -> Result<usize, SipError> {
        let source = self.persistent_file_path(label);
        if !source.exists() {
            return Err(SipError::input(format!(
                "server {} has no persistent array '{label}' ({} is missing)",
                self.config.rank,
                source.display()
            )));
        }
        if self.blocks.ids_of(array_id).first().is_some() || self.files.contains_key(&array_id) {
            return Err(SipError::input(format!(
                "persistent array '{label}' is restored into array {array_id} which already has \
                 blocks"
            )));
        }
        let dest = self.array_file_path(array_id);
        fs::rename(&source, &dest)?;
        let file = ArrayFile::open(&dest, array_id, self.layout_of(array_id)?)?;
        let present = file.present_blocks();
        for id in &present {
            let shape = self.tables.block_shape(id)?;
            self.blocks.insert(*id, ServerBlock::on_disk(shape))?;
        }
        self.files.insert(array_id, file);
        info!(
            "persistent array '{label}' restored as array {array_id} ({} blocks)",
            present.len()
        );
        Ok(present.len())
    }

    /// Removes scratch files of all arrays still held by the storage.
    pub fn cleanup(&mut self) -> Result<(), SipError> {
        let files = core::mem::take(&mut self.files);
        for (_, file) in files {
            file.remove()?;
        }
        Ok(())
    }

    fn lookup_mut(&mut self, id: &BlockId) -> Result<&mut ServerBlock, StorageBug> {
        self.blocks
            .lookup_mut(id)
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))
    }

    fn checked(&mut self, id: &BlockId) -> Result<&mut ServerBlock, SipError> {
        self.touch(id.array_id());
        let block = self.lookup_mut(id)?;
        block.check_state(id)?;
        Ok(block)
    }

    fn element_count(&self, id: &BlockId) -> Result<usize, SipError> {
        self.tables.block_element_count(id)
    }

    fn touch(&mut self, array_id: ArrayId) {
        self.clock += 1;
        self.last_use.insert(array_id, self.clock);
    }

    fn create(&mut self, id: &BlockId) -> Result<(), SipError> {
        let shape = self.tables.block_shape(id)?;
        self.make_room(shape.size() * 8)?;
        self.blocks.insert(*id, ServerBlock::zeroed(shape))?;
        self.resident_bytes += shape.size() * 8;
        trace!("block {id} created at server {}", self.config.rank);
        Ok(())
    }

    fn page_in(&mut self, id: &BlockId) -> Result<(), SipError> {
        let size = self.element_count(id)?;
        self.make_room(size * 8)?;
        let file = self
            .files
            .get_mut(&id.array_id())
            .ok_or(StorageBug::Lost(*id))?;
        let data = file.read_block(id)?;
        self.lookup_mut(id)?.loaded(data)?;
        self.resident_bytes += size * 8;
        trace!("block {id} paged in at server {}", self.config.rank);
        Ok(())
    }

    fn make_room(&mut self, needed: usize) -> Result<(), SipError> {
        while self.resident_bytes + needed > self.config.memory_budget {
            match self.eviction_candidate() {
                Some(victim) => self.evict(&victim)?,
                None => {
                    warn!(
                        "server {} exceeds memory budget of {} bytes: no block can be evicted",
                        self.config.rank, self.config.memory_budget
                    );
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn eviction_candidate(&self) -> Option<BlockId> {
        let mut arrays = self
            .blocks
            .array_ids()
            .into_iter()
            .filter(|array_id| self.tables.is_served(*array_id))
            .collect::<Vec<_>>();
        arrays.sort_by_key(|array_id| self.last_use.get(array_id).copied().unwrap_or_default());
        arrays.into_iter().find_map(|array_id| {
            self.blocks
                .blocks_of(array_id)
                .find(|(_, block)| block.is_resident() && block.pending().is_empty())
                .map(|(id, _)| *id)
        })
    }

    fn evict(&mut self, id: &BlockId) -> Result<(), SipError> {
        self.ensure_file(id.array_id())?;
        let block = self
            .blocks
            .lookup_mut(id)
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))?;
        if block.is_dirty() {
            let file = self
                .files
                .get_mut(&id.array_id())
                .ok_or(StorageBug::Lost(*id))?;
            file.write_block(id, block.block().data()?)?;
            block.stored();
        }
        self.resident_bytes -= block.resident_bytes();
        block.release();
        trace!("block {id} evicted at server {}", self.config.rank);
        Ok(())
    }

    fn layout_of(&self, array_id: ArrayId) -> Result<ArrayLayout, SipError> {
        let mut owned = vec![];
        for id in self.tables.blocks_of(array_id)? {
            if self
                .distribution
                .is_owned_by(&id, self.tables.as_ref(), self.config.rank)?
            {
                owned.push((id, self.tables.block_element_count(&id)?));
            }
        }
        Ok(ArrayLayout::new(owned))
    }

    fn ensure_file(&mut self, array_id: ArrayId) -> Result<(), SipError> {
        if !self.files.contains_key(&array_id) {
            let layout = self.layout_of(array_id)?;
            let file = ArrayFile::create(self.array_file_path(array_id), array_id, layout)?;
            self.files.insert(array_id, file);
        }
        Ok(())
    }
}

/// Path of the file holding the array a server saved under the label.
pub fn persistent_file_path(scratch_dir: &Path, rank: Rank, label: &str) -> PathBuf {
    scratch_dir.join(format!("server.{rank}.{label}.{PERSISTENT_FILE_EXT}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tables::{ArrayInfo, ArrayKind, IndexRange};
    use crate::topology::DistributionKind;

    fn tables() -> Arc<ProgramTables> {
        let mut tables = ProgramTables::new("prog");
        // 4 blocks of 2 elements
        tables.add_array(ArrayInfo::new("served", ArrayKind::Served, vec![IndexRange::uniform(
            4, 2,
        )]));
        tables.add_array(ArrayInfo::new("dist", ArrayKind::Distributed, vec![IndexRange::uniform(
            4, 2,
        )]));
        Arc::new(tables)
    }

    fn storage(dir: &Path, memory_budget: usize) -> DiskTieredStorage {
        let config = DiskConfig { rank: 0, scratch_dir: dir.to_path_buf(), memory_budget };
        let distribution = Arc::new(DataDistribution::with(DistributionKind::BlockCyclic, vec![0]));
        DiskTieredStorage::with(config, tables(), distribution)
    }

    #[test]
    fn eviction_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        // room for two blocks
        let mut storage = storage(dir.path(), 32);
        for i in 1..=4 {
            let id = BlockId::new(0, &[i]);
            storage.block_for_writing(&id).unwrap().block_mut().fill(i as f64).unwrap();
        }
        assert!(storage.resident_bytes() <= 32);

        let first = BlockId::new(0, &[1]);
        let block = storage.block_for_reading(&first).unwrap().unwrap();
        assert!(!block.is_dirty());
        assert!(block.is_on_disk());
        assert_eq!(block.block().data().unwrap(), &[1.0, 1.0]);
        assert!(storage.block_for_reading(&BlockId::new(0, &[9])).unwrap().is_none());
    }

    #[test]
    fn distributed_arrays_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = storage(dir.path(), 16);
        for i in 1..=3 {
            storage.block_for_writing(&BlockId::new(1, &[i])).unwrap();
        }
        assert_eq!(storage.resident_bytes(), 48);
        assert!(!storage.array_file_path(1).exists());
    }

    #[test]
    fn updating_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = storage(dir.path(), 16);
        let a = BlockId::new(0, &[1]);
        let b = BlockId::new(0, &[2]);
        storage.block_for_writing(&a).unwrap().block_mut().fill(3.0).unwrap();
        storage.block_for_writing(&b).unwrap();
        let block = storage.block_for_updating(&a).unwrap();
        block.block_mut().increment(1.0).unwrap();
        assert!(block.is_dirty());
        assert_eq!(block.block().data().unwrap(), &[4.0, 4.0]);
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = storage(dir.path(), 16);
        storage.block_for_writing(&BlockId::new(0, &[1])).unwrap();
        storage.block_for_writing(&BlockId::new(0, &[2])).unwrap();
        assert!(storage.array_file_path(0).exists());
        assert_eq!(storage.delete_array(0).unwrap(), 2);
        assert!(!storage.array_file_path(0).exists());
        assert_eq!(storage.resident_bytes(), 0);
    }

    #[test]
    fn section_advance_opens_trackers() {
        use crate::protocol::{AccessMode, AccessOp, ConsistencyState, WorkerSlot};

        let dir = tempfile::tempdir().unwrap();
        let mut storage = storage(dir.path(), 1024);
        let written = BlockId::new(1, &[2]);
        let mixed = BlockId::new(0, &[3]);
        let tracker = storage.block_for_writing(&written).unwrap().tracker_mut();
        tracker.update(written, AccessOp::Put, 4, 10).unwrap();
        assert_eq!(
            tracker.state(),
            ConsistencyState::with(AccessMode::Write, WorkerSlot::Worker(4))
        );
        let tracker = storage.block_for_updating(&mixed).unwrap().tracker_mut();
        tracker.update(mixed, AccessOp::PutAccumulate, 4, 11).unwrap();
        tracker.update(mixed, AccessOp::Get, 4, 12).unwrap();
        assert_eq!(tracker.state().mode, AccessMode::SingleWorker);

        storage.reset_consistency().unwrap();
        for id in [written, mixed].iter() {
            let block = storage.block_for_reading(id).unwrap().unwrap();
            assert_eq!(block.tracker().state(), ConsistencyState::OPEN);
        }
    }

    #[test]
    fn missing_persistent_array() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = storage(dir.path(), 1024);
        assert!(matches!(storage.restore_persistent(0, "nothing"), Err(SipError::Input(_))));
    }
}
