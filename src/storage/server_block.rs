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

use core::fmt::{self, Display, Formatter};

use crate::block::{Block, BlockId, BlockShape};
use crate::error::StorageBug;
use crate::protocol::ConsistencyTracker;
use crate::server::PendingOperationRegistry;

bitflags::bitflags! {
    /// Residency flags of a server block.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct BlockState: u8 {
        /// Block data are in memory.
        const IN_MEMORY = 0b001;
        /// Block has a valid copy in the array file.
        const ON_DISK = 0b010;
        /// In-memory data differ from the copy on disk, or there is no copy on disk.
        const DIRTY = 0b100;
    }
}

impl Display for BlockState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut names = vec![];
        if self.contains(BlockState::IN_MEMORY) {
            names.push("in-memory");
        }
        if self.contains(BlockState::ON_DISK) {
            names.push("on-disk");
        }
        if self.contains(BlockState::DIRTY) {
            names.push("dirty");
        }
        if names.is_empty() {
            names.push("none");
        }
        f.write_str(&names.join("|"))
    }
}

/// Block kept by a server, together with its residency state, the consistency tracker of the
/// current section and its pending transfers.
#[derive(Debug)]
pub struct ServerBlock {
    block: Block,
    state: BlockState,
    tracker: ConsistencyTracker,
    pending: PendingOperationRegistry,
}

impl ServerBlock {
    /// New in-memory block without a copy on disk.
    pub fn zeroed(shape: BlockShape) -> Self {
        ServerBlock {
            block: Block::zeroed(shape),
            state: BlockState::IN_MEMORY | BlockState::DIRTY,
            tracker: default!(),
            pending: default!(),
        }
    }

    /// Block which exists only in the array file.
    pub fn on_disk(shape: BlockShape) -> Self {
        ServerBlock {
            block: Block::released(shape),
            state: BlockState::ON_DISK,
            tracker: default!(),
            pending: default!(),
        }
    }

    #[inline]
    pub fn block(&self) -> &Block { &self.block }

    #[inline]
    pub fn block_mut(&mut self) -> &mut Block { &mut self.block }

    #[inline]
    pub fn state(&self) -> BlockState { self.state }

    #[inline]
    pub fn tracker(&self) -> &ConsistencyTracker { &self.tracker }

    #[inline]
    pub fn tracker_mut(&mut self) -> &mut ConsistencyTracker { &mut self.tracker }

    #[inline]
    pub fn pending(&self) -> &PendingOperationRegistry { &self.pending }

    /// Splits the block into its data and its pending operations.
    #[inline]
    pub fn parts_mut(&mut self) -> (&mut Block, &mut PendingOperationRegistry) {
        (&mut self.block, &mut self.pending)
    }

    #[inline]
    pub fn is_resident(&self) -> bool { self.state.contains(BlockState::IN_MEMORY) }

    #[inline]
    pub fn is_dirty(&self) -> bool { self.state.contains(BlockState::DIRTY) }

    #[inline]
    pub fn is_on_disk(&self) -> bool { self.state.contains(BlockState::ON_DISK) }

    /// Bytes of memory held by the block data.
    #[inline]
    pub fn resident_bytes(&self) -> usize {
        if self.is_resident() {
            self.block.size() * 8
        } else {
            0
        }
    }

    pub fn mark_dirty(&mut self) { self.state.insert(BlockState::DIRTY) }

    /// Records that the data were loaded from disk.
    pub fn loaded(&mut self, data: Vec<f64>) -> Result<(), StorageBug> {
        self.block.replace(data)?;
        self.state.insert(BlockState::IN_MEMORY);
        Ok(())
    }

    /// Provides zeroed data for a block which will be overwritten as a whole.
    pub fn allocate(&mut self) -> Result<(), StorageBug> {
        self.block.replace(vec![0.0; self.block.size()])?;
        self.state.insert(BlockState::IN_MEMORY | BlockState::DIRTY);
        Ok(())
    }

    /// Records that the data were written to disk.
    pub fn stored(&mut self) {
        self.state.insert(BlockState::ON_DISK);
        self.state.remove(BlockState::DIRTY);
    }

    /// Frees the data after they were stored to disk.
    pub fn release(&mut self) {
        self.block.release();
        self.state.remove(BlockState::IN_MEMORY);
    }

    /// Verifies residency invariants.
    pub fn check_state(&self, id: &BlockId) -> Result<(), StorageBug> {
        let resident = self.is_resident();
        if resident != self.block.is_resident() {
            return Err(StorageBug::NotResident);
        }
        match (resident, self.is_dirty(), self.is_on_disk()) {
            (false, true, _) => Err(StorageBug::DirtyNotResident(*id)),
            (true, false, false) => Err(StorageBug::Unbacked(*id)),
            (false, false, false) => Err(StorageBug::Lost(*id)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifecycle() {
        let id = BlockId::new(1, &[1]);
        let mut block = ServerBlock::zeroed(BlockShape::new(&[4]));
        assert!(block.check_state(&id).is_ok());
        assert_eq!(block.resident_bytes(), 32);
        assert_eq!(block.state().to_string(), "in-memory|dirty");

        block.stored();
        block.release();
        assert!(block.check_state(&id).is_ok());
        assert_eq!(block.resident_bytes(), 0);
        assert_eq!(block.state().to_string(), "on-disk");

        block.loaded(vec![1.0; 4]).unwrap();
        assert!(!block.is_dirty());
        assert!(block.check_state(&id).is_ok());
    }

    #[test]
    fn state_flags() {
        let mut state = BlockState::IN_MEMORY | BlockState::DIRTY;
        assert!(state.contains(BlockState::DIRTY));
        assert!(!state.contains(BlockState::IN_MEMORY | BlockState::ON_DISK));
        state.remove(BlockState::DIRTY);
        state.insert(BlockState::ON_DISK);
        assert_eq!(state, BlockState::IN_MEMORY | BlockState::ON_DISK);
        assert_eq!(state.to_string(), "in-memory|on-disk");
        assert_eq!(BlockState::empty().to_string(), "none");
    }

    #[test]
    fn broken_states() {
        let id = BlockId::new(1, &[1]);
        let mut block = ServerBlock::zeroed(BlockShape::new(&[2]));
        block.state.remove(BlockState::DIRTY);
        assert_eq!(block.check_state(&id), Err(StorageBug::Unbacked(id)));

        let mut block = ServerBlock::on_disk(BlockShape::new(&[2]));
        block.mark_dirty();
        assert_eq!(block.check_state(&id), Err(StorageBug::DirtyNotResident(id)));

        let mut block = ServerBlock::on_disk(BlockShape::new(&[2]));
        block.state.remove(BlockState::ON_DISK);
        assert_eq!(block.check_state(&id), Err(StorageBug::Lost(id)));
    }
}
