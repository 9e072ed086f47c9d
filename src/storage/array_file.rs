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

use core::convert::TryFrom;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use amplify::confinement::Confined;
use strict_encoding::{StrictDeserialize, StrictSerialize};

use crate::block::{ArrayId, BlockId};
use crate::constants::{
    ARRAY_FILE_HEADER_LEN, ARRAY_FILE_MAGIC, ARRAY_FILE_MAJOR_VERSION, ARRAY_FILE_MINOR_VERSION,
    LIB_NAME_SIPVM,
};
use crate::error::{SipError, StorageBug};

const ELEMENT_LEN: u64 = 8;

/// Fixed-size header opening every array file.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_SIPVM)]
pub struct ArrayFileHeader {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub array_id: u32,
}

impl StrictSerialize for ArrayFileHeader {}
impl StrictDeserialize for ArrayFileHeader {}

impl ArrayFileHeader {
    pub fn new(array_id: ArrayId) -> Self {
        ArrayFileHeader {
            magic: ARRAY_FILE_MAGIC,
            major_version: ARRAY_FILE_MAJOR_VERSION,
            minor_version: ARRAY_FILE_MINOR_VERSION,
            array_id: array_id as u32,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_strict_serialized::<ARRAY_FILE_HEADER_LEN>()
            .expect("type guarantees")
            .to_vec()
    }

    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        let data = Confined::try_from(data).ok()?;
        Self::from_strict_serialized::<ARRAY_FILE_HEADER_LEN>(data).ok()
    }
}

/// Placement of a single block inside an array file.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct BlockSlot {
    /// Position in the presence bitmap.
    pub index: usize,
    /// Byte offset of the block data.
    pub offset: u64,
    /// Number of elements.
    pub size: usize,
}

/// Positions of all blocks a server owns for an array.
///
/// The layout is computed from the program tables and the data distribution, so it is never
/// stored in the file: the blocks follow the header and the presence bitmap in the order of
/// their block numbers.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ArrayLayout {
    slots: BTreeMap<BlockId, BlockSlot>,
}

impl ArrayLayout {
    /// Constructs layout out of the owned blocks and their element counts, given in block
    /// number order.
    pub fn new(blocks: impl IntoIterator<Item = (BlockId, usize)>) -> Self {
        let blocks = blocks.into_iter().collect::<Vec<_>>();
        let mut offset = (ARRAY_FILE_HEADER_LEN + bitmap_len(blocks.len())) as u64;
        let mut slots = BTreeMap::new();
        for (index, (id, size)) in blocks.into_iter().enumerate() {
            slots.insert(id, BlockSlot { index, offset, size });
            offset += size as u64 * ELEMENT_LEN;
        }
        ArrayLayout { slots }
    }

    #[inline]
    pub fn num_blocks(&self) -> usize { self.slots.len() }

    #[inline]
    pub fn slot(&self, id: &BlockId) -> Option<&BlockSlot> { self.slots.get(id) }

    /// Block ids in file order.
    pub fn blocks(&self) -> impl Iterator<Item = (&BlockId, &BlockSlot)> {
        let mut ordered = self.slots.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|(_, slot)| slot.index);
        ordered.into_iter()
    }

    #[inline]
    fn bitmap_len(&self) -> usize { bitmap_len(self.slots.len()) }
}

fn bitmap_len(blocks: usize) -> usize { (blocks + 7) / 8 }

/// Array file of a single server: header, presence bitmap and block data.
#[derive(Debug)]
pub struct ArrayFile {
    array_id: ArrayId,
    path: PathBuf,
    file: File,
    layout: ArrayLayout,
    presence: Vec<u8>,
}

impl ArrayFile {
    /// Creates new file with an empty presence bitmap, truncating any existing one.
    pub fn create(
        path: impl AsRef<Path>,
        array_id: ArrayId,
        layout: ArrayLayout,
    ) -> Result<Self, SipError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let presence = vec![0u8; layout.bitmap_len()];
        let mut me = ArrayFile { array_id, path, file, layout, presence };
        me.write_header()?;
        me.flush_presence()?;
        debug!("created array file {} for array {array_id}", me.path.display());
        Ok(me)
    }

    /// Opens existing file, reading its presence bitmap. The header is rewritten when the file
    /// was produced for a different array id.
    pub fn open(
        path: impl AsRef<Path>,
        array_id: ArrayId,
        layout: ArrayLayout,
    ) -> Result<Self, SipError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header = vec![0u8; ARRAY_FILE_HEADER_LEN];
        file.read_exact(&mut header)?;
        let header = ArrayFileHeader::from_bytes(header)
            .filter(|header| header.magic == ARRAY_FILE_MAGIC)
            .ok_or_else(|| {
                SipError::input(format!("{} is not an array file", path.display()))
            })?;
        if header.major_version != ARRAY_FILE_MAJOR_VERSION {
            return Err(SipError::input(format!(
                "array file {} has unsupported version {}.{}",
                path.display(),
                header.major_version,
                header.minor_version
            )));
        }
        let mut presence = vec![0u8; layout.bitmap_len()];
        file.read_exact(&mut presence)?;
        let mut me = ArrayFile { array_id, path, file, layout, presence };
        if header.array_id != array_id as u32 {
            debug!(
                "array file {} moves from array {} to array {array_id}",
                me.path.display(),
                header.array_id
            );
            me.write_header()?;
        }
        Ok(me)
    }

    #[inline]
    pub fn array_id(&self) -> ArrayId { self.array_id }

    #[inline]
    pub fn path(&self) -> &Path { &self.path }

    #[inline]
    pub fn layout(&self) -> &ArrayLayout { &self.layout }

    fn slot(&self, id: &BlockId) -> Result<BlockSlot, StorageBug> {
        self.layout
            .slot(id)
            .copied()
            .ok_or(StorageBug::NotInLayout(*id))
    }

    pub fn is_present(&self, id: &BlockId) -> bool {
        self.layout
            .slot(id)
            .map(|slot| self.presence[slot.index / 8] & (1 << (slot.index % 8)) != 0)
            .unwrap_or_default()
    }

    /// Block ids having data in the file.
    pub fn present_blocks(&self) -> Vec<BlockId> {
        self.layout
            .blocks()
            .filter(|(id, _)| self.is_present(id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Writes block data to its slot and marks it present. The bitmap reaches the disk with
    /// the next [`ArrayFile::flush_presence`].
    pub fn write_block(&mut self, id: &BlockId, data: &[f64]) -> Result<(), SipError> {
        let slot = self.slot(id)?;
        if data.len() != slot.size {
            return Err(StorageBug::WrongSize(slot.size, data.len()).into());
        }
        let words = data
            .iter()
            .map(|v| v.to_bits().to_le())
            .collect::<Vec<u64>>();
        self.file.seek(SeekFrom::Start(slot.offset))?;
        self.file.write_all(bytemuck::cast_slice(&words))?;
        self.presence[slot.index / 8] |= 1 << (slot.index % 8);
        trace!("block {id} written to {} at {}", self.path.display(), slot.offset);
        Ok(())
    }

    pub fn read_block(&mut self, id: &BlockId) -> Result<Vec<f64>, SipError> {
        let slot = self.slot(id)?;
        if !self.is_present(id) {
            return Err(StorageBug::Lost(*id).into());
        }
        let mut words = vec![0u64; slot.size];
        self.file.seek(SeekFrom::Start(slot.offset))?;
        self.file.read_exact(bytemuck::cast_slice_mut(&mut words))?;
        trace!("block {id} read from {} at {}", self.path.display(), slot.offset);
        Ok(words
            .into_iter()
            .map(|word| f64::from_bits(u64::from_le(word)))
            .collect())
    }

    pub fn flush_presence(&mut self) -> Result<(), SipError> {
        self.file.seek(SeekFrom::Start(ARRAY_FILE_HEADER_LEN as u64))?;
        self.file.write_all(&self.presence)?;
        self.file.flush()?;
        Ok(())
    }

    /// Flushes the bitmap, closes the file and moves it to the new location.
    pub fn close_into(mut self, dest: impl AsRef<Path>) -> Result<PathBuf, SipError> {
        self.flush_presence()?;
        self.file.sync_all()?;
        let ArrayFile { path, file, .. } = self;
        drop(file);
        fs::rename(&path, dest.as_ref())?;
        Ok(dest.as_ref().to_path_buf())
    }

    /// Closes and deletes the file.
    pub fn remove(self) -> Result<(), SipError> {
        let ArrayFile { path, file, .. } = self;
        drop(file);
        fs::remove_file(path)?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), SipError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&ArrayFileHeader::new(self.array_id).to_bytes())?;
        Ok(())
    }
}
