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

//! Read-only program metadata: array and string tables.
//!
//! The tables are produced by the SIAL compiler; the runtime only consumes them. They are
//! shared by every rank of the job, so each rank can compute block shapes and ownership
//! without communication.

use core::convert::TryFrom;

use crate::block::{ArrayId, BlockId, BlockShape, RegionId};
use crate::constants::MAX_RANK;
use crate::error::SipError;

/// Storage class of a SIAL array.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum ArrayKind {
    /// Worker-local blocks which are never communicated.
    #[display("local")]
    Local,

    /// Contiguous array kept as a single region at every worker.
    #[display("static")]
    Static,

    /// Blocks kept at servers, allowed to be resident in server memory only.
    #[display("distributed")]
    Distributed,

    /// Blocks kept at servers which may be paged out to disk.
    #[display("served")]
    Served,
}

impl Default for ArrayKind {
    #[inline]
    fn default() -> Self { ArrayKind::Local }
}

/// Segmentation of a single array dimension.
///
/// Index values of the dimension run from `lower` to `lower + extents.len() - 1`; each index
/// value selects a segment of the given number of elements.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct IndexRange {
    pub lower: i32,
    pub extents: Vec<usize>,
}

impl IndexRange {
    pub fn new(lower: i32, extents: impl Into<Vec<usize>>) -> Self {
        IndexRange { lower, extents: extents.into() }
    }

    /// Constructs range of `count` segments, each having `extent` elements, starting at 1.
    pub fn uniform(count: usize, extent: usize) -> Self { IndexRange::new(1, vec![extent; count]) }

    #[inline]
    pub fn num_segments(&self) -> usize { self.extents.len() }

    #[inline]
    pub fn upper(&self) -> i32 { self.lower + self.extents.len() as i32 - 1 }

    /// Number of elements in the segment selected by the index value.
    pub fn extent(&self, index: i32) -> Option<usize> {
        if index < self.lower {
            return None;
        }
        self.extents.get((index - self.lower) as usize).copied()
    }

    #[inline]
    pub fn total_elements(&self) -> usize { self.extents.iter().sum() }
}

/// Declaration of a single SIAL array.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ArrayInfo {
    pub name: String,
    pub kind: ArrayKind,
    pub dims: Vec<IndexRange>,
}

impl ArrayInfo {
    pub fn new(name: impl ToString, kind: ArrayKind, dims: Vec<IndexRange>) -> Self {
        ArrayInfo { name: name.to_string(), kind, dims }
    }

    #[inline]
    pub fn rank(&self) -> usize { self.dims.len() }

    /// Total number of blocks of the array.
    pub fn num_blocks(&self) -> usize { self.dims.iter().map(IndexRange::num_segments).product() }
}

/// Metadata interface the block runtime requires from the program tables.
pub trait ArrayMetadata {
    /// Returns declaration of the array.
    fn array(&self, array_id: ArrayId) -> Result<&ArrayInfo, SipError>;

    /// Returns string from the string table.
    fn string_literal(&self, slot: i32) -> Result<&str, SipError>;

    fn array_rank(&self, array_id: ArrayId) -> Result<usize, SipError> {
        Ok(self.array(array_id)?.rank())
    }

    fn is_distributed(&self, array_id: ArrayId) -> bool {
        matches!(self.array(array_id).map(|a| a.kind), Ok(ArrayKind::Distributed))
    }

    fn is_served(&self, array_id: ArrayId) -> bool {
        matches!(self.array(array_id).map(|a| a.kind), Ok(ArrayKind::Served))
    }

    fn is_contiguous(&self, array_id: ArrayId) -> bool {
        matches!(self.array(array_id).map(|a| a.kind), Ok(ArrayKind::Static))
    }

    /// Whether blocks of the array live at servers.
    fn is_remote(&self, array_id: ArrayId) -> bool {
        self.is_distributed(array_id) || self.is_served(array_id)
    }

    /// Shape of the block selected by the id.
    fn block_shape(&self, id: &BlockId) -> Result<BlockShape, SipError> {
        let array = self.array(id.array_id())?;
        let mut extents = [0usize; MAX_RANK];
        for (pos, dim) in array.dims.iter().enumerate() {
            extents[pos] = dim.extent(id.index(pos)).ok_or_else(|| {
                SipError::input(format!(
                    "index value {} of block {id} is outside of {}..{} range of array {}",
                    id.index(pos),
                    dim.lower,
                    dim.upper(),
                    array.name
                ))
            })?;
        }
        Ok(BlockShape::new(&extents[..array.rank()]))
    }

    fn block_element_count(&self, id: &BlockId) -> Result<usize, SipError> {
        Ok(self.block_shape(id)?.size())
    }

    /// Linear number of the block: zero-based index values in row-major order, with the last
    /// dimension changing fastest.
    fn block_number(&self, id: &BlockId) -> Result<usize, SipError> {
        let array = self.array(id.array_id())?;
        let mut number = 0usize;
        let mut stride = 1usize;
        for (pos, dim) in array.dims.iter().enumerate().rev() {
            let index = id.index(pos);
            if dim.extent(index).is_none() {
                return Err(SipError::input(format!(
                    "block {id} is outside of array {} bounds",
                    array.name
                )));
            }
            number += (index - dim.lower) as usize * stride;
            stride *= dim.num_segments();
        }
        Ok(number)
    }

    /// All block ids of the array, ordered by their [`ArrayMetadata::block_number`].
    fn blocks_of(&self, array_id: ArrayId) -> Result<Vec<BlockId>, SipError> {
        let array = self.array(array_id)?;
        let rank = array.rank();
        let mut blocks = Vec::with_capacity(array.num_blocks());
        if array.dims.iter().any(|dim| dim.num_segments() == 0) {
            return Ok(blocks);
        }
        let mut index = array.dims.iter().map(|dim| dim.lower).collect::<Vec<_>>();
        loop {
            blocks.push(BlockId::new(array_id, &index));
            let mut pos = rank;
            loop {
                if pos == 0 {
                    return Ok(blocks);
                }
                pos -= 1;
                index[pos] += 1;
                if index[pos] <= array.dims[pos].upper() {
                    break;
                }
                index[pos] = array.dims[pos].lower;
            }
        }
    }

    /// Region covering a whole contiguous array, in element coordinates starting at 1.
    fn static_region(&self, array_id: ArrayId) -> Result<RegionId, SipError> {
        let array = self.array(array_id)?;
        let upper = array
            .dims
            .iter()
            .map(|dim| dim.total_elements() as i32)
            .collect::<Vec<_>>();
        RegionId::new(array_id, &vec![1; array.rank()], &upper)
    }
}

/// Array and string tables of a single SIAL program.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ProgramTables {
    pub name: String,
    pub arrays: Vec<ArrayInfo>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub strings: Vec<String>,
}

impl ProgramTables {
    pub fn new(name: impl ToString) -> Self {
        ProgramTables { name: name.to_string(), arrays: vec![], strings: vec![] }
    }

    /// Adds array to the table, returning its id.
    pub fn add_array(&mut self, info: ArrayInfo) -> ArrayId {
        self.arrays.push(info);
        self.arrays.len() as ArrayId - 1
    }

    /// Adds string literal to the table, returning its slot.
    pub fn add_string(&mut self, s: impl ToString) -> i32 {
        self.strings.push(s.to_string());
        self.strings.len() as i32 - 1
    }

    #[inline]
    pub fn num_arrays(&self) -> usize { self.arrays.len() }

    /// Checks the tables for declarations the runtime can't support.
    pub fn validate(&self) -> Result<(), SipError> {
        for array in &self.arrays {
            if array.rank() > MAX_RANK {
                return Err(SipError::input(format!(
                    "array {} has rank {} exceeding maximum of {MAX_RANK}",
                    array.name,
                    array.rank()
                )));
            }
            if let Some(dim) = array.dims.iter().find(|dim| dim.extents.contains(&0)) {
                return Err(SipError::input(format!(
                    "array {} has an empty segment in range starting at {}",
                    array.name, dim.lower
                )));
            }
        }
        Ok(())
    }
}

impl ArrayMetadata for ProgramTables {
    fn array(&self, array_id: ArrayId) -> Result<&ArrayInfo, SipError> {
        usize::try_from(array_id)
            .ok()
            .and_then(|id| self.arrays.get(id))
            .ok_or_else(|| SipError::input(format!("array {array_id} is not defined")))
    }

    fn string_literal(&self, slot: i32) -> Result<&str, SipError> {
        usize::try_from(slot)
            .ok()
            .and_then(|slot| self.strings.get(slot))
            .map(String::as_str)
            .ok_or_else(|| SipError::input(format!("string slot {slot} is not defined")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tables() -> ProgramTables {
        let mut tables = ProgramTables::new("test");
        tables.add_array(ArrayInfo::new("t", ArrayKind::Local, vec![IndexRange::uniform(2, 3)]));
        tables.add_array(ArrayInfo::new("d", ArrayKind::Distributed, vec![
            IndexRange::new(1, vec![2, 3]),
            IndexRange::new(1, vec![4, 5, 6]),
        ]));
        tables.add_array(ArrayInfo::new("s", ArrayKind::Static, vec![
            IndexRange::uniform(2, 5),
            IndexRange::uniform(1, 3),
        ]));
        tables.add_string("saved");
        tables
    }

    #[test]
    fn shapes() {
        let tables = tables();
        assert_eq!(tables.array_rank(1).unwrap(), 2);
        let shape = tables.block_shape(&BlockId::new(1, &[2, 3])).unwrap();
        assert_eq!(shape, BlockShape::new(&[3, 6]));
        assert_eq!(tables.block_element_count(&BlockId::new(1, &[1, 1])).unwrap(), 8);
        assert!(tables.block_shape(&BlockId::new(1, &[3, 1])).is_err());
        assert!(tables.array(7).is_err());
        assert!(tables.array(-1).is_err());
        assert_eq!(tables.string_literal(0).unwrap(), "saved");
        assert!(tables.string_literal(1).is_err());
    }

    #[test]
    fn kinds() {
        let tables = tables();
        assert!(!tables.is_remote(0));
        assert!(tables.is_distributed(1));
        assert!(tables.is_remote(1));
        assert!(tables.is_contiguous(2));
        assert!(!tables.is_served(5));
    }

    #[test]
    fn enumeration_matches_numbering() {
        let tables = tables();
        let blocks = tables.blocks_of(1).unwrap();
        assert_eq!(blocks.len(), 6);
        assert_eq!(blocks[0], BlockId::new(1, &[1, 1]));
        assert_eq!(blocks[1], BlockId::new(1, &[1, 2]));
        assert_eq!(blocks[3], BlockId::new(1, &[2, 1]));
        for (no, id) in blocks.iter().enumerate() {
            assert_eq!(tables.block_number(id).unwrap(), no);
        }
    }

    #[test]
    fn static_region() {
        let region = tables().static_region(2).unwrap();
        assert_eq!(region.lower(), &[1, 1]);
        assert_eq!(region.upper(), &[10, 3]);
    }

    #[test]
    fn validation() {
        let mut tables = tables();
        assert!(tables.validate().is_ok());
        tables.add_array(ArrayInfo::new("bad", ArrayKind::Served, vec![IndexRange::new(1, vec![
            2, 0,
        ])]));
        assert!(tables.validate().is_err());
    }
}
