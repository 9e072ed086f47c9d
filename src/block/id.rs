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

use core::cmp::Ordering;
use core::fmt::{self, Display, Formatter};
use core::hash::{Hash, Hasher};

use super::RegionId;
use crate::constants::{BLOCK_ID_WIRE_LEN, MAX_RANK, UNUSED_INDEX_VALUE, WILDCARD_INDEX_VALUE};

/// Identifier of a SIAL array inside the program tables.
pub type ArrayId = i32;

/// Canonical identifier of a single block of a SIAL array.
///
/// The identity is a fixed-size value and is copied freely. Blocks sliced out of a contiguous
/// array keep a reference to the region they were sliced from; this link does not participate
/// in equality, hashing or ordering.
#[derive(Copy, Clone, Debug)]
pub struct BlockId {
    array_id: ArrayId,
    index_values: [i32; MAX_RANK],
    parent: Option<RegionId>,
}

impl BlockId {
    /// Constructs block id for the array with the given index values. Dimensions beyond the
    /// provided values are filled with [`UNUSED_INDEX_VALUE`].
    ///
    /// # Panics
    ///
    /// If more than [`MAX_RANK`] index values are given.
    pub fn new(array_id: ArrayId, index_values: &[i32]) -> Self {
        assert!(index_values.len() <= MAX_RANK, "block rank exceeds MAX_RANK");
        let mut values = [UNUSED_INDEX_VALUE; MAX_RANK];
        values[..index_values.len()].copy_from_slice(index_values);
        BlockId { array_id, index_values: values, parent: None }
    }

    /// Constructs block id for the block sliced out of a contiguous region.
    pub fn with_parent(array_id: ArrayId, index_values: &[i32], parent: RegionId) -> Self {
        let mut id = BlockId::new(array_id, index_values);
        id.parent = Some(parent);
        id
    }

    #[inline]
    pub fn array_id(&self) -> ArrayId { self.array_id }

    #[inline]
    pub fn index_values(&self) -> &[i32; MAX_RANK] { &self.index_values }

    #[inline]
    pub fn index(&self, pos: usize) -> i32 { self.index_values[pos] }

    #[inline]
    pub fn parent(&self) -> Option<&RegionId> { self.parent.as_ref() }

    /// Detects whether some of the dimensions use the wildcard value.
    pub fn has_wildcard(&self) -> bool {
        self.index_values.iter().any(|v| *v == WILDCARD_INDEX_VALUE)
    }

    /// Checks whether `other` is selected by this id, treating wildcard dimensions of `self`
    /// as matching any index value.
    pub fn selects(&self, other: &BlockId) -> bool {
        self.array_id == other.array_id &&
            self.index_values
                .iter()
                .zip(&other.index_values)
                .all(|(mine, theirs)| *mine == WILDCARD_INDEX_VALUE || mine == theirs)
    }

    /// Wire representation: array id followed by all [`MAX_RANK`] index values.
    pub fn to_wire(&self) -> [i32; BLOCK_ID_WIRE_LEN] {
        let mut wire = [0i32; BLOCK_ID_WIRE_LEN];
        wire[0] = self.array_id;
        wire[1..].copy_from_slice(&self.index_values);
        wire
    }

    /// Reads block id from the beginning of the wire data. Returns `None` if the data are
    /// shorter than [`BLOCK_ID_WIRE_LEN`].
    pub fn from_wire(wire: &[i32]) -> Option<Self> {
        if wire.len() < BLOCK_ID_WIRE_LEN {
            return None;
        }
        let mut index_values = [0i32; MAX_RANK];
        index_values.copy_from_slice(&wire[1..BLOCK_ID_WIRE_LEN]);
        Some(BlockId { array_id: wire[0], index_values, parent: None })
    }
}

impl PartialEq for BlockId {
    fn eq(&self, other: &Self) -> bool {
        self.array_id == other.array_id && self.index_values == other.index_values
    }
}

impl Eq for BlockId {}

impl Hash for BlockId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.array_id.hash(state);
        self.index_values.hash(state);
    }
}

impl PartialOrd for BlockId {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for BlockId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.array_id
            .cmp(&other.array_id)
            .then_with(|| self.index_values.cmp(&other.index_values))
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.array_id)?;
        for (pos, val) in self.index_values.iter().enumerate() {
            if pos > 0 {
                f.write_str(",")?;
            }
            if *val == WILDCARD_INDEX_VALUE {
                f.write_str("*")?;
            } else {
                write!(f, "{val}")?;
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unused_dimensions() {
        let id = BlockId::new(3, &[1, 2]);
        assert_eq!(id.index_values(), &[1, 2, 1, 1, 1, 1]);
        assert_eq!(id.to_wire(), [3, 1, 2, 1, 1, 1, 1]);
        assert_eq!(id.to_string(), "3[1,2,1,1,1,1]");
    }

    #[test]
    fn wire_decoding() {
        let id = BlockId::new(7, &[4, 5, 6]);
        assert_eq!(BlockId::from_wire(&id.to_wire()), Some(id));
        assert_eq!(BlockId::from_wire(&[7, 4, 5]), None);
    }

    #[test]
    fn parent_is_ignored() {
        let region = RegionId::new(2, &[1, 1], &[10, 10]).unwrap();
        let plain = BlockId::new(2, &[3, 4]);
        let sliced = BlockId::with_parent(2, &[3, 4], region);
        assert_eq!(plain, sliced);
        assert_eq!(plain.cmp(&sliced), Ordering::Equal);
        assert!(sliced.parent().is_some());
    }

    #[test]
    fn ordering() {
        let a = BlockId::new(1, &[9, 9]);
        let b = BlockId::new(2, &[1, 1]);
        let c = BlockId::new(2, &[1, 2]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn wildcard_selection() {
        let pattern = BlockId::new(4, &[WILDCARD_INDEX_VALUE, 2]);
        assert!(pattern.has_wildcard());
        assert!(pattern.selects(&BlockId::new(4, &[7, 2])));
        assert!(!pattern.selects(&BlockId::new(4, &[7, 3])));
        assert!(!pattern.selects(&BlockId::new(5, &[7, 2])));
        assert_eq!(pattern.to_string(), "4[*,2,1,1,1,1]");
    }
}
