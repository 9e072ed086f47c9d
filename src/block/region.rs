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

use super::{ArrayId, BlockId, BlockShape};
use crate::constants::{MAX_RANK, UNUSED_INDEX_VALUE};
use crate::error::SipError;

/// Identifier of a rectangular region of a contiguous (static) array.
///
/// Regions are ordered only partially: two regions of the same array which overlap without
/// being equal are neither less nor greater than each other. Storage of regions therefore
/// relies on lower-bound lookups followed by [`RegionId::encloses`] checks.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RegionId {
    array_id: ArrayId,
    rank: u8,
    lower: [i32; MAX_RANK],
    upper: [i32; MAX_RANK],
}

impl RegionId {
    /// Constructs region from its per-dimension inclusive bounds.
    ///
    /// # Errors
    ///
    /// If the bound slices differ in length or exceed [`MAX_RANK`].
    pub fn new(array_id: ArrayId, lower: &[i32], upper: &[i32]) -> Result<Self, SipError> {
        if lower.len() != upper.len() || lower.len() > MAX_RANK {
            return Err(SipError::input(format!(
                "region of array {array_id} has {} lower and {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        let rank = lower.len();
        let mut region = RegionId {
            array_id,
            rank: rank as u8,
            lower: [UNUSED_INDEX_VALUE; MAX_RANK],
            upper: [UNUSED_INDEX_VALUE; MAX_RANK],
        };
        region.lower[..rank].copy_from_slice(lower);
        region.upper[..rank].copy_from_slice(upper);
        Ok(region)
    }

    /// Constructs single-element region located at the block index values.
    pub fn from_point(id: &BlockId, rank: usize) -> Self {
        let rank = rank.min(MAX_RANK);
        let mut region = RegionId {
            array_id: id.array_id(),
            rank: rank as u8,
            lower: [UNUSED_INDEX_VALUE; MAX_RANK],
            upper: [UNUSED_INDEX_VALUE; MAX_RANK],
        };
        region.lower[..rank].copy_from_slice(&id.index_values()[..rank]);
        region.upper[..rank].copy_from_slice(&id.index_values()[..rank]);
        region
    }

    #[inline]
    pub fn array_id(&self) -> ArrayId { self.array_id }

    #[inline]
    pub fn rank(&self) -> usize { self.rank as usize }

    #[inline]
    pub fn lower(&self) -> &[i32] { &self.lower[..self.rank()] }

    #[inline]
    pub fn upper(&self) -> &[i32] { &self.upper[..self.rank()] }

    /// Same region of another array.
    #[inline]
    pub fn with_array(&self, array_id: ArrayId) -> Self { RegionId { array_id, ..*self } }

    /// Full-width bounds, including the unused dimensions.
    #[inline]
    pub(crate) fn raw_bounds(&self) -> ([i32; MAX_RANK], [i32; MAX_RANK]) {
        (self.lower, self.upper)
    }

    /// Checks that `lower <= upper` in every dimension.
    pub fn is_well_formed(&self) -> bool {
        self.lower().iter().zip(self.upper()).all(|(l, u)| l <= u)
    }

    /// Number of elements along each dimension.
    pub fn shape(&self) -> BlockShape {
        let extents = self
            .lower()
            .iter()
            .zip(self.upper())
            .map(|(l, u)| (u - l + 1).max(0) as usize)
            .collect::<Vec<_>>();
        BlockShape::new(&extents)
    }

    /// Checks whether every dimension range of `self` contains the range of `other`.
    pub fn encloses(&self, other: &RegionId) -> bool {
        self.array_id == other.array_id &&
            self.rank == other.rank &&
            (0..self.rank())
                .all(|i| self.lower[i] <= other.lower[i] && other.upper[i] <= self.upper[i])
    }

    /// Checks whether the ranges of some dimension do not intersect.
    pub fn disjoint(&self, other: &RegionId) -> bool {
        self.array_id != other.array_id ||
            (0..self.rank().max(other.rank()))
                .any(|i| self.upper[i] < other.lower[i] || other.upper[i] < self.lower[i])
    }

    #[inline]
    pub fn overlaps(&self, other: &RegionId) -> bool { !self.disjoint(other) }
}

/// Regions of different arrays are ordered by the array id. Disjoint regions of the same array
/// are ordered lexicographically by their lower bounds, then by their upper bounds.
impl PartialOrd for RegionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.array_id != other.array_id {
            return Some(self.array_id.cmp(&other.array_id));
        }
        if self == other {
            return Some(Ordering::Equal);
        }
        if self.overlaps(other) {
            return None;
        }
        Some(self.lower.cmp(&other.lower).then_with(|| self.upper.cmp(&other.upper)))
    }
}

impl Display for RegionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.array_id)?;
        for i in 0..self.rank() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}..{}", self.lower[i], self.upper[i])?;
        }
        f.write_str("]")
    }
}
