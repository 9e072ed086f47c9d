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

use super::RegionId;
use crate::constants::MAX_RANK;
use crate::error::StorageBug;

/// Per-dimension extents of a block.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct BlockShape {
    rank: u8,
    extents: [usize; MAX_RANK],
}

impl BlockShape {
    /// # Panics
    ///
    /// If more than [`MAX_RANK`] extents are given.
    pub fn new(extents: &[usize]) -> Self {
        assert!(extents.len() <= MAX_RANK, "block rank exceeds MAX_RANK");
        let mut shape = BlockShape { rank: extents.len() as u8, extents: [1; MAX_RANK] };
        shape.extents[..extents.len()].copy_from_slice(extents);
        shape
    }

    #[inline]
    pub fn rank(&self) -> usize { self.rank as usize }

    #[inline]
    pub fn extents(&self) -> &[usize] { &self.extents[..self.rank()] }

    #[inline]
    pub fn extent(&self, dim: usize) -> usize { self.extents[dim] }

    /// Number of elements in a block of this shape.
    #[inline]
    pub fn size(&self) -> usize { self.extents.iter().product() }
}

impl Display for BlockShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, e) in self.extents().iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{e}")?;
        }
        f.write_str(")")
    }
}

/// Dense block of double-precision data, laid out column-major (first index fastest).
///
/// The data buffer is either present with exactly [`BlockShape::size`] elements, or released
/// (when the block was evicted to disk).
#[derive(Clone, PartialEq, Debug)]
pub struct Block {
    shape: BlockShape,
    data: Option<Vec<f64>>,
}

impl Block {
    /// Allocates block filled with zeros.
    pub fn zeroed(shape: BlockShape) -> Self {
        Block { shape, data: Some(vec![0.0; shape.size()]) }
    }

    /// Creates block which has no data in memory.
    pub fn released(shape: BlockShape) -> Self { Block { shape, data: None } }

    /// Wraps existing buffer without copying it.
    pub fn with_data(shape: BlockShape, data: Vec<f64>) -> Result<Self, StorageBug> {
        if data.len() != shape.size() {
            return Err(StorageBug::WrongSize(shape.size(), data.len()));
        }
        Ok(Block { shape, data: Some(data) })
    }

    #[inline]
    pub fn shape(&self) -> BlockShape { self.shape }

    #[inline]
    pub fn size(&self) -> usize { self.shape.size() }

    #[inline]
    pub fn is_resident(&self) -> bool { self.data.is_some() }

    #[inline]
    pub fn data(&self) -> Result<&[f64], StorageBug> {
        self.data.as_deref().ok_or(StorageBug::NotResident)
    }

    #[inline]
    pub fn data_mut(&mut self) -> Result<&mut [f64], StorageBug> {
        self.data.as_deref_mut().ok_or(StorageBug::NotResident)
    }

    /// Releases the data buffer, returning it to the caller.
    pub fn release(&mut self) -> Option<Vec<f64>> { self.data.take() }

    /// Replaces the data buffer with a new one of the same size, taking ownership of it.
    pub fn replace(&mut self, data: Vec<f64>) -> Result<(), StorageBug> {
        if data.len() != self.size() {
            return Err(StorageBug::WrongSize(self.size(), data.len()));
        }
        self.data = Some(data);
        Ok(())
    }

    /// Sets all elements to the value.
    pub fn fill(&mut self, value: f64) -> Result<(), StorageBug> {
        self.data_mut()?.iter_mut().for_each(|x| *x = value);
        Ok(())
    }

    /// Adds the value to all elements.
    pub fn increment(&mut self, value: f64) -> Result<(), StorageBug> {
        self.data_mut()?.iter_mut().for_each(|x| *x += value);
        Ok(())
    }

    /// Multiplies all elements by the value.
    pub fn scale(&mut self, value: f64) -> Result<(), StorageBug> {
        self.data_mut()?.iter_mut().for_each(|x| *x *= value);
        Ok(())
    }

    /// Element-wise addition of the other buffer into this block.
    pub fn accumulate(&mut self, other: &[f64]) -> Result<(), StorageBug> {
        let size = self.size();
        if other.len() != size {
            return Err(StorageBug::WrongSize(size, other.len()));
        }
        self.data_mut()?.iter_mut().zip(other).for_each(|(x, y)| *x += y);
        Ok(())
    }

    /// Copies part of a contiguous region block into a new block.
    ///
    /// `whole` is the region this block holds; `part` must be enclosed by it.
    pub fn extract_slice(&self, whole: &RegionId, part: &RegionId) -> Result<Block, StorageBug> {
        if !whole.encloses(part) {
            return Err(StorageBug::MissingBlock(part.to_string()));
        }
        let src = self.data()?;
        let rank = whole.rank();
        let whole_shape = whole.shape();
        let shape = part.shape();

        let mut strides = [1usize; MAX_RANK];
        for dim in 1..rank {
            strides[dim] = strides[dim - 1] * whole_shape.extent(dim - 1);
        }
        let base = (0..rank)
            .map(|dim| (part.lower()[dim] - whole.lower()[dim]) as usize * strides[dim])
            .sum::<usize>();

        let mut data = Vec::with_capacity(shape.size());
        let mut pos = [0usize; MAX_RANK];
        for _ in 0..shape.size() {
            let offset = base + (0..rank).map(|dim| pos[dim] * strides[dim]).sum::<usize>();
            data.push(src[offset]);
            for dim in 0..rank {
                pos[dim] += 1;
                if pos[dim] < shape.extent(dim) {
                    break;
                }
                pos[dim] = 0;
            }
        }
        Block::with_data(shape, data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shape() {
        let shape = BlockShape::new(&[2, 3]);
        assert_eq!(shape.size(), 6);
        assert_eq!(shape.rank(), 2);
        assert_eq!(shape.extent(4), 1);
        assert_eq!(shape.to_string(), "(2x3)");
        assert_eq!(BlockShape::new(&[]).size(), 1);
    }

    #[test]
    fn arithmetics() {
        let mut block = Block::zeroed(BlockShape::new(&[2, 2]));
        block.fill(2.0).unwrap();
        block.increment(1.0).unwrap();
        block.scale(2.0).unwrap();
        block.accumulate(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(block.data().unwrap(), &[7.0, 8.0, 9.0, 10.0]);
        assert_eq!(block.accumulate(&[1.0]), Err(StorageBug::WrongSize(4, 1)));
    }

    #[test]
    fn release_and_replace() {
        let mut block = Block::with_data(BlockShape::new(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
        let data = block.release().unwrap();
        assert!(!block.is_resident());
        assert_eq!(block.fill(0.0), Err(StorageBug::NotResident));
        block.replace(data).unwrap();
        assert_eq!(block.data().unwrap(), &[1.0, 2.0, 3.0]);
        assert!(Block::with_data(BlockShape::new(&[2]), vec![0.0]).is_err());
    }

    #[test]
    fn slicing() {
        // 3x3 column-major: element (i, j) = 10 * i + j
        let whole = RegionId::new(5, &[1, 1], &[3, 3]).unwrap();
        let mut data = vec![];
        for j in 1..=3 {
            for i in 1..=3 {
                data.push((10 * i + j) as f64);
            }
        }
        let block = Block::with_data(whole.shape(), data).unwrap();
        let part = RegionId::new(5, &[2, 2], &[3, 3]).unwrap();
        let slice = block.extract_slice(&whole, &part).unwrap();
        assert_eq!(slice.data().unwrap(), &[22.0, 32.0, 23.0, 33.0]);

        let outside = RegionId::new(5, &[3, 3], &[4, 4]).unwrap();
        assert!(block.extract_slice(&whole, &outside).is_err());
    }
}
