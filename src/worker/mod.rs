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

//! Worker-side block operations.
//!
//! A SIAL program talks to blocks through [`BlockOps`]. Distributed jobs use
//! [`WorkerBlockClient`], which forwards accesses to distributed and served arrays to the owning
//! servers; single-process jobs use [`LocalBlockOps`], which keeps every array in worker memory.

mod acks;
mod client;
mod local;

pub use acks::AsyncAcks;
pub use client::{LocalMode, WorkerBlockClient};
pub use local::{LocalBlockOps, LocalPersistence};

use crate::block::{ArrayId, Block, BlockId, RegionId};
use crate::error::SipError;

/// Reference to a block requested with [`BlockOps::get`]; the data may still be in flight.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BlockHandle {
    id: BlockId,
}

impl BlockHandle {
    #[inline]
    pub(crate) fn new(id: BlockId) -> Self { BlockHandle { id } }

    #[inline]
    pub fn id(&self) -> BlockId { self.id }
}

/// Block operations available to a SIAL program, provided identically by every execution
/// flavor.
///
/// `line` is the program counter of the issuing instruction, reported in diagnostics.
pub trait BlockOps {
    /// Requests the block for reading. Does not wait for the data.
    fn get(&mut self, id: &BlockId, line: i32) -> Result<BlockHandle, SipError>;

    /// Waits for the data of a requested block.
    fn read(&mut self, handle: BlockHandle) -> Result<&Block, SipError>;

    /// Overwrites the block.
    fn put_replace(&mut self, id: &BlockId, data: Vec<f64>, line: i32) -> Result<(), SipError>;

    /// Adds the data to the block element-wise.
    fn put_accumulate(&mut self, id: &BlockId, data: Vec<f64>, line: i32)
        -> Result<(), SipError>;

    /// Sets every element of the block to the value.
    fn put_initialize(&mut self, id: &BlockId, value: f64, line: i32) -> Result<(), SipError>;

    /// Adds the value to every element of the block.
    fn put_increment(&mut self, id: &BlockId, value: f64, line: i32) -> Result<(), SipError>;

    /// Multiplies every element of the block by the value.
    fn put_scale(&mut self, id: &BlockId, value: f64, line: i32) -> Result<(), SipError>;

    /// Destroys all blocks of the array.
    fn delete(&mut self, array_id: ArrayId, line: i32) -> Result<(), SipError>;

    /// Marks the array to be kept after the program under the label from the string table.
    fn set_persistent(
        &mut self,
        array_id: ArrayId,
        string_slot: i32,
        line: i32,
    ) -> Result<(), SipError>;

    /// Brings back the array saved by a previous program under the label.
    fn restore_persistent(
        &mut self,
        array_id: ArrayId,
        string_slot: i32,
        line: i32,
    ) -> Result<(), SipError>;

    /// Allocates a contiguous array. Empty `data` means zero-filled.
    fn create_static(&mut self, array_id: ArrayId, data: Vec<f64>) -> Result<(), SipError>;

    /// Copies part of a contiguous array.
    fn static_slice(&self, region: &RegionId) -> Result<Block, SipError>;

    /// Ends the current section.
    fn barrier(&mut self) -> Result<(), SipError>;

    /// Ends the program, saving the arrays marked persistent.
    fn end_program(&mut self) -> Result<(), SipError>;
}
