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

//! Deferred completion of block transfers at a server.
//!
//! A server must not block on receiving the data of one PUT while other workers wait for it.
//! In pipelined mode it posts the data receive, keeps it in the registry of the target block
//! and continues serving; the data are applied once the receive completes, strictly in the
//! order in which the requests arrived for that block.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::thread;

use crate::block::{Block, BlockId};
use crate::error::{SipError, StorageBug};
use crate::protocol::{block_data, MessageKind, Tag};
use crate::transport::{Endpoint, Payload, Rank, RecvRequest};

/// Progress of a pending operation.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[repr(u8)]
pub enum PendingStatus {
    /// The transfer is in flight.
    #[display("WAITING")]
    Waiting = 1,

    /// The transfer has completed; the completion action was not executed yet.
    #[display("READY")]
    Ready = 2,

    /// The completion action was executed.
    #[display("DONE")]
    Done = 3,
}

/// Action applied to the block once its data arrive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum DataAction {
    #[display("PUT")]
    Replace,

    #[display("PUT_ACCUMULATE")]
    Accumulate,
}

impl DataAction {
    /// Kind of the request announcing the transfer.
    pub fn request_kind(self) -> MessageKind {
        match self {
            DataAction::Replace => MessageKind::Put,
            DataAction::Accumulate => MessageKind::PutAccumulate,
        }
    }

    pub fn data_kind(self) -> MessageKind {
        match self {
            DataAction::Replace => MessageKind::PutData,
            DataAction::Accumulate => MessageKind::PutAccumulateData,
        }
    }
}

/// Data receive for a block, followed by applying the data and acknowledging the sender.
///
/// # Panics
///
/// Dropping an operation which is not [`PendingStatus::Done`] panics, unless it was abandoned
/// while unwinding a fatal error.
#[derive(Debug)]
pub struct PendingOperation {
    status: PendingStatus,
    action: DataAction,
    id: BlockId,
    line: i32,
    request: RecvRequest,
    abandoned: bool,
}

impl PendingOperation {
    /// Posts the data receive for the block.
    pub fn post(
        endpoint: &mut Endpoint,
        action: DataAction,
        id: BlockId,
        source: Rank,
        data_tag: Tag,
        line: i32,
    ) -> Self {
        let request = endpoint.post_recv(source, data_tag);
        PendingOperation {
            status: PendingStatus::Waiting,
            action,
            id,
            line,
            request,
            abandoned: false,
        }
    }

    #[inline]
    pub fn status(&self) -> PendingStatus { self.status }

    #[inline]
    pub fn block_id(&self) -> BlockId { self.id }

    /// Polls the transfer without blocking. Returns whether the data have arrived.
    pub fn test(&mut self, endpoint: &mut Endpoint) -> Result<bool, SipError> {
        if self.status == PendingStatus::Waiting && endpoint.test(&self.request)? {
            self.status = PendingStatus::Ready;
        }
        Ok(self.status >= PendingStatus::Ready)
    }

    /// Blocks until the data arrive.
    pub fn wait(&mut self, endpoint: &mut Endpoint) -> Result<(), SipError> {
        if self.status == PendingStatus::Waiting {
            endpoint.wait(&self.request)?;
            self.status = PendingStatus::Ready;
        }
        Ok(())
    }

    /// Executes the completion action if the data have arrived. Returns whether the operation
    /// is done.
    pub fn try_handle(
        &mut self,
        block: &mut Block,
        endpoint: &mut Endpoint,
    ) -> Result<bool, SipError> {
        if self.status == PendingStatus::Done {
            return Ok(true);
        }
        if !self.test(endpoint)? {
            return Ok(false);
        }
        let envelope = endpoint.complete(self.request)?;
        let kind = self.action.data_kind();
        let data = block_data(kind, envelope.source, envelope.payload, block.size())?;
        match self.action {
            DataAction::Replace => block.replace(data)?,
            DataAction::Accumulate => block.accumulate(&data)?,
        }
        endpoint.send(envelope.source, envelope.tag, Payload::Empty)?;
        self.status = PendingStatus::Done;
        debug!("deferred {} of block {} from line {} is done", self.action, self.id, self.line);
        Ok(true)
    }

    /// Blocks until the data arrive and executes the completion action.
    pub fn handle(&mut self, block: &mut Block, endpoint: &mut Endpoint) -> Result<(), SipError> {
        self.wait(endpoint)?;
        self.try_handle(block, endpoint)?;
        Ok(())
    }
}

impl Display for PendingOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of block {} ({}, line {}, {})",
            self.action, self.id, self.request.tag(), self.line, self.status
        )
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if self.status != PendingStatus::Done && !self.abandoned && !thread::panicking() {
            panic!("{}", StorageBug::PendingDropped(self.to_string()));
        }
    }
}

/// FIFO of pending operations of a single block.
#[derive(Debug, Default)]
pub struct PendingOperationRegistry {
    ops: VecDeque<PendingOperation>,
}

impl PendingOperationRegistry {
    #[inline]
    pub fn new() -> Self { default!() }

    #[inline]
    pub fn len(&self) -> usize { self.ops.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    pub fn push(&mut self, op: PendingOperation) { self.ops.push_back(op) }

    /// Completes operations in submission order, stopping at the first one whose data have not
    /// arrived. Returns whether the registry is empty afterwards.
    pub fn try_handle_all(
        &mut self,
        block: &mut Block,
        endpoint: &mut Endpoint,
    ) -> Result<bool, SipError> {
        while let Some(op) = self.ops.front_mut() {
            if !op.try_handle(block, endpoint)? {
                return Ok(false);
            }
            self.ops.pop_front();
        }
        Ok(true)
    }

    /// Forces all operations to completion, in submission order.
    pub fn wait_all(&mut self, block: &mut Block, endpoint: &mut Endpoint) -> Result<(), SipError> {
        while let Some(op) = self.ops.front_mut() {
            op.handle(block, endpoint)?;
            self.ops.pop_front();
        }
        Ok(())
    }

    /// Drops all operations without completing them. Used only when the job is failing.
    pub fn abandon(&mut self) {
        for op in &mut self.ops {
            op.abandoned = true;
        }
        self.ops.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::BlockShape;
    use crate::transport::Cluster;

    fn op(endpoint: &mut Endpoint, action: DataAction, transaction: u32) -> PendingOperation {
        let tag = Tag::encode(action.data_kind(), transaction);
        PendingOperation::post(endpoint, action, BlockId::new(1, &[1]), 0, tag, transaction as i32)
    }

    fn data(values: &[f64]) -> Payload { Payload::Doubles(values.to_vec()) }

    #[test]
    fn completes_in_submission_order() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let mut server = endpoints.pop().unwrap();
        let mut worker = endpoints.pop().unwrap();
        let mut block = Block::zeroed(BlockShape::new(&[2]));
        let mut registry = PendingOperationRegistry::new();
        registry.push(op(&mut server, DataAction::Replace, 1));
        registry.push(op(&mut server, DataAction::Accumulate, 2));
        registry.push(op(&mut server, DataAction::Accumulate, 3));

        let tag = |action: DataAction, t| Tag::encode(action.data_kind(), t);
        worker.send(1, tag(DataAction::Accumulate, 3), data(&[1.0, 1.0])).unwrap();
        worker.send(1, tag(DataAction::Accumulate, 2), data(&[2.0, 2.0])).unwrap();
        assert!(!registry.try_handle_all(&mut block, &mut server).unwrap());
        assert_eq!(registry.len(), 3);
        assert_eq!(block.data().unwrap(), &[0.0, 0.0]);

        worker.send(1, tag(DataAction::Replace, 1), data(&[10.0, 20.0])).unwrap();
        assert!(registry.try_handle_all(&mut block, &mut server).unwrap());
        assert!(registry.is_empty());
        assert_eq!(block.data().unwrap(), &[13.0, 23.0]);

        for t in 1..=3 {
            let action = if t == 1 { DataAction::Replace } else { DataAction::Accumulate };
            assert_eq!(worker.recv(1, tag(action, t)).unwrap().payload, Payload::Empty);
        }
    }

    #[test]
    fn wait_all_blocks_until_done() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let mut server = endpoints.pop().unwrap();
        let worker = endpoints.pop().unwrap();
        let mut block = Block::zeroed(BlockShape::new(&[1]));
        let mut registry = PendingOperationRegistry::new();
        registry.push(op(&mut server, DataAction::Accumulate, 7));
        worker
            .send(1, Tag::encode(MessageKind::PutAccumulateData, 7), data(&[4.0]))
            .unwrap();
        registry.wait_all(&mut block, &mut server).unwrap();
        assert!(registry.is_empty());
        assert_eq!(block.data().unwrap(), &[4.0]);
    }

    #[test]
    fn wrong_count_is_fatal() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let mut server = endpoints.pop().unwrap();
        let worker = endpoints.pop().unwrap();
        let mut block = Block::zeroed(BlockShape::new(&[3]));
        let mut registry = PendingOperationRegistry::new();
        registry.push(op(&mut server, DataAction::Replace, 0));
        worker
            .send(1, Tag::encode(MessageKind::PutData, 0), data(&[1.0]))
            .unwrap();
        assert!(registry.try_handle_all(&mut block, &mut server).is_err());
        registry.abandon();
    }

    #[test]
    #[should_panic(expected = "dropped before its completion")]
    fn dropping_pending_panics() {
        let mut endpoints = Cluster::new(1).into_endpoints();
        let mut registry = PendingOperationRegistry::new();
        registry.push(op(&mut endpoints[0], DataAction::Replace, 0));
        drop(registry);
    }
}
