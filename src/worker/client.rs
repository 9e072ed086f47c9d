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
use std::sync::Arc;

use super::{AsyncAcks, BlockHandle, BlockOps, LocalBlockOps, LocalPersistence};
use crate::block::{ArrayId, Block, BlockId, RegionId};
use crate::error::{SipError, StorageBug, WireFault};
use crate::protocol::{
    block_data, ArrayRequest, BarrierSupport, BlockRequest, MessageKind, PersistentRequest,
    ScalarRequest, Tag,
};
use crate::server::DataAction;
use crate::storage::BlockStorage;
use crate::tables::{ArrayMetadata, ProgramTables};
use crate::topology::{ClusterTopology, DataDistribution};
use crate::transport::{Endpoint, Payload, Rank, RecvRequest};

/// Access mode of an array by this worker within the current section.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum LocalMode {
    #[display("NONE")]
    None,

    #[display("READ")]
    Read,

    #[display("WRITE")]
    Write,
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
struct ModeTable {
    modes: BTreeMap<ArrayId, LocalMode>,
}

impl ModeTable {
    fn mode(&self, array_id: ArrayId) -> LocalMode {
        self.modes.get(&array_id).copied().unwrap_or(LocalMode::None)
    }

    fn enter(&mut self, array_id: ArrayId, mode: LocalMode, line: i32) {
        let prev = self.modes.insert(array_id, mode).unwrap_or(LocalMode::None);
        if prev != LocalMode::None && prev != mode {
            warn!(
                "array {array_id} is accessed in {mode} mode at line {line} after {prev} access \
                 in the same section; a barrier may be missing"
            );
        }
    }

    fn reset(&mut self) { self.modes.clear() }
}

#[derive(Debug)]
struct CachedBlock {
    block: Block,
    request: Option<RecvRequest>,
}

/// Block operations of a worker in a distributed job.
///
/// Blocks of distributed and served arrays are fetched from and sent to their owning servers.
/// Fetched blocks are cached until the end of the section. Local and contiguous arrays are
/// handled by [`LocalBlockOps`].
#[derive(Debug)]
pub struct WorkerBlockClient<'job> {
    endpoint: &'job mut Endpoint,
    topology: &'job ClusterTopology,
    tables: Arc<ProgramTables>,
    distribution: Arc<DataDistribution>,
    barrier: BarrierSupport,
    acks: AsyncAcks,
    cache: BlockStorage<BlockId, CachedBlock>,
    modes: ModeTable,
    local: LocalBlockOps,
}

impl<'job> WorkerBlockClient<'job> {
    pub fn with(
        endpoint: &'job mut Endpoint,
        topology: &'job ClusterTopology,
        tables: Arc<ProgramTables>,
        distribution: Arc<DataDistribution>,
        max_posted_async: usize,
        persistence: LocalPersistence,
    ) -> Self {
        WorkerBlockClient {
            endpoint,
            topology,
            local: LocalBlockOps::with(tables.clone(), persistence),
            tables,
            distribution,
            barrier: BarrierSupport::new(),
            acks: AsyncAcks::with_capacity(max_posted_async),
            cache: BlockStorage::new(),
            modes: default!(),
        }
    }

    #[inline]
    pub fn section(&self) -> i32 { self.barrier.section_number() }

    #[inline]
    pub fn mode(&self, array_id: ArrayId) -> LocalMode { self.modes.mode(array_id) }

    #[inline]
    pub fn pending_acks(&self) -> usize { self.acks.len() }

    /// Gives back the local arrays kept for the next program.
    pub fn into_persistence(self) -> LocalPersistence { self.local.into_persistence() }

    fn is_remote(&self, array_id: ArrayId) -> bool { self.tables.is_remote(array_id) }

    fn owner(&self, id: &BlockId) -> Result<Rank, SipError> {
        self.distribution.owning_server_rank(id, &*self.tables)
    }

    fn request(&self, id: &BlockId, line: i32) -> BlockRequest {
        BlockRequest { id: *id, line, section: self.barrier.section_number() }
    }

    /// Removes the cached copy of the block, consuming its GET reply if it is still in flight.
    fn drop_cached(&mut self, id: &BlockId) -> Result<(), SipError> {
        if !self.cache.contains(id) {
            return Ok(());
        }
        let cached = self.cache.remove_and_take(id)?;
        if let Some(request) = cached.request {
            self.endpoint.complete(request)?;
        }
        Ok(())
    }

    fn drop_cached_array(&mut self, array_id: ArrayId) -> Result<(), SipError> {
        for id in self.cache.ids_of(array_id) {
            self.drop_cached(&id)?;
        }
        Ok(())
    }

    fn put_data(
        &mut self,
        action: DataAction,
        id: &BlockId,
        data: Vec<f64>,
        line: i32,
    ) -> Result<(), SipError> {
        let expected = self.tables.block_element_count(id)?;
        if data.len() != expected {
            return Err(StorageBug::WrongSize(expected, data.len()).into());
        }
        self.modes.enter(id.array_id(), LocalMode::Write, line);
        self.drop_cached(id)?;

        let server = self.owner(id)?;
        let kind = action.request_kind();
        let request = self.request(id, line);
        let (tag, data_tag) = self.barrier.make_tags_with_data(kind);
        let data_tag = data_tag.ok_or(WireFault::UnexpectedKind(kind, server))?;
        self.endpoint.send(server, tag, request.to_payload())?;
        self.acks.expect_sync_ack_from(self.endpoint, server, tag)?;
        self.endpoint.send(server, data_tag, Payload::Doubles(data))?;
        self.acks.expect_ack_from(self.endpoint, server, data_tag)
    }

    fn put_scalar(
        &mut self,
        kind: MessageKind,
        id: &BlockId,
        value: f64,
        line: i32,
    ) -> Result<(), SipError> {
        self.modes.enter(id.array_id(), LocalMode::Write, line);
        self.drop_cached(id)?;
        let server = self.owner(id)?;
        let request = ScalarRequest { value, block: self.request(id, line) };
        let tag = self.barrier.make_tag(kind);
        self.endpoint.send(server, tag, request.to_payload())?;
        self.acks.expect_ack_from(self.endpoint, server, tag)
    }

    /// Sends a group-wide request to every server of the group. Only the responsible worker of
    /// the group does this, so each server receives the request once.
    fn send_to_local_servers(&mut self, tag: Tag, payload: Payload) -> Result<(), SipError> {
        if !self.topology.is_responsible() {
            return Ok(());
        }
        let topology = self.topology;
        for server in topology.local_servers() {
            self.endpoint.send(*server, tag, payload.clone())?;
            self.acks.expect_ack_from(self.endpoint, *server, tag)?;
        }
        Ok(())
    }
}

impl<'job> BlockOps for WorkerBlockClient<'job> {
    fn get(&mut self, id: &BlockId, line: i32) -> Result<BlockHandle, SipError> {
        if !self.is_remote(id.array_id()) {
            return self.local.get(id, line);
        }
        self.modes.enter(id.array_id(), LocalMode::Read, line);
        if self.cache.contains(id) {
            return Ok(BlockHandle::new(*id));
        }
        let server = self.owner(id)?;
        let shape = self.tables.block_shape(id)?;
        let request = self.request(id, line);
        let tag = self.barrier.tag_for_get();
        let reply = self.endpoint.post_recv(server, tag);
        self.endpoint.send(server, tag, request.to_payload())?;
        self.cache
            .insert(*id, CachedBlock { block: Block::released(shape), request: Some(reply) })?;
        Ok(BlockHandle::new(*id))
    }

    fn read(&mut self, handle: BlockHandle) -> Result<&Block, SipError> {
        let id = handle.id();
        if !self.is_remote(id.array_id()) {
            return self.local.read(handle);
        }
        let cached = self
            .cache
            .lookup_mut(&id)
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))?;
        if let Some(request) = cached.request.take() {
            let envelope = self.endpoint.complete(request)?;
            let data = block_data(
                MessageKind::Get,
                envelope.source,
                envelope.payload,
                cached.block.size(),
            )?;
            cached.block.replace(data)?;
        }
        Ok(&cached.block)
    }

    fn put_replace(&mut self, id: &BlockId, data: Vec<f64>, line: i32) -> Result<(), SipError> {
        if !self.is_remote(id.array_id()) {
            return self.local.put_replace(id, data, line);
        }
        self.put_data(DataAction::Replace, id, data, line)
    }

    fn put_accumulate(
        &mut self,
        id: &BlockId,
        data: Vec<f64>,
        line: i32,
    ) -> Result<(), SipError> {
        if !self.is_remote(id.array_id()) {
            return self.local.put_accumulate(id, data, line);
        }
        self.put_data(DataAction::Accumulate, id, data, line)
    }

    fn put_initialize(&mut self, id: &BlockId, value: f64, line: i32) -> Result<(), SipError> {
        if !self.is_remote(id.array_id()) {
            return self.local.put_initialize(id, value, line);
        }
        self.put_scalar(MessageKind::PutInitialize, id, value, line)
    }

    fn put_increment(&mut self, id: &BlockId, value: f64, line: i32) -> Result<(), SipError> {
        if !self.is_remote(id.array_id()) {
            return self.local.put_increment(id, value, line);
        }
        self.put_scalar(MessageKind::PutIncrement, id, value, line)
    }

    fn put_scale(&mut self, id: &BlockId, value: f64, line: i32) -> Result<(), SipError> {
        if !self.is_remote(id.array_id()) {
            return self.local.put_scale(id, value, line);
        }
        self.put_scalar(MessageKind::PutScale, id, value, line)
    }

    fn delete(&mut self, array_id: ArrayId, line: i32) -> Result<(), SipError> {
        if !self.is_remote(array_id) {
            return self.local.delete(array_id, line);
        }
        self.drop_cached_array(array_id)?;
        let request = ArrayRequest { array_id, line, section: self.section() };
        let tag = self.barrier.tag_for_delete();
        self.send_to_local_servers(tag, request.to_payload())
    }

    fn set_persistent(
        &mut self,
        array_id: ArrayId,
        string_slot: i32,
        line: i32,
    ) -> Result<(), SipError> {
        if !self.is_remote(array_id) {
            return self.local.set_persistent(array_id, string_slot, line);
        }
        let request = PersistentRequest { array_id, string_slot, line, section: self.section() };
        let tag = self.barrier.tag_for_set_persistent();
        self.send_to_local_servers(tag, request.to_payload())
    }

    fn restore_persistent(
        &mut self,
        array_id: ArrayId,
        string_slot: i32,
        line: i32,
    ) -> Result<(), SipError> {
        if !self.is_remote(array_id) {
            return self.local.restore_persistent(array_id, string_slot, line);
        }
        self.drop_cached_array(array_id)?;
        let request = PersistentRequest { array_id, string_slot, line, section: self.section() };
        let tag = self.barrier.tag_for_restore_persistent();
        self.send_to_local_servers(tag, request.to_payload())
    }

    fn create_static(&mut self, array_id: ArrayId, data: Vec<f64>) -> Result<(), SipError> {
        self.local.create_static(array_id, data)
    }

    fn static_slice(&self, region: &RegionId) -> Result<Block, SipError> {
        self.local.static_slice(region)
    }

    fn barrier(&mut self) -> Result<(), SipError> {
        for array_id in self.cache.array_ids() {
            self.drop_cached_array(array_id)?;
        }
        self.acks.wait_all(self.endpoint)?;
        self.endpoint.barrier(self.topology.worker_ranks())?;
        self.barrier.barrier();
        self.modes.reset();
        self.local.barrier()?;
        debug!("worker {} enters section {}", self.topology.rank(), self.section());
        Ok(())
    }

    fn end_program(&mut self) -> Result<(), SipError> {
        self.barrier()?;
        self.local.end_program()?;
        if self.topology.is_responsible() {
            let topology = self.topology;
            for server in topology.local_servers() {
                let tag = self.barrier.tag_for_end_program();
                self.endpoint.send(*server, tag, Payload::Empty)?;
                self.acks.expect_sync_ack_from(self.endpoint, *server, tag)?;
            }
        }
        // servers of every group are done once all responsible workers pass this point
        self.endpoint.barrier(self.topology.worker_ranks())?;
        info!("worker {} ends program {}", self.topology.rank(), self.tables.name);
        Ok(())
    }
}
