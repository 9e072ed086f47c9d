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

use super::{DataAction, PendingOperation};
use crate::block::{ArrayId, BlockId};
use crate::config::AccumulateMode;
use crate::error::{SipError, StorageBug, WireFault};
use crate::protocol::{
    AccessOp, ArrayRequest, BlockRequest, MessageKind, PersistentRequest, ScalarRequest,
    SectionStep, SectionTracker,
};
use crate::storage::{DiskConfig, DiskTieredStorage, PersistentMarks, ServerBlock};
use crate::tables::{ArrayMetadata, ProgramTables};
use crate::topology::DataDistribution;
use crate::transport::{Endpoint, Envelope, Payload, Rank};

/// Counters collected by a server during a program.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ServerStats {
    /// Number of handled requests per message kind.
    pub requests: BTreeMap<MessageKind, u64>,
    /// GETs of blocks which were never written.
    pub implicit_blocks: u64,
    /// Highest number of bytes of block data held in memory.
    pub peak_resident_bytes: usize,
    /// Arrays saved as persistent at the end of the program.
    pub saved_arrays: Vec<String>,
    /// Highest section of a request the server has seen.
    pub last_section: i32,
}

/// Request handler of a single server rank for a single program.
///
/// The engine is single-threaded: it waits for the next message from any worker, applies it to
/// its block storage and answers. The run ends with the END_PROGRAM message from the
/// responsible worker of the server's group.
#[derive(Debug)]
pub struct ServerEngine {
    tables: Arc<ProgramTables>,
    distribution: Arc<DataDistribution>,
    storage: DiskTieredStorage,
    sections: SectionTracker,
    marks: PersistentMarks,
    mode: AccumulateMode,
    rank: Rank,
    stats: ServerStats,
}

impl ServerEngine {
    pub fn with(
        disk: DiskConfig,
        mode: AccumulateMode,
        tables: Arc<ProgramTables>,
        distribution: Arc<DataDistribution>,
    ) -> Self {
        let rank = disk.rank;
        ServerEngine {
            storage: DiskTieredStorage::with(disk, tables.clone(), distribution.clone()),
            tables,
            distribution,
            sections: SectionTracker::new(),
            marks: PersistentMarks::new(),
            mode,
            rank,
            stats: default!(),
        }
    }

    #[inline]
    pub fn storage(&self) -> &DiskTieredStorage { &self.storage }

    #[inline]
    pub fn section(&self) -> i32 { self.sections.last_seen() }

    /// Serves requests until the end of the program.
    ///
    /// On error all pending transfers are abandoned; the job is expected to abort.
    pub fn run(mut self, endpoint: &mut Endpoint) -> Result<ServerStats, SipError> {
        info!("server {} starts program {}", self.rank, self.tables.name);
        match self.serve(endpoint) {
            Ok(()) => Ok(self.stats),
            Err(err) => {
                self.storage.abandon_pending();
                Err(err)
            }
        }
    }

    fn serve(&mut self, endpoint: &mut Endpoint) -> Result<(), SipError> {
        loop {
            let (source, tag) = match endpoint.probe()? {
                None => {
                    self.storage.handle_pending(endpoint)?;
                    continue;
                }
                Some(header) => header,
            };
            let envelope = endpoint.recv(source, tag)?;
            let kind = tag.kind()?;
            trace!("server {} handles {tag} from {source}", self.rank);
            *self.stats.requests.entry(kind).or_default() += 1;

            match kind {
                MessageKind::Get => self.handle_get(endpoint, envelope)?,
                MessageKind::Put => self.handle_put(endpoint, envelope, DataAction::Replace)?,
                MessageKind::PutAccumulate => {
                    self.handle_put(endpoint, envelope, DataAction::Accumulate)?
                }
                MessageKind::PutInitialize | MessageKind::PutIncrement | MessageKind::PutScale => {
                    self.handle_scalar(endpoint, kind, envelope)?
                }
                MessageKind::Delete => self.handle_delete(endpoint, envelope)?,
                MessageKind::SetPersistent => self.handle_set_persistent(endpoint, envelope)?,
                MessageKind::RestorePersistent => self.handle_restore(endpoint, envelope)?,
                MessageKind::EndProgram => {
                    self.handle_end_program(endpoint, envelope)?;
                    return Ok(());
                }
                MessageKind::PutData | MessageKind::PutAccumulateData | MessageKind::Barrier => {
                    return Err(WireFault::UnexpectedKind(kind, source).into())
                }
            }
            self.stats.peak_resident_bytes =
                self.stats.peak_resident_bytes.max(self.storage.resident_bytes());
        }
    }

    /// Checks the section invariant, resetting all consistency trackers when a new section
    /// starts.
    fn enter_section(&mut self, section: i32, source: Rank) -> Result<(), SipError> {
        if self.sections.check(section, source)? == SectionStep::Advanced {
            debug!("server {} enters section {section}", self.rank);
            self.storage.reset_consistency()?;
        }
        Ok(())
    }

    fn check_array(
        &self,
        kind: MessageKind,
        source: Rank,
        array_id: ArrayId,
    ) -> Result<(), SipError> {
        if !self.tables.is_remote(array_id) {
            return Err(WireFault::UnknownArray(kind, source, array_id).into());
        }
        Ok(())
    }

    fn check_block(
        &mut self,
        kind: MessageKind,
        source: Rank,
        request: &BlockRequest,
    ) -> Result<(), SipError> {
        self.enter_section(request.section, source)?;
        let id = &request.id;
        self.check_array(kind, source, id.array_id())?;
        if !self.distribution.is_owned_by(id, &*self.tables, self.rank)? {
            return Err(SipError::Check(format!(
                "{kind} of block {id} from line {} reached server {} which does not own it",
                request.line, self.rank
            )));
        }
        Ok(())
    }

    fn block(&mut self, id: &BlockId) -> Result<&mut ServerBlock, SipError> {
        Ok(self
            .storage
            .block_for_reading(id)?
            .ok_or_else(|| StorageBug::MissingBlock(id.to_string()))?)
    }

    fn handle_get(&mut self, endpoint: &mut Endpoint, envelope: Envelope) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        let request = BlockRequest::from_payload(MessageKind::Get, source, payload)?;
        self.check_block(MessageKind::Get, source, &request)?;
        let BlockRequest { id, line, .. } = request;

        if !self.storage.contains(&id) {
            warn!(
                "block {id} is read by worker {source} at line {line} before being written; a \
                 block filled with zeros is created"
            );
            self.stats.implicit_blocks += 1;
            self.storage.block_for_writing(&id)?;
        }
        let block = self.block(&id)?;
        block.tracker_mut().update(id, access_op(MessageKind::Get, source)?, source, line)?;
        let (data, pending) = block.parts_mut();
        pending.wait_all(data, endpoint)?;
        endpoint.send(source, tag, Payload::Doubles(data.data()?.to_vec()))
    }

    fn handle_put(
        &mut self,
        endpoint: &mut Endpoint,
        envelope: Envelope,
        action: DataAction,
    ) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        let kind = tag.kind()?;
        let request = BlockRequest::from_payload(kind, source, payload)?;
        self.check_block(kind, source, &request)?;
        let BlockRequest { id, line, .. } = request;
        let data_tag = tag.with_kind(action.data_kind());

        let mode = self.mode;
        let block = match action {
            DataAction::Replace => self.storage.block_for_writing(&id)?,
            DataAction::Accumulate => self.storage.block_for_updating(&id)?,
        };
        block.tracker_mut().update(id, access_op(kind, source)?, source, line)?;

        let op = PendingOperation::post(endpoint, action, id, source, data_tag, line);
        let (data, pending) = block.parts_mut();
        pending.push(op);
        endpoint.send(source, tag, Payload::Empty)?;
        match mode {
            AccumulateMode::Synchronous => pending.wait_all(data, endpoint),
            AccumulateMode::Pipelined => {
                debug!("{action} of block {id} from worker {source} is deferred");
                Ok(())
            }
        }
    }

    fn handle_scalar(
        &mut self,
        endpoint: &mut Endpoint,
        kind: MessageKind,
        envelope: Envelope,
    ) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        let ScalarRequest { value, block: request } =
            ScalarRequest::from_payload(kind, source, payload)?;
        self.check_block(kind, source, &request)?;
        let BlockRequest { id, line, .. } = request;

        let block = match kind {
            MessageKind::PutInitialize => self.storage.block_for_writing(&id)?,
            _ => self.storage.block_for_updating(&id)?,
        };
        block.tracker_mut().update(id, access_op(kind, source)?, source, line)?;
        let (data, pending) = block.parts_mut();
        pending.wait_all(data, endpoint)?;
        match kind {
            MessageKind::PutInitialize => data.fill(value)?,
            MessageKind::PutIncrement => data.increment(value)?,
            _ => data.scale(value)?,
        }
        endpoint.send(source, tag, Payload::Empty)
    }

    fn handle_delete(
        &mut self,
        endpoint: &mut Endpoint,
        envelope: Envelope,
    ) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        let request = ArrayRequest::from_payload(MessageKind::Delete, source, payload)?;
        self.enter_section(request.section, source)?;
        self.check_array(MessageKind::Delete, source, request.array_id)?;
        self.storage.wait_pending(Some(request.array_id), endpoint)?;
        let count = self.storage.delete_array(request.array_id)?;
        debug!(
            "server {} deleted {count} blocks of array {} at line {}",
            self.rank, request.array_id, request.line
        );
        endpoint.send(source, tag, Payload::Empty)
    }

    fn persistent_request(
        &mut self,
        kind: MessageKind,
        source: Rank,
        payload: Payload,
    ) -> Result<(ArrayId, String), SipError> {
        let request = PersistentRequest::from_payload(kind, source, payload)?;
        self.enter_section(request.section, source)?;
        self.check_array(kind, source, request.array_id)?;
        let label = self.tables.string_literal(request.string_slot)?.to_owned();
        Ok((request.array_id, label))
    }

    fn handle_set_persistent(
        &mut self,
        endpoint: &mut Endpoint,
        envelope: Envelope,
    ) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        let (array_id, label) =
            self.persistent_request(MessageKind::SetPersistent, source, payload)?;
        debug!("server {} marks array {array_id} persistent as '{label}'", self.rank);
        self.marks.mark(array_id, label);
        endpoint.send(source, tag, Payload::Empty)
    }

    fn handle_restore(
        &mut self,
        endpoint: &mut Endpoint,
        envelope: Envelope,
    ) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        let (array_id, label) =
            self.persistent_request(MessageKind::RestorePersistent, source, payload)?;
        self.storage.wait_pending(Some(array_id), endpoint)?;
        self.storage.restore_persistent(array_id, &label)?;
        endpoint.send(source, tag, Payload::Empty)
    }

    fn handle_end_program(
        &mut self,
        endpoint: &mut Endpoint,
        envelope: Envelope,
    ) -> Result<(), SipError> {
        let Envelope { source, tag, payload } = envelope;
        payload.expect_empty(MessageKind::EndProgram, source)?;
        self.storage.wait_pending(None, endpoint)?;
        for (array_id, label) in self.marks.take() {
            self.storage.save_persistent(array_id, &label)?;
            self.stats.saved_arrays.push(label);
        }
        self.storage.cleanup()?;
        self.stats.last_section = self.section();
        info!(
            "server {} ends program {} at section {}",
            self.rank,
            self.tables.name,
            self.section()
        );
        endpoint.send(source, tag, Payload::Empty)
    }
}

/// Consistency-tracked access performed by a block request.
fn access_op(kind: MessageKind, source: Rank) -> Result<AccessOp, SipError> {
    kind.access_op().ok_or_else(|| WireFault::UnexpectedKind(kind, source).into())
}
