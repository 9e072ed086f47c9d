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

//! Failure taxonomy of the block runtime.
//!
//! Every error defined here is fatal for the whole job: a rank returning one of them
//! raises the cluster-wide abort flag, and all other ranks fail with [`SipError::Aborted`]
//! at their next blocking point. Soft conditions (async slot exhaustion, a GET of a block
//! which was never written) are logged as warnings and never reach this module.

use core::fmt::{self, Display, Formatter};
use std::io;

use crate::block::BlockId;
use crate::protocol::{AccessOp, ConsistencyState, MessageKind};
use crate::transport::Rank;

/// Violations of the wire protocol, signalling message corruption or a version skew between
/// the program tables and the runtime.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum WireFault {
    /// tag {0} carries an unknown message kind.
    UnknownKind(u32),

    /// {0} message from rank {1} carries {3} elements while {2} were expected.
    ElementCount(MessageKind, Rank, usize, usize),

    /// {0} message from rank {1} carries {3} payload instead of {2}.
    PayloadType(MessageKind, Rank, &'static str, &'static str),

    /// rank {0} sent a message for section {1} after section {2} was seen at the server; the
    /// barrier protocol is broken (sip bug).
    SectionRegression(Rank, i32, i32),

    /// {0} message from rank {1} can't be handled by a server.
    UnexpectedKind(MessageKind, Rank),

    /// {0} message from rank {1} refers to array {2} unknown to the program tables.
    UnknownArray(MessageKind, Rank, i32),

    /// rank {0} does not exist in the cluster.
    NoSuchRank(Rank),

    /// rank {0} has left the job while messages were still sent to it.
    Disconnected(Rank),
}

/// A sequence of block accesses forbidden by the consistency table.
///
/// This is a bug in the SIAL program, not in the runtime.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub struct ConsistencyViolation {
    /// Block accessed.
    pub block: BlockId,
    /// Operation which was rejected.
    pub op: AccessOp,
    /// Worker which issued the rejected operation.
    pub worker: Rank,
    /// State of the block before the rejected operation.
    pub state: ConsistencyState,
    /// Program counter sent with the rejected request.
    pub line: i32,
}

impl Display for ConsistencyViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "consistency violation at line {}: {} of block {} by worker {} conflicts with \
             earlier access {}. This usually means that a barrier is missing between \
             conflicting accesses to the block by different workers",
            self.line, self.op, self.block, self.worker, self.state
        )
    }
}

/// Broken internal invariants of block storage.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum StorageBug {
    /// block {0} is already present in the storage.
    DuplicateBlock(String),

    /// region {0} overlaps region {1} which is already stored.
    OverlappingRegion(String, String),

    /// block {0} is absent from the storage.
    MissingBlock(String),

    /// block {0} is dirty while its data are not in memory.
    DirtyNotResident(BlockId),

    /// block {0} is in memory while being neither dirty nor written to disk.
    Unbacked(BlockId),

    /// block {0} is neither in memory nor on disk.
    Lost(BlockId),

    /// block {0} does not belong to the disk layout of this server.
    NotInLayout(BlockId),

    /// block data are accessed after being released to disk.
    NotResident,

    /// block holds {1} elements while its shape requires {0}.
    WrongSize(usize, usize),

    /// consistency state of block {0} is reset while being invalid.
    InvalidReset(BlockId),

    /// pending {0} is dropped before its completion.
    PendingDropped(String),
}

/// Top-level error type for all runtime operations.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SipError {
    /// protocol fault: {0}
    #[from]
    Wire(WireFault),

    /// {0}
    #[from]
    Consistency(ConsistencyViolation),

    /// sip bug: {0}
    #[from]
    Storage(StorageBug),

    /// input failure: {0}
    Input(String),

    /// check failed: {0}
    Check(String),

    /// I/O failure: {0}
    #[from]
    Io(io::Error),

    /// execution was aborted after a fatal error at another rank.
    Aborted,
}

impl SipError {
    /// Constructs input failure error out of any displayable message.
    pub fn input(msg: impl ToString) -> Self { SipError::Input(msg.to_string()) }

    /// Detects whether the error is a consequence of some other rank failure.
    #[inline]
    pub fn is_aborted(&self) -> bool { matches!(self, SipError::Aborted) }
}
