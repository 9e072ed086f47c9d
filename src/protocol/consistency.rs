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

use crate::block::BlockId;
use crate::error::{ConsistencyViolation, StorageBug};
use crate::transport::Rank;

/// Block access performed by a request, as classified for consistency tracking.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum AccessOp {
    #[display("GET")]
    Get,

    #[display("PUT")]
    Put,

    #[display("PUT_ACCUMULATE")]
    PutAccumulate,
}

impl AccessOp {
    pub const fn all() -> [AccessOp; 3] { [AccessOp::Get, AccessOp::Put, AccessOp::PutAccumulate] }
}

/// Kind of accesses a block has seen in the current section.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum AccessMode {
    #[display("NONE")]
    None,

    #[display("READ")]
    Read,

    #[display("WRITE")]
    Write,

    #[display("ACCUMULATE")]
    Accumulate,

    /// Mixed accesses, all of them done by a single worker.
    #[display("SINGLE_WORKER")]
    SingleWorker,

    /// Terminal state reached on a forbidden access sequence.
    #[display("INVALID")]
    Invalid,
}

/// Workers which have accessed a block in the current section.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum WorkerSlot {
    #[display("open")]
    Open,

    #[display("worker {0}")]
    Worker(Rank),

    #[display("multiple workers")]
    Multiple,
}

/// Pair of the access mode and the workers which have accessed a block.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ConsistencyState {
    pub mode: AccessMode,
    pub worker: WorkerSlot,
}

impl Default for ConsistencyState {
    fn default() -> Self { ConsistencyState::OPEN }
}

impl Display for ConsistencyState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.mode, self.worker)
    }
}

impl ConsistencyState {
    /// State of a block which was not accessed since the last barrier.
    pub const OPEN: ConsistencyState =
        ConsistencyState { mode: AccessMode::None, worker: WorkerSlot::Open };

    /// Terminal state.
    pub const INVALID: ConsistencyState =
        ConsistencyState { mode: AccessMode::Invalid, worker: WorkerSlot::Open };

    #[inline]
    pub const fn with(mode: AccessMode, worker: WorkerSlot) -> Self {
        ConsistencyState { mode, worker }
    }

    #[inline]
    pub fn is_invalid(self) -> bool { self.mode == AccessMode::Invalid }

    /// Transition function of the consistency protocol.
    pub fn next(self, op: AccessOp, worker: Rank) -> ConsistencyState {
        use AccessMode::*;
        use AccessOp::*;
        use WorkerSlot::Multiple;

        let same = self.worker == WorkerSlot::Worker(worker);
        let me = WorkerSlot::Worker(worker);
        let single = ConsistencyState::with(SingleWorker, me);

        match (self.mode, self.worker, op) {
            (Invalid, ..) => ConsistencyState::INVALID,

            (None, _, Get) => ConsistencyState::with(Read, me),
            (None, _, Put) => ConsistencyState::with(Write, me),
            (None, _, PutAccumulate) => ConsistencyState::with(Accumulate, me),

            (Read, Multiple, Get) => self,
            (Read, Multiple, _) => ConsistencyState::INVALID,
            (Read, _, Get) if same => self,
            (Read, _, Get) => ConsistencyState::with(Read, Multiple),
            (Read, ..) if same => single,

            (Write, ..) if same => single,

            (Accumulate, Multiple, PutAccumulate) => self,
            (Accumulate, Multiple, _) => ConsistencyState::INVALID,
            (Accumulate, _, PutAccumulate) if same => self,
            (Accumulate, _, PutAccumulate) => ConsistencyState::with(Accumulate, Multiple),
            (Accumulate, ..) if same => single,

            (SingleWorker, ..) if same => single,

            _ => ConsistencyState::INVALID,
        }
    }
}

/// Tracks the access mode of a single block at a server within a section.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct ConsistencyTracker {
    state: ConsistencyState,
}

impl ConsistencyTracker {
    #[inline]
    pub fn new() -> Self { default!() }

    #[inline]
    pub fn state(&self) -> ConsistencyState { self.state }

    /// Applies the access; a forbidden access moves the tracker into the invalid state and is
    /// reported as a consistency violation.
    pub fn update(
        &mut self,
        block: BlockId,
        op: AccessOp,
        worker: Rank,
        line: i32,
    ) -> Result<(), ConsistencyViolation> {
        let prev = self.state;
        self.state = prev.next(op, worker);
        if self.state.is_invalid() {
            return Err(ConsistencyViolation { block, op, worker, state: prev, line });
        }
        Ok(())
    }

    /// Returns to the initial state at the start of a new section.
    pub fn reset(&mut self, block: BlockId) -> Result<(), StorageBug> {
        if self.state.is_invalid() {
            return Err(StorageBug::InvalidReset(block));
        }
        self.state = ConsistencyState::OPEN;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const W: Rank = 1;
    const V: Rank = 2;

    fn st(mode: AccessMode, worker: WorkerSlot) -> ConsistencyState {
        ConsistencyState::with(mode, worker)
    }

    #[test]
    fn full_table() {
        use AccessMode::*;
        use WorkerSlot::{Multiple, Worker};

        let invalid = ConsistencyState::INVALID;
        // rows: initial state; columns: GET,w PUT,w ACC,w GET,v PUT,v ACC,v
        let table = [
            (st(None, WorkerSlot::Open), [
                st(Read, Worker(W)),
                st(Write, Worker(W)),
                st(Accumulate, Worker(W)),
                st(Read, Worker(V)),
                st(Write, Worker(V)),
                st(Accumulate, Worker(V)),
            ]),
            (st(Read, Worker(W)), [
                st(Read, Worker(W)),
                st(SingleWorker, Worker(W)),
                st(SingleWorker, Worker(W)),
                st(Read, Multiple),
                invalid,
                invalid,
            ]),
            (st(Read, Multiple), [
                st(Read, Multiple),
                invalid,
                invalid,
                st(Read, Multiple),
                invalid,
                invalid,
            ]),
            (st(Write, Worker(W)), [
                st(SingleWorker, Worker(W)),
                st(SingleWorker, Worker(W)),
                st(SingleWorker, Worker(W)),
                invalid,
                invalid,
                invalid,
            ]),
            (st(Accumulate, Worker(W)), [
                st(SingleWorker, Worker(W)),
                st(SingleWorker, Worker(W)),
                st(Accumulate, Worker(W)),
                invalid,
                invalid,
                st(Accumulate, Multiple),
            ]),
            (st(Accumulate, Multiple), [
                invalid,
                invalid,
                st(Accumulate, Multiple),
                invalid,
                invalid,
                st(Accumulate, Multiple),
            ]),
            (st(SingleWorker, Worker(W)), [
                st(SingleWorker, Worker(W)),
                st(SingleWorker, Worker(W)),
                st(SingleWorker, Worker(W)),
                invalid,
                invalid,
                invalid,
            ]),
        ];

        for (state, expected) in table {
            let cells = [
                state.next(AccessOp::Get, W),
                state.next(AccessOp::Put, W),
                state.next(AccessOp::PutAccumulate, W),
                state.next(AccessOp::Get, V),
                state.next(AccessOp::Put, V),
                state.next(AccessOp::PutAccumulate, V),
            ];
            assert_eq!(cells, expected, "row {state}");
        }
    }

    #[test]
    fn invalid_is_terminal() {
        for op in AccessOp::all() {
            assert!(ConsistencyState::INVALID.next(op, W).is_invalid());
        }
    }

    #[test]
    fn violation_report() {
        let block = BlockId::new(3, &[1, 1]);
        let mut tracker = ConsistencyTracker::new();
        tracker.update(block, AccessOp::Get, W, 10).unwrap();
        let err = tracker.update(block, AccessOp::Put, V, 11).unwrap_err();
        assert_eq!(err.state, st(AccessMode::Read, WorkerSlot::Worker(W)));
        assert_eq!(err.worker, V);
        assert_eq!(err.op, AccessOp::Put);
        assert!(tracker.state().is_invalid());
        assert_eq!(tracker.reset(block), Err(StorageBug::InvalidReset(block)));
    }

    #[test]
    fn reset_reopens() {
        let block = BlockId::new(3, &[1, 1]);
        let mut tracker = ConsistencyTracker::new();
        tracker.update(block, AccessOp::PutAccumulate, W, 1).unwrap();
        tracker.update(block, AccessOp::PutAccumulate, V, 2).unwrap();
        assert_eq!(tracker.state(), st(AccessMode::Accumulate, WorkerSlot::Multiple));
        tracker.reset(block).unwrap();
        assert_eq!(tracker.state(), ConsistencyState::OPEN);
        tracker.update(block, AccessOp::Put, V, 3).unwrap();
    }
}
