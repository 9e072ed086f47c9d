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

use proptest::prelude::*;
use sipvm::constants::TAG_TRANSACTION_MASK;
use sipvm::protocol::{AccessMode, AccessOp, ConsistencyState, MessageKind, Tag};
use sipvm::{BlockId, RegionId};

fn kind() -> impl Strategy<Value = MessageKind> {
    prop::sample::select(MessageKind::all().to_vec())
}

fn access() -> impl Strategy<Value = AccessOp> { prop::sample::select(AccessOp::all().to_vec()) }

fn block_id() -> impl Strategy<Value = BlockId> {
    (0..3i32, prop::collection::vec(-3..4i32, 1..=3))
        .prop_map(|(array_id, index)| BlockId::new(array_id, &index))
}

/// Regions of rank 2 over a small index space, so that overlaps are frequent.
fn region(array_id: i32) -> impl Strategy<Value = RegionId> {
    prop::collection::vec((-4..4i32, 0..4i32), 2).prop_map(move |dims| {
        let lower = dims.iter().map(|(lower, _)| *lower).collect::<Vec<_>>();
        let upper = dims.iter().map(|(lower, len)| lower + len).collect::<Vec<_>>();
        RegionId::new(array_id, &lower, &upper).unwrap()
    })
}

proptest! {
    #[test]
    fn tag_keeps_kind_and_transaction(kind in kind(), transaction in any::<u32>()) {
        let tag = Tag::encode(kind, transaction);
        prop_assert_eq!(tag.decode().unwrap(), (kind, transaction & TAG_TRANSACTION_MASK));
        prop_assert_eq!(tag.with_kind(MessageKind::PutData).transaction(), tag.transaction());
    }

    #[test]
    fn block_ids_are_totally_ordered(a in block_id(), b in block_id()) {
        let holding = [a < b, a == b, a > b].iter().filter(|holds| **holds).count();
        prop_assert_eq!(holding, 1);
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn regions_are_unordered_only_when_overlapping(a in region(0), b in region(0)) {
        let unordered = a.partial_cmp(&b).is_none();
        prop_assert_eq!(unordered, a != b && a.overlaps(&b));
        if let Some(ordering) = a.partial_cmp(&b) {
            prop_assert_eq!(b.partial_cmp(&a), Some(ordering.reverse()));
        }
    }

    #[test]
    fn regions_of_different_arrays_are_ordered(a in region(0), b in region(1)) {
        prop_assert_eq!(a.partial_cmp(&b), Some(Ordering::Less));
        prop_assert!(!a.overlaps(&b));
    }

    #[test]
    fn enclosure_is_a_preorder(a in region(0), b in region(0), c in region(0)) {
        prop_assert!(a.encloses(&a));
        if a.encloses(&b) && b.encloses(&c) {
            prop_assert!(a.encloses(&c));
        }
        if a.encloses(&b) {
            prop_assert!(a.overlaps(&b));
        }
    }

    #[test]
    fn invalid_state_is_terminal(
        ops in prop::collection::vec((access(), 0..3usize), 0..12),
    ) {
        let mut state = ConsistencyState::OPEN;
        let mut invalid = false;
        for (op, worker) in ops {
            state = state.next(op, worker);
            if invalid {
                prop_assert!(state.is_invalid());
            }
            invalid = state.is_invalid();
        }
    }

    #[test]
    fn single_worker_never_conflicts(
        ops in prop::collection::vec(access(), 1..12),
        worker in 0..8usize,
    ) {
        let mut state = ConsistencyState::OPEN;
        for op in ops {
            state = state.next(op, worker);
            prop_assert!(!state.is_invalid());
            prop_assert_ne!(state.mode, AccessMode::None);
        }
    }

    #[test]
    fn reads_by_many_workers_never_conflict(workers in prop::collection::vec(0..8usize, 1..12)) {
        let mut state = ConsistencyState::OPEN;
        for worker in workers {
            state = state.next(AccessOp::Get, worker);
            prop_assert_eq!(state.mode, AccessMode::Read);
        }
    }
}
