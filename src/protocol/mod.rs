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

//! Worker/server protocol: message tags, request bodies, section numbering and the block
//! consistency table.

mod barrier;
mod consistency;
mod message;
mod tag;

pub use barrier::{BarrierSupport, SectionStep, SectionTracker};
pub use consistency::{AccessMode, AccessOp, ConsistencyState, ConsistencyTracker, WorkerSlot};
pub use message::{
    block_data, ArrayRequest, BlockRequest, PersistentRequest, ScalarRequest, ARRAY_REQUEST_LEN,
    BLOCK_REQUEST_LEN, PERSISTENT_REQUEST_LEN,
};
pub use tag::{MessageKind, Tag};
