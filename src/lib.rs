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


//! Block core of the SIAL virtual machine: distributed block storage, the consistency protocol
//! between workers and servers, and the runtime executing SIAL programs on a cluster of ranks.
//!
//! A job consists of *worker* ranks, executing programs, and *server* ranks, keeping blocks of
//! distributed and served arrays. Workers access remote blocks only through request messages;
//! servers check that concurrent accesses within a section are consistent, page served arrays
//! to disk, and keep persistent arrays between programs.

#![deny(unsafe_code)]
#![allow(clippy::len_without_is_empty, clippy::new_without_default)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;
#[macro_use]
extern crate tracing;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod block;
mod config;
pub mod constants;
mod error;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod tables;
pub mod topology;
pub mod transport;
pub mod worker;

pub use block::{ArrayId, Block, BlockId, BlockShape, RegionId};
pub use config::{AccumulateMode, SipConfig};
pub use error::{ConsistencyViolation, SipError, StorageBug, WireFault};
pub use runtime::{run_job, BlockOp, Job, JobReport, ProgramReport, ProgramScript};
pub use tables::{ArrayInfo, ArrayKind, ArrayMetadata, IndexRange, ProgramTables};
pub use transport::{Payload, Rank};
