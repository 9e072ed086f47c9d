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

use std::path::PathBuf;

use crate::constants::{DEFAULT_MEMORY_BUDGET, MAX_POSTED_ASYNC};
use crate::error::SipError;
use crate::storage::DiskConfig;
use crate::topology::DistributionKind;
use crate::transport::Rank;

/// How a server completes PUT and PUT_ACCUMULATE data transfers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum AccumulateMode {
    /// The server waits for the block data before serving the next request.
    #[display("synchronous")]
    Synchronous,

    /// The server queues the data receive at the block and continues serving; the data are
    /// applied when they arrive, in request order.
    #[display("pipelined")]
    Pipelined,
}

impl Default for AccumulateMode {
    fn default() -> Self { AccumulateMode::Synchronous }
}

/// Configuration of a job.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase", default)
)]
pub struct SipConfig {
    /// Number of worker ranks.
    pub workers: usize,
    /// Number of server ranks; zero selects the single-process mode.
    pub servers: usize,
    /// Bytes of block data each server may keep in memory.
    pub memory_budget: usize,
    /// Directory for array files and persistent arrays.
    pub scratch_dir: PathBuf,
    pub accumulate_mode: AccumulateMode,
    /// Maximal number of acknowledgements a worker awaits at once.
    pub max_posted_async: usize,
    pub distribution: DistributionKind,
}

impl Default for SipConfig {
    /// Sets
    /// - [`SipConfig::workers`] to 2,
    /// - [`SipConfig::servers`] to 1,
    /// - [`SipConfig::memory_budget`] to [`DEFAULT_MEMORY_BUDGET`],
    /// - [`SipConfig::scratch_dir`] to the system temporary directory,
    /// - [`SipConfig::accumulate_mode`] to [`AccumulateMode::Synchronous`],
    /// - [`SipConfig::max_posted_async`] to [`MAX_POSTED_ASYNC`],
    /// - [`SipConfig::distribution`] to [`DistributionKind::BlockCyclic`].
    fn default() -> Self {
        SipConfig {
            workers: 2,
            servers: 1,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            scratch_dir: std::env::temp_dir(),
            accumulate_mode: AccumulateMode::Synchronous,
            max_posted_async: MAX_POSTED_ASYNC,
            distribution: DistributionKind::BlockCyclic,
        }
    }
}

impl SipConfig {
    /// Configuration of a single-process job.
    pub fn single_process() -> Self { SipConfig { workers: 1, servers: 0, ..default!() } }

    #[inline]
    pub fn is_single_process(&self) -> bool { self.servers == 0 }

    #[inline]
    pub fn num_ranks(&self) -> usize { self.workers + self.servers }

    /// Storage parameters of the server with the given rank.
    pub fn disk_config(&self, rank: Rank) -> DiskConfig {
        DiskConfig {
            rank,
            scratch_dir: self.scratch_dir.clone(),
            memory_budget: self.memory_budget,
        }
    }

    pub fn validate(&self) -> Result<(), SipError> {
        if self.workers == 0 {
            return Err(SipError::input("a job requires at least one worker"));
        }
        if self.servers == 0 && self.workers > 1 {
            return Err(SipError::input(format!(
                "single-process mode runs a single worker, while {} workers are requested",
                self.workers
            )));
        }
        if self.max_posted_async == 0 {
            return Err(SipError::input("at least one asynchronous acknowledgement must fit"));
        }
        if !self.scratch_dir.is_dir() {
            return Err(SipError::input(format!(
                "scratch directory {} does not exist",
                self.scratch_dir.display()
            )));
        }
        Ok(())
    }
}
