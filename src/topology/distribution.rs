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

use core::fmt::Debug;

use crate::block::BlockId;
use crate::error::SipError;
use crate::tables::ArrayMetadata;
use crate::transport::Rank;

/// Function mapping blocks to servers. It must be pure: every rank computes the owner of a
/// block independently.
pub trait DistributionStrategy: Debug + Send + Sync {
    /// Index of the owning server among `num_servers` servers.
    fn server_index(
        &self,
        id: &BlockId,
        tables: &dyn ArrayMetadata,
        num_servers: usize,
    ) -> Result<usize, SipError>;
}

/// Assigns consecutive blocks of an array to consecutive servers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct BlockCyclic;

impl DistributionStrategy for BlockCyclic {
    fn server_index(
        &self,
        id: &BlockId,
        tables: &dyn ArrayMetadata,
        num_servers: usize,
    ) -> Result<usize, SipError> {
        Ok(tables.block_number(id)? % num_servers)
    }
}

/// Scatters blocks over servers by a FNV-1a hash of their index values. The array id is not
/// hashed, so arrays of the same shape share placement.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct HashedIndex;

impl HashedIndex {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    pub fn hash(id: &BlockId) -> u64 {
        id.index_values()
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .fold(Self::OFFSET_BASIS, |hash, byte| (hash ^ byte as u64).wrapping_mul(Self::PRIME))
    }
}

impl DistributionStrategy for HashedIndex {
    fn server_index(
        &self,
        id: &BlockId,
        tables: &dyn ArrayMetadata,
        num_servers: usize,
    ) -> Result<usize, SipError> {
        // rejects blocks outside of the array bounds the same way block-cyclic does
        tables.block_number(id)?;
        Ok((HashedIndex::hash(id) % num_servers as u64) as usize)
    }
}

/// Selects data distribution strategy.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum DistributionKind {
    #[display("block-cyclic")]
    BlockCyclic,

    #[display("hashed")]
    HashedIndex,
}

impl Default for DistributionKind {
    fn default() -> Self { DistributionKind::BlockCyclic }
}

/// Maps blocks of distributed and served arrays to server ranks.
#[derive(Debug)]
pub struct DataDistribution {
    strategy: Box<dyn DistributionStrategy>,
    server_ranks: Vec<Rank>,
}

impl DataDistribution {
    pub fn with(kind: DistributionKind, server_ranks: Vec<Rank>) -> Self {
        let strategy: Box<dyn DistributionStrategy> = match kind {
            DistributionKind::BlockCyclic => Box::new(BlockCyclic),
            DistributionKind::HashedIndex => Box::new(HashedIndex),
        };
        DataDistribution::with_strategy(strategy, server_ranks)
    }

    pub fn with_strategy(strategy: Box<dyn DistributionStrategy>, server_ranks: Vec<Rank>) -> Self {
        DataDistribution { strategy, server_ranks }
    }

    #[inline]
    pub fn num_servers(&self) -> usize { self.server_ranks.len() }

    /// Rank of the server owning the block.
    pub fn owning_server_rank(
        &self,
        id: &BlockId,
        tables: &dyn ArrayMetadata,
    ) -> Result<Rank, SipError> {
        if self.server_ranks.is_empty() {
            return Err(SipError::input(format!(
                "block {id} requires a server, but the job has none"
            )));
        }
        let index = self.strategy.server_index(id, tables, self.num_servers())?;
        Ok(self.server_ranks[index])
    }

    /// Checks whether the block is owned by the server with the given rank.
    pub fn is_owned_by(
        &self,
        id: &BlockId,
        tables: &dyn ArrayMetadata,
        rank: Rank,
    ) -> Result<bool, SipError> {
        Ok(self.owning_server_rank(id, tables)? == rank)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tables::{ArrayInfo, ArrayKind, IndexRange, ProgramTables};

    fn tables() -> ProgramTables {
        let mut tables = ProgramTables::new("dist");
        tables.add_array(ArrayInfo::new("a", ArrayKind::Distributed, vec![
            IndexRange::uniform(3, 2),
            IndexRange::uniform(4, 2),
        ]));
        tables
    }

    #[test]
    fn block_cyclic() {
        let tables = tables();
        let dist = DataDistribution::with(DistributionKind::BlockCyclic, vec![3, 7]);
        assert_eq!(dist.owning_server_rank(&BlockId::new(0, &[1, 1]), &tables).unwrap(), 3);
        assert_eq!(dist.owning_server_rank(&BlockId::new(0, &[1, 2]), &tables).unwrap(), 7);
        // block number 4 is [2,1]
        assert_eq!(dist.owning_server_rank(&BlockId::new(0, &[2, 1]), &tables).unwrap(), 3);
        assert!(dist.owning_server_rank(&BlockId::new(0, &[4, 1]), &tables).is_err());
    }

    #[test]
    fn hashed_is_stable() {
        let tables = tables();
        let dist = DataDistribution::with(DistributionKind::HashedIndex, vec![1, 2, 3]);
        for id in tables.blocks_of(0).unwrap() {
            let owner = dist.owning_server_rank(&id, &tables).unwrap();
            assert!([1, 2, 3].contains(&owner));
            assert_eq!(owner, dist.owning_server_rank(&id, &tables).unwrap());
        }
        assert_ne!(
            HashedIndex::hash(&BlockId::new(0, &[1, 2])),
            HashedIndex::hash(&BlockId::new(0, &[2, 1]))
        );
        assert_eq!(
            HashedIndex::hash(&BlockId::new(0, &[1, 2])),
            HashedIndex::hash(&BlockId::new(5, &[1, 2]))
        );
    }

    #[test]
    fn no_servers() {
        let dist = DataDistribution::with(DistributionKind::BlockCyclic, vec![]);
        assert!(dist.owning_server_rank(&BlockId::new(0, &[1, 1]), &tables()).is_err());
    }
}
