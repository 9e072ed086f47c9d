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

use crate::error::SipError;
use crate::transport::Rank;

/// Role of a rank in the job.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum Role {
    #[display("worker")]
    Worker,

    #[display("server")]
    Server,
}

/// Ranks forming a group: the workers of a group talk to the servers of the same group for
/// the requests which must reach every server exactly once.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct RankGroup {
    pub workers: Vec<Rank>,
    pub servers: Vec<Rank>,
}

/// Assignment of roles to all ranks of a job.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct RankDistribution {
    roles: Vec<Role>,
    groups: Vec<RankGroup>,
}

impl RankDistribution {
    /// Interleaves workers and servers.
    ///
    /// With at least as many workers as servers, there is one group per server holding
    /// `workers / servers` workers (one more for the first `workers % servers` groups) followed
    /// by the server. Otherwise there is one group per worker: the worker followed by
    /// `servers / workers` servers (one more for the first `servers % workers` groups). Without
    /// servers all ranks are workers of a single group.
    pub fn interleaved(workers: usize, servers: usize) -> Result<Self, SipError> {
        if workers == 0 {
            return Err(SipError::input("a job requires at least one worker"));
        }
        let mut roles = Vec::with_capacity(workers + servers);
        let mut groups = Vec::new();
        let mut push_group = |group_workers: usize, group_servers: usize| {
            let mut group = RankGroup::default();
            for _ in 0..group_workers {
                group.workers.push(roles.len());
                roles.push(Role::Worker);
            }
            for _ in 0..group_servers {
                group.servers.push(roles.len());
                roles.push(Role::Server);
            }
            groups.push(group);
        };
        if servers == 0 {
            push_group(workers, 0);
        } else if workers >= servers {
            for no in 0..servers {
                push_group(workers / servers + usize::from(no < workers % servers), 1);
            }
        } else {
            for no in 0..workers {
                push_group(1, servers / workers + usize::from(no < servers % workers));
            }
        }
        Ok(RankDistribution { roles, groups })
    }

    #[inline]
    pub fn size(&self) -> usize { self.roles.len() }

    pub fn role(&self, rank: Rank) -> Option<Role> { self.roles.get(rank).copied() }

    #[inline]
    pub fn groups(&self) -> &[RankGroup] { &self.groups }

    pub fn ranks_of(&self, role: Role) -> Vec<Rank> {
        self.roles
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == role)
            .map(|(rank, _)| rank)
            .collect()
    }

    pub fn group_of(&self, rank: Rank) -> Option<&RankGroup> {
        self.groups
            .iter()
            .find(|group| group.workers.contains(&rank) || group.servers.contains(&rank))
    }
}

/// View of the job layout from a single rank.
#[derive(Getters, Clone, Eq, PartialEq, Debug)]
pub struct ClusterTopology {
    /// Rank of this process.
    rank: Rank,

    role: Role,

    /// Ranks of all workers, in ascending order.
    worker_ranks: Vec<Rank>,

    /// Ranks of all servers, in ascending order; a server index used by data distribution
    /// refers to this list.
    server_ranks: Vec<Rank>,

    /// Workers of this rank's group.
    group_workers: Vec<Rank>,

    /// Servers of this rank's group.
    local_servers: Vec<Rank>,
}

impl ClusterTopology {
    pub fn new(distribution: &RankDistribution, rank: Rank) -> Result<Self, SipError> {
        let role = distribution
            .role(rank)
            .ok_or_else(|| SipError::input(format!("rank {rank} is outside of the job")))?;
        let group = distribution
            .group_of(rank)
            .ok_or_else(|| SipError::input(format!("rank {rank} has no group")))?;
        Ok(ClusterTopology {
            rank,
            role,
            worker_ranks: distribution.ranks_of(Role::Worker),
            server_ranks: distribution.ranks_of(Role::Server),
            group_workers: group.workers.clone(),
            local_servers: group.servers.clone(),
        })
    }

    #[inline]
    pub fn num_workers(&self) -> usize { self.worker_ranks.len() }

    #[inline]
    pub fn num_servers(&self) -> usize { self.server_ranks.len() }

    /// Whether this is the worker sending group-wide requests to the local servers.
    pub fn is_responsible(&self) -> bool {
        self.role == Role::Worker && self.group_workers.first() == Some(&self.rank)
    }

    /// Position of this rank among the workers.
    pub fn worker_index(&self) -> Option<usize> {
        self.worker_ranks.iter().position(|rank| *rank == self.rank)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn more_workers() {
        let dist = RankDistribution::interleaved(5, 2).unwrap();
        assert_eq!(dist.size(), 7);
        assert_eq!(dist.groups()[0], RankGroup { workers: vec![0, 1, 2], servers: vec![3] });
        assert_eq!(dist.groups()[1], RankGroup { workers: vec![4, 5], servers: vec![6] });
        assert_eq!(dist.ranks_of(Role::Server), vec![3, 6]);

        let topo = ClusterTopology::new(&dist, 4).unwrap();
        assert!(topo.is_responsible());
        assert_eq!(topo.local_servers(), &vec![6]);
        assert_eq!(topo.worker_index(), Some(3));
        assert!(!ClusterTopology::new(&dist, 5).unwrap().is_responsible());
        assert!(!ClusterTopology::new(&dist, 6).unwrap().is_responsible());
    }

    #[test]
    fn more_servers() {
        let dist = RankDistribution::interleaved(2, 5).unwrap();
        assert_eq!(dist.groups()[0], RankGroup { workers: vec![0], servers: vec![1, 2, 3] });
        assert_eq!(dist.groups()[1], RankGroup { workers: vec![4], servers: vec![5, 6] });
        // every server belongs to exactly one group
        let total = dist.groups().iter().map(|g| g.servers.len()).sum::<usize>();
        assert_eq!(total, 5);
    }

    #[test]
    fn single_process() {
        let dist = RankDistribution::interleaved(1, 0).unwrap();
        let topo = ClusterTopology::new(&dist, 0).unwrap();
        assert_eq!(*topo.role(), Role::Worker);
        assert_eq!(topo.num_servers(), 0);
        assert!(topo.local_servers().is_empty());
        assert!(RankDistribution::interleaved(0, 2).is_err());
        assert!(ClusterTopology::new(&dist, 1).is_err());
    }
}
