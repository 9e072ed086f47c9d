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

use std::collections::VecDeque;

use crate::error::SipError;
use crate::protocol::Tag;
use crate::transport::{Endpoint, Envelope, Rank, RecvRequest};

/// Acknowledgements a worker awaits from servers.
///
/// The number of posted acknowledgement receives is bounded. When all slots are busy the
/// worker waits for the oldest acknowledgement before posting a new one.
#[derive(Debug)]
pub struct AsyncAcks {
    posted: VecDeque<RecvRequest>,
    capacity: usize,
    stalls: u64,
}

impl AsyncAcks {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AsyncAcks { posted: VecDeque::with_capacity(capacity), capacity, stalls: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize { self.posted.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.posted.is_empty() }

    /// Number of times a new acknowledgement had to wait for a free slot.
    #[inline]
    pub fn stalls(&self) -> u64 { self.stalls }

    /// Posts receive of an acknowledgement which will be checked later.
    pub fn expect_ack_from(
        &mut self,
        endpoint: &mut Endpoint,
        source: Rank,
        tag: Tag,
    ) -> Result<(), SipError> {
        if self.posted.len() >= self.capacity {
            self.cleanup(endpoint)?;
        }
        if self.posted.len() >= self.capacity {
            if self.stalls == 0 {
                warn!(
                    "all {} acknowledgement slots are busy; waiting for the oldest one",
                    self.capacity
                );
            }
            self.stalls += 1;
            self.complete_oldest(endpoint)?;
        }
        self.posted.push_back(endpoint.post_recv(source, tag));
        Ok(())
    }

    /// Waits for an acknowledgement right away.
    pub fn expect_sync_ack_from(
        &mut self,
        endpoint: &mut Endpoint,
        source: Rank,
        tag: Tag,
    ) -> Result<(), SipError> {
        check_ack(endpoint.recv(source, tag)?)
    }

    /// Waits for every posted acknowledgement.
    pub fn wait_all(&mut self, endpoint: &mut Endpoint) -> Result<(), SipError> {
        while !self.posted.is_empty() {
            self.complete_oldest(endpoint)?;
        }
        Ok(())
    }

    /// Releases slots of the acknowledgements which have already arrived, oldest first.
    pub fn cleanup(&mut self, endpoint: &mut Endpoint) -> Result<usize, SipError> {
        let mut count = 0;
        while let Some(request) = self.posted.front() {
            if !endpoint.test(request)? {
                break;
            }
            self.complete_oldest(endpoint)?;
            count += 1;
        }
        Ok(count)
    }

    fn complete_oldest(&mut self, endpoint: &mut Endpoint) -> Result<(), SipError> {
        match self.posted.pop_front() {
            Some(request) => check_ack(endpoint.complete(request)?),
            None => Ok(()),
        }
    }
}

fn check_ack(envelope: Envelope) -> Result<(), SipError> {
    let kind = envelope.tag.kind()?;
    envelope.payload.expect_empty(kind, envelope.source)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::MessageKind;
    use crate::transport::{Cluster, Payload};

    fn tag(transaction: u32) -> Tag { Tag::encode(MessageKind::PutData, transaction) }

    #[test]
    fn backpressure() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let server = endpoints.pop().unwrap();
        let mut worker = endpoints.pop().unwrap();
        let mut acks = AsyncAcks::with_capacity(2);

        acks.expect_ack_from(&mut worker, 1, tag(0)).unwrap();
        acks.expect_ack_from(&mut worker, 1, tag(1)).unwrap();
        server.send(0, tag(0), Payload::Empty).unwrap();
        acks.expect_ack_from(&mut worker, 1, tag(2)).unwrap();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks.stalls(), 0);

        server.send(0, tag(1), Payload::Empty).unwrap();
        server.send(0, tag(2), Payload::Empty).unwrap();
        assert_eq!(acks.cleanup(&mut worker).unwrap(), 2);
        assert!(acks.is_empty());
    }

    #[test]
    fn stall_waits_for_oldest() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let server = endpoints.pop().unwrap();
        let mut worker = endpoints.pop().unwrap();
        let mut acks = AsyncAcks::with_capacity(1);

        acks.expect_ack_from(&mut worker, 1, tag(0)).unwrap();
        let sender = std::thread::spawn(move || {
            server.send(0, tag(0), Payload::Empty).unwrap();
            server
        });
        acks.expect_ack_from(&mut worker, 1, tag(1)).unwrap();
        assert_eq!(acks.len(), 1);
        let server = sender.join().unwrap();
        server.send(0, tag(1), Payload::Empty).unwrap();
        acks.wait_all(&mut worker).unwrap();
    }

    #[test]
    fn non_empty_ack_is_fatal() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let server = endpoints.pop().unwrap();
        let mut worker = endpoints.pop().unwrap();
        let mut acks = AsyncAcks::with_capacity(4);
        server.send(0, tag(3), Payload::Ints(vec![1])).unwrap();
        assert!(acks.expect_sync_ack_from(&mut worker, 1, tag(3)).is_err());
    }
}
