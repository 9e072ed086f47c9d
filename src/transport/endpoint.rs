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

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use super::{Envelope, Payload, Rank};
use crate::constants::TAG_TRANSACTION_MASK;
use crate::error::{SipError, WireFault};
use crate::protocol::{MessageKind, Tag};

/// Interval at which blocked calls look at the abort flag.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Job-wide abort flag. Once raised, every blocking transport call fails with
/// [`SipError::Aborted`].
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    #[inline]
    pub fn raise(&self) { self.0.store(true, Ordering::SeqCst) }

    #[inline]
    pub fn is_raised(&self) -> bool { self.0.load(Ordering::SeqCst) }

    fn check(&self) -> Result<(), SipError> {
        if self.is_raised() {
            return Err(SipError::Aborted);
        }
        Ok(())
    }
}

/// Handle of a posted receive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RecvRequest {
    id: u64,
    source: Rank,
    tag: Tag,
}

impl RecvRequest {
    #[inline]
    pub fn source(&self) -> Rank { self.source }

    #[inline]
    pub fn tag(&self) -> Tag { self.tag }
}

/// Set of connected endpoints for all ranks of a job.
#[derive(Debug)]
pub struct Cluster {
    endpoints: Vec<Endpoint>,
    abort: AbortHandle,
}

impl Cluster {
    /// Creates endpoints for `size` ranks.
    pub fn new(size: usize) -> Self {
        let abort = AbortHandle::default();
        let (outboxes, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        let endpoints = inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Endpoint {
                rank,
                inbox,
                outboxes: outboxes.clone(),
                unexpected: VecDeque::new(),
                posted: VecDeque::new(),
                completed: BTreeMap::new(),
                next_request: 0,
                barrier_epoch: 0,
                abort: abort.clone(),
            })
            .collect();
        Cluster { endpoints, abort }
    }

    #[inline]
    pub fn size(&self) -> usize { self.endpoints.len() }

    #[inline]
    pub fn abort_handle(&self) -> AbortHandle { self.abort.clone() }

    /// Splits the cluster into endpoints ordered by rank, ready to be moved to rank threads.
    pub fn into_endpoints(self) -> Vec<Endpoint> { self.endpoints }
}

/// Communication endpoint of a single rank.
///
/// A message arriving at the endpoint completes the oldest posted receive with the same source
/// and tag; otherwise it is queued as unexpected. A newly posted receive takes the oldest
/// queued message with the same source and tag.
#[derive(Debug)]
pub struct Endpoint {
    rank: Rank,
    inbox: Receiver<Envelope>,
    outboxes: Vec<Sender<Envelope>>,
    unexpected: VecDeque<Envelope>,
    posted: VecDeque<RecvRequest>,
    completed: BTreeMap<u64, Envelope>,
    next_request: u64,
    barrier_epoch: u32,
    abort: AbortHandle,
}

impl Endpoint {
    #[inline]
    pub fn rank(&self) -> Rank { self.rank }

    #[inline]
    pub fn size(&self) -> usize { self.outboxes.len() }

    #[inline]
    pub fn abort_handle(&self) -> AbortHandle { self.abort.clone() }

    /// Raises the job-wide abort flag.
    pub fn abort(&self) { self.abort.raise() }

    /// Sends message. The send is buffered and never blocks.
    pub fn send(&self, dest: Rank, tag: Tag, payload: Payload) -> Result<(), SipError> {
        self.abort.check()?;
        let outbox = self.outboxes.get(dest).ok_or(WireFault::NoSuchRank(dest))?;
        trace!("rank {} sends {tag} to {dest} ({} elements)", self.rank, payload.element_count());
        outbox.send(Envelope { source: self.rank, tag, payload }).map_err(|_| {
            if self.abort.is_raised() {
                SipError::Aborted
            } else {
                WireFault::Disconnected(dest).into()
            }
        })
    }

    /// Posts receive for a message with the given source and tag.
    pub fn post_recv(&mut self, source: Rank, tag: Tag) -> RecvRequest {
        let req = RecvRequest { id: self.next_request, source, tag };
        self.next_request += 1;
        let pos = self
            .unexpected
            .iter()
            .position(|env| env.source == source && env.tag == tag);
        match pos.and_then(|pos| self.unexpected.remove(pos)) {
            Some(envelope) => {
                self.completed.insert(req.id, envelope);
            }
            None => self.posted.push_back(req),
        }
        req
    }

    /// Checks whether the posted receive has completed, without blocking.
    pub fn test(&mut self, req: &RecvRequest) -> Result<bool, SipError> {
        self.pump()?;
        Ok(self.completed.contains_key(&req.id))
    }

    /// Blocks until the posted receive completes. The message stays available for
    /// [`Endpoint::complete`].
    pub fn wait(&mut self, req: &RecvRequest) -> Result<(), SipError> {
        while !self.completed.contains_key(&req.id) {
            let envelope = self.next_envelope()?;
            self.deliver(envelope);
        }
        Ok(())
    }

    /// Waits for the posted receive and takes its message.
    pub fn complete(&mut self, req: RecvRequest) -> Result<Envelope, SipError> {
        self.wait(&req)?;
        self.completed
            .remove(&req.id)
            .ok_or_else(|| SipError::Check(format!("receive {} was completed twice", req.tag)))
    }

    /// Blocking receive of a message with the given source and tag.
    pub fn recv(&mut self, source: Rank, tag: Tag) -> Result<Envelope, SipError> {
        let req = self.post_recv(source, tag);
        self.complete(req)
    }

    /// Blocks until either an unexpected message is available, returning its source and tag,
    /// or some posted receive completes, returning `None`.
    pub fn probe(&mut self) -> Result<Option<(Rank, Tag)>, SipError> {
        loop {
            if let Some(env) = self.unexpected.front() {
                return Ok(Some((env.source, env.tag)));
            }
            let envelope = self.next_envelope()?;
            if self.deliver(envelope) {
                return Ok(None);
            }
        }
    }

    /// Synchronizes all ranks of the group; the first rank of the group gathers and releases
    /// the others. Every member must call this with the same group.
    pub fn barrier(&mut self, group: &[Rank]) -> Result<(), SipError> {
        let tag = Tag::encode(MessageKind::Barrier, self.barrier_epoch);
        self.barrier_epoch = (self.barrier_epoch + 1) & TAG_TRANSACTION_MASK;
        let (root, others) = match group.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        if *root == self.rank {
            for member in others {
                self.recv(*member, tag)?
                    .payload
                    .expect_empty(MessageKind::Barrier, *member)?;
            }
            for member in others {
                self.send(*member, tag, Payload::Empty)?;
            }
        } else {
            self.send(*root, tag, Payload::Empty)?;
            self.recv(*root, tag)?
                .payload
                .expect_empty(MessageKind::Barrier, *root)?;
        }
        Ok(())
    }

    /// Number of messages which arrived but were not matched by any receive yet.
    #[inline]
    pub fn unexpected_count(&self) -> usize { self.unexpected.len() }

    fn next_envelope(&mut self) -> Result<Envelope, SipError> {
        loop {
            self.abort.check()?;
            match self.inbox.recv_timeout(ABORT_POLL_INTERVAL) {
                Ok(envelope) => return Ok(envelope),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(SipError::Aborted),
            }
        }
    }

    fn pump(&mut self) -> Result<(), SipError> {
        self.abort.check()?;
        loop {
            match self.inbox.try_recv() {
                Ok(envelope) => {
                    self.deliver(envelope);
                }
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(SipError::Aborted),
            }
        }
    }

    /// Returns whether the message completed a posted receive.
    fn deliver(&mut self, envelope: Envelope) -> bool {
        trace!("rank {} got {} from {}", self.rank, envelope.tag, envelope.source);
        let pos = self
            .posted
            .iter()
            .position(|req| req.source == envelope.source && req.tag == envelope.tag);
        match pos.and_then(|pos| self.posted.remove(pos)) {
            Some(req) => {
                self.completed.insert(req.id, envelope);
                true
            }
            None => {
                self.unexpected.push_back(envelope);
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    fn tag(kind: MessageKind, transaction: u32) -> Tag { Tag::encode(kind, transaction) }

    #[test]
    fn matching_order() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let mut b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();

        let t1 = tag(MessageKind::PutData, 1);
        let t2 = tag(MessageKind::PutData, 2);
        a.send(1, t2, Payload::Doubles(vec![2.0])).unwrap();
        a.send(1, t1, Payload::Doubles(vec![1.0])).unwrap();
        a.send(1, t1, Payload::Doubles(vec![3.0])).unwrap();

        let first = b.post_recv(0, t1);
        let second = b.post_recv(0, t1);
        assert!(b.test(&second).unwrap());
        assert_eq!(b.complete(second).unwrap().payload, Payload::Doubles(vec![3.0]));
        assert_eq!(b.complete(first).unwrap().payload, Payload::Doubles(vec![1.0]));
        assert_eq!(b.probe().unwrap(), Some((0, t2)));
        assert_eq!(b.unexpected_count(), 1);
    }

    #[test]
    fn probe_reports_completed_receive() {
        let mut endpoints = Cluster::new(2).into_endpoints();
        let mut b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();
        let t = tag(MessageKind::Get, 0);
        let req = b.post_recv(0, t);
        a.send(1, t, Payload::Empty).unwrap();
        assert_eq!(b.probe().unwrap(), None);
        assert!(b.test(&req).unwrap());
    }

    #[test]
    fn barrier_releases_all() {
        let endpoints = Cluster::new(3).into_endpoints();
        let handles = endpoints
            .into_iter()
            .map(|mut endpoint| {
                thread::spawn(move || {
                    for _ in 0..3 {
                        endpoint.barrier(&[0, 1, 2]).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn abort_unblocks() {
        let cluster = Cluster::new(2);
        let abort = cluster.abort_handle();
        let mut endpoints = cluster.into_endpoints();
        let mut b = endpoints.pop().unwrap();
        let waiter = thread::spawn(move || b.recv(0, tag(MessageKind::Get, 0)));
        abort.raise();
        assert!(waiter.join().unwrap().unwrap_err().is_aborted());
        assert!(endpoints[0].send(1, tag(MessageKind::Get, 0), Payload::Empty).is_err());
    }

    #[test]
    fn unknown_rank() {
        let endpoints = Cluster::new(1).into_endpoints();
        let err = endpoints[0].send(4, tag(MessageKind::Get, 0), Payload::Empty).unwrap_err();
        assert!(matches!(err, SipError::Wire(WireFault::NoSuchRank(4))));
    }
}
