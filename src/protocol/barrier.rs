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

use paste::paste;

use super::{MessageKind, Tag};
use crate::constants::TAG_TRANSACTION_MASK;
use crate::error::WireFault;
use crate::transport::Rank;

macro_rules! tag_makers {
    ($($kind:ident),+ $(,)?) => {
        paste! {
            $(
                #[inline]
                pub fn [<tag_for_ $kind:snake>](&mut self) -> Tag {
                    self.make_tag(MessageKind::$kind)
                }
            )+
        }
    };
}

/// Worker-side section and transaction counters.
///
/// Every request opens a new transaction; a barrier starts a new section and restarts
/// transaction numbering.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct BarrierSupport {
    section: i32,
    transaction: u32,
}

impl BarrierSupport {
    #[inline]
    pub fn new() -> Self { default!() }

    #[inline]
    pub fn section_number(&self) -> i32 { self.section }

    #[inline]
    pub fn transaction_number(&self) -> u32 { self.transaction }

    /// Makes tag for a new transaction of the given kind.
    pub fn make_tag(&mut self, kind: MessageKind) -> Tag {
        let tag = Tag::encode(kind, self.transaction);
        self.transaction = (self.transaction + 1) & TAG_TRANSACTION_MASK;
        tag
    }

    /// Makes pair of request and data tags sharing the same new transaction.
    pub fn make_tags_with_data(&mut self, kind: MessageKind) -> (Tag, Option<Tag>) {
        let tag = self.make_tag(kind);
        (tag, kind.data_kind().map(|data| tag.with_kind(data)))
    }

    tag_makers!(
        Get,
        Put,
        PutAccumulate,
        PutInitialize,
        PutIncrement,
        PutScale,
        Delete,
        SetPersistent,
        RestorePersistent,
        EndProgram,
    );

    /// Enters the next section.
    pub fn barrier(&mut self) {
        self.section += 1;
        self.transaction = 0;
    }
}

/// Outcome of checking a section number at a server.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SectionStep {
    /// The message belongs to the section already seen.
    Same,
    /// The message opens a new section; all block consistency state must be reset.
    Advanced,
}

/// Server-side check that section numbers never decrease.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct SectionTracker {
    last_seen: i32,
}

impl SectionTracker {
    #[inline]
    pub fn new() -> Self { default!() }

    #[inline]
    pub fn last_seen(&self) -> i32 { self.last_seen }

    pub fn check(&mut self, section: i32, source: Rank) -> Result<SectionStep, WireFault> {
        if section < self.last_seen {
            return Err(WireFault::SectionRegression(source, section, self.last_seen));
        }
        if section > self.last_seen {
            self.last_seen = section;
            return Ok(SectionStep::Advanced);
        }
        Ok(SectionStep::Same)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transactions() {
        let mut support = BarrierSupport::new();
        assert_eq!(support.tag_for_get().transaction(), 0);
        let (put, data) = support.make_tags_with_data(MessageKind::Put);
        assert_eq!(put.decode(), Ok((MessageKind::Put, 1)));
        assert_eq!(data.map(Tag::decode), Some(Ok((MessageKind::PutData, 1))));
        assert_eq!(support.tag_for_put_accumulate().decode(), Ok((MessageKind::PutAccumulate, 2)));
        assert_eq!(support.tag_for_end_program().kind(), Ok(MessageKind::EndProgram));

        support.barrier();
        assert_eq!(support.section_number(), 1);
        assert_eq!(support.tag_for_delete().transaction(), 0);
    }

    #[test]
    fn transaction_wrap() {
        let mut support = BarrierSupport { section: 0, transaction: TAG_TRANSACTION_MASK };
        assert_eq!(support.tag_for_get().transaction(), TAG_TRANSACTION_MASK);
        assert_eq!(support.transaction_number(), 0);
    }

    #[test]
    fn sections() {
        let mut tracker = SectionTracker::new();
        assert_eq!(tracker.check(0, 1), Ok(SectionStep::Same));
        assert_eq!(tracker.check(2, 1), Ok(SectionStep::Advanced));
        assert_eq!(tracker.check(2, 3), Ok(SectionStep::Same));
        assert_eq!(tracker.check(1, 3), Err(WireFault::SectionRegression(3, 1, 2)));
        assert_eq!(tracker.last_seen(), 2);
    }
}
