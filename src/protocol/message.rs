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

//! Bodies of the requests sent by workers to servers.
//!
//! Every body ends with the program counter of the issuing instruction and the section number
//! of the issuing worker. A body whose element count differs from the expected one is rejected
//! as a protocol fault.

use super::MessageKind;
use crate::block::{ArrayId, BlockId};
use crate::constants::BLOCK_ID_WIRE_LEN;
use crate::error::WireFault;
use crate::transport::{Payload, Rank};

/// Element count of GET, PUT and PUT_ACCUMULATE request bodies.
pub const BLOCK_REQUEST_LEN: usize = BLOCK_ID_WIRE_LEN + 2;

/// Element count of DELETE request bodies.
pub const ARRAY_REQUEST_LEN: usize = 3;

/// Element count of SET_PERSISTENT and RESTORE_PERSISTENT request bodies.
pub const PERSISTENT_REQUEST_LEN: usize = 4;

fn expect_count(
    kind: MessageKind,
    source: Rank,
    expected: usize,
    found: usize,
) -> Result<(), WireFault> {
    if expected != found {
        return Err(WireFault::ElementCount(kind, source, expected, found));
    }
    Ok(())
}

/// Checks block data carried by a PUT_DATA or PUT_ACCUMULATE_DATA message, or by a reply to
/// GET.
pub fn block_data(
    kind: MessageKind,
    source: Rank,
    payload: Payload,
    expected: usize,
) -> Result<Vec<f64>, WireFault> {
    let data = payload.into_doubles(kind, source)?;
    expect_count(kind, source, expected, data.len())?;
    Ok(data)
}

/// Body of GET, PUT and PUT_ACCUMULATE requests.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BlockRequest {
    pub id: BlockId,
    pub line: i32,
    pub section: i32,
}

impl BlockRequest {
    pub fn to_ints(&self) -> Vec<i32> {
        let mut ints = Vec::with_capacity(BLOCK_REQUEST_LEN);
        ints.extend_from_slice(&self.id.to_wire());
        ints.push(self.line);
        ints.push(self.section);
        ints
    }

    #[inline]
    pub fn to_payload(&self) -> Payload { Payload::Ints(self.to_ints()) }

    pub fn from_ints(kind: MessageKind, source: Rank, ints: &[i32]) -> Result<Self, WireFault> {
        expect_count(kind, source, BLOCK_REQUEST_LEN, ints.len())?;
        let id = BlockId::from_wire(ints)
            .ok_or(WireFault::ElementCount(kind, source, BLOCK_REQUEST_LEN, ints.len()))?;
        Ok(BlockRequest {
            id,
            line: ints[BLOCK_ID_WIRE_LEN],
            section: ints[BLOCK_ID_WIRE_LEN + 1],
        })
    }

    pub fn from_payload(
        kind: MessageKind,
        source: Rank,
        payload: Payload,
    ) -> Result<Self, WireFault> {
        BlockRequest::from_ints(kind, source, &payload.into_ints(kind, source)?)
    }
}

/// Body of PUT_INITIALIZE, PUT_INCREMENT and PUT_SCALE requests.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ScalarRequest {
    pub value: f64,
    pub block: BlockRequest,
}

impl ScalarRequest {
    #[inline]
    pub fn to_payload(&self) -> Payload { Payload::Scalar(self.value, self.block.to_ints()) }

    pub fn from_payload(
        kind: MessageKind,
        source: Rank,
        payload: Payload,
    ) -> Result<Self, WireFault> {
        let (value, ints) = payload.into_scalar(kind, source)?;
        let block = BlockRequest::from_ints(kind, source, &ints)?;
        Ok(ScalarRequest { value, block })
    }
}

/// Body of DELETE requests.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ArrayRequest {
    pub array_id: ArrayId,
    pub line: i32,
    pub section: i32,
}

impl ArrayRequest {
    #[inline]
    pub fn to_payload(&self) -> Payload {
        Payload::Ints(vec![self.array_id, self.line, self.section])
    }

    pub fn from_payload(
        kind: MessageKind,
        source: Rank,
        payload: Payload,
    ) -> Result<Self, WireFault> {
        let ints = payload.into_ints(kind, source)?;
        expect_count(kind, source, ARRAY_REQUEST_LEN, ints.len())?;
        Ok(ArrayRequest { array_id: ints[0], line: ints[1], section: ints[2] })
    }
}

/// Body of SET_PERSISTENT and RESTORE_PERSISTENT requests; the label is given by its slot in
/// the string table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PersistentRequest {
    pub array_id: ArrayId,
    pub string_slot: i32,
    pub line: i32,
    pub section: i32,
}

impl PersistentRequest {
    #[inline]
    pub fn to_payload(&self) -> Payload {
        Payload::Ints(vec![self.array_id, self.string_slot, self.line, self.section])
    }

    pub fn from_payload(
        kind: MessageKind,
        source: Rank,
        payload: Payload,
    ) -> Result<Self, WireFault> {
        let ints = payload.into_ints(kind, source)?;
        expect_count(kind, source, PERSISTENT_REQUEST_LEN, ints.len())?;
        Ok(PersistentRequest {
            array_id: ints[0],
            string_slot: ints[1],
            line: ints[2],
            section: ints[3],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_request_layout() {
        let req = BlockRequest { id: BlockId::new(2, &[3, 4]), line: 17, section: 5 };
        let ints = req.to_ints();
        assert_eq!(ints, vec![2, 3, 4, 1, 1, 1, 1, 17, 5]);
        assert_eq!(BlockRequest::from_payload(MessageKind::Get, 1, req.to_payload()), Ok(req));
    }

    #[test]
    fn short_bodies_rejected() {
        let err = BlockRequest::from_payload(MessageKind::Put, 3, Payload::Ints(vec![1; 8]));
        assert_eq!(err, Err(WireFault::ElementCount(MessageKind::Put, 3, 9, 8)));
        let err = PersistentRequest::from_payload(
            MessageKind::SetPersistent,
            3,
            Payload::Ints(vec![1, 2, 3]),
        );
        assert_eq!(err, Err(WireFault::ElementCount(MessageKind::SetPersistent, 3, 4, 3)));
        let err = ArrayRequest::from_payload(MessageKind::Delete, 0, Payload::Doubles(vec![1.0]));
        assert!(matches!(err, Err(WireFault::PayloadType(..))));
    }

    #[test]
    fn scalar_body() {
        let req = ScalarRequest {
            value: 2.5,
            block: BlockRequest { id: BlockId::new(1, &[1]), line: 3, section: 0 },
        };
        let payload = req.to_payload();
        assert_eq!(payload.element_count(), BLOCK_REQUEST_LEN + 1);
        assert_eq!(ScalarRequest::from_payload(MessageKind::PutScale, 0, payload), Ok(req));
    }

    #[test]
    fn data_count() {
        let payload = Payload::Doubles(vec![0.0; 5]);
        assert_eq!(
            block_data(MessageKind::PutData, 1, payload, 6),
            Err(WireFault::ElementCount(MessageKind::PutData, 1, 6, 5))
        );
    }
}
