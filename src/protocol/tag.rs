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

use core::convert::TryFrom;
use core::fmt::{self, Display, Formatter};

use amplify::num::u4;

use super::AccessOp;
use crate::constants::{TAG_KIND_MASK, TAG_TRANSACTION_MASK, TAG_TRANSACTION_SHIFT};
use crate::error::WireFault;

/// Kinds of messages exchanged between workers and servers.
///
/// The numeric values are a part of the wire format and occupy the lower four bits of a
/// [`Tag`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[repr(u8)]
pub enum MessageKind {
    #[display("DELETE")]
    Delete = 0,

    #[display("GET")]
    Get = 1,

    #[display("PUT")]
    Put = 2,

    #[display("PUT_DATA")]
    PutData = 3,

    #[display("PUT_ACCUMULATE")]
    PutAccumulate = 4,

    #[display("PUT_ACCUMULATE_DATA")]
    PutAccumulateData = 5,

    #[display("BARRIER")]
    Barrier = 6,

    #[display("END_PROGRAM")]
    EndProgram = 7,

    #[display("SET_PERSISTENT")]
    SetPersistent = 8,

    #[display("RESTORE_PERSISTENT")]
    RestorePersistent = 9,

    #[display("PUT_INITIALIZE")]
    PutInitialize = 10,

    #[display("PUT_INCREMENT")]
    PutIncrement = 11,

    #[display("PUT_SCALE")]
    PutScale = 12,
}

impl MessageKind {
    /// Enumerates all message kinds.
    pub const fn all() -> [MessageKind; 13] {
        [
            MessageKind::Delete,
            MessageKind::Get,
            MessageKind::Put,
            MessageKind::PutData,
            MessageKind::PutAccumulate,
            MessageKind::PutAccumulateData,
            MessageKind::Barrier,
            MessageKind::EndProgram,
            MessageKind::SetPersistent,
            MessageKind::RestorePersistent,
            MessageKind::PutInitialize,
            MessageKind::PutIncrement,
            MessageKind::PutScale,
        ]
    }

    #[inline]
    pub fn to_u4(self) -> u4 { u4::with(self as u8) }

    /// Kind used for the bulk data following a request of this kind.
    pub fn data_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::Put => Some(MessageKind::PutData),
            MessageKind::PutAccumulate => Some(MessageKind::PutAccumulateData),
            _ => None,
        }
    }

    /// Block access this message performs, as seen by the consistency tracker.
    pub fn access_op(self) -> Option<AccessOp> {
        match self {
            MessageKind::Get => Some(AccessOp::Get),
            MessageKind::Put | MessageKind::PutInitialize | MessageKind::PutScale => {
                Some(AccessOp::Put)
            }
            MessageKind::PutAccumulate | MessageKind::PutIncrement => Some(AccessOp::PutAccumulate),
            _ => None,
        }
    }
}

impl TryFrom<u4> for MessageKind {
    type Error = u4;

    fn try_from(value: u4) -> Result<Self, Self::Error> {
        MessageKind::all()
            .iter()
            .copied()
            .find(|kind| *kind as u8 == value.to_u8())
            .ok_or(value)
    }
}

/// Transport-level routing tag: message kind in bits 0-3, transaction number in bits 4-29.
/// The two upper bits are always zero.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, From)]
#[wrapper(Deref, LowerHex)]
pub struct Tag(#[from] u32);

impl Tag {
    /// Packs the kind and transaction number; the transaction wraps modulo 2^26.
    pub fn encode(kind: MessageKind, transaction: u32) -> Tag {
        let kind = kind.to_u4().to_u8() as u32;
        Tag(kind | ((transaction & TAG_TRANSACTION_MASK) << TAG_TRANSACTION_SHIFT))
    }

    /// Unpacks the kind and transaction number.
    pub fn decode(self) -> Result<(MessageKind, u32), WireFault> {
        Ok((self.kind()?, self.transaction()))
    }

    pub fn kind(self) -> Result<MessageKind, WireFault> {
        let bits = u4::with((self.0 & TAG_KIND_MASK) as u8);
        MessageKind::try_from(bits).map_err(|_| WireFault::UnknownKind(self.0))
    }

    #[inline]
    pub fn transaction(self) -> u32 { (self.0 >> TAG_TRANSACTION_SHIFT) & TAG_TRANSACTION_MASK }

    /// Tag of the same transaction with a different message kind; used for the data messages
    /// and the acknowledgements following a request.
    #[inline]
    pub fn with_kind(self, kind: MessageKind) -> Tag { Tag::encode(kind, self.transaction()) }

    #[inline]
    pub fn to_u32(self) -> u32 { self.0 }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Ok(kind) => write!(f, "{kind}#{}", self.transaction()),
            Err(_) => write!(f, "?{:#x}", self.0),
        }
    }
}
