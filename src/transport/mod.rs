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

//! In-process message passing between ranks.
//!
//! Every rank of a job runs on its own thread and owns an [`Endpoint`]. Endpoints provide
//! tagged point-to-point messages with in-order delivery per (source, destination) pair,
//! posted receives, probing of unexpected messages, a worker-wide barrier and a job-wide
//! abort flag.

mod endpoint;

pub use endpoint::{AbortHandle, Cluster, Endpoint, RecvRequest};

use crate::error::WireFault;
use crate::protocol::{MessageKind, Tag};

/// Rank of a process in the job.
pub type Rank = usize;

/// Message body.
#[derive(Clone, PartialEq, Debug)]
pub enum Payload {
    /// Acknowledgements, barrier and END_PROGRAM messages.
    Empty,

    /// Request bodies.
    Ints(Vec<i32>),

    /// Block data.
    Doubles(Vec<f64>),

    /// Scalar put requests: the value followed by the request body.
    Scalar(f64, Vec<i32>),
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Ints(_) => "integer",
            Payload::Doubles(_) => "double",
            Payload::Scalar(_, _) => "scalar",
        }
    }

    /// Number of elements carried, as it would be reported by the transport status.
    pub fn element_count(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Ints(ints) => ints.len(),
            Payload::Doubles(doubles) => doubles.len(),
            Payload::Scalar(_, ints) => ints.len() + 1,
        }
    }

    fn wrong_type(&self, kind: MessageKind, source: Rank, expected: &'static str) -> WireFault {
        WireFault::PayloadType(kind, source, expected, self.type_name())
    }

    pub fn into_ints(self, kind: MessageKind, source: Rank) -> Result<Vec<i32>, WireFault> {
        match self {
            Payload::Ints(ints) => Ok(ints),
            other => Err(other.wrong_type(kind, source, "integer")),
        }
    }

    pub fn into_doubles(self, kind: MessageKind, source: Rank) -> Result<Vec<f64>, WireFault> {
        match self {
            Payload::Doubles(doubles) => Ok(doubles),
            other => Err(other.wrong_type(kind, source, "double")),
        }
    }

    pub fn into_scalar(
        self,
        kind: MessageKind,
        source: Rank,
    ) -> Result<(f64, Vec<i32>), WireFault> {
        match self {
            Payload::Scalar(value, ints) => Ok((value, ints)),
            other => Err(other.wrong_type(kind, source, "scalar")),
        }
    }

    pub fn expect_empty(self, kind: MessageKind, source: Rank) -> Result<(), WireFault> {
        match self {
            Payload::Empty => Ok(()),
            other => Err(other.wrong_type(kind, source, "empty")),
        }
    }
}

/// Message together with its routing information.
#[derive(Clone, PartialEq, Debug)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub payload: Payload,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_types() {
        let ints = Payload::Ints(vec![1, 2, 3]);
        assert_eq!(ints.element_count(), 3);
        assert_eq!(ints.clone().into_ints(MessageKind::Get, 2), Ok(vec![1, 2, 3]));
        assert_eq!(
            ints.into_doubles(MessageKind::PutData, 2),
            Err(WireFault::PayloadType(MessageKind::PutData, 2, "double", "integer"))
        );
        assert_eq!(Payload::Scalar(1.5, vec![0; 9]).element_count(), 10);
        assert!(Payload::Empty.expect_empty(MessageKind::EndProgram, 0).is_ok());
        assert!(Payload::Doubles(vec![]).expect_empty(MessageKind::Barrier, 0).is_err());
    }
}
