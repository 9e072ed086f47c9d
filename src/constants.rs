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

//! Constants shared by workers and servers

#![allow(missing_docs)]

/// Maximal number of dimensions of a SIAL array.
pub const MAX_RANK: usize = 6;

/// Index value stored in the dimensions beyond the declared rank of an array.
pub const UNUSED_INDEX_VALUE: i32 = 1;

/// Index value matching any segment in lookups over a whole slice of an array.
pub const WILDCARD_INDEX_VALUE: i32 = -2;

/// Number of ints in the wire representation of a block identity: array id followed by
/// [`MAX_RANK`] index values.
pub const BLOCK_ID_WIRE_LEN: usize = MAX_RANK + 1;

pub const TAG_KIND_BITS: u32 = 4;
pub const TAG_KIND_MASK: u32 = (1 << TAG_KIND_BITS) - 1;
pub const TAG_TRANSACTION_BITS: u32 = 26;
pub const TAG_TRANSACTION_MASK: u32 = (1 << TAG_TRANSACTION_BITS) - 1;
pub const TAG_TRANSACTION_SHIFT: u32 = TAG_KIND_BITS;

/// Maximal number of acknowledgements a worker keeps posted before it starts draining them.
pub const MAX_POSTED_ASYNC: usize = 2048;

pub const ARRAY_FILE_MAGIC: u32 = 70209;
pub const ARRAY_FILE_MAJOR_VERSION: u32 = 1;
pub const ARRAY_FILE_MINOR_VERSION: u32 = 1;
/// Serialized size of the array file header (four 32-bit integers).
pub const ARRAY_FILE_HEADER_LEN: usize = 16;

pub const ARRAY_FILE_EXT: &str = "arr";
pub const PERSISTENT_FILE_EXT: &str = "persistarr";

/// Default server memory budget: 2 GiB of resident block data.
pub const DEFAULT_MEMORY_BUDGET: usize = 2 << 30;

pub const LIB_NAME_SIPVM: &str = "SipVM";
