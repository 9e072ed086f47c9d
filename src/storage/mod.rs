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

//! Block storage: per-process block maps, disk-tiered server storage and persistent arrays.

mod array_file;
mod disk;
mod map;
mod persistent;
mod server_block;

pub use array_file::{ArrayFile, ArrayFileHeader, ArrayLayout, BlockSlot};
pub use disk::{persistent_file_path, DiskConfig, DiskTieredStorage};
pub use map::{BlockKey, BlockStorage};
pub use persistent::{PersistentMarks, PersistentStore};
pub use server_block::{BlockState, ServerBlock};
