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

use std::path::Path;
use std::sync::Arc;

use sipvm::storage::{persistent_file_path, DiskConfig, DiskTieredStorage};
use sipvm::topology::{DataDistribution, DistributionKind};
use sipvm::{ArrayInfo, ArrayKind, BlockId, IndexRange, ProgramTables, SipError};

fn tables(name: &str, names: &[&str]) -> Arc<ProgramTables> {
    let mut tables = ProgramTables::new(name);
    for name in names {
        tables.add_array(ArrayInfo::new(*name, ArrayKind::Served, vec![
            IndexRange::uniform(4, 2),
            IndexRange::uniform(2, 3),
        ]));
    }
    Arc::new(tables)
}

/// Storage of the server with rank 0 out of two servers.
fn storage(dir: &Path, tables: Arc<ProgramTables>, memory_budget: usize) -> DiskTieredStorage {
    let config = DiskConfig { rank: 0, scratch_dir: dir.to_path_buf(), memory_budget };
    let distribution =
        Arc::new(DataDistribution::with(DistributionKind::BlockCyclic, vec![0, 1]));
    DiskTieredStorage::with(config, tables, distribution)
}

/// Blocks of the array placed at the server with rank 0.
fn owned(tables: &ProgramTables, array_id: i32) -> Vec<BlockId> {
    let distribution = DataDistribution::with(DistributionKind::BlockCyclic, vec![0, 1]);
    (1..=4)
        .flat_map(|i| (1..=2).map(move |j| BlockId::new(array_id, &[i, j])))
        .filter(|id| distribution.is_owned_by(id, tables, 0).unwrap())
        .collect()
}

fn fill(storage: &mut DiskTieredStorage, id: &BlockId, value: f64) {
    storage.block_for_writing(id).unwrap().block_mut().fill(value).unwrap();
}

#[test]
fn partially_written_array_survives() {
    let dir = tempfile::tempdir().unwrap();
    let first = tables("first", &["a"]);
    let mut saving = storage(dir.path(), first.clone(), 1 << 20);
    let blocks = owned(&first, 0);
    assert_eq!(blocks.len(), 4);

    // only every other owned block is written
    for (no, id) in blocks.iter().enumerate().step_by(2) {
        fill(&mut saving, id, no as f64 + 1.0);
    }
    let path = saving.save_persistent(0, "kept").unwrap();
    assert_eq!(path, persistent_file_path(dir.path(), 0, "kept"));
    assert!(path.exists());
    assert_eq!(saving.resident_bytes(), 0);
    assert!(!saving.contains(&blocks[0]));
    saving.cleanup().unwrap();
    assert!(path.exists());

    let second = tables("second", &["x", "b"]);
    let mut restoring = storage(dir.path(), second.clone(), 1 << 20);
    assert_eq!(restoring.restore_persistent(1, "kept").unwrap(), 2);
    assert!(!path.exists());
    for (no, id) in blocks.iter().enumerate() {
        let id = BlockId::new(1, &id.index_values()[..2]);
        let block = restoring.block_for_reading(&id).unwrap();
        if no % 2 == 0 {
            let block = block.unwrap();
            assert!(block.is_on_disk());
            assert_eq!(block.block().data().unwrap(), &[no as f64 + 1.0; 6][..]);
        } else {
            assert!(block.is_none());
        }
    }
    restoring.cleanup().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn paged_out_blocks_are_saved() {
    let dir = tempfile::tempdir().unwrap();
    let tables = tables("paged", &["a"]);
    // room for a single block of six elements
    let mut saving = storage(dir.path(), tables.clone(), 48);
    let blocks = owned(&tables, 0);
    for (no, id) in blocks.iter().enumerate() {
        fill(&mut saving, id, -(no as f64));
    }
    assert!(saving.resident_bytes() <= 48);
    saving.save_persistent(0, "paged").unwrap();

    let mut restoring = storage(dir.path(), tables, 48);
    assert_eq!(restoring.restore_persistent(0, "paged").unwrap(), blocks.len());
    for (no, id) in blocks.iter().enumerate() {
        let block = restoring.block_for_reading(id).unwrap().unwrap();
        assert_eq!(block.block().data().unwrap(), &[-(no as f64); 6][..]);
    }
}

#[test]
fn restore_into_used_array_fails() {
    let dir = tempfile::tempdir().unwrap();
    let tables = tables("busy", &["a", "b"]);
    let mut storage = storage(dir.path(), tables.clone(), 1 << 20);
    let blocks = owned(&tables, 0);
    fill(&mut storage, &blocks[0], 1.0);
    storage.save_persistent(0, "one").unwrap();

    fill(&mut storage, &BlockId::new(1, &blocks[0].index_values()[..2]), 2.0);
    let err = storage.restore_persistent(1, "one").unwrap_err();
    assert!(matches!(err, SipError::Input(_)), "{err}");
    assert!(persistent_file_path(dir.path(), 0, "one").exists());
}
