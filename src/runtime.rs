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

//! Job runner: executes a sequence of SIAL programs on an in-process cluster.
//!
//! Each rank runs on its own thread. Worker ranks execute block operation scripts through
//! [`WorkerBlockClient`]; server ranks run a [`ServerEngine`] per program. The first fatal
//! error at any rank raises the job-wide abort flag, so every other rank stops at its next
//! blocking point.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crate::block::{ArrayId, Block, BlockId, RegionId};
use crate::config::SipConfig;
use crate::constants::MAX_RANK;
use crate::error::SipError;
use crate::server::{ServerEngine, ServerStats};
use crate::tables::ProgramTables;
use crate::topology::{ClusterTopology, DataDistribution, RankDistribution, Role};
use crate::transport::{AbortHandle, Cluster, Endpoint, Rank};
use crate::worker::{BlockOps, LocalBlockOps, LocalPersistence, WorkerBlockClient};

/// Largest absolute difference tolerated by value checks.
pub const CHECK_TOLERANCE: f64 = 1e-9;

/// Block operation of a worker script.
///
/// Operations are numbered from 1 in the script; the number is used as the program counter
/// in requests and diagnostics.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", tag = "op", rename_all = "camelCase")
)]
pub enum BlockOp {
    /// Requests a block without waiting for it.
    Get { array: ArrayId, index: Vec<i32> },

    /// Reads a block and compares it with the values.
    Expect { array: ArrayId, index: Vec<i32>, values: Vec<f64> },

    Put { array: ArrayId, index: Vec<i32>, values: Vec<f64> },

    PutAccumulate { array: ArrayId, index: Vec<i32>, values: Vec<f64> },

    PutInitialize { array: ArrayId, index: Vec<i32>, value: f64 },

    PutIncrement { array: ArrayId, index: Vec<i32>, value: f64 },

    PutScale { array: ArrayId, index: Vec<i32>, value: f64 },

    Delete { array: ArrayId },

    /// Label must be present in the string table of the program.
    SetPersistent { array: ArrayId, label: String },

    RestorePersistent { array: ArrayId, label: String },

    Barrier,

    /// Allocates a contiguous array; without values it is filled with zeros.
    CreateStatic {
        array: ArrayId,
        #[cfg_attr(feature = "serde", serde(default))]
        values: Vec<f64>,
    },

    /// Compares part of a contiguous array, given in element coordinates, with the values.
    ExpectSlice { array: ArrayId, lower: Vec<i32>, upper: Vec<i32>, values: Vec<f64> },
}

/// A SIAL program: its tables and one block operation script per worker.
///
/// Workers without a script only take part in the final barrier.
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ProgramScript {
    pub tables: ProgramTables,
    #[cfg_attr(feature = "serde", serde(default))]
    pub workers: Vec<Vec<BlockOp>>,
}

/// Programs executed one after another; persistent arrays survive between them.
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct Job {
    pub programs: Vec<ProgramScript>,
}

/// Outcome of a single program.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ProgramReport {
    pub name: String,
    /// Number of passed value checks over all workers.
    pub checks: usize,
    pub servers: BTreeMap<Rank, ServerStats>,
}

/// Outcome of a job.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct JobReport {
    pub programs: Vec<ProgramReport>,
}

impl JobReport {
    /// Number of passed value checks over all programs.
    pub fn checks(&self) -> usize { self.programs.iter().map(|p| p.checks).sum() }
}

/// Executes block operations of a single worker script. Returns the number of passed checks.
pub fn execute<O: BlockOps>(
    ops: &mut O,
    tables: &ProgramTables,
    script: &[BlockOp],
) -> Result<usize, SipError> {
    let mut checks = 0usize;
    for (pos, op) in script.iter().enumerate() {
        let line = pos as i32 + 1;
        trace!("line {line}: {op:?}");
        match op {
            BlockOp::Get { array, index } => {
                ops.get(&block_id(*array, index)?, line)?;
            }
            BlockOp::Expect { array, index, values } => {
                let id = block_id(*array, index)?;
                let handle = ops.get(&id, line)?;
                compare(&id.to_string(), ops.read(handle)?, values, line)?;
                checks += 1;
            }
            BlockOp::Put { array, index, values } => {
                ops.put_replace(&block_id(*array, index)?, values.clone(), line)?
            }
            BlockOp::PutAccumulate { array, index, values } => {
                ops.put_accumulate(&block_id(*array, index)?, values.clone(), line)?
            }
            BlockOp::PutInitialize { array, index, value } => {
                ops.put_initialize(&block_id(*array, index)?, *value, line)?
            }
            BlockOp::PutIncrement { array, index, value } => {
                ops.put_increment(&block_id(*array, index)?, *value, line)?
            }
            BlockOp::PutScale { array, index, value } => {
                ops.put_scale(&block_id(*array, index)?, *value, line)?
            }
            BlockOp::Delete { array } => ops.delete(*array, line)?,
            BlockOp::SetPersistent { array, label } => {
                ops.set_persistent(*array, string_slot(tables, label)?, line)?
            }
            BlockOp::RestorePersistent { array, label } => {
                ops.restore_persistent(*array, string_slot(tables, label)?, line)?
            }
            BlockOp::Barrier => ops.barrier()?,
            BlockOp::CreateStatic { array, values } => {
                ops.create_static(*array, values.clone())?
            }
            BlockOp::ExpectSlice { array, lower, upper, values } => {
                let region = RegionId::new(*array, lower, upper)?;
                let slice = ops.static_slice(&region)?;
                compare(&region.to_string(), &slice, values, line)?;
                checks += 1;
            }
        }
    }
    Ok(checks)
}

fn block_id(array_id: ArrayId, index: &[i32]) -> Result<BlockId, SipError> {
    if index.len() > MAX_RANK {
        return Err(SipError::input(format!(
            "block of array {array_id} has {} index values while at most {MAX_RANK} are allowed",
            index.len()
        )));
    }
    Ok(BlockId::new(array_id, index))
}

fn string_slot(tables: &ProgramTables, label: &str) -> Result<i32, SipError> {
    tables
        .strings
        .iter()
        .position(|s| s == label)
        .map(|slot| slot as i32)
        .ok_or_else(|| {
            SipError::input(format!(
                "label '{label}' is absent from the string table of program {}",
                tables.name
            ))
        })
}

fn compare(what: &str, block: &Block, expected: &[f64], line: i32) -> Result<(), SipError> {
    let found = block.data()?;
    let equal = found.len() == expected.len() &&
        found
            .iter()
            .zip(expected)
            .all(|(a, b)| (a - b).abs() <= CHECK_TOLERANCE);
    if !equal {
        return Err(SipError::Check(format!(
            "{what} at line {line} holds {found:?} while {expected:?} was expected"
        )));
    }
    Ok(())
}

/// Runs the job, returning once every program has completed at every rank.
pub fn run_job(config: &SipConfig, job: &Job) -> Result<JobReport, SipError> {
    config.validate()?;
    for program in &job.programs {
        program.tables.validate()?;
        if program.workers.len() > config.workers {
            return Err(SipError::input(format!(
                "program {} has {} worker scripts while the job runs {} workers",
                program.tables.name,
                program.workers.len(),
                config.workers
            )));
        }
    }
    if config.is_single_process() {
        return run_single_process(job);
    }

    let distribution = RankDistribution::interleaved(config.workers, config.servers)?;
    let cluster = Cluster::new(distribution.size());
    info!(
        "starting job of {} programs on {} workers and {} servers",
        job.programs.len(),
        config.workers,
        config.servers
    );
    let config = Arc::new(config.clone());
    let job = Arc::new(job.clone());

    let mut threads = vec![];
    for endpoint in cluster.into_endpoints() {
        let rank = endpoint.rank();
        let topology = ClusterTopology::new(&distribution, rank)?;
        let config = config.clone();
        let job = job.clone();
        let thread = thread::Builder::new()
            .name(format!("rank-{rank}"))
            .spawn(move || run_rank(endpoint, topology, &config, &job))?;
        threads.push((rank, thread));
    }

    let mut failure: Option<SipError> = None;
    let mut outcomes = BTreeMap::new();
    for (rank, thread) in threads {
        let result = thread
            .join()
            .unwrap_or_else(|_| Err(SipError::Check(format!("rank {rank} has panicked"))));
        match result {
            Ok(outcome) => {
                outcomes.insert(rank, outcome);
            }
            Err(err) => {
                // the root cause wins over the aborts it has triggered
                let replace = match &failure {
                    None => true,
                    Some(prev) => prev.is_aborted() && !err.is_aborted(),
                };
                if replace {
                    failure = Some(err);
                }
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }

    let mut report = JobReport::default();
    for (no, program) in job.programs.iter().enumerate() {
        let mut program_report = ProgramReport { name: program.tables.name.clone(), ..default!() };
        for (rank, outcome) in &outcomes {
            match outcome {
                RankOutcome::Worker(checks) => {
                    program_report.checks += checks.get(no).copied().unwrap_or_default()
                }
                RankOutcome::Server(stats) => {
                    if let Some(stats) = stats.get(no) {
                        program_report.servers.insert(*rank, stats.clone());
                    }
                }
            }
        }
        report.programs.push(program_report);
    }
    Ok(report)
}

fn run_single_process(job: &Job) -> Result<JobReport, SipError> {
    info!("starting job of {} programs in single-process mode", job.programs.len());
    let mut report = JobReport::default();
    let mut persistence = LocalPersistence::new();
    for program in &job.programs {
        let tables = Arc::new(program.tables.clone());
        let mut ops = LocalBlockOps::with(tables.clone(), persistence);
        let script = program.workers.first().map(Vec::as_slice).unwrap_or(&[]);
        let checks = execute(&mut ops, &tables, script)?;
        ops.end_program()?;
        persistence = ops.into_persistence();
        info!("program {} completed", tables.name);
        report.programs.push(ProgramReport { name: tables.name.clone(), checks, ..default!() });
    }
    Ok(report)
}

#[derive(Debug)]
enum RankOutcome {
    /// Passed checks per program.
    Worker(Vec<usize>),
    Server(Vec<ServerStats>),
}

/// Raises the abort flag when the rank thread unwinds.
struct AbortOnPanic(AbortHandle);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.raise();
        }
    }
}

fn run_rank(
    mut endpoint: Endpoint,
    topology: ClusterTopology,
    config: &SipConfig,
    job: &Job,
) -> Result<RankOutcome, SipError> {
    let _guard = AbortOnPanic(endpoint.abort_handle());
    let result = match topology.role() {
        Role::Worker => run_worker(&mut endpoint, &topology, config, job).map(RankOutcome::Worker),
        Role::Server => run_server(&mut endpoint, &topology, config, job).map(RankOutcome::Server),
    };
    if let Err(err) = &result {
        if !err.is_aborted() {
            error!("rank {} fails: {err}", topology.rank());
        }
        endpoint.abort();
    }
    result
}

fn run_worker(
    endpoint: &mut Endpoint,
    topology: &ClusterTopology,
    config: &SipConfig,
    job: &Job,
) -> Result<Vec<usize>, SipError> {
    let index = topology
        .worker_index()
        .ok_or_else(|| SipError::Check(format!("rank {} is not a worker", topology.rank())))?;
    let mut persistence = LocalPersistence::new();
    let mut checks = vec![];
    for program in &job.programs {
        let tables = Arc::new(program.tables.clone());
        let distribution =
            Arc::new(DataDistribution::with(config.distribution, topology.server_ranks().clone()));
        let mut client = WorkerBlockClient::with(
            endpoint,
            topology,
            tables.clone(),
            distribution,
            config.max_posted_async,
            persistence,
        );
        let script = program.workers.get(index).map(Vec::as_slice).unwrap_or(&[]);
        checks.push(execute(&mut client, &tables, script)?);
        client.end_program()?;
        persistence = client.into_persistence();
    }
    Ok(checks)
}

fn run_server(
    endpoint: &mut Endpoint,
    topology: &ClusterTopology,
    config: &SipConfig,
    job: &Job,
) -> Result<Vec<ServerStats>, SipError> {
    let mut stats = vec![];
    for program in &job.programs {
        let tables = Arc::new(program.tables.clone());
        let distribution =
            Arc::new(DataDistribution::with(config.distribution, topology.server_ranks().clone()));
        let engine = ServerEngine::with(
            config.disk_config(*topology.rank()),
            config.accumulate_mode,
            tables,
            distribution,
        );
        stats.push(engine.run(endpoint)?);
    }
    Ok(stats)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tables::{ArrayInfo, ArrayKind, IndexRange};

    fn program() -> ProgramScript {
        let mut tables = ProgramTables::new("p");
        tables.add_array(ArrayInfo::new("a", ArrayKind::Local, vec![IndexRange::uniform(2, 2)]));
        tables.add_string("kept");
        ProgramScript { tables, workers: vec![] }
    }

    #[test]
    fn checks_are_counted() {
        let mut program = program();
        program.workers = vec![vec![
            BlockOp::Put { array: 0, index: vec![1], values: vec![1.0, 2.0] },
            BlockOp::PutScale { array: 0, index: vec![1], value: 3.0 },
            BlockOp::Expect { array: 0, index: vec![1], values: vec![3.0, 6.0] },
        ]];
        let job = Job { programs: vec![program] };
        let report = run_job(&SipConfig::single_process(), &job).unwrap();
        assert_eq!(report.checks(), 1);
    }

    #[test]
    fn failed_check() {
        let mut program = program();
        program.workers = vec![vec![BlockOp::Expect { array: 0, index: vec![2], values: vec![
            1.0, 1.0,
        ] }]];
        let job = Job { programs: vec![program] };
        match run_job(&SipConfig::single_process(), &job) {
            Err(SipError::Check(msg)) => assert!(msg.contains("line 1")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn unknown_label() {
        let mut program = program();
        program.workers = vec![vec![BlockOp::SetPersistent { array: 0, label: s!("other") }]];
        let job = Job { programs: vec![program] };
        assert!(matches!(
            run_job(&SipConfig::single_process(), &job),
            Err(SipError::Input(_))
        ));
    }

    #[test]
    fn too_many_scripts() {
        let mut program = program();
        program.workers = vec![vec![], vec![]];
        let job = Job { programs: vec![program] };
        assert!(run_job(&SipConfig::single_process(), &job).is_err());
    }
}
