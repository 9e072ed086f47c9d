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


//! Command-line runner of SIAL block-operation jobs.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sipvm::topology::DistributionKind;
use sipvm::{run_job, AccumulateMode, Job, SipConfig};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Runs a job of SIAL programs on an in-process cluster of workers and servers.
#[derive(Parser, Debug)]
#[command(name = "sipvm", author, version, about, long_about = None)]
struct Cli {
    /// Job file (JSON) with program tables and worker scripts.
    #[arg(short, long)]
    job: PathBuf,

    /// Configuration file (JSON); flags given on the command line take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker ranks.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Number of server ranks; zero runs the job in a single process.
    #[arg(short, long)]
    servers: Option<usize>,

    /// Bytes of block data each server keeps in memory.
    #[arg(short, long)]
    memory: Option<usize>,

    /// Directory for array files and persistent arrays.
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Let servers complete block transfers asynchronously.
    #[arg(long)]
    pipelined: bool,

    /// Place blocks on servers by hashing their index values.
    #[arg(long)]
    hashed: bool,

    /// Verbosity; repeat for more details. `RUST_LOG` overrides it.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> anyhow::Result<SipConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let data = fs::read_to_string(path)
                    .with_context(|| format!("reading configuration {}", path.display()))?;
                serde_json::from_str(&data)
                    .with_context(|| format!("parsing configuration {}", path.display()))?
            }
            None => SipConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(servers) = self.servers {
            config.servers = servers;
        }
        if let Some(memory) = self.memory {
            config.memory_budget = memory;
        }
        if let Some(scratch) = &self.scratch {
            config.scratch_dir = scratch.clone();
        }
        if self.pipelined {
            config.accumulate_mode = AccumulateMode::Pipelined;
        }
        if self.hashed {
            config.distribution = DistributionKind::HashedIndex;
        }
        Ok(config)
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.config()?;
    let data = fs::read_to_string(&cli.job)
        .with_context(|| format!("reading job {}", cli.job.display()))?;
    let job: Job = serde_json::from_str(&data)
        .with_context(|| format!("parsing job {}", cli.job.display()))?;

    let report = run_job(&config, &job)?;
    for program in &report.programs {
        info!("program {}: {} checks passed", program.name, program.checks);
        for (rank, stats) in &program.servers {
            info!(
                "server {rank}: {} requests, peak memory {} bytes, {} implicit blocks",
                stats.requests.values().sum::<u64>(),
                stats.peak_resident_bytes,
                stats.implicit_blocks
            );
        }
    }
    println!("{} programs completed, {} checks passed", report.programs.len(), report.checks());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
