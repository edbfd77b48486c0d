// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

use anyhow::{Context, Result};
use clap::Parser;

use tunneld::cli::{Cli, Commands};
use tunneld::daemon;
use tunneld::supervisor::Supervisor;
use tunneld::utils::{logging, rlimit};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Status) => return daemon::status(&cli.pidfile),
        Some(Commands::Kill) => return daemon::kill_daemon(&cli.pidfile),
        Some(Commands::Logs) => return daemon::logs(&cli.logfile),
        Some(Commands::Reload) => return daemon::reload(&cli.pidfile),
        None => {}
    }

    // fork before any runtime thread exists
    if cli.daemon {
        daemon::daemonize(&cli.logfile)?;
    }

    logging::init_logging(cli.verbose);

    let limit = rlimit::raise_nofile_limit().context("raise open file limit")?;
    tracing::debug!(limit, "open file limit raised");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    daemon::write_pid_file(&cli.pidfile)?;

    let supervisor = Supervisor::new(cli.config.clone(), cli.insecure_host_key);
    let result = supervisor.run().await;

    daemon::remove_pid_file(&cli.pidfile);
    result
}
