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

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Multi-tunnel SSH port-forwarding daemon.
///
/// Reads a YAML configuration listing gateways and `remote:port ->
/// local:port` rules, keeps one SSH session per gateway alive and proxies
/// accepted local connections through it.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tunneld",
    version,
    about = "Multi-tunnel SSH port-forwarding daemon"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path (defaults to .tunnel.yml lookup)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// PID file path
    #[arg(long, global = true, value_name = "FILE", default_value = ".tunnel.pid")]
    pub pidfile: PathBuf,

    /// Log file path (daemon mode)
    #[arg(long, global = true, value_name = "FILE", default_value = ".tunnel.log")]
    pub logfile: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Skip host key verification for all gateways
    #[arg(long)]
    pub insecure_host_key: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Report whether the daemon is running
    Status,

    /// Stop the daemon
    Kill,

    /// Print the daemon's log file
    Logs,

    /// Ask the daemon to reload its configuration (same as SIGHUP)
    Reload,
}
