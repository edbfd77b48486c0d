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

//! Daemon plumbing: PID file management, detaching from the terminal and
//! the signal-based control subcommands (`status`, `kill`, `logs`,
//! `reload`).

use anyhow::{bail, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{dup2, fork, setsid, ForkResult, Pid};
use std::fs::{self, File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

/// Read the daemon's pid from `path`, if the file exists.
pub fn read_pid_file(path: &Path) -> Result<Option<Pid>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read pid file {}", path.display()))?;
    let pid = contents
        .trim()
        .parse::<i32>()
        .with_context(|| format!("malformed pid file {}", path.display()))?;
    Ok(Some(Pid::from_raw(pid)))
}

/// Write our pid, refusing when another live instance owns the file.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(pid) = read_pid_file(path)? {
        if alive(pid) {
            bail!(
                "another instance is already running with pid {pid} (pid file {})",
                path.display()
            );
        }
    }
    fs::write(path, std::process::id().to_string())
        .with_context(|| format!("write pid file {}", path.display()))?;
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Probe a process with signal 0; nothing is delivered.
fn alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// Detach from the controlling terminal and redirect stdio to the log
/// file.
///
/// Must run before the async runtime starts; forked children do not carry
/// worker threads across.
pub fn daemonize(log_path: &Path) -> Result<()> {
    match unsafe { fork() }.context("fork")? {
        ForkResult::Parent { child } => {
            println!("daemon process started - {child}");
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }

    setsid().context("setsid")?;

    match unsafe { fork() }.context("fork")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    let devnull = File::open("/dev/null").context("open /dev/null")?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;
    dup2(devnull.as_raw_fd(), 0).context("redirect stdin")?;
    dup2(log.as_raw_fd(), 1).context("redirect stdout")?;
    dup2(log.as_raw_fd(), 2).context("redirect stderr")?;
    Ok(())
}

/// `status` subcommand: report whether the pid file names a live process.
pub fn status(pidfile: &Path) -> Result<()> {
    match read_pid_file(pidfile)? {
        Some(pid) if alive(pid) => {
            println!("running - {pid}");
            Ok(())
        }
        Some(pid) => bail!("not running (stale pid file {}, pid {pid})", pidfile.display()),
        None => bail!("not running"),
    }
}

/// `kill` subcommand: SIGTERM the daemon and remove its pid file.
pub fn kill_daemon(pidfile: &Path) -> Result<()> {
    let pid = read_pid_file(pidfile)?
        .with_context(|| format!("no pid file at {}", pidfile.display()))?;
    println!("killing daemon process - {pid}");
    kill(pid, Signal::SIGTERM).with_context(|| format!("kill pid {pid}"))?;
    remove_pid_file(pidfile);
    Ok(())
}

/// `reload` subcommand: SIGHUP the daemon, same as delivering the signal
/// directly.
pub fn reload(pidfile: &Path) -> Result<()> {
    let pid = read_pid_file(pidfile)?
        .with_context(|| format!("no pid file at {}", pidfile.display()))?;
    kill(pid, Signal::SIGHUP).with_context(|| format!("signal pid {pid}"))?;
    println!("reload signalled - {pid}");
    Ok(())
}

/// `logs` subcommand: print the daemon's log file.
pub fn logs(logfile: &Path) -> Result<()> {
    let contents = fs::read_to_string(logfile)
        .with_context(|| format!("read log file {}", logfile.display()))?;
    print!("{contents}");
    Ok(())
}
