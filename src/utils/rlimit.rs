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

//! Open-file limit handling. Every forwarded connection costs at least two
//! descriptors, so the soft limit is raised to the hard maximum at startup.

use anyhow::{Context, Result};
use nix::sys::resource::{getrlimit, setrlimit, Resource};

/// The kernel rejects RLIMIT_NOFILE values above this on macOS.
#[cfg(target_os = "macos")]
const NOFILE_HARD_CAP: u64 = 24576;

/// Raise the RLIMIT_NOFILE soft limit to the hard maximum.
///
/// Returns the resulting soft limit.
pub fn raise_nofile_limit() -> Result<u64> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).context("read RLIMIT_NOFILE")?;
    let target = effective_max(hard);
    if soft < target {
        setrlimit(Resource::RLIMIT_NOFILE, target, hard).context("raise RLIMIT_NOFILE")?;
    }
    Ok(target.max(soft))
}

#[cfg(target_os = "macos")]
fn effective_max(hard: u64) -> u64 {
    hard.min(NOFILE_HARD_CAP)
}

#[cfg(not(target_os = "macos"))]
fn effective_max(hard: u64) -> u64 {
    hard
}
