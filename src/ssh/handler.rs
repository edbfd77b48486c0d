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

use directories::BaseDirs;
use russh::client::Handler;
use russh::keys::PublicKey;
use std::path::PathBuf;

/// How a gateway's host key is verified during the handshake.
///
/// The policy is resolved once when a gateway is constructed and logged, so
/// the choice never flips silently between dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Verify against an OpenSSH known_hosts file.
    KnownHosts(PathBuf),
    /// Accept whatever key the server presents.
    AcceptAny,
}

impl HostKeyPolicy {
    /// Pick the policy for new gateway connections.
    ///
    /// `~/.ssh/known_hosts` is enforced when it exists; otherwise
    /// verification is disabled with a warning. `insecure` forces the
    /// latter.
    pub fn resolve(insecure: bool) -> Self {
        if insecure {
            tracing::warn!("host key verification disabled (--insecure-host-key)");
            return Self::AcceptAny;
        }
        match default_known_hosts_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "host keys verified against known_hosts");
                Self::KnownHosts(path)
            }
            _ => {
                tracing::warn!("~/.ssh/known_hosts not found, accepting any host key");
                Self::AcceptAny
            }
        }
    }
}

/// Default known_hosts file location.
pub fn default_known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// russh client handler carrying the host-key policy for one gateway.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(hostname: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            policy,
        }
    }
}

impl Handler for ClientHandler {
    type Error = super::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts(path) => russh::keys::check_known_hosts_path(
                &self.hostname,
                self.port,
                server_public_key,
                path,
            )
            .map_err(|_| super::Error::HostKeyRejected(self.hostname.clone())),
        }
    }
}
