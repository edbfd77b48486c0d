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

use thiserror::Error;

/// Errors from the SSH transport seam.
///
/// Dial and channel-open failures are recoverable at the gateway layer
/// (reconnect); everything reaching a relay just closes that one client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("ssh protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("invalid gateway address '{0}' (expected user@host[:port])")]
    InvalidGatewayAddr(String),

    #[error("invalid dial address '{0}' (expected host:port)")]
    InvalidDialAddr(String),

    #[error("ssh handshake timed out")]
    HandshakeTimeout,

    #[error("dial timed out")]
    DialTimeout,

    #[error("dial cancelled")]
    Cancelled,

    #[error("proxy command exited before the handshake completed")]
    ProxyCommandExited,

    #[error("failed to spawn proxy command: {0}")]
    ProxyCommandSpawn(std::io::Error),

    #[error("ssh agent: {0}")]
    Agent(String),

    #[error("gateway rejected all authentication methods")]
    AuthRejected,

    #[error("host key verification failed for {0}")]
    HostKeyRejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
