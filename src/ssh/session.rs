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

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use russh::client::{Handle, Msg};
use russh::{Channel, Disconnect};
use tokio::process::Child;

use super::handler::ClientHandler;
use super::Error;

/// One live SSH session to a gateway.
///
/// Wraps the protocol handle together with the ProxyCommand child feeding
/// it, if any, so that closing the session always reaps the whole
/// subprocess tree.
pub struct SshSession {
    handle: Handle<ClientHandler>,
    proxy: Option<ProxyChild>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    pub(super) fn new(handle: Handle<ClientHandler>, proxy: Option<ProxyChild>) -> Self {
        Self { handle, proxy }
    }

    /// Open a direct-tcpip channel to `addr` (`host:port`).
    ///
    /// The host part is passed through verbatim; name resolution happens on
    /// the gateway.
    pub async fn open_channel(&self, addr: &str) -> Result<Channel<Msg>, Error> {
        let (host, port) =
            split_host_port(addr).ok_or_else(|| Error::InvalidDialAddr(addr.to_string()))?;
        self.handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(Error::Ssh)
    }

    /// Whether the underlying transport has shut down.
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Disconnect and reap the ProxyCommand subtree, if any.
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await;
        if let Some(proxy) = &self.proxy {
            proxy.kill_group();
        }
    }
}

/// Split a `host:port` address. Returns `None` when there is no port or the
/// host part is empty.
pub(super) fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse().ok()?;
    Some((host, port))
}

/// A ProxyCommand child in its own process group. The whole group is
/// SIGKILLed when the session closes or the handle is dropped, so a proxy
/// that spawned its own children cannot outlive the session.
#[derive(Debug)]
pub(super) struct ProxyChild {
    pgid: Pid,
    _child: Child,
}

impl ProxyChild {
    pub(super) fn new(child: Child) -> Option<Self> {
        let pgid = Pid::from_raw(child.id()? as i32);
        Some(Self {
            pgid,
            _child: child,
        })
    }

    fn kill_group(&self) {
        let _ = killpg(self.pgid, Signal::SIGKILL);
    }
}

impl Drop for ProxyChild {
    fn drop(&mut self) {
        self.kill_group();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_port_accepts_host_and_port() {
        assert_eq!(split_host_port("db.internal:5432"), Some(("db.internal", 5432)));
        assert_eq!(split_host_port("127.0.0.1:80"), Some(("127.0.0.1", 80)));
    }

    #[test]
    fn split_host_port_rejects_malformed_addresses() {
        assert_eq!(split_host_port("no-port"), None);
        assert_eq!(split_host_port(":80"), None);
        assert_eq!(split_host_port("host:notaport"), None);
        assert_eq!(split_host_port("host:99999"), None);
    }
}
