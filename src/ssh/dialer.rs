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

//! Establishing SSH sessions to a gateway.
//!
//! Two variants: a direct TCP dial, and a ProxyCommand dial that spawns an
//! external command (`%h`/`%p` interpolated) and runs the SSH handshake over
//! the child's stdin/stdout.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use russh::client;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::lookup_host;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handler::{ClientHandler, HostKeyPolicy};
use super::session::{split_host_port, ProxyChild, SshSession};
use super::Error;
use crate::keys::KeyMaterial;

/// Time limit for the SSH handshake itself, in both dial variants.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval for the transport-level `keepalive@openssh.com` request
/// (want-reply); the session is torn down after this many unanswered pings.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_MAX: usize = 3;

/// A parsed `user@host[:port]` gateway address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAddr {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl GatewayAddr {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (user, rest) = s
            .split_once('@')
            .ok_or_else(|| Error::InvalidGatewayAddr(s.to_string()))?;
        if user.is_empty() || rest.is_empty() || rest.contains('@') {
            return Err(Error::InvalidGatewayAddr(s.to_string()));
        }
        let (host, port) = match split_host_port(rest) {
            Some((host, port)) => (host.to_string(), port),
            None => (rest.to_string(), 22),
        };
        Ok(Self {
            user: user.to_string(),
            host,
            port,
        })
    }
}

fn client_config() -> client::Config {
    client::Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    }
}

/// Produces fresh, authenticated SSH sessions for one gateway.
#[derive(Debug)]
pub enum Dialer {
    Tcp(TcpDialer),
    Proxy(ProxyCommandDialer),
}

impl Dialer {
    pub fn new(
        addr: GatewayAddr,
        proxy_command: Option<&str>,
        keys: Arc<KeyMaterial>,
        policy: HostKeyPolicy,
    ) -> Self {
        match proxy_command {
            Some(command) if !command.is_empty() => {
                Self::Proxy(ProxyCommandDialer::new(addr, command, keys, policy))
            }
            _ => Self::Tcp(TcpDialer::new(addr, keys, policy)),
        }
    }

    pub async fn dial(&self, token: &CancellationToken) -> Result<SshSession, Error> {
        match self {
            Self::Tcp(dialer) => dialer.dial(token).await,
            Self::Proxy(dialer) => dialer.dial(token).await,
        }
    }
}

/// Direct TCP dial to `host:port`.
#[derive(Debug)]
pub struct TcpDialer {
    addr: GatewayAddr,
    keys: Arc<KeyMaterial>,
    policy: HostKeyPolicy,
}

impl TcpDialer {
    fn new(addr: GatewayAddr, keys: Arc<KeyMaterial>, policy: HostKeyPolicy) -> Self {
        Self { addr, keys, policy }
    }

    async fn dial(&self, token: &CancellationToken) -> Result<SshSession, Error> {
        let config = Arc::new(client_config());
        let targets = lookup_host((self.addr.host.as_str(), self.addr.port)).await?;

        let mut last_err = Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no addresses resolved for {}", self.addr.host),
        ));
        for target in targets {
            let handler = ClientHandler::new(&self.addr.host, self.addr.port, self.policy.clone());
            let mut handle = tokio::select! {
                res = timeout(HANDSHAKE_TIMEOUT, client::connect(Arc::clone(&config), target, handler)) => {
                    match res {
                        Ok(Ok(handle)) => handle,
                        Ok(Err(err)) => {
                            last_err = err;
                            continue;
                        }
                        Err(_) => {
                            last_err = Error::HandshakeTimeout;
                            continue;
                        }
                    }
                }
                _ = token.cancelled() => return Err(Error::Cancelled),
            };

            self.keys.authenticate(&mut handle, &self.addr.user).await?;
            debug!(gateway = %self.addr.host, %target, "ssh session established");
            return Ok(SshSession::new(handle, None));
        }

        Err(last_err)
    }
}

/// Dial through an external ProxyCommand.
///
/// The command runs under `sh -c` in its own process group; stdin/stdout
/// carry the SSH transport. Three things race during the dial: the
/// handshake, the child exiting early, and cancellation. First one wins,
/// and the losing paths kill the whole process group.
#[derive(Debug)]
pub struct ProxyCommandDialer {
    addr: GatewayAddr,
    command: String,
    keys: Arc<KeyMaterial>,
    policy: HostKeyPolicy,
}

impl ProxyCommandDialer {
    fn new(
        addr: GatewayAddr,
        command: &str,
        keys: Arc<KeyMaterial>,
        policy: HostKeyPolicy,
    ) -> Self {
        let command = interpolate_proxy_command(command, &addr.host, addr.port);
        Self {
            addr,
            command,
            keys,
            policy,
        }
    }

    async fn dial(&self, token: &CancellationToken) -> Result<SshSession, Error> {
        debug!(command = %self.command, "spawning proxy command");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()
            .map_err(Error::ProxyCommandSpawn)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            kill_child_group(&child);
            return Err(Error::ProxyCommandSpawn(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "child stdio unavailable",
            )));
        };
        let stream = ProxyStream { stdin, stdout };

        let config = Arc::new(client_config());
        let handler = ClientHandler::new(&self.addr.host, self.addr.port, self.policy.clone());
        let handshake = client::connect_stream(config, stream, handler);
        tokio::pin!(handshake);

        let mut handle = tokio::select! {
            res = timeout(HANDSHAKE_TIMEOUT, &mut handshake) => {
                match res {
                    Ok(Ok(handle)) => handle,
                    Ok(Err(err)) => {
                        kill_child_group(&child);
                        return Err(err);
                    }
                    Err(_) => {
                        kill_child_group(&child);
                        return Err(Error::HandshakeTimeout);
                    }
                }
            }
            status = child.wait() => {
                debug!(?status, "proxy command exited during handshake");
                return Err(Error::ProxyCommandExited);
            }
            _ = token.cancelled() => {
                kill_child_group(&child);
                return Err(Error::Cancelled);
            }
        };

        if let Err(err) = self.keys.authenticate(&mut handle, &self.addr.user).await {
            kill_child_group(&child);
            return Err(err);
        }

        debug!(gateway = %self.addr.host, "ssh session established via proxy command");
        Ok(SshSession::new(handle, ProxyChild::new(child)))
    }
}

fn kill_child_group(child: &Child) {
    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

fn interpolate_proxy_command(command: &str, host: &str, port: u16) -> String {
    command
        .replace("%h", host)
        .replace("%p", &port.to_string())
}

/// Duplex stream over the proxy child's stdio, used as the SSH transport.
struct ProxyStream {
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdin).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_shutdown(cx)
    }
}
