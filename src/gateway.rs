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

//! Gateway supervision: one SSH bastion, at most one live session.

use std::sync::Arc;
use std::time::Duration;

use russh::client::Msg;
use russh::Channel;
use tokio::sync::RwLock;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::keys::KeyMaterial;
use crate::ssh::{Dialer, Error, GatewayAddr, HostKeyPolicy, SshSession};

/// Upper bound on one connect attempt, including handshake and auth.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the current session is checked for liveness.
const KEEPALIVE_TICK: Duration = Duration::from_secs(30);

/// One SSH bastion. Owns the dialer and the current session; tunnels share
/// the gateway and open their upstream channels through it.
///
/// The session slot is read-shared and write-exclusive: replacement happens
/// only in `connect`/`reconnect` under the write lock, so concurrent dials
/// always see either the old live session or the fresh one, never a torn
/// state.
#[derive(Debug)]
pub struct Gateway {
    addr: GatewayAddr,
    dialer: Dialer,
    session: RwLock<Option<Arc<SshSession>>>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        keys: Arc<KeyMaterial>,
        policy: HostKeyPolicy,
    ) -> Result<Self, Error> {
        let addr = GatewayAddr::parse(&config.server)?;
        let dialer = Dialer::new(addr.clone(), config.proxy_command.as_deref(), keys, policy);
        Ok(Self {
            addr,
            dialer,
            session: RwLock::new(None),
        })
    }

    /// Open a direct-tcpip channel to `addr` through the current session,
    /// connecting first if there is none and reconnecting once when the
    /// channel open fails.
    ///
    /// A reconnect does not migrate channels that are already open: a relay
    /// bound to the replaced session fails on its next read and ends, and
    /// the next accepted client dials through the fresh session.
    pub async fn dial(
        &self,
        token: &CancellationToken,
        addr: &str,
    ) -> Result<Channel<Msg>, Error> {
        let session = match self.current().await {
            Some(session) if !session.is_closed() => session,
            _ => self.connect(token).await?,
        };

        match session.open_channel(addr).await {
            Ok(channel) => Ok(channel),
            Err(err) => {
                warn!(gateway = %self.addr.host, error = %err, "channel open failed, reconnecting");
                let session = self.reconnect(token).await?;
                session.open_channel(addr).await
            }
        }
    }

    /// Periodically replace a dead session.
    ///
    /// The transport pings the gateway (`keepalive@openssh.com`, want-reply)
    /// on the same interval and tears the session down when the replies
    /// stop; this loop notices and reconnects. No session yet means there
    /// is nothing to check that tick. Terminates when `token` fires.
    pub async fn keep_alive(&self, token: CancellationToken) {
        let mut tick = interval(KEEPALIVE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let Some(session) = self.current().await else { continue };
                    if session.is_closed() {
                        warn!(gateway = %self.addr.host, "session lost, reconnecting");
                        if let Err(err) = self.reconnect(&token).await {
                            error!(gateway = %self.addr.host, error = %err, "reconnect failed");
                        }
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    }

    /// Close the current session, if any.
    pub async fn close(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.close().await;
        }
    }

    async fn current(&self) -> Option<Arc<SshSession>> {
        self.session.read().await.clone()
    }

    async fn connect(&self, token: &CancellationToken) -> Result<Arc<SshSession>, Error> {
        let mut slot = self.session.write().await;
        // another caller may have connected while we waited for the lock
        if let Some(session) = slot.as_ref() {
            if !session.is_closed() {
                return Ok(Arc::clone(session));
            }
        }
        self.connect_locked(&mut slot, token).await
    }

    async fn reconnect(&self, token: &CancellationToken) -> Result<Arc<SshSession>, Error> {
        let mut slot = self.session.write().await;
        if let Some(old) = slot.take() {
            old.close().await;
        }
        self.connect_locked(&mut slot, token).await
    }

    async fn connect_locked(
        &self,
        slot: &mut Option<Arc<SshSession>>,
        token: &CancellationToken,
    ) -> Result<Arc<SshSession>, Error> {
        let session = match timeout(CONNECT_TIMEOUT, self.dialer.dial(token)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::DialTimeout),
        };
        let session = Arc::new(session);
        *slot = Some(Arc::clone(&session));
        info!(gateway = %self.addr.host, "connected");
        Ok(session)
    }
}
