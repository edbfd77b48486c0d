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

//! Tunnel workers: one forwarding rule each.
//!
//! A tunnel accepts clients on its bind address and, per client, asks its
//! gateway for a direct-tcpip channel to the dial address, then relays
//! bytes both ways until either end closes.

mod listener;
mod relay;

pub use listener::{BindAddr, ClosableListener};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::gateway::Gateway;
use listener::ClientStream;

/// One `dialAddr -> bindAddr` forwarding rule.
#[derive(Debug)]
pub struct Tunnel {
    gateway: Arc<Gateway>,
    dial_addr: String,
    bind_addr: BindAddr,
}

impl Tunnel {
    /// Parse a `dialAddr -> bindAddr` rule. The rule splits on the first
    /// `->` with both sides trimmed; anything else is a parse error naming
    /// the input.
    pub fn new(gateway: Arc<Gateway>, rule: &str) -> Result<Self> {
        let (dial, bind) = rule
            .split_once("->")
            .with_context(|| format!("invalid tunnel '{rule}' (expected 'remote:port -> local:port')"))?;
        let dial_addr = dial.trim().to_string();
        let bind = bind.trim();
        if dial_addr.is_empty() || bind.is_empty() {
            anyhow::bail!("invalid tunnel '{rule}' (expected 'remote:port -> local:port')");
        }
        Ok(Self {
            gateway,
            dial_addr,
            bind_addr: BindAddr::classify(bind),
        })
    }

    /// Accept clients until `token` fires or the listener fails; one relay
    /// task per accepted client.
    pub async fn forward(&self, token: CancellationToken) -> Result<()> {
        let listener = ClosableListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("listen on bind address {}", self.bind_addr))?;

        info!("start forwarding: {} -> {}", self.dial_addr, self.bind_addr);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    listener.close();
                    break;
                }
                accepted = listener.accept() => {
                    if listener.is_closed() {
                        break;
                    }
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("accepted {} -> {peer}", self.bind_addr);
                            self.spawn_relay(stream, peer, token.child_token());
                        }
                        Err(err) => {
                            error!("accept {}: {err}", self.bind_addr);
                            break;
                        }
                    }
                }
            }
        }

        info!("stop forwarding: {} -> {}", self.dial_addr, self.bind_addr);
        Ok(())
    }

    fn spawn_relay(&self, stream: ClientStream, peer: String, token: CancellationToken) {
        let gateway = Arc::clone(&self.gateway);
        let dial_addr = self.dial_addr.clone();
        let bind_addr = self.bind_addr.clone();

        tokio::spawn(async move {
            let upstream = match gateway.dial(&token, &dial_addr).await {
                Ok(channel) => channel,
                Err(err) => {
                    // failing one client never stops the tunnel
                    error!("dial {dial_addr}: {err}");
                    return;
                }
            };

            if let Err(err) = relay::run(stream, upstream, token.clone()).await {
                error!("relay {bind_addr} -> {peer}: {err:#}");
            }
            token.cancel();
            info!("disconnected {bind_addr} -> {peer}");
        });
    }
}
