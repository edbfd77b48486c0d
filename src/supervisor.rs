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

//! Configuration lifecycle: load, reload and shutdown of the forwarding
//! fleet.
//!
//! Each successful load spawns a *generation*: the gateways and tunnels
//! built from one configuration. A reload with an unchanged configuration
//! is a no-op; any change cancels the running generation, lets it settle
//! briefly and spawns a fresh one. SIGHUP reloads, SIGINT/SIGTERM shut
//! down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::gateway::Gateway;
use crate::keys::KeyMaterial;
use crate::ssh::HostKeyPolicy;
use crate::tunnel::Tunnel;

/// Grace period between cancelling a generation and spawning its
/// replacement.
const TEARDOWN_SETTLE: Duration = Duration::from_secs(1);

/// The gateways and tunnels spawned from one configuration.
struct Generation {
    config: Config,
    token: CancellationToken,
    gateways: Vec<Arc<Gateway>>,
    tasks: Vec<JoinHandle<()>>,
    fatal_rx: mpsc::UnboundedReceiver<anyhow::Error>,
}

enum Event {
    Shutdown,
    Reload,
    Fatal(Option<anyhow::Error>),
}

/// Drives the whole daemon: owns the current generation and reacts to
/// signals.
pub struct Supervisor {
    config_path: Option<PathBuf>,
    insecure_host_key: bool,
    root: CancellationToken,
    current: Option<Generation>,
    generation_seq: u64,
}

impl Supervisor {
    pub fn new(config_path: Option<PathBuf>, insecure_host_key: bool) -> Self {
        Self {
            config_path,
            insecure_host_key,
            root: CancellationToken::new(),
            current: None,
            generation_seq: 0,
        }
    }

    /// Run until shutdown. The initial load failing is fatal; reload
    /// failures keep the running generation and are only logged.
    pub async fn run(mut self) -> Result<()> {
        self.load().await.context("load configuration")?;

        let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
        let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;

        loop {
            let event = {
                let fatal = async {
                    match self.current.as_mut() {
                        Some(generation) => generation.fatal_rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    _ = interrupt.recv() => Event::Shutdown,
                    _ = terminate.recv() => Event::Shutdown,
                    _ = hangup.recv() => Event::Reload,
                    err = fatal => Event::Fatal(err),
                }
            };

            match event {
                Event::Shutdown => {
                    info!("shutting down");
                    break;
                }
                Event::Reload => {
                    info!("reload requested");
                    if let Err(err) = self.load().await {
                        error!("reload failed: {err:#}");
                    }
                }
                Event::Fatal(Some(err)) => {
                    self.shutdown().await;
                    return Err(err.context("forwarding failed"));
                }
                Event::Fatal(None) => {
                    info!("all tunnels finished");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Load (or reload) the configuration, swapping generations only when
    /// it actually changed.
    pub async fn load(&mut self) -> Result<()> {
        let config = Config::load_with_priority(self.config_path.as_deref()).await?;

        if let Some(current) = &self.current {
            if current.config == config {
                info!("config not changed");
                return Ok(());
            }
        }

        self.stop_current().await;
        let generation = self.spawn_generation(config).await?;
        self.current = Some(generation);
        self.generation_seq += 1;
        Ok(())
    }

    /// Cancel the running generation and release its resources.
    pub async fn shutdown(&mut self) {
        self.stop_current().await;
        self.root.cancel();
    }

    async fn spawn_generation(&self, config: Config) -> Result<Generation> {
        let token = self.root.child_token();
        match self.build_generation(config, token.clone()).await {
            Ok(generation) => Ok(generation),
            Err(err) => {
                token.cancel();
                Err(err)
            }
        }
    }

    async fn build_generation(
        &self,
        config: Config,
        token: CancellationToken,
    ) -> Result<Generation> {
        let keys = Arc::new(KeyMaterial::load(&config.key_files).await?);
        let policy = HostKeyPolicy::resolve(self.insecure_host_key);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let mut gateways = Vec::new();
        let mut tasks = Vec::new();
        for gateway_config in &config.gateways {
            let gateway = Arc::new(
                Gateway::new(gateway_config, Arc::clone(&keys), policy.clone())
                    .with_context(|| format!("gateway {}", gateway_config.server))?,
            );
            gateways.push(Arc::clone(&gateway));

            let keep_alive_token = token.clone();
            let keep_alive_gateway = Arc::clone(&gateway);
            tasks.push(tokio::spawn(async move {
                keep_alive_gateway.keep_alive(keep_alive_token).await;
            }));

            for rule in &gateway_config.tunnels {
                let tunnel = Tunnel::new(Arc::clone(&gateway), rule)
                    .with_context(|| format!("gateway {}", gateway_config.server))?;
                let tunnel_token = token.clone();
                let tx = fatal_tx.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(err) = tunnel.forward(tunnel_token).await {
                        let _ = tx.send(err);
                    }
                }));
            }
        }

        Ok(Generation {
            config,
            token,
            gateways,
            tasks,
            fatal_rx,
        })
    }

    async fn stop_current(&mut self) {
        let Some(generation) = self.current.take() else {
            return;
        };
        generation.token.cancel();
        tokio::time::sleep(TEARDOWN_SETTLE).await;
        for gateway in &generation.gateways {
            gateway.close().await;
        }
        for task in generation.tasks {
            task.abort();
        }
    }

    #[cfg(test)]
    fn generation_seq(&self) -> u64 {
        self.generation_seq
    }
}
