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

//! Public-key authentication material for gateway logins.

use anyhow::{Context, Result};
use russh::client::Handle;
use russh::keys::agent::client::AgentClient;
use russh::keys::{decode_secret_key, PrivateKey, PrivateKeyWithHashAlg};
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::config::KeyFile;
use crate::ssh::{ClientHandler, Error};
use crate::utils::expand_tilde;

/// Signers available for gateway logins: decrypted private keys from the
/// configured key files, plus the SSH agent when `SSH_AUTH_SOCK` is set.
///
/// Built once per configuration generation and shared by all gateways.
#[derive(Debug)]
pub struct KeyMaterial {
    keys: Vec<(String, Arc<PrivateKey>)>,
    use_agent: bool,
}

impl KeyMaterial {
    /// Load all signers for one configuration generation.
    ///
    /// Key files are read from disk (with `~` expansion) and decrypted with
    /// their passphrase when a non-empty one is configured. When
    /// `SSH_AUTH_SOCK` is set the agent is dialed once up front, so a dead
    /// socket fails the load instead of every later dial. An empty key set
    /// is tolerated; authentication will fail at dial time instead.
    pub async fn load(key_files: &[KeyFile]) -> Result<Self> {
        let use_agent = std::env::var_os("SSH_AUTH_SOCK").is_some();
        if use_agent {
            let mut agent = AgentClient::connect_env()
                .await
                .context("connect to ssh agent (SSH_AUTH_SOCK)")?;
            let identities = agent
                .request_identities()
                .await
                .context("list ssh agent identities")?;
            tracing::debug!(identities = identities.len(), "ssh agent available");
        }

        let mut keys = Vec::with_capacity(key_files.len());
        for key_file in key_files {
            let data = read_key_file(&key_file.path)
                .with_context(|| format!("read key file {}", key_file.path))?;
            let passphrase = key_file.passphrase.as_deref().filter(|p| !p.is_empty());
            let key = decode_secret_key(&data, passphrase)
                .with_context(|| format!("parse key file {}", key_file.path))?;
            keys.push((key_file.path.clone(), Arc::new(key)));
        }

        Ok(Self { keys, use_agent })
    }

    /// Authenticate `handle` as `user`. Agent identities are tried first,
    /// then the configured key files in order; the first accepted signer
    /// wins.
    pub async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        user: &str,
    ) -> Result<(), Error> {
        if self.use_agent && self.authenticate_with_agent(handle, user).await? {
            return Ok(());
        }

        for (path, key) in &self.keys {
            let hash = handle.best_supported_rsa_hash().await?.flatten();
            let result = handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::clone(key), hash))
                .await?;
            if result.success() {
                tracing::debug!(key = %path, "authenticated with key file");
                return Ok(());
            }
        }

        Err(Error::AuthRejected)
    }

    async fn authenticate_with_agent(
        &self,
        handle: &mut Handle<ClientHandler>,
        user: &str,
    ) -> Result<bool, Error> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|err| Error::Agent(err.to_string()))?;
        let identities = agent
            .request_identities()
            .await
            .map_err(|err| Error::Agent(err.to_string()))?;

        for identity in identities {
            let hash = handle.best_supported_rsa_hash().await?.flatten();
            let result = handle
                .authenticate_publickey_with(user, identity, hash, &mut agent)
                .await;
            if let Ok(result) = result {
                if result.success() {
                    tracing::debug!("authenticated with ssh agent identity");
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

/// Read a key file, expanding a leading `~` to the home directory and
/// falling back to the literal path otherwise.
pub fn read_key_file(path: &str) -> Result<Zeroizing<String>> {
    let expanded = expand_tilde(Path::new(path));
    let data = std::fs::read_to_string(&expanded)
        .with_context(|| format!("read {}", expanded.display()))?;
    Ok(Zeroizing::new(data))
}
