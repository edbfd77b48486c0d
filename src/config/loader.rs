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

//! Configuration loading and file resolution.

use anyhow::{Context, Result};
use directories::BaseDirs;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::Config;
use crate::utils::expand_tilde;

/// Config file name searched in the current directory, XDG config dir and
/// the home directory.
pub const CONFIG_FILE_NAME: &str = ".tunnel.yml";

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded = expand_tilde(path);
        let content = fs::read_to_string(&expanded)
            .await
            .with_context(|| format!("read configuration file {}", expanded.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parse configuration file {}", expanded.display()))?;
        Ok(config)
    }

    /// Load configuration with priority order:
    /// 1. Explicit `--config` path
    /// 2. `./.tunnel.yml`
    /// 3. `$XDG_CONFIG_HOME/tunneld/.tunnel.yml` (or the platform config dir)
    /// 4. `$HOME/.tunnel.yml`
    pub async fn load_with_priority(cli_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(cli_path)?;
        tracing::debug!(path = %path.display(), "loading configuration");
        Self::load(&path).await
    }

    /// Resolve which configuration file to read. The first existing
    /// candidate wins; an explicit path wins even when it does not exist so
    /// the read error names the file the user asked for.
    pub fn resolve_path(cli_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli_path {
            return Ok(expand_tilde(path));
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }

        if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
            let candidate = PathBuf::from(xdg_config_home)
                .join("tunneld")
                .join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
        } else if let Some(dirs) = BaseDirs::new() {
            let candidate = dirs.config_dir().join("tunneld").join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(dirs) = BaseDirs::new() {
            let candidate = dirs.home_dir().join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        anyhow::bail!(
            "no configuration file found ({CONFIG_FILE_NAME} in the current directory, \
             XDG config directory or home directory)"
        )
    }
}
