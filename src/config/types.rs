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

//! Configuration type definitions.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Main configuration structure.
///
/// Two configurations compare equal only when every field (including order)
/// matches; reload uses this to skip tearing down an unchanged fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub key_files: Vec<KeyFile>,

    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,
}

/// One gateway with its forwarding rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// `user@host[:port]`, port defaulting to 22.
    pub server: String,

    /// OpenSSH-style ProxyCommand with `%h`/`%p` placeholders.
    #[serde(default)]
    pub proxy_command: Option<String>,

    /// `dialAddr -> bindAddr` rules forwarded through this gateway.
    #[serde(default)]
    pub tunnels: Vec<String>,
}

/// A private key file, optionally passphrase-protected.
///
/// Accepts two YAML shapes:
///
/// ```yaml
/// key_files:
///   - ~/.ssh/id_rsa
///   - {path: ~/.ssh/id_ed25519, passphrase: "xxx"}
/// ```
///
/// Any other YAML kind (number, list, ...) is a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    pub path: String,
    pub passphrase: Option<String>,
}

impl<'de> Deserialize<'de> for KeyFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct KeyFileVisitor;

        impl<'de> Visitor<'de> for KeyFileVisitor {
            type Value = KeyFile;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a path string or a {path, passphrase} mapping")
            }

            fn visit_str<E>(self, value: &str) -> Result<KeyFile, E>
            where
                E: de::Error,
            {
                Ok(KeyFile {
                    path: value.to_string(),
                    passphrase: None,
                })
            }

            fn visit_map<A>(self, mut map: A) -> Result<KeyFile, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut path: Option<String> = None;
                let mut passphrase: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "path" => path = Some(map.next_value()?),
                        "passphrase" => passphrase = map.next_value()?,
                        other => {
                            return Err(de::Error::unknown_field(other, &["path", "passphrase"]))
                        }
                    }
                }
                Ok(KeyFile {
                    path: path.ok_or_else(|| de::Error::missing_field("path"))?,
                    passphrase,
                })
            }
        }

        deserializer.deserialize_any(KeyFileVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_from_scalar() {
        let kf: KeyFile = serde_yaml::from_str("~/.ssh/id_rsa").unwrap();
        assert_eq!(kf.path, "~/.ssh/id_rsa");
        assert_eq!(kf.passphrase, None);
    }

    #[test]
    fn key_file_from_mapping() {
        let kf: KeyFile =
            serde_yaml::from_str("{path: ~/.ssh/id_ed25519, passphrase: \"xxx\"}").unwrap();
        assert_eq!(kf.path, "~/.ssh/id_ed25519");
        assert_eq!(kf.passphrase.as_deref(), Some("xxx"));
    }

    #[test]
    fn key_file_mapping_without_passphrase() {
        let kf: KeyFile = serde_yaml::from_str("{path: /tmp/key}").unwrap();
        assert_eq!(kf.path, "/tmp/key");
        assert_eq!(kf.passphrase, None);
    }

    #[test]
    fn key_file_rejects_other_yaml_kinds() {
        assert!(serde_yaml::from_str::<KeyFile>("123").is_err());
        assert!(serde_yaml::from_str::<KeyFile>("[a, b]").is_err());
        assert!(serde_yaml::from_str::<KeyFile>("{path: /tmp/key, extra: 1}").is_err());
    }

    #[test]
    fn key_file_mapping_requires_path() {
        assert!(serde_yaml::from_str::<KeyFile>("{passphrase: \"xxx\"}").is_err());
    }

    const SAMPLE: &str = r#"
key_files:
  - ~/.ssh/id_rsa
  - {path: ~/.ssh/id_ed25519, passphrase: "xxx"}
gateways:
  - server: user@bastion.example.com:22
    proxy_command: "nc -X 5 -x proxy:1080 %h %p"
    tunnels:
      - "db.internal:5432 -> 127.0.0.1:5432"
      - "metrics.internal:9090 -> /tmp/metrics.sock"
"#;

    #[test]
    fn parses_full_config() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.key_files.len(), 2);
        assert_eq!(config.gateways.len(), 1);
        let gw = &config.gateways[0];
        assert_eq!(gw.server, "user@bastion.example.com:22");
        assert_eq!(gw.proxy_command.as_deref(), Some("nc -X 5 -x proxy:1080 %h %p"));
        assert_eq!(gw.tunnels.len(), 2);
    }

    #[test]
    fn equality_is_deep_and_order_sensitive() {
        let a: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let b: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(a, b);

        let mut reordered = b.clone();
        reordered.gateways[0].tunnels.reverse();
        assert_ne!(a, reordered);

        let mut changed = b;
        changed.gateways[0].server = "user@other.example.com".to_string();
        assert_ne!(a, changed);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let config: Config = serde_yaml::from_str("key_files: []").unwrap();
        assert!(config.key_files.is_empty());
        assert!(config.gateways.is_empty());
    }
}
