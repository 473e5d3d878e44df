//! CLI settings: `config.toml` in the data dir, layered under env vars and
//! command-line flags.
//!
//! Precedence: flags > `DESKPULSE_*` env > config file > built-in defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use deskpulse_client::RealtimeConfig;
use serde::Deserialize;

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub origin: Option<String>,
    pub ws_path: Option<String>,
    pub member_scope: Option<String>,
    pub status_scope: Option<String>,
    pub token: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub refetch_timeout_ms: Option<u64>,
}

impl FileSettings {
    /// Read the config file. A missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply(&self, config: &mut RealtimeConfig) {
        if let Some(origin) = &self.origin {
            config.origin = origin.clone();
        }
        if let Some(path) = &self.ws_path {
            config.ws_path = path.clone();
        }
        if let Some(scope) = &self.member_scope {
            config.member_scope = scope.clone();
        }
        if let Some(scope) = &self.status_scope {
            config.status_scope = scope.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.refetch_timeout_ms {
            config.refetch_timeout = Duration::from_millis(ms);
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct FlagOverrides {
    pub origin: Option<String>,
    pub member: Option<String>,
    pub status: Option<String>,
}

pub fn resolve(
    file: &FileSettings,
    flags: &FlagOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> RealtimeConfig {
    let mut config = RealtimeConfig::default();
    file.apply(&mut config);
    config.apply_env(env);
    if let Some(origin) = &flags.origin {
        config.origin = origin.clone();
    }
    if let Some(member) = &flags.member {
        config.member_scope = member.clone();
    }
    if let Some(status) = &flags.status {
        config.status_scope = status.clone();
    }
    config
}
