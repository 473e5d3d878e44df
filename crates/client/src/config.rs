//! Client configuration.
//!
//! Resolved from: explicit builder values > `DESKPULSE_*` env vars > defaults.

use std::time::Duration;

use deskpulse_protocol::Channel;

use crate::error::RealtimeError;

pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_REFETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SCOPE: &str = "all";

/// The filter a list endpoint is scoped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `memberId=<member id | all>`
    Member,
    /// `status=<status | all>`
    Status,
}

impl ScopeKind {
    pub fn query_param(self) -> &'static str {
        match self {
            ScopeKind::Member => "memberId",
            ScopeKind::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Origin of the dashboard, e.g. `https://desk.example.com`
    pub origin: String,
    pub ws_path: String,
    pub reconnect_delay: Duration,
    pub refetch_timeout: Duration,
    /// Sent as `memberId=` to member-scoped list endpoints
    pub member_scope: String,
    /// Sent as `status=` to status-scoped list endpoints (tickets, events)
    pub status_scope: String,
    /// Bearer token forwarded on re-fetch requests
    pub token: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            refetch_timeout: DEFAULT_REFETCH_TIMEOUT,
            member_scope: DEFAULT_SCOPE.to_string(),
            status_scope: DEFAULT_SCOPE.to_string(),
            token: None,
        }
    }
}

impl RealtimeConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `DESKPULSE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay values from an env-style lookup. Unparseable durations are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(origin) = non_empty("DESKPULSE_ORIGIN") {
            self.origin = origin;
        }
        if let Some(path) = non_empty("DESKPULSE_WS_PATH") {
            self.ws_path = path;
        }
        if let Some(ms) = non_empty("DESKPULSE_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = non_empty("DESKPULSE_REFETCH_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.refetch_timeout = Duration::from_millis(ms);
        }
        if let Some(scope) = non_empty("DESKPULSE_MEMBER_SCOPE") {
            self.member_scope = scope;
        }
        if let Some(scope) = non_empty("DESKPULSE_STATUS_SCOPE") {
            self.status_scope = scope;
        }
        if let Some(token) = non_empty("DESKPULSE_TOKEN") {
            self.token = Some(token);
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_refetch_timeout(mut self, timeout: Duration) -> Self {
        self.refetch_timeout = timeout;
        self
    }

    pub fn with_member_scope(mut self, scope: impl Into<String>) -> Self {
        self.member_scope = scope.into();
        self
    }

    pub fn with_status_scope(mut self, scope: impl Into<String>) -> Self {
        self.status_scope = scope.into();
        self
    }

    pub fn scope(&self, kind: ScopeKind) -> &str {
        match kind {
            ScopeKind::Member => &self.member_scope,
            ScopeKind::Status => &self.status_scope,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// WebSocket endpoint for a channel group, derived from the origin.
    pub fn ws_url(&self, channel: Channel) -> Result<String, RealtimeError> {
        let origin = self.origin.trim().trim_end_matches('/');
        let base = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if origin.starts_with("ws://") || origin.starts_with("wss://") {
            origin.to_string()
        } else {
            return Err(RealtimeError::Config(format!(
                "origin must start with http(s):// or ws(s)://, got {:?}",
                self.origin
            )));
        };

        let path = normalize_path(&self.ws_path);
        let sep = if path.contains('?') { '&' } else { '?' };
        Ok(format!("{base}{path}{sep}channel={}", channel.as_str()))
    }

    /// HTTP URL for a REST path on the same origin.
    pub fn http_url(&self, path_and_query: &str) -> Result<String, RealtimeError> {
        let origin = self.origin.trim().trim_end_matches('/');
        let base = if let Some(rest) = origin.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = origin.strip_prefix("ws://") {
            format!("http://{rest}")
        } else if origin.starts_with("http://") || origin.starts_with("https://") {
            origin.to_string()
        } else {
            return Err(RealtimeError::Config(format!(
                "origin must start with http(s):// or ws(s)://, got {:?}",
                self.origin
            )));
        };
        Ok(format!("{base}{}", normalize_path(path_and_query)))
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn ws_url_follows_origin_scheme() {
        let config = RealtimeConfig::new("https://desk.example.com/");
        assert_eq!(
            config.ws_url(Channel::Tickets).unwrap(),
            "wss://desk.example.com/ws?channel=tickets"
        );

        let config = RealtimeConfig::new("http://127.0.0.1:3000");
        assert_eq!(
            config.ws_url(Channel::ActivityLogs).unwrap(),
            "ws://127.0.0.1:3000/ws?channel=activity_logs"
        );
    }

    #[test]
    fn ws_url_appends_channel_to_existing_query() {
        let mut config = RealtimeConfig::new("ws://localhost:3001");
        config.ws_path = "socket?v=2".into();
        assert_eq!(
            config.ws_url(Channel::Events).unwrap(),
            "ws://localhost:3001/socket?v=2&channel=events"
        );
    }

    #[test]
    fn rejects_origin_without_scheme() {
        let config = RealtimeConfig::new("desk.example.com");
        assert!(matches!(
            config.ws_url(Channel::Events),
            Err(RealtimeError::Config(_))
        ));
    }

    #[test]
    fn http_url_maps_ws_origin_back() {
        let config = RealtimeConfig::new("wss://desk.example.com");
        assert_eq!(
            config.http_url("api/tickets?status=all").unwrap(),
            "https://desk.example.com/api/tickets?status=all"
        );
    }

    #[test]
    fn env_overlay_skips_empty_and_bad_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DESKPULSE_ORIGIN", "https://ops.internal"),
            ("DESKPULSE_RECONNECT_DELAY_MS", "250"),
            ("DESKPULSE_REFETCH_TIMEOUT_MS", "soon"),
            ("DESKPULSE_TOKEN", "  "),
            ("DESKPULSE_MEMBER_SCOPE", "12"),
        ]);
        let mut config = RealtimeConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.origin, "https://ops.internal");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.refetch_timeout, DEFAULT_REFETCH_TIMEOUT);
        assert_eq!(config.token, None);
        assert_eq!(config.scope(ScopeKind::Member), "12");
        assert_eq!(config.scope(ScopeKind::Status), DEFAULT_SCOPE);
    }
}
