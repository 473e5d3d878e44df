//! REST collection source used for re-fetches.

use std::sync::Arc;

use deskpulse_protocol::Channel;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::config::{RealtimeConfig, ScopeKind};
use crate::error::RealtimeError;

/// Where a channel's full, render-ready collection lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionEndpoint {
    pub path: &'static str,
    pub scope: ScopeKind,
    /// Key of the list in the response body
    pub list_key: &'static str,
}

impl CollectionEndpoint {
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Activities => Self {
                path: "/api/activities",
                scope: ScopeKind::Member,
                list_key: "activities",
            },
            Channel::Tickets => Self {
                path: "/api/tickets",
                scope: ScopeKind::Status,
                list_key: "tickets",
            },
            Channel::Events => Self {
                path: "/api/events",
                scope: ScopeKind::Status,
                list_key: "events",
            },
            Channel::Members => Self {
                path: "/api/members",
                scope: ScopeKind::Member,
                list_key: "members",
            },
            Channel::Clients => Self {
                path: "/api/clients",
                scope: ScopeKind::Member,
                list_key: "clients",
            },
            Channel::ActivityLogs => Self {
                path: "/api/activity-logs",
                scope: ScopeKind::Member,
                list_key: "logs",
            },
        }
    }

    pub fn path_and_query(&self, scope: &str) -> String {
        format!(
            "{}?{}={}",
            self.path,
            self.scope.query_param(),
            urlencoding::encode(scope)
        )
    }

    /// Pull the row list out of `{ "<list_key>": [...] }` or a bare array.
    pub fn extract_rows(&self, body: Value) -> Result<Vec<Value>, RealtimeError> {
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Object(mut map) => match map.remove(self.list_key) {
                Some(Value::Array(rows)) => Ok(rows),
                _ => Err(RealtimeError::MissingList(self.list_key.to_string())),
            },
            _ => Err(RealtimeError::MissingList(self.list_key.to_string())),
        }
    }
}

/// Full-collection fetches backing thin-payload reconciliation.
pub trait RecordSource: Send + Sync {
    fn fetch_collection(&self, channel: Channel) -> BoxFuture<'_, Result<Vec<Value>, RealtimeError>>;
}

/// `reqwest`-backed source hitting the dashboard's list endpoints.
pub struct RestSource {
    client: reqwest::Client,
    config: Arc<RealtimeConfig>,
}

impl RestSource {
    pub fn new(config: Arc<RealtimeConfig>) -> Result<Self, RealtimeError> {
        let client = reqwest::Client::builder()
            .timeout(config.refetch_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn collection_url(&self, channel: Channel) -> Result<String, RealtimeError> {
        let endpoint = CollectionEndpoint::for_channel(channel);
        self.config
            .http_url(&endpoint.path_and_query(self.config.scope(endpoint.scope)))
    }

    async fn fetch(&self, channel: Channel) -> Result<Vec<Value>, RealtimeError> {
        let url = self.collection_url(channel)?;
        let mut request = self.client.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RealtimeError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body: Value = resp.json().await?;
        let rows = CollectionEndpoint::for_channel(channel).extract_rows(body)?;
        debug!(
            component = "source",
            event = "source.collection.fetched",
            channel = %channel,
            rows = rows.len(),
        );
        Ok(rows)
    }
}

impl RecordSource for RestSource {
    fn fetch_collection(&self, channel: Channel) -> BoxFuture<'_, Result<Vec<Value>, RealtimeError>> {
        self.fetch(channel).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activities_endpoint_matches_dashboard_route() {
        let endpoint = CollectionEndpoint::for_channel(Channel::Activities);
        assert_eq!(endpoint.path_and_query("all"), "/api/activities?memberId=all");
    }

    #[test]
    fn scope_is_url_encoded() {
        let endpoint = CollectionEndpoint::for_channel(Channel::Tickets);
        assert_eq!(
            endpoint.path_and_query("For Approval"),
            "/api/tickets?status=For%20Approval"
        );
    }

    #[test]
    fn extract_rows_accepts_keyed_and_bare_lists() {
        let endpoint = CollectionEndpoint::for_channel(Channel::Events);
        let rows = endpoint
            .extract_rows(json!({"events": [{"id": 1}], "pagination": {"page": 1}}))
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = endpoint.extract_rows(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(rows.len(), 2);

        assert!(matches!(
            endpoint.extract_rows(json!({"items": []})),
            Err(RealtimeError::MissingList(key)) if key == "events"
        ));
    }

    #[test]
    fn rest_source_builds_url_from_config() {
        let config =
            Arc::new(RealtimeConfig::new("https://desk.example.com").with_member_scope("12"));
        let source = RestSource::new(config).unwrap();
        assert_eq!(
            source.collection_url(Channel::Clients).unwrap(),
            "https://desk.example.com/api/clients?memberId=12"
        );
    }

    #[test]
    fn member_scope_leaves_status_endpoints_alone() {
        let config =
            Arc::new(RealtimeConfig::new("https://desk.example.com").with_member_scope("12"));
        let source = RestSource::new(config).unwrap();
        assert_eq!(
            source.collection_url(Channel::Tickets).unwrap(),
            "https://desk.example.com/api/tickets?status=all"
        );
        assert_eq!(
            source.collection_url(Channel::Events).unwrap(),
            "https://desk.example.com/api/events?status=all"
        );
        assert_eq!(
            source.collection_url(Channel::Activities).unwrap(),
            "https://desk.example.com/api/activities?memberId=12"
        );
    }

    #[test]
    fn status_scope_only_touches_status_endpoints() {
        let config = Arc::new(
            RealtimeConfig::new("http://127.0.0.1:3000").with_status_scope("For Approval"),
        );
        let source = RestSource::new(config).unwrap();
        assert_eq!(
            source.collection_url(Channel::Tickets).unwrap(),
            "http://127.0.0.1:3000/api/tickets?status=For%20Approval"
        );
        assert_eq!(
            source.collection_url(Channel::Members).unwrap(),
            "http://127.0.0.1:3000/api/members?memberId=all"
        );
    }
}
