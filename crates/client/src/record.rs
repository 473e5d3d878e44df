//! Per-domain record knowledge: primary key, render fields and update policy.

use std::fmt;

use deskpulse_protocol::server::value_as_i64;
use deskpulse_protocol::{
    ActivityEntry, ActivityLogEntry, Channel, Client, Event, Member, Ticket,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A row type delivered to consumers of one channel.
pub trait DomainRecord:
    DeserializeOwned + Serialize + Clone + fmt::Debug + Send + Sync + 'static
{
    const CHANNEL: Channel;

    /// Fields a list view needs. A payload missing any of them is thin.
    const RENDER_FIELDS: &'static [&'static str];

    /// Thin updates are applied as a partial patch first, then replaced by
    /// the re-fetched record.
    const TWO_PHASE: bool = false;

    fn key(&self) -> i64;

    /// Minimal record carrying only the primary key (delete notifications).
    fn key_only(key: i64) -> Self;

    /// Whether the record is visible under a consumer's role filter.
    fn matches_role(&self, _role: &str) -> bool {
        true
    }

    /// One-line text used for desktop-style notifications.
    fn notification_text(&self) -> String;
}

impl DomainRecord for ActivityEntry {
    const CHANNEL: Channel = Channel::Activities;
    const RENDER_FIELDS: &'static [&'static str] = &["user_id", "first_name", "last_name", "email"];

    fn key(&self) -> i64 {
        self.id
    }

    fn key_only(key: i64) -> Self {
        Self {
            id: key,
            ..Default::default()
        }
    }

    fn notification_text(&self) -> String {
        format!("{} is now {:?}", self.display_name(), self.presence())
    }
}

impl DomainRecord for Ticket {
    const CHANNEL: Channel = Channel::Tickets;
    const RENDER_FIELDS: &'static [&'static str] =
        &["ticket_id", "status", "user_id", "first_name", "last_name"];

    fn key(&self) -> i64 {
        self.id
    }

    fn key_only(key: i64) -> Self {
        Self {
            id: key,
            ..Default::default()
        }
    }

    fn matches_role(&self, role: &str) -> bool {
        let role = role.trim();
        let by_name = self
            .role_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(role));
        let by_id = self
            .role_id
            .is_some_and(|id| role.parse::<i64>().ok() == Some(id));
        by_name || by_id
    }

    fn notification_text(&self) -> String {
        format!(
            "New ticket {}: {}",
            self.ticket_id.as_deref().unwrap_or("(unnumbered)"),
            self.concern.as_deref().unwrap_or("")
        )
    }
}

impl DomainRecord for Event {
    const CHANNEL: Channel = Channel::Events;
    const RENDER_FIELDS: &'static [&'static str] =
        &["title", "event_date", "status", "created_by_name"];

    fn key(&self) -> i64 {
        self.id
    }

    fn key_only(key: i64) -> Self {
        Self {
            id: key,
            ..Default::default()
        }
    }

    fn notification_text(&self) -> String {
        format!(
            "New event: {} on {}",
            self.title.as_deref().unwrap_or("untitled"),
            self.event_date.as_deref().unwrap_or("TBA")
        )
    }
}

impl DomainRecord for Member {
    const CHANNEL: Channel = Channel::Members;
    const RENDER_FIELDS: &'static [&'static str] = &["company", "badge_color"];
    const TWO_PHASE: bool = true;

    fn key(&self) -> i64 {
        self.id
    }

    fn key_only(key: i64) -> Self {
        Self {
            id: key,
            ..Default::default()
        }
    }

    fn notification_text(&self) -> String {
        format!("New member company: {}", self.company.as_deref().unwrap_or(""))
    }
}

impl DomainRecord for Client {
    const CHANNEL: Channel = Channel::Clients;
    const RENDER_FIELDS: &'static [&'static str] =
        &["first_name", "last_name", "member_company", "member_badge_color"];
    const TWO_PHASE: bool = true;

    fn key(&self) -> i64 {
        self.id
    }

    fn key_only(key: i64) -> Self {
        Self {
            id: key,
            ..Default::default()
        }
    }

    fn notification_text(&self) -> String {
        format!("New client: {}", self.display_name())
    }
}

impl DomainRecord for ActivityLogEntry {
    const CHANNEL: Channel = Channel::ActivityLogs;
    const RENDER_FIELDS: &'static [&'static str] =
        &["user_id", "action", "first_name", "last_name"];

    fn key(&self) -> i64 {
        self.id
    }

    fn key_only(key: i64) -> Self {
        Self {
            id: key,
            ..Default::default()
        }
    }

    fn notification_text(&self) -> String {
        format!(
            "{} {} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or(""),
            self.action.as_deref().unwrap_or("")
        )
    }
}

/// Primary key of a raw row.
pub fn row_key(row: &Map<String, Value>) -> Option<i64> {
    row.get("id").and_then(value_as_i64)
}

/// Render fields absent (or `null`) in a raw row.
pub fn missing_render_fields<R: DomainRecord>(row: &Map<String, Value>) -> Vec<&'static str> {
    R::RENDER_FIELDS
        .iter()
        .copied()
        .filter(|field| row.get(*field).map_or(true, Value::is_null))
        .collect()
}

pub fn decode_row<R: DomainRecord>(row: &Map<String, Value>) -> Result<R, serde_json::Error> {
    serde_json::from_value(Value::Object(row.clone()))
}

/// Overlay the non-null fields of `patch` onto `existing`.
///
/// Used for optimistic partial updates, where `None` in the patch means
/// "not sent" rather than "cleared".
pub fn merge_present<R: DomainRecord>(existing: &R, patch: &R) -> R {
    let (Ok(Value::Object(mut base)), Ok(Value::Object(overlay))) =
        (serde_json::to_value(existing), serde_json::to_value(patch))
    else {
        return existing.clone();
    };
    for (field, value) in overlay {
        if !value.is_null() {
            base.insert(field, value);
        }
    }
    serde_json::from_value(Value::Object(base)).unwrap_or_else(|_| existing.clone())
}
