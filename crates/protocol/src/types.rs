//! Core types shared across the protocol

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Columns the server sent that have no typed field.
pub type ExtraFields = Map<String, Value>;

/// Logical channel group. One socket is shared per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Activities,
    Tickets,
    Events,
    Members,
    Clients,
    ActivityLogs,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Activities,
        Channel::Tickets,
        Channel::Events,
        Channel::Members,
        Channel::Clients,
        Channel::ActivityLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Activities => "activities",
            Channel::Tickets => "tickets",
            Channel::Events => "events",
            Channel::Members => "members",
            Channel::Clients => "clients",
            Channel::ActivityLogs => "activity_logs",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown channel: {s}"))
    }
}

/// Presence status derived from an activity row's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Active,
    Inactive,
    Break,
    Meeting,
    Event,
    Restroom,
    Clinic,
}

/// Live activity row for one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub department_name: Option<String>,
    #[serde(default)]
    pub is_currently_active: Option<bool>,
    #[serde(default)]
    pub today_active_seconds: Option<i64>,
    #[serde(default)]
    pub today_inactive_seconds: Option<i64>,
    #[serde(default)]
    pub today_date: Option<String>,
    #[serde(default)]
    pub last_session_start: Option<String>,
    #[serde(default)]
    pub last_session_end: Option<String>,
    #[serde(default)]
    pub is_in_restroom: Option<bool>,
    #[serde(default)]
    pub restroom_count: Option<i64>,
    #[serde(default)]
    pub is_in_meeting: Option<bool>,
    #[serde(default)]
    pub is_in_event: Option<bool>,
    #[serde(default)]
    pub is_on_break: Option<bool>,
    #[serde(default)]
    pub is_in_clinic: Option<bool>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl ActivityEntry {
    /// Status badge shown for the agent. Away states outrank active/inactive.
    pub fn presence(&self) -> PresenceStatus {
        let on = |flag: Option<bool>| flag.unwrap_or(false);
        if on(self.is_in_meeting) {
            PresenceStatus::Meeting
        } else if on(self.is_in_event) {
            PresenceStatus::Event
        } else if on(self.is_in_clinic) {
            PresenceStatus::Clinic
        } else if on(self.is_in_restroom) {
            PresenceStatus::Restroom
        } else if on(self.is_on_break) {
            PresenceStatus::Break
        } else if on(self.is_currently_active) {
            PresenceStatus::Active
        } else {
            PresenceStatus::Inactive
        }
    }

    pub fn display_name(&self) -> String {
        display_name(self.first_name.as_deref(), self.last_name.as_deref())
    }
}

/// Support ticket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    /// Human-facing code, e.g. `TKT-000042`
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub concern: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub role_id: Option<i64>,
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub resolved_by: Option<i64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Company event or activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_by: Option<i64>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    #[serde(default)]
    pub going_count: Option<i64>,
    #[serde(default)]
    pub not_going_count: Option<i64>,
    #[serde(default)]
    pub assigned_user_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Member company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub badge_color: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub employee_count: Option<i64>,
    #[serde(default)]
    pub client_count: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Client user attached to a member company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub member_id: Option<i64>,
    #[serde(default)]
    pub member_company: Option<String>,
    #[serde(default)]
    pub member_badge_color: Option<String>,
    #[serde(default)]
    pub department_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Client {
    pub fn display_name(&self) -> String {
        display_name(self.first_name.as_deref(), self.last_name.as_deref())
    }
}

/// Audit trail line for an agent's activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

fn display_name(first: Option<&str>, last: Option<&str>) -> String {
    match (first, last) {
        (Some(f), Some(l)) => format!("{f} {l}"),
        (Some(f), None) => f.to_string(),
        (None, Some(l)) => l.to_string(),
        (None, None) => String::new(),
    }
}
