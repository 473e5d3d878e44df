//! Server → Client frames

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Channel;

/// Raw frame as pushed by the server: `{ "type": "...", "data": {...} }`.
///
/// `kind` stays a plain string so unknown tags can be logged before being
/// dropped; see [`ChangeKind`] for the recognized set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ServerFrame {
    pub fn new(kind: ChangeKind, data: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data: Some(data),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Row-level action carried by a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    #[serde(alias = "insert", alias = "created")]
    Insert,
    #[serde(alias = "update", alias = "updated")]
    Update,
    #[serde(alias = "delete", alias = "deleted")]
    Delete,
}

/// Every change type tag the client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    // Activities
    ActivityUpdate,
    RestroomStatusUpdate,
    MeetingUpdate,
    MeetingStatusUpdate,
    EventAttendanceUpdate,
    BreakSessionUpdate,
    ClinicStatusUpdate,

    // Tickets
    TicketCreated,
    TicketUpdated,
    TicketDeleted,
    TicketUpdate,

    // Events
    EventCreated,
    EventUpdated,
    EventDeleted,
    EventUpdate,

    // Members
    MemberCreated,
    MemberUpdated,
    MemberDeleted,
    MemberUpdate,

    // Clients
    ClientCreated,
    ClientUpdated,
    ClientDeleted,
    ClientUpdate,

    // Activity logs
    ActivityLogCreated,
    ActivityLogUpdate,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 25] = [
        ChangeKind::ActivityUpdate,
        ChangeKind::RestroomStatusUpdate,
        ChangeKind::MeetingUpdate,
        ChangeKind::MeetingStatusUpdate,
        ChangeKind::EventAttendanceUpdate,
        ChangeKind::BreakSessionUpdate,
        ChangeKind::ClinicStatusUpdate,
        ChangeKind::TicketCreated,
        ChangeKind::TicketUpdated,
        ChangeKind::TicketDeleted,
        ChangeKind::TicketUpdate,
        ChangeKind::EventCreated,
        ChangeKind::EventUpdated,
        ChangeKind::EventDeleted,
        ChangeKind::EventUpdate,
        ChangeKind::MemberCreated,
        ChangeKind::MemberUpdated,
        ChangeKind::MemberDeleted,
        ChangeKind::MemberUpdate,
        ChangeKind::ClientCreated,
        ChangeKind::ClientUpdated,
        ChangeKind::ClientDeleted,
        ChangeKind::ClientUpdate,
        ChangeKind::ActivityLogCreated,
        ChangeKind::ActivityLogUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::ActivityUpdate => "activity_update",
            ChangeKind::RestroomStatusUpdate => "restroom_status_update",
            ChangeKind::MeetingUpdate => "meeting_update",
            ChangeKind::MeetingStatusUpdate => "meeting_status_update",
            ChangeKind::EventAttendanceUpdate => "event_attendance_update",
            ChangeKind::BreakSessionUpdate => "break_session_update",
            ChangeKind::ClinicStatusUpdate => "clinic_status_update",
            ChangeKind::TicketCreated => "ticket_created",
            ChangeKind::TicketUpdated => "ticket_updated",
            ChangeKind::TicketDeleted => "ticket_deleted",
            ChangeKind::TicketUpdate => "ticket_update",
            ChangeKind::EventCreated => "event_created",
            ChangeKind::EventUpdated => "event_updated",
            ChangeKind::EventDeleted => "event_deleted",
            ChangeKind::EventUpdate => "event_update",
            ChangeKind::MemberCreated => "member_created",
            ChangeKind::MemberUpdated => "member_updated",
            ChangeKind::MemberDeleted => "member_deleted",
            ChangeKind::MemberUpdate => "member_update",
            ChangeKind::ClientCreated => "client_created",
            ChangeKind::ClientUpdated => "client_updated",
            ChangeKind::ClientDeleted => "client_deleted",
            ChangeKind::ClientUpdate => "client_update",
            ChangeKind::ActivityLogCreated => "activity_log_created",
            ChangeKind::ActivityLogUpdate => "activity_log_update",
        }
    }

    /// Channel group whose socket carries this kind
    pub fn channel(&self) -> Channel {
        use ChangeKind::*;
        match self {
            ActivityUpdate
            | RestroomStatusUpdate
            | MeetingUpdate
            | MeetingStatusUpdate
            | EventAttendanceUpdate
            | BreakSessionUpdate
            | ClinicStatusUpdate => Channel::Activities,
            TicketCreated | TicketUpdated | TicketDeleted | TicketUpdate => Channel::Tickets,
            EventCreated | EventUpdated | EventDeleted | EventUpdate => Channel::Events,
            MemberCreated | MemberUpdated | MemberDeleted | MemberUpdate => Channel::Members,
            ClientCreated | ClientUpdated | ClientDeleted | ClientUpdate => Channel::Clients,
            ActivityLogCreated | ActivityLogUpdate => Channel::ActivityLogs,
        }
    }

    /// Status changes reported against a user rather than an activity row.
    pub fn is_side_channel(&self) -> bool {
        matches!(
            self,
            ChangeKind::RestroomStatusUpdate
                | ChangeKind::MeetingUpdate
                | ChangeKind::MeetingStatusUpdate
                | ChangeKind::EventAttendanceUpdate
                | ChangeKind::BreakSessionUpdate
                | ChangeKind::ClinicStatusUpdate
        )
    }

    /// Action fixed by the tag itself; `None` means read it from the payload.
    pub fn implied_action(&self) -> Option<ChangeAction> {
        use ChangeKind::*;
        match self {
            TicketCreated | EventCreated | MemberCreated | ClientCreated | ActivityLogCreated => {
                Some(ChangeAction::Insert)
            }
            TicketUpdated | EventUpdated | MemberUpdated | ClientUpdated => {
                Some(ChangeAction::Update)
            }
            TicketDeleted | EventDeleted | MemberDeleted | ClientDeleted => {
                Some(ChangeAction::Delete)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown change type: {s}"))
    }
}

/// Body of a change frame.
///
/// Row changes arrive as `{ table, action, data | record, old_data | old_record }`.
/// Side-channel status frames may instead put their fields (`user_id`,
/// `is_in_meeting`, ...) directly in the body; those land in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ChangeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ChangePayload {
    /// The changed row, if the frame carried one.
    pub fn row(&self) -> Option<&Map<String, Value>> {
        self.data
            .as_ref()
            .and_then(Value::as_object)
            .or_else(|| self.record.as_ref().and_then(Value::as_object))
    }

    /// The row before the change, when the server sends it.
    pub fn previous_row(&self) -> Option<&Map<String, Value>> {
        self.old_data
            .as_ref()
            .and_then(Value::as_object)
            .or_else(|| self.old_record.as_ref().and_then(Value::as_object))
    }

    /// Row fields, falling back to the inline body fields.
    pub fn row_or_fields(&self) -> &Map<String, Value> {
        self.row().unwrap_or(&self.fields)
    }

    /// Look a field up in the row first, then in the inline body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.row()
            .and_then(|row| row.get(name))
            .or_else(|| self.fields.get(name))
            .filter(|v| !v.is_null())
    }

    /// `user_id` of the affected agent, accepting numbers and numeric strings.
    pub fn user_id(&self) -> Option<i64> {
        self.field("user_id").and_then(value_as_i64)
    }
}

/// Read an integer key that may have been serialized as a string.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_kind_roundtrips_through_its_tag() {
        for kind in ChangeKind::ALL {
            assert_eq!(kind.as_str().parse::<ChangeKind>(), Ok(kind));
            let via_serde: ChangeKind =
                serde_json::from_value(json!(kind.as_str())).expect("serde tag");
            assert_eq!(via_serde, kind);
        }
    }

    #[test]
    fn side_channel_kinds_all_belong_to_activities() {
        for kind in ChangeKind::ALL.into_iter().filter(ChangeKind::is_side_channel) {
            assert_eq!(kind.channel(), Channel::Activities);
        }
    }

    #[test]
    fn explicit_tags_imply_their_action() {
        assert_eq!(
            ChangeKind::TicketDeleted.implied_action(),
            Some(ChangeAction::Delete)
        );
        assert_eq!(ChangeKind::TicketUpdate.implied_action(), None);
        assert_eq!(ChangeKind::ActivityUpdate.implied_action(), None);
    }

    #[test]
    fn payload_prefers_data_over_record() {
        let payload: ChangePayload = serde_json::from_value(json!({
            "table": "tickets",
            "action": "UPDATE",
            "data": {"id": 1, "status": "Closed"},
            "record": {"id": 2},
            "old_record": {"id": 1, "status": "Open"}
        }))
        .expect("parse payload");

        assert_eq!(payload.action, Some(ChangeAction::Update));
        assert_eq!(payload.row().and_then(|r| r.get("id")), Some(&json!(1)));
        assert_eq!(
            payload.previous_row().and_then(|r| r.get("status")),
            Some(&json!("Open"))
        );
    }

    #[test]
    fn side_channel_fields_are_read_inline() {
        let payload: ChangePayload = serde_json::from_value(json!({
            "user_id": "7",
            "is_in_meeting": true
        }))
        .expect("parse payload");

        assert!(payload.row().is_none());
        assert_eq!(payload.user_id(), Some(7));
        assert_eq!(payload.row_or_fields().get("is_in_meeting"), Some(&json!(true)));
    }

    #[test]
    fn lowercase_actions_are_accepted() {
        let payload: ChangePayload =
            serde_json::from_value(json!({"action": "delete", "data": {"id": 9}}))
                .expect("parse payload");
        assert_eq!(payload.action, Some(ChangeAction::Delete));
    }

    #[test]
    fn frame_without_data_parses_as_none() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"ticket_created","data":null}"#).expect("parse");
        assert!(frame.data.is_none());
    }
}
