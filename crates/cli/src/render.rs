//! Terminal rendering for records and live changes.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use console::style;
use deskpulse_client::{ApplyOutcome, Delivery, DomainRecord};
use deskpulse_protocol::{
    ActivityEntry, ActivityLogEntry, Client, Event, Member, PresenceStatus, Ticket,
};
use serde_json::json;

/// Columns shown for a record type.
pub trait Render: DomainRecord {
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;

    /// Short label used in change lines.
    fn label(&self) -> String;
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: Option<i64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

fn presence_label(status: PresenceStatus) -> &'static str {
    match status {
        PresenceStatus::Active => "active",
        PresenceStatus::Inactive => "inactive",
        PresenceStatus::Break => "on break",
        PresenceStatus::Meeting => "in meeting",
        PresenceStatus::Event => "at event",
        PresenceStatus::Restroom => "restroom",
        PresenceStatus::Clinic => "clinic",
    }
}

impl Render for ActivityEntry {
    const HEADERS: &'static [&'static str] = &["ID", "User", "Name", "Email", "Status"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            number(self.user_id),
            self.display_name(),
            text(&self.email),
            presence_label(self.presence()).to_string(),
        ]
    }

    fn label(&self) -> String {
        format!("{} ({})", self.display_name(), presence_label(self.presence()))
    }
}

impl Render for Ticket {
    const HEADERS: &'static [&'static str] =
        &["ID", "Ticket", "Status", "Requester", "Role", "Concern"];

    fn cells(&self) -> Vec<String> {
        let requester = match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            (None, None) => String::new(),
        };
        vec![
            self.id.to_string(),
            text(&self.ticket_id),
            text(&self.status),
            requester,
            text(&self.role_name),
            text(&self.concern),
        ]
    }

    fn label(&self) -> String {
        format!(
            "{} [{}]",
            self.ticket_id.as_deref().unwrap_or("ticket"),
            self.status.as_deref().unwrap_or("?")
        )
    }
}

impl Render for Event {
    const HEADERS: &'static [&'static str] =
        &["ID", "Title", "Date", "Status", "Going", "Created by"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            text(&self.title),
            text(&self.event_date),
            text(&self.status),
            number(self.going_count),
            text(&self.created_by_name),
        ]
    }

    fn label(&self) -> String {
        format!(
            "{} on {}",
            self.title.as_deref().unwrap_or("event"),
            self.event_date.as_deref().unwrap_or("TBA")
        )
    }
}

impl Render for Member {
    const HEADERS: &'static [&'static str] =
        &["ID", "Company", "Badge", "Status", "Employees", "Clients"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            text(&self.company),
            text(&self.badge_color),
            text(&self.status),
            number(self.employee_count),
            number(self.client_count),
        ]
    }

    fn label(&self) -> String {
        self.company.clone().unwrap_or_else(|| "member".into())
    }
}

impl Render for Client {
    const HEADERS: &'static [&'static str] = &["ID", "Name", "Email", "Company", "Badge"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.display_name(),
            text(&self.email),
            text(&self.member_company),
            text(&self.member_badge_color),
        ]
    }

    fn label(&self) -> String {
        match &self.member_company {
            Some(company) => format!("{} ({company})", self.display_name()),
            None => self.display_name(),
        }
    }
}

impl Render for ActivityLogEntry {
    const HEADERS: &'static [&'static str] = &["ID", "User", "Name", "Action", "At"];

    fn cells(&self) -> Vec<String> {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        vec![
            self.id.to_string(),
            number(self.user_id),
            name.trim().to_string(),
            text(&self.action),
            text(&self.created_at),
        ]
    }

    fn label(&self) -> String {
        self.action.clone().unwrap_or_else(|| "activity".into())
    }
}

pub fn table<R: Render>(records: &[R]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(R::HEADERS.to_vec());
    for record in records {
        table.add_row(record.cells());
    }
    table
}

/// One styled line describing an applied change.
pub fn change_line<R: Render>(delivery: &Delivery<R>, outcome: ApplyOutcome, total: usize) -> String {
    let (tag, record) = match delivery {
        Delivery::Created(r) => (style("created").green().bold(), r),
        Delivery::Updated(u) if u.partial => (style("patched").yellow(), &u.record),
        Delivery::Updated(u) => (style("updated").cyan(), &u.record),
        Delivery::Deleted(r) => (style("deleted").red().bold(), r),
    };
    let label = match delivery {
        // Delete payloads only carry the key
        Delivery::Deleted(_) => String::new(),
        _ => format!(" {}", record.label()),
    };
    format!(
        "{} {} #{}{} {}",
        style(R::CHANNEL.as_str()).dim(),
        tag,
        record.key(),
        label,
        style(format!("({:?}, {} rows)", outcome, total)).dim()
    )
}

/// JSON line for `--format json`.
pub fn change_json<R: Render>(delivery: &Delivery<R>) -> serde_json::Value {
    match delivery {
        Delivery::Created(r) => json!({"change": "created", "key": r.key(), "record": r}),
        Delivery::Updated(u) => json!({
            "change": "updated",
            "key": u.record.key(),
            "partial": u.partial,
            "record": u.record,
            "previous": u.previous,
        }),
        Delivery::Deleted(r) => json!({"change": "deleted", "key": r.key()}),
    }
}
