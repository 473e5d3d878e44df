//! Message router: one parse per frame, one shared event per dispatch.

use std::sync::Arc;
use std::time::SystemTime;

use deskpulse_protocol::{ChangeAction, ChangeKind, ChangePayload, Channel, ServerFrame};
use tracing::{debug, warn};

use crate::registry::SubscriberRegistry;

/// A recognized change, built once per inbound frame.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub action: ChangeAction,
    pub payload: ChangePayload,
    pub received_at: SystemTime,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, payload: ChangePayload) -> Self {
        let action = kind
            .implied_action()
            .or(payload.action)
            .unwrap_or(ChangeAction::Update);
        Self {
            kind,
            action,
            payload,
            received_at: SystemTime::now(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.kind.channel()
    }
}

/// Why a frame was not dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(String),
    UnknownType(String),
    MissingData(ChangeKind),
}

/// Classify a raw text frame.
pub fn parse_frame(raw: &str) -> Result<ChangeEvent, DropReason> {
    let frame: ServerFrame =
        serde_json::from_str(raw).map_err(|e| DropReason::Malformed(e.to_string()))?;

    let kind: ChangeKind = frame
        .kind
        .parse()
        .map_err(|_| DropReason::UnknownType(frame.kind.clone()))?;

    let data = frame.data.ok_or(DropReason::MissingData(kind))?;
    let payload: ChangePayload =
        serde_json::from_value(data).map_err(|e| DropReason::Malformed(e.to_string()))?;

    Ok(ChangeEvent::new(kind, payload))
}

/// Routes frames from one channel's socket into its registry.
pub struct MessageRouter {
    channel: Channel,
    registry: Arc<SubscriberRegistry>,
}

impl MessageRouter {
    pub fn new(channel: Channel, registry: Arc<SubscriberRegistry>) -> Self {
        Self { channel, registry }
    }

    /// Handle one text frame. Returns how many subscribers received it.
    pub fn on_message(&self, raw: &str) -> usize {
        let event = match parse_frame(raw) {
            Ok(event) => Arc::new(event),
            Err(DropReason::Malformed(error)) => {
                warn!(
                    component = "router",
                    event = "router.frame.malformed",
                    channel = %self.channel,
                    error = %error,
                    payload_bytes = raw.len(),
                    payload_preview = %truncate_for_log(raw, 240),
                    "Dropping malformed frame"
                );
                return 0;
            }
            Err(DropReason::UnknownType(kind)) => {
                debug!(
                    component = "router",
                    event = "router.frame.unknown_type",
                    channel = %self.channel,
                    kind = %kind,
                    "Dropping frame with unrecognized type"
                );
                return 0;
            }
            Err(DropReason::MissingData(kind)) => {
                debug!(
                    component = "router",
                    event = "router.frame.missing_data",
                    channel = %self.channel,
                    kind = %kind,
                    "Dropping frame without data"
                );
                return 0;
            }
        };

        debug!(
            component = "router",
            event = "router.frame.dispatch",
            channel = %self.channel,
            kind = %event.kind,
            action = ?event.action,
        );
        self.registry.dispatch(&event)
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DomainFilter, Liveness};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(parse_frame("{nope"), Err(DropReason::Malformed(_))));
    }

    #[test]
    fn unknown_type_is_reported_by_tag() {
        let err = parse_frame(r#"{"type":"payroll_update","data":{}}"#).unwrap_err();
        assert_eq!(err, DropReason::UnknownType("payroll_update".into()));
    }

    #[test]
    fn missing_or_null_data_is_dropped() {
        assert_eq!(
            parse_frame(r#"{"type":"ticket_created"}"#).unwrap_err(),
            DropReason::MissingData(ChangeKind::TicketCreated)
        );
        assert_eq!(
            parse_frame(r#"{"type":"ticket_created","data":null}"#).unwrap_err(),
            DropReason::MissingData(ChangeKind::TicketCreated)
        );
    }

    #[test]
    fn non_object_data_is_malformed() {
        assert!(matches!(
            parse_frame(r#"{"type":"ticket_created","data":[1,2]}"#),
            Err(DropReason::Malformed(_))
        ));
    }

    #[test]
    fn tag_action_wins_over_payload_action() {
        let event =
            parse_frame(r#"{"type":"ticket_deleted","data":{"action":"INSERT","data":{"id":1}}}"#)
                .unwrap();
        assert_eq!(event.action, ChangeAction::Delete);
    }

    #[test]
    fn generic_update_tag_reads_action_from_payload() {
        let event =
            parse_frame(r#"{"type":"activity_update","data":{"action":"INSERT","data":{"id":1}}}"#)
                .unwrap();
        assert_eq!(event.action, ChangeAction::Insert);

        let event = parse_frame(r#"{"type":"event_update","data":{"data":{"id":1}}}"#).unwrap();
        assert_eq!(event.action, ChangeAction::Update);
    }

    #[test]
    fn router_dispatches_each_frame_once_per_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = registry.register(
            DomainFilter::Channel(Channel::Tickets),
            Arc::new(move |_: &Arc<ChangeEvent>, _: &Liveness| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let router = MessageRouter::new(Channel::Tickets, registry);

        assert_eq!(router.on_message("garbage"), 0);
        assert_eq!(
            router.on_message(r#"{"type":"ticket_created","data":{"data":{"id":1}}}"#),
            1
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
