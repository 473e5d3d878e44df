//! Reconciliation engine
//!
//! Push payloads are often thin: a primary key and a few raw columns, without
//! the joined fields (names, company, badge colour, counts) a list needs to
//! render. Per change this module decides whether the payload can be
//! delivered as-is or must be hydrated from a full-collection re-fetch.
//!
//! Planning is a pure, synchronous function (`plan`); only `resolve` does IO.
//!
//! | action | payload | result |
//! |---|---|---|
//! | DELETE | key present | `Deleted(key_only)`, no fetch |
//! | INSERT / UPDATE | complete | delivered directly |
//! | INSERT / UPDATE | thin | re-fetch, match by key, fall back to thin on fetch error |
//! | UPDATE, two-phase domain | thin | partial patch now, authoritative record after re-fetch |
//! | side-channel status | any | re-fetch activities, match by `user_id`, deliver `Updated`; dropped if the fetch fails |

use std::sync::Arc;
use std::time::Duration;

use deskpulse_protocol::server::value_as_i64;
use deskpulse_protocol::{ChangeAction, Channel};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RealtimeError;
use crate::record::{decode_row, missing_render_fields, row_key, DomainRecord};
use crate::router::ChangeEvent;
use crate::source::RecordSource;

/// An update notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Updated<R> {
    pub record: R,
    /// Row before the change, when the server sent one
    pub previous: Option<R>,
    /// Only the non-`None` fields of `record` were sent; merge, don't replace.
    pub partial: bool,
}

/// What a consumer is told.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<R> {
    Created(R),
    Updated(Updated<R>),
    Deleted(R),
}

impl<R: DomainRecord> Delivery<R> {
    pub fn key(&self) -> i64 {
        match self {
            Delivery::Created(r) | Delivery::Deleted(r) => r.key(),
            Delivery::Updated(u) => u.record.key(),
        }
    }
}

/// How to find the hydrated row in a re-fetched collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    ById(i64),
    ByUserId(i64),
}

impl Lookup {
    fn matches(&self, row: &Value) -> bool {
        let (field, want) = match self {
            Lookup::ById(id) => ("id", *id),
            Lookup::ByUserId(user_id) => ("user_id", *user_id),
        };
        row.get(field).and_then(value_as_i64) == Some(want)
    }
}

/// A pending re-fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Refetch<R> {
    pub lookup: Lookup,
    pub action: ChangeAction,
    pub previous: Option<R>,
    /// Delivered immediately, before the fetch (two-phase updates).
    pub optimistic: Option<Delivery<R>>,
    /// Delivered if the fetch fails.
    pub fallback: Option<Delivery<R>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan<R> {
    Deliver(Delivery<R>),
    Refetch(Refetch<R>),
    Drop(&'static str),
}

/// Decide how to turn an event into a delivery for domain `R`.
pub fn plan<R: DomainRecord>(event: &ChangeEvent) -> Plan<R> {
    if event.channel() != R::CHANNEL {
        return Plan::Drop("event belongs to another channel");
    }

    let payload = &event.payload;

    if event.kind.is_side_channel() {
        let Some(user_id) = payload.user_id() else {
            return Plan::Drop("side-channel event without user_id");
        };
        // The payload's `id` belongs to the meeting/break/clinic row, not the
        // activity row, so there is nothing to fall back to.
        return Plan::Refetch(Refetch {
            lookup: Lookup::ByUserId(user_id),
            action: ChangeAction::Update,
            previous: None,
            optimistic: None,
            fallback: None,
        });
    }

    let row = payload.row_or_fields();
    let key = row_key(row);

    if event.action == ChangeAction::Delete {
        return match key {
            Some(key) => Plan::Deliver(Delivery::Deleted(R::key_only(key))),
            None => Plan::Drop("delete without primary key"),
        };
    }

    let lookup = match (key, payload.user_id()) {
        (Some(key), _) => Lookup::ById(key),
        (None, Some(user_id)) if R::CHANNEL == Channel::Activities => Lookup::ByUserId(user_id),
        _ => return Plan::Drop("row without primary key"),
    };

    let previous = payload
        .previous_row()
        .and_then(|prev| decode_row::<R>(prev).ok());
    let decoded = key.and_then(|_| decode_row::<R>(row).ok());
    let complete = missing_render_fields::<R>(row).is_empty();

    if complete {
        if let Some(record) = decoded.clone() {
            return Plan::Deliver(match event.action {
                ChangeAction::Insert => Delivery::Created(record),
                _ => Delivery::Updated(Updated {
                    record,
                    previous,
                    partial: false,
                }),
            });
        }
    }

    let thin = decoded.map(|record| match event.action {
        ChangeAction::Insert => Delivery::Created(record),
        _ => Delivery::Updated(Updated {
            record,
            previous: previous.clone(),
            partial: true,
        }),
    });

    let two_phase = R::TWO_PHASE && event.action == ChangeAction::Update;
    let (optimistic, fallback) = if two_phase { (thin, None) } else { (None, thin) };

    Plan::Refetch(Refetch {
        lookup,
        action: event.action,
        previous,
        optimistic,
        fallback,
    })
}

/// Runs re-fetches against a record source.
pub struct Reconciler {
    source: Arc<dyn RecordSource>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(source: Arc<dyn RecordSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    async fn fetch(&self, channel: Channel) -> Result<Vec<Value>, RealtimeError> {
        match tokio::time::timeout(self.timeout, self.source.fetch_collection(channel)).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Timeout(self.timeout)),
        }
    }

    /// Execute a re-fetch and produce the hydrated delivery.
    ///
    /// `None` means nothing should be delivered: the row was not found in
    /// the fresh collection, or the fetch failed without a fallback.
    pub async fn resolve<R: DomainRecord>(&self, refetch: Refetch<R>) -> Option<Delivery<R>> {
        let rows = match self.fetch(R::CHANNEL).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    component = "reconcile",
                    event = "reconcile.refetch.failed",
                    channel = %R::CHANNEL,
                    lookup = ?refetch.lookup,
                    has_fallback = refetch.fallback.is_some(),
                    error = %e,
                    "Re-fetch failed"
                );
                return refetch.fallback;
            }
        };

        let Some(row) = rows.iter().find(|row| refetch.lookup.matches(row)) else {
            warn!(
                component = "reconcile",
                event = "reconcile.refetch.not_found",
                channel = %R::CHANNEL,
                lookup = ?refetch.lookup,
                rows = rows.len(),
                "Changed row missing from re-fetched collection, dropping"
            );
            return None;
        };

        let record: R = match serde_json::from_value(row.clone()) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    component = "reconcile",
                    event = "reconcile.refetch.decode_failed",
                    channel = %R::CHANNEL,
                    lookup = ?refetch.lookup,
                    error = %e,
                    "Re-fetched row did not decode"
                );
                return refetch.fallback;
            }
        };

        debug!(
            component = "reconcile",
            event = "reconcile.refetch.hydrated",
            channel = %R::CHANNEL,
            key = record.key(),
        );

        Some(match refetch.action {
            ChangeAction::Insert => Delivery::Created(record),
            _ => Delivery::Updated(Updated {
                record,
                previous: refetch.previous,
                partial: false,
            }),
        })
    }
}
