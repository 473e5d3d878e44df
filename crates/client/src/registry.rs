//! Subscriber registry — many logical listeners multiplexed over one socket.
//!
//! Dispatch works on a snapshot taken under the lock, so callbacks may
//! register or unregister (themselves or others) while an event is in flight.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use deskpulse_protocol::Channel;
use tracing::{debug, error};

use crate::router::ChangeEvent;

/// Receives every dispatched event that passes its filter.
pub trait Subscriber: Send + Sync {
    fn on_change(&self, event: &Arc<ChangeEvent>, liveness: &Liveness);
}

impl<F> Subscriber for F
where
    F: Fn(&Arc<ChangeEvent>, &Liveness) + Send + Sync,
{
    fn on_change(&self, event: &Arc<ChangeEvent>, liveness: &Liveness) {
        self(event, liveness)
    }
}

/// Cleared when the registration is removed. Work started on behalf of a
/// subscriber checks it before delivering late results.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainFilter {
    Any,
    Channel(Channel),
}

impl DomainFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            DomainFilter::Any => true,
            DomainFilter::Channel(channel) => event.channel() == *channel,
        }
    }
}

struct Entry {
    id: SubscriptionId,
    filter: DomainFilter,
    subscriber: Arc<dyn Subscriber>,
    liveness: Liveness,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscriber. Registering the same `Arc` again returns a
    /// handle to the existing registration instead of adding a duplicate.
    pub fn register(
        self: &Arc<Self>,
        filter: DomainFilter,
        subscriber: Arc<dyn Subscriber>,
    ) -> Subscription {
        let mut entries = self.entries();

        if let Some(existing) = entries
            .iter()
            .find(|e| same_subscriber(&e.subscriber, &subscriber))
        {
            return Subscription {
                id: existing.id,
                registry: Arc::downgrade(self),
                liveness: existing.liveness.clone(),
            };
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let liveness = Liveness::new();
        entries.push(Entry {
            id,
            filter,
            subscriber,
            liveness: liveness.clone(),
        });
        debug!(
            component = "registry",
            event = "registry.subscriber.added",
            subscription_id = id.0,
            subscribers = entries.len(),
        );

        Subscription {
            id,
            registry: Arc::downgrade(self),
            liveness,
        }
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries();
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = entries.remove(index);
        entry.liveness.revoke();
        debug!(
            component = "registry",
            event = "registry.subscriber.removed",
            subscription_id = id.0,
            subscribers = entries.len(),
        );
        true
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Invoke every matching subscriber once. A panicking subscriber is
    /// logged and skipped. Returns the number of subscribers that completed.
    pub fn dispatch(&self, event: &Arc<ChangeEvent>) -> usize {
        let snapshot: Vec<(SubscriptionId, Arc<dyn Subscriber>, Liveness)> = self
            .entries()
            .iter()
            .filter(|e| e.filter.matches(event))
            .map(|e| (e.id, e.subscriber.clone(), e.liveness.clone()))
            .collect();

        let mut delivered = 0;
        for (id, subscriber, liveness) in snapshot {
            // Removed by an earlier callback in this same dispatch
            if !liveness.is_alive() {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| subscriber.on_change(event, &liveness)));
            match result {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    error!(
                        component = "registry",
                        event = "registry.subscriber.panicked",
                        subscription_id = id.0,
                        kind = %event.kind,
                        panic = %panic_message(&panic),
                        "Subscriber panicked during dispatch"
                    );
                }
            }
        }
        delivered
    }
}

fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Registration handle. Dropping it unregisters.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<SubscriberRegistry>,
    liveness: Liveness,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Idempotent.
    pub fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
        self.liveness.revoke();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpulse_protocol::{ChangeKind, ChangePayload};
    use std::sync::atomic::AtomicUsize;

    fn event(kind: ChangeKind) -> Arc<ChangeEvent> {
        Arc::new(ChangeEvent::new(kind, ChangePayload::default()))
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn Subscriber>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        let sub: Arc<dyn Subscriber> = Arc::new(move |_: &Arc<ChangeEvent>, _: &Liveness| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (hits, sub)
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (first_hits, first) = counter();
        let (last_hits, last) = counter();

        let _a = registry.register(DomainFilter::Any, first);
        let _b = registry.register(
            DomainFilter::Any,
            Arc::new(|_: &Arc<ChangeEvent>, _: &Liveness| panic!("consumer bug")),
        );
        let _c = registry.register(DomainFilter::Any, last);

        let delivered = registry.dispatch(&event(ChangeKind::TicketCreated));

        assert_eq!(delivered, 2);
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(last_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_subscriber_registered_twice_runs_once() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (hits, sub) = counter();

        let first = registry.register(DomainFilter::Any, sub.clone());
        let second = registry.register(DomainFilter::Any, sub);
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);

        registry.dispatch(&event(ChangeKind::EventDeleted));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_is_idempotent_and_stops_delivery() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (hits, sub) = counter();
        let subscription = registry.register(DomainFilter::Any, sub);

        subscription.unregister();
        subscription.unregister();
        assert!(!subscription.is_active());
        assert!(!registry.unregister(subscription.id()));

        registry.dispatch(&event(ChangeKind::TicketUpdated));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropping_the_handle_unregisters() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (_hits, sub) = counter();
        {
            let _subscription = registry.register(DomainFilter::Any, sub);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn filter_limits_delivery_to_one_channel() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (ticket_hits, tickets) = counter();
        let _s = registry.register(DomainFilter::Channel(Channel::Tickets), tickets);

        registry.dispatch(&event(ChangeKind::EventCreated));
        registry.dispatch(&event(ChangeKind::TicketCreated));
        assert_eq!(ticket_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_during_dispatch_sees_only_later_events() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (late_hits, late) = counter();
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::default();

        let registry_for_cb = registry.clone();
        let held_for_cb = held.clone();
        let _outer = registry.register(
            DomainFilter::Any,
            Arc::new(move |_: &Arc<ChangeEvent>, _: &Liveness| {
                let sub = registry_for_cb.register(DomainFilter::Any, late.clone());
                held_for_cb.lock().unwrap().push(sub);
            }),
        );

        registry.dispatch(&event(ChangeKind::ClientCreated));
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        registry.dispatch(&event(ChangeKind::ClientCreated));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_during_dispatch_skips_the_removed_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (victim_hits, victim) = counter();
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::default();

        let slot = victim_slot.clone();
        let _killer = registry.register(
            DomainFilter::Any,
            Arc::new(move |_: &Arc<ChangeEvent>, _: &Liveness| {
                if let Some(sub) = slot.lock().unwrap().take() {
                    sub.unregister();
                }
            }),
        );
        *victim_slot.lock().unwrap() = Some(registry.register(DomainFilter::Any, victim));

        registry.dispatch(&event(ChangeKind::MemberUpdated));
        assert_eq!(victim_hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }
}
