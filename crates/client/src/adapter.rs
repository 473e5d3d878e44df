//! Per-domain adapters: generic change events in, typed
//! created/updated/deleted callbacks out.

use std::sync::Arc;

use deskpulse_protocol::Channel;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::reconcile::{plan, Delivery, Plan, Reconciler, Updated};
use crate::record::DomainRecord;
use crate::registry::{Liveness, Subscriber};
use crate::router::ChangeEvent;

type RecordHandler<R> = Arc<dyn Fn(R) + Send + Sync>;
type UpdateHandler<R> = Arc<dyn Fn(Updated<R>) + Send + Sync>;

/// Receives "created" records from subscriptions with notifications enabled.
pub trait Notifier: Send + Sync {
    fn notify(&self, channel: Channel, text: &str);
}

/// Default notifier: a structured log line.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, channel: Channel, text: &str) {
        info!(
            component = "notifier",
            event = "notification.created",
            channel = %channel,
            text = %text,
        );
    }
}

/// What a consumer registers for one domain.
pub struct SubscribeOptions<R> {
    on_created: Option<RecordHandler<R>>,
    on_updated: Option<UpdateHandler<R>>,
    on_deleted: Option<RecordHandler<R>>,
    pub enable_notifications: bool,
    pub role_filter: Option<String>,
}

impl<R> Default for SubscribeOptions<R> {
    fn default() -> Self {
        Self {
            on_created: None,
            on_updated: None,
            on_deleted: None,
            enable_notifications: false,
            role_filter: None,
        }
    }
}

impl<R: DomainRecord> SubscribeOptions<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_created(mut self, f: impl Fn(R) + Send + Sync + 'static) -> Self {
        self.on_created = Some(Arc::new(f));
        self
    }

    pub fn on_updated(mut self, f: impl Fn(Updated<R>) + Send + Sync + 'static) -> Self {
        self.on_updated = Some(Arc::new(f));
        self
    }

    pub fn on_deleted(mut self, f: impl Fn(R) + Send + Sync + 'static) -> Self {
        self.on_deleted = Some(Arc::new(f));
        self
    }

    pub fn notifications(mut self, enabled: bool) -> Self {
        self.enable_notifications = enabled;
        self
    }

    pub fn role_filter(mut self, role: Option<String>) -> Self {
        self.role_filter = role.filter(|r| !r.trim().is_empty());
        self
    }

    /// Route all three callbacks into a channel, for consumers that apply
    /// deliveries from their own loop.
    pub fn forward_to(self, tx: mpsc::UnboundedSender<Delivery<R>>) -> Self {
        let created = tx.clone();
        let updated = tx.clone();
        self.on_created(move |r| {
            let _ = created.send(Delivery::Created(r));
        })
        .on_updated(move |u| {
            let _ = updated.send(Delivery::Updated(u));
        })
        .on_deleted(move |r| {
            let _ = tx.send(Delivery::Deleted(r));
        })
    }
}

struct AdapterInner<R> {
    options: SubscribeOptions<R>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
}

impl<R: DomainRecord> AdapterInner<R> {
    fn deliver(&self, delivery: Delivery<R>) {
        if let Some(role) = self.options.role_filter.as_deref() {
            let visible = match &delivery {
                Delivery::Created(r) => r.matches_role(role),
                // A partial patch may not carry the role columns
                Delivery::Updated(u) => u.partial || u.record.matches_role(role),
                Delivery::Deleted(_) => true,
            };
            if !visible {
                debug!(
                    component = "adapter",
                    event = "adapter.delivery.role_filtered",
                    channel = %R::CHANNEL,
                    key = delivery.key(),
                    role = %role,
                );
                return;
            }
        }

        match delivery {
            Delivery::Created(record) => {
                if self.options.enable_notifications {
                    self.notifier
                        .notify(R::CHANNEL, &record.notification_text());
                }
                if let Some(handler) = &self.options.on_created {
                    handler(record);
                }
            }
            Delivery::Updated(update) => {
                if let Some(handler) = &self.options.on_updated {
                    handler(update);
                }
            }
            Delivery::Deleted(record) => {
                if let Some(handler) = &self.options.on_deleted {
                    handler(record);
                }
            }
        }
    }
}

/// Subscriber translating one domain's events into typed callbacks.
pub struct DomainAdapter<R> {
    inner: Arc<AdapterInner<R>>,
}

impl<R: DomainRecord> DomainAdapter<R> {
    pub fn new(
        options: SubscribeOptions<R>,
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                options,
                reconciler,
                notifier,
            }),
        }
    }
}

impl<R: DomainRecord> Subscriber for DomainAdapter<R> {
    fn on_change(&self, event: &Arc<ChangeEvent>, liveness: &Liveness) {
        match plan::<R>(event) {
            Plan::Deliver(delivery) => self.inner.deliver(delivery),
            Plan::Refetch(mut refetch) => {
                if let Some(optimistic) = refetch.optimistic.take() {
                    self.inner.deliver(optimistic);
                }

                let inner = self.inner.clone();
                let liveness = liveness.clone();
                let kind = event.kind;
                tokio::spawn(async move {
                    let resolved = inner.reconciler.resolve(refetch).await;
                    if !liveness.is_alive() {
                        debug!(
                            component = "adapter",
                            event = "adapter.refetch.discarded",
                            channel = %R::CHANNEL,
                            kind = %kind,
                            "Subscriber gone before re-fetch resolved"
                        );
                        return;
                    }
                    if let Some(delivery) = resolved {
                        inner.deliver(delivery);
                    }
                });
            }
            Plan::Drop(reason) => {
                debug!(
                    component = "adapter",
                    event = "adapter.event.dropped",
                    channel = %R::CHANNEL,
                    kind = %event.kind,
                    reason = reason,
                );
            }
        }
    }
}
