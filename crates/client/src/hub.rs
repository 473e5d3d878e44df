//! Process-wide hub: one connection manager per channel group, shared by
//! every subscription in the process.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use deskpulse_protocol::Channel;
use tracing::{debug, info};

use crate::adapter::{DomainAdapter, LogNotifier, Notifier, SubscribeOptions};
use crate::config::RealtimeConfig;
use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionState};
use crate::error::RealtimeError;
use crate::reconcile::Reconciler;
use crate::record::DomainRecord;
use crate::registry::{DomainFilter, Subscriber, Subscription};
use crate::source::{RecordSource, RestSource};

static GLOBAL: OnceLock<Arc<RealtimeHub>> = OnceLock::new();

pub struct RealtimeHub {
    config: Arc<RealtimeConfig>,
    source: Arc<dyn RecordSource>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
    groups: DashMap<Channel, Arc<ConnectionManager>>,
}

pub struct RealtimeHubBuilder {
    config: RealtimeConfig,
    source: Option<Arc<dyn RecordSource>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl RealtimeHubBuilder {
    /// Replace the REST source used for re-fetches.
    pub fn source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<RealtimeHub, RealtimeError> {
        let config = Arc::new(self.config);
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(RestSource::new(config.clone())?),
        };
        let reconciler = Arc::new(Reconciler::new(source.clone(), config.refetch_timeout));
        Ok(RealtimeHub {
            config,
            source,
            reconciler,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            groups: DashMap::new(),
        })
    }
}

impl RealtimeHub {
    pub fn builder(config: RealtimeConfig) -> RealtimeHubBuilder {
        RealtimeHubBuilder {
            config,
            source: None,
            notifier: None,
        }
    }

    pub fn new(config: RealtimeConfig) -> Result<Self, RealtimeError> {
        Self::builder(config).build()
    }

    /// Install the process-wide hub. If one is already installed, that one
    /// is kept and returned.
    pub fn install_global(hub: Arc<RealtimeHub>) -> Arc<RealtimeHub> {
        GLOBAL.get_or_init(|| hub).clone()
    }

    /// The process-wide hub, created from `DESKPULSE_*` env vars on first use.
    pub fn global() -> Result<Arc<RealtimeHub>, RealtimeError> {
        if let Some(hub) = GLOBAL.get() {
            return Ok(hub.clone());
        }
        let hub = Arc::new(RealtimeHub::new(RealtimeConfig::from_env())?);
        Ok(Self::install_global(hub))
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Connection manager for a channel group, created on first use.
    pub fn group(&self, channel: Channel) -> Arc<ConnectionManager> {
        self.groups
            .entry(channel)
            .or_insert_with(|| Arc::new(ConnectionManager::new(channel, self.config.clone())))
            .value()
            .clone()
    }

    pub fn get_or_create_connection(
        &self,
        channel: Channel,
    ) -> Result<ConnectionHandle, RealtimeError> {
        self.group(channel).get_or_create_connection()
    }

    /// Register typed handlers for domain `R` and make sure its channel
    /// group is connected.
    pub fn subscribe<R: DomainRecord>(
        &self,
        options: SubscribeOptions<R>,
    ) -> Result<RealtimeSubscription, RealtimeError> {
        let group = self.group(R::CHANNEL);
        let adapter: Arc<dyn Subscriber> = Arc::new(DomainAdapter::new(
            options,
            self.reconciler.clone(),
            self.notifier.clone(),
        ));
        // Register first so the driver never sees an empty group
        let subscription = group
            .registry()
            .register(DomainFilter::Channel(R::CHANNEL), adapter);
        group.get_or_create_connection()?;

        debug!(
            component = "hub",
            event = "hub.subscribe",
            channel = %R::CHANNEL,
            subscribers = group.registry().len(),
        );
        Ok(RealtimeSubscription {
            group,
            subscription,
        })
    }

    pub fn connection_state(&self, channel: Channel) -> Arc<ConnectionState> {
        self.group(channel).state()
    }

    /// Full, render-ready collection for domain `R`.
    pub async fn fetch_all<R: DomainRecord>(&self) -> Result<Vec<R>, RealtimeError> {
        let rows = self.source.fetch_collection(R::CHANNEL).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(RealtimeError::from))
            .collect()
    }

    /// Intentionally close every channel group.
    pub fn disconnect_all(&self) -> usize {
        let closed = self
            .groups
            .iter()
            .filter(|group| group.value().disconnect())
            .count();
        info!(
            component = "hub",
            event = "hub.disconnect_all",
            closed = closed,
        );
        closed
    }
}

/// A consumer's registration. Dropping it unregisters the handlers; the
/// shared connection stays up until explicitly disconnected.
pub struct RealtimeSubscription {
    group: Arc<ConnectionManager>,
    subscription: Subscription,
}

impl RealtimeSubscription {
    pub fn channel(&self) -> Channel {
        self.group.channel()
    }

    pub fn is_connected(&self) -> bool {
        self.group.state().is_connected
    }

    /// Last connection error for the channel group, if any.
    pub fn error(&self) -> Option<String> {
        self.group.state().last_error.clone()
    }

    pub fn state(&self) -> Arc<ConnectionState> {
        self.group.state()
    }

    pub fn connect(&self) -> Result<ConnectionHandle, RealtimeError> {
        self.group.get_or_create_connection()
    }

    /// Intentional close of the shared connection. Other subscribers on the
    /// same group are affected too.
    pub fn disconnect(&self) -> bool {
        self.group.disconnect()
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn unsubscribe(&self) {
        self.subscription.unregister();
    }
}
