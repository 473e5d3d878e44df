//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use deskpulse_protocol::Channel;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::RealtimeError;
use crate::source::RecordSource;

/// In-memory record source that counts calls and can be held or failed.
#[derive(Default)]
pub(crate) struct FakeSource {
    rows: Mutex<HashMap<Channel, Vec<Value>>>,
    calls: AtomicUsize,
    fail_status: Mutex<Option<u16>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_rows(&self, channel: Channel, rows: Vec<Value>) {
        self.rows.lock().unwrap().insert(channel, rows);
    }

    pub(crate) fn fail_with_status(&self, status: u16) {
        *self.fail_status.lock().unwrap() = Some(status);
    }

    /// Block fetches until a permit is added to the returned semaphore.
    pub(crate) fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecordSource for FakeSource {
    fn fetch_collection(&self, channel: Channel) -> BoxFuture<'_, Result<Vec<Value>, RealtimeError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            if let Some(status) = *self.fail_status.lock().unwrap() {
                return Err(RealtimeError::HttpStatus {
                    status,
                    url: format!("fake://{channel}"),
                });
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&channel)
                .cloned()
                .unwrap_or_default())
        }
        .boxed()
    }
}
