//! Fan-out of state snapshots to observers.
//!
//! Sinks are called synchronously with every published snapshot, in
//! publication order. A sink that errors or panics is logged and skipped;
//! it never affects the session or the other sinks. Async consumers can
//! follow the latest snapshot through a watch channel instead.

use anyhow::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::snapshot::SessionSnapshot;

/// Observer of session state changes
///
/// Called while the session state is locked; implementations must return
/// quickly and must not call back into the recorder.
pub trait NotificationSink: Send + Sync {
    fn on_state_change(&self, snapshot: &SessionSnapshot) -> Result<()>;
}

impl<F> NotificationSink for F
where
    F: Fn(&SessionSnapshot) -> Result<()> + Send + Sync,
{
    fn on_state_change(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self(snapshot)
    }
}

pub struct Notifier {
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    latest: watch::Sender<SessionSnapshot>,
}

impl Notifier {
    pub fn new(initial: SessionSnapshot) -> Self {
        let (latest, _) = watch::channel(initial);
        Self {
            sinks: RwLock::new(Vec::new()),
            latest,
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sink);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.latest.subscribe()
    }

    pub fn publish(&self, snapshot: SessionSnapshot) {
        let sinks: Vec<Arc<dyn NotificationSink>> = self
            .sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for sink in sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.on_state_change(&snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Notification sink failed: {:#}", e),
                Err(_) => warn!("Notification sink panicked"),
            }
        }

        self.latest.send_replace(snapshot);
    }
}
