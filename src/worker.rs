// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background execution of sync cycles
//!
//! One worker task consumes cycle requests from a queue with a single slot.
//! While a cycle runs, one more request can wait behind it; anything beyond
//! that is rejected instead of piling up, since a queued cycle already picks
//! up whatever the extra requests wanted.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::http::HttpClient;
use crate::notify::CycleNotifier;
use crate::sync::Syncer;

/// Answer to a cycle request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOutcome {
    /// A cycle will run
    Queued,
    /// A cycle is already waiting; nothing was added
    Busy,
    /// The worker has shut down
    Stopped,
}

/// Handle for requesting cycles from a running worker
#[derive(Clone)]
pub struct CycleTrigger {
    tx: mpsc::Sender<()>,
}

impl CycleTrigger {
    /// A trigger and the single-slot queue it feeds
    pub(crate) fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Ask for a cycle without waiting for it
    pub fn request(&self) -> TriggerOutcome {
        match self.tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(TrySendError::Full(())) => TriggerOutcome::Busy,
            Err(TrySendError::Closed(())) => TriggerOutcome::Stopped,
        }
    }
}

/// The single task running cycles on request
pub struct CycleWorker<C> {
    syncer: Arc<Syncer<C>>,
    notifier: Option<Arc<dyn CycleNotifier>>,
    rx: mpsc::Receiver<()>,
}

impl<C: HttpClient + 'static> CycleWorker<C> {
    pub fn new(syncer: Arc<Syncer<C>>) -> (Self, CycleTrigger) {
        let (trigger, rx) = CycleTrigger::channel();
        let worker = Self {
            syncer,
            notifier: None,
            rx,
        };
        (worker, trigger)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CycleNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Process requests until every [`CycleTrigger`] is dropped
    pub async fn run(mut self) {
        while self.rx.recv().await.is_some() {
            debug!("Starting requested cycle");
            let summary = self.syncer.run_cycle().await;
            if let Some(notifier) = &self.notifier {
                notifier.notify(&summary).await;
            }
        }
        info!("Cycle worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
