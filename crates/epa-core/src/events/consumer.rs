// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DispatchTable, EventHandlers, Notification};
use crate::error::EpaError;
use crate::hardware::{HardwareImporter, ImportSummary};

/// Event type announcing a host whose files were uploaded.
pub const AGENTS_NEW: &str = "agents.new";

/// Result of one notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A handler ran.
    Applied,
    /// No handler is registered for the event type.
    Ignored,
}

/// Applies control-plane notifications in arrival order.
pub struct NotificationConsumer {
    table: DispatchTable,
    handlers: EventHandlers,
}

impl NotificationConsumer {
    /// Consumer dispatching through `table`.
    pub fn new(table: DispatchTable, handlers: EventHandlers) -> Self {
        Self { table, handlers }
    }

    /// Handle one notification.
    pub async fn handle(&self, notification: &Notification) -> Result<Outcome, EpaError> {
        let Some(action) = self.table.get(&notification.event_type) else {
            debug!(event_type = %notification.event_type, "no handler registered");
            return Ok(Outcome::Ignored);
        };
        self.handlers.handle(action, &notification.payload).await?;
        Ok(Outcome::Applied)
    }

    /// Drain `rx` until every sender is gone. A failing notification is
    /// logged and skipped.
    pub async fn run(self, mut rx: mpsc::Receiver<Notification>) {
        info!(event_types = self.table.len(), "notification consumer started");
        while let Some(notification) = rx.recv().await {
            if let Err(err) = self.handle(&notification).await {
                warn!(event_type = %notification.event_type, %err, "notification failed");
            }
        }
        info!("notification consumer stopped");
    }
}

/// Hardware agent announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event type; only [`AGENTS_NEW`] is acted on.
    pub event_type: String,
    /// Host the files describe.
    pub hostname: String,
    /// Directory holding `<hostname>_*` files.
    pub data_path: PathBuf,
}

/// Imports hardware for announced hosts.
pub struct AgentConsumer {
    importer: HardwareImporter,
}

impl AgentConsumer {
    /// Consumer writing through `importer`.
    pub fn new(importer: HardwareImporter) -> Self {
        Self { importer }
    }

    /// Import the announced host. `None` for other event types.
    pub async fn handle(&self, event: &AgentEvent) -> Result<Option<ImportSummary>, EpaError> {
        if event.event_type != AGENTS_NEW {
            debug!(event_type = %event.event_type, "ignoring agent event");
            return Ok(None);
        }
        let summary = self
            .importer
            .import_dir(&event.data_path, &event.hostname)
            .await?;
        Ok(Some(summary))
    }

    /// Drain `rx` until every sender is gone. A failing import is logged and
    /// skipped.
    pub async fn run(self, mut rx: mpsc::Receiver<AgentEvent>) {
        info!("agent consumer started");
        while let Some(event) = rx.recv().await {
            if let Err(err) = self.handle(&event).await {
                warn!(hostname = %event.hostname, %err, "hardware import failed");
            }
        }
        info!("agent consumer stopped");
    }
}
