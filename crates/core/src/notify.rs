//! Post-commit change notification.
//!
//! After a subrecord mutation commits, the controller hands a [`ChangeEvent`] to the
//! [`NotificationDispatcher`], which forwards it to the configured integration transport.
//! Delivery is best-effort: a transport error (or a panicking transport) is logged and
//! swallowed, never reported to the caller whose mutation already succeeded. Events are not
//! retried or queued.

use crate::ids::{EpisodeId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
}

/// Describes one committed mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub record_type: String,
    pub operation: ChangeOperation,
    pub episode_id: EpisodeId,
    pub record_id: RecordId,
    pub username: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("integration endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("failed to write change event: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize change event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivers change events to an external integration system.
pub trait NotificationTransport: Send + Sync {
    fn send(&self, event: &ChangeEvent) -> Result<(), TransportError>;

    /// Short name used in log lines.
    fn name(&self) -> &str;
}

/// Emits each event as a structured log record.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn send(&self, event: &ChangeEvent) -> Result<(), TransportError> {
        tracing::info!(
            record_type = %event.record_type,
            operation = ?event.operation,
            episode_id = %event.episode_id,
            record_id = %event.record_id,
            username = %event.username,
            "subrecord changed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Appends each event as one JSON line to a file an integration engine tails.
#[derive(Debug)]
pub struct JsonLinesTransport {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationTransport for JsonLinesTransport {
    fn send(&self, event: &ChangeEvent) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| TransportError::Unavailable("outbox lock poisoned".into()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

/// Forwards committed change events to a transport, isolating its failures.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    transport: Option<Arc<dyn NotificationTransport>>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// A dispatcher that drops every event.
    pub fn disabled() -> Self {
        Self { transport: None }
    }

    /// Sends one event. Never fails.
    pub fn dispatch(&self, event: &ChangeEvent) {
        let Some(transport) = &self.transport else {
            tracing::debug!(
                record_type = %event.record_type,
                record_id = %event.record_id,
                "integration disabled, change event dropped"
            );
            return;
        };

        let sent = panic::catch_unwind(AssertUnwindSafe(|| transport.send(event)));
        match sent {
            Ok(Ok(())) => tracing::debug!(
                transport = transport.name(),
                record_type = %event.record_type,
                record_id = %event.record_id,
                "change event delivered"
            ),
            Ok(Err(e)) => tracing::warn!(
                transport = transport.name(),
                record_type = %event.record_type,
                record_id = %event.record_id,
                "change event not delivered: {}",
                e
            ),
            Err(_) => tracing::error!(
                transport = transport.name(),
                record_type = %event.record_type,
                record_id = %event.record_id,
                "integration transport panicked"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records every event it is sent, optionally failing each send afterwards.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub events: Mutex<Vec<ChangeEvent>>,
        pub fail: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn events(&self) -> Vec<ChangeEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl NotificationTransport for RecordingTransport {
        fn send(&self, event: &ChangeEvent) -> Result<(), TransportError> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(TransportError::Unavailable("integration offline".into()));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }
}
