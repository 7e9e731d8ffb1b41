//! Published events and the diagnostic sink

use errors::AdsRxError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::value::PlcValue;

/// One value read from the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEvent {
    /// Upper-cased variable path as registered
    pub variable: String,
    pub value: PlcValue,
    /// Correlation id of the read request, `None` for polled reads
    pub id: Option<String>,
}

/// Published once per attempt when initialization completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub settings_id: Option<String>,
    /// Attempt number since the client connected
    pub attempt: u64,
    /// Upper-cased variables that received a handle
    pub variables: Vec<String>,
}

/// Write acknowledgement token for a successful write
pub fn success_token(id: Option<&str>) -> String {
    match id {
        Some(id) => format!("Success,{}", id),
        None => "Success".to_string(),
    }
}

/// Diagnostic error stream
///
/// Reporting never fails: with no subscriber the error is only logged.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    tx: broadcast::Sender<AdsRxError>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn report(&self, err: AdsRxError) {
        warn!("[{}] {}", err.error_code(), err);
        let _ = self.tx.send(err);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdsRxError> {
        self.tx.subscribe()
    }
}

/// Streams owned by the client; subscribers survive connection attempts
#[derive(Debug, Clone)]
pub struct EventHub {
    data: broadcast::Sender<DataEvent>,
    acks: broadcast::Sender<String>,
    pub diagnostics: Diagnostics,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (data, _) = broadcast::channel(capacity);
        let (acks, _) = broadcast::channel(capacity);
        Self {
            data,
            acks,
            diagnostics: Diagnostics::new(capacity),
        }
    }

    pub fn publish_data(&self, event: DataEvent) {
        let _ = self.data.send(event);
    }

    pub fn publish_ack(&self, token: String) {
        let _ = self.acks.send(token);
    }

    pub fn report(&self, err: AdsRxError) {
        self.diagnostics.report(err);
    }

    pub fn data(&self) -> broadcast::Receiver<DataEvent> {
        self.data.subscribe()
    }

    pub fn acks(&self) -> broadcast::Receiver<String> {
        self.acks.subscribe()
    }

    pub fn errors(&self) -> broadcast::Receiver<AdsRxError> {
        self.diagnostics.subscribe()
    }
}
