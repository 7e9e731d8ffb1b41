//! Structured writes
//!
//! A [`StructView`] tracks the latest value of one (usually structured)
//! variable from the data stream. Writes clone that value, apply the caller's
//! field updates and send the whole value back in one write.

use errors::{AdsRxError, AdsRxResult};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::client::AdsRxClient;
use crate::handles::table_key;
use crate::value::PlcValue;

pub struct StructView {
    client: AdsRxClient,
    variable: String,
    latest: watch::Receiver<Option<PlcValue>>,
    _tracker: DropGuard,
}

impl StructView {
    pub(crate) fn new(client: AdsRxClient, variable: &str, cancel: CancellationToken) -> Self {
        let variable = table_key(variable);
        let (tx, latest) = watch::channel(None);
        let mut data = client.data_received();
        let key = variable.clone();
        let scope = cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = scope.cancelled() => break,
                    event = data.recv() => event,
                };
                match event {
                    Ok(event) if event.variable == key => {
                        tx.send_replace(Some(event.value));
                    },
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("View of {} lagged, {} events skipped", key, skipped);
                    },
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("View of {} closed", key);
        });

        Self {
            client,
            variable,
            latest,
            _tracker: cancel.drop_guard(),
        }
    }

    /// Upper-cased variable path
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Latest value, if one arrived
    pub fn latest(&self) -> Option<PlcValue> {
        self.latest.borrow().clone()
    }

    /// Resolves with the first value (immediately if one already arrived)
    pub async fn structure_ready(&self) -> AdsRxResult<PlcValue> {
        let mut latest = self.latest.clone();
        let value = latest
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AdsRxError::Disposed)?;
        value
            .clone()
            .ok_or_else(|| AdsRxError::Internal(format!("view of {} lost its value", self.variable)))
    }

    /// Clone the latest value, apply `update` and write it back
    ///
    /// Fails at once with `NotConnected` while the client is not ready and
    /// with `NoValue` until the first value arrived; see
    /// [`structure_ready`](Self::structure_ready) to wait for it.
    pub async fn write_values<F>(&self, update: F) -> AdsRxResult<()>
    where
        F: FnOnce(&mut PlcValue) -> AdsRxResult<()>,
    {
        let mut value = self.writable_value()?;
        update(&mut value)?;
        self.client.write(&self.variable, value, None);
        Ok(())
    }

    /// Like [`write_values`](Self::write_values) inside a pause window
    ///
    /// Waits for a running pause to end, otherwise opens a new pause of
    /// `duration` before writing. No pause is opened when the write cannot
    /// happen.
    pub async fn write_values_paused<F>(&self, duration: Duration, update: F) -> AdsRxResult<()>
    where
        F: FnOnce(&mut PlcValue) -> AdsRxResult<()>,
    {
        self.writable_value()?;
        if self.client.is_paused() {
            self.client.wait_resumed().await;
        } else {
            self.client.pause(duration);
        }
        self.write_values(update).await
    }

    fn writable_value(&self) -> AdsRxResult<PlcValue> {
        if !self.client.is_connected() {
            return Err(AdsRxError::NotConnected);
        }
        self.latest().ok_or_else(|| AdsRxError::NoValue(self.variable.clone()))
    }
}
