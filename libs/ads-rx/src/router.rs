//! Request router
//!
//! Reads and writes are funnelled through two channels, each drained by a
//! single worker task, so the transport never sees concurrent calls from the
//! client. Workers belong to the connection attempt and stop with it.

use errors::AdsRxError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{success_token, DataEvent, EventHub};
use crate::session::Session;
use crate::value::{PlcType, PlcValue};

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub handle: u32,
    pub ty: PlcType,
    /// Element count / string length for array-like types
    pub length: Option<usize>,
    pub id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub handle: u32,
    pub value: PlcValue,
    pub id: Option<String>,
}

/// Sending side of the two request channels
#[derive(Debug, Clone)]
pub struct RequestRouter {
    reads: mpsc::UnboundedSender<ReadRequest>,
    writes: mpsc::UnboundedSender<WriteRequest>,
}

impl RequestRouter {
    /// Start both workers inside the attempt's task set
    pub fn spawn(
        session: Arc<Session>,
        hub: EventHub,
        tasks: &mut JoinSet<()>,
        cancel: CancellationToken,
    ) -> Self {
        let (reads, read_rx) = mpsc::unbounded_channel();
        let (writes, write_rx) = mpsc::unbounded_channel();

        tasks.spawn(read_worker(
            read_rx,
            Arc::clone(&session),
            hub.clone(),
            cancel.clone(),
        ));
        tasks.spawn(write_worker(write_rx, session, hub, cancel));

        Self { reads, writes }
    }

    pub fn read(&self, request: ReadRequest) -> Result<(), AdsRxError> {
        self.reads
            .send(request)
            .map_err(|_| AdsRxError::ConnectionLost("request channel closed".to_string()))
    }

    pub fn write(&self, request: WriteRequest) -> Result<(), AdsRxError> {
        self.writes
            .send(request)
            .map_err(|_| AdsRxError::ConnectionLost("request channel closed".to_string()))
    }
}

async fn read_worker(
    mut rx: mpsc::UnboundedReceiver<ReadRequest>,
    session: Arc<Session>,
    hub: EventHub,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(r) => r,
                None => break,
            },
        };

        let lengths = request.length.map(|len| [len]);
        let result = session
            .transport()
            .read_any(request.handle, &request.ty, lengths.as_ref().map(|l| &l[..]))
            .await;

        match result {
            Ok(value) => {
                let variable = session
                    .handles()
                    .read()
                    .path_for_handle(request.handle)
                    .map(str::to_string);
                match variable {
                    Some(variable) => hub.publish_data(DataEvent {
                        variable,
                        value,
                        id: request.id,
                    }),
                    None => debug!("No variable registered for handle {}, value dropped", request.handle),
                }
            },
            Err(e) => hub.report(AdsRxError::ReadFailed {
                handle: request.handle,
                reason: e.to_string(),
            }),
        }
    }
    debug!("Read worker stopped");
}

async fn write_worker(
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    session: Arc<Session>,
    hub: EventHub,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(r) => r,
                None => break,
            },
        };

        if !session.is_live() {
            debug!("Write to handle {} dropped, connection not ready", request.handle);
            hub.report(AdsRxError::NotConnected);
            continue;
        }

        match session.transport().write_any(request.handle, &request.value).await {
            Ok(()) => {
                debug!("Wrote handle {}", request.handle);
                hub.publish_ack(success_token(request.id.as_deref()));
            },
            Err(e) => {
                let err = AdsRxError::WriteFailed {
                    handle: request.handle,
                    reason: e.to_string(),
                };
                hub.publish_ack(err.to_string());
                hub.report(err);
            },
        }
    }
    debug!("Write worker stopped");
}
