//! Stream printers

use ads_rx::{AdsRxClient, DataEvent, InitReport, SupervisorState};
use errors::AdsRxError;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct Printer {
    pub json: bool,
}

impl Printer {
    pub fn data(&self, event: &DataEvent) {
        if self.json {
            self.json_line("data", event);
            return;
        }
        match &event.id {
            Some(id) => println!("{} = {} [{}]", event.variable, event.value, id),
            None => println!("{} = {}", event.variable, event.value),
        }
    }

    pub fn error(&self, err: &AdsRxError) {
        if self.json {
            let body = serde_json::json!({
                "code": err.error_code(),
                "message": err.to_string(),
            });
            self.json_line("error", &body);
            return;
        }
        eprintln!("! [{}] {}", err.error_code(), err);
    }

    pub fn ack(&self, ack: &str) {
        if self.json {
            self.json_line("ack", &ack);
            return;
        }
        println!("ack: {}", ack);
    }

    pub fn init(&self, report: &InitReport) {
        if self.json {
            self.json_line("init", report);
            return;
        }
        println!(
            "initialized ({}, attempt {}): {}",
            report.settings_id.as_deref().unwrap_or("unnamed"),
            report.attempt,
            report.variables.join(", ")
        );
    }

    pub fn state(&self, state: SupervisorState) {
        if self.json {
            self.json_line("state", &state.to_string());
            return;
        }
        println!("state: {}", state);
    }

    fn json_line<T: serde::Serialize + ?Sized>(&self, kind: &str, body: &T) {
        match serde_json::to_value(body) {
            Ok(body) => println!("{}", serde_json::json!({ "kind": kind, "body": body })),
            Err(e) => warn!("Cannot render {} as JSON: {}", kind, e),
        }
    }
}

/// Forward one broadcast stream to the printer until cancelled
fn forward<T, F>(
    tasks: &mut JoinSet<()>,
    cancel: &CancellationToken,
    mut rx: broadcast::Receiver<T>,
    print: F,
) where
    T: Clone + Send + 'static,
    F: Fn(&T) + Send + 'static,
{
    let cancel = cancel.clone();
    tasks.spawn(async move {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = rx.recv() => item,
            };
            match item {
                Ok(item) => print(&item),
                Err(RecvError::Lagged(skipped)) => warn!("Console lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Print every client stream until `cancel` fires
pub fn spawn_printers(client: &AdsRxClient, printer: Printer, cancel: &CancellationToken) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    forward(&mut tasks, cancel, client.data_received(), move |e| printer.data(e));
    forward(&mut tasks, cancel, client.errors(), move |e| printer.error(e));
    forward(&mut tasks, cancel, client.on_write(), move |a| printer.ack(a));
    forward(&mut tasks, cancel, client.initialize_complete(), move |r| printer.init(r));

    let mut state = client.state();
    let cancel = cancel.clone();
    tasks.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    printer.state(current);
                },
            }
        }
    });
    tasks
}
