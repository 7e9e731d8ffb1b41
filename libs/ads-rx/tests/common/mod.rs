//! Shared fixtures for the client integration tests

#![allow(dead_code)]

use ads_rx::sim::SimController;
use ads_rx::{
    AdsRxClient, AdsRxError, ClientOptions, InitReport, Notification, PlcValue, Settings,
    SymbolDescriptor, WriteVariable,
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Controller with a small symbol table and running services
pub fn controller() -> SimController {
    let controller = SimController::new().with_symbols([
        SymbolDescriptor::primitive("Tag1", "DINT"),
        SymbolDescriptor::primitive("Flag", "BOOL"),
        SymbolDescriptor::primitive("Counter", "DINT"),
        SymbolDescriptor::primitive("Values", "ARRAY [0..9] OF REAL"),
        SymbolDescriptor::primitive("Name", "STRING(20)"),
        SymbolDescriptor::compound(
            "Drive",
            "ST_Drive",
            vec![
                SymbolDescriptor::primitive("Enable", "BOOL"),
                SymbolDescriptor::primitive("Speed", "REAL"),
            ],
        ),
        SymbolDescriptor::primitive("A", "DINT"),
        SymbolDescriptor::primitive("B", "DINT"),
        SymbolDescriptor::primitive("C", "DINT"),
        SymbolDescriptor::primitive("D", "DINT"),
    ]);
    controller
        .set_value(".Tag1", PlcValue::DInt(42))
        .expect("seed .Tag1");
    controller
}

pub fn client(controller: &SimController) -> AdsRxClient {
    AdsRxClient::builder(controller.transport_factory())
        .service_monitor(controller.service_monitor())
        .options(ClientOptions::default())
        .build()
}

pub fn settings(notifications: Vec<Notification>, writes: Vec<WriteVariable>) -> Settings {
    Settings {
        port: 851,
        notifications,
        write_variables: writes,
        settings_id: Some("integration".to_string()),
        ..Settings::default()
    }
}

pub async fn wait_ready(init: &mut broadcast::Receiver<InitReport>) -> InitReport {
    timeout(Duration::from_secs(2), init.recv())
        .await
        .expect("initialization did not complete in time")
        .expect("init stream closed")
}

/// Next diagnostic matching `pred`, skipping others
pub async fn wait_error<F>(errors: &mut broadcast::Receiver<AdsRxError>, within: Duration, pred: F) -> AdsRxError
where
    F: Fn(&AdsRxError) -> bool,
{
    timeout(within, async {
        loop {
            let err = errors.recv().await.expect("error stream closed");
            if pred(&err) {
                return err;
            }
        }
    })
    .await
    .expect("expected diagnostic was not reported")
}
