//! Handle registration tests
//!
//! Bulk registration during initialization fails the attempt on the first
//! error, runtime registration reports and continues.

mod common;

use ads_rx::{AdsRxError, Notification, PlcType, Registration, SupervisorState, TableKind, WriteVariable};
use common::{client, controller, settings, wait_error, wait_ready};
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn dint(path: &str) -> Registration {
    Registration {
        path: path.to_string(),
        ty: PlcType::DInt,
        kind: TableKind::ReadWrite,
        array_len: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_bulk_failure_aborts_the_attempt() {
    let plc = controller();
    plc.fail_handle(".B");
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut errors = client.errors();

    client
        .connect(settings(
            vec![
                Notification::new(100, ".A"),
                Notification::new(100, ".B"),
                Notification::new(100, ".C"),
            ],
            Vec::new(),
        ))
        .await;

    let err = wait_error(&mut errors, Duration::from_secs(2), |e| {
        matches!(e, AdsRxError::HandleAllocation { .. })
    })
    .await;
    assert!(matches!(err, AdsRxError::HandleAllocation { variable, .. } if variable == ".B"));
    assert_ne!(client.current_state(), SupervisorState::Ready);
    assert!(init.try_recv().is_err());
    assert_eq!(plc.connects(), 1);

    sleep(Duration::from_millis(5500)).await;
    assert_eq!(plc.connects(), 2);
    assert!(init.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_does_not_stop_the_rest() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut errors = client.errors();

    client.connect(settings(Vec::new(), Vec::new())).await;
    wait_ready(&mut init).await;

    plc.fail_handle(".B");
    let handles = client
        .register_batch(&[dint(".A"), dint(".B"), dint(".C")])
        .await;
    assert_eq!(handles.len(), 3);
    assert!(handles[0].is_some());
    assert!(handles[1].is_none());
    assert!(handles[2].is_some());

    let err = timeout(Duration::from_secs(1), errors.recv()).await.unwrap().unwrap();
    assert!(matches!(err, AdsRxError::HandleAllocation { .. }));

    let info = client.handle_info();
    assert!(info.read_write.contains_key(".A"));
    assert!(!info.read_write.contains_key(".B"));
    assert!(info.read_write.contains_key(".C"));
    assert_eq!(client.current_state(), SupervisorState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_declined_handle_is_skipped() {
    let plc = controller();
    plc.decline_handle(".B");
    let client = client(&plc);
    let mut init = client.initialize_complete();

    client
        .connect(settings(
            vec![Notification::new(100, ".A"), Notification::new(100, ".B")],
            vec![WriteVariable::new(".C")],
        ))
        .await;

    let report = wait_ready(&mut init).await;
    assert_eq!(report.variables, vec![".A".to_string(), ".C".to_string()]);

    let info = client.handle_info();
    assert!(info.read_write.contains_key(".A"));
    assert!(!info.read_write.contains_key(".B"));
    assert!(info.write_only.contains_key(".C"));
}

#[tokio::test(start_paused = true)]
async fn test_runtime_registration_is_readable() {
    let plc = controller();
    plc.set_value(".D", 11i32).unwrap();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut data = client.data_received();

    client.connect(settings(Vec::new(), Vec::new())).await;
    wait_ready(&mut init).await;

    let first = client.register_read_write(".D", PlcType::DInt, None).await;
    assert!(first.is_some());
    let again = client.register_read_write(".d", PlcType::DInt, None).await;
    assert_eq!(again, first);

    client.read(".D", None, Some("verify"));
    let event = timeout(Duration::from_secs(1), data.recv()).await.unwrap().unwrap();
    assert_eq!(event.variable, ".D");
    assert_eq!(event.id.as_deref(), Some("verify"));
}

#[tokio::test(start_paused = true)]
async fn test_registration_before_connect_is_reported() {
    let plc = controller();
    let client = client(&plc);
    let mut errors = client.errors();

    let handles = client.register_batch(&[dint(".A"), dint(".B")]).await;
    assert_eq!(handles, vec![None, None]);
    assert_eq!(errors.recv().await.unwrap(), AdsRxError::NotConnected);
}
