//! Pause gate, typed observers and structured writes

mod common;

use ads_rx::{AdsRxError, Notification, PlcValue, WriteVariable};
use common::{client, controller, settings, wait_ready};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

#[tokio::test(start_paused = true)]
async fn test_pause_resumes_after_duration() {
    let plc = controller();
    let client = client(&plc);
    let mut changes = client.paused_changes();
    assert!(!*changes.borrow_and_update());

    let started = Instant::now();
    client.pause(Duration::from_millis(200));
    assert!(client.is_paused());

    changes.changed().await.unwrap();
    assert!(*changes.borrow_and_update());

    timeout(Duration::from_millis(250), client.wait_resumed())
        .await
        .expect("pause did not end");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    assert!(!client.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_newer_pause_supersedes_older() {
    let plc = controller();
    let client = client(&plc);

    client.pause(Duration::from_millis(100));
    sleep(Duration::from_millis(50)).await;
    client.pause(Duration::from_millis(200));

    sleep(Duration::from_millis(100)).await;
    assert!(client.is_paused());

    sleep(Duration::from_millis(160)).await;
    assert!(!client.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_observe_as_converts_values() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut values = Box::pin(client.observe_as::<i32>(".tag1"));
    let mut flags = Box::pin(client.observe_as::<i32>(".Flag"));

    client
        .connect(settings(
            vec![Notification::new(100, ".Tag1"), Notification::new(100, ".Flag")],
            Vec::new(),
        ))
        .await;
    wait_ready(&mut init).await;

    let value = timeout(Duration::from_millis(250), values.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(value, 42);

    let mismatch = timeout(Duration::from_millis(250), flags.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(mismatch, Err(AdsRxError::TypeMismatch { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_observe_with_id_only_sees_its_reads() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut tagged = Box::pin(client.observe_with_id(".Tag1", "mine"));

    client
        .connect(settings(vec![Notification::new(100, ".Tag1")], Vec::new()))
        .await;
    wait_ready(&mut init).await;

    // polled events carry no id and must be filtered out
    sleep(Duration::from_millis(250)).await;
    client.read(".Tag1", None, Some("other"));
    client.read(".Tag1", None, Some("mine"));

    let value = timeout(Duration::from_secs(1), tagged.next()).await.unwrap().unwrap();
    assert_eq!(value, PlcValue::DInt(42));
}

#[tokio::test(start_paused = true)]
async fn test_struct_view_writes_updated_fields() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut acks = client.on_write();
    let view = client.create_struct(".Drive");

    client
        .connect(settings(vec![Notification::new(100, ".Drive")], Vec::new()))
        .await;
    wait_ready(&mut init).await;

    let first = timeout(Duration::from_millis(250), view.structure_ready())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.path("Speed"), Some(&PlcValue::Real(0.0)));
    assert_eq!(view.variable(), ".DRIVE");

    view.write_values(|value| value.set_path("Speed", PlcValue::Real(5.0)))
        .await
        .unwrap();
    assert_eq!(
        timeout(Duration::from_secs(1), acks.recv()).await.unwrap().unwrap(),
        "Success"
    );

    let stored = plc.value(".Drive").unwrap();
    assert_eq!(stored.path("speed"), Some(&PlcValue::Real(5.0)));
    assert_eq!(stored.path("Enable"), Some(&PlcValue::Bool(false)));
}

#[tokio::test(start_paused = true)]
async fn test_struct_view_rejects_mismatched_update() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let view = client.create_struct(".Drive");

    client
        .connect(settings(vec![Notification::new(100, ".Drive")], Vec::new()))
        .await;
    wait_ready(&mut init).await;
    timeout(Duration::from_millis(250), view.structure_ready())
        .await
        .unwrap()
        .unwrap();

    let result = view
        .write_values(|value| value.set_path("Speed", PlcValue::Bool(true)))
        .await;
    assert!(matches!(result, Err(AdsRxError::TypeMismatch { .. })), "{result:?}");
    assert_eq!(plc.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_struct_write_fails_while_not_connected() {
    let plc = controller();
    let client = client(&plc);
    let view = client.create_struct(".Drive");

    let result = timeout(
        Duration::from_millis(50),
        view.write_values(|value| value.set_path("Speed", PlcValue::Real(1.0))),
    )
    .await
    .expect("write must not wait for a connection");
    assert_eq!(result, Err(AdsRxError::NotConnected));

    let result = timeout(
        Duration::from_millis(50),
        view.write_values_paused(Duration::from_millis(300), |_| Ok(())),
    )
    .await
    .unwrap();
    assert_eq!(result, Err(AdsRxError::NotConnected));
    assert!(!client.is_paused());
    assert_eq!(plc.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_struct_write_fails_before_first_value() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    // nothing polls .Drive, so the view never receives a value
    let view = client.create_struct(".Drive");

    client
        .connect(settings(Vec::new(), Vec::new()))
        .await;
    wait_ready(&mut init).await;
    assert!(view.latest().is_none());

    let result = timeout(Duration::from_millis(50), view.write_values(|_| Ok(())))
        .await
        .expect("write must not wait for a value");
    assert_eq!(result, Err(AdsRxError::NoValue(".DRIVE".to_string())));

    let result = timeout(
        Duration::from_millis(50),
        view.write_values_paused(Duration::from_millis(300), |_| Ok(())),
    )
    .await
    .unwrap();
    assert_eq!(result, Err(AdsRxError::NoValue(".DRIVE".to_string())));
    assert!(!client.is_paused());
    assert_eq!(plc.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_paused_struct_write_opens_a_pause() {
    let plc = controller();
    let client = client(&plc);
    let mut init = client.initialize_complete();
    let mut acks = client.on_write();
    let view = client.create_struct(".Drive");

    client
        .connect(settings(
            vec![Notification::new(100, ".Drive")],
            vec![WriteVariable::new(".Flag")],
        ))
        .await;
    wait_ready(&mut init).await;
    timeout(Duration::from_millis(250), view.structure_ready())
        .await
        .unwrap()
        .unwrap();

    view.write_values_paused(Duration::from_millis(300), |value| {
        value.set_path("Enable", PlcValue::Bool(true))
    })
    .await
    .unwrap();
    assert!(client.is_paused());
    assert_eq!(acks.recv().await.unwrap(), "Success");
    assert_eq!(
        plc.value(".Drive").unwrap().path("Enable"),
        Some(&PlcValue::Bool(true))
    );

    sleep(Duration::from_millis(350)).await;
    assert!(!client.is_paused());
}
