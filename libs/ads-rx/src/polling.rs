//! Polling scheduler
//!
//! One interval task per configured notification. Tasks are started once the
//! attempt reaches `Ready` and live in the attempt's task set.

use errors::AdsRxError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::Diagnostics;
use crate::router::{ReadRequest, RequestRouter};
use crate::session::Session;
use crate::settings::Notification;

/// Context shared by the poll task of one notification
struct PollingContext {
    notification: Notification,
    session: Arc<Session>,
    router: RequestRouter,
    diagnostics: Diagnostics,
}

impl PollingContext {
    /// Work for one tick
    fn tick(&self) {
        if !self.session.transport().is_connected() {
            trace!("Skipping poll of {}, not connected", self.notification.variable);
            return;
        }

        let request = {
            let handles = self.session.handles().read();
            let Some((_, entry)) = handles.resolve(&self.notification.variable) else {
                return;
            };
            let (Some(handle), Some(ty)) = (entry.handle, entry.ty.clone()) else {
                return;
            };

            if ty.is_array_like() {
                match entry.array_len {
                    Some(len) => match ty.sized_for_read(&self.notification.variable, len) {
                        Ok(ty) => ReadRequest {
                            handle,
                            ty,
                            length: Some(len),
                            id: None,
                        },
                        Err(e) => {
                            self.diagnostics.report(e);
                            return;
                        },
                    },
                    None => {
                        self.diagnostics.report(AdsRxError::MissingArrayLength {
                            variable: self.notification.variable.clone(),
                        });
                        return;
                    },
                }
            } else {
                ReadRequest {
                    handle,
                    ty,
                    length: None,
                    id: None,
                }
            }
        };

        if let Err(e) = self.router.read(request) {
            self.diagnostics.report(e);
        }
    }
}

/// Spawn one poll task per notification
pub fn start_polling(
    notifications: &[Notification],
    session: &Arc<Session>,
    router: &RequestRouter,
    diagnostics: &Diagnostics,
    tasks: &mut JoinSet<()>,
    cancel: &CancellationToken,
) {
    for notification in notifications {
        let period = Duration::from_millis(notification.update_rate_ms.max(1));
        let ctx = PollingContext {
            notification: notification.clone(),
            session: Arc::clone(session),
            router: router.clone(),
            diagnostics: diagnostics.clone(),
        };
        let cancel = cancel.clone();

        debug!("Polling {} every {:?}", notification.variable, period);
        tasks.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => ctx.tick(),
                }
            }
            debug!("Polling of {} stopped", ctx.notification.variable);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VariableCatalog;
    use crate::events::EventHub;
    use crate::sim::SimController;
    use crate::transport::{SymbolDescriptor, TransportFactory};
    use crate::value::{PlcType, PlcValue};

    async fn session_with(controller: &SimController, variable: &str, ty: PlcType, len: Option<usize>) -> Arc<Session> {
        let transport = controller.transport_factory().create();
        transport.connect(None, 851).await.unwrap();
        let catalog = VariableCatalog::load(transport.as_ref()).await.unwrap();
        let session = Arc::new(Session::new(transport, catalog));
        session
            .registrar()
            .try_register_read_write(variable, ty, len)
            .await
            .unwrap();
        session.mark_initialized();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_scalar_read_every_interval() {
        let controller = SimController::new();
        controller.add_symbol(SymbolDescriptor::primitive("Tag1", "DINT"));
        controller.set_value(".Tag1", PlcValue::DInt(3)).unwrap();
        let session = session_with(&controller, ".Tag1", PlcType::DInt, None).await;

        let hub = EventHub::new(64);
        let mut data = hub.data();
        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        let router = RequestRouter::spawn(Arc::clone(&session), hub.clone(), &mut tasks, cancel.clone());
        start_polling(
            &[Notification::new(100, ".Tag1")],
            &session,
            &router,
            &hub.diagnostics,
            &mut tasks,
            &cancel,
        );

        for _ in 0..3 {
            let event = data.recv().await.unwrap();
            assert_eq!(event.variable, ".TAG1");
            assert_eq!(event.id, None);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(controller.reads_of(".Tag1") >= 3);

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_array_without_length_reports_every_tick() {
        let controller = SimController::new();
        controller.add_symbol(SymbolDescriptor::primitive("Values", "ARRAY [0..9] OF REAL"));
        let ty = PlcType::from_plc_name("ARRAY [0..9] OF REAL").unwrap();
        let session = session_with(&controller, ".Values", ty, None).await;

        let hub = EventHub::new(64);
        let mut errors = hub.errors();
        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        let router = RequestRouter::spawn(Arc::clone(&session), hub.clone(), &mut tasks, cancel.clone());
        start_polling(
            &[Notification::new(100, ".Values")],
            &session,
            &router,
            &hub.diagnostics,
            &mut tasks,
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        let mut reported = 0;
        while let Ok(err) = errors.try_recv() {
            assert!(matches!(err, AdsRxError::MissingArrayLength { .. }));
            reported += 1;
        }
        assert_eq!(reported, 3);
        assert_eq!(controller.reads_of(".Values"), 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_array_with_length_is_read() {
        let controller = SimController::new();
        controller.add_symbol(SymbolDescriptor::primitive("Values", "ARRAY [0..3] OF INT"));
        controller.set_value(".Values", PlcValue::from(vec![1i16, 2, 3, 4])).unwrap();
        let ty = PlcType::from_plc_name("ARRAY [0..3] OF INT").unwrap();
        let session = session_with(&controller, ".Values", ty, Some(4)).await;

        let hub = EventHub::new(64);
        let mut data = hub.data();
        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        let router = RequestRouter::spawn(Arc::clone(&session), hub.clone(), &mut tasks, cancel.clone());
        start_polling(
            &[Notification::new(50, ".Values").with_array_size(4)],
            &session,
            &router,
            &hub.diagnostics,
            &mut tasks,
            &cancel,
        );

        let event = data.recv().await.unwrap();
        assert_eq!(event.value, PlcValue::from(vec![1i16, 2, 3, 4]));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflowing_length_is_reported_not_read() {
        let controller = SimController::new();
        controller.add_symbol(SymbolDescriptor::primitive("Values", "ARRAY [0..3] OF LREAL"));
        let ty = PlcType::from_plc_name("ARRAY [0..3] OF LREAL").unwrap();
        let session = session_with(&controller, ".Values", ty, Some(usize::MAX)).await;

        let hub = EventHub::new(64);
        let mut errors = hub.errors();
        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        let router = RequestRouter::spawn(Arc::clone(&session), hub.clone(), &mut tasks, cancel.clone());
        start_polling(
            &[Notification::new(100, ".Values").with_array_size(usize::MAX)],
            &session,
            &router,
            &hub.diagnostics,
            &mut tasks,
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let err = errors.try_recv().unwrap();
        assert!(matches!(err, AdsRxError::InvalidConfig { .. }), "{err:?}");
        assert_eq!(controller.reads_of(".Values"), 0);
        cancel.cancel();
    }
}
