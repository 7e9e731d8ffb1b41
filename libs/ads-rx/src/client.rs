//! Public client surface
//!
//! [`AdsRxClient`] owns the published streams and the pause gate, and runs one
//! [`Supervisor`] per `connect`. Calls never fail into caller code; misuse
//! (disposed client, no connection, unknown variable) is reported on the
//! diagnostic stream.

use errors::AdsRxError;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{DataEvent, EventHub, InitReport};
use crate::handles::{table_key, HandleEntry, Registration};
use crate::layout::{LayoutResolver, TypeResolver};
use crate::pause::PauseGate;
use crate::reconnect::{duration_ms, ReconnectPolicy};
use crate::router::{ReadRequest, WriteRequest};
use crate::service::{NoServiceMonitor, ServiceMonitor, ServiceWatch};
use crate::session::LiveSession;
use crate::settings::Settings;
use crate::structured::StructView;
use crate::supervisor::{Shared, Supervisor, SupervisorState};
use crate::transport::TransportFactory;
use crate::value::{PlcType, PlcValue};

/// Tunables of the client itself (as opposed to the connection [`Settings`])
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Period of the service / controller health check
    #[serde(rename = "health_interval_ms", with = "duration_ms")]
    pub health_interval: Duration,
    pub retry: ReconnectPolicy,
    /// Capacity of each broadcast stream
    pub channel_capacity: usize,
    /// Services that must be running; `None` uses the monitor's default set
    pub services: Option<ServiceWatch>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(1),
            retry: ReconnectPolicy::default(),
            channel_capacity: 1024,
            services: None,
        }
    }
}

/// Snapshot of both handle tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleInfo {
    pub read_write: HashMap<String, Option<u32>>,
    pub write_only: HashMap<String, HandleEntry>,
}

pub struct AdsRxClientBuilder {
    factory: Arc<dyn TransportFactory>,
    services: Arc<dyn ServiceMonitor>,
    resolver: Arc<dyn TypeResolver>,
    options: ClientOptions,
}

impl AdsRxClientBuilder {
    pub fn service_monitor(mut self, monitor: impl ServiceMonitor + 'static) -> Self {
        self.services = Arc::new(monitor);
        self
    }

    pub fn type_resolver(mut self, resolver: impl TypeResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> AdsRxClient {
        let capacity = self.options.channel_capacity.max(1);
        let (state, _) = watch::channel(SupervisorState::Disconnected);
        let (init, _) = broadcast::channel(capacity);
        let root = CancellationToken::new();

        AdsRxClient {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    options: self.options,
                    hub: EventHub::new(capacity),
                    state,
                    live: RwLock::new(None),
                    init,
                    factory: self.factory,
                    services: self.services,
                    resolver: self.resolver,
                }),
                pause: PauseGate::new(&root),
                root,
                runner: Mutex::new(None),
                settings: RwLock::new(None),
            }),
        }
    }
}

struct Runner {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    shared: Arc<Shared>,
    pause: PauseGate,
    root: CancellationToken,
    runner: Mutex<Option<Runner>>,
    settings: RwLock<Option<Arc<Settings>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Reactive client for one controller
///
/// Cloning is cheap; all clones share the same connection and streams.
#[derive(Clone)]
pub struct AdsRxClient {
    inner: Arc<Inner>,
}

impl AdsRxClient {
    pub fn builder(factory: impl TransportFactory + 'static) -> AdsRxClientBuilder {
        AdsRxClientBuilder {
            factory: Arc::new(factory),
            services: Arc::new(NoServiceMonitor),
            resolver: Arc::new(LayoutResolver),
            options: ClientOptions::default(),
        }
    }

    /// Client without service monitoring and with the default type resolver
    pub fn new(factory: impl TransportFactory + 'static) -> Self {
        Self::builder(factory).build()
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    fn report(&self, err: AdsRxError) {
        self.shared().hub.report(err);
    }

    fn is_disposed(&self) -> bool {
        self.shared().current_state() == SupervisorState::Disposed
    }

    /// Start supervising a connection; an existing connection is replaced
    pub async fn connect(&self, settings: Settings) {
        if self.is_disposed() {
            self.report(AdsRxError::Disposed);
            return;
        }
        if let Err(e) = settings.validate() {
            self.report(e);
            return;
        }

        self.stop_runner().await;

        let settings = Arc::new(settings);
        *self.inner.settings.write() = Some(Arc::clone(&settings));
        let cancel = self.inner.root.child_token();
        let supervisor = Supervisor::new(
            Arc::clone(&self.inner.shared),
            Arc::clone(&settings),
            cancel.clone(),
        );
        info!(
            "Connecting to {} ({})",
            settings.endpoint(),
            settings.settings_id.as_deref().unwrap_or("unnamed settings")
        );
        let task = tokio::spawn(supervisor.run());
        *self.inner.runner.lock() = Some(Runner { cancel, task });
    }

    async fn stop_runner(&self) {
        let runner = self.inner.runner.lock().take();
        if let Some(runner) = runner {
            runner.cancel.cancel();
            if let Err(e) = runner.task.await {
                warn!("Supervisor task ended abnormally: {}", e);
            }
        }
    }

    /// Stop the connection; streams stay open for a later `connect`
    pub async fn disconnect(&self) {
        self.stop_runner().await;
        self.shared().set_state(SupervisorState::Disconnected);
    }

    /// Stop everything; the client cannot be connected again
    pub async fn dispose(&self) {
        self.stop_runner().await;
        self.inner.pause.shutdown();
        self.inner.root.cancel();
        self.shared().set_state(SupervisorState::Disposed);
        debug!("Client disposed");
    }

    fn live_or_report(&self) -> Option<LiveSession> {
        if self.is_disposed() {
            self.report(AdsRxError::Disposed);
            return None;
        }
        let live = self.shared().live();
        if live.is_none() {
            self.report(AdsRxError::NotConnected);
        }
        live
    }

    /// Request a read; the value arrives on [`data_received`](Self::data_received)
    ///
    /// `array_len` overrides the registered length of array and string types.
    pub fn read(&self, variable: &str, array_len: Option<usize>, id: Option<&str>) {
        let Some(live) = self.live_or_report() else {
            return;
        };

        let request = {
            let handles = live.session.handles().read();
            let Some((_, entry)) = handles.resolve(variable) else {
                self.report(AdsRxError::UnknownVariable(variable.to_string()));
                return;
            };
            let (Some(handle), Some(ty)) = (entry.handle, entry.ty.clone()) else {
                self.report(AdsRxError::TypeResolution {
                    variable: variable.to_string(),
                    reason: "no handle or local type registered".to_string(),
                });
                return;
            };
            let length = if ty.is_array_like() {
                let Some(len) = array_len.or(entry.array_len) else {
                    self.report(AdsRxError::MissingArrayLength {
                        variable: variable.to_string(),
                    });
                    return;
                };
                Some(len)
            } else {
                None
            };
            let ty = match length {
                Some(len) => match ty.sized_for_read(variable, len) {
                    Ok(ty) => ty,
                    Err(e) => {
                        self.report(e);
                        return;
                    },
                },
                None => ty,
            };
            ReadRequest {
                ty,
                handle,
                length,
                id: id.map(str::to_string),
            }
        };

        if let Err(e) = live.router.read(request) {
            self.report(e);
        }
    }

    /// Request a write; the outcome arrives on [`on_write`](Self::on_write)
    pub fn write(&self, variable: &str, value: impl Into<PlcValue>, id: Option<&str>) {
        let Some(live) = self.live_or_report() else {
            return;
        };

        let handle = {
            let handles = live.session.handles().read();
            match handles.resolve(variable) {
                Some((_, entry)) => entry.handle,
                None => {
                    self.report(AdsRxError::UnknownVariable(variable.to_string()));
                    return;
                },
            }
        };
        let Some(handle) = handle else {
            self.report(AdsRxError::HandleAllocation {
                variable: variable.to_string(),
                reason: "controller granted no handle".to_string(),
            });
            return;
        };

        let request = WriteRequest {
            handle,
            value: value.into(),
            id: id.map(str::to_string),
        };
        if let Err(e) = live.router.write(request) {
            self.report(e);
        }
    }

    /// Register a notification-style handle at runtime
    ///
    /// Failures are reported and yield `None`.
    pub async fn register_read_write(&self, variable: &str, ty: PlcType, array_len: Option<usize>) -> Option<u32> {
        let live = self.live_or_report()?;
        live.session
            .registrar()
            .register_read_write(variable, ty, array_len, &self.shared().hub.diagnostics)
            .await
    }

    pub async fn register_write_only(
        &self,
        variable: &str,
        ty: Option<PlcType>,
        array_len: Option<usize>,
    ) -> Option<u32> {
        let live = self.live_or_report()?;
        live.session
            .registrar()
            .register_write_only(variable, ty, array_len, &self.shared().hub.diagnostics)
            .await
    }

    /// Register several variables; one failure never stops the rest
    pub async fn register_batch(&self, requests: &[Registration]) -> Vec<Option<u32>> {
        match self.live_or_report() {
            Some(live) => {
                live.session
                    .registrar()
                    .register_batch(requests, &self.shared().hub.diagnostics)
                    .await
            },
            None => vec![None; requests.len()],
        }
    }

    pub fn data_received(&self) -> broadcast::Receiver<DataEvent> {
        self.shared().hub.data()
    }

    pub fn errors(&self) -> broadcast::Receiver<AdsRxError> {
        self.shared().hub.errors()
    }

    /// `"Success"`, `"Success,<id>"` or the error text of a failed write
    pub fn on_write(&self) -> broadcast::Receiver<String> {
        self.shared().hub.acks()
    }

    pub fn initialize_complete(&self) -> broadcast::Receiver<InitReport> {
        self.shared().init.subscribe()
    }

    /// Open a pause window; failures go to [`errors`](Self::errors)
    pub fn pause(&self, duration: Duration) {
        if self.is_disposed() {
            self.report(AdsRxError::Disposed);
            return;
        }
        if let Err(e) = self.inner.pause.pause(duration) {
            self.report(e);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    pub fn paused_changes(&self) -> watch::Receiver<bool> {
        self.inner.pause.subscribe()
    }

    pub async fn wait_resumed(&self) {
        self.inner.pause.wait_resumed().await;
    }

    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.shared().state.subscribe()
    }

    pub fn current_state(&self) -> SupervisorState {
        self.shared().current_state()
    }

    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.inner.settings.read().clone()
    }

    pub fn handle_info(&self) -> HandleInfo {
        match self.shared().live() {
            Some(live) => {
                let handles = live.session.handles().read();
                HandleInfo {
                    read_write: handles.read_write_handles(),
                    write_only: handles.write_handles(),
                }
            },
            None => HandleInfo::default(),
        }
    }

    /// Locally registered type of a variable, if any
    pub fn variable_type(&self, variable: &str) -> Option<PlcType> {
        let live = self.shared().live()?;
        let handles = live.session.handles().read();
        handles.resolve(variable).and_then(|(_, entry)| entry.ty.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.shared()
            .live()
            .is_some_and(|live| live.session.transport().is_connected())
    }

    /// Every data event, skipping over lagged gaps
    pub fn events(&self) -> impl Stream<Item = DataEvent> + Send + 'static {
        event_stream(self.data_received())
    }

    /// Values of one variable (case-insensitive)
    pub fn observe(&self, variable: &str) -> impl Stream<Item = PlcValue> + Send + 'static {
        let key = table_key(variable);
        self.events()
            .filter_map(move |event| future::ready((event.variable == key).then_some(event.value)))
    }

    /// Values of one variable converted to `T`
    pub fn observe_as<T>(&self, variable: &str) -> impl Stream<Item = Result<T, AdsRxError>> + Send + 'static
    where
        T: TryFrom<PlcValue, Error = AdsRxError> + Send + 'static,
    {
        self.observe(variable).map(T::try_from)
    }

    /// Values of one variable read with the given correlation id
    pub fn observe_with_id(&self, variable: &str, id: &str) -> impl Stream<Item = PlcValue> + Send + 'static {
        let key = table_key(variable);
        let id = id.to_string();
        self.events().filter_map(move |event| {
            let matches = event.variable == key && event.id.as_deref() == Some(id.as_str());
            future::ready(matches.then_some(event.value))
        })
    }

    /// Latest-value view of a structured variable with clone-mutate-write helpers
    pub fn create_struct(&self, variable: &str) -> StructView {
        StructView::new(self.clone(), variable, self.inner.root.child_token())
    }
}

fn event_stream(rx: broadcast::Receiver<DataEvent>) -> impl Stream<Item = DataEvent> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Observer lagged, {} events skipped", skipped);
                },
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimController;
    use tracing_test::traced_test;

    #[test]
    fn test_options_from_yaml() {
        let options: ClientOptions = serde_yaml::from_str(
            "health_interval_ms: 250\nretry:\n  initial_delay_ms: 1000\nservices:\n  groups: [[\"TcEventLogger\"]]\n",
        )
        .unwrap();
        assert_eq!(options.health_interval, Duration::from_millis(250));
        assert_eq!(options.retry.initial_delay, Duration::from_secs(1));
        assert!(options.retry.is_unlimited());
        assert_eq!(options.channel_capacity, 1024);
        assert!(options.services.unwrap().is_watched("TcEventLogger"));
    }

    #[tokio::test]
    async fn test_calls_before_connect_are_reported() {
        let client = AdsRxClient::new(SimController::new().transport_factory());
        let mut errors = client.errors();

        client.read(".Tag1", None, None);
        client.write(".Flag", true, None);
        assert_eq!(errors.recv().await.unwrap(), AdsRxError::NotConnected);
        assert_eq!(errors.recv().await.unwrap(), AdsRxError::NotConnected);
        assert!(!client.is_connected());
        assert_eq!(client.handle_info(), HandleInfo::default());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_connect_after_dispose_is_reported() {
        let client = AdsRxClient::new(SimController::new().transport_factory());
        let mut errors = client.errors();

        client.dispose().await;
        assert_eq!(client.current_state(), SupervisorState::Disposed);

        client.connect(Settings::default()).await;
        assert_eq!(errors.recv().await.unwrap(), AdsRxError::Disposed);
        assert_eq!(client.current_state(), SupervisorState::Disposed);
        assert!(logs_contain("Client has been disposed"));
    }

    #[tokio::test]
    async fn test_pause_after_dispose_is_reported() {
        let client = AdsRxClient::new(SimController::new().transport_factory());
        let mut errors = client.errors();

        client.dispose().await;
        client.pause(Duration::from_millis(100));
        assert_eq!(errors.recv().await.unwrap(), AdsRxError::Disposed);
        assert!(!client.is_paused());
    }

    #[test]
    fn test_pause_outside_runtime_is_reported() {
        let client = AdsRxClient::new(SimController::new().transport_factory());
        let mut errors = client.errors();

        client.pause(Duration::from_millis(100));
        assert!(matches!(errors.try_recv(), Ok(AdsRxError::Internal(_))));
        assert!(!client.is_paused());
    }

    #[tokio::test]
    async fn test_invalid_settings_are_reported() {
        let client = AdsRxClient::new(SimController::new().transport_factory());
        let mut errors = client.errors();

        let settings = Settings {
            port: 0,
            ..Settings::default()
        };
        client.connect(settings).await;
        assert!(matches!(
            errors.recv().await.unwrap(),
            AdsRxError::InvalidConfig { .. }
        ));
        assert!(client.settings().is_none());
    }
}
