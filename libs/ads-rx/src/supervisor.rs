//! Connection supervisor
//!
//! Drives one connection attempt at a time through
//! `Connecting -> WaitingForHealth -> Initializing -> Ready` and restarts it
//! after a failure according to the [`ReconnectPolicy`]. Each attempt owns a
//! cancellation scope and a task set; ending the attempt stops its pollers and
//! workers and disconnects its transport.
//!
//! Faults never reach caller code: they are published on the diagnostic stream
//! and end the attempt.
//!
//! [`ReconnectPolicy`]: crate::reconnect::ReconnectPolicy

use errors::{AdsRxError, AdsRxResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::VariableCatalog;
use crate::client::ClientOptions;
use crate::events::{EventHub, InitReport};
use crate::handles::table_key;
use crate::layout::{LayoutContext, TypeResolver};
use crate::polling::start_polling;
use crate::reconnect::{ReconnectError, ReconnectHelper};
use crate::router::RequestRouter;
use crate::service::{ServiceMonitor, ServiceStatus, ServiceWatch};
use crate::session::{LiveSession, Session};
use crate::settings::Settings;
use crate::transport::{AdsState, AdsTransport, StateInfo, TransportFactory};
use crate::value::PlcType;

/// Lifecycle state published by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SupervisorState {
    #[default]
    Disconnected,
    Connecting,
    WaitingForHealth,
    Initializing,
    Ready,
    /// Terminal
    Disposed,
}

impl SupervisorState {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Latest values of the two health signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub ads_state: AdsState,
    pub services: ServiceStatus,
}

impl ConnectionState {
    /// Traffic is only allowed while the controller runs and services are up
    pub fn allows_traffic(&self) -> bool {
        self.ads_state == AdsState::Run && self.services == ServiceStatus::Running
    }
}

/// Combines the latest values of two independently de-duplicated signals
#[derive(Debug, Default)]
struct HealthSignals {
    ads: Option<AdsState>,
    services: Option<ServiceStatus>,
}

impl HealthSignals {
    fn combined(&self) -> Option<ConnectionState> {
        Some(ConnectionState {
            ads_state: self.ads?,
            services: self.services?,
        })
    }

    fn update_ads(&mut self, state: AdsState) -> Option<ConnectionState> {
        if self.ads == Some(state) {
            return None;
        }
        self.ads = Some(state);
        self.combined()
    }

    fn update_services(&mut self, status: ServiceStatus) -> Option<ConnectionState> {
        if self.services == Some(status) {
            return None;
        }
        self.services = Some(status);
        self.combined()
    }
}

/// State shared between the client and its supervisor
pub(crate) struct Shared {
    pub options: ClientOptions,
    pub hub: EventHub,
    pub state: watch::Sender<SupervisorState>,
    pub live: RwLock<Option<LiveSession>>,
    pub init: broadcast::Sender<InitReport>,
    pub factory: Arc<dyn TransportFactory>,
    pub services: Arc<dyn ServiceMonitor>,
    pub resolver: Arc<dyn TypeResolver>,
}

impl Shared {
    /// Publish a state change; `Disposed` is never left
    pub fn set_state(&self, next: SupervisorState) {
        self.state.send_if_modified(|current| {
            if *current == next || *current == SupervisorState::Disposed {
                return false;
            }
            info!("State {} -> {}", current, next);
            *current = next;
            true
        });
    }

    pub fn current_state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn live(&self) -> Option<LiveSession> {
        self.live.read().clone()
    }
}

/// Resources of one connection attempt
struct Attempt {
    number: u64,
    scope: CancellationToken,
    tasks: JoinSet<()>,
    transport: Option<Arc<dyn AdsTransport>>,
    reached_ready: bool,
}

pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    settings: Arc<Settings>,
    watch: ServiceWatch,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(shared: Arc<Shared>, settings: Arc<Settings>, cancel: CancellationToken) -> Self {
        let watch = shared
            .options
            .services
            .clone()
            .unwrap_or_else(|| shared.services.default_watch());
        Self {
            shared,
            settings,
            watch,
            cancel,
        }
    }

    /// Retry loop; returns when cancelled or when the attempt budget is used up
    pub async fn run(self) {
        let mut helper = ReconnectHelper::new(self.shared.options.retry.clone());
        info!("Supervising connection to {}", self.settings.endpoint());

        loop {
            match helper.wait_for_attempt(&self.cancel).await {
                Ok(_) => {},
                Err(ReconnectError::Cancelled) => break,
                Err(ReconnectError::MaxAttemptsExceeded(max)) => {
                    self.shared.hub.report(AdsRxError::MaxAttemptsExceeded(max));
                    break;
                },
            }

            let mut attempt = Attempt {
                number: helper.stats().total_attempts,
                scope: self.cancel.child_token(),
                tasks: JoinSet::new(),
                transport: None,
                reached_ready: false,
            };
            let result = self.run_attempt(&mut attempt).await;
            let reached_ready = attempt.reached_ready;
            let number = attempt.number;
            self.teardown(attempt).await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    if reached_ready {
                        helper.mark_connected();
                    }
                    self.shared.set_state(SupervisorState::Disconnected);
                    error!(
                        "Connection attempt {} to {} failed: {}",
                        number,
                        self.settings.endpoint(),
                        e
                    );
                    self.shared.hub.report(e.clone());
                    helper.record_failure(e.to_string());
                },
            }
        }

        self.shared.set_state(SupervisorState::Disconnected);
        debug!("Supervisor for {} stopped", self.settings.endpoint());
    }

    async fn teardown(&self, mut attempt: Attempt) {
        attempt.scope.cancel();
        self.shared.live.write().take();
        attempt.tasks.shutdown().await;
        if let Some(transport) = attempt.transport.take() {
            if let Err(e) = transport.disconnect().await {
                debug!("Disconnect after attempt {} failed: {}", attempt.number, e);
            }
        }
    }

    /// Runs until the attempt fails (`Err`) or is cancelled (`Ok`)
    async fn run_attempt(&self, attempt: &mut Attempt) -> AdsRxResult<()> {
        let shared = &self.shared;
        let scope = attempt.scope.clone();
        shared.set_state(SupervisorState::Connecting);

        let transport = shared.factory.create();
        attempt.transport = Some(Arc::clone(&transport));
        transport
            .connect(self.settings.address(), self.settings.port)
            .await
            .map_err(|e| AdsRxError::ConnectionFailed {
                endpoint: self.settings.endpoint(),
                reason: e.to_string(),
            })?;

        let catalog = VariableCatalog::load(transport.as_ref()).await?;
        let session = Arc::new(Session::new(Arc::clone(&transport), catalog));
        let router = RequestRouter::spawn(
            Arc::clone(&session),
            shared.hub.clone(),
            &mut attempt.tasks,
            scope.clone(),
        );
        *shared.live.write() = Some(LiveSession {
            session: Arc::clone(&session),
            router: router.clone(),
        });
        shared.set_state(SupervisorState::WaitingForHealth);

        let mut signals = HealthSignals::default();
        let mut events = transport.state_events();
        let period = shared.options.health_interval.max(Duration::from_millis(1));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = scope.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    let services = self.check_services().await?;
                    if let Some(state) = signals.update_services(services) {
                        self.on_health(state, &session, &router, attempt).await?;
                    }
                    let ads = self.read_ads_state(transport.as_ref(), attempt.reached_ready).await?;
                    if let Some(state) = signals.update_ads(ads) {
                        self.on_health(state, &session, &router, attempt).await?;
                    }
                },
                Some(ads) = next_state_event(&mut events) => {
                    if let Some(state) = signals.update_ads(ads) {
                        self.on_health(state, &session, &router, attempt).await?;
                    }
                },
            }
        }
    }

    /// Aggregate status of the watched services
    ///
    /// Every watched service that is not running gets a start request and a
    /// `ServiceFault`; the first fault ends the attempt, the others are only
    /// reported. A failing listing counts as `Faulted`.
    async fn check_services(&self) -> AdsRxResult<ServiceStatus> {
        if self.watch.groups.is_empty() {
            return Ok(ServiceStatus::Running);
        }

        let entries = match self.shared.services.list().await {
            Ok(entries) => entries,
            Err(e) => {
                self.shared.hub.report(AdsRxError::ServiceMonitor(e.to_string()));
                return Ok(ServiceStatus::Faulted);
            },
        };

        let mut fault = None;
        for entry in self.watch.filter(&entries) {
            debug!("Service {} is {}", entry.name, entry.status);
            if entry.status == ServiceStatus::Running {
                continue;
            }
            warn!("Service {} is {}, requesting start", entry.name, entry.status);
            if let Err(e) = self.shared.services.start(&entry.name).await {
                warn!("Start of {} failed: {}", entry.name, e);
            }
            let err = AdsRxError::ServiceFault {
                service: entry.name.clone(),
                status: entry.status.to_string(),
            };
            match fault {
                None => fault = Some(err),
                Some(_) => self.shared.hub.report(err),
            }
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(self.watch.aggregate(&entries)),
        }
    }

    async fn read_ads_state(&self, transport: &dyn AdsTransport, ready: bool) -> AdsRxResult<AdsState> {
        if !transport.is_connected() {
            if ready {
                return Err(AdsRxError::ConnectionLost(self.settings.endpoint()));
            }
            return Ok(AdsState::Invalid);
        }
        transport
            .read_state()
            .await
            .map(|info| info.ads_state)
            .map_err(|e| AdsRxError::AdsFault(e.to_string()))
    }

    async fn on_health(
        &self,
        state: ConnectionState,
        session: &Arc<Session>,
        router: &RequestRouter,
        attempt: &mut Attempt,
    ) -> AdsRxResult<()> {
        info!(
            "{}: controller {}, services {}",
            self.settings.endpoint(),
            state.ads_state,
            state.services
        );

        if !attempt.reached_ready && state.allows_traffic() {
            self.shared.set_state(SupervisorState::Initializing);
            let variables = self.initialize(session).await?;
            session.mark_initialized();
            start_polling(
                &self.settings.notifications,
                session,
                router,
                &self.shared.hub.diagnostics,
                &mut attempt.tasks,
                &attempt.scope,
            );
            attempt.reached_ready = true;
            self.shared.set_state(SupervisorState::Ready);
            info!(
                "Initialization complete: {} variables registered",
                variables.len()
            );
            let _ = self.shared.init.send(InitReport {
                settings_id: self.settings.settings_id.clone(),
                attempt: attempt.number,
                variables,
            });
        } else if state.ads_state.needs_start() {
            let transport = session.transport();
            let device_state = transport
                .read_state()
                .await
                .map_err(|e| AdsRxError::AdsFault(e.to_string()))?
                .device_state;
            info!("Controller is in {}, requesting Run", state.ads_state);
            transport
                .write_control(StateInfo::new(AdsState::Run, device_state))
                .await
                .map_err(|e| AdsRxError::AdsFault(e.to_string()))?;
        }
        Ok(())
    }

    /// Bulk registration of every configured variable; the first error aborts
    async fn initialize(&self, session: &Session) -> AdsRxResult<Vec<String>> {
        let registrar = session.registrar();
        let mut ctx = LayoutContext::new();
        let mut variables = Vec::new();

        for notification in &self.settings.notifications {
            let path = &notification.variable;
            if !self.in_catalog(session.catalog(), path) {
                continue;
            }
            let Some(ty) = self.resolve_type(session.catalog(), path, &mut ctx)? else {
                warn!("No local type for {}, notification skipped", path);
                continue;
            };
            if registrar
                .try_register_read_write(path, ty, notification.array_size)
                .await?
                .is_some()
            {
                variables.push(table_key(path));
            }
        }

        for write in &self.settings.write_variables {
            let path = &write.variable;
            if !self.in_catalog(session.catalog(), path) {
                continue;
            }
            let ty = self.resolve_type(session.catalog(), path, &mut ctx)?;
            if registrar
                .try_register_write_only(path, ty, write.array_size)
                .await?
                .is_some()
            {
                variables.push(table_key(path));
            }
        }

        debug!("Resolved {} structured layouts", ctx.len());
        Ok(variables)
    }

    fn in_catalog(&self, catalog: &VariableCatalog, path: &str) -> bool {
        let found = !catalog.search(path).is_placeholder();
        if !found {
            warn!("{} is not in the symbol catalog, skipped", path);
        }
        found
    }

    /// Resolver first, then the type-name converter
    fn resolve_type(
        &self,
        catalog: &VariableCatalog,
        path: &str,
        ctx: &mut LayoutContext,
    ) -> AdsRxResult<Option<PlcType>> {
        let node = catalog.search(path);
        let resolved = self
            .shared
            .resolver
            .resolve_in(node, ctx)
            .map_err(|e| match e {
                AdsRxError::TypeResolution { .. } => e,
                other => AdsRxError::TypeResolution {
                    variable: path.to_string(),
                    reason: other.to_string(),
                },
            })?;
        Ok(resolved.or_else(|| {
            node.tag()
                .and_then(|info| PlcType::from_plc_name(&info.type_name))
        }))
    }
}

/// Next asynchronous state notification; pending forever without a source
async fn next_state_event(events: &mut Option<watch::Receiver<AdsState>>) -> Option<AdsState> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    if rx.changed().await.is_ok() {
        return Some(*rx.borrow_and_update());
    }
    *events = None;
    None
}
