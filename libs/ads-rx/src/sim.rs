//! Simulated controller
//!
//! In-memory stand-in for a controller runtime and its host services. Values
//! are kept as raw process-image bytes and go through the codec on every read
//! and write. Failure switches and counters make it usable from tests and from
//! the console.

use async_trait::async_trait;
use errors::{AdsRxError, AdsRxResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::catalog::SymbolTree;
use crate::codec;
use crate::layout::{LayoutResolver, TypeResolver};
use crate::service::{ServiceEntry, ServiceMonitor, ServiceStatus};
use crate::transport::{AdsState, AdsTransport, StateInfo, SymbolDescriptor, TransportFactory};
use crate::value::{PlcType, PlcValue};

/// Lookup key of a symbol path
fn sim_key(path: &str) -> String {
    path.trim().trim_start_matches('.').to_uppercase()
}

#[derive(Debug)]
struct SimVariable {
    ty: Option<PlcType>,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Switches {
    link_down: bool,
    fail_connect: bool,
    fail_state_reads: bool,
    fail_writes: bool,
    fail_service_listing: bool,
    start_brings_up: bool,
    declined: HashSet<String>,
    failing: HashSet<String>,
}

#[derive(Debug, Default)]
struct Counters {
    connects: u64,
    handles_created: u64,
    reads: HashMap<String, u64>,
    writes: u64,
    control_writes: u64,
    start_calls: Vec<String>,
}

#[derive(Debug)]
struct SimState {
    symbols: Vec<SymbolDescriptor>,
    variables: HashMap<String, SimVariable>,
    handles: HashMap<u32, String>,
    next_handle: u32,
    device_state: u16,
    services: Vec<ServiceEntry>,
    switches: Switches,
    counters: Counters,
}

/// Shared simulated controller; clones refer to the same runtime
#[derive(Debug, Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
    ads_state: Arc<watch::Sender<AdsState>>,
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimController {
    /// Running controller with running system services and no symbols
    pub fn new() -> Self {
        let (ads_state, _) = watch::channel(AdsState::Run);
        Self {
            state: Arc::new(Mutex::new(SimState {
                symbols: Vec::new(),
                variables: HashMap::new(),
                handles: HashMap::new(),
                next_handle: 0x1000,
                device_state: 0,
                services: vec![
                    ServiceEntry {
                        name: "TwinCAT3 System Service".to_string(),
                        status: ServiceStatus::Running,
                    },
                    ServiceEntry {
                        name: "TcEventLogger".to_string(),
                        status: ServiceStatus::Running,
                    },
                ],
                switches: Switches {
                    start_brings_up: true,
                    ..Switches::default()
                },
                counters: Counters::default(),
            })),
            ads_state: Arc::new(ads_state),
        }
    }

    /// Declare a symbol; every nested member becomes addressable too
    pub fn add_symbol(&self, descriptor: SymbolDescriptor) {
        let tree = SymbolTree::from_descriptors(std::slice::from_ref(&descriptor));
        let mut state = self.state.lock();

        let mut stack: Vec<(String, &SymbolDescriptor)> = vec![(descriptor.name.clone(), &descriptor)];
        while let Some((path, desc)) = stack.pop() {
            let ty = LayoutResolver
                .resolve(tree.search(&path))
                .ok()
                .flatten();
            let size = ty.as_ref().map(PlcType::size).unwrap_or(desc.size);
            state.variables.insert(
                sim_key(&path),
                SimVariable {
                    ty,
                    bytes: vec![0; size],
                },
            );
            stack.extend(
                desc.children
                    .iter()
                    .map(|child| (format!("{}.{}", path, child.name), child)),
            );
        }
        state.symbols.push(descriptor);
    }

    pub fn with_symbols(self, symbols: impl IntoIterator<Item = SymbolDescriptor>) -> Self {
        for symbol in symbols {
            self.add_symbol(symbol);
        }
        self
    }

    /// Store a value in the process image
    pub fn set_value(&self, path: &str, value: impl Into<PlcValue>) -> AdsRxResult<()> {
        let mut state = self.state.lock();
        let variable = state
            .variables
            .get_mut(&sim_key(path))
            .ok_or_else(|| AdsRxError::UnknownVariable(path.to_string()))?;
        let ty = variable
            .ty
            .as_ref()
            .ok_or_else(|| AdsRxError::UnsupportedType(path.to_string()))?;
        variable.bytes = codec::encode(ty, &value.into())?;
        Ok(())
    }

    /// Current value from the process image
    pub fn value(&self, path: &str) -> Option<PlcValue> {
        let state = self.state.lock();
        let variable = state.variables.get(&sim_key(path))?;
        codec::decode(variable.ty.as_ref()?, &variable.bytes).ok()
    }

    pub fn set_ads_state(&self, ads_state: AdsState) {
        self.ads_state.send_replace(ads_state);
    }

    pub fn ads_state(&self) -> AdsState {
        *self.ads_state.borrow()
    }

    pub fn set_service_status(&self, name: &str, status: ServiceStatus) {
        let mut state = self.state.lock();
        match state.services.iter_mut().find(|s| s.name == name) {
            Some(entry) => entry.status = status,
            None => state.services.push(ServiceEntry {
                name: name.to_string(),
                status,
            }),
        }
    }

    /// Drop every live connection; new connections fail while the link is down
    pub fn set_link_down(&self, down: bool) {
        self.state.lock().switches.link_down = down;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().switches.fail_connect = fail;
    }

    pub fn fail_state_reads(&self, fail: bool) {
        self.state.lock().switches.fail_state_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().switches.fail_writes = fail;
    }

    pub fn fail_service_listing(&self, fail: bool) {
        self.state.lock().switches.fail_service_listing = fail;
    }

    /// Whether a start request brings a stopped service up (default: yes)
    pub fn start_brings_up(&self, enabled: bool) {
        self.state.lock().switches.start_brings_up = enabled;
    }

    /// Handle requests for `path` are declined (`Ok(None)`)
    pub fn decline_handle(&self, path: &str) {
        self.state.lock().switches.declined.insert(sim_key(path));
    }

    /// Handle requests for `path` fail with an ADS error
    pub fn fail_handle(&self, path: &str) {
        self.state.lock().switches.failing.insert(sim_key(path));
    }

    pub fn connects(&self) -> u64 {
        self.state.lock().counters.connects
    }

    pub fn handles_created(&self) -> u64 {
        self.state.lock().counters.handles_created
    }

    pub fn reads_issued(&self) -> u64 {
        self.state.lock().counters.reads.values().sum()
    }

    pub fn reads_of(&self, path: &str) -> u64 {
        self.state
            .lock()
            .counters
            .reads
            .get(&sim_key(path))
            .copied()
            .unwrap_or(0)
    }

    pub fn writes(&self) -> u64 {
        self.state.lock().counters.writes
    }

    pub fn control_writes(&self) -> u64 {
        self.state.lock().counters.control_writes
    }

    /// Names passed to `start`, in call order
    pub fn start_calls(&self) -> Vec<String> {
        self.state.lock().counters.start_calls.clone()
    }

    pub fn transport_factory(&self) -> SimTransportFactory {
        SimTransportFactory {
            controller: self.clone(),
        }
    }

    pub fn service_monitor(&self) -> SimServiceMonitor {
        SimServiceMonitor {
            controller: self.clone(),
        }
    }

    fn link_down(&self) -> bool {
        self.state.lock().switches.link_down
    }
}

/// Creates one [`SimTransport`] per connection attempt
#[derive(Debug, Clone)]
pub struct SimTransportFactory {
    controller: SimController,
}

impl TransportFactory for SimTransportFactory {
    fn create(&self) -> Arc<dyn AdsTransport> {
        Arc::new(SimTransport {
            controller: self.controller.clone(),
            connected: AtomicBool::new(false),
        })
    }
}

#[derive(Debug)]
pub struct SimTransport {
    controller: SimController,
    connected: AtomicBool,
}

impl SimTransport {
    fn ensure_connected(&self) -> AdsRxResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AdsRxError::NotConnected)
        }
    }
}

#[async_trait]
impl AdsTransport for SimTransport {
    async fn connect(&self, address: Option<&str>, port: u16) -> AdsRxResult<()> {
        let mut state = self.controller.state.lock();
        if state.switches.fail_connect || state.switches.link_down {
            return Err(AdsRxError::AdsFault("target port not found".to_string()));
        }
        state.counters.connects += 1;
        self.connected.store(true, Ordering::SeqCst);
        debug!("Simulated connection to {}:{}", address.unwrap_or("local"), port);
        Ok(())
    }

    async fn disconnect(&self) -> AdsRxResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.controller.link_down()
    }

    async fn create_variable_handle(&self, path: &str) -> AdsRxResult<Option<u32>> {
        self.ensure_connected()?;
        let key = sim_key(path);
        let mut state = self.controller.state.lock();
        if state.switches.failing.contains(&key) {
            return Err(AdsRxError::AdsFault(format!("handle request for {} rejected", path)));
        }
        if state.switches.declined.contains(&key) {
            return Ok(None);
        }
        if !state.variables.contains_key(&key) {
            return Err(AdsRxError::AdsFault(format!("symbol {} not found", path)));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, key);
        state.counters.handles_created += 1;
        Ok(Some(handle))
    }

    async fn read_any(&self, handle: u32, ty: &PlcType, lengths: Option<&[usize]>) -> AdsRxResult<PlcValue> {
        self.ensure_connected()?;
        let mut state = self.controller.state.lock();
        let key = state
            .handles
            .get(&handle)
            .cloned()
            .ok_or_else(|| AdsRxError::AdsFault(format!("invalid handle {:#x}", handle)))?;
        *state.counters.reads.entry(key.clone()).or_default() += 1;

        let ty = match lengths.and_then(|l| l.first()) {
            Some(&len) => ty.with_length(len),
            None => ty.clone(),
        };
        let variable = state
            .variables
            .get(&key)
            .ok_or_else(|| AdsRxError::AdsFault(format!("symbol {} not found", key)))?;
        let mut bytes = variable.bytes.clone();
        if bytes.len() < ty.size() {
            bytes.resize(ty.size(), 0);
        }
        codec::decode(&ty, &bytes)
    }

    async fn write_any(&self, handle: u32, value: &PlcValue) -> AdsRxResult<()> {
        self.ensure_connected()?;
        let mut state = self.controller.state.lock();
        if state.switches.fail_writes {
            return Err(AdsRxError::AdsFault("device access denied".to_string()));
        }
        let key = state
            .handles
            .get(&handle)
            .cloned()
            .ok_or_else(|| AdsRxError::AdsFault(format!("invalid handle {:#x}", handle)))?;
        let variable = state
            .variables
            .get_mut(&key)
            .ok_or_else(|| AdsRxError::AdsFault(format!("symbol {} not found", key)))?;
        let ty = variable
            .ty
            .as_ref()
            .ok_or_else(|| AdsRxError::UnsupportedType(key.clone()))?;
        variable.bytes = codec::encode(ty, value)?;
        state.counters.writes += 1;
        Ok(())
    }

    async fn read_state(&self) -> AdsRxResult<StateInfo> {
        self.ensure_connected()?;
        let state = self.controller.state.lock();
        if state.switches.fail_state_reads {
            return Err(AdsRxError::AdsFault("state read timed out".to_string()));
        }
        Ok(StateInfo::new(self.controller.ads_state(), state.device_state))
    }

    async fn write_control(&self, info: StateInfo) -> AdsRxResult<()> {
        self.ensure_connected()?;
        {
            let mut state = self.controller.state.lock();
            state.counters.control_writes += 1;
            state.device_state = info.device_state;
        }
        self.controller.set_ads_state(info.ads_state);
        Ok(())
    }

    async fn upload_symbols(&self) -> AdsRxResult<Vec<SymbolDescriptor>> {
        self.ensure_connected()?;
        Ok(self.controller.state.lock().symbols.clone())
    }

    fn state_events(&self) -> Option<watch::Receiver<AdsState>> {
        Some(self.controller.ads_state.subscribe())
    }
}

/// Host services of the simulated controller
#[derive(Debug, Clone)]
pub struct SimServiceMonitor {
    controller: SimController,
}

#[async_trait]
impl ServiceMonitor for SimServiceMonitor {
    async fn list(&self) -> AdsRxResult<Vec<ServiceEntry>> {
        let state = self.controller.state.lock();
        if state.switches.fail_service_listing {
            return Err(AdsRxError::ServiceMonitor("service manager unavailable".to_string()));
        }
        Ok(state.services.clone())
    }

    async fn start(&self, name: &str) -> AdsRxResult<()> {
        let mut state = self.controller.state.lock();
        state.counters.start_calls.push(name.to_string());
        let brings_up = state.switches.start_brings_up;
        let entry = state
            .services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| AdsRxError::ServiceMonitor(format!("service {} not installed", name)))?;
        if brings_up {
            entry.status = ServiceStatus::Running;
        }
        Ok(())
    }
}
