//! Transport Layer Traits
//!
//! The client never talks to the wire itself. It drives an [`AdsTransport`]
//! (the protocol SDK binding) created fresh for every connection attempt by a
//! [`TransportFactory`].

use async_trait::async_trait;
use errors::AdsRxResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::value::{PlcType, PlcValue};

/// ADS state of the controller runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AdsState {
    #[default]
    Invalid,
    Idle,
    Reset,
    Init,
    Start,
    Run,
    Stop,
    SaveCfg,
    LoadCfg,
    PowerFailure,
    PowerGood,
    Error,
    Shutdown,
    Suspend,
    Resume,
    Config,
    Reconfig,
}

impl AdsState {
    /// A state the supervisor should try to bring back to `Run`
    pub fn needs_start(self) -> bool {
        !matches!(self, Self::Invalid | Self::Run)
    }
}

impl fmt::Display for AdsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Controller state as reported by `ReadState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    pub ads_state: AdsState,
    pub device_state: u16,
}

impl StateInfo {
    pub fn new(ads_state: AdsState, device_state: u16) -> Self {
        Self {
            ads_state,
            device_state,
        }
    }
}

/// Category of a remote symbol's type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolCategory {
    Primitive,
    Array,
    String,
    Compound,
}

/// Remote symbol descriptor as uploaded from the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    /// Instance name (`MAIN`, `Counter`, ...)
    pub name: String,
    /// Declared type name (`DINT`, `ST_Motor`, `ARRAY [0..9] OF REAL`)
    pub type_name: String,
    pub category: SymbolCategory,
    /// Size in bytes
    #[serde(default)]
    pub size: usize,
    /// Nested members for compound symbols
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SymbolDescriptor>,
}

impl SymbolDescriptor {
    pub fn primitive(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let (category, size) = match PlcType::from_plc_name(&type_name) {
            Some(ty @ PlcType::String(_)) => (SymbolCategory::String, ty.size()),
            Some(ty @ PlcType::Array(..)) => (SymbolCategory::Array, ty.size()),
            Some(ty) => (SymbolCategory::Primitive, ty.size()),
            None => (SymbolCategory::Primitive, 0),
        };
        Self {
            name: name.into(),
            type_name,
            category,
            size,
            children: Vec::new(),
        }
    }

    pub fn compound(
        name: impl Into<String>,
        type_name: impl Into<String>,
        children: Vec<SymbolDescriptor>,
    ) -> Self {
        let size = children.iter().map(|c| c.size).sum();
        Self {
            name: name.into(),
            type_name: type_name.into(),
            category: SymbolCategory::Compound,
            size,
            children,
        }
    }
}

/// Binding to the protocol SDK for one connection
///
/// All methods take `&self`; implementations serialize access to their session
/// internally. The client additionally funnels reads and writes through one
/// worker per direction.
#[async_trait]
pub trait AdsTransport: Send + Sync + fmt::Debug {
    /// Connect to `address:port`; `None` targets the local router
    async fn connect(&self, address: Option<&str>, port: u16) -> AdsRxResult<()>;

    /// Close the session
    async fn disconnect(&self) -> AdsRxResult<()>;

    fn is_connected(&self) -> bool;

    /// Ask the controller for a variable handle
    ///
    /// `Ok(None)` means the controller declined to grant one.
    async fn create_variable_handle(&self, path: &str) -> AdsRxResult<Option<u32>>;

    /// Read a value; `lengths` qualifies array and string reads
    async fn read_any(
        &self,
        handle: u32,
        ty: &PlcType,
        lengths: Option<&[usize]>,
    ) -> AdsRxResult<PlcValue>;

    async fn write_any(&self, handle: u32, value: &PlcValue) -> AdsRxResult<()>;

    async fn read_state(&self) -> AdsRxResult<StateInfo>;

    async fn write_control(&self, state: StateInfo) -> AdsRxResult<()>;

    /// Upload the controller's symbol tree
    async fn upload_symbols(&self) -> AdsRxResult<Vec<SymbolDescriptor>>;

    /// Asynchronous state-change notifications, if the binding supports them
    fn state_events(&self) -> Option<watch::Receiver<AdsState>> {
        None
    }
}

/// Creates a fresh transport for every connection attempt
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn AdsTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Arc<dyn AdsTransport> + Send + Sync,
{
    fn create(&self) -> Arc<dyn AdsTransport> {
        self()
    }
}
