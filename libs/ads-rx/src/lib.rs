//! Reactive client for PLC variables over ADS
//!
//! Turns a flat list of named controller variables into live, continuously
//! updated values:
//!
//! - a supervisor connects, waits until the controller runs and its host
//!   services are up, allocates variable handles and keeps retrying after any
//!   fault;
//! - one poller per notification reads its variable at the configured rate;
//! - reads and writes go through one worker per direction and are published on
//!   broadcast streams (data, write acknowledgements, diagnostics).
//!
//! The protocol SDK, the host service manager and type resolution are
//! collaborators behind traits ([`AdsTransport`], [`ServiceMonitor`],
//! [`TypeResolver`]); [`sim`] provides an in-memory controller for all three.
//!
//! ```no_run
//! use ads_rx::{AdsRxClient, Notification, Settings, WriteVariable};
//! use ads_rx::sim::SimController;
//!
//! # async fn demo() {
//! let controller = SimController::new();
//! let client = AdsRxClient::new(controller.transport_factory());
//! let mut data = client.data_received();
//!
//! client
//!     .connect(Settings {
//!         notifications: vec![Notification::new(100, ".Tag1")],
//!         write_variables: vec![WriteVariable::new(".Flag")],
//!         ..Settings::default()
//!     })
//!     .await;
//!
//! while let Ok(event) = data.recv().await {
//!     println!("{} = {}", event.variable, event.value);
//! }
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod codec;
pub mod events;
pub mod handles;
pub mod layout;
pub mod pause;
pub mod polling;
pub mod reconnect;
pub mod router;
pub mod service;
pub mod session;
pub mod settings;
pub mod sim;
pub mod structured;
pub mod supervisor;
pub mod transport;
pub mod value;

pub use catalog::{NodeRef, SymbolTree, VariableCatalog};
pub use client::{AdsRxClient, AdsRxClientBuilder, ClientOptions, HandleInfo};
pub use errors::{AdsRxError, AdsRxResult, ErrorCategory};
pub use events::{DataEvent, InitReport};
pub use handles::{HandleEntry, HandleTable, Registration, TableKind};
pub use layout::{LayoutContext, LayoutResolver, TypeResolver};
pub use pause::PauseGate;
pub use reconnect::ReconnectPolicy;
pub use service::{NoServiceMonitor, ServiceEntry, ServiceMonitor, ServiceStatus, ServiceWatch};
pub use settings::{Notification, Settings, WriteVariable};
pub use structured::StructView;
pub use supervisor::{ConnectionState, SupervisorState};
pub use transport::{AdsState, AdsTransport, StateInfo, SymbolCategory, SymbolDescriptor, TransportFactory};
pub use value::{PlcType, PlcValue, StructLayout};
