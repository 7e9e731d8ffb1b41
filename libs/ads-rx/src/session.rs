//! Per-attempt connection state
//!
//! Everything a connection attempt creates lives here and is dropped as a
//! whole when the attempt ends: the transport, the symbol catalog and the
//! handle tables.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::catalog::VariableCatalog;
use crate::handles::{HandleTable, Registrar};
use crate::router::RequestRouter;
use crate::transport::AdsTransport;

#[derive(Debug)]
pub struct Session {
    transport: Arc<dyn AdsTransport>,
    catalog: VariableCatalog,
    handles: RwLock<HandleTable>,
    initialized: AtomicBool,
}

impl Session {
    pub fn new(transport: Arc<dyn AdsTransport>, catalog: VariableCatalog) -> Self {
        Self {
            transport,
            catalog,
            handles: RwLock::new(HandleTable::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &dyn AdsTransport {
        self.transport.as_ref()
    }

    pub fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }

    pub fn handles(&self) -> &RwLock<HandleTable> {
        &self.handles
    }

    pub fn registrar(&self) -> Registrar<'_> {
        Registrar::new(self.transport.as_ref(), &self.handles)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Initialized and the transport still reports a connection
    pub fn is_live(&self) -> bool {
        self.is_initialized() && self.transport.is_connected()
    }
}

/// Session of the attempt currently attached to the client
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session: Arc<Session>,
    pub router: RequestRouter,
}
