//! Handle tables
//!
//! Two disjoint tables keyed by upper-cased variable path: read-write
//! (notification) handles and write-only handles. A fresh table is built for
//! every connection attempt.
//!
//! Registration comes in two flavours with deliberately different failure
//! behaviour:
//! - `try_register_*` (bulk initialization) propagates allocation errors so the
//!   whole connection attempt is aborted and retried;
//! - `register_*` (steady state) reports the error and returns `None`, so the
//!   rest of a batch still gets registered.
//!
//! In both cases a controller that declines to grant a handle (`Ok(None)`) only
//! skips that variable.

use errors::{AdsRxError, AdsRxResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::events::Diagnostics;
use crate::transport::AdsTransport;
use crate::value::PlcType;

/// Normalized table key
pub fn table_key(path: &str) -> String {
    path.trim().to_uppercase()
}

/// Handle bound to a local type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEntry {
    /// `None` when allocation failed but the variable is still known
    pub handle: Option<u32>,
    pub ty: Option<PlcType>,
    /// Fixed element count / string length
    pub array_len: Option<usize>,
}

/// Which table a path lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    ReadWrite,
    WriteOnly,
}

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<String, HandleEntry>,
    // first registration of a handle wins
    by_handle: HashMap<u32, String>,
}

impl Table {
    fn insert(&mut self, key: String, entry: HandleEntry) {
        if let Some(h) = entry.handle {
            self.by_handle.entry(h).or_insert_with(|| key.clone());
        }
        self.entries.insert(key, entry);
    }
}

/// Both handle tables of one connection
#[derive(Debug, Default)]
pub struct HandleTable {
    read_write: Table,
    write_only: Table,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-write entry; ignored if the path is already write-only
    pub fn insert_read_write(&mut self, path: &str, handle: u32, ty: PlcType, array_len: Option<usize>) -> bool {
        let key = table_key(path);
        if self.write_only.entries.contains_key(&key) {
            return false;
        }
        self.read_write.insert(
            key,
            HandleEntry {
                handle: Some(handle),
                ty: Some(ty),
                array_len,
            },
        );
        true
    }

    /// Add a write-only entry; ignored if the path is already read-write
    pub fn insert_write_only(&mut self, path: &str, entry: HandleEntry) -> bool {
        let key = table_key(path);
        if self.read_write.entries.contains_key(&key) {
            return false;
        }
        self.write_only.insert(key, entry);
        true
    }

    /// Entry for a path, read-write table first
    pub fn resolve(&self, path: &str) -> Option<(TableKind, &HandleEntry)> {
        let key = table_key(path);
        self.read_write
            .entries
            .get(&key)
            .map(|e| (TableKind::ReadWrite, e))
            .or_else(|| {
                self.write_only
                    .entries
                    .get(&key)
                    .map(|e| (TableKind::WriteOnly, e))
            })
    }

    /// Variable registered for a handle, read-write table first
    pub fn path_for_handle(&self, handle: u32) -> Option<&str> {
        self.read_write
            .by_handle
            .get(&handle)
            .or_else(|| self.write_only.by_handle.get(&handle))
            .map(String::as_str)
    }

    pub fn read_write_handles(&self) -> HashMap<String, Option<u32>> {
        self.read_write
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.handle))
            .collect()
    }

    pub fn write_handles(&self) -> HashMap<String, HandleEntry> {
        self.write_only.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.read_write.entries.len() + self.write_only.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Steady-state registration request
#[derive(Debug, Clone)]
pub struct Registration {
    pub path: String,
    pub ty: PlcType,
    pub kind: TableKind,
    pub array_len: Option<usize>,
}

/// Allocates handles on a transport and records them in a table
pub struct Registrar<'a> {
    transport: &'a dyn AdsTransport,
    table: &'a RwLock<HandleTable>,
}

impl<'a> Registrar<'a> {
    pub fn new(transport: &'a dyn AdsTransport, table: &'a RwLock<HandleTable>) -> Self {
        Self { transport, table }
    }

    fn existing(&self, path: &str) -> Option<Option<u32>> {
        self.table.read().resolve(path).map(|(_, e)| e.handle)
    }

    async fn allocate(&self, path: &str) -> AdsRxResult<Option<u32>> {
        self.transport
            .create_variable_handle(&table_key(path))
            .await
            .map_err(|e| AdsRxError::HandleAllocation {
                variable: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Bulk variant: allocation errors propagate
    pub async fn try_register_read_write(
        &self,
        path: &str,
        ty: PlcType,
        array_len: Option<usize>,
    ) -> AdsRxResult<Option<u32>> {
        if let Some(handle) = self.existing(path) {
            return Ok(handle);
        }
        match self.allocate(path).await? {
            Some(handle) => {
                self.table.write().insert_read_write(path, handle, ty, array_len);
                debug!("Read-write handle {} -> {}", table_key(path), handle);
                Ok(Some(handle))
            },
            None => {
                warn!("Controller declined a handle for {}", path);
                Ok(None)
            },
        }
    }

    /// Bulk variant: allocation errors propagate
    ///
    /// The entry is recorded even without a handle so later writes can report
    /// a precise error.
    pub async fn try_register_write_only(
        &self,
        path: &str,
        ty: Option<PlcType>,
        array_len: Option<usize>,
    ) -> AdsRxResult<Option<u32>> {
        if let Some(handle) = self.existing(path) {
            return Ok(handle);
        }
        let handle = self.allocate(path).await?;
        if handle.is_none() {
            warn!("Controller declined a handle for {}", path);
        }
        self.table.write().insert_write_only(
            path,
            HandleEntry {
                handle,
                ty,
                array_len,
            },
        );
        Ok(handle)
    }

    /// Steady-state variant: failures are reported and yield `None`
    pub async fn register_read_write(
        &self,
        path: &str,
        ty: PlcType,
        array_len: Option<usize>,
        diagnostics: &Diagnostics,
    ) -> Option<u32> {
        self.try_register_read_write(path, ty, array_len)
            .await
            .unwrap_or_else(|e| {
                diagnostics.report(e);
                None
            })
    }

    /// Steady-state variant: failures are reported and yield `None`
    pub async fn register_write_only(
        &self,
        path: &str,
        ty: Option<PlcType>,
        array_len: Option<usize>,
        diagnostics: &Diagnostics,
    ) -> Option<u32> {
        self.try_register_write_only(path, ty, array_len)
            .await
            .unwrap_or_else(|e| {
                diagnostics.report(e);
                None
            })
    }

    /// Register every request; one failure never stops the others
    pub async fn register_batch(
        &self,
        requests: &[Registration],
        diagnostics: &Diagnostics,
    ) -> Vec<Option<u32>> {
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let handle = match request.kind {
                TableKind::ReadWrite => {
                    self.register_read_write(&request.path, request.ty.clone(), request.array_len, diagnostics)
                        .await
                },
                TableKind::WriteOnly => {
                    self.register_write_only(
                        &request.path,
                        Some(request.ty.clone()),
                        request.array_len,
                        diagnostics,
                    )
                    .await
                },
            };
            handles.push(handle);
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_appears_in_one_table() {
        let mut table = HandleTable::new();
        assert!(table.insert_read_write(".Tag1", 1, PlcType::DInt, None));
        assert!(!table.insert_write_only(
            ".TAG1",
            HandleEntry {
                handle: Some(2),
                ty: None,
                array_len: None
            }
        ));
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(".tag1").unwrap().0, TableKind::ReadWrite);
    }

    #[test]
    fn test_reverse_lookup_prefers_read_write() {
        let mut table = HandleTable::new();
        table.insert_write_only(
            ".Flag",
            HandleEntry {
                handle: Some(7),
                ty: Some(PlcType::Bool),
                array_len: None,
            },
        );
        table.insert_read_write(".Tag1", 7, PlcType::DInt, None);
        table.insert_read_write(".Tag2", 8, PlcType::DInt, None);

        assert_eq!(table.path_for_handle(7), Some(".TAG1"));
        assert_eq!(table.path_for_handle(8), Some(".TAG2"));
        assert_eq!(table.path_for_handle(9), None);
    }

    #[test]
    fn test_write_entry_without_handle() {
        let mut table = HandleTable::new();
        table.insert_write_only(
            ".Flag",
            HandleEntry {
                handle: None,
                ty: Some(PlcType::Bool),
                array_len: None,
            },
        );
        assert_eq!(table.write_handles()[".FLAG"].handle, None);
        table.clear();
        assert!(table.is_empty());
    }
}
