//! Host service monitoring
//!
//! The controller runtime depends on host services (system service, event
//! logger). Their aggregate status is one of the two readiness signals the
//! supervisor waits for.

use async_trait::async_trait;
use errors::AdsRxResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a host service, and of the aggregate of the watched set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
    Paused,
    Stopping,
    Starting,
    StatusChanging,
    Faulted,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of a service listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub status: ServiceStatus,
}

/// Platform service controller binding
#[async_trait]
pub trait ServiceMonitor: Send + Sync {
    /// List services with their current status
    async fn list(&self) -> AdsRxResult<Vec<ServiceEntry>>;

    /// Request a service start
    async fn start(&self, name: &str) -> AdsRxResult<()>;

    /// Services watched when the client options name none
    fn default_watch(&self) -> ServiceWatch {
        ServiceWatch::default()
    }
}

/// Monitor for hosts without service control; every watched service is
/// considered running
#[derive(Debug, Default, Clone)]
pub struct NoServiceMonitor;

#[async_trait]
impl ServiceMonitor for NoServiceMonitor {
    async fn list(&self) -> AdsRxResult<Vec<ServiceEntry>> {
        Ok(Vec::new())
    }

    async fn start(&self, _name: &str) -> AdsRxResult<()> {
        Ok(())
    }

    fn default_watch(&self) -> ServiceWatch {
        ServiceWatch::none()
    }
}

/// Which services must be running
///
/// Each group is satisfied when any of its members runs; all groups must be
/// satisfied. An empty watch is always healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWatch {
    pub groups: Vec<Vec<String>>,
}

impl Default for ServiceWatch {
    fn default() -> Self {
        Self {
            groups: vec![
                vec![
                    "TwinCAT System Service".to_string(),
                    "TwinCAT3 System Service".to_string(),
                ],
                vec!["TcEventLogger".to_string()],
            ],
        }
    }
}

impl ServiceWatch {
    /// Watch nothing (hosts where the runtime is not service-managed)
    pub fn none() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn is_watched(&self, name: &str) -> bool {
        self.groups.iter().flatten().any(|n| n == name)
    }

    /// Watched entries from a full listing
    pub fn filter<'a>(&self, entries: &'a [ServiceEntry]) -> Vec<&'a ServiceEntry> {
        entries.iter().filter(|e| self.is_watched(&e.name)).collect()
    }

    /// Aggregate status: `Running` when every group has a running member
    pub fn aggregate(&self, entries: &[ServiceEntry]) -> ServiceStatus {
        let healthy = self.groups.iter().all(|group| {
            group.iter().any(|name| {
                entries
                    .iter()
                    .any(|e| &e.name == name && e.status == ServiceStatus::Running)
            })
        });
        if healthy {
            ServiceStatus::Running
        } else {
            ServiceStatus::Faulted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, status: ServiceStatus) -> ServiceEntry {
        ServiceEntry {
            name: name.to_string(),
            status,
        }
    }

    #[test]
    fn test_aggregate_any_of_group() {
        let watch = ServiceWatch::default();
        let entries = vec![
            entry("TwinCAT3 System Service", ServiceStatus::Running),
            entry("TcEventLogger", ServiceStatus::Running),
            entry("Spooler", ServiceStatus::Stopped),
        ];
        assert_eq!(watch.aggregate(&entries), ServiceStatus::Running);
        assert_eq!(watch.filter(&entries).len(), 2);
    }

    #[test]
    fn test_aggregate_faulted_when_group_missing() {
        let watch = ServiceWatch::default();
        let entries = vec![
            entry("TwinCAT System Service", ServiceStatus::Running),
            entry("TcEventLogger", ServiceStatus::Stopped),
        ];
        assert_eq!(watch.aggregate(&entries), ServiceStatus::Faulted);
        assert_eq!(watch.aggregate(&[]), ServiceStatus::Faulted);
    }

    #[test]
    fn test_empty_watch_is_healthy() {
        assert_eq!(ServiceWatch::none().aggregate(&[]), ServiceStatus::Running);
    }
}
