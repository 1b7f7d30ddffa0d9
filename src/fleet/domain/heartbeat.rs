//! Status reports submitted by node agents.

use super::{ContainerId, ContainerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One container's status as observed by its hosting node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatusReport {
    /// Reported container.
    pub container_id: ContainerId,
    /// Observed status.
    pub status: ContainerStatus,
    /// Container network address, when known.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Failure detail accompanying an `error` status.
    #[serde(default)]
    pub message: Option<String>,
    /// Agent-side time the status was observed.
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
}

impl ContainerStatusReport {
    /// Creates a report without address or message.
    #[must_use]
    pub const fn new(container_id: ContainerId, status: ContainerStatus) -> Self {
        Self {
            container_id,
            status,
            ip_address: None,
            message: None,
            reported_at: None,
        }
    }

    /// Attaches the container network address.
    #[must_use]
    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Attaches a failure message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Stamps the report with the agent's observation time.
    #[must_use]
    pub const fn with_reported_at(mut self, reported_at: DateTime<Utc>) -> Self {
        self.reported_at = Some(reported_at);
        self
    }
}

/// Periodic liveness report carrying a snapshot of the node's containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    /// Node-side timestamp of the snapshot.
    pub reported_at: DateTime<Utc>,
    /// Container statuses observed on the node.
    #[serde(default)]
    pub containers: Vec<ContainerStatusReport>,
}

/// What reconciling one status report did to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The report moved or refreshed the container.
    Applied {
        /// Status after applying the report.
        status: ContainerStatus,
    },
    /// Deletion was confirmed and the row purged.
    Purged,
    /// Provisioning failed; the row was purged and the owner unassigned.
    RolledBack,
    /// The report was older than one already applied, or not a legal
    /// transition, and was dropped.
    Ignored {
        /// Status the container kept.
        current: ContainerStatus,
        /// Status the report claimed.
        reported: ContainerStatus,
    },
    /// The container is not hosted by the reporting node.
    NotOwned,
    /// No such container exists.
    Unknown,
}
