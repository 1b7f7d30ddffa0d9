//! Container aggregate root and lifecycle state machine.

use super::{
    ContainerId, FleetDomainError, NodeId, ParseContainerStatusError, ParsePortProtocolError,
    ReportOrdering, Resources, UserId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every container name.
const CONTAINER_NAME_PREFIX: &str = "den-";

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Placed on a node; the agent is provisioning it.
    Creating,
    /// A start was requested and not yet confirmed.
    Starting,
    /// Running and reachable.
    Running,
    /// A stop was requested and not yet confirmed.
    Stopping,
    /// Stopped by request or by the agent.
    Stopped,
    /// Deletion was requested and not yet confirmed.
    Deleting,
    /// Deletion confirmed. Terminal.
    Deleted,
    /// Provisioning or a runtime operation failed.
    Error,
}

impl ContainerStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }

    /// Returns whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        if matches!(target, Self::Error) {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Self::Creating, Self::Running | Self::Deleting)
                | (
                    Self::Starting,
                    Self::Running | Self::Stopped | Self::Deleting
                )
                | (
                    Self::Running,
                    Self::Stopping | Self::Stopped | Self::Deleting
                )
                | (
                    Self::Stopping,
                    Self::Stopped | Self::Running | Self::Deleting
                )
                | (
                    Self::Stopped,
                    Self::Starting | Self::Running | Self::Deleting
                )
                | (Self::Deleting, Self::Deleted)
                | (
                    Self::Error,
                    Self::Starting | Self::Running | Self::Stopped | Self::Deleting
                )
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ContainerStatus {
    type Error = ParseContainerStatusError;

    fn try_from(value: &str) -> Result<Self, ParseContainerStatusError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "creating" => Ok(Self::Creating),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            "error" | "failed" => Ok(Self::Error),
            _ => Err(ParseContainerStatusError(value.to_owned())),
        }
    }
}

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    /// TCP.
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

impl PortProtocol {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl TryFrom<&str> for PortProtocol {
    type Error = ParsePortProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(ParsePortProtocolError(value.to_owned())),
        }
    }
}

/// External port allocated on a node and mapped into a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub internal_port: u16,
    /// Port on the hosting node.
    pub external_port: u16,
    /// Transport protocol.
    pub protocol: PortProtocol,
}

impl PortMapping {
    /// Creates a validated port mapping.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidPort`] when either port is zero or
    /// above 65535.
    pub fn new(
        internal_port: u32,
        external_port: u32,
        protocol: PortProtocol,
    ) -> Result<Self, FleetDomainError> {
        Ok(Self {
            internal_port: validate_port(internal_port)?,
            external_port: validate_port(external_port)?,
            protocol,
        })
    }
}

fn validate_port(port: u32) -> Result<u16, FleetDomainError> {
    u16::try_from(port)
        .ok()
        .filter(|valid| *valid != 0)
        .ok_or(FleetDomainError::InvalidPort(port))
}

/// Container aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    id: ContainerId,
    owner: UserId,
    name: String,
    node_id: NodeId,
    status: ContainerStatus,
    allocation: Resources,
    ip_address: Option<String>,
    ports: Vec<PortMapping>,
    error_message: Option<String>,
    #[serde(default)]
    last_report_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    revision: u64,
}

/// Parameter object for reconstructing persisted container state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedContainerData {
    /// Persisted container identifier.
    pub id: ContainerId,
    /// Persisted owner.
    pub owner: UserId,
    /// Persisted name.
    pub name: String,
    /// Persisted hosting node.
    pub node_id: NodeId,
    /// Persisted status.
    pub status: ContainerStatus,
    /// Persisted allocation.
    pub allocation: Resources,
    /// Persisted network address.
    pub ip_address: Option<String>,
    /// Persisted port mappings.
    pub ports: Vec<PortMapping>,
    /// Persisted failure message.
    pub error_message: Option<String>,
    /// Persisted timestamp of the newest applied agent report.
    pub last_report_at: Option<DateTime<Utc>>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Persisted write revision.
    pub revision: u64,
}

impl Container {
    /// Creates a container placed on `node_id`, in the `creating` state.
    #[must_use]
    pub fn place(
        owner: UserId,
        username: &str,
        node_id: NodeId,
        allocation: Resources,
        clock: &impl Clock,
    ) -> Self {
        let timestamp = clock.utc();
        Self {
            id: ContainerId::for_owner(owner),
            owner,
            name: format!("{CONTAINER_NAME_PREFIX}{}", username.trim()),
            node_id,
            status: ContainerStatus::Creating,
            allocation,
            ip_address: None,
            ports: Vec::new(),
            error_message: None,
            last_report_at: None,
            created_at: timestamp,
            updated_at: timestamp,
            revision: 0,
        }
    }

    /// Reconstructs a container from persistence.
    #[must_use]
    pub fn from_persisted(data: PersistedContainerData) -> Self {
        Self {
            id: data.id,
            owner: data.owner,
            name: data.name,
            node_id: data.node_id,
            status: data.status,
            allocation: data.allocation,
            ip_address: data.ip_address,
            ports: data.ports,
            error_message: data.error_message,
            last_report_at: data.last_report_at,
            created_at: data.created_at,
            updated_at: data.updated_at,
            revision: data.revision,
        }
    }

    /// Returns the container identifier.
    #[must_use]
    pub const fn id(&self) -> ContainerId {
        self.id
    }

    /// Returns the owning user.
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }

    /// Returns the container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the hosting node.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ContainerStatus {
        self.status
    }

    /// Returns the resource allocation.
    #[must_use]
    pub const fn allocation(&self) -> Resources {
        self.allocation
    }

    /// Returns the container's network address once running.
    #[must_use]
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Returns the allocated port mappings.
    #[must_use]
    pub fn ports(&self) -> &[PortMapping] {
        &self.ports
    }

    /// Returns the last failure message.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the write revision this copy was read at.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Moves the copy to the next revision once it has been stored.
    pub const fn advance_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Returns the agent timestamp of the newest applied report.
    #[must_use]
    pub const fn last_report_at(&self) -> Option<DateTime<Utc>> {
        self.last_report_at
    }

    /// Orders an agent report stamped `reported_at` against the newest one
    /// already applied.
    ///
    /// Unstamped reports are never stale.
    #[must_use]
    pub fn report_ordering(&self, reported_at: Option<DateTime<Utc>>) -> ReportOrdering {
        match (reported_at, self.last_report_at) {
            (Some(reported), Some(previous)) if reported < previous => ReportOrdering::Stale,
            _ => ReportOrdering::Fresh,
        }
    }

    /// Returns whether the allocation still counts against node capacity.
    #[must_use]
    pub const fn holds_capacity(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Records a requested start.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidLifecycleTransition`] when the
    /// container cannot be started from its current status.
    pub fn begin_start(&mut self, clock: &impl Clock) -> Result<(), FleetDomainError> {
        self.transition_to(ContainerStatus::Starting, clock)
    }

    /// Records a requested stop.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidLifecycleTransition`] when the
    /// container cannot be stopped from its current status.
    pub fn begin_stop(&mut self, clock: &impl Clock) -> Result<(), FleetDomainError> {
        self.transition_to(ContainerStatus::Stopping, clock)
    }

    /// Records a requested deletion.
    ///
    /// Requesting deletion of a container already being deleted is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidLifecycleTransition`] for a deleted
    /// container.
    pub fn begin_delete(&mut self, clock: &impl Clock) -> Result<(), FleetDomainError> {
        if self.status == ContainerStatus::Deleting {
            return Ok(());
        }
        self.transition_to(ContainerStatus::Deleting, clock)
    }

    /// Returns a container whose start or stop request could not be
    /// dispatched to the status it had before the request.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidLifecycleTransition`] when the
    /// container is not waiting on a start or stop, or `previous` is not
    /// reachable from it.
    pub fn withdraw_request(
        &mut self,
        previous: ContainerStatus,
        clock: &impl Clock,
    ) -> Result<(), FleetDomainError> {
        if !matches!(
            self.status,
            ContainerStatus::Starting | ContainerStatus::Stopping
        ) {
            return Err(FleetDomainError::InvalidLifecycleTransition {
                from: self.status.as_str().to_owned(),
                to: previous.as_str().to_owned(),
            });
        }
        self.transition_to(previous, clock)
    }

    /// Applies a status confirmed by the hosting node agent.
    ///
    /// A report repeating the current status only refreshes the address.
    /// `reported_at` is the agent's own timestamp, kept to order later
    /// reports.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidLifecycleTransition`] when the
    /// reported status is not reachable from the current one.
    pub fn apply_report(
        &mut self,
        status: ContainerStatus,
        ip_address: Option<String>,
        message: Option<String>,
        reported_at: Option<DateTime<Utc>>,
        clock: &impl Clock,
    ) -> Result<(), FleetDomainError> {
        if status != self.status {
            self.transition_to(status, clock)?;
        }
        if let Some(stamp) = reported_at {
            let newest = self
                .last_report_at
                .map_or(stamp, |previous| previous.max(stamp));
            self.last_report_at = Some(newest);
        }
        if let Some(address) = ip_address.filter(|value| !value.trim().is_empty()) {
            self.ip_address = Some(address);
        }
        match status {
            ContainerStatus::Error if message.is_some() => self.error_message = message,
            ContainerStatus::Running => self.error_message = None,
            _ => {}
        }
        self.touch(clock);
        Ok(())
    }

    /// Marks the container errored with `message`.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidLifecycleTransition`] for a deleted
    /// container.
    pub fn mark_error(
        &mut self,
        message: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), FleetDomainError> {
        if self.status != ContainerStatus::Error {
            self.transition_to(ContainerStatus::Error, clock)?;
        }
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Records an allocated port mapping.
    pub fn add_port(&mut self, mapping: PortMapping, clock: &impl Clock) {
        if !self.ports.contains(&mapping) {
            self.ports.push(mapping);
        }
        self.touch(clock);
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }

    fn transition_to(
        &mut self,
        target: ContainerStatus,
        clock: &impl Clock,
    ) -> Result<(), FleetDomainError> {
        if !self.status.can_transition_to(target) {
            return Err(FleetDomainError::InvalidLifecycleTransition {
                from: self.status.as_str().to_owned(),
                to: target.as_str().to_owned(),
            });
        }

        self.status = target;
        self.touch(clock);
        Ok(())
    }
}
