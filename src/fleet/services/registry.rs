//! Fleet registry service: node provisioning, registration, heartbeats,
//! liveness sweeps, status reconciliation, and placement selection.

use crate::fleet::{
    domain::{
        Container, ContainerId, ContainerStatus, ContainerStatusReport, FleetDomainError,
        HeartbeatReport, Node, NodeAddress, NodeId, NodeName, NodeToken, ReconcileOutcome,
        ReportOrdering, Resources,
    },
    ports::{FleetRepository, FleetRepositoryError},
};
use chrono::Duration;
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::placement::{LeastLoaded, NodeLoad, PlacementStrategy};
use super::retry::{Change, modify_container, modify_node};

/// Default window after which a silent node is considered offline.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 90;

/// Message recorded on containers orphaned by node deletion.
const ORPHANED_MESSAGE: &str = "hosting node deleted";

/// Request payload for provisioning a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionNodeRequest {
    /// Node name.
    pub name: String,
    /// Node address as `host` or `host:port`.
    pub address: String,
    /// Capacity; the default node capacity when absent.
    pub capacity: Option<Resources>,
}

impl ProvisionNodeRequest {
    /// Creates a provisioning request with default capacity.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            capacity: None,
        }
    }

    /// Sets an explicit capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: Resources) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// How one status report fared against the stored container.
enum Verdict {
    Applied,
    Stale { current: ContainerStatus },
    Illegal { current: ContainerStatus },
    RollBack,
    Purge,
}

/// Applies `report` to `record` and decides how the result is stored.
fn judge(
    record: &mut Container,
    report: &ContainerStatusReport,
    clock: &impl Clock,
) -> Change<Verdict> {
    let current = record.status();
    if record.report_ordering(report.reported_at) == ReportOrdering::Stale {
        return Change::Skip(Verdict::Stale { current });
    }
    let applied = record.apply_report(
        report.status,
        report.ip_address.clone(),
        report.message.clone(),
        report.reported_at,
        clock,
    );
    match (applied, current, report.status) {
        (Err(_), _, _) => Change::Skip(Verdict::Illegal { current }),
        (Ok(()), ContainerStatus::Creating, ContainerStatus::Error) => {
            Change::Skip(Verdict::RollBack)
        }
        (Ok(()), _, ContainerStatus::Deleted) => Change::Skip(Verdict::Purge),
        (Ok(()), _, _) => Change::Commit(Verdict::Applied),
    }
}

/// Result of a processed heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Node state after the heartbeat.
    pub node: Node,
    /// Whether the report was older than one already accepted.
    pub stale: bool,
    /// Per-container reconciliation results; empty for stale reports.
    pub reconciled: Vec<(ContainerId, ReconcileOutcome)>,
}

/// Service-level errors for fleet registry operations.
#[derive(Debug, Error)]
pub enum FleetRegistryServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] FleetDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] FleetRepositoryError),
    /// The presented node token matches no provisioned node.
    #[error("node token not recognised")]
    AuthenticationError,
    /// No online node has the required remaining capacity.
    #[error("no online node has {0} available")]
    PlacementUnavailable(Resources),
    /// No node exists with the given identifier.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
}

/// Result type for fleet registry service operations.
pub type FleetRegistryServiceResult<T> = Result<T, FleetRegistryServiceError>;

/// Fleet registry orchestration service.
pub struct FleetRegistryService<R, C>
where
    R: FleetRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    strategy: Arc<dyn PlacementStrategy>,
    heartbeat_timeout: Duration,
}

impl<R, C> Clone for FleetRegistryService<R, C>
where
    R: FleetRepository,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
            strategy: Arc::clone(&self.strategy),
            heartbeat_timeout: self.heartbeat_timeout,
        }
    }
}

impl<R, C> FleetRegistryService<R, C>
where
    R: FleetRepository,
    C: Clock + Send + Sync,
{
    /// Creates a registry service with least-loaded placement and the
    /// default heartbeat timeout.
    #[must_use]
    pub fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self {
            repository,
            clock,
            strategy: Arc::new(LeastLoaded),
            heartbeat_timeout: Duration::seconds(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
        }
    }

    /// Replaces the placement strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn PlacementStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the heartbeat timeout used by liveness sweeps.
    #[must_use]
    pub const fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Returns the repository shared with other services.
    #[must_use]
    pub fn repository(&self) -> Arc<R> {
        Arc::clone(&self.repository)
    }

    async fn authenticate(&self, token: &NodeToken) -> FleetRegistryServiceResult<Node> {
        self.repository
            .find_node_by_token(&token.digest())
            .await?
            .ok_or(FleetRegistryServiceError::AuthenticationError)
    }

    async fn find_node_or_error(&self, node_id: NodeId) -> FleetRegistryServiceResult<Node> {
        self.repository
            .find_node(node_id)
            .await?
            .ok_or(FleetRegistryServiceError::NodeNotFound(node_id))
    }

    /// Provisions a node record and issues its token.
    ///
    /// The plaintext token is returned once and never stored.
    ///
    /// # Errors
    ///
    /// Returns domain errors for an invalid name, address or capacity, and
    /// repository errors such as a duplicate name.
    pub async fn provision_node(
        &self,
        request: ProvisionNodeRequest,
    ) -> FleetRegistryServiceResult<(Node, NodeToken)> {
        let name = NodeName::new(request.name)?;
        let address = NodeAddress::parse(&request.address)?;
        let capacity = request.capacity.unwrap_or(Resources::DEFAULT).validated()?;
        let (node, token) = Node::provision(name, address, capacity, &*self.clock);
        self.repository.insert_node(&node).await?;
        info!(node_id = %node.id(), name = %node.name(), "provisioned node");
        Ok((node, token))
    }

    /// Registers a node agent, refreshing capacity and liveness.
    ///
    /// Repeated registration with the same token updates the same record.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRegistryServiceError::AuthenticationError`] for an
    /// unknown token, domain errors for invalid capacity, and repository
    /// errors.
    pub async fn register_node(
        &self,
        token: &NodeToken,
        capacity: Resources,
    ) -> FleetRegistryServiceResult<Node> {
        let authenticated = self.authenticate(token).await?;
        let validated = capacity.validated()?;
        let clock = &*self.clock;
        let (node, ()) = modify_node(&*self.repository, authenticated, |record| {
            record.record_registration(validated, clock);
            Change::Commit(())
        })
        .await?;
        info!(node_id = %node.id(), capacity = %node.capacity(), "node registered");
        Ok(node)
    }

    /// Processes a heartbeat: refreshes liveness and reconciles the reported
    /// container statuses.
    ///
    /// Only containers hosted by the reporting node are touched. A report
    /// older than one already accepted still refreshes liveness but is not
    /// reconciled. Container entries without their own timestamp are stamped
    /// with the heartbeat's.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRegistryServiceError::AuthenticationError`] for an
    /// unknown token, and repository errors.
    pub async fn heartbeat(
        &self,
        token: &NodeToken,
        report: HeartbeatReport,
    ) -> FleetRegistryServiceResult<HeartbeatOutcome> {
        let authenticated = self.authenticate(token).await?;
        let reported_at = report.reported_at;
        let clock = &*self.clock;
        let (node, ordering) = modify_node(&*self.repository, authenticated, |record| {
            Change::Commit(record.record_heartbeat(reported_at, clock))
        })
        .await?;

        if ordering == ReportOrdering::Stale {
            debug!(node_id = %node.id(), reported_at = %report.reported_at, "stale heartbeat");
            return Ok(HeartbeatOutcome {
                node,
                stale: true,
                reconciled: Vec::new(),
            });
        }

        let mut reconciled = Vec::with_capacity(report.containers.len());
        for mut container_report in report.containers {
            container_report.reported_at = container_report.reported_at.or(Some(reported_at));
            let container_id = container_report.container_id;
            let outcome = self.reconcile(&node, container_report).await?;
            reconciled.push((container_id, outcome));
        }

        Ok(HeartbeatOutcome {
            node,
            stale: false,
            reconciled,
        })
    }

    /// Applies an asynchronous status report for one container.
    ///
    /// A report stamped earlier than one already applied to the container
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRegistryServiceError::AuthenticationError`] for an
    /// unknown token, and repository errors.
    pub async fn report_container_status(
        &self,
        token: &NodeToken,
        report: ContainerStatusReport,
    ) -> FleetRegistryServiceResult<ReconcileOutcome> {
        let node = self.authenticate(token).await?;
        self.reconcile(&node, report).await
    }

    async fn reconcile(
        &self,
        node: &Node,
        report: ContainerStatusReport,
    ) -> FleetRegistryServiceResult<ReconcileOutcome> {
        let Some(found) = self.repository.find_container(report.container_id).await?
        else {
            debug!(container_id = %report.container_id, "status report for unknown container");
            return Ok(ReconcileOutcome::Unknown);
        };
        if found.node_id() != node.id() {
            warn!(
                container_id = %found.id(),
                node_id = %node.id(),
                "node reported a container it does not host"
            );
            return Ok(ReconcileOutcome::NotOwned);
        }

        let reported = report.status;
        let clock = &*self.clock;
        let written = modify_container(&*self.repository, found, |record| {
            judge(record, &report, clock)
        })
        .await;
        let (container, verdict) = match written {
            Ok(pair) => pair,
            Err(FleetRepositoryError::ContainerNotFound(container_id)) => {
                debug!(%container_id, "container purged while applying report");
                return Ok(ReconcileOutcome::Unknown);
            }
            Err(err) => return Err(err.into()),
        };

        match verdict {
            Verdict::Applied => Ok(ReconcileOutcome::Applied { status: reported }),
            Verdict::Stale { current } => {
                debug!(
                    container_id = %container.id(),
                    reported_at = ?report.reported_at,
                    last_report_at = ?container.last_report_at(),
                    "ignoring stale report"
                );
                Ok(ReconcileOutcome::Ignored { current, reported })
            }
            Verdict::Illegal { current } => {
                debug!(container_id = %container.id(), %current, %reported, "ignoring out-of-order report");
                Ok(ReconcileOutcome::Ignored { current, reported })
            }
            Verdict::RollBack => {
                self.roll_back(&container).await?;
                Ok(ReconcileOutcome::RolledBack)
            }
            Verdict::Purge => {
                self.repository.delete_container(container.id()).await?;
                info!(container_id = %container.id(), "container deleted");
                Ok(ReconcileOutcome::Purged)
            }
        }
    }

    async fn roll_back(&self, container: &Container) -> FleetRegistryServiceResult<()> {
        warn!(
            container_id = %container.id(),
            owner = %container.owner(),
            reason = container.error_message().unwrap_or("unspecified"),
            "provisioning failed, releasing container assignment"
        );
        self.repository.delete_container(container.id()).await?;
        Ok(())
    }

    /// Marks every node silent beyond the heartbeat timeout as offline.
    ///
    /// Containers on those nodes keep their last known status. Returns the
    /// nodes that flipped. A heartbeat stored while the sweep runs wins: the
    /// node is re-checked against it before being flipped.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn liveness_sweep(&self) -> FleetRegistryServiceResult<Vec<NodeId>> {
        let timeout = self.heartbeat_timeout;
        let clock = &*self.clock;
        let mut flipped = Vec::new();
        for listed in self.repository.list_nodes().await? {
            let swept = modify_node(&*self.repository, listed, |record| {
                if record.sweep(timeout, clock) {
                    Change::Commit(true)
                } else {
                    Change::Skip(false)
                }
            })
            .await;
            match swept {
                Ok((node, true)) => {
                    info!(
                        node_id = %node.id(),
                        name = %node.name(),
                        last_seen = ?node.last_seen(),
                        "node marked offline"
                    );
                    flipped.push(node.id());
                }
                Ok((_, false)) | Err(FleetRepositoryError::NodeNotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(flipped)
    }

    /// Returns one online node with room for `required`.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRegistryServiceError::PlacementUnavailable`] when no
    /// online node qualifies, and repository errors.
    pub async fn select_node_for_placement(
        &self,
        required: Resources,
    ) -> FleetRegistryServiceResult<Node> {
        let candidates = self.online_loads().await?;
        let selected = self
            .strategy
            .select(&candidates, &required)
            .ok_or(FleetRegistryServiceError::PlacementUnavailable(required))?;
        debug!(
            node_id = %selected.node.id(),
            strategy = self.strategy.name(),
            allocated = %selected.allocated,
            "selected node for placement"
        );
        Ok(selected.node.clone())
    }

    async fn online_loads(&self) -> FleetRegistryServiceResult<Vec<NodeLoad>> {
        let nodes = self.repository.list_nodes().await?;
        let mut loads = Vec::with_capacity(nodes.len());
        for node in nodes.into_iter().filter(Node::is_online) {
            let allocated = self.allocated_on(node.id()).await?;
            loads.push(NodeLoad { node, allocated });
        }
        Ok(loads)
    }

    /// Returns the capacity allocated to containers on `node_id`.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn allocated_on(&self, node_id: NodeId) -> FleetRegistryServiceResult<Resources> {
        let containers = self.repository.list_containers_on_node(node_id).await?;
        Ok(containers
            .iter()
            .filter(|container| container.holds_capacity())
            .fold(Resources::default(), |total, container| {
                total.saturating_add(&container.allocation())
            }))
    }

    /// Deletes a node; its remaining containers are marked errored.
    ///
    /// Returns the orphaned containers.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRegistryServiceError::NodeNotFound`] when no node has
    /// the given identifier, and repository errors.
    pub async fn delete_node(
        &self,
        node_id: NodeId,
    ) -> FleetRegistryServiceResult<Vec<ContainerId>> {
        let node = self.find_node_or_error(node_id).await?;
        let mut orphaned = Vec::new();
        let clock = &*self.clock;
        for hosted in self.repository.list_containers_on_node(node_id).await? {
            let marked = modify_container(&*self.repository, hosted, |record| {
                if record.mark_error(ORPHANED_MESSAGE, clock).is_ok() {
                    Change::Commit(true)
                } else {
                    Change::Skip(false)
                }
            })
            .await;
            match marked {
                Ok((container, true)) => orphaned.push(container.id()),
                Ok((_, false)) | Err(FleetRepositoryError::ContainerNotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.repository.delete_node(node_id).await?;
        info!(
            node_id = %node.id(),
            name = %node.name(),
            orphaned = orphaned.len(),
            "node deleted"
        );
        Ok(orphaned)
    }

    /// Finds a node by identifier.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_node(&self, node_id: NodeId) -> FleetRegistryServiceResult<Option<Node>> {
        Ok(self.repository.find_node(node_id).await?)
    }

    /// Lists all nodes.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn list_nodes(&self) -> FleetRegistryServiceResult<Vec<Node>> {
        Ok(self.repository.list_nodes().await?)
    }
}
