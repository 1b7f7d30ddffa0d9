//! Routes called by node agents.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use super::{ApiState, auth::bearer_token, error::ApiError};
use crate::fleet::{
    domain::{
        ContainerId, ContainerStatus, ContainerStatusReport, HeartbeatReport, NodeId, NodeToken,
        ReconcileOutcome, Resources,
    },
    ports::{FleetRepository, NodeAgent},
};

#[derive(Debug, Deserialize)]
pub(super) struct RegisterBody {
    capacity: Resources,
}

#[derive(Debug, Serialize)]
pub(super) struct RegisterResponse {
    node_id: NodeId,
    online: bool,
    heartbeat_interval_secs: u64,
}

pub(super) async fn register<R, A, C>(
    State(state): State<Arc<ApiState<R, A, C>>>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<Json<RegisterResponse>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let token = NodeToken::from_bearer(bearer_token(&headers)?);
    let node = state.registry.register_node(&token, body.capacity).await?;
    Ok(Json(RegisterResponse {
        node_id: node.id(),
        online: node.is_online(),
        heartbeat_interval_secs: state.heartbeat_interval_secs,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct HeartbeatBody {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    containers: Vec<ContainerStatusReport>,
}

#[derive(Debug, Serialize)]
pub(super) struct Reconciled {
    container_id: ContainerId,
    #[serde(flatten)]
    outcome: ReconcileOutcome,
}

#[derive(Debug, Serialize)]
pub(super) struct HeartbeatResponse {
    node_id: NodeId,
    online: bool,
    stale: bool,
    reconciled: Vec<Reconciled>,
}

pub(super) async fn heartbeat<R, A, C>(
    State(state): State<Arc<ApiState<R, A, C>>>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<HeartbeatResponse>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let token = NodeToken::from_bearer(bearer_token(&headers)?);
    let report = HeartbeatReport {
        reported_at: body.timestamp,
        containers: body.containers,
    };
    let outcome = state.registry.heartbeat(&token, report).await?;
    Ok(Json(HeartbeatResponse {
        node_id: outcome.node.id(),
        online: outcome.node.is_online(),
        stale: outcome.stale,
        reconciled: outcome
            .reconciled
            .into_iter()
            .map(|(container_id, reconcile)| Reconciled {
                container_id,
                outcome: reconcile,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusBody {
    status: ContainerStatus,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub(super) async fn report_status<R, A, C>(
    State(state): State<Arc<ApiState<R, A, C>>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<Json<Value>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let token = NodeToken::from_bearer(bearer_token(&headers)?);
    let container_id = ContainerId::from_uuid(id);
    debug!(%container_id, status = %body.status, reported_at = ?body.timestamp, "status report");

    let report = ContainerStatusReport {
        container_id,
        status: body.status,
        ip_address: body.ip_address,
        message: body.message,
        reported_at: body.timestamp,
    };
    match state.registry.report_container_status(&token, report).await? {
        ReconcileOutcome::Applied { status } => {
            Ok(Json(json!({ "container_id": container_id, "status": status })))
        }
        ReconcileOutcome::Purged | ReconcileOutcome::RolledBack => {
            Ok(Json(json!({ "container_id": container_id, "purged": true })))
        }
        ReconcileOutcome::Ignored { current, .. } => Ok(Json(json!({
            "container_id": container_id,
            "status": current,
            "ignored": true,
        }))),
        ReconcileOutcome::NotOwned => Err(ApiError::new(
            StatusCode::FORBIDDEN,
            format!("container {container_id} is not hosted by this node"),
        )),
        ReconcileOutcome::Unknown => Err(ApiError::not_found(format!(
            "container {container_id} not found"
        ))),
    }
}
