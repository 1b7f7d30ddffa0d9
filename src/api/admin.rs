//! Administrative routes for nodes and containers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{ApiState, auth::authorize_admin, error::ApiError};
use crate::fleet::{
    domain::{
        Container, ContainerId, Node, NodeId, PortMapping, PortProtocol, Resources, UserId,
    },
    ports::{FleetRepository, NodeAgent, SshCredential},
    services::{DeletionOutcome, ProvisionNodeRequest, RequestContainer},
};

type Shared<R, A, C> = Arc<ApiState<R, A, C>>;

/// Admin routes, each guarded by `admin_token`.
pub(super) fn routes<R, A, C>(admin_token: Arc<str>) -> Router<Shared<R, A, C>>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    Router::new()
        .route(
            "/api/admin/nodes",
            post(provision_node::<R, A, C>).get(list_nodes::<R, A, C>),
        )
        .route(
            "/api/admin/nodes/:id",
            get(get_node::<R, A, C>).delete(delete_node::<R, A, C>),
        )
        .route(
            "/api/admin/containers",
            post(request_container::<R, A, C>).get(list_containers::<R, A, C>),
        )
        .route(
            "/api/admin/containers/:id",
            get(get_container::<R, A, C>).delete(delete_container::<R, A, C>),
        )
        .route(
            "/api/admin/containers/:id/start",
            post(start_container::<R, A, C>),
        )
        .route(
            "/api/admin/containers/:id/stop",
            post(stop_container::<R, A, C>),
        )
        .route(
            "/api/admin/containers/:id/ports",
            post(allocate_port::<R, A, C>),
        )
        .route(
            "/api/admin/containers/:id/ssh",
            post(configure_ssh::<R, A, C>),
        )
        .route_layer(middleware::from_fn_with_state(admin_token, require_admin))
}

async fn require_admin(
    State(admin_token): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authorize_admin(request.headers(), &admin_token)?;
    Ok(next.run(request).await)
}

/// Node as shown to administrators; the token digest stays private.
#[derive(Debug, Serialize)]
pub(super) struct NodeView {
    id: NodeId,
    name: String,
    address: String,
    capacity: Resources,
    allocated: Resources,
    online: bool,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl NodeView {
    fn new(node: &Node, allocated: Resources) -> Self {
        Self {
            id: node.id(),
            name: node.name().to_string(),
            address: node.address().to_string(),
            capacity: node.capacity(),
            allocated,
            online: node.is_online(),
            last_seen: node.last_seen(),
            created_at: node.created_at(),
        }
    }
}

async fn view_node<R, A, C>(state: &ApiState<R, A, C>, node: &Node) -> Result<NodeView, ApiError>
where
    R: FleetRepository,
    A: NodeAgent,
    C: Clock + Send + Sync,
{
    let allocated = state.registry.allocated_on(node.id()).await?;
    Ok(NodeView::new(node, allocated))
}

#[derive(Debug, Deserialize)]
pub(super) struct ProvisionNodeBody {
    name: String,
    address: String,
    #[serde(default)]
    capacity: Option<Resources>,
}

async fn provision_node<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Json(body): Json<ProvisionNodeBody>,
) -> Result<Response, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let request = ProvisionNodeRequest {
        name: body.name,
        address: body.address,
        capacity: body.capacity,
    };
    let (node, token) = state.registry.provision_node(request).await?;
    let view = view_node(&state, &node).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "node": view, "token": token.expose() })),
    )
        .into_response())
}

async fn list_nodes<R, A, C>(
    State(state): State<Shared<R, A, C>>,
) -> Result<Json<Vec<NodeView>>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let nodes = state.registry.list_nodes().await?;
    let mut views = Vec::with_capacity(nodes.len());
    for node in &nodes {
        views.push(view_node(&state, node).await?);
    }
    Ok(Json(views))
}

async fn get_node<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<NodeView>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let node_id = NodeId::from_uuid(id);
    let node = state
        .registry
        .find_node(node_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("node {node_id} not found")))?;
    Ok(Json(view_node(&state, &node).await?))
}

async fn delete_node<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let node_id = NodeId::from_uuid(id);
    let orphaned = state.registry.delete_node(node_id).await?;
    Ok(Json(json!({ "node_id": node_id, "orphaned": orphaned })))
}

#[derive(Debug, Deserialize)]
pub(super) struct RequestContainerBody {
    owner: UserId,
    username: String,
    #[serde(default)]
    allocation: Option<Resources>,
}

async fn request_container<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Json(body): Json<RequestContainerBody>,
) -> Result<(StatusCode, Json<Container>), ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let request = RequestContainer::new(body.owner, body.username)
        .with_allocation(body.allocation.unwrap_or(state.default_allocation));
    let container = state.lifecycle.request_container(request).await?;
    Ok((StatusCode::CREATED, Json(container)))
}

async fn list_containers<R, A, C>(
    State(state): State<Shared<R, A, C>>,
) -> Result<Json<Vec<Container>>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    Ok(Json(state.lifecycle.list_containers().await?))
}

async fn get_container<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Container>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let container_id = ContainerId::from_uuid(id);
    state
        .lifecycle
        .find_container(container_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("container {container_id} not found")))
}

async fn start_container<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Container>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let container = state
        .lifecycle
        .start_container(ContainerId::from_uuid(id))
        .await?;
    Ok(Json(container))
}

async fn stop_container<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Container>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let container = state
        .lifecycle
        .stop_container(ContainerId::from_uuid(id))
        .await?;
    Ok(Json(container))
}

async fn delete_container<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let container_id = ContainerId::from_uuid(id);
    let response = match state.lifecycle.delete_container(container_id).await? {
        DeletionOutcome::Pending(container) => {
            (StatusCode::ACCEPTED, Json(container)).into_response()
        }
        DeletionOutcome::Purged => {
            Json(json!({ "container_id": container_id, "purged": true })).into_response()
        }
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub(super) struct AllocatePortBody {
    internal_port: u16,
    #[serde(default)]
    protocol: PortProtocol,
}

async fn allocate_port<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AllocatePortBody>,
) -> Result<Json<PortMapping>, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let mapping = state
        .lifecycle
        .allocate_port(ContainerId::from_uuid(id), body.internal_port, body.protocol)
        .await?;
    Ok(Json(mapping))
}

#[derive(Debug, Deserialize)]
pub(super) struct ConfigureSshBody {
    username: String,
    credential: SshCredential,
}

async fn configure_ssh<R, A, C>(
    State(state): State<Shared<R, A, C>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfigureSshBody>,
) -> Result<StatusCode, ApiError>
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    state
        .lifecycle
        .configure_ssh(ContainerId::from_uuid(id), &body.username, &body.credential)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
