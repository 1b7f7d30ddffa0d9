//! HTTP API behaviour through the axum router.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tower::ServiceExt;
use warren::api::{self, ApiState};
use warren::clock::ManualClock;
use warren::fleet::{
    adapters::memory::{InMemoryFleetRepository, InMemoryNodeAgent},
    domain::{NodeToken, Resources, UserId},
    services::{ContainerLifecycleService, FleetRegistryService, ProvisionNodeRequest},
};

const ADMIN_TOKEN: &str = "admin-secret";

type Registry = FleetRegistryService<InMemoryFleetRepository, ManualClock>;

struct Harness {
    router: Router,
    registry: Registry,
}

fn harness(admin_token: Option<&str>) -> Harness {
    let repository = Arc::new(InMemoryFleetRepository::new());
    let clock = Arc::new(ManualClock::default());
    let registry = FleetRegistryService::new(Arc::clone(&repository), Arc::clone(&clock));
    let lifecycle = ContainerLifecycleService::new(
        registry.clone(),
        Arc::new(InMemoryNodeAgent::new()),
        clock,
    );
    let base = ApiState::new(registry.clone(), lifecycle)
        .with_default_allocation(Resources::new(1024, 1, 5))
        .with_heartbeat_interval_secs(15);
    let state = match admin_token {
        Some(token) => base.with_admin_token(token),
        None => base,
    };
    Harness {
        router: api::router(state),
        registry,
    }
}

#[fixture]
fn admin() -> Harness {
    harness(Some(ADMIN_TOKEN))
}

impl Harness {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(bearer) = token {
            builder = builder.header("Authorization", format!("Bearer {bearer}"));
        }
        let request = match body {
            Some(payload) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(payload.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router answers");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let parsed = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, parsed)
    }

    async fn provision(&self, name: &str) -> NodeToken {
        let (_, token) = self
            .registry
            .provision_node(ProvisionNodeRequest::new(name, "10.1.0.5"))
            .await
            .expect("provision node");
        token
    }

    async fn register(&self, token: &NodeToken) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/nodes/register",
                Some(token.expose()),
                Some(json!({ "capacity": { "memory_mb": 8192, "cpu_cores": 8, "storage_gb": 100 } })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn node_registers_with_its_token(admin: Harness) {
    let token = admin.provision("edge-1").await;

    let body = admin.register(&token).await;

    assert_eq!(body["online"], json!(true));
    assert_eq!(body["heartbeat_interval_secs"], json!(15));
    assert!(body["node_id"].is_string());
}

#[rstest]
#[case(None)]
#[case(Some("not-a-node-token"))]
#[tokio::test(flavor = "multi_thread")]
async fn registration_without_a_valid_token_is_unauthorized(
    admin: Harness,
    #[case] token: Option<&str>,
) {
    let (status, body) = admin
        .call(
            Method::POST,
            "/api/nodes/register",
            token,
            Some(json!({ "capacity": { "memory_mb": 8192, "cpu_cores": 8, "storage_gb": 100 } })),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_reports_liveness_and_staleness(admin: Harness) {
    let token = admin.provision("edge-1").await;
    admin.register(&token).await;

    let (status, fresh) = admin
        .call(
            Method::POST,
            "/api/nodes/heartbeat",
            Some(token.expose()),
            Some(json!({ "timestamp": "2026-01-01T00:00:10Z", "containers": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fresh["online"], json!(true));
    assert_eq!(fresh["stale"], json!(false));

    let (_, stale) = admin
        .call(
            Method::POST,
            "/api/nodes/heartbeat",
            Some(token.expose()),
            Some(json!({ "timestamp": "2026-01-01T00:00:05Z" })),
        )
        .await;
    assert_eq!(stale["stale"], json!(true));
    assert_eq!(stale["online"], json!(true));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn container_lifecycle_through_admin_and_agent_routes(admin: Harness) {
    let token = admin.provision("edge-1").await;
    admin.register(&token).await;
    let owner = UserId::new();

    let (status, created) = admin
        .call(
            Method::POST,
            "/api/admin/containers",
            Some(ADMIN_TOKEN),
            Some(json!({ "owner": owner, "username": "alice" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["status"], json!("creating"));
    assert_eq!(created["name"], json!("den-alice"));
    assert_eq!(created["allocation"]["memory_mb"], json!(1024));
    let container_id = created["id"].as_str().expect("container id").to_owned();

    let (status, duplicate) = admin
        .call(
            Method::POST,
            "/api/admin/containers",
            Some(ADMIN_TOKEN),
            Some(json!({ "owner": owner, "username": "alice" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{duplicate}");

    let (status, running) = admin
        .call(
            Method::POST,
            &format!("/api/containers/{container_id}/status"),
            Some(token.expose()),
            Some(json!({ "status": "running", "ip_address": "172.17.0.2" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(running["status"], json!("running"));

    let (status, deleting) = admin
        .call(
            Method::DELETE,
            &format!("/api/admin/containers/{container_id}"),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(deleting["status"], json!("deleting"));

    let (status, purged) = admin
        .call(
            Method::POST,
            &format!("/api/containers/{container_id}/status"),
            Some(token.expose()),
            Some(json!({ "status": "deleted" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(purged["purged"], json!(true));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_status_is_ignored_not_rejected(admin: Harness) {
    let token = admin.provision("edge-1").await;
    admin.register(&token).await;
    let (_, created) = admin
        .call(
            Method::POST,
            "/api/admin/containers",
            Some(ADMIN_TOKEN),
            Some(json!({ "owner": UserId::new(), "username": "bob" })),
        )
        .await;
    let container_id = created["id"].as_str().expect("container id").to_owned();

    let (status, body) = admin
        .call(
            Method::POST,
            &format!("/api/containers/{container_id}/status"),
            Some(token.expose()),
            Some(json!({ "status": "stopped" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ignored"], json!(true));
    assert_eq!(body["status"], json!("creating"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn status_callback_older_than_the_last_heartbeat_is_ignored(admin: Harness) {
    let token = admin.provision("edge-1").await;
    admin.register(&token).await;
    let (_, created) = admin
        .call(
            Method::POST,
            "/api/admin/containers",
            Some(ADMIN_TOKEN),
            Some(json!({ "owner": UserId::new(), "username": "carol" })),
        )
        .await;
    let container_id = created["id"].as_str().expect("container id").to_owned();
    let status_uri = format!("/api/containers/{container_id}/status");
    admin
        .call(
            Method::POST,
            &status_uri,
            Some(token.expose()),
            Some(json!({ "status": "running", "timestamp": "2026-01-01T00:00:05Z" })),
        )
        .await;

    let (status, _) = admin
        .call(
            Method::POST,
            "/api/nodes/heartbeat",
            Some(token.expose()),
            Some(json!({
                "timestamp": "2026-01-01T00:00:30Z",
                "containers": [{ "container_id": container_id, "status": "stopped" }],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, late) = admin
        .call(
            Method::POST,
            &status_uri,
            Some(token.expose()),
            Some(json!({ "status": "running", "timestamp": "2026-01-01T00:00:20Z" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{late}");
    assert_eq!(late["ignored"], json!(true));
    assert_eq!(late["status"], json!("stopped"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn status_for_unknown_container_is_not_found(admin: Harness) {
    let token = admin.provision("edge-1").await;

    let (status, _) = admin
        .call(
            Method::POST,
            &format!("/api/containers/{}/status", uuid::Uuid::new_v4()),
            Some(token.expose()),
            Some(json!({ "status": "running" })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn placement_without_online_nodes_is_unavailable(admin: Harness) {
    admin.provision("edge-1").await;

    let (status, body) = admin
        .call(
            Method::POST,
            "/api/admin/containers",
            Some(ADMIN_TOKEN),
            Some(json!({ "owner": UserId::new(), "username": "carol" })),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().expect("message").contains("no online node"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn admin_provisions_and_deletes_nodes(admin: Harness) {
    let (status, created) = admin
        .call(
            Method::POST,
            "/api/admin/nodes",
            Some(ADMIN_TOKEN),
            Some(json!({ "name": "edge-2", "address": "10.1.0.6:2222" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let token = NodeToken::from_bearer(created["token"].as_str().expect("token"));
    let node_id = created["node"]["id"].as_str().expect("node id").to_owned();
    assert_eq!(created["node"]["online"], json!(false));
    assert!(created["node"].get("token_digest").is_none());

    let registered = admin.register(&token).await;
    assert_eq!(registered["node_id"], json!(node_id));

    let (status, listed) = admin
        .call(Method::GET, "/api/admin/nodes", Some(ADMIN_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, deleted) = admin
        .call(
            Method::DELETE,
            &format!("/api/admin/nodes/{node_id}"),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["orphaned"], json!([]));

    let (status, _) = admin
        .call(
            Method::GET,
            &format!("/api/admin/nodes/{node_id}"),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn admin_routes_require_the_admin_token(admin: Harness) {
    let (status, _) = admin
        .call(Method::GET, "/api/admin/nodes", Some("wrong"), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn admin_routes_are_absent_without_a_configured_token() {
    let closed = harness(None);

    let (status, _) = closed
        .call(Method::GET, "/api/admin/nodes", Some(ADMIN_TOKEN), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
