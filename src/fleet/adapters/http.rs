//! HTTP node agent client.
//!
//! Every node runs an agent API on a fixed port next to its SSH daemon; the
//! client addresses it through the node's registered host.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::fleet::{
    domain::{ContainerId, Node, PortProtocol},
    ports::{NodeAgent, NodeAgentError, NodeAgentResult, ProvisionSpec, SshCredential},
};

/// Node agent adapter speaking the agent's JSON API.
#[derive(Debug, Clone)]
pub struct HttpNodeAgent {
    client: Client,
    port: u16,
}

#[derive(Debug, Serialize)]
struct CreateContainerBody<'a> {
    container_id: ContainerId,
    user_id: String,
    username: &'a str,
    name: &'a str,
    memory_mb: u64,
    cpu_cores: u32,
    storage_gb: u64,
}

#[derive(Debug, Deserialize)]
struct AllocatedPort {
    port: u32,
}

impl HttpNodeAgent {
    /// Creates a client for agents listening on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeAgentError::Unreachable`] when the HTTP client cannot be
    /// built.
    pub fn new(port: u16, request_timeout: Duration) -> NodeAgentResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(NodeAgentError::unreachable)?;
        Ok(Self { client, port })
    }

    fn url(&self, node: &Node, path: &str) -> String {
        let host = node.address().host();
        if host.contains(':') {
            format!("http://[{host}]:{}{path}", self.port)
        } else {
            format!("http://{host}:{}{path}", self.port)
        }
    }

    async fn post(&self, url: String, body: serde_json::Value) -> NodeAgentResult<Response> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(NodeAgentError::unreachable)?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> NodeAgentResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NodeAgentError::Rejected {
        status: status.as_u16(),
        body: body.trim().to_owned(),
    })
}

#[async_trait]
impl NodeAgent for HttpNodeAgent {
    async fn create_container(&self, node: &Node, spec: &ProvisionSpec) -> NodeAgentResult<()> {
        let body = CreateContainerBody {
            container_id: spec.container_id,
            user_id: spec.user_id.to_string(),
            username: &spec.username,
            name: &spec.name,
            memory_mb: spec.allocation.memory_mb,
            cpu_cores: spec.allocation.cpu_cores,
            storage_gb: spec.allocation.storage_gb,
        };
        let body = serde_json::to_value(body)
            .map_err(|err| NodeAgentError::InvalidResponse(err.to_string()))?;
        self.post(self.url(node, "/api/containers"), body).await?;
        Ok(())
    }

    async fn start_container(
        &self,
        node: &Node,
        container_id: ContainerId,
    ) -> NodeAgentResult<()> {
        let url = self.url(node, &format!("/api/containers/{container_id}/start"));
        self.post(url, json!({})).await?;
        Ok(())
    }

    async fn stop_container(&self, node: &Node, container_id: ContainerId) -> NodeAgentResult<()> {
        let url = self.url(node, &format!("/api/containers/{container_id}/stop"));
        self.post(url, json!({})).await?;
        Ok(())
    }

    async fn delete_container(
        &self,
        node: &Node,
        container_id: ContainerId,
    ) -> NodeAgentResult<()> {
        let url = self.url(node, &format!("/api/containers/{container_id}"));
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(NodeAgentError::unreachable)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn allocate_port(
        &self,
        node: &Node,
        container_id: ContainerId,
        internal_port: u16,
        protocol: PortProtocol,
    ) -> NodeAgentResult<u16> {
        let body = json!({
            "container_id": container_id,
            "internal_port": internal_port,
            "protocol": protocol.as_str(),
        });
        let response = self.post(self.url(node, "/api/ports/new"), body).await?;
        let allocated: AllocatedPort = response
            .json()
            .await
            .map_err(|err| NodeAgentError::InvalidResponse(err.to_string()))?;
        u16::try_from(allocated.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                NodeAgentError::InvalidResponse(format!("port {} out of range", allocated.port))
            })
    }

    async fn configure_ssh(
        &self,
        node: &Node,
        container_id: ContainerId,
        username: &str,
        credential: &SshCredential,
    ) -> NodeAgentResult<()> {
        let body = match credential {
            SshCredential::PublicKey(key) => json!({
                "container_id": container_id,
                "username": username,
                "public_key": key,
            }),
            SshCredential::Password(password) => json!({
                "container_id": container_id,
                "username": username,
                "password": password,
            }),
        };
        self.post(self.url(node, "/api/ssh"), body).await?;
        Ok(())
    }
}
