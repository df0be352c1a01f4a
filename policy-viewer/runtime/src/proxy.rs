use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use npv_core::{AgentClient, AgentHandle, NumericIdentity, PolicyEntry, PolicyEntryDump};
use npv_k8s_api::agent::{EndpointResponse, IdentityResponse};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Talks to the `cilium-agent-proxy` instance running next to one Cilium agent.
#[derive(Clone, Debug)]
pub struct ProxyClient {
    handle: AgentHandle,
    addr: SocketAddr,
}

// === impl ProxyClient ===

impl ProxyClient {
    /// `node` names the agent the proxy fronts.
    pub fn new(node: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            handle: AgentHandle::new(node),
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Reads the policy map of a local endpoint.
    pub async fn policy(&self, endpoint_id: i64) -> Result<Vec<PolicyEntry>> {
        let dump = self
            .get::<Vec<PolicyEntryDump>>(&format!("/policy/{endpoint_id}"))
            .await
            .context("failed to request policy")?;
        Ok(dump.into_iter().map(PolicyEntry::from).collect())
    }

    pub async fn endpoint(&self, endpoint_id: i64) -> Result<EndpointResponse> {
        self.get(&format!("/v1/endpoint/{endpoint_id}"))
            .await
            .context("failed to get endpoint information")
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(agent = %self.handle, addr = %self.addr, %path, "Requesting");
        let io = TcpStream::connect(self.addr)
            .await
            .with_context(|| format!("failed to connect to {}", self.addr))?;
        let (mut tx, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                debug!(%error, "Connection closed");
            }
        });

        let req = http::Request::get(path)
            .header(http::header::HOST, self.addr.to_string())
            .body(Empty::<Bytes>::new())?;
        let rsp = tx.send_request(req).await?;
        let status = rsp.status();
        let body = rsp.into_body().collect().await?.to_bytes();
        trace!(%status, len = body.len());
        if !status.is_success() {
            bail!(
                "{path} returned {status}: {}",
                String::from_utf8_lossy(&body).trim()
            );
        }
        serde_json::from_slice(&body).context("failed to unmarshal response")
    }
}

#[async_trait]
impl AgentClient for ProxyClient {
    fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    async fn identity_labels(&self, id: NumericIdentity) -> Result<Vec<String>> {
        let rsp = self
            .get::<IdentityResponse>(&format!("/v1/identity/{id}"))
            .await
            .context("failed to get identity")?;
        Ok(rsp.labels)
    }
}
