use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use std::{path::PathBuf, sync::Arc};
use tokio::{net::UnixStream, process::Command};
use tracing::{debug, trace};

/// Access to the Cilium agent on this node.
#[derive(Clone, Debug)]
pub struct Agent(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    socket_path: PathBuf,
    cilium_path: PathBuf,
}

// === impl Agent ===

impl Agent {
    pub fn new(socket_path: PathBuf, cilium_path: PathBuf) -> Self {
        Self(Arc::new(Inner {
            socket_path,
            cilium_path,
        }))
    }

    /// Issues a `GET` against the agent's REST API and returns its response as-is.
    pub async fn get(&self, path: &str) -> Result<(StatusCode, Bytes)> {
        let io = UnixStream::connect(&self.0.socket_path)
            .await
            .with_context(|| format!("failed to connect to {}", self.0.socket_path.display()))?;
        let (mut tx, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                debug!(%error, "Agent connection closed");
            }
        });

        let req = http::Request::get(path)
            .header(http::header::HOST, "localhost")
            .body(Empty::<Bytes>::new())?;
        let rsp = tx.send_request(req).await?;
        let status = rsp.status();
        let body = rsp.into_body().collect().await?.to_bytes();
        trace!(%path, %status, len = body.len(), "Agent responded");
        Ok((status, body))
    }

    /// Dumps the policy map of a local endpoint as JSON.
    pub async fn policy_map(&self, endpoint_id: u16) -> Result<Bytes> {
        let cilium = &self.0.cilium_path;
        let output = Command::new(cilium)
            .args(["bpf", "policy", "get", &endpoint_id.to_string(), "-ojson"])
            .output()
            .await
            .with_context(|| format!("failed to run {}", cilium.display()))?;
        if !output.status.success() {
            bail!(
                "{} failed with {}: stderr={}",
                cilium.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout.into())
    }
}
