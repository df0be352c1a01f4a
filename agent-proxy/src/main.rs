#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};

mod agent;
mod server;

/// Serve the local Cilium agent's endpoint, identity and policy map state over HTTP
///
/// One instance runs on each node, next to the agent, with the agent's API socket mounted.
#[derive(Debug, Parser)]
#[clap(name = "cilium-agent-proxy", version, about)]
struct Args {
    #[clap(long, env = "CILIUM_AGENT_PROXY_LOG", default_value = "info")]
    log_level: kubert::LogFilter,

    #[clap(long, env = "CILIUM_AGENT_PROXY_LOG_FORMAT", default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(long, default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// Path of the Cilium API socket.
    #[clap(long, default_value = "/var/run/cilium/cilium.sock")]
    socket_path: PathBuf,

    /// Path of the `cilium` CLI used to read policy maps.
    #[clap(long, default_value = "/cilium")]
    cilium_path: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        listen_addr,
        socket_path,
        cilium_path,
    } = Args::parse();

    log_format.try_init(log_level)?;

    let agent = agent::Agent::new(socket_path, cilium_path);
    server::serve(listen_addr, agent).await
}
