use crate::args::Session;
use anyhow::{Context, Result};
use npv_k8s_api::ResourceExt;
use std::io::Write;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Find the cilium-agent on the node of a pod
    Pod {
        /// Name of the pod.
        pod: String,
    },

    /// Find the cilium-agent on a node
    Node {
        /// Name of the node.
        node: String,
    },
}

impl Command {
    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        let node = match self {
            Self::Pod { pod } => {
                let ns = &session.selection.namespace;
                session
                    .cluster
                    .pod(ns, &pod)
                    .await?
                    .spec
                    .and_then(|s| s.node_name)
                    .with_context(|| format!("pod {ns}/{pod} is not scheduled"))?
            }
            Self::Node { node } => session.cluster.node(&node).await?.name_any(),
        };

        let agent = session.cluster.agent_on(&node).await?;
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        writeln!(w, "{agent}")?;
        Ok(())
    }
}
