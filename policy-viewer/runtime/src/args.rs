use crate::{
    cluster::{Cluster, ProxyConfig, Selection},
    cmd,
    output::{Format, Output},
};
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Debug, Parser)]
#[clap(name = "npv", about = "Network policy viewer for Cilium", version)]
pub struct Args {
    #[clap(long, default_value = "warn", env = "NPV_LOG", global = true)]
    log_level: String,

    /// Namespace of pods [default: default]
    #[clap(short = 'n', long, global = true)]
    namespace: Option<String>,

    /// Show pods across all namespaces.
    #[clap(short = 'A', long, global = true)]
    all_namespaces: bool,

    /// Node of pods. Turns on --all-namespaces.
    #[clap(long, global = true)]
    node: Option<String>,

    /// Namespace of the proxy pods.
    #[clap(long, default_value = "cilium-agent-proxy", global = true)]
    proxy_namespace: String,

    /// Label selector to find the proxy pods.
    #[clap(
        long,
        default_value = "app.kubernetes.io/name=cilium-agent-proxy",
        global = true
    )]
    proxy_selector: String,

    /// Port number of the proxy endpoints.
    #[clap(long, default_value = "8080", global = true)]
    proxy_port: u16,

    #[clap(short = 'o', long, value_enum, default_value = "simple", global = true)]
    output: Format,

    /// Stop printing headers.
    #[clap(long, global = true)]
    no_headers: bool,

    /// Use human-readable units (power of 1024) for traffic volume.
    #[clap(short = 'u', long, global = true)]
    units: bool,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Inspect network policies applied to a pod
    Inspect(cmd::inspect::Args),

    /// List network policies applied to a pod
    List(cmd::list::Args),

    /// List traffic policies between a pod pair
    Reach(cmd::reach::Args),

    /// Show traffic amount of selected pods
    Traffic(cmd::traffic::Args),

    /// Show summary of network policy count
    Summary,

    /// Inspect CiliumIdentity
    #[clap(subcommand)]
    Id(cmd::id::Command),

    /// Generate CiliumNetworkPolicy
    #[clap(subcommand)]
    Manifest(cmd::manifest::Command),

    /// Find the cilium-agent of a pod or node
    #[clap(subcommand)]
    Agent(cmd::agent::Command),
}

/// State shared by every command of one invocation.
pub(crate) struct Session {
    pub cluster: Cluster,
    pub selection: Selection,
    pub output: Output,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            namespace,
            all_namespaces,
            node,
            proxy_namespace,
            proxy_selector,
            proxy_port,
            output,
            no_headers,
            units,
            client,
            command,
        } = self;

        init_logging(&log_level)?;

        let selection = selection(namespace, all_namespaces, node)?;
        let output = Output {
            format: output,
            no_headers,
            units,
        };
        let client = client.try_client().await?;
        let cluster = Cluster::new(
            client,
            ProxyConfig {
                namespace: proxy_namespace,
                selector: proxy_selector,
                port: proxy_port,
            },
        );
        debug!(?selection, "Running");

        let mut session = Session {
            cluster,
            selection,
            output,
        };
        match command {
            Command::Inspect(args) => args.run(&mut session).await,
            Command::List(args) => args.run(&mut session).await,
            Command::Reach(args) => args.run(&mut session).await,
            Command::Traffic(args) => args.run(&mut session).await,
            Command::Summary => cmd::summary::run(&mut session).await,
            Command::Id(cmd) => cmd.run(&mut session).await,
            Command::Manifest(cmd) => cmd.run(&mut session).await,
            Command::Agent(cmd) => cmd.run(&mut session).await,
        }
    }
}

/// Logs go to stderr so that they never mix with command output.
fn init_logging(filter: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
}

fn selection(
    namespace: Option<String>,
    all_namespaces: bool,
    node: Option<String>,
) -> Result<Selection> {
    let all_namespaces = all_namespaces || node.is_some();
    if all_namespaces && namespace.is_some() {
        bail!("namespace (-n) and all-namespaces (-A) should not be specified at once");
    }
    Ok(Selection {
        namespace: namespace.unwrap_or_else(|| "default".to_string()),
        all_namespaces,
        node,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_implies_all_namespaces() {
        let sel = selection(None, false, Some("node-1".to_string())).unwrap();
        assert!(sel.all_namespaces);
        assert_eq!(sel.namespace, "default");

        let err = selection(Some("prod".to_string()), false, Some("node-1".to_string()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "namespace (-n) and all-namespaces (-A) should not be specified at once"
        );
        assert!(selection(Some("prod".to_string()), true, None).is_err());

        let sel = selection(Some("prod".to_string()), false, None).unwrap();
        assert_eq!(sel.list_namespace(), Some("prod"));
    }

    #[test]
    fn parses_global_flags() {
        let args =
            Args::try_parse_from(["npv", "inspect", "web-0", "-n", "prod", "-o", "json", "-u"])
                .unwrap();
        assert_eq!(args.namespace.as_deref(), Some("prod"));
        assert_eq!(args.output, Format::Json);
        assert!(args.units);
        assert_eq!(args.proxy_port, 8080);
        assert!(matches!(args.command, Command::Inspect(_)));

        let args = Args::try_parse_from(["npv", "id", "tree", "-A"]).unwrap();
        assert!(args.all_namespaces);
        assert!(matches!(args.command, Command::Id(cmd::id::Command::Tree)));

        assert!(Args::try_parse_from(["npv", "summary", "-o", "yaml"]).is_err());
    }
}
