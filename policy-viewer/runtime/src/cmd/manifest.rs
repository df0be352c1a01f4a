use crate::{args::Session, cluster::parse_namespaced_name, output::Table};
use anyhow::{anyhow, bail, Result};
use npv_core::{identity::Endpoint, Direction, NumericIdentity, Verdict};
use npv_k8s_api::policy::{CiliumNetworkPolicy, Peer};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Generate a CiliumNetworkPolicy between the identities of two pods
    Generate(GenerateArgs),

    /// List the pods that a policy between two pods would select
    Range(PairArgs),

    /// List the pods that a policy between two pods would affect, by direction
    Blast(PairArgs),
}

#[derive(Debug, clap::Args)]
pub struct GenerateArgs {
    /// Name of the policy.
    #[clap(long)]
    name: Option<String>,

    /// Generate an egress rule.
    #[clap(long)]
    egress: bool,

    /// Generate an ingress rule.
    #[clap(long)]
    ingress: bool,

    /// Generate an allow rule.
    #[clap(long)]
    allow: bool,

    /// Generate a deny rule.
    #[clap(long)]
    deny: bool,

    #[clap(flatten)]
    pair: PairArgs,
}

#[derive(Debug, clap::Args)]
pub struct PairArgs {
    /// Sender pod, as NAMESPACE/POD.
    #[clap(long)]
    from: Option<String>,

    /// Receiver pod, as NAMESPACE/POD.
    #[clap(long)]
    to: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
enum Part {
    From,
    To,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
struct RangeRecord {
    part: Part,
    namespace: String,
    name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
struct BlastRecord {
    direction: Direction,
    namespace: String,
    name: String,
}

impl Command {
    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        match self {
            Self::Generate(args) => args.run(session).await,
            Self::Range(args) => {
                let records = args.range(session).await?;
                let mut table = Table::new(&["PART", "NAMESPACE", "NAME"]);
                for r in &records {
                    table.row([format!("{:?}", r.part), r.namespace.clone(), r.name.clone()]);
                }
                session.output.print(&records, table)
            }
            Self::Blast(args) => {
                let records = args
                    .range(session)
                    .await?
                    .into_iter()
                    .map(BlastRecord::from)
                    .collect::<Vec<_>>();
                let mut table = Table::new(&["DIRECTION", "NAMESPACE", "NAME"]);
                for r in &records {
                    table.row([r.direction.to_string(), r.namespace.clone(), r.name.clone()]);
                }
                session.output.print(&records, table)
            }
        }
    }
}

// === impl GenerateArgs ===

impl GenerateArgs {
    fn rule(&self) -> Result<(Direction, Verdict)> {
        if self.egress == self.ingress {
            bail!("one of --egress or --ingress should be specified");
        }
        if self.allow == self.deny {
            bail!("one of --allow or --deny should be specified");
        }
        let direction = if self.egress {
            Direction::Egress
        } else {
            Direction::Ingress
        };
        let verdict = if self.allow {
            Verdict::Allow
        } else {
            Verdict::Deny
        };
        Ok((direction, verdict))
    }

    async fn run(self, session: &mut Session) -> Result<()> {
        let (direction, verdict) = self.rule()?;
        let (from, to) = self.pair.pods()?;
        let from = peer(session, &from).await?;
        let to = peer(session, &to).await?;

        let policy = CiliumNetworkPolicy::generate(direction, verdict, &from, &to, self.name);
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        w.write_all(policy.to_yaml()?.as_bytes())?;
        w.flush()?;
        Ok(())
    }
}

/// Reads the identity and security labels of a pod.
async fn peer(session: &Session, pod: &Endpoint) -> Result<Peer> {
    let identity = session.cluster.pod_identity(pod).await?;
    let labels = session
        .cluster
        .identity(identity)
        .await?
        .security_labels
        .ok_or_else(|| anyhow!("pod {pod} is not assigned security labels"))?;
    Ok(Peer {
        namespace: pod.namespace.clone(),
        identity,
        labels,
    })
}

// === impl PairArgs ===

impl PairArgs {
    fn pods(&self) -> Result<(Endpoint, Endpoint)> {
        let (Some(from), Some(to)) = (self.from.as_deref(), self.to.as_deref()) else {
            bail!("--from and --to options are required");
        };
        match (parse_namespaced_name(from), parse_namespaced_name(to)) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ => bail!("--from and --to should be specified as NAMESPACE/POD"),
        }
    }

    /// Lists the pods that share an identity with either side.
    async fn range(&self, session: &Session) -> Result<Vec<RangeRecord>> {
        let (from, to) = self.pods()?;
        let from = session.cluster.pod_identity(&from).await?;
        let to = session.cluster.pod_identity(&to).await?;
        let endpoints = session.cluster.identity_endpoints().await?;
        Ok(range_records(from, to, endpoints))
    }
}

fn range_records(
    from: NumericIdentity,
    to: NumericIdentity,
    endpoints: impl IntoIterator<Item = (NumericIdentity, Endpoint)>,
) -> Vec<RangeRecord> {
    let mut records = Vec::new();
    for (id, ep) in endpoints {
        for (part, side) in [(Part::From, from), (Part::To, to)] {
            if id == side {
                records.push(RangeRecord {
                    part,
                    namespace: ep.namespace.clone(),
                    name: ep.name.clone(),
                });
            }
        }
    }
    records.sort();
    records
}

impl From<RangeRecord> for BlastRecord {
    fn from(r: RangeRecord) -> Self {
        // Senders are affected by egress rules and receivers by ingress rules.
        let direction = match r.part {
            Part::From => Direction::Egress,
            Part::To => Direction::Ingress,
        };
        Self {
            direction,
            namespace: r.namespace,
            name: r.name,
        }
    }
}
