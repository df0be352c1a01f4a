use super::cidr_set;
use crate::{
    args::Session,
    cluster::parse_namespaced_name,
    output::{average, Table},
};
use anyhow::{anyhow, bail, Result};
use npv_core::{
    enrich::{self, Record},
    filter,
    identity::Endpoint,
    CidrSet, Direction, Filter, NumericIdentity, ResolutionContext, Verdict,
};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Source pod, as NAMESPACE/POD.
    #[clap(long)]
    from: Option<String>,

    /// Source CIDRs.
    #[clap(long)]
    from_cidrs: Option<String>,

    /// Use private CIDRs as source (10.0.0.0/8,172.16.0.0/12,192.168.0.0/16).
    #[clap(long)]
    from_private_cidrs: bool,

    /// Use public CIDRs as source (0.0.0.0/0,!10.0.0.0/8,!172.16.0.0/12,!192.168.0.0/16).
    #[clap(long)]
    from_public_cidrs: bool,

    /// Destination pod, as NAMESPACE/POD.
    #[clap(long)]
    to: Option<String>,

    /// Destination CIDRs.
    #[clap(long)]
    to_cidrs: Option<String>,

    /// Use private CIDRs as destination (10.0.0.0/8,172.16.0.0/12,192.168.0.0/16).
    #[clap(long)]
    to_private_cidrs: bool,

    /// Use public CIDRs as destination (0.0.0.0/0,!10.0.0.0/8,!172.16.0.0/12,!192.168.0.0/16).
    #[clap(long)]
    to_public_cidrs: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
enum Role {
    Sender,
    Receiver,
}

/// The peer a side's entries are filtered by.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Peer {
    Pod(Endpoint),
    Cidrs(CidrSet),
}

/// Both ends of a `reach` query.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Plan {
    /// The sending pod and its receiving peer.
    sender: Option<(Endpoint, Peer)>,
    /// The receiving pod and its sending peer.
    receiver: Option<(Endpoint, Peer)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct ReachRecord {
    role: Role,
    direction: Direction,
    policy: Verdict,
    identity: NumericIdentity,
    namespace: String,
    example_endpoint: String,
    wildcard_protocol: bool,
    wildcard_port: bool,
    protocol: u8,
    port: u16,
    bytes: u64,
    requests: u64,
}

impl Args {
    fn plan(&self) -> Result<Plan> {
        let from = self
            .from
            .as_deref()
            .map(|s| {
                parse_namespaced_name(s)
                    .ok_or_else(|| anyhow!("--from should be specified as NAMESPACE/POD"))
            })
            .transpose()?;
        let to = self
            .to
            .as_deref()
            .map(|s| {
                parse_namespaced_name(s)
                    .ok_or_else(|| anyhow!("--to should be specified as NAMESPACE/POD"))
            })
            .transpose()?;
        if from.is_none() && to.is_none() {
            // Nothing would be reported between two unmanaged peers.
            bail!("one of --from or --to must be specified");
        }

        let from_cidrs = cidr_set(
            "from",
            self.from_cidrs.as_deref(),
            self.from_private_cidrs,
            self.from_public_cidrs,
        )?;
        let to_cidrs = cidr_set(
            "to",
            self.to_cidrs.as_deref(),
            self.to_private_cidrs,
            self.to_public_cidrs,
        )?;

        let sender = match (&from, &to, to_cidrs) {
            (None, _, _) => None,
            (Some(from), Some(to), _) => Some((from.clone(), Peer::Pod(to.clone()))),
            (Some(from), None, Some(set)) => Some((from.clone(), Peer::Cidrs(set))),
            (Some(_), None, None) => bail!("one of --to or --to-cidrs must be specified"),
        };
        let receiver = match (&to, from, from_cidrs) {
            (None, _, _) => None,
            (Some(to), Some(from), _) => Some((to.clone(), Peer::Pod(from))),
            (Some(to), None, Some(set)) => Some((to.clone(), Peer::Cidrs(set))),
            (Some(_), None, None) => bail!("one of --from or --from-cidrs must be specified"),
        };
        Ok(Plan { sender, receiver })
    }

    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        let Plan { sender, receiver } = self.plan()?;
        let mut ctx = session.cluster.resolution_context().await?;

        let mut records = Vec::new();
        if let Some((pod, peer)) = sender {
            records.extend(side(session, &mut ctx, Role::Sender, &pod, peer).await?);
        }
        if let Some((pod, peer)) = receiver {
            records.extend(side(session, &mut ctx, Role::Receiver, &pod, peer).await?);
        }

        let output = session.output;
        let mut table = Table::new(&[
            "ROLE",
            "DIRECTION",
            "POLICY",
            "|",
            "IDENTITY",
            "NAMESPACE",
            "EXAMPLE-ENDPOINT",
            "|",
            "PROTOCOL",
            "PORT",
            "|",
            "BYTES:",
            "REQUESTS:",
            "AVERAGE:",
        ]);
        for r in &records {
            table.row([
                format!("{:?}", r.role),
                r.direction.to_string(),
                r.policy.to_string(),
                "|".to_string(),
                r.identity.to_string(),
                r.namespace.clone(),
                r.example_endpoint.clone(),
                "|".to_string(),
                enrich::format_protocol(r.wildcard_protocol, r.protocol).into_owned(),
                enrich::format_port(r.wildcard_port, r.port).into_owned(),
                "|".to_string(),
                output.volume(r.bytes),
                output.volume(r.requests),
                format!("{:.1}", average(r.bytes, r.requests)),
            ]);
        }
        output.print(&records, table)
    }
}

/// Lists the entries of `pod` that apply to traffic with `peer`: egress entries for the sender,
/// ingress entries for the receiver.
#[instrument(skip_all, fields(?role, %pod))]
async fn side(
    session: &mut Session,
    ctx: &mut ResolutionContext,
    role: Role,
    pod: &Endpoint,
    peer: Peer,
) -> Result<Vec<ReachRecord>> {
    let (ingress, egress) = match role {
        Role::Sender => (false, true),
        Role::Receiver => (true, false),
    };
    let filter = match peer {
        Peer::Pod(peer) => {
            let identity = session.cluster.pod_identity(&peer).await?;
            Filter::identity(ingress, egress, identity)
        }
        Peer::Cidrs(set) => Filter::cidr(ingress, egress, set),
    };

    let (proxy, entries) = session.cluster.policy_map_of(pod).await?;
    let entries = filter::apply(Some(&filter), ctx, &proxy, entries).await?;
    let records = enrich::enrich_all(ctx, &proxy, &entries).await?;
    Ok(records
        .into_iter()
        .map(|r| ReachRecord::new(role, r))
        .collect())
}

impl ReachRecord {
    fn new(role: Role, r: Record) -> Self {
        Self {
            role,
            direction: r.direction,
            policy: r.policy,
            identity: r.identity,
            namespace: r.namespace,
            example_endpoint: r.example,
            wildcard_protocol: r.wildcard_protocol,
            wildcard_port: r.wildcard_port,
            protocol: r.protocol,
            port: r.port,
            bytes: r.bytes,
            requests: r.packets,
        }
    }
}
