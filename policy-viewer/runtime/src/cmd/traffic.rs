use super::{cidr_set, Failures};
use crate::{
    args::Session,
    cluster::endpoint_of,
    output::{Output, Table},
};
use anyhow::{Context, Result};
use npv_core::{
    aggregate::{CidrBucketing, Merge, Traffic, TrafficKey, TrafficValue},
    enrich, filter, Filter, ResolutionContext,
};
use npv_k8s_api::Pod;
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Name of the pod. All running pods in scope are used when omitted.
    pod: Option<String>,

    /// Label selector of the pods.
    #[clap(short = 'l', long)]
    selector: Option<String>,

    /// Show traffic to CIDR peers as `private`, `public` or `unknown` instead of each prefix.
    #[clap(long)]
    unify_cidrs: bool,

    /// Show traffic for CIDRs, e.g. `0.0.0.0/0,!10.0.0.0/8`.
    #[clap(long)]
    with_cidrs: Option<String>,

    /// Show traffic for private CIDRs.
    #[clap(long)]
    with_private_cidrs: bool,

    /// Show traffic for public CIDRs.
    #[clap(long)]
    with_public_cidrs: bool,
}

#[derive(Serialize)]
struct TrafficRecord<'t> {
    #[serde(flatten)]
    key: &'t TrafficKey,
    #[serde(flatten)]
    value: &'t TrafficValue,
}

impl Args {
    fn filter(&self) -> Result<Option<Filter>> {
        let cidrs = cidr_set(
            "with",
            self.with_cidrs.as_deref(),
            self.with_private_cidrs,
            self.with_public_cidrs,
        )?;
        // Only allowed entries that have matched traffic carry volume worth reporting.
        Ok(Filter::all([
            Filter::basic(true, true, true, false, true, false),
            cidrs.map(|set| Filter::cidr(true, true, set)),
        ]))
    }

    fn bucketing(&self) -> CidrBucketing {
        if self.unify_cidrs {
            CidrBucketing::Unify
        } else {
            CidrBucketing::Exact
        }
    }

    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        let filter = self.filter()?;
        let pods = session
            .cluster
            .select_pods(
                &session.selection,
                self.pod.as_deref(),
                self.selector.as_deref(),
            )
            .await?;
        let mut ctx = session.cluster.resolution_context().await?;

        let mut total = Traffic::new(self.bucketing());
        let mut failures = Failures::default();
        for pod in &pods {
            let mut traffic = Traffic::new(self.bucketing());
            match account(session, &mut ctx, filter.as_ref(), pod, &mut traffic).await {
                Ok(()) => total.merge(traffic),
                // A named pod is the only subject, so its failure is the command's.
                Err(error) if self.pod.is_some() => return Err(error),
                Err(error) => failures.record(endpoint_of(pod), error),
            }
        }

        let records = total
            .iter()
            .map(|(key, value)| TrafficRecord { key, value })
            .collect::<Vec<_>>();
        let mut table = Table::new(&[
            "DIRECTION",
            "IDENTITY",
            "NAMESPACE",
            "EXAMPLE",
            "PROTOCOL",
            "PORT",
            "BYTES:",
            "PACKETS:",
        ]);
        for r in &records {
            table.row(row(session.output, r.key, r.value));
        }
        session.output.print(&records, table)?;
        failures.report();
        Ok(())
    }
}

/// Adds the used, allowed entries of `pod` to `traffic`.
#[instrument(skip_all, fields(pod = %endpoint_of(pod)))]
async fn account(
    session: &mut Session,
    ctx: &mut ResolutionContext,
    filter: Option<&Filter>,
    pod: &Pod,
    traffic: &mut Traffic,
) -> Result<()> {
    let (proxy, entries) = session.cluster.policy_map(pod).await?;
    let entries = filter::apply(filter, ctx, &proxy, entries)
        .await
        .context("failed to filter policy map")?;
    for entry in &entries {
        let resolved = ctx.resolve(&proxy, entry.identity).await?;
        traffic.add(entry, &resolved);
    }
    Ok(())
}

fn row(output: Output, key: &TrafficKey, value: &TrafficValue) -> [String; 8] {
    // CIDR peers are shown by prefix, since their numeric identity is always `world`.
    let identity = if key.cidr.is_empty() {
        key.identity.to_string()
    } else {
        key.cidr.clone()
    };
    [
        key.direction.to_string(),
        identity,
        key.namespace.clone(),
        value.example.clone(),
        enrich::format_protocol(key.wildcard_protocol, key.protocol).into_owned(),
        enrich::format_port(key.wildcard_port, key.port).into_owned(),
        output.volume(value.bytes),
        output.volume(value.packets),
    ]
}
