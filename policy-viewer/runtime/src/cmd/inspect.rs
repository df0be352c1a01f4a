use super::{cidr_set, either};
use crate::{args::Session, output::Table};
use anyhow::{Context, Result};
use npv_core::{enrich, filter, Filter};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Name of the pod.
    pod: String,

    /// Show rules for CIDRs, e.g. `0.0.0.0/0,!10.0.0.0/8`.
    #[clap(long)]
    with_cidrs: Option<String>,

    /// Show rules for private CIDRs.
    #[clap(long)]
    with_private_cidrs: bool,

    /// Show rules for public CIDRs.
    #[clap(long)]
    with_public_cidrs: bool,

    /// Show allow rules.
    #[clap(long)]
    allowed: bool,

    /// Show deny rules.
    #[clap(long)]
    denied: bool,

    /// Show ingress rules.
    #[clap(long)]
    ingress: bool,

    /// Show egress rules.
    #[clap(long)]
    egress: bool,

    /// Show rules that have matched traffic.
    #[clap(long)]
    used: bool,

    /// Show rules that have not matched any traffic.
    #[clap(long)]
    unused: bool,
}

impl Args {
    fn filter(&self) -> Result<Option<Filter>> {
        let (ingress, egress) = either(self.ingress, self.egress);
        let (allowed, denied) = either(self.allowed, self.denied);
        let (used, unused) = either(self.used, self.unused);
        let cidrs = cidr_set(
            "with",
            self.with_cidrs.as_deref(),
            self.with_private_cidrs,
            self.with_public_cidrs,
        )?;
        Ok(Filter::all([
            Filter::basic(ingress, egress, allowed, denied, used, unused),
            cidrs.map(|set| Filter::cidr(true, true, set)),
        ]))
    }

    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        let filter = self.filter()?;
        let pods = session
            .cluster
            .select_pods(&session.selection, Some(&self.pod), None)
            .await?;
        let mut ctx = session.cluster.resolution_context().await?;

        let mut records = Vec::new();
        for pod in &pods {
            let (proxy, entries) = session.cluster.policy_map(pod).await?;
            let entries = filter::apply(filter.as_ref(), &mut ctx, &proxy, entries)
                .await
                .context("failed to filter policy map")?;
            records.extend(enrich::enrich_all(&mut ctx, &proxy, &entries).await?);
        }

        // Entries keep the order of the policy map.
        let output = session.output;
        let mut table = Table::new(&[
            "POLICY",
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
            table.row([
                r.policy.to_string(),
                r.direction.to_string(),
                r.identity.to_string(),
                r.namespace.clone(),
                r.example.clone(),
                r.protocol_display().into_owned(),
                r.port_display().into_owned(),
                output.volume(r.bytes),
                output.volume(r.packets),
            ]);
        }
        output.print(&records, table)
    }
}
