use crate::{args::Session, output::Table};
use anyhow::{Context, Result};
use npv_core::aggregate::{DerivedFrom, PolicyList};
use npv_k8s_api::policy::PolicyKind;
use std::{collections::BTreeSet, io::Write};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Name of the pod.
    pod: String,

    /// Show policy manifests.
    #[clap(short = 'm', long)]
    manifests: bool,
}

impl Args {
    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        let pods = session
            .cluster
            .select_pods(&session.selection, Some(&self.pod), None)
            .await?;

        let mut policies = PolicyList::default();
        for pod in &pods {
            let ep = crate::cluster::endpoint_of(pod);
            let endpoint_id = session
                .cluster
                .cilium_endpoint(&ep.namespace, &ep.name)
                .await?
                .endpoint_id()
                .context("failed to get pod endpoint ID")?;
            let proxy = session.cluster.proxy_for(pod).await?;
            let endpoint = proxy.endpoint(endpoint_id).await?;
            // The same rule is referenced by every entry derived from it.
            for derived in endpoint.derived_from() {
                policies.add(derived, 1);
            }
        }

        if self.manifests {
            return print_manifests(session, &policies).await;
        }

        let records = policies.keys().collect::<Vec<_>>();
        let mut table = Table::new(&["DIRECTION", "KIND", "NAMESPACE", "NAME"]);
        for p in &records {
            table.row([
                p.direction.to_string(),
                p.kind.clone(),
                p.namespace.clone(),
                p.name.clone(),
            ]);
        }
        session.output.print(&records, table)
    }
}

/// Policies to print with `-m`, once each regardless of direction.
fn manifest_refs(policies: &PolicyList) -> Result<BTreeSet<(PolicyKind, &str, &str)>> {
    let mut refs = BTreeSet::new();
    for DerivedFrom {
        kind,
        namespace,
        name,
        ..
    } in policies.keys()
    {
        let kind = kind.parse::<PolicyKind>()?;
        refs.insert((kind, namespace.as_str(), name.as_str()));
    }
    Ok(refs)
}

async fn print_manifests(session: &Session, policies: &PolicyList) -> Result<()> {
    let stdout = std::io::stdout();
    let mut first = true;
    for (kind, ns, name) in manifest_refs(policies)? {
        let obj = session.cluster.network_policy(kind, ns, name).await?;
        let yaml = serde_yaml::to_string(&obj)?;
        let mut w = stdout.lock();
        if !first {
            writeln!(w, "---")?;
        }
        first = false;
        w.write_all(yaml.as_bytes())?;
    }
    Ok(())
}
