use super::Failures;
use crate::{
    args::Session,
    cluster::{endpoint_of, is_host_network, is_running},
    output::Table,
};
use anyhow::Result;
use npv_core::aggregate::RuleCounts;
use npv_k8s_api::Pod;
use serde::Serialize;
use tracing::instrument;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct SummaryRecord {
    namespace: String,
    name: String,
    #[serde(flatten)]
    counts: RuleCounts,
}

/// Counts the policy map entries of every pod in scope.
pub(crate) async fn run(session: &mut Session) -> Result<()> {
    let mut pods = session
        .cluster
        .list_pods(&session.selection, None)
        .await?;
    pods.sort_by_key(endpoint_of);

    let mut records = Vec::with_capacity(pods.len());
    let mut failures = Failures::default();
    for pod in &pods {
        let ep = endpoint_of(pod);
        match counts(session, pod).await {
            Ok(Some(counts)) => records.push(SummaryRecord {
                namespace: ep.namespace,
                name: ep.name,
                counts,
            }),
            Ok(None) => {}
            Err(error) => failures.record(ep, error),
        }
    }

    let mut table = Table::new(&[
        "NAMESPACE",
        "NAME",
        "INGRESS-ALLOW:",
        "INGRESS-DENY:",
        "EGRESS-ALLOW:",
        "EGRESS-DENY:",
    ]);
    for r in &records {
        table.row([
            r.namespace.clone(),
            r.name.clone(),
            r.counts.ingress_allow.to_string(),
            r.counts.ingress_deny.to_string(),
            r.counts.egress_allow.to_string(),
            r.counts.egress_deny.to_string(),
        ]);
    }
    session.output.print(&records, table)?;
    failures.report();
    Ok(())
}

/// Returns `None` for pods that are not running.
#[instrument(skip_all, fields(pod = %endpoint_of(pod)))]
async fn counts(session: &mut Session, pod: &Pod) -> Result<Option<RuleCounts>> {
    if is_host_network(pod) {
        return Ok(Some(RuleCounts::not_applicable()));
    }
    if !is_running(pod) {
        return Ok(None);
    }
    let (_, entries) = session.cluster.policy_map(pod).await?;
    Ok(Some(RuleCounts::count(&entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_network_pods_are_not_applicable() {
        let record = SummaryRecord {
            namespace: "kube-system".to_string(),
            name: "kube-proxy-x".to_string(),
            counts: RuleCounts::not_applicable(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "namespace": "kube-system",
                "name": "kube-proxy-x",
                "ingress_allow": -1,
                "ingress_deny": -1,
                "egress_allow": -1,
                "egress_deny": -1,
            })
        );
    }
}
