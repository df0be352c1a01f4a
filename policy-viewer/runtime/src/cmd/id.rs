use crate::{args::Session, cluster::Selection, output::Table};
use anyhow::Result;
use npv_core::{label_tree::LabelTree, NumericIdentity, LABEL_CLUSTER, LABEL_POD_NAMESPACE};
use npv_k8s_api::{CiliumIdentity, Error};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::{IsTerminal, Write},
};

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Show the values of each label of the identities in the namespace
    Label,

    /// Show the number of identities per namespace
    Summary,

    /// Show identities as a hierarchy of their labels, with their pods
    Tree,
}

/// Labels that are shared by every identity of a namespace.
const NAMESPACE_LABELS_PREFIX: &str = "k8s:io.cilium.k8s.namespace.labels";

impl Command {
    pub(crate) async fn run(self, session: &mut Session) -> Result<()> {
        let identities = session.cluster.identities().await?;
        match self {
            Self::Label => label(session, &identities),
            Self::Summary => summary(session, &identities),
            Self::Tree => tree(session, identities).await,
        }
    }
}

fn label(session: &Session, identities: &[CiliumIdentity]) -> Result<()> {
    let values = label_values(&session.selection, identities);
    let mut table = Table::new(&["LABEL", "COUNT:", "VALUES"]);
    for (key, values) in &values {
        table.row([
            key.clone(),
            values.len().to_string(),
            values.iter().cloned().collect::<Vec<_>>().join(","),
        ]);
    }
    session.output.print(&values, table)
}

fn summary(session: &Session, identities: &[CiliumIdentity]) -> Result<()> {
    let counts = namespace_counts(identities)?;
    let mut table = Table::new(&["NAMESPACE", "IDENTITY:"]);
    for (ns, count) in &counts {
        table.row([ns.clone(), count.to_string()]);
    }
    session.output.print(&counts, table)
}

async fn tree(session: &Session, identities: Vec<CiliumIdentity>) -> Result<()> {
    let mut pods = HashMap::<NumericIdentity, Vec<String>>::new();
    for (id, ep) in session.cluster.identity_endpoints().await? {
        pods.entry(id).or_default().push(ep.name);
    }

    let mut entries = Vec::new();
    for identity in identities {
        if identity.security_labels.is_none()
            || !session
                .selection
                .includes_namespace(identity.namespace_label())
        {
            continue;
        }
        entries.push((identity.numeric_identity()?, identity.labels()));
    }

    let tree = LabelTree::build(entries, &|id| pods.get(&id).cloned().unwrap_or_default());
    let stdout = std::io::stdout();
    let colored = stdout.is_terminal();
    let mut w = stdout.lock();
    write!(w, "{}", tree.render(colored))?;
    w.flush()?;
    Ok(())
}

/// Distinct values of each label of the identities in scope, skipping the labels that every
/// identity of a namespace carries.
fn label_values(
    selection: &Selection,
    identities: &[CiliumIdentity],
) -> BTreeMap<String, BTreeSet<String>> {
    let mut values = BTreeMap::<String, BTreeSet<String>>::new();
    for identity in identities {
        if !selection.all_namespaces
            && identity.namespace_label() != Some(selection.namespace.as_str())
        {
            continue;
        }
        for (key, value) in identity.security_labels.iter().flatten() {
            if key == LABEL_CLUSTER
                || key == LABEL_POD_NAMESPACE
                || key.starts_with(NAMESPACE_LABELS_PREFIX)
            {
                continue;
            }
            values.entry(key.clone()).or_default().insert(value.clone());
        }
    }
    values
}

fn namespace_counts(identities: &[CiliumIdentity]) -> Result<BTreeMap<String, usize>, Error> {
    let mut counts = BTreeMap::new();
    for identity in identities {
        let ns = identity.namespace_label().ok_or_else(|| {
            Error::MissingNamespaceLabel(identity.metadata.name.clone().unwrap_or_default())
        })?;
        *counts.entry(ns.to_string()).or_default() += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use npv_k8s_api::ObjectMeta;

    fn identity(id: u32, labels: Option<BTreeMap<String, String>>) -> CiliumIdentity {
        CiliumIdentity {
            metadata: ObjectMeta {
                name: Some(id.to_string()),
                ..Default::default()
            },
            security_labels: labels,
        }
    }

    fn identities() -> Vec<CiliumIdentity> {
        vec![
            identity(
                1001,
                Some(btreemap! {
                    LABEL_CLUSTER.to_string() => "default".to_string(),
                    LABEL_POD_NAMESPACE.to_string() => "prod".to_string(),
                    "k8s:io.cilium.k8s.namespace.labels.team".to_string() => "a".to_string(),
                    "k8s:app".to_string() => "web".to_string(),
                }),
            ),
            identity(
                1002,
                Some(btreemap! {
                    LABEL_POD_NAMESPACE.to_string() => "prod".to_string(),
                    "k8s:app".to_string() => "db".to_string(),
                    "k8s:tier".to_string() => "backend".to_string(),
                }),
            ),
            identity(
                1003,
                Some(btreemap! {
                    LABEL_POD_NAMESPACE.to_string() => "test".to_string(),
                    "k8s:app".to_string() => "web".to_string(),
                }),
            ),
        ]
    }

    #[test]
    fn labels_in_namespace() {
        let selection = Selection {
            namespace: "prod".to_string(),
            ..Default::default()
        };
        let values = label_values(&selection, &identities());
        assert_eq!(
            values,
            btreemap! {
                "k8s:app".to_string() => ["db", "web"].into_iter().map(String::from).collect(),
                "k8s:tier".to_string() => ["backend"].into_iter().map(String::from).collect(),
            }
        );

        let selection = Selection {
            namespace: "default".to_string(),
            all_namespaces: true,
            ..Default::default()
        };
        assert_eq!(label_values(&selection, &identities()).len(), 2);
    }

    #[test]
    fn counts_per_namespace() {
        let counts = namespace_counts(&identities()).unwrap();
        assert_eq!(
            counts,
            btreemap! {
                "prod".to_string() => 2,
                "test".to_string() => 1,
            }
        );

        let err = namespace_counts(&[identity(7, None)]).unwrap_err();
        assert!(matches!(err, Error::MissingNamespaceLabel(name) if name == "7"));
    }
}
