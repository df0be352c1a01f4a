use crate::{NumericIdentity, LABEL_CLUSTER, LABEL_POD_NAMESPACE};
use owo_colors::OwoColorize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Identities partitioned by their labels.
///
/// Each level groups by the key with the fewest distinct values, so the tree stays wide and
/// shallow. The cluster and namespace labels always come first when present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelTree {
    /// Endpoints of identities with no remaining labels, sorted by name.
    Leaf(Vec<String>),
    /// A label that every remaining identity shares.
    Shared {
        key: String,
        value: String,
        child: Box<LabelTree>,
    },
    /// Identities grouped by the value of `key`, in value order.
    ///
    /// Identities without the label are grouped under the empty value.
    Branch {
        key: String,
        children: Vec<(String, LabelTree)>,
    },
}

/// Displays a [`LabelTree`] with box-drawing connectors.
pub struct Render<'t> {
    tree: &'t LabelTree,
    colored: bool,
}

type Labels = BTreeMap<String, String>;

// === impl LabelTree ===

impl LabelTree {
    /// Builds the tree of `identities`, listing the endpoints that `endpoints` returns for each.
    pub fn build<F>(identities: Vec<(NumericIdentity, Labels)>, endpoints: &F) -> Self
    where
        F: Fn(NumericIdentity) -> Vec<String>,
    {
        let map = label_map(&identities);
        let Some((key, values)) = primary_key(&map) else {
            let mut eps = identities
                .iter()
                .flat_map(|(id, _)| endpoints(*id))
                .collect::<Vec<_>>();
            eps.sort();
            return Self::Leaf(eps);
        };
        let key = key.to_string();

        if values.len() == 1 {
            let value = values.iter().next().cloned().unwrap_or_default();
            let rest = identities
                .into_iter()
                .map(|(id, mut labels)| {
                    labels.remove(&key);
                    (id, labels)
                })
                .collect();
            return Self::Shared {
                key,
                value,
                child: Box::new(Self::build(rest, endpoints)),
            };
        }

        let mut groups = values
            .iter()
            .map(|v| (v.clone(), Vec::new()))
            .collect::<BTreeMap<_, _>>();
        for (id, mut labels) in identities {
            let value = labels.remove(&key).unwrap_or_default();
            if let Some(group) = groups.get_mut(&value) {
                group.push((id, labels));
            }
        }
        let children = groups
            .into_iter()
            .map(|(value, group)| (value, Self::build(group, endpoints)))
            .collect();
        Self::Branch { key, children }
    }

    /// Iterates over the endpoints of every leaf, in display order.
    pub fn endpoints(&self) -> Vec<&str> {
        match self {
            Self::Leaf(eps) => eps.iter().map(String::as_str).collect(),
            Self::Shared { child, .. } => child.endpoints(),
            Self::Branch { children, .. } => children
                .iter()
                .flat_map(|(_, c)| c.endpoints())
                .collect(),
        }
    }

    pub fn render(&self, colored: bool) -> Render<'_> {
        Render {
            tree: self,
            colored,
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, prefix: &str, colored: bool) -> fmt::Result {
        match self {
            Self::Leaf(eps) => {
                for (i, ep) in eps.iter().enumerate() {
                    let connector = connector(i + 1 == eps.len());
                    if colored {
                        writeln!(f, "{prefix}{connector}{}{ep}", "[Pod] ".bright_black())?;
                    } else {
                        writeln!(f, "{prefix}{connector}[Pod] {ep}")?;
                    }
                }
                Ok(())
            }

            Self::Shared { key, value, child } => {
                let value = display_value(value);
                if colored {
                    writeln!(f, "{prefix}{key}: {}", value.green())?;
                } else {
                    writeln!(f, "{prefix}{key}: {value}")?;
                }
                child.write(f, prefix, colored)
            }

            Self::Branch { key, children } => {
                writeln!(f, "{prefix}{key}")?;
                for (i, (value, child)) in children.iter().enumerate() {
                    let last = i + 1 == children.len();
                    let value = display_value(value);
                    if colored {
                        writeln!(f, "{prefix}{}{}", connector(last), value.green())?;
                    } else {
                        writeln!(f, "{prefix}{}{value}", connector(last))?;
                    }
                    let indent = if last { "    " } else { "│   " };
                    child.write(f, &format!("{prefix}{indent}"), colored)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Render<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.tree.write(f, "", self.colored)
    }
}

/// The sorted distinct values of every label key; identities lacking a key contribute `""`.
pub fn label_map(identities: &[(NumericIdentity, Labels)]) -> BTreeMap<&str, BTreeSet<String>> {
    let keys = identities
        .iter()
        .flat_map(|(_, labels)| labels.keys().map(String::as_str))
        .collect::<BTreeSet<_>>();
    keys.into_iter()
        .map(|k| {
            let values = identities
                .iter()
                .map(|(_, labels)| labels.get(k).cloned().unwrap_or_default())
                .collect();
            (k, values)
        })
        .collect()
}

fn primary_key<'m>(
    map: &'m BTreeMap<&str, BTreeSet<String>>,
) -> Option<(&'m str, &'m BTreeSet<String>)> {
    for k in [LABEL_CLUSTER, LABEL_POD_NAMESPACE] {
        if let Some(values) = map.get(k) {
            return Some((k, values));
        }
    }
    // Ties go to the smallest key, since the map iterates in key order.
    map.iter()
        .min_by_key(|(_, values)| values.len())
        .map(|(k, values)| (*k, values))
}

fn connector(last: bool) -> &'static str {
    if last {
        "└── "
    } else {
        "├── "
    }
}

fn display_value(value: &str) -> &str {
    if value.is_empty() {
        "(null)"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::{btreemap, hashmap};
    use std::collections::HashMap;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn identities() -> (Vec<(NumericIdentity, Labels)>, HashMap<NumericIdentity, Vec<String>>) {
        let ids = vec![
            (
                NumericIdentity(100),
                labels(&[
                    (LABEL_CLUSTER, "default"),
                    (LABEL_POD_NAMESPACE, "prod"),
                    ("k8s:app", "web"),
                    ("k8s:tier", "front"),
                ]),
            ),
            (
                NumericIdentity(101),
                labels(&[
                    (LABEL_CLUSTER, "default"),
                    (LABEL_POD_NAMESPACE, "prod"),
                    ("k8s:app", "api"),
                    ("k8s:tier", "back"),
                ]),
            ),
            (
                NumericIdentity(102),
                labels(&[
                    (LABEL_CLUSTER, "default"),
                    (LABEL_POD_NAMESPACE, "prod"),
                    ("k8s:app", "db"),
                ]),
            ),
        ];
        let eps = hashmap! {
            NumericIdentity(100) => vec!["web-1".to_string(), "web-0".to_string()],
            NumericIdentity(101) => vec!["api-0".to_string()],
            NumericIdentity(102) => vec!["db-0".to_string()],
        };
        (ids, eps)
    }

    #[test]
    fn label_map_fills_missing_values() {
        let (ids, _) = identities();
        let map = label_map(&ids);
        assert_eq!(
            map["k8s:tier"].iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["", "back", "front"]
        );
        assert_eq!(map[LABEL_CLUSTER].len(), 1);
    }

    #[test]
    fn builds_hierarchy() {
        let (ids, eps) = identities();
        let tree = LabelTree::build(ids, &|id: NumericIdentity| {
            eps.get(&id).cloned().unwrap_or_default()
        });

        let expected = LabelTree::Shared {
            key: LABEL_CLUSTER.to_string(),
            value: "default".to_string(),
            child: Box::new(LabelTree::Shared {
                key: LABEL_POD_NAMESPACE.to_string(),
                value: "prod".to_string(),
                child: Box::new(LabelTree::Branch {
                    key: "k8s:app".to_string(),
                    children: vec![
                        (
                            "api".to_string(),
                            LabelTree::Shared {
                                key: "k8s:tier".to_string(),
                                value: "back".to_string(),
                                child: Box::new(LabelTree::Leaf(vec!["api-0".to_string()])),
                            },
                        ),
                        (
                            "db".to_string(),
                            LabelTree::Leaf(vec!["db-0".to_string()]),
                        ),
                        (
                            "web".to_string(),
                            LabelTree::Shared {
                                key: "k8s:tier".to_string(),
                                value: "front".to_string(),
                                child: Box::new(LabelTree::Leaf(vec![
                                    "web-0".to_string(),
                                    "web-1".to_string(),
                                ])),
                            },
                        ),
                    ],
                }),
            }),
        };
        assert_eq!(tree, expected);
    }

    #[test]
    fn picks_least_branching_key() {
        let ids = vec![
            (NumericIdentity(1), labels(&[("b", "x"), ("a", "1")])),
            (NumericIdentity(2), labels(&[("b", "y"), ("a", "2")])),
            (NumericIdentity(3), labels(&[("b", "y"), ("a", "3")])),
        ];
        let tree = LabelTree::build(ids, &|id: NumericIdentity| vec![format!("pod-{id}")]);
        match tree {
            LabelTree::Branch { key, children } => {
                assert_eq!(key, "b");
                assert_eq!(children.len(), 2);
            }
            t => panic!("unexpected tree: {t:?}"),
        }

        // Equal cardinality falls back to the smallest key.
        let ids = vec![
            (NumericIdentity(1), labels(&[("b", "x"), ("a", "1")])),
            (NumericIdentity(2), labels(&[("b", "y"), ("a", "2")])),
        ];
        match LabelTree::build(ids, &|_: NumericIdentity| Vec::new()) {
            LabelTree::Branch { key, .. } => assert_eq!(key, "a"),
            t => panic!("unexpected tree: {t:?}"),
        }
    }

    #[test]
    fn leaves_partition_endpoints() {
        let mut ids = Vec::new();
        let mut eps = HashMap::new();
        let apps = ["web", "api", "db", "cache"];
        let tiers = ["front", "back"];
        for n in 0..24u32 {
            let mut l = btreemap! {
                LABEL_POD_NAMESPACE.to_string() => format!("ns-{}", n % 3),
                "k8s:app".to_string() => apps[n as usize % apps.len()].to_string(),
            };
            if n % 5 != 0 {
                l.insert("k8s:tier".to_string(), tiers[n as usize % 2].to_string());
            }
            ids.push((NumericIdentity(n), l));
            eps.insert(
                NumericIdentity(n),
                (0..(n % 3)).map(|i| format!("pod-{n}-{i}")).collect::<Vec<_>>(),
            );
        }
        let all = eps.values().flatten().cloned().collect::<BTreeSet<_>>();

        let tree = LabelTree::build(ids, &|id: NumericIdentity| {
            eps.get(&id).cloned().unwrap_or_default()
        });
        let leaves = tree.endpoints();
        let unique = leaves.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        assert_eq!(leaves.len(), unique.len(), "leaves overlap");
        assert_eq!(unique, all);
    }

    #[test]
    fn renders_connectors() {
        let tree = LabelTree::Branch {
            key: "k8s:app".to_string(),
            children: vec![
                ("".to_string(), LabelTree::Leaf(vec!["a".to_string()])),
                (
                    "web".to_string(),
                    LabelTree::Shared {
                        key: "k8s:tier".to_string(),
                        value: "front".to_string(),
                        child: Box::new(LabelTree::Leaf(vec!["b".to_string(), "c".to_string()])),
                    },
                ),
            ],
        };
        let expected = "\
k8s:app
├── (null)
│   └── [Pod] a
└── web
    k8s:tier: front
    ├── [Pod] b
    └── [Pod] c
";
        assert_eq!(tree.render(false).to_string(), expected);
        assert!(tree.render(true).to_string().contains("\u{1b}["));
    }
}
