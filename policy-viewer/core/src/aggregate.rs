//! Group-by-key with summed counters.
//!
//! Aggregates are plain ordered maps whose values know how to absorb one another, so that the
//! results for several subjects can be built independently and merged in any order.

use crate::{CidrSet, Direction, NumericIdentity, PolicyEntry, Resolved};
use serde::Serialize;
use std::collections::{btree_map, BTreeMap};

/// Values that can absorb another value for the same key.
///
/// Implementations must be associative and commutative.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate<K: Ord, V> {
    groups: BTreeMap<K, V>,
}

/// Policies an endpoint's rules were derived from, with the number of references to each.
pub type PolicyList = Aggregate<DerivedFrom, usize>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DerivedFrom {
    pub direction: Direction,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Identifies a traffic bucket.
///
/// Fields are declared in the order buckets are listed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrafficKey {
    pub direction: Direction,
    pub namespace: String,
    /// The peer identity, or `world` for CIDR peers.
    pub identity: NumericIdentity,
    /// The resolved prefix (or its bucket) for CIDR peers; empty otherwise.
    pub cidr: String,
    pub wildcard_protocol: bool,
    pub wildcard_port: bool,
    pub protocol: u8,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrafficValue {
    pub example: String,
    pub bytes: u64,
    pub packets: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CidrBucketing {
    /// Key CIDR peers by their exact prefix.
    #[default]
    Exact,
    /// Collapse CIDR peers into `private`, `public` and `unknown`.
    Unify,
}

/// Traffic volume per peer across one or more endpoints.
#[derive(Clone, Debug)]
pub struct Traffic {
    bucketing: CidrBucketing,
    private: CidrSet,
    public: CidrSet,
    groups: Aggregate<TrafficKey, TrafficValue>,
}

/// Number of policy map entries of an endpoint by direction and verdict.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuleCounts {
    pub ingress_allow: i64,
    pub ingress_deny: i64,
    pub egress_allow: i64,
    pub egress_deny: i64,
}

const DERIVED_FROM: &str = "k8s:io.cilium.k8s.policy.derived-from=";
const POLICY_NAMESPACE: &str = "k8s:io.cilium.k8s.policy.namespace=";
const POLICY_NAME: &str = "k8s:io.cilium.k8s.policy.name=";

// === impl Aggregate ===

impl<K: Ord, V> Default for Aggregate<K, V> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V: Merge> Aggregate<K, V> {
    pub fn add(&mut self, key: K, value: V) {
        match self.groups.entry(key) {
            btree_map::Entry::Occupied(mut e) => e.get_mut().merge(value),
            btree_map::Entry::Vacant(e) => {
                e.insert(value);
            }
        }
    }
}

impl<K: Ord, V> Aggregate<K, V> {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.groups.get(key)
    }

    /// Iterates over groups in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.groups.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, K, V> {
        self.groups.keys()
    }
}

impl<K: Ord, V: Merge> Merge for Aggregate<K, V> {
    fn merge(&mut self, other: Self) {
        for (k, v) in other.groups {
            self.add(k, v);
        }
    }
}

impl<K: Ord, V: Merge> FromIterator<(K, V)> for Aggregate<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut agg = Self::default();
        for (k, v) in iter {
            agg.add(k, v);
        }
        agg
    }
}

impl<K: Ord, V> IntoIterator for Aggregate<K, V> {
    type Item = (K, V);
    type IntoIter = btree_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a, K: Ord, V> IntoIterator for &'a Aggregate<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = btree_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

impl Merge for usize {
    fn merge(&mut self, other: Self) {
        *self += other;
    }
}

impl Merge for u64 {
    fn merge(&mut self, other: Self) {
        *self += other;
    }
}

// === impl DerivedFrom ===

impl DerivedFrom {
    /// Reads a rule source from a `derived-from-rules` label list.
    pub fn parse<S: AsRef<str>>(direction: Direction, labels: &[S]) -> Self {
        let mut derived = Self {
            direction,
            kind: String::new(),
            namespace: crate::UNKNOWN.to_string(),
            name: String::new(),
        };
        for label in labels {
            let label = label.as_ref();
            if let Some(kind) = label.strip_prefix(DERIVED_FROM) {
                derived.kind = kind.to_string();
            } else if let Some(ns) = label.strip_prefix(POLICY_NAMESPACE) {
                derived.namespace = ns.to_string();
            } else if let Some(name) = label.strip_prefix(POLICY_NAME) {
                derived.name = name.to_string();
            }
        }
        derived
    }
}

// === impl Traffic ===

impl Traffic {
    pub fn new(bucketing: CidrBucketing) -> Self {
        Self {
            bucketing,
            private: CidrSet::private(),
            public: CidrSet::public(),
            groups: Aggregate::default(),
        }
    }

    /// Accounts an entry whose peer resolved to `resolved`.
    pub fn add(&mut self, entry: &PolicyEntry, resolved: &Resolved) {
        // CIDR identities are allocated per node, so CIDR peers are keyed by prefix instead.
        let (identity, cidr) = match resolved.cidr() {
            Some(net) => (NumericIdentity::WORLD, self.bucket(&net)),
            None => (entry.identity, String::new()),
        };
        let key = TrafficKey {
            direction: entry.direction,
            namespace: resolved.namespace_or_unknown().to_string(),
            identity,
            cidr,
            wildcard_protocol: entry.wildcard_protocol,
            wildcard_port: entry.wildcard_port,
            protocol: entry.protocol,
            port: entry.port,
        };
        self.groups.add(
            key,
            TrafficValue {
                example: resolved.example_or_unknown().to_string(),
                bytes: entry.bytes,
                packets: entry.packets,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, TrafficKey, TrafficValue> {
        self.groups.iter()
    }

    fn bucket(&self, net: &crate::IpNet) -> String {
        match self.bucketing {
            CidrBucketing::Exact => net.to_string(),
            CidrBucketing::Unify if self.private.contains(net) => "private".to_string(),
            CidrBucketing::Unify if self.public.contains(net) => "public".to_string(),
            CidrBucketing::Unify => "unknown".to_string(),
        }
    }
}

impl Default for Traffic {
    fn default() -> Self {
        Self::new(CidrBucketing::default())
    }
}

impl Merge for Traffic {
    fn merge(&mut self, other: Self) {
        self.groups.merge(other.groups);
    }
}

impl Merge for TrafficValue {
    fn merge(&mut self, other: Self) {
        if other.example < self.example {
            self.example = other.example;
        }
        self.bytes += other.bytes;
        self.packets += other.packets;
    }
}

// === impl RuleCounts ===

impl RuleCounts {
    pub fn count<'a>(entries: impl IntoIterator<Item = &'a PolicyEntry>) -> Self {
        let mut counts = Self::default();
        for e in entries {
            let counter = match (e.direction, e.deny) {
                (Direction::Ingress, false) => &mut counts.ingress_allow,
                (Direction::Ingress, true) => &mut counts.ingress_deny,
                (Direction::Egress, false) => &mut counts.egress_allow,
                (Direction::Egress, true) => &mut counts.egress_deny,
            };
            *counter += 1;
        }
        counts
    }

    /// Host-network pods have no policy map.
    pub fn not_applicable() -> Self {
        Self {
            ingress_allow: -1,
            ingress_deny: -1,
            egress_allow: -1,
            egress_deny: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Scope, LABEL_POD_NAMESPACE};

    fn entry(identity: u32, deny: bool, protocol: u8, port: u16, bytes: u64) -> PolicyEntry {
        PolicyEntry {
            identity: NumericIdentity(identity),
            direction: Direction::Egress,
            deny,
            wildcard_protocol: false,
            wildcard_port: false,
            protocol,
            port,
            bytes,
            packets: bytes / 10,
        }
    }

    fn workload(identity: u32, namespace: &str, example: &str) -> Resolved {
        Resolved {
            identity: NumericIdentity(identity),
            scope: Scope::Global(
                [(LABEL_POD_NAMESPACE.to_string(), namespace.to_string())]
                    .into_iter()
                    .collect(),
            ),
            namespace: Some(namespace.to_string()),
            example: Some(example.to_string()),
        }
    }

    fn cidr(identity: u32, net: &str) -> Resolved {
        Resolved {
            identity: NumericIdentity(identity),
            scope: Scope::Cidr(net.parse().unwrap()),
            namespace: None,
            example: Some(format!("cidr:{net}")),
        }
    }

    fn totals(t: &Traffic) -> Vec<(TrafficKey, u64, u64)> {
        t.iter()
            .map(|(k, v)| (k.clone(), v.bytes, v.packets))
            .collect()
    }

    #[test]
    fn distinct_protocols_do_not_merge() {
        let x = workload(1000, "prod", "web-0");
        let mut t = Traffic::default();
        t.add(&entry(1000, true, 6, 53, 10), &x);
        t.add(&entry(1000, false, 17, 53, 5), &x);
        assert_eq!(t.len(), 2);
        let bytes = t.iter().map(|(k, v)| (k.protocol, v.bytes)).collect::<Vec<_>>();
        assert_eq!(bytes, vec![(6, 10), (17, 5)]);
    }

    #[test]
    fn merging_subjects_matches_single_pass() {
        let web = workload(1000, "prod", "web-1");
        let web_other = workload(1000, "prod", "web-0");
        let dns = workload(2000, "kube-system", "coredns-0");
        let a = [
            (entry(1000, false, 6, 80, 100), &web),
            (entry(2000, false, 17, 53, 30), &dns),
            // The same prefix behind different per-node identities.
            (entry(16777217, false, 6, 443, 50), &cidr(16777217, "8.8.8.8/32")),
        ];
        let b = [
            (entry(1000, false, 6, 80, 200), &web_other),
            (entry(16777300, false, 6, 443, 70), &cidr(16777300, "8.8.8.8/32")),
        ];

        let mut ta = Traffic::default();
        for (e, r) in &a {
            ta.add(e, r);
        }
        let mut tb = Traffic::default();
        for (e, r) in &b {
            tb.add(e, r);
        }
        let mut single = Traffic::default();
        for (e, r) in a.iter().chain(b.iter()) {
            single.add(e, r);
        }

        let mut ab = ta.clone();
        ab.merge(tb.clone());
        let mut ba = tb;
        ba.merge(ta);
        assert_eq!(totals(&ab), totals(&single));
        assert_eq!(totals(&ba), totals(&single));
        assert_eq!(single.len(), 3);

        let world = single
            .iter()
            .find(|(k, _)| k.identity == NumericIdentity::WORLD)
            .unwrap();
        assert_eq!(world.0.cidr, "8.8.8.8/32");
        assert_eq!(world.1.bytes, 120);

        let web = single
            .iter()
            .find(|(k, _)| k.identity == NumericIdentity(1000))
            .unwrap();
        assert_eq!(web.1.example, "web-0");
        assert_eq!(web.1.bytes, 300);
    }

    #[test]
    fn unified_cidr_buckets() {
        let mut t = Traffic::new(CidrBucketing::Unify);
        t.add(&entry(16777217, false, 6, 443, 10), &cidr(16777217, "8.8.8.8/32"));
        t.add(&entry(16777218, false, 6, 443, 20), &cidr(16777218, "1.1.1.1/32"));
        t.add(&entry(16777219, false, 6, 443, 40), &cidr(16777219, "10.0.0.0/16"));
        t.add(&entry(16777220, false, 6, 443, 80), &cidr(16777220, "0.0.0.0/0"));
        let buckets = t
            .iter()
            .map(|(k, v)| (k.cidr.as_str(), v.bytes))
            .collect::<Vec<_>>();
        assert_eq!(
            buckets,
            vec![("private", 40), ("public", 30), ("unknown", 80)]
        );
    }

    #[test]
    fn derived_from_dedup() {
        let cnp = [
            "k8s:io.cilium.k8s.policy.derived-from=CiliumNetworkPolicy",
            "k8s:io.cilium.k8s.policy.name=allow-dns",
            "k8s:io.cilium.k8s.policy.namespace=prod",
            "k8s:io.cilium.k8s.policy.uid=0b2f",
        ];
        let ccnp = [
            "k8s:io.cilium.k8s.policy.derived-from=CiliumClusterwideNetworkPolicy",
            "k8s:io.cilium.k8s.policy.name=baseline",
        ];
        let list = [
            (Direction::Egress, &cnp[..]),
            (Direction::Egress, &ccnp[..]),
            (Direction::Egress, &cnp[..]),
            (Direction::Ingress, &ccnp[..]),
        ]
        .into_iter()
        .map(|(d, labels)| (DerivedFrom::parse(d, labels), 1))
        .collect::<PolicyList>();

        let got = list
            .iter()
            .map(|(k, n)| (k.direction, k.kind.as_str(), k.namespace.as_str(), k.name.as_str(), *n))
            .collect::<Vec<_>>();
        assert_eq!(
            got,
            vec![
                (Direction::Egress, "CiliumClusterwideNetworkPolicy", "-", "baseline", 1),
                (Direction::Egress, "CiliumNetworkPolicy", "prod", "allow-dns", 2),
                (Direction::Ingress, "CiliumClusterwideNetworkPolicy", "-", "baseline", 1),
            ]
        );
    }

    #[test]
    fn rule_counts() {
        let mut entries = vec![
            entry(1, false, 6, 80, 0),
            entry(2, true, 6, 80, 0),
            entry(3, false, 6, 80, 0),
        ];
        entries[2].direction = Direction::Ingress;
        let counts = RuleCounts::count(&entries);
        assert_eq!(
            counts,
            RuleCounts {
                ingress_allow: 1,
                ingress_deny: 0,
                egress_allow: 1,
                egress_deny: 1,
            }
        );
        assert_eq!(RuleCounts::not_applicable().egress_deny, -1);
    }
}
