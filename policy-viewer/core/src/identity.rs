use crate::{Error, IpNet, Result, LABEL_POD_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A Cilium security identity.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NumericIdentity(pub u32);

/// Names the agent that reported a policy map.
///
/// Locally-scoped identities are only meaningful relative to this agent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentHandle(String);

/// Looks up identities that are known only to a single agent.
#[async_trait::async_trait]
pub trait AgentClient: Send + Sync {
    fn handle(&self) -> &AgentHandle;

    /// Returns the label list of `id` as the agent reports it, e.g. `reserved:world`.
    async fn identity_labels(&self, id: NumericIdentity) -> anyhow::Result<Vec<String>>;
}

/// A workload endpoint.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Reserved(&'static str),
    /// A locally-scoped identity allocated for a world prefix.
    Cidr(IpNet),
    Global(BTreeMap<String, String>),
    /// A locally-scoped identity that does not represent a prefix.
    Local(Vec<String>),
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub identity: NumericIdentity,
    pub scope: Scope,
    pub namespace: Option<String>,
    pub example: Option<String>,
}

/// Identity metadata for a single invocation.
///
/// The cluster-wide identity and endpoint listings are loaded once, up front. Identities that are
/// local to an agent are fetched on demand and memoized per `(agent, identity)`.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    identities: HashMap<NumericIdentity, BTreeMap<String, String>>,
    endpoints: HashMap<NumericIdentity, Vec<Endpoint>>,
    local: HashMap<(AgentHandle, NumericIdentity), Vec<String>>,
}

const RESERVED: [&str; 9] = [
    "unknown",
    "host",
    "world",
    "unmanaged",
    "health",
    "init",
    "remote-node",
    "kube-apiserver",
    "ingress",
];

const LOCAL_SCOPE_MASK: u32 = 0xFF00_0000;
const LOCAL_SCOPE_FLAG: u32 = 0x0100_0000;

const LABEL_WORLD: &str = "reserved:world";
const CIDR_SOURCE: &str = "cidr:";

// === impl NumericIdentity ===

impl NumericIdentity {
    /// Matches any peer in a policy map.
    pub const UNKNOWN: Self = Self(0);
    pub const HOST: Self = Self(1);
    pub const WORLD: Self = Self(2);
    pub const WORLD_IPV4: Self = Self(9);
    pub const WORLD_IPV6: Self = Self(10);

    pub fn reserved_name(self) -> Option<&'static str> {
        RESERVED.get(self.0 as usize).copied()
    }

    #[inline]
    pub fn is_reserved(self) -> bool {
        self.reserved_name().is_some()
    }

    #[inline]
    pub fn is_local_scope(self) -> bool {
        self.0 & LOCAL_SCOPE_MASK == LOCAL_SCOPE_FLAG
    }

    /// Returns true for the reserved identities that stand for any world address.
    #[inline]
    pub fn is_world(self) -> bool {
        matches!(self, Self::WORLD | Self::WORLD_IPV4 | Self::WORLD_IPV6)
    }
}

impl std::fmt::Display for NumericIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for NumericIdentity {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u32> for NumericIdentity {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// === impl AgentHandle ===

impl AgentHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Resolved ===

impl Resolved {
    pub fn namespace_or_unknown(&self) -> &str {
        self.namespace.as_deref().unwrap_or(crate::UNKNOWN)
    }

    pub fn example_or_unknown(&self) -> &str {
        self.example.as_deref().unwrap_or(crate::UNKNOWN)
    }

    pub fn cidr(&self) -> Option<IpNet> {
        match self.scope {
            Scope::Cidr(net) => Some(net),
            _ => None,
        }
    }
}

// === impl ResolutionContext ===

impl ResolutionContext {
    /// Builds a context from the cluster-wide identity labels and endpoint listings.
    pub fn new(
        identities: HashMap<NumericIdentity, BTreeMap<String, String>>,
        endpoints: impl IntoIterator<Item = (NumericIdentity, Endpoint)>,
    ) -> Self {
        let mut by_identity = HashMap::<_, Vec<_>>::new();
        for (id, ep) in endpoints {
            by_identity.entry(id).or_default().push(ep);
        }
        // The first endpoint of each identity serves as its example for the whole run.
        for eps in by_identity.values_mut() {
            eps.sort();
        }
        Self {
            identities,
            endpoints: by_identity,
            local: HashMap::new(),
        }
    }

    /// Labels of a cluster-wide identity.
    pub fn labels(&self, id: NumericIdentity) -> Option<&BTreeMap<String, String>> {
        self.identities.get(&id)
    }

    /// Iterates over all cluster-wide identities.
    pub fn identities(&self) -> impl Iterator<Item = (NumericIdentity, &BTreeMap<String, String>)> {
        self.identities.iter().map(|(id, labels)| (*id, labels))
    }

    /// Endpoints that carry `id`, sorted by namespace and name.
    pub fn endpoints(&self, id: NumericIdentity) -> &[Endpoint] {
        self.endpoints.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// A stable representative endpoint of `id`.
    pub fn example(&self, id: NumericIdentity) -> Option<&Endpoint> {
        self.endpoints(id).first()
    }

    /// Classifies `id` as reported by `agent`.
    pub async fn resolve(
        &mut self,
        agent: &dyn AgentClient,
        id: NumericIdentity,
    ) -> Result<Resolved> {
        let example = self.example(id).map(|ep| ep.name.clone());

        if let Some(name) = id.reserved_name() {
            return Ok(Resolved {
                identity: id,
                scope: Scope::Reserved(name),
                namespace: None,
                example: example.or_else(|| Some(format!("reserved:{name}"))),
            });
        }

        if let Some(labels) = self.identities.get(&id) {
            return Ok(Resolved {
                identity: id,
                scope: Scope::Global(labels.clone()),
                namespace: labels.get(LABEL_POD_NAMESPACE).cloned(),
                example,
            });
        }

        if !id.is_local_scope() {
            return Ok(Resolved {
                identity: id,
                scope: Scope::Unknown,
                namespace: None,
                example,
            });
        }

        let labels = self.local_labels(agent, id).await?;
        if labels.iter().any(|l| is_world_label(l)) {
            let net = cidr_of(id, labels)?;
            return Ok(Resolved {
                identity: id,
                scope: Scope::Cidr(net),
                namespace: None,
                example: example.or_else(|| Some(format!("{CIDR_SOURCE}{net}"))),
            });
        }

        let namespace = labels.iter().find_map(|l| {
            l.strip_prefix(LABEL_POD_NAMESPACE)
                .and_then(|v| v.strip_prefix('='))
                .map(str::to_string)
        });
        Ok(Resolved {
            identity: id,
            scope: Scope::Local(labels.to_vec()),
            namespace,
            example,
        })
    }

    async fn local_labels(
        &mut self,
        agent: &dyn AgentClient,
        id: NumericIdentity,
    ) -> Result<&[String]> {
        let key = (agent.handle().clone(), id);
        if !self.local.contains_key(&key) {
            tracing::debug!(%id, agent = %agent.handle(), "Looking up local identity");
            let labels = agent
                .identity_labels(id)
                .await
                .map_err(|source| Error::Lookup {
                    identity: id,
                    agent: agent.handle().to_string(),
                    source,
                })?;
            self.local.insert(key.clone(), labels);
        }
        Ok(self.local.get(&key).map(Vec::as_slice).unwrap_or_default())
    }
}

fn is_world_label(label: &str) -> bool {
    label == LABEL_WORLD || label.starts_with("reserved:world-")
}

/// Extracts the prefix from the single `cidr:` label of a world identity.
fn cidr_of(id: NumericIdentity, labels: &[String]) -> Result<IpNet> {
    let cidrs = labels
        .iter()
        .filter_map(|l| l.strip_prefix(CIDR_SOURCE))
        .collect::<Vec<_>>();
    let [cidr] = cidrs.as_slice() else {
        return Err(Error::CidrLabel {
            identity: id,
            found: cidrs.len(),
        });
    };
    parse_cidr_label(cidr).ok_or_else(|| Error::InvalidCidr(format!("{CIDR_SOURCE}{cidr}")))
}

/// Parses the value of a `cidr:` label.
///
/// Label keys may not contain colons, so IPv6 prefixes are written with dashes instead
/// (`2001-db8--/32`), with a leading `0` when the address starts with `::`.
pub fn parse_cidr_label(value: &str) -> Option<IpNet> {
    let value = value.split_once('=').map_or(value, |(k, _)| k);
    let net = if value.contains('.') {
        value.parse::<IpNet>().ok()?
    } else {
        value.replace('-', ":").parse::<IpNet>().ok()?
    };
    Some(net.trunc())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use maplit::{btreemap, hashmap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct MockAgent {
        handle: AgentHandle,
        labels: HashMap<u32, Vec<&'static str>>,
        pub(crate) lookups: AtomicUsize,
    }

    impl MockAgent {
        pub(crate) fn new(name: &str, labels: HashMap<u32, Vec<&'static str>>) -> Self {
            Self {
                handle: AgentHandle::new(name),
                labels,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentClient for MockAgent {
        fn handle(&self) -> &AgentHandle {
            &self.handle
        }

        async fn identity_labels(&self, id: NumericIdentity) -> anyhow::Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match self.labels.get(&id.0) {
                Some(labels) => Ok(labels.iter().map(|l| l.to_string()).collect()),
                None => anyhow::bail!("identity {id} not found"),
            }
        }
    }

    fn context() -> ResolutionContext {
        ResolutionContext::new(
            hashmap! {
                NumericIdentity(1000) => btreemap! {
                    "k8s:app".to_string() => "web".to_string(),
                    LABEL_POD_NAMESPACE.to_string() => "prod".to_string(),
                },
            },
            vec![
                (NumericIdentity(1000), Endpoint::new("prod", "web-b")),
                (NumericIdentity(1000), Endpoint::new("prod", "web-a")),
            ],
        )
    }

    #[test]
    fn local_scope() {
        assert!(NumericIdentity(0x0100_0001).is_local_scope());
        assert!(NumericIdentity(16777217).is_local_scope());
        assert!(!NumericIdentity(2).is_local_scope());
        assert!(!NumericIdentity(0x0200_0001).is_local_scope());
        assert!(!NumericIdentity(65536).is_local_scope());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reserved_without_lookup() {
        let agent = MockAgent::new("node-a", HashMap::new());
        let mut ctx = ResolutionContext::default();
        let names = [
            "unknown",
            "host",
            "world",
            "unmanaged",
            "health",
            "init",
            "remote-node",
            "kube-apiserver",
            "ingress",
        ];
        for (id, name) in names.iter().enumerate() {
            let r = ctx.resolve(&agent, NumericIdentity(id as u32)).await.unwrap();
            assert_eq!(r.scope, Scope::Reserved(*name));
            assert_eq!(r.example.as_deref(), Some(format!("reserved:{name}").as_str()));
            assert_eq!(r.namespace_or_unknown(), "-");
        }
        assert_eq!(agent.lookups.load(Ordering::SeqCst), 0);

        let host = ctx.resolve(&agent, NumericIdentity(1)).await.unwrap();
        assert_eq!(host.example_or_unknown(), "reserved:host");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn global_identity() {
        let agent = MockAgent::new("node-a", HashMap::new());
        let mut ctx = context();
        let r = ctx.resolve(&agent, NumericIdentity(1000)).await.unwrap();
        assert!(matches!(r.scope, Scope::Global(_)));
        assert_eq!(r.namespace.as_deref(), Some("prod"));
        assert_eq!(r.example.as_deref(), Some("web-a"));
        assert_eq!(agent.lookups.load(Ordering::SeqCst), 0);

        let r = ctx.resolve(&agent, NumericIdentity(2000)).await.unwrap();
        assert_eq!(r.scope, Scope::Unknown);
        assert_eq!(r.example_or_unknown(), "-");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn local_identities_are_cached_per_agent() {
        let id = NumericIdentity(16777217);
        let a = MockAgent::new(
            "node-a",
            hashmap! { id.0 => vec!["reserved:world", "cidr:8.8.8.8/32"] },
        );
        let b = MockAgent::new(
            "node-b",
            hashmap! { id.0 => vec!["reserved:world", "cidr:1.1.1.0/24"] },
        );
        let mut ctx = ResolutionContext::default();

        for _ in 0..3 {
            let r = ctx.resolve(&a, id).await.unwrap();
            assert_eq!(r.cidr(), Some("8.8.8.8/32".parse().unwrap()));
            assert_eq!(r.example.as_deref(), Some("cidr:8.8.8.8/32"));
        }
        assert_eq!(a.lookups.load(Ordering::SeqCst), 1);

        let r = ctx.resolve(&b, id).await.unwrap();
        assert_eq!(r.cidr(), Some("1.1.1.0/24".parse().unwrap()));
        assert_eq!(b.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn local_identity_errors() {
        let agent = MockAgent::new(
            "node-a",
            hashmap! {
                16777217 => vec!["reserved:world"],
                16777218 => vec!["reserved:world", "cidr:8.8.0.0/16", "cidr:8.8.8.8/32"],
                16777219 => vec!["k8s:app=batch", "k8s:io.kubernetes.pod.namespace=jobs"],
            },
        );
        let mut ctx = ResolutionContext::default();

        assert!(matches!(
            ctx.resolve(&agent, NumericIdentity(16777217)).await,
            Err(Error::CidrLabel { found: 0, .. })
        ));
        assert!(matches!(
            ctx.resolve(&agent, NumericIdentity(16777218)).await,
            Err(Error::CidrLabel { found: 2, .. })
        ));
        assert!(matches!(
            ctx.resolve(&agent, NumericIdentity(16777220)).await,
            Err(Error::Lookup { .. })
        ));

        let r = ctx.resolve(&agent, NumericIdentity(16777219)).await.unwrap();
        assert!(matches!(r.scope, Scope::Local(_)));
        assert_eq!(r.namespace.as_deref(), Some("jobs"));
    }

    #[test]
    fn cidr_labels() {
        assert_eq!(
            parse_cidr_label("10.1.0.0/16"),
            Some("10.1.0.0/16".parse().unwrap())
        );
        assert_eq!(
            parse_cidr_label("2001-db8--/32"),
            Some("2001:db8::/32".parse().unwrap())
        );
        assert_eq!(parse_cidr_label("0--/0"), Some("::/0".parse().unwrap()));
        assert_eq!(
            parse_cidr_label("8.8.8.8/32="),
            Some("8.8.8.8/32".parse().unwrap())
        );
        assert_eq!(parse_cidr_label("nonsense"), None);
    }
}
