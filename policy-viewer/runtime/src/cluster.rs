use crate::proxy::ProxyClient;
use anyhow::{bail, Context, Result};
use kube::api::{Api, DynamicObject, ListParams};
use npv_core::{identity::Endpoint, NumericIdentity, PolicyEntry, ResolutionContext};
use npv_k8s_api::{
    policy::{self, PolicyKind},
    CiliumEndpoint, CiliumIdentity, Node, Pod, ResourceExt,
};
use std::{
    collections::{hash_map, HashMap},
    net::{IpAddr, SocketAddr},
};
use tracing::{debug, instrument};

const AGENT_NAMESPACE: &str = "kube-system";
const AGENT_SELECTOR: &str = "k8s-app=cilium";

/// Where to find the `cilium-agent-proxy` pods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub namespace: String,
    pub selector: String,
    pub port: u16,
}

/// Which pods a command operates on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// The namespace of named pods, and of listed pods unless `all_namespaces` is set.
    pub namespace: String,
    pub all_namespaces: bool,
    pub node: Option<String>,
}

/// Kubernetes API access for one invocation.
pub struct Cluster {
    client: kube::Client,
    proxy: ProxyConfig,
    proxies: HashMap<String, ProxyClient>,
}

// === impl Selection ===

impl Selection {
    pub fn list_namespace(&self) -> Option<&str> {
        (!self.all_namespaces).then_some(self.namespace.as_str())
    }

    /// Whether an identity's namespace is in scope. Identities without a namespace always are.
    pub fn includes_namespace(&self, ns: Option<&str>) -> bool {
        match (self.list_namespace(), ns) {
            (Some(scope), Some(ns)) => scope == ns,
            _ => true,
        }
    }

    fn list_params(&self, selector: Option<&str>) -> ListParams {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        if let Some(node) = self.node.as_deref() {
            params = params.fields(&format!("spec.nodeName={node}"));
        }
        params
    }
}

/// Host-network pods share the node's identity and have no endpoint of their own.
pub fn is_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false)
}

pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Running")
}

pub fn endpoint_of(pod: &Pod) -> Endpoint {
    Endpoint::new(pod.namespace().unwrap_or_default(), pod.name_any())
}

/// Parses a `NAMESPACE/NAME` argument.
pub fn parse_namespaced_name(s: &str) -> Option<Endpoint> {
    let (ns, name) = s.split_once('/')?;
    if ns.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(Endpoint::new(ns, name))
}

// === impl Cluster ===

impl Cluster {
    pub fn new(client: kube::Client, proxy: ProxyConfig) -> Self {
        Self {
            client,
            proxy,
            proxies: HashMap::new(),
        }
    }

    fn pods(&self, ns: Option<&str>) -> Api<Pod> {
        match ns {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub async fn pod(&self, ns: &str, name: &str) -> Result<Pod> {
        self.pods(Some(ns))
            .get(name)
            .await
            .with_context(|| format!("failed to get pod {ns}/{name}"))
    }

    /// Lists pods in scope without filtering them.
    pub async fn list_pods(
        &self,
        selection: &Selection,
        selector: Option<&str>,
    ) -> Result<Vec<Pod>> {
        let pods = self
            .pods(selection.list_namespace())
            .list(&selection.list_params(selector))
            .await
            .context("failed to list pods")?;
        Ok(pods.items)
    }

    /// Resolves the subjects of a command: the named pod, or the running, Cilium-managed pods
    /// matching `selector`.
    pub async fn select_pods(
        &self,
        selection: &Selection,
        name: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<Pod>> {
        if let Some(name) = name {
            if selection.all_namespaces || selector.is_some() {
                bail!("multiple pods should not be selected when pod name is specified");
            }
            return Ok(vec![self.pod(&selection.namespace, name).await?]);
        }

        let mut pods = self
            .list_pods(selection, selector)
            .await?
            .into_iter()
            .filter(|p| !is_host_network(p) && is_running(p))
            .collect::<Vec<_>>();
        pods.sort_by_key(endpoint_of);
        Ok(pods)
    }

    pub async fn cilium_endpoint(&self, ns: &str, name: &str) -> Result<CiliumEndpoint> {
        Api::<CiliumEndpoint>::namespaced(self.client.clone(), ns)
            .get(name)
            .await
            .with_context(|| format!("failed to get CiliumEndpoint {ns}/{name}"))
    }

    pub async fn pod_identity(&self, ep: &Endpoint) -> Result<NumericIdentity> {
        Ok(self
            .cilium_endpoint(&ep.namespace, &ep.name)
            .await?
            .identity()?)
    }

    pub async fn identities(&self) -> Result<Vec<CiliumIdentity>> {
        let list = Api::<CiliumIdentity>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .context("failed to list CiliumIdentity")?;
        Ok(list.items)
    }

    pub async fn identity(&self, id: NumericIdentity) -> Result<CiliumIdentity> {
        Api::<CiliumIdentity>::all(self.client.clone())
            .get(&id.to_string())
            .await
            .with_context(|| format!("failed to get CiliumIdentity {id}"))
    }

    pub async fn endpoints(&self) -> Result<Vec<CiliumEndpoint>> {
        let list = Api::<CiliumEndpoint>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .context("failed to list CiliumEndpoint")?;
        Ok(list.items)
    }

    /// Endpoints grouped by their security identity. Endpoints without one are skipped.
    pub async fn identity_endpoints(&self) -> Result<Vec<(NumericIdentity, Endpoint)>> {
        let eps = self.endpoints().await?;
        Ok(eps
            .iter()
            .filter_map(|ep| Some((ep.identity().ok()?, ep.endpoint())))
            .collect())
    }

    /// Loads the cluster-wide identity metadata that a run resolves peers against.
    #[instrument(skip(self))]
    pub async fn resolution_context(&self) -> Result<ResolutionContext> {
        let mut identities = HashMap::new();
        for id in self.identities().await? {
            identities.insert(id.numeric_identity()?, id.labels());
        }
        let endpoints = self.identity_endpoints().await?;
        debug!(
            identities = identities.len(),
            endpoints = endpoints.len(),
            "Loaded identities"
        );
        Ok(ResolutionContext::new(identities, endpoints))
    }

    /// Returns the proxy on the node running `pod`.
    pub async fn proxy_for(&mut self, pod: &Pod) -> Result<ProxyClient> {
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .with_context(|| format!("pod {} is not scheduled", endpoint_of(pod)))?;
        let entry = match self.proxies.entry(node) {
            hash_map::Entry::Occupied(e) => return Ok(e.get().clone()),
            hash_map::Entry::Vacant(e) => e,
        };

        let params = ListParams::default()
            .labels(&self.proxy.selector)
            .fields(&format!("spec.nodeName={}", entry.key()));
        let pods = Api::<Pod>::namespaced(self.client.clone(), &self.proxy.namespace)
            .list(&params)
            .await
            .context("failed to list proxy pods")?;
        if pods.items.len() != 1 {
            bail!(
                "failed to find cilium-agent-proxy. found {} pods",
                pods.items.len()
            );
        }
        let ip = pods.items[0]
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.as_deref())
            .context("cilium-agent-proxy has no pod IP")?
            .parse::<IpAddr>()
            .context("invalid cilium-agent-proxy pod IP")?;
        let proxy = ProxyClient::new(entry.key().clone(), SocketAddr::new(ip, self.proxy.port));
        debug!(node = %entry.key(), addr = %proxy.addr(), "Found proxy");
        Ok(entry.insert(proxy).clone())
    }

    /// Fetches the policy map of a pod along with the proxy that reported it.
    #[instrument(skip(self, pod), fields(pod = %endpoint_of(pod)))]
    pub async fn policy_map(&mut self, pod: &Pod) -> Result<(ProxyClient, Vec<PolicyEntry>)> {
        let ep = endpoint_of(pod);
        let endpoint_id = self
            .cilium_endpoint(&ep.namespace, &ep.name)
            .await?
            .endpoint_id()
            .context("failed to get pod endpoint ID")?;
        let proxy = self
            .proxy_for(pod)
            .await
            .context("failed to get proxy endpoint")?;
        let entries = proxy.policy(endpoint_id).await?;
        debug!(endpoint_id, entries = entries.len(), "Fetched policy map");
        Ok((proxy, entries))
    }

    pub async fn policy_map_of(
        &mut self,
        ep: &Endpoint,
    ) -> Result<(ProxyClient, Vec<PolicyEntry>)> {
        let pod = self.pod(&ep.namespace, &ep.name).await?;
        self.policy_map(&pod).await
    }

    /// Returns the name of the Cilium agent pod on `node`.
    pub async fn agent_on(&self, node: &str) -> Result<String> {
        let params = ListParams::default()
            .labels(AGENT_SELECTOR)
            .fields(&format!("spec.nodeName={node}"));
        let pods = self
            .pods(Some(AGENT_NAMESPACE))
            .list(&params)
            .await
            .context("failed to list cilium-agent pods")?;
        if pods.items.len() != 1 {
            bail!("failed to find cilium-agent. found {} pods", pods.items.len());
        }
        Ok(pods.items[0].name_any())
    }

    pub async fn node(&self, name: &str) -> Result<Node> {
        Api::<Node>::all(self.client.clone())
            .get(name)
            .await
            .with_context(|| format!("failed to get node {name}"))
    }

    /// Fetches a policy a rule was derived from.
    pub async fn network_policy(
        &self,
        kind: PolicyKind,
        ns: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        let resource = kind.api_resource();
        let api = if kind.is_namespaced() {
            Api::<DynamicObject>::namespaced_with(self.client.clone(), ns, &resource)
        } else {
            Api::<DynamicObject>::all_with(self.client.clone(), &resource)
        };
        let mut obj = api
            .get(name)
            .await
            .with_context(|| format!("failed to get {kind} {name}"))?;
        policy::strip_server_metadata(&mut obj);
        Ok(obj)
    }
}
