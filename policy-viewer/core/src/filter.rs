use crate::{AgentClient, CidrSet, NumericIdentity, PolicyEntry, ResolutionContext, Result};
use futures::future::{BoxFuture, FutureExt};

/// A predicate over policy entries.
///
/// Constructors return `None` when the predicate would accept every entry, so that callers can
/// skip evaluation altogether.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Basic(Basic),
    /// Entries whose peer is the given cluster-wide identity (or any peer).
    Identity {
        directions: Directions,
        identity: NumericIdentity,
    },
    /// Entries whose peer is a world prefix matching the set (or any peer).
    Cidr {
        directions: Directions,
        set: CidrSet,
    },
    All(Vec<Filter>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Basic {
    pub directions: Directions,
    pub allowed: bool,
    pub denied: bool,
    pub used: bool,
    pub unused: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Directions {
    pub ingress: bool,
    pub egress: bool,
}

// === impl Filter ===

impl Filter {
    pub fn basic(
        ingress: bool,
        egress: bool,
        allowed: bool,
        denied: bool,
        used: bool,
        unused: bool,
    ) -> Option<Self> {
        if ingress && egress && allowed && denied && used && unused {
            return None;
        }
        Some(Self::Basic(Basic {
            directions: Directions { ingress, egress },
            allowed,
            denied,
            used,
            unused,
        }))
    }

    pub fn identity(ingress: bool, egress: bool, identity: NumericIdentity) -> Self {
        Self::Identity {
            directions: Directions { ingress, egress },
            identity,
        }
    }

    pub fn cidr(ingress: bool, egress: bool, set: CidrSet) -> Self {
        Self::Cidr {
            directions: Directions { ingress, egress },
            set,
        }
    }

    /// Conjunction of `filters`, evaluated in order.
    ///
    /// Cheap filters should come first, since later ones may need remote lookups.
    pub fn all(filters: impl IntoIterator<Item = Option<Self>>) -> Option<Self> {
        let mut flat = Vec::new();
        for f in filters.into_iter().flatten() {
            match f {
                Self::All(inner) => flat.extend(inner),
                f => flat.push(f),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::All(flat)),
        }
    }

    /// Evaluates the predicate for an entry reported by `agent`.
    pub fn eval<'a>(
        &'a self,
        ctx: &'a mut ResolutionContext,
        agent: &'a dyn AgentClient,
        entry: &'a PolicyEntry,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            match self {
                Self::Basic(basic) => Ok(basic.matches(entry)),

                Self::Identity {
                    directions,
                    identity,
                } => {
                    if !directions.matches(entry) {
                        return Ok(false);
                    }
                    if entry.identity == NumericIdentity::UNKNOWN {
                        return Ok(true);
                    }
                    // Locally-scoped identities never name a workload.
                    if entry.identity.is_local_scope() {
                        return Ok(false);
                    }
                    Ok(entry.identity == *identity)
                }

                Self::Cidr { directions, set } => {
                    if !directions.matches(entry) {
                        return Ok(false);
                    }
                    let id = entry.identity;
                    if id == NumericIdentity::UNKNOWN || id.is_world() {
                        return Ok(true);
                    }
                    if !id.is_local_scope() {
                        return Ok(false);
                    }
                    let resolved = ctx.resolve(agent, id).await?;
                    Ok(resolved.cidr().is_some_and(|net| set.matches(&net)))
                }

                Self::All(filters) => {
                    for f in filters {
                        if !f.eval(&mut *ctx, agent, entry).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
            }
        }
        .boxed()
    }
}

// === impl Basic ===

impl Basic {
    pub fn matches(&self, entry: &PolicyEntry) -> bool {
        let verdict = if entry.deny {
            self.denied
        } else {
            self.allowed
        };
        let usage = if entry.is_used() {
            self.used
        } else {
            self.unused
        };
        self.directions.matches(entry) && verdict && usage
    }
}

// === impl Directions ===

impl Directions {
    #[inline]
    pub fn matches(&self, entry: &PolicyEntry) -> bool {
        if entry.is_egress() {
            self.egress
        } else {
            self.ingress
        }
    }
}

/// Keeps the entries accepted by `filter`, preserving their order.
///
/// Evaluation stops at the first error.
pub async fn apply(
    filter: Option<&Filter>,
    ctx: &mut ResolutionContext,
    agent: &dyn AgentClient,
    entries: Vec<PolicyEntry>,
) -> Result<Vec<PolicyEntry>> {
    let Some(filter) = filter else {
        return Ok(entries);
    };
    let mut kept = Vec::with_capacity(entries.len());
    for entry in entries {
        if filter.eval(ctx, agent, &entry).await? {
            kept.push(entry);
        }
    }
    Ok(kept)
}
