use crate::{Error, Result};
use ipnet::IpNet;

/// A set of networks expressed as inclusions minus exclusions.
///
/// The effective prefixes are computed once, when the set is built, by carving each exclusion out
/// of the inclusions that enclose it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CidrSet {
    inclusions: Vec<IpNet>,
    exclusions: Vec<IpNet>,
    effective: Vec<IpNet>,
}

const PRIVATE: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Returns true if `parent` encloses `child` (or is equal to it).
#[inline]
pub fn is_child_cidr(parent: &IpNet, child: &IpNet) -> bool {
    parent.contains(&child.network()) && parent.prefix_len() <= child.prefix_len()
}

// === impl CidrSet ===

impl CidrSet {
    pub fn new(inclusions: Vec<IpNet>, exclusions: Vec<IpNet>) -> Result<Self> {
        if inclusions.is_empty() {
            return Err(Error::NoInclusiveCidr);
        }
        let inclusions = inclusions.iter().map(IpNet::trunc).collect::<Vec<_>>();
        let exclusions = exclusions.iter().map(IpNet::trunc).collect::<Vec<_>>();

        let mut effective = inclusions.clone();
        for excl in &exclusions {
            effective = effective
                .into_iter()
                .flat_map(|net| subtract(net, excl))
                .collect();
        }

        Ok(Self {
            inclusions,
            exclusions,
            effective,
        })
    }

    /// RFC 1918 networks.
    pub fn private() -> Self {
        Self::new(private_nets(), vec![]).expect("private networks must be valid")
    }

    /// The IPv4 space outside of the private networks.
    pub fn public() -> Self {
        let all = "0.0.0.0/0".parse().expect("default route must parse");
        Self::new(vec![all], private_nets()).expect("public networks must be valid")
    }

    pub fn inclusions(&self) -> &[IpNet] {
        &self.inclusions
    }

    pub fn exclusions(&self) -> &[IpNet] {
        &self.exclusions
    }

    /// The disjoint-from-exclusions prefixes that make up the set.
    pub fn effective(&self) -> &[IpNet] {
        &self.effective
    }

    /// Returns true if every address of `net` is in the set.
    pub fn contains(&self, net: &IpNet) -> bool {
        self.effective.iter().any(|e| is_child_cidr(e, net))
    }

    /// Returns true if `net` is inside the set or encloses a part of it.
    ///
    /// A CIDR identity may represent a prefix that is more or less specific than the ones the
    /// set was built from, so either direction counts as a match.
    pub fn matches(&self, net: &IpNet) -> bool {
        self.effective
            .iter()
            .any(|e| is_child_cidr(e, net) || is_child_cidr(net, e))
    }
}

impl std::str::FromStr for CidrSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut inclusions = Vec::new();
        let mut exclusions = Vec::new();
        for term in s.split(',') {
            let term = term.trim();
            let (exclude, net) = match term.strip_prefix('!') {
                Some(net) => (true, net.trim()),
                None => (false, term),
            };
            let net = net
                .parse::<IpNet>()
                .map_err(|_| Error::InvalidCidr(term.to_string()))?;
            if exclude {
                exclusions.push(net);
            } else {
                inclusions.push(net);
            }
        }
        Self::new(inclusions, exclusions)
    }
}

impl std::fmt::Display for CidrSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for net in &self.inclusions {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            net.fmt(f)?;
        }
        for net in &self.exclusions {
            write!(f, ",!{}", net)?;
        }
        Ok(())
    }
}

fn private_nets() -> Vec<IpNet> {
    PRIVATE
        .iter()
        .map(|n| n.parse().expect("private network must parse"))
        .collect()
}

/// Removes `excl` from `net`, returning the prefixes that remain.
fn subtract(net: IpNet, excl: &IpNet) -> Vec<IpNet> {
    if is_child_cidr(excl, &net) {
        return vec![];
    }
    if !is_child_cidr(&net, excl) {
        return vec![net];
    }

    // Walk down from `net` towards `excl`, keeping the sibling half at each level.
    let mut remaining = Vec::new();
    let mut current = net;
    while current.prefix_len() < excl.prefix_len() {
        let halves = match current.subnets(current.prefix_len() + 1) {
            Ok(halves) => halves,
            Err(_) => break,
        };
        let mut next = None;
        for half in halves {
            if is_child_cidr(&half, excl) {
                next = Some(half);
            } else {
                remaining.push(half);
            }
        }
        match next {
            Some(half) => current = half,
            None => break,
        }
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn child_cidr_is_reflexive() {
        for s in ["0.0.0.0/0", "10.0.0.0/8", "8.8.8.8/32", "2001:db8::/32"] {
            assert!(is_child_cidr(&net(s), &net(s)), "{s}");
        }
    }

    #[test]
    fn child_cidr_is_prefix_monotonic() {
        let nets = [
            "0.0.0.0/0",
            "8.0.0.0/8",
            "8.8.0.0/16",
            "8.8.8.8/32",
            "8.8.4.4/32",
            "10.0.0.0/8",
            "2001:db8::/32",
        ]
        .map(net);
        for p in &nets {
            for c in &nets {
                if is_child_cidr(p, c) {
                    assert!(p.prefix_len() <= c.prefix_len(), "{p} {c}");
                }
            }
        }
        assert!(is_child_cidr(&net("8.8.0.0/16"), &net("8.8.8.8/32")));
        assert!(!is_child_cidr(&net("8.8.8.8/32"), &net("8.8.0.0/16")));
        assert!(!is_child_cidr(&net("0.0.0.0/0"), &net("2001:db8::/32")));
    }

    #[test]
    fn membership_respects_carve_outs() {
        let set = CidrSet::new(vec![net("8.8.0.0/16")], vec![net("8.8.8.8/32")]).unwrap();
        assert!(set.contains(&net("8.8.4.4/32")));
        assert!(!set.contains(&net("8.8.8.8/32")));
        assert!(!set.contains(&net("8.8.0.0/16")));
        assert!(set.contains(&net("8.8.8.9/32")));
        assert!(!set.contains(&net("1.1.1.1/32")));

        assert!(set.matches(&net("8.8.4.4/32")));
        assert!(!set.matches(&net("8.8.8.8/32")));
        // Enclosing prefixes match a part of the set.
        assert!(set.matches(&net("8.0.0.0/8")));
    }

    #[test]
    fn covering_exclusion_removes_inclusion() {
        let set: CidrSet = "10.1.0.0/16,!10.0.0.0/8,1.1.1.1/32".parse().unwrap();
        assert_eq!(set.effective(), &[net("1.1.1.1/32")]);
    }

    #[test]
    fn parses_expressions() {
        let set: CidrSet = "10.0.0.0/8, !10.1.0.0/16,192.168.1.7/24".parse().unwrap();
        assert_eq!(set.inclusions(), &[net("10.0.0.0/8"), net("192.168.1.0/24")]);
        assert_eq!(set.exclusions(), &[net("10.1.0.0/16")]);
        assert_eq!(set.to_string(), "10.0.0.0/8,192.168.1.0/24,!10.1.0.0/16");

        assert!(matches!(
            "!10.0.0.0/8".parse::<CidrSet>(),
            Err(Error::NoInclusiveCidr)
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<CidrSet>(),
            Err(Error::InvalidCidr(_))
        ));
        assert!(matches!("".parse::<CidrSet>(), Err(Error::InvalidCidr(_))));
        assert!(matches!(
            "10.0.0.0/8,".parse::<CidrSet>(),
            Err(Error::InvalidCidr(_))
        ));
    }

    #[test]
    fn private_and_public() {
        let private = CidrSet::private();
        let public = CidrSet::public();
        for s in ["10.1.2.3/32", "172.16.0.1/32", "192.168.10.0/24"] {
            assert!(private.contains(&net(s)), "{s}");
            assert!(!public.contains(&net(s)), "{s}");
        }
        for s in ["1.1.1.1/32", "8.8.8.8/32", "172.32.0.1/32"] {
            assert!(!private.contains(&net(s)), "{s}");
            assert!(public.contains(&net(s)), "{s}");
        }
        assert!(public.matches(&net("0.0.0.0/0")));
        assert!(!public.contains(&net("0.0.0.0/0")));
    }
}
