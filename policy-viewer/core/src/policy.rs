use crate::NumericIdentity;
use serde::{Deserialize, Serialize};

/// A single entry of an endpoint's policy map, as enforced by the agent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolicyEntry {
    /// The peer identity. `0` matches any peer.
    pub identity: NumericIdentity,
    pub direction: Direction,
    pub deny: bool,
    pub wildcard_protocol: bool,
    pub wildcard_port: bool,
    pub protocol: u8,
    /// Destination port in host order.
    pub port: u16,
    pub bytes: u64,
    pub packets: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Egress,
    Ingress,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Allow,
    Deny,
}

/// The JSON form of a policy map entry as printed by `cilium bpf policy get -ojson`.
///
/// See `bpf/lib/common.h` in Cilium for the meaning of the flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntryDump {
    #[serde(rename = "Flags")]
    pub flags: u32,
    #[serde(rename = "Packets")]
    pub packets: u64,
    #[serde(rename = "Bytes")]
    pub bytes: u64,
    #[serde(rename = "Key")]
    pub key: PolicyKeyDump,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyKeyDump {
    #[serde(rename = "Identity")]
    pub identity: u32,
    #[serde(rename = "TrafficDirection")]
    pub traffic_direction: u8,
    #[serde(rename = "Nexthdr")]
    pub nexthdr: u8,
    /// Big-endian port, decoded as a host-order integer.
    #[serde(rename = "DestPortNetwork")]
    pub dest_port_network: u16,
}

const FLAG_DENY: u32 = 1;
const FLAG_WILDCARD_PROTOCOL: u32 = 1 << 1;
const FLAG_WILDCARD_PORT: u32 = 1 << 2;

/// Recovers a port number stored in network byte order but read as a host integer.
#[inline]
pub fn port_from_network(raw: u16) -> u16 {
    ((raw & 0xFF) << 8) | ((raw >> 8) & 0xFF)
}

// === impl PolicyEntry ===

impl PolicyEntry {
    #[inline]
    pub fn is_egress(&self) -> bool {
        self.direction == Direction::Egress
    }

    #[inline]
    pub fn is_ingress(&self) -> bool {
        self.direction == Direction::Ingress
    }

    #[inline]
    pub fn verdict(&self) -> Verdict {
        if self.deny {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.packets > 0
    }
}

impl From<PolicyEntryDump> for PolicyEntry {
    fn from(dump: PolicyEntryDump) -> Self {
        let direction = if dump.key.traffic_direction > 0 {
            Direction::Egress
        } else {
            Direction::Ingress
        };
        Self {
            identity: NumericIdentity(dump.key.identity),
            direction,
            deny: dump.flags & FLAG_DENY != 0,
            wildcard_protocol: dump.flags & FLAG_WILDCARD_PROTOCOL != 0,
            wildcard_port: dump.flags & FLAG_WILDCARD_PORT != 0,
            protocol: dump.key.nexthdr,
            port: port_from_network(dump.key.dest_port_network),
            bytes: dump.bytes,
            packets: dump.packets,
        }
    }
}

// === impl Direction ===

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Egress => "Egress",
            Self::Ingress => "Ingress",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Verdict ===

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => "Allow".fmt(f),
            Self::Deny => "Deny".fmt(f),
        }
    }
}
