use crate::{
    AgentClient, Direction, NumericIdentity, PolicyEntry, ResolutionContext, Resolved, Result,
    Verdict,
};
use serde::Serialize;
use std::borrow::Cow;

/// A policy entry joined with what is known about its peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Record {
    pub policy: Verdict,
    pub direction: Direction,
    pub namespace: String,
    pub example: String,
    pub identity: NumericIdentity,
    pub wildcard_protocol: bool,
    pub wildcard_port: bool,
    pub protocol: u8,
    pub port: u16,
    pub bytes: u64,
    pub packets: u64,
}

/// Resolves the peer of `entry` and builds its display record.
pub async fn enrich(
    ctx: &mut ResolutionContext,
    agent: &dyn AgentClient,
    entry: &PolicyEntry,
) -> Result<Record> {
    let resolved = ctx.resolve(agent, entry.identity).await?;
    Ok(Record::new(entry, &resolved))
}

/// Enriches every entry, preserving order.
pub async fn enrich_all(
    ctx: &mut ResolutionContext,
    agent: &dyn AgentClient,
    entries: &[PolicyEntry],
) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        records.push(enrich(ctx, agent, entry).await?);
    }
    Ok(records)
}

/// Names an IP protocol number the way the agent does.
pub fn protocol_name(protocol: u8) -> Cow<'static, str> {
    match protocol {
        1 => "ICMP".into(),
        6 => "TCP".into(),
        17 => "UDP".into(),
        58 => "ICMPv6".into(),
        132 => "SCTP".into(),
        n => n.to_string().into(),
    }
}

pub fn format_protocol(wildcard: bool, protocol: u8) -> Cow<'static, str> {
    if wildcard {
        return "ANY".into();
    }
    protocol_name(protocol)
}

pub fn format_port(wildcard: bool, port: u16) -> Cow<'static, str> {
    if wildcard {
        return "ANY".into();
    }
    port.to_string().into()
}

// === impl Record ===

impl Record {
    pub fn new(entry: &PolicyEntry, resolved: &Resolved) -> Self {
        Self {
            policy: entry.verdict(),
            direction: entry.direction,
            namespace: resolved.namespace_or_unknown().to_string(),
            example: resolved.example_or_unknown().to_string(),
            identity: entry.identity,
            wildcard_protocol: entry.wildcard_protocol,
            wildcard_port: entry.wildcard_port,
            protocol: entry.protocol,
            port: entry.port,
            bytes: entry.bytes,
            packets: entry.packets,
        }
    }

    pub fn protocol_display(&self) -> Cow<'static, str> {
        format_protocol(self.wildcard_protocol, self.protocol)
    }

    pub fn port_display(&self) -> Cow<'static, str> {
        format_port(self.wildcard_port, self.port)
    }
}
