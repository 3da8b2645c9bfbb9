//! Counter name decoding.

use std::collections::HashMap;

use crate::model::Traffic;

const SEPARATOR: &str = ">>>";
const TRAFFIC_CLASS: &str = "traffic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Inbound,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Uplink => "uplink",
            Direction::Downlink => "downlink",
        }
    }
}

/// A parsed `scope>>>entity>>>traffic>>>direction` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterName<'a> {
    pub scope: Scope,
    pub entity: &'a str,
    pub direction: Direction,
}

impl<'a> CounterName<'a> {
    pub fn parse(name: &'a str) -> Option<Self> {
        let mut parts = name.split(SEPARATOR);
        let scope = match parts.next()? {
            "inbound" => Scope::Inbound,
            "user" => Scope::User,
            _ => return None,
        };
        let entity = parts.next().filter(|e| !e.is_empty())?;
        if parts.next()? != TRAFFIC_CLASS {
            return None;
        }
        let direction = match parts.next()? {
            "uplink" => Direction::Uplink,
            "downlink" => Direction::Downlink,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { scope, entity, direction })
    }

    pub fn format(scope: Scope, entity: &str, direction: Direction) -> String {
        let scope = match scope {
            Scope::Inbound => "inbound",
            Scope::User => "user",
        };
        [scope, entity, TRAFFIC_CLASS, direction.as_str()].join(SEPARATOR)
    }
}

/// Per-entity deltas from one poll. Tenants are keyed by their stats key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub inbounds: HashMap<String, Traffic>,
    pub tenants: HashMap<String, Traffic>,
}

impl TrafficSnapshot {
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let mut snapshot = Self::default();
        for (name, value) in samples {
            let Some(counter) = CounterName::parse(name) else {
                tracing::trace!(name, "Skipping unrecognized counter");
                continue;
            };
            let bucket = match counter.scope {
                Scope::Inbound => &mut snapshot.inbounds,
                Scope::User => &mut snapshot.tenants,
            };
            let traffic = bucket.entry(counter.entity.to_string()).or_default();
            match counter.direction {
                Direction::Uplink => traffic.upload = traffic.upload.saturating_add(value),
                Direction::Downlink => traffic.download = traffic.download.saturating_add(value),
            }
        }
        snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.inbounds.is_empty() && self.tenants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_names() {
        let c = CounterName::parse("inbound>>>vmess-in>>>traffic>>>uplink").unwrap();
        assert_eq!(c.scope, Scope::Inbound);
        assert_eq!(c.entity, "vmess-in");
        assert_eq!(c.direction, Direction::Uplink);

        let c = CounterName::parse("user>>>alice@example.com>>>traffic>>>downlink").unwrap();
        assert_eq!(c.scope, Scope::User);
        assert_eq!(c.entity, "alice@example.com");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "",
            "inbound>>>x>>>traffic",
            "inbound>>>x>>>traffic>>>uplink>>>extra",
            "outbound>>>direct>>>traffic>>>uplink",
            "inbound>>>x>>>packets>>>uplink",
            "inbound>>>x>>>traffic>>>sideways",
            "inbound>>>>>>traffic>>>uplink",
        ] {
            assert!(CounterName::parse(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_format_round_trips() {
        let name = CounterName::format(Scope::User, "bob", Direction::Downlink);
        assert_eq!(name, "user>>>bob>>>traffic>>>downlink");
        assert_eq!(CounterName::parse(&name).unwrap().entity, "bob");
    }

    #[test]
    fn test_snapshot_splits_scopes() {
        let snapshot = TrafficSnapshot::from_samples([
            ("inbound>>>in-1>>>traffic>>>uplink", 100),
            ("inbound>>>in-1>>>traffic>>>downlink", 50),
            ("user>>>a>>>traffic>>>uplink", 7),
            ("outbound>>>direct>>>traffic>>>uplink", 999),
            ("garbage", 1),
        ]);
        assert_eq!(snapshot.inbounds["in-1"], Traffic::new(100, 50));
        assert_eq!(snapshot.tenants["a"], Traffic::new(7, 0));
        assert_eq!(snapshot.inbounds.len(), 1);
        assert_eq!(snapshot.tenants.len(), 1);
    }
}
