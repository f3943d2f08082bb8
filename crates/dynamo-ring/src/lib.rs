//! Consistent-hash ring for replica placement.
//!
//! An ordered ring of virtual tokens, each mapping to a physical hostname.
//! `owner(key)` and `replicas(key)` are deterministic functions of the key
//! and the current membership set — callers must not cache the result
//! across a membership change.
//!
//! Grounded in the virtual-node hash ring pattern: each member contributes
//! several tokens at pseudo-random positions so that load rebalances evenly
//! when membership changes, rather than concentrating an entire member's
//! keyspace onto its one immediate successor.

use std::collections::BTreeSet;

use dynamo_types::{Hostname, KeyHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of virtual tokens placed on the ring per physical member.
const VIRTUAL_NODES_PER_HOST: u32 = 64;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("host {0} is already a member of the ring")]
    AlreadyMember(Hostname),
    #[error("host {0} is not a member of the ring")]
    NotMember(Hostname),
    #[error("the ring has no members")]
    Empty,
}

pub type RingResult<T> = Result<T, RingError>;

/// Consistent-hash ring tracking cluster membership and replica placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ring {
    /// Sorted ring positions, each pointing back at its owning host.
    tokens: Vec<(u64, Hostname)>,
    /// Live members, independent of how many tokens each has on the ring.
    members: BTreeSet<Hostname>,
    /// Number of *additional* replicas per key, i.e. `replication_factor - 1`.
    ///
    /// Named to match the source's `sloppy_Qsize` / `replica_count` split
    /// (see SPEC_FULL.md §9): `replicas(k).len() + 1 == replication_factor`
    /// once the ring has at least `replication_factor` members.
    replica_count: usize,
}

impl Ring {
    /// Creates an empty ring for the given replication factor (Qsize).
    pub fn new(replication_factor: usize) -> Self {
        Self {
            tokens: Vec::new(),
            members: BTreeSet::new(),
            replica_count: replication_factor.saturating_sub(1),
        }
    }

    /// Re-derives `replica_count` from a (possibly changed) replication
    /// factor. Per SPEC_FULL.md §9, this must be called on every membership
    /// change rather than relying on a value cached at startup.
    pub fn set_replication_factor(&mut self, replication_factor: usize) {
        self.replica_count = replication_factor.saturating_sub(1);
    }

    pub fn members(&self) -> impl Iterator<Item = &Hostname> {
        self.members.iter()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, host: &Hostname) -> bool {
        self.members.contains(host)
    }

    /// Adds `host` to the ring, placing `VIRTUAL_NODES_PER_HOST` tokens.
    pub fn add(&mut self, host: Hostname) -> RingResult<()> {
        if self.members.contains(&host) {
            return Err(RingError::AlreadyMember(host));
        }
        for i in 0..VIRTUAL_NODES_PER_HOST {
            let position = token_position(&host, i);
            let idx = self
                .tokens
                .binary_search_by_key(&position, |(pos, _)| *pos)
                .unwrap_or_else(|idx| idx);
            self.tokens.insert(idx, (position, host.clone()));
        }
        self.members.insert(host);
        Ok(())
    }

    /// Removes `host` and all of its tokens from the ring.
    pub fn remove(&mut self, host: &Hostname) -> RingResult<()> {
        if !self.members.contains(host) {
            return Err(RingError::NotMember(host.clone()));
        }
        self.tokens.retain(|(_, owner)| owner != host);
        self.members.remove(host);
        Ok(())
    }

    /// The host that owns `key` — the first token at or after the key's
    /// ring position, wrapping around to the first token if none is found.
    pub fn owner(&self, key: KeyHash) -> RingResult<Hostname> {
        if self.tokens.is_empty() {
            return Err(RingError::Empty);
        }
        let idx = self
            .tokens
            .binary_search_by_key(&key.0, |(pos, _)| *pos)
            .unwrap_or_else(|idx| idx);
        let idx = if idx == self.tokens.len() { 0 } else { idx };
        Ok(self.tokens[idx].1.clone())
    }

    /// The ordered list of distinct hosts that replicate `key`, excluding
    /// its owner, walking the ring clockwise from the owner's position.
    /// Length is `<= replica_count`.
    pub fn replicas(&self, key: KeyHash) -> RingResult<Vec<Hostname>> {
        if self.tokens.is_empty() {
            return Err(RingError::Empty);
        }
        let owner = self.owner(key)?;
        let start = self
            .tokens
            .binary_search_by_key(&key.0, |(pos, _)| *pos)
            .unwrap_or_else(|idx| idx);
        let start = if start == self.tokens.len() { 0 } else { start };

        let mut seen: BTreeSet<Hostname> = BTreeSet::new();
        seen.insert(owner);
        let mut result = Vec::with_capacity(self.replica_count);

        for step in 0..self.tokens.len() {
            if result.len() >= self.replica_count {
                break;
            }
            let idx = (start + step) % self.tokens.len();
            let host = &self.tokens[idx].1;
            if seen.insert(host.clone()) {
                result.push(host.clone());
            }
        }
        Ok(result)
    }

    /// A living host, distinct from `down_host`, chosen to hold hinted
    /// writes on its behalf — the next member clockwise from `down_host`'s
    /// first token that is not `down_host` itself.
    pub fn handoff_node(&self, down_host: &Hostname) -> RingResult<Hostname> {
        if self.tokens.is_empty() {
            return Err(RingError::Empty);
        }
        if self.members.len() == 1 {
            return Err(RingError::Empty);
        }
        let anchor = token_position(down_host, 0);
        let start = self
            .tokens
            .binary_search_by_key(&anchor, |(pos, _)| *pos)
            .unwrap_or_else(|idx| idx);

        for step in 0..self.tokens.len() {
            let idx = (start + step) % self.tokens.len();
            let host = &self.tokens[idx].1;
            if host != down_host {
                return Ok(host.clone());
            }
        }
        Err(RingError::Empty)
    }

    /// Resolves a hostname to a dialable address.
    ///
    /// The ring stores opaque hostnames; in this deployment model a
    /// hostname is already the dial target (`host:port` is assembled by the
    /// transport using the configured `tcp_port`), so resolution is the
    /// identity function. Kept as a named seam so a future DNS- or
    /// service-discovery-backed ring can change this without touching
    /// callers.
    pub fn hostname_to_ip(&self, host: &Hostname) -> RingResult<Hostname> {
        if self.members.contains(host) {
            Ok(host.clone())
        } else {
            Err(RingError::NotMember(host.clone()))
        }
    }

    /// Serializes the ring as newline-delimited hostnames, the on-disk
    /// format named in SPEC_FULL.md §4.3/§6 (`<host>.ring`).
    pub fn to_snapshot(&self) -> String {
        self.members
            .iter()
            .map(Hostname::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rebuilds a ring from a newline-delimited hostname snapshot.
    pub fn from_snapshot(text: &str, replication_factor: usize) -> Self {
        let mut ring = Ring::new(replication_factor);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let _ = ring.add(Hostname::from(line));
        }
        ring
    }
}

/// Hashes a (host, virtual-node index) pair onto the ring's `u64` keyspace.
fn token_position(host: &Hostname, vnode: u32) -> u64 {
    let mut input = host.as_str().as_bytes().to_vec();
    input.extend_from_slice(&vnode.to_be_bytes());
    let digest = blake3::hash(&input);
    let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().expect("8-byte slice");
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Hostname {
        Hostname::from(name)
    }

    fn ring_with(members: &[&str], replication_factor: usize) -> Ring {
        let mut ring = Ring::new(replication_factor);
        for m in members {
            ring.add(host(m)).unwrap();
        }
        ring
    }

    #[test]
    fn owner_is_deterministic_for_stable_membership() {
        let ring = ring_with(&["a", "b", "c"], 3);
        let key = KeyHash(42);
        let o1 = ring.owner(key).unwrap();
        let o2 = ring.owner(key).unwrap();
        assert_eq!(o1, o2);
    }

    #[test]
    fn replicas_excludes_owner_and_respects_replica_count() {
        let ring = ring_with(&["a", "b", "c", "d", "e"], 3);
        let key = KeyHash(1234);
        let owner = ring.owner(key).unwrap();
        let replicas = ring.replicas(key).unwrap();
        assert_eq!(replicas.len(), 2); // replication_factor - 1
        assert!(!replicas.contains(&owner));
        let unique: BTreeSet<_> = replicas.iter().collect();
        assert_eq!(unique.len(), replicas.len());
    }

    #[test]
    fn replicas_capped_by_membership_size() {
        let ring = ring_with(&["a", "b"], 5);
        let key = KeyHash(7);
        let replicas = ring.replicas(key).unwrap();
        // Only one non-owner member exists, regardless of replica_count=4.
        assert_eq!(replicas.len(), 1);
    }

    #[test]
    fn empty_ring_errors() {
        let ring = Ring::new(3);
        assert!(matches!(ring.owner(KeyHash(1)), Err(RingError::Empty)));
    }

    #[test]
    fn add_duplicate_is_rejected() {
        let mut ring = ring_with(&["a"], 3);
        assert!(matches!(
            ring.add(host("a")),
            Err(RingError::AlreadyMember(_))
        ));
    }

    #[test]
    fn remove_absent_is_rejected() {
        let mut ring = ring_with(&["a"], 3);
        assert!(matches!(
            ring.remove(&host("b")),
            Err(RingError::NotMember(_))
        ));
    }

    #[test]
    fn handoff_node_is_not_the_down_host() {
        let ring = ring_with(&["a", "b", "c"], 3);
        let down = host("b");
        let holder = ring.handoff_node(&down).unwrap();
        assert_ne!(holder, down);
    }

    #[test]
    fn replica_count_rederives_on_membership_change() {
        let mut ring = ring_with(&["a", "b", "c"], 3);
        assert_eq!(ring.replica_count, 2);
        ring.add(host("d")).unwrap();
        // replica_count is a function of replication_factor, not membership
        // size, but must be explicitly re-set by the caller on every change
        // per SPEC_FULL.md §9 — simulate that call here.
        ring.set_replication_factor(5);
        assert_eq!(ring.replica_count, 4);
    }

    #[test]
    fn snapshot_round_trips() {
        let ring = ring_with(&["a", "b", "c"], 3);
        let snapshot = ring.to_snapshot();
        let restored = Ring::from_snapshot(&snapshot, 3);
        let mut original: Vec<_> = ring.members().cloned().collect();
        let mut round_tripped: Vec<_> = restored.members().cloned().collect();
        original.sort();
        round_tripped.sort();
        assert_eq!(original, round_tripped);
    }

    proptest::proptest! {
        #[test]
        fn owner_and_replicas_are_deterministic_proptest(key in 0u64..10_000) {
            let ring = ring_with(&["a", "b", "c", "d"], 3);
            let hash = KeyHash(key);
            let o1 = ring.owner(hash).unwrap();
            let o2 = ring.owner(hash).unwrap();
            let r1 = ring.replicas(hash).unwrap();
            let r2 = ring.replicas(hash).unwrap();
            prop_assert_eq!(o1, o2);
            prop_assert_eq!(r1, r2);
        }
    }
}

