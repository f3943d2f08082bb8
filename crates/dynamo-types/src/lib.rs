//! Core type definitions shared across the Dynamo-style key-value store.
//!
//! This crate has no knowledge of the network, storage, or ring
//! implementations — it only defines the small vocabulary of newtypes that
//! those crates pass between each other: hostnames, keys, vector-clock
//! contexts, correlation timestamps, and the request/membership-operation
//! kind enumerations.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A cluster member's address, e.g. `10.0.0.4` or `node-b.internal`.
///
/// Hostnames are compared and hashed as opaque strings; resolution to a
/// socket address happens at the transport boundary, not here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hostname(String);

impl Hostname {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Hostname {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Hostname {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A client-supplied key, as it appears in `put`/`get` command text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic 64-bit hash used for ring placement.
    ///
    /// Built on `blake3` (the hash function already in use elsewhere in this
    /// workspace) rather than `std`'s `DefaultHasher`, whose output is
    /// explicitly unspecified across Rust versions — the ring's placement
    /// decisions must be stable across restarts and releases.
    pub fn hash(&self) -> KeyHash {
        let digest = blake3::hash(self.0.as_bytes());
        let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().expect("8-byte slice");
        KeyHash(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A key's position on the consistent-hash ring.
///
/// Distinct from [`Key`] so that `Request` can carry just the hash (per the
/// data model's "key-hash" attribute) without cloning the original key text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyHash(pub u64);

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for KeyHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A vector-clock context: one counter per host that has written this
/// version's lineage.
///
/// Encoded as a JSON object (`{"hostA": 2, "hostB": 1}`) on the wire and in
/// CLI command text, per the external-interfaces section — plain integers
/// keep the format legible from a REPL, where a client may type a context
/// literal by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context(BTreeMap<Hostname, u64>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn counter(&self, host: &Hostname) -> u64 {
        self.0.get(host).copied().unwrap_or(0)
    }

    /// Increments this context's counter for `host`, returning the new context.
    ///
    /// Used by the coordinator when it commits a write locally: the write's
    /// context is the prior context with the coordinating host's counter
    /// bumped by one.
    pub fn incremented(&self, host: &Hostname) -> Self {
        let mut next = self.0.clone();
        *next.entry(host.clone()).or_insert(0) += 1;
        Self(next)
    }

    /// `true` if every counter in `self` is `<=` the corresponding counter in
    /// `other`, and at least one is strictly less — i.e. `other` descends
    /// from and has progressed past `self`.
    pub fn strictly_dominated_by(&self, other: &Context) -> bool {
        if self == other {
            return false;
        }
        let hosts = self.0.keys().chain(other.0.keys());
        hosts.clone().all(|h| self.counter(h) <= other.counter(h))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Context serializes to JSON")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }
}

/// A nanosecond-resolution timestamp, used both as wall-clock time and as
/// the cluster-unique correlation ID for a `Request` (its creation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_nanos() as u64;
        Self(nanos)
    }

    /// Returns a timestamp strictly greater than `last`, even if the wall
    /// clock has not advanced (or has gone backwards) since `last` was
    /// taken.
    ///
    /// Request correlation IDs must be unique per-process; two requests
    /// created in the same nanosecond would otherwise collide in the
    /// ongoing-requests table.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let candidate = Self::now();
        match last {
            Some(last) if candidate <= last => Timestamp(last.0 + 1),
            _ => candidate,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four request types a coordinator can open, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Get,
    Put,
    ForGet,
    ForPut,
}

impl RequestKind {
    /// Strips the `for_` prefix, as the leader-to-coord recovery path does
    /// when it promotes itself from forwarder to coordinator.
    pub fn without_forward(self) -> Self {
        match self {
            RequestKind::ForGet => RequestKind::Get,
            RequestKind::ForPut => RequestKind::Put,
            other => other,
        }
    }

    pub fn is_forwarded(self) -> bool {
        matches!(self, RequestKind::ForGet | RequestKind::ForPut)
    }

    pub fn is_write(self) -> bool {
        matches!(self, RequestKind::Put | RequestKind::ForPut)
    }
}

/// The two kinds of membership change the leader can drive through 2PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MembershipOp {
    Add = 1,
    Remove = 2,
}

/// A monotonic epoch identifying the current leader/configuration.
///
/// Reserved for future leader election: the field is threaded through every
/// membership prepare/commit payload but never incremented by this
/// implementation (see SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct View(pub u64);

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonically increasing identifier for membership operations,
/// assigned by the leader and unique within its process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipRequestId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_deterministic() {
        let k1 = Key::new("alpha");
        let k2 = Key::new("alpha");
        assert_eq!(k1.hash(), k2.hash());
    }

    #[test]
    fn key_hash_differs_for_different_keys() {
        assert_ne!(Key::new("alpha").hash(), Key::new("beta").hash());
    }

    #[test]
    fn context_empty_is_not_self_dominated() {
        let ctx = Context::new();
        assert!(!ctx.strictly_dominated_by(&ctx));
    }

    #[test]
    fn context_incremented_dominates_parent() {
        let a = Hostname::from("a");
        let base = Context::new();
        let next = base.incremented(&a);
        assert!(base.strictly_dominated_by(&next));
        assert!(!next.strictly_dominated_by(&base));
    }

    #[test]
    fn concurrent_contexts_do_not_dominate_each_other() {
        let a = Hostname::from("a");
        let b = Hostname::from("b");
        let base = Context::new();
        let via_a = base.incremented(&a);
        let via_b = base.incremented(&b);
        assert!(!via_a.strictly_dominated_by(&via_b));
        assert!(!via_b.strictly_dominated_by(&via_a));
    }

    #[test]
    fn context_json_round_trips() {
        let a = Hostname::from("a");
        let ctx = Context::new().incremented(&a).incremented(&a);
        let json = ctx.to_json();
        let parsed = Context::from_json(&json).unwrap();
        assert_eq!(ctx, parsed);
    }

    #[test]
    fn empty_context_json_parses_as_empty() {
        let ctx = Context::from_json("").unwrap();
        assert!(ctx.is_empty());
        let ctx = Context::from_json("{}").unwrap();
        assert!(ctx.is_empty());
    }

    #[test]
    fn now_monotonic_advances_past_equal_reading() {
        let last = Timestamp::from_nanos(100);
        let next = Timestamp::now_monotonic(Some(last));
        assert!(next > last);
    }

    #[test]
    fn request_kind_strips_forward_prefix() {
        assert_eq!(RequestKind::ForGet.without_forward(), RequestKind::Get);
        assert_eq!(RequestKind::ForPut.without_forward(), RequestKind::Put);
        assert_eq!(RequestKind::Get.without_forward(), RequestKind::Get);
    }
}

