//! Two-phase commit over cluster membership, per §4.3.
//!
//! This module is deliberately network-agnostic: it tracks prepare/commit
//! bookkeeping and tells its caller what to send, but never touches a
//! socket. The leader-side and follower-side behavior both live here since
//! every node must be able to play the follower role regardless of whether
//! it currently holds the leader role itself.

use std::collections::HashSet;
use std::time::Instant;

use dynamo_ring::Ring;
use dynamo_types::{Hostname, MembershipOp, View};
use mio::Token;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("another membership operation is already in progress")]
    InProgress,
    #[error("host {0} is already a member")]
    AlreadyMember(Hostname),
    #[error("host {0} is not a member")]
    NotMember(Hostname),
}

/// Leader-side state for the one membership operation allowed in flight at
/// a time (§3 invariant I3).
struct InProgress {
    view: View,
    request_id: u64,
    target: Hostname,
    op: MembershipOp,
    broadcast_set: Vec<Hostname>,
    oks: HashSet<Hostname>,
    required: usize,
    client_token: Token,
    deadline: Instant,
}

/// What the leader should do once a prepare's OKs clear the threshold.
pub struct ReadyToCommit {
    pub view: View,
    pub op: MembershipOp,
    pub target: Hostname,
    pub authoritative_hosts: Vec<Hostname>,
    pub client_token: Token,
}

pub struct MembershipManager {
    next_request_id: u64,
    view: View,
    in_progress: Option<InProgress>,
}

impl MembershipManager {
    pub fn new() -> Self {
        Self {
            next_request_id: 0,
            view: View::default(),
            in_progress: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Leader-side: validates preconditions and opens a new prepare round.
    /// Returns the broadcast set (current members plus, for `add`, the
    /// target, minus the leader itself) and the (view, request_id) pair to
    /// stamp onto the `0x01` prepare sent to each host in it.
    pub fn begin(
        &mut self,
        self_host: &Hostname,
        target: Hostname,
        op: MembershipOp,
        ring: &Ring,
        client_token: Token,
        deadline: Instant,
    ) -> Result<(Vec<Hostname>, View, u64), MembershipError> {
        if self.in_progress.is_some() {
            return Err(MembershipError::InProgress);
        }
        match op {
            MembershipOp::Add if ring.is_member(&target) => {
                return Err(MembershipError::AlreadyMember(target));
            }
            MembershipOp::Remove if !ring.is_member(&target) => {
                return Err(MembershipError::NotMember(target));
            }
            _ => {}
        }

        let mut broadcast_set: Vec<Hostname> =
            ring.members().filter(|h| *h != self_host).cloned().collect();
        if op == MembershipOp::Add {
            broadcast_set.push(target.clone());
        }

        // For `add`, the target is expected to vote for its own admission, so
        // every host in `broadcast_set` (including the target) counts.
        // For `remove`, the target is still a current member and therefore
        // still in `broadcast_set`, but it doesn't get a vote on its own
        // eviction — only the other members' OKs count toward the threshold.
        let required = match op {
            MembershipOp::Add => broadcast_set.len(),
            MembershipOp::Remove => broadcast_set.iter().filter(|h| **h != target).count(),
        };

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        self.in_progress = Some(InProgress {
            view: self.view,
            request_id,
            target: target.clone(),
            op,
            broadcast_set: broadcast_set.clone(),
            oks: HashSet::new(),
            required,
            client_token,
            deadline,
        });

        Ok((broadcast_set, self.view, request_id))
    }

    /// Leader-side: records an OK. Returns `Some` once the threshold is
    /// reached, at which point the caller must broadcast commit and call
    /// [`MembershipManager::clear`].
    pub fn on_ok(&mut self, from: Hostname, view: View, request_id: u64) -> Option<ReadyToCommit> {
        let in_progress = self.in_progress.as_mut()?;
        if in_progress.view != view || in_progress.request_id != request_id {
            return None;
        }
        in_progress.oks.insert(from);
        if in_progress.oks.len() < in_progress.required {
            return None;
        }

        let in_progress = self.in_progress.take()?;
        let mut authoritative_hosts = in_progress.broadcast_set.clone();
        if in_progress.op == MembershipOp::Add && !authoritative_hosts.contains(&in_progress.target)
        {
            authoritative_hosts.push(in_progress.target.clone());
        }
        Some(ReadyToCommit {
            view: in_progress.view,
            op: in_progress.op,
            target: in_progress.target,
            authoritative_hosts,
            client_token: in_progress.client_token,
        })
    }

    /// Leader-side: if the in-progress operation matches and its deadline
    /// has passed, clears it and returns the client to notify of failure.
    pub fn on_timeout(&mut self, now: Instant) -> Option<Token> {
        let fired = self
            .in_progress
            .as_ref()
            .is_some_and(|p| p.deadline <= now);
        if !fired {
            return None;
        }
        self.in_progress.take().map(|p| p.client_token)
    }

    /// Follower-side: a prepare is always acknowledged; there is no abort
    /// path other than the leader's own timeout (§4.3 step 3).
    pub fn on_prepare(&self, _view: View, _request_id: u64, _op: MembershipOp, _host: &Hostname) {}

    /// Follower- and leader-side: applies a commit to the local ring.
    pub fn on_commit(
        &mut self,
        ring: &mut Ring,
        op: MembershipOp,
        hosts: &[Hostname],
    ) -> Result<(), MembershipError> {
        match op {
            MembershipOp::Add => {
                for host in hosts {
                    if !ring.is_member(host) {
                        ring.add(host.clone()).map_err(|_| {
                            MembershipError::AlreadyMember(host.clone())
                        })?;
                    }
                }
            }
            MembershipOp::Remove => {
                // `hosts` is the authoritative remaining membership list;
                // anything present locally but absent from it was removed.
                let stale: Vec<Hostname> = ring
                    .members()
                    .filter(|h| !hosts.contains(h))
                    .cloned()
                    .collect();
                for host in stale {
                    let _ = ring.remove(&host);
                }
            }
        }
        Ok(())
    }
}

impl Default for MembershipManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Hostname {
        Hostname::from(name)
    }

    fn ring_with(members: &[&str]) -> Ring {
        let mut ring = Ring::new(3);
        for m in members {
            ring.add(host(m)).unwrap();
        }
        ring
    }

    #[test]
    fn begin_rejects_duplicate_add() {
        let ring = ring_with(&["a", "b"]);
        let mut mgr = MembershipManager::new();
        let result = mgr.begin(
            &host("a"),
            host("b"),
            MembershipOp::Add,
            &ring,
            Token(1),
            Instant::now(),
        );
        assert!(matches!(result, Err(MembershipError::AlreadyMember(_))));
    }

    #[test]
    fn begin_rejects_second_concurrent_operation() {
        let ring = ring_with(&["a", "b"]);
        let mut mgr = MembershipManager::new();
        mgr.begin(&host("a"), host("c"), MembershipOp::Add, &ring, Token(1), Instant::now())
            .unwrap();
        let second = mgr.begin(
            &host("a"),
            host("d"),
            MembershipOp::Add,
            &ring,
            Token(2),
            Instant::now(),
        );
        assert!(matches!(second, Err(MembershipError::InProgress)));
    }

    #[test]
    fn threshold_reached_after_required_oks() {
        let ring = ring_with(&["a", "b", "c"]);
        let mut mgr = MembershipManager::new();
        let (broadcast, view, request_id) = mgr
            .begin(&host("a"), host("d"), MembershipOp::Add, &ring, Token(1), Instant::now())
            .unwrap();
        assert_eq!(broadcast.len(), 3); // b, c, d

        assert!(mgr.on_ok(host("b"), view, request_id).is_none());
        let ready = mgr.on_ok(host("c"), view, request_id);
        assert!(ready.is_none()); // required = member_count() = 3, only 2 OKs so far
        let ready = mgr.on_ok(host("d"), view, request_id).unwrap();
        assert_eq!(ready.target, host("d"));
        assert!(!mgr.is_busy());
    }

    #[test]
    fn duplicate_ok_does_not_double_count() {
        let ring = ring_with(&["a", "b"]);
        let mut mgr = MembershipManager::new();
        let (_, view, request_id) = mgr
            .begin(&host("a"), host("c"), MembershipOp::Add, &ring, Token(1), Instant::now())
            .unwrap();
        assert!(mgr.on_ok(host("b"), view, request_id).is_none());
        assert!(mgr.on_ok(host("b"), view, request_id).is_none());
        let ready = mgr.on_ok(host("c"), view, request_id).unwrap();
        assert_eq!(ready.target, host("c"));
    }

    #[test]
    fn remove_required_excludes_targets_own_vote() {
        let ring = ring_with(&["a", "b", "c"]);
        let mut mgr = MembershipManager::new();
        let (_, view, request_id) = mgr
            .begin(&host("a"), host("c"), MembershipOp::Remove, &ring, Token(1), Instant::now())
            .unwrap();
        // broadcast_set = members - leader = {b, c}; required excludes c's own
        // vote on its eviction, leaving just b, so a single OK suffices.
        let ready = mgr.on_ok(host("b"), view, request_id);
        assert!(ready.is_some());
    }

    #[test]
    fn timeout_clears_in_progress_and_returns_client() {
        let ring = ring_with(&["a", "b"]);
        let mut mgr = MembershipManager::new();
        let past = Instant::now();
        mgr.begin(&host("a"), host("c"), MembershipOp::Add, &ring, Token(7), past)
            .unwrap();
        let client = mgr.on_timeout(Instant::now()).unwrap();
        assert_eq!(client, Token(7));
        assert!(!mgr.is_busy());
    }

    #[test]
    fn commit_add_applies_to_ring() {
        let mut ring = ring_with(&["a", "b"]);
        let mgr = MembershipManager::new();
        let mut mgr = mgr;
        mgr.on_commit(&mut ring, MembershipOp::Add, &[host("a"), host("b"), host("c")])
            .unwrap();
        assert!(ring.is_member(&host("c")));
    }

    #[test]
    fn commit_remove_applies_to_ring() {
        let mut ring = ring_with(&["a", "b", "c"]);
        let mut mgr = MembershipManager::new();
        mgr.on_commit(&mut ring, MembershipOp::Remove, &[host("a"), host("b")])
            .unwrap();
        assert!(!ring.is_member(&host("c")));
    }
}
