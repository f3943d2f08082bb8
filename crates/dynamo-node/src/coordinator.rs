//! Request coordination: quorum bookkeeping for gets, puts, and forwarded
//! requests, per §4.4.
//!
//! Like [`crate::membership`], this module never touches a socket. It
//! tracks in-flight requests and their responses, and hands back an
//! [`Outcome`] describing what the caller (the dispatcher/server) should do
//! next: reply to a client, broadcast to replicas, or start a handoff.

use std::collections::HashMap;
use std::time::Instant;

use dynamo_storage::sort_data;
use dynamo_types::{Context, Key, RequestKind, Timestamp};
use mio::Token;

/// One response received for an open request, from either a local `get`/
/// `put` replica or a forwarded peer.
#[derive(Debug, Clone)]
pub enum ResponseData {
    Read(Vec<(Context, String)>),
    Write(Context, String),
    Forwarded(String),
}

struct Ongoing {
    kind: RequestKind,
    key: Key,
    value: Option<String>,
    context: Option<Context>,
    send_back: Token,
    expected: Vec<dynamo_types::Hostname>,
    required: usize,
    responses: HashMap<dynamo_types::Hostname, ResponseData>,
    responded: bool,
    deadline: Instant,
}

/// What the caller should do once a request reaches quorum or its deadline.
#[derive(Debug)]
pub enum Outcome {
    ReadReady {
        send_back: Token,
        rows: Vec<(Context, String)>,
    },
    WriteReady {
        send_back: Token,
        context: Context,
        value: String,
    },
    ForwardReady {
        send_back: Token,
        body: String,
    },
}

/// What a timed-out request requires of the caller.
#[derive(Debug)]
pub enum TimeoutOutcome {
    ReadFailed {
        send_back: Token,
    },
    WriteFailed {
        send_back: Token,
    },
    /// A write reached `w` acks but not all replicas answered: the missing
    /// replicas need a hinted-handoff copy.
    HandoffNeeded {
        key: Key,
        value: String,
        context: Context,
        missing_hosts: Vec<dynamo_types::Hostname>,
    },
    /// A forwarded request (`for_get`/`for_put`) never heard back from its
    /// owner/leader: the caller should promote itself to coordinator and
    /// re-run the request locally, per the leader-to-coord recovery path.
    PromoteToCoordinator {
        corr_id: Timestamp,
        kind: RequestKind,
        key: Key,
        value: Option<String>,
        context: Option<Context>,
        send_back: Token,
    },
}

pub struct RequestCoordinator {
    ongoing: HashMap<Timestamp, Ongoing>,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self {
            ongoing: HashMap::new(),
        }
    }

    pub fn is_open(&self, corr_id: Timestamp) -> bool {
        self.ongoing.contains_key(&corr_id)
    }

    /// Opens a new request. `required` is `r`/`w`/`1` depending on kind;
    /// `expected` is the full replica set the caller is about to contact
    /// (used on timeout to compute which hosts a write never heard from).
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        corr_id: Timestamp,
        kind: RequestKind,
        key: Key,
        value: Option<String>,
        context: Option<Context>,
        send_back: Token,
        expected: Vec<dynamo_types::Hostname>,
        required: usize,
        deadline: Instant,
    ) {
        self.ongoing.insert(
            corr_id,
            Ongoing {
                kind,
                key,
                value,
                context,
                send_back,
                expected,
                required,
                responses: HashMap::new(),
                responded: false,
                deadline,
            },
        );
    }

    /// Records a response from `from` and returns `Some` the first time the
    /// request's quorum threshold is reached. Duplicate responses from the
    /// same host are idempotent no-ops.
    pub fn record_response(
        &mut self,
        corr_id: Timestamp,
        from: dynamo_types::Hostname,
        data: ResponseData,
    ) -> Option<Outcome> {
        let ongoing = self.ongoing.get_mut(&corr_id)?;
        if ongoing.responded {
            return None;
        }
        ongoing.responses.insert(from, data);
        if ongoing.responses.len() < ongoing.required {
            return None;
        }
        ongoing.responded = true;
        let outcome = Self::build_outcome(ongoing);

        // Writes stay in the table past quorum so `sweep_timeouts` can still
        // detect stragglers and trigger handoff for them; reads and
        // forwarded requests have nothing left to do once answered.
        if !ongoing.kind.is_write() {
            self.ongoing.remove(&corr_id);
        }
        Some(outcome)
    }

    fn build_outcome(ongoing: &Ongoing) -> Outcome {
        match ongoing.kind {
            RequestKind::Get => {
                let mut rows: Vec<(Context, String)> = Vec::new();
                for response in ongoing.responses.values() {
                    if let ResponseData::Read(r) = response {
                        rows.extend(r.iter().cloned());
                    }
                }
                Outcome::ReadReady {
                    send_back: ongoing.send_back,
                    rows: sort_data(rows),
                }
            }
            RequestKind::Put => {
                let found = ongoing.responses.values().find_map(|r| match r {
                    ResponseData::Write(ctx, val) => Some((ctx.clone(), val.clone())),
                    _ => None,
                });
                let (context, value) = found.unwrap_or_else(|| {
                    (
                        ongoing.context.clone().unwrap_or_default(),
                        ongoing.value.clone().unwrap_or_default(),
                    )
                });
                Outcome::WriteReady {
                    send_back: ongoing.send_back,
                    context,
                    value,
                }
            }
            RequestKind::ForGet | RequestKind::ForPut => {
                let body = ongoing
                    .responses
                    .values()
                    .find_map(|r| match r {
                        ResponseData::Forwarded(body) => Some(body.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                Outcome::ForwardReady {
                    send_back: ongoing.send_back,
                    body,
                }
            }
        }
    }

    /// Sweeps all open requests whose deadline has passed, removing them
    /// and returning what the caller must do about each.
    ///
    /// Preserves the original coordinator's handoff trigger condition:
    /// handoff fires when fewer replicas answered than the full replication
    /// factor, not merely fewer than `w` (see SPEC_FULL.md §9). This means a
    /// write that already reached `w` acks and replied to its client can
    /// still trigger handoff for stragglers once its deadline passes.
    pub fn sweep_timeouts(
        &mut self,
        now: Instant,
        replication_factor: usize,
    ) -> Vec<TimeoutOutcome> {
        let expired: Vec<Timestamp> = self
            .ongoing
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut outcomes = Vec::new();
        for corr_id in expired {
            let Some(ongoing) = self.ongoing.remove(&corr_id) else {
                continue;
            };
            match ongoing.kind {
                RequestKind::Get => {
                    outcomes.push(TimeoutOutcome::ReadFailed {
                        send_back: ongoing.send_back,
                    });
                }
                RequestKind::Put => {
                    let responded_hosts: Vec<_> = ongoing.responses.keys().cloned().collect();
                    let missing_hosts: Vec<_> = ongoing
                        .expected
                        .iter()
                        .filter(|h| !responded_hosts.contains(h))
                        .cloned()
                        .collect();

                    if !ongoing.responded {
                        outcomes.push(TimeoutOutcome::WriteFailed {
                            send_back: ongoing.send_back,
                        });
                    }

                    if ongoing.responses.len() < replication_factor && !missing_hosts.is_empty() {
                        if let (Some(value), Some(context)) = (ongoing.value, ongoing.context) {
                            outcomes.push(TimeoutOutcome::HandoffNeeded {
                                key: ongoing.key,
                                value,
                                context,
                                missing_hosts,
                            });
                        }
                    }
                }
                RequestKind::ForGet | RequestKind::ForPut => {
                    outcomes.push(TimeoutOutcome::PromoteToCoordinator {
                        corr_id,
                        kind: ongoing.kind.without_forward(),
                        key: ongoing.key,
                        value: ongoing.value,
                        context: ongoing.context,
                        send_back: ongoing.send_back,
                    });
                }
            }
        }
        outcomes
    }
}

impl Default for RequestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_types::Hostname;
    use std::time::Duration;

    fn host(name: &str) -> Hostname {
        Hostname::from(name)
    }

    #[test]
    fn local_get_completes_on_r_responses_and_merges_rows() {
        let mut coord = RequestCoordinator::new();
        let corr_id = Timestamp::now();
        coord.open(
            corr_id,
            RequestKind::Get,
            Key::new("k"),
            None,
            None,
            Token(1),
            vec![host("a"), host("b"), host("c")],
            2,
            Instant::now() + Duration::from_secs(2),
        );
        assert!(coord
            .record_response(corr_id, host("a"), ResponseData::Read(vec![(Context::new(), "v1".into())]))
            .is_none());
        let outcome = coord
            .record_response(corr_id, host("b"), ResponseData::Read(vec![(Context::new(), "v1".into())]))
            .unwrap();
        match outcome {
            Outcome::ReadReady { rows, .. } => assert_eq!(rows.len(), 1),
            _ => panic!("expected ReadReady"),
        }
        assert!(!coord.is_open(corr_id));
    }

    #[test]
    fn duplicate_response_from_same_host_is_idempotent() {
        let mut coord = RequestCoordinator::new();
        let corr_id = Timestamp::now();
        coord.open(
            corr_id,
            RequestKind::Get,
            Key::new("k"),
            None,
            None,
            Token(1),
            vec![host("a"), host("b")],
            2,
            Instant::now() + Duration::from_secs(2),
        );
        assert!(coord
            .record_response(corr_id, host("a"), ResponseData::Read(vec![]))
            .is_none());
        assert!(coord
            .record_response(corr_id, host("a"), ResponseData::Read(vec![]))
            .is_none());
        assert!(coord.is_open(corr_id));
    }

    #[test]
    fn local_put_completes_on_w_acks() {
        let mut coord = RequestCoordinator::new();
        let corr_id = Timestamp::now();
        coord.open(
            corr_id,
            RequestKind::Put,
            Key::new("k"),
            Some("v".into()),
            Some(Context::new()),
            Token(3),
            vec![host("a")],
            1,
            Instant::now() + Duration::from_secs(2),
        );
        let outcome = coord
            .record_response(corr_id, host("a"), ResponseData::Write(Context::new(), "v".into()))
            .unwrap();
        assert!(matches!(outcome, Outcome::WriteReady { .. }));
    }

    #[test]
    fn timeout_on_get_reports_read_failed() {
        let mut coord = RequestCoordinator::new();
        let corr_id = Timestamp::now();
        coord.open(
            corr_id,
            RequestKind::Get,
            Key::new("k"),
            None,
            None,
            Token(1),
            vec![host("a"), host("b"), host("c")],
            2,
            Instant::now(),
        );
        let outcomes = coord.sweep_timeouts(Instant::now() + Duration::from_millis(1), 3);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], TimeoutOutcome::ReadFailed { .. }));
    }

    #[test]
    fn timeout_on_put_with_missing_replicas_requests_handoff() {
        let mut coord = RequestCoordinator::new();
        let corr_id = Timestamp::now();
        coord.open(
            corr_id,
            RequestKind::Put,
            Key::new("k"),
            Some("v".into()),
            Some(Context::new()),
            Token(1),
            vec![host("a"), host("b"), host("c")],
            2,
            Instant::now(),
        );
        coord.record_response(corr_id, host("a"), ResponseData::Write(Context::new(), "v".into()));
        let outcomes = coord.sweep_timeouts(Instant::now() + Duration::from_millis(1), 3);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, TimeoutOutcome::HandoffNeeded { missing_hosts, .. } if missing_hosts.len() == 2)));
    }

    #[test]
    fn timeout_on_forwarded_request_promotes_to_coordinator() {
        let mut coord = RequestCoordinator::new();
        let corr_id = Timestamp::now();
        coord.open(
            corr_id,
            RequestKind::ForPut,
            Key::new("k"),
            Some("v".into()),
            Some(Context::new()),
            Token(9),
            vec![host("leader")],
            1,
            Instant::now(),
        );
        let outcomes = coord.sweep_timeouts(Instant::now() + Duration::from_millis(1), 3);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            TimeoutOutcome::PromoteToCoordinator { kind, .. } => assert_eq!(*kind, RequestKind::Put),
            other => panic!("expected PromoteToCoordinator, got {other:?}"),
        }
    }
}
