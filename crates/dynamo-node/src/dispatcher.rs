//! Maps every wire tag and client command to the collaborator that owns it,
//! per §4.1/§4.2. The dispatcher holds the node's whole logical state (ring,
//! storage, membership manager, request coordinator, handoff queue) but
//! never touches a socket directly — it returns [`Effect`]s for the mio
//! event loop in `server.rs` to carry out. This keeps the single-threaded
//! decision logic testable without a real network.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use dynamo_ring::Ring;
use dynamo_storage::Store;
use dynamo_types::{Context, Hostname, Key, MembershipOp, RequestKind, Timestamp};
use dynamo_wire::{
    ForwardedOp, ForwardedReq, GetFile, GetFileResponse, Handoff, Message, MembershipCommit,
    MembershipOk, MembershipPrepare, ResponseForForward, StoreFile, StoreFileResponse,
};
use mio::Token;

use crate::coordinator::{Outcome, RequestCoordinator, ResponseData, TimeoutOutcome};
use crate::handoff::{HandoffManager, PendingWrite};
use crate::membership::MembershipManager;

/// Something the event loop must do in response to processing a message or
/// a timer tick.
#[derive(Debug)]
pub enum Effect {
    /// Send `message` to `to`, dialing a new connection if none is cached.
    SendToHost { to: Hostname, message: Message },
    /// A reply whose origin is unambiguously a client connection (the
    /// command just arrived directly on it): membership results, parse
    /// errors, `quit`.
    ReplyText { token: Token, text: String },
    /// A request-coordinator completion. The origin connection may be a
    /// client or a peer that forwarded the request; only `server.rs` knows
    /// which, via the connection's [`crate::connection::ConnectionKind`].
    FinalReply {
        token: Token,
        corr_id: Timestamp,
        text: String,
    },
    Close { token: Token },
}

pub struct Dispatcher {
    self_host: Hostname,
    leader: Option<Hostname>,
    replication_factor: usize,
    r: usize,
    w: usize,
    request_timelimit: Duration,
    data_dir: PathBuf,
    last_corr_id: Option<Timestamp>,
    pub ring: Ring,
    pub store: Store,
    pub membership: MembershipManager,
    pub coordinator: RequestCoordinator,
    pub handoff: HandoffManager,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_host: Hostname,
        leader: Option<Hostname>,
        replication_factor: usize,
        r: usize,
        w: usize,
        request_timelimit: Duration,
        data_dir: PathBuf,
        ring: Ring,
        store: Store,
        handoff: HandoffManager,
    ) -> Self {
        Self {
            self_host,
            leader,
            replication_factor,
            r,
            w,
            request_timelimit,
            data_dir,
            last_corr_id: None,
            ring,
            store,
            membership: MembershipManager::new(),
            coordinator: RequestCoordinator::new(),
            handoff,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_none()
    }

    fn leader_host(&self) -> Hostname {
        self.leader.clone().unwrap_or_else(|| self.self_host.clone())
    }

    /// Writes the current ring membership to `<host>.ring`, per §4.3's
    /// commit step. Best-effort: a failure here is logged but does not
    /// unwind the commit, since the in-memory ring is already authoritative
    /// for this process's lifetime.
    fn persist_ring(&self) {
        let path = self.data_dir.join(format!("{}.ring", self.self_host.as_str()));
        if let Err(e) = std::fs::write(&path, self.ring.to_snapshot()) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist ring snapshot");
        }
    }

    /// A `Timestamp` guaranteed to be unique and increasing within this
    /// process, used both as wall-clock reading and as a request's
    /// correlation ID (per the data model's creation-timestamp scheme).
    fn next_corr_id(&mut self) -> Timestamp {
        let next = Timestamp::now_monotonic(self.last_corr_id);
        self.last_corr_id = Some(next);
        next
    }

    // ---- client commands (§4.2) -------------------------------------

    pub fn handle_client_command(&mut self, token: Token, text: &str, now: Instant) -> Vec<Effect> {
        let text = text.trim();
        let mut parts = text.splitn(2, ' ');
        match parts.next().unwrap_or("") {
            "" => vec![],
            "quit" => vec![Effect::Close { token }],
            "add-node" => self.handle_membership_command(token, parts.next(), MembershipOp::Add, now),
            "remove-node" => {
                self.handle_membership_command(token, parts.next(), MembershipOp::Remove, now)
            }
            "get" => match parts.next() {
                Some(key) => self.originate(token, RequestKind::Get, Key::new(key), None, None, now),
                None => vec![Effect::ReplyText { token, text: "error: usage: get <key>".into() }],
            },
            "put" => self.handle_put(token, parts.next(), now),
            other => vec![Effect::ReplyText {
                token,
                text: format!("error: unknown command {other:?}"),
            }],
        }
    }

    fn handle_put(&mut self, token: Token, rest: Option<&str>, now: Instant) -> Vec<Effect> {
        let Some(rest) = rest else {
            return vec![Effect::ReplyText {
                token,
                text: "error: usage: put <key> <context-json> <value>".into(),
            }];
        };
        let mut fields = rest.splitn(3, ' ');
        let (Some(key), Some(context_json), Some(value)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return vec![Effect::ReplyText {
                token,
                text: "error: usage: put <key> <context-json> <value>".into(),
            }];
        };
        let context = match Context::from_json(context_json) {
            Ok(c) => c,
            Err(e) => {
                return vec![Effect::ReplyText {
                    token,
                    text: format!("error: invalid context: {e}"),
                }];
            }
        };
        self.originate(
            token,
            RequestKind::Put,
            Key::new(key),
            Some(value.to_string()),
            Some(context),
            now,
        )
    }

    fn handle_membership_command(
        &mut self,
        token: Token,
        host: Option<&str>,
        op: MembershipOp,
        now: Instant,
    ) -> Vec<Effect> {
        let Some(host) = host else {
            return vec![Effect::ReplyText {
                token,
                text: "error: usage: add-node|remove-node <host>".into(),
            }];
        };
        if !self.is_leader() {
            return vec![Effect::ReplyText {
                token,
                text: format!("error: not leader, contact {}", self.leader_host()),
            }];
        }
        let target = Hostname::from(host);
        let deadline = now + self.request_timelimit;
        match self
            .membership
            .begin(&self.self_host, target.clone(), op, &self.ring, token, deadline)
        {
            Ok((broadcast, view, request_id)) => broadcast
                .into_iter()
                .map(|to| Effect::SendToHost {
                    to,
                    message: Message::MembershipPrepare(MembershipPrepare {
                        view,
                        request_id,
                        op,
                        host: target.clone(),
                    }),
                })
                .collect(),
            Err(e) => vec![Effect::ReplyText { token, text: format!("error: {e}") }],
        }
    }

    /// Origination routing per §4.4: non-leader clients forward to the
    /// leader; the leader services keys it owns locally and forwards
    /// everything else to the owner.
    fn originate(
        &mut self,
        token: Token,
        kind: RequestKind,
        key: Key,
        value: Option<String>,
        context: Option<Context>,
        now: Instant,
    ) -> Vec<Effect> {
        let corr_id = self.next_corr_id();
        let key_hash = key.hash();

        if !self.is_leader() {
            return self.forward(token, corr_id, kind, key, value, context, self.leader_host(), now);
        }

        let owner = match self.ring.owner(key_hash) {
            Ok(h) => h,
            Err(e) => return vec![Effect::ReplyText { token, text: format!("error: {e}") }],
        };
        if owner != self.self_host {
            return self.forward(token, corr_id, kind, key, value, context, owner, now);
        }
        self.coordinate_locally(token, corr_id, kind, key, value, context, now)
    }

    fn forward(
        &mut self,
        token: Token,
        corr_id: Timestamp,
        kind: RequestKind,
        key: Key,
        value: Option<String>,
        context: Option<Context>,
        to: Hostname,
        now: Instant,
    ) -> Vec<Effect> {
        let for_kind = match kind {
            RequestKind::Get => RequestKind::ForGet,
            RequestKind::Put => RequestKind::ForPut,
            already_forwarded => already_forwarded,
        };
        let op = match kind {
            RequestKind::Get | RequestKind::ForGet => ForwardedOp::Get { key: key.clone() },
            RequestKind::Put | RequestKind::ForPut => ForwardedOp::Put {
                key: key.clone(),
                value: value.clone().unwrap_or_default(),
                context: context.clone().unwrap_or_default(),
            },
        };
        // Forwarded deadlines get one extra second over the local
        // quorum deadline, per §4.4, so the forwarder's own timeout never
        // fires before the node actually servicing the request gives up.
        let deadline = now + self.request_timelimit + Duration::from_secs(1);
        self.coordinator.open(
            corr_id,
            for_kind,
            key,
            value,
            context,
            token,
            vec![to.clone()],
            1,
            deadline,
        );
        vec![Effect::SendToHost {
            to,
            message: Message::ForwardedReq(ForwardedReq { corr_id, op }),
        }]
    }

    /// Applies the write/read locally, seeds the coordinator's own response,
    /// and fans out to the rest of the replica set.
    fn coordinate_locally(
        &mut self,
        token: Token,
        corr_id: Timestamp,
        kind: RequestKind,
        key: Key,
        value: Option<String>,
        context: Option<Context>,
        now: Instant,
    ) -> Vec<Effect> {
        let replicas = match self.ring.replicas(key.hash()) {
            Ok(r) => r,
            Err(e) => return vec![Effect::ReplyText { token, text: format!("error: {e}") }],
        };
        let required = if kind.is_write() { self.w } else { self.r };
        let deadline = now + self.request_timelimit;
        self.coordinator.open(
            corr_id,
            kind,
            key.clone(),
            value.clone(),
            context.clone(),
            token,
            replicas.clone(),
            required,
            deadline,
        );

        let mut effects = Vec::new();
        let self_host = self.self_host.clone();
        let self_outcome = match kind {
            RequestKind::Get => {
                let rows = self.store.get_file(&key);
                self.coordinator
                    .record_response(corr_id, self_host, ResponseData::Read(rows))
            }
            RequestKind::Put => {
                let put_context = context.clone().unwrap_or_default();
                let put_value = value.clone().unwrap_or_default();
                match self.store.store_file(key.clone(), put_value.clone(), put_context.clone()) {
                    Ok(_) => self.coordinator.record_response(
                        corr_id,
                        self_host,
                        ResponseData::Write(put_context, put_value),
                    ),
                    Err(e) => return vec![Effect::ReplyText { token, text: format!("error: {e}") }],
                }
            }
            RequestKind::ForGet | RequestKind::ForPut => unreachable!("local coordination is never forwarded"),
        };
        if let Some(outcome) = self_outcome {
            effects.push(Self::outcome_to_effect(outcome, corr_id));
        }

        for replica in replicas.into_iter().filter(|h| *h != self.self_host) {
            let message = match kind {
                RequestKind::Get => Message::GetFile(GetFile { key: key.clone(), corr_id }),
                RequestKind::Put => Message::StoreFile(StoreFile {
                    key: key.clone(),
                    value: value.clone().unwrap_or_default(),
                    context: context.clone().unwrap_or_default(),
                    corr_id,
                }),
                RequestKind::ForGet | RequestKind::ForPut => unreachable!(),
            };
            effects.push(Effect::SendToHost { to: replica, message });
        }
        effects
    }

    fn outcome_to_effect(outcome: Outcome, corr_id: Timestamp) -> Effect {
        match outcome {
            Outcome::ReadReady { send_back, rows } => Effect::FinalReply {
                token: send_back,
                corr_id,
                text: format_rows(&rows),
            },
            Outcome::WriteReady { send_back, context, value } => Effect::FinalReply {
                token: send_back,
                corr_id,
                text: format!("ok {} {}", value, context.to_json()),
            },
            Outcome::ForwardReady { send_back, body } => {
                Effect::FinalReply { token: send_back, corr_id, text: body }
            }
        }
    }

    // ---- peer messages (§4.1) ----------------------------------------

    pub fn handle_message(&mut self, from: Hostname, token: Token, message: Message, now: Instant) -> Vec<Effect> {
        match message {
            Message::ClientCommand(text) => self.handle_client_command(token, &text, now),
            Message::MembershipPrepare(p) => {
                self.membership.on_prepare(p.view, p.request_id, p.op, &p.host);
                vec![Effect::SendToHost {
                    to: from,
                    message: Message::MembershipOk(MembershipOk {
                        view: p.view,
                        request_id: p.request_id,
                    }),
                }]
            }
            Message::MembershipOk(ok) => self.handle_membership_ok(from, ok.view, ok.request_id),
            Message::MembershipCommit(c) => {
                if let Err(e) = self.membership.on_commit(&mut self.ring, c.op, &c.hosts) {
                    tracing::warn!(error = %e, "failed to apply membership commit");
                } else {
                    self.persist_ring();
                }
                vec![]
            }
            Message::GetFile(g) => {
                let rows = self.store.get_file(&g.key);
                vec![Effect::SendToHost {
                    to: from,
                    message: Message::GetFileResponse(GetFileResponse {
                        corr_id: g.corr_id,
                        key: g.key,
                        rows,
                    }),
                }]
            }
            Message::StoreFile(s) => match self.store.store_file(s.key.clone(), s.value.clone(), s.context.clone()) {
                Ok(_) => vec![Effect::SendToHost {
                    to: from,
                    message: Message::StoreFileResponse(StoreFileResponse {
                        corr_id: s.corr_id,
                        key: s.key,
                        context: s.context,
                        value: s.value,
                    }),
                }],
                Err(e) => {
                    tracing::warn!(error = %e, "failed to apply replicated write");
                    vec![]
                }
            },
            Message::StoreFileResponse(r) => {
                if let Some((host, write)) = self.handoff.take_inflight(r.corr_id) {
                    if let Err(e) = self.handoff.mark_delivered(&host, &write) {
                        tracing::warn!(error = %e, "failed to persist handoff queue after delivery");
                    }
                    return vec![];
                }
                let outcome = self.coordinator.record_response(
                    r.corr_id,
                    from,
                    ResponseData::Write(r.context, r.value),
                );
                outcome.map(|o| Self::outcome_to_effect(o, r.corr_id)).into_iter().collect()
            }
            Message::GetFileResponse(r) => {
                let outcome =
                    self.coordinator.record_response(r.corr_id, from, ResponseData::Read(r.rows));
                outcome.map(|o| Self::outcome_to_effect(o, r.corr_id)).into_iter().collect()
            }
            Message::ForwardedReq(f) => self.handle_forwarded_req(from, token, f, now),
            Message::ResponseForForward(r) => {
                let outcome = self
                    .coordinator
                    .record_response(r.corr_id, from, ResponseData::Forwarded(r.body));
                outcome.map(|o| Self::outcome_to_effect(o, r.corr_id)).into_iter().collect()
            }
            Message::Handoff(h) => self.handle_handoff(h),
        }
    }

    fn handle_membership_ok(&mut self, from: Hostname, view: dynamo_types::View, request_id: u64) -> Vec<Effect> {
        let Some(ready) = self.membership.on_ok(from, view, request_id) else {
            return vec![];
        };
        if let Err(e) = self
            .membership
            .on_commit(&mut self.ring, ready.op, &ready.authoritative_hosts)
        {
            tracing::warn!(error = %e, "leader failed to apply its own membership commit");
        } else {
            self.persist_ring();
        }
        let mut effects: Vec<Effect> = ready
            .authoritative_hosts
            .iter()
            .filter(|h| **h != self.self_host)
            .map(|to| Effect::SendToHost {
                to: to.clone(),
                message: Message::MembershipCommit(MembershipCommit {
                    view: ready.view,
                    op: ready.op,
                    hosts: ready.authoritative_hosts.clone(),
                }),
            })
            .collect();
        let verb = match ready.op {
            MembershipOp::Add => "added",
            MembershipOp::Remove => "removed",
        };
        effects.push(Effect::ReplyText {
            token: ready.client_token,
            text: format!("ok {verb} {}", ready.target),
        });
        effects
    }

    fn handle_forwarded_req(&mut self, from: Hostname, token: Token, req: ForwardedReq, now: Instant) -> Vec<Effect> {
        let (kind, key, value, context) = match req.op {
            ForwardedOp::Get { key } => (RequestKind::Get, key, None, None),
            ForwardedOp::Put { key, value, context } => {
                (RequestKind::Put, key, Some(value), Some(context))
            }
        };
        let owner = match self.ring.owner(key.hash()) {
            Ok(h) => h,
            Err(e) => {
                return vec![Effect::SendToHost {
                    to: from,
                    message: Message::ResponseForForward(ResponseForForward {
                        corr_id: req.corr_id,
                        body: format!("error: {e}"),
                    }),
                }];
            }
        };
        if owner == self.self_host {
            self.coordinate_locally(token, req.corr_id, kind, key, value, context, now)
        } else {
            // We're the leader relaying a client's request past ourselves to
            // the actual owner; reuse the client's corr_id so the owner's
            // eventual reply matches back up through this same table entry.
            self.forward(token, req.corr_id, kind, key, value, context, owner, now)
        }
    }

    fn handle_handoff(&mut self, h: Handoff) -> Vec<Effect> {
        let write = PendingWrite {
            key: h.store.key,
            value: h.store.value,
            context: h.store.context,
        };
        if let Err(e) = self.handoff.enqueue(write, &h.target_hosts) {
            tracing::warn!(error = %e, "failed to persist handoff write");
        }
        vec![]
    }

    // ---- periodic work --------------------------------------------------

    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Some(client) = self.membership.on_timeout(now) {
            effects.push(Effect::ReplyText {
                token: client,
                text: "error: membership operation timed out".into(),
            });
        }

        for outcome in self.coordinator.sweep_timeouts(now, self.replication_factor) {
            effects.extend(self.handle_request_timeout(outcome, now));
        }

        effects
    }

    fn handle_request_timeout(&mut self, outcome: TimeoutOutcome, now: Instant) -> Vec<Effect> {
        match outcome {
            TimeoutOutcome::ReadFailed { send_back } => vec![Effect::ReplyText {
                token: send_back,
                text: "error: read timed out before quorum was reached".into(),
            }],
            TimeoutOutcome::WriteFailed { send_back } => vec![Effect::ReplyText {
                token: send_back,
                text: "error: write timed out before quorum was reached".into(),
            }],
            TimeoutOutcome::HandoffNeeded { key, value, context, missing_hosts } => {
                self.start_handoff(key, value, context, missing_hosts)
            }
            TimeoutOutcome::PromoteToCoordinator { corr_id, kind, key, value, context, send_back } => {
                self.promote_and_retry(corr_id, kind, key, value, context, send_back, now)
            }
        }
    }

    /// Groups missing replicas by the holder `Ring::handoff_node` selects
    /// for each, and either enqueues locally (if this node is the holder
    /// for itself) or sends a `Handoff` message to the holder.
    fn start_handoff(
        &mut self,
        key: Key,
        value: String,
        context: Context,
        missing_hosts: Vec<Hostname>,
    ) -> Vec<Effect> {
        let mut by_holder: std::collections::HashMap<Hostname, Vec<Hostname>> =
            std::collections::HashMap::new();
        for missing in missing_hosts {
            match self.ring.handoff_node(&missing) {
                Ok(holder) => by_holder.entry(holder).or_default().push(missing),
                Err(e) => tracing::warn!(error = %e, %missing, "no holder available for handoff"),
            }
        }

        let mut effects = Vec::new();
        for (holder, targets) in by_holder {
            if holder == self.self_host {
                let write = PendingWrite { key: key.clone(), value: value.clone(), context: context.clone() };
                if let Err(e) = self.handoff.enqueue(write, &targets) {
                    tracing::warn!(error = %e, "failed to persist local handoff write");
                }
            } else {
                let corr_id = self.next_corr_id();
                effects.push(Effect::SendToHost {
                    to: holder,
                    message: Message::Handoff(Handoff {
                        store: StoreFile {
                            key: key.clone(),
                            value: value.clone(),
                            context: context.clone(),
                            corr_id,
                        },
                        target_hosts: targets,
                    }),
                });
            }
        }
        effects
    }

    #[allow(clippy::too_many_arguments)]
    fn promote_and_retry(
        &mut self,
        corr_id: Timestamp,
        kind: RequestKind,
        key: Key,
        value: Option<String>,
        context: Option<Context>,
        send_back: Token,
        now: Instant,
    ) -> Vec<Effect> {
        self.coordinate_locally(send_back, corr_id, kind, key, value, context, now)
    }

    /// Attempts delivery of every pending handoff write. Called on the
    /// handoff retry timer. A write stays queued until its owning replica's
    /// `StoreFileResponse` confirms it (see `handle_message`'s
    /// `StoreFileResponse` arm) — a target still unreachable on this attempt
    /// simply gets retried again on the next tick, per §4.5.
    pub fn retry_handoffs(&mut self) -> Vec<Effect> {
        let pending = self.handoff.pending();
        let mut effects = Vec::with_capacity(pending.len());
        for (host, write) in pending {
            let corr_id = self.next_corr_id();
            self.handoff.begin_delivery(corr_id, host.clone(), write.clone());
            effects.push(Effect::SendToHost {
                to: host,
                message: Message::StoreFile(StoreFile {
                    key: write.key,
                    value: write.value,
                    context: write.context,
                    corr_id,
                }),
            });
        }
        effects
    }
}

fn format_rows(rows: &[(Context, String)]) -> String {
    if rows.is_empty() {
        return "error: no rows found for key".to_string();
    }
    rows.iter()
        .map(|(ctx, value)| format!("{value} {}", ctx.to_json()))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dispatcher(tmp: &std::path::Path, self_host: &str, leader: Option<&str>, members: &[&str]) -> Dispatcher {
        let mut ring = Ring::new(3);
        for m in members {
            ring.add(Hostname::from(*m)).unwrap();
        }
        let store = Store::open(tmp, Hostname::from(self_host)).unwrap();
        let handoff = HandoffManager::open(tmp, &Hostname::from(self_host)).unwrap();
        Dispatcher::new(
            Hostname::from(self_host),
            leader.map(Hostname::from),
            3,
            2,
            2,
            Duration::from_secs(2),
            tmp.to_path_buf(),
            ring,
            store,
            handoff,
        )
    }

    #[test]
    fn non_leader_forwards_put_as_for_put() {
        let tmp = tempdir().unwrap();
        let mut node = dispatcher(tmp.path(), "b", Some("a"), &["a", "b", "c"]);
        let effects = node.handle_client_command(Token(1), "put k {} v", Instant::now());
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::SendToHost { to, message: Message::ForwardedReq(_) } => {
                assert_eq!(*to, Hostname::from("a"));
            }
            other => panic!("expected a forwarded request, got {other:?}"),
        }
    }

    #[test]
    fn leader_owning_key_applies_locally_and_fans_out() {
        let tmp = tempdir().unwrap();
        let mut node = dispatcher(tmp.path(), "a", None, &["a", "b", "c"]);
        // force ownership onto "a" for this test by using a single-member ring
        node.ring = Ring::new(3);
        node.ring.add(Hostname::from("a")).unwrap();
        let effects = node.handle_client_command(Token(1), "put k {} v", Instant::now());
        // single member: local write completes immediately (required <= 1 response)
        assert!(effects.iter().any(|e| matches!(e, Effect::FinalReply { .. })));
    }

    #[test]
    fn malformed_put_is_rejected_without_opening_a_request() {
        let tmp = tempdir().unwrap();
        let mut node = dispatcher(tmp.path(), "a", None, &["a"]);
        let effects = node.handle_client_command(Token(1), "put onlykey", Instant::now());
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::ReplyText { text, .. } if text.starts_with("error")));
    }

    #[test]
    fn add_node_rejected_when_not_leader() {
        let tmp = tempdir().unwrap();
        let mut node = dispatcher(tmp.path(), "b", Some("a"), &["a", "b"]);
        let effects = node.handle_client_command(Token(1), "add-node c", Instant::now());
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::ReplyText { text, .. } if text.contains("not leader")));
    }

    #[test]
    fn add_node_as_leader_broadcasts_prepare() {
        let tmp = tempdir().unwrap();
        let mut node = dispatcher(tmp.path(), "a", None, &["a", "b"]);
        let effects = node.handle_client_command(Token(1), "add-node c", Instant::now());
        assert_eq!(effects.len(), 2); // broadcast to b and c
        assert!(effects
            .iter()
            .all(|e| matches!(e, Effect::SendToHost { message: Message::MembershipPrepare(_), .. })));
    }

    #[test]
    fn quit_closes_the_connection() {
        let tmp = tempdir().unwrap();
        let mut node = dispatcher(tmp.path(), "a", None, &["a"]);
        let effects = node.handle_client_command(Token(5), "quit", Instant::now());
        assert!(matches!(effects.as_slice(), [Effect::Close { token }] if *token == Token(5)));
    }
}
