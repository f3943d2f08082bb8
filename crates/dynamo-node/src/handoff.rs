//! Hinted handoff queue, per §4.5.
//!
//! When a coordinator's write deadline fires before every intended replica
//! has acknowledged, it asks some other live member to hold the write on
//! the missing replica's behalf. That member's `HandoffManager` persists
//! the write and keeps retrying direct delivery until the real owner comes
//! back.
//!
//! Delivery is best-effort and may duplicate a write that already landed;
//! storage treats repeated identical writes as idempotent (§4.6), so this
//! manager does not need delivery acknowledgement beyond "the send
//! succeeded".

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use dynamo_types::{Context, Hostname, Key, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// One write being held on behalf of `intended_host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub key: Key,
    pub value: String,
    pub context: Context,
}

#[derive(Default, Serialize, Deserialize)]
struct QueueSnapshot(HashMap<Hostname, Vec<PendingWrite>>);

pub struct HandoffManager {
    path: PathBuf,
    queue: HashMap<Hostname, Vec<PendingWrite>>,
    /// Writes sent out for delivery but not yet confirmed by a
    /// `StoreFileResponse`, keyed by the `corr_id` the send went out under.
    /// Cleared on confirmation; a write still in `queue` after its `corr_id`
    /// goes stale here is simply retried again on the next tick.
    inflight: HashMap<Timestamp, (Hostname, PendingWrite)>,
}

impl HandoffManager {
    /// Opens (or creates) the handoff queue for `hostname`, reloading
    /// anything persisted from a prior run.
    pub fn open(data_dir: &Path, hostname: &Hostname) -> ServerResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{}.handoff", hostname.as_str()));
        let queue = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                postcard::from_bytes::<QueueSnapshot>(&bytes)
                    .map_err(|e| ServerError::Fatal(format!("corrupt handoff queue: {e}")))?
                    .0
            }
        } else {
            HashMap::new()
        };
        Ok(Self { path, queue, inflight: HashMap::new() })
    }

    pub fn is_empty(&self) -> bool {
        self.queue.values().all(|v| v.is_empty())
    }

    /// Holds `write` on behalf of every host in `intended_hosts`, persisting
    /// the updated queue to disk.
    pub fn enqueue(&mut self, write: PendingWrite, intended_hosts: &[Hostname]) -> ServerResult<()> {
        for host in intended_hosts {
            self.queue.entry(host.clone()).or_default().push(write.clone());
        }
        self.persist()
    }

    /// Returns every `(intended_host, write)` pair currently queued, for
    /// the caller to attempt direct delivery against.
    pub fn pending(&self) -> Vec<(Hostname, PendingWrite)> {
        self.queue
            .iter()
            .flat_map(|(host, writes)| writes.iter().map(move |w| (host.clone(), w.clone())))
            .collect()
    }

    /// Records that `write` was just handed to the transport for `host`
    /// under `corr_id`, so a later [`HandoffManager::confirm_delivery`] can
    /// find it. Does not remove the write from the queue: if no confirmation
    /// ever arrives, the write is retried again on the next retry tick.
    pub fn begin_delivery(&mut self, corr_id: Timestamp, host: Hostname, write: PendingWrite) {
        self.inflight.retain(|_, (h, w)| !(*h == host && *w == write));
        self.inflight.insert(corr_id, (host, write));
    }

    /// Looks up and clears the in-flight send recorded for `corr_id`,
    /// without checking whether the write is still queued.
    pub fn take_inflight(&mut self, corr_id: Timestamp) -> Option<(Hostname, PendingWrite)> {
        self.inflight.remove(&corr_id)
    }

    /// Drops a write once delivery to `host` has been confirmed.
    pub fn mark_delivered(&mut self, host: &Hostname, write: &PendingWrite) -> ServerResult<()> {
        if let Some(writes) = self.queue.get_mut(host) {
            writes.retain(|w| w != write);
            if writes.is_empty() {
                self.queue.remove(host);
            }
        }
        self.persist()
    }

    fn persist(&self) -> ServerResult<()> {
        let snapshot = QueueSnapshot(self.queue.clone());
        let bytes = postcard::to_allocvec(&snapshot)
            .map_err(|e| ServerError::Fatal(format!("failed to encode handoff queue: {e}")))?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(k: &str) -> PendingWrite {
        PendingWrite {
            key: Key::new(k),
            value: "v".into(),
            context: Context::new(),
        }
    }

    #[test]
    fn enqueue_then_pending_round_trips() {
        let dir = tempdir().unwrap();
        let mut mgr = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
        assert!(mgr.is_empty());
        mgr.enqueue(write("k1"), &[Hostname::from("down-host")]).unwrap();
        assert!(!mgr.is_empty());
        let pending = mgr.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, Hostname::from("down-host"));
    }

    #[test]
    fn mark_delivered_removes_the_write() {
        let dir = tempdir().unwrap();
        let mut mgr = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
        let w = write("k1");
        mgr.enqueue(w.clone(), &[Hostname::from("down-host")]).unwrap();
        mgr.mark_delivered(&Hostname::from("down-host"), &w).unwrap();
        assert!(mgr.is_empty());
    }

    #[test]
    fn reopening_reloads_persisted_queue() {
        let dir = tempdir().unwrap();
        {
            let mut mgr = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
            mgr.enqueue(write("k1"), &[Hostname::from("down-host")]).unwrap();
        }
        let reopened = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
        assert!(!reopened.is_empty());
        assert_eq!(reopened.pending().len(), 1);
    }

    #[test]
    fn same_write_can_be_held_for_multiple_intended_hosts() {
        let dir = tempdir().unwrap();
        let mut mgr = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
        mgr.enqueue(
            write("k1"),
            &[Hostname::from("down-a"), Hostname::from("down-b")],
        )
        .unwrap();
        assert_eq!(mgr.pending().len(), 2);
    }

    #[test]
    fn unconfirmed_delivery_leaves_the_write_queued() {
        let dir = tempdir().unwrap();
        let mut mgr = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
        let w = write("k1");
        mgr.enqueue(w.clone(), &[Hostname::from("down-host")]).unwrap();
        mgr.begin_delivery(Timestamp::from_nanos(1), Hostname::from("down-host"), w);
        // No StoreFileResponse ever arrived for corr_id 1, so the write is
        // still pending for the next retry tick.
        assert_eq!(mgr.pending().len(), 1);
    }

    #[test]
    fn confirmed_delivery_clears_the_write() {
        let dir = tempdir().unwrap();
        let mut mgr = HandoffManager::open(dir.path(), &Hostname::from("holder")).unwrap();
        let w = write("k1");
        mgr.enqueue(w.clone(), &[Hostname::from("down-host")]).unwrap();
        mgr.begin_delivery(Timestamp::from_nanos(1), Hostname::from("down-host"), w.clone());

        let (host, confirmed) = mgr.take_inflight(Timestamp::from_nanos(1)).unwrap();
        mgr.mark_delivered(&host, &confirmed).unwrap();

        assert!(mgr.is_empty());
        assert!(mgr.take_inflight(Timestamp::from_nanos(1)).is_none());
    }
}
