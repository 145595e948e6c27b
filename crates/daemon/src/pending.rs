//! Registry of in-flight worker requests.
//!
//! Every entry owns its deadline timer: insert arms it (the caller spawns
//! the task, the registry keeps the handle), remove and clear abort it. No
//! operation can leave a dangling timer behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use bdg_protocol::CommandName;

use crate::router::ResponseShape;

/// One forwarded request awaiting its worker response.
#[derive(Debug)]
pub struct PendingEntry {
    /// Outbound channel of the originating client connection.
    pub reply: mpsc::UnboundedSender<Value>,
    pub session_id: String,
    pub command: CommandName,
    /// Client-facing shape this request resolves to.
    pub shape: ResponseShape,
    /// Status requests carry the locally-gathered data to merge or fall
    /// back to; everything else leaves this empty.
    pub base_data: Option<Value>,
    timer: JoinHandle<()>,
}

impl PendingEntry {
    pub fn new(
        reply: mpsc::UnboundedSender<Value>,
        session_id: String,
        command: CommandName,
        shape: ResponseShape,
        base_data: Option<Value>,
        timer: JoinHandle<()>,
    ) -> Self {
        Self { reply, session_id, command, shape, base_data, timer }
    }

    fn cancel_timer(&self) {
        self.timer.abort();
    }
}

/// Monotone request-id source: process start nanoseconds plus a counter,
/// so ids never collide across daemon restarts either.
#[derive(Debug)]
pub struct RequestIds {
    start_nanos: u128,
    counter: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        let start_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self { start_nanos, counter: AtomicU64::new(0) }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.start_nanos, n)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    map: HashMap<String, PendingEntry>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Stores an entry. Re-inserting an id cancels and replaces the
    /// previous entry.
    pub fn insert(&mut self, id: String, entry: PendingEntry) {
        if let Some(previous) = self.map.insert(id, entry) {
            previous.cancel_timer();
        }
    }

    pub fn get(&self, id: &str) -> Option<&PendingEntry> {
        self.map.get(id)
    }

    /// Removes an entry, cancelling its timer first.
    pub fn remove(&mut self, id: &str) -> Option<PendingEntry> {
        let entry = self.map.remove(id)?;
        entry.cancel_timer();
        Some(entry)
    }

    /// Cancels every timer and drains the map; used on worker exit to fan
    /// a uniform error out to every waiting client.
    pub fn clear(&mut self) -> Vec<PendingEntry> {
        let entries: Vec<PendingEntry> = self.map.drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            entry.cancel_timer();
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_entry() -> (PendingEntry, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        (PendingEntry::new(tx, "s".into(), CommandName::CdpCall, ResponseShape::Generic, None, timer), rx)
    }

    async fn assert_timer_cancelled(entry: &PendingEntry) {
        // An aborted long-sleep task finishes promptly.
        for _ in 0..50 {
            if entry.timer.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timer was not cancelled");
    }

    #[tokio::test]
    async fn remove_cancels_the_timer() {
        let mut pending = PendingRequests::new();
        let (entry, _rx) = make_entry();
        pending.insert("a".into(), entry);

        let removed = pending.remove("a").unwrap();
        assert_timer_cancelled(&removed).await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn clear_cancels_all_timers() {
        let mut pending = PendingRequests::new();
        let (e1, _r1) = make_entry();
        let (e2, _r2) = make_entry();
        pending.insert("a".into(), e1);
        pending.insert("b".into(), e2);

        let drained = pending.clear();
        assert_eq!(drained.len(), 2);
        for entry in &drained {
            assert_timer_cancelled(entry).await;
        }
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_misses_then_insert_succeeds() {
        let mut pending = PendingRequests::new();
        assert!(pending.remove("ghost").is_none());
        assert!(pending.get("ghost").is_none());

        let (entry, _rx) = make_entry();
        pending.insert("ghost".into(), entry);
        assert_eq!(pending.len(), 1);
        assert!(pending.get("ghost").is_some());
    }

    #[tokio::test]
    async fn reinsert_cancels_previous_entry() {
        let mut pending = PendingRequests::new();

        // First entry's timer reports if it ever fires.
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = fired_tx.send(());
        });
        pending.insert(
            "dup".into(),
            PendingEntry::new(reply_tx, "s".into(), CommandName::CdpCall, ResponseShape::Generic, None, timer),
        );

        let (second, _r2) = make_entry();
        pending.insert("dup".into(), second);
        assert_eq!(pending.len(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(fired_rx.try_recv().is_err(), "replaced entry's timer still fired");
    }

    #[test]
    fn request_ids_are_unique_and_monotone() {
        let ids = RequestIds::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
        assert!(a.ends_with("-0"));
        assert!(b.ends_with("-1"));
    }
}
