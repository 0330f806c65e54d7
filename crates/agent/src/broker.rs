use browser_agent_core::{Error, InterruptRequest, InterruptStatus, PendingInterrupt, Result, ThreadId};
use browser_agent_storage::AuditLogger;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide table of human-input requests, keyed by interrupt id.
///
/// Checkpointed thread state is the durable copy; a restarted process calls
/// [`InterruptBroker::restore`] before answering or resuming a thread.
#[derive(Default)]
pub struct InterruptBroker {
    interrupts: Mutex<HashMap<Uuid, PendingInterrupt>>,
}

impl InterruptBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Uuid, PendingInterrupt>> {
        self.interrupts.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a new `pending` interrupt for `origin_id` under `thread_id`.
    ///
    /// Fails with `Error::Interrupt` while that origin still has a live one.
    pub fn raise(
        &self,
        thread_id: &ThreadId,
        origin_id: &str,
        origin_name: &str,
        request: InterruptRequest,
    ) -> Result<PendingInterrupt> {
        let mut table = self.table();
        if let Some(live) = table
            .values()
            .find(|pi| &pi.thread_id == thread_id && pi.origin_id == origin_id && pi.is_live())
        {
            warn!(
                thread_id = %thread_id,
                origin_id,
                existing = %live.id,
                "Rejected second interrupt while one is unresolved"
            );
            return Err(Error::Interrupt(format!(
                "origin '{}' already has an unresolved interrupt ({})",
                origin_id, live.id
            )));
        }

        let interrupt = PendingInterrupt::new(thread_id.clone(), origin_id, origin_name, request);
        info!(
            thread_id = %thread_id,
            interrupt_id = %interrupt.id,
            origin_id,
            kind = %interrupt.kind,
            "Interrupt raised"
        );
        table.insert(interrupt.id, interrupt.clone());
        Ok(interrupt)
    }

    /// `pending -> responded`. False for unknown ids and for anything not pending.
    pub fn respond(&self, interrupt_id: Uuid, value: Value) -> bool {
        let mut table = self.table();
        match table.get_mut(&interrupt_id) {
            Some(pi) => {
                let accepted = pi.respond(value);
                if accepted {
                    info!(thread_id = %pi.thread_id, interrupt_id = %interrupt_id, "Interrupt responded");
                } else {
                    debug!(interrupt_id = %interrupt_id, status = %pi.status, "Stale response ignored");
                }
                accepted
            }
            None => {
                debug!(interrupt_id = %interrupt_id, "Response for unknown interrupt ignored");
                false
            }
        }
    }

    /// Hand out the oldest responded interrupt raised by the thread itself,
    /// moving it to `resumed` and dropping it from the table. Forwarded
    /// sub-agent interrupts are not matched.
    pub fn resume(&self, thread_id: &ThreadId) -> Option<(PendingInterrupt, Value)> {
        let mut table = self.table();
        let id = table
            .values()
            .filter(|pi| {
                &pi.thread_id == thread_id
                    && pi.origin_id == thread_id.as_str()
                    && pi.status == InterruptStatus::Responded
            })
            .min_by_key(|pi| pi.created_at)
            .map(|pi| pi.id)?;

        let mut pi = table.remove(&id)?;
        let value = pi.take_resume()?;
        info!(thread_id = %thread_id, interrupt_id = %id, "Interrupt resumed");
        Some((pi, value))
    }

    /// `responded -> resumed` for a specific id, returning the stored value.
    /// Anything not responded is left in place.
    pub fn mark_resumed(&self, interrupt_id: Uuid) -> Option<Value> {
        let mut table = self.table();
        if table.get(&interrupt_id)?.status != InterruptStatus::Responded {
            return None;
        }
        table.remove(&interrupt_id).and_then(|mut pi| pi.take_resume())
    }

    pub fn get(&self, interrupt_id: Uuid) -> Option<PendingInterrupt> {
        self.table().get(&interrupt_id).cloned()
    }

    /// Live interrupts recorded under the thread, oldest first.
    pub fn pending(&self, thread_id: &ThreadId) -> Vec<PendingInterrupt> {
        let mut live: Vec<PendingInterrupt> = self
            .table()
            .values()
            .filter(|pi| &pi.thread_id == thread_id && pi.is_live())
            .cloned()
            .collect();
        live.sort_by_key(|pi| pi.created_at);
        live
    }

    /// Load live interrupts from checkpointed state, replacing any in-memory
    /// copy. Resumed ones stay in the checkpoint only.
    pub fn restore(&self, interrupts: &[PendingInterrupt]) {
        let mut table = self.table();
        for pi in interrupts.iter().filter(|pi| pi.is_live()) {
            table.insert(pi.id, pi.clone());
        }
        debug!(held = table.len(), "Interrupts restored from checkpoint");
    }

    /// Drop everything held for `root` and its sub-agent threads.
    pub fn discard(&self, root: &ThreadId) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, pi| !pi.thread_id.is_within(root));
        before - table.len()
    }

    /// Interrupts currently held in memory, across all threads.
    pub fn held_count(&self) -> usize {
        self.table().len()
    }
}

/// Audit one state-machine transition. Write failures are logged, not returned.
pub(crate) fn record_transition(audit: &AuditLogger, pi: &PendingInterrupt, transition: &str) {
    if let Err(e) = audit.log_interrupt(
        &pi.id.to_string(),
        &pi.origin_id,
        &pi.kind.to_string(),
        transition,
        pi.thread_id.as_str(),
    ) {
        warn!(interrupt_id = %pi.id, error = %e, "Failed to write audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_agent_core::InterruptKind;
    use serde_json::json;

    fn credentials() -> InterruptRequest {
        InterruptRequest::new(
            InterruptKind::Credentials,
            json!({"service": "LinkedIn", "reason": "check messages", "question": "Credentials?"}),
        )
    }

    #[test]
    fn test_round_trip_delivers_once() {
        let broker = InterruptBroker::new();
        let t1 = ThreadId::from("t1");
        let pi = broker.raise(&t1, "t1", "main", credentials()).unwrap();

        assert!(broker.resume(&t1).is_none());

        let creds = json!({"username": "a", "password": "b"});
        assert!(broker.respond(pi.id, creds.clone()));
        let (resumed, value) = broker.resume(&t1).unwrap();
        assert_eq!(value, creds);
        assert_eq!(resumed.status, InterruptStatus::Resumed);
        assert!(broker.resume(&t1).is_none());
    }

    #[test]
    fn test_stale_and_unknown_responses_rejected() {
        let broker = InterruptBroker::new();
        let t1 = ThreadId::from("t1");
        let pi = broker.raise(&t1, "t1", "main", credentials()).unwrap();

        assert!(!broker.respond(Uuid::new_v4(), json!("x")));
        assert!(broker.respond(pi.id, json!("first")));
        assert!(!broker.respond(pi.id, json!("second")));
        let (resumed, _) = broker.resume(&t1).unwrap();
        assert!(!broker.respond(pi.id, json!("third")));
        assert_eq!(resumed.response, Some(json!("first")));
    }

    #[test]
    fn test_second_raise_per_origin_rejected_until_resumed() {
        let broker = InterruptBroker::new();
        let t1 = ThreadId::from("t1");
        let pi = broker.raise(&t1, "t1", "main", credentials()).unwrap();
        assert!(matches!(
            broker.raise(&t1, "t1", "main", credentials()),
            Err(Error::Interrupt(_))
        ));

        // a different origin on the same thread is fine
        broker.raise(&t1, "sub-a", "research", credentials()).unwrap();

        broker.respond(pi.id, json!("ok"));
        assert!(broker.raise(&t1, "t1", "main", credentials()).is_err());
        broker.resume(&t1).unwrap();
        broker.raise(&t1, "t1", "main", credentials()).unwrap();
    }

    #[test]
    fn test_out_of_order_responses_match_by_id() {
        let broker = InterruptBroker::new();
        let parent = ThreadId::from("parent");
        let a = broker.raise(&parent, "sub-a", "a", credentials()).unwrap();
        let b = broker.raise(&parent, "sub-b", "b", credentials()).unwrap();
        assert_ne!(a.id, b.id);

        assert!(broker.respond(b.id, json!("for b")));
        assert_eq!(broker.get(a.id).unwrap().status, InterruptStatus::Pending);
        assert_eq!(broker.get(b.id).unwrap().status, InterruptStatus::Responded);

        // sub-agent interrupts are not handed out by the thread-level resume
        assert!(broker.resume(&parent).is_none());
        assert_eq!(broker.mark_resumed(b.id), Some(json!("for b")));
        assert_eq!(broker.pending(&parent).len(), 1);
    }

    #[test]
    fn test_resumed_interrupts_are_evicted() {
        let broker = InterruptBroker::new();
        let t1 = ThreadId::from("t1");
        let mut checkpointed = Vec::new();
        for _ in 0..100 {
            let pi = broker.raise(&t1, "t1", "main", credentials()).unwrap();
            assert!(broker.respond(pi.id, json!("ok")));
            let (resumed, _) = broker.resume(&t1).unwrap();
            assert!(broker.get(pi.id).is_none());
            checkpointed.push(resumed);
        }
        assert_eq!(broker.held_count(), 0);

        // restoring a long history only brings back what is still live
        let live = broker.raise(&t1, "t1", "main", credentials()).unwrap();
        checkpointed.push(live.clone());
        let fresh = InterruptBroker::new();
        fresh.restore(&checkpointed);
        assert_eq!(fresh.held_count(), 1);
        assert!(fresh.get(live.id).is_some());

        let parent = ThreadId::from("parent");
        let sub = broker.raise(&parent, "sub-a", "a", credentials()).unwrap();
        assert_eq!(broker.mark_resumed(sub.id), None);
        broker.respond(sub.id, json!("x"));
        assert_eq!(broker.mark_resumed(sub.id), Some(json!("x")));
        assert!(broker.get(sub.id).is_none());
    }

    #[test]
    fn test_discard_drops_thread_and_children_only() {
        let broker = InterruptBroker::new();
        let t1 = ThreadId::from("t1");
        let child = t1.child("sub-a");
        broker.raise(&t1, "t1", "main", credentials()).unwrap();
        broker.raise(&child, child.as_str(), "a", credentials()).unwrap();
        let other = broker.raise(&ThreadId::from("t10"), "t10", "main", credentials()).unwrap();

        assert_eq!(broker.discard(&t1), 2);
        assert_eq!(broker.held_count(), 1);
        assert!(broker.get(other.id).is_some());
    }

    #[test]
    fn test_restore_rehydrates_fresh_broker() {
        let first = InterruptBroker::new();
        let t1 = ThreadId::from("t1");
        let pi = first.raise(&t1, "t1", "main", credentials()).unwrap();

        let second = InterruptBroker::new();
        assert!(!second.respond(pi.id, json!("x")));
        second.restore(&[pi.clone()]);
        assert!(second.respond(pi.id, json!("x")));
        assert_eq!(second.resume(&t1).unwrap().1, json!("x"));
    }
}
