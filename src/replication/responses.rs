//! Per-request response accounting
//!
//! One [`ResponseManager`] exists per outstanding request, registered with
//! the message service for its lifetime. It tracks which expected nodes have
//! answered, decides when the synchronous phase is over, enforces the
//! at-most-one-undo rule, and reduces the collected payloads to one result.

use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::replication::request::{RequestId, ResultStrategy};

#[derive(Debug)]
struct ManagerState {
    /// (responder, payload) in arrival order
    responses: Vec<(String, Value)>,
    received_current_node: bool,
    undo_fired: bool,
}

#[derive(Debug)]
pub struct ResponseManager {
    request_id: RequestId,
    expected_nodes: Vec<String>,
    expected_synchronous: usize,
    quorum: usize,
    execute_on_local: bool,
    local_node: String,
    total_timeout: Duration,
    created_at: Instant,
    state: Mutex<ManagerState>,
}

impl ResponseManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: RequestId,
        expected_nodes: Vec<String>,
        expected_synchronous: usize,
        quorum: usize,
        execute_on_local: bool,
        local_node: impl Into<String>,
        total_timeout: Duration,
    ) -> Self {
        Self {
            request_id,
            expected_nodes,
            expected_synchronous,
            quorum,
            execute_on_local,
            local_node: local_node.into(),
            total_timeout,
            created_at: Instant::now(),
            state: Mutex::new(ManagerState {
                responses: Vec::new(),
                received_current_node: false,
                undo_fired: false,
            }),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn expected_nodes(&self) -> &[String] {
        &self.expected_nodes
    }

    pub fn expected_synchronous(&self) -> usize {
        self.expected_synchronous
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn is_execute_on_local(&self) -> bool {
        self.execute_on_local
    }

    /// True while the synchronous phase still has responses to wait for.
    pub fn should_wait_for_sync(&self) -> bool {
        let received = self.state.lock().unwrap().responses.len();
        received < self.expected_synchronous && received < self.expected_nodes.len()
    }

    /// Record a response. Returns false for responders outside the expected
    /// set or duplicates.
    pub fn record(&self, responder: &str, payload: Value) -> bool {
        if !self.expected_nodes.iter().any(|n| n == responder) {
            return false;
        }

        let mut state = self.state.lock().unwrap();
        if state.responses.iter().any(|(node, _)| node == responder) {
            return false;
        }

        if responder == self.local_node {
            state.received_current_node = true;
        }
        state.responses.push((responder.to_string(), payload));
        true
    }

    pub fn received_count(&self) -> usize {
        self.state.lock().unwrap().responses.len()
    }

    pub fn responding_nodes(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .responses
            .iter()
            .map(|(node, _)| node.clone())
            .collect()
    }

    pub fn received_current_node(&self) -> bool {
        self.state.lock().unwrap().received_current_node
    }

    pub fn quorum_reached(&self) -> bool {
        self.received_count() >= self.quorum
    }

    /// Latch the undo compensation; true only on the first call.
    pub fn mark_undo_fired(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.undo_fired {
            false
        } else {
            state.undo_fired = true;
            true
        }
    }

    /// Past the bound on asynchronous accounting?
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.total_timeout
    }

    /// Reduce the recorded payloads per `strategy`. `None` until at least one
    /// response arrived. Returns (responder, payload); the merge reduction
    /// keeps the first responder as the nominal one.
    pub fn result(&self, strategy: ResultStrategy) -> Option<(String, Value)> {
        let state = self.state.lock().unwrap();
        let responses = &state.responses;
        let first = responses.first()?;

        match strategy {
            ResultStrategy::First => Some(first.clone()),
            ResultStrategy::Majority => {
                let mut best = first;
                let mut best_count = 0;
                for candidate in responses {
                    let count = responses
                        .iter()
                        .filter(|(_, payload)| payload == &candidate.1)
                        .count();
                    if count > best_count {
                        best = candidate;
                        best_count = count;
                    }
                }
                Some(best.clone())
            }
            ResultStrategy::Merge => {
                let merged: serde_json::Map<String, Value> = responses
                    .iter()
                    .map(|(node, payload)| (node.clone(), payload.clone()))
                    .collect();
                Some((first.0.clone(), Value::Object(merged)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(expected_sync: usize, quorum: usize) -> ResponseManager {
        ResponseManager::new(
            RequestId::new("a", 1),
            vec!["a".into(), "b".into(), "c".into()],
            expected_sync,
            quorum,
            true,
            "a",
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_sync_phase_completes_at_expected_count() {
        let mgr = manager(2, 2);
        assert!(mgr.should_wait_for_sync());

        assert!(mgr.record("b", json!(1)));
        assert!(mgr.should_wait_for_sync());

        assert!(mgr.record("c", json!(1)));
        assert!(!mgr.should_wait_for_sync());
        assert!(mgr.quorum_reached());
    }

    #[test]
    fn test_zero_expected_never_waits() {
        let mgr = manager(0, 2);
        assert!(!mgr.should_wait_for_sync());
    }

    #[test]
    fn test_record_rejects_unexpected_and_duplicate() {
        let mgr = manager(3, 3);
        assert!(!mgr.record("z", json!(1)));
        assert!(mgr.record("b", json!(1)));
        assert!(!mgr.record("b", json!(2)));
        assert_eq!(mgr.received_count(), 1);
        assert_eq!(mgr.responding_nodes(), vec!["b".to_string()]);
    }

    #[test]
    fn test_local_node_tracking() {
        let mgr = manager(2, 2);
        assert!(mgr.is_execute_on_local());
        assert!(!mgr.received_current_node());
        mgr.record("a", json!(1));
        assert!(mgr.received_current_node());
    }

    #[test]
    fn test_undo_latch_fires_once() {
        let mgr = manager(2, 3);
        assert!(mgr.mark_undo_fired());
        assert!(!mgr.mark_undo_fired());
    }

    #[test]
    fn test_result_first() {
        let mgr = manager(2, 2);
        assert!(mgr.result(ResultStrategy::First).is_none());

        mgr.record("b", json!("x"));
        mgr.record("c", json!("y"));
        let (node, payload) = mgr.result(ResultStrategy::First).unwrap();
        assert_eq!(node, "b");
        assert_eq!(payload, json!("x"));
    }

    #[test]
    fn test_result_majority() {
        let mgr = manager(3, 3);
        mgr.record("a", json!("x"));
        mgr.record("b", json!("y"));
        mgr.record("c", json!("y"));
        let (_, payload) = mgr.result(ResultStrategy::Majority).unwrap();
        assert_eq!(payload, json!("y"));
    }

    #[test]
    fn test_result_merge() {
        let mgr = manager(2, 2);
        mgr.record("b", json!(1));
        mgr.record("c", json!(2));
        let (node, payload) = mgr.result(ResultStrategy::Merge).unwrap();
        assert_eq!(node, "b");
        assert_eq!(payload, json!({"b": 1, "c": 2}));
    }
}
