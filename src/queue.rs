//! The in-memory pending-execution queue shared between [`crate::intention_handler`]
//! (producer) and [`crate::bundle_proposer`] (consumer).
//!
//! FIFO, mutex-guarded, with an optional capacity cap for backpressure
//! (spec.md §5: "If `Q.len` exceeds a configured cap … new submissions fail
//! with `QueueFull`").

use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::model::ExecutionObject;

pub struct Queue {
    inner: Mutex<VecDeque<ExecutionObject>>,
    cap: Option<usize>,
}

impl Queue {
    pub fn new(cap: Option<usize>) -> Self {
        Queue {
            inner: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    /// Appends an execution. Returns `false` if the queue is at capacity.
    pub async fn push(&self, execution: ExecutionObject) -> bool {
        let mut guard = self.inner.lock().await;
        if let Some(cap) = self.cap {
            if guard.len() >= cap {
                return false;
            }
        }
        guard.push_back(execution);
        true
    }

    /// Atomically takes every pending execution, leaving the queue empty.
    pub async fn drain(&self) -> Vec<ExecutionObject> {
        let mut guard = self.inner.lock().await;
        guard.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Destination, Intention, Transfer};
    use crate::timestamp::UnixTimestamp;
    use crate::util::Amount;

    fn sample_execution() -> ExecutionObject {
        ExecutionObject {
            intention: Intention {
                action: "send".to_string(),
                nonce: 1,
                expiry: UnixTimestamp(9_999_999_999),
                inputs: vec![],
                outputs: vec![],
                total_fee: vec![],
                proposer_tip: vec![],
                protocol_fee: vec![],
                agent_tip: vec![],
            },
            from: 1,
            proof: vec![Transfer {
                token: "0x0".to_string(),
                from_vault_id: 1,
                to: Destination::Vault(2),
                amount: Amount::zero(),
                deposit_id: None,
            }],
            signature: "0xsig".to_string(),
        }
    }

    #[tokio::test]
    async fn drain_empties_queue_and_preserves_order() {
        let queue = Queue::new(None);
        for _ in 0..3 {
            assert!(queue.push(sample_execution()).await);
        }
        assert_eq!(queue.len().await, 3);
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 3);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn push_rejects_once_at_capacity() {
        let queue = Queue::new(Some(1));
        assert!(queue.push(sample_execution()).await);
        assert!(!queue.push(sample_execution()).await);
    }
}
