//! Single-flight FIFO operation queue
//!
//! Each operation receives a [`Completion`]; the next operation starts only
//! when the current one's completion is invoked (or dropped). The queue
//! does not look at whether the operation succeeded.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type Operation = Box<dyn FnOnce(Completion) + Send + 'static>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Operation>,
    running: bool,
    /// Bumped by `clear` so completions of dropped work are ignored.
    generation: u64,
}

#[derive(Clone, Default)]
pub struct OperationQueue {
    state: Arc<Mutex<QueueState>>,
}

/// Continuation handed to a running operation
pub struct Completion {
    state: Weak<Mutex<QueueState>>,
    generation: u64,
}

impl Completion {
    /// Signal that the operation is done and start the next one.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            advance(&state, self.generation);
        }
    }
}

fn advance(state: &Arc<Mutex<QueueState>>, generation: u64) {
    let next = {
        let mut guard = state.lock();
        if guard.generation != generation || !guard.running {
            return;
        }
        match guard.pending.pop_front() {
            Some(op) => Some(op),
            None => {
                guard.running = false;
                None
            }
        }
    };
    if let Some(op) = next {
        op(Completion {
            state: Arc::downgrade(state),
            generation,
        });
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `op`, starting it right away when the queue is idle.
    pub fn enqueue(&self, op: Operation) {
        let generation = {
            let mut guard = self.state.lock();
            if guard.running {
                guard.pending.push_back(op);
                return;
            }
            guard.running = true;
            guard.generation
        };
        op(Completion {
            state: Arc::downgrade(&self.state),
            generation,
        });
    }

    /// Drop pending work without running it. The in-flight operation, if
    /// any, keeps running but its completion no longer advances the queue.
    pub fn clear(&self) {
        let dropped = {
            let mut guard = self.state.lock();
            guard.generation += 1;
            guard.running = false;
            std::mem::take(&mut guard.pending)
        };
        drop(dropped);
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_runs_immediately_when_idle() {
        let queue = OperationQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        queue.enqueue(Box::new(move |done| {
            counter.fetch_add(1, Ordering::SeqCst);
            done.complete();
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!queue.is_running());
    }

    #[test]
    fn test_waits_for_completion() {
        let queue = OperationQueue::new();
        let held: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(None));
        let log = Arc::new(Mutex::new(Vec::new()));

        let slot = Arc::clone(&held);
        let first = Arc::clone(&log);
        queue.enqueue(Box::new(move |done| {
            first.lock().push("a");
            *slot.lock() = Some(done);
        }));
        let second = Arc::clone(&log);
        queue.enqueue(Box::new(move |done| {
            second.lock().push("b");
            done.complete();
        }));

        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(queue.len(), 1);

        let done = held.lock().take().unwrap();
        done.complete();
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_drops_pending_without_running_them() {
        let queue = OperationQueue::new();
        let held: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(None));
        let ran = Arc::new(AtomicUsize::new(0));

        let slot = Arc::clone(&held);
        queue.enqueue(Box::new(move |done| {
            *slot.lock() = Some(done);
        }));
        for _ in 0..3 {
            let counter = Arc::clone(&ran);
            queue.enqueue(Box::new(move |done| {
                counter.fetch_add(1, Ordering::SeqCst);
                done.complete();
            }));
        }

        queue.clear();
        assert!(queue.is_empty());

        // stale completion must not start anything
        held.lock().take().unwrap().complete();
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let counter = Arc::clone(&ran);
        queue.enqueue(Box::new(move |done| {
            counter.fetch_add(1, Ordering::SeqCst);
            done.complete();
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_ops_complete_in_submission_order() {
        let queue = OperationQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for (name, delay) in [("A", 30u64), ("B", 10), ("C", 1)] {
            let active = Arc::clone(&active);
            let tx = tx.clone();
            queue.enqueue(Box::new(move |done| {
                tokio::spawn(async move {
                    assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    let _ = tx.send(name);
                    done.complete();
                });
            }));
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(name) = rx.recv().await {
            order.push(name);
        }
        assert_eq!(order, vec!["A", "B", "C"]);
    }
}
