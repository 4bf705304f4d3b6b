//! Per-key FIFO chaining with a global concurrency cap.
//!
//! Each key tracks the settlement of its most recent admission (the "tail").
//! A new admission first swaps itself in as the tail, then waits for its
//! predecessor to settle, then competes for a global permit. The semaphore
//! gates the execution body only (waiting in line costs no permit), and
//! `tokio::sync::Semaphore` hands permits out in FIFO order across keys.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::{oneshot, Semaphore};

/// Agent runs executing at any instant, across all chats.
pub const MAX_CONCURRENT_TURNS: usize = 2;

pub struct TurnQueue {
    tails: Mutex<HashMap<String, Tail>>,
    global: Semaphore,
    next_seq: AtomicU64,
}

struct Tail {
    seq: u64,
    settled: oneshot::Receiver<()>,
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnQueue {
    pub fn new() -> Self {
        Self {
            tails: Mutex::new(HashMap::new()),
            global: Semaphore::new(MAX_CONCURRENT_TURNS),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Run `task` after every earlier admission for `key` has settled and a
    /// global permit is available. The permit is released on every exit path
    /// (success, error value, drop), so failures never leak capacity.
    pub async fn enqueue<F, T>(&self, key: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let (tx, rx) = oneshot::channel();
        let my_seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let prev = {
            let mut tails = self.tails.lock().unwrap();
            tails.insert(key.to_string(), Tail { seq: my_seq, settled: rx })
        };

        if let Some(prev) = prev {
            // Err means the predecessor was dropped mid-flight, which still
            // counts as settled.
            let _ = prev.settled.await;
        }

        let permit = self.global.acquire().await.unwrap();
        let out = task.await;
        drop(permit);

        let _ = tx.send(());

        // Keep the map bounded: drop our entry if nothing queued behind us.
        let mut tails = self.tails.lock().unwrap();
        if tails.get(key).is_some_and(|t| t.seq == my_seq) {
            tails.remove(key);
        }

        out
    }

    /// Number of keys with a live tail. Diagnostic only.
    pub fn tracked_keys(&self) -> usize {
        self.tails.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::sleep;

    #[tokio::test]
    async fn same_key_admissions_are_strictly_serial() {
        let q = TurnQueue::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let log = |label: &'static str, events: &Arc<Mutex<Vec<&'static str>>>| {
            events.lock().unwrap().push(label);
        };

        let (e1, e2) = (events.clone(), events.clone());
        tokio::join!(
            q.enqueue("7", async {
                log("a-start", &e1);
                sleep(Duration::from_millis(30)).await;
                log("a-end", &e1);
            }),
            q.enqueue("7", async {
                log("b-start", &e2);
                log("b-end", &e2);
            }),
        );

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen, vec!["a-start", "a-end", "b-start", "b-end"]);
    }

    #[tokio::test]
    async fn failed_predecessor_does_not_block_successor() {
        let q = TurnQueue::new();
        let first: Result<(), String> = q
            .enqueue("7", async { Err::<(), _>("boom".to_string()) })
            .await;
        assert!(first.is_err());
        let second = q.enqueue("7", async { 42 }).await;
        assert_eq!(second, 42);
    }

    #[tokio::test]
    async fn at_most_two_bodies_run_concurrently() {
        let q = Arc::new(TurnQueue::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for chat in 0..5 {
            let q = q.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                q.enqueue(&chat.to_string(), async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_TURNS);
        assert!(peak.load(Ordering::SeqCst) >= 2, "cap should actually be reached");
    }

    #[tokio::test]
    async fn third_chat_starts_only_after_a_slot_frees() {
        let q = Arc::new(TurnQueue::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let run = |key: &'static str, events: Arc<Mutex<Vec<String>>>, q: Arc<TurnQueue>| async move {
            q.enqueue(key, async {
                events.lock().unwrap().push(format!("{key}-start"));
                sleep(Duration::from_millis(25)).await;
                events.lock().unwrap().push(format!("{key}-end"));
            })
            .await;
        };

        tokio::join!(
            run("a", events.clone(), q.clone()),
            run("b", events.clone(), q.clone()),
            run("c", events.clone(), q.clone()),
        );

        let seen = events.lock().unwrap().clone();
        let c_start = seen.iter().position(|e| e == "c-start").unwrap();
        let first_end = seen.iter().position(|e| e.ends_with("-end")).unwrap();
        assert!(c_start > first_end, "c started before any slot freed: {seen:?}");
    }

    #[tokio::test]
    async fn tail_map_is_evicted_after_completion() {
        let q = TurnQueue::new();
        q.enqueue("7", async {}).await;
        q.enqueue("8", async {}).await;
        assert_eq!(q.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn dropped_admission_does_not_leak_permits() {
        let q = Arc::new(TurnQueue::new());
        // Occupy and abort two admissions mid-body.
        for chat in 0..2 {
            let q = q.clone();
            let h = tokio::spawn(async move {
                q.enqueue(&chat.to_string(), async {
                    sleep(Duration::from_secs(60)).await;
                })
                .await;
            });
            sleep(Duration::from_millis(10)).await;
            h.abort();
            let _ = h.await;
        }
        // Both permits must be available again.
        let v = q.enqueue("9", async { 1 }).await + q.enqueue("10", async { 1 }).await;
        assert_eq!(v, 2);
    }
}
