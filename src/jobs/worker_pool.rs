//! Bounded worker pool for per-item fan-out inside task bodies
//!
//! N workers pull items from a shared queue; a separate reporter task
//! polls an atomic counter on a fixed interval and emits one coalesced
//! progress callback, so reporting never contends with the workers.
//! Cancellation is checked between items only: in-flight items finish,
//! the pool drains, and whatever was persisted stays persisted.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// What the pool got through before finishing or draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOutcome {
    pub processed: usize,
    pub total: usize,
    pub cancelled: bool,
}

/// Run `handler` over `items` with `workers` concurrent workers.
///
/// `on_progress(processed, total)` fires at most once per report interval
/// plus once at the end. The handler owns per-item error policy; an item
/// that fails is still counted as processed.
pub async fn run_pool<T, F, Fut, P>(
    items: Vec<T>,
    workers: usize,
    cancel: CancellationToken,
    on_progress: P,
    handler: F,
) -> PoolOutcome
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    P: Fn(usize, usize) + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return PoolOutcome {
            processed: 0,
            total: 0,
            cancelled: cancel.is_cancelled(),
        };
    }

    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let counter = Arc::new(AtomicUsize::new(0));
    let on_progress = Arc::new(on_progress);

    let reporter_stop = CancellationToken::new();
    let reporter = {
        let counter = Arc::clone(&counter);
        let on_progress = Arc::clone(&on_progress);
        let stop = reporter_stop.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REPORT_INTERVAL);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tick.tick() => {
                        on_progress(counter.load(Ordering::Relaxed), total);
                    }
                }
            }
        })
    };

    let worker_count = workers.max(1).min(total);
    let mut handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let queue = Arc::clone(&queue);
        let counter = Arc::clone(&counter);
        let cancel = cancel.clone();
        let handler = handler.clone();

        handles.push(tokio::spawn(async move {
            loop {
                // Item boundary: the only place cancellation is observed
                if cancel.is_cancelled() {
                    break;
                }

                let item = queue.lock().pop_front();
                let Some(item) = item else { break };

                handler(item).await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    reporter_stop.cancel();
    let _ = reporter.await;

    let processed = counter.load(Ordering::Relaxed);
    on_progress(processed, total);

    PoolOutcome {
        processed,
        total,
        cancelled: cancel.is_cancelled() && processed < total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn processes_every_item() {
        let processed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&processed);

        let outcome = run_pool(
            (0..50).collect::<Vec<_>>(),
            4,
            CancellationToken::new(),
            |_, _| {},
            move |_item| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
            },
        )
        .await;

        assert_eq!(outcome.processed, 50);
        assert_eq!(outcome.total, 50);
        assert!(!outcome.cancelled);
        assert_eq!(processed.load(Ordering::Relaxed), 50);
    }

    #[tokio::test]
    async fn empty_input_is_trivially_complete() {
        let outcome = run_pool(
            Vec::<u32>::new(),
            4,
            CancellationToken::new(),
            |_, _| {},
            |_item| async {},
        )
        .await;

        assert_eq!(outcome, PoolOutcome { processed: 0, total: 0, cancelled: false });
    }

    #[tokio::test]
    async fn cancellation_drains_between_items() {
        let cancel = CancellationToken::new();
        let first_done = Arc::new(Notify::new());

        // Cancel once the first item has completed; workers must stop at
        // the next item boundary with no item left half-done
        {
            let cancel = cancel.clone();
            let first_done = Arc::clone(&first_done);
            tokio::spawn(async move {
                first_done.notified().await;
                cancel.cancel();
            });
        }

        let completed = Arc::new(AtomicUsize::new(0));
        let completed_ref = Arc::clone(&completed);
        let notify_ref = Arc::clone(&first_done);

        let outcome = run_pool(
            (0..100).collect::<Vec<_>>(),
            1,
            cancel,
            |_, _| {},
            move |_item| {
                let completed = Arc::clone(&completed_ref);
                let notify = Arc::clone(&notify_ref);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    completed.fetch_add(1, Ordering::Relaxed);
                    notify.notify_one();
                }
            },
        )
        .await;

        assert!(outcome.cancelled);
        assert!(outcome.processed < 100);
        // Every counted item ran to completion
        assert_eq!(outcome.processed, completed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn final_progress_always_fires() {
        let last = Arc::new(Mutex::new((0usize, 0usize)));
        let last_ref = Arc::clone(&last);

        run_pool(
            vec![1, 2, 3],
            2,
            CancellationToken::new(),
            move |processed, total| {
                *last_ref.lock() = (processed, total);
            },
            |_item| async {},
        )
        .await;

        assert_eq!(*last.lock(), (3, 3));
    }
}
