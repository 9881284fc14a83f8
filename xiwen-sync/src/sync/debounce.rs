//! Single-slot debounce timer
//!
//! Every `schedule` supersedes the previous one: only the action scheduled last
//! runs, once the quiet period has elapsed without another call. An action that
//! has already started is never interrupted.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm the timer with `action`, discarding whatever was pending.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let armed = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) == armed {
                action().await;
            }
        });
    }

    /// Drop the pending action, if any
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_burst_collapses_to_last_action() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let fired = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let fired = fired.clone();
            debouncer.schedule(move || async move {
                fired.lock().unwrap().push(i);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*fired.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_spaced_calls_each_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count = count.clone();
            debouncer.schedule(move || async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_action() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        debouncer.schedule(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
