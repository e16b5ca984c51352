//! Async debouncer for bursts of external-change signals.

use sharedkv_core::DebounceWindow;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Runs a handler on the first signal of a burst and swallows the rest.
///
/// Every signal inside the quiet period extends it. The handler task is
/// aborted when the debouncer is cancelled or dropped.
#[derive(Debug)]
pub struct Debouncer {
    signals: mpsc::UnboundedSender<Instant>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn a debouncer that calls `handler` at most once per burst.
    pub fn spawn<F, Fut>(quiet: Duration, mut handler: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (signals, mut received) = mpsc::unbounded_channel::<Instant>();
        let task = tokio::spawn(async move {
            let mut window = DebounceWindow::new(quiet);
            while let Some(at) = received.recv().await {
                if window.hit(at.into_std()) {
                    handler().await;
                }
            }
        });
        Self { signals, task }
    }

    /// Report one external change.
    pub fn trigger(&self) {
        // Fails only after cancel(), when signals are meant to be dropped.
        let _ = self.signals.send(Instant::now());
    }

    /// Stop handling signals.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the debouncer has stopped.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(quiet: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let debouncer = Debouncer::spawn(quiet, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (debouncer, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn first_signal_fires_immediately() {
        let (debouncer, calls) = counting(Duration::from_millis(500));

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once() {
        let (debouncer, calls) = counting(Duration::from_millis(500));

        for _ in 0..5 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_again_after_quiet_period() {
        let (debouncer, calls) = counting(Duration::from_millis(500));

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(400)).await;
        debouncer.trigger();
        // The second signal extended the window to 900ms.
        tokio::time::sleep(Duration::from_millis(400)).await;
        debouncer.trigger();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_debouncer_ignores_signals() {
        let (debouncer, calls) = counting(Duration::from_millis(500));

        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(debouncer.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
