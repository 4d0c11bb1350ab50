//! Background requests tied to a screen's lifetime
//!
//! Backend calls block, so they run on short-lived worker threads and hand
//! their result back over an mpsc channel. Every task carries the
//! [`CancelToken`] of the screen that started it; once the screen is gone
//! the token is cancelled and late results are dropped instead of delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A pending result from a worker thread.
pub struct Task<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancelToken,
}

impl<T: Send + 'static> Task<T> {
    /// Run `work` on a worker thread.
    pub fn spawn<F>(cancel: &CancelToken, work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let token = cancel.clone();
        let spawned = thread::Builder::new()
            .name("quizrush request".to_string())
            .spawn(move || {
                let result = work();
                if !token.is_cancelled() {
                    let _ = tx.send(result);
                }
            });
        if let Err(e) = spawned {
            // The dropped sender makes poll() report Gone
            warn!(error = %e, "failed to spawn request thread");
        }
        Self {
            rx,
            cancel: cancel.clone(),
        }
    }
}

/// Outcome of polling a [`Task`].
#[derive(Debug, PartialEq, Eq)]
pub enum TaskPoll<T> {
    Pending,
    Ready(T),
    /// Cancelled, or the worker exited without a result
    Gone,
}

impl<T> Task<T> {
    /// Check for the result without blocking. Cancelled tasks never yield.
    pub fn poll(&mut self) -> TaskPoll<T> {
        if self.cancel.is_cancelled() {
            return TaskPoll::Gone;
        }
        match self.rx.try_recv() {
            Ok(value) => TaskPoll::Ready(value),
            Err(mpsc::TryRecvError::Empty) => TaskPoll::Pending,
            Err(mpsc::TryRecvError::Disconnected) => TaskPoll::Gone,
        }
    }

    /// Block until the result arrives (tests and shutdown paths).
    pub fn wait(self, timeout: Duration) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_delivers_result() {
        let token = CancelToken::new();
        let task = Task::spawn(&token, || 40 + 2);
        assert_eq!(task.wait(Duration::from_secs(1)), Some(42));
    }

    #[test]
    fn test_poll_reports_ready() {
        let token = CancelToken::new();
        let mut task = Task::spawn(&token, || "done");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(task.poll(), TaskPoll::Ready("done"));
        assert_eq!(task.poll(), TaskPoll::Gone);
    }

    #[test]
    fn test_cancelled_task_is_discarded() {
        let token = CancelToken::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut task = Task::spawn(&token, move || {
            let _ = release_rx.recv();
            "late"
        });
        token.cancel();
        release_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(task.poll(), TaskPoll::Gone);
    }

    #[test]
    fn test_poll_pending_before_completion() {
        let token = CancelToken::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut task = Task::spawn(&token, move || {
            let _ = release_rx.recv();
            7
        });
        assert_eq!(task.poll(), TaskPoll::Pending);
        release_tx.send(()).unwrap();
        assert_eq!(task.wait(Duration::from_secs(1)), Some(7));
    }

    #[test]
    fn test_tokens_are_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
