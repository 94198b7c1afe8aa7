//! Deferred Handles
//!
//! A [`DeferredHandle`] is the completion notification of work that is
//! already running somewhere else. Awaiting it never drives or cancels
//! that work; dropping it leaves the work running detached.

use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::BoxError;
use crate::runtime::LoopHandle;

/// Terminal state of a deferred operation.
#[derive(Debug)]
pub enum Completion {
    /// The operation finished; the value rendered with `Debug`
    Succeeded(String),
    /// The operation failed, panicked, or its producer went away
    Failed(BoxError),
}

impl Completion {
    /// Whether the operation failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

type CompletionFuture = Pin<Box<dyn Future<Output = Completion> + Send>>;

/// Reference to an in-flight operation returned by a shutdown callback.
pub struct DeferredHandle {
    completion: CompletionFuture,
}

impl DeferredHandle {
    /// Run `future` as tracked loop work and observe its completion.
    ///
    /// The work counts as outstanding loop work until it finishes.
    pub fn spawn<F, T, E>(event_loop: &LoopHandle, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Debug + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::from_join_handle(event_loop.spawn(future))
    }

    /// Observe an already spawned task.
    ///
    /// A panicked or aborted task completes as [`Completion::Failed`].
    pub fn from_join_handle<T, E>(handle: JoinHandle<Result<T, E>>) -> Self
    where
        T: Debug + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self {
            completion: Box::pin(async move {
                match handle.await {
                    Ok(result) => Completion::from_result(result),
                    Err(join_error) => Completion::Failed(Box::new(join_error)),
                }
            }),
        }
    }

    /// Observe a result delivered through a oneshot channel.
    ///
    /// Dropping the sender without sending completes as [`Completion::Failed`].
    pub fn from_receiver<T, E>(receiver: oneshot::Receiver<Result<T, E>>) -> Self
    where
        T: Debug + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self {
            completion: Box::pin(async move {
                match receiver.await {
                    Ok(result) => Completion::from_result(result),
                    Err(_) => Completion::Failed("deferred operation dropped before completing".into()),
                }
            }),
        }
    }

    /// Wait for the operation to reach a terminal state
    pub async fn completion(self) -> Completion {
        self.completion.await
    }
}

impl Completion {
    fn from_result<T, E>(result: Result<T, E>) -> Self
    where
        T: Debug,
        E: Into<BoxError>,
    {
        match result {
            Ok(value) => Self::Succeeded(format!("{value:?}")),
            Err(error) => Self::Failed(error.into()),
        }
    }
}

impl Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;

    #[tokio::test]
    async fn test_spawned_success() {
        let event_loop = EventLoop::new();
        let handle = DeferredHandle::spawn(&event_loop.handle(), async { Ok::<_, BoxError>(42) });

        match handle.completion().await {
            Completion::Succeeded(value) => assert_eq!(value, "42"),
            other => panic!("unexpected completion: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_and_panic_are_failures() {
        let event_loop = EventLoop::new();
        let failed =
            DeferredHandle::spawn(&event_loop.handle(), async { Err::<(), _>("flush failed") });
        assert!(failed.completion().await.is_failed());

        let panicked = DeferredHandle::from_join_handle(tokio::spawn(async {
            if true {
                panic!("boom");
            }
            Ok::<(), BoxError>(())
        }));
        assert!(panicked.completion().await.is_failed());
    }

    #[tokio::test]
    async fn test_dropped_sender_is_failure() {
        let (tx, rx) = oneshot::channel::<Result<(), BoxError>>();
        drop(tx);
        assert!(DeferredHandle::from_receiver(rx).completion().await.is_failed());
    }
}
