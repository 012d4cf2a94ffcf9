//! Optimistic updates with rollback.
//!
//! The UI applies a change locally before the server confirms it. If the
//! server rejects the change, the state captured before the change is
//! restored.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use parking_lot::RwLock;
//! # use tether_engine::{OptimisticExecutor, OptimisticUpdate, SyncError, TracingNotifier};
//! # async fn demo() {
//! let executor = OptimisticExecutor::new(Arc::new(TracingNotifier));
//! let points = Arc::new(RwLock::new(10u32));
//!
//! let (read, write, apply) = (points.clone(), points.clone(), points.clone());
//! let outcome = executor
//!     .execute(
//!         OptimisticUpdate::new(
//!             move || *read.read(),
//!             move |snapshot| *write.write() = snapshot,
//!             || async { Err::<(), _>(SyncError::failed("rejected")) },
//!         )
//!         .apply(move || *apply.write() += 5)
//!         .error_message("Could not award points"),
//!     )
//!     .await;
//!
//! assert!(!outcome.is_applied());
//! assert_eq!(*points.read(), 10);
//! # }
//! ```

use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, Notifier};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// One optimistic mutation.
///
/// `get_state`, `set_state` and `api_call` are required by the constructor;
/// the optimistic mutation, success hook and error message are optional.
pub struct OptimisticUpdate<'a, T, R, G, S, C> {
    get_state: G,
    set_state: S,
    api_call: C,
    apply: Option<Box<dyn FnOnce() + Send + 'a>>,
    on_success: Option<Box<dyn FnOnce(&R) + Send + 'a>>,
    error_message: Option<String>,
    _state: PhantomData<fn() -> T>,
}

impl<'a, T, R, G, S, C, Fut> OptimisticUpdate<'a, T, R, G, S, C>
where
    G: FnOnce() -> T,
    S: FnOnce(T),
    C: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<R>>,
{
    /// Creates an update.
    ///
    /// `get_state` must return an owned snapshot that shares nothing with
    /// the live state; a `clone()` of the state does.
    pub fn new(get_state: G, set_state: S, api_call: C) -> Self {
        Self {
            get_state,
            set_state,
            api_call,
            apply: None,
            on_success: None,
            error_message: None,
            _state: PhantomData,
        }
    }

    /// The local mutation, run after the snapshot is taken.
    pub fn apply(mut self, apply: impl FnOnce() + Send + 'a) -> Self {
        self.apply = Some(Box::new(apply));
        self
    }

    /// Called with the server response on success.
    pub fn on_success(mut self, on_success: impl FnOnce(&R) + Send + 'a) -> Self {
        self.on_success = Some(Box::new(on_success));
        self
    }

    /// Message shown to the user when the update is rolled back.
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Result of an optimistic update.
#[derive(Debug)]
pub enum OptimisticOutcome<R> {
    /// The server accepted the change.
    Applied(R),
    /// The server rejected the change; the snapshot was restored.
    RolledBack(SyncError),
}

impl<R> OptimisticOutcome<R> {
    /// True if the server accepted the change.
    pub fn is_applied(&self) -> bool {
        matches!(self, OptimisticOutcome::Applied(_))
    }

    /// The server response, if accepted.
    pub fn response(&self) -> Option<&R> {
        match self {
            OptimisticOutcome::Applied(response) => Some(response),
            OptimisticOutcome::RolledBack(_) => None,
        }
    }

    /// The rejection, if rolled back.
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            OptimisticOutcome::Applied(_) => None,
            OptimisticOutcome::RolledBack(error) => Some(error),
        }
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> SyncResult<R> {
        match self {
            OptimisticOutcome::Applied(response) => Ok(response),
            OptimisticOutcome::RolledBack(error) => Err(error),
        }
    }
}

/// Runs optimistic updates. Holds no state between calls.
#[derive(Clone)]
pub struct OptimisticExecutor {
    notifier: Arc<dyn Notifier>,
}

impl OptimisticExecutor {
    /// Creates an executor that reports rollbacks through `notifier`.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Snapshots, applies, calls the server and restores on rejection.
    ///
    /// `set_state` is called exactly once when the call fails and never when
    /// it succeeds.
    pub async fn execute<'a, T, R, G, S, C, Fut>(
        &self,
        update: OptimisticUpdate<'a, T, R, G, S, C>,
    ) -> OptimisticOutcome<R>
    where
        G: FnOnce() -> T,
        S: FnOnce(T),
        C: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<R>>,
    {
        let OptimisticUpdate {
            get_state,
            set_state,
            api_call,
            apply,
            on_success,
            error_message,
            ..
        } = update;

        let snapshot = get_state();
        if let Some(apply) = apply {
            apply();
        }

        match api_call().await {
            Ok(response) => {
                if let Some(on_success) = on_success {
                    on_success(&response);
                }
                OptimisticOutcome::Applied(response)
            }
            Err(error) => {
                set_state(snapshot);
                tracing::warn!(error = %error, "optimistic update rolled back");
                if let Some(message) = error_message {
                    self.notifier.notify(Notification::error(message));
                }
                OptimisticOutcome::RolledBack(error)
            }
        }
    }
}

impl std::fmt::Debug for OptimisticExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticExecutor").finish_non_exhaustive()
    }
}
