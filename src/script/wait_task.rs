//! Predicate polling with retry across execution context changes.
//!
//! A [`WaitTask`] installs a poller in its realm and awaits the first truthy
//! predicate result. Each installation is an attempt tagged with a
//! generation number:
//!
//! - a realm update reruns the task, superseding the running attempt
//! - a recoverable error (execution context replaced mid round trip)
//!   schedules a new attempt after a short delay
//! - only the latest attempt may settle the task
//!
//! The task settles exactly once: with the predicate result, a fatal error,
//! the timeout, an abort, or a termination from its realm.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::browser::Realm;
use crate::browser::realm::WeakRealm;
use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, WaitTaskId};
use crate::protocol::{LocalValue, ResultOwnership};

use super::handle::JsHandle;
use super::poller::{AWAIT_POLLER, CREATE_POLLER, Polling, STOP_POLLER};

// ============================================================================
// Constants
// ============================================================================

/// Delay before retrying after a recoverable error.
const RECOVERY_DELAY: Duration = Duration::from_millis(10);

// ============================================================================
// WaitForOptions
// ============================================================================

/// Options for `wait_for_function`.
#[derive(Debug, Clone, Default)]
pub struct WaitForOptions {
    /// Polling strategy.
    pub polling: Polling,
    /// Timeout. `None` uses the configured wait timeout, zero disables it.
    pub timeout: Option<Duration>,
    /// Root node observed by [`Polling::Mutation`].
    pub root: Option<JsHandle>,
}

impl WaitForOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the polling strategy.
    #[must_use]
    pub fn with_polling(mut self, polling: Polling) -> Self {
        self.polling = polling;
        self
    }

    /// Sets the timeout. Zero disables it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the mutation root.
    #[must_use]
    pub fn with_root(mut self, root: JsHandle) -> Self {
        self.root = Some(root);
        self
    }
}

// ============================================================================
// Attempt State
// ============================================================================

/// Generation bookkeeping of a wait task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TaskState {
    generation: u64,
    settled: bool,
}

impl TaskState {
    /// Starts a new attempt, superseding the current one.
    pub(crate) fn begin_attempt(&mut self) -> Option<u64> {
        if self.settled {
            return None;
        }
        self.generation += 1;
        Some(self.generation)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        !self.settled && self.generation == generation
    }

    /// Settles on behalf of an attempt. Fails for superseded attempts.
    pub(crate) fn accept(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.settled = true;
        true
    }

    /// Settles regardless of attempt.
    pub(crate) fn settle(&mut self) -> bool {
        if self.settled {
            return false;
        }
        self.settled = true;
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled
    }
}

/// How an attempt failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Retry silently.
    Recoverable,
    /// Settle the task with the error.
    Fatal,
}

pub(crate) fn classify(error: &Error) -> ErrorClass {
    if error.is_recoverable() {
        ErrorClass::Recoverable
    } else {
        ErrorClass::Fatal
    }
}

fn is_detached_frame(error: &Error) -> bool {
    let text = match error {
        Error::Protocol { message, .. } | Error::ScriptError { message } => message,
        _ => return false,
    };
    text.contains("detached frame")
}

// ============================================================================
// WaitTask
// ============================================================================

/// A pending predicate wait.
#[derive(Clone)]
pub struct WaitTask {
    inner: Arc<WaitTaskInner>,
}

struct WaitTaskInner {
    id: WaitTaskId,
    realm: WeakRealm,
    context: Option<BrowsingContextId>,
    function: String,
    args: Vec<LocalValue>,
    polling: Polling,
    root: Option<JsHandle>,
    state: Mutex<TaskState>,
    attempt: Mutex<Option<(u64, JoinHandle<()>)>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<(u64, JsHandle)>>,
    result_tx: Mutex<Option<oneshot::Sender<Result<JsHandle>>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Result<JsHandle>>>>,
}

impl fmt::Debug for WaitTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitTask")
            .field("id", &self.inner.id)
            .field("polling", &self.inner.polling)
            .field("state", &*self.inner.state.lock())
            .finish_non_exhaustive()
    }
}

impl WaitTask {
    /// Registers a task with `realm` and starts the first attempt.
    pub(crate) fn spawn(
        realm: &Realm,
        function: &str,
        args: Vec<LocalValue>,
        options: WaitForOptions,
    ) -> Self {
        let (result_tx, result_rx) = oneshot::channel();
        let timeout = options.timeout.unwrap_or(realm.options().wait_timeout);

        let task = Self {
            inner: Arc::new(WaitTaskInner {
                id: WaitTaskId::generate(),
                realm: realm.downgrade(),
                context: realm.context_id().cloned(),
                function: function.to_string(),
                args,
                polling: options.polling,
                root: options.root,
                state: Mutex::new(TaskState::default()),
                attempt: Mutex::new(None),
                timer: Mutex::new(None),
                poller: Mutex::new(None),
                result_tx: Mutex::new(Some(result_tx)),
                result_rx: Mutex::new(Some(result_rx)),
            }),
        };

        realm.tasks().add(task.clone());
        debug!(task = %task.id(), polling = %task.inner.polling, "Wait task started");

        if !timeout.is_zero() {
            let weak = Arc::downgrade(&task.inner);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    WaitTask { inner }.terminate(Error::timeout(
                        "Waiting failed",
                        timeout.as_millis() as u64,
                    ));
                }
            });
            *task.inner.timer.lock() = Some(timer);
        }

        task.rerun();
        task
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Returns the task id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> WaitTaskId {
        self.inner.id
    }

    /// Returns `true` until the task settles.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.inner.state.lock().is_settled()
    }

    /// Waits for the outcome. Can be awaited once.
    ///
    /// # Errors
    ///
    /// Returns the error the task settled with, or
    /// [`Error::InvalidArgument`] if the result was already taken.
    pub async fn result(&self) -> Result<JsHandle> {
        let rx = self
            .inner
            .result_rx
            .lock()
            .take()
            .ok_or_else(|| Error::invalid_argument("Wait task result already taken"))?;
        rx.await?
    }

    /// Rejects the task with [`Error::Aborted`].
    pub fn abort(&self) {
        self.terminate(Error::aborted("Waiting"));
    }

    /// Starts a new attempt, superseding the running one.
    pub fn rerun(&self) {
        self.start_attempt(Duration::ZERO);
    }

    /// Settles the task with `error` unless already settled.
    pub fn terminate(&self, error: Error) {
        if self.inner.state.lock().settle() {
            self.finish(Err(error));
        }
    }

    // ========================================================================
    // Attempts
    // ========================================================================

    fn start_attempt(&self, delay: Duration) {
        let Some(generation) = self.inner.state.lock().begin_attempt() else {
            return;
        };
        trace!(task = %self.inner.id, generation, "Starting attempt");
        self.release_poller();

        let task = self.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = task.run_attempt(generation).await;
            task.on_attempt_done(generation, outcome);
        });

        let previous = self.inner.attempt.lock().replace((generation, handle));
        if let Some((_, previous)) = previous {
            previous.abort();
        }
    }

    async fn run_attempt(&self, generation: u64) -> Result<JsHandle> {
        let realm = self.live_realm()?;
        let utility = realm.utility_handle().await?;

        let root = self
            .inner
            .root
            .as_ref()
            .map_or(LocalValue::Null, JsHandle::as_local_value);
        let mut arguments = vec![
            utility.as_local_value(),
            root,
            LocalValue::from(self.inner.function.as_str()),
            self.inner.polling.to_local_value(),
        ];
        arguments.extend(self.inner.args.iter().cloned());

        let poller = realm.call_function_handle(CREATE_POLLER, arguments).await?;
        {
            let state = self.inner.state.lock();
            if !state.is_current(generation) {
                drop(state);
                release_in_background(poller);
                return Err(Error::aborted("Superseded attempt"));
            }
            *self.inner.poller.lock() = Some((generation, poller.clone()));
        }

        realm
            .call_function_handle(AWAIT_POLLER, vec![poller.as_local_value()])
            .await
    }

    fn on_attempt_done(&self, generation: u64, outcome: Result<JsHandle>) {
        match outcome {
            Ok(handle) => {
                if self.inner.state.lock().accept(generation) {
                    self.finish(Ok(handle));
                } else {
                    release_in_background(handle);
                }
            }
            Err(e) => match classify(&e) {
                ErrorClass::Recoverable => {
                    if self.inner.state.lock().is_current(generation) {
                        debug!(task = %self.inner.id, error = %e, "Retrying after recoverable error");
                        self.start_attempt(RECOVERY_DELAY);
                    }
                }
                ErrorClass::Fatal => {
                    if self.inner.state.lock().accept(generation) {
                        self.finish(Err(self.map_fatal(e)));
                    }
                }
            },
        }
    }

    fn map_fatal(&self, error: Error) -> Error {
        match (&self.inner.context, is_detached_frame(&error)) {
            (Some(context), true) => Error::frame_detached(context.clone()),
            _ => error,
        }
    }

    fn live_realm(&self) -> Result<Realm> {
        let realm = self.inner.realm.upgrade().ok_or_else(|| match &self.inner.context {
            Some(context) => Error::frame_detached(context.clone()),
            None => Error::aborted("Waiting"),
        })?;
        realm.ensure_alive()?;
        Ok(realm)
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    fn finish(&self, outcome: Result<JsHandle>) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
        if let Some((_, attempt)) = self.inner.attempt.lock().take() {
            attempt.abort();
        }
        self.release_poller();

        if let Some(realm) = self.inner.realm.upgrade() {
            realm.tasks().delete(self.inner.id);
        }

        match &outcome {
            Ok(_) => debug!(task = %self.inner.id, "Wait task resolved"),
            Err(e) => debug!(task = %self.inner.id, error = %e, "Wait task rejected"),
        }
        if let Some(tx) = self.inner.result_tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    fn release_poller(&self) {
        if let Some((_, poller)) = self.inner.poller.lock().take() {
            release_in_background(poller);
        }
    }
}

/// Stops and disowns a poller without blocking the caller.
fn release_in_background(handle: JsHandle) {
    if !handle.is_valid() {
        return;
    }
    spawn_detached(async move {
        if let Some(realm) = handle.realm() {
            let _ = realm
                .call_function_raw(
                    STOP_POLLER,
                    vec![handle.as_local_value()],
                    true,
                    ResultOwnership::None,
                )
                .await;
        }
        let _ = handle.dispose().await;
    });
}

fn spawn_detached(future: impl Future<Output = ()> + Send + 'static) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(future);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_latest_attempt_wins() {
        let mut state = TaskState::default();
        let first = state.begin_attempt().unwrap();
        let second = state.begin_attempt().unwrap();

        assert!(!state.accept(first));
        assert!(state.accept(second));
        assert!(state.is_settled());
        assert_eq!(state.begin_attempt(), None);
    }

    #[test]
    fn test_settle_once() {
        let mut state = TaskState::default();
        let attempt = state.begin_attempt().unwrap();
        assert!(state.settle());
        assert!(!state.settle());
        assert!(!state.accept(attempt));
    }

    #[test]
    fn test_classify() {
        let recoverable =
            Error::protocol_error("script.callFunction", "no such frame", "Frame gone");
        assert_eq!(classify(&recoverable), ErrorClass::Recoverable);

        let context_gone = Error::script_error("Error: Execution context was destroyed");
        assert_eq!(classify(&context_gone), ErrorClass::Recoverable);

        let detached =
            Error::script_error("Execution context is not available in detached frame");
        assert_eq!(classify(&detached), ErrorClass::Fatal);
        assert!(is_detached_frame(&detached));

        assert_eq!(
            classify(&Error::script_error("TypeError: x is undefined")),
            ErrorClass::Fatal
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Begin,
        Complete(usize),
        Terminate,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Begin),
            3 => (0usize..8).prop_map(Op::Complete),
            1 => Just(Op::Terminate),
        ]
    }

    proptest! {
        #[test]
        fn settles_at_most_once_and_only_from_latest(ops in prop::collection::vec(op(), 0..40)) {
            let mut state = TaskState::default();
            let mut begun: Vec<u64> = Vec::new();
            let mut settlements = 0usize;

            for op in ops {
                match op {
                    Op::Begin => {
                        if let Some(generation) = state.begin_attempt() {
                            begun.push(generation);
                        }
                    }
                    Op::Complete(index) => {
                        if let Some(&generation) = begun.get(index) {
                            let latest = begun.last().copied();
                            if state.accept(generation) {
                                settlements += 1;
                                prop_assert_eq!(Some(generation), latest);
                            }
                        }
                    }
                    Op::Terminate => {
                        if state.settle() {
                            settlements += 1;
                        }
                    }
                }
            }

            prop_assert!(settlements <= 1);
            prop_assert_eq!(settlements == 1, state.is_settled());
        }
    }
}
