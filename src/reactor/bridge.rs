//! Dedicated scheduler thread with a synchronous call-in API.
//!
//! All protocol I/O of a bridged tree runs on one `bidi-reactor` thread.
//! Callers on any other thread submit jobs through a queue and block (or
//! await) on a per-job reply. Calls made from inside the reactor run inline.
//!
//! # Shutdown
//!
//! [`ReactorBridge::close`] is idempotent:
//!
//! 1. New submissions fail with [`Error::BridgeClosed`].
//! 2. Jobs still queued are rejected with [`Error::BridgeClosed`].
//! 3. Running jobs get the shutdown grace period, then are aborted and
//!    their callers receive [`Error::BridgeClosed`].
//! 4. The call returns after the reactor thread has exited.

// ============================================================================
// Imports
// ============================================================================

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Name of the reactor thread.
pub const REACTOR_THREAD_NAME: &str = "bidi-reactor";

thread_local! {
    static IN_REACTOR: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when called from a reactor thread.
///
/// Every thread of the reactor runtime counts, blocking-pool threads
/// included: `block_in_place` hands the worker core to a pool thread, so any
/// of them may be driving reactor tasks. Calling [`ReactorBridge::sync`] from
/// a pool thread runs the job inline there.
#[inline]
#[must_use]
pub fn in_reactor() -> bool {
    IN_REACTOR.with(Cell::get)
}

// ============================================================================
// Jobs
// ============================================================================

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Where a job's result goes.
enum Reply<T> {
    Blocking(std_mpsc::SyncSender<Result<T>>),
    Async(oneshot::Sender<Result<T>>),
}

impl<T> Reply<T> {
    fn send(self, result: Result<T>) {
        // A caller that gave up no longer needs the result.
        match self {
            Self::Blocking(tx) => {
                let _ = tx.send(result);
            }
            Self::Async(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// Type-erased unit of work.
trait Job: Send {
    fn run(self: Box<Self>) -> BoxFuture;
    fn reject(self: Box<Self>, error: Error);
}

struct Task<F, T> {
    job: F,
    reply: Reply<T>,
}

impl<F, Fut, T> Job for Task<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture {
        let Task { job, reply } = *self;
        Box::pin(async move { reply.send(job().await) })
    }

    fn reject(self: Box<Self>, error: Error) {
        self.reply.send(Err(error));
    }
}

enum BridgeMessage {
    Job(Box<dyn Job>),
    Shutdown,
}

// ============================================================================
// ReactorBridge
// ============================================================================

/// Owns the reactor thread and its job queue.
pub struct ReactorBridge {
    tx: mpsc::UnboundedSender<BridgeMessage>,
    closed: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    handle: Handle,
}

impl fmt::Debug for ReactorBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorBridge")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ReactorBridge - Lifecycle
// ============================================================================

impl ReactorBridge {
    /// Starts the reactor thread.
    ///
    /// `shutdown_grace` bounds how long running jobs may continue after
    /// [`ReactorBridge::close`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the runtime or thread cannot be created.
    pub fn spawn(shutdown_grace: Duration) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(REACTOR_THREAD_NAME)
            .on_thread_start(|| IN_REACTOR.with(|flag| flag.set(true)))
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let loop_closed = Arc::clone(&closed);
        let thread = thread::Builder::new()
            .name(REACTOR_THREAD_NAME.to_string())
            .spawn(move || run_reactor(runtime, rx, loop_closed, shutdown_grace))?;

        debug!("Reactor bridge started");

        Ok(Self {
            tx,
            closed,
            thread: Mutex::new(Some(thread)),
            handle,
        })
    }

    /// Returns `true` once [`ReactorBridge::close`] has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a handle to the reactor runtime.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Shuts the bridge down.
    ///
    /// Blocks until the reactor thread exits, unless called from the reactor
    /// itself, in which case shutdown is only signalled.
    pub fn close(&self) {
        self.signal_shutdown();

        if in_reactor() {
            return;
        }

        let thread = self.thread.lock().take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            warn!("Reactor thread panicked during shutdown");
        }
    }

    fn signal_shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Reactor bridge closing");
        let _ = self.tx.send(BridgeMessage::Shutdown);
    }
}

impl Drop for ReactorBridge {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

// ============================================================================
// ReactorBridge - Submission
// ============================================================================

impl ReactorBridge {
    /// Runs `job` on the reactor and blocks until it settles.
    ///
    /// Executes inline when already on the reactor.
    ///
    /// # Errors
    ///
    /// Returns the job's error, or [`Error::BridgeClosed`] if the bridge is
    /// closed or the job was aborted.
    pub fn sync<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if in_reactor() {
            let handle = Handle::current();
            return tokio::task::block_in_place(move || handle.block_on(job()));
        }

        let (tx, rx) = std_mpsc::sync_channel(1);
        self.submit(job, Reply::Blocking(tx))?;
        rx.recv().map_err(|_| Error::BridgeClosed)?
    }

    /// Runs `job` on the reactor from async code.
    ///
    /// # Errors
    ///
    /// See [`ReactorBridge::sync`].
    pub async fn run<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if in_reactor() {
            return job().await;
        }

        let (tx, rx) = oneshot::channel();
        self.submit(job, Reply::Async(tx))?;
        rx.await.map_err(|_| Error::BridgeClosed)?
    }

    fn submit<F, Fut, T>(&self, job: F, reply: Reply<T>) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::BridgeClosed);
        }

        let task: Box<dyn Job> = Box::new(Task { job, reply });
        self.tx
            .send(BridgeMessage::Job(task))
            .map_err(|_| Error::BridgeClosed)
    }
}

// ============================================================================
// Reactor Loop
// ============================================================================

fn run_reactor(
    runtime: Runtime,
    mut rx: mpsc::UnboundedReceiver<BridgeMessage>,
    closed: Arc<AtomicBool>,
    grace: Duration,
) {
    IN_REACTOR.with(|flag| flag.set(true));

    runtime.block_on(async move {
        let mut jobs = JoinSet::new();

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(BridgeMessage::Job(job)) => {
                        if closed.load(Ordering::Acquire) {
                            job.reject(Error::BridgeClosed);
                        } else {
                            jobs.spawn(job.run());
                        }
                    }
                    Some(BridgeMessage::Shutdown) | None => break,
                },
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined && e.is_panic() {
                        warn!("Bridge job panicked");
                    }
                }
            }
        }

        rx.close();
        let mut rejected = 0usize;
        while let Ok(message) = rx.try_recv() {
            if let BridgeMessage::Job(job) = message {
                job.reject(Error::BridgeClosed);
                rejected += 1;
            }
        }

        let running = jobs.len();
        trace!(rejected, running, "Draining reactor");

        let drain = async { while jobs.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(remaining = jobs.len(), "Aborting bridge jobs after grace period");
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}
        }
    });

    runtime.shutdown_timeout(grace);
    debug!("Reactor bridge stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn bridge() -> ReactorBridge {
        ReactorBridge::spawn(Duration::from_millis(200)).expect("spawn bridge")
    }

    #[test]
    fn test_sync_returns_job_result() {
        let bridge = bridge();
        let value = bridge.sync(|| async { Ok(21 * 2) }).expect("job");
        assert_eq!(value, 42);
        bridge.close();
    }

    #[test]
    fn test_jobs_run_on_reactor_thread() {
        let bridge = bridge();
        let inside = bridge.sync(|| async { Ok(in_reactor()) }).expect("job");
        assert!(inside);
        assert!(!in_reactor());
        bridge.close();
    }

    #[test]
    fn test_sync_propagates_job_error() {
        let bridge = bridge();
        let err = bridge
            .sync(|| async { Err::<(), _>(Error::invalid_argument("nope")) })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        bridge.close();
    }

    #[test]
    fn test_nested_sync_runs_inline() {
        let bridge = Arc::new(bridge());
        let inner = Arc::clone(&bridge);
        let value = bridge
            .sync(move || async move { inner.sync(|| async { Ok(7) }) })
            .expect("nested job");
        assert_eq!(value, 7);
        bridge.close();
    }

    #[test]
    fn test_sync_from_blocking_pool_thread() {
        let bridge = Arc::new(bridge());
        let inner = Arc::clone(&bridge);
        let (inside, value) = bridge
            .sync(move || async move {
                tokio::task::spawn_blocking(move || {
                    let value = inner.sync(|| async { Ok(5) });
                    (in_reactor(), value)
                })
                .await
                .map_err(|_| Error::BridgeClosed)
            })
            .expect("blocking job");

        assert!(inside);
        assert_eq!(value.expect("nested job"), 5);
        bridge.close();
    }

    #[test]
    fn test_submit_after_close_fails_fast() {
        let bridge = bridge();
        bridge.close();
        bridge.close();

        assert!(bridge.is_closed());
        let err = bridge.sync(|| async { Ok(()) }).unwrap_err();
        assert!(matches!(err, Error::BridgeClosed));
    }

    #[test]
    fn test_close_aborts_jobs_past_grace() {
        let bridge = Arc::new(ReactorBridge::spawn(Duration::from_millis(20)).expect("spawn"));
        let worker = Arc::clone(&bridge);

        let caller = thread::spawn(move || {
            worker.sync(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        });

        thread::sleep(Duration::from_millis(50));
        bridge.close();

        let result = caller.join().expect("caller thread");
        assert!(matches!(result, Err(Error::BridgeClosed)));
    }

    #[test]
    fn test_close_lets_short_jobs_finish() {
        let bridge = Arc::new(bridge());
        let finished = Arc::new(AtomicUsize::new(0));

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                let finished = Arc::clone(&finished);
                thread::spawn(move || {
                    bridge.sync(move || async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(5));
        bridge.close();

        for caller in callers {
            let result = caller.join().expect("caller thread");
            assert!(result.is_ok() || matches!(result, Err(Error::BridgeClosed)));
        }
        assert!(finished.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_run_from_foreign_runtime() {
        let bridge = Arc::new(bridge());
        let value = bridge.run(|| async { Ok(in_reactor()) }).await.expect("job");
        assert!(value);

        let closer = Arc::clone(&bridge);
        tokio::task::spawn_blocking(move || closer.close())
            .await
            .expect("close");
    }
}
