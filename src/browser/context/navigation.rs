//! Navigation tracking and the navigation waiter.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, ListenerId, NavigationId};

use super::{BrowsingContext, BrowsingContextEvent};

// ============================================================================
// Navigation
// ============================================================================

/// Terminal outcome of a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The document finished loading.
    Loaded,
    /// The navigation completed as a same-document fragment change.
    Fragment,
    /// The navigation failed.
    Failed,
    /// The navigation was aborted, or its context went away.
    Aborted,
}

/// One navigation attempt, created on `browsingContext.navigationStarted`.
///
/// Settles exactly once.
#[derive(Clone)]
pub struct Navigation {
    inner: Arc<NavigationInner>,
}

struct NavigationInner {
    id: Option<NavigationId>,
    url: String,
    outcome: watch::Sender<Option<NavigationOutcome>>,
}

impl fmt::Debug for Navigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigation")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl Navigation {
    pub(crate) fn new(id: Option<NavigationId>, url: impl Into<String>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(NavigationInner {
                id,
                url: url.into(),
                outcome,
            }),
        }
    }

    /// Returns the navigation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&NavigationId> {
        self.inner.id.as_ref()
    }

    /// Returns the URL the navigation started with.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the outcome, if settled.
    #[must_use]
    pub fn outcome(&self) -> Option<NavigationOutcome> {
        *self.inner.outcome.borrow()
    }

    /// Returns `true` once settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.outcome().is_some()
    }

    /// Waits for the outcome.
    pub async fn settled(&self) -> NavigationOutcome {
        let mut rx = self.inner.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.unwrap_or(NavigationOutcome::Aborted),
            Err(_) => NavigationOutcome::Aborted,
        }
    }

    /// Records the outcome. Returns `false` if already settled.
    pub(crate) fn settle(&self, outcome: NavigationOutcome) -> bool {
        let settled = self.inner.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
        if settled {
            trace!(navigation = ?self.inner.id, ?outcome, "Navigation settled");
        }
        settled
    }
}

// ============================================================================
// Results
// ============================================================================

/// Response of `browsingContext.navigate` and `browsingContext.reload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigateResult {
    /// Navigation id, absent for same-document navigations.
    pub navigation: Option<NavigationId>,
    /// Final URL.
    pub url: String,
}

/// A completed full navigation.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    /// The navigation that completed.
    pub navigation: Navigation,
    /// URL after completion.
    pub url: String,
}

/// Event that completes a full navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    /// `load`.
    #[default]
    Load,
    /// `DOMContentLoaded`.
    DomContentLoaded,
}

// ============================================================================
// Waiter State Machine
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum Signal {
    Started(Navigation),
    History { url: String },
    Fragment { navigation: Option<NavigationId>, url: String },
    DomContentLoaded { navigation: Option<NavigationId>, url: String },
    Load { navigation: Option<NavigationId>, url: String },
    Failed { navigation: Option<NavigationId>, url: String },
    Aborted { navigation: Option<NavigationId>, url: String },
    Closed { reason: String },
}

impl Signal {
    fn from_event(event: &BrowsingContextEvent) -> Option<Self> {
        let signal = match event {
            BrowsingContextEvent::Navigation(navigation) => Self::Started(navigation.clone()),
            BrowsingContextEvent::HistoryUpdated { url } => Self::History { url: url.clone() },
            BrowsingContextEvent::FragmentNavigated(info) => Self::Fragment {
                navigation: info.navigation.clone(),
                url: info.url.clone(),
            },
            BrowsingContextEvent::DomContentLoaded(info) => Self::DomContentLoaded {
                navigation: info.navigation.clone(),
                url: info.url.clone(),
            },
            BrowsingContextEvent::Load(info) => Self::Load {
                navigation: info.navigation.clone(),
                url: info.url.clone(),
            },
            BrowsingContextEvent::NavigationFailed(info) => Self::Failed {
                navigation: info.navigation.clone(),
                url: info.url.clone(),
            },
            BrowsingContextEvent::NavigationAborted(info) => Self::Aborted {
                navigation: info.navigation.clone(),
                url: info.url.clone(),
            },
            BrowsingContextEvent::Closed { reason } => Self::Closed {
                reason: reason.clone(),
            },
            _ => return None,
        };
        Some(signal)
    }
}

#[derive(Debug)]
pub(crate) enum Step {
    Pending,
    Done(Option<NavigationResult>),
    Fail(Error),
}

/// Idle until a navigation starts, then tracks that navigation.
#[derive(Debug)]
pub(crate) struct WaiterState {
    context: BrowsingContextId,
    wait_until: WaitUntil,
    started: Option<Navigation>,
}

impl WaiterState {
    pub(crate) fn new(context: BrowsingContextId, wait_until: WaitUntil) -> Self {
        Self {
            context,
            wait_until,
            started: None,
        }
    }

    fn is_current(&self, id: Option<&NavigationId>) -> bool {
        self.started
            .as_ref()
            .is_some_and(|navigation| navigation.id() == id)
    }

    pub(crate) fn step(&mut self, signal: Signal) -> Step {
        if let Signal::Closed { reason } = signal {
            return Step::Fail(Error::context_closed(self.context.clone(), reason));
        }

        let Some(started) = self.started.clone() else {
            return match signal {
                Signal::Started(navigation) => {
                    self.started = Some(navigation);
                    Step::Pending
                }
                Signal::History { .. } | Signal::Fragment { .. } => Step::Done(None),
                _ => Step::Pending,
            };
        };

        match signal {
            Signal::Started(navigation) => {
                self.started = Some(navigation);
                Step::Pending
            }
            Signal::Fragment { navigation, .. } if self.is_current(navigation.as_ref()) => {
                Step::Done(None)
            }
            Signal::Failed { navigation, url } if self.is_current(navigation.as_ref()) => {
                Step::Fail(Error::navigation_failed(url))
            }
            Signal::Aborted { navigation, url } if self.is_current(navigation.as_ref()) => {
                Step::Fail(Error::navigation_aborted(url))
            }
            Signal::Load { navigation, url }
                if self.wait_until == WaitUntil::Load && self.is_current(navigation.as_ref()) =>
            {
                Step::Done(Some(NavigationResult {
                    navigation: started,
                    url,
                }))
            }
            Signal::DomContentLoaded { navigation, url }
                if self.wait_until == WaitUntil::DomContentLoaded
                    && self.is_current(navigation.as_ref()) =>
            {
                Step::Done(Some(NavigationResult {
                    navigation: started,
                    url,
                }))
            }
            _ => Step::Pending,
        }
    }
}

// ============================================================================
// NavigationWatcher
// ============================================================================

/// Waits for the next navigation of a browsing context to settle.
///
/// Events are observed from the moment the watcher is created, so a watcher
/// created before issuing a navigation cannot miss it.
pub struct NavigationWatcher {
    context: BrowsingContext,
    listener: ListenerId,
    signals: mpsc::UnboundedReceiver<Signal>,
    state: WaiterState,
    timeout: Duration,
}

impl fmt::Debug for NavigationWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationWatcher")
            .field("context", self.context.id())
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl NavigationWatcher {
    pub(crate) fn new(context: &BrowsingContext, wait_until: WaitUntil, timeout: Duration) -> Self {
        let (tx, signals) = mpsc::unbounded_channel();
        let listener = context.on(move |event| {
            if let Some(signal) = Signal::from_event(event) {
                let _ = tx.send(signal);
            }
        });

        Self {
            context: context.clone(),
            listener,
            signals,
            state: WaiterState::new(context.id().clone(), wait_until),
            timeout,
        }
    }

    /// Resolves when the navigation settles.
    ///
    /// Returns `None` for same-document navigations.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] after the navigation timeout
    /// - [`Error::BrowsingContextClosed`] if the context closes first
    /// - [`Error::NavigationFailed`] / [`Error::NavigationAborted`]
    pub async fn wait(mut self) -> Result<Option<NavigationResult>> {
        let timeout = self.timeout;
        let context = self.context.clone();

        let run = async {
            while let Some(signal) = self.signals.recv().await {
                match self.state.step(signal) {
                    Step::Pending => {}
                    Step::Done(result) => return Ok(result),
                    Step::Fail(e) => return Err(e),
                }
            }
            Err(Error::context_closed(
                context.id().clone(),
                context.closed_reason().unwrap_or_default(),
            ))
        };

        if timeout.is_zero() {
            return run.await;
        }
        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| Error::timeout("Navigation", timeout.as_millis() as u64))?
    }
}

impl Drop for NavigationWatcher {
    fn drop(&mut self) {
        self.context.off(self.listener);
    }
}

// ============================================================================
// Tests
// ============================================================================
