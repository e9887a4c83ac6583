//! Script realms.
//!
//! A window [`Realm`] is bound to a browsing context and an optional sandbox
//! name. Its protocol id changes on every cross-document navigation; the
//! realm is updated in place and pending wait tasks are rerun. Dedicated
//! workers are discovered as children of the window realm that owns them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::driver::BidiOptions;
use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, ListenerId, RealmId};
use crate::protocol::{
    EvaluateResult, LocalValue, ParsedEvent, RealmInfo, RealmType, RemoteValue, ResultOwnership,
    ScriptCommand, Target, names,
};
use crate::script::poller::POLLER_SOURCE;
use crate::script::{JsHandle, TaskManager, WaitForOptions, WaitTask};
use crate::transport::Connection;

use super::lifecycle::{Lifecycle, ListenerScope};

// ============================================================================
// Types
// ============================================================================

/// What a realm is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealmKind {
    /// Global of a browsing context, optionally sandboxed.
    Window {
        /// Owning context.
        context: BrowsingContextId,
        /// Sandbox name, `None` for the main world.
        sandbox: Option<String>,
    },
    /// Dedicated worker.
    DedicatedWorker {
        /// Realms that own the worker.
        owners: Vec<RealmId>,
    },
}

/// Realm events.
#[derive(Debug, Clone)]
pub enum RealmEvent {
    /// The realm got a new protocol id (cross-document navigation).
    Updated,
    /// A dedicated worker owned by this realm appeared.
    Worker(Realm),
    /// The realm was destroyed. Terminal.
    Destroyed {
        /// Why it was destroyed.
        reason: String,
    },
}

#[derive(Default)]
struct UtilityCache {
    generation: u64,
    handle: Option<JsHandle>,
}

// ============================================================================
// Realm
// ============================================================================

/// A script execution realm.
#[derive(Clone)]
pub struct Realm {
    inner: Arc<RealmInner>,
}

struct RealmInner {
    kind: RealmKind,
    connection: Connection,
    options: Arc<BidiOptions>,
    id: Mutex<Option<RealmId>>,
    origin: Mutex<String>,
    lifecycle: Lifecycle<RealmEvent>,
    tasks: TaskManager,
    utility: Mutex<UtilityCache>,
    workers: Mutex<Vec<Realm>>,
    scope: ListenerScope,
}

/// Non-owning reference held by handles and wait tasks.
#[derive(Clone)]
pub(crate) struct WeakRealm(Weak<RealmInner>);

impl WeakRealm {
    pub(crate) fn upgrade(&self) -> Option<Realm> {
        self.0.upgrade().map(|inner| Realm { inner })
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id())
            .field("kind", &self.inner.kind)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl Realm {
    pub(crate) fn window(
        context: BrowsingContextId,
        sandbox: Option<String>,
        connection: Connection,
        options: Arc<BidiOptions>,
    ) -> Self {
        let realm = Self::build(
            RealmKind::Window { context, sandbox },
            None,
            String::new(),
            connection,
            options,
        );

        let weak = realm.downgrade();
        realm.inner.scope.on(names::REALM_CREATED, move |event| {
            if let ParsedEvent::RealmCreated(info) = event
                && let Some(realm) = weak.upgrade()
            {
                realm.handle_created(info);
            }
        });

        let weak = realm.downgrade();
        realm.inner.scope.on(names::REALM_DESTROYED, move |event| {
            if let ParsedEvent::RealmDestroyed(info) = event
                && let Some(realm) = weak.upgrade()
                && realm.id().as_ref() == Some(&info.realm)
            {
                trace!(realm = %info.realm, "Window realm id retired");
                *realm.inner.id.lock() = None;
                realm.invalidate_utility();
            }
        });

        realm
    }

    pub(crate) fn worker(info: &RealmInfo, connection: Connection, options: Arc<BidiOptions>) -> Self {
        let realm = Self::build(
            RealmKind::DedicatedWorker {
                owners: info.owners.clone(),
            },
            Some(info.realm.clone()),
            info.origin.clone(),
            connection,
            options,
        );

        let weak = realm.downgrade();
        realm.inner.scope.on(names::REALM_DESTROYED, move |event| {
            if let ParsedEvent::RealmDestroyed(info) = event
                && let Some(realm) = weak.upgrade()
                && realm.id().as_ref() == Some(&info.realm)
            {
                realm.dispose("Realm already destroyed");
            }
        });

        realm
    }

    fn build(
        kind: RealmKind,
        id: Option<RealmId>,
        origin: String,
        connection: Connection,
        options: Arc<BidiOptions>,
    ) -> Self {
        Self {
            inner: Arc::new(RealmInner {
                kind,
                connection: connection.clone(),
                options,
                id: Mutex::new(id),
                origin: Mutex::new(origin),
                lifecycle: Lifecycle::new(),
                tasks: TaskManager::new(),
                utility: Mutex::new(UtilityCache::default()),
                workers: Mutex::new(Vec::new()),
                scope: ListenerScope::new(connection),
            }),
        }
    }

    fn handle_created(&self, info: &RealmInfo) {
        if !self.inner.lifecycle.is_open() {
            return;
        }
        let RealmKind::Window { context, sandbox } = &self.inner.kind else {
            return;
        };

        match info.kind {
            RealmType::Window
                if info.context.as_ref() == Some(context) && info.sandbox == *sandbox =>
            {
                self.update(info);
            }
            RealmType::DedicatedWorker => {
                let owned = self
                    .id()
                    .is_some_and(|id| info.owners.iter().any(|owner| owner == &id));
                if owned {
                    self.adopt_worker(info);
                }
            }
            _ => {}
        }
    }

    fn update(&self, info: &RealmInfo) {
        {
            let mut id = self.inner.id.lock();
            if id.as_ref() == Some(&info.realm) {
                return;
            }
            *id = Some(info.realm.clone());
        }
        *self.inner.origin.lock() = info.origin.clone();
        self.invalidate_utility();

        debug!(realm = %info.realm, origin = %info.origin, "Realm updated");
        self.inner.lifecycle.emit(&RealmEvent::Updated);
        self.inner.tasks.rerun_all();
    }

    fn adopt_worker(&self, info: &RealmInfo) {
        let worker = {
            let mut workers = self.inner.workers.lock();
            if workers.iter().any(|w| w.id().as_ref() == Some(&info.realm)) {
                return;
            }
            let worker = Realm::worker(
                info,
                self.inner.connection.clone(),
                Arc::clone(&self.inner.options),
            );
            workers.push(worker.clone());
            worker
        };

        let weak = Arc::downgrade(&self.inner);
        let worker_id = info.realm.clone();
        worker.on(move |event| {
            if let RealmEvent::Destroyed { .. } = event
                && let Some(inner) = weak.upgrade()
            {
                inner
                    .workers
                    .lock()
                    .retain(|w| w.id().as_ref() != Some(&worker_id));
            }
        });

        debug!(realm = %info.realm, "Dedicated worker attached");
        self.inner.lifecycle.emit(&RealmEvent::Worker(worker));
    }

    fn invalidate_utility(&self) {
        let mut cache = self.inner.utility.lock();
        cache.generation += 1;
        cache.handle = None;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the current protocol id, if known.
    #[must_use]
    pub fn id(&self) -> Option<RealmId> {
        self.inner.id.lock().clone()
    }

    /// Returns the realm kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &RealmKind {
        &self.inner.kind
    }

    /// Returns the serialized origin.
    #[must_use]
    pub fn origin(&self) -> String {
        self.inner.origin.lock().clone()
    }

    /// Returns the owning context for window realms.
    #[must_use]
    pub fn context_id(&self) -> Option<&BrowsingContextId> {
        match &self.inner.kind {
            RealmKind::Window { context, .. } => Some(context),
            RealmKind::DedicatedWorker { .. } => None,
        }
    }

    /// Returns the attached dedicated workers.
    #[must_use]
    pub fn workers(&self) -> Vec<Realm> {
        self.inner.workers.lock().clone()
    }

    /// Returns the number of pending wait tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Returns `true` once the realm is destroyed.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        !self.inner.lifecycle.is_open()
    }

    /// Returns why the realm was destroyed.
    #[must_use]
    pub fn destroyed_reason(&self) -> Option<String> {
        self.inner.lifecycle.reason()
    }

    /// Returns the options the tree was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BidiOptions {
        &self.inner.options
    }

    /// Registers an event listener.
    pub fn on(&self, listener: impl Fn(&RealmEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.lifecycle.on(listener)
    }

    /// Removes an event listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.lifecycle.off(id)
    }

    // ========================================================================
    // Script
    // ========================================================================

    /// Evaluates `expression`, awaiting promises, and returns plain JSON.
    ///
    /// # Errors
    ///
    /// - [`Error::RealmDestroyed`] if the realm is gone
    /// - [`Error::ScriptError`] if the script threw
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let (_, value) = self.evaluate_raw(expression, ResultOwnership::None).await?;
        Ok(value.to_json())
    }

    /// Evaluates `expression` and retains the result as a handle.
    ///
    /// # Errors
    ///
    /// See [`Realm::evaluate`].
    pub async fn evaluate_handle(&self, expression: &str) -> Result<JsHandle> {
        let (realm_id, value) = self.evaluate_raw(expression, ResultOwnership::Root).await?;
        Ok(JsHandle::new(self, realm_id, value))
    }

    /// Calls `function_declaration` with `args`, awaiting promises, and
    /// returns plain JSON.
    ///
    /// # Errors
    ///
    /// See [`Realm::evaluate`].
    pub async fn call_function(
        &self,
        function_declaration: &str,
        args: Vec<LocalValue>,
    ) -> Result<Value> {
        let value = self
            .call_function_raw(function_declaration, args, true, ResultOwnership::None)
            .await?;
        Ok(value.to_json())
    }

    /// Calls `function_declaration` and retains the result as a handle.
    ///
    /// # Errors
    ///
    /// See [`Realm::evaluate`].
    pub async fn call_function_handle(
        &self,
        function_declaration: &str,
        args: Vec<LocalValue>,
    ) -> Result<JsHandle> {
        let (realm_id, value) = self
            .call(function_declaration, args, true, ResultOwnership::Root)
            .await?;
        Ok(JsHandle::new(self, realm_id, value))
    }

    /// Calls `function_declaration` and returns the raw protocol value.
    ///
    /// # Errors
    ///
    /// See [`Realm::evaluate`].
    pub async fn call_function_raw(
        &self,
        function_declaration: &str,
        args: Vec<LocalValue>,
        await_promise: bool,
        ownership: ResultOwnership,
    ) -> Result<RemoteValue> {
        let (_, value) = self
            .call(function_declaration, args, await_promise, ownership)
            .await?;
        Ok(value)
    }

    /// Releases remote handles. A no-op once the realm is destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error if `script.disown` fails.
    pub async fn disown(&self, handles: Vec<String>) -> Result<()> {
        if handles.is_empty() || !self.inner.lifecycle.is_open() {
            return Ok(());
        }

        self.inner
            .connection
            .send(ScriptCommand::Disown {
                handles,
                target: self.target()?,
            })
            .await?;
        Ok(())
    }

    /// Returns the injected helper object used by pollers.
    ///
    /// Cached until the realm id changes.
    ///
    /// # Errors
    ///
    /// See [`Realm::evaluate`].
    pub async fn utility_handle(&self) -> Result<JsHandle> {
        let generation = {
            let cache = self.inner.utility.lock();
            if let Some(handle) = cache.handle.as_ref().filter(|h| h.is_valid()) {
                return Ok(handle.clone());
            }
            cache.generation
        };

        let handle = self.evaluate_handle(POLLER_SOURCE).await?;

        let mut cache = self.inner.utility.lock();
        if cache.generation == generation {
            cache.handle = Some(handle.clone());
        }
        Ok(handle)
    }

    /// Polls `function` until it returns a truthy value.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the wait timeout elapses
    /// - [`Error::FrameDetached`] / [`Error::RealmDestroyed`] if the realm goes away
    /// - [`Error::ScriptError`] if the predicate throws
    pub async fn wait_for_function(
        &self,
        function: &str,
        args: Vec<LocalValue>,
        options: WaitForOptions,
    ) -> Result<JsHandle> {
        self.spawn_wait_task(function, args, options)?.result().await
    }

    /// Starts a wait task without awaiting it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RealmDestroyed`] if the realm is gone.
    pub fn spawn_wait_task(
        &self,
        function: &str,
        args: Vec<LocalValue>,
        options: WaitForOptions,
    ) -> Result<WaitTask> {
        self.ensure_alive()?;
        Ok(WaitTask::spawn(self, function, args, options))
    }

    // ========================================================================
    // Internal
    // ========================================================================

    pub(crate) fn downgrade(&self) -> WeakRealm {
        WeakRealm(Arc::downgrade(&self.inner))
    }

    pub(crate) fn tasks(&self) -> &TaskManager {
        &self.inner.tasks
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.inner.lifecycle.is_open() {
            return Ok(());
        }
        Err(self.destroyed_error())
    }

    fn destroyed_error(&self) -> Error {
        Error::realm_destroyed(
            self.id().unwrap_or_else(|| RealmId::new("")),
            self.inner.lifecycle.reason().unwrap_or_default(),
        )
    }

    fn target(&self) -> Result<Target> {
        if let Some(realm) = self.id() {
            return Ok(Target::Realm { realm });
        }
        match &self.inner.kind {
            RealmKind::Window { context, sandbox } => Ok(Target::Context {
                context: context.clone(),
                sandbox: sandbox.clone(),
            }),
            RealmKind::DedicatedWorker { .. } => Err(self.destroyed_error()),
        }
    }

    /// Records the realm id reported by a script result.
    fn observe_id(&self, realm: &RealmId) {
        if let RealmKind::Window { .. } = self.inner.kind {
            let mut id = self.inner.id.lock();
            if id.is_none() {
                *id = Some(realm.clone());
            }
        }
    }

    async fn evaluate_raw(
        &self,
        expression: &str,
        ownership: ResultOwnership,
    ) -> Result<(RealmId, RemoteValue)> {
        self.ensure_alive()?;

        let command = ScriptCommand::Evaluate {
            expression: expression.to_string(),
            target: self.target()?,
            await_promise: true,
            result_ownership: Some(ownership),
            user_activation: None,
        };
        self.run(command).await
    }

    async fn call(
        &self,
        function_declaration: &str,
        args: Vec<LocalValue>,
        await_promise: bool,
        ownership: ResultOwnership,
    ) -> Result<(RealmId, RemoteValue)> {
        self.ensure_alive()?;

        let command = ScriptCommand::CallFunction {
            function_declaration: function_declaration.to_string(),
            target: self.target()?,
            await_promise,
            arguments: args,
            this: None,
            result_ownership: Some(ownership),
            user_activation: None,
        };
        self.run(command).await
    }

    async fn run(&self, command: ScriptCommand) -> Result<(RealmId, RemoteValue)> {
        let result = self.inner.connection.send(command).await?;
        let result: EvaluateResult = serde_json::from_value(result)?;

        let realm = result.realm().clone();
        self.observe_id(&realm);
        Ok((realm, result.into_result()?))
    }

    /// Disposes workers and terminates wait tasks, then emits
    /// [`RealmEvent::Destroyed`].
    pub(crate) fn dispose(&self, reason: &str) {
        let Some(guard) = self.inner.lifecycle.begin_close(reason) else {
            return;
        };
        trace!(realm = ?self.id(), %reason, "Disposing realm");
        self.invalidate_utility();

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            worker.dispose(reason);
        }

        let realm_id = self.id().unwrap_or_else(|| RealmId::new(""));
        match &self.inner.kind {
            RealmKind::Window { context, .. } => {
                let context = context.clone();
                self.inner
                    .tasks
                    .terminate_all(|| Error::frame_detached(context.clone()));
            }
            RealmKind::DedicatedWorker { .. } => {
                self.inner
                    .tasks
                    .terminate_all(|| Error::realm_destroyed(realm_id.clone(), reason));
            }
        }

        self.inner.scope.release();
        guard.finish(RealmEvent::Destroyed {
            reason: reason.to_string(),
        });
    }
}
