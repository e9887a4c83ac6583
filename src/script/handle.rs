//! Remote object handles.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::trace;

use crate::browser::Realm;
use crate::browser::realm::WeakRealm;
use crate::error::{Error, Result};
use crate::identifiers::RealmId;
use crate::protocol::{LocalValue, RemoteValue};

// ============================================================================
// JsHandle
// ============================================================================

/// A reference to a value retained in a realm.
///
/// Valid while the realm that produced it is alive and has not navigated
/// away.
#[derive(Clone)]
pub struct JsHandle {
    inner: Arc<JsHandleInner>,
}

struct JsHandleInner {
    realm: WeakRealm,
    realm_id: RealmId,
    remote: RemoteValue,
    disposed: AtomicBool,
}

impl fmt::Debug for JsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsHandle")
            .field("realm", &self.inner.realm_id)
            .field("type", &self.inner.remote.kind)
            .field("handle", &self.inner.remote.handle)
            .finish()
    }
}

impl JsHandle {
    pub(crate) fn new(realm: &Realm, realm_id: RealmId, remote: RemoteValue) -> Self {
        Self {
            inner: Arc::new(JsHandleInner {
                realm: realm.downgrade(),
                realm_id,
                remote,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the remote handle id, if the value was retained.
    #[inline]
    #[must_use]
    pub fn handle_id(&self) -> Option<&str> {
        self.inner.remote.handle.as_deref()
    }

    /// Returns the protocol value.
    #[inline]
    #[must_use]
    pub fn remote_value(&self) -> &RemoteValue {
        &self.inner.remote
    }

    /// Returns the id of the realm that produced the value.
    #[inline]
    #[must_use]
    pub fn realm_id(&self) -> &RealmId {
        &self.inner.realm_id
    }

    /// Returns the realm, if still alive.
    #[must_use]
    pub fn realm(&self) -> Option<Realm> {
        self.inner.realm.upgrade()
    }

    /// Returns `true` while the handle can be passed back to its realm.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.inner.disposed.load(Ordering::Acquire) {
            return false;
        }
        self.realm().is_some_and(|realm| {
            !realm.is_destroyed() && realm.id().as_ref() == Some(&self.inner.realm_id)
        })
    }

    /// Returns the value as a script argument.
    #[must_use]
    pub fn as_local_value(&self) -> LocalValue {
        match self.handle_id() {
            Some(handle) => LocalValue::handle(handle),
            None => LocalValue::from_json(&self.inner.remote.to_json()),
        }
    }

    /// Returns the value as plain JSON, fetching it when only a handle is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the realm is gone or the value cannot be fetched.
    pub async fn json_value(&self) -> Result<Value> {
        if self.handle_id().is_none() {
            return Ok(self.inner.remote.to_json());
        }
        self.evaluate("value => value", Vec::new()).await
    }

    /// Calls `function_declaration` with this handle as the first argument.
    ///
    /// # Errors
    ///
    /// - [`Error::RealmDestroyed`] if the realm is gone
    /// - [`Error::ScriptError`] if the function threw
    pub async fn evaluate(
        &self,
        function_declaration: &str,
        args: Vec<LocalValue>,
    ) -> Result<Value> {
        let realm = self.live_realm()?;

        let mut arguments = Vec::with_capacity(args.len() + 1);
        arguments.push(self.as_local_value());
        arguments.extend(args);
        realm.call_function(function_declaration, arguments).await
    }

    /// Releases the remote value. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if `script.disown` fails.
    pub async fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (Some(handle), Some(realm)) = (self.handle_id(), self.realm()) else {
            return Ok(());
        };
        if realm.id().as_ref() != Some(&self.inner.realm_id) {
            return Ok(());
        }

        trace!(%handle, realm = %self.inner.realm_id, "Disowning handle");
        realm.disown(vec![handle.to_string()]).await
    }

    fn live_realm(&self) -> Result<Realm> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::invalid_argument("Handle is disposed"));
        }
        let realm = self.realm().ok_or_else(|| {
            Error::realm_destroyed(self.inner.realm_id.clone(), "Realm already destroyed")
        })?;
        realm.ensure_alive()?;
        Ok(realm)
    }
}
