//! Forwarding proxies bound to a [`ReactorBridge`].
//!
//! A [`Synced<T>`] never exposes its target for direct async use. Every
//! operation is shipped to the reactor and its result is wrapped again via
//! [`IntoSynced`], so objects reached through a proxy stay bound to the same
//! bridge.
//!
//! # Example
//!
//! ```no_run
//! use bidi_webdriver::Driver;
//! use bidi_webdriver::protocol::ReadinessState;
//!
//! # fn example() -> bidi_webdriver::Result<()> {
//! let driver = Driver::builder()
//!     .ws_url("ws://127.0.0.1:9222/session")
//!     .build()?;
//!
//! let browser = driver.connect_sync()?;
//! for context in browser.browsing_contexts() {
//!     context.navigate("https://example.com", ReadinessState::Complete)?;
//! }
//! browser.close()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::browser::{
    Browser, BrowsingContext, CreateContextOptions, NavigateResult, Navigation,
    NavigationResult, Realm, SessionStatus, UserContext, WaitUntil,
};
use crate::error::Result;
use crate::identifiers::{
    BrowsingContextId, NavigationId, PreloadScriptId, RealmId, SessionId, SubscriptionId,
    UserContextId,
};
use crate::protocol::{
    CreateType, LocalValue, ReadinessState, RemoteValue, ScreenshotOrigin, Viewport,
};
use crate::script::{JsHandle, WaitForOptions};

use super::bridge::ReactorBridge;

// ============================================================================
// IntoSynced
// ============================================================================

/// Conversion of a bridged call's result into its proxied form.
pub trait IntoSynced {
    /// The proxied form.
    type Output;

    /// Binds `self` to `bridge`.
    fn into_synced(self, bridge: &Arc<ReactorBridge>) -> Self::Output;
}

macro_rules! plain_synced {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoSynced for $ty {
                type Output = $ty;

                #[inline]
                fn into_synced(self, _bridge: &Arc<ReactorBridge>) -> Self::Output {
                    self
                }
            }
        )*
    };
}

plain_synced!(
    (),
    bool,
    u8,
    usize,
    i64,
    f64,
    String,
    Value,
    RemoteValue,
    NavigateResult,
    NavigationResult,
    Navigation,
    SessionStatus,
    SessionId,
    UserContextId,
    BrowsingContextId,
    RealmId,
    NavigationId,
    PreloadScriptId,
    SubscriptionId,
);

macro_rules! proxied_synced {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoSynced for $ty {
                type Output = Synced<$ty>;

                #[inline]
                fn into_synced(self, bridge: &Arc<ReactorBridge>) -> Self::Output {
                    Synced::new(self, Arc::clone(bridge))
                }
            }
        )*
    };
}

proxied_synced!(Browser, UserContext, BrowsingContext, Realm, JsHandle);

impl<T: IntoSynced> IntoSynced for Vec<T> {
    type Output = Vec<T::Output>;

    fn into_synced(self, bridge: &Arc<ReactorBridge>) -> Self::Output {
        self.into_iter().map(|item| item.into_synced(bridge)).collect()
    }
}

impl<T: IntoSynced> IntoSynced for Option<T> {
    type Output = Option<T::Output>;

    fn into_synced(self, bridge: &Arc<ReactorBridge>) -> Self::Output {
        self.map(|item| item.into_synced(bridge))
    }
}

// ============================================================================
// Synced
// ============================================================================

/// Synchronous proxy over a tree object.
#[derive(Clone)]
pub struct Synced<T> {
    target: T,
    bridge: Arc<ReactorBridge>,
    owning: bool,
}

impl<T: fmt::Debug> fmt::Debug for Synced<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synced")
            .field("target", &self.target)
            .field("owning", &self.owning)
            .finish()
    }
}

impl<T> Synced<T> {
    pub(crate) fn new(target: T, bridge: Arc<ReactorBridge>) -> Self {
        Self {
            target,
            bridge,
            owning: false,
        }
    }

    /// Creates a proxy that tears `bridge` down when closed.
    pub(crate) fn owning(target: T, bridge: Arc<ReactorBridge>) -> Self {
        Self {
            target,
            bridge,
            owning: true,
        }
    }

    /// Returns the bridge this proxy forwards to.
    #[inline]
    #[must_use]
    pub fn bridge(&self) -> &Arc<ReactorBridge> {
        &self.bridge
    }

    /// Returns `true` if closing this proxy also closes the bridge.
    #[inline]
    #[must_use]
    pub fn is_owning(&self) -> bool {
        self.owning
    }

    /// Reads local state without a round trip.
    pub fn read<R: IntoSynced>(&self, f: impl FnOnce(&T) -> R) -> R::Output {
        f(&self.target).into_synced(&self.bridge)
    }
}

impl<T> Synced<T>
where
    T: Clone + Send + 'static,
{
    /// Runs an async operation against the target on the reactor.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or [`crate::Error::BridgeClosed`].
    pub fn call<F, Fut, R>(&self, f: F) -> Result<R::Output>
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: IntoSynced + Send + 'static,
    {
        let target = self.target.clone();
        let value = self.bridge.sync(move || f(target))?;
        Ok(value.into_synced(&self.bridge))
    }

    fn teardown(&self) {
        if self.owning {
            self.bridge.close();
        }
    }
}

// ============================================================================
// Synced<Browser>
// ============================================================================

impl Synced<Browser> {
    /// See [`Browser::browser_name`].
    #[must_use]
    pub fn browser_name(&self) -> String {
        self.read(Browser::browser_name)
    }

    /// See [`Browser::browser_version`].
    #[must_use]
    pub fn browser_version(&self) -> String {
        self.read(Browser::browser_version)
    }

    /// See [`Browser::user_contexts`].
    #[must_use]
    pub fn user_contexts(&self) -> Vec<Synced<UserContext>> {
        self.read(Browser::user_contexts)
    }

    /// See [`Browser::user_context`].
    #[must_use]
    pub fn user_context(&self, id: &UserContextId) -> Option<Synced<UserContext>> {
        self.read(|browser| browser.user_context(id))
    }

    /// See [`Browser::default_user_context`].
    #[must_use]
    pub fn default_user_context(&self) -> Option<Synced<UserContext>> {
        self.read(Browser::default_user_context)
    }

    /// See [`Browser::browsing_contexts`].
    #[must_use]
    pub fn browsing_contexts(&self) -> Vec<Synced<BrowsingContext>> {
        self.read(Browser::browsing_contexts)
    }

    /// See [`Browser::is_closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read(Browser::is_closed)
    }

    /// See [`Browser::closed_reason`].
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.read(Browser::closed_reason)
    }

    /// See [`crate::browser::Session::status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn status(&self) -> Result<SessionStatus> {
        self.call(|browser| async move { browser.session().status().await })
    }

    /// See [`Browser::create_user_context`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn create_user_context(&self) -> Result<Synced<UserContext>> {
        self.call(|browser| async move { browser.create_user_context().await })
    }

    /// See [`Browser::add_preload_script`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn add_preload_script(
        &self,
        function_declaration: &str,
        sandbox: Option<&str>,
    ) -> Result<PreloadScriptId> {
        let declaration = function_declaration.to_string();
        let sandbox = sandbox.map(str::to_string);
        self.call(move |browser| async move {
            browser
                .add_preload_script(&declaration, sandbox.as_deref())
                .await
        })
    }

    /// See [`Browser::remove_preload_script`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn remove_preload_script(&self, script: &PreloadScriptId) -> Result<()> {
        let script = script.clone();
        self.call(move |browser| async move { browser.remove_preload_script(&script).await })
    }

    /// Closes the browser; an owning proxy also closes the bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if `browser.close` fails. The bridge is closed
    /// regardless.
    pub fn close(&self) -> Result<()> {
        let result = self.call(|browser| async move { browser.close().await });
        self.teardown();
        result
    }

    /// Ends the session; an owning proxy also closes the bridge.
    pub fn disconnect(&self) {
        let _ = self.call(|browser| async move {
            browser.disconnect().await;
            Ok(())
        });
        self.teardown();
    }
}

// ============================================================================
// Synced<UserContext>
// ============================================================================

impl Synced<UserContext> {
    /// See [`UserContext::id`].
    #[must_use]
    pub fn id(&self) -> UserContextId {
        self.read(|context| context.id().clone())
    }

    /// See [`UserContext::is_default`].
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.read(UserContext::is_default)
    }

    /// See [`UserContext::browsing_contexts`].
    #[must_use]
    pub fn browsing_contexts(&self) -> Vec<Synced<BrowsingContext>> {
        self.read(UserContext::browsing_contexts)
    }

    /// See [`UserContext::is_closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read(UserContext::is_closed)
    }

    /// See [`UserContext::create_browsing_context`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn create_browsing_context(
        &self,
        kind: CreateType,
        options: CreateContextOptions,
    ) -> Result<Synced<BrowsingContext>> {
        self.call(move |context| async move {
            context.create_browsing_context(kind, options).await
        })
    }

    /// See [`UserContext::remove`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn remove(&self) -> Result<()> {
        self.call(|context| async move { context.remove().await })
    }
}

// ============================================================================
// Synced<BrowsingContext>
// ============================================================================

impl Synced<BrowsingContext> {
    /// See [`BrowsingContext::id`].
    #[must_use]
    pub fn id(&self) -> BrowsingContextId {
        self.read(|context| context.id().clone())
    }

    /// See [`BrowsingContext::url`].
    #[must_use]
    pub fn url(&self) -> String {
        self.read(BrowsingContext::url)
    }

    /// See [`BrowsingContext::parent_id`].
    #[must_use]
    pub fn parent_id(&self) -> Option<BrowsingContextId> {
        self.read(|context| context.parent_id().cloned())
    }

    /// See [`BrowsingContext::is_top_level`].
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.read(BrowsingContext::is_top_level)
    }

    /// See [`BrowsingContext::children`].
    #[must_use]
    pub fn children(&self) -> Vec<Synced<BrowsingContext>> {
        self.read(BrowsingContext::children)
    }

    /// See [`BrowsingContext::default_realm`].
    #[must_use]
    pub fn default_realm(&self) -> Synced<Realm> {
        self.read(|context| context.default_realm().clone())
    }

    /// See [`BrowsingContext::is_closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read(BrowsingContext::is_closed)
    }

    /// See [`BrowsingContext::navigate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the navigation fails.
    pub fn navigate(&self, url: &str, wait: ReadinessState) -> Result<NavigateResult> {
        let url = url.to_string();
        self.call(move |context| async move { context.navigate(&url, wait).await })
    }

    /// See [`BrowsingContext::navigate_and_wait`].
    ///
    /// # Errors
    ///
    /// Returns an error if the navigation fails or times out.
    pub fn navigate_and_wait(
        &self,
        url: &str,
        wait_until: WaitUntil,
    ) -> Result<Option<NavigationResult>> {
        let url = url.to_string();
        self.call(move |context| async move { context.navigate_and_wait(&url, wait_until).await })
    }

    /// See [`BrowsingContext::wait_for_navigation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the navigation fails or times out.
    pub fn wait_for_navigation(&self, wait_until: WaitUntil) -> Result<Option<NavigationResult>> {
        self.call(move |context| async move { context.wait_for_navigation(wait_until).await })
    }

    /// See [`BrowsingContext::reload`].
    ///
    /// # Errors
    ///
    /// Returns an error if the reload fails.
    pub fn reload(&self, ignore_cache: bool, wait: ReadinessState) -> Result<NavigateResult> {
        self.call(move |context| async move { context.reload(ignore_cache, wait).await })
    }

    /// See [`BrowsingContext::traverse_history`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn traverse_history(&self, delta: i64) -> Result<()> {
        self.call(move |context| async move { context.traverse_history(delta).await })
    }

    /// See [`BrowsingContext::activate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn activate(&self) -> Result<()> {
        self.call(|context| async move { context.activate().await })
    }

    /// See [`BrowsingContext::handle_user_prompt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn handle_user_prompt(&self, accept: bool, user_text: Option<&str>) -> Result<()> {
        let user_text = user_text.map(str::to_string);
        self.call(move |context| async move {
            context
                .handle_user_prompt(accept, user_text.as_deref())
                .await
        })
    }

    /// See [`BrowsingContext::set_viewport`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn set_viewport(
        &self,
        viewport: Option<Viewport>,
        device_pixel_ratio: Option<f64>,
    ) -> Result<()> {
        self.call(move |context| async move {
            context.set_viewport(viewport, device_pixel_ratio).await
        })
    }

    /// See [`BrowsingContext::capture_screenshot`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn capture_screenshot(&self, origin: ScreenshotOrigin) -> Result<Vec<u8>> {
        self.call(move |context| async move { context.capture_screenshot(origin).await })
    }

    /// See [`BrowsingContext::evaluate`].
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub fn evaluate(&self, expression: &str) -> Result<Value> {
        let expression = expression.to_string();
        self.call(move |context| async move { context.evaluate(&expression).await })
    }

    /// See [`BrowsingContext::wait_for_function`].
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails or times out.
    pub fn wait_for_function(
        &self,
        function: &str,
        args: Vec<LocalValue>,
        options: WaitForOptions,
    ) -> Result<Synced<JsHandle>> {
        let function = function.to_string();
        self.call(move |context| async move {
            context.wait_for_function(&function, args, options).await
        })
    }

    /// See [`BrowsingContext::close`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn close(&self, prompt_unload: bool) -> Result<()> {
        self.call(move |context| async move { context.close(prompt_unload).await })
    }
}

// ============================================================================
// Synced<Realm>
// ============================================================================

impl Synced<Realm> {
    /// See [`Realm::id`].
    #[must_use]
    pub fn id(&self) -> Option<RealmId> {
        self.read(Realm::id)
    }

    /// See [`Realm::origin`].
    #[must_use]
    pub fn origin(&self) -> String {
        self.read(Realm::origin)
    }

    /// See [`Realm::task_count`].
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.read(Realm::task_count)
    }

    /// See [`Realm::is_destroyed`].
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.read(Realm::is_destroyed)
    }

    /// See [`Realm::evaluate`].
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub fn evaluate(&self, expression: &str) -> Result<Value> {
        let expression = expression.to_string();
        self.call(move |realm| async move { realm.evaluate(&expression).await })
    }

    /// See [`Realm::evaluate_handle`].
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub fn evaluate_handle(&self, expression: &str) -> Result<Synced<JsHandle>> {
        let expression = expression.to_string();
        self.call(move |realm| async move { realm.evaluate_handle(&expression).await })
    }

    /// See [`Realm::call_function`].
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub fn call_function(&self, function_declaration: &str, args: Vec<LocalValue>) -> Result<Value> {
        let declaration = function_declaration.to_string();
        self.call(move |realm| async move { realm.call_function(&declaration, args).await })
    }

    /// See [`Realm::wait_for_function`].
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails or times out.
    pub fn wait_for_function(
        &self,
        function: &str,
        args: Vec<LocalValue>,
        options: WaitForOptions,
    ) -> Result<Synced<JsHandle>> {
        let function = function.to_string();
        self.call(move |realm| async move {
            realm.wait_for_function(&function, args, options).await
        })
    }
}

// ============================================================================
// Synced<JsHandle>
// ============================================================================

impl Synced<JsHandle> {
    /// See [`JsHandle::handle_id`].
    #[must_use]
    pub fn handle_id(&self) -> Option<String> {
        self.read(|handle| handle.handle_id().map(str::to_string))
    }

    /// See [`JsHandle::is_valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.read(JsHandle::is_valid)
    }

    /// See [`JsHandle::remote_value`].
    #[must_use]
    pub fn remote_value(&self) -> RemoteValue {
        self.read(|handle| handle.remote_value().clone())
    }

    /// See [`JsHandle::realm`].
    #[must_use]
    pub fn realm(&self) -> Option<Synced<Realm>> {
        self.read(JsHandle::realm)
    }

    /// See [`JsHandle::json_value`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn json_value(&self) -> Result<Value> {
        self.call(|handle| async move { handle.json_value().await })
    }

    /// See [`JsHandle::evaluate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub fn evaluate(&self, function_declaration: &str, args: Vec<LocalValue>) -> Result<Value> {
        let declaration = function_declaration.to_string();
        self.call(move |handle| async move { handle.evaluate(&declaration, args).await })
    }

    /// See [`JsHandle::dispose`].
    ///
    /// # Errors
    ///
    /// Returns an error if `script.disown` fails.
    pub fn dispose(&self) -> Result<()> {
        self.call(|handle| async move { handle.dispose().await })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::reactor::bridge::in_reactor;

    fn bridge() -> Arc<ReactorBridge> {
        Arc::new(ReactorBridge::spawn(Duration::from_millis(100)).expect("spawn bridge"))
    }

    #[test]
    fn test_plain_values_pass_through() {
        let bridge = bridge();
        assert_eq!(5usize.into_synced(&bridge), 5);
        assert_eq!(Some(vec![1u8, 2]).into_synced(&bridge), Some(vec![1u8, 2]));
        bridge.close();
    }

    #[test]
    fn test_call_runs_on_reactor() {
        let bridge = bridge();
        let proxy = Synced::new(String::from("target"), Arc::clone(&bridge));

        let len = proxy
            .call(|target| async move { Ok(target.len()) })
            .expect("call");
        let inside = proxy
            .call(|_| async move { Ok(in_reactor()) })
            .expect("call");

        assert_eq!(len, 6);
        assert!(inside);
        assert!(!proxy.is_owning());
        bridge.close();
    }
}
