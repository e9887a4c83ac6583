//! Browsing context commands.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde_json::Value;
use tracing::debug;

use crate::browser::core::preload_script_id;
use crate::error::{Error, Result};
use crate::identifiers::{NavigationId, PreloadScriptId};
use crate::protocol::{
    BrowsingContextCommand, LocalValue, ReadinessState, ScreenshotOrigin, ScriptCommand, Viewport,
};
use crate::script::{JsHandle, WaitForOptions};

use super::{BrowsingContext, NavigateResult, NavigationResult, NavigationWatcher, WaitUntil};

// ============================================================================
// BrowsingContext - Navigation
// ============================================================================

impl BrowsingContext {
    /// Navigates to `url`, responding once `wait` readiness is reached.
    ///
    /// # Errors
    ///
    /// - [`Error::BrowsingContextClosed`] if the context is closed
    /// - [`Error::CommandTimeout`] after the navigation timeout
    /// - [`Error::Protocol`] if the remote end rejected the navigation
    pub async fn navigate(&self, url: &str, wait: ReadinessState) -> Result<NavigateResult> {
        self.ensure_open()?;
        debug!(context = %self.inner.id, %url, ?wait, "Navigating");

        let result = self
            .inner
            .connection
            .send_with_timeout(
                BrowsingContextCommand::Navigate {
                    context: self.inner.id.clone(),
                    url: url.to_string(),
                    wait: Some(wait),
                },
                self.inner.options.navigation_timeout,
            )
            .await?;
        Ok(parse_navigate_result(&result))
    }

    /// Reloads the current document.
    ///
    /// # Errors
    ///
    /// - [`Error::BrowsingContextClosed`] if the context is closed
    /// - [`Error::Protocol`] if the remote end rejected the reload
    pub async fn reload(&self, ignore_cache: bool, wait: ReadinessState) -> Result<NavigateResult> {
        self.ensure_open()?;

        let result = self
            .inner
            .connection
            .send_with_timeout(
                BrowsingContextCommand::Reload {
                    context: self.inner.id.clone(),
                    ignore_cache: ignore_cache.then_some(true),
                    wait: Some(wait),
                },
                self.inner.options.navigation_timeout,
            )
            .await?;
        Ok(parse_navigate_result(&result))
    }

    /// Moves `delta` steps through session history.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is closed or the entry does not exist.
    pub async fn traverse_history(&self, delta: i64) -> Result<()> {
        self.ensure_open()?;

        self.inner
            .connection
            .send(BrowsingContextCommand::TraverseHistory {
                context: self.inner.id.clone(),
                delta,
            })
            .await?;
        Ok(())
    }

    /// Starts watching for the next navigation.
    ///
    /// Create the watcher before triggering the navigation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrowsingContextClosed`] if the context is closed.
    pub fn watch_navigation(&self, wait_until: WaitUntil) -> Result<NavigationWatcher> {
        self.ensure_open()?;
        Ok(NavigationWatcher::new(
            self,
            wait_until,
            self.inner.options.navigation_timeout,
        ))
    }

    /// Waits for the next navigation to settle.
    ///
    /// Returns `None` for same-document navigations.
    ///
    /// # Errors
    ///
    /// See [`NavigationWatcher::wait`].
    pub async fn wait_for_navigation(
        &self,
        wait_until: WaitUntil,
    ) -> Result<Option<NavigationResult>> {
        self.watch_navigation(wait_until)?.wait().await
    }

    /// Navigates and waits for the navigation to settle.
    ///
    /// # Errors
    ///
    /// Returns the first error of the command or the watcher.
    pub async fn navigate_and_wait(
        &self,
        url: &str,
        wait_until: WaitUntil,
    ) -> Result<Option<NavigationResult>> {
        let watcher = self.watch_navigation(wait_until)?;
        let (_, result) =
            tokio::try_join!(self.navigate(url, ReadinessState::None), watcher.wait())?;
        Ok(result)
    }
}

// ============================================================================
// BrowsingContext - Window
// ============================================================================

impl BrowsingContext {
    /// Closes a top-level context.
    ///
    /// Only sends the command. The context is disposed when
    /// `browsingContext.contextDestroyed` arrives, which with `prompt_unload`
    /// may never happen if a `beforeunload` handler keeps it open.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for frames
    /// - [`Error::BrowsingContextClosed`] if already closed
    pub async fn close(&self, prompt_unload: bool) -> Result<()> {
        if !self.is_top_level() {
            return Err(Error::invalid_argument(
                "Non top-level browsing contexts cannot be closed",
            ));
        }
        self.ensure_open()?;

        self.inner
            .connection
            .send(BrowsingContextCommand::Close {
                context: self.inner.id.clone(),
                prompt_unload: prompt_unload.then_some(true),
            })
            .await?;
        Ok(())
    }

    /// Brings the context to the foreground.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is closed.
    pub async fn activate(&self) -> Result<()> {
        self.ensure_open()?;

        self.inner
            .connection
            .send(BrowsingContextCommand::Activate {
                context: self.inner.id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Accepts or dismisses the open prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if no prompt is open.
    pub async fn handle_user_prompt(&self, accept: bool, user_text: Option<&str>) -> Result<()> {
        self.ensure_open()?;

        self.inner
            .connection
            .send(BrowsingContextCommand::HandleUserPrompt {
                context: self.inner.id.clone(),
                accept: Some(accept),
                user_text: user_text.map(str::to_string),
            })
            .await?;
        Ok(())
    }

    /// Sets the viewport. `None` restores the default size.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is closed.
    pub async fn set_viewport(
        &self,
        viewport: Option<Viewport>,
        device_pixel_ratio: Option<f64>,
    ) -> Result<()> {
        self.ensure_open()?;

        self.inner
            .connection
            .send(BrowsingContextCommand::SetViewport {
                context: self.inner.id.clone(),
                viewport,
                device_pixel_ratio,
            })
            .await?;
        Ok(())
    }

    /// Captures a PNG screenshot and returns the encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture fails or the payload is not base64.
    pub async fn capture_screenshot(&self, origin: ScreenshotOrigin) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let result = self
            .inner
            .connection
            .send(BrowsingContextCommand::CaptureScreenshot {
                context: self.inner.id.clone(),
                origin: Some(origin),
                format: None,
            })
            .await?;

        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("captureScreenshot response without data"))?;

        Base64Standard
            .decode(data)
            .map_err(|e| Error::malformed(format!("Invalid screenshot payload: {e}")))
    }
}

// ============================================================================
// BrowsingContext - Script
// ============================================================================

impl BrowsingContext {
    /// Registers a preload script for this top-level context.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for frames
    /// - [`Error::Protocol`] if the remote end refused
    pub async fn add_preload_script(
        &self,
        function_declaration: &str,
        sandbox: Option<&str>,
    ) -> Result<PreloadScriptId> {
        if !self.is_top_level() {
            return Err(Error::invalid_argument(
                "Preload scripts can only be added to top-level browsing contexts",
            ));
        }
        self.ensure_open()?;

        let result = self
            .inner
            .connection
            .send(ScriptCommand::AddPreloadScript {
                function_declaration: function_declaration.to_string(),
                contexts: Some(vec![self.inner.id.clone()]),
                user_contexts: None,
                sandbox: sandbox.map(str::to_string),
            })
            .await?;
        preload_script_id(&result)
    }

    /// Evaluates `expression` in the main world.
    ///
    /// # Errors
    ///
    /// See [`crate::browser::Realm::evaluate`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.ensure_open()?;
        self.inner.default_realm.evaluate(expression).await
    }

    /// Polls `function` in the main world until it returns a truthy value.
    ///
    /// # Errors
    ///
    /// See [`crate::browser::Realm::wait_for_function`].
    pub async fn wait_for_function(
        &self,
        function: &str,
        args: Vec<LocalValue>,
        options: WaitForOptions,
    ) -> Result<JsHandle> {
        self.ensure_open()?;
        self.inner
            .default_realm
            .wait_for_function(function, args, options)
            .await
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.inner.lifecycle.is_open() {
            return Ok(());
        }
        Err(Error::context_closed(
            self.inner.id.clone(),
            self.inner.lifecycle.reason().unwrap_or_default(),
        ))
    }
}

fn parse_navigate_result(result: &Value) -> NavigateResult {
    NavigateResult {
        navigation: result
            .get("navigation")
            .and_then(Value::as_str)
            .map(NavigationId::new),
        url: result
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_navigate_result() {
        let result = parse_navigate_result(&json!({
            "navigation": "nav-1",
            "url": "https://example.com/"
        }));
        assert_eq!(result.navigation, Some(NavigationId::new("nav-1")));
        assert_eq!(result.url, "https://example.com/");

        let result = parse_navigate_result(&json!({ "navigation": null, "url": "about:blank#a" }));
        assert_eq!(result.navigation, None);
    }
}
