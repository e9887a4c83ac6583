//! In-process remote end for integration tests.
//!
//! [`MockRemote`] answers commands arriving over a channel transport. A test
//! supplies a handler for the commands it cares about; everything else gets
//! a canned reply that is enough to bring a browser tree up with one
//! top-level context `ctx-1` in the default user context.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bidi_webdriver::identifiers::CommandId;
use bidi_webdriver::transport::{ChannelRemote, RemoteSender, channel_pair};
use bidi_webdriver::{BidiOptions, Browser, BrowsingContext, Driver};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

// ============================================================================
// Replies
// ============================================================================

/// How the remote end answers one command.
pub enum Reply {
    Ok(Value),
    Err(&'static str, String),
    /// Never answer.
    Silent,
}

/// Answers a command. `None` falls back to [`default_reply`].
///
/// Events sent through the [`RemoteSender`] reach the client before the
/// reply does.
pub type Handler = Arc<dyn Fn(&RemoteSender, &str, &Value) -> Option<Reply> + Send + Sync>;

/// Handler that defers every command to the defaults.
pub fn defaults_only() -> Handler {
    Arc::new(|_, _, _| None)
}

/// Canned replies for session setup and housekeeping commands.
pub fn default_reply(method: &str, params: &Value) -> Reply {
    match method {
        "session.new" => Reply::Ok(json!({
            "sessionId": "s1",
            "capabilities": {"browserName": "firefox", "browserVersion": "140.0"},
        })),
        "session.subscribe" => Reply::Ok(json!({"subscription": "sub-1"})),
        "browser.getUserContexts" => Reply::Ok(json!({
            "userContexts": [{"userContext": "default"}],
        })),
        "browsingContext.getTree" => Reply::Ok(json!({
            "contexts": [{
                "context": "ctx-1",
                "url": "about:blank",
                "userContext": "default",
                "parent": null,
                "children": [],
            }],
        })),
        "script.evaluate" => Reply::Ok(success(
            "r-1",
            json!({"type": "object", "handle": "utility"}),
        )),
        "script.callFunction" => {
            let declaration = params["functionDeclaration"].as_str().unwrap_or_default();
            if declaration.contains("utility.createFunction") {
                Reply::Ok(success("r-1", json!({"type": "object", "handle": "poller"})))
            } else {
                Reply::Ok(success("r-1", json!({"type": "undefined"})))
            }
        }
        _ => Reply::Ok(json!({})),
    }
}

/// A successful `script.*` result.
pub fn success(realm: &str, result: Value) -> Value {
    json!({"type": "success", "realm": realm, "result": result})
}

// ============================================================================
// MockRemote
// ============================================================================

pub struct MockRemote {
    sender: RemoteSender,
    frames: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl MockRemote {
    pub fn spawn(mut remote: ChannelRemote, handler: Handler) -> Self {
        let sender = remote.sender();
        let frames = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&frames);
        let reply_to = sender.clone();
        let task = tokio::spawn(async move {
            while let Some(frame) = remote.recv().await {
                log.lock().push(frame.clone());

                let Some(id) = frame["id"].as_u64().map(CommandId::new) else {
                    continue;
                };
                let method = frame["method"].as_str().unwrap_or_default().to_string();
                let params = frame["params"].clone();

                let reply = handler(&reply_to, &method, &params)
                    .unwrap_or_else(|| default_reply(&method, &params));
                match reply {
                    Reply::Ok(result) => {
                        reply_to.respond(id, result);
                    }
                    Reply::Err(error, message) => {
                        reply_to.respond_error(id, error, &message);
                    }
                    Reply::Silent => {}
                }
            }
        });

        Self {
            sender,
            frames,
            task,
        }
    }

    pub fn sender(&self) -> &RemoteSender {
        &self.sender
    }

    pub fn emit(&self, method: &str, params: Value) {
        self.sender.emit(method, params);
    }

    /// Every frame the client has sent so far.
    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }

    /// Params of every command named `method`.
    pub fn commands(&self, method: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|frame| frame["method"] == method)
            .map(|frame| frame["params"].clone())
            .collect()
    }

    /// Number of `script.callFunction` commands whose declaration contains
    /// `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.commands("script.callFunction")
            .iter()
            .filter(|params| {
                params["functionDeclaration"]
                    .as_str()
                    .is_some_and(|declaration| declaration.contains(needle))
            })
            .count()
    }
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Setup
// ============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options with short deadlines so failing tests fail fast.
pub fn test_options() -> BidiOptions {
    BidiOptions::new()
        .with_command_timeout(Duration::from_secs(2))
        .with_wait_timeout(Duration::from_secs(2))
        .with_navigation_timeout(Duration::from_secs(2))
}

pub async fn connect(handler: Handler) -> (Browser, MockRemote) {
    connect_with(test_options(), handler).await
}

pub async fn connect_with(options: BidiOptions, handler: Handler) -> (Browser, MockRemote) {
    init_tracing();

    let (transport, remote) = channel_pair();
    let remote = MockRemote::spawn(remote, handler);

    let driver = Driver::builder().options(options).build().expect("driver");
    let browser = driver
        .connect_with_transport(Arc::new(transport))
        .await
        .expect("connect");
    (browser, remote)
}

/// The seeded top-level context.
pub fn first_context(browser: &Browser) -> BrowsingContext {
    browser
        .browsing_contexts()
        .into_iter()
        .next()
        .expect("seeded context")
}

/// Lets spawned tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
