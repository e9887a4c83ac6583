//! Object tree synchronization and disposal.

mod common;

use std::sync::Arc;

use bidi_webdriver::browser::{BrowserEvent, SessionStatus};
use bidi_webdriver::protocol::CreateType;
use bidi_webdriver::{
    BrowsingContextEvent, BrowsingContextId, CreateContextOptions, Error, RealmEvent,
    UserContextEvent,
};
use common::{Reply, connect, defaults_only, first_context, settle};
use parking_lot::Mutex;
use serde_json::json;

#[tokio::test]
async fn test_connect_seeds_tree() {
    let (browser, remote) = connect(defaults_only()).await;

    assert_eq!(browser.session().id().as_str(), "s1");
    assert_eq!(browser.browser_name(), "firefox");
    assert_eq!(browser.browser_version(), "140.0");

    let default = browser.default_user_context().expect("default user context");
    assert!(default.is_default());
    assert_eq!(browser.user_contexts().len(), 1);

    let context = first_context(&browser);
    assert_eq!(context.id().as_str(), "ctx-1");
    assert_eq!(context.url(), "about:blank");
    assert!(context.is_top_level());
    assert_eq!(default.browsing_contexts().len(), 1);

    let frames = remote.frames();
    assert_eq!(frames[0]["id"], 1);
    assert_eq!(frames[0]["method"], "session.new");
    assert_eq!(
        frames[0]["params"]["capabilities"]["alwaysMatch"]["webSocketUrl"],
        true
    );

    let subscribe = remote.commands("session.subscribe");
    assert_eq!(subscribe.len(), 1);
    assert_eq!(
        subscribe[0]["events"],
        json!(["browsingContext", "script", "log"])
    );
}

#[tokio::test]
async fn test_status_round_trip() {
    let (browser, _remote) = connect(Arc::new(|_, method, _| {
        (method == "session.status").then(|| Reply::Ok(json!({"ready": false, "message": "busy"})))
    }))
    .await;

    let status: SessionStatus = browser.session().status().await.expect("status");
    assert!(!status.ready);
    assert_eq!(status.message, "busy");
}

#[tokio::test]
async fn test_seeded_frames_inherit_parent() {
    let (browser, _remote) = connect(Arc::new(|_, method, _| {
        (method == "browsingContext.getTree").then(|| {
            Reply::Ok(json!({
                "contexts": [{
                    "context": "top",
                    "url": "https://example.com/",
                    "userContext": "default",
                    "children": [{"context": "frame", "url": "https://example.com/frame"}],
                }],
            }))
        })
    }))
    .await;

    let top = first_context(&browser);
    assert_eq!(top.id().as_str(), "top");

    let children = top.children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id().as_str(), "frame");
    assert_eq!(children[0].parent_id(), Some(top.id()));
    assert!(!children[0].is_top_level());
}

#[tokio::test]
async fn test_context_events_build_tree() {
    let (browser, remote) = connect(defaults_only()).await;

    let created = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&created);
    browser
        .default_user_context()
        .expect("default")
        .on(move |event| {
            if let UserContextEvent::BrowsingContext(context) = event {
                seen.lock().push(context.id().clone());
            }
        });

    remote.emit(
        "browsingContext.contextCreated",
        json!({"context": "ctx-2", "url": "about:blank", "userContext": "default", "parent": null}),
    );
    remote.emit(
        "browsingContext.contextCreated",
        json!({"context": "ctx-2-frame", "url": "about:blank", "parent": "ctx-2"}),
    );
    settle().await;

    assert_eq!(browser.browsing_contexts().len(), 2);
    assert_eq!(*created.lock(), vec![BrowsingContextId::new("ctx-2")]);

    let ctx2 = browser
        .default_user_context()
        .and_then(|uc| uc.browsing_context(&BrowsingContextId::new("ctx-2")))
        .expect("ctx-2");
    assert_eq!(ctx2.children().len(), 1);

    remote.emit(
        "browsingContext.contextDestroyed",
        json!({"context": "ctx-2", "url": "about:blank", "parent": null}),
    );
    settle().await;

    assert!(ctx2.is_closed());
    assert!(ctx2.children().is_empty());
    assert_eq!(browser.browsing_contexts().len(), 1);
}

#[tokio::test]
async fn test_events_for_unknown_user_context_create_it() {
    let (browser, remote) = connect(defaults_only()).await;

    let announced = Arc::new(Mutex::new(0usize));
    let count = Arc::clone(&announced);
    browser.on(move |event| {
        if let BrowserEvent::UserContextCreated(_) = event {
            *count.lock() += 1;
        }
    });

    remote.emit(
        "browsingContext.contextCreated",
        json!({"context": "ctx-9", "url": "about:blank", "userContext": "uc-9"}),
    );
    settle().await;

    assert_eq!(*announced.lock(), 1);
    let uc = browser
        .user_context(&"uc-9".into())
        .expect("lazily created user context");
    assert_eq!(uc.browsing_contexts().len(), 1);
}

#[tokio::test]
async fn test_disposal_emits_closed_child_first() {
    let (browser, remote) = connect(defaults_only()).await;
    remote.emit(
        "browsingContext.contextCreated",
        json!({"context": "frame", "url": "about:blank", "parent": "ctx-1"}),
    );
    settle().await;

    let context = first_context(&browser);
    let frame = context.children().remove(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&order);
    frame.default_realm().on(move |event| {
        if let RealmEvent::Destroyed { .. } = event {
            log.lock().push("frame realm");
        }
    });
    let log = Arc::clone(&order);
    frame.on(move |event| {
        if let BrowsingContextEvent::Closed { reason } = event {
            assert_eq!(reason, "Parent browsing context was disposed");
            log.lock().push("frame");
        }
    });
    let log = Arc::clone(&order);
    context.default_realm().on(move |event| {
        if let RealmEvent::Destroyed { .. } = event {
            log.lock().push("realm");
        }
    });
    let log = Arc::clone(&order);
    context.on(move |event| {
        if let BrowsingContextEvent::Closed { .. } = event {
            log.lock().push("context");
        }
    });
    let log = Arc::clone(&order);
    browser.on(move |event| {
        if let BrowserEvent::Closed { .. } = event {
            log.lock().push("browser");
        }
    });

    remote.sender().close("Remote end went away");
    settle().await;

    assert_eq!(
        *order.lock(),
        vec!["frame realm", "frame", "realm", "context", "browser"]
    );
    assert!(browser.session().is_ended());
    assert!(context.is_closed());
    assert!(context.default_realm().is_destroyed());
}

#[tokio::test]
async fn test_operations_on_closed_context_fail() {
    let (browser, remote) = connect(defaults_only()).await;
    let context = first_context(&browser);

    remote.emit(
        "browsingContext.contextDestroyed",
        json!({"context": "ctx-1", "url": "about:blank"}),
    );
    settle().await;

    let err = context.activate().await.unwrap_err();
    assert!(matches!(err, Error::BrowsingContextClosed { .. }));
    let err = context.evaluate("1").await.unwrap_err();
    assert!(err.is_teardown());
}

#[tokio::test]
async fn test_user_context_lifecycle() {
    let (browser, remote) = connect(Arc::new(|sender, method, params| match method {
        "browser.createUserContext" => Some(Reply::Ok(json!({"userContext": "uc-2"}))),
        "browsingContext.create" => {
            assert_eq!(params["userContext"], "uc-2");
            // Event first, response second.
            sender.emit(
                "browsingContext.contextCreated",
                json!({"context": "tab-2", "url": "about:blank", "userContext": "uc-2"}),
            );
            Some(Reply::Ok(json!({"context": "tab-2"})))
        }
        _ => None,
    }))
    .await;

    let uc = browser.create_user_context().await.expect("create");
    assert_eq!(uc.id().as_str(), "uc-2");
    assert_eq!(browser.user_contexts().len(), 2);

    let tab = uc
        .create_browsing_context(CreateType::Tab, CreateContextOptions::new())
        .await
        .expect("create tab");
    assert_eq!(uc.browsing_contexts().len(), 1);
    assert!(uc.browsing_context(tab.id()).is_some());

    uc.remove().await.expect("remove");
    assert!(uc.is_closed());
    assert!(tab.is_closed());
    assert_eq!(browser.user_contexts().len(), 1);
    assert_eq!(remote.commands("browser.removeUserContext").len(), 1);

    let default = browser.default_user_context().expect("default");
    let err = default.remove().await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_close_frame_is_rejected() {
    let (browser, remote) = connect(defaults_only()).await;
    remote.emit(
        "browsingContext.contextCreated",
        json!({"context": "frame", "url": "about:blank", "parent": "ctx-1"}),
    );
    settle().await;

    let frame = first_context(&browser).children().remove(0);
    let err = frame.close(false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
    assert!(remote.commands("browsingContext.close").is_empty());
}

#[tokio::test]
async fn test_browser_close_disposes_tree() {
    let (browser, remote) = connect(defaults_only()).await;
    let context = first_context(&browser);

    browser.close().await.expect("close");

    assert!(browser.is_closed());
    assert_eq!(browser.closed_reason().as_deref(), Some("Browser already closed"));
    assert!(context.is_closed());
    assert!(browser.user_contexts().is_empty());
    assert_eq!(remote.commands("browser.close").len(), 1);

    let err = browser.close().await.unwrap_err();
    assert!(matches!(err, Error::BrowserClosed { .. }));
}

#[tokio::test]
async fn test_context_close_waits_for_destroyed_event() {
    let (browser, remote) = connect(defaults_only()).await;
    let context = first_context(&browser);

    context.close(false).await.expect("close");
    settle().await;

    assert_eq!(remote.commands("browsingContext.close").len(), 1);
    assert!(!context.is_closed());
    assert_eq!(browser.browsing_contexts().len(), 1);

    remote.emit(
        "browsingContext.contextDestroyed",
        json!({"context": "ctx-1", "url": "about:blank"}),
    );
    settle().await;

    assert!(context.is_closed());
    assert_eq!(
        context.closed_reason().as_deref(),
        Some("Browsing context already closed")
    );
    assert!(browser.browsing_contexts().is_empty());
}

#[tokio::test]
async fn test_browser_close_disposes_tree_when_command_fails() {
    let (browser, remote) = connect(Arc::new(|_, method, _| {
        (method == "browser.close")
            .then(|| Reply::Err("unknown error", "Cannot close the browser".to_string()))
    }))
    .await;
    let context = first_context(&browser);

    let err = browser.close().await.unwrap_err();
    assert_eq!(err.protocol_code(), Some("unknown error"));

    assert!(browser.is_closed());
    assert_eq!(browser.closed_reason().as_deref(), Some("Browser already closed"));
    assert!(context.is_closed());
    assert_eq!(remote.commands("browser.close").len(), 1);
}
