//! Navigation tracking and waiting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bidi_webdriver::protocol::ReadinessState;
use bidi_webdriver::{Error, NavigationId, NavigationOutcome, WaitUntil};
use common::{Reply, connect, connect_with, defaults_only, first_context, settle, test_options};
use serde_json::json;

const URL: &str = "https://example.com/";

#[tokio::test]
async fn test_events_before_response() {
    let (browser, _remote) = connect(Arc::new(|sender, method, _| {
        (method == "browsingContext.navigate").then(|| {
            let info = json!({"context": "ctx-1", "navigation": "nav-1", "timestamp": 1, "url": URL});
            sender.emit("browsingContext.navigationStarted", info.clone());
            sender.emit("browsingContext.domContentLoaded", info.clone());
            sender.emit("browsingContext.load", info);
            Reply::Ok(json!({"navigation": "nav-1", "url": URL}))
        })
    }))
    .await;
    let context = first_context(&browser);

    let result = context
        .navigate_and_wait(URL, WaitUntil::Load)
        .await
        .expect("navigate")
        .expect("full navigation");

    assert_eq!(result.url, URL);
    assert_eq!(result.navigation.id(), Some(&NavigationId::new("nav-1")));
    assert_eq!(result.navigation.outcome(), Some(NavigationOutcome::Loaded));
    assert_eq!(context.url(), URL);
    assert!(context.navigations().is_empty());
}

#[tokio::test]
async fn test_events_after_response() {
    let (browser, remote) = connect(Arc::new(|_, method, _| {
        (method == "browsingContext.navigate")
            .then(|| Reply::Ok(json!({"navigation": "nav-1", "url": URL})))
    }))
    .await;
    let context = first_context(&browser);

    let waiting = {
        let context = context.clone();
        tokio::spawn(async move { context.navigate_and_wait(URL, WaitUntil::DomContentLoaded).await })
    };
    settle().await;
    assert!(!waiting.is_finished());

    let info = json!({"context": "ctx-1", "navigation": "nav-1", "timestamp": 2, "url": URL});
    remote.emit("browsingContext.navigationStarted", info.clone());
    remote.emit("browsingContext.domContentLoaded", info);

    let result = waiting
        .await
        .expect("join")
        .expect("navigate")
        .expect("full navigation");
    assert_eq!(result.url, URL);
    assert!(!result.navigation.is_settled());
}

#[tokio::test]
async fn test_fragment_navigation_resolves_none() {
    let (browser, _remote) = connect(Arc::new(|sender, method, _| {
        (method == "browsingContext.navigate").then(|| {
            sender.emit(
                "browsingContext.fragmentNavigated",
                json!({"context": "ctx-1", "navigation": null, "timestamp": 3, "url": "about:blank#top"}),
            );
            Reply::Ok(json!({"navigation": null, "url": "about:blank#top"}))
        })
    }))
    .await;
    let context = first_context(&browser);

    let result = context
        .navigate_and_wait("about:blank#top", WaitUntil::Load)
        .await
        .expect("navigate");

    assert!(result.is_none());
    assert_eq!(context.url(), "about:blank#top");
}

#[tokio::test]
async fn test_failed_navigation() {
    let (browser, _remote) = connect(Arc::new(|sender, method, _| {
        (method == "browsingContext.navigate").then(|| {
            let info = json!({"context": "ctx-1", "navigation": "nav-2", "timestamp": 4, "url": URL});
            sender.emit("browsingContext.navigationStarted", info.clone());
            sender.emit("browsingContext.navigationFailed", info);
            Reply::Ok(json!({"navigation": "nav-2", "url": URL}))
        })
    }))
    .await;
    let context = first_context(&browser);

    let err = context
        .navigate_and_wait(URL, WaitUntil::Load)
        .await
        .unwrap_err();
    match err {
        Error::NavigationFailed { url } => assert_eq!(url, URL),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_navigation_timeout() {
    let options = test_options().with_navigation_timeout(Duration::from_millis(50));
    let (browser, _remote) = connect_with(options, defaults_only()).await;
    let context = first_context(&browser);

    let err = context
        .wait_for_navigation(WaitUntil::Load)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_ms: 50, .. }));
}

#[tokio::test]
async fn test_context_close_interrupts_wait() {
    let (browser, remote) = connect(defaults_only()).await;
    let context = first_context(&browser);

    let waiting = {
        let context = context.clone();
        tokio::spawn(async move { context.wait_for_navigation(WaitUntil::Load).await })
    };
    settle().await;

    remote.emit(
        "browsingContext.navigationStarted",
        json!({"context": "ctx-1", "navigation": "nav-3", "timestamp": 5, "url": URL}),
    );
    settle().await;

    let navigation = context.navigations().remove(0);
    assert!(!navigation.is_settled());

    remote.emit(
        "browsingContext.contextDestroyed",
        json!({"context": "ctx-1", "url": URL}),
    );

    let err = waiting.await.expect("join").unwrap_err();
    assert!(matches!(err, Error::BrowsingContextClosed { .. }));
    assert_eq!(navigation.settled().await, NavigationOutcome::Aborted);
}

#[tokio::test]
async fn test_navigate_sends_readiness() {
    let (browser, remote) = connect(Arc::new(|_, method, _| {
        (method == "browsingContext.navigate")
            .then(|| Reply::Ok(json!({"navigation": "nav-4", "url": URL})))
    }))
    .await;
    let context = first_context(&browser);

    let result = context
        .navigate(URL, ReadinessState::Complete)
        .await
        .expect("navigate");
    assert_eq!(result.navigation, Some(NavigationId::new("nav-4")));

    let sent = remote.commands("browsingContext.navigate");
    assert_eq!(sent[0]["context"], "ctx-1");
    assert_eq!(sent[0]["url"], URL);
    assert_eq!(sent[0]["wait"], "complete");
}

#[tokio::test]
async fn test_history_update_changes_url() {
    let (browser, remote) = connect(defaults_only()).await;
    let context = first_context(&browser);

    remote.emit(
        "browsingContext.historyUpdated",
        json!({"context": "ctx-1", "url": "https://example.com/next"}),
    );
    settle().await;

    assert_eq!(context.url(), "https://example.com/next");
}

#[tokio::test]
async fn test_newer_navigation_aborts_open_ones() {
    let (browser, remote) = connect(defaults_only()).await;
    let context = first_context(&browser);

    let started = |id: String| {
        json!({"context": "ctx-1", "navigation": id, "timestamp": 6, "url": URL})
    };

    remote.emit("browsingContext.navigationStarted", started("nav-0".to_string()));
    settle().await;
    let first = context.navigations().remove(0);

    for i in 1..50 {
        remote.emit("browsingContext.navigationStarted", started(format!("nav-{i}")));
    }
    settle().await;

    assert_eq!(first.outcome(), Some(NavigationOutcome::Aborted));
    let open = context.navigations();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id(), Some(&NavigationId::new("nav-49")));

    remote.emit("browsingContext.load", started("nav-49".to_string()));
    settle().await;

    assert!(context.navigations().is_empty());
    assert_eq!(open[0].settled().await, NavigationOutcome::Loaded);
    assert_eq!(first.settled().await, NavigationOutcome::Aborted);
}
