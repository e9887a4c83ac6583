//! Synchronous access through the reactor bridge.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bidi_webdriver::reactor::IntoSynced;
use bidi_webdriver::{Error, ReactorBridge, WaitForOptions};
use common::{Reply, success};
use serde_json::json;

fn handler() -> common::Handler {
    Arc::new(|_, method, params| match method {
        "script.evaluate" if params["expression"] == "hang" => Some(Reply::Silent),
        "script.evaluate" if params["expression"] == "1 + 1" => Some(Reply::Ok(success(
            "r-1",
            json!({"type": "number", "value": 2}),
        ))),
        "script.callFunction"
            if params["functionDeclaration"]
                .as_str()
                .is_some_and(|d| d.contains("poller.result()")) =>
        {
            Some(Reply::Ok(success(
                "r-1",
                json!({"type": "string", "value": "ready", "handle": "value"}),
            )))
        }
        _ => None,
    })
}

#[test]
fn test_proxies_forward_to_reactor() {
    let bridge = Arc::new(ReactorBridge::spawn(Duration::from_millis(100)).expect("bridge"));
    let (browser, _remote) = bridge
        .sync(|| async { Ok(common::connect(handler()).await) })
        .expect("connect");
    let browser = browser.into_synced(&bridge);

    assert_eq!(browser.browser_name(), "firefox");
    assert!(!browser.is_owning());

    let contexts = browser.browsing_contexts();
    assert_eq!(contexts.len(), 1);
    let context = &contexts[0];
    assert_eq!(context.id().as_str(), "ctx-1");

    assert_eq!(context.evaluate("1 + 1").expect("evaluate"), json!(2));

    let handle = context
        .wait_for_function("() => 'ready'", Vec::new(), WaitForOptions::new())
        .expect("wait");
    assert_eq!(handle.handle_id().as_deref(), Some("value"));
    assert!(handle.realm().is_some());

    let realm = context.default_realm();
    assert_eq!(realm.task_count(), 0);

    bridge.close();
    assert!(matches!(context.evaluate("1 + 1"), Err(Error::BridgeClosed)));
}

#[test]
fn test_close_settles_queued_jobs() {
    let bridge = Arc::new(ReactorBridge::spawn(Duration::from_millis(100)).expect("bridge"));
    let (browser, _remote) = bridge
        .sync(|| async { Ok(common::connect(handler()).await) })
        .expect("connect");
    let context = browser.into_synced(&bridge).browsing_contexts().remove(0);

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let context = context.clone();
            thread::spawn(move || context.evaluate("hang"))
        })
        .collect();
    thread::sleep(Duration::from_millis(50));

    bridge.close();
    assert!(bridge.is_closed());

    for caller in callers {
        let result = caller.join().expect("caller thread");
        assert!(matches!(result, Err(Error::BridgeClosed)), "{result:?}");
    }

    let started = Instant::now();
    let err = context.evaluate("1 + 1").unwrap_err();
    assert!(matches!(err, Error::BridgeClosed));
    assert!(started.elapsed() < Duration::from_secs(1));
}
