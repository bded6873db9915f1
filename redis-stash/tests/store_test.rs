//! Single-node storage scenarios against the mock fixture

mod common;

use common::MockNode;
use redis_stash::{RetryConfig, Store, StoreConfig, StoreError};
use std::time::{Duration, Instant};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_wait: Duration::from_millis(10),
        max_wait: None,
    }
}

async fn store_on(node: &MockNode) -> Store {
    let config = StoreConfig::new("127.0.0.1", node.port()).with_retry(fast_retry());
    Store::connect(config).await.expect("connect")
}

#[tokio::test]
async fn create_then_read() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    assert!(store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap());

    let snapshot = store.read_string("sess", "abc", 0).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.value.as_deref(), Some(&b"DATA"[..]));
    assert_eq!(snapshot.expiration, Some(1_000_000));

    // both keys exist with the same expiration
    assert_eq!(node.entry("{sess:abc}").unwrap().1, 1_000_000);
    assert_eq!(
        node.entry("version.of:{sess:abc}").unwrap(),
        (b"1".to_vec(), 1_000_000)
    );
}

#[tokio::test]
async fn create_twice_leaves_state_unchanged() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    assert!(store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap());
    assert!(!store
        .create_string("sess", "abc", b"OTHER", 2_000_000)
        .await
        .unwrap());

    let snapshot = store.read_string("sess", "abc", 0).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.value.as_deref(), Some(&b"DATA"[..]));
    assert_eq!(snapshot.expiration, Some(1_000_000));
}

#[tokio::test]
async fn versioned_update_and_mismatch() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap();

    assert_eq!(
        store
            .update_string("sess", "abc", b"NEW", 2_000_000, 1)
            .await
            .unwrap(),
        2
    );
    // the same expected version again is a mismatch now
    assert_eq!(
        store
            .update_string("sess", "abc", b"NEWER", 2_000_000, 1)
            .await
            .unwrap(),
        -1
    );

    let snapshot = store.read_string("sess", "abc", 2).await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.value.as_deref(), Some(&b"NEW"[..]));
    assert_eq!(snapshot.expiration, Some(2_000_000));
}

#[tokio::test]
async fn versioned_read_below_threshold_withholds_value() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap();

    let snapshot = store.read_string("sess", "abc", 5).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert!(snapshot.value.is_none());
    assert_eq!(snapshot.expiration, Some(1_000_000));
}

#[tokio::test]
async fn read_version_probe() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    assert_eq!(store.read_version("sess", "abc").await.unwrap(), 0);
    store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap();
    assert_eq!(store.read_version("sess", "abc").await.unwrap(), 1);
}

#[tokio::test]
async fn forced_update_skips_version_check() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap();
    assert_eq!(
        store
            .update_string("sess", "abc", b"NEW", 0, 0)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        store
            .update_string("sess", "abc", b"NEWER", 0, 0)
            .await
            .unwrap(),
        3
    );

    // expiration untouched by KEEPTTL updates without a new deadline
    let snapshot = store.read_string("sess", "abc", 0).await.unwrap();
    assert_eq!(snapshot.expiration, Some(1_000_000));
}

#[tokio::test]
async fn context_sweep_updates_then_deletes() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    for key in ["k1", "k2", "k3"] {
        assert!(store.create_string("s", key, b"V", 1_000_000).await.unwrap());
    }
    // an unrelated context the sweep must not touch
    store
        .create_string("other", "k1", b"V", 1_000_000)
        .await
        .unwrap();

    assert_eq!(store.update_context("s", 3_000_000).await.unwrap(), 3);
    for key in ["k1", "k2", "k3"] {
        let snapshot = store.read_string("s", key, 0).await.unwrap();
        assert_eq!(snapshot.expiration, Some(3_000_000));
    }
    assert_eq!(
        store.read_string("other", "k1", 0).await.unwrap().expiration,
        Some(1_000_000)
    );

    assert_eq!(store.delete_context("s").await.unwrap(), 3);
    for key in ["k1", "k2", "k3"] {
        assert_eq!(store.read_string("s", key, 0).await.unwrap().version, 0);
    }
    assert_eq!(store.read_string("other", "k1", 0).await.unwrap().version, 1);

    // the version companions are swept too
    assert_eq!(node.keys(), vec!["version.of:{other:k1}", "{other:k1}"]);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    assert!(!store.delete_string("sess", "missing").await.unwrap());

    store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap();
    assert!(store.delete_string("sess", "abc").await.unwrap());
    assert!(!store.delete_string("sess", "abc").await.unwrap());
    assert!(node.keys().is_empty());
}

#[tokio::test]
async fn aborted_transaction_is_retried() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap();

    node.fail_next_exec();
    assert_eq!(
        store
            .update_string("sess", "abc", b"NEW", 2_000_000, 1)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn connection_loss_backs_off_then_surfaces() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    node.refuse_connections();

    let started = Instant::now();
    let err = store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ConnectionLost(_)), "{err:?}");
    // attempts 0 and 1 wait 10 and 20 milliseconds before giving up
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn redirect_from_standalone_node_is_fatal() {
    let node = MockNode::start().await;
    let store = store_on(&node).await;

    node.set_moved(7000, "127.0.0.1", 6380);
    let err = store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Command(_)), "{err:?}");
}

#[tokio::test]
async fn password_auth_is_sent_once_per_connection() {
    let node = MockNode::start().await;
    let config = StoreConfig::new("127.0.0.1", node.port())
        .with_retry(fast_retry())
        .with_password("secret");
    let store = Store::connect(config).await.unwrap();

    assert!(store
        .create_string("sess", "abc", b"DATA", 1_000_000)
        .await
        .unwrap());

    let auth_commands: Vec<String> = node
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("AUTH"))
        .collect();
    assert_eq!(auth_commands, vec!["AUTH secret".to_string()]);
}
