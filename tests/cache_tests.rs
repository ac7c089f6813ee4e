//! Secret cache behaviour against an in-memory Vault

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{MockVault, cache};
use vault_broker::Error;

const TTL: Duration = Duration::from_secs(60);

fn vault() -> MockVault {
    MockVault::new()
        .with_secret("app/db", json!({"username": "svc", "password": "hunter2"}))
        .with_secret("app/api", json!({"key": "abc"}))
        .with_secret("app/mq", json!({"url": "amqp://mq"}))
}

#[tokio::test]
async fn repeated_fetch_within_ttl_hits_backend_once() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 100);

    let first = cache.fetch_secret("app/db", None).await.unwrap();
    let second = cache.fetch_secret("app/db", None).await.unwrap();

    assert_eq!(first, json!({"username": "svc", "password": "hunter2"}));
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(MockVault::count(&vault.read_calls), 1);
    assert_eq!(MockVault::count(&vault.approle_calls), 1);
}

#[tokio::test]
async fn expired_entry_is_fetched_again_once() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, Duration::from_millis(50), 100);

    cache.fetch_secret("app/db", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/db", None).await.unwrap();

    assert_eq!(MockVault::count(&vault.read_calls), 2);
    // Second miss reuses the stored token
    assert_eq!(MockVault::count(&vault.approle_calls), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_misses_authenticate_and_fetch_once() {
    let vault = Arc::new(vault().with_read_delay(Duration::from_millis(50)));
    let cache = cache(&vault, TTL, 100);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.fetch_secret("app/db", None).await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let expected = json!({"username": "svc", "password": "hunter2"});
    for result in results {
        assert_eq!(result.unwrap().unwrap(), expected);
    }

    assert_eq!(MockVault::count(&vault.approle_calls), 1);
    assert_eq!(MockVault::count(&vault.read_calls), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_on_distinct_paths_log_in_once() {
    let vault = Arc::new(vault().with_read_delay(Duration::from_millis(30)));
    let cache = cache(&vault, TTL, 100);
    let paths = ["app/db", "app/api", "app/mq"];

    let handles: Vec<_> = paths
        .iter()
        .cycle()
        .take(6)
        .map(|path| {
            let cache = Arc::clone(&cache);
            let path = (*path).to_string();
            tokio::spawn(async move { cache.fetch_secret(&path, None).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(MockVault::count(&vault.approle_calls), 1);
    assert_eq!(MockVault::count(&vault.read_calls), paths.len());
    assert_eq!(cache.stats().size, paths.len());
}

#[tokio::test]
async fn key_selects_single_value() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 100);

    let password = cache.fetch_secret("app/db", Some("password")).await.unwrap();
    assert_eq!(password, json!("hunter2"));

    // Empty key means the whole payload
    let all = cache.fetch_secret("app/db", Some("")).await.unwrap();
    assert_eq!(all["username"], json!("svc"));
    assert_eq!(MockVault::count(&vault.read_calls), 1);
}

#[tokio::test]
async fn missing_key_fails_after_successful_fetch() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 100);

    let err = cache
        .fetch_secret("app/db", Some("token"))
        .await
        .unwrap_err();
    match err {
        Error::SecretKeyNotFound { path, key } => {
            assert_eq!(path, "app/db");
            assert_eq!(key, "token");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The payload itself was cached
    cache.fetch_secret("app/db", Some("username")).await.unwrap();
    assert_eq!(MockVault::count(&vault.read_calls), 1);
}

#[tokio::test]
async fn unknown_path_is_not_cached() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 100);

    for _ in 0..2 {
        let err = cache.fetch_secret("app/missing", None).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }
    assert_eq!(MockVault::count(&vault.read_calls), 2);
    assert_eq!(cache.stats().size, 0);
}

#[tokio::test]
async fn capacity_evicts_least_recently_used() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 2);

    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/api", None).await.unwrap();
    // Touch app/db so app/api becomes the oldest
    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/mq", None).await.unwrap();
    assert_eq!(MockVault::count(&vault.read_calls), 3);

    cache.fetch_secret("app/db", None).await.unwrap();
    assert_eq!(MockVault::count(&vault.read_calls), 3);

    cache.fetch_secret("app/api", None).await.unwrap();
    assert_eq!(MockVault::count(&vault.read_calls), 4);

    let stats = cache.stats();
    assert_eq!(stats.size, 2);
    assert!(stats.evictions >= 2);
}

#[tokio::test]
async fn invalidate_and_clear_force_refetch() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 100);

    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/api", None).await.unwrap();

    assert!(cache.invalidate("app/db"));
    assert!(!cache.invalidate("app/db"));
    cache.fetch_secret("app/db", None).await.unwrap();
    assert_eq!(MockVault::count(&vault.read_calls), 3);

    cache.clear();
    assert_eq!(cache.stats().size, 0);
    cache.fetch_secret("app/api", None).await.unwrap();
    assert_eq!(MockVault::count(&vault.read_calls), 4);
}

#[tokio::test]
async fn stats_track_hits_and_misses() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, TTL, 100);

    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/db", Some("username")).await.unwrap();

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    // The re-check under the guard is not a second miss
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(stats.size, 1);
}

#[tokio::test]
async fn evict_expired_drops_stale_entries() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, Duration::from_millis(30), 100);

    cache.fetch_secret("app/db", None).await.unwrap();
    cache.fetch_secret("app/api", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(cache.evict_expired(), 2);
    assert_eq!(cache.stats().size, 0);
}

#[tokio::test]
async fn revoked_token_triggers_fresh_login() {
    let vault = Arc::new(vault());
    let cache = cache(&vault, Duration::from_millis(20), 100);

    cache.fetch_secret("app/db", None).await.unwrap();
    vault.revoke(common::APPROLE_TOKEN);
    tokio::time::sleep(Duration::from_millis(40)).await;

    cache.fetch_secret("app/db", None).await.unwrap();
    assert_eq!(MockVault::count(&vault.approle_calls), 2);
}
