//! End-to-end behavior of the storage facade

mod common;

use certstash_storage::{
    CacheConfig, CacheFailurePolicy, KeyInfo, LocalCache, MemoryObjectStore, StorageBuilder,
    StorageError,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cleartext_store_writes_raw_bytes() {
    let h = HarnessBuilder::new().build().await;

    h.storage.store("k", &[0x01, 0x02]).await.unwrap();

    assert_eq!(h.store.object(BUCKET, "prod/k"), Some(vec![0x01, 0x02]));
    assert_eq!(h.storage.load("k").await.unwrap(), vec![0x01, 0x02]);
}

#[tokio::test]
async fn test_encrypted_roundtrip() {
    let h = HarnessBuilder::new().encrypted().build().await;
    let pem = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    h.storage.store("example.com/cert.pem", pem).await.unwrap();

    let raw = h.remote("example.com/cert.pem").unwrap();
    assert_eq!(raw.len(), pem.len() + 24 + 16);
    assert!(!raw.windows(pem.len()).any(|w| w == pem));

    assert_eq!(h.storage.load("example.com/cert.pem").await.unwrap(), pem);
}

#[tokio::test]
async fn test_short_key_rejected_at_construction() {
    let err = StorageBuilder::new(Arc::new(MemoryObjectStore::with_bucket(BUCKET)), BUCKET)
        .encryption_key(vec![7u8; 16])
        .build()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StorageError::InvalidKeyLength {
            expected: 32,
            actual: 16
        }
    ));
}

#[tokio::test]
async fn test_missing_bucket_rejected() {
    let err = StorageBuilder::new(Arc::new(MemoryObjectStore::new()), "nope")
        .build()
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::BucketMissing { bucket } if bucket == "nope"));
}

#[tokio::test]
async fn test_load_missing_key_is_not_found() {
    let h = HarnessBuilder::new().build().await;

    let err = h.storage.load("absent").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_tampered_ciphertext_is_not_found() {
    let h = HarnessBuilder::new().encrypted().build().await;
    h.storage.store("k", b"secret").await.unwrap();

    let mut raw = h.remote("k").unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    h.store.insert_object(BUCKET, "prod/k", raw, chrono::Utc::now());

    let err = h.storage.load("k").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { key } if key == "k"));
}

#[tokio::test]
async fn test_cleartext_reader_passes_ciphertext_through() {
    let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
    let writer = HarnessBuilder::new().store(store.clone()).encrypted().build().await;
    writer.storage.store("k", b"secret").await.unwrap();

    let reader = HarnessBuilder::new().store(store).build().await;
    let loaded = reader.storage.load("k").await.unwrap();

    assert_ne!(loaded, b"secret");
    assert_eq!(loaded, writer.remote("k").unwrap());
}

#[tokio::test]
async fn test_load_is_served_from_cache() {
    let h = HarnessBuilder::new().build().await;
    h.storage.store("k", b"v1").await.unwrap();

    h.storage.load("k").await.unwrap();
    h.storage.load("k").await.unwrap();

    assert_eq!(h.store.request_counts().get, 1);
    assert_eq!(h.storage.cache().stats().await.hits, 1);
}

#[tokio::test]
async fn test_writes_leave_cache_stale() {
    let h = HarnessBuilder::new().build().await;
    h.storage.store("k", b"v1").await.unwrap();
    h.storage.load("k").await.unwrap();

    h.storage.store("k", b"v2").await.unwrap();
    assert_eq!(h.storage.load("k").await.unwrap(), b"v1");

    h.storage.delete("k").await.unwrap();
    assert_eq!(h.storage.load("k").await.unwrap(), b"v1");
    assert!(!h.storage.exists("k").await);
}

#[tokio::test]
async fn test_invalidate_on_write() {
    let h = HarnessBuilder::new().invalidate_on_write().build().await;
    h.storage.store("k", b"v1").await.unwrap();
    h.storage.load("k").await.unwrap();

    h.storage.store("k", b"v2").await.unwrap();
    assert_eq!(h.storage.load("k").await.unwrap(), b"v2");

    h.storage.delete("k").await.unwrap();
    assert!(h.storage.load("k").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_expired_cache_entry_falls_through() {
    let h = HarnessBuilder::new().ttl_seconds(1).build().await;
    h.storage.store("k", b"v1").await.unwrap();
    h.storage.load("k").await.unwrap();
    h.storage.store("k", b"v2").await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(h.storage.load("k").await.unwrap(), b"v2");
    assert_eq!(h.store.request_counts().get, 2);
}

#[tokio::test]
async fn test_stat_is_cached() {
    let h = HarnessBuilder::new().build().await;
    h.storage.store("k", b"hello").await.unwrap();

    let first = h.storage.stat("k").await.unwrap();
    let second = h.storage.stat("k").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.key, "k");
    assert_eq!(first.size, 5);
    assert!(first.is_terminal);
    assert_eq!(h.store.request_counts().stat, 1);
}

#[tokio::test]
async fn test_stat_reports_stored_size_when_encrypted() {
    let h = HarnessBuilder::new().encrypted().build().await;
    h.storage.store("k", b"hello").await.unwrap();

    let info: KeyInfo = h.storage.stat("k").await.unwrap();
    assert_eq!(info.size, 5 + 24 + 16);
}

#[tokio::test]
async fn test_stat_missing_key_propagates_not_found() {
    let h = HarnessBuilder::new().build().await;

    let err = h.storage.stat("absent").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, StorageError::Store(_)));
}

#[tokio::test]
async fn test_exists_asks_remote() {
    let h = HarnessBuilder::new().build().await;
    assert!(!h.storage.exists("k").await);

    h.storage.store("k", b"v").await.unwrap();
    assert!(h.storage.exists("k").await);
    assert!(h.storage.exists("k").await);
    assert_eq!(h.store.request_counts().stat, 3);
}

#[tokio::test]
async fn test_list_strips_prefix() {
    let h = HarnessBuilder::new().build().await;
    for key in ["certs/a.com/cert.pem", "certs/a.com/key.pem", "certs/b.com/cert.pem"] {
        h.storage.store(key, b"x").await.unwrap();
    }
    h.store
        .insert_object(BUCKET, "other/certs/c.com/cert.pem", b"x".to_vec(), chrono::Utc::now());

    let all = h.storage.list("certs", true).await.unwrap();
    assert_eq!(
        all,
        vec![
            "certs/a.com/cert.pem",
            "certs/a.com/key.pem",
            "certs/b.com/cert.pem"
        ]
    );

    let top = h.storage.list("certs/", false).await.unwrap();
    assert_eq!(top, vec!["certs/a.com/", "certs/b.com/"]);
}

#[tokio::test]
async fn test_degraded_cache_still_serves() {
    let dir = tempfile::tempdir().unwrap();
    let held = LocalCache::open(dir.path()).await.unwrap();

    let storage = StorageBuilder::new(Arc::new(MemoryObjectStore::with_bucket(BUCKET)), BUCKET)
        .cache_config(CacheConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .build()
        .await
        .unwrap();

    assert!(!storage.cache().is_enabled());
    storage.store("k", b"v").await.unwrap();
    assert_eq!(storage.load("k").await.unwrap(), b"v");
    drop(held);
}

#[tokio::test]
async fn test_locked_cache_fails_when_required() {
    let dir = tempfile::tempdir().unwrap();
    let _held = LocalCache::open(dir.path()).await.unwrap();

    let err = StorageBuilder::new(Arc::new(MemoryObjectStore::with_bucket(BUCKET)), BUCKET)
        .cache_config(CacheConfig {
            path: dir.path().to_path_buf(),
            on_open_failure: CacheFailurePolicy::Fail,
            ..Default::default()
        })
        .build()
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::CacheUnavailable { .. }));
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let store = Arc::new(MemoryObjectStore::with_bucket(BUCKET));
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        path: dir.path().join("cache"),
        ..Default::default()
    };

    {
        let storage = StorageBuilder::new(store.clone(), BUCKET)
            .cache_config(config.clone())
            .build()
            .await
            .unwrap();
        storage.store("k", b"v").await.unwrap();
        storage.load("k").await.unwrap();
    }

    let storage = StorageBuilder::new(store.clone(), BUCKET)
        .cache_config(config)
        .build()
        .await
        .unwrap();
    assert_eq!(storage.load("k").await.unwrap(), b"v");
    assert_eq!(store.request_counts().get, 1);
}
