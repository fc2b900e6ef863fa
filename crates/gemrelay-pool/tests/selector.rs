use std::collections::BTreeMap;
use std::sync::Arc;

use gemrelay_pool::quota::QuotaScope;
use gemrelay_pool::{Bookkeeper, KeyPool, PoolError};
use gemrelay_store::records::{
    CategoryQuotas, CredentialRecord, ModelCategory, ModelConfig, PermanentError,
};
use gemrelay_store::{ConfigStore, CredentialStore, KvStore, MemoryKv};

struct Fixture {
    credentials: CredentialStore,
    config: ConfigStore,
    pool: KeyPool,
    bookkeeper: Bookkeeper,
}

fn fixture() -> Fixture {
    let kv = Arc::new(MemoryKv::new());
    let credentials = CredentialStore::new(kv.clone());
    let config = ConfigStore::new(kv);
    Fixture {
        pool: KeyPool::new(credentials.clone(), config.clone()),
        bookkeeper: Bookkeeper::new(credentials.clone()),
        credentials,
        config,
    }
}

async fn add_credentials(fixture: &Fixture, ids: &[&str]) {
    for id in ids {
        fixture
            .credentials
            .add(id, &CredentialRecord::new(format!("sk-{id}"), *id))
            .await
            .unwrap();
    }
}

async fn configure_model(
    fixture: &Fixture,
    model: &str,
    category: ModelCategory,
    quota: Option<u64>,
    individual_quota: Option<u64>,
) {
    let mut models = BTreeMap::new();
    models.insert(
        model.to_owned(),
        ModelConfig {
            category,
            quota,
            individual_quota,
        },
    );
    fixture.config.set_models(&models).await.unwrap();
}

/// Lets the fire-and-forget cursor write land on the test runtime.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn empty_pool_has_no_key() {
    let fixture = fixture();
    assert!(matches!(
        fixture.pool.select(None).await,
        Err(PoolError::NoKeyAvailable)
    ));
}

#[tokio::test]
async fn rotation_is_fair_without_exclusions() {
    let fixture = fixture();
    add_credentials(&fixture, &["a", "b", "c"]).await;

    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut order = Vec::new();
    for _ in 0..7 {
        let selected = fixture.pool.select(None).await.unwrap();
        settle().await;
        *counts.entry(selected.id.clone()).or_default() += 1;
        order.push(selected.id);
    }
    // 7 selections over 3 keys: each chosen 2 or 3 times, in list order.
    for count in counts.values() {
        assert!(*count == 2 || *count == 3);
    }
    assert_eq!(order[..3], ["a", "b", "c"]);
    assert_eq!(order[3..6], ["a", "b", "c"]);
}

#[tokio::test]
async fn scan_starts_at_persisted_cursor() {
    let fixture = fixture();
    add_credentials(&fixture, &["a", "b", "c"]).await;
    fixture.credentials.set_cursor(1).await.unwrap();
    assert_eq!(fixture.pool.select(None).await.unwrap().id, "b");
}

#[tokio::test]
async fn stale_cursor_wraps_instead_of_indexing_out_of_bounds() {
    let fixture = fixture();
    add_credentials(&fixture, &["a", "b"]).await;
    fixture.credentials.set_cursor(9).await.unwrap();
    // 9 % 2 == 1
    assert_eq!(fixture.pool.select(None).await.unwrap().id, "b");
}

#[tokio::test]
async fn permanently_failed_credential_is_never_selected() {
    let fixture = fixture();
    add_credentials(&fixture, &["x", "y"]).await;
    fixture
        .bookkeeper
        .record_permanent_error("x", PermanentError::Unauthorized)
        .await
        .unwrap();

    for _ in 0..4 {
        let selected = fixture.pool.select(None).await.unwrap();
        settle().await;
        assert_eq!(selected.id, "y");
    }
}

// Scenario B: the flag survives a simulated day rollover because the lazy
// reset touches usage counters only, never the error flag.
#[tokio::test]
async fn permanent_error_survives_day_rollover() {
    let fixture = fixture();
    add_credentials(&fixture, &["x"]).await;
    fixture
        .bookkeeper
        .record_permanent_error("x", PermanentError::Forbidden)
        .await
        .unwrap();

    let mut record = fixture.credentials.get("x").await.unwrap().unwrap();
    record.usage_date = "2020-01-01".to_owned();
    fixture.credentials.put("x", &record).await.unwrap();

    assert!(matches!(
        fixture.pool.select(Some("any-model")).await,
        Err(PoolError::NoKeyAvailable)
    ));
}

// Scenario A: one credential, Pro category quota of 2.
#[tokio::test]
async fn category_quota_exhausts_single_credential() {
    let fixture = fixture();
    add_credentials(&fixture, &["only"]).await;
    configure_model(&fixture, "modelA", ModelCategory::Pro, None, None).await;
    fixture
        .config
        .set_category_quotas(&CategoryQuotas {
            pro: Some(2),
            flash: None,
        })
        .await
        .unwrap();

    let scope = QuotaScope::Category(gemrelay_pool::QuotaCategory::Pro);
    for _ in 0..2 {
        let selected = fixture.pool.select(Some("modelA")).await.unwrap();
        settle().await;
        fixture
            .bookkeeper
            .record_success(&selected.id, "modelA", Some(ModelCategory::Pro), &scope)
            .await
            .unwrap();
    }
    assert!(matches!(
        fixture.pool.select(Some("modelA")).await,
        Err(PoolError::NoKeyAvailable)
    ));
}

#[tokio::test]
async fn stale_day_stamp_is_never_excluded_on_quota_grounds() {
    let fixture = fixture();
    add_credentials(&fixture, &["old"]).await;
    configure_model(&fixture, "modelA", ModelCategory::Custom, Some(5), None).await;

    let mut record = fixture.credentials.get("old").await.unwrap().unwrap();
    record.usage_date = "2020-01-01".to_owned();
    record.model_usage.insert("modelA".to_owned(), 999);
    fixture.credentials.put("old", &record).await.unwrap();

    assert_eq!(fixture.pool.select(Some("modelA")).await.unwrap().id, "old");
}

#[tokio::test]
async fn individual_quota_overrides_category_quota() {
    let fixture = fixture();
    add_credentials(&fixture, &["k"]).await;
    configure_model(&fixture, "modelP", ModelCategory::Pro, None, Some(1)).await;
    fixture
        .config
        .set_category_quotas(&CategoryQuotas {
            pro: Some(100),
            flash: None,
        })
        .await
        .unwrap();

    let scope = QuotaScope::Model("modelP".to_owned());
    let selected = fixture.pool.select(Some("modelP")).await.unwrap();
    settle().await;
    fixture
        .bookkeeper
        .record_success(&selected.id, "modelP", Some(ModelCategory::Pro), &scope)
        .await
        .unwrap();

    // One use hits the individual limit even though the category allows 100.
    assert!(matches!(
        fixture.pool.select(Some("modelP")).await,
        Err(PoolError::NoKeyAvailable)
    ));
}

#[tokio::test]
async fn quota_limited_credential_is_skipped_for_the_next_one() {
    let fixture = fixture();
    add_credentials(&fixture, &["full", "fresh"]).await;
    configure_model(&fixture, "modelA", ModelCategory::Custom, Some(1), None).await;

    let scope = QuotaScope::Model("modelA".to_owned());
    fixture
        .bookkeeper
        .record_success("full", "modelA", Some(ModelCategory::Custom), &scope)
        .await
        .unwrap();

    for _ in 0..3 {
        let selected = fixture.pool.select(Some("modelA")).await.unwrap();
        settle().await;
        assert_eq!(selected.id, "fresh");
    }
}

#[tokio::test]
async fn malformed_records_are_skipped_not_fatal() {
    let kv = Arc::new(MemoryKv::new());
    let credentials = CredentialStore::new(kv.clone());
    let config = ConfigStore::new(kv.clone());
    let pool = KeyPool::new(credentials.clone(), config);

    credentials
        .add("good", &CredentialRecord::new("sk", "good"))
        .await
        .unwrap();
    let mut rotation = credentials.rotation().await.unwrap();
    rotation.insert(0, "missing".to_owned());
    rotation.insert(1, "broken".to_owned());
    credentials.set_rotation(&rotation).await.unwrap();
    kv.put("key:broken", serde_json::json!(42)).await.unwrap();

    assert_eq!(pool.select(None).await.unwrap().id, "good");
}

// Scenario C: three consecutive quota-flavored 429s on a Custom model with
// quota 100 force the counter to 100 and clear the consecutive counter.
#[tokio::test]
async fn consecutive_rate_limits_escalate_to_forced_limit() {
    let fixture = fixture();
    add_credentials(&fixture, &["y"]).await;
    configure_model(&fixture, "modelB", ModelCategory::Custom, Some(100), None).await;

    let quota = fixture
        .pool
        .resolve_quota("modelB")
        .await
        .unwrap()
        .unwrap();
    let scope = quota.scope.clone();

    for attempt in 1..=3u32 {
        let escalated = fixture
            .bookkeeper
            .record_rate_limit("y", &scope, Some(&quota))
            .await
            .unwrap();
        assert_eq!(escalated, attempt == 3);
    }

    let record = fixture.credentials.get("y").await.unwrap().unwrap();
    assert_eq!(record.model_usage.get("modelB"), Some(&100));
    assert_eq!(record.consecutive_429.get(&scope.key()), Some(&0));
    assert!(matches!(
        fixture.pool.select(Some("modelB")).await,
        Err(PoolError::NoKeyAvailable)
    ));
}

#[tokio::test]
async fn intervening_success_resets_consecutive_counter() {
    let fixture = fixture();
    add_credentials(&fixture, &["y"]).await;
    configure_model(&fixture, "modelB", ModelCategory::Custom, Some(100), None).await;

    let quota = fixture
        .pool
        .resolve_quota("modelB")
        .await
        .unwrap()
        .unwrap();
    let scope = quota.scope.clone();

    for _ in 0..2 {
        fixture
            .bookkeeper
            .record_rate_limit("y", &scope, Some(&quota))
            .await
            .unwrap();
    }
    fixture
        .bookkeeper
        .record_success("y", "modelB", Some(ModelCategory::Custom), &scope)
        .await
        .unwrap();
    let record = fixture.credentials.get("y").await.unwrap().unwrap();
    assert_eq!(record.consecutive_429.get(&scope.key()), None);

    // The next 429 starts a fresh run; no escalation yet.
    let escalated = fixture
        .bookkeeper
        .record_rate_limit("y", &scope, Some(&quota))
        .await
        .unwrap();
    assert!(!escalated);
    let record = fixture.credentials.get("y").await.unwrap().unwrap();
    assert!(record.model_usage.get("modelB").copied().unwrap_or(0) < 100);
}
