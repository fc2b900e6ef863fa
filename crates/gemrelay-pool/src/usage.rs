use gemrelay_store::CredentialStore;
use gemrelay_store::kv::StoreResult;
use gemrelay_store::records::{CredentialRecord, ModelCategory, PermanentError};

use crate::CONSECUTIVE_429_LIMIT;
use crate::day::usage_day;
use crate::quota::{QuotaScope, ResolvedQuota};

/// Read-modify-write usage and error bookkeeping. Counters are best-effort;
/// concurrent writers may race and undercount, which is accepted.
#[derive(Clone)]
pub struct Bookkeeper {
    credentials: CredentialStore,
}

impl Bookkeeper {
    pub fn new(credentials: CredentialStore) -> Self {
        Self { credentials }
    }

    /// Increments the day's counters and clears the consecutive-429 counter
    /// for the affected scope.
    pub async fn record_success(
        &self,
        id: &str,
        model: &str,
        category: Option<ModelCategory>,
        scope: &QuotaScope,
    ) -> StoreResult<()> {
        let Some(mut record) = self.credentials.get(id).await? else {
            return Ok(());
        };
        reset_if_stale(&mut record);
        record.usage += 1;
        *record.model_usage.entry(model.to_owned()).or_default() += 1;
        match category {
            Some(ModelCategory::Pro) => record.category_usage.pro += 1,
            Some(ModelCategory::Flash) => record.category_usage.flash += 1,
            _ => {}
        }
        record.consecutive_429.remove(&scope.key());
        self.credentials.put(id, &record).await
    }

    /// Counts a quota-exhaustion 429. At the escalation threshold the
    /// scope's usage counter is forced to its configured limit (removing
    /// the credential from eligibility without waiting for the lazy check)
    /// and the consecutive counter resets to 0. Returns whether escalation
    /// fired.
    pub async fn record_rate_limit(
        &self,
        id: &str,
        scope: &QuotaScope,
        quota: Option<&ResolvedQuota>,
    ) -> StoreResult<bool> {
        let Some(mut record) = self.credentials.get(id).await? else {
            return Ok(false);
        };
        let key = scope.key();
        let count = record.consecutive_429.entry(key.clone()).or_insert(0);
        *count += 1;
        let escalated = *count >= CONSECUTIVE_429_LIMIT;
        if escalated {
            record.consecutive_429.insert(key, 0);
            if let Some(quota) = quota {
                reset_if_stale(&mut record);
                quota.scope.set_usage(&mut record, quota.limit);
            }
        }
        self.credentials.put(id, &record).await?;
        Ok(escalated)
    }

    /// 401/403 from upstream permanently disables the credential.
    pub async fn record_permanent_error(
        &self,
        id: &str,
        error: PermanentError,
    ) -> StoreResult<()> {
        let Some(mut record) = self.credentials.get(id).await? else {
            return Ok(());
        };
        record.error_status = Some(error);
        self.credentials.put(id, &record).await
    }
}

/// Lazy day rollover: a stale stamp means the counters belong to a past day
/// and are logically zero.
fn reset_if_stale(record: &mut CredentialRecord) {
    let today = usage_day();
    if record.usage_date != today {
        record.usage = 0;
        record.model_usage.clear();
        record.category_usage = Default::default();
        record.usage_date = today;
    }
}
