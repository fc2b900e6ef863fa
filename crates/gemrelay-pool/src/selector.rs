use gemrelay_store::kv::StoreError;
use gemrelay_store::records::CredentialRecord;
use gemrelay_store::{ConfigStore, CredentialStore};
use tracing::warn;

use crate::day::usage_day;
use crate::quota::{ResolvedQuota, resolve};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no key available")]
    NoKeyAvailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub id: String,
    pub record: CredentialRecord,
}

/// Round-robin credential selection over the persisted rotation list.
#[derive(Clone)]
pub struct KeyPool {
    credentials: CredentialStore,
    config: ConfigStore,
}

impl KeyPool {
    pub fn new(credentials: CredentialStore, config: ConfigStore) -> Self {
        Self {
            credentials,
            config,
        }
    }

    /// The quota governing `model`, if the catalog configures one.
    pub async fn resolve_quota(&self, model: &str) -> Result<Option<ResolvedQuota>, PoolError> {
        let models = self.config.models().await?;
        let Some(config) = models.get(model) else {
            return Ok(None);
        };
        let category_quotas = self.config.category_quotas().await?;
        Ok(resolve(model, config, &category_quotas))
    }

    /// One wrapped pass over the rotation list starting at the persisted
    /// cursor. Credentials with a permanent error flag are hard-excluded;
    /// with a resolved quota, credentials at their limit for today are
    /// soft-excluded. Malformed records are skipped. The cursor advances
    /// past the chosen entry as a best-effort background write.
    pub async fn select(&self, model: Option<&str>) -> Result<SelectedKey, PoolError> {
        let rotation = self.credentials.rotation().await?;
        if rotation.is_empty() {
            return Err(PoolError::NoKeyAvailable);
        }

        let quota = match model {
            Some(model) => self.resolve_quota(model).await?,
            None => None,
        };
        let today = usage_day();
        let len = rotation.len();
        let start = (self.credentials.cursor().await? as usize) % len;

        for step in 0..len {
            let index = (start + step) % len;
            let id = &rotation[index];
            let Some(record) = self.credentials.get(id).await? else {
                continue;
            };
            if record.error_status.is_some() {
                continue;
            }
            // A stale day stamp implies zero usage, so quota never excludes.
            if let Some(quota) = &quota
                && record.usage_date == today
                && quota.scope.usage(&record) >= quota.limit
            {
                continue;
            }

            let next = ((index + 1) % len) as u64;
            let credentials = self.credentials.clone();
            tokio::spawn(async move {
                if let Err(err) = credentials.set_cursor(next).await {
                    warn!(event = "cursor_persist_failed", error = %err);
                }
            });
            return Ok(SelectedKey {
                id: id.clone(),
                record,
            });
        }
        Err(PoolError::NoKeyAvailable)
    }
}
