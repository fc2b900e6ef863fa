use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::kv::{KvStore, StoreResult};
use crate::records::{AccessKey, CategoryQuotas, ModelConfig};

const MODELS_KEY: &str = "models";
const CATEGORY_QUOTAS_KEY: &str = "category_quotas";
const ACCESS_KEYS_KEY: &str = "access_keys";
const SESSION_SECRET_KEY: &str = "session_secret";

/// Typed view over the singleton configuration entries. Read-only from the
/// proxy core's perspective; the admin surface is the only writer.
#[derive(Clone)]
pub struct ConfigStore {
    kv: Arc<dyn KvStore>,
}

impl ConfigStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn models(&self) -> StoreResult<BTreeMap<String, ModelConfig>> {
        self.get_or_default(MODELS_KEY).await
    }

    pub async fn set_models(&self, models: &BTreeMap<String, ModelConfig>) -> StoreResult<()> {
        self.put(MODELS_KEY, models).await
    }

    pub async fn category_quotas(&self) -> StoreResult<CategoryQuotas> {
        self.get_or_default(CATEGORY_QUOTAS_KEY).await
    }

    pub async fn set_category_quotas(&self, quotas: &CategoryQuotas) -> StoreResult<()> {
        self.put(CATEGORY_QUOTAS_KEY, quotas).await
    }

    pub async fn access_keys(&self) -> StoreResult<BTreeMap<String, AccessKey>> {
        self.get_or_default(ACCESS_KEYS_KEY).await
    }

    pub async fn set_access_keys(&self, keys: &BTreeMap<String, AccessKey>) -> StoreResult<()> {
        self.put(ACCESS_KEYS_KEY, keys).await
    }

    pub async fn session_secret(&self) -> StoreResult<Option<String>> {
        let Some(value) = self.kv.get(SESSION_SECRET_KEY).await? else {
            return Ok(None);
        };
        Ok(value.as_str().map(str::to_owned))
    }

    pub async fn set_session_secret(&self, secret: &str) -> StoreResult<()> {
        self.kv
            .put(SESSION_SECRET_KEY, JsonValue::String(secret.to_owned()))
            .await
    }

    async fn get_or_default<T>(&self, key: &str) -> StoreResult<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let Some(value) = self.kv.get(key).await? else {
            return Ok(T::default());
        };
        Ok(serde_json::from_value(value)?)
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        self.kv.put(key, serde_json::to_value(value)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::records::ModelCategory;

    #[tokio::test]
    async fn models_round_trip() {
        let config = ConfigStore::new(Arc::new(MemoryKv::new()));
        assert!(config.models().await.unwrap().is_empty());

        let mut models = BTreeMap::new();
        models.insert(
            "gemini-2.5-pro".to_owned(),
            ModelConfig {
                category: ModelCategory::Pro,
                quota: None,
                individual_quota: Some(50),
            },
        );
        config.set_models(&models).await.unwrap();
        assert_eq!(config.models().await.unwrap(), models);
    }

    #[tokio::test]
    async fn session_secret_absent_until_set() {
        let config = ConfigStore::new(Arc::new(MemoryKv::new()));
        assert_eq!(config.session_secret().await.unwrap(), None);
        config.set_session_secret("s3cret").await.unwrap();
        assert_eq!(
            config.session_secret().await.unwrap(),
            Some("s3cret".to_owned())
        );
    }
}
