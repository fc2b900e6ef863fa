use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::kv::{KvStore, StoreResult};
use crate::records::CredentialRecord;

const KEY_PREFIX: &str = "key:";
const ROTATION_KEY: &str = "key_list";
const CURSOR_KEY: &str = "key_index";

/// Typed view over credential records, the rotation list and the cursor.
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// A malformed record decodes to `None`, never to an error; the caller
    /// treats it like a missing credential.
    pub async fn get(&self, id: &str) -> StoreResult<Option<CredentialRecord>> {
        let Some(value) = self.kv.get(&format!("{KEY_PREFIX}{id}")).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(event = "credential_record_malformed", id = %id, error = %err);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, id: &str, record: &CredentialRecord) -> StoreResult<()> {
        self.kv
            .put(&format!("{KEY_PREFIX}{id}"), serde_json::to_value(record)?)
            .await
    }

    pub async fn list(&self) -> StoreResult<Vec<(String, CredentialRecord)>> {
        let mut records = Vec::new();
        for (key, value) in self.kv.list(KEY_PREFIX).await? {
            let id = key.trim_start_matches(KEY_PREFIX).to_owned();
            match serde_json::from_value(value) {
                Ok(record) => records.push((id, record)),
                Err(err) => {
                    warn!(event = "credential_record_malformed", id = %id, error = %err);
                }
            }
        }
        Ok(records)
    }

    /// Adds the record and appends its id to the rotation list.
    pub async fn add(&self, id: &str, record: &CredentialRecord) -> StoreResult<()> {
        self.put(id, record).await?;
        let mut rotation = self.rotation().await?;
        if !rotation.iter().any(|existing| existing == id) {
            rotation.push(id.to_owned());
            self.set_rotation(&rotation).await?;
        }
        Ok(())
    }

    /// Deletes the record and drops its id from the rotation list.
    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        self.kv.delete(&format!("{KEY_PREFIX}{id}")).await?;
        let mut rotation = self.rotation().await?;
        let before = rotation.len();
        rotation.retain(|existing| existing != id);
        if rotation.len() != before {
            self.set_rotation(&rotation).await?;
        }
        Ok(())
    }

    pub async fn rotation(&self) -> StoreResult<Vec<String>> {
        let Some(value) = self.kv.get(ROTATION_KEY).await? else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub async fn set_rotation(&self, ids: &[String]) -> StoreResult<()> {
        self.kv.put(ROTATION_KEY, json!(ids)).await
    }

    pub async fn cursor(&self) -> StoreResult<u64> {
        let Some(value) = self.kv.get(CURSOR_KEY).await? else {
            return Ok(0);
        };
        Ok(value.as_u64().unwrap_or(0))
    }

    pub async fn set_cursor(&self, cursor: u64) -> StoreResult<()> {
        self.kv.put(CURSOR_KEY, json!(cursor)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn add_and_remove_maintain_rotation() {
        let store = store();
        store
            .add("a", &CredentialRecord::new("sk-a", "first"))
            .await
            .unwrap();
        store
            .add("b", &CredentialRecord::new("sk-b", "second"))
            .await
            .unwrap();
        assert_eq!(store.rotation().await.unwrap(), vec!["a", "b"]);

        store.remove("a").await.unwrap();
        assert_eq!(store.rotation().await.unwrap(), vec!["b"]);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_record_reads_as_missing() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("key:bad", json!("not an object")).await.unwrap();
        let store = CredentialStore::new(kv);
        assert!(store.get("bad").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_defaults_to_zero() {
        let store = store();
        assert_eq!(store.cursor().await.unwrap(), 0);
        store.set_cursor(7).await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), 7);
    }
}
