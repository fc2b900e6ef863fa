use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Schema,
};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::entities;
use crate::entities::kv_entry;
use crate::kv::{KvStore, StoreResult};

/// Durable store backed by a single SeaORM table.
#[derive(Clone)]
pub struct SqliteKv {
    db: DatabaseConnection,
}

impl SqliteKv {
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    /// Entity-first schema sync; run once at bootstrap.
    pub async fn sync(&self) -> StoreResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::KvEntries)
            .sync(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        let row = entities::KvEntries::find_by_id(key).one(&self.db).await?;
        Ok(row.map(|row| row.value))
    }

    async fn put(&self, key: &str, value: JsonValue) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        match entities::KvEntries::find_by_id(key).one(&self.db).await? {
            Some(existing) => {
                let mut active: kv_entry::ActiveModel = existing.into();
                active.value = ActiveValue::Set(value);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                kv_entry::ActiveModel {
                    key: ActiveValue::Set(key.to_owned()),
                    value: ActiveValue::Set(value),
                    updated_at: ActiveValue::Set(now),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, JsonValue)>> {
        let rows = entities::KvEntries::find()
            .filter(kv_entry::Column::Key.starts_with(prefix))
            .order_by_asc(kv_entry::Column::Key)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        entities::KvEntries::delete_by_id(key).exec(&self.db).await?;
        Ok(())
    }
}
