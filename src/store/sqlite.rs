use super::{Collection, PersistentStore, StoreError, StoredRecord};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

/// SQLite-backed record store
///
/// One table per collection, keyed by record ID.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and its tables
    pub async fn new(database_path: &str) -> Result<Self, StoreError> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let store = SqliteStore { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// In-memory database, for tests and throwaway sessions
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        // Each connection to :memory: is its own database, so pin the pool to one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = SqliteStore { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        // Chunk records (bincode-encoded sample slices)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Asset metadata records, keyed by asset name
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                id TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl PersistentStore for SqliteStore {
    async fn get_record(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT payload FROM {} WHERE id = ?",
            collection.as_str()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>("payload")))
    }

    async fn put_records(
        &self,
        collection: Collection,
        records: Vec<StoredRecord>,
    ) -> Result<(), StoreError> {
        let created_at = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, payload, created_at) VALUES (?, ?, ?)",
            collection.as_str()
        );

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(&sql)
                .bind(&record.id)
                .bind(&record.payload)
                .bind(&created_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn delete_records(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.as_str());

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
