//! Key/value persistence for chunk and metadata records
//!
//! Records are opaque byte payloads keyed by a string ID inside one of two
//! fixed collections. Serialization is the caller's concern.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// The two record collections a store must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Chunks,
    Metadata,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Chunks => "chunks",
            Collection::Metadata => "metadata",
        }
    }
}

/// One record to persist
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub payload: Vec<u8>,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Trait for record persistence (allows swapping backends for tests)
///
/// IDs are unique within a collection; writing an existing ID replaces it.
#[async_trait::async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_record(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put_records(
        &self,
        collection: Collection,
        records: Vec<StoredRecord>,
    ) -> Result<(), StoreError>;

    async fn delete_records(&self, collection: Collection, ids: &[String])
        -> Result<(), StoreError>;
}
