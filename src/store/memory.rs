use super::{Collection, PersistentStore, StoreError, StoredRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory record store
///
/// Keeps both collections in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    chunks: RwLock<HashMap<String, Vec<u8>>>,
    metadata: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, collection: Collection) -> &RwLock<HashMap<String, Vec<u8>>> {
        match collection {
            Collection::Chunks => &self.chunks,
            Collection::Metadata => &self.metadata,
        }
    }

    /// Number of records held in a collection
    pub async fn len(&self, collection: Collection) -> usize {
        self.collection(collection).read().await.len()
    }
}

#[async_trait::async_trait]
impl PersistentStore for MemoryStore {
    async fn get_record(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.collection(collection).read().await.get(id).cloned())
    }

    async fn put_records(
        &self,
        collection: Collection,
        records: Vec<StoredRecord>,
    ) -> Result<(), StoreError> {
        let mut map = self.collection(collection).write().await;
        for record in records {
            map.insert(record.id, record.payload);
        }
        Ok(())
    }

    async fn delete_records(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<(), StoreError> {
        let mut map = self.collection(collection).write().await;
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }
}
