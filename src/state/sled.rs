use std::path::Path;

use super::{KvStore, StoreError, WriteBatch};

/// Disk store on a sled log-structured tree.
///
/// Batches are atomic but only durable after [`KvStore::flush`].
pub struct SledStore {
    db: ::sled::Db,
}

impl SledStore {
    /// Opens or creates the store under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let db = ::sled::open(dir)?;
        log::debug!("opened sled store at {}", dir.display());
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = ::sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(value) => sled_batch.insert(key, value),
                None => sled_batch.remove(key),
            }
        }
        Ok(self.db.apply_batch(sled_batch)?)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.db
            .scan_prefix(prefix)
            .keys()
            .map(|key| Ok(key?.to_vec()))
            .collect()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
