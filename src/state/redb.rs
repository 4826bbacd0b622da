use std::{fs, path::Path};

use ::redb::{Database, TableDefinition};

use super::{KvStore, StoreError, WriteBatch};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("state");

/// File name of the database inside the store directory.
pub const FILE_NAME: &str = "state.redb";

/// Disk store on a single redb copy-on-write B-tree.
///
/// Every [`KvStore::write`] is one durable write transaction, so [`KvStore::flush`] has nothing left to do.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens or creates the store under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or the database cannot be opened.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let db = Database::create(dir.join(FILE_NAME)).map_err(::redb::Error::from)?;
        let store = Self { db };
        store.ensure_table()?;
        log::debug!("opened redb store at {}", dir.display());
        Ok(store)
    }

    fn ensure_table(&self) -> Result<(), ::redb::Error> {
        let txn = self.db.begin_write()?;
        txn.open_table(TABLE)?;
        txn.commit()?;
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ::redb::Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        Ok(table.get(key)?.map(|value| value.value().to_vec()))
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), ::redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            for (key, value) in batch {
                match value {
                    Some(value) => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    None => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ::redb::Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        let mut keys = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read(key)?)
    }

    fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        Ok(self.apply(batch)?)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self.scan(prefix)?)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
