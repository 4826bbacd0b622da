//! Persistent world state over a pluggable key-value store.
//!
//! [`StateDb`] is the database the EVM reads from and commits into. Changes produced by transactions stay in
//! memory until [`StateDb::commit`] flushes them to the underlying [`KvStore`] as one atomic [`WriteBatch`],
//! tagged with a block number.
//!
//! Three stores are provided: [`MemoryStore`], [`RedbStore`] and [`SledStore`].
//!
//! # Layout
//!
//! | Key | Value |
//! |---|---|
//! | `a\|<address>` | RLP `[balance, nonce, code_hash]`, balance as trimmed big-endian bytes |
//! | `c\|<code_hash>` | raw runtime code |
//! | `s\|<address>\|<slot>` | RLP of the trimmed big-endian value, zero values are deleted |
//! | `m\|head` | RLP of the last committed block number |
//! | `m\|root` | Merkle-Patricia state root after the last commit |
//!
//! Every commit also folds its changes into an in-memory Merkle-Patricia account trie with one storage trie per
//! account, using the usual Ethereum leaf encodings, and reports the resulting state root.
//!
//! # Examples
//!
//! ```
//! use evm_state_bench::state::{MemoryStore, StateDb};
//! use revm::primitives::{Address, U256};
//! use revm::Database;
//!
//! let mut db = StateDb::new(MemoryStore::default());
//! let address = Address::repeat_byte(0x11);
//!
//! db.set_balance(address, U256::from(5)).unwrap();
//! let outcome = db.commit(1, true).unwrap();
//!
//! assert_eq!(outcome.accounts, 1);
//! assert_eq!(db.head().unwrap(), Some(1));
//! assert_eq!(db.basic(address).unwrap().unwrap().balance, U256::from(5));
//! ```

use std::{collections::BTreeMap, mem};

use ethers_core::utils::rlp::{self, DecoderError, Rlp, RlpStream};
use mpt_trie::{nibbles::BytesToNibblesError, trie_ops::TrieOpError};
use revm::{
    primitives::{
        keccak256, Account, AccountInfo, Address, Bytecode, Bytes, HashMap, B256, KECCAK_EMPTY,
        U256,
    },
    Database, DatabaseCommit,
};

mod memory;
mod redb;
mod sled;
mod trie;

pub use self::{memory::MemoryStore, redb::RedbStore, sled::SledStore};
use self::trie::StateTries;

const ACCOUNT_PREFIX: &[u8] = b"a|";
const CODE_PREFIX: &[u8] = b"c|";
const STORAGE_PREFIX: &[u8] = b"s|";
const HEAD_KEY: &[u8] = b"m|head";
const ROOT_KEY: &[u8] = b"m|root";

/// Errors raised by a [`KvStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure while preparing a store directory.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Failure inside the redb backend.
    #[error("redb: {0}")]
    Redb(#[from] ::redb::Error),
    /// Failure inside the sled backend.
    #[error("sled: {0}")]
    Sled(#[from] ::sled::Error),
}

/// Errors raised by [`StateDb`].
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The underlying store failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// A stored value could not be decoded.
    #[error("decode: {0}")]
    Decode(#[from] DecoderError),
    /// An account references code that is not stored.
    #[error("missing code for hash {0}")]
    MissingCode(B256),
    /// The state trie rejected an update.
    #[error("trie: {0}")]
    Trie(#[from] TrieOpError),
    /// A trie key could not be built.
    #[error("trie key: {0}")]
    TrieKey(#[from] BytesToNibblesError),
}

/// Ordered list of puts and deletes applied atomically by [`KvStore::write`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    /// Queues a write of `value` under `key`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((key, Some(value)));
    }

    /// Queues a removal of `key`.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push((key, None));
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no operation is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations in insertion order. `None` values are deletes.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.ops
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_deref()))
    }

    /// Keccak-256 over the RLP encoding of the operations, in order.
    ///
    /// Puts encode as `[key, value]` and deletes as `[key]`.
    #[must_use]
    pub fn digest(&self) -> B256 {
        let mut stream = RlpStream::new_list(self.ops.len());
        for (key, value) in &self.ops {
            match value {
                Some(value) => {
                    stream.begin_list(2).append(key).append(value);
                }
                None => {
                    stream.begin_list(1).append(key);
                }
            }
        }
        keccak256(stream.out())
    }
}

impl IntoIterator for WriteBatch {
    type Item = (Vec<u8>, Option<Vec<u8>>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Minimal key-value store interface backing a [`StateDb`].
pub trait KvStore {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Applies every operation of `batch` atomically, in order.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails, in which case no operation is applied.
    fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Lists every stored key starting with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Makes every applied batch durable.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Summary of one [`StateDb::commit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Block number the changes were committed under.
    pub block_number: u64,
    /// Accounts written.
    pub accounts: usize,
    /// Storage slots written or cleared.
    pub slots: usize,
    /// Code blobs written.
    pub codes: usize,
    /// Accounts deleted, either self-destructed or empty.
    pub deleted: usize,
    /// [`WriteBatch::digest`] of the batch that was written.
    pub digest: B256,
    /// Merkle-Patricia root of the whole state after the commit.
    pub state_root: B256,
}

#[derive(Debug, Default)]
struct PendingAccount {
    /// `None` once the account is destroyed.
    info: Option<AccountInfo>,
    storage: BTreeMap<U256, U256>,
    /// Stored slots must be ignored and removed on commit.
    wiped: bool,
}

/// World state backed by a [`KvStore`].
///
/// Implements [`Database`] and [`DatabaseCommit`] so it can be handed directly to a [`revm::Evm`].
#[derive(Debug)]
pub struct StateDb<S> {
    store: S,
    accounts: BTreeMap<Address, PendingAccount>,
    codes: BTreeMap<B256, Bytecode>,
    /// Built on the first commit.
    tries: Option<StateTries>,
}

impl<S: KvStore> StateDb<S> {
    /// Wraps a store. Nothing is read until the first access.
    pub fn new(store: S) -> Self {
        Self {
            store,
            accounts: BTreeMap::new(),
            codes: BTreeMap::new(),
            tries: None,
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Discards pending changes and returns the underlying store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Whether changes are waiting for [`StateDb::commit`].
    pub fn has_pending(&self) -> bool {
        !self.accounts.is_empty() || !self.codes.is_empty()
    }

    /// Sets the balance of `address`, creating the account if needed.
    ///
    /// # Errors
    ///
    /// Fails if the current account cannot be read.
    pub fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), StateError> {
        let info = self.account(&address)?.unwrap_or_default();
        self.pending(address).info = Some(AccountInfo {
            balance,
            code: None,
            ..info
        });
        Ok(())
    }

    /// Sets the nonce of `address`, creating the account if needed.
    ///
    /// # Errors
    ///
    /// Fails if the current account cannot be read.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StateError> {
        let info = self.account(&address)?.unwrap_or_default();
        self.pending(address).info = Some(AccountInfo {
            nonce,
            code: None,
            ..info
        });
        Ok(())
    }

    /// Sets the runtime code of `address`, creating the account if needed.
    ///
    /// # Errors
    ///
    /// Fails if the current account cannot be read.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let info = self.account(&address)?.unwrap_or_default();
        let bytecode = Bytecode::new_raw(code);
        let code_hash = bytecode.hash_slow();
        self.codes.insert(code_hash, bytecode);
        self.pending(address).info = Some(AccountInfo {
            code_hash,
            code: None,
            ..info
        });
        Ok(())
    }

    /// Last committed block number, if any commit happened.
    ///
    /// # Errors
    ///
    /// Fails if the store fails or holds a malformed head record.
    pub fn head(&self) -> Result<Option<u64>, StateError> {
        self.store
            .get(HEAD_KEY)?
            .map(|raw| rlp::decode::<u64>(&raw))
            .transpose()
            .map_err(StateError::from)
    }

    /// State root recorded by the last commit, if any commit happened.
    ///
    /// # Errors
    ///
    /// Fails if the store fails or holds a malformed root record.
    pub fn state_root(&self) -> Result<Option<B256>, StateError> {
        self.store
            .get(ROOT_KEY)?
            .map(|raw| {
                B256::try_from(raw.as_slice())
                    .map_err(|_| StateError::from(DecoderError::Custom("state root is not 32 bytes")))
            })
            .transpose()
    }

    /// Writes every pending change to the store under `block_number` and clears pending state.
    ///
    /// With `delete_empty_objects`, accounts with zero balance, zero nonce and no code are removed instead of
    /// written. Storage of destroyed or re-created accounts is wiped before the new slots land. The state root over
    /// the result is computed before anything is written and stored alongside the head.
    ///
    /// # Errors
    ///
    /// Fails if the store or a trie update fails. Pending state is consumed either way.
    pub fn commit(
        &mut self,
        block_number: u64,
        delete_empty_objects: bool,
    ) -> Result<CommitOutcome, StateError> {
        let codes = mem::take(&mut self.codes);
        let accounts = mem::take(&mut self.accounts);
        // Dropped on failure, so the next commit rebuilds it from the store.
        let mut tries = match self.tries.take() {
            Some(tries) => tries,
            None => StateTries::load(&self.store)?,
        };

        let mut batch = WriteBatch::default();
        let mut outcome = CommitOutcome {
            block_number,
            accounts: 0,
            slots: 0,
            codes: 0,
            deleted: 0,
            digest: B256::ZERO,
            state_root: B256::ZERO,
        };

        for (hash, code) in codes {
            batch.put(code_key(&hash), code.original_bytes().to_vec());
            outcome.codes += 1;
        }

        for (address, account) in accounts {
            if account.wiped {
                for key in self.store.keys_with_prefix(&storage_prefix(&address))? {
                    batch.delete(key);
                }
                tries.wipe_storage(&address);
            }

            let info = match account.info {
                Some(info) if !(delete_empty_objects && info.is_empty()) => info,
                _ => {
                    batch.delete(account_key(&address));
                    tries.remove_account(address)?;
                    outcome.deleted += 1;
                    continue;
                }
            };

            for (slot, value) in &account.storage {
                tries.set_slot(address, *slot, *value)?;
            }
            tries.set_account(address, &info)?;

            batch.put(account_key(&address), encode_account(&info));
            outcome.accounts += 1;

            for (slot, value) in account.storage {
                let key = storage_key(&address, &slot);
                if value.is_zero() {
                    batch.delete(key);
                } else {
                    batch.put(key, rlp::encode(&trimmed(&value)).to_vec());
                }
                outcome.slots += 1;
            }
        }

        outcome.state_root = tries.root();
        batch.put(ROOT_KEY.to_vec(), outcome.state_root.to_vec());
        batch.put(HEAD_KEY.to_vec(), rlp::encode(&block_number).to_vec());
        outcome.digest = batch.digest();

        log::trace!(
            "committing block {block_number} ({} operations, digest {}, root {})",
            batch.len(),
            outcome.digest,
            outcome.state_root
        );
        self.store.write(batch)?;
        self.tries = Some(tries);

        Ok(outcome)
    }

    /// Flushes the underlying store.
    ///
    /// # Errors
    ///
    /// Fails if the store fails.
    pub fn flush(&mut self) -> Result<(), StateError> {
        Ok(self.store.flush()?)
    }

    fn pending(&mut self, address: Address) -> &mut PendingAccount {
        self.accounts.entry(address).or_default()
    }

    fn account(&self, address: &Address) -> Result<Option<AccountInfo>, StateError> {
        if let Some(pending) = self.accounts.get(address) {
            return Ok(pending.info.clone());
        }
        self.store
            .get(&account_key(address))?
            .map(|raw| decode_account(&raw))
            .transpose()
    }

    fn slot(&self, address: &Address, slot: &U256) -> Result<U256, StateError> {
        if let Some(pending) = self.accounts.get(address) {
            if let Some(value) = pending.storage.get(slot) {
                return Ok(*value);
            }
            if pending.wiped {
                return Ok(U256::ZERO);
            }
        }
        self.store
            .get(&storage_key(address, slot))?
            .map_or(Ok(U256::ZERO), |raw| decode_word(&raw))
    }

    fn code(&self, code_hash: &B256) -> Result<Bytecode, StateError> {
        if let Some(code) = self.codes.get(code_hash) {
            return Ok(code.clone());
        }
        match self.store.get(&code_key(code_hash))? {
            Some(raw) => Ok(Bytecode::new_raw(raw.into())),
            None if *code_hash == KECCAK_EMPTY => Ok(Bytecode::default()),
            None => Err(StateError::MissingCode(*code_hash)),
        }
    }
}

impl<S: KvStore> Database for StateDb<S> {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.account(&address)
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        self.code(&code_hash)
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.slot(&address, &index)
    }

    fn block_hash(&mut self, number: U256) -> Result<B256, Self::Error> {
        Ok(keccak256(number.to_string().as_bytes()))
    }
}

impl<S: KvStore> DatabaseCommit for StateDb<S> {
    fn commit(&mut self, changes: HashMap<Address, Account>) {
        for (address, mut account) in changes {
            if !account.is_touched() {
                continue;
            }

            if account.is_selfdestructed() {
                let pending = self.pending(address);
                pending.info = None;
                pending.storage.clear();
                pending.wiped = true;
                continue;
            }

            let is_created = account.is_created();
            if let Some(code) = account.info.take_bytecode() {
                if is_created && !code.is_empty() {
                    self.codes.insert(account.info.code_hash, code);
                }
            }

            let pending = self.pending(address);
            if is_created {
                pending.storage.clear();
                pending.wiped = true;
            }
            pending.storage.extend(
                account
                    .changed_storage_slots()
                    .map(|(slot, value)| (*slot, value.present_value())),
            );
            pending.info = Some(account.info);
        }
    }
}

fn account_key(address: &Address) -> Vec<u8> {
    [ACCOUNT_PREFIX, address.as_slice()].concat()
}

fn code_key(code_hash: &B256) -> Vec<u8> {
    [CODE_PREFIX, code_hash.as_slice()].concat()
}

fn storage_prefix(address: &Address) -> Vec<u8> {
    [STORAGE_PREFIX, address.as_slice(), b"|"].concat()
}

fn storage_key(address: &Address, slot: &U256) -> Vec<u8> {
    [storage_prefix(address), slot.to_be_bytes::<32>().to_vec()].concat()
}

/// Big-endian bytes of `value` without leading zeros.
fn trimmed(value: &U256) -> Vec<u8> {
    let bytes = value.to_be_bytes::<32>();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn word(bytes: &[u8]) -> Result<U256, DecoderError> {
    U256::try_from_be_slice(bytes).ok_or(DecoderError::RlpIsTooBig)
}

fn decode_word(raw: &[u8]) -> Result<U256, StateError> {
    Ok(word(&rlp::decode::<Vec<u8>>(raw)?)?)
}

fn encode_account(info: &AccountInfo) -> Vec<u8> {
    let mut stream = RlpStream::new_list(3);
    stream
        .append(&trimmed(&info.balance))
        .append(&info.nonce)
        .append(&info.code_hash.to_vec());
    stream.out().to_vec()
}

fn decode_account(raw: &[u8]) -> Result<AccountInfo, StateError> {
    let rlp = Rlp::new(raw);
    if rlp.item_count()? != 3 {
        return Err(DecoderError::RlpIncorrectListLen.into());
    }
    let balance = word(&rlp.val_at::<Vec<u8>>(0)?)?;
    let nonce = rlp.val_at::<u64>(1)?;
    let code_hash = B256::try_from(rlp.val_at::<Vec<u8>>(2)?.as_slice())
        .map_err(|_| DecoderError::Custom("code hash is not 32 bytes"))?;

    Ok(AccountInfo {
        balance,
        nonce,
        code_hash,
        code: None,
    })
}
