//! Merkle-Patricia commitment to the committed state.
//!
//! The tries live in memory next to the flat key-value layout. They are rebuilt from the store the first time a
//! [`super::StateDb`] commits and then kept in step with every batch it writes.

use std::collections::BTreeMap;

use ethers_core::utils::rlp::{self, DecoderError, RlpStream};
use mpt_trie::{
    nibbles::Nibbles,
    partial_trie::{HashedPartialTrie, PartialTrie},
};
use revm::primitives::{keccak256, AccountInfo, Address, B256, U256};

use super::{
    decode_account, decode_word, trimmed, KvStore, StateError, ACCOUNT_PREFIX, STORAGE_PREFIX,
};

/// Account trie plus one storage trie per account with non-zero slots.
#[derive(Debug, Default)]
pub(super) struct StateTries {
    accounts: HashedPartialTrie,
    storage: BTreeMap<Address, HashedPartialTrie>,
}

impl StateTries {
    /// Rebuilds the tries from every account and slot held by `store`.
    pub(super) fn load<S: KvStore>(store: &S) -> Result<Self, StateError> {
        let mut tries = Self::default();

        for key in store.keys_with_prefix(STORAGE_PREFIX)? {
            let Some(raw) = store.get(&key)? else {
                continue;
            };
            let (address, slot) = parse_storage_key(&key)?;
            tries.set_slot(address, slot, decode_word(&raw)?)?;
        }

        let mut count = 0;
        for key in store.keys_with_prefix(ACCOUNT_PREFIX)? {
            let Some(raw) = store.get(&key)? else {
                continue;
            };
            let address = Address::try_from(&key[ACCOUNT_PREFIX.len()..])
                .map_err(|_| DecoderError::Custom("malformed account key"))?;
            tries.set_account(address, &decode_account(&raw)?)?;
            count += 1;
        }

        log::debug!("rebuilt state tries over {count} accounts");
        Ok(tries)
    }

    /// Drops every slot of `address`.
    pub(super) fn wipe_storage(&mut self, address: &Address) {
        self.storage.remove(address);
    }

    /// Sets one slot, removing it when `value` is zero.
    pub(super) fn set_slot(
        &mut self,
        address: Address,
        slot: U256,
        value: U256,
    ) -> Result<(), StateError> {
        let key = hashed_key(slot.to_be_bytes::<32>())?;
        let trie = self.storage.entry(address).or_default();
        if value.is_zero() {
            trie.delete(key)?;
        } else {
            trie.insert(key, rlp::encode(&trimmed(&value)).to_vec())?;
        }
        Ok(())
    }

    /// Writes the trie leaf of `address`, committing to its current storage root.
    pub(super) fn set_account(
        &mut self,
        address: Address,
        info: &AccountInfo,
    ) -> Result<(), StateError> {
        let storage_root = self.storage_root(&address);

        let mut stream = RlpStream::new_list(4);
        stream
            .append(&info.nonce)
            .append(&trimmed(&info.balance))
            .append(&storage_root.to_vec())
            .append(&info.code_hash.to_vec());

        self.accounts
            .insert(hashed_key(address)?, stream.out().to_vec())?;
        Ok(())
    }

    /// Removes the trie leaf of `address`. Its storage trie is left alone.
    pub(super) fn remove_account(&mut self, address: Address) -> Result<(), StateError> {
        self.accounts.delete(hashed_key(address)?)?;
        Ok(())
    }

    /// Root of the storage trie of `address`.
    pub(super) fn storage_root(&self, address: &Address) -> B256 {
        self.storage
            .get(address)
            .map_or_else(|| hash(&HashedPartialTrie::default()), hash)
    }

    /// Root of the account trie.
    pub(super) fn root(&self) -> B256 {
        hash(&self.accounts)
    }
}

fn hash(trie: &HashedPartialTrie) -> B256 {
    B256::from(trie.hash().0)
}

fn hashed_key(preimage: impl AsRef<[u8]>) -> Result<Nibbles, StateError> {
    Ok(Nibbles::from_bytes_be(keccak256(preimage).as_slice())?)
}

fn parse_storage_key(key: &[u8]) -> Result<(Address, U256), StateError> {
    let rest = &key[STORAGE_PREFIX.len()..];
    if rest.len() != 20 + 1 + 32 {
        return Err(DecoderError::Custom("malformed storage key").into());
    }
    let address = Address::from_slice(&rest[..20]);
    let slot = U256::from_be_slice(&rest[21..]);
    Ok((address, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{storage_key, MemoryStore, StateDb};

    const EMPTY_ROOT: &str = "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421";

    #[test]
    fn empty_tries_hash_to_the_empty_root() {
        let tries = StateTries::default();
        assert_eq!(tries.root().to_string(), format!("0x{EMPTY_ROOT}"));
        assert_eq!(
            tries.storage_root(&Address::ZERO).to_string(),
            format!("0x{EMPTY_ROOT}")
        );
    }

    #[test]
    fn zero_slots_leave_no_trace() {
        let address = Address::repeat_byte(1);
        let mut tries = StateTries::default();
        let before = tries.storage_root(&address);

        tries.set_slot(address, U256::from(1), U256::from(5)).unwrap();
        assert_ne!(tries.storage_root(&address), before);

        tries.set_slot(address, U256::from(1), U256::ZERO).unwrap();
        assert_eq!(tries.storage_root(&address), before);
    }

    #[test]
    fn account_leaf_commits_to_storage() {
        let address = Address::repeat_byte(2);
        let info = AccountInfo::from_balance(U256::from(10));

        let mut plain = StateTries::default();
        plain.set_account(address, &info).unwrap();

        let mut with_storage = StateTries::default();
        with_storage
            .set_slot(address, U256::ZERO, U256::from(3))
            .unwrap();
        with_storage.set_account(address, &info).unwrap();

        assert_ne!(plain.root(), with_storage.root());

        with_storage.wipe_storage(&address);
        with_storage.set_account(address, &info).unwrap();
        assert_eq!(plain.root(), with_storage.root());

        plain.remove_account(address).unwrap();
        assert_eq!(plain.root(), StateTries::default().root());
    }

    #[test]
    fn rebuilt_tries_match_committed_root() {
        let mut db = StateDb::new(MemoryStore::default());
        let address = Address::repeat_byte(3);
        db.set_balance(address, U256::from(4)).unwrap();
        db.set_nonce(address, 2).unwrap();
        let outcome = db.commit(1, true).unwrap();

        let store = db.into_store();
        assert_eq!(StateTries::load(&store).unwrap().root(), outcome.state_root);
    }

    #[test]
    fn storage_keys_parse_back() {
        let address = Address::repeat_byte(4);
        let slot = U256::from(0xabcd);
        assert_eq!(
            parse_storage_key(&storage_key(&address, &slot)).unwrap(),
            (address, slot)
        );
        assert!(parse_storage_key(b"s|short").is_err());
    }
}
