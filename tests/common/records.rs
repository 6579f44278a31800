//! Sample record types, and a block applier that uses them.

use borsh::{BorshDeserialize, BorshSerialize};
use chainstate_rs::{
    chain_resolver::{ApplyError, BlockApplier},
    record_index::{IndexKey, Record, SecondaryIndex},
    types::{
        block::Block,
        data_types::{BlockHeight, RecordId},
        skip_flags::SkipFlags,
    },
    versioned_store::VersionedStore,
};

/// Name of the unique secondary ordering of [`Account`]s by name.
pub(crate) const BY_NAME: &str = "by_name";

/// Name of the non-unique secondary ordering of [`Account`]s by balance.
pub(crate) const BY_BALANCE: &str = "by_balance";

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) struct Account {
    pub(crate) id: RecordId,
    pub(crate) name: String,
    pub(crate) balance: u64,
}

impl Account {
    pub(crate) fn new(name: &str, balance: u64) -> Account {
        Account {
            id: RecordId::new(0),
            name: name.to_string(),
            balance,
        }
    }
}

impl Record for Account {
    const TABLE: &'static str = "account";

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn secondary_indices() -> Vec<SecondaryIndex<Self>> {
        vec![
            SecondaryIndex::unique(BY_NAME, |account| name_key(&account.name)),
            SecondaryIndex::non_unique(BY_BALANCE, |account| balance_key(account.balance)),
        ]
    }
}

pub(crate) fn name_key(name: &str) -> IndexKey {
    IndexKey::builder().str(name).build()
}

pub(crate) fn balance_key(balance: u64) -> IndexKey {
    IndexKey::builder().u64(balance).build()
}

/// Get every account as `(id, name, balance)`, in identity order.
pub(crate) fn accounts(store: &VersionedStore) -> Vec<(RecordId, String, u64)> {
    store
        .index::<Account>()
        .unwrap()
        .iter()
        .map(|account| (account.id, account.name.clone(), account.balance))
        .collect()
}

/// Applies blocks by crediting one unit to the account named by each transaction, creating the
/// account if it does not exist. A transaction reading `fail` makes the block fail to apply, after
/// the transactions before it have been applied.
#[derive(Default)]
pub(crate) struct LedgerApplier {
    pub(crate) applied: Vec<BlockHeight>,
    pub(crate) skip_flags: Vec<SkipFlags>,
}

impl BlockApplier for LedgerApplier {
    fn apply(
        &mut self,
        store: &mut VersionedStore,
        block: &Block,
        skip: SkipFlags,
    ) -> Result<(), ApplyError> {
        for transaction in &block.transactions {
            if transaction.bytes() == b"fail" {
                return Err("transaction rejected".into());
            }
            let name = String::from_utf8(transaction.bytes().to_vec())?;
            let existing = store
                .index::<Account>()?
                .find_by(BY_NAME, &name_key(&name))?
                .map(|account| account.id);
            match existing {
                Some(id) => store.modify::<Account>(id, |account| account.balance += 1)?,
                None => {
                    store.insert(Account::new(&name, 1))?;
                }
            }
        }
        self.applied.push(block.height);
        self.skip_flags.push(skip);
        Ok(())
    }
}
