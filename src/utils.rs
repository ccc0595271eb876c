// src/utils.rs
// Indexing and batching helpers shared by the fetchers and engines

use std::collections::{BTreeMap, HashMap};

use crate::error::AllocationError;
use crate::types::{Account, HolderRecord};

/// Records keyed by an account.
pub trait Keyed {
    fn account(&self) -> &Account;
}

impl Keyed for HolderRecord {
    fn account(&self) -> &Account {
        &self.account
    }
}

impl Keyed for Account {
    fn account(&self) -> &Account {
        self
    }
}

/// Creates a vector of (start, end) index pairs, end exclusive, covering `0..len`
/// in chunks of at most `chunk_size`. Used to pre-partition batched RPC requests.
pub fn create_chunks(len: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current_from = 0;
    while current_from < len {
        let current_to = std::cmp::min(current_from + chunk_size, len);
        chunks.push((current_from, current_to));
        current_from = current_to;
    }
    chunks
}

/// Indexes records by account. A repeated account is fatal.
pub fn index_by_account<T: Keyed>(
    records: impl IntoIterator<Item = T>,
    context: &str,
) -> Result<BTreeMap<Account, T>, AllocationError> {
    let mut indexed = BTreeMap::new();
    for record in records {
        let account = record.account().clone();
        if indexed.contains_key(&account) {
            return Err(AllocationError::DuplicateAccount {
                account,
                context: context.to_string(),
            });
        }
        indexed.insert(account, record);
    }
    Ok(indexed)
}

/// Groups records by account, keeping every record.
pub fn index_with_multiplicity<T: Keyed>(
    records: impl IntoIterator<Item = T>,
) -> HashMap<Account, Vec<T>> {
    let mut indexed: HashMap<Account, Vec<T>> = HashMap::new();
    for record in records {
        indexed.entry(record.account().clone()).or_default().push(record);
    }
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    #[test]
    fn test_create_chunks() {
        assert_eq!(create_chunks(5, 2), vec![(0, 2), (2, 4), (4, 5)]);
        assert_eq!(create_chunks(4, 2), vec![(0, 2), (2, 4)]);
        assert!(create_chunks(0, 10).is_empty());
    }

    #[test]
    fn test_index_by_account_rejects_duplicates() {
        let records = vec![
            HolderRecord::new("0x1", U256::one()),
            HolderRecord::new("0X1", U256::from(2)),
        ];
        match index_by_account(records, "holders") {
            Err(AllocationError::DuplicateAccount { account, .. }) => {
                assert_eq!(account.as_str(), "0x1")
            }
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_index_with_multiplicity() {
        let records = vec![
            HolderRecord::new("0x1", U256::one()),
            HolderRecord::new("0x2", U256::one()),
            HolderRecord::new("0x1", U256::from(3)),
        ];
        let indexed = index_with_multiplicity(records);
        assert_eq!(indexed[&Account::new("0x1")].len(), 2);
        assert_eq!(indexed[&Account::new("0x2")].len(), 1);
    }
}
