//! # Allocation Engines
//!
//! Each engine turns a fixed supply and a weighting into per-account amounts
//! using integer floor division only. The sum of a category never exceeds its
//! supply; whatever floor division leaves behind stays unallocated and is
//! logged rather than redistributed.
//!
//! - [`holder`]: proportional to reconciled GNO holdings
//! - [`trader`]: tier-weighted primary allocation, flat consolation and the
//!   tier-weighted user option
//! - [`poap`]: community weights from proof tokens and alpha trading

pub mod holder;
pub mod poap;
pub mod trader;

use anyhow::Result;
use ethers::types::U256;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

use crate::cache::{Cache, CacheKey};
use crate::error::AllocationError;
use crate::normalization::display_tokens;
use crate::types::{serde_u256, Account};
use crate::utils::{index_by_account, Keyed};

/// Tokens (in base units) assigned to `account` in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub account: Account,
    #[serde(with = "serde_u256")]
    pub amount: U256,
}

impl Allocation {
    pub fn new(account: Account, amount: U256) -> Self {
        Self { account, amount }
    }

    pub fn zero(account: Account) -> Self {
        Self::new(account, U256::zero())
    }
}

impl Keyed for Allocation {
    fn account(&self) -> &Account {
        &self.account
    }
}

/// Allocations of one category, at most one per account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedAllocations(BTreeMap<Account, Allocation>);

impl IndexedAllocations {
    /// Fails with [`AllocationError::DuplicateAccount`] if an account repeats.
    pub fn new(
        allocations: impl IntoIterator<Item = Allocation>,
        context: &str,
    ) -> Result<Self, AllocationError> {
        Ok(Self(index_by_account(allocations, context)?))
    }

    /// The allocation of `account`, or a zero allocation if it has none.
    pub fn get(&self, account: &Account) -> Allocation {
        self.0
            .get(account)
            .cloned()
            .unwrap_or_else(|| Allocation::zero(account.clone()))
    }

    pub fn amount(&self, account: &Account) -> U256 {
        self.0.get(account).map(|a| a.amount).unwrap_or_default()
    }

    pub fn contains(&self, account: &Account) -> bool {
        self.0.contains_key(account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.0.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Allocation> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> Result<U256, AllocationError> {
        total_amount(self.0.values())
    }

    /// Disjoint union; an account present in both is a duplicate.
    pub fn union(mut self, other: IndexedAllocations) -> Result<Self, AllocationError> {
        for (account, allocation) in other.0 {
            if self.0.contains_key(&account) {
                return Err(AllocationError::DuplicateAccount {
                    account,
                    context: "allocation union".to_string(),
                });
            }
            self.0.insert(account, allocation);
        }
        Ok(self)
    }
}

fn total_amount<'a>(allocations: impl IntoIterator<Item = &'a Allocation>) -> Result<U256, AllocationError> {
    allocations.into_iter().try_fold(U256::zero(), |acc, a| {
        acc.checked_add(a.amount)
            .ok_or(AllocationError::Overflow("allocation total"))
    })
}

/// Orders by descending amount, then ascending account.
pub fn sort_allocations(allocations: &mut [Allocation]) {
    allocations.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.account.cmp(&b.account)));
}

/// Fails if `allocations` sum past `supply`; returns and logs the unallocated remainder.
pub fn check_supply(
    category: &str,
    allocations: &[Allocation],
    supply: U256,
) -> Result<U256, AllocationError> {
    let allocated = total_amount(allocations)?;
    if allocated > supply {
        return Err(AllocationError::SupplyExceeded {
            category: category.to_string(),
            allocated,
            supply,
        });
    }
    let unallocated = supply - allocated;
    info!("{} unallocated {} tokens", display_tokens(unallocated), category);
    Ok(unallocated)
}

/// Loads allocations for `key`, or computes, persists and indexes them.
pub async fn cached_allocations<F, Fut>(
    cache: &Cache,
    key: &CacheKey,
    compute: F,
) -> Result<IndexedAllocations>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Allocation>>>,
{
    let allocations = cache.get_or_compute(key, compute).await?;
    Ok(IndexedAllocations::new(allocations, key.name())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(account: &str, amount: u64) -> Allocation {
        Allocation::new(Account::new(account), U256::from(amount))
    }

    #[test]
    fn test_missing_account_is_zero() {
        let indexed = IndexedAllocations::new(vec![alloc("0x1", 5)], "test").unwrap();
        let missing = indexed.get(&Account::new("0x2"));
        assert_eq!(missing, alloc("0x2", 0));
        assert_eq!(indexed.amount(&Account::new("0x1")), U256::from(5));
    }

    #[test]
    fn test_duplicate_allocation_is_rejected() {
        let result = IndexedAllocations::new(vec![alloc("0x1", 5), alloc("0X1", 6)], "test");
        assert!(matches!(result, Err(AllocationError::DuplicateAccount { .. })));
    }

    #[test]
    fn test_union_rejects_overlap() {
        let left = IndexedAllocations::new(vec![alloc("0x1", 1)], "left").unwrap();
        let right = IndexedAllocations::new(vec![alloc("0x2", 2)], "right").unwrap();
        let joined = left.clone().union(right).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.total().unwrap(), U256::from(3));
        assert!(joined.union(left).is_err());
    }

    #[test]
    fn test_check_supply() {
        let allocations = vec![alloc("0x1", 4), alloc("0x2", 5)];
        assert_eq!(check_supply("test", &allocations, U256::from(10)).unwrap(), U256::one());
        assert_eq!(check_supply("test", &allocations, U256::from(9)).unwrap(), U256::zero());
        assert!(matches!(
            check_supply("test", &allocations, U256::from(8)),
            Err(AllocationError::SupplyExceeded { .. })
        ));
    }

    #[test]
    fn test_sort_allocations() {
        let mut allocations = vec![alloc("0x2", 1), alloc("0x3", 5), alloc("0x1", 1)];
        sort_allocations(&mut allocations);
        let accounts: Vec<&str> = allocations.iter().map(|a| a.account.as_str()).collect();
        assert_eq!(accounts, vec!["0x3", "0x1", "0x2"]);
    }
}
