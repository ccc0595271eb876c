use ethers::types::U256;
use serde::{Deserialize, Serialize};

use super::{serde_u256, Account};

/// Amount of GNO held by `account` through a single venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub account: Account,
    #[serde(with = "serde_u256")]
    pub amount: U256,
}

impl HolderRecord {
    pub fn new(account: impl Into<Account>, amount: U256) -> Self {
        Self {
            account: account.into(),
            amount,
        }
    }
}

/// Bare account row, used for persisted account sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
}

impl From<Account> for AccountRecord {
    fn from(account: Account) -> Self {
        Self { account }
    }
}
