use ethers::types::U256;
use thiserror::Error;

use crate::types::{Account, Network};

/// Invariant violations that abort a run.
///
/// None of these are retried. Every variant carries the offending account or
/// address so a failed run points straight at the record that broke it.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("duplicate account {account} while indexing {context}")]
    DuplicateAccount { account: Account, context: String },

    #[error("{category} allocations total {allocated} exceeding supply {supply}")]
    SupplyExceeded {
        category: String,
        allocated: U256,
        supply: U256,
    },

    #[error("vault {vault} holds {vault_balance} but its pools partition to {partition_total}")]
    VaultPartitionMismatch {
        vault: Account,
        vault_balance: U256,
        partition_total: U256,
    },

    #[error("vault {0} missing from direct holdings")]
    MissingVault(Account),

    #[error("{account} has non-zero {field} on {network}, which does not track it")]
    NetworkExclusiveField {
        account: Account,
        network: Network,
        field: &'static str,
    },

    #[error("cannot reduce positions owned by different accounts: {0:?}")]
    MixedPositionAccounts(Vec<Account>),

    #[error("pool {0} has no current tick")]
    UnknownPoolTick(Account),

    #[error("tick {0} outside of [-887272, 887272]")]
    TickOutOfRange(i32),

    #[error("pools do not have token index {0}")]
    InvalidTokenIndex(u8),

    #[error("trader {account} meets eligibility criteria but tier {tier} has no weight")]
    InvalidTier { account: Account, tier: i32 },

    #[error("cannot merge trader records of {left} and {right}")]
    TraderMergeMismatch { left: Account, right: Account },

    #[error("trader {0} is not eligible for a primary allocation")]
    IneligibleTrader(Account),

    #[error("trader {0} is eligible and cannot receive a consolation allocation")]
    EligibleConsolation(Account),

    #[error("liquidity proportion of {account} references pool {pool} with no known balance")]
    MissingPoolBalance { account: Account, pool: Account },

    #[error("zero denominator")]
    ZeroDenominator,

    #[error("{0} is a contract on both networks and has no manual resolution")]
    UnresolvedDualContract(Account),

    #[error("team recipient {0} already holds an allocation")]
    TeamOverlap(Account),

    #[error("primary and consolation recipient sets overlap at {0}")]
    PrimaryConsolationOverlap(Account),

    #[error("RPC request for {account} failed with response {response}")]
    UnclassifiableRpcRow { account: Account, response: String },

    #[error("batch of {size} exceeds max batch size {max}; partition and try again")]
    BatchTooLarge { size: usize, max: usize },

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("split post-condition violated: {0}")]
    SplitPostCondition(String),
}
