//! Liquidity providers of the generic (ERC20 share token) GNO pools.
//!
//! Each pool is queried for its share-token balances; an account's proportion
//! of the pool is its balance over the summed balances of all providers. The
//! proportion only becomes a GNO amount once the pool's own GNO balance is known,
//! see [`LiquidityProportion::to_position`].

use anyhow::{Context, Result};
use ethers::types::U256;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::cache::{Cache, CacheKey};
use crate::error::AllocationError;
use crate::query_client::{row_account, row_u256, Query, QueryClient, QueryParameter};
use crate::types::{serde_u256, Account, Fraction, Network};
use crate::utils::{index_with_multiplicity, Keyed};

/// A pool whose share token supply maps one to one onto its GNO balance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenericPool {
    pub address: Account,
    pub staking_contract: String,
    pub name: String,
    pub network: Network,
}

impl fmt::Display for GenericPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pool at {} with staking contract {}",
            self.name, self.address, self.staking_contract
        )
    }
}

impl GenericPool {
    /// Loads the curated pool list, keeping only pools on `network`.
    pub fn load_from_file(path: &Path, network: Network) -> Result<Vec<GenericPool>> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening pool list {}", path.display()))?;
        let mut pools = Vec::new();
        for record in reader.deserialize() {
            let pool: GenericPool =
                record.with_context(|| format!("parsing pool list {}", path.display()))?;
            if pool.network == network {
                pools.push(pool);
            }
        }
        Ok(pools)
    }

    pub async fn fetch_lp_holders(
        &self,
        client: &dyn QueryClient,
        block: u64,
    ) -> Result<Vec<LiquidityProportion>> {
        let query = Query::new("generic_lp_holders", self.network, self.to_string())
            .at_block(block)
            .with_parameter(QueryParameter::text("PoolAddress", &self.address))
            .with_parameter(QueryParameter::text("StakingContract", &self.staking_contract));
        let rows = client.fetch(&query).await?;

        let balances = rows
            .iter()
            .map(|row| Ok((row_account(row, "account")?, row_u256(row, "lp_balance")?)))
            .collect::<Result<Vec<_>>>()?;
        let lp_supply = balances
            .iter()
            .try_fold(U256::zero(), |acc, (_, balance)| acc.checked_add(*balance))
            .ok_or(AllocationError::Overflow("lp supply"))?;
        if lp_supply.is_zero() {
            warn!("{} has no circulating lp supply", self);
            return Ok(Vec::new());
        }

        balances
            .into_iter()
            .map(|(account, balance)| {
                Ok(LiquidityProportion {
                    account,
                    pool: self.address.clone(),
                    proportion: Fraction::new(balance, lp_supply)?,
                })
            })
            .collect()
    }
}

/// Share of `pool` held by `account`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProportion {
    pub account: Account,
    pub pool: Account,
    #[serde(rename = "lp_proportion")]
    pub proportion: Fraction,
}

/// GNO held by `account` through `pool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPosition {
    pub account: Account,
    pub pool: Account,
    #[serde(with = "serde_u256")]
    pub amount: U256,
}

impl LiquidityProportion {
    /// Floors `proportion * pool_balance`.
    pub fn to_position(&self, pool_balance: U256) -> Result<LiquidityPosition, AllocationError> {
        Ok(LiquidityPosition {
            account: self.account.clone(),
            pool: self.pool.clone(),
            amount: self.proportion.mul_floor(pool_balance)?,
        })
    }
}

impl Keyed for LiquidityProportion {
    fn account(&self) -> &Account {
        &self.account
    }
}

impl Keyed for LiquidityPosition {
    fn account(&self) -> &Account {
        &self.account
    }
}

/// Proportions for every generic pool on `network`, cached as `{network}-lp-holders.csv`.
pub async fn fetch_lp_holders(
    client: &dyn QueryClient,
    cache: &Cache,
    network: Network,
    block: u64,
    pool_file: &Path,
) -> Result<HashMap<Account, Vec<LiquidityProportion>>> {
    let key = CacheKey::network(network, "lp-holders.csv");
    let proportions = cache
        .get_or_compute(&key, || async {
            let pools = GenericPool::load_from_file(pool_file, network)?;
            let mut results = Vec::new();
            for pool in &pools {
                results.extend(pool.fetch_lp_holders(client, block).await?);
            }
            results.sort_by(|a, b| {
                a.pool
                    .cmp(&b.pool)
                    .then_with(|| b.proportion.cmp(&a.proportion))
                    .then_with(|| a.account.cmp(&b.account))
            });
            info!(
                "fetched {} lp proportions across {} {} pools",
                results.len(),
                pools.len(),
                network
            );
            Ok(results)
        })
        .await?;
    Ok(index_with_multiplicity(proportions))
}
