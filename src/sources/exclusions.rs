//! Accounts never eligible for an allocation: exchange custody, pool contracts
//! and a manually curated list.

use anyhow::{Context, Result};
use log::info;
use std::collections::BTreeSet;
use std::path::Path;

use crate::sources::lp_holders::GenericPool;
use crate::sources::uniswap_v3::PositionSource;
use crate::types::{Account, AccountRecord, Network};

/// Reads the `account` column of a CSV file.
pub fn load_accounts(path: &Path) -> Result<BTreeSet<Account>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize::<AccountRecord>()
        .map(|record| {
            record
                .map(|r| r.account)
                .with_context(|| format!("parsing {}", path.display()))
        })
        .collect()
}

/// Union of `excluded_accounts.csv`, `binance_accounts.csv`, the generic pools
/// of both networks and the given Uniswap V3 pool addresses.
pub fn build_exclusions(
    data_dir: &Path,
    univ3_pools: impl IntoIterator<Item = Account>,
) -> Result<BTreeSet<Account>> {
    let mut excluded = load_accounts(&data_dir.join("excluded_accounts.csv"))?;
    excluded.extend(load_accounts(&data_dir.join("binance_accounts.csv"))?);
    excluded.extend(univ3_pools);
    let pool_file = data_dir.join("generic_pools.csv");
    for network in Network::ALL {
        excluded.extend(
            GenericPool::load_from_file(&pool_file, network)?
                .into_iter()
                .map(|pool| pool.address),
        );
    }
    info!("loaded {} excluded accounts", excluded.len());
    Ok(excluded)
}

/// [`build_exclusions`] with the GNO Uniswap V3 pools fetched from `source`.
pub async fn load_excluded_accounts(
    data_dir: &Path,
    source: &dyn PositionSource,
    block: u64,
    gno: &Account,
) -> Result<BTreeSet<Account>> {
    let pools = source.fetch_pools(block, gno).await?;
    build_exclusions(data_dir, pools.into_iter().map(|pool| pool.address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_build_exclusions_unions_all_sources() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("excluded_accounts.csv"), "account\n0xE1\n").unwrap();
        fs::write(dir.path().join("binance_accounts.csv"), "account,label\n0xb1,hot wallet\n").unwrap();
        fs::write(
            dir.path().join("generic_pools.csv"),
            "address,staking_contract,name,network\n0xP1,0x0,Sushi,mainnet\n0xP2,0x0,Honey,gchain\n",
        )
        .unwrap();

        let excluded = build_exclusions(dir.path(), vec![Account::new("0xU3")]).unwrap();
        let expected: BTreeSet<Account> = ["0xe1", "0xb1", "0xu3", "0xp1", "0xp2"]
            .iter()
            .map(|a| Account::new(*a))
            .collect();
        assert_eq!(excluded, expected);
    }
}
