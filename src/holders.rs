//! # Holder Reconciliation
//!
//! Merges every venue an account can hold GNO through into one conserved total.
//!
//! ## Per network
//!
//! [`NetworkHoldings::assemble`] takes the fetched parts for one network:
//!
//! - direct balances (the vault's aggregate balance is replaced by its
//!   per-pool partition on mainnet, and the partition must sum back exactly)
//! - liquidity proportions, converted to amounts against the pool balances
//!   once the direct balances are final
//! - stakers (gchain only) and Uniswap V3 holders (mainnet only)
//!
//! [`NetworkHoldings::combine`] then flattens them into one
//! [`VerboseNetworkHolder`] per account.
//!
//! ## Across networks
//!
//! [`build_master_holder_data`] joins the two per-network lists into
//! [`CombinedHolder`]s, dropping accounts below the minimum balance and
//! excluded accounts.

use anyhow::Result;
use ethers::types::U256;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::TryFrom;

use crate::cache::{Cache, CacheKey};
use crate::error::AllocationError;
use crate::query_client::QueryClient;
use crate::settings::Settings;
use crate::sources::balancer::{fetch_balancer_pools, BalancerPool};
use crate::sources::lp_holders::{fetch_lp_holders, LiquidityPosition, LiquidityProportion};
use crate::sources::stakers::fetch_gno_stakers;
use crate::sources::token_holders::fetch_gno_holders;
use crate::sources::uniswap_v3::{fetch_univ3_holders, PositionSource};
use crate::types::{serde_u256, Account, HolderRecord, Network};
use crate::utils::index_by_account;

fn checked_sum(values: &[U256], what: &'static str) -> Result<U256, AllocationError> {
    values.iter().try_fold(U256::zero(), |acc, v| {
        acc.checked_add(*v).ok_or(AllocationError::Overflow(what))
    })
}

/// Replaces the vault's direct balance with the balances of the pools it holds for.
pub fn partition_vault(
    holders: &mut BTreeMap<Account, HolderRecord>,
    vault: &Account,
    pools: &[BalancerPool],
) -> Result<(), AllocationError> {
    let vault_holding = holders
        .remove(vault)
        .ok_or_else(|| AllocationError::MissingVault(vault.clone()))?;
    let balances: Vec<U256> = pools.iter().map(|p| p.gno_balance).collect();
    let partition_total = checked_sum(&balances, "vault partition")?;
    if vault_holding.amount != partition_total {
        return Err(AllocationError::VaultPartitionMismatch {
            vault: vault.clone(),
            vault_balance: vault_holding.amount,
            partition_total,
        });
    }
    for pool in pools {
        holders.insert(
            pool.pool_address.clone(),
            HolderRecord::new(pool.pool_address.clone(), pool.gno_balance),
        );
    }
    Ok(())
}

/// Converts every proportion into an amount using the pool's direct balance.
pub fn transform_proportions(
    proportions: &HashMap<Account, Vec<LiquidityProportion>>,
    holders: &BTreeMap<Account, HolderRecord>,
) -> Result<HashMap<Account, Vec<LiquidityPosition>>, AllocationError> {
    let mut positions: HashMap<Account, Vec<LiquidityPosition>> = HashMap::new();
    for (account, shares) in proportions {
        for share in shares {
            let pool_balance = holders
                .get(&share.pool)
                .ok_or_else(|| AllocationError::MissingPoolBalance {
                    account: account.clone(),
                    pool: share.pool.clone(),
                })?
                .amount;
            positions
                .entry(account.clone())
                .or_default()
                .push(share.to_position(pool_balance)?);
        }
    }
    Ok(positions)
}

/// Raw per-venue inputs for one network, as returned by the fetchers.
#[derive(Debug, Clone, Default)]
pub struct NetworkSources {
    pub gno_holders: BTreeMap<Account, HolderRecord>,
    pub lp_proportions: HashMap<Account, Vec<LiquidityProportion>>,
    pub stakers: BTreeMap<Account, HolderRecord>,
    pub univ3_holders: BTreeMap<Account, HolderRecord>,
    /// Only consulted on mainnet.
    pub balancer_pools: Vec<BalancerPool>,
}

/// Reconciled per-venue holdings of one network.
#[derive(Debug, Clone)]
pub struct NetworkHoldings {
    pub network: Network,
    pub gno_holders: BTreeMap<Account, HolderRecord>,
    pub lp_positions: HashMap<Account, Vec<LiquidityPosition>>,
    pub stakers: BTreeMap<Account, HolderRecord>,
    pub univ3_holders: BTreeMap<Account, HolderRecord>,
}

impl NetworkHoldings {
    pub fn assemble(
        network: Network,
        sources: NetworkSources,
        vault: &Account,
    ) -> Result<Self, AllocationError> {
        let NetworkSources {
            mut gno_holders,
            lp_proportions,
            stakers,
            univ3_holders,
            balancer_pools,
        } = sources;

        if network == Network::Mainnet {
            partition_vault(&mut gno_holders, vault, &balancer_pools)?;
        }
        // direct balances are final only after the vault partition
        let lp_positions = transform_proportions(&lp_proportions, &gno_holders)?;

        Ok(Self {
            network,
            gno_holders,
            lp_positions,
            stakers,
            univ3_holders,
        })
    }

    /// One record per account seen in any venue, sorted by descending total.
    pub fn combine(&self) -> Result<Vec<VerboseNetworkHolder>, AllocationError> {
        let accounts: BTreeSet<&Account> = self
            .gno_holders
            .keys()
            .chain(self.lp_positions.keys())
            .chain(self.stakers.keys())
            .chain(self.univ3_holders.keys())
            .collect();

        let amount = |map: &BTreeMap<Account, HolderRecord>, account: &Account| {
            map.get(account).map(|r| r.amount).unwrap_or_default()
        };

        let mut results = accounts
            .into_iter()
            .map(|account| {
                let lp_amounts: Vec<U256> = self
                    .lp_positions
                    .get(account)
                    .map(|positions| positions.iter().map(|p| p.amount).collect())
                    .unwrap_or_default();
                VerboseNetworkHolder::new(
                    account.clone(),
                    self.network,
                    amount(&self.gno_holders, account),
                    checked_sum(&lp_amounts, "lp positions")?,
                    amount(&self.univ3_holders, account),
                    amount(&self.stakers, account),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        results.sort_by(|a, b| {
            b.total_gno
                .cmp(&a.total_gno)
                .then_with(|| a.account.cmp(&b.account))
        });
        info!("successfully combined {} holder data", self.network);
        Ok(results)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct VerboseNetworkHolderRow {
    account: Account,
    network: Network,
    #[serde(with = "serde_u256")]
    gno_held: U256,
    #[serde(with = "serde_u256")]
    lp_gno: U256,
    #[serde(with = "serde_u256")]
    univ3_gno: U256,
    #[serde(with = "serde_u256")]
    staked_gno: U256,
}

/// All GNO held by `account` on one network, by venue.
///
/// `total_gno` is always the sum of the four venue amounts; it is recomputed
/// when loading rather than trusted from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VerboseNetworkHolderRow")]
pub struct VerboseNetworkHolder {
    pub account: Account,
    pub network: Network,
    #[serde(with = "serde_u256")]
    pub gno_held: U256,
    #[serde(with = "serde_u256")]
    pub lp_gno: U256,
    #[serde(with = "serde_u256")]
    pub univ3_gno: U256,
    #[serde(with = "serde_u256")]
    pub staked_gno: U256,
    #[serde(with = "serde_u256")]
    pub total_gno: U256,
}

impl VerboseNetworkHolder {
    /// Staking only exists on gchain and Uniswap V3 is only tracked on mainnet.
    pub fn new(
        account: Account,
        network: Network,
        gno_held: U256,
        lp_gno: U256,
        univ3_gno: U256,
        staked_gno: U256,
    ) -> Result<Self, AllocationError> {
        let exclusive = match network {
            Network::Mainnet if !staked_gno.is_zero() => Some("staked_gno"),
            Network::Gchain if !univ3_gno.is_zero() => Some("univ3_gno"),
            _ => None,
        };
        if let Some(field) = exclusive {
            return Err(AllocationError::NetworkExclusiveField {
                account,
                network,
                field,
            });
        }
        let total_gno = checked_sum(&[gno_held, lp_gno, univ3_gno, staked_gno], "network holder total")?;
        Ok(Self {
            account,
            network,
            gno_held,
            lp_gno,
            univ3_gno,
            staked_gno,
            total_gno,
        })
    }
}

impl TryFrom<VerboseNetworkHolderRow> for VerboseNetworkHolder {
    type Error = AllocationError;

    fn try_from(row: VerboseNetworkHolderRow) -> Result<Self, Self::Error> {
        Self::new(
            row.account,
            row.network,
            row.gno_held,
            row.lp_gno,
            row.univ3_gno,
            row.staked_gno,
        )
    }
}

impl crate::utils::Keyed for VerboseNetworkHolder {
    fn account(&self) -> &Account {
        &self.account
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CombinedHolderRow {
    account: Account,
    #[serde(with = "serde_u256")]
    mainnet_amount: U256,
    #[serde(with = "serde_u256")]
    gchain_amount: U256,
}

/// GNO held by `account` across both networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CombinedHolderRow")]
pub struct CombinedHolder {
    pub account: Account,
    #[serde(with = "serde_u256")]
    pub mainnet_amount: U256,
    #[serde(with = "serde_u256")]
    pub gchain_amount: U256,
    #[serde(with = "serde_u256")]
    pub total_amount: U256,
}

impl CombinedHolder {
    pub fn new(account: Account, mainnet_amount: U256, gchain_amount: U256) -> Result<Self, AllocationError> {
        let total_amount = mainnet_amount
            .checked_add(gchain_amount)
            .ok_or(AllocationError::Overflow("combined holder total"))?;
        Ok(Self {
            account,
            mainnet_amount,
            gchain_amount,
            total_amount,
        })
    }
}

impl TryFrom<CombinedHolderRow> for CombinedHolder {
    type Error = AllocationError;

    fn try_from(row: CombinedHolderRow) -> Result<Self, Self::Error> {
        Self::new(row.account, row.mainnet_amount, row.gchain_amount)
    }
}

/// Joins both networks, keeping accounts with at least `min_gno` that are not excluded.
pub fn build_master_holder_data(
    mainnet: &[VerboseNetworkHolder],
    gchain: &[VerboseNetworkHolder],
    min_gno: U256,
    excluded: &BTreeSet<Account>,
) -> Result<Vec<CombinedHolder>, AllocationError> {
    let mainnet = index_by_account(mainnet.iter().cloned(), "mainnet holders")?;
    let gchain = index_by_account(gchain.iter().cloned(), "gchain holders")?;
    let accounts: BTreeSet<&Account> = mainnet.keys().chain(gchain.keys()).collect();

    let mut results = Vec::new();
    for account in accounts {
        let holder = CombinedHolder::new(
            account.clone(),
            mainnet.get(account).map(|h| h.total_gno).unwrap_or_default(),
            gchain.get(account).map(|h| h.total_gno).unwrap_or_default(),
        )?;
        if holder.total_amount >= min_gno && !excluded.contains(&holder.account) {
            results.push(holder);
        }
    }
    results.sort_by(|a, b| {
        b.total_amount
            .cmp(&a.total_amount)
            .then_with(|| a.account.cmp(&b.account))
    });
    info!("successfully built master holder list of {} accounts", results.len());
    Ok(results)
}

/// Fetches every venue for `network` and reconciles them.
pub async fn fetch_network_holdings(
    client: &dyn QueryClient,
    positions: &dyn PositionSource,
    cache: &Cache,
    settings: &Settings,
    network: Network,
) -> Result<NetworkHoldings> {
    let block = settings.snapshot.block(network);
    let pool_file = settings.paths.data.join("generic_pools.csv");
    let mut sources = NetworkSources {
        lp_proportions: fetch_lp_holders(client, cache, network, block, &pool_file).await?,
        gno_holders: fetch_gno_holders(client, cache, network, block).await?,
        ..NetworkSources::default()
    };
    match network {
        Network::Gchain => {
            sources.stakers = fetch_gno_stakers(client, cache, block).await?;
        }
        Network::Mainnet => {
            sources.balancer_pools = fetch_balancer_pools(client, cache, block).await?;
            sources.univ3_holders =
                fetch_univ3_holders(positions, cache, block, &settings.tokens.gno(network)).await?;
        }
    }
    Ok(NetworkHoldings::assemble(network, sources, &settings.holders.vault())?)
}

/// Per-network master list, cached as `{network}-holders-master.csv`.
///
/// On a hit none of the underlying venues are fetched.
pub async fn network_master(
    client: &dyn QueryClient,
    positions: &dyn PositionSource,
    cache: &Cache,
    settings: &Settings,
    network: Network,
) -> Result<Vec<VerboseNetworkHolder>> {
    cache
        .get_or_compute(&CacheKey::network(network, "holders-master.csv"), || async {
            let holdings = fetch_network_holdings(client, positions, cache, settings, network).await?;
            Ok(holdings.combine()?)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fraction;

    fn holder(account: &str, amount: u64) -> (Account, HolderRecord) {
        (Account::new(account), HolderRecord::new(account, U256::from(amount)))
    }

    fn vault() -> Account {
        Account::new("0xvault")
    }

    fn proportion(account: &str, pool: &str, n: u64, d: u64) -> LiquidityProportion {
        LiquidityProportion {
            account: Account::new(account),
            pool: Account::new(pool),
            proportion: Fraction::new(U256::from(n), U256::from(d)).unwrap(),
        }
    }

    fn mainnet_sources() -> NetworkSources {
        let mut lp = HashMap::new();
        lp.insert(Account::new("0xlp"), vec![proportion("0xlp", "0xbpool", 1, 4)]);
        NetworkSources {
            gno_holders: vec![holder("0xvault", 100), holder("0xalice", 7)].into_iter().collect(),
            lp_proportions: lp,
            balancer_pools: vec![
                BalancerPool {
                    pool_address: Account::new("0xbpool"),
                    gno_balance: U256::from(80),
                },
                BalancerPool {
                    pool_address: Account::new("0xother"),
                    gno_balance: U256::from(20),
                },
            ],
            univ3_holders: vec![holder("0xalice", 3)].into_iter().collect(),
            ..NetworkSources::default()
        }
    }

    #[test]
    fn test_assemble_partitions_vault_before_lp_transform() {
        let holdings = NetworkHoldings::assemble(Network::Mainnet, mainnet_sources(), &vault()).unwrap();
        assert!(!holdings.gno_holders.contains_key(&vault()));
        assert_eq!(holdings.gno_holders[&Account::new("0xbpool")].amount, U256::from(80));
        assert_eq!(holdings.lp_positions[&Account::new("0xlp")][0].amount, U256::from(20));

        let combined = holdings.combine().unwrap();
        let alice = combined.iter().find(|h| h.account.as_str() == "0xalice").unwrap();
        assert_eq!(alice.total_gno, U256::from(10));
        assert_eq!(alice.univ3_gno, U256::from(3));
        // sorted by total descending
        assert_eq!(combined[0].account.as_str(), "0xbpool");
    }

    #[test]
    fn test_vault_partition_mismatch_is_fatal() {
        let mut sources = mainnet_sources();
        sources.balancer_pools.pop();
        match NetworkHoldings::assemble(Network::Mainnet, sources, &vault()) {
            Err(AllocationError::VaultPartitionMismatch {
                vault_balance,
                partition_total,
                ..
            }) => {
                assert_eq!(vault_balance, U256::from(100));
                assert_eq!(partition_total, U256::from(80));
            }
            other => panic!("expected partition mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_pool_balance_is_fatal() {
        let mut sources = NetworkSources::default();
        sources
            .lp_proportions
            .insert(Account::new("0xlp"), vec![proportion("0xlp", "0xnowhere", 1, 2)]);
        assert!(matches!(
            NetworkHoldings::assemble(Network::Gchain, sources, &vault()),
            Err(AllocationError::MissingPoolBalance { .. })
        ));
    }

    #[test]
    fn test_network_exclusive_fields() {
        let one = U256::one();
        let zero = U256::zero();
        let staked_on_mainnet =
            VerboseNetworkHolder::new(Account::new("0x1"), Network::Mainnet, zero, zero, zero, one);
        assert!(matches!(
            staked_on_mainnet,
            Err(AllocationError::NetworkExclusiveField { field: "staked_gno", .. })
        ));
        let univ3_on_gchain =
            VerboseNetworkHolder::new(Account::new("0x1"), Network::Gchain, zero, zero, one, zero);
        assert!(matches!(
            univ3_on_gchain,
            Err(AllocationError::NetworkExclusiveField { field: "univ3_gno", .. })
        ));
        let ok = VerboseNetworkHolder::new(Account::new("0x1"), Network::Gchain, one, one, zero, one).unwrap();
        assert_eq!(ok.total_gno, U256::from(3));
    }

    #[test]
    fn test_build_master_holder_data_filters_and_sorts() {
        let mk = |account: &str, network, amount: u64| {
            VerboseNetworkHolder::new(
                Account::new(account),
                network,
                U256::from(amount),
                U256::zero(),
                U256::zero(),
                U256::zero(),
            )
            .unwrap()
        };
        let mainnet = vec![mk("0xa", Network::Mainnet, 5), mk("0xb", Network::Mainnet, 1)];
        let gchain = vec![mk("0xa", Network::Gchain, 5), mk("0xc", Network::Gchain, 10), mk("0xx", Network::Gchain, 50)];
        let excluded: BTreeSet<Account> = [Account::new("0xx")].into_iter().collect();

        let combined = build_master_holder_data(&mainnet, &gchain, U256::from(2), &excluded).unwrap();
        let accounts: Vec<&str> = combined.iter().map(|h| h.account.as_str()).collect();
        assert_eq!(accounts, vec!["0xa", "0xc"]);
        assert_eq!(combined[0].mainnet_amount, U256::from(5));
        assert_eq!(combined[0].gchain_amount, U256::from(5));
        assert_eq!(combined[0].total_amount, U256::from(10));
    }

    #[test]
    fn test_verbose_holder_total_recomputed_on_load() {
        let csv_data = "account,network,gno_held,lp_gno,univ3_gno,staked_gno,total_gno\n0xA,gchain,1,2,0,3,999\n";
        let mut reader = csv::Reader::from_reader(csv_data.as_bytes());
        let loaded: VerboseNetworkHolder = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(loaded.total_gno, U256::from(6));
        assert_eq!(loaded.account.as_str(), "0xa");
    }
}
