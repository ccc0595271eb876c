//! Per-network trading activity and the volume tier it lands a trader in.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::{Cache, CacheKey};
use crate::error::AllocationError;
use crate::query_client::{row_account, row_date, row_u128, Query, QueryClient, QueryParameter};
use crate::settings::Trading;
use crate::types::{Account, Network};
use crate::utils::{index_by_account, Keyed};

/// Tier sentinel for volumes below the lowest boundary.
pub const INELIGIBLE_TIER: i32 = -1;

/// Index of the highest boundary not exceeding `volume`, or [`INELIGIBLE_TIER`].
pub fn volume_tier(volume: u128, boundaries: &[u64]) -> i32 {
    boundaries
        .iter()
        .rposition(|&bound| volume >= u128::from(bound))
        .map_or(INELIGIBLE_TIER, |index| index as i32)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraderRecord {
    pub account: Account,
    /// Whole USD.
    pub eligible_volume: u128,
    pub num_trades: u64,
    pub first_trade: NaiveDate,
    pub last_trade: NaiveDate,
    pub tier: i32,
}

impl Keyed for TraderRecord {
    fn account(&self) -> &Account {
        &self.account
    }
}

impl TraderRecord {
    pub fn new(
        account: Account,
        eligible_volume: u128,
        num_trades: u64,
        first_trade: NaiveDate,
        last_trade: NaiveDate,
        boundaries: &[u64],
    ) -> Self {
        Self {
            account,
            eligible_volume,
            num_trades,
            first_trade,
            last_trade,
            tier: volume_tier(eligible_volume, boundaries),
        }
    }

    pub fn days_active(&self) -> i64 {
        (self.last_trade - self.first_trade).num_days()
    }

    /// Combines activity of the same account on two networks.
    pub fn merge(&self, other: &TraderRecord, boundaries: &[u64]) -> Result<TraderRecord, AllocationError> {
        if self.account != other.account {
            return Err(AllocationError::TraderMergeMismatch {
                left: self.account.clone(),
                right: other.account.clone(),
            });
        }
        let volume = self
            .eligible_volume
            .checked_add(other.eligible_volume)
            .ok_or(AllocationError::Overflow("trader volume"))?;
        Ok(TraderRecord::new(
            self.account.clone(),
            volume,
            self.num_trades + other.num_trades,
            self.first_trade.min(other.first_trade),
            self.last_trade.max(other.last_trade),
            boundaries,
        ))
    }

    /// Primary eligibility: volume, trade count and activity span all at threshold.
    ///
    /// An eligible trader whose tier carries no primary weight is an error.
    pub fn is_eligible(&self, rules: &Trading) -> Result<bool, AllocationError> {
        let eligible = self.eligible_volume >= u128::from(rules.min_volume)
            && self.num_trades >= rules.primary_min_trades
            && self.days_active() >= rules.min_days;
        if eligible && tier_factor(self.tier, &rules.trading_factors).is_none() {
            return Err(AllocationError::InvalidTier {
                account: self.account.clone(),
                tier: self.tier,
            });
        }
        Ok(eligible)
    }

    /// Consolation criteria, checked only for traders that are not eligible.
    pub fn meets_consolation(&self, rules: &Trading) -> bool {
        self.eligible_volume >= u128::from(rules.min_volume)
            || self.num_trades >= rules.consolation_min_trades
    }
}

/// Weight of `tier` in `factors`, if the tier has one.
pub fn tier_factor(tier: i32, factors: &[u64]) -> Option<u64> {
    usize::try_from(tier).ok().and_then(|i| factors.get(i).copied())
}

/// Trader activity on `network`, cached as `{network}-trader-data.csv`.
///
/// Tiers are recomputed from `rules` whether the rows come from the cache or
/// the query, so a stale tier column never leaks into allocations.
pub async fn fetch_trader_data(
    client: &dyn QueryClient,
    cache: &Cache,
    network: Network,
    block: u64,
    rules: &Trading,
) -> Result<BTreeMap<Account, TraderRecord>> {
    let key = CacheKey::network(network, "trader-data.csv");
    let boundaries = &rules.volume_tiers;
    let records: Vec<TraderRecord> = cache
        .get_or_compute(&key, || async {
            let query = Query::new("generic_trader_data", network, "trader data")
                .at_block(block)
                .with_parameter(QueryParameter::number("StableFactor", &rules.stable_factor));
            let rows = client.fetch(&query).await?;
            let mut records = rows
                .iter()
                .map(|row| {
                    Ok(TraderRecord::new(
                        row_account(row, "trader")?,
                        row_u128(row, "eligible_volume")?,
                        u64::try_from(row_u128(row, "num_trades")?)?,
                        row_date(row, "first_trade")?,
                        row_date(row, "last_trade")?,
                        boundaries,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            sort_traders(&mut records);
            Ok(records)
        })
        .await?;

    let records = records.into_iter().map(|mut record| {
        record.tier = volume_tier(record.eligible_volume, boundaries);
        record
    });
    Ok(index_by_account(records, key.name())?)
}

/// Orders by descending volume, then ascending account.
pub fn sort_traders(records: &mut [TraderRecord]) {
    records.sort_by(|a, b| {
        b.eligible_volume
            .cmp(&a.eligible_volume)
            .then_with(|| a.account.cmp(&b.account))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::tests::MockQueryClient;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn trader(account: &str, volume: u128, trades: u64, first: &str, last: &str) -> TraderRecord {
        let rules = Trading::default();
        TraderRecord::new(
            Account::new(account),
            volume,
            trades,
            date(first),
            date(last),
            &rules.volume_tiers,
        )
    }

    #[test]
    fn test_tier_boundaries_are_inclusive_low() {
        let tiers = Trading::default().volume_tiers;
        for (index, bound) in tiers.iter().enumerate() {
            assert_eq!(volume_tier(u128::from(*bound), &tiers), index as i32);
            if index > 0 {
                assert_eq!(volume_tier(u128::from(*bound) - 1, &tiers), index as i32 - 1);
            }
        }
        assert_eq!(volume_tier(999, &tiers), INELIGIBLE_TIER);
        assert_eq!(volume_tier(0, &tiers), INELIGIBLE_TIER);
        assert_eq!(volume_tier(u128::MAX, &tiers), 5);
    }

    #[test]
    fn test_merge_sums_activity_and_widens_dates() {
        let tiers = Trading::default().volume_tiers;
        let a = trader("0x1", 10, 1, "2021-01-01", "2021-03-01");
        let b = trader("0x1", 10, 1, "2021-02-01", "2021-04-01");

        let merged = a.merge(&b, &tiers).unwrap();
        assert_eq!(merged.eligible_volume, 20);
        assert_eq!(merged.num_trades, 2);
        assert_eq!(merged.first_trade, date("2021-01-01"));
        assert_eq!(merged.last_trade, date("2021-04-01"));
        assert_eq!(merged, b.merge(&a, &tiers).unwrap());
    }

    #[test]
    fn test_merge_across_accounts_fails() {
        let tiers = Trading::default().volume_tiers;
        let a = trader("0x1", 10, 1, "2021-01-01", "2021-03-01");
        let b = trader("0x2", 10, 1, "2021-01-01", "2021-03-01");
        assert!(matches!(
            a.merge(&b, &tiers),
            Err(AllocationError::TraderMergeMismatch { .. })
        ));
    }

    #[test]
    fn test_merge_recomputes_tier() {
        let tiers = Trading::default().volume_tiers;
        let a = trader("0x1", 600, 1, "2021-01-01", "2021-01-02");
        let b = trader("0x1", 600, 1, "2021-01-01", "2021-01-02");
        assert_eq!(a.tier, INELIGIBLE_TIER);
        assert_eq!(a.merge(&b, &tiers).unwrap().tier, 0);
    }

    #[test]
    fn test_eligibility() {
        let rules = Trading::default();
        let eligible = trader("0x1", 1_000, 3, "2021-01-01", "2021-01-15");
        assert!(eligible.is_eligible(&rules).unwrap());

        let short_span = trader("0x1", 1_000, 3, "2021-01-01", "2021-01-14");
        assert!(!short_span.is_eligible(&rules).unwrap());
        assert!(short_span.meets_consolation(&rules));

        let few_trades = trader("0x1", 500, 4, "2021-01-01", "2021-06-01");
        assert!(!few_trades.is_eligible(&rules).unwrap());
        assert!(!few_trades.meets_consolation(&rules));

        let many_trades = trader("0x1", 500, 5, "2021-01-01", "2021-01-02");
        assert!(many_trades.meets_consolation(&rules));
    }

    #[test]
    fn test_eligible_without_weight_is_invalid() {
        let mut rules = Trading::default();
        rules.trading_factors.truncate(2);
        let whale = trader("0x1", 2_000_000, 30, "2021-01-01", "2021-06-01");
        assert!(matches!(
            whale.is_eligible(&rules),
            Err(AllocationError::InvalidTier { tier: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_trader_data_round_trips_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let rules = Trading::default();
        let client = MockQueryClient::default().with(
            "generic_trader_data",
            vec![
                json!({"trader": "0xA", "eligible_volume": 1500.7, "num_trades": 4,
                       "first_trade": "2021-01-01", "last_trade": "2021-02-01"}),
                json!({"trader": "0xb", "eligible_volume": "25000", "num_trades": "9",
                       "first_trade": "2021-05-01T00:00:00", "last_trade": "2021-06-01"}),
            ],
        );

        let fetched = fetch_trader_data(&client, &cache, Network::Mainnet, 1, &rules)
            .await
            .unwrap();
        assert_eq!(fetched[&Account::new("0xa")].eligible_volume, 1500);
        assert_eq!(fetched[&Account::new("0xb")].tier, 1);

        let params = client.received.lock().unwrap()[0].parameters.clone();
        assert_eq!(params[1].key, "StableFactor");
        assert_eq!(params[1].value, "0.1");

        let contents =
            std::fs::read_to_string(cache.path(&CacheKey::file("mainnet-trader-data.csv"))).unwrap();
        assert!(contents.starts_with(
            "account,eligible_volume,num_trades,first_trade,last_trade,tier\n0xb,25000,9,2021-05-01,2021-06-01,1\n"
        ));

        let reloaded = fetch_trader_data(&client, &cache, Network::Mainnet, 1, &rules)
            .await
            .unwrap();
        assert_eq!(reloaded, fetched);
        assert_eq!(client.calls(), 1);
    }
}
