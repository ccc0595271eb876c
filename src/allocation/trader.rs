//! Trader allocations.
//!
//! Mainnet and gchain activity of an account is merged before anything is
//! evaluated, so an account trading on both networks is tiered once on its
//! combined volume. Every merged trader then lands in exactly one of three
//! buckets: primary (eligible), consolation (not eligible but active enough)
//! or nothing.

use ethers::types::U256;
use log::info;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{check_supply, sort_allocations, Allocation};
use crate::error::AllocationError;
use crate::normalization::mul_div_floor;
use crate::settings::{Settings, Trading};
use crate::sources::traders::{sort_traders, tier_factor, TraderRecord};
use crate::types::Account;

/// Number of primary traders per tier and the weights they add up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCounts {
    counts: BTreeMap<i32, u64>,
    boundaries: Vec<u64>,
    pub primary_total_weight: U256,
    pub user_option_weight: U256,
}

impl TierCounts {
    pub fn new(primary: &[TraderRecord], rules: &Trading) -> Self {
        let mut counts: BTreeMap<i32, u64> = BTreeMap::new();
        for trader in primary {
            *counts.entry(trader.tier).or_default() += 1;
        }
        let weight = |factors: &[u64]| {
            counts.iter().fold(U256::zero(), |acc, (tier, count)| {
                match tier_factor(*tier, factors) {
                    Some(factor) => acc + U256::from(factor) * U256::from(*count),
                    None => acc,
                }
            })
        };
        let primary_total_weight = weight(&rules.trading_factors);
        let user_option_weight = weight(&rules.user_option_factors);
        Self {
            counts,
            boundaries: rules.volume_tiers.clone(),
            primary_total_weight,
            user_option_weight,
        }
    }

    pub fn count(&self, tier: i32) -> u64 {
        self.counts.get(&tier).copied().unwrap_or_default()
    }
}

impl fmt::Display for TierCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, bound) in self.boundaries.iter().enumerate() {
            let count = self.count(i as i32);
            match self.boundaries.get(i + 1) {
                Some(next) => writeln!(
                    f,
                    "Tier {} (between {}K and {}K): {}",
                    i,
                    bound / 1_000,
                    next / 1_000,
                    count
                )?,
                None => writeln!(f, "Tier {} (above {}M): {}", i, bound / 1_000_000, count)?,
            }
        }
        writeln!(f, "----------------------------------")?;
        writeln!(f, "Total Weights:")?;
        writeln!(f, "   Primary Trader: {}", self.primary_total_weight)?;
        write!(f, "   User Option: {}", self.user_option_weight)
    }
}

/// Merged traders split into the two mutually exclusive categories.
#[derive(Debug, Clone)]
pub struct EligibleTraders {
    /// Sorted by descending volume.
    pub primary: Vec<TraderRecord>,
    /// Sorted by descending volume.
    pub consolation: Vec<TraderRecord>,
    pub tiers: TierCounts,
}

/// Merges both networks' records and sorts every non-excluded trader into
/// primary or consolation.
pub fn classify_traders(
    mainnet: &BTreeMap<Account, TraderRecord>,
    gchain: &BTreeMap<Account, TraderRecord>,
    excluded: &BTreeSet<Account>,
    rules: &Trading,
) -> Result<EligibleTraders, AllocationError> {
    let accounts: BTreeSet<&Account> = mainnet
        .keys()
        .chain(gchain.keys())
        .filter(|account| !excluded.contains(*account))
        .collect();

    let mut primary = Vec::new();
    let mut consolation = Vec::new();
    for account in accounts {
        let trader = match (mainnet.get(account), gchain.get(account)) {
            (Some(m), Some(g)) => m.merge(g, &rules.volume_tiers)?,
            (Some(m), None) => m.clone(),
            (None, Some(g)) => g.clone(),
            (None, None) => continue,
        };
        if trader.is_eligible(rules)? {
            primary.push(trader);
        } else if trader.meets_consolation(rules) {
            consolation.push(trader);
        }
    }

    let tiers = TierCounts::new(&primary, rules);
    info!("tier count for this dataset\n{}", tiers);
    sort_traders(&mut primary);
    sort_traders(&mut consolation);
    Ok(EligibleTraders {
        primary,
        consolation,
        tiers,
    })
}

/// The three trader categories, each sorted the way it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraderAllocations {
    pub primary: Vec<Allocation>,
    /// Equal amounts, so ordered by account alone.
    pub consolation: Vec<Allocation>,
    pub user_options: Vec<Allocation>,
}

#[derive(Debug, Clone)]
pub struct TraderAllocator {
    rules: Trading,
    primary_supply: U256,
    consolation_supply: U256,
    user_option_supply: U256,
}

impl TraderAllocator {
    pub fn new(
        rules: Trading,
        primary_supply: U256,
        consolation_supply: U256,
        user_option_supply: U256,
    ) -> Self {
        Self {
            rules,
            primary_supply,
            consolation_supply,
            user_option_supply,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.trading.clone(),
            settings.supplies.primary_wei(),
            settings.supplies.consolation_wei(),
            settings.supplies.user_option_wei(),
        )
    }

    pub fn rules(&self) -> &Trading {
        &self.rules
    }

    fn weighted(
        &self,
        trader: &TraderRecord,
        factors: &[u64],
        supply: U256,
        total_weight: U256,
    ) -> Result<Allocation, AllocationError> {
        if !trader.is_eligible(&self.rules)? {
            return Err(AllocationError::IneligibleTrader(trader.account.clone()));
        }
        let factor = tier_factor(trader.tier, factors).ok_or_else(|| AllocationError::InvalidTier {
            account: trader.account.clone(),
            tier: trader.tier,
        })?;
        Ok(Allocation::new(
            trader.account.clone(),
            mul_div_floor(supply, U256::from(factor), total_weight)?,
        ))
    }

    /// `primary_supply * factor(tier) // total_weight`.
    pub fn primary_allocation(
        &self,
        trader: &TraderRecord,
        total_weight: U256,
    ) -> Result<Allocation, AllocationError> {
        self.weighted(trader, &self.rules.trading_factors, self.primary_supply, total_weight)
    }

    /// Same as [`TraderAllocator::primary_allocation`] with the user option
    /// factors and supply.
    pub fn user_option(&self, trader: &TraderRecord, total_weight: U256) -> Result<Allocation, AllocationError> {
        self.weighted(
            trader,
            &self.rules.user_option_factors,
            self.user_option_supply,
            total_weight,
        )
    }

    /// `consolation_supply // num_recipients`.
    pub fn consolation_allocation(
        &self,
        trader: &TraderRecord,
        num_recipients: usize,
    ) -> Result<Allocation, AllocationError> {
        if trader.is_eligible(&self.rules)? {
            return Err(AllocationError::EligibleConsolation(trader.account.clone()));
        }
        if num_recipients == 0 {
            return Err(AllocationError::ZeroDenominator);
        }
        Ok(Allocation::new(
            trader.account.clone(),
            self.consolation_supply / U256::from(num_recipients),
        ))
    }

    pub fn allocate(&self, traders: &EligibleTraders) -> Result<TraderAllocations, AllocationError> {
        let mut primary = traders
            .primary
            .iter()
            .map(|t| self.primary_allocation(t, traders.tiers.primary_total_weight))
            .collect::<Result<Vec<_>, _>>()?;
        check_supply("primary", &primary, self.primary_supply)?;
        sort_allocations(&mut primary);

        let num_recipients = traders.consolation.len();
        let mut consolation = traders
            .consolation
            .iter()
            .map(|t| self.consolation_allocation(t, num_recipients))
            .collect::<Result<Vec<_>, _>>()?;
        check_supply("consolation", &consolation, self.consolation_supply)?;
        consolation.sort_by(|a, b| a.account.cmp(&b.account));

        let mut user_options = traders
            .primary
            .iter()
            .map(|t| self.user_option(t, traders.tiers.user_option_weight))
            .collect::<Result<Vec<_>, _>>()?;
        check_supply("user option", &user_options, self.user_option_supply)?;
        sort_allocations(&mut user_options);

        Ok(TraderAllocations {
            primary,
            consolation,
            user_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn trader(account: &str, volume: u128, trades: u64, last: &str) -> TraderRecord {
        TraderRecord::new(
            Account::new(account),
            volume,
            trades,
            date("2021-01-01"),
            date(last),
            &Trading::default().volume_tiers,
        )
    }

    fn book(traders: Vec<TraderRecord>) -> BTreeMap<Account, TraderRecord> {
        traders.into_iter().map(|t| (t.account.clone(), t)).collect()
    }

    fn allocator() -> TraderAllocator {
        TraderAllocator::new(
            Trading::default(),
            U256::from(1_000),
            U256::from(100),
            U256::from(500),
        )
    }

    #[test]
    fn test_cross_network_activity_is_evaluated_once() {
        let rules = Trading::default();
        // neither half is eligible alone: 600 USD each
        let mainnet = book(vec![trader("0xboth", 600, 2, "2021-02-01")]);
        let gchain = book(vec![trader("0xboth", 600, 2, "2021-02-01")]);

        let classified = classify_traders(&mainnet, &gchain, &BTreeSet::new(), &rules).unwrap();
        assert_eq!(classified.primary.len(), 1);
        assert_eq!(classified.primary[0].eligible_volume, 1_200);
        assert_eq!(classified.primary[0].num_trades, 4);
        assert!(classified.consolation.is_empty());
        assert_eq!(classified.tiers.count(0), 1);
    }

    #[test]
    fn test_classification_buckets_and_exclusions() {
        let rules = Trading::default();
        let mainnet = book(vec![
            trader("0xprimary", 20_000, 3, "2021-02-01"),
            trader("0xrecent", 20_000, 3, "2021-01-05"),
            trader("0xnobody", 10, 1, "2021-02-01"),
            trader("0xexcluded", 20_000, 3, "2021-02-01"),
        ]);
        let gchain = book(vec![trader("0xbusy", 10, 6, "2021-01-02")]);
        let excluded: BTreeSet<Account> = [Account::new("0xexcluded")].into_iter().collect();

        let classified = classify_traders(&mainnet, &gchain, &excluded, &rules).unwrap();
        let primary: Vec<&str> = classified.primary.iter().map(|t| t.account.as_str()).collect();
        let consolation: Vec<&str> = classified.consolation.iter().map(|t| t.account.as_str()).collect();
        assert_eq!(primary, vec!["0xprimary"]);
        assert_eq!(consolation, vec!["0xrecent", "0xbusy"]);
        assert_eq!(classified.tiers.primary_total_weight, U256::from(3));
        assert_eq!(classified.tiers.user_option_weight, U256::from(2));
    }

    #[test]
    fn test_allocations_respect_supplies() {
        let rules = Trading::default();
        let mainnet = book(vec![
            trader("0xa", 1_000, 3, "2021-02-01"),
            trader("0xb", 10_000, 3, "2021-02-01"),
            trader("0xc", 10_000, 3, "2021-02-01"),
            trader("0xd", 900, 9, "2021-01-02"),
            trader("0xe", 900, 9, "2021-01-02"),
            trader("0xf", 900, 9, "2021-01-02"),
        ]);
        let classified = classify_traders(&mainnet, &BTreeMap::new(), &BTreeSet::new(), &rules).unwrap();
        let allocations = allocator().allocate(&classified).unwrap();

        // weights 1 + 3 + 3 = 7
        let primary: Vec<u64> = allocations.primary.iter().map(|a| a.amount.as_u64()).collect();
        assert_eq!(primary, vec![428, 428, 142]);
        assert_eq!(allocations.primary[0].account.as_str(), "0xb");

        let consolation: Vec<u64> = allocations.consolation.iter().map(|a| a.amount.as_u64()).collect();
        assert_eq!(consolation, vec![33, 33, 33]);
        assert_eq!(allocations.consolation[0].account.as_str(), "0xd");

        // user option weights 1 + 2 + 2 = 5
        let user_options: Vec<u64> = allocations.user_options.iter().map(|a| a.amount.as_u64()).collect();
        assert_eq!(user_options, vec![200, 200, 100]);
    }

    #[test]
    fn test_category_guards() {
        let allocator = allocator();
        let eligible = trader("0xa", 1_000, 3, "2021-02-01");
        let ineligible = trader("0xb", 900, 9, "2021-01-02");

        assert!(matches!(
            allocator.primary_allocation(&ineligible, U256::one()),
            Err(AllocationError::IneligibleTrader(_))
        ));
        assert!(matches!(
            allocator.user_option(&ineligible, U256::one()),
            Err(AllocationError::IneligibleTrader(_))
        ));
        assert!(matches!(
            allocator.consolation_allocation(&eligible, 1),
            Err(AllocationError::EligibleConsolation(_))
        ));
    }

    #[test]
    fn test_tier_table_rendering() {
        let rules = Trading::default();
        let tiers = TierCounts::new(&[trader("0xa", 2_000_000, 3, "2021-02-01")], &rules);
        let rendered = tiers.to_string();
        assert!(rendered.starts_with("Tier 0 (between 1K and 10K): 0\n"));
        assert!(rendered.contains("Tier 5 (above 1M): 1\n"));
        assert!(rendered.ends_with("   User Option: 24"));
    }
}
