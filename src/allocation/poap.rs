//! Community allocations weighted by proof tokens.
//!
//! Alpha traders of each network are ingested first as synthetic tokens, then
//! every POAP listed in the catalogue. An account's allocation is proportional
//! to the summed weight of everything it holds.

use anyhow::Result;
use ethers::types::U256;
use log::info;
use std::collections::{BTreeMap, BTreeSet};

use super::{check_supply, sort_allocations, Allocation};
use crate::error::AllocationError;
use crate::normalization::mul_div_floor;
use crate::settings::Poap;
use crate::sources::poap::{PoapCatalogue, PoapToken};
use crate::types::{Account, Network};

/// Synthetic token standing for "alpha trader on `network`".
pub fn alpha_trader_token(network: Network, weight: u64) -> PoapToken {
    let (token_id, event) = match network {
        Network::Mainnet => (1, "Alpha Trader (Mainnet)"),
        Network::Gchain => (100, "Alpha Trader (Gnosis Chain)"),
    };
    PoapToken {
        token_id,
        factor: weight,
        event: event.to_string(),
    }
}

/// Running tally of held weight per account.
///
/// Excluded accounts are dropped on ingestion and never reach the total.
#[derive(Debug, Clone, Default)]
pub struct PoapTally {
    excluded: BTreeSet<Account>,
    weights: BTreeMap<Account, U256>,
    total_weight: U256,
}

impl PoapTally {
    pub fn new(excluded: BTreeSet<Account>) -> Self {
        Self {
            excluded,
            ..Self::default()
        }
    }

    /// Credits `token.factor` to every holder. A holder listed twice for the
    /// same token is fatal.
    pub fn insert_many(&mut self, holders: &[Account], token: &PoapToken) -> Result<(), AllocationError> {
        let mut seen = BTreeSet::new();
        for holder in holders {
            if !seen.insert(holder) {
                return Err(AllocationError::DuplicateAccount {
                    account: holder.clone(),
                    context: format!("holders of token {}", token.token_id),
                });
            }
        }
        let factor = U256::from(token.factor);
        for holder in seen {
            if self.excluded.contains(holder) {
                continue;
            }
            *self.weights.entry(holder.clone()).or_default() += factor;
            self.total_weight += factor;
        }
        Ok(())
    }

    pub fn total_weight(&self) -> U256 {
        self.total_weight
    }

    pub fn weight(&self, account: &Account) -> U256 {
        self.weights.get(account).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// `supply * weight // total_weight` per account, sorted by descending amount.
    pub fn allocate(&self, supply: U256) -> Result<Vec<Allocation>, AllocationError> {
        if self.total_weight.is_zero() {
            return Ok(Vec::new());
        }
        let mut allocations = self
            .weights
            .iter()
            .map(|(account, weight)| {
                Ok(Allocation::new(
                    account.clone(),
                    mul_div_floor(supply, *weight, self.total_weight)?,
                ))
            })
            .collect::<Result<Vec<_>, AllocationError>>()?;
        check_supply("poap", &allocations, supply)?;
        sort_allocations(&mut allocations);
        Ok(allocations)
    }
}

/// Builds the tally from the alpha trader sets and the POAP catalogue.
pub fn tally_poap_holders(
    alpha_traders: &BTreeMap<Network, BTreeSet<Account>>,
    catalogue: &PoapCatalogue,
    weights: &Poap,
    excluded: BTreeSet<Account>,
) -> Result<PoapTally> {
    let mut tally = PoapTally::new(excluded);
    for network in Network::ALL {
        if let Some(alphas) = alpha_traders.get(&network) {
            let token = alpha_trader_token(network, weights.alpha_trader_weight(network));
            let holders: Vec<Account> = alphas.iter().cloned().collect();
            tally.insert_many(&holders, &token)?;
            info!("{} has {} holders", token.event, holders.len());
        }
    }
    for token in catalogue.tokens()? {
        let holders = catalogue.holders(token.token_id)?;
        tally.insert_many(&holders, &token)?;
        info!("POAP {} ({}) has {} holders", token.token_id, token.event, holders.len());
    }
    Ok(tally)
}
