//! # Ledger
//!
//! One [`LedgerRow`] per account, one column per category. Rows are built from
//! the engine outputs, then extended with externally supplied option
//! allocations before the final split.

use anyhow::{Context, Result};
use ethers::types::U256;
use log::info;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::allocation::{Allocation, IndexedAllocations};
use crate::error::AllocationError;
use crate::normalization::display_tokens;
use crate::types::{serde_u256, Account};
use crate::utils::Keyed;

/// Final allocation record of one account (a Merkle leaf).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LedgerRow {
    pub account: Account,
    #[serde(with = "serde_u256")]
    pub airdrop: U256,
    #[serde(with = "serde_u256")]
    pub gno_option: U256,
    #[serde(with = "serde_u256")]
    pub user_option: U256,
    #[serde(with = "serde_u256")]
    pub investor: U256,
    #[serde(with = "serde_u256")]
    pub team: U256,
    #[serde(with = "serde_u256")]
    pub advisor: U256,
}

fn add(a: U256, b: U256) -> Result<U256, AllocationError> {
    a.checked_add(b).ok_or(AllocationError::Overflow("ledger row"))
}

impl LedgerRow {
    pub fn empty(account: Account) -> Self {
        Self {
            account,
            airdrop: U256::zero(),
            gno_option: U256::zero(),
            user_option: U256::zero(),
            investor: U256::zero(),
            team: U256::zero(),
            advisor: U256::zero(),
        }
    }

    /// The airdrop column is holder + primary + POAP + consolation; the holder
    /// allocation is granted again as the GNO option.
    pub fn from_components(
        account: Account,
        holder: U256,
        primary: U256,
        consolation: U256,
        poap: U256,
        user_option: U256,
    ) -> Result<Self, AllocationError> {
        let airdrop = [primary, poap, consolation]
            .into_iter()
            .try_fold(holder, add)?;
        Ok(Self {
            airdrop,
            gno_option: holder,
            user_option,
            ..Self::empty(account)
        })
    }

    pub fn from_option(allocation: &Allocation, option: OptionCategory) -> Self {
        let mut row = Self::empty(allocation.account.clone());
        *row.column_mut(option) = allocation.amount;
        row
    }

    fn column_mut(&mut self, option: OptionCategory) -> &mut U256 {
        match option {
            OptionCategory::Team => &mut self.team,
            OptionCategory::Investor => &mut self.investor,
            OptionCategory::AnonInvestor => &mut self.user_option,
            OptionCategory::Advisor => &mut self.advisor,
            OptionCategory::Airdrop => &mut self.airdrop,
        }
    }

    fn columns(&self) -> [U256; 6] {
        [
            self.airdrop,
            self.gno_option,
            self.user_option,
            self.investor,
            self.team,
            self.advisor,
        ]
    }

    pub fn total(&self) -> Result<U256, AllocationError> {
        self.columns().into_iter().try_fold(U256::zero(), add)
    }

    /// Adds every column of `other` into this row.
    pub fn absorb(&mut self, other: &LedgerRow) -> Result<(), AllocationError> {
        self.airdrop = add(self.airdrop, other.airdrop)?;
        self.gno_option = add(self.gno_option, other.gno_option)?;
        self.user_option = add(self.user_option, other.user_option)?;
        self.investor = add(self.investor, other.investor)?;
        self.team = add(self.team, other.team)?;
        self.advisor = add(self.advisor, other.advisor)?;
        Ok(())
    }

    /// Descending by every column in order, then ascending account.
    pub fn option_order(&self, other: &LedgerRow) -> Ordering {
        other
            .columns()
            .cmp(&self.columns())
            .then_with(|| self.account.cmp(&other.account))
    }
}

impl Keyed for LedgerRow {
    fn account(&self) -> &Account {
        &self.account
    }
}

impl fmt::Display for LedgerRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.account, display_tokens(self.airdrop))
    }
}

/// Orders by descending airdrop, then ascending account.
pub fn sort_ledger(rows: &mut [LedgerRow]) {
    rows.sort_by(|a, b| b.airdrop.cmp(&a.airdrop).then_with(|| a.account.cmp(&b.account)));
}

/// Adds `row` to `rows`, summing into the existing row of the same account.
pub fn upsert_row(rows: &mut Vec<LedgerRow>, row: LedgerRow) -> Result<(), AllocationError> {
    match rows.iter_mut().find(|r| r.account == row.account) {
        Some(existing) => existing.absorb(&row),
        None => {
            rows.push(row);
            Ok(())
        }
    }
}

/// Engine outputs feeding the ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerComponents<'a> {
    pub holder: &'a IndexedAllocations,
    pub primary: &'a IndexedAllocations,
    pub consolation: &'a IndexedAllocations,
    pub poap: &'a IndexedAllocations,
    pub user_options: &'a IndexedAllocations,
}

/// One row for every account in any category, sorted by descending airdrop.
pub fn build_ledger(components: LedgerComponents<'_>) -> Result<Vec<LedgerRow>, AllocationError> {
    if let Some(account) = components
        .primary
        .accounts()
        .find(|account| components.consolation.contains(account))
    {
        return Err(AllocationError::PrimaryConsolationOverlap(account.clone()));
    }

    let accounts: BTreeSet<&Account> = components
        .holder
        .accounts()
        .chain(components.user_options.accounts())
        .chain(components.primary.accounts())
        .chain(components.consolation.accounts())
        .chain(components.poap.accounts())
        .collect();

    let mut rows = accounts
        .into_iter()
        .map(|account| {
            LedgerRow::from_components(
                account.clone(),
                components.holder.amount(account),
                components.primary.amount(account),
                components.consolation.amount(account),
                components.poap.amount(account),
                components.user_options.amount(account),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    sort_ledger(&mut rows);
    info!("built {} ledger rows", rows.len());
    Ok(rows)
}

/// Externally decided allocations appended to the mainnet ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionCategory {
    Team,
    Investor,
    /// Booked in the user option column.
    AnonInvestor,
    Advisor,
    Airdrop,
}

impl OptionCategory {
    pub const ALL: [OptionCategory; 5] = [
        OptionCategory::Team,
        OptionCategory::Investor,
        OptionCategory::AnonInvestor,
        OptionCategory::Advisor,
        OptionCategory::Airdrop,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            OptionCategory::Team => "allocations_team.csv",
            OptionCategory::Investor => "allocations_investor.csv",
            OptionCategory::AnonInvestor => "allocations_anon_investor.csv",
            OptionCategory::Advisor => "allocations_advisor.csv",
            OptionCategory::Airdrop => "allocations_daughter_safe.csv",
        }
    }
}

impl fmt::Display for OptionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OptionCategory::Team => "Team Allocation",
            OptionCategory::Investor => "Investor Option",
            OptionCategory::AnonInvestor => "Anon Investor",
            OptionCategory::Advisor => "Advisor Option",
            OptionCategory::Airdrop => "Airdrop",
        };
        f.write_str(label)
    }
}

/// Reads `{data_dir}/{option.file_name()}` (`account, amount`).
pub fn load_options(data_dir: &Path, option: OptionCategory) -> Result<IndexedAllocations> {
    let path = data_dir.join(option.file_name());
    let mut reader =
        csv::Reader::from_path(&path).with_context(|| format!("opening {}", path.display()))?;
    let allocations = reader
        .deserialize::<Allocation>()
        .map(|record| record.with_context(|| format!("parsing {}", path.display())))
        .collect::<Result<Vec<_>>>()?;
    Ok(IndexedAllocations::new(allocations, option.file_name())?)
}
