//! # Network Split
//!
//! Assigns every ledger row to mainnet or gchain. Externally owned accounts
//! exist on both networks, so the row total decides; contracts do not, so a
//! contract on exactly one network always receives its allocation there.
//!
//! | total vs threshold | contract on      | network          |
//! |--------------------|------------------|------------------|
//! | any                | both             | manual override  |
//! | at or above        | not gchain       | mainnet          |
//! | at or above        | gchain only      | gchain           |
//! | below              | not mainnet      | gchain           |
//! | below              | mainnet only     | mainnet          |
//!
//! A contract on both networks without an override is fatal.

use ethers::types::U256;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::allocation::IndexedAllocations;
use crate::error::AllocationError;
use crate::ledger::{sort_ledger, upsert_row, LedgerRow, OptionCategory};
use crate::normalization::{display_millions, display_tokens};
use crate::settings::Split;
use crate::types::{Account, Network};

/// Total of every category expected across both ledgers, in base units.
pub const EXPECTED_TOTAL: &str = "555333333333333330000000000";

/// Accounts holding code on each network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractSets {
    pub mainnet: BTreeSet<Account>,
    pub gchain: BTreeSet<Account>,
}

impl ContractSets {
    pub fn new(mainnet: BTreeSet<Account>, gchain: BTreeSet<Account>) -> Self {
        Self { mainnet, gchain }
    }

    pub fn on(&self, network: Network) -> &BTreeSet<Account> {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Gchain => &self.gchain,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Splitter {
    threshold: U256,
    overrides: BTreeMap<Account, Network>,
}

impl Splitter {
    pub fn new(threshold: U256, overrides: BTreeMap<Account, Network>) -> Self {
        Self {
            threshold,
            overrides,
        }
    }

    pub fn from_settings(split: &Split) -> Self {
        Self::new(split.threshold_wei(), split.overrides())
    }

    pub fn classify(&self, row: &LedgerRow, contracts: &ContractSets) -> Result<Network, AllocationError> {
        let on_mainnet = contracts.mainnet.contains(&row.account);
        let on_gchain = contracts.gchain.contains(&row.account);
        if on_mainnet && on_gchain {
            return self
                .overrides
                .get(&row.account)
                .copied()
                .ok_or_else(|| AllocationError::UnresolvedDualContract(row.account.clone()));
        }
        let network = if row.total()? >= self.threshold {
            if on_gchain {
                Network::Gchain
            } else {
                Network::Mainnet
            }
        } else if on_mainnet {
            Network::Mainnet
        } else {
            Network::Gchain
        };
        Ok(network)
    }

    pub fn split(&self, rows: Vec<LedgerRow>, contracts: &ContractSets) -> Result<SplitLedger, AllocationError> {
        let overlap = contracts.mainnet.intersection(&contracts.gchain).count();
        info!("{} contracts on both networks", overlap);

        let input_accounts: BTreeSet<Account> = rows.iter().map(|r| r.account.clone()).collect();
        let num_rows = rows.len();

        let mut mainnet = Vec::new();
        let mut gchain = Vec::new();
        for row in rows {
            match self.classify(&row, contracts)? {
                Network::Mainnet => mainnet.push(row),
                Network::Gchain => gchain.push(row),
            }
        }
        sort_ledger(&mut mainnet);
        sort_ledger(&mut gchain);

        let split = SplitLedger { mainnet, gchain };
        split.verify(num_rows, &input_accounts)?;
        info!(
            "split {} rows into {} mainnet and {} gchain",
            num_rows,
            split.mainnet.len(),
            split.gchain.len()
        );
        Ok(split)
    }
}

fn unique_accounts(rows: &[LedgerRow], network: Network) -> Result<BTreeSet<Account>, AllocationError> {
    let mut accounts = BTreeSet::new();
    for row in rows {
        if !accounts.insert(row.account.clone()) {
            return Err(AllocationError::SplitPostCondition(format!(
                "duplicate {} row for {}",
                network, row.account
            )));
        }
    }
    Ok(accounts)
}

/// The ledger partitioned by network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitLedger {
    pub mainnet: Vec<LedgerRow>,
    pub gchain: Vec<LedgerRow>,
}

impl SplitLedger {
    pub fn ledger(&self, network: Network) -> &[LedgerRow] {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Gchain => &self.gchain,
        }
    }

    fn ledger_mut(&mut self, network: Network) -> &mut Vec<LedgerRow> {
        match network {
            Network::Mainnet => &mut self.mainnet,
            Network::Gchain => &mut self.gchain,
        }
    }

    /// Sizes add up, no ledger repeats an account, and together they cover
    /// exactly `input_accounts`.
    pub fn verify(&self, num_rows: usize, input_accounts: &BTreeSet<Account>) -> Result<(), AllocationError> {
        if self.mainnet.len() + self.gchain.len() != num_rows {
            return Err(AllocationError::SplitPostCondition(format!(
                "{} + {} rows from {}",
                self.mainnet.len(),
                self.gchain.len(),
                num_rows
            )));
        }
        let mainnet = unique_accounts(&self.mainnet, Network::Mainnet)?;
        let gchain = unique_accounts(&self.gchain, Network::Gchain)?;
        if let Some(account) = mainnet.intersection(&gchain).next() {
            return Err(AllocationError::SplitPostCondition(format!(
                "{} assigned to both networks",
                account
            )));
        }
        let covered: BTreeSet<Account> = mainnet.union(&gchain).cloned().collect();
        if &covered != input_accounts {
            return Err(AllocationError::SplitPostCondition(
                "split accounts differ from ledger accounts".to_string(),
            ));
        }
        Ok(())
    }

    pub fn accounts(&self) -> BTreeSet<Account> {
        self.mainnet
            .iter()
            .chain(self.gchain.iter())
            .map(|r| r.account.clone())
            .collect()
    }

    /// Appends `allocations` to the mainnet ledger in option order.
    ///
    /// Team recipients must not already hold anything on either network.
    pub fn append_options(
        &mut self,
        option: OptionCategory,
        allocations: &IndexedAllocations,
    ) -> Result<(), AllocationError> {
        if option == OptionCategory::Team {
            let existing = self.accounts();
            if let Some(account) = allocations.accounts().find(|a| existing.contains(*a)) {
                return Err(AllocationError::TeamOverlap(account.clone()));
            }
        }
        let mut appendages: Vec<LedgerRow> = allocations
            .values()
            .map(|allocation| LedgerRow::from_option(allocation, option))
            .collect();
        appendages.sort_by(|a, b| a.option_order(b));
        info!(
            "appending {} {} entries to mainnet allocation with a total of {} tokens",
            appendages.len(),
            option,
            display_tokens(allocations.total()?)
        );
        let mut index: HashMap<Account, usize> = self
            .mainnet
            .iter()
            .enumerate()
            .map(|(position, row)| (row.account.clone(), position))
            .collect();
        for row in appendages {
            match index.get(&row.account) {
                Some(&position) => self.mainnet[position].absorb(&row)?,
                None => {
                    index.insert(row.account.clone(), self.mainnet.len());
                    self.mainnet.push(row);
                }
            }
        }
        Ok(())
    }

    /// Moves the row of `source` (on either network) to `destination`.
    pub fn redirect(&mut self, source: &Account, destination: &Account) -> Result<(), AllocationError> {
        for network in Network::ALL {
            let ledger = self.ledger_mut(network);
            if let Some(index) = ledger.iter().position(|r| &r.account == source) {
                let mut row = ledger.remove(index);
                info!("redirecting {} allocation {} to {}", network, row, destination);
                row.account = destination.clone();
                upsert_row(ledger, row)?;
            }
        }
        Ok(())
    }

    fn column_total<F>(&self, column: F) -> Result<U256, AllocationError>
    where
        F: Fn(&LedgerRow) -> Result<U256, AllocationError>,
    {
        self.mainnet
            .iter()
            .chain(self.gchain.iter())
            .try_fold(U256::zero(), |acc, row| {
                acc.checked_add(column(row)?)
                    .ok_or(AllocationError::Overflow("ledger column total"))
            })
    }

    pub fn summary(&self) -> Result<SplitSummary, AllocationError> {
        let expected = U256::from_dec_str(EXPECTED_TOTAL).map_err(|_| AllocationError::Overflow("expected total"))?;
        let grand_total = self.column_total(LedgerRow::total)?;
        Ok(SplitSummary {
            mainnet_rows: self.mainnet.len(),
            gchain_rows: self.gchain.len(),
            airdrop: self.column_total(|r| Ok(r.airdrop))?,
            gno_option: self.column_total(|r| Ok(r.gno_option))?,
            user_option: self.column_total(|r| Ok(r.user_option))?,
            investor: self.column_total(|r| Ok(r.investor))?,
            advisor: self.column_total(|r| Ok(r.advisor))?,
            team: self.column_total(|r| Ok(r.team))?,
            grand_total,
            expected_total: expected,
        })
    }
}

/// Category totals across both ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub mainnet_rows: usize,
    pub gchain_rows: usize,
    pub airdrop: U256,
    pub gno_option: U256,
    pub user_option: U256,
    pub investor: U256,
    pub advisor: U256,
    pub team: U256,
    pub grand_total: U256,
    pub expected_total: U256,
}

impl SplitSummary {
    /// Signed difference between the expected and the allocated total, in wei.
    pub fn unallocated(&self) -> String {
        if self.expected_total >= self.grand_total {
            (self.expected_total - self.grand_total).to_string()
        } else {
            format!("-{}", self.grand_total - self.expected_total)
        }
    }
}

impl fmt::Display for SplitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "======================")?;
        writeln!(f, "Allocation Counts")?;
        writeln!(f, "   Mainnet:      {}", self.mainnet_rows)?;
        writeln!(f, "   Gnosis Chain: {}", self.gchain_rows)?;
        writeln!(f, "----------------------")?;
        writeln!(f, "Category Totals")?;
        writeln!(f, "   Airdrop:      {}M", display_millions(self.airdrop))?;
        writeln!(f, "   Gno Option:   {}M", display_millions(self.gno_option))?;
        writeln!(f, "   User Option:  {}M", display_millions(self.user_option))?;
        writeln!(f, "   Investor:     {}M", display_millions(self.investor))?;
        writeln!(f, "   Advisory:     {}M", display_millions(self.advisor))?;
        writeln!(f, "   Team:         {}M", display_millions(self.team))?;
        writeln!(f, "----------------------")?;
        writeln!(f, "Grand Total:     {}M", display_millions(self.grand_total))?;
        writeln!(f, "----------------------")?;
        writeln!(f, "Unallocated Amount")?;
        writeln!(f, "        {} WEI", self.unallocated())?;
        write!(f, "======================")
    }
}

/// Native token sent to a gchain recipient with no balance to pay for its claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub receiver: Account,
    pub amount: Decimal,
    pub token_type: String,
    pub token_address: Option<String>,
    pub id: Option<u64>,
}

impl NativeTransfer {
    pub fn new(receiver: Account, amount: Decimal) -> Self {
        Self {
            receiver,
            amount,
            token_type: "native".to_string(),
            token_address: None,
            id: None,
        }
    }
}

/// One transfer per row whose account holds no native balance and no code, in ledger order.
pub fn native_transfers(
    ledger: &[LedgerRow],
    null_balances: &BTreeSet<Account>,
    contracts: &BTreeSet<Account>,
    amount: Decimal,
) -> Vec<NativeTransfer> {
    ledger
        .iter()
        .filter(|row| null_balances.contains(&row.account) && !contracts.contains(&row.account))
        .map(|row| NativeTransfer::new(row.account.clone(), amount))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::Allocation;
    use crate::normalization::tokens;

    fn row(account: &str, airdrop: u64) -> LedgerRow {
        LedgerRow {
            airdrop: tokens(airdrop),
            ..LedgerRow::empty(Account::new(account))
        }
    }

    fn set(accounts: &[&str]) -> BTreeSet<Account> {
        accounts.iter().map(|a| Account::new(*a)).collect()
    }

    fn splitter() -> Splitter {
        Splitter::new(
            tokens(10_000),
            BTreeMap::from([(Account::new("0xsafe"), Network::Mainnet)]),
        )
    }

    #[test]
    fn test_classification_table() {
        let contracts = ContractSets::new(set(&["0xm", "0xsafe", "0xboth"]), set(&["0xg", "0xsafe", "0xboth"]));
        let s = splitter();
        let classify = |r: LedgerRow| s.classify(&r, &contracts);

        assert_eq!(classify(row("0xeoa", 10_000)).unwrap(), Network::Mainnet);
        assert_eq!(classify(row("0xeoa", 9_999)).unwrap(), Network::Gchain);
        assert_eq!(classify(row("0xg", 50_000)).unwrap(), Network::Gchain);
        assert_eq!(classify(row("0xm", 1)).unwrap(), Network::Mainnet);
        assert_eq!(classify(row("0xsafe", 1)).unwrap(), Network::Mainnet);
        assert!(matches!(
            classify(row("0xboth", 1)),
            Err(AllocationError::UnresolvedDualContract(_))
        ));
    }

    #[test]
    fn test_threshold_uses_row_total() {
        let contracts = ContractSets::default();
        let mut options_heavy = row("0xa", 1);
        options_heavy.investor = tokens(20_000);
        assert_eq!(splitter().classify(&options_heavy, &contracts).unwrap(), Network::Mainnet);
    }

    #[test]
    fn test_split_partitions_and_sorts() {
        let rows = vec![row("0xa", 1), row("0xb", 20_000), row("0xc", 5), row("0xd", 30_000)];
        let split = splitter().split(rows, &ContractSets::default()).unwrap();
        let mainnet: Vec<&str> = split.mainnet.iter().map(|r| r.account.as_str()).collect();
        let gchain: Vec<&str> = split.gchain.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(mainnet, vec!["0xd", "0xb"]);
        assert_eq!(gchain, vec!["0xc", "0xa"]);
    }

    #[test]
    fn test_verify_detects_duplicates() {
        let split = SplitLedger {
            mainnet: vec![row("0xa", 1)],
            gchain: vec![row("0xa", 1)],
        };
        assert!(matches!(
            split.verify(2, &set(&["0xa"])),
            Err(AllocationError::SplitPostCondition(_))
        ));
    }

    #[test]
    fn test_team_options_must_be_new_accounts() {
        let mut split = SplitLedger {
            mainnet: vec![row("0xa", 1)],
            gchain: vec![row("0xb", 1)],
        };
        let team = IndexedAllocations::new(vec![Allocation::new(Account::new("0xb"), U256::one())], "team").unwrap();
        assert!(matches!(
            split.append_options(OptionCategory::Team, &team),
            Err(AllocationError::TeamOverlap(_))
        ));

        let investors = IndexedAllocations::new(
            vec![
                Allocation::new(Account::new("0xa"), U256::from(2)),
                Allocation::new(Account::new("0xnew"), U256::from(3)),
            ],
            "investor",
        )
        .unwrap();
        split.append_options(OptionCategory::Investor, &investors).unwrap();
        assert_eq!(split.mainnet.len(), 2);
        assert_eq!(split.mainnet[0].investor, U256::from(2));
        assert_eq!(split.mainnet[1].account.as_str(), "0xnew");
    }

    #[test]
    fn test_successive_options_keep_one_row_per_account() {
        let mut split = SplitLedger {
            mainnet: (0..50).map(|i| row(&format!("0x{:02x}", i), 100 - i)).collect(),
            gchain: vec![],
        };
        let allocations = |entries: &[(&str, u64)]| {
            IndexedAllocations::new(
                entries
                    .iter()
                    .map(|(a, v)| Allocation::new(Account::new(*a), U256::from(*v))),
                "options",
            )
            .unwrap()
        };
        split
            .append_options(OptionCategory::Team, &allocations(&[("0xt1", 4), ("0xt2", 9)]))
            .unwrap();
        split
            .append_options(
                OptionCategory::Advisor,
                &allocations(&[("0x31", 1), ("0xt1", 2), ("0xnew", 3)]),
            )
            .unwrap();

        let accounts: Vec<&str> = split.mainnet.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(accounts.len(), 53);
        assert_eq!(&accounts[50..], &["0xt2", "0xt1", "0xnew"]);
        assert_eq!(split.mainnet[49].advisor, U256::from(1));
        assert_eq!(split.mainnet[51].team, U256::from(4));
        assert_eq!(split.mainnet[51].advisor, U256::from(2));
        assert_eq!(split.mainnet[52].advisor, U256::from(3));
    }

    #[test]
    fn test_redirect_merges_into_destination() {
        let mut split = SplitLedger {
            mainnet: vec![row("0xvesting", 5), row("0xowner", 1)],
            gchain: vec![],
        };
        split
            .redirect(&Account::new("0xvesting"), &Account::new("0xowner"))
            .unwrap();
        assert_eq!(split.mainnet, vec![row("0xowner", 6)]);
    }

    #[test]
    fn test_summary_totals() {
        let mut a = row("0xa", 1);
        a.team = tokens(2);
        let split = SplitLedger {
            mainnet: vec![a],
            gchain: vec![row("0xb", 3)],
        };
        let summary = split.summary().unwrap();
        assert_eq!(summary.airdrop, tokens(4));
        assert_eq!(summary.grand_total, tokens(6));
        assert_eq!(summary.unallocated(), "555333327333333330000000000");
        assert!(summary.to_string().contains("Gnosis Chain: 1"));
    }

    #[test]
    fn test_native_transfers_skip_funded_accounts_and_contracts() {
        let ledger = vec![row("0xa", 9), row("0xb", 8), row("0xc", 7), row("0xd", 6)];
        let empty: BTreeSet<Account> = ["0xa", "0xc", "0xd", "0xelsewhere"].iter().map(Account::new).collect();
        let contracts: BTreeSet<Account> = [Account::new("0xc")].into_iter().collect();

        let transfers = native_transfers(&ledger, &empty, &contracts, Decimal::new(1, 1));
        let receivers: Vec<&str> = transfers.iter().map(|t| t.receiver.as_str()).collect();
        assert_eq!(receivers, vec!["0xa", "0xd"]);
        assert!(transfers.iter().all(|t| t.token_type == "native" && t.token_address.is_none() && t.id.is_none()));
        assert_eq!(transfers[0].amount.to_string(), "0.1");
    }
}
