//! Integration tests for the network split and the persisted ledgers
//!
//! Tests cover:
//! - Partition properties of the split over random ledgers
//! - Contract placement and the manual override table
//! - Option files and the vesting redirect after the split
//! - CSV memoization of holder records

use ethers::types::U256;
use gno_airdrop_ledger::allocation::{Allocation, IndexedAllocations};
use gno_airdrop_ledger::cache::{Cache, CacheKey, Lookup};
use gno_airdrop_ledger::holders::CombinedHolder;
use gno_airdrop_ledger::ledger::{LedgerRow, OptionCategory};
use gno_airdrop_ledger::normalization::tokens;
use gno_airdrop_ledger::split::{ContractSets, Splitter};
use gno_airdrop_ledger::types::{Account, Network};
use gno_airdrop_ledger::AllocationError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

fn account(i: usize) -> Account {
    Account::new(format!("0x{:040x}", i))
}

fn row(account: Account, airdrop: U256) -> LedgerRow {
    LedgerRow {
        airdrop,
        ..LedgerRow::empty(account)
    }
}

#[test]
fn test_split_partitions_random_ledgers() {
    let mut rng = StdRng::seed_from_u64(5);
    let threshold = tokens(10_000);
    let splitter = Splitter::new(threshold, BTreeMap::new());

    for _ in 0..20 {
        let n = rng.gen_range(1..300);
        let rows: Vec<LedgerRow> = (0..n)
            .map(|i| row(account(i), tokens(rng.gen_range(0..20_000))))
            .collect();
        // never on both networks, there is no override to resolve them
        let mut mainnet = BTreeSet::new();
        let mut gchain = BTreeSet::new();
        for i in 0..n {
            match rng.gen_range(0..4) {
                0 => {
                    mainnet.insert(account(i));
                }
                1 => {
                    gchain.insert(account(i));
                }
                _ => {}
            }
        }
        let contracts = ContractSets::new(mainnet, gchain);

        let split = splitter.split(rows.clone(), &contracts).unwrap();
        assert_eq!(split.mainnet.len() + split.gchain.len(), rows.len());
        let expected: BTreeSet<Account> = rows.iter().map(|r| r.account.clone()).collect();
        assert_eq!(split.accounts(), expected);

        for r in &split.mainnet {
            assert!(!contracts.gchain.contains(&r.account), "gchain contract on mainnet");
            if !contracts.mainnet.contains(&r.account) {
                assert!(r.airdrop >= threshold);
            }
        }
        for r in &split.gchain {
            assert!(!contracts.mainnet.contains(&r.account), "mainnet contract on gchain");
            if !contracts.gchain.contains(&r.account) {
                assert!(r.airdrop < threshold);
            }
        }
        for ledger in [&split.mainnet, &split.gchain] {
            assert!(ledger.windows(2).all(|w| w[0].airdrop >= w[1].airdrop));
        }
    }
}

#[test]
fn test_dual_contracts_need_an_override() {
    let dual = account(1);
    let both: BTreeSet<Account> = [dual.clone()].into_iter().collect();
    let contracts = ContractSets::new(both.clone(), both);
    let rows = vec![row(dual.clone(), tokens(1)), row(account(2), tokens(1))];

    let result = Splitter::new(tokens(10), BTreeMap::new()).split(rows.clone(), &contracts);
    assert!(matches!(result, Err(AllocationError::UnresolvedDualContract(a)) if a == dual));

    let overrides = BTreeMap::from([(dual.clone(), Network::Mainnet)]);
    let split = Splitter::new(tokens(10), overrides).split(rows, &contracts).unwrap();
    assert_eq!(split.mainnet[0].account, dual);
    assert_eq!(split.gchain[0].account, account(2));
}

#[test]
fn test_options_and_redirect_after_split() {
    let source = account(9);
    let destination = account(10);
    let rows = vec![
        row(account(1), tokens(20_000)),
        row(source.clone(), tokens(50)),
        row(destination.clone(), tokens(5)),
    ];
    let mut split = Splitter::new(tokens(10_000), BTreeMap::new())
        .split(rows, &ContractSets::default())
        .unwrap();
    assert_eq!(split.mainnet.len(), 1);
    assert_eq!(split.gchain.len(), 2);

    let team = IndexedAllocations::new(vec![Allocation::new(account(3), tokens(7))], "team").unwrap();
    split.append_options(OptionCategory::Team, &team).unwrap();
    let investor = IndexedAllocations::new(vec![Allocation::new(account(1), tokens(2))], "investor").unwrap();
    split.append_options(OptionCategory::Investor, &investor).unwrap();
    assert_eq!(split.mainnet.len(), 2);
    assert_eq!(split.mainnet[0].investor, tokens(2));
    assert_eq!(split.mainnet[1].team, tokens(7));

    // a team member may not already be a recipient
    let clash = IndexedAllocations::new(vec![Allocation::new(account(1), tokens(1))], "team").unwrap();
    assert!(split.append_options(OptionCategory::Team, &clash).is_err());

    split.redirect(&source, &destination).unwrap();
    assert_eq!(split.gchain.len(), 1);
    assert_eq!(split.gchain[0].account, destination);
    assert_eq!(split.gchain[0].airdrop, tokens(55));

    let summary = split.summary().unwrap();
    assert_eq!(summary.airdrop, tokens(20_055));
    assert_eq!(summary.grand_total, tokens(20_064));
}

#[test]
fn test_combined_holders_round_trip_through_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path());
    let key = CacheKey::file("combined-holders.csv");
    assert!(matches!(cache.lookup::<CombinedHolder>(&key).unwrap(), Lookup::NotFound));

    let holders = vec![
        CombinedHolder::new(Account::new("0xAA"), tokens(3), U256::from(1)).unwrap(),
        CombinedHolder::new(Account::new("0xbb"), U256::zero(), tokens(1)).unwrap(),
    ];
    cache.store(&key, &holders).unwrap();

    match cache.lookup::<CombinedHolder>(&key).unwrap() {
        Lookup::Found(loaded) => assert_eq!(loaded, holders),
        Lookup::NotFound => panic!("stored holders not found"),
    }
}
