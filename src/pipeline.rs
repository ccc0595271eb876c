//! # Pipeline
//!
//! Wires the collaborators, caches and engines together. Every stage is
//! memoized in the output directory, so a rerun against a populated cache
//! touches no external service until the first missing file.
//!
//! ## Stages
//!
//! 1. [`Pipeline::combined_holders`] reconciles both networks
//! 2. [`Pipeline::holder_allocations`], [`Pipeline::trader_allocations`] and
//!    [`Pipeline::poap_allocations`] run the engines
//! 3. [`Pipeline::merkle_leaves`] assembles the ledger
//! 4. [`Pipeline::split`] partitions it by network
//! 5. [`Pipeline::complete`] appends the option files and applies the
//!    vesting redirect
//! 6. [`Pipeline::gchain_transfers`] lists the gchain recipients needing
//!    native funds to claim

use anyhow::Result;
use log::info;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::OnceCell;

use crate::account_info::{detect_contracts, null_balances, AccountInfo, EvmAccountInfo};
use crate::allocation::holder::HolderAllocator;
use crate::allocation::poap::tally_poap_holders;
use crate::allocation::trader::{classify_traders, TraderAllocator};
use crate::allocation::{cached_allocations, Allocation, IndexedAllocations};
use crate::cache::{Cache, CacheKey, Lookup};
use crate::dune::DuneClient;
use crate::holders::{build_master_holder_data, network_master, CombinedHolder};
use crate::ledger::{build_ledger, load_options, LedgerComponents, LedgerRow, OptionCategory};
use crate::query_client::QueryClient;
use crate::settings::Settings;
use crate::sources::alpha_traders::fetch_alpha_traders;
use crate::sources::exclusions::load_excluded_accounts;
use crate::sources::poap::PoapCatalogue;
use crate::sources::traders::fetch_trader_data;
use crate::sources::uniswap_v3::{PositionSource, UniswapV3Subgraph};
use crate::split::{native_transfers, ContractSets, NativeTransfer, SplitLedger, Splitter};
use crate::types::{Account, Network};

const COMBINED_HOLDERS: &str = "combined-holders.csv";
const HOLDER_ALLOCATIONS: &str = "allocations-holder.csv";
const PRIMARY_ALLOCATIONS: &str = "allocations-trader-primary.csv";
const CONSOLATION_ALLOCATIONS: &str = "allocations-trader-consolation.csv";
const USER_OPTIONS: &str = "combined-user-options.csv";
const PRIMARY_TRADERS: &str = "combined-primary-trader-data.csv";
const CONSOLATION_TRADERS: &str = "combined-consolation-trader-data.csv";
const POAP_ALLOCATIONS: &str = "allocations-poap.csv";
const LEDGER: &str = "allocations.csv";
const GCHAIN_TRANSFERS: &str = "gchain-transfers.csv";

fn split_file(network: Network) -> CacheKey {
    CacheKey::file(format!("allocations-{}.csv", network))
}

/// Indexed outputs of the trader engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraderAllocationSet {
    pub primary: IndexedAllocations,
    pub consolation: IndexedAllocations,
    pub user_options: IndexedAllocations,
}

pub struct Pipeline {
    settings: Settings,
    /// Output directory, every stage result lives here.
    cache: Cache,
    /// Data directory, home of the per-network trader data.
    data_cache: Cache,
    client: Box<dyn QueryClient>,
    positions: Box<dyn PositionSource>,
    mainnet_info: Box<dyn AccountInfo>,
    gchain_info: Box<dyn AccountInfo>,
    excluded: OnceCell<BTreeSet<Account>>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        client: Box<dyn QueryClient>,
        positions: Box<dyn PositionSource>,
        mainnet_info: Box<dyn AccountInfo>,
        gchain_info: Box<dyn AccountInfo>,
    ) -> Self {
        Self {
            cache: Cache::new(&settings.paths.out),
            data_cache: Cache::new(&settings.paths.data),
            settings,
            client,
            positions,
            mainnet_info,
            gchain_info,
            excluded: OnceCell::new(),
        }
    }

    /// Logs into Dune and builds the subgraph and RPC clients from `settings`.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let client = DuneClient::connect(&settings.dune, settings.paths.queries.clone()).await?;
        let positions = UniswapV3Subgraph::new(settings.uniswap_v3.subgraph_url.clone());
        let info = |network| {
            EvmAccountInfo::new(settings.rpc.url(network), network, settings.rpc.max_batch_size)
        };
        let mainnet_info = info(Network::Mainnet);
        let gchain_info = info(Network::Gchain);
        Ok(Self::new(
            settings,
            Box::new(client),
            Box::new(positions),
            Box::new(mainnet_info),
            Box::new(gchain_info),
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn account_info(&self, network: Network) -> &dyn AccountInfo {
        match network {
            Network::Mainnet => self.mainnet_info.as_ref(),
            Network::Gchain => self.gchain_info.as_ref(),
        }
    }

    /// Loaded once per run.
    pub async fn excluded_accounts(&self) -> Result<&BTreeSet<Account>> {
        self.excluded
            .get_or_try_init(|| async {
                load_excluded_accounts(
                    &self.settings.paths.data,
                    self.positions.as_ref(),
                    self.settings.snapshot.block(Network::Mainnet),
                    &self.settings.tokens.gno(Network::Mainnet),
                )
                .await
            })
            .await
    }

    pub async fn combined_holders(&self) -> Result<Vec<CombinedHolder>> {
        self.cache
            .get_or_compute(&CacheKey::file(COMBINED_HOLDERS), || async {
                let master = |network| {
                    network_master(
                        self.client.as_ref(),
                        self.positions.as_ref(),
                        &self.cache,
                        &self.settings,
                        network,
                    )
                };
                let mainnet = master(Network::Mainnet).await?;
                let gchain = master(Network::Gchain).await?;
                let excluded = self.excluded_accounts().await?;
                Ok(build_master_holder_data(
                    &mainnet,
                    &gchain,
                    self.settings.holders.min_gno(),
                    excluded,
                )?)
            })
            .await
    }

    pub async fn holder_allocations(&self) -> Result<IndexedAllocations> {
        cached_allocations(&self.cache, &CacheKey::file(HOLDER_ALLOCATIONS), || async {
            let holders = self.combined_holders().await?;
            let allocator = HolderAllocator::new(self.settings.supplies.holder_wei());
            Ok(allocator.allocate(&holders)?)
        })
        .await
    }

    /// All three trader categories are rebuilt together when any file is missing.
    pub async fn trader_allocations(&self) -> Result<TraderAllocationSet> {
        let keys = [PRIMARY_ALLOCATIONS, CONSOLATION_ALLOCATIONS, USER_OPTIONS].map(CacheKey::file);
        let mut loaded = Vec::new();
        for key in &keys {
            match self.cache.lookup::<Allocation>(key)? {
                Lookup::Found(rows) => loaded.push(IndexedAllocations::new(rows, key.name())?),
                Lookup::NotFound => break,
            }
        }
        if let Ok([primary, consolation, user_options]) = <[IndexedAllocations; 3]>::try_from(loaded) {
            return Ok(TraderAllocationSet {
                primary,
                consolation,
                user_options,
            });
        }
        info!("trader allocation files incomplete, rebuilding from trader data");

        let rules = &self.settings.trading;
        let fetch = |network| {
            fetch_trader_data(
                self.client.as_ref(),
                &self.data_cache,
                network,
                self.settings.snapshot.block(network),
                rules,
            )
        };
        let mainnet = fetch(Network::Mainnet).await?;
        let gchain = fetch(Network::Gchain).await?;
        let excluded = self.excluded_accounts().await?;
        let eligible = classify_traders(&mainnet, &gchain, excluded, rules)?;
        self.cache
            .store(&CacheKey::file(PRIMARY_TRADERS), &eligible.primary)?;
        self.cache
            .store(&CacheKey::file(CONSOLATION_TRADERS), &eligible.consolation)?;

        let allocations = TraderAllocator::from_settings(&self.settings).allocate(&eligible)?;
        let [primary_key, consolation_key, user_options_key] = &keys;
        self.cache.store(primary_key, &allocations.primary)?;
        self.cache.store(consolation_key, &allocations.consolation)?;
        self.cache.store(user_options_key, &allocations.user_options)?;
        Ok(TraderAllocationSet {
            primary: IndexedAllocations::new(allocations.primary, PRIMARY_ALLOCATIONS)?,
            consolation: IndexedAllocations::new(allocations.consolation, CONSOLATION_ALLOCATIONS)?,
            user_options: IndexedAllocations::new(allocations.user_options, USER_OPTIONS)?,
        })
    }

    pub async fn poap_allocations(&self) -> Result<IndexedAllocations> {
        cached_allocations(&self.cache, &CacheKey::file(POAP_ALLOCATIONS), || async {
            let mut alpha_traders = BTreeMap::new();
            for network in Network::ALL {
                let alphas = fetch_alpha_traders(
                    self.client.as_ref(),
                    &self.cache,
                    network,
                    self.settings.snapshot.block(network),
                )
                .await?;
                alpha_traders.insert(network, alphas);
            }
            let catalogue = PoapCatalogue::new(self.settings.paths.data.join("poap-holders"));
            let excluded = self.excluded_accounts().await?.clone();
            let tally = tally_poap_holders(&alpha_traders, &catalogue, &self.settings.poap, excluded)?;
            Ok(tally.allocate(self.settings.supplies.poap_wei())?)
        })
        .await
    }

    /// The combined ledger, cached as `allocations.csv`.
    pub async fn merkle_leaves(&self) -> Result<Vec<LedgerRow>> {
        self.cache
            .get_or_compute(&CacheKey::file(LEDGER), || async {
                let traders = self.trader_allocations().await?;
                let holder = self.holder_allocations().await?;
                let poap = self.poap_allocations().await?;
                Ok(build_ledger(LedgerComponents {
                    holder: &holder,
                    primary: &traders.primary,
                    consolation: &traders.consolation,
                    poap: &poap,
                    user_options: &traders.user_options,
                })?)
            })
            .await
    }

    pub async fn contracts(&self, accounts: &[Account]) -> Result<ContractSets> {
        let mainnet = detect_contracts(self.account_info(Network::Mainnet), accounts, &self.cache).await?;
        let gchain = detect_contracts(self.account_info(Network::Gchain), accounts, &self.cache).await?;
        Ok(ContractSets::new(mainnet, gchain))
    }

    fn write_split(&self, split: &SplitLedger) -> Result<()> {
        for network in Network::ALL {
            self.cache.store(&split_file(network), split.ledger(network))?;
        }
        Ok(())
    }

    /// Splits the ledger by network and writes both halves.
    pub async fn split(&self) -> Result<SplitLedger> {
        let rows = self.merkle_leaves().await?;
        let accounts: Vec<Account> = rows.iter().map(|row| row.account.clone()).collect();
        let contracts = self.contracts(&accounts).await?;
        let split = Splitter::from_settings(&self.settings.split).split(rows, &contracts)?;
        self.write_split(&split)?;
        Ok(split)
    }

    /// [`Pipeline::split`] followed by the option files and the vesting redirect.
    pub async fn complete(&self) -> Result<SplitLedger> {
        let mut split = self.split().await?;
        for option in OptionCategory::ALL {
            let options = load_options(&self.settings.paths.data, option)?;
            split.append_options(option, &options)?;
        }
        split.redirect(
            &Account::new(&self.settings.ledger.redirect_source),
            &Account::new(&self.settings.ledger.redirect_destination),
        )?;
        info!("overwriting split allocation files with updated entries");
        self.write_split(&split)?;
        Ok(split)
    }

    /// Native top-ups for gchain recipients without balance or code, written
    /// to `gchain-transfers.csv`. Reads the completed gchain ledger, running
    /// [`Pipeline::complete`] when it is missing.
    pub async fn gchain_transfers(&self) -> Result<Vec<NativeTransfer>> {
        let ledger = match self.cache.lookup::<LedgerRow>(&split_file(Network::Gchain))? {
            Lookup::Found(rows) => rows,
            Lookup::NotFound => self.complete().await?.gchain,
        };
        let accounts: Vec<Account> = ledger.iter().map(|row| row.account.clone()).collect();
        let info = self.account_info(Network::Gchain);
        let empty = null_balances(info, &accounts, &self.cache).await?;
        let contracts = detect_contracts(info, &accounts, &self.cache).await?;

        let transfers = native_transfers(&ledger, &empty, &contracts, self.settings.ledger.gchain_topup);
        info!(
            "{} of {} gchain recipients need {} native each",
            transfers.len(),
            ledger.len(),
            self.settings.ledger.gchain_topup
        );
        self.cache.store(&CacheKey::file(GCHAIN_TRANSFERS), &transfers)?;
        Ok(transfers)
    }
}
