use config::{Config, ConfigError, File};
use ethers::types::U256;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::normalization::tokens;
use crate::types::conversions::parse_u128_truncating;
use crate::types::{Account, Network};

/// Block at which every balance-dependent query is evaluated.
#[derive(Debug, Deserialize, Clone)]
pub struct Snapshot {
    #[serde(default = "default_mainnet_block")]
    pub mainnet: u64,
    #[serde(default = "default_gchain_block")]
    pub gchain: u64,
}

// First blocks published on Jan 10, 2022 (UTC)
fn default_mainnet_block() -> u64 {
    13974427
}
fn default_gchain_block() -> u64 {
    20024195
}

impl Snapshot {
    pub fn block(&self, network: Network) -> u64 {
        match network {
            Network::Mainnet => self.mainnet,
            Network::Gchain => self.gchain,
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            mainnet: default_mainnet_block(),
            gchain: default_gchain_block(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Paths {
    /// Generated caches and final ledgers.
    #[serde(default = "default_out_path")]
    pub out: PathBuf,
    /// Curated inputs: pools, exclusions, POAP holders, option files, trader data.
    #[serde(default = "default_data_path")]
    pub data: PathBuf,
    /// SQL templates sent to the analytics backend.
    #[serde(default = "default_query_path")]
    pub queries: PathBuf,
}

fn default_out_path() -> PathBuf {
    PathBuf::from("./out")
}
fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}
fn default_query_path() -> PathBuf {
    PathBuf::from("./queries")
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            out: default_out_path(),
            data: default_data_path(),
            queries: default_query_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Tokens {
    #[serde(default = "default_gno_mainnet")]
    pub gno_mainnet: String,
    #[serde(default = "default_gno_gchain")]
    pub gno_gchain: String,
}

fn default_gno_mainnet() -> String {
    "0x6810e776880c02933d47db1b9fc05908e5386b96".to_string()
}
fn default_gno_gchain() -> String {
    "0x9C58BAcC331c9aa871AFD802DB6379a98e80CEdb".to_string()
}

impl Tokens {
    pub fn gno(&self, network: Network) -> Account {
        match network {
            Network::Mainnet => Account::new(&self.gno_mainnet),
            Network::Gchain => Account::new(&self.gno_gchain),
        }
    }
}

impl Default for Tokens {
    fn default() -> Self {
        Self {
            gno_mainnet: default_gno_mainnet(),
            gno_gchain: default_gno_gchain(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Holders {
    /// Lowest combined balance (in wei) still eligible for a holder allocation.
    #[serde(default = "default_min_gno_wei")]
    pub min_gno_wei: u64,
    #[serde(default = "default_balancer_vault")]
    pub balancer_vault: String,
}

fn default_min_gno_wei() -> u64 {
    100_000_000_000_000_000 // 0.1 GNO
}
fn default_balancer_vault() -> String {
    "0xba12222222228d8ba445958a75a0704d566bf2c8".to_string()
}

impl Holders {
    pub fn min_gno(&self) -> U256 {
        U256::from(self.min_gno_wei)
    }

    pub fn vault(&self) -> Account {
        Account::new(&self.balancer_vault)
    }
}

impl Default for Holders {
    fn default() -> Self {
        Self {
            min_gno_wei: default_min_gno_wei(),
            balancer_vault: default_balancer_vault(),
        }
    }
}

/// Category supplies in whole tokens.
#[derive(Debug, Deserialize, Clone)]
pub struct Supplies {
    #[serde(default = "default_holder_supply")]
    pub holder: u64,
    #[serde(default = "default_primary_supply")]
    pub primary: u64,
    #[serde(default = "default_consolation_supply")]
    pub consolation: u64,
    #[serde(default = "default_poap_supply")]
    pub poap: u64,
}

fn default_holder_supply() -> u64 {
    50_000_000
}
fn default_primary_supply() -> u64 {
    44_000_000
}
fn default_consolation_supply() -> u64 {
    3_000_000
}
fn default_poap_supply() -> u64 {
    3_000_000
}

impl Supplies {
    pub fn holder_wei(&self) -> U256 {
        tokens(self.holder)
    }
    pub fn primary_wei(&self) -> U256 {
        tokens(self.primary)
    }
    pub fn consolation_wei(&self) -> U256 {
        tokens(self.consolation)
    }
    pub fn poap_wei(&self) -> U256 {
        tokens(self.poap)
    }
    /// The user option pool matches the three user categories combined.
    pub fn user_option_wei(&self) -> U256 {
        tokens(self.primary + self.consolation + self.poap)
    }
}

impl Default for Supplies {
    fn default() -> Self {
        Self {
            holder: default_holder_supply(),
            primary: default_primary_supply(),
            consolation: default_consolation_supply(),
            poap: default_poap_supply(),
        }
    }
}

/// Trader eligibility thresholds and tier tables.
#[derive(Debug, Deserialize, Clone)]
pub struct Trading {
    /// Ascending lower bounds (USD) of each volume tier.
    #[serde(default = "default_volume_tiers")]
    pub volume_tiers: Vec<u64>,
    /// Weight per tier for the primary airdrop.
    #[serde(default = "default_trading_factors")]
    pub trading_factors: Vec<u64>,
    /// Weight per tier for the user option.
    #[serde(default = "default_user_option_factors")]
    pub user_option_factors: Vec<u64>,
    #[serde(default = "default_primary_min_trades")]
    pub primary_min_trades: u64,
    #[serde(default = "default_consolation_min_trades")]
    pub consolation_min_trades: u64,
    #[serde(default = "default_min_volume")]
    pub min_volume: u64,
    #[serde(default = "default_min_days")]
    pub min_days: i64,
    /// Passed verbatim to the trader query.
    #[serde(default = "default_stable_factor")]
    pub stable_factor: String,
}

fn default_volume_tiers() -> Vec<u64> {
    vec![1_000, 10_000, 50_000, 100_000, 500_000, 1_000_000]
}
fn default_trading_factors() -> Vec<u64> {
    vec![1, 3, 4, 8, 16, 28]
}
fn default_user_option_factors() -> Vec<u64> {
    vec![1, 2, 5, 10, 16, 24]
}
fn default_primary_min_trades() -> u64 {
    3
}
fn default_consolation_min_trades() -> u64 {
    5
}
fn default_min_volume() -> u64 {
    1_000
}
fn default_min_days() -> i64 {
    14
}
fn default_stable_factor() -> String {
    "0.1".to_string()
}

impl Default for Trading {
    fn default() -> Self {
        Self {
            volume_tiers: default_volume_tiers(),
            trading_factors: default_trading_factors(),
            user_option_factors: default_user_option_factors(),
            primary_min_trades: default_primary_min_trades(),
            consolation_min_trades: default_consolation_min_trades(),
            min_volume: default_min_volume(),
            min_days: default_min_days(),
            stable_factor: default_stable_factor(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Poap {
    #[serde(default = "default_alpha_weight_mainnet")]
    pub alpha_trader_weight_mainnet: u64,
    #[serde(default = "default_alpha_weight_gchain")]
    pub alpha_trader_weight_gchain: u64,
}

fn default_alpha_weight_mainnet() -> u64 {
    16
}
fn default_alpha_weight_gchain() -> u64 {
    4
}

impl Poap {
    pub fn alpha_trader_weight(&self, network: Network) -> u64 {
        match network {
            Network::Mainnet => self.alpha_trader_weight_mainnet,
            Network::Gchain => self.alpha_trader_weight_gchain,
        }
    }
}

impl Default for Poap {
    fn default() -> Self {
        Self {
            alpha_trader_weight_mainnet: default_alpha_weight_mainnet(),
            alpha_trader_weight_gchain: default_alpha_weight_gchain(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Split {
    /// Ledger rows totalling at least this many whole tokens default to mainnet.
    #[serde(default = "default_split_threshold")]
    pub threshold_tokens: u64,
    /// Resolution for accounts that are contracts on both networks.
    #[serde(default = "default_manual_overrides")]
    pub manual_overrides: BTreeMap<String, Network>,
}

fn default_split_threshold() -> u64 {
    10_000
}

// A Safe on both networks with an overlapping owner set, investigated by hand.
fn default_manual_overrides() -> BTreeMap<String, Network> {
    BTreeMap::from([(
        "0x365bd827c68d5de0e2bfa5871dc0ecaaf074d5ab".to_string(),
        Network::Mainnet,
    )])
}

impl Split {
    pub fn threshold_wei(&self) -> U256 {
        tokens(self.threshold_tokens)
    }

    pub fn overrides(&self) -> BTreeMap<Account, Network> {
        self.manual_overrides
            .iter()
            .map(|(account, network)| (Account::new(account), *network))
            .collect()
    }
}

impl Default for Split {
    fn default() -> Self {
        Self {
            threshold_tokens: default_split_threshold(),
            manual_overrides: default_manual_overrides(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    /// Vesting contract that cannot claim.
    #[serde(default = "default_redirect_source")]
    pub redirect_source: String,
    /// Owner receiving the vesting contract's allocation.
    #[serde(default = "default_redirect_destination")]
    pub redirect_destination: String,
    /// Native xDAI sent to each funds-less gchain recipient so it can claim.
    #[serde(default = "default_gchain_topup")]
    pub gchain_topup: Decimal,
}

fn default_redirect_source() -> String {
    "0x9ee585a6c270fd8b046a5b2019fdac86544bca61".to_string()
}
fn default_redirect_destination() -> String {
    "0x9f7dfab2222a473284205cddf08a677726d786a0".to_string()
}
fn default_gchain_topup() -> Decimal {
    Decimal::new(1, 1)
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            redirect_source: default_redirect_source(),
            redirect_destination: default_redirect_destination(),
            gchain_topup: default_gchain_topup(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default)]
    pub mainnet_url: String,
    #[serde(default = "default_gchain_url")]
    pub gchain_url: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_gchain_url() -> String {
    "https://rpc.gnosischain.com/".to_string()
}
fn default_max_batch_size() -> usize {
    1000
}

impl Rpc {
    pub fn url(&self, network: Network) -> &str {
        match network {
            Network::Mainnet => &self.mainnet_url,
            Network::Gchain => &self.gchain_url,
        }
    }
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            mainnet_url: String::new(),
            gchain_url: default_gchain_url(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Dune {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub query_id: u64,
    #[serde(default = "default_dune_base_url")]
    pub base_url: String,
    #[serde(default = "default_dune_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ping_frequency_secs")]
    pub ping_frequency_secs: u64,
}

fn default_dune_base_url() -> String {
    "https://dune.xyz".to_string()
}
fn default_dune_graph_url() -> String {
    "https://core-hsr.duneanalytics.com/v1/graphql".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_ping_frequency_secs() -> u64 {
    5
}

impl Default for Dune {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            query_id: 0,
            base_url: default_dune_base_url(),
            graph_url: default_dune_graph_url(),
            max_retries: default_max_retries(),
            ping_frequency_secs: default_ping_frequency_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UniswapV3 {
    #[serde(default = "default_subgraph_url")]
    pub subgraph_url: String,
}

fn default_subgraph_url() -> String {
    "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v3".to_string()
}

impl Default for UniswapV3 {
    fn default() -> Self {
        Self {
            subgraph_url: default_subgraph_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub snapshot: Snapshot,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub tokens: Tokens,
    #[serde(default)]
    pub holders: Holders,
    #[serde(default)]
    pub supplies: Supplies,
    #[serde(default)]
    pub trading: Trading,
    #[serde(default)]
    pub poap: Poap,
    #[serde(default)]
    pub split: Split,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub dune: Dune,
    #[serde(default)]
    pub uniswap_v3: UniswapV3,
}

impl Settings {
    /// Loads `Config.toml` (or the file named by `ALLOCATION_CONFIG`) when present,
    /// then applies environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let path = env::var("ALLOCATION_CONFIG").unwrap_or_else(|_| "Config.toml".to_string());
        Self::from_path(&path)
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_overrides(|name| env::var(name).ok())?;
        Ok(settings)
    }

    /// Applies the environment variables the pipeline has always honoured.
    /// `lookup` returns the raw value of a variable, if set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SNAPSHOT_BLOCK_MAINNET") {
            self.snapshot.mainnet = parse_var("SNAPSHOT_BLOCK_MAINNET", &v)?;
        }
        if let Some(v) = get("SNAPSHOT_BLOCK_XDAI") {
            self.snapshot.gchain = parse_var("SNAPSHOT_BLOCK_XDAI", &v)?;
        }
        if let Some(v) = get("FILE_OUT_PATH") {
            self.paths.out = PathBuf::from(v);
        }
        if let Some(v) = get("DATA_PATH") {
            self.paths.data = PathBuf::from(v);
        }
        if let Some(v) = get("QUERY_PATH") {
            self.paths.queries = PathBuf::from(v);
        }
        if let Some(v) = get("DUNE_USER") {
            self.dune.user = v;
        }
        if let Some(v) = get("DUNE_PASSWORD") {
            self.dune.password = v;
        }
        if let Some(v) = get("DUNE_QUERY_ID") {
            self.dune.query_id = parse_var("DUNE_QUERY_ID", &v)?;
        }
        if let Some(v) = get("NODE_URL") {
            self.rpc.mainnet_url = v;
        }
        if let Some(v) = get("PRIMARY_MIN_TRADES") {
            self.trading.primary_min_trades = parse_var("PRIMARY_MIN_TRADES", &v)?;
        }
        if let Some(v) = get("CONSOLATION_MIN_TRADES") {
            self.trading.consolation_min_trades = parse_var("CONSOLATION_MIN_TRADES", &v)?;
        }
        if let Some(v) = get("TRADER_MIN_VOLUME") {
            // historically given as a float ("1000.0")
            let volume = parse_u128_truncating(&v)
                .map_err(|e| ConfigError::Message(format!("TRADER_MIN_VOLUME: {}", e)))?;
            self.trading.min_volume = u64::try_from(volume)
                .map_err(|_| ConfigError::Message("TRADER_MIN_VOLUME out of range".to_string()))?;
        }
        if let Some(v) = get("TRADER_MIN_DAYS") {
            self.trading.min_days = parse_var("TRADER_MIN_DAYS", &v)?;
        }
        if let Some(v) = get("STABLE_FACTOR") {
            self.trading.stable_factor = v;
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::Message(format!("invalid {} \"{}\": {}", name, value, e)))
}
