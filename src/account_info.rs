//! Per-network account introspection over JSON-RPC: bytecode and native balance.
//!
//! The node accepts batched requests up to a fixed size. [`AccountInfo`]
//! implementations reject larger batches; [`detect_contracts`] and
//! [`null_balances`] partition their input before calling.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use indexmap::IndexSet;
use log::info;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};

use crate::cache::{Cache, CacheKey};
use crate::error::AllocationError;
use crate::types::{Account, AccountRecord, Network};
use crate::utils::create_chunks;

#[async_trait]
pub trait AccountInfo: Send + Sync {
    fn network(&self) -> Network;

    fn max_batch_size(&self) -> usize;

    /// Deployed bytecode per account; empty for externally owned accounts.
    async fn get_code(&self, accounts: &[Account]) -> Result<HashMap<Account, Bytes>>;

    async fn get_balance(&self, accounts: &[Account]) -> Result<HashMap<Account, U256>>;
}

/// JSON-RPC batch client against a single node.
pub struct EvmAccountInfo {
    client: reqwest::Client,
    node_url: String,
    network: Network,
    max_batch_size: usize,
}

impl EvmAccountInfo {
    pub fn new(node_url: impl Into<String>, network: Network, max_batch_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            node_url: node_url.into(),
            network,
            max_batch_size,
        }
    }

    async fn batch_call(&self, method: &str, accounts: &[Account]) -> Result<Vec<(Account, String)>> {
        if accounts.len() > self.max_batch_size {
            return Err(AllocationError::BatchTooLarge {
                size: accounts.len(),
                max: self.max_batch_size,
            }
            .into());
        }
        let request: Vec<Value> = accounts
            .iter()
            .enumerate()
            .map(|(index, account)| {
                json!({
                    "jsonrpc": "2.0",
                    "method": method,
                    "params": [account.as_str(), "latest"],
                    "id": index,
                })
            })
            .collect();
        let response: Vec<Value> = self
            .client
            .post(&self.node_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} batch on {}", method, self.network))?
            .json()
            .await
            .with_context(|| format!("decoding {} batch on {}", method, self.network))?;
        parse_batch_response(accounts, &response)
    }
}

/// Pairs every response row with the account its `id` refers to.
pub fn parse_batch_response(accounts: &[Account], response: &[Value]) -> Result<Vec<(Account, String)>> {
    response
        .iter()
        .map(|row| {
            let account = row
                .get("id")
                .and_then(Value::as_u64)
                .and_then(|id| accounts.get(id as usize))
                .ok_or_else(|| anyhow!("RPC response row with unknown id: {}", row))?;
            match row.get("result").and_then(Value::as_str) {
                Some(result) => Ok((account.clone(), result.to_string())),
                None => Err(AllocationError::UnclassifiableRpcRow {
                    account: account.clone(),
                    response: row.to_string(),
                }
                .into()),
            }
        })
        .collect()
}

#[async_trait]
impl AccountInfo for EvmAccountInfo {
    fn network(&self) -> Network {
        self.network
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn get_code(&self, accounts: &[Account]) -> Result<HashMap<Account, Bytes>> {
        self.batch_call("eth_getCode", accounts)
            .await?
            .into_iter()
            .map(|(account, code)| {
                let bytes: Bytes = code
                    .parse()
                    .map_err(|e| anyhow!("invalid code for {}: {:?}", account, e))?;
                Ok((account, bytes))
            })
            .collect()
    }

    async fn get_balance(&self, accounts: &[Account]) -> Result<HashMap<Account, U256>> {
        self.batch_call("eth_getBalance", accounts)
            .await?
            .into_iter()
            .map(|(account, balance)| {
                let value = U256::from_str_radix(balance.trim_start_matches("0x"), 16)
                    .map_err(|e| anyhow!("invalid balance for {}: {}", account, e))?;
                Ok((account, value))
            })
            .collect()
    }
}

fn unique(accounts: &[Account]) -> Vec<Account> {
    accounts
        .iter()
        .cloned()
        .collect::<IndexSet<Account>>()
        .into_iter()
        .collect()
}

fn dump_set(set: &BTreeSet<Account>) -> Vec<AccountRecord> {
    set.iter()
        .map(|account| AccountRecord::from(account.clone()))
        .collect()
}

fn load_set(rows: Vec<AccountRecord>) -> Result<BTreeSet<Account>> {
    Ok(rows.into_iter().map(|row| row.account).collect())
}

/// Accounts among `accounts` with deployed code, cached as `{network}-contracts.csv`.
pub async fn detect_contracts(
    info: &dyn AccountInfo,
    accounts: &[Account],
    cache: &Cache,
) -> Result<BTreeSet<Account>> {
    let network = info.network();
    let key = CacheKey::network(network, "contracts.csv");
    cache
        .get_or_compute_with(
            &key,
            load_set,
            || async {
                let addresses = unique(accounts);
                info!(
                    "Fetching code at {} addresses on {} (this will take a while)...",
                    addresses.len(),
                    network
                );
                let mut contracts = BTreeSet::new();
                for (from, to) in create_chunks(addresses.len(), info.max_batch_size()) {
                    let codes = info.get_code(&addresses[from..to]).await?;
                    contracts.extend(
                        codes
                            .into_iter()
                            .filter(|(_, code)| !code.is_empty())
                            .map(|(account, _)| account),
                    );
                }
                info!("found {} contracts on {}", contracts.len(), network);
                Ok(contracts)
            },
            dump_set,
        )
        .await
}

/// Accounts among `accounts` holding no native balance, cached as `{network}-null-balances.csv`.
pub async fn null_balances(
    info: &dyn AccountInfo,
    accounts: &[Account],
    cache: &Cache,
) -> Result<BTreeSet<Account>> {
    let network = info.network();
    let key = CacheKey::network(network, "null-balances.csv");
    cache
        .get_or_compute_with(
            &key,
            load_set,
            || async {
                let addresses = unique(accounts);
                info!(
                    "Fetching balances at {} addresses on {} (this may take a while)...",
                    addresses.len(),
                    network
                );
                let mut empty = BTreeSet::new();
                for (from, to) in create_chunks(addresses.len(), info.max_batch_size()) {
                    let balances = info.get_balance(&addresses[from..to]).await?;
                    empty.extend(
                        balances
                            .into_iter()
                            .filter(|(_, balance)| balance.is_zero())
                            .map(|(account, _)| account),
                    );
                }
                info!("found {} accounts with zero balance on {}", empty.len(), network);
                Ok(empty)
            },
            dump_set,
        )
        .await
}
