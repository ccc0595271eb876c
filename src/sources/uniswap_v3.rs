//! # Uniswap V3 Liquidity
//!
//! Concentrated-liquidity positions do not hold a share token, so their GNO
//! exposure is derived from pool state: every pool containing GNO is fetched
//! with its live tick and price, then every open position in those pools is
//! valued with [`crate::v3_math`] and reduced per owner.
//!
//! Pool and position data comes from the Uniswap V3 subgraph, evaluated at the
//! snapshot block. Positions are paginated by id.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::cache::{Cache, CacheKey};
use crate::sources::sort_holders;
use crate::types::conversions::parse_u256;
use crate::types::{Account, HolderRecord, Network};
use crate::utils::{index_by_account, index_with_multiplicity, Keyed};
use crate::v3_math::{V3PoolState, V3Position};

const PAGE_SIZE: usize = 1000;

impl Keyed for V3Position {
    fn account(&self) -> &Account {
        &self.account
    }
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Every pool with `token` on either side, tagged with the side it is on.
    async fn fetch_pools(&self, block: u64, token: &Account) -> Result<Vec<V3PoolState>>;

    /// Open (non-zero liquidity) positions in `pools`.
    async fn fetch_positions(&self, block: u64, pools: &[V3PoolState]) -> Result<Vec<V3Position>>;
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PoolData {
    id: String,
    tick: Option<String>,
    sqrt_price: String,
    liquidity: String,
}

#[derive(Deserialize, Debug)]
struct PoolsResponse {
    pools0: Vec<PoolData>,
    pools1: Vec<PoolData>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TickData {
    tick_idx: String,
}

#[derive(Deserialize, Debug)]
struct PoolRef {
    id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PositionData {
    id: String,
    owner: String,
    liquidity: String,
    tick_lower: TickData,
    tick_upper: TickData,
    pool: PoolRef,
}

#[derive(Deserialize, Debug)]
struct PositionsResponse {
    positions: Vec<PositionData>,
}

#[derive(Deserialize, Debug)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Value>,
}

impl PoolData {
    fn into_state(self, queried_token_index: u8) -> Result<V3PoolState> {
        Ok(V3PoolState {
            address: Account::new(&self.id),
            liquidity: u128::from_str(&self.liquidity)
                .with_context(|| format!("pool {} liquidity", self.id))?,
            sqrt_price_x96: parse_u256(&self.sqrt_price)
                .with_context(|| format!("pool {} sqrtPrice", self.id))?,
            tick: self
                .tick
                .as_deref()
                .map(i32::from_str)
                .transpose()
                .with_context(|| format!("pool {} tick", self.id))?,
            queried_token_index,
        })
    }
}

fn pool_query(block: u64, token: &Account) -> String {
    format!(
        r#"{{
  pools0: pools(first: {page}, block: {{ number: {block} }}, where: {{ token0: "{token}" }}) {{
    id
    tick
    sqrtPrice
    liquidity
  }}
  pools1: pools(first: {page}, block: {{ number: {block} }}, where: {{ token1: "{token}" }}) {{
    id
    tick
    sqrtPrice
    liquidity
  }}
}}"#,
        page = PAGE_SIZE,
        block = block,
        token = token
    )
}

fn position_query(block: u64, pools: &[&str], last_id: &str) -> String {
    format!(
        r#"{{
  positions(
    first: {page}
    orderBy: id
    block: {{ number: {block} }}
    where: {{ pool_in: {pools}, liquidity_gt: "0", id_gt: "{last_id}" }}
  ) {{
    id
    owner
    liquidity
    tickLower {{ tickIdx }}
    tickUpper {{ tickIdx }}
    pool {{ id }}
  }}
}}"#,
        page = PAGE_SIZE,
        block = block,
        pools = json!(pools),
        last_id = last_id
    )
}

/// GraphQL client for the Uniswap V3 subgraph.
pub struct UniswapV3Subgraph {
    client: reqwest::Client,
    url: String,
}

impl UniswapV3Subgraph {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn execute<T: serde::de::DeserializeOwned>(&self, query: String) -> Result<T> {
        let response: GraphQLResponse<T> = self
            .client
            .post(&self.url)
            .json(&json!({"query": query, "variables": null}))
            .send()
            .await
            .context("posting subgraph query")?
            .json()
            .await
            .context("decoding subgraph response")?;
        if let Some(errors) = response.errors {
            return Err(anyhow!("subgraph query failed: {}", errors));
        }
        response.data.ok_or_else(|| anyhow!("subgraph response without data"))
    }
}

#[async_trait]
impl PositionSource for UniswapV3Subgraph {
    async fn fetch_pools(&self, block: u64, token: &Account) -> Result<Vec<V3PoolState>> {
        let response: PoolsResponse = self.execute(pool_query(block, token)).await?;
        let mut pools = Vec::new();
        for data in response.pools0 {
            pools.push(data.into_state(0)?);
        }
        for data in response.pools1 {
            pools.push(data.into_state(1)?);
        }
        Ok(pools)
    }

    async fn fetch_positions(&self, block: u64, pools: &[V3PoolState]) -> Result<Vec<V3Position>> {
        let indexed: BTreeMap<&str, &V3PoolState> =
            pools.iter().map(|p| (p.address.as_str(), p)).collect();
        let ids: Vec<&str> = indexed.keys().copied().collect();

        let mut positions = Vec::new();
        let mut last_id = String::new();
        loop {
            let page: PositionsResponse = self.execute(position_query(block, &ids, &last_id)).await?;
            let count = page.positions.len();
            for data in page.positions {
                let pool = indexed
                    .get(data.pool.id.to_lowercase().as_str())
                    .ok_or_else(|| anyhow!("position {} in unrequested pool {}", data.id, data.pool.id))?;
                positions.push(V3Position {
                    account: Account::new(&data.owner),
                    liquidity: u128::from_str(&data.liquidity)
                        .with_context(|| format!("position {} liquidity", data.id))?,
                    tick_lower: i32::from_str(&data.tick_lower.tick_idx)
                        .with_context(|| format!("position {} tickLower", data.id))?,
                    tick_upper: i32::from_str(&data.tick_upper.tick_idx)
                        .with_context(|| format!("position {} tickUpper", data.id))?,
                    pool: (*pool).clone(),
                });
                last_id = data.id;
            }
            if count < PAGE_SIZE {
                break;
            }
        }
        Ok(positions)
    }
}

/// GNO held in Uniswap V3 positions at `block`, cached as `mainnet-univ3-holders.csv`.
pub async fn fetch_univ3_holders(
    source: &dyn PositionSource,
    cache: &Cache,
    block: u64,
    token: &Account,
) -> Result<BTreeMap<Account, HolderRecord>> {
    let key = CacheKey::network(Network::Mainnet, "univ3-holders.csv");
    let holders = cache
        .get_or_compute(&key, || async {
            let pools = source.fetch_pools(block, token).await?;
            let positions = source.fetch_positions(block, &pools).await?;
            info!(
                "valuing {} positions across {} Uniswap V3 pools",
                positions.len(),
                pools.len()
            );
            let mut holders = index_with_multiplicity(positions)
                .values()
                .map(|owned| V3Position::reduce_to_holder(owned))
                .collect::<Result<Vec<_>, _>>()?;
            sort_holders(&mut holders);
            Ok(holders)
        })
        .await?;
    Ok(index_by_account(holders, key.name())?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::types::U256;

    /// Returns fixed pools and positions.
    pub(crate) struct MockPositionSource {
        pub pools: Vec<V3PoolState>,
        pub positions: Vec<V3Position>,
    }

    #[async_trait]
    impl PositionSource for MockPositionSource {
        async fn fetch_pools(&self, _block: u64, _token: &Account) -> Result<Vec<V3PoolState>> {
            Ok(self.pools.clone())
        }

        async fn fetch_positions(&self, _block: u64, _pools: &[V3PoolState]) -> Result<Vec<V3Position>> {
            Ok(self.positions.clone())
        }
    }

    fn pool(tick: i32) -> V3PoolState {
        V3PoolState {
            address: Account::new("0xpool"),
            liquidity: 1,
            sqrt_price_x96: crate::v3_math::get_sqrt_ratio_at_tick(tick).unwrap(),
            tick: Some(tick),
            queried_token_index: 0,
        }
    }

    fn position(owner: &str, tick_lower: i32, tick_upper: i32, current: i32) -> V3Position {
        V3Position {
            account: Account::new(owner),
            liquidity: 1_000_000_000_000_000_000,
            tick_lower,
            tick_upper,
            pool: pool(current),
        }
    }

    #[test]
    fn test_pool_data_keeps_null_tick() {
        let data = PoolData {
            id: "0xABC".to_string(),
            tick: None,
            sqrt_price: "0".to_string(),
            liquidity: "0".to_string(),
        };
        let state = data.into_state(1).unwrap();
        assert_eq!(state.tick, None);
        assert_eq!(state.address.as_str(), "0xabc");
        assert_eq!(state.queried_token_index, 1);
    }

    #[test]
    fn test_position_query_filters_open_positions() {
        let query = position_query(42, &["0xa", "0xb"], "");
        assert!(query.contains(r#"pool_in: ["0xa","0xb"]"#));
        assert!(query.contains(r#"liquidity_gt: "0""#));
        assert!(query.contains("number: 42"));
    }

    #[tokio::test]
    async fn test_fetch_univ3_holders_reduces_per_owner() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        // both positions sit entirely above the current tick: all token0
        let positions = vec![
            position("0xA", 100, 200, 0),
            position("0xa", 100, 200, 0),
            position("0xb", -200, -100, 0),
        ];
        let single = positions[0].amount0().unwrap();
        let source = MockPositionSource {
            pools: vec![pool(0)],
            positions,
        };

        let holders = fetch_univ3_holders(&source, &cache, 1, &Account::new("0xgno"))
            .await
            .unwrap();
        assert_eq!(holders[&Account::new("0xa")].amount, single * U256::from(2));
        // entirely below the current tick holds no token0
        assert!(holders[&Account::new("0xb")].amount.is_zero());
    }
}
