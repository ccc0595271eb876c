//! Balancer V2 keeps every pool's tokens in a single vault, so the vault's GNO
//! balance has to be partitioned back onto the pools that own it.

use anyhow::Result;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CacheKey};
use crate::query_client::{row_account, row_u256, Query, QueryClient};
use crate::types::{serde_u256, Account, Network};

/// GNO balance attributed to the Balancer V2 pool at `pool_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancerPool {
    pub pool_address: Account,
    #[serde(with = "serde_u256")]
    pub gno_balance: U256,
}

/// Per-pool GNO balances at `block`, cached as `mainnet-balancer-gno.csv`.
pub async fn fetch_balancer_pools(
    client: &dyn QueryClient,
    cache: &Cache,
    block: u64,
) -> Result<Vec<BalancerPool>> {
    let key = CacheKey::network(Network::Mainnet, "balancer-gno.csv");
    cache
        .get_or_compute(&key, || async {
            let query =
                Query::new("balancer_v2_pool_gno", Network::Mainnet, "Balancer Pool GNO").at_block(block);
            let rows = client.fetch(&query).await?;
            let mut pools = rows
                .iter()
                .map(|row| {
                    Ok(BalancerPool {
                        pool_address: row_account(row, "pool_address")?,
                        gno_balance: row_u256(row, "gno_balance")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            pools.sort_by(|a, b| {
                a.pool_address
                    .cmp(&b.pool_address)
                    .then_with(|| b.gno_balance.cmp(&a.gno_balance))
            });
            Ok(pools)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::tests::MockQueryClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_balancer_pools_sorted_by_pool() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let client = MockQueryClient::default().with(
            "balancer_v2_pool_gno",
            vec![
                json!({"pool_address": "0xB2", "gno_balance": "7"}),
                json!({"pool_address": "0xb1", "gno_balance": 3}),
            ],
        );
        let pools = fetch_balancer_pools(&client, &cache, 1).await.unwrap();
        assert_eq!(pools[0].pool_address.as_str(), "0xb1");
        assert_eq!(pools[1].gno_balance, U256::from(7));
        assert!(cache.path(&CacheKey::file("mainnet-balancer-gno.csv")).exists());
    }
}
