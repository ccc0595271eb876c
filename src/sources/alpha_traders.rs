use anyhow::Result;
use std::collections::BTreeSet;

use crate::cache::{Cache, CacheKey};
use crate::query_client::{row_account, Query, QueryClient};
use crate::types::{Account, AccountRecord, Network};

/// Traders who used both the alpha and the beta settlement contracts on
/// `network`, cached as `{network}-alpha-traders.csv`.
pub async fn fetch_alpha_traders(
    client: &dyn QueryClient,
    cache: &Cache,
    network: Network,
    block: u64,
) -> Result<BTreeSet<Account>> {
    let key = CacheKey::network(network, "alpha-traders.csv");
    let records = cache
        .get_or_compute(&key, || async {
            let query = Query::new("generic_alpha_beta_traders", network, "Alpha Traders").at_block(block);
            let accounts = client
                .fetch(&query)
                .await?
                .iter()
                .map(|row| row_account(row, "trader"))
                .collect::<Result<BTreeSet<_>>>()?;
            Ok(accounts.into_iter().map(AccountRecord::from).collect::<Vec<_>>())
        })
        .await?;
    Ok(records.into_iter().map(|record| record.account).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::tests::MockQueryClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_alpha_traders_are_deduplicated_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let client = MockQueryClient::default().with(
            "generic_alpha_beta_traders",
            vec![
                json!({"trader": "0xC"}),
                json!({"trader": "0xa"}),
                json!({"trader": "0xc"}),
            ],
        );
        let alphas = fetch_alpha_traders(&client, &cache, Network::Gchain, 3).await.unwrap();
        assert_eq!(alphas.len(), 2);

        let contents =
            std::fs::read_to_string(cache.path(&CacheKey::file("gchain-alpha-traders.csv"))).unwrap();
        assert_eq!(contents, "account\n0xa\n0xc\n");
    }
}
