use anyhow::Result;
use std::collections::BTreeMap;

use super::fetch_holder_records;
use crate::cache::{Cache, CacheKey};
use crate::query_client::{Query, QueryClient};
use crate::types::{Account, HolderRecord, Network};

/// Direct GNO balances on `network` at `block`, cached as `{network}-gno-holders.csv`.
pub async fn fetch_gno_holders(
    client: &dyn QueryClient,
    cache: &Cache,
    network: Network,
    block: u64,
) -> Result<BTreeMap<Account, HolderRecord>> {
    let query = Query::new(format!("{}_holders", network), network, "GNO holders").at_block(block);
    fetch_holder_records(
        client,
        cache,
        &CacheKey::network(network, "gno-holders.csv"),
        query,
        "account",
        "amount",
    )
    .await
}
