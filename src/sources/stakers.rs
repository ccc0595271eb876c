use anyhow::Result;
use std::collections::BTreeMap;

use super::fetch_holder_records;
use crate::cache::{Cache, CacheKey};
use crate::query_client::{Query, QueryClient};
use crate::types::{Account, HolderRecord, Network};

/// GNO deposited into the gchain staking contract, cached as `gchain-gno-stakers.csv`.
pub async fn fetch_gno_stakers(
    client: &dyn QueryClient,
    cache: &Cache,
    block: u64,
) -> Result<BTreeMap<Account, HolderRecord>> {
    let query = Query::new("staked_gno", Network::Gchain, "GNO stakers").at_block(block);
    fetch_holder_records(
        client,
        cache,
        &CacheKey::network(Network::Gchain, "gno-stakers.csv"),
        query,
        "depositor",
        "staked_gno",
    )
    .await
}
