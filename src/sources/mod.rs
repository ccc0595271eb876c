//! # Source Fetchers
//!
//! One module per venue. Every fetcher follows the same shape:
//!
//! 1. look the result up in the [`Cache`](crate::cache::Cache)
//! 2. on a miss, build a [`Query`](crate::query_client::Query) (or a subgraph
//!    request), map the returned rows into records and sort them
//!    deterministically
//! 3. persist and return, indexed by account where the venue yields at most one
//!    record per account
//!
//! Network-specific venues (stakers on gchain, Balancer and Uniswap V3 on
//! mainnet) only expose a single-network entry point.

pub mod alpha_traders;
pub mod balancer;
pub mod exclusions;
pub mod lp_holders;
pub mod poap;
pub mod stakers;
pub mod token_holders;
pub mod traders;
pub mod uniswap_v3;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::cache::{Cache, CacheKey};
use crate::query_client::{row_account, row_u256, Query, QueryClient};
use crate::types::{Account, HolderRecord};
use crate::utils::index_by_account;

/// Orders by descending amount, then ascending account.
pub fn sort_holders(records: &mut [HolderRecord]) {
    records.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.account.cmp(&b.account))
    });
}

/// Cached `account -> amount` fetch shared by the balance-style venues.
pub(crate) async fn fetch_holder_records(
    client: &dyn QueryClient,
    cache: &Cache,
    key: &CacheKey,
    query: Query,
    account_field: &str,
    amount_field: &str,
) -> Result<BTreeMap<Account, HolderRecord>> {
    let records = cache
        .get_or_compute(key, || async {
            let rows = client.fetch(&query).await?;
            let mut records = rows
                .iter()
                .map(|row| {
                    Ok(HolderRecord::new(
                        row_account(row, account_field)?,
                        row_u256(row, amount_field)?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            sort_holders(&mut records);
            Ok(records)
        })
        .await?;
    Ok(index_by_account(records, key.name())?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::query_client::Row;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned rows per template and records every query it receives.
    #[derive(Default)]
    pub(crate) struct MockQueryClient {
        pub responses: HashMap<String, Vec<Row>>,
        pub received: Mutex<Vec<Query>>,
    }

    impl MockQueryClient {
        pub(crate) fn with(mut self, template: &str, rows: Vec<serde_json::Value>) -> Self {
            let rows = rows
                .into_iter()
                .map(|v| v.as_object().cloned().unwrap())
                .collect();
            self.responses.insert(template.to_string(), rows);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl QueryClient for MockQueryClient {
        async fn fetch(&self, query: &Query) -> Result<Vec<Row>> {
            self.received.lock().unwrap().push(query.clone());
            Ok(self.responses.get(&query.template).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn test_sort_holders() {
        use ethers::types::U256;
        let mut records = vec![
            HolderRecord::new("0xb", U256::from(5)),
            HolderRecord::new("0xc", U256::from(9)),
            HolderRecord::new("0xa", U256::from(5)),
        ];
        sort_holders(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(order, vec!["0xc", "0xa", "0xb"]);
    }
}
