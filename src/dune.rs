//! Session-authenticated client for the Dune Analytics GraphQL backend.
//!
//! A single saved query (owned by the configured user) is overwritten with the
//! SQL of each request, executed, and polled until a result id is published.
//! The execute-and-await step is retried with a fresh session between attempts.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::query_client::{Query, QueryClient, QueryParameter, Row};
use crate::settings::Dune;
use crate::types::Network;

#[derive(Debug, Error)]
pub enum DuneError {
    #[error("Dune API request failed with {0}")]
    Api(String),
    #[error("maximum retries ({0}) exceeded")]
    MaxRetriesExceeded(u32),
    #[error("no auth token in session response")]
    MissingToken,
}

const UPSERT_QUERY: &str = "mutation UpsertQuery($object: queries_insert_input!, $on_conflict: queries_on_conflict!) {\n  insert_queries_one(object: $object, on_conflict: $on_conflict) {\n    id\n    __typename\n  }\n}\n";
const EXECUTE_QUERY: &str = "mutation ExecuteQuery($query_id: Int!, $parameters: [Parameter!]!) {\n  execute_query(query_id: $query_id, parameters: $parameters) {\n    job_id\n    __typename\n  }\n}\n";
const GET_RESULT: &str = "query GetResult($query_id: Int!, $parameters: [Parameter!]) {\n  get_result(query_id: $query_id, parameters: $parameters) {\n    job_id\n    result_id\n    __typename\n  }\n}\n";
const FIND_RESULT_DATA: &str = "query FindResultDataByResult($result_id: uuid!) {\n  query_results(where: {id: {_eq: $result_id}}) {\n    id\n    job_id\n    error\n    runtime\n    generated_at\n    columns\n    __typename\n  }\n  get_result_by_result_id(args: {want_result_id: $result_id}) {\n    data\n    __typename\n  }\n}\n";

fn dataset_id(network: Network) -> u64 {
    match network {
        Network::Mainnet => 4,
        Network::Gchain => 6,
    }
}

pub struct DuneClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base_url: Url,
    graph_url: String,
    username: String,
    password: String,
    query_id: u64,
    max_retries: u32,
    ping_frequency: Duration,
    query_path: PathBuf,
    token: RwLock<Option<String>>,
}

impl DuneClient {
    pub fn new(settings: &Dune, query_path: impl Into<PathBuf>) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("invalid Dune base url {}", settings.base_url))?;
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(Duration::from_secs(60))
            .build()
            .context("building Dune HTTP client")?;

        Ok(Self {
            client,
            jar,
            base_url,
            graph_url: settings.graph_url.clone(),
            username: settings.user.clone(),
            password: settings.password.clone(),
            query_id: settings.query_id,
            max_retries: settings.max_retries,
            ping_frequency: Duration::from_secs(settings.ping_frequency_secs),
            query_path: query_path.into(),
            token: RwLock::new(None),
        })
    }

    /// Builds a client and establishes an authenticated session.
    pub async fn connect(settings: &Dune, query_path: impl Into<PathBuf>) -> Result<Self> {
        let dune = Self::new(settings, query_path)?;
        dune.login_and_fetch_auth().await?;
        Ok(dune)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        let cookies = header.to_str().ok()?;
        cookies.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }

    async fn login(&self) -> Result<()> {
        self.client
            .get(self.endpoint("/auth/login"))
            .send()
            .await
            .context("fetching Dune login page")?;
        self.client
            .post(self.endpoint("/api/auth/csrf"))
            .send()
            .await
            .context("requesting Dune csrf token")?;
        let csrf = self.cookie("csrf").unwrap_or_default();

        let next = self.base_url.as_str().trim_end_matches('/').to_string();
        let form = [
            ("action", "login"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("csrf", csrf.as_str()),
            ("next", next.as_str()),
        ];
        self.client
            .post(self.endpoint("/api/auth"))
            .form(&form)
            .send()
            .await
            .context("submitting Dune login form")?;
        if self.cookie("auth-refresh").is_none() {
            warn!("Dune login returned no auth-refresh cookie for {}", self.username);
        }
        Ok(())
    }

    async fn fetch_auth_token(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("/api/auth/session"))
            .send()
            .await
            .context("requesting Dune session")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DuneError::Api(format!("session request {}: {}", status, body)).into());
        }
        let body: Value = response.json().await.context("decoding Dune session")?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or(DuneError::MissingToken)?;
        *self.token.write().await = Some(token.to_string());
        Ok(())
    }

    pub async fn login_and_fetch_auth(&self) -> Result<()> {
        self.login().await?;
        self.fetch_auth_token().await
    }

    async fn graphql(&self, body: Value) -> Result<Value> {
        let token = self.token.read().await.clone().unwrap_or_default();
        let response: Value = self
            .client
            .post(&self.graph_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("posting Dune GraphQL request")?
            .json()
            .await
            .context("decoding Dune GraphQL response")?;
        check_errors(response)
    }

    async fn upsert_query(
        &self,
        sql: &str,
        name: &str,
        network: Network,
        parameters: &[QueryParameter],
    ) -> Result<()> {
        let body = json!({
            "operationName": "UpsertQuery",
            "variables": {
                "object": {
                    "id": self.query_id,
                    "schedule": null,
                    "dataset_id": dataset_id(network),
                    "name": name,
                    "query": sql,
                    "description": "",
                    "is_archived": false,
                    "is_temp": false,
                    "tags": [],
                    "parameters": parameters,
                    "visualizations": {
                        "data": [],
                        "on_conflict": {
                            "constraint": "visualizations_pkey",
                            "update_columns": ["name", "options"]
                        }
                    }
                },
                "on_conflict": {
                    "constraint": "queries_pkey",
                    "update_columns": [
                        "dataset_id", "name", "description", "query", "schedule",
                        "is_archived", "is_temp", "tags", "parameters"
                    ]
                }
            },
            "query": UPSERT_QUERY,
        });
        self.graphql(body).await.map(|_| ())
    }

    async fn execute_query(&self) -> Result<()> {
        let body = json!({
            "operationName": "ExecuteQuery",
            "variables": {"query_id": self.query_id, "parameters": []},
            "query": EXECUTE_QUERY,
        });
        self.graphql(body).await.map(|_| ())
    }

    async fn query_result_id(&self) -> Result<Option<String>> {
        let body = json!({
            "operationName": "GetResult",
            "variables": {"query_id": self.query_id},
            "query": GET_RESULT,
        });
        let response = self.graphql(body).await?;
        Ok(response
            .pointer("/data/get_result/result_id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn query_result(&self, result_id: &str) -> Result<Vec<Row>> {
        let body = json!({
            "operationName": "FindResultDataByResult",
            "variables": {"result_id": result_id},
            "query": FIND_RESULT_DATA,
        });
        parse_result_rows(&self.graphql(body).await?)
    }

    async fn execute_and_await_results(&self) -> Result<Vec<Row>> {
        self.execute_query().await?;
        let result_id = loop {
            if let Some(id) = self.query_result_id().await? {
                break id;
            }
            sleep(self.ping_frequency).await;
        };
        let rows = self.query_result(&result_id).await?;
        info!("got {} records from last query", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl QueryClient for DuneClient {
    async fn fetch(&self, query: &Query) -> Result<Vec<Row>> {
        info!("Fetching {} on {}...", query.name, query.network);
        let path = self.query_path.join(format!("{}.sql", query.template));
        let sql = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading query template {}", path.display()))?;
        self.upsert_query(&sql, "Auto Generated Query", query.network, &query.parameters)
            .await?;

        retry_with_reauth(
            self.max_retries,
            || self.execute_and_await_results(),
            || self.login_and_fetch_auth(),
        )
        .await
    }
}

/// Runs `attempt` up to `max_retries` times, calling `reauth` after each failure.
pub async fn retry_with_reauth<T, A, AFut, R, RFut>(
    max_retries: u32,
    mut attempt: A,
    mut reauth: R,
) -> Result<T>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<T>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<()>>,
{
    for attempt_number in 1..=max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    "execution fetching failed with {}. Attempt {}/{}; re-establishing dune connection",
                    e, attempt_number, max_retries
                );
                reauth().await?;
            }
        }
    }
    Err(DuneError::MaxRetriesExceeded(max_retries).into())
}

fn check_errors(response: Value) -> Result<Value> {
    if let Some(errors) = response.get("errors") {
        debug!("Dune responded with errors: {}", errors);
        return Err(DuneError::Api(response.to_string()).into());
    }
    Ok(response)
}

/// Extracts the record objects from a `FindResultDataByResult` response.
pub fn parse_result_rows(response: &Value) -> Result<Vec<Row>> {
    let records = response
        .pointer("/data/get_result_by_result_id")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("malformed Dune result: {}", response))?;
    records
        .iter()
        .map(|record| {
            record
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| anyhow!("Dune record without data: {}", record))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_parse_result_rows() {
        let response = json!({
            "data": {
                "query_results": [],
                "get_result_by_result_id": [
                    {"data": {"account": "0x1", "amount": 5}},
                    {"data": {"account": "0x2", "amount": 7}}
                ]
            }
        });
        let rows = parse_result_rows(&response).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["amount"], json!(7));
    }

    #[test]
    fn test_errors_key_is_api_error() {
        let err = check_errors(json!({"errors": [{"message": "boom"}]})).unwrap_err();
        assert!(matches!(err.downcast_ref::<DuneError>(), Some(DuneError::Api(_))));
        assert!(check_errors(json!({"data": {}})).is_ok());
    }

    #[tokio::test]
    async fn test_retry_recovers_after_reauth() {
        let attempts = &Cell::new(0);
        let logins = &Cell::new(0);
        let result = retry_with_reauth(
            2,
            move || async move {
                attempts.set(attempts.get() + 1);
                if attempts.get() == 1 {
                    Err(anyhow!("expired session"))
                } else {
                    Ok(42)
                }
            },
            move || async move {
                logins.set(logins.get() + 1);
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.get(), 2);
        assert_eq!(logins.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let logins = &Cell::new(0);
        let err = retry_with_reauth::<(), _, _, _, _>(
            2,
            || async { Err(anyhow!("still failing")) },
            move || async move {
                logins.set(logins.get() + 1);
                Ok(())
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DuneError>(),
            Some(DuneError::MaxRetriesExceeded(2))
        ));
        assert_eq!(logins.get(), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_fails_without_attempting() {
        let attempts = &Cell::new(0);
        let err = retry_with_reauth::<(), _, _, _, _>(
            0,
            move || async move {
                attempts.set(attempts.get() + 1);
                Ok(())
            },
            || async { Ok(()) },
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<DuneError>().is_some());
        assert_eq!(attempts.get(), 0);
    }
}
