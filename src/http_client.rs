//! HTTP implementation of the remote search client.
//!
//! Talks to the hosted search REST API (`/1/indexes/...`) with `reqwest`.
//! Every call goes through [`HttpSearchClient::send`], which applies the
//! retry policy below and rotates through the configured hosts.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry on the next host
//! - Network errors → retry on the next host
//! - Other HTTP 4xx → fail immediately
//! - Backoff: 0s, 1s, 2s, 4s, … capped at 32s
//!
//! A 404 surfaces as a not-found [`RemoteError`], except for single-object
//! reads where a missing object is `Ok(None)`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use index_sync_core::client::{RemoteResult, SearchClient};
use index_sync_core::models::{CopyScope, Document, FacetHit, SearchResponse, TaskInfo, OBJECT_ID};
use index_sync_core::RemoteError;

use crate::config::RemoteConfig;

const APPLICATION_HEADER: &str = "X-Algolia-Application-Id";
const API_KEY_HEADER: &str = "X-Algolia-API-Key";

/// Upper bound on the delay between two task status polls.
const MAX_POLL_DELAY: Duration = Duration::from_secs(5);

pub struct HttpSearchClient {
    http: reqwest::Client,
    application_id: String,
    api_key: String,
    hosts: Vec<Url>,
    max_retries: u32,
    task_poll: Duration,
}

#[derive(Deserialize)]
struct TaskStatus {
    status: String,
}

#[derive(Deserialize)]
struct FacetResponse {
    #[serde(rename = "facetHits", default)]
    facet_hits: Vec<FacetHit>,
}

impl HttpSearchClient {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key()?;
        let hosts = if config.hosts.is_empty() {
            default_hosts(&config.application_id)
        } else {
            config.hosts.clone()
        };
        let hosts = hosts
            .iter()
            .map(|h| parse_host(h))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            application_id: config.application_id.clone(),
            api_key,
            hosts,
            max_retries: config.max_retries,
            task_poll: Duration::from_millis(config.task_poll_ms),
        })
    }

    /// Send one request with retry and host rotation. Returns the decoded
    /// JSON body of the first successful answer.
    async fn send(&self, method: Method, path: &[&str], body: Option<&Value>) -> RemoteResult<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let host = &self.hosts[attempt as usize % self.hosts.len()];
            let url = endpoint(host, path);
            let mut request = self
                .http
                .request(method.clone(), url)
                .header(APPLICATION_HEADER, &self.application_id)
                .header(API_KEY_HEADER, &self.api_key)
                .header("Content-Type", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| RemoteError::transport(format!("invalid response body: {}", e)));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = error_message(&body_text);

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(host = %host, status = status.as_u16(), attempt, "retrying remote call");
                        last_err = Some(RemoteError::new(status.as_u16(), message));
                        continue;
                    }

                    return Err(RemoteError::new(status.as_u16(), message));
                }
                Err(e) => {
                    warn!(host = %host, attempt, error = %e, "remote host unreachable");
                    last_err = Some(RemoteError::transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RemoteError::transport("remote call failed after retries")))
    }

    async fn send_task(&self, method: Method, path: &[&str], body: Option<&Value>) -> RemoteResult<TaskInfo> {
        let value = self.send(method, path, body).await?;
        parse_task(value)
    }

    async fn batch(&self, index: &str, requests: Vec<Value>) -> RemoteResult<TaskInfo> {
        let body = json!({ "requests": requests });
        self.send_task(Method::POST, &["1", "indexes", index, "batch"], Some(&body))
            .await
    }

    async fn operation(&self, source: &str, body: Value) -> RemoteResult<TaskInfo> {
        self.send_task(Method::POST, &["1", "indexes", source, "operation"], Some(&body))
            .await
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn save_objects(&self, index: &str, documents: &[Document]) -> RemoteResult<TaskInfo> {
        let requests = documents
            .iter()
            .map(|d| json!({ "action": "updateObject", "body": d }))
            .collect();
        self.batch(index, requests).await
    }

    async fn delete_object(&self, index: &str, object_id: &str) -> RemoteResult<TaskInfo> {
        self.send_task(Method::DELETE, &["1", "indexes", index, object_id], None)
            .await
    }

    async fn delete_objects(&self, index: &str, object_ids: &[String]) -> RemoteResult<TaskInfo> {
        let requests = object_ids
            .iter()
            .map(|id| json!({ "action": "deleteObject", "body": { OBJECT_ID: id } }))
            .collect();
        self.batch(index, requests).await
    }

    async fn get_object(
        &self,
        index: &str,
        object_id: &str,
    ) -> RemoteResult<Option<Map<String, Value>>> {
        match self
            .send(Method::GET, &["1", "indexes", index, object_id], None)
            .await
        {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(other) => Err(RemoteError::transport(format!(
                "expected an object, got {}",
                other
            ))),
            // the service answers 404 for both a missing object and a missing index
            Err(e) if e.is_not_found() && e.message.contains("ObjectID") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn clear_index(&self, index: &str) -> RemoteResult<TaskInfo> {
        self.send_task(Method::POST, &["1", "indexes", index, "clear"], None)
            .await
    }

    async fn delete_index(&self, index: &str) -> RemoteResult<TaskInfo> {
        self.send_task(Method::DELETE, &["1", "indexes", index], None)
            .await
    }

    async fn get_settings(&self, index: &str) -> RemoteResult<Map<String, Value>> {
        match self
            .send(Method::GET, &["1", "indexes", index, "settings"], None)
            .await?
        {
            Value::Object(map) => Ok(map),
            other => Err(RemoteError::transport(format!(
                "expected a settings object, got {}",
                other
            ))),
        }
    }

    async fn set_settings(
        &self,
        index: &str,
        settings: &Map<String, Value>,
    ) -> RemoteResult<TaskInfo> {
        let body = Value::Object(settings.clone());
        self.send_task(Method::PUT, &["1", "indexes", index, "settings"], Some(&body))
            .await
    }

    async fn wait_task(&self, index: &str, task_id: u64) -> RemoteResult<()> {
        let task = task_id.to_string();
        let mut delay = self.task_poll;
        loop {
            let value = self
                .send(Method::GET, &["1", "indexes", index, "task", &task], None)
                .await?;
            let status: TaskStatus = serde_json::from_value(value)
                .map_err(|e| RemoteError::transport(format!("invalid task status: {}", e)))?;
            if status.status == "published" {
                return Ok(());
            }
            debug!(index, task_id, status = %status.status, "task pending");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    }

    async fn move_index(&self, source: &str, destination: &str) -> RemoteResult<TaskInfo> {
        self.operation(
            source,
            json!({ "operation": "move", "destination": destination }),
        )
        .await
    }

    async fn copy_index(
        &self,
        source: &str,
        destination: &str,
        scope: &[CopyScope],
    ) -> RemoteResult<TaskInfo> {
        let mut body = json!({ "operation": "copy", "destination": destination });
        if !scope.is_empty() {
            body["scope"] = json!(scope);
        }
        self.operation(source, body).await
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<SearchResponse> {
        let body = json!({ "params": encode_params("query", query, params) });
        let value = self
            .send(Method::POST, &["1", "indexes", index, "query"], Some(&body))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::transport(format!("invalid search response: {}", e)))
    }

    async fn search_for_facet_values(
        &self,
        index: &str,
        facet: &str,
        text: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<Vec<FacetHit>> {
        let body = json!({ "params": encode_params("facetQuery", text, params) });
        let value = self
            .send(
                Method::POST,
                &["1", "indexes", index, "facets", facet, "query"],
                Some(&body),
            )
            .await?;
        let parsed: FacetResponse = serde_json::from_value(value)
            .map_err(|e| RemoteError::transport(format!("invalid facet response: {}", e)))?;
        Ok(parsed.facet_hits)
    }
}

fn default_hosts(application_id: &str) -> Vec<String> {
    let mut hosts = vec![format!("https://{}.algolia.net", application_id)];
    for n in 1..=3 {
        hosts.push(format!("https://{}-{}.algolianet.com", application_id, n));
    }
    hosts
}

fn parse_host(host: &str) -> anyhow::Result<Url> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| anyhow::anyhow!("invalid remote host '{}': {}", host, e))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("invalid remote host '{}'", host);
    }
    Ok(url)
}

/// Join percent-encoded path segments onto a host.
fn endpoint(host: &Url, path: &[&str]) -> Url {
    let mut url = host.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(path);
    }
    url
}

/// Form-encode the query text and the remaining parameters.
fn encode_params(query_key: &str, query: &str, params: &BTreeMap<String, String>) -> String {
    let pairs = std::iter::once((query_key, query))
        .chain(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    // only the query serializer of Url is used; the base is irrelevant
    match Url::parse_with_params("http://localhost/", pairs) {
        Ok(url) => url.query().unwrap_or_default().to_string(),
        Err(_) => String::new(),
    }
}

fn parse_task(value: Value) -> RemoteResult<TaskInfo> {
    let task_id = value.get("taskID").and_then(Value::as_u64);
    Ok(TaskInfo {
        task_id,
        error: None,
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
