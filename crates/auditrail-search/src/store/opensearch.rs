//! [`SearchStore`] backed by the OpenSearch REST API.

use std::time::Duration;

use async_trait::async_trait;
use auditrail_types::{fields, Bucket};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Value};

use super::SearchStore;
use crate::error::StoreError;
use crate::query::{IndexResponse, SearchRequest, SearchResponse};

/// Connection settings for [`OpenSearchStore`].
#[derive(Debug, Clone)]
pub struct OpenSearchConfig {
    /// Base URL, e.g. `http://localhost:9200`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

/// OpenSearch client speaking plain JSON over `reqwest`.
#[derive(Debug, Clone)]
pub struct OpenSearchStore {
    client: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
}

impl OpenSearchStore {
    /// # Errors
    ///
    /// Returns `StoreError::InvalidUrl` if `config.url` cannot address
    /// documents, or `StoreError::Transport` if the HTTP client cannot be
    /// built.
    pub fn new(config: OpenSearchConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {e}", config.url)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(config.url));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base,
            username: config.username.filter(|u| !u.is_empty()),
            password: config.password,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected { status, body })
    }
}

/// Index settings: every event field is a keyword with an analyzed `text`
/// sub-field, timestamps are longs, and strings inside `data` are keywords.
fn event_mapping() -> Value {
    let keyword_with_text = json!({
        "type": "keyword",
        "fields": { "text": { "type": "text" } }
    });
    json!({
        "mappings": {
            "dynamic_templates": [{
                "data_strings": {
                    "path_match": "data.*",
                    "match_mapping_type": "string",
                    "mapping": { "type": "keyword" }
                }
            }],
            "properties": {
                (fields::ID): { "type": "keyword" },
                (fields::SUBJECT_TYPE): { "type": "keyword" },
                (fields::SUBJECT_ID): keyword_with_text,
                (fields::TARGET_TYPE): keyword_with_text,
                (fields::TARGET_ID): keyword_with_text,
                (fields::EVENT_TYPE): keyword_with_text,
                (fields::CORRELATION_ID): keyword_with_text,
                (fields::CREATED_AT): { "type": "long" },
                (fields::DATA): { "type": "object" }
            }
        }
    })
}

#[async_trait]
impl SearchStore for OpenSearchStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.send(self.client.get(self.base.clone())).await?;
        Ok(())
    }

    async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        let url = self.endpoint(&[index])?;
        let exists = self
            .authorize(self.client.head(url.clone()))
            .send()
            .await?
            .status();
        if exists.is_success() {
            return Ok(());
        }
        if exists != StatusCode::NOT_FOUND {
            return Err(StoreError::Rejected {
                status: exists.as_u16(),
                body: format!("unexpected status checking index `{index}`"),
            });
        }

        match self.send(self.client.put(url).json(&event_mapping())).await {
            Ok(_) => {
                tracing::info!(index, "created search index");
                Ok(())
            }
            // Another instance created it between the HEAD and the PUT.
            Err(StoreError::Rejected { status: 400, body })
                if body.contains("resource_already_exists_exception") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn index(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> Result<IndexResponse, StoreError> {
        let url = self.endpoint(&[index, "_doc", id])?;
        let body: Value = self
            .send(self.client.put(url).json(document))
            .await?
            .json()
            .await?;

        let id = body["_id"]
            .as_str()
            .ok_or_else(|| StoreError::Decode("index response without `_id`".to_string()))?;
        let version = body["_version"]
            .as_i64()
            .ok_or_else(|| StoreError::Decode("index response without `_version`".to_string()))?;
        Ok(IndexResponse {
            id: id.to_string(),
            version,
        })
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        let url = self.endpoint(&[index, "_search"])?;
        let body: Value = self
            .send(self.client.post(url).json(&request.to_json()))
            .await?
            .json()
            .await?;
        parse_search_response(&body, request)
    }
}

fn parse_search_response(
    body: &Value,
    request: &SearchRequest,
) -> Result<SearchResponse, StoreError> {
    let hits_section = body
        .get("hits")
        .ok_or_else(|| StoreError::Decode("search response without `hits`".to_string()))?;

    let hits: Vec<Value> = hits_section["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .collect()
        })
        .unwrap_or_default();

    // `hits.total` is an object on OpenSearch and a bare number on older
    // Elasticsearch-compatible servers.
    let total = hits_section["total"]["value"]
        .as_u64()
        .or_else(|| hits_section["total"].as_u64())
        .unwrap_or(0);

    let buckets: Option<Vec<Bucket>> = match &request.aggregation {
        Some(agg) => {
            let raw = body["aggregations"][&agg.name]["buckets"]
                .as_array()
                .ok_or_else(|| {
                    StoreError::Decode(format!("search response without `{}` buckets", agg.name))
                })?;
            Some(
                raw.iter()
                    .filter_map(|bucket| {
                        let key = match &bucket["key"] {
                            Value::String(s) => s.clone(),
                            Value::Null => return None,
                            other => other.to_string(),
                        };
                        Some(Bucket {
                            key,
                            count: bucket["doc_count"].as_u64().unwrap_or(0),
                        })
                    })
                    .collect(),
            )
        }
        None => None,
    };

    Ok(SearchResponse {
        hits,
        total,
        timed_out: body["timed_out"].as_bool().unwrap_or(false),
        took: body["took"].as_u64().unwrap_or(0),
        buckets,
    })
}
