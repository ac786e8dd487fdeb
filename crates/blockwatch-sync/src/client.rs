//! REST client for the indexer's block endpoints.

use async_trait::async_trait;
use log::{debug, error};
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::{Block, BlockHash, IndexerApi, SyncError, SyncResult};

const MAX_RETRIES: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(16);

#[derive(Clone)]
pub struct IndexerClient {
    base_url: String,
    http: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl IndexerClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            max_retries: MAX_RETRIES,
            retry_delay: INITIAL_RETRY_DELAY,
        })
    }

    /// Override the attempt budget and the first backoff step.
    pub fn with_retry(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = initial_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON resource, retrying network errors, 5xx and 429 with backoff.
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> SyncResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut retry_delay = self.retry_delay;
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            match self.http.get(&url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            SyncError::Indexer(format!("Invalid response from {}: {}", url, e))
                        });
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(SyncError::Indexer(format!("{} not found", url)));
                    }
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        return Err(SyncError::Indexer(format!(
                            "Request to {} failed with status {}",
                            url, status
                        )));
                    }
                    last_error = format!("status {}", status);
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            error!("Request to {} failed (attempt {}): {}", url, attempt + 1, last_error);
            if attempt + 1 == self.max_retries {
                break;
            }

            let jitter = rand::thread_rng().gen_range(0..=100) as u64;
            retry_delay = std::cmp::min(
                MAX_RETRY_DELAY,
                retry_delay * 2 + Duration::from_millis(jitter),
            );
            debug!("Retrying {} in {:?}", url, retry_delay);
            tokio::time::sleep(retry_delay).await;
        }

        Err(SyncError::Indexer(format!(
            "Max retries exceeded for {}: {}",
            url, last_error
        )))
    }
}

#[async_trait]
impl IndexerApi for IndexerClient {
    async fn get_block(&self, hash: &BlockHash) -> SyncResult<Block> {
        self.get(&format!("/v1/blocks/{}", hash.as_str()), &[]).await
    }

    async fn get_block_by_height(&self, height: i64) -> SyncResult<Block> {
        self.get(&format!("/v1/blocks/{}", height), &[]).await
    }

    async fn get_blocks(&self, after_height: i64, limit: usize) -> SyncResult<Vec<Block>> {
        self.get(
            "/v1/blocks",
            &[
                ("level.gt", after_height.to_string()),
                ("sort.asc", "level".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn get_head(&self) -> SyncResult<Block> {
        self.get("/v1/head", &[]).await
    }
}
