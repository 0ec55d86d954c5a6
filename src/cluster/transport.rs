//! HTTP transport shared by the store and the engine.
//!
//! Every inter-node call goes through `post_with_retry` / `get_with_retry`:
//! bounded attempts with exponential backoff plus jitter.

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const ATTEMPTS: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 150;
const MAX_BACKOFF_MS: u64 = 1200;

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn url(addr: SocketAddr, path: &str) -> String {
        format!("http://{}{}", addr, path)
    }

    /// POSTs `payload` and decodes a JSON body from a successful response.
    pub async fn post_json<Req, Resp>(&self, addr: SocketAddr, path: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .post_with_retry(Self::url(addr, path), payload, REQUEST_TIMEOUT, ATTEMPTS)
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("POST {} failed: {}", path, response.status()));
        }
        Ok(response.json().await?)
    }

    pub async fn post_with_retry<T: Serialize + ?Sized>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..attempts {
            match self
                .client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow!(e));
                    }
                    tracing::debug!("POST {} attempt {} failed: {}", url, attempt + 1, e);
                    delay_ms = backoff(delay_ms).await;
                }
            }
        }

        Err(anyhow!("Retry attempts exhausted for {}", url))
    }

    pub async fn get_with_retry(
        &self,
        url: String,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..attempts {
            match self.client.get(url.clone()).timeout(timeout).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow!(e));
                    }
                    tracing::debug!("GET {} attempt {} failed: {}", url, attempt + 1, e);
                    delay_ms = backoff(delay_ms).await;
                }
            }
        }

        Err(anyhow!("Retry attempts exhausted for {}", url))
    }

    pub async fn get(&self, url: String) -> Result<reqwest::Response> {
        self.get_with_retry(url, REQUEST_TIMEOUT, ATTEMPTS).await
    }
}

async fn backoff(delay_ms: u64) -> u64 {
    let jitter = rand::random::<u64>() % 50;
    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
    (delay_ms * 2).min(MAX_BACKOFF_MS)
}
