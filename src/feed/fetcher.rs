use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::NetworkError;

/// Per-request timeout; a single slow endpoint gives up after this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Session-wide ceiling covering the whole transfer.
const RESOURCE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 1 initial attempt + 2 retries.
const MAX_ATTEMPTS: u32 = 3;
/// Fixed backoff schedule between attempts, deliberately unjittered.
const BACKOFF_DELAYS: [Duration; 2] = [Duration::from_millis(300), Duration::from_millis(900)];

/// A successfully fetched payload.
///
/// `attempts` is 1 for a first-try success; larger values mean the
/// request recovered after at least one retry.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub attempts: u32,
}

/// Abstraction over HTTP document retrieval so the store can be driven
/// by a stub in tests.
#[async_trait]
pub trait DocumentFetching: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchedDocument, NetworkError>;
}

pub struct DocumentFetcher {
    client: Client,
}

impl DocumentFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(RESOURCE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<Vec<u8>, NetworkError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status == StatusCode::UPGRADE_REQUIRED {
            // The server demands TLS; the caller reports this as an
            // insecure URL rather than a plain HTTP failure.
            return Err(NetworkError::SecureTransportRequired);
        }
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }

        // Body-read failures go through the same classifier as send
        // failures: a timeout or dropped connection mid-transfer is
        // just as transient as one during connect.
        let bytes = response.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }
}

impl Default for DocumentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentFetching for DocumentFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchedDocument, NetworkError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        tracing::info!(url = %url, attempt, "fetch recovered after retry");
                    }
                    return Ok(FetchedDocument {
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = BACKOFF_DELAYS[(attempt - 1) as usize];
                    tracing::warn!(url = %url, attempt, error = %e, "transient fetch error, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a reqwest error onto the retry taxonomy. DNS failures surface as
/// connect errors in reqwest, and mid-transfer connection drops as body
/// errors, so the source chain is inspected for both.
fn classify(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        return NetworkError::Timeout;
    }
    if e.is_connect() {
        if chain_mentions(&e, "dns") {
            return NetworkError::Dns(e.to_string());
        }
        return NetworkError::Connect(e.to_string());
    }
    if connection_lost(&e) {
        return NetworkError::Connect(e.to_string());
    }
    if e.is_body() || e.is_decode() {
        return NetworkError::Body(e.to_string());
    }
    NetworkError::Other(e.to_string())
}

/// True when the error chain describes a connection dropped underneath
/// an in-flight request (reset, closed, aborted, incomplete message).
fn connection_lost(e: &(dyn StdError + 'static)) -> bool {
    const LOST_MARKERS: [&str; 5] = [
        "connection reset",
        "connection closed",
        "connection aborted",
        "broken pipe",
        "incomplete message",
    ];
    LOST_MARKERS.iter().any(|needle| chain_mentions(e, needle))
}

fn chain_mentions(e: &(dyn StdError + 'static), needle: &str) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = current {
        if err.to_string().to_lowercase().contains(needle) {
            return true;
        }
        current = err.source();
    }
    false
}
