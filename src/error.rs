use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

/// Low-level transport failures reported by the document fetcher.
///
/// Only a subset is considered transient (worth retrying); everything
/// else propagates to the caller on the first attempt.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("server requires a secure connection")]
    SecureTransportRequired,

    #[error("HTTP error: status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl NetworkError {
    /// Timeouts, connection drops and DNS failures are retried with
    /// backoff; HTTP status errors and TLS-policy errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetworkError::Timeout | NetworkError::Connect(_) | NetworkError::Dns(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Please enter a valid http(s) feed URL.")]
    InvalidUrl,

    #[error("This feed URL uses HTTP. Please use an HTTPS feed URL instead.")]
    InsecureUrl,

    #[error("Unable to parse this feed.")]
    ParseFailed,

    #[error("Please enter a valid https OPML URL.")]
    InvalidOpmlUrl,

    #[error("Failed to download the OPML document: {0}")]
    OpmlFetchFailed(NetworkError),

    #[error("Unable to parse the OPML document.")]
    OpmlParseFailed,

    #[error("The OPML document contains no valid https feeds.")]
    OpmlContainsNoValidFeeds,

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for FeedError {
    fn from(e: rusqlite::Error) -> Self {
        FeedError::Database(tokio_rusqlite::Error::Rusqlite(e))
    }
}
