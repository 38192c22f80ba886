use std::time::Duration;

/// Why one candidate endpoint produced nothing. Never leaves the fetcher.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("fetch session closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures that end a run (persistence) or a step (export).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("export failed for {path}: {source}")]
    Export {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode export document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn export(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Export {
            path: path.into(),
            source,
        }
    }
}
