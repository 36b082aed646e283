//! Error types for every pipeline stage.
//!
//! Each component owns a typed error so the orchestrator can tell a fetch
//! failure from an extraction or translation failure when it logs an outcome.
//! Configuration errors are the only ones that are process-fatal.

use thiserror::Error;

/// Failures raised while retrieving a page.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {status} from server")]
    Status { status: u16 },

    #[error("blocked page detected ({marker})")]
    Blocked { marker: String, fatal: bool },

    #[error("empty response body")]
    EmptyBody,

    #[error("proxy {proxy} failed ({proxy_error}) and direct connection also failed ({direct_error})")]
    ProxyFallback {
        proxy: String,
        proxy_error: String,
        direct_error: String,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<FetchError>,
    },
}

/// Failures raised while turning markup into an article.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no extraction strategy recovered any content")]
    NoContent,

    #[error("insufficient content: {chars} chars (minimum {min})")]
    Insufficient { chars: usize, min: usize },
}

/// Failures raised by translation backends.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("{backend} request failed: {reason}")]
    Transport { backend: String, reason: String },

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{backend} returned an error payload: {payload}")]
    Provider { backend: String, payload: String },

    #[error("{backend} gave up on chunk {chunk} after {attempts} attempts: {reason}")]
    ChunkExhausted {
        backend: String,
        chunk: usize,
        attempts: usize,
        reason: String,
    },
}

/// Failures detected before any network activity starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown backend `{name}`; choose from: {valid}")]
    UnknownBackend { name: String, valid: String },

    #[error("backend `{backend}` requires {credential} (set it in the config file or environment)")]
    MissingCredential {
        backend: String,
        credential: &'static str,
    },

    #[error("invalid config file {path}: {reason}")]
    Invalid { path: String, reason: String },

    #[error("invalid value for `{field}`: {reason}")]
    Value { field: &'static str, reason: String },

    #[error("URLs file not found: {0}")]
    MissingUrls(String),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backend_lists_choices() {
        let err = ConfigError::UnknownBackend {
            name: "babel".to_string(),
            valid: "simple, deepl".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown backend `babel`; choose from: simple, deepl"
        );
    }

    #[test]
    fn test_exhausted_keeps_last_cause() {
        let err = FetchError::Exhausted {
            attempts: 3,
            last: Box::new(FetchError::Status { status: 503 }),
        };
        assert_eq!(err.to_string(), "gave up after 3 attempts: HTTP 503 from server");
    }

    #[test]
    fn test_crate_error_is_transparent() {
        let err: Error = ExtractError::NoContent.into();
        assert_eq!(err.to_string(), "no extraction strategy recovered any content");
    }
}
