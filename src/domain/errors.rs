use thiserror::Error;

/// Failure of a single upstream provider call.
///
/// Every transport, status and payload problem is normalized into this type so the
/// router can treat all of them the same way: log and move on to the next candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("{provider}: request failed: {reason}")]
    Request { provider: String, reason: String },

    #[error("{provider}: HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider}: rate limited: {reason}")]
    RateLimited { provider: String, reason: String },

    #[error("{provider}: timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider}: unexpected payload: {reason}")]
    Payload { provider: String, reason: String },

    #[error("{provider}: unsupported symbol {symbol}")]
    Unsupported { provider: String, symbol: String },
}

impl SourceError {
    pub fn request(provider: &str, reason: impl ToString) -> Self {
        Self::Request {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn payload(provider: &str, reason: impl ToString) -> Self {
        Self::Payload {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn rate_limited(provider: &str, reason: impl ToString) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Reasons an observation is rejected before it reaches the store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol is empty")]
    EmptySymbol,

    #[error("symbol {symbol} is not in canonical uppercase form")]
    NotCanonical { symbol: String },

    #[error("{symbol}: close price must be positive, got {close}")]
    NonPositiveClose { symbol: String, close: String },

    #[error("{symbol}: {field} price must be positive, got {value}")]
    NonPositivePrice {
        symbol: String,
        field: &'static str,
        value: String,
    },

    #[error("{symbol}: negative volume {volume}")]
    NegativeVolume { symbol: String, volume: String },

    #[error("{symbol}: high {high} is below low {low}")]
    HighBelowLow {
        symbol: String,
        high: String,
        low: String,
    },

    #[error("{symbol}: timestamp {timestamp} outside accepted range")]
    TimestampOutOfRange { symbol: String, timestamp: String },
}

/// Failures surfaced by one symbol's ingestion attempt
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("all sources failed for {symbol}: {}", attempts.join("; "))]
    AllSourcesFailed {
        symbol: String,
        attempts: Vec<String>,
    },

    #[error("store error for {symbol}: {reason}")]
    Store { symbol: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("symbol {symbol} is not tracked")]
    NotTracked { symbol: String },
}

/// Cache backend failure. Always recovered by the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry for {key} could not be decoded: {reason}")]
    Corrupt { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_formatting() {
        let err = SourceError::Status {
            provider: "finnhub".to_string(),
            status: 503,
            body: "unavailable".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("finnhub"));
        assert!(msg.contains("503"));
        assert!(!err.is_rate_limited());
        assert!(SourceError::rate_limited("coingecko", "429").is_rate_limited());
    }

    #[test]
    fn test_all_sources_failed_lists_attempts() {
        let err = IngestionError::AllSourcesFailed {
            symbol: "AAPL".to_string(),
            attempts: vec![
                "alpha_vantage: rate limited".to_string(),
                "yahoo: not found".to_string(),
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("AAPL"));
        assert!(msg.contains("alpha_vantage: rate limited; yahoo: not found"));
    }
}
