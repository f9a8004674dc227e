use thiserror::Error;

/// Failure modes of a single outbound API call.
///
/// Transient errors are worth another attempt after a backoff wait; every
/// other variant is permanent for the series at hand and short-circuits to
/// a skip without touching the retry budget.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limit hit (HTTP 429)")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("archive handling failed: {0}")]
    Archive(String),
}

impl FetchError {
    /// Whether waiting and retrying has any chance of a different answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited | FetchError::Timeout | FetchError::Connection(_)
        )
    }

    /// Classify a non-success HTTP status code.
    pub fn from_status_code(status: u16) -> Self {
        if status == 429 {
            return FetchError::RateLimited;
        }
        let reason = match status {
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            408 => "Request Timeout",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "unexpected status",
        };
        FetchError::Status {
            status,
            reason: reason.to_string(),
        }
    }
}

/// A series whose fetch could not be completed.
///
/// Never fatal: the batch logs one warning per skip and moves on to the
/// next series. Only environment problems (unreadable credentials or
/// catalog files) abort a run.
#[derive(Debug, Error)]
#[error("could not fetch series {series_id} after {attempts} attempt(s): {error}")]
pub struct SkippedSeries {
    pub series_id: String,
    pub attempts: u32,
    pub error: FetchError,
}

impl SkippedSeries {
    pub fn new(series_id: &str, attempts: u32, error: FetchError) -> Self {
        Self {
            series_id: series_id.to_string(),
            attempts,
            error,
        }
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
