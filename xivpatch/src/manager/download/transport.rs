//! Transport abstraction for single-file patch transfers.
//!
//! The scheduler only needs "fetch this URL into this file and tell me how it
//! is going". Hiding the byte-range mechanics behind [`PatchTransport`] keeps
//! the scheduler testable without a network.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The server answered with an unexpected status.
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// No data arrived within the read timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// The server delivered a different amount of data than announced.
    #[error("received {actual} bytes from {url}, expected {expected}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// Writing the destination file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The transfer was cancelled.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Http { .. }
            | TransferError::Timeout { .. }
            | TransferError::SizeMismatch { .. } => true,
            TransferError::Status { status, .. } => *status == 429 || *status >= 500,
            TransferError::Write { .. } | TransferError::Client(_) | TransferError::Cancelled => {
                false
            }
        }
    }
}

/// Progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransferProgress {
    /// Bytes received so far.
    pub received_bytes: u64,
    /// Current transfer rate.
    pub bytes_per_second: f64,
}

/// Callback invoked on every progress tick.
pub type TransferProgressCallback<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

/// One file to fetch.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Source URL.
    pub url: &'a str,
    /// File to write. Created or truncated by the transport.
    pub destination: &'a Path,
    /// Size announced by the patch list.
    pub expected_length: u64,
    /// Rate cap for this transfer in bytes per second.
    pub speed_limit: Option<u64>,
}

/// Boxed future returned by [`PatchTransport::fetch`].
pub type TransferFuture<'a> = Pin<Box<dyn Future<Output = Result<u64, TransferError>> + Send + 'a>>;

/// Fetches a single file, possibly over several parallel byte ranges.
pub trait PatchTransport: Send + Sync {
    /// Download `request.url` into `request.destination`.
    ///
    /// Returns the number of bytes written. Must return
    /// [`TransferError::Cancelled`] (not another error) when `cancel` fires.
    fn fetch<'a>(
        &'a self,
        request: TransferRequest<'a>,
        on_progress: TransferProgressCallback<'a>,
        cancel: CancellationToken,
    ) -> TransferFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let url = "http://a/b".to_string();
        assert!(TransferError::Http {
            url: url.clone(),
            reason: "reset".to_string()
        }
        .is_transient());
        assert!(TransferError::Status {
            url: url.clone(),
            status: 503
        }
        .is_transient());
        assert!(!TransferError::Status {
            url: url.clone(),
            status: 404
        }
        .is_transient());
        assert!(!TransferError::Cancelled.is_transient());
        assert!(TransferError::Cancelled.is_cancelled());
    }
}
