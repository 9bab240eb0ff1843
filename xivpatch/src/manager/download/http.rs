//! HTTP transport with parallel byte ranges.
//!
//! A file is fetched as follows:
//!
//! 1. `HEAD` the URL for its size and `Accept-Ranges` support.
//! 2. If ranges are supported and the file is large enough, preallocate the
//!    destination and fetch up to `chunks_per_file` ranges concurrently, each
//!    writing at its own offset.
//! 3. Otherwise stream the whole body with a single `GET`.
//!
//! Each range retries transient failures with exponential backoff, resuming
//! from the last byte it wrote. All ranges of a file share one throttle and
//! one rate meter.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::try_join_all;
use futures::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::progress::RateMeter;
use super::throttle::BandwidthThrottle;
use super::transport::{
    PatchTransport, TransferError, TransferFuture, TransferProgress, TransferProgressCallback,
    TransferRequest,
};
use crate::manager::config::PatchManagerConfig;

/// Files smaller than this per range are not worth splitting.
const MIN_RANGE_SIZE: u64 = 1024 * 1024;

/// Delay before the first retry.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Inclusive byte range of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Split `total` bytes into at most `chunks` contiguous ranges of at least
/// [`MIN_RANGE_SIZE`] bytes (except the last).
pub fn split_ranges(total: u64, chunks: usize) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }

    let parts = (chunks.max(1) as u64).min(total.div_ceil(MIN_RANGE_SIZE)).max(1);
    let part_size = total.div_ceil(parts);

    (0..parts)
        .map(|i| i * part_size)
        .take_while(|start| *start < total)
        .map(|start| ByteRange {
            start,
            end: (start + part_size).min(total) - 1,
        })
        .collect()
}

/// Exponential backoff delay before retry number `attempt` (1-based).
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    INITIAL_RETRY_DELAY
        .saturating_mul(factor)
        .min(MAX_RETRY_DELAY)
}

/// Shared state of one file transfer.
struct Transfer<'a> {
    url: &'a str,
    destination: &'a Path,
    received: AtomicU64,
    meter: RateMeter,
    throttle: Option<BandwidthThrottle>,
    on_progress: TransferProgressCallback<'a>,
    cancel: CancellationToken,
}

impl Transfer<'_> {
    fn advance(&self, bytes: u64) {
        let total = self.received.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.report(total);
    }

    fn rewind(&self, bytes: u64) {
        let total = self.received.fetch_sub(bytes, Ordering::AcqRel) - bytes;
        self.report(total);
    }

    fn report(&self, total: u64) {
        (self.on_progress)(TransferProgress {
            received_bytes: total,
            bytes_per_second: self.meter.record(total),
        });
    }

    fn write_error(&self, source: std::io::Error) -> TransferError {
        TransferError::Write {
            path: self.destination.to_path_buf(),
            source,
        }
    }
}

/// Patch transport over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    chunks: usize,
    attempts: u32,
    read_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from the manager configuration.
    pub fn new(config: &PatchManagerConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.read_timeout)
            .build()
            .map_err(|e| TransferError::Client(e.to_string()))?;

        Ok(Self {
            client,
            chunks: config.chunks_per_file.max(1),
            attempts: config.range_attempts.max(1),
            read_timeout: config.read_timeout,
        })
    }

    fn request_error(&self, url: &str, error: reqwest::Error) -> TransferError {
        if error.is_timeout() {
            TransferError::Timeout {
                url: url.to_string(),
                timeout_secs: self.read_timeout.as_secs(),
            }
        } else {
            TransferError::Http {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }

    fn timeout_error(&self, url: &str) -> TransferError {
        TransferError::Timeout {
            url: url.to_string(),
            timeout_secs: self.read_timeout.as_secs(),
        }
    }

    /// Size and range support of a URL. A failed `HEAD` is not fatal; the
    /// transfer falls back to a single stream.
    async fn query_file_info(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(Option<u64>, bool), TransferError> {
        let head = tokio::time::timeout(self.read_timeout, self.client.head(url).send());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = head => response,
        };

        let response = match response {
            Ok(Ok(response)) if response.status().is_success() => response,
            Ok(Ok(response)) => {
                debug!(url, status = %response.status(), "HEAD rejected, using single stream");
                return Ok((None, false));
            }
            Ok(Err(e)) => {
                debug!(url, error = %e, "HEAD failed, using single stream");
                return Ok((None, false));
            }
            Err(_) => {
                debug!(url, "HEAD timed out, using single stream");
                return Ok((None, false));
            }
        };

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let supports_range = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        Ok((size, supports_range))
    }

    async fn fetch_file(
        &self,
        request: TransferRequest<'_>,
        on_progress: TransferProgressCallback<'_>,
        cancel: CancellationToken,
    ) -> Result<u64, TransferError> {
        let (announced, supports_range) = self.query_file_info(request.url, &cancel).await?;

        if let Some(size) = announced {
            if size != request.expected_length {
                warn!(
                    url = request.url,
                    announced = size,
                    expected = request.expected_length,
                    "Server size differs from patch list"
                );
            }
        }

        let transfer = Transfer {
            url: request.url,
            destination: request.destination,
            received: AtomicU64::new(0),
            meter: RateMeter::new(),
            throttle: request.speed_limit.map(BandwidthThrottle::new),
            on_progress,
            cancel,
        };

        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| transfer.write_error(e))?;
        }

        let total = announced.unwrap_or(request.expected_length);
        let ranges = if supports_range {
            split_ranges(total, self.chunks)
        } else {
            Vec::new()
        };

        let written = if ranges.len() > 1 {
            let file = File::create(request.destination)
                .await
                .map_err(|e| transfer.write_error(e))?;
            file.set_len(total)
                .await
                .map_err(|e| transfer.write_error(e))?;
            drop(file);

            debug!(url = request.url, ranges = ranges.len(), total, "Fetching in ranges");

            try_join_all(
                ranges
                    .iter()
                    .map(|range| self.fetch_range(&transfer, Some(*range))),
            )
            .await?
            .into_iter()
            .sum()
        } else {
            self.fetch_range(&transfer, None).await?
        };

        if let Some(size) = announced {
            if written != size {
                return Err(TransferError::SizeMismatch {
                    url: request.url.to_string(),
                    expected: size,
                    actual: written,
                });
            }
        }

        Ok(written)
    }

    /// Fetch one range (or the whole body when `range` is `None`), retrying
    /// transient failures.
    async fn fetch_range(
        &self,
        transfer: &Transfer<'_>,
        range: Option<ByteRange>,
    ) -> Result<u64, TransferError> {
        let mut written = 0u64;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.stream_range(transfer, range, &mut written).await {
                Ok(()) => return Ok(written),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = retry_delay(attempt);
                    warn!(
                        url = transfer.url,
                        ?range,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transfer interrupted, retrying"
                    );

                    // Without ranges the body can only be fetched from the start.
                    if range.is_none() {
                        transfer.rewind(written);
                        written = 0;
                    }

                    tokio::select! {
                        biased;
                        _ = transfer.cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stream_range(
        &self,
        transfer: &Transfer<'_>,
        range: Option<ByteRange>,
        written: &mut u64,
    ) -> Result<(), TransferError> {
        let url = transfer.url;
        let mut request = self.client.get(url);
        let offset = range.map_or(0, |r| r.start) + *written;

        if let Some(range) = range {
            if offset > range.end {
                return Ok(());
            }
            request = request.header(RANGE, format!("bytes={}-{}", offset, range.end));
        }

        let response = tokio::select! {
            biased;
            _ = transfer.cancel.cancelled() => return Err(TransferError::Cancelled),
            response = tokio::time::timeout(self.read_timeout, request.send()) => response,
        };
        let response = response
            .map_err(|_| self.timeout_error(url))?
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        let accepted = match range {
            Some(_) => status == StatusCode::PARTIAL_CONTENT,
            None => status.is_success(),
        };
        if !accepted {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = match range {
            Some(_) => OpenOptions::new()
                .write(true)
                .open(transfer.destination)
                .await
                .map_err(|e| transfer.write_error(e))?,
            None => File::create(transfer.destination)
                .await
                .map_err(|e| transfer.write_error(e))?,
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| transfer.write_error(e))?;

        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = transfer.cancel.cancelled() => return Err(TransferError::Cancelled),
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };

            let Some(chunk) = next.map_err(|_| self.timeout_error(url))? else {
                break;
            };
            let chunk = chunk.map_err(|e| self.request_error(url, e))?;

            let mut data = &chunk[..];
            if let Some(range) = range {
                let remaining = (range.len() - *written) as usize;
                data = &data[..data.len().min(remaining)];
            }
            if data.is_empty() {
                continue;
            }

            file.write_all(data)
                .await
                .map_err(|e| transfer.write_error(e))?;

            let len = data.len() as u64;
            *written += len;
            transfer.advance(len);

            if let Some(throttle) = &transfer.throttle {
                tokio::select! {
                    biased;
                    _ = transfer.cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = throttle.consume(len) => {}
                }
            }
        }

        file.flush().await.map_err(|e| transfer.write_error(e))?;

        if let Some(range) = range {
            if *written < range.len() {
                return Err(TransferError::SizeMismatch {
                    url: url.to_string(),
                    expected: range.len(),
                    actual: *written,
                });
            }
        }

        Ok(())
    }
}

impl PatchTransport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        request: TransferRequest<'a>,
        on_progress: TransferProgressCallback<'a>,
        cancel: CancellationToken,
    ) -> TransferFuture<'a> {
        Box::pin(self.fetch_file(request, on_progress, cancel))
    }
}
