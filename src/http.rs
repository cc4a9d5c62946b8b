//! Typed HTTP fetcher: bounded-concurrency JSON GET and verified streaming
//! download, with retry and resume semantics per spec §4.2.

use crate::paths;
use beacon_core::{LauncherError, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const USER_AGENT: &str = concat!("beacon-launcher/", env!("CARGO_PKG_VERSION"));

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MS: [u64; 3] = [250, 1_000, 4_000];

static DOWNLOAD_SEMAPHORE: OnceLock<Arc<Semaphore>> = OnceLock::new();

/// The global download concurrency bound (default 8, per spec §5). Tests and
/// callers that need a different bound must call this before the first
/// `download()`.
pub fn download_semaphore() -> Arc<Semaphore> {
    DOWNLOAD_SEMAPHORE
        .get_or_init(|| Arc::new(Semaphore::new(8)))
        .clone()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .expect("failed to build reqwest client")
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

async fn request_with_retry(
    client: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response> {
    let mut last_err: Option<LauncherError> = None;

    for attempt in 0..MAX_ATTEMPTS {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) if is_retryable_status(resp.status()) => {
                log::warn!(
                    "retryable status {} from {} (attempt {}/{})",
                    resp.status(),
                    redact_url(url),
                    attempt + 1,
                    MAX_ATTEMPTS
                );
                last_err = Some(LauncherError::Network(format!(
                    "http {} from {}",
                    resp.status(),
                    redact_url(url)
                )));
            }
            Ok(resp) => {
                // 4xx other than 429 is terminal.
                return Err(LauncherError::Network(format!(
                    "http {} from {}",
                    resp.status(),
                    redact_url(url)
                )));
            }
            Err(e) => {
                log::warn!(
                    "transport error fetching {} (attempt {}/{}): {e}",
                    redact_url(url),
                    attempt + 1,
                    MAX_ATTEMPTS
                );
                last_err = Some(e.into());
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(BACKOFF_MS[attempt as usize])).await;
        }
    }

    Err(last_err.unwrap_or_else(|| LauncherError::Network(redact_url(url))))
}

/// Strips query parameters before an error message can surface a URL,
/// per spec §7 ("surfaced with the URL stripped of query secrets").
fn redact_url(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

pub async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    let resp = request_with_retry(&client(), url).await?;
    resp.json::<T>()
        .await
        .map_err(|e| LauncherError::Network(format!("invalid JSON from {}: {e}", redact_url(url))))
}

pub struct Expected<'a> {
    pub sha1: Option<&'a str>,
    pub size: Option<u64>,
}

/// Downloads `url` to `dest` through the global concurrency bound.
///
/// Idempotent: if `dest` already exists and matches `expected`, no network
/// request is made. Otherwise the body streams into `<dest>.tmp`, is hashed,
/// and is atomically renamed into place only on a match; a mismatch deletes
/// the temp file and returns `Checksum`.
pub async fn download(url: &str, dest: &Path, expected: Expected<'_>) -> Result<()> {
    download_cancellable(url, dest, expected, None).await
}

/// As [`download`], but also checked against `cancel_key`'s token (when one
/// exists) before the request is sent and between each streamed chunk, so a
/// cancellation mid-transfer doesn't wait for the whole file to land.
pub async fn download_cancellable(url: &str, dest: &Path, expected: Expected<'_>, cancel_key: Option<&str>) -> Result<()> {
    if let Some(key) = cancel_key {
        crate::cancellation::ensure_not_cancelled(key)?;
    }

    if dest.exists() {
        if matches_expected(dest, &expected)? {
            return Ok(());
        }
        // Partial/mismatched leftovers are discarded, never resumed mid-stream.
        let _ = std::fs::remove_file(dest);
    }

    let permit = download_semaphore()
        .acquire_owned()
        .await
        .map_err(|e| LauncherError::Internal(e.to_string()))?;

    let result = download_uncached(url, dest, &expected, cancel_key).await;
    drop(permit);
    result
}

fn matches_expected(dest: &Path, expected: &Expected<'_>) -> Result<bool> {
    if let Some(expected_size) = expected.size {
        let actual_size = std::fs::metadata(dest)?.len();
        if actual_size != expected_size {
            return Ok(false);
        }
    }
    if let Some(expected_sha1) = expected.sha1 {
        let actual = paths::sha1_file(dest)?;
        return Ok(actual.eq_ignore_ascii_case(expected_sha1));
    }
    Ok(true)
}

async fn download_uncached(url: &str, dest: &Path, expected: &Expected<'_>, cancel_key: Option<&str>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let resp = request_with_retry(&client(), url).await?;
    let tmp_path = dest.with_extension("tmp");

    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if let Some(key) = cancel_key {
            if crate::cancellation::is_cancelled(key) {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(LauncherError::Cancelled);
            }
        }
        let chunk = chunk.map_err(|e| LauncherError::Network(e.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Some(expected_sha1) = expected.sha1 {
        let actual = paths::sha1_file(&tmp_path)?;
        if !actual.eq_ignore_ascii_case(expected_sha1) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(LauncherError::Checksum {
                expected: expected_sha1.to_string(),
                actual,
            });
        }
    }

    tokio::fs::rename(&tmp_path, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_cancellable_rejects_before_any_network_io_once_cancelled() {
        let _guard = crate::cancellation::guard("http-cancel-test");
        crate::cancellation::cancel("http-cancel-test");

        let dest = std::env::temp_dir().join("beacon-download-cancelled-test.jar");
        let result = download_cancellable(
            "http://127.0.0.1:0/unreachable",
            &dest,
            Expected { sha1: None, size: None },
            Some("http-cancel-test"),
        )
        .await;

        assert!(matches!(result, Err(LauncherError::Cancelled)));
    }
}
