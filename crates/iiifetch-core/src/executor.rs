//! Download execution
//!
//! Fetches one resolved image URL under the institution's policy:
//! rate-gated, retried with exponential backoff, and only accepted
//! once the bytes decode as a complete image. Files are written to a
//! temporary path and renamed, so an interrupted run never leaves a
//! half-written image behind.

use crate::error::HarvestError;
use crate::fetch::Fetch;
use crate::rate_limit::HostGates;
use iiifetch_types::{DownloadOutcome, DownloadResult, InstitutionPolicy, Settings, SizeConstraint};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes rate-gated, verified downloads
pub struct DownloadExecutor {
    fetch: Arc<dyn Fetch>,
    gates: Arc<HostGates>,
    settings: Settings,
}

impl DownloadExecutor {
    pub fn new(fetch: Arc<dyn Fetch>, gates: Arc<HostGates>, settings: Settings) -> Self {
        Self {
            fetch,
            gates,
            settings,
        }
    }

    /// Download `url` to `dest` under `policy`.
    ///
    /// Failures are encoded in the result, never returned as errors: a
    /// canvas that cannot be fetched must not abort its siblings.
    pub async fn fetch_image(
        &self,
        url: &str,
        dest: &Path,
        policy: &InstitutionPolicy,
        constraint: &SizeConstraint,
    ) -> DownloadResult {
        if already_present(dest, constraint) {
            debug!(path = %dest.display(), "already downloaded, skipping");
            return DownloadResult {
                path: dest.to_path_buf(),
                url: url.to_string(),
                bytes: 0,
                attempts: 0,
                outcome: DownloadOutcome::AlreadyPresent,
            };
        }

        let host = host_of(url);
        let mut attempts = 0u32;
        let mut last_status: Option<u16> = None;

        while attempts < self.settings.retry_attempts {
            if attempts > 0 {
                tokio::time::sleep(self.backoff_delay(attempts - 1)).await;
            }
            self.gates.acquire(&host, policy).await;
            attempts += 1;

            match self.attempt(url).await {
                Ok(body) => {
                    let bytes = body.len() as u64;
                    if let Err(e) = persist(dest, &body).await {
                        warn!(url, error = %e, "failed to persist image");
                        return DownloadResult {
                            path: dest.to_path_buf(),
                            url: url.to_string(),
                            bytes: 0,
                            attempts,
                            outcome: DownloadOutcome::Failed { status: None },
                        };
                    }
                    return DownloadResult {
                        path: dest.to_path_buf(),
                        url: url.to_string(),
                        bytes,
                        attempts,
                        outcome: DownloadOutcome::Completed,
                    };
                }
                Err(e) => {
                    last_status = e.status().or(last_status);
                    if !e.is_retryable() {
                        warn!(url, attempts, error = %e, "download failed");
                        break;
                    }
                    warn!(url, attempt = attempts, error = %e, "retryable failure");
                }
            }
        }

        DownloadResult {
            path: dest.to_path_buf(),
            url: url.to_string(),
            bytes: 0,
            attempts,
            outcome: DownloadOutcome::Failed {
                status: last_status,
            },
        }
    }

    /// One request: status check, truncation check, decode check
    async fn attempt(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        let response = self.fetch.get(url).await?;

        if !response.is_success() {
            return Err(HarvestError::Http {
                status: response.status,
            });
        }

        if let Some(content_type) = &response.content_type {
            if !content_type.contains("image") {
                debug!(url, content_type, "unexpected content type");
            }
        }

        if let Some(expected) = response.content_length {
            let got = response.body.len() as u64;
            if got < expected && !self.settings.allow_truncation {
                return Err(HarvestError::Truncated { got, expected });
            }
        }

        let decoded = image::load_from_memory(&response.body)
            .map_err(|e| HarvestError::Integrity(e.to_string()))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(HarvestError::Integrity("zero-sized image".to_string()));
        }

        Ok(response.body)
    }

    /// `base * 2^attempt` plus up to one base of jitter, capped
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_base_delay;
        let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(10)));
        let jitter = base.mul_f64(rand::random::<f64>());
        (exp + jitter).min(self.settings.retry_max_delay)
    }
}

/// A file at `dest` that decodes to dimensions satisfying the
/// constraint makes the download idempotent: no request is issued.
fn already_present(dest: &Path, constraint: &SizeConstraint) -> bool {
    if !dest.exists() {
        return false;
    }
    // Sniff the format from the content: servers do not always honor
    // the extension the request asked for
    let Ok(reader) = image::ImageReader::open(dest).and_then(|r| r.with_guessed_format()) else {
        return false;
    };
    let Ok(img) = reader.decode() else {
        return false;
    };
    let (w, h) = (img.width(), img.height());

    let within_max = constraint.max_width.map_or(true, |m| w <= m)
        && constraint.max_height.map_or(true, |m| h <= m);
    let meets_min = match (constraint.min_width, constraint.min_height) {
        (None, None) => true,
        (Some(mw), None) => w >= mw,
        (None, Some(mh)) => h >= mh,
        (Some(mw), Some(mh)) => w >= mw || h >= mh,
    };
    within_max && meets_min
}

async fn persist(dest: &Path, body: &[u8]) -> Result<(), HarvestError> {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let tmp = dest.with_file_name(format!("{}.part", file_name));
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, dest).await?;
    Ok(())
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{ok_response, status_response, ScriptedFetcher};
    use crate::fetch::FetchResponse;
    use std::io::Cursor;

    const URL: &str = "https://iiif.example.org/image/f1r/full/1000,1333/0/default.jpg";

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 40, 40]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn fast_settings() -> Settings {
        Settings {
            retry_attempts: 3,
            retry_base_delay: Duration::ZERO,
            ..Settings::default()
        }
    }

    fn executor(fetcher: ScriptedFetcher, settings: Settings) -> (DownloadExecutor, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(fetcher);
        let executor = DownloadExecutor::new(
            fetcher.clone(),
            Arc::new(HostGates::new()),
            settings,
        );
        (executor, fetcher)
    }

    #[tokio::test]
    async fn successful_download_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        let body = png_bytes(4, 4);
        let (executor, fetcher) = executor(
            ScriptedFetcher::new().respond(URL, ok_response(body.clone(), "image/png")),
            fast_settings(),
        );

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &SizeConstraint::unbounded())
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Completed);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.bytes, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert_eq!(fetcher.request_count(), 1);
        // No stray temp file left behind
        assert!(!dir.path().join("0001.jpg.part").exists());
    }

    #[tokio::test]
    async fn persistent_503_exhausts_exactly_the_attempt_budget() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        let (executor, fetcher) = executor(
            ScriptedFetcher::new().fallback(status_response(503)),
            fast_settings(),
        );

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &SizeConstraint::unbounded())
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Failed { status: Some(503) });
        assert_eq!(result.attempts, 3);
        assert_eq!(fetcher.request_count(), 3);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn plain_404_fails_without_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        let (executor, fetcher) = executor(
            ScriptedFetcher::new().fallback(status_response(404)),
            fast_settings(),
        );

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &SizeConstraint::unbounded())
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Failed { status: Some(404) });
        assert_eq!(result.attempts, 1);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[tokio::test]
    async fn truncated_body_is_retried_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        let body = png_bytes(4, 4);
        let short = FetchResponse {
            status: 200,
            content_type: Some("image/png".to_string()),
            content_length: Some(body.len() as u64 + 16),
            body,
        };
        let (executor, fetcher) = executor(
            ScriptedFetcher::new().fallback(short),
            fast_settings(),
        );

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &SizeConstraint::unbounded())
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Failed { status: None });
        assert_eq!(fetcher.request_count(), 3);
    }

    #[tokio::test]
    async fn allow_truncation_accepts_short_but_decodable_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        let body = png_bytes(4, 4);
        let short = FetchResponse {
            status: 200,
            content_type: Some("image/png".to_string()),
            content_length: Some(body.len() as u64 + 16),
            body,
        };
        let settings = Settings {
            allow_truncation: true,
            ..fast_settings()
        };
        let (executor, _) = executor(ScriptedFetcher::new().fallback(short), settings);

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &SizeConstraint::unbounded())
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Completed);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn undecodable_bytes_are_retried_as_integrity_failures() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        let garbage = ok_response(b"<html>This is not an image</html>".to_vec(), "text/html");
        let (executor, fetcher) = executor(
            ScriptedFetcher::new().fallback(garbage),
            fast_settings(),
        );

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &SizeConstraint::unbounded())
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Failed { status: None });
        assert_eq!(fetcher.request_count(), 3);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn existing_correct_file_is_skipped_without_a_request() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        std::fs::write(&dest, png_bytes(100, 100)).unwrap();

        let (executor, fetcher) = executor(ScriptedFetcher::new(), fast_settings());
        let constraint = SizeConstraint::max(500);

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &constraint)
            .await;

        assert_eq!(result.outcome, DownloadOutcome::AlreadyPresent);
        assert_eq!(result.attempts, 0);
        assert_eq!(fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn oversized_existing_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0001.jpg");
        std::fs::write(&dest, png_bytes(100, 100)).unwrap();

        let replacement = png_bytes(50, 50);
        let (executor, fetcher) = executor(
            ScriptedFetcher::new().respond(URL, ok_response(replacement.clone(), "image/png")),
            fast_settings(),
        );
        let constraint = SizeConstraint::max(50);

        let result = executor
            .fetch_image(URL, &dest, &InstitutionPolicy::permissive(), &constraint)
            .await;

        assert_eq!(result.outcome, DownloadOutcome::Completed);
        assert_eq!(fetcher.request_count(), 1);
        assert_eq!(std::fs::read(&dest).unwrap(), replacement);
    }
}
