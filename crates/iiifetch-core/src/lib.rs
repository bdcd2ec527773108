//! iiifetch Core - Manifest Harvesting Engine
//!
//! This crate turns IIIF Presentation API manifests (v2 and v3) into
//! local directories of page images. It parses heterogeneous manifest
//! shapes into one canonical model, negotiates image sizes per
//! institution, and downloads under per-host rate limits with retry
//! and integrity verification.

mod error;
mod executor;
pub mod fetch;
mod license;
pub mod manifest;
mod policy;
mod rate_limit;
mod resolver;

pub use error::*;
pub use executor::*;
pub use policy::*;
pub use rate_limit::*;
pub use resolver::*;

pub use fetch::{Fetch, FetchResponse, HttpFetcher};

use iiifetch_types::{
    DownloadOutcome, DownloadResult, HarvestEvent, Manifest, Settings, SizeConstraint,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Aggregate outcome of harvesting one manifest
#[derive(Debug, Clone)]
pub struct ManifestReport {
    pub manifest: Manifest,
    /// One result per canvas, in canvas order
    pub results: Vec<DownloadResult>,
}

impl ManifestReport {
    pub fn completed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == DownloadOutcome::Completed)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == DownloadOutcome::AlreadyPresent)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.results.iter().map(|r| r.bytes).sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.is_success())
    }
}

/// The manifest harvester.
///
/// Owns the fetch capability, the policy registry, the per-host rate
/// gates and the download executor; walks manifests canvas by canvas
/// in order. Canvases are independent: one failing download never
/// aborts its siblings, and a parse failure of one manifest never
/// aborts a batch.
pub struct Harvester {
    fetch: Arc<dyn Fetch>,
    registry: PolicyRegistry,
    resolver: UrlResolver,
    executor: DownloadExecutor,
    settings: Settings,
    event_tx: broadcast::Sender<HarvestEvent>,
    cancel: CancellationToken,
}

impl Harvester {
    /// Create a harvester backed by a real HTTP client
    pub fn new(settings: Settings) -> Result<Self, HarvestError> {
        let fetch = Arc::new(HttpFetcher::new(&settings.user_agent)?);
        Ok(Self::with_fetcher(settings, fetch))
    }

    /// Create a harvester with an injected fetch capability
    pub fn with_fetcher(settings: Settings, fetch: Arc<dyn Fetch>) -> Self {
        let gates = Arc::new(HostGates::new());
        let (event_tx, _) = broadcast::channel(256);
        let resolver = UrlResolver::new(settings.max_size.unwrap_or(DEFAULT_MAX_WIDTH));

        Self {
            executor: DownloadExecutor::new(Arc::clone(&fetch), gates, settings.clone()),
            fetch,
            registry: PolicyRegistry::builtin(),
            resolver,
            settings,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the builtin institution table
    pub fn with_registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<HarvestEvent> {
        self.event_tx.subscribe()
    }

    /// Token for interrupting a run between canvases
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch and parse a manifest without downloading anything
    pub async fn fetch_manifest(&self, url: &str) -> Result<Manifest, HarvestError> {
        let response = self.fetch.get(url).await?;
        if !response.is_success() {
            return Err(HarvestError::Http {
                status: response.status,
            });
        }
        manifest::parse(&response.body, url)
    }

    /// Fetch, parse and download one manifest into `target_dir`.
    ///
    /// The directory must already exist; its layout/naming is the
    /// caller's concern.
    pub async fn harvest_url(
        &self,
        url: &str,
        constraint: &SizeConstraint,
        target_dir: &Path,
    ) -> Result<ManifestReport, HarvestError> {
        constraint
            .validate()
            .map_err(HarvestError::Config)?;

        let response = self.fetch.get(url).await?;
        if !response.is_success() {
            return Err(HarvestError::Http {
                status: response.status,
            });
        }
        let manifest = manifest::parse(&response.body, url)?;

        if self.settings.save_manifest {
            tokio::fs::write(target_dir.join("manifest.json"), &response.body).await?;
        }

        let results = self.harvest(&manifest, constraint, target_dir).await?;
        Ok(ManifestReport { manifest, results })
    }

    /// Download every canvas of an already parsed manifest.
    ///
    /// Returns one result per canvas in canvas order. A canvas without
    /// a usable image service yields a failed result; everything else
    /// proceeds. Cancellation is honored between canvases.
    pub async fn harvest(
        &self,
        manifest: &Manifest,
        constraint: &SizeConstraint,
        target_dir: &Path,
    ) -> Result<Vec<DownloadResult>, HarvestError> {
        constraint
            .validate()
            .map_err(HarvestError::Config)?;

        info!(
            url = %manifest.url,
            pages = manifest.page_count(),
            "harvesting manifest"
        );
        let _ = self.event_tx.send(HarvestEvent::ManifestStarted {
            url: manifest.url.clone(),
            pages: manifest.page_count(),
        });

        let mut results = Vec::with_capacity(manifest.canvases.len());
        for canvas in &manifest.canvases {
            if self.cancel.is_cancelled() {
                warn!(url = %manifest.url, "harvest cancelled");
                return Err(HarvestError::Cancelled);
            }

            let result = match canvas.preferred_service() {
                Some(service) => {
                    let host = service.host().unwrap_or_default();
                    let policy = self.registry.lookup(&host);
                    let url = self.resolver.resolve(service, constraint, &policy);
                    let dest = target_dir.join(page_filename(canvas.index, &url));
                    self.executor
                        .fetch_image(&url, &dest, &policy, constraint)
                        .await
                }
                None => {
                    let err = HarvestError::ImageServiceUnsupported {
                        index: canvas.index,
                    };
                    warn!(url = %manifest.url, "{}", err);
                    DownloadResult {
                        path: target_dir.join(page_filename(canvas.index, "jpg")),
                        url: String::new(),
                        bytes: 0,
                        attempts: 0,
                        outcome: DownloadOutcome::Failed { status: None },
                    }
                }
            };

            let _ = self.event_tx.send(HarvestEvent::PageCompleted {
                manifest_url: manifest.url.clone(),
                index: canvas.index,
                outcome: result.outcome,
                attempts: result.attempts,
            });
            results.push(result);
        }

        let report_counts = |outcome: DownloadOutcome| {
            results.iter().filter(|r| r.outcome == outcome).count()
        };
        let completed = report_counts(DownloadOutcome::Completed);
        let skipped = report_counts(DownloadOutcome::AlreadyPresent);
        let failed = results.len() - completed - skipped;

        info!(
            url = %manifest.url,
            completed,
            skipped,
            failed,
            "manifest harvested"
        );
        let _ = self.event_tx.send(HarvestEvent::ManifestCompleted {
            url: manifest.url.clone(),
            completed,
            skipped,
            failed,
        });

        Ok(results)
    }
}

/// `0001.jpg`-style page name: 1-based, zero-padded, extension taken
/// from the resolved request URL
fn page_filename(index: usize, url_or_ext: &str) -> String {
    let ext = url_or_ext.rsplit('.').next().unwrap_or("jpg");
    format!("{:04}.{}", index + 1, ext)
}
