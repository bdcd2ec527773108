//! Shared types for iiifetch
//!
//! This crate contains the data structures shared between the core
//! harvesting engine and the CLI: the canonical manifest model, size
//! constraints, institution policies, download results and events.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Manifest Model
// ============================================================================

/// IIIF Presentation API version a manifest was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentationVersion {
    V2,
    V3,
}

/// IIIF Image API version advertised by an image service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImageApiVersion {
    V1,
    V2,
    V3,
}

/// One entry of a manifest's descriptive metadata.
///
/// Labels are not unique: a manifest may repeat a label per language and
/// every value is kept, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub label: String,
    pub value: String,
}

/// A size pre-registered by an image service in its `sizes` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSize {
    pub width: u32,
    pub height: u32,
}

/// One IIIF Image API endpoint serving a canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageService {
    /// Base identifier URL, with any trailing `/` or `/info.json` stripped
    pub id: String,
    pub api_version: ImageApiVersion,
    /// Native pixel dimensions, when the service declares them
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Registered sizes; empty for services that scale freely
    pub sizes: Vec<ServiceSize>,
    /// Supported features from the compliance profile (e.g. `sizeByW`)
    pub features: Vec<String>,
    /// Declared output formats; empty means the defaults apply
    pub formats: Vec<String>,
}

impl ImageService {
    /// Host component of the service identifier, used for policy lookup.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.id)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

/// One logical page of a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canvas {
    /// 0-based position, matching manifest order
    pub index: usize,
    pub label: Option<String>,
    /// All image services found on the canvas, in document order
    pub services: Vec<ImageService>,
}

impl Canvas {
    /// The service a download should target: highest Image API version,
    /// ties broken by document order.
    pub fn preferred_service(&self) -> Option<&ImageService> {
        self.services
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.api_version
                    .cmp(&b.api_version)
                    .then(ib.cmp(ia)) // earlier entry wins a version tie
            })
            .map(|(_, s)| s)
    }
}

/// Canonical in-memory representation of a IIIF manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Source URL the manifest was fetched from (its identity)
    pub url: String,
    pub version: PresentationVersion,
    pub label: Option<String>,
    /// Normalized license/rights URI, when one could be extracted
    pub license: Option<String>,
    pub metadata: Vec<MetadataEntry>,
    /// Never empty for a successfully parsed manifest
    pub canvases: Vec<Canvas>,
}

impl Manifest {
    pub fn page_count(&self) -> usize {
        self.canvases.len()
    }
}

// ============================================================================
// Size Constraints
// ============================================================================

/// Caller-requested bounds on downloaded image dimensions.
///
/// All bounds are optional; at most one dimension pair is normally
/// binding. Mins are best-effort (native size is never exceeded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeConstraint {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
}

impl SizeConstraint {
    /// Constraint bounding both dimensions to `max` pixels
    pub fn max(max: u32) -> Self {
        Self {
            max_width: Some(max),
            max_height: Some(max),
            ..Self::default()
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Reject impossible constraints before any network activity.
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.min_width, self.max_width) {
            if min > max {
                return Err(format!("min_width {} exceeds max_width {}", min, max));
            }
        }
        if let (Some(min), Some(max)) = (self.min_height, self.max_height) {
            if min > max {
                return Err(format!("min_height {} exceeds max_height {}", min, max));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Institution Policies
// ============================================================================

/// Operational quirks of one institution's IIIF servers.
///
/// Looked up by host, process-wide and read-only; never owned by a
/// manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionPolicy {
    /// Host suffix/substring this policy applies to
    pub host_pattern: String,
    /// Ceiling on requests per minute; unlimited if absent
    pub requests_per_minute: Option<u32>,
    /// Omitting explicit width/height makes the server reject or
    /// truncate the request
    pub size_required: bool,
    /// Responses are known to sometimes arrive short of Content-Length
    pub known_truncation: bool,
}

impl InstitutionPolicy {
    /// Permissive default for hosts with no registry entry
    pub fn permissive() -> Self {
        Self {
            host_pattern: String::new(),
            requests_per_minute: None,
            size_required: false,
            known_truncation: false,
        }
    }
}

// ============================================================================
// Download Results
// ============================================================================

/// Terminal classification of one page download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadOutcome {
    /// Fetched, verified and persisted
    Completed,
    /// A correctly sized file already existed; no request was issued
    AlreadyPresent,
    /// Retries exhausted or a fatal error; `status` is the last HTTP
    /// status observed, if any
    Failed { status: Option<u16> },
}

/// Result of downloading one canvas image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub path: PathBuf,
    /// The resolved Image API request URL
    pub url: String,
    /// Bytes written (0 when skipped or failed)
    pub bytes: u64,
    /// Attempts issued (0 when skipped)
    pub attempts: u32,
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            DownloadOutcome::Completed | DownloadOutcome::AlreadyPresent
        )
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default maximum dimension; also injected when a policy requires
    /// an explicit size and the service declares none
    pub max_size: Option<u32>,
    /// Default minimum dimension
    pub min_size: Option<u32>,
    /// Total attempts per image before recording a failure
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay: Duration,
    /// Backoff ceiling
    pub retry_max_delay: Duration,
    /// Accept responses shorter than their declared Content-Length as
    /// long as the bytes still decode
    pub allow_truncation: bool,
    /// Write the raw manifest JSON next to the images
    pub save_manifest: bool,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_size: Some(2500),
            min_size: Some(1000),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            allow_truncation: false,
            save_manifest: false,
            // Some institutions refuse requests without a browser agent
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:102.0) Gecko/20100101 Firefox/102.0"
                .to_string(),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Progress events emitted by the harvester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HarvestEvent {
    ManifestStarted {
        url: String,
        pages: usize,
    },
    PageCompleted {
        manifest_url: String,
        index: usize,
        outcome: DownloadOutcome,
        attempts: u32,
    },
    ManifestCompleted {
        url: String,
        completed: usize,
        skipped: usize,
        failed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(version: ImageApiVersion) -> ImageService {
        ImageService {
            id: format!("https://iiif.example.org/{:?}", version),
            api_version: version,
            width: None,
            height: None,
            sizes: Vec::new(),
            features: Vec::new(),
            formats: Vec::new(),
        }
    }

    #[test]
    fn preferred_service_picks_highest_version() {
        let canvas = Canvas {
            index: 0,
            label: None,
            services: vec![
                service(ImageApiVersion::V1),
                service(ImageApiVersion::V3),
                service(ImageApiVersion::V2),
            ],
        };
        assert_eq!(
            canvas.preferred_service().unwrap().api_version,
            ImageApiVersion::V3
        );
    }

    #[test]
    fn preferred_service_breaks_ties_by_order() {
        let mut first = service(ImageApiVersion::V2);
        first.id = "https://iiif.example.org/first".to_string();
        let mut second = service(ImageApiVersion::V2);
        second.id = "https://iiif.example.org/second".to_string();

        let canvas = Canvas {
            index: 0,
            label: None,
            services: vec![first, second],
        };
        assert_eq!(
            canvas.preferred_service().unwrap().id,
            "https://iiif.example.org/first"
        );
    }

    #[test]
    fn constraint_rejects_min_above_max() {
        let constraint = SizeConstraint {
            max_width: Some(1000),
            min_width: Some(2000),
            ..SizeConstraint::default()
        };
        assert!(constraint.validate().is_err());
        assert!(SizeConstraint::max(1000).validate().is_ok());
    }

    #[test]
    fn service_host_is_lowercased() {
        let mut svc = service(ImageApiVersion::V2);
        svc.id = "https://Gallica.BnF.fr/iiif/ark:/12148/btv1b8449691v/f29".to_string();
        assert_eq!(svc.host().as_deref(), Some("gallica.bnf.fr"));
    }
}
