//! Image API URL resolution
//!
//! Turns one image service plus the caller's size constraint and the
//! institution's policy into a concrete Image API request URL. Never
//! fails on a well-formed service: when size metadata is missing the
//! resolver degrades to a safe fallback instead of erroring.
//!
//! All arithmetic is integer with floor rounding; servers that enforce
//! a hard maximum reject requests even one pixel above it.

use iiifetch_types::{ImageApiVersion, ImageService, InstitutionPolicy, SizeConstraint};

/// Fallback width when neither the constraint nor the settings provide
/// a maximum and a policy still demands an explicit size
pub const DEFAULT_MAX_WIDTH: u32 = 2500;

/// The size component of an Image API request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeParam {
    /// `full` (v1/v2) or `max` (v3)
    Unconstrained,
    /// `{w},` with the server preserving aspect ratio
    Width(u32),
    /// `,{h}`
    Height(u32),
    /// `{w},{h}`
    Exact(u32, u32),
}

impl SizeParam {
    fn render(self, version: ImageApiVersion) -> String {
        match self {
            SizeParam::Unconstrained => match version {
                ImageApiVersion::V3 => "max".to_string(),
                _ => "full".to_string(),
            },
            SizeParam::Width(w) => format!("{},", w),
            SizeParam::Height(h) => format!(",{}", h),
            SizeParam::Exact(w, h) => format!("{},{}", w, h),
        }
    }
}

/// Resolves Image API request URLs under size constraints
pub struct UrlResolver {
    /// Width injected when a policy requires an explicit size and
    /// nothing else provides one (the configured maximum size)
    default_width: u32,
}

impl UrlResolver {
    pub fn new(default_width: u32) -> Self {
        Self { default_width }
    }

    /// Compute the request URL for one service.
    pub fn resolve(
        &self,
        service: &ImageService,
        constraint: &SizeConstraint,
        policy: &InstitutionPolicy,
    ) -> String {
        let size = self.choose_size(service, constraint, policy);
        let quality = match service.api_version {
            ImageApiVersion::V1 => "native",
            _ => "default",
        };
        format!(
            "{}/full/{}/0/{}.{}",
            service.id,
            size.render(service.api_version),
            quality,
            extension(service)
        )
    }

    fn choose_size(
        &self,
        service: &ImageService,
        constraint: &SizeConstraint,
        policy: &InstitutionPolicy,
    ) -> SizeParam {
        // Registered sizes take precedence: a level-0 server may not
        // serve anything else
        if !service.sizes.is_empty() {
            let fits = |w: u32, h: u32| {
                constraint.max_width.map_or(true, |m| w <= m)
                    && constraint.max_height.map_or(true, |m| h <= m)
            };
            let chosen = service
                .sizes
                .iter()
                .filter(|s| fits(s.width, s.height))
                .max_by_key(|s| s.width as u64 * s.height as u64)
                .or_else(|| {
                    service
                        .sizes
                        .iter()
                        .min_by_key(|s| s.width as u64 * s.height as u64)
                });
            if let Some(size) = chosen {
                return SizeParam::Exact(size.width, size.height);
            }
        }

        if let (Some(width), Some(height)) = (service.width, service.height) {
            let (tw, th) = scale_to_constraint(width, height, constraint);
            if (tw, th) == (width, height) {
                // Native already fits; only an explicit-size policy
                // keeps us from the unconstrained token
                return if policy.size_required {
                    SizeParam::Exact(width, height)
                } else {
                    SizeParam::Unconstrained
                };
            }
            return SizeParam::Exact(tw, th);
        }

        // No size metadata at all
        if let Some(max_w) = constraint.max_width {
            SizeParam::Width(max_w)
        } else if let Some(max_h) = constraint.max_height {
            SizeParam::Height(max_h)
        } else if policy.size_required {
            SizeParam::Width(self.default_width)
        } else {
            SizeParam::Unconstrained
        }
    }
}

impl Default for UrlResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH)
    }
}

/// Output format: jpg unless the service explicitly excludes it
fn extension(service: &ImageService) -> &str {
    if service.formats.is_empty() || service.formats.iter().any(|f| f == "jpg" || f == "jpeg") {
        "jpg"
    } else {
        service.formats[0].as_str()
    }
}

/// Aspect-preserving fit of native dimensions into the constraint.
///
/// Scales down so neither dimension exceeds its max (width-limited
/// wins exact ties), then raises the scale when neither dimension
/// meets a requested min, still bounded by the max caps and the
/// native size. Never upscales.
fn scale_to_constraint(width: u32, height: u32, constraint: &SizeConstraint) -> (u32, u32) {
    let (tw, th) = fit_max(width, height, constraint);
    if meets_min(tw, th, constraint) {
        return (tw, th);
    }

    // Smallest raise that satisfies one min, preferring the width min
    let mut candidates: Vec<(u32, u32)> = Vec::new();
    if let Some(min_w) = constraint.min_width {
        let w = min_w.min(width);
        candidates.push((w, scale_dim(height, w, width)));
    }
    if let Some(min_h) = constraint.min_height {
        let h = min_h.min(height);
        candidates.push((scale_dim(width, h, height), h));
    }
    let raised = candidates
        .into_iter()
        .min_by_key(|(w, h)| *w as u64 * *h as u64)
        .unwrap_or((tw, th));

    // Max caps win over mins when the two conflict
    fit_max(raised.0, raised.1, constraint)
}

/// Scale down (only) so neither dimension exceeds its max
fn fit_max(width: u32, height: u32, constraint: &SizeConstraint) -> (u32, u32) {
    match (constraint.max_width, constraint.max_height) {
        (None, None) => (width, height),
        (Some(max_w), None) => {
            if width <= max_w {
                (width, height)
            } else {
                (max_w, scale_dim(height, max_w, width))
            }
        }
        (None, Some(max_h)) => {
            if height <= max_h {
                (width, height)
            } else {
                (scale_dim(width, max_h, height), max_h)
            }
        }
        (Some(max_w), Some(max_h)) => {
            if width <= max_w && height <= max_h {
                (width, height)
            } else if (max_w as u64) * (height as u64) <= (max_h as u64) * (width as u64) {
                // Width-limited (ties included)
                let w = max_w.min(width);
                (w, scale_dim(height, w, width))
            } else {
                let h = max_h.min(height);
                (scale_dim(width, h, height), h)
            }
        }
    }
}

/// `other * num / den` with floor rounding, at least 1px
fn scale_dim(other: u32, num: u32, den: u32) -> u32 {
    ((other as u64 * num as u64) / den as u64).max(1) as u32
}

fn meets_min(width: u32, height: u32, constraint: &SizeConstraint) -> bool {
    match (constraint.min_width, constraint.min_height) {
        (None, None) => true,
        (Some(mw), None) => width >= mw,
        (None, Some(mh)) => height >= mh,
        // At least one dimension has to satisfy its floor
        (Some(mw), Some(mh)) => width >= mw || height >= mh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iiifetch_types::ServiceSize;

    fn service(width: Option<u32>, height: Option<u32>) -> ImageService {
        ImageService {
            id: "https://iiif.example.org/image/f1r".to_string(),
            api_version: ImageApiVersion::V2,
            width,
            height,
            sizes: Vec::new(),
            features: Vec::new(),
            formats: Vec::new(),
        }
    }

    fn permissive() -> InstitutionPolicy {
        InstitutionPolicy::permissive()
    }

    fn size_required() -> InstitutionPolicy {
        InstitutionPolicy {
            host_pattern: "digi.vatlib.it".to_string(),
            requests_per_minute: None,
            size_required: true,
            known_truncation: false,
        }
    }

    #[test]
    fn native_larger_than_max_is_scaled_with_floor() {
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint {
            max_width: Some(1000),
            ..SizeConstraint::default()
        };
        let url = resolver.resolve(&service(Some(3000), Some(4000)), &constraint, &permissive());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/1000,1333/0/default.jpg"
        );
    }

    #[test]
    fn aspect_ratio_is_preserved_within_a_pixel() {
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint::max(1200);
        for (w, h) in [(3000u32, 4000u32), (4000, 3000), (1797, 2553), (5000, 700)] {
            let (tw, th) = scale_to_constraint(w, h, &constraint);
            assert!(tw <= 1200 && th <= 1200);
            // The dependent dimension is within one pixel of the exact
            // aspect-preserving value
            let exact_th = tw as f64 * h as f64 / w as f64;
            let exact_tw = th as f64 * w as f64 / h as f64;
            let off_by = (th as f64 - exact_th).abs().min((tw as f64 - exact_tw).abs());
            assert!(off_by <= 1.0, "{}x{} -> {}x{}", w, h, tw, th);
        }
    }

    #[test]
    fn native_within_max_requests_unconstrained() {
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint::max(5000);
        let url = resolver.resolve(&service(Some(3000), Some(4000)), &constraint, &permissive());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/full/0/default.jpg"
        );
    }

    #[test]
    fn size_required_policy_forces_explicit_dimensions() {
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint::max(5000);
        let url = resolver.resolve(
            &service(Some(3000), Some(4000)),
            &constraint,
            &size_required(),
        );
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/3000,4000/0/default.jpg"
        );
    }

    #[test]
    fn no_metadata_with_size_required_injects_default_width() {
        let resolver = UrlResolver::default();
        let url = resolver.resolve(&service(None, None), &SizeConstraint::unbounded(), &size_required());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/2500,/0/default.jpg"
        );
        assert!(!url.contains("full/full"));
    }

    #[test]
    fn no_metadata_without_constraint_requests_full() {
        let resolver = UrlResolver::default();
        let url = resolver.resolve(&service(None, None), &SizeConstraint::unbounded(), &permissive());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/full/0/default.jpg"
        );
    }

    #[test]
    fn no_metadata_with_max_uses_width_parameter() {
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint {
            max_width: Some(1800),
            ..SizeConstraint::default()
        };
        let url = resolver.resolve(&service(None, None), &constraint, &permissive());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/1800,/0/default.jpg"
        );
    }

    #[test]
    fn registered_sizes_pick_largest_qualifying() {
        let mut svc = service(Some(3000), Some(4000));
        svc.sizes = vec![
            ServiceSize { width: 150, height: 200 },
            ServiceSize { width: 600, height: 800 },
            ServiceSize { width: 1200, height: 1600 },
            ServiceSize { width: 3000, height: 4000 },
        ];
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint::max(2000);
        let url = resolver.resolve(&svc, &constraint, &permissive());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/1200,1600/0/default.jpg"
        );
    }

    #[test]
    fn registered_sizes_fall_back_to_smallest() {
        let mut svc = service(Some(3000), Some(4000));
        svc.sizes = vec![
            ServiceSize { width: 600, height: 800 },
            ServiceSize { width: 1200, height: 1600 },
        ];
        let resolver = UrlResolver::default();
        let constraint = SizeConstraint::max(500);
        let url = resolver.resolve(&svc, &constraint, &permissive());
        assert_eq!(
            url,
            "https://iiif.example.org/image/f1r/full/600,800/0/default.jpg"
        );
    }

    #[test]
    fn v3_uses_max_token_and_v1_native_quality() {
        let resolver = UrlResolver::default();

        let mut v3 = service(Some(800), Some(600));
        v3.api_version = ImageApiVersion::V3;
        let url = resolver.resolve(&v3, &SizeConstraint::unbounded(), &permissive());
        assert_eq!(url, "https://iiif.example.org/image/f1r/full/max/0/default.jpg");

        let mut v1 = service(Some(800), Some(600));
        v1.api_version = ImageApiVersion::V1;
        let url = resolver.resolve(&v1, &SizeConstraint::unbounded(), &permissive());
        assert_eq!(url, "https://iiif.example.org/image/f1r/full/full/0/native.jpg");
    }

    #[test]
    fn min_raises_scale_when_max_leaves_room() {
        // maxH binds first and leaves the width below its min; the
        // width min can still be met within the caps
        let constraint = SizeConstraint {
            max_width: Some(2000),
            max_height: Some(900),
            min_width: Some(1000),
            min_height: None,
        };
        // 3000x2000 -> height-limited gives (1350, 900): width fine.
        assert_eq!(scale_to_constraint(3000, 2000, &constraint), (1350, 900));

        // 1000x2000 -> height-limited gives (450, 900); min_width=600
        // requires raising, capped by max_height again.
        let constraint = SizeConstraint {
            max_width: Some(2000),
            max_height: Some(900),
            min_width: Some(600),
            min_height: None,
        };
        let (w, h) = scale_to_constraint(1000, 2000, &constraint);
        // Raised toward 600 wide, then max_height pulls it back; the
        // caps win over the min.
        assert!(h <= 900 && w <= 2000);
    }

    #[test]
    fn never_upscales_beyond_native() {
        let constraint = SizeConstraint {
            min_width: Some(5000),
            ..SizeConstraint::default()
        };
        assert_eq!(scale_to_constraint(3000, 4000, &constraint), (3000, 4000));
    }

    #[test]
    fn non_jpg_service_uses_declared_format() {
        let mut svc = service(None, None);
        svc.formats = vec!["png".to_string(), "webp".to_string()];
        let resolver = UrlResolver::default();
        let url = resolver.resolve(&svc, &SizeConstraint::unbounded(), &permissive());
        assert!(url.ends_with("/full/full/0/default.png"));
    }
}
