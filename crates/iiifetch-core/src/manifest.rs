//! IIIF Presentation API parsing
//!
//! Converts raw v2/v3 manifest JSON into the canonical model. The two
//! versions nest canvases and image services under different field
//! names (`sequences[].canvases[].images[].resource` vs
//! `items[].items[].items[].body`); both are normalized into the same
//! `Canvas`/`ImageService` shape here, one parse function per version
//! feeding one shared structure. Pure transformation, no I/O.

use crate::error::HarvestError;
use crate::license;
use iiifetch_types::{
    Canvas, ImageApiVersion, ImageService, Manifest, MetadataEntry, PresentationVersion,
    ServiceSize,
};
use serde_json::Value;

/// Metadata labels that carry rights information when no dedicated
/// license field is present
const LICENSE_LABELS: &[&str] = &[
    "license",
    "licence",
    "lizenz",
    "rights",
    "droits",
    "access",
    "copyright",
    "rechteinformationen",
    "conditions",
];

/// Parse a raw manifest document into the canonical model.
///
/// Fails when the JSON is malformed, matches neither Presentation API
/// version, or yields no canvases.
pub fn parse(raw: &[u8], source_url: &str) -> Result<Manifest, HarvestError> {
    let doc: Value = serde_json::from_slice(raw)
        .map_err(|e| parse_err(source_url, format!("invalid JSON: {}", e)))?;

    let version = detect_version(&doc)
        .ok_or_else(|| parse_err(source_url, "not a IIIF Presentation v2 or v3 manifest"))?;

    let canvases = match version {
        PresentationVersion::V2 => parse_v2_canvases(&doc),
        PresentationVersion::V3 => parse_v3_canvases(&doc),
    }
    .map_err(|reason| parse_err(source_url, reason))?;

    if canvases.is_empty() {
        return Err(parse_err(source_url, "manifest contains no canvases"));
    }

    let metadata = parse_metadata(&doc);
    let license = extract_license(&doc, &metadata);

    Ok(Manifest {
        url: source_url.to_string(),
        version,
        label: display_string(doc.get("label")),
        license,
        metadata,
        canvases,
    })
}

fn parse_err(url: &str, reason: impl Into<String>) -> HarvestError {
    HarvestError::ManifestParse {
        url: url.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// Version detection
// ============================================================================

fn detect_version(doc: &Value) -> Option<PresentationVersion> {
    if context_contains(doc, "presentation/3") {
        return Some(PresentationVersion::V3);
    }
    if context_contains(doc, "presentation/2") || context_contains(doc, "presentation/1") {
        return Some(PresentationVersion::V2);
    }

    // No usable @context; fall back on the structural discriminator
    let type_field = doc
        .get("type")
        .or_else(|| doc.get("@type"))
        .and_then(Value::as_str);
    match type_field {
        Some("sc:Manifest") => Some(PresentationVersion::V2),
        Some("Manifest") => Some(PresentationVersion::V3),
        _ if doc.get("sequences").is_some() => Some(PresentationVersion::V2),
        _ if doc.get("items").is_some() => Some(PresentationVersion::V3),
        _ => None,
    }
}

fn context_contains(doc: &Value, needle: &str) -> bool {
    match doc.get("@context") {
        Some(Value::String(s)) => s.contains(needle),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.contains(needle)),
        _ => false,
    }
}

// ============================================================================
// Canvas extraction
// ============================================================================

/// v2: canvases nested as `sequences[0].canvases[]`, each image
/// annotation holding its resource under `images[].resource`.
fn parse_v2_canvases(doc: &Value) -> Result<Vec<Canvas>, String> {
    let sequences = doc
        .get("sequences")
        .and_then(Value::as_array)
        .ok_or("missing sequences")?;
    let canvases = sequences
        .first()
        .and_then(|s| s.get("canvases"))
        .and_then(Value::as_array)
        .ok_or("missing sequences[0].canvases")?;

    Ok(canvases
        .iter()
        .enumerate()
        .map(|(index, canvas)| {
            let mut services = Vec::new();
            for image in array_of(canvas.get("images")) {
                if let Some(resource) = image.get("resource").or_else(|| image.get("body")) {
                    services.extend(services_from_resource(resource, None, None));
                }
            }
            Canvas {
                index,
                label: display_string(canvas.get("label")),
                services,
            }
        })
        .collect())
}

/// v3: canvases are top-level `items[]`; the image resource sits three
/// levels down at `items[].items[].items[].body`.
fn parse_v3_canvases(doc: &Value) -> Result<Vec<Canvas>, String> {
    let items = doc
        .get("items")
        .and_then(Value::as_array)
        .ok_or("missing items")?;

    Ok(items
        .iter()
        .filter(|item| {
            item.get("type")
                .and_then(Value::as_str)
                .map(|t| t == "Canvas")
                .unwrap_or(true)
        })
        .enumerate()
        .map(|(index, canvas)| {
            let canvas_width = dimension(canvas, "width");
            let canvas_height = dimension(canvas, "height");

            let mut services = Vec::new();
            for page in array_of(canvas.get("items")) {
                for annotation in array_of(page.get("items")) {
                    let Some(body) = annotation.get("body") else {
                        continue;
                    };
                    // A body may be a single resource or a list of
                    // alternatives
                    let bodies: Vec<&Value> = match body {
                        Value::Array(list) => list.iter().collect(),
                        other => vec![other],
                    };
                    for body in bodies {
                        services.extend(services_from_resource(
                            body,
                            canvas_width,
                            canvas_height,
                        ));
                    }
                }
            }
            Canvas {
                index,
                label: display_string(canvas.get("label")),
                services,
            }
        })
        .collect())
}

// ============================================================================
// Image services
// ============================================================================

/// Normalize every service advertised on an image resource.
///
/// The resource's own pixel dimensions (or the enclosing canvas's) fill
/// in for services that do not declare any.
fn services_from_resource(
    resource: &Value,
    fallback_width: Option<u32>,
    fallback_height: Option<u32>,
) -> Vec<ImageService> {
    let resource_width = dimension(resource, "width").or(fallback_width);
    let resource_height = dimension(resource, "height").or(fallback_height);

    let service_field = resource.get("service").or_else(|| resource.get("services"));
    let entries: Vec<&Value> = match service_field {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(other) if other.is_object() || other.is_string() => vec![other],
        _ => Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| {
            let id = clean_service_id(&id_of(entry)?);
            Some(ImageService {
                id,
                api_version: service_version(entry),
                width: dimension(entry, "width").or(resource_width),
                height: dimension(entry, "height").or(resource_height),
                sizes: parse_sizes(entry),
                features: parse_features(entry),
                formats: parse_formats(entry),
            })
        })
        .collect()
}

/// Infer the Image API version from `@context`, `type` or `profile`,
/// in that order. Defaults to v2, by far the most widely deployed.
fn service_version(service: &Value) -> ImageApiVersion {
    if context_contains(service, "/image/3") {
        return ImageApiVersion::V3;
    }
    if context_contains(service, "/image/2") {
        return ImageApiVersion::V2;
    }
    if context_contains(service, "/image/1") || context_contains(service, "image-api") {
        return ImageApiVersion::V1;
    }

    match service.get("type").or_else(|| service.get("@type")).and_then(Value::as_str) {
        Some("ImageService3") => return ImageApiVersion::V3,
        Some("ImageService2") => return ImageApiVersion::V2,
        Some("ImageService1") => return ImageApiVersion::V1,
        _ => {}
    }

    for profile in profile_strings(service) {
        if profile.contains("/image/3") {
            return ImageApiVersion::V3;
        }
        if profile.contains("/image/2") {
            return ImageApiVersion::V2;
        }
        if profile.contains("/image/1") || profile.contains("image-api") {
            return ImageApiVersion::V1;
        }
    }

    ImageApiVersion::V2
}

/// All string profiles on a service (`profile` may be a string or a
/// mixed array of strings and capability objects)
fn profile_strings(service: &Value) -> Vec<&str> {
    match service.get("profile") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn parse_sizes(service: &Value) -> Vec<ServiceSize> {
    array_of(service.get("sizes"))
        .iter()
        .filter_map(|size| {
            Some(ServiceSize {
                width: dimension(size, "width")?,
                height: dimension(size, "height")?,
            })
        })
        .collect()
}

/// Supported features: v2 lists them under `supports` inside the
/// profile's capability object, v3 under `extraFeatures`.
fn parse_features(service: &Value) -> Vec<String> {
    let mut features: Vec<String> = array_of(service.get("extraFeatures"))
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();

    if let Some(Value::Array(profile)) = service.get("profile") {
        for entry in profile.iter().filter(|e| e.is_object()) {
            features.extend(
                array_of(entry.get("supports"))
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from)),
            );
        }
    }
    features
}

fn parse_formats(service: &Value) -> Vec<String> {
    let mut formats: Vec<String> = array_of(service.get("preferredFormats"))
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();

    if let Some(Value::Array(profile)) = service.get("profile") {
        for entry in profile.iter().filter(|e| e.is_object()) {
            formats.extend(
                array_of(entry.get("formats"))
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from)),
            );
        }
    }
    formats
}

/// Reduce a service identifier to the bare base URL the Image API
/// request is built from
fn clean_service_id(id: &str) -> String {
    let id = id.trim();
    let id = id
        .strip_suffix("/full/full/0/default.jpg")
        .or_else(|| id.strip_suffix("/full/full/0/native.jpg"))
        .unwrap_or(id);
    let id = id.strip_suffix("/info.json").unwrap_or(id);
    id.trim_end_matches('/').to_string()
}

// ============================================================================
// Metadata
// ============================================================================

/// Flatten the manifest's metadata list.
///
/// Repeated labels are kept: a v3 entry valued in three languages
/// yields three entries under the same label.
fn parse_metadata(doc: &Value) -> Vec<MetadataEntry> {
    array_of(doc.get("metadata"))
        .iter()
        .filter_map(|metadatum| {
            let label = display_string(metadatum.get("label"))?;
            let values = all_strings(metadatum.get("value"));
            if values.is_empty() {
                return None;
            }
            Some(
                values
                    .into_iter()
                    .map(|value| MetadataEntry {
                        label: label.clone(),
                        value,
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .flatten()
        .collect()
}

fn extract_license(doc: &Value, metadata: &[MetadataEntry]) -> Option<String> {
    for field in ["license", "rights"] {
        if let Some(value) = doc.get(field) {
            if let Some(raw) = all_strings(Some(value)).into_iter().next() {
                if let Some(url) = license::normalize(&raw) {
                    return Some(url);
                }
            }
        }
    }

    for entry in metadata {
        let label = entry.label.to_lowercase();
        if LICENSE_LABELS.iter().any(|term| label.contains(term)) {
            if let Some(url) = license::normalize(&entry.value) {
                return Some(url);
            }
        }
    }

    let attribution = doc
        .get("attribution")
        .or_else(|| doc.get("requiredStatement").and_then(|s| s.get("value")));
    attribution
        .and_then(|value| all_strings(Some(value)).into_iter().next())
        .and_then(|raw| license::normalize(&raw))
}

// ============================================================================
// JSON helpers
// ============================================================================

fn array_of(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn dimension(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

/// Identifier of a resource/service: a plain string, the first element
/// of a list, or the `@id`/`id` of an object
fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(id_of),
        Value::Object(_) => value
            .get("@id")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

/// One display string from a label-like value, preferring English in
/// v3 language maps
fn display_string(value: Option<&Value>) -> Option<String> {
    let value = value?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(|item| match item {
            // v2 localized form: { "@language": "en", "@value": "..." }
            Value::Object(_) => {
                let lang = item
                    .get("@language")
                    .or_else(|| item.get("language"))
                    .and_then(Value::as_str);
                if lang == Some("en") || lang.is_none() {
                    display_string(item.get("@value").or_else(|| item.get("value")))
                } else {
                    None
                }
            }
            other => display_string(Some(other)),
        }),
        Value::Object(map) => {
            if let Some(v) = value.get("@value") {
                return display_string(Some(v));
            }
            for lang in ["en", "none"] {
                if let Some(v) = map.get(lang) {
                    return display_string(Some(v));
                }
            }
            map.values().next().and_then(|v| display_string(Some(v)))
        }
        _ => None,
    }
}

/// Every string reachable in a value, in document order; this is what
/// keeps repeated metadata values across languages
fn all_strings(value: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    collect_strings(value, &mut out);
    out
}

fn collect_strings(value: Option<&Value>, out: &mut Vec<String>) {
    let Some(value) = value else { return };
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => {
            for item in items {
                collect_strings(Some(item), out);
            }
        }
        Value::Object(map) => {
            if let Some(v) = value.get("@value") {
                collect_strings(Some(v), out);
            } else {
                for v in map.values() {
                    collect_strings(Some(v), out);
                }
            }
        }
        _ => {}
    }
}
