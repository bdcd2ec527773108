//! Output formatting utilities

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Compact display name for a manifest URL: host plus the last couple
/// of path segments
pub fn short_manifest_name(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let host = parsed.host_str().unwrap_or_default();
    let tail: Vec<&str> = parsed
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty() && *s != "manifest.json" && *s != "manifest")
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    match tail.last() {
        Some(last) => format!("{}/{}", host, last),
        None => host.to_string(),
    }
}
