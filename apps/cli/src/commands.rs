//! CLI command implementations

use crate::output::{format_bytes, short_manifest_name};
use crate::OutputFormat;
use anyhow::{bail, Context, Result};
use console::style;
use iiifetch_core::{Harvester, HarvestError, PolicyRegistry};
use iiifetch_types::{Manifest, Settings, SizeConstraint};
use std::path::{Path, PathBuf};

// ============================================================================
// Download
// ============================================================================

pub struct DownloadArgs {
    pub urls: Vec<String>,
    pub file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub max_size: Option<u32>,
    pub min_size: Option<u32>,
    pub retries: Option<u32>,
    pub allow_truncation: bool,
    pub save_manifest: bool,
}

pub async fn download(args: DownloadArgs, format: OutputFormat) -> Result<()> {
    let mut urls = args.urls;
    if let Some(file) = &args.file {
        urls.extend(read_url_file(file)?);
    }
    if urls.is_empty() {
        bail!("no manifest URLs given (pass URLs or --file)");
    }

    let defaults = Settings::default();
    let settings = Settings {
        max_size: args.max_size.or(defaults.max_size),
        min_size: args.min_size,
        retry_attempts: args.retries.unwrap_or(defaults.retry_attempts),
        allow_truncation: args.allow_truncation,
        save_manifest: args.save_manifest,
        ..defaults
    };
    let constraint = SizeConstraint {
        max_width: settings.max_size,
        max_height: settings.max_size,
        min_width: settings.min_size,
        min_height: settings.min_size,
    };
    constraint
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid size constraint")?;

    let base_dir = args.output_dir.unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("img")
    });

    let harvester = Harvester::new(settings)?;

    // Ctrl-C stops the run between canvases; completed pages stay on
    // disk and a re-run picks up where it left off
    let token = harvester.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let progress_task = match format {
        OutputFormat::Human => {
            let mut events = harvester.subscribe();
            let progress = crate::progress::ManifestProgress::new();
            Some(tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    progress.handle_event(&event);
                }
            }))
        }
        OutputFormat::Json => None,
    };

    let mut reports = Vec::new();
    let mut manifest_failures = 0usize;
    let mut interrupted = false;

    for url in &urls {
        let dir = base_dir.join(manifest_dir_name(url));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        match harvester.harvest_url(url, &constraint, &dir).await {
            Ok(report) => {
                export_metadata(&report.manifest, &dir).await?;
                reports.push((url.clone(), dir, report));
            }
            Err(HarvestError::Cancelled) => {
                interrupted = true;
                break;
            }
            Err(e) => {
                tracing::error!(url, error = %e, "manifest failed");
                manifest_failures += 1;
            }
        }
    }

    // Close the event channel so the progress task drains and exits
    drop(harvester);
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    let page_failures: usize = reports.iter().map(|(_, _, r)| r.failed()).sum();

    match format {
        OutputFormat::Json => {
            let summary: Vec<_> = reports
                .iter()
                .map(|(url, dir, report)| {
                    serde_json::json!({
                        "url": url,
                        "directory": dir,
                        "pages": report.results.len(),
                        "completed": report.completed(),
                        "skipped": report.skipped(),
                        "failed": report.failed(),
                        "bytes": report.total_bytes(),
                        "license": report.manifest.license,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Human => {
            for (url, dir, report) in &reports {
                let mark = if report.all_succeeded() {
                    style("✓").green().bold()
                } else {
                    style("✗").red().bold()
                };
                println!(
                    "{} {} — {} pages ({} skipped, {} failed, {}) → {}",
                    mark,
                    style(short_manifest_name(url)).cyan(),
                    report.results.len(),
                    report.skipped(),
                    report.failed(),
                    format_bytes(report.total_bytes()),
                    dir.display()
                );
            }
        }
    }

    if interrupted {
        bail!("interrupted");
    }
    if manifest_failures > 0 || page_failures > 0 {
        bail!(
            "{} manifest(s) failed, {} page(s) failed",
            manifest_failures,
            page_failures
        );
    }
    Ok(())
}

/// One URL per line; blank lines and `#` comments are skipped
fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Directory name derived from the manifest URL: scheme and manifest
/// suffix dropped, everything non-filename-safe collapsed
fn manifest_dir_name(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .trim_end_matches("manifest.json")
        .trim_end_matches("manifest");

    let mut name = String::with_capacity(trimmed.len());
    let mut last_underscore = false;
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            name.push(c);
            last_underscore = false;
        } else if !last_underscore {
            name.push('_');
            last_underscore = true;
        }
    }
    let name = name.trim_matches(|c| c == '_' || c == '.').to_string();
    if name.is_empty() {
        "manifest".to_string()
    } else {
        name
    }
}

/// The caller-facing metadata export: license + metadata mapping
async fn export_metadata(manifest: &Manifest, dir: &Path) -> Result<()> {
    let doc = serde_json::json!({
        "url": manifest.url,
        "label": manifest.label,
        "license": manifest.license,
        "metadata": manifest.metadata,
    });
    tokio::fs::write(dir.join("metadata.json"), serde_json::to_vec_pretty(&doc)?)
        .await
        .context("failed to write metadata.json")?;
    Ok(())
}

// ============================================================================
// Probe
// ============================================================================

pub async fn probe(url: &str, format: OutputFormat) -> Result<()> {
    let harvester = Harvester::new(Settings::default())?;
    let manifest = harvester.fetch_manifest(url).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        OutputFormat::Human => {
            println!(
                "{} {}",
                style("Manifest:").bold(),
                manifest.label.as_deref().unwrap_or("(unlabelled)")
            );
            println!("  Version: {:?}", manifest.version);
            println!("  Pages:   {}", manifest.page_count());
            if let Some(license) = &manifest.license {
                println!("  License: {}", license);
            }
            if !manifest.metadata.is_empty() {
                println!("  Metadata:");
                for entry in &manifest.metadata {
                    println!("    {}: {}", style(&entry.label).dim(), entry.value);
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Policies
// ============================================================================

pub fn policies(format: OutputFormat) -> Result<()> {
    let registry = PolicyRegistry::builtin();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(registry.entries())?);
        }
        OutputFormat::Human => {
            for policy in registry.entries() {
                let rate = policy
                    .requests_per_minute
                    .map(|r| format!("{}/min", r))
                    .unwrap_or_else(|| "unlimited".to_string());
                let mut notes = Vec::new();
                if policy.size_required {
                    notes.push("size required");
                }
                if policy.known_truncation {
                    notes.push("truncation risk");
                }
                println!(
                    "{:<28} {:<10} {}",
                    style(&policy.host_pattern).cyan(),
                    rate,
                    notes.join(", ")
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_name_strips_scheme_and_manifest_suffix() {
        assert_eq!(
            manifest_dir_name("https://gallica.bnf.fr/iiif/ark:/12148/btv1b8449691v/manifest.json"),
            "gallica.bnf.fr_iiif_ark_12148_btv1b8449691v"
        );
        assert_eq!(
            manifest_dir_name("https://example.org/doc/manifest"),
            "example.org_doc"
        );
    }

    #[test]
    fn dir_name_never_comes_back_empty() {
        assert_eq!(manifest_dir_name("https://"), "manifest");
    }
}
