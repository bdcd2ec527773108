//! Progress bar utilities for manifest downloads

use crate::output::short_manifest_name;
use console::style;
use iiifetch_types::{DownloadOutcome, HarvestEvent};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;

/// One progress bar per manifest, keyed by manifest URL
pub struct ManifestProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ManifestProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle_event(&self, event: &HarvestEvent) {
        match event {
            HarvestEvent::ManifestStarted { url, pages } => {
                let pb = self.multi.add(ProgressBar::new(*pages as u64));
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} pages {msg}")
                        .unwrap()
                        .progress_chars("█▓▒░  "),
                );
                pb.set_message(short_manifest_name(url));
                self.bars.lock().unwrap().insert(url.clone(), pb);
            }

            HarvestEvent::PageCompleted {
                manifest_url,
                index,
                outcome,
                ..
            } => {
                let bars = self.bars.lock().unwrap();
                if let Some(pb) = bars.get(manifest_url) {
                    pb.inc(1);
                    if let DownloadOutcome::Failed { status } = outcome {
                        let status = status
                            .map(|s| format!("HTTP {}", s))
                            .unwrap_or_else(|| "error".to_string());
                        pb.set_message(format!(
                            "{} page {} failed ({})",
                            style("✗").red(),
                            index + 1,
                            status
                        ));
                    }
                }
            }

            HarvestEvent::ManifestCompleted {
                url,
                completed,
                skipped,
                failed,
            } => {
                let bars = self.bars.lock().unwrap();
                if let Some(pb) = bars.get(url) {
                    if *failed == 0 {
                        pb.finish_with_message(format!(
                            "{} {} downloaded, {} skipped",
                            style("✓").green().bold(),
                            completed,
                            skipped
                        ));
                    } else {
                        pb.abandon_with_message(format!(
                            "{} {} failed",
                            style("✗").red().bold(),
                            failed
                        ));
                    }
                }
            }
        }
    }
}

impl Default for ManifestProgress {
    fn default() -> Self {
        Self::new()
    }
}
