//! Scrape statistics and the console summary
//!
//! This module condenses a [`ScrapeOutcome`] into counts and prints them.

use crate::fetch::FailureKind;
use crate::scrape::{ScrapeOutcome, ScrapePhase};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Scrape statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeStatistics {
    /// Pages in the outcome, seed included
    pub total_pages: usize,

    /// Pages that settled successfully
    pub ok_pages: usize,

    /// Records contributed by all pages
    pub total_records: usize,

    /// Failed pages by failure kind
    pub failures_by_kind: BTreeMap<FailureKind, usize>,

    /// URLs of failed pages with their failure kind, in page order
    pub failed_urls: Vec<(String, FailureKind)>,

    pub fatal: bool,

    pub phase: ScrapePhase,
}

impl ScrapeStatistics {
    /// Computes statistics from a finished outcome
    pub fn from_outcome(outcome: &ScrapeOutcome) -> Self {
        let failed_urls = outcome
            .failures()
            .filter_map(|page| {
                page.status
                    .failure_kind()
                    .map(|kind| (page.url.clone(), kind))
            })
            .collect();

        Self {
            total_pages: outcome.page_count(),
            ok_pages: outcome.pages.iter().filter(|p| p.status.is_ok()).count(),
            total_records: outcome.record_count(),
            failures_by_kind: outcome.failure_counts(),
            failed_urls,
            fatal: outcome.is_fatal(),
            phase: outcome.phase,
        }
    }

    /// Share of pages that settled successfully, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_pages > 0 {
            (self.ok_pages as f64 / self.total_pages as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &ScrapeStatistics) {
    let stdout = std::io::stdout();
    if let Err(e) = write_statistics(&mut stdout.lock(), stats) {
        tracing::warn!("Failed to print statistics: {}", e);
    }
}

/// Writes the statistics summary to `out`
///
/// Used directly when stdout is reserved for streamed records.
pub fn write_statistics<W: Write>(out: &mut W, stats: &ScrapeStatistics) -> io::Result<()> {
    writeln!(out, "=== Scrape Statistics ===\n")?;

    writeln!(out, "Overview:")?;
    writeln!(out, "  Pages: {}", stats.total_pages)?;
    writeln!(out, "  Records: {}", stats.total_records)?;
    writeln!(out, "  Final phase: {}", stats.phase)?;
    writeln!(out)?;

    if stats.fatal {
        writeln!(out, "The seed page failed; no data could be collected.")?;
        writeln!(out)?;
    }

    if !stats.failures_by_kind.is_empty() {
        writeln!(out, "Failure Summary:")?;
        // Sort kinds by count (descending)
        let mut counts: Vec<_> = stats.failures_by_kind.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));

        for (kind, count) in counts {
            writeln!(out, "  {}: {}", kind, count)?;
        }
        writeln!(out)?;

        writeln!(out, "Failed Pages ({}):", stats.failed_urls.len())?;
        for (url, kind) in &stats.failed_urls {
            writeln!(out, "  - [{}] {}", kind, url)?;
        }
        writeln!(out)?;
    }

    writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} pages scraped successfully)",
        stats.success_rate(),
        stats.ok_pages,
        stats.total_pages
    )
}
