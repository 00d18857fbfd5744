//! Task-maturity metrics.
//!
//! For every closed issue we derive two day counts: how punctually it
//! closed relative to its due date (`due - closed`, positive means early)
//! and how long it stayed open (`closed - created`). Per-project results
//! are cached through [`ExpiringCache`] so repeated invocations within the
//! cache window reuse the tracker queries, and the aggregate report is
//! written as JSON for the plot subcommand to render offline.

use crate::Result;
use crate::models::{Issue, Project};
use crate::storage::cache::ExpiringCache;
use crate::tracker::{IssueFilter, TrackerApi};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Default file name for the JSON report.
pub const REPORT_FILE: &str = "punctuality.json";

const HISTOGRAM_BINS: i64 = 10;
const HISTOGRAM_WIDTH: usize = 50;

/// Maturity numbers for one closed issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueMaturity {
    pub created_at: DateTime<Utc>,
    /// Days between due date and closure; positive means closed early.
    /// `None` when the issue had no due date.
    pub days_punctuality: Option<i64>,
    /// Days from creation to closure.
    pub days_spent: i64,
}

/// Per-issue maturity for one project, keyed by issue iid.
///
/// `None` marks issues the tracker listed as closed without a closure
/// timestamp; they are kept so the report can count them.
pub type ProjectMaturity = BTreeMap<String, Option<IssueMaturity>>;

/// Maturity for all analysed projects, keyed by project name.
pub type MaturityReport = BTreeMap<String, ProjectMaturity>;

/// Derive the maturity numbers for one issue, if it has closure data.
pub fn issue_maturity(issue: &Issue) -> Option<IssueMaturity> {
    let closed_at = issue.closed_at?;
    let days_punctuality = issue
        .due_date
        .map(|due| (due.and_time(NaiveTime::MIN).and_utc() - closed_at).num_days());
    Some(IssueMaturity {
        created_at: issue.created_at,
        days_punctuality,
        days_spent: (closed_at - issue.created_at).num_days(),
    })
}

/// Compute (or fetch from cache) the maturity map for one project.
pub fn project_maturity<T: TrackerApi>(
    tracker: &T,
    project: &Project,
    cache: &ExpiringCache,
) -> Result<ProjectMaturity> {
    if let Some(cached) = cache.fetch(&project.name)? {
        match serde_json::from_value(cached) {
            Ok(parsed) => {
                debug!("using cached maturity for {}", project.name);
                return Ok(parsed);
            }
            Err(e) => warn!("ignoring unreadable cache entry for {}: {e}", project.name),
        }
    }

    let filter = IssueFilter {
        state: Some("closed"),
        ..Default::default()
    };
    let issues = tracker.list_issues(project.id, &filter)?;
    let mut result = ProjectMaturity::new();
    for issue in &issues {
        result.insert(issue.iid.to_string(), issue_maturity(issue));
    }
    cache.store(&project.name, serde_json::to_value(&result)?)?;
    Ok(result)
}

/// Render the report as text histograms with summary statistics.
///
/// `days_in_past` keeps only issues created within that many days of `now`.
pub fn render_report(
    report: &MaturityReport,
    days_in_past: Option<i64>,
    now: DateTime<Utc>,
) -> String {
    let cutoff = days_in_past.map(|days| now - chrono::Duration::days(days));
    let mut punctuality = Vec::new();
    let mut spent = Vec::new();
    let mut without_due = 0usize;
    let mut without_closure = 0usize;
    let mut issue_count = 0usize;

    for issues in report.values() {
        for maturity in issues.values() {
            let Some(m) = maturity else {
                without_closure += 1;
                continue;
            };
            if let Some(cutoff) = cutoff {
                if m.created_at < cutoff {
                    continue;
                }
            }
            issue_count += 1;
            spent.push(m.days_spent);
            match m.days_punctuality {
                Some(days) => punctuality.push(days),
                None => without_due += 1,
            }
        }
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} project(s), {} closed issue(s) analysed",
        report.len(),
        issue_count
    );
    if let Some(days) = days_in_past {
        let _ = writeln!(out, "limited to issues created in the last {days} day(s)");
    }
    let _ = writeln!(out);
    render_section(&mut out, "Days of punctuality (due - closed)", &punctuality);
    let _ = writeln!(out);
    render_section(&mut out, "Days to close (closed - created)", &spent);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{without_due} issue(s) had no due date; {without_closure} had no closure timestamp"
    );
    out
}

fn render_section(out: &mut String, title: &str, values: &[i64]) {
    let _ = writeln!(out, "{title}");
    if values.is_empty() {
        let _ = writeln!(out, "  (no data)");
        return;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mean = sorted.iter().sum::<i64>() as f64 / sorted.len() as f64;
    let _ = writeln!(
        out,
        "  min {} / q1 {:.1} / median {:.1} / q3 {:.1} / max {}  (mean {:.1})",
        sorted[0],
        quantile(&sorted, 0.25),
        quantile(&sorted, 0.5),
        quantile(&sorted, 0.75),
        sorted[sorted.len() - 1],
        mean
    );

    let buckets = histogram(&sorted, HISTOGRAM_BINS);
    let peak = buckets.iter().map(|b| b.count).max().unwrap_or(1).max(1);
    for bucket in buckets {
        let bar_len = (bucket.count * HISTOGRAM_WIDTH).div_ceil(peak);
        let _ = writeln!(
            out,
            "  {:>6}..{:<6} | {:<width$} {}",
            bucket.lo,
            bucket.hi,
            "#".repeat(bar_len),
            bucket.count,
            width = HISTOGRAM_WIDTH
        );
    }
}

/// One histogram bucket covering `lo..=hi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub lo: i64,
    pub hi: i64,
    pub count: usize,
}

/// Bucket `values` into at most `bins` equal-width integer ranges.
pub fn histogram(values: &[i64], bins: i64) -> Vec<Bucket> {
    let (Some(&min), Some(&max)) = (values.iter().min(), values.iter().max()) else {
        return Vec::new();
    };
    let width = (max - min) / bins + 1;
    let bucket_count = ((max - min) / width + 1) as usize;
    let mut buckets: Vec<Bucket> = (0..bucket_count)
        .map(|i| {
            let lo = min + i as i64 * width;
            Bucket {
                lo,
                hi: lo + width - 1,
                count: 0,
            }
        })
        .collect();
    for &value in values {
        let index = ((value - min) / width) as usize;
        buckets[index].count += 1;
    }
    buckets
}

/// Linear-interpolated quantile of pre-sorted values.
fn quantile(sorted: &[i64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] as f64 * (1.0 - frac) + sorted[hi] as f64 * frac
}
