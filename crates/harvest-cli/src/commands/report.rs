//! Report command: coding time per bucket with a repository breakdown.
//!
//! Reads the stored aggregate rows of the requested period. The daemon
//! refreshes those rows with every saved session, so the report is current
//! as soon as a session has been saved.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use harvest_core::{AggregatedSession, Period};
use harvest_db::Database;
use serde::Serialize;

/// JSON report shape.
#[derive(Debug, Serialize)]
struct ReportJson<'a> {
    period: Period,
    total_time_ms: i64,
    buckets: &'a [AggregatedSession],
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    period: Period,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let buckets = load_buckets(db, period, limit)?;
    if json {
        let report = ReportJson {
            period,
            total_time_ms: buckets.iter().map(|b| b.total_time_ms).sum(),
            buckets: &buckets,
        };
        serde_json::to_writer_pretty(&mut *writer, &report)
            .context("failed to serialize report")?;
        writeln!(writer)?;
    } else {
        write!(writer, "{}", format_report(period, &buckets))?;
    }
    Ok(())
}

/// Loads the buckets for `period`, keeping only the most recent `limit`.
pub fn load_buckets(
    db: &Database,
    period: Period,
    limit: Option<usize>,
) -> Result<Vec<AggregatedSession>> {
    let mut buckets = db
        .list_aggregates(period)
        .with_context(|| format!("failed to load {period} aggregates"))?;
    if let Some(limit) = limit {
        let skip = buckets.len().saturating_sub(limit);
        buckets.drain(..skip);
    }
    Ok(buckets)
}

// ========== Formatting ==========

/// Formats milliseconds as `2h 15m` or `45m`.
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0m".to_string();
    }
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Ten-character bar. Anything under 5% of `max` still gets one block.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░".repeat(10);
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().clamp(0.0, 10.0) as usize
    };

    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

/// Renders the human-readable report.
pub fn format_report(period: Period, buckets: &[AggregatedSession]) -> String {
    let mut out = String::new();
    if buckets.is_empty() {
        out.push_str("No sessions recorded.\n");
        return out;
    }

    let _ = writeln!(out, "CODING TIME BY {}", period.as_str().to_uppercase());
    let _ = writeln!(out);

    let max = buckets.iter().map(|b| b.total_time_ms).max().unwrap_or(0);
    for bucket in buckets {
        let _ = writeln!(
            out,
            "{:<20}{:>8}  {}",
            bucket.bucket_label,
            format_duration(bucket.total_time_ms),
            progress_bar(bucket.total_time_ms, max)
        );

        let mut repositories: Vec<_> = bucket.repositories.iter().collect();
        repositories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (repository, ms) in repositories {
            let _ = writeln!(out, "  {:<18}{:>8}", repository, format_duration(*ms));
        }
    }

    let total: i64 = buckets.iter().map(|b| b.total_time_ms).sum();
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<20}{:>8}", "TOTAL", format_duration(total));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use chrono::{DateTime, Duration, Utc};
    use harvest_core::{File, FileMetadata, Session};
    use insta::assert_snapshot;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn bucket(label: &str, start: &str, repositories: &[(&str, i64)]) -> AggregatedSession {
        let repositories: BTreeMap<String, i64> = repositories
            .iter()
            .map(|(name, ms)| ((*name).to_string(), *ms))
            .collect();
        AggregatedSession {
            period: Period::Week,
            bucket_start: ts(start),
            bucket_label: label.to_string(),
            total_time_ms: repositories.values().sum(),
            repositories,
        }
    }

    fn session(started_at: &str, minutes: i64, repository: &str) -> Session {
        let start = ts(started_at);
        let mut session = Session::start("linux", "nvim", start);
        session.switch_to(File::open(
            format!("/src/{repository}/main.rs"),
            FileMetadata {
                name: "main.rs".to_string(),
                repository: repository.to_string(),
                filetype: "rs".to_string(),
            },
            start,
        ));
        session.finish(start + Duration::minutes(minutes));
        session
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0m");
        assert_eq!(format_duration(59_999), "0m");
        assert_eq!(format_duration(45 * 60_000), "45m");
        assert_eq!(format_duration(135 * 60_000), "2h 15m");
        assert_eq!(format_duration(-5), "0m");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(100, 100), "██████████");
        assert_eq!(progress_bar(50, 100), "█████░░░░░");
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(0, 100), "░░░░░░░░░░");
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
    }

    #[test]
    fn test_format_report_weeks() {
        let buckets = vec![
            bucket(
                "2024-W10",
                "2024-03-04T00:00:00Z",
                &[("api", 5_400_000), ("web", 2_700_000)],
            ),
            bucket("2024-W11", "2024-03-11T00:00:00Z", &[("api", 1_800_000)]),
        ];

        let output = format_report(Period::Week, &buckets);
        assert_snapshot!(output.trim_end(), @r"
CODING TIME BY WEEK

2024-W10              2h 15m  ██████████
  api                 1h 30m
  web                    45m
2024-W11                 30m  ██░░░░░░░░
  api                    30m

TOTAL                 2h 45m
");
    }

    #[test]
    fn test_format_report_empty() {
        assert_eq!(format_report(Period::Day, &[]), "No sessions recorded.\n");
    }

    #[test]
    fn test_run_reads_month_buckets() {
        let mut db = Database::open_in_memory().unwrap();
        for session in [
            session("2024-01-30T09:00:00Z", 60, "api"),
            session("2024-01-31T09:00:00Z", 30, "web"),
            session("2024-02-01T09:00:00Z", 15, "api"),
        ] {
            db.insert_session(&session).unwrap();
            db.refresh_buckets(session.started_at).unwrap();
        }

        let mut output = Vec::new();
        run(&mut output, &db, Period::Month, None, true).unwrap();
        let report: serde_json::Value = serde_json::from_slice(&output).unwrap();

        assert_eq!(report["period"], "month");
        assert_eq!(report["total_time_ms"], 105 * 60_000);
        let buckets = report["buckets"].as_array().unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0]["bucket_label"], "2024-01");
        assert_eq!(buckets[0]["total_time_ms"], 90 * 60_000);
        assert_eq!(buckets[0]["repositories"]["api"], 60 * 60_000);
        assert_eq!(buckets[0]["repositories"]["web"], 30 * 60_000);
        assert_eq!(buckets[1]["bucket_label"], "2024-02");
    }

    #[test]
    fn test_limit_keeps_most_recent_buckets() {
        let mut db = Database::open_in_memory().unwrap();
        for started_at in [
            "2024-03-01T09:00:00Z",
            "2024-03-02T09:00:00Z",
            "2024-03-03T09:00:00Z",
        ] {
            let session = session(started_at, 10, "api");
            db.insert_session(&session).unwrap();
            db.refresh_buckets(session.started_at).unwrap();
        }

        let buckets = load_buckets(&db, Period::Day, Some(2)).unwrap();
        let labels: Vec<_> = buckets.iter().map(|b| b.bucket_label.as_str()).collect();
        assert_eq!(labels, ["2024-03-02", "2024-03-03"]);
    }
}
