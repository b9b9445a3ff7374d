//! Time-bucketed aggregation of finished sessions.
//!
//! Raw sessions are reduced into day buckets first; weeks, months and years
//! are derived from the day buckets, never from raw sessions again.
//!
//! # Algorithm Summary
//!
//! 1. Truncate each session's `started_at` to UTC midnight. The whole session
//!    counts towards the day it started, even if it ran past midnight.
//! 2. Per bucket, sum session durations and per-repository file durations.
//! 3. For coarser periods, truncate each day bucket again (ISO week Monday,
//!    first of month, January 1st) and merge the sums.
//!
//! Every step is a sum keyed by bucket, so the result does not depend on the
//! order of the input and the two-level reduction equals a direct one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::types::ValidationError;

/// Granularity of an aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Self; 4] = [Self::Day, Self::Week, Self::Month, Self::Year];

    /// String representation for SQL storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            Self::Day => date,
            Self::Week => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            Self::Month => date.with_day(1).unwrap_or(date),
            Self::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }

    /// Start of the bucket that follows the one starting at `start`.
    pub fn bucket_end(self, start: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            Self::Day => start.checked_add_days(Days::new(1)),
            Self::Week => start.checked_add_days(Days::new(7)),
            Self::Month => start.checked_add_months(Months::new(1)),
            Self::Year => start.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Human-readable bucket label: `2024-03-07`, `2024-W10`, `2024-03`, `2024`.
    pub fn label(self, bucket_start: DateTime<Utc>) -> String {
        match self {
            Self::Day => bucket_start.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let week = bucket_start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => bucket_start.format("%Y-%m").to_string(),
            Self::Year => bucket_start.format("%Y").to_string(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(ValidationError::InvalidPeriod {
                value: s.to_string(),
            }),
        }
    }
}

/// Total coding time within one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSession {
    pub period: Period,
    pub bucket_start: DateTime<Utc>,
    pub bucket_label: String,
    pub total_time_ms: i64,
    /// Time per repository, summed over every file in the bucket.
    pub repositories: BTreeMap<String, i64>,
}

/// Running sums for a single bucket.
#[derive(Debug, Default)]
struct Totals {
    total_time_ms: i64,
    repositories: BTreeMap<String, i64>,
}

impl Totals {
    fn add<'a>(&mut self, total_ms: i64, repositories: impl IntoIterator<Item = (&'a String, i64)>) {
        self.total_time_ms += total_ms;
        for (repository, ms) in repositories {
            *self.repositories.entry(repository.clone()).or_insert(0) += ms;
        }
    }

    fn merge(&mut self, other: Self) {
        self.total_time_ms += other.total_time_ms;
        for (repository, ms) in other.repositories {
            *self.repositories.entry(repository).or_insert(0) += ms;
        }
    }
}

type Buckets = BTreeMap<DateTime<Utc>, Totals>;

fn merge_buckets(mut left: Buckets, right: Buckets) -> Buckets {
    for (start, totals) in right {
        left.entry(start).or_default().merge(totals);
    }
    left
}

fn into_aggregates(period: Period, buckets: Buckets) -> Vec<AggregatedSession> {
    // BTreeMap iteration keeps the output sorted by bucket start.
    buckets
        .into_iter()
        .map(|(bucket_start, totals)| AggregatedSession {
            period,
            bucket_start,
            bucket_label: period.label(bucket_start),
            total_time_ms: totals.total_time_ms,
            repositories: totals.repositories,
        })
        .collect()
}

/// Reduces raw sessions into one summary per UTC day, sorted by day.
pub fn aggregate_day(sessions: &[Session]) -> Vec<AggregatedSession> {
    let buckets = sessions
        .par_iter()
        .fold(Buckets::new, |mut buckets, session| {
            let repositories = session.repository_times();
            buckets
                .entry(Period::Day.truncate(session.started_at))
                .or_default()
                .add(
                    session.duration_ms,
                    repositories.iter().map(|(r, ms)| (r, *ms)),
                );
            buckets
        })
        .reduce(Buckets::new, merge_buckets);

    into_aggregates(Period::Day, buckets)
}

/// Re-reduces day summaries into `period` buckets, sorted by bucket start.
///
/// Inputs are truncated by their `bucket_start`, so passing anything finer
/// than `period` works; passing [`Period::Day`] regroups by day.
pub fn aggregate_higher(period: Period, days: &[AggregatedSession]) -> Vec<AggregatedSession> {
    let buckets = days
        .par_iter()
        .fold(Buckets::new, |mut buckets, day| {
            let repositories = day.repositories.iter().map(|(r, ms)| (r, *ms));
            buckets
                .entry(period.truncate(day.bucket_start))
                .or_default()
                .add(day.total_time_ms, repositories);
            buckets
        })
        .reduce(Buckets::new, merge_buckets);

    into_aggregates(period, buckets)
}

/// Aggregates raw sessions straight into `period` buckets via the day level.
pub fn summarize(period: Period, sessions: &[Session]) -> Vec<AggregatedSession> {
    let days = aggregate_day(sessions);
    match period {
        Period::Day => days,
        _ => aggregate_higher(period, &days),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use crate::metadata::FileMetadata;
    use crate::session::File;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    /// A finished session with one file per `(repository, minutes)` entry.
    fn session(started_at: DateTime<Utc>, files: &[(&str, i64)]) -> Session {
        let mut session = Session::start("linux", "nvim", started_at);
        let mut at = started_at;
        for (i, (repository, minutes)) in files.iter().enumerate() {
            session.switch_to(File::open(
                format!("/{repository}/file{i}.rs"),
                FileMetadata {
                    name: format!("file{i}.rs"),
                    repository: (*repository).to_string(),
                    filetype: "rs".to_string(),
                },
                at,
            ));
            at += Duration::minutes(*minutes);
        }
        session.finish(at);
        session
    }

    fn min(n: i64) -> i64 {
        n * 60_000
    }

    #[test]
    fn test_bucket_end() {
        let leap_day = ts(2024, 2, 29, 0, 0);
        assert_eq!(Period::Day.bucket_end(leap_day), ts(2024, 3, 1, 0, 0));
        assert_eq!(
            Period::Week.bucket_end(ts(2024, 12, 30, 0, 0)),
            ts(2025, 1, 6, 0, 0)
        );
        assert_eq!(
            Period::Month.bucket_end(ts(2024, 2, 1, 0, 0)),
            ts(2024, 3, 1, 0, 0)
        );
        assert_eq!(
            Period::Year.bucket_end(ts(2024, 1, 1, 0, 0)),
            ts(2025, 1, 1, 0, 0)
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_day(&[]).is_empty());
        assert!(aggregate_higher(Period::Month, &[]).is_empty());
    }

    #[test]
    fn test_sessions_on_same_day_are_summed() {
        let sessions = vec![
            session(ts(2024, 3, 7, 9, 0), &[("api", 30), ("web", 15)]),
            session(ts(2024, 3, 7, 14, 0), &[("api", 10)]),
            session(ts(2024, 3, 8, 10, 0), &[("web", 5)]),
        ];

        let days = aggregate_day(&sessions);
        assert_eq!(days.len(), 2);

        let first = &days[0];
        assert_eq!(first.period, Period::Day);
        assert_eq!(first.bucket_start, ts(2024, 3, 7, 0, 0));
        assert_eq!(first.bucket_label, "2024-03-07");
        assert_eq!(first.total_time_ms, min(55));
        assert_eq!(first.repositories["api"], min(40));
        assert_eq!(first.repositories["web"], min(15));

        assert_eq!(days[1].bucket_label, "2024-03-08");
        assert_eq!(days[1].total_time_ms, min(5));
    }

    #[test]
    fn test_session_past_midnight_counts_for_start_day() {
        let sessions = vec![session(ts(2024, 3, 7, 23, 30), &[("api", 90)])];

        let days = aggregate_day(&sessions);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].bucket_label, "2024-03-07");
        assert_eq!(days[0].total_time_ms, min(90));
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let sessions = vec![
            session(ts(2024, 1, 1, 8, 0), &[("a", 10)]),
            session(ts(2024, 1, 1, 9, 0), &[("b", 20), ("a", 5)]),
            session(ts(2024, 1, 3, 9, 0), &[("c", 7)]),
            session(ts(2024, 2, 1, 9, 0), &[("a", 1)]),
            session(ts(2024, 1, 3, 18, 0), &[("b", 3)]),
        ];
        let expected = aggregate_day(&sessions);

        let mut reversed = sessions.clone();
        reversed.reverse();
        assert_eq!(aggregate_day(&reversed), expected);

        let mut rotated = sessions.clone();
        rotated.rotate_left(2);
        assert_eq!(aggregate_day(&rotated), expected);

        let mut days = expected.clone();
        days.reverse();
        assert_eq!(
            aggregate_higher(Period::Month, &days),
            aggregate_higher(Period::Month, &expected)
        );
    }

    #[test]
    fn test_month_totals_match_raw_sessions() {
        let sessions = vec![
            session(ts(2024, 1, 31, 23, 0), &[("a", 120)]),
            session(ts(2024, 2, 1, 0, 30), &[("a", 10), ("b", 10)]),
            session(ts(2024, 2, 14, 12, 0), &[("b", 45)]),
            session(ts(2024, 2, 29, 22, 0), &[("c", 30)]),
            session(ts(2024, 3, 1, 1, 0), &[("c", 5)]),
        ];

        let months = aggregate_higher(Period::Month, &aggregate_day(&sessions));
        assert_eq!(months.len(), 3);

        for month in &months {
            let raw: i64 = sessions
                .iter()
                .filter(|s| Period::Month.truncate(s.started_at) == month.bucket_start)
                .map(|s| s.duration_ms)
                .sum();
            assert_eq!(month.total_time_ms, raw, "month {}", month.bucket_label);
        }

        let february = &months[1];
        assert_eq!(february.bucket_label, "2024-02");
        assert_eq!(february.bucket_start, ts(2024, 2, 1, 0, 0));
        assert_eq!(february.repositories["a"], min(10));
        assert_eq!(february.repositories["b"], min(55));
        assert_eq!(february.repositories["c"], min(30));
    }

    #[test]
    fn test_week_buckets_start_on_monday() {
        // Wednesday and the following Sunday share a week; Monday starts the next.
        let sessions = vec![
            session(ts(2024, 3, 6, 9, 0), &[("a", 10)]),
            session(ts(2024, 3, 10, 9, 0), &[("a", 20)]),
            session(ts(2024, 3, 11, 9, 0), &[("a", 30)]),
        ];

        let weeks = summarize(Period::Week, &sessions);
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].bucket_start, ts(2024, 3, 4, 0, 0));
        assert_eq!(weeks[0].bucket_label, "2024-W10");
        assert_eq!(weeks[0].total_time_ms, min(30));
        assert_eq!(weeks[1].bucket_start, ts(2024, 3, 11, 0, 0));
        assert_eq!(weeks[1].total_time_ms, min(30));
    }

    #[test]
    fn test_week_label_uses_iso_year() {
        let friday = ts(2021, 1, 1, 12, 0);
        let start = Period::Week.truncate(friday);
        assert_eq!(start, ts(2020, 12, 28, 0, 0));
        assert_eq!(Period::Week.label(start), "2020-W53");
    }

    #[test]
    fn test_year_buckets() {
        let sessions = vec![
            session(ts(2023, 12, 31, 9, 0), &[("a", 10)]),
            session(ts(2024, 1, 1, 9, 0), &[("a", 20)]),
            session(ts(2024, 7, 4, 9, 0), &[("b", 5)]),
        ];

        let years = summarize(Period::Year, &sessions);
        assert_eq!(years.len(), 2);
        assert_eq!(years[0].bucket_label, "2023");
        assert_eq!(years[1].bucket_label, "2024");
        assert_eq!(years[1].bucket_start, ts(2024, 1, 1, 0, 0));
        assert_eq!(years[1].total_time_ms, min(25));
        assert_eq!(years[1].repositories.len(), 2);
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let t = ts(2024, 5, 17, 13, 45);
        for period in Period::ALL {
            let start = period.truncate(t);
            assert_eq!(period.truncate(start), start, "{period}");
            assert!(start <= t);
        }
    }

    #[test]
    fn test_period_from_str() {
        assert_eq!("week".parse::<Period>().unwrap(), Period::Week);
        assert_eq!(Period::Month.to_string(), "month");
        assert!("fortnight".parse::<Period>().is_err());
    }
}
