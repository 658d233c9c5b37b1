//! Daily series reconstruction.
//!
//! Turns the raw, irregular snapshot history into exactly one row per
//! calendar day between the first and last provider dates. Cumulative
//! counters are carried forward across days with no observation; deltas,
//! the pending-processing ratio and a trailing mean are derived on top.

use std::collections::{BTreeMap, VecDeque};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Serialize, Serializer};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::logging::{self, obj, ProfileScope, Domain};
use crate::model::{parse_provider_date, Counters, Metric, RawSnapshot, SnapshotId};

/// Trailing window (days) for the processed-refund mean.
pub const ROLLING_WINDOW: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySeriesRow {
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_weekday")]
    pub weekday: Weekday,
    /// No snapshot exists for this provider date.
    pub interpolated: bool,
    /// Snapshot the row was read from.
    pub source_id: Option<SnapshotId>,
    pub collected_at: Option<DateTime<Utc>>,
    /// Forward-filled. `None` until the first known value.
    pub counters: Counters<Option<u64>>,
    pub daily: Counters<Option<i64>>,
    pub pending_processing_percentage: Option<f64>,
    pub daily_pending_processing_percentage: Option<f64>,
    pub rolling_daily_processed_refund: Option<f64>,
}

/// Fixed English day names, Monday first.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn serialize_weekday<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(weekday_name(*day))
}

/// `(collected_at, id)` decides freshness: a later collection wins, and among
/// equal (or unreadable) collection times the later insert wins.
fn is_fresher(candidate: &RawSnapshot, current: &RawSnapshot) -> bool {
    (candidate.collected_at, candidate.id) > (current.collected_at, current.id)
}

/// Freshest snapshot per provider day.
///
/// Snapshots are first grouped by their raw provider label, then labels are
/// placed on the calendar. Snapshots with no label, or a label that is not a
/// recognisable date, are dropped.
pub fn freshest_per_provider_day(snapshots: &[RawSnapshot]) -> BTreeMap<NaiveDate, &RawSnapshot> {
    let mut by_label: BTreeMap<&str, &RawSnapshot> = BTreeMap::new();
    let mut unlabeled = 0usize;
    for snap in snapshots {
        let Some(label) = snap.provider_last_updated_raw.as_deref() else {
            unlabeled += 1;
            continue;
        };
        if by_label.get(label).map_or(true, |current| is_fresher(snap, current)) {
            by_label.insert(label, snap);
        }
    }

    let mut by_day: BTreeMap<NaiveDate, &RawSnapshot> = BTreeMap::new();
    let mut unparsable = Vec::new();
    for (label, snap) in by_label {
        let Some(day) = parse_provider_date(label) else {
            unparsable.push(label);
            continue;
        };
        if by_day.get(&day).map_or(true, |current| is_fresher(snap, current)) {
            by_day.insert(day, snap);
        }
    }

    if !unparsable.is_empty() {
        logging::warn(
            Domain::Series,
            "unparsable_provider_dates",
            obj(&[("count", json!(unparsable.len())), ("labels", json!(unparsable))]),
        );
    }
    logging::debug(
        Domain::Series,
        "dedup",
        obj(&[
            ("snapshots", json!(snapshots.len())),
            ("unlabeled", json!(unlabeled)),
            ("provider_days", json!(by_day.len())),
        ]),
    );
    by_day
}

/// Rebuild the daily series from the full snapshot history.
///
/// Empty when no snapshot carries a usable provider date.
pub fn reconstruct(snapshots: &[RawSnapshot]) -> Vec<DailySeriesRow> {
    let _profile = ProfileScope::with_context("reconstruct", &[("snapshots", json!(snapshots.len()))]);

    let by_day = freshest_per_provider_day(snapshots);
    let (Some(&first), Some(&last)) = (by_day.keys().next(), by_day.keys().next_back()) else {
        return Vec::new();
    };

    let mut rows: Vec<DailySeriesRow> = Vec::new();
    let mut carried: Counters<Option<u64>> = Counters::default();
    for date in first.iter_days().take_while(|d| *d <= last) {
        let observed = by_day.get(&date).copied();
        if let Some(snap) = observed {
            // An unknown cell brings no new information and keeps the carry.
            let next = Counters::from_fn(|m| snap.counters.get(m).or(carried.get(m)));
            carried = next;
        }
        rows.push(DailySeriesRow {
            date,
            weekday: chrono::Datelike::weekday(&date),
            interpolated: observed.is_none(),
            source_id: observed.map(|s| s.id),
            collected_at: observed.and_then(|s| s.collected_at),
            counters: carried,
            daily: Counters::default(),
            pending_processing_percentage: None,
            daily_pending_processing_percentage: None,
            rolling_daily_processed_refund: None,
        });
    }

    derive_columns(&mut rows);

    logging::info(
        Domain::Series,
        "reconstructed",
        obj(&[
            ("days", json!(rows.len())),
            ("interpolated", json!(rows.iter().filter(|r| r.interpolated).count())),
            ("first", json!(first.to_string())),
            ("last", json!(last.to_string())),
        ]),
    );
    rows
}

fn derive_columns(rows: &mut [DailySeriesRow]) {
    let mut rolling = TrailingMean::new(ROLLING_WINDOW);
    let mut prev: Option<(Counters<Option<u64>>, Option<f64>)> = None;

    for row in rows.iter_mut() {
        let pct = pending_ratio(row.counters.e_verified_returns, row.counters.total_processed_refund);
        row.pending_processing_percentage = pct;

        match prev {
            None => {
                row.daily = Counters::from_fn(|_| Some(0));
                row.daily_pending_processing_percentage = Some(0.0);
            }
            Some((prev_counters, prev_pct)) => {
                row.daily = Counters::from_fn(|m| delta(row.counters.get(m), prev_counters.get(m)));
                row.daily_pending_processing_percentage = match (pct, prev_pct) {
                    (Some(cur), Some(before)) => Some(cur - before),
                    _ => None,
                };
            }
        }

        row.rolling_daily_processed_refund = rolling.update(row.daily.total_processed_refund.map(|d| d as f64));
        prev = Some((row.counters, pct));
    }
}

fn delta(cur: Option<u64>, prev: Option<u64>) -> Option<i64> {
    i64::try_from(i128::from(cur?) - i128::from(prev?)).ok()
}

/// `(e_verified - processed) / e_verified`, zero when nothing is verified.
pub fn pending_ratio(e_verified: Option<u64>, processed: Option<u64>) -> Option<f64> {
    let (e, p) = (e_verified?, processed?);
    if e == 0 {
        Some(0.0)
    } else {
        Some((e as f64 - p as f64) / e as f64)
    }
}

/// Mean over the last `period` samples, shrinking at the start of the
/// series. Unknown samples occupy a slot but do not count toward the mean.
#[derive(Debug, Clone)]
struct TrailingMean {
    window: VecDeque<Option<f64>>,
    period: usize,
}

impl TrailingMean {
    fn new(period: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(period),
            period: period.max(1),
        }
    }

    fn update(&mut self, value: Option<f64>) -> Option<f64> {
        self.window.push_back(value);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        self.get()
    }

    fn get(&self) -> Option<f64> {
        let known: Vec<f64> = self.window.iter().flatten().copied().collect();
        if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f64>() / known.len() as f64)
        }
    }
}

// =============================================================================
// Key figures and summary
// =============================================================================

/// Latest provider day and its change since the previous observed day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFigures {
    pub provider_date: NaiveDate,
    pub collected_at: Option<DateTime<Utc>>,
    pub values: Counters<Option<u64>>,
    pub previous_date: Option<NaiveDate>,
    /// `None` when there is no earlier observed day.
    pub deltas: Counters<Option<i64>>,
}

pub fn key_figures(rows: &[DailySeriesRow]) -> Option<KeyFigures> {
    let (last, earlier) = rows.split_last()?;
    let previous = earlier.iter().rev().find(|r| !r.interpolated);
    Some(KeyFigures {
        provider_date: last.date,
        collected_at: last.collected_at,
        values: last.counters,
        previous_date: previous.map(|p| p.date),
        deltas: Counters::from_fn(|m| previous.and_then(|p| delta(last.counters.get(m), p.counters.get(m)))),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    pub days: usize,
    pub observed_days: usize,
    pub interpolated_days: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub fingerprint: String,
}

pub fn summarize(rows: &[DailySeriesRow]) -> Result<SeriesSummary> {
    let interpolated_days = rows.iter().filter(|r| r.interpolated).count();
    Ok(SeriesSummary {
        days: rows.len(),
        observed_days: rows.len() - interpolated_days,
        interpolated_days,
        first_date: rows.first().map(|r| r.date),
        last_date: rows.last().map(|r| r.date),
        fingerprint: fingerprint(rows)?,
    })
}

/// SHA-256 of the canonical JSON form of the series.
pub fn fingerprint(rows: &[DailySeriesRow]) -> Result<String> {
    let bytes = serde_json::to_vec(rows)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Cumulative value of `metric` on every row, for charting.
pub fn column(rows: &[DailySeriesRow], metric: Metric) -> Vec<Option<u64>> {
    rows.iter().map(|r| r.counters.get(metric)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn counters(v: [Option<u64>; 4]) -> Counters<Option<u64>> {
        Counters::from_fn(|m| v[m.index()])
    }

    fn snap(id: i64, provider: Option<&str>, hour: u32, verified: u64, processed: u64) -> RawSnapshot {
        RawSnapshot {
            id,
            counters: counters([Some(1000), Some(verified), Some(500), Some(processed)]),
            provider_last_updated_raw: provider.map(str::to_string),
            collected_at: Some(Utc.with_ymd_and_hms(2024, 2, 1, hour, 0, 0).unwrap()),
            collected_date: "2024-02-01".to_string(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn empty_input_gives_empty_series() {
        assert!(reconstruct(&[]).is_empty());
        assert!(reconstruct(&[snap(1, None, 1, 10, 5)]).is_empty());
        assert!(key_figures(&[]).is_none());
    }

    #[test]
    fn gap_is_forward_filled_and_flagged() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-01"), 1, 1000, 100),
            snap(2, Some("2024-01-03"), 2, 1000, 130),
        ]);
        assert_eq!(rows.len(), 3);
        let mid = &rows[1];
        assert_eq!(mid.date, date("2024-01-02"));
        assert!(mid.interpolated);
        assert_eq!(mid.source_id, None);
        assert_eq!(mid.counters.total_processed_refund, Some(100));
        assert_eq!(mid.daily.total_processed_refund, Some(0));
        assert_eq!(rows[2].counters.total_processed_refund, Some(130));
        assert_eq!(rows[2].daily.total_processed_refund, Some(30));
        assert!(!rows[0].interpolated && !rows[2].interpolated);
    }

    #[test]
    fn one_row_per_day_in_order_without_duplicates() {
        let rows = reconstruct(&[
            snap(1, Some("2024-03-10"), 1, 10, 1),
            snap(2, Some("2024-02-27"), 1, 10, 1),
            snap(3, Some("2024-03-01"), 1, 10, 1),
            snap(4, Some("2024-03-01"), 2, 10, 2),
        ]);
        // 2024 is a leap year: Feb 27..Mar 10 inclusive
        assert_eq!(rows.len(), 13);
        assert_eq!(rows[0].date, date("2024-02-27"));
        assert_eq!(rows[12].date, date("2024-03-10"));
        for pair in rows.windows(2) {
            assert_eq!(pair[0].date.succ_opt(), Some(pair[1].date));
        }
    }

    #[test]
    fn later_collection_wins_within_a_provider_day() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-05"), 9, 1000, 200),
            snap(2, Some("2024-01-05"), 7, 1000, 150),
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_id, Some(1));
        assert_eq!(rows[0].counters.total_processed_refund, Some(200));
    }

    #[test]
    fn equal_collection_times_break_ties_by_insertion() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-05"), 9, 1000, 200),
            snap(2, Some("2024-01-05"), 9, 1000, 210),
        ]);
        assert_eq!(rows[0].source_id, Some(2));
    }

    #[test]
    fn labels_naming_the_same_day_collapse() {
        let rows = reconstruct(&[
            snap(1, Some("05-Jan-2024"), 10, 1000, 200),
            snap(2, Some("2024-01-05 18:00:00"), 8, 1000, 190),
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_id, Some(1));
    }

    #[test]
    fn unparsable_labels_are_excluded() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-05"), 1, 1000, 200),
            snap(2, Some("whenever"), 2, 1000, 999),
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counters.total_processed_refund, Some(200));
    }

    #[test]
    fn unknown_cells_carry_previous_value() {
        let mut second = snap(2, Some("2024-01-02"), 1, 1100, 150);
        second.counters.total_processed_refund = None;
        let rows = reconstruct(&[snap(1, Some("2024-01-01"), 1, 1000, 100), second]);
        assert_eq!(rows[1].counters.total_processed_refund, Some(100));
        assert_eq!(rows[1].daily.total_processed_refund, Some(0));
        assert_eq!(rows[1].counters.e_verified_returns, Some(1100));
        assert!(!rows[1].interpolated);
    }

    #[test]
    fn counter_without_prior_value_stays_unknown() {
        let mut first = snap(1, Some("2024-01-01"), 1, 1000, 100);
        first.counters.indv_reg_users = None;
        let rows = reconstruct(&[first, snap(2, Some("2024-01-03"), 1, 1000, 100)]);
        assert_eq!(rows[0].counters.indv_reg_users, None);
        assert_eq!(rows[1].counters.indv_reg_users, None);
        assert_eq!(rows[1].daily.indv_reg_users, None);
        assert_eq!(rows[2].counters.indv_reg_users, Some(1000));
        // first-row deltas are zero regardless
        assert_eq!(rows[0].daily.indv_reg_users, Some(0));
    }

    #[test]
    fn deltas_reconcile_with_cumulative_values() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-01"), 1, 1000, 100),
            snap(2, Some("2024-01-02"), 1, 1200, 90),
            snap(3, Some("2024-01-05"), 1, 1500, 400),
        ]);
        for m in Metric::ALL {
            assert_eq!(rows[0].daily.get(m), Some(0));
        }
        for pair in rows.windows(2) {
            for m in Metric::ALL {
                let before = pair[0].counters.get(m).unwrap() as i64;
                let after = pair[1].counters.get(m).unwrap() as i64;
                assert_eq!(before + pair[1].daily.get(m).unwrap(), after);
            }
        }
        // counters may move backwards; deltas go negative rather than clamp
        assert_eq!(rows[1].daily.total_processed_refund, Some(-10));
    }

    #[test]
    fn pending_ratio_guards_zero_verified() {
        assert_eq!(pending_ratio(Some(0), Some(10)), Some(0.0));
        assert_eq!(pending_ratio(Some(200), Some(50)), Some(0.75));
        assert_eq!(pending_ratio(None, Some(1)), None);

        let rows = reconstruct(&[
            snap(1, Some("2024-01-01"), 1, 0, 0),
            snap(2, Some("2024-01-02"), 1, 400, 100),
        ]);
        assert_eq!(rows[0].pending_processing_percentage, Some(0.0));
        assert_eq!(rows[0].daily_pending_processing_percentage, Some(0.0));
        assert_eq!(rows[1].pending_processing_percentage, Some(0.75));
        assert_eq!(rows[1].daily_pending_processing_percentage, Some(0.75));
    }

    #[test]
    fn rolling_mean_uses_available_window() {
        let processed = [100u64, 110, 130, 130, 170, 200, 260, 300, 310];
        let snaps: Vec<RawSnapshot> = processed
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let label = format!("2024-01-{:02}", i + 1);
                snap(i as i64 + 1, Some(&label), 1, 10_000, *p)
            })
            .collect();
        let rows = reconstruct(&snaps);
        let daily: Vec<f64> = rows
            .iter()
            .map(|r| r.daily.total_processed_refund.unwrap() as f64)
            .collect();

        assert_eq!(rows[0].rolling_daily_processed_refund, Some(0.0));
        for i in 0..rows.len() {
            let lo = i.saturating_sub(ROLLING_WINDOW - 1);
            let window = &daily[lo..=i];
            let want = window.iter().sum::<f64>() / window.len() as f64;
            let got = rows[i].rolling_daily_processed_refund.unwrap();
            assert!((got - want).abs() < 1e-9, "row {i}: {got} vs {want}");
        }
    }

    #[test]
    fn weekday_follows_provider_date() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-01"), 1, 10, 1),
            snap(2, Some("2024-01-07"), 1, 10, 1),
        ]);
        assert_eq!(rows[0].weekday, Weekday::Mon);
        assert_eq!(rows[6].weekday, Weekday::Sun);
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["weekday"], "Monday");
    }

    #[test]
    fn reconstruction_is_repeatable() {
        let snaps = vec![
            snap(3, Some("2024-01-04"), 1, 1300, 140),
            snap(1, Some("2024-01-01"), 1, 1000, 100),
            snap(2, Some("2024-01-01"), 2, 1010, 101),
        ];
        let a = serde_json::to_vec(&reconstruct(&snaps)).unwrap();
        let b = serde_json::to_vec(&reconstruct(&snaps)).unwrap();
        assert_eq!(a, b);
        assert_eq!(fingerprint(&reconstruct(&snaps)).unwrap().len(), 64);
    }

    #[test]
    fn key_figures_compare_against_previous_observed_day() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-01"), 1, 1000, 100),
            snap(2, Some("2024-01-04"), 1, 1300, 160),
        ]);
        let kf = key_figures(&rows).unwrap();
        assert_eq!(kf.provider_date, date("2024-01-04"));
        assert_eq!(kf.previous_date, Some(date("2024-01-01")));
        assert_eq!(kf.deltas.total_processed_refund, Some(60));
        assert_eq!(kf.deltas.e_verified_returns, Some(300));

        let single = reconstruct(&[snap(1, Some("2024-01-01"), 1, 1000, 100)]);
        let kf = key_figures(&single).unwrap();
        assert_eq!(kf.previous_date, None);
        assert_eq!(kf.deltas.total_processed_refund, None);
    }

    #[test]
    fn summary_counts_observed_and_interpolated() {
        let rows = reconstruct(&[
            snap(1, Some("2024-01-01"), 1, 1000, 100),
            snap(2, Some("2024-01-04"), 1, 1300, 160),
        ]);
        let s = summarize(&rows).unwrap();
        assert_eq!((s.days, s.observed_days, s.interpolated_days), (4, 2, 2));
        assert_eq!(s.last_date, Some(date("2024-01-04")));
    }
}
