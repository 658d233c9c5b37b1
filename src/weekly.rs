//! Day-of-week averages over the daily series.

use chrono::Weekday;
use serde::Serialize;

use crate::model::Metric;
use crate::series::{weekday_name, DailySeriesRow};

pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A numeric column of [`DailySeriesRow`] that can be averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Column {
    Daily(Metric),
    Cumulative(Metric),
    DailyPendingProcessingPercentage,
    RollingDailyProcessedRefund,
}

impl Column {
    pub fn value(&self, row: &DailySeriesRow) -> Option<f64> {
        match self {
            Column::Daily(m) => row.daily.get(*m).map(|v| v as f64),
            Column::Cumulative(m) => row.counters.get(*m).map(|v| v as f64),
            Column::DailyPendingProcessingPercentage => row.daily_pending_processing_percentage,
            Column::RollingDailyProcessedRefund => row.rolling_daily_processed_refund,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Column::Daily(m) => format!("daily {}", m.label()),
            Column::Cumulative(m) => m.label().to_string(),
            Column::DailyPendingProcessingPercentage => "daily pending %".to_string(),
            Column::RollingDailyProcessedRefund => "7-day mean processed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekdayMeans {
    pub weekday: &'static str,
    /// One entry per requested column; `None` when no row contributed.
    pub means: Vec<Option<f64>>,
}

/// Mean of each column per weekday, Monday through Sunday.
///
/// Rows whose value is unknown do not contribute, so a weekday with nothing
/// to average reports `None` rather than zero.
pub fn weekday_means(rows: &[DailySeriesRow], columns: &[Column]) -> Vec<WeekdayMeans> {
    let mut sums = vec![[(0.0f64, 0usize); 7]; columns.len()];
    for row in rows {
        let slot = row.weekday.num_days_from_monday() as usize;
        for (c, column) in columns.iter().enumerate() {
            if let Some(v) = column.value(row) {
                sums[c][slot].0 += v;
                sums[c][slot].1 += 1;
            }
        }
    }

    WEEK.iter()
        .enumerate()
        .map(|(slot, day)| WeekdayMeans {
            weekday: weekday_name(*day),
            means: sums
                .iter()
                .map(|per_day| {
                    let (sum, n) = per_day[slot];
                    (n > 0).then(|| sum / n as f64)
                })
                .collect(),
        })
        .collect()
}
