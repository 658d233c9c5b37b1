//! Snapshot records and the value coercions shared by the fetch and read
//! paths.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

/// Row id assigned by the store on insert. Strictly increasing.
pub type SnapshotId = i64;

/// Storage format for `collected_at`. Fixed width so `MAX()` over the text
/// column orders correctly.
pub const COLLECTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
pub const COLLECTED_DATE_FORMAT: &str = "%Y-%m-%d";

/// The four cumulative counters published by the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    IndvRegUsers,
    EVerifiedReturns,
    TotalAadharLinkedPan,
    TotalProcessedRefund,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::IndvRegUsers,
        Metric::EVerifiedReturns,
        Metric::TotalAadharLinkedPan,
        Metric::TotalProcessedRefund,
    ];

    /// Field name in the upstream JSON.
    pub fn json_key(&self) -> &'static str {
        match self {
            Metric::IndvRegUsers => "IndvRegUsers",
            Metric::EVerifiedReturns => "eVerifiedReturns",
            Metric::TotalAadharLinkedPan => "TotalAadharLinkedPAN",
            Metric::TotalProcessedRefund => "TotalProcessedRefund",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Metric::IndvRegUsers => "indv_reg_users",
            Metric::EVerifiedReturns => "e_verified_returns",
            Metric::TotalAadharLinkedPan => "total_aadhar_linked_pan",
            Metric::TotalProcessedRefund => "total_processed_refund",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::IndvRegUsers => "Registered Users",
            Metric::EVerifiedReturns => "e-Verified Returns",
            Metric::TotalAadharLinkedPan => "Aadhaar-linked PAN",
            Metric::TotalProcessedRefund => "Processed Refunds",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Metric::IndvRegUsers => 0,
            Metric::EVerifiedReturns => 1,
            Metric::TotalAadharLinkedPan => 2,
            Metric::TotalProcessedRefund => 3,
        }
    }
}

/// One value per [`Metric`], indexed by `Metric::index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters<T> {
    pub indv_reg_users: T,
    pub e_verified_returns: T,
    pub total_aadhar_linked_pan: T,
    pub total_processed_refund: T,
}

impl<T: Copy> Counters<T> {
    pub fn from_fn(mut f: impl FnMut(Metric) -> T) -> Self {
        Self {
            indv_reg_users: f(Metric::IndvRegUsers),
            e_verified_returns: f(Metric::EVerifiedReturns),
            total_aadhar_linked_pan: f(Metric::TotalAadharLinkedPan),
            total_processed_refund: f(Metric::TotalProcessedRefund),
        }
    }

    pub fn get(&self, metric: Metric) -> T {
        match metric {
            Metric::IndvRegUsers => self.indv_reg_users,
            Metric::EVerifiedReturns => self.e_verified_returns,
            Metric::TotalAadharLinkedPan => self.total_aadhar_linked_pan,
            Metric::TotalProcessedRefund => self.total_processed_refund,
        }
    }
}

/// Decoded upstream response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub counters: Counters<u64>,
    pub provider_last_updated_raw: Option<String>,
}

impl StatsPayload {
    /// Absent, null and empty counters read as zero. A counter that is
    /// present but not a non-negative number is a decode failure.
    pub fn from_json(data: &Value) -> Result<Self, FetchError> {
        let obj = data
            .as_object()
            .ok_or_else(|| FetchError::Decode("expected a JSON object".to_string()))?;

        let mut decoded = [0u64; 4];
        for metric in Metric::ALL {
            decoded[metric.index()] = match obj.get(metric.json_key()) {
                None | Some(Value::Null) => 0,
                Some(Value::String(s)) if s.trim().is_empty() => 0,
                Some(v) => coerce_u64(v).ok_or_else(|| {
                    FetchError::Decode(format!("{} is not a count: {}", metric.json_key(), v))
                })?,
            };
        }

        let provider_last_updated_raw = match obj.get("LastUpdated") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Self {
            counters: Counters::from_fn(|m| decoded[m.index()]),
            provider_last_updated_raw,
        })
    }
}

/// A snapshot ready to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub counters: Counters<u64>,
    pub provider_last_updated_raw: Option<String>,
    pub collected_at: DateTime<Utc>,
    pub collected_date: String,
}

impl NewSnapshot {
    pub fn from_payload(payload: StatsPayload, collected_at: DateTime<Utc>) -> Self {
        Self {
            counters: payload.counters,
            provider_last_updated_raw: payload.provider_last_updated_raw,
            collected_date: collected_at.format(COLLECTED_DATE_FORMAT).to_string(),
            collected_at,
        }
    }

    pub fn collected_at_text(&self) -> String {
        format_collected_at(&self.collected_at)
    }
}

/// A persisted snapshot as read back from the store.
///
/// Cells are optional: the table is dynamically typed and rows written by
/// older tooling may hold text where a count belongs. Such cells read as
/// unknown instead of failing the whole read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    pub id: SnapshotId,
    pub counters: Counters<Option<u64>>,
    pub provider_last_updated_raw: Option<String>,
    /// `None` when the stored text does not parse as a timestamp.
    pub collected_at: Option<DateTime<Utc>>,
    pub collected_date: String,
}

pub fn format_collected_at(ts: &DateTime<Utc>) -> String {
    ts.format(COLLECTED_AT_FORMAT).to_string()
}

/// Accepts the storage format, its `T`-separated variant (both naive, read as
/// UTC) and RFC3339.
pub fn parse_collected_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

const PROVIDER_DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%B %d, %Y",
];

/// Calendar date of an upstream `LastUpdated` label.
///
/// Any trailing time of day is ignored, so two labels on the same date map
/// to the same provider day.
pub fn parse_provider_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in PROVIDER_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
        for time in [" %H:%M:%S%.f", "T%H:%M:%S%.f", " %H:%M", " %I:%M:%S %p", " %I:%M %p"] {
            let full = format!("{}{}", fmt, time);
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, &full) {
                return Some(dt.date());
            }
        }
    }
    None
}

/// Lenient count coercion for stored or upstream cells: integers, floats
/// (truncated) and numeric strings. Negative or non-finite values are
/// rejected.
pub fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(float_to_count)),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

pub fn parse_count(s: &str) -> Option<u64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<u64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().and_then(float_to_count))
}

pub fn float_to_count(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 {
        Some(f.trunc() as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use serde_json::json;

    #[test]
    fn payload_defaults_missing_counters_to_zero() {
        let p = StatsPayload::from_json(&json!({
            "IndvRegUsers": 10,
            "eVerifiedReturns": null,
            "TotalProcessedRefund": "1,234",
        }))
        .unwrap();
        assert_eq!(p.counters.indv_reg_users, 10);
        assert_eq!(p.counters.e_verified_returns, 0);
        assert_eq!(p.counters.total_aadhar_linked_pan, 0);
        assert_eq!(p.counters.total_processed_refund, 1234);
        assert_eq!(p.provider_last_updated_raw, None);
    }

    #[test]
    fn payload_rejects_non_numeric_counter() {
        let err = StatsPayload::from_json(&json!({"IndvRegUsers": "lots"})).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn payload_passes_label_through() {
        let p = StatsPayload::from_json(&json!({"LastUpdated": "12-Aug-2025"})).unwrap();
        assert_eq!(p.provider_last_updated_raw.as_deref(), Some("12-Aug-2025"));
        let p = StatsPayload::from_json(&json!({"LastUpdated": ""})).unwrap();
        assert_eq!(p.provider_last_updated_raw, None);
    }

    #[test]
    fn payload_rejects_non_object() {
        assert!(StatsPayload::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn provider_dates_in_common_shapes() {
        let want = NaiveDate::from_ymd_opt(2025, 8, 12).unwrap();
        for raw in [
            "2025-08-12",
            "12-08-2025",
            "12/08/2025",
            "12-Aug-2025",
            "12 Aug 2025",
            "August 12, 2025",
            "2025-08-12 18:30:00",
            "2025-08-12T18:30:00",
            "2025-08-12T18:30:00+05:30",
            "12-Aug-2025 06:15 PM",
        ] {
            assert_eq!(parse_provider_date(raw), Some(want), "label {raw}");
        }
        assert_eq!(parse_provider_date("yesterday"), None);
        assert_eq!(parse_provider_date("  "), None);
    }

    #[test]
    fn collected_at_round_trips_storage_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let text = format_collected_at(&ts);
        assert_eq!(text, "2024-03-09 07:05:01.000000");
        assert_eq!(parse_collected_at(&text), Some(ts));
        assert_eq!(parse_collected_at("2024-03-09T07:05:01Z"), Some(ts));
        assert_eq!(parse_collected_at("not a time"), None);
    }

    #[test]
    fn new_snapshot_derives_collected_date() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let payload = StatsPayload::from_json(&json!({})).unwrap();
        let snap = NewSnapshot::from_payload(payload, ts);
        assert_eq!(snap.collected_date, "2024-12-31");
        assert_eq!(snap.collected_at.day(), 31);
    }

    #[test]
    fn count_coercion() {
        assert_eq!(coerce_u64(&json!(5)), Some(5));
        assert_eq!(coerce_u64(&json!(5.9)), Some(5));
        assert_eq!(coerce_u64(&json!(-1)), None);
        assert_eq!(coerce_u64(&json!("  42 ")), Some(42));
        assert_eq!(coerce_u64(&json!("4.2e1")), Some(42));
        assert_eq!(coerce_u64(&json!("n/a")), None);
        assert_eq!(coerce_u64(&json!(true)), None);
    }
}
