//! Presentation of the reconstructed series: terminal report, HTML page and
//! machine-readable exports. Differences between dashboard variants are
//! flags on [`DashboardOptions`].

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::logging::{self, obj, Domain};
use crate::model::{Metric, RawSnapshot};
use crate::series::{self, weekday_name, DailySeriesRow, KeyFigures, SeriesSummary};
use crate::weekly::{self, Column, WeekdayMeans};

pub const TITLE: &str = "Income Tax e-Portal: Daily Stats";
pub const NO_DATA: &str = "No data yet. Run the collector to ingest a snapshot.";

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub show_rolling_delta: bool,
    pub show_pending_delta: bool,
    pub show_raw_table: bool,
    /// Columns averaged in the weekly pattern view.
    pub weekly_columns: Vec<Column>,
    /// Rows in the daily table of the terminal report.
    pub recent_days: usize,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            show_rolling_delta: true,
            show_pending_delta: true,
            show_raw_table: true,
            weekly_columns: vec![Column::Daily(Metric::TotalProcessedRefund)],
            recent_days: 14,
        }
    }
}

/// Everything a dashboard render needs, computed from one read of the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub key_figures: Option<KeyFigures>,
    pub summary: SeriesSummary,
    pub weekly_columns: Vec<String>,
    pub weekly: Vec<WeekdayMeans>,
    pub rows: Vec<DailySeriesRow>,
}

impl DashboardView {
    pub fn build(snapshots: &[RawSnapshot], opts: &DashboardOptions) -> Result<Self> {
        let rows = series::reconstruct(snapshots);
        let view = Self {
            key_figures: series::key_figures(&rows),
            summary: series::summarize(&rows)?,
            weekly_columns: opts.weekly_columns.iter().map(Column::label).collect(),
            weekly: weekly::weekday_means(&rows, &opts.weekly_columns),
            rows,
        };
        logging::debug(
            Domain::Dashboard,
            "view_built",
            obj(&[("snapshots", json!(snapshots.len())), ("days", json!(view.rows.len()))]),
        );
        Ok(view)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Formatting helpers
// =============================================================================

pub fn fmt_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn fmt_delta(d: i64) -> String {
    let sign = if d < 0 { "-" } else { "+" };
    format!("{}{}", sign, fmt_count(d.unsigned_abs()))
}

pub fn fmt_ratio(r: f64) -> String {
    format!("{:.2}%", r * 100.0)
}

fn fmt_ratio_delta(r: f64) -> String {
    format!("{:+.2}pp", r * 100.0)
}

fn opt<T>(v: Option<T>, f: impl Fn(T) -> String) -> String {
    v.map(f).unwrap_or_else(|| "-".to_string())
}

/// Counters shown in the terminal table. The HTML table shows all four.
const TEXT_METRICS: [Metric; 2] = [Metric::EVerifiedReturns, Metric::TotalProcessedRefund];

fn short_label(m: Metric) -> &'static str {
    match m {
        Metric::IndvRegUsers => "users",
        Metric::EVerifiedReturns => "e-verified",
        Metric::TotalAadharLinkedPan => "aadhaar-pan",
        Metric::TotalProcessedRefund => "processed",
    }
}

/// Column set shared by the text and HTML tables.
fn table_header(metrics: &[Metric], opts: &DashboardOptions) -> Vec<String> {
    let mut h: Vec<String> = vec!["date".into(), "weekday".into(), "est".into()];
    h.extend(metrics.iter().map(|m| short_label(*m).to_string()));
    h.extend(metrics.iter().map(|m| format!("Δ {}", short_label(*m))));
    h.push("pending".into());
    if opts.show_pending_delta {
        h.push("Δ pending".into());
    }
    if opts.show_rolling_delta {
        h.push("7d mean Δ processed".into());
    }
    h
}

fn table_cells(row: &DailySeriesRow, metrics: &[Metric], opts: &DashboardOptions) -> Vec<String> {
    let mut c = vec![
        row.date.to_string(),
        weekday_name(row.weekday).to_string(),
        if row.interpolated { "*".to_string() } else { String::new() },
    ];
    c.extend(metrics.iter().map(|m| opt(row.counters.get(*m), fmt_count)));
    c.extend(metrics.iter().map(|m| opt(row.daily.get(*m), fmt_delta)));
    c.push(opt(row.pending_processing_percentage, fmt_ratio));
    if opts.show_pending_delta {
        c.push(opt(row.daily_pending_processing_percentage, fmt_ratio_delta));
    }
    if opts.show_rolling_delta {
        c.push(opt(row.rolling_daily_processed_refund, fmt_mean_delta));
    }
    c
}

/// Signed, rounded to whole units.
fn fmt_mean_delta(v: f64) -> String {
    fmt_delta(v.round() as i64)
}

// =============================================================================
// Terminal report
// =============================================================================

pub fn render_text(view: &DashboardView, opts: &DashboardOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", TITLE);
    let _ = writeln!(out, "{}", "=".repeat(TITLE.len()));

    let Some(kf) = &view.key_figures else {
        let _ = writeln!(out, "{}", NO_DATA);
        return out;
    };

    let _ = writeln!(out, "\nKey figures (as of provider date {})", kf.provider_date);
    for m in Metric::ALL {
        let since = match (kf.deltas.get(m), kf.previous_date) {
            (Some(d), Some(prev)) => format!("  ({} since {})", fmt_delta(d), prev),
            _ => String::new(),
        };
        let _ = writeln!(out, "  {:<20} {:>16}{}", m.label(), opt(kf.values.get(m), fmt_count), since);
    }

    let _ = writeln!(out, "\nDaily metrics (last {} days, * = carried forward)", opts.recent_days);
    let header = table_header(&TEXT_METRICS, opts);
    let skip = view.rows.len().saturating_sub(opts.recent_days);
    let body: Vec<Vec<String>> = view.rows[skip..].iter().map(|r| table_cells(r, &TEXT_METRICS, opts)).collect();
    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(i, h)| body.iter().map(|r| r[i].chars().count()).chain([h.chars().count()]).max().unwrap_or(0))
        .collect();
    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
    };
    let _ = writeln!(out, "{}", line(header));
    for cells in body {
        let _ = writeln!(out, "{}", line(cells));
    }

    let _ = writeln!(out, "\nWeekly patterns (mean {})", view.weekly_columns.join(", "));
    let peak = weekly_peak(&view.weekly);
    for day in &view.weekly {
        let first = day.means.first().copied().flatten();
        let bar = first
            .map(|v| "#".repeat(((v.abs() / peak) * 30.0).round() as usize))
            .unwrap_or_default();
        let values: Vec<String> = day.means.iter().map(|m| opt(*m, |v| format!("{:.1}", v))).collect();
        let _ = writeln!(out, "  {:<9} {:<30} {}", day.weekday, bar, values.join(" / "));
    }

    let s = &view.summary;
    let _ = writeln!(
        out,
        "\n{} days ({} observed, {} carried forward), fingerprint {}",
        s.days, s.observed_days, s.interpolated_days, &s.fingerprint[..12.min(s.fingerprint.len())]
    );
    out
}

fn weekly_peak(weekly: &[WeekdayMeans]) -> f64 {
    weekly
        .iter()
        .filter_map(|d| d.means.first().copied().flatten())
        .map(f64::abs)
        .fold(0.0, f64::max)
        .max(f64::MIN_POSITIVE)
}

// =============================================================================
// HTML page
// =============================================================================

const CHART_W: f64 = 800.0;
const CHART_H: f64 = 220.0;
const CHART_COLORS: [&str; 4] = ["#4e79a7", "#f28e2b", "#59a14f", "#e15759"];

/// One polyline per counter, each scaled to its own range since the four
/// counters differ by orders of magnitude.
fn render_chart(rows: &[DailySeriesRow]) -> String {
    let mut svg = format!(
        r#"<svg viewBox="0 0 {w} {h}" width="100%" height="{h}" role="img">"#,
        w = CHART_W,
        h = CHART_H
    );
    let n = rows.len();
    for (metric, color) in Metric::ALL.iter().zip(CHART_COLORS) {
        let values = series::column(rows, *metric);
        let known: Vec<u64> = values.iter().flatten().copied().collect();
        let (Some(&lo), Some(&hi)) = (known.iter().min(), known.iter().max()) else {
            continue;
        };
        let span = (hi - lo).max(1) as f64;
        let points: Vec<String> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                let v = (*v)?;
                let x = if n > 1 { i as f64 / (n - 1) as f64 * CHART_W } else { CHART_W / 2.0 };
                let y = CHART_H - 10.0 - (v - lo) as f64 / span * (CHART_H - 20.0);
                Some(format!("{:.1},{:.1}", x, y))
            })
            .collect();
        let _ = write!(
            svg,
            r#"<polyline fill="none" stroke="{}" stroke-width="2" points="{}"><title>{}</title></polyline>"#,
            color,
            points.join(" "),
            metric.label()
        );
    }
    svg.push_str("</svg><p>");
    for (metric, color) in Metric::ALL.iter().zip(CHART_COLORS) {
        let _ = write!(svg, r#"<span style="color:{}">&#9632; {}</span> "#, color, metric.label());
    }
    svg.push_str("</p>");
    svg
}

pub fn render_html(view: &DashboardView, opts: &DashboardOptions) -> String {
    let mut body = String::new();
    let _ = write!(body, "<h1>{}</h1><p>Data collected from the public endpoint.</p>", TITLE);

    if let Some(kf) = &view.key_figures {
        let _ = write!(body, "<h2>Key figures</h2><p>As of provider date: {}</p><div class=\"kpis\">", kf.provider_date);
        for m in Metric::ALL {
            let delta = kf.deltas.get(m).map(|d| format!("<div class=\"delta\">{}</div>", fmt_delta(d))).unwrap_or_default();
            let _ = write!(
                body,
                "<div class=\"kpi\"><div class=\"label\">{}</div><div class=\"value\">{}</div>{}</div>",
                m.label(),
                opt(kf.values.get(m), fmt_count),
                delta
            );
        }
        body.push_str("</div>");

        let _ = write!(body, "<h2>Daily metrics</h2>{}", render_chart(&view.rows));

        let _ = write!(body, "<h2>Weekly patterns</h2><p>Mean {}</p><table>", view.weekly_columns.join(", "));
        let peak = weekly_peak(&view.weekly);
        for day in &view.weekly {
            let first = day.means.first().copied().flatten();
            let pct = first.map(|v| v.abs() / peak * 100.0).unwrap_or(0.0);
            let values: Vec<String> = day.means.iter().map(|m| opt(*m, |v| format!("{:.1}", v))).collect();
            let _ = write!(
                body,
                "<tr><td>{}</td><td class=\"bar\"><div style=\"width:{:.1}%\"></div></td><td>{}</td></tr>",
                day.weekday,
                pct,
                values.join(" / ")
            );
        }
        body.push_str("</table>");

        if opts.show_raw_table {
            body.push_str("<h2>Daily series</h2><table><tr>");
            for h in table_header(&Metric::ALL, opts) {
                let _ = write!(body, "<th>{}</th>", h);
            }
            body.push_str("</tr>");
            for row in view.rows.iter().rev() {
                body.push_str("<tr>");
                for c in table_cells(row, &Metric::ALL, opts) {
                    let _ = write!(body, "<td>{}</td>", c);
                }
                body.push_str("</tr>");
            }
            body.push_str("</table>");
        }

        let s = &view.summary;
        let _ = write!(
            body,
            "<p class=\"foot\">{} days ({} observed, {} carried forward) &middot; fingerprint {}</p>",
            s.days, s.observed_days, s.interpolated_days, s.fingerprint
        );
    } else {
        let _ = write!(body, "<p class=\"warn\">{}</p>", NO_DATA);
    }

    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>ITR Stats Dashboard</title><style>{}</style></head><body>{}</body></html>",
        STYLE, body
    )
}

const STYLE: &str = "body{font-family:sans-serif;margin:2em;max-width:1100px}\
.kpis{display:flex;gap:1em}.kpi{border:1px solid #ddd;padding:.8em;flex:1}\
.label{color:#666}.value{font-size:1.6em}.delta{color:#2a7}\
table{border-collapse:collapse}td,th{padding:.2em .6em;text-align:right;border-bottom:1px solid #eee}\
.bar{width:300px}.bar div{background:#4e79a7;height:.9em}.warn{color:#a60}.foot{color:#888}";

// =============================================================================
// Exports
// =============================================================================

pub fn to_json(rows: &[DailySeriesRow]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

pub fn to_csv(rows: &[DailySeriesRow]) -> String {
    let mut out = String::new();
    let mut header: Vec<String> = vec!["date".into(), "weekday".into(), "interpolated".into()];
    header.extend(Metric::ALL.iter().map(|m| m.column().to_string()));
    header.extend(Metric::ALL.iter().map(|m| format!("daily_{}", m.column())));
    header.extend([
        "pending_processing_percentage".to_string(),
        "daily_pending_processing_percentage".to_string(),
        "rolling_7d_daily_total_processed_refund".to_string(),
    ]);
    out.push_str(&header.join(","));
    out.push('\n');

    let cell = |v: Option<String>| v.unwrap_or_default();
    for row in rows {
        let mut fields = vec![
            row.date.to_string(),
            weekday_name(row.weekday).to_string(),
            row.interpolated.to_string(),
        ];
        fields.extend(Metric::ALL.iter().map(|m| cell(row.counters.get(*m).map(|v| v.to_string()))));
        fields.extend(Metric::ALL.iter().map(|m| cell(row.daily.get(*m).map(|v| v.to_string()))));
        fields.push(cell(row.pending_processing_percentage.map(|v| v.to_string())));
        fields.push(cell(row.daily_pending_processing_percentage.map(|v| v.to_string())));
        fields.push(cell(row.rolling_daily_processed_refund.map(|v| v.to_string())));
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}
