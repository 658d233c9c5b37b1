//! End-to-end: stub upstream -> fetch with retry -> store -> reconstruct.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};
use itrstats::collector::{collect_if_due, collect_once, Outcome};
use itrstats::error::FetchError;
use itrstats::fetch::retry::RetryConfig;
use itrstats::fetch::{FetchConfig, HttpStatsSource, StatsSource};
use itrstats::series::reconstruct;
use itrstats::storage::SnapshotStore;
use itrstats::trigger::Trigger;
use tempfile::TempDir;

/// Serves the given (status, body) responses in order, one per connection,
/// then stops. Returns the endpoint URL and a hit counter.
fn stub_upstream(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else { return };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let reply = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(reply.as_bytes());
        }
    });
    (format!("http://{}/saveData", addr), hits)
}

fn fast_config(endpoint: String, attempts: u32) -> FetchConfig {
    FetchConfig {
        endpoint,
        timeout_secs: 5,
        request_jitter_ms: (0, 0),
        retry: RetryConfig::immediate(attempts),
    }
}

fn body(label: &str, verified: u64, processed: u64) -> String {
    format!(
        r#"{{"IndvRegUsers": 1000, "eVerifiedReturns": {}, "TotalAadharLinkedPAN": "500", "TotalProcessedRefund": {}, "LastUpdated": "{}"}}"#,
        verified, processed, label
    )
}

#[tokio::test]
async fn fetch_retries_through_transient_failures() {
    let (url, hits) = stub_upstream(vec![
        (503, "busy".to_string()),
        (200, "<html>not json".to_string()),
        (200, body("2024-01-01", 900, 100)),
    ]);
    let source = HttpStatsSource::new(fast_config(url, 5)).unwrap();
    let payload = source.fetch_stats().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(payload.counters.total_processed_refund, 100);
    assert_eq!(payload.counters.total_aadhar_linked_pan, 500);
    assert_eq!(payload.provider_last_updated_raw.as_deref(), Some("2024-01-01"));
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error() {
    let (url, hits) = stub_upstream(vec![(500, String::new()), (502, String::new())]);
    let source = HttpStatsSource::new(fast_config(url, 2)).unwrap();
    let err = source.fetch_stats().await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 502 }), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn collected_snapshots_reconstruct_into_daily_series() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nested").join("itrstats.sqlite3");
    let (url, _) = stub_upstream(vec![
        (200, body("2024-01-01", 1000, 100)),
        (200, body("2024-01-01", 1000, 105)),
        (200, body("2024-01-03", 1200, 130)),
    ]);
    let source = HttpStatsSource::new(fast_config(url, 1)).unwrap();

    {
        let mut store = SnapshotStore::open(&db).unwrap();
        for hour in [1, 5, 9] {
            let at = Utc.with_ymd_and_hms(2024, 1, 3, hour, 0, 0).unwrap();
            collect_once(&mut store, &source, at).await.unwrap();
        }
    }

    // Fresh handle: everything must have been committed to the file.
    let mut store = SnapshotStore::open(&db).unwrap();
    let snaps = store.query_all().unwrap();
    assert_eq!(snaps.len(), 3);

    let rows = reconstruct(&snaps);
    assert_eq!(rows.len(), 3);
    // the 05:00 re-poll of 2024-01-01 is fresher than the 01:00 one
    assert_eq!(rows[0].counters.total_processed_refund, Some(105));
    assert!(rows[1].interpolated);
    assert_eq!(rows[1].counters.total_processed_refund, Some(105));
    assert_eq!(rows[2].daily.total_processed_refund, Some(25));

    let again = reconstruct(&store.query_all().unwrap());
    assert_eq!(
        serde_json::to_string(&rows).unwrap(),
        serde_json::to_string(&again).unwrap()
    );
}

#[tokio::test]
async fn collect_if_due_skips_without_touching_upstream() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("itrstats.sqlite3");
    let (url, hits) = stub_upstream(vec![(200, body("2024-01-01", 1, 1))]);
    let source = HttpStatsSource::new(fast_config(url, 1)).unwrap();
    let mut store = SnapshotStore::open(&db).unwrap();

    let first = collect_if_due(&mut store, &source, &Trigger::default(), Utc::now()).await.unwrap();
    assert!(matches!(first, Outcome::Collected(_)));

    let second = collect_if_due(&mut store, &source, &Trigger::default(), Utc::now()).await.unwrap();
    assert!(matches!(second, Outcome::Skipped(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(store.count().unwrap(), 1);
}
