//! Dashboard server.
//!
//! Re-reads the store and rebuilds the series on every request.
//! Run with: cargo run --bin dashboard
//!
//! Endpoints:
//!   GET /             HTML dashboard
//!   GET /api/series   reconstructed rows as JSON
//!   GET /api/weekly   weekday means as JSON
//!   GET /api/summary  key figures and series summary
//!   GET /api/health   health check

use anyhow::{Context, Result};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use itrstats::config::Config;
use itrstats::dashboard::{self, DashboardOptions, DashboardView, NO_DATA};
use itrstats::logging::{self, obj, v_str, Domain};
use itrstats::storage::SnapshotStore;

/// Connections are served one at a time, so an idle client may only hold
/// the loop this long.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cfg = Config::from_env();
    let opts = cfg.dashboard();
    let listener = TcpListener::bind(&cfg.dashboard_addr)
        .with_context(|| format!("binding {}", cfg.dashboard_addr))?;

    println!("ITR stats dashboard running at http://{}", cfg.dashboard_addr);
    logging::info(
        Domain::Dashboard,
        "listening",
        obj(&[("addr", v_str(&cfg.dashboard_addr)), ("db", v_str(&cfg.db_path.display().to_string()))]),
    );

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Err(err) = handle(stream, &cfg, &opts) {
            logging::warn(Domain::Dashboard, "request_failed", obj(&[("error", v_str(&format!("{:#}", err)))]));
        }
    }
    Ok(())
}

fn handle(mut stream: TcpStream, cfg: &Config, opts: &DashboardOptions) -> Result<()> {
    let request = read_request_line(&stream, IO_TIMEOUT)?;
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

    let (status, content_type, body) = match route(&path, cfg, opts) {
        Ok(Some((ct, body))) => ("200 OK", ct, body),
        Ok(None) => ("404 NOT FOUND", "text/plain", "Not Found".to_string()),
        Err(err) => {
            logging::log(
                logging::Level::Error,
                Domain::Dashboard,
                "render_failed",
                obj(&[("path", v_str(&path)), ("error", v_str(&format!("{:#}", err)))]),
            );
            ("500 INTERNAL SERVER ERROR", "text/plain", "Internal Server Error".to_string())
        }
    };
    logging::debug(Domain::Dashboard, "request", obj(&[("path", v_str(&path)), ("status", v_str(status))]));

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    Ok(())
}

fn read_request_line(stream: &TcpStream, timeout: Duration) -> Result<String> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).context("reading request line")?;
    Ok(line)
}

fn route(path: &str, cfg: &Config, opts: &DashboardOptions) -> Result<Option<(&'static str, String)>> {
    if path == "/api/health" {
        return Ok(Some(("application/json", json!({"status": "ok"}).to_string())));
    }
    let view = match path {
        "/" | "/index.html" | "/api/series" | "/api/weekly" | "/api/summary" => {
            let mut store = SnapshotStore::open(&cfg.db_path)?;
            DashboardView::build(&store.query_all()?, opts)?
        }
        _ => return Ok(None),
    };
    let body = match path {
        "/api/series" => ("application/json", serde_json::to_string(&view.rows)?),
        "/api/weekly" => (
            "application/json",
            json!({"columns": view.weekly_columns, "weekdays": view.weekly}).to_string(),
        ),
        "/api/summary" => (
            "application/json",
            json!({
                "status": if view.is_empty() { NO_DATA } else { "ok" },
                "keyFigures": view.key_figures,
                "summary": view.summary,
            })
            .to_string(),
        ),
        _ => ("text/html; charset=utf-8", dashboard::render_html(&view, opts)),
    };
    Ok(Some(body))
}
