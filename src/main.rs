//! Snapshot collector and terminal report.
//!
//! Usage:
//!   itrstats collect                 fetch one snapshot now
//!   itrstats collect-if-due          fetch only if the last one is old enough
//!   itrstats report                  print the reconstructed series
//!   itrstats export [--format csv|json]

use anyhow::{bail, Result};
use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::time::{sleep, Duration};

use itrstats::collector::{collect_if_due, collect_once};
use itrstats::config::Config;
use itrstats::dashboard::{self, DashboardView};
use itrstats::fetch::HttpStatsSource;
use itrstats::logging::{self, obj, v_str, Domain};
use itrstats::series;
use itrstats::storage::SnapshotStore;
use itrstats::trigger::Trigger;

const USAGE: &str = "usage: itrstats <collect|collect-if-due|report|export [--format csv|json]>";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("collect");
    let cfg = Config::from_env();

    logging::info(
        Domain::System,
        "start",
        obj(&[
            ("command", v_str(command)),
            ("db", v_str(&cfg.db_path.display().to_string())),
        ]),
    );

    match command {
        "collect" => {
            let mut store = SnapshotStore::open(&cfg.db_path)?;
            let source = HttpStatsSource::new(cfg.fetch())?;
            let collected = collect_once(&mut store, &source, Utc::now()).await?;
            println!("{}", collected.summary());
        }
        "collect-if-due" => {
            // Spread out runs that fire together, e.g. after a laptop wakes.
            if cfg.start_jitter_secs > 0 {
                let ms = rand::thread_rng().gen_range(0..=max_start_jitter_ms(cfg.start_jitter_secs));
                logging::debug(Domain::Trigger, "start_jitter", obj(&[("sleep_ms", json!(ms))]));
                sleep(Duration::from_millis(ms)).await;
            }
            let mut store = SnapshotStore::open(&cfg.db_path)?;
            let source = HttpStatsSource::new(cfg.fetch())?;
            let trigger = Trigger::every_hours(cfg.collect_interval_hours);
            let outcome = collect_if_due(&mut store, &source, &trigger, Utc::now()).await?;
            println!("{}", outcome.summary());
        }
        "report" => {
            let mut store = SnapshotStore::open(&cfg.db_path)?;
            let opts = cfg.dashboard();
            let view = DashboardView::build(&store.query_all()?, &opts)?;
            print!("{}", dashboard::render_text(&view, &opts));
        }
        "export" => {
            let format = export_format(&args[2..])?;
            let mut store = SnapshotStore::open(&cfg.db_path)?;
            let rows = series::reconstruct(&store.query_all()?);
            match format {
                "json" => println!("{}", dashboard::to_json(&rows)?),
                "csv" => print!("{}", dashboard::to_csv(&rows)),
                other => bail!("unknown format {:?}\n{}", other, USAGE),
            }
        }
        "-h" | "--help" | "help" => println!("{}", USAGE),
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }
    Ok(())
}

fn max_start_jitter_ms(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

/// Arguments after `export`. No arguments means json.
fn export_format(rest: &[String]) -> Result<&str> {
    match rest {
        [] => Ok("json"),
        [flag, value] if flag == "--format" => Ok(value.as_str()),
        [flag] if flag == "--format" => bail!("--format needs a value\n{}", USAGE),
        [other, ..] => bail!("unexpected argument {:?}\n{}", other, USAGE),
    }
}
