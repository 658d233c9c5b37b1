use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::fetch::StatsSource;
use crate::logging::{self, obj, v_str, Domain};
use crate::model::{NewSnapshot, SnapshotId};
use crate::storage::SnapshotStore;
use crate::trigger::{Decision, Trigger};

#[derive(Debug, Clone)]
pub struct Collected {
    pub id: SnapshotId,
    pub snapshot: NewSnapshot,
}

impl Collected {
    /// One-line summary for `collect`.
    pub fn summary(&self) -> String {
        format!(
            "Collected at {} | eVerifiedReturns={} | TotalProcessedRefund={}",
            self.snapshot.collected_at.to_rfc3339(),
            self.snapshot.counters.e_verified_returns,
            self.snapshot.counters.total_processed_refund,
        )
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Skipped(Decision),
    Collected(Collected),
}

impl Outcome {
    /// One-line summary for `collect-if-due`.
    pub fn summary(&self) -> String {
        match self {
            Outcome::Skipped(d) => format!("skip: {}", d.reason),
            Outcome::Collected(c) => format!(
                "collected: provider={} collected_at={} processed_refund={}",
                c.snapshot.provider_last_updated_raw.as_deref().unwrap_or("None"),
                c.snapshot.collected_at.to_rfc3339(),
                c.snapshot.counters.total_processed_refund,
            ),
        }
    }
}

/// Fetch one sample and append it. A fetch failure leaves the store
/// untouched; an append failure rolls back.
pub async fn collect_once<S>(store: &mut SnapshotStore, source: &S, now: DateTime<Utc>) -> Result<Collected>
where
    S: StatsSource + ?Sized,
{
    let payload = source.fetch_stats().await?;
    let snapshot = NewSnapshot::from_payload(payload, now);
    let id = store.append(&snapshot)?;
    Ok(Collected { id, snapshot })
}

/// Consult the trigger, then collect only when due. `now` is taken from
/// the clock at fetch time, not the decision time.
pub async fn collect_if_due<S>(
    store: &mut SnapshotStore,
    source: &S,
    trigger: &Trigger,
    now: DateTime<Utc>,
) -> Result<Outcome>
where
    S: StatsSource + ?Sized,
{
    let last = store.query_latest_collected_at()?;
    let decision = trigger.should_collect(last.as_deref(), now);
    logging::info(
        Domain::Trigger,
        "decision",
        obj(&[
            ("due", json!(decision.due)),
            ("reason", v_str(&decision.reason)),
            ("last_collected_at", last.as_deref().map(v_str).unwrap_or_default()),
        ]),
    );
    if !decision.due {
        return Ok(Outcome::Skipped(decision));
    }
    let collected = collect_once(store, source, Utc::now()).await?;
    Ok(Outcome::Collected(collected))
}
