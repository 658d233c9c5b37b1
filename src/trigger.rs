use chrono::{DateTime, Duration, Utc};

use crate::model::parse_collected_at;

/// Outcome of a collect-if-due check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub due: bool,
    pub reason: String,
}

impl Decision {
    fn due(reason: impl Into<String>) -> Self {
        Self { due: true, reason: reason.into() }
    }
}

/// Decides whether enough time has passed since the last collection.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub min_interval: Duration,
}

impl Default for Trigger {
    fn default() -> Self {
        Self { min_interval: Duration::hours(4) }
    }
}

impl Trigger {
    /// Out-of-range hour counts saturate to the largest interval.
    pub fn every_hours(hours: i64) -> Self {
        Self { min_interval: Duration::try_hours(hours.max(0)).unwrap_or(Duration::MAX) }
    }

    /// `last_collected_at` is the stored text of the latest `collected_at`.
    /// A value that does not parse counts as due, so a bad row can never
    /// stall collection.
    pub fn should_collect(&self, last_collected_at: Option<&str>, now: DateTime<Utc>) -> Decision {
        let Some(raw) = last_collected_at else {
            return Decision::due("no previous snapshots");
        };
        let Some(last) = parse_collected_at(raw) else {
            return Decision::due(format!("failed to parse last timestamp {:?}", raw));
        };

        let age = now - last;
        if age >= self.min_interval {
            Decision::due(format!("last snapshot {} ago", human(age)))
        } else {
            Decision {
                due: false,
                reason: format!(
                    "last snapshot {} ago (< {})",
                    human(age),
                    human(self.min_interval)
                ),
            }
        }
    }
}

fn human(d: Duration) -> String {
    let secs = d.num_seconds();
    let sign = if secs < 0 { "-" } else { "" };
    let secs = secs.unsigned_abs();
    format!("{}{}h{:02}m{:02}s", sign, secs / 3600, (secs % 3600) / 60, secs % 60)
}
