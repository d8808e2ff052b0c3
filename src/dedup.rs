//! Dedup gate - skips provider work for days already in the durable log
//!
//! The gate looks for a record whose `Zip` and `Date` match the furthest day
//! a request covers (`today + day_count - 1`). If that day is already logged,
//! the whole request is considered observed.
//!
//! The check is best-effort, not a uniqueness constraint: a record being
//! written while the gate scans may be missed, and any read failure lets the
//! request through.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{Days, NaiveDate};
use tracing::{debug, info, instrument, warn};

use crate::DATE_FORMAT;
use crate::storage::{AggregatedSample, DurableLog};
use crate::util::today;

/// How the gate answers lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupStrategy {
    /// Linear scan of the log per lookup
    #[default]
    Scan,

    /// Key set built from one scan at startup, extended as records are appended
    Indexed,
}

pub struct DedupGate {
    log: Arc<DurableLog>,
    strategy: DedupStrategy,
    index: RwLock<HashSet<(String, String)>>,
}

impl DedupGate {
    /// Gate that scans the log on every lookup
    pub fn scanning(log: Arc<DurableLog>) -> Self {
        Self {
            log,
            strategy: DedupStrategy::Scan,
            index: RwLock::new(HashSet::new()),
        }
    }

    /// Gate backed by a key index, rebuilt from the log.
    ///
    /// A log that cannot be read yields an empty index (fail open).
    pub async fn indexed(log: Arc<DurableLog>) -> Self {
        let keys = match log.read_all().await {
            Ok(samples) => samples.into_iter().map(|s| (s.zip, s.date)).collect(),
            Err(e) => {
                warn!("failed to build dedup index from {}: {e}", log.path().display());
                HashSet::new()
            }
        };
        debug!("dedup index built with {} keys", keys.len());

        Self {
            log,
            strategy: DedupStrategy::Indexed,
            index: RwLock::new(keys),
        }
    }

    pub async fn with_strategy(log: Arc<DurableLog>, strategy: DedupStrategy) -> Self {
        match strategy {
            DedupStrategy::Scan => Self::scanning(log),
            DedupStrategy::Indexed => Self::indexed(log).await,
        }
    }

    /// Whether a request for `day_count` days at `location_code` needs fetching
    pub async fn should_fetch(&self, location_code: &str, day_count: u32) -> bool {
        self.should_fetch_from(location_code, day_count, today()).await
    }

    /// [`Self::should_fetch`] with an explicit "today"
    #[instrument(skip(self))]
    pub async fn should_fetch_from(
        &self,
        location_code: &str,
        day_count: u32,
        today: NaiveDate,
    ) -> bool {
        let Some(target) = target_date(today, day_count) else {
            return true;
        };

        let seen = match self.strategy {
            DedupStrategy::Scan => match self.log.find(|s| s.matches(location_code, target)).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    warn!("dedup scan failed, fetching anyway: {e}");
                    false
                }
            },
            DedupStrategy::Indexed => self.indexed_contains(location_code, target),
        };

        if seen {
            info!("found metric for {location_code}-{target} in log, skipping fetch");
        }
        !seen
    }

    fn indexed_contains(&self, location_code: &str, date: NaiveDate) -> bool {
        let key = (location_code.to_string(), date.format(DATE_FORMAT).to_string());
        self.index
            .read()
            .map(|index| index.contains(&key))
            .unwrap_or(false)
    }

    /// Note a record that was just appended to the log.
    ///
    /// Only the indexed strategy keeps state; scans read the log directly.
    pub fn observe(&self, sample: &AggregatedSample) {
        if self.strategy != DedupStrategy::Indexed {
            return;
        }
        if let Ok(mut index) = self.index.write() {
            index.insert((sample.zip.clone(), sample.date.clone()));
        }
    }
}

/// Furthest calendar day a request covers
pub fn target_date(today: NaiveDate, day_count: u32) -> Option<NaiveDate> {
    today.checked_add_days(Days::new(day_count.saturating_sub(1) as u64))
}
