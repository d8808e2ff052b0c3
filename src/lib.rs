pub mod broker;
pub mod config;
pub mod dedup;
#[cfg(feature = "exposition")]
pub mod exposition;
pub mod metrics;
pub mod pipeline;
pub mod providers;
pub mod readiness;
pub mod request;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Upper bound on forecast days the free provider tier serves.
pub const MAX_FORECAST_DAYS: u32 = 5;

/// The provider returns one sample every three hours.
pub const SAMPLES_PER_DAY: u32 = 8;

/// Format used for dates in keys, labels and log records.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A validated line from the input file, before geocoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub day_count: u32,
    pub location_code: String,
    pub source_line: usize,
}

/// A request whose location code has been turned into coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub day_count: u32,
    pub display_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_code: String,
    pub source_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    Temperature,
    Humidity,
    Wind,
    Cloud,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 4] = [
        MetricFamily::Temperature,
        MetricFamily::Humidity,
        MetricFamily::Wind,
        MetricFamily::Cloud,
    ];

    /// Broker topic carrying this family's events
    pub fn topic(&self) -> &'static str {
        match self {
            MetricFamily::Temperature => "temperature",
            MetricFamily::Humidity => "humidity",
            MetricFamily::Wind => "wind",
            MetricFamily::Cloud => "cloud",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.topic() == topic)
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Family-specific numbers carried by a [`MetricEvent`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Temperature { temp: f64, feels_like: f64 },
    Humidity { humidity: f64 },
    Wind { speed: f64, degree: f64 },
    Cloud { cloud_percent: f64 },
}

impl Reading {
    pub fn family(&self) -> MetricFamily {
        match self {
            Reading::Temperature { .. } => MetricFamily::Temperature,
            Reading::Humidity { .. } => MetricFamily::Humidity,
            Reading::Wind { .. } => MetricFamily::Wind,
            Reading::Cloud { .. } => MetricFamily::Cloud,
        }
    }
}

/// One metric family's reading for one location and day.
///
/// The fetch pool produces four of these per forecast day and publishes each
/// to the topic of its family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub location_code: String,
    pub location_name: String,
    pub date: NaiveDate,
    pub reading: Reading,
}

impl MetricEvent {
    pub fn family(&self) -> MetricFamily {
        self.reading.family()
    }

    /// Partition key, `{location}-{date}`
    pub fn key(&self) -> String {
        dedup_key(&self.location_code, self.date)
    }
}

/// Render the `{location}-{date}` key used for broker partitioning.
pub fn dedup_key(location_code: &str, date: NaiveDate) -> String {
    format!("{location_code}-{}", date.format(DATE_FORMAT))
}

/// Split a broker key back into location code and date string.
///
/// Location codes never contain `-`, so the split happens at the first one.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('-')
}
