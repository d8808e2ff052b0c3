//! Durable log record definition
//!
//! ## Layout
//!
//! Every record is one flattened JSON object per line. Fields that the
//! record's family does not carry are written as `0`:
//!
//! ```text
//! {"Topic":"wind","Zip":"10001","Date":"2026-10-19","Temp":0.0,"FeelsLike":0.0,
//!  "Humidity":0.0,"Speed":12.4,"Degree":210.0,"CloudPercent":0.0}
//! ```
//!
//! The same struct decodes the per-family broker payloads: unknown fields such
//! as `Location` are ignored and missing ones default to `0`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{DATE_FORMAT, MetricEvent, MetricFamily, Reading};

/// A single aggregated reading as written to the durable log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AggregatedSample {
    /// Topic the reading was consumed from
    pub topic: String,

    /// Location code, taken from the message key
    pub zip: String,

    /// Calendar day, `YYYY-MM-DD`
    pub date: String,

    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub speed: f64,
    pub degree: f64,
    pub cloud_percent: f64,
}

impl AggregatedSample {
    /// Flatten an event into its log record
    pub fn from_event(event: &MetricEvent) -> Self {
        let mut sample = Self {
            topic: event.family().topic().to_string(),
            zip: event.location_code.clone(),
            date: event.date.format(DATE_FORMAT).to_string(),
            ..Self::default()
        };

        match event.reading {
            Reading::Temperature { temp, feels_like } => {
                sample.temp = temp;
                sample.feels_like = feels_like;
            }
            Reading::Humidity { humidity } => sample.humidity = humidity,
            Reading::Wind { speed, degree } => {
                sample.speed = speed;
                sample.degree = degree;
            }
            Reading::Cloud { cloud_percent } => sample.cloud_percent = cloud_percent,
        }

        sample
    }

    pub fn family(&self) -> Option<MetricFamily> {
        MetricFamily::from_topic(&self.topic)
    }

    /// The family-specific part of the record, if the topic is known
    pub fn reading(&self) -> Option<Reading> {
        let reading = match self.family()? {
            MetricFamily::Temperature => Reading::Temperature {
                temp: self.temp,
                feels_like: self.feels_like,
            },
            MetricFamily::Humidity => Reading::Humidity {
                humidity: self.humidity,
            },
            MetricFamily::Wind => Reading::Wind {
                speed: self.speed,
                degree: self.degree,
            },
            MetricFamily::Cloud => Reading::Cloud {
                cloud_percent: self.cloud_percent,
            },
        };
        Some(reading)
    }

    pub fn matches(&self, zip: &str, date: NaiveDate) -> bool {
        self.zip == zip && self.date == date.format(DATE_FORMAT).to_string()
    }
}
