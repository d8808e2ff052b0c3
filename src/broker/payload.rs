//! Per-family JSON payloads
//!
//! Producers publish one small payload per family; consumers decode any of
//! them into the flattened [`AggregatedSample`], filling `Zip` and `Date` from
//! the message key and `Topic` from the topic it arrived on.

use serde::Serialize;

use super::{BrokerError, BrokerMessage, BrokerResult};
use crate::storage::AggregatedSample;
use crate::{DATE_FORMAT, MetricEvent, MetricFamily, Reading, split_key};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TemperaturePayload<'a> {
    location: &'a str,
    date: String,
    temp: f64,
    feels_like: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HumidityPayload<'a> {
    location: &'a str,
    date: String,
    humidity: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WindPayload<'a> {
    location: &'a str,
    date: String,
    speed: f64,
    degree: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CloudPayload<'a> {
    location: &'a str,
    date: String,
    cloud_percent: f64,
}

/// Encode the payload for an event's family topic
pub fn encode_event(event: &MetricEvent) -> BrokerResult<Vec<u8>> {
    let location = event.location_name.as_str();
    let date = event.date.format(DATE_FORMAT).to_string();

    let bytes = match event.reading {
        Reading::Temperature { temp, feels_like } => serde_json::to_vec(&TemperaturePayload {
            location,
            date,
            temp,
            feels_like,
        })?,
        Reading::Humidity { humidity } => serde_json::to_vec(&HumidityPayload {
            location,
            date,
            humidity,
        })?,
        Reading::Wind { speed, degree } => serde_json::to_vec(&WindPayload {
            location,
            date,
            speed,
            degree,
        })?,
        Reading::Cloud { cloud_percent } => serde_json::to_vec(&CloudPayload {
            location,
            date,
            cloud_percent,
        })?,
    };

    Ok(bytes)
}

/// Decode a consumed message into its durable-log record
pub fn decode_message(message: &BrokerMessage) -> BrokerResult<AggregatedSample> {
    if MetricFamily::from_topic(&message.topic).is_none() {
        return Err(BrokerError::Codec(format!(
            "no metric family for topic '{}'",
            message.topic
        )));
    }

    let Some((zip, date)) = split_key(&message.key) else {
        return Err(BrokerError::Codec(format!(
            "malformed key '{}', expected location-date",
            message.key
        )));
    };

    let mut sample: AggregatedSample = serde_json::from_slice(&message.value)?;
    sample.zip = zip.to_string();
    sample.date = date.to_string();
    sample.topic = message.topic.clone();

    Ok(sample)
}
