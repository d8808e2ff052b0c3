//! OpenWeatherMap client for geocoding and the 5-day forecast
//!
//! The API reports errors in the body as `{"cod": ..., "message": ...}` where
//! `cod` is sometimes a number and sometimes a string, so both forms are
//! accepted.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, trace};

use super::error::{ProviderError, ProviderResult};
use super::{ForecastProvider, ForecastSample, GeoLocation, Geocoder};
use crate::config::ProviderConfig;

/// Error envelope the geocoding endpoint may return instead of coordinates
#[derive(Debug, Deserialize)]
struct ApiStatus {
    cod: Option<Value>,
    message: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ZipResponse {
    #[serde(default)]
    name: String,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    cod: Option<Value>,
    message: Option<Value>,
    #[serde(default)]
    list: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct ForecastEntry {
    dt: i64,
    main: MainSection,
    #[serde(default)]
    wind: WindSection,
    #[serde(default)]
    clouds: CloudSection,
}

#[derive(Debug, Deserialize)]
struct MainSection {
    temp: f64,
    feels_like: f64,
    humidity: f64,
}

#[derive(Debug, Default, Deserialize)]
struct WindSection {
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    deg: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CloudSection {
    #[serde(default)]
    all: f64,
}

impl From<ForecastEntry> for ForecastSample {
    fn from(entry: ForecastEntry) -> Self {
        Self {
            timestamp: entry.dt,
            temp: entry.main.temp,
            feels_like: entry.main.feels_like,
            humidity: entry.main.humidity,
            wind_speed: entry.wind.speed,
            wind_degree: entry.wind.deg,
            cloud_percent: entry.clouds.all,
        }
    }
}

/// HTTP client for both OpenWeatherMap endpoints
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<(StatusCode, String)> {
        let url = format!("{}{path}", self.base_url);
        trace!("requesting {url}");

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("appid", &self.api_key)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl Geocoder for OpenWeatherClient {
    #[instrument(skip(self))]
    async fn resolve(&self, location_code: &str) -> ProviderResult<GeoLocation> {
        let (status, body) = self
            .get("/geo/1.0/zip", &[("zip", format!("{location_code},US"))])
            .await?;

        let payload: Value = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(status_error(status, location_code)
                    .unwrap_or_else(|| ProviderError::Decode(e.to_string())));
            }
        };

        let api: ApiStatus = serde_json::from_value(payload.clone())
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if let Some(err) = payload_error(
            status,
            api.cod.as_ref(),
            api.message.as_ref(),
            location_code,
        ) {
            return Err(err);
        }

        let response: ZipResponse =
            serde_json::from_value(payload).map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(GeoLocation {
            name: response.name,
            latitude: response.lat,
            longitude: response.lon,
        })
    }
}

#[async_trait]
impl ForecastProvider for OpenWeatherClient {
    #[instrument(skip(self))]
    async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        sample_count: u32,
    ) -> ProviderResult<Vec<ForecastSample>> {
        let (status, body) = self
            .get(
                "/data/2.5/forecast",
                &[
                    ("lat", latitude.to_string()),
                    ("lon", longitude.to_string()),
                    ("cnt", sample_count.to_string()),
                    ("units", "imperial".to_string()),
                ],
            )
            .await?;

        let what = format!("{latitude},{longitude}");
        let response: ForecastResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(e) => {
                return Err(status_error(status, &what)
                    .unwrap_or_else(|| ProviderError::Decode(e.to_string())));
            }
        };

        if let Some(err) = payload_error(
            status,
            response.cod.as_ref(),
            response.message.as_ref(),
            &what,
        ) {
            return Err(err);
        }

        Ok(response.list.into_iter().map(ForecastSample::from).collect())
    }
}

/// `cod` as a number, whether it arrived as a number or a string
fn cod_value(cod: &Value) -> Option<u16> {
    match cod {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn message_text(message: Option<&Value>) -> String {
    match message {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn classify(code: u16, message: String, what: &str) -> Option<ProviderError> {
    match code {
        200..=299 => None,
        401 => Some(ProviderError::InvalidCredentials(message)),
        404 => Some(ProviderError::NotFound(what.to_string())),
        code => Some(ProviderError::Api { code, message }),
    }
}

fn status_error(status: StatusCode, what: &str) -> Option<ProviderError> {
    classify(status.as_u16(), status.to_string(), what)
}

/// Error carried by a decoded body, falling back to the HTTP status when the
/// body has no `cod`
fn payload_error(
    status: StatusCode,
    cod: Option<&Value>,
    message: Option<&Value>,
    what: &str,
) -> Option<ProviderError> {
    match cod.and_then(cod_value) {
        Some(code) => classify(code, message_text(message), what),
        None => status_error(status, what),
    }
}
