//! Geocoding and forecast providers
//!
//! Both providers sit behind traits so the pools can be driven by in-process
//! fakes in tests. [`openweather::OpenWeatherClient`] implements both against
//! the OpenWeatherMap HTTP API.

pub mod error;
pub mod openweather;

use async_trait::async_trait;

pub use error::{ProviderError, ProviderResult};

/// Coordinates for a location code
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One fixed-interval forecast sample
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSample {
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_degree: f64,
    pub cloud_percent: f64,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a location code to coordinates
    async fn resolve(&self, location_code: &str) -> ProviderResult<GeoLocation>;
}

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Fetch `sample_count` samples starting at the next interval, oldest first
    async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        sample_count: u32,
    ) -> ProviderResult<Vec<ForecastSample>>;
}
