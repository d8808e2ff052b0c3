//! In-process providers and a prepared context for pool tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use tempfile::TempDir;

use super::PipelineContext;
use crate::broker::{Broker, MemoryBroker};
use crate::config::AlertThresholds;
use crate::dedup::DedupGate;
use crate::metrics::MetricsStore;
use crate::providers::{
    ForecastProvider, ForecastSample, Geocoder, GeoLocation, ProviderError, ProviderResult,
};
use crate::storage::DurableLog;
use crate::util::today;
use crate::{MetricFamily, ResolvedLocation};

#[derive(Default)]
pub struct FakeGeocoder {
    calls: AtomicUsize,
    unknown: Mutex<HashSet<String>>,
    failure: Mutex<Option<ProviderError>>,
}

impl FakeGeocoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn mark_unknown(&self, code: &str) {
        self.unknown.lock().unwrap().insert(code.to_string());
    }

    pub fn fail_with(&self, err: ProviderError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn resolve(&self, location_code: &str) -> ProviderResult<GeoLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        if self.unknown.lock().unwrap().contains(location_code) {
            return Err(ProviderError::NotFound(location_code.to_string()));
        }
        Ok(GeoLocation {
            name: format!("City {location_code}"),
            latitude: 40.75,
            longitude: -73.99,
        })
    }
}

#[derive(Default)]
pub struct FakeForecaster {
    calls: AtomicUsize,
    last_sample_count: AtomicU32,
    failure: Mutex<Option<ProviderError>>,
}

impl FakeForecaster {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_sample_count(&self) -> u32 {
        self.last_sample_count.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, err: ProviderError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl ForecastProvider for FakeForecaster {
    async fn forecast(
        &self,
        _latitude: f64,
        _longitude: f64,
        sample_count: u32,
    ) -> ProviderResult<Vec<ForecastSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_sample_count.store(sample_count, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(samples_from(today(), sample_count as usize))
    }
}

/// Three-hourly samples, eight per local day, starting on `start`
pub fn samples_from(start: NaiveDate, count: usize) -> Vec<ForecastSample> {
    (0..count)
        .map(|i| {
            let day = start.checked_add_days(Days::new((i / 8) as u64)).unwrap();
            let hour = (i % 8) as u32 * 3 + 1;
            let timestamp = day
                .and_hms_opt(hour, 0, 0)
                .unwrap()
                .and_local_timezone(Local)
                .earliest()
                .unwrap()
                .timestamp();
            let step = i as f64;
            ForecastSample {
                timestamp,
                temp: 50.0 + step,
                feels_like: 48.0 + step,
                humidity: 40.0 + step,
                wind_speed: 5.0 + step,
                wind_degree: 180.0,
                cloud_percent: 20.0,
            }
        })
        .collect()
}

pub fn location(code: &str, day_count: u32) -> ResolvedLocation {
    ResolvedLocation {
        day_count,
        display_name: format!("City {code}"),
        latitude: 40.75,
        longitude: -73.99,
        location_code: code.to_string(),
        source_line: 1,
    }
}

pub struct TestHarness {
    pub ctx: Arc<PipelineContext>,
    pub geocoder: Arc<FakeGeocoder>,
    pub forecaster: Arc<FakeForecaster>,
    pub broker: Arc<MemoryBroker>,
    pub log: Arc<DurableLog>,
    pub metrics: Arc<MetricsStore>,
    _dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(DurableLog::new(dir.path().join("metrics.jsonl")));
        let geocoder = Arc::new(FakeGeocoder::default());
        let forecaster = Arc::new(FakeForecaster::default());
        let broker = Arc::new(MemoryBroker::new());
        let metrics = Arc::new(MetricsStore::new(AlertThresholds::default()).unwrap());

        let ctx = Arc::new(PipelineContext::new(
            Arc::new(DedupGate::scanning(log.clone())),
            geocoder.clone(),
            forecaster.clone(),
            broker.clone(),
            metrics.clone(),
            log.clone(),
        ));

        Self {
            ctx,
            geocoder,
            forecaster,
            broker,
            log,
            metrics,
            _dir: dir,
        }
    }

    pub async fn provision_topics(&self) {
        for family in MetricFamily::ALL {
            self.broker.ensure_topic(family.topic()).await.unwrap();
        }
    }
}
