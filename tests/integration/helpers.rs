//! Fake providers and a wired-up pipeline context for integration tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use forecast_ingest::broker::MemoryBroker;
use forecast_ingest::config::AlertThresholds;
use forecast_ingest::dedup::{DedupGate, DedupStrategy};
use forecast_ingest::metrics::MetricsStore;
use forecast_ingest::pipeline::PipelineContext;
use forecast_ingest::providers::{
    ForecastProvider, ForecastSample, Geocoder, GeoLocation, ProviderError, ProviderResult,
};
use forecast_ingest::storage::{AggregatedSample, DurableLog};
use forecast_ingest::util::today;
use forecast_ingest::{DATE_FORMAT, MetricFamily};
use tempfile::TempDir;

#[derive(Default)]
pub struct StubGeocoder {
    calls: AtomicUsize,
    unknown: Mutex<HashSet<String>>,
    failure: Mutex<Option<ProviderError>>,
}

impl StubGeocoder {
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
impl Geocoder for StubGeocoder {
    async fn resolve(&self, location_code: &str) -> ProviderResult<GeoLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        if self.unknown.lock().unwrap().contains(location_code) {
            return Err(ProviderError::NotFound(location_code.to_string()));
        }
        Ok(GeoLocation {
            name: format!("Town {location_code}"),
            latitude: 41.88,
            longitude: -87.63,
        })
    }
}

#[derive(Default)]
pub struct StubForecaster {
    calls: AtomicUsize,
}

impl StubForecaster {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastProvider for StubForecaster {
    async fn forecast(
        &self,
        _latitude: f64,
        _longitude: f64,
        sample_count: u32,
    ) -> ProviderResult<Vec<ForecastSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(forecast_from(today(), sample_count as usize))
    }
}

/// Three-hourly samples, eight per local day; the first of day `d` has
/// temperature `60 + d`.
pub fn forecast_from(start: NaiveDate, count: usize) -> Vec<ForecastSample> {
    (0..count)
        .map(|i| {
            let day = (i / 8) as u64;
            let slot = (i % 8) as u32;
            let timestamp = start
                .checked_add_days(Days::new(day))
                .unwrap()
                .and_hms_opt(slot * 3 + 1, 30, 0)
                .unwrap()
                .and_local_timezone(Local)
                .earliest()
                .unwrap()
                .timestamp();
            ForecastSample {
                timestamp,
                temp: 60.0 + day as f64 + slot as f64 * 0.5,
                feels_like: 58.0 + day as f64,
                humidity: 55.0,
                wind_speed: 8.0,
                wind_degree: 200.0,
                cloud_percent: 35.0,
            }
        })
        .collect()
}

pub fn day_offset(days: u64) -> String {
    today()
        .checked_add_days(Days::new(days))
        .unwrap()
        .format(DATE_FORMAT)
        .to_string()
}

pub fn record(zip: &str, date: &str) -> AggregatedSample {
    AggregatedSample {
        topic: MetricFamily::Temperature.topic().to_string(),
        zip: zip.to_string(),
        date: date.to_string(),
        temp: 70.0,
        feels_like: 70.0,
        ..Default::default()
    }
}

pub struct Fixture {
    pub geocoder: Arc<StubGeocoder>,
    pub forecaster: Arc<StubForecaster>,
    pub broker: Arc<MemoryBroker>,
    pub metrics: Arc<MetricsStore>,
    pub log: Arc<DurableLog>,
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            geocoder: Arc::new(StubGeocoder::default()),
            forecaster: Arc::new(StubForecaster::default()),
            broker: Arc::new(MemoryBroker::new()),
            metrics: Arc::new(MetricsStore::new(AlertThresholds::default()).unwrap()),
            log: Arc::new(DurableLog::new(dir.path().join("metrics.jsonl"))),
            dir,
        }
    }

    pub async fn seed(&self, records: &[AggregatedSample]) {
        for record in records {
            self.log.append(record).await.unwrap();
        }
    }

    pub async fn context(&self, strategy: DedupStrategy) -> Arc<PipelineContext> {
        let dedup = DedupGate::with_strategy(self.log.clone(), strategy).await;
        Arc::new(PipelineContext::new(
            Arc::new(dedup),
            self.geocoder.clone(),
            self.forecaster.clone(),
            self.broker.clone(),
            self.metrics.clone(),
            self.log.clone(),
        ))
    }

    pub fn log_lines(&self) -> usize {
        std::fs::read_to_string(self.dir.path().join("metrics.jsonl"))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }
}
