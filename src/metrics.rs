//! Prometheus gauges for every reading family and threshold alert
//!
//! Every gauge is a `prometheus::GaugeVec` labelled by `location` and `date`,
//! registered in a registry owned by the store. The exposition handler
//! renders that registry with the text encoder.
//!
//! Alert gauges are derived: they are recomputed from the static thresholds
//! every time the underlying reading is recorded, and are 1 when the value
//! crosses the threshold, 0 otherwise.

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, trace};

use crate::Reading;
use crate::config::AlertThresholds;
use crate::storage::{DurableLog, StorageResult};

const LABELS: [&str; 2] = ["location", "date"];

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), &LABELS)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Threshold alerts derived from readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    TemperatureHigh,
    TemperatureLow,
    HumidityHigh,
    HumidityLow,
    WindHigh,
}

impl Alert {
    pub const ALL: [Alert; 5] = [
        Alert::TemperatureHigh,
        Alert::TemperatureLow,
        Alert::HumidityHigh,
        Alert::HumidityLow,
        Alert::WindHigh,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Alert::TemperatureHigh => "alert_temperature_high",
            Alert::TemperatureLow => "alert_temperature_low",
            Alert::HumidityHigh => "alert_humidity_high",
            Alert::HumidityLow => "alert_humidity_low",
            Alert::WindHigh => "alert_wind_high",
        }
    }

    fn help(&self) -> &'static str {
        match self {
            Alert::TemperatureHigh => "1 if temperature is above TEMP_HIGH, else 0",
            Alert::TemperatureLow => "1 if temperature is below TEMP_LOW, else 0",
            Alert::HumidityHigh => "1 if humidity is above HUMIDITY_HIGH, else 0",
            Alert::HumidityLow => "1 if humidity is below HUMIDITY_LOW, else 0",
            Alert::WindHigh => "1 if wind speed is above WIND_SPEED_HIGH, else 0",
        }
    }

    /// Whether `reading` crosses this alert's threshold.
    ///
    /// `None` when the reading belongs to a family this alert does not watch.
    pub fn evaluate(&self, thresholds: &AlertThresholds, reading: &Reading) -> Option<bool> {
        match (self, reading) {
            (Alert::TemperatureHigh, Reading::Temperature { temp, .. }) => {
                Some(*temp > thresholds.temp_high)
            }
            (Alert::TemperatureLow, Reading::Temperature { temp, .. }) => {
                Some(*temp < thresholds.temp_low)
            }
            (Alert::HumidityHigh, Reading::Humidity { humidity }) => {
                Some(*humidity > thresholds.humidity_high)
            }
            (Alert::HumidityLow, Reading::Humidity { humidity }) => {
                Some(*humidity < thresholds.humidity_low)
            }
            (Alert::WindHigh, Reading::Wind { speed, .. }) => Some(*speed > thresholds.wind_high),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Owned store of every gauge the pipeline exposes
pub struct MetricsStore {
    registry: Registry,
    thresholds: AlertThresholds,
    temperature: GaugeVec,
    feels_like: GaugeVec,
    humidity: GaugeVec,
    wind_speed: GaugeVec,
    wind_degree: GaugeVec,
    cloud_percent: GaugeVec,
    alerts: Vec<GaugeVec>,
}

impl MetricsStore {
    pub fn new(thresholds: AlertThresholds) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let alerts = Alert::ALL
            .iter()
            .map(|alert| gauge(&registry, alert.name(), alert.help()))
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            thresholds,
            temperature: gauge(&registry, "temperature", "Temperature in Fahrenheit")?,
            feels_like: gauge(&registry, "feelslike", "Temperature in Fahrenheit")?,
            humidity: gauge(&registry, "humidity", "Humidity Percentage")?,
            wind_speed: gauge(&registry, "wind_speed", "Wind Speed in MPH")?,
            wind_degree: gauge(&registry, "wind_degree", "Wind Direction in Degrees")?,
            cloud_percent: gauge(&registry, "cloud_percent", "Cloud cover percentage")?,
            alerts,
            registry,
        })
    }

    /// Set the family gauges for a reading and recompute its alerts
    pub fn record(&self, location: &str, date: &str, reading: &Reading) {
        trace!("recording {:?} for {location} on {date}", reading.family());
        let labels = [location, date];

        match *reading {
            Reading::Temperature { temp, feels_like } => {
                self.temperature.with_label_values(&labels).set(temp);
                self.feels_like.with_label_values(&labels).set(feels_like);
            }
            Reading::Humidity { humidity } => {
                self.humidity.with_label_values(&labels).set(humidity)
            }
            Reading::Wind { speed, degree } => {
                self.wind_speed.with_label_values(&labels).set(speed);
                self.wind_degree.with_label_values(&labels).set(degree);
            }
            Reading::Cloud { cloud_percent } => {
                self.cloud_percent.with_label_values(&labels).set(cloud_percent)
            }
        }

        for alert in Alert::ALL {
            if let Some(crossed) = alert.evaluate(&self.thresholds, reading) {
                let value = if crossed { 1.0 } else { 0.0 };
                self.alerts[alert.index()].with_label_values(&labels).set(value);
            }
        }
    }

    fn family(&self, name: &str) -> Option<MetricFamily> {
        self.registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
    }

    /// Current value of a gauge by its exposed name.
    ///
    /// Reads the gathered families so a lookup never creates a series.
    pub fn value(&self, gauge: &str, location: &str, date: &str) -> Option<f64> {
        let family = self.family(gauge)?;
        family
            .get_metric()
            .iter()
            .find(|metric| {
                metric.get_label().iter().all(|pair| match pair.get_name() {
                    "location" => pair.get_value() == location,
                    "date" => pair.get_value() == date,
                    _ => true,
                })
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Current state of an alert gauge
    pub fn alert(&self, alert: Alert, location: &str, date: &str) -> Option<bool> {
        self.value(alert.name(), location, date).map(|value| value > 0.5)
    }

    /// Number of (location, date) series held by a gauge
    pub fn series_count(&self, gauge: &str) -> usize {
        self.family(gauge)
            .map(|family| family.get_metric().len())
            .unwrap_or(0)
    }

    /// All gauges in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Seed the gauges from every record in the durable log.
    ///
    /// Records are applied in log order, so the last line for a key wins.
    pub async fn replay(&self, log: &DurableLog) -> StorageResult<usize> {
        let samples = log.read_all().await?;
        let mut applied = 0;

        for sample in &samples {
            if let Some(reading) = sample.reading() {
                self.record(&sample.zip, &sample.date, &reading);
                applied += 1;
            }
        }

        debug!(
            "replayed {applied} of {} records from {}",
            samples.len(),
            log.path().display()
        );
        Ok(applied)
    }
}
