//! Measurement producer implementations, one per sensor kind.

pub mod helpers;

pub mod ds18b20;
pub mod system;
pub mod weather;

use log::warn;

use crate::config::{Config, SensorConfig, SensorKind};
use crate::delivery::DeliveryError;
use crate::record::Values;
use crate::source::{Measurement, MeasurementProducer, ProducerCategory, ProducerInfo};

pub use ds18b20::Ds18b20Source;
pub use system::SystemStatsSource;
pub use weather::{OpenWeatherMapSource, WeatherUndergroundSource};

/// Stand-in for a sensor whose kind is not recognized.
///
/// Every read reports `temp = "error"` and names the offending device in a
/// `<kind>_error` attribute so the misconfiguration is visible on the server.
pub struct UnknownSource {
    info: ProducerInfo,
    kind: String,
    device: String,
}

impl UnknownSource {
    pub fn new(sensor: &SensorConfig) -> Self {
        Self {
            info: ProducerInfo {
                name: sensor.name.clone(),
                description: "unrecognized sensor kind",
                category: ProducerCategory::Unknown,
            },
            kind: sensor.kind.to_string(),
            device: sensor.device.clone(),
        }
    }
}

impl MeasurementProducer for UnknownSource {
    fn info(&self) -> &ProducerInfo {
        &self.info
    }

    fn read(&self) -> Measurement {
        warn!(
            "{}: unknown sensor kind '{}' for device '{}'",
            self.info.name, self.kind, self.device
        );
        let mut attributes = Values::new();
        attributes.insert(format!("{}_error", self.kind), self.device.as_str());
        let mut m = Measurement::sensor_error("temp");
        m.attributes = attributes;
        m
    }
}

/// Build the producer for one configured sensor.
///
/// Fails only when an HTTP client for a weather service cannot be built.
pub fn producer_for(
    sensor: &SensorConfig,
    config: &Config,
) -> Result<Box<dyn MeasurementProducer>, DeliveryError> {
    Ok(match &sensor.kind {
        SensorKind::Ds18b20 => Box::new(Ds18b20Source::new(sensor)),
        SensorKind::OpenWeatherMap => Box::new(OpenWeatherMapSource::new(sensor, config)?),
        SensorKind::WeatherUnderground => Box::new(WeatherUndergroundSource::new(sensor, config)?),
        SensorKind::SystemStats => Box::new(SystemStatsSource::from_sensor(sensor)),
        SensorKind::Other(_) => Box::new(UnknownSource::new(sensor)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    const CONFIG: &str = r#"
[connection]
server = "localhost"

[[sensors]]
name = "probe"
authkey = "k1"
kind = "ds18b20"
device = "/nonexistent/w1_slave"

[[sensors]]
name = "weather"
authkey = "k2"
kind = "owm"
device = "10001"

[[sensors]]
name = "host"
authkey = "k3"
kind = "system"

[[sensors]]
name = "mystery"
authkey = "k4"
kind = "dht22"
device = "gpio4"
"#;

    #[test]
    fn test_producer_for_dispatches_on_kind() {
        let config = Config::from_toml(CONFIG).unwrap();
        let categories: Vec<(String, ProducerCategory)> = config
            .sensors
            .iter()
            .map(|s| {
                let p = producer_for(s, &config).unwrap();
                (p.name().to_string(), p.info().category)
            })
            .collect();
        assert_eq!(
            categories,
            vec![
                ("probe".to_string(), ProducerCategory::Probe),
                ("weather".to_string(), ProducerCategory::Weather),
                ("host".to_string(), ProducerCategory::System),
                ("mystery".to_string(), ProducerCategory::Unknown),
            ]
        );
    }

    #[test]
    fn test_unknown_kind_reports_error() {
        let config = Config::from_toml(CONFIG).unwrap();
        let sensor = config.sensor("mystery").unwrap();
        let m = producer_for(sensor, &config).unwrap().read();

        assert!(m.telemetry.get("temp").unwrap().is_sensor_error());
        assert_eq!(m.attributes.get("dht22_error"), Some(&Value::from("gpio4")));
    }
}
