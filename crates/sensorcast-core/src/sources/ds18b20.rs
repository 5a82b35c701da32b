//! Dallas DS18B20 one-wire temperature probe.
//!
//! The kernel `w1_therm` driver exposes each probe as a `w1_slave` file:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` when the CRC matched; `t=` on the second line
//! is the temperature in thousandths of a degree Celsius.

use std::path::PathBuf;

use log::warn;

use crate::config::SensorConfig;
use crate::record::Values;
use crate::source::{Measurement, MeasurementProducer, ProducerCategory, ProducerInfo};
use crate::units::{c_to_f, round_to};

/// Parse a `w1_slave` dump into degrees Celsius.
///
/// Returns `None` when the CRC check failed or the `t=` token is missing.
pub fn parse_w1_slave(text: &str) -> Option<f64> {
    let mut lines = text.lines();
    let crc = lines.next()?;
    if crc.trim_end().ends_with("NO") {
        return None;
    }
    let (_, raw) = lines.next()?.split_once("t=")?;
    let milli: i64 = raw.trim().parse().ok()?;
    Some(milli as f64 / 1000.0)
}

pub struct Ds18b20Source {
    info: ProducerInfo,
    path: PathBuf,
    key: String,
}

impl Ds18b20Source {
    pub fn new(sensor: &SensorConfig) -> Self {
        Self {
            info: ProducerInfo {
                name: sensor.name.clone(),
                description: "DS18B20 one-wire temperature probe",
                category: ProducerCategory::Probe,
            },
            path: PathBuf::from(&sensor.device),
            key: format!("temp{}", sensor.label),
        }
    }
}

impl MeasurementProducer for Ds18b20Source {
    fn info(&self) -> &ProducerInfo {
        &self.info
    }

    fn read(&self) -> Measurement {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("{}: cannot read {}: {e}", self.info.name, self.path.display());
                return Measurement::sensor_error(&self.key);
            }
        };
        let Some(celsius) = parse_w1_slave(&text) else {
            warn!(
                "{}: no valid reading in {}",
                self.info.name,
                self.path.display()
            );
            return Measurement::sensor_error(&self.key);
        };

        let mut telemetry = Values::new();
        telemetry.insert_finite(&self.key, round_to(c_to_f(celsius), 1));
        Measurement::new(telemetry, Values::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorKind;
    use crate::record::Value;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    fn sensor(device: &str, label: &str) -> SensorConfig {
        SensorConfig {
            name: "porch".to_string(),
            authkey: "abc123".to_string(),
            kind: SensorKind::Ds18b20,
            device: device.to_string(),
            label: label.to_string(),
            cache_on_error: true,
            local_only: false,
        }
    }

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave(GOOD), Some(23.125));
        assert_eq!(parse_w1_slave("crc=00 YES\nxx t=-1250\n"), Some(-1.25));
    }

    #[test]
    fn test_parse_w1_slave_rejects_bad_reads() {
        assert_eq!(parse_w1_slave("crc=57 NO\n72 01 t=23125\n"), None);
        assert_eq!(parse_w1_slave("crc=57 YES\n"), None);
        assert_eq!(parse_w1_slave("crc=57 YES\n72 01 4b\n"), None);
        assert_eq!(parse_w1_slave(""), None);
    }

    #[test]
    fn test_read_reports_fahrenheit_with_label() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("w1_slave");
        std::fs::write(&path, GOOD).unwrap();

        let source = Ds18b20Source::new(&sensor(path.to_str().unwrap(), "_porch"));
        let m = source.read();

        // 23.125 °C = 73.625 °F
        assert_eq!(m.telemetry.get("temp_porch"), Some(&Value::Float(73.6)));
        assert!(m.attributes.is_empty());
    }

    #[test]
    fn test_missing_probe_is_sensor_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gone");

        let source = Ds18b20Source::new(&sensor(path.to_str().unwrap(), "_attic"));
        let m = source.read();

        assert!(m.has_sensor_error());
        assert!(m.telemetry.get("temp_attic").unwrap().is_sensor_error());
    }
}
