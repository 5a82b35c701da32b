//! Measurement producer trait and metadata.
//!
//! Every sensor kind implements [`MeasurementProducer`], which describes
//! itself via [`ProducerInfo`] and yields one [`Measurement`] per read.

use std::fmt;

use serde::Serialize;

use crate::record::{SENSOR_ERROR, Values};

/// Where a producer's readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerCategory {
    /// Locally attached probe.
    Probe,
    /// Remote weather service.
    Weather,
    /// The collector host itself.
    System,
    /// Misconfigured sensor; only reports errors.
    Unknown,
}

impl fmt::Display for ProducerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Weather => write!(f, "weather"),
            Self::System => write!(f, "system"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata about a configured producer.
#[derive(Debug, Clone)]
pub struct ProducerInfo {
    /// Sensor name from the configuration.
    pub name: String,
    /// One-line human-readable description.
    pub description: &'static str,
    pub category: ProducerCategory,
}

/// Telemetry and attributes read for one device at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Measurement {
    pub telemetry: Values,
    pub attributes: Values,
}

impl Measurement {
    pub fn new(telemetry: Values, attributes: Values) -> Self {
        Self {
            telemetry,
            attributes,
        }
    }

    /// A reading that failed: `key` carries the sensor error sentinel.
    pub fn sensor_error(key: impl Into<String>) -> Self {
        let mut telemetry = Values::new();
        telemetry.insert(key, SENSOR_ERROR);
        Self::new(telemetry, Values::new())
    }

    /// `true` if any telemetry value is the sensor error sentinel.
    pub fn has_sensor_error(&self) -> bool {
        self.telemetry.iter().any(|(_, v)| v.is_sensor_error())
    }
}

/// Trait that every measurement producer implements.
///
/// `read` never fails: an unrecoverable read is reported in-band as a
/// sensor error value so the failure still reaches the server.
pub trait MeasurementProducer: Send + Sync {
    fn info(&self) -> &ProducerInfo;

    /// Take one reading.
    fn read(&self) -> Measurement;

    /// Convenience: name from info.
    fn name(&self) -> &str {
        &self.info().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    #[test]
    fn test_sensor_error_measurement() {
        let m = Measurement::sensor_error("temp_porch");
        assert!(m.has_sensor_error());
        assert!(m.attributes.is_empty());
        assert_eq!(m.telemetry.get("temp_porch"), Some(&Value::from("error")));
    }

    #[test]
    fn test_measurement_serializes_both_maps() {
        let mut m = Measurement::default();
        m.telemetry.insert("temp", 70.5);
        m.attributes.insert("latitude", 40.0);
        assert!(!m.has_sensor_error());
        assert_eq!(
            serde_json::to_string(&m).unwrap(),
            r#"{"telemetry":{"temp":70.5},"attributes":{"latitude":40.0}}"#
        );
    }
}
