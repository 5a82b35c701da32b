//! `sensorcast read` and `sensorcast system`: take one measurement and print
//! it as JSON without publishing.

use std::path::Path;

use sensorcast_core::sources::{SystemStatsSource, producer_for};
use sensorcast_core::{Measurement, MeasurementProducer};

use super::load_config;

pub fn run(config_path: &Path, sensor_name: &str) {
    let config = load_config(config_path);
    let Some(sensor) = config.sensor(sensor_name) else {
        let names: Vec<&str> = config.sensors.iter().map(|s| s.name.as_str()).collect();
        eprintln!(
            "Error: no sensor named '{sensor_name}' (configured: {})",
            names.join(", ")
        );
        std::process::exit(1);
    };

    let producer = match producer_for(sensor, &config) {
        Ok(producer) => producer,
        Err(e) => {
            eprintln!("Error creating sensor '{sensor_name}': {e}");
            std::process::exit(1);
        }
    };
    print_measurement(&producer.read());
}

pub fn run_system() {
    print_measurement(&SystemStatsSource::new("system").read());
}

fn print_measurement(measurement: &Measurement) {
    match serde_json::to_string_pretty(measurement) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
