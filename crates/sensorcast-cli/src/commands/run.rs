//! `sensorcast run`: the collection loop.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use sensorcast_core::sources::producer_for;
use sensorcast_core::{
    CacheDrainer, CacheStore, Config, DeliveryClient, MeasurementProducer, PublishResult,
    Publisher, SensorConfig,
};

use super::{load_config, make_delivery, parse_duration};

/// Totals for one pass over every sensor.
#[derive(Debug, Default, PartialEq, Eq)]
struct RoundSummary {
    delivered: usize,
    cached: usize,
    failed: usize,
    replayed: usize,
}

/// Run the collection loop.
pub fn run(config_path: &Path, once: bool, interval: Option<&str>) {
    let config = load_config(config_path);
    let interval = match interval {
        Some(s) => parse_duration(s).unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }),
        None => Duration::from_secs(config.collector.interval_secs),
    };

    if config.sensors.is_empty() {
        eprintln!("Error: no [[sensors]] configured in {}", config_path.display());
        std::process::exit(1);
    }

    let delivery = make_delivery(&config);
    let cache = CacheStore::new(&config.cache.dir);
    let producers = build_producers(&config);

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("cannot install Ctrl+C handler: {e}");
    }

    println!("Collecting");
    println!("  Server:    {}://{}", config.connection.method, config.connection.server);
    println!("  Sensors:   {}", producers.len());
    println!("  Cache:     {}", config.cache.dir.display());
    if once {
        println!("  Interval:  single round");
    } else {
        println!("  Interval:  {}s", interval.as_secs());
    }
    println!();

    let mut round = 0u64;
    while running.load(Ordering::SeqCst) {
        round += 1;
        let started = Instant::now();
        let summary = run_round(&config, &producers, &delivery, &cache, &running);
        info!(
            "round {round}: {} delivered, {} cached, {} failed, {} cached records replayed in {:.1}s",
            summary.delivered,
            summary.cached,
            summary.failed,
            summary.replayed,
            started.elapsed().as_secs_f64()
        );

        if once {
            break;
        }

        let deadline = Instant::now() + interval;
        while Instant::now() < deadline && running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    println!("Stopped after {round} rounds.");
}

fn build_producers(config: &Config) -> Vec<(&SensorConfig, Box<dyn MeasurementProducer>)> {
    config
        .sensors
        .iter()
        .map(|sensor| match producer_for(sensor, config) {
            Ok(producer) => (sensor, producer),
            Err(e) => {
                eprintln!("Error creating sensor '{}': {e}", sensor.name);
                std::process::exit(1);
            }
        })
        .collect()
}

/// Read, publish and drain every sensor once.
///
/// Each device key is drained at most once per round, after all of its
/// sensors have been published, and never for a local-only sensor.
fn run_round(
    config: &Config,
    producers: &[(&SensorConfig, Box<dyn MeasurementProducer>)],
    delivery: &dyn DeliveryClient,
    cache: &CacheStore,
    running: &AtomicBool,
) -> RoundSummary {
    match cache.status() {
        Ok(status) if !status.is_empty() => info!(
            "cache holds {} records in {} files",
            status.records, status.files
        ),
        Ok(_) => {}
        Err(e) => warn!("cannot read cache status: {e}"),
    }

    let publisher = Publisher::new(delivery, cache);
    let mut summary = RoundSummary::default();
    let mut to_drain: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();

    for (sensor, producer) in producers {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let measurement = producer.read();
        let result = publisher.publish(
            &measurement.attributes,
            &measurement.telemetry,
            &sensor.authkey,
            sensor.cache_on_error,
            sensor.local_only,
        );
        tally(&mut summary, &result);
        if result.is_configuration_error() {
            error!(
                "{}: check [connection] settings, transport '{}' is not usable",
                sensor.name, config.connection.method
            );
        }

        if config.collector.drain_after_publish
            && !sensor.local_only
            && result.is_success()
            && seen.insert(sensor.authkey.as_str())
        {
            to_drain.push(&sensor.authkey);
        }
    }

    let drainer = CacheDrainer::new(delivery, cache);
    for device_key in to_drain {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match drainer.drain(device_key) {
            Ok(report) => summary.replayed += report.records_acknowledged,
            Err(e) => error!("{device_key}: cannot drain cache: {e}"),
        }
    }
    summary
}

fn tally(summary: &mut RoundSummary, result: &PublishResult) {
    match result {
        PublishResult::Delivered => summary.delivered += 1,
        PublishResult::StoredLocally | PublishResult::Cached { .. } => summary.cached += 1,
        PublishResult::Dropped { .. } | PublishResult::Lost { .. } => summary.failed += 1,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sensorcast_core::{Measurement, ProducerCategory, ProducerInfo, SubmissionKind, SubmissionOutcome, Values};

    use super::*;

    struct FixedProducer {
        info: ProducerInfo,
    }

    impl MeasurementProducer for FixedProducer {
        fn info(&self) -> &ProducerInfo {
            &self.info
        }

        fn read(&self) -> Measurement {
            let mut telemetry = Values::new();
            telemetry.insert("temp", 70);
            Measurement::new(telemetry, Values::new())
        }
    }

    /// Records telemetry submissions per device; the endpoint is always up.
    #[derive(Default)]
    struct RecordingDelivery {
        telemetry: Mutex<Vec<String>>,
    }

    impl DeliveryClient for RecordingDelivery {
        fn submit(&self, device_key: &str, kind: SubmissionKind, _payload: &str) -> SubmissionOutcome {
            if kind == SubmissionKind::Telemetry {
                self.telemetry.lock().unwrap().push(device_key.to_string());
            }
            SubmissionOutcome::Delivered
        }
    }

    fn producer(name: &str) -> Box<dyn MeasurementProducer> {
        Box::new(FixedProducer {
            info: ProducerInfo {
                name: name.to_string(),
                description: "fixed",
                category: ProducerCategory::Probe,
            },
        })
    }

    const CONFIG: &str = r#"
[connection]
server = "localhost"

[[sensors]]
name = "porch"
authkey = "live1"
kind = "ds18b20"
label = "_porch"

[[sensors]]
name = "attic"
authkey = "live1"
kind = "ds18b20"
label = "_attic"

[[sensors]]
name = "shed"
authkey = "offline1"
kind = "ds18b20"
local_only = true
"#;

    #[test]
    fn test_round_publishes_and_drains_each_live_device_once() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_toml(CONFIG).unwrap();
        let cache = CacheStore::new(tmp.path());
        // Two records from an earlier outage.
        let old = sensorcast_core::Record::new(1, Values::new());
        cache.append("live1", &old).unwrap();
        cache.append("live1", &old).unwrap();

        let producers: Vec<_> = config.sensors.iter().map(|s| (s, producer(&s.name))).collect();
        let delivery = RecordingDelivery::default();
        let running = AtomicBool::new(true);

        let summary = run_round(&config, &producers, &delivery, &cache, &running);

        assert_eq!(
            summary,
            RoundSummary {
                delivered: 2,
                cached: 1,
                failed: 0,
                replayed: 2,
            }
        );
        // Two live publishes plus two replayed records, all for live1.
        let sent = delivery.telemetry.lock().unwrap().clone();
        assert_eq!(sent, vec!["live1"; 4]);
        // The local-only record stays in the cache.
        assert_eq!(cache.devices().unwrap(), vec!["offline1"]);
    }

    #[test]
    fn test_round_stops_when_interrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_toml(CONFIG).unwrap();
        let cache = CacheStore::new(tmp.path());
        let producers: Vec<_> = config.sensors.iter().map(|s| (s, producer(&s.name))).collect();
        let delivery = RecordingDelivery::default();
        let running = AtomicBool::new(false);

        let summary = run_round(&config, &producers, &delivery, &cache, &running);

        assert_eq!(summary, RoundSummary::default());
        assert!(delivery.telemetry.lock().unwrap().is_empty());
    }
}
