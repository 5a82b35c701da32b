//! `sensorcast drain`: replay cached records on demand.

use std::path::Path;

use sensorcast_core::{CacheDrainer, CacheStore, DeviceDrain};

use super::{load_config, local_only_keys, make_delivery};

pub fn run(config_path: &Path, device: Option<&str>) {
    let config = load_config(config_path);
    let delivery = make_delivery(&config);
    let cache = CacheStore::new(&config.cache.dir);
    let drainer = CacheDrainer::new(&delivery, &cache);

    let drained = match device {
        Some(key) => vec![DeviceDrain {
            device_key: key.to_string(),
            result: drainer.drain(key),
        }],
        None => {
            let local_only = local_only_keys(&config);
            match drainer.drain_all(|key| !local_only.contains(key)) {
                Ok(drained) => drained,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
    };

    if drained.is_empty() {
        println!("Nothing to drain in {}", config.cache.dir.display());
        return;
    }

    let mut failed = false;
    for DeviceDrain { device_key, result } in &drained {
        match result {
            Ok(report) => {
                println!(
                    "  {device_key:<24} {}/{} acknowledged, {}/{} files removed",
                    report.records_acknowledged,
                    report.records_replayed,
                    report.files_deleted,
                    report.files_processed
                );
                if report.files_set_aside > 0 {
                    println!(
                        "  {:<24} {} malformed lines moved aside in {} .rejected files",
                        "", report.records_malformed, report.files_set_aside
                    );
                }
            }
            Err(e) => {
                eprintln!("  {device_key:<24} error: {e}");
                failed = true;
            }
        }
    }

    let total = DeviceDrain::total(&drained);
    println!();
    println!(
        "Drained {} devices: {}/{} records acknowledged, {} files removed",
        drained.len(),
        total.records_acknowledged,
        total.records_replayed,
        total.files_deleted
    );
    if failed || !total.is_complete() {
        println!("Records still cached will be retried on the next drain.");
    }
}
