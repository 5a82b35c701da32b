//! Cache readings during an outage and replay them once the server is back.
//!
//! Uses an in-process endpoint so it runs without a telemetry server.
//!
//! Run: `cargo run --example store_and_forward`

use std::sync::atomic::{AtomicBool, Ordering};

use sensorcast_core::{
    CacheDrainer, CacheStore, DeliveryClient, Publisher, SubmissionKind, SubmissionOutcome,
    Values,
};

/// Endpoint that can be switched on and off.
struct ToggleEndpoint {
    online: AtomicBool,
}

impl DeliveryClient for ToggleEndpoint {
    fn submit(&self, device_key: &str, kind: SubmissionKind, payload: &str) -> SubmissionOutcome {
        if self.online.load(Ordering::SeqCst) {
            println!("  -> {device_key}/{kind}: {payload}");
            SubmissionOutcome::Delivered
        } else {
            SubmissionOutcome::TransientFailure {
                status: None,
                reason: "endpoint offline".to_string(),
            }
        }
    }
}

fn main() {
    let dir = std::env::temp_dir().join("sensorcast-example");
    let cache = CacheStore::new(&dir);
    let endpoint = ToggleEndpoint {
        online: AtomicBool::new(false),
    };
    let publisher = Publisher::new(&endpoint, &cache);

    println!("Endpoint offline, publishing 3 readings to {}", dir.display());
    for temp in [68.2, 68.9, 69.4] {
        let mut telemetry = Values::new();
        telemetry.insert("temp_porch", temp);
        let result = publisher.publish(&Values::new(), &telemetry, "demo", true, false);
        println!("  {temp} °F: {result:?}");
    }

    let status = cache.status().expect("Failed to read cache");
    println!("Cache: {} files, {} records", status.files, status.records);

    println!("Endpoint online, draining");
    endpoint.online.store(true, Ordering::SeqCst);
    let report = CacheDrainer::new(&endpoint, &cache)
        .drain("demo")
        .expect("Failed to drain cache");
    println!(
        "Done. {}/{} records acknowledged, {} files removed",
        report.records_acknowledged, report.records_replayed, report.files_deleted
    );
}
