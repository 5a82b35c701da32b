//! # sensorcast-core
//!
//! **Store-and-forward telemetry for small sensor hosts.**
//!
//! `sensorcast-core` reads measurements from local probes, weather services and
//! the host itself, and delivers them to a ThingsBoard-style HTTP endpoint.
//! Whatever cannot be delivered is written to a durable on-disk cache and
//! replayed, oldest first, once the endpoint is reachable again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sensorcast_core::{CacheDrainer, CacheStore, Config, HttpDelivery, Publisher};
//! use sensorcast_core::sources::producer_for;
//!
//! let config = Config::from_file("sensorcast.toml".as_ref()).unwrap();
//! let delivery = HttpDelivery::from_config(&config).unwrap();
//! let cache = CacheStore::new(&config.cache.dir);
//!
//! for sensor in &config.sensors {
//!     let m = producer_for(sensor, &config).unwrap().read();
//!     Publisher::new(&delivery, &cache).publish(
//!         &m.attributes,
//!         &m.telemetry,
//!         &sensor.authkey,
//!         sensor.cache_on_error,
//!         sensor.local_only,
//!     );
//!     CacheDrainer::new(&delivery, &cache).drain(&sensor.authkey).unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! Producer → Publisher → Delivery client, or Cache store on failure.
//! Independently: Drainer → Cache store → Delivery client → delete on full
//! acknowledgement.
//!
//! Delivery is at-least-once. A cache file is removed only after every line
//! in it was acknowledged in one pass, so a partially replayed file is sent
//! again in full and the endpoint may see duplicates.

pub mod cache;
pub mod config;
pub mod delivery;
pub mod drain;
pub mod publisher;
pub mod record;
pub mod source;
pub mod sources;
pub mod units;

pub use cache::{
    CACHE_EXTENSION, CacheError, CacheFile, CacheRecords, CacheStatus, CacheStore, CachedLine,
    DeviceCacheStatus, DeviceGuard, validate_device_key,
};
pub use config::{
    CacheConfig, CollectorConfig, Config, ConfigError, ConnectionConfig, ProxyConfig,
    SensorConfig, SensorKind, Transport, WeatherConfig,
};
pub use delivery::{
    DeliveryClient, DeliveryError, HttpDelivery, SubmissionKind, SubmissionOutcome,
    submission_url,
};
pub use drain::{CacheDrainer, DeviceDrain, DrainReport};
pub use publisher::{Attempt, PublishResult, Publisher};
pub use record::{Record, SENSOR_ERROR, Value, Values, unix_ms_now};
pub use source::{Measurement, MeasurementProducer, ProducerCategory, ProducerInfo};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
