//! One publish attempt for one device: send live, or fall back to the cache.

use log::{error, info, warn};

use crate::cache::{CacheError, CacheStore};
use crate::delivery::{DeliveryClient, SubmissionKind, SubmissionOutcome};
use crate::record::{Record, Values};

/// Outcomes of the attributes and telemetry submissions of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub attributes: SubmissionOutcome,
    pub telemetry: SubmissionOutcome,
}

impl Attempt {
    /// Both submissions were acknowledged.
    pub fn is_delivered(&self) -> bool {
        self.attributes.is_delivered() && self.telemetry.is_delivered()
    }

    pub fn has_configuration_error(&self) -> bool {
        self.attributes.is_configuration_error() || self.telemetry.is_configuration_error()
    }
}

/// What happened to a published record.
#[derive(Debug)]
pub enum PublishResult {
    /// Attributes and telemetry were both acknowledged.
    Delivered,
    /// Local-only device: the record went straight to the cache.
    StoredLocally,
    /// Delivery failed; the record was cached for a later drain.
    Cached { attempt: Attempt },
    /// Delivery failed and caching is disabled for this device.
    Dropped { attempt: Attempt },
    /// The record could not be delivered nor cached. `attempt` is `None`
    /// for a local-only device, where no delivery was tried.
    Lost {
        attempt: Option<Attempt>,
        cache_error: CacheError,
    },
}

impl PublishResult {
    /// Aggregate success: both submissions were delivered.
    pub fn is_success(&self) -> bool {
        matches!(self, PublishResult::Delivered)
    }

    /// The record is durable somewhere: delivered or cached.
    pub fn is_safe(&self) -> bool {
        matches!(
            self,
            PublishResult::Delivered | PublishResult::StoredLocally | PublishResult::Cached { .. }
        )
    }

    /// The delivery client reported an unrecoverable configuration problem.
    pub fn is_configuration_error(&self) -> bool {
        self.attempt().is_some_and(Attempt::has_configuration_error)
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        match self {
            PublishResult::Cached { attempt } | PublishResult::Dropped { attempt } => Some(attempt),
            PublishResult::Lost { attempt, .. } => attempt.as_ref(),
            PublishResult::Delivered | PublishResult::StoredLocally => None,
        }
    }
}

/// Sends measurements for devices, caching telemetry that cannot be delivered.
pub struct Publisher<'a> {
    delivery: &'a dyn DeliveryClient,
    cache: &'a CacheStore,
}

impl<'a> Publisher<'a> {
    pub fn new(delivery: &'a dyn DeliveryClient, cache: &'a CacheStore) -> Self {
        Self { delivery, cache }
    }

    /// Publish one measurement for `device_key`.
    ///
    /// Telemetry is stamped with the current time. With `local_only` the
    /// record is only cached. Otherwise attributes and telemetry are both
    /// submitted; if either fails, the telemetry record is cached when
    /// `cache_on_error` is set and dropped when it is not. Attributes are
    /// never cached: the next successful attempt supersedes them.
    pub fn publish(
        &self,
        attributes: &Values,
        telemetry: &Values,
        device_key: &str,
        cache_on_error: bool,
        local_only: bool,
    ) -> PublishResult {
        let record = Record::now(telemetry.clone());

        if local_only {
            return match self.cache.append(device_key, &record) {
                Ok(()) => {
                    info!(
                        "{device_key}: local-only device, cached record with {} values",
                        record.values.len()
                    );
                    PublishResult::StoredLocally
                }
                Err(e) => {
                    error!("{device_key}: local-only device, record lost: {e}");
                    PublishResult::Lost {
                        attempt: None,
                        cache_error: e,
                    }
                }
            };
        }

        let attempt = Attempt {
            attributes: self.delivery.submit(
                device_key,
                SubmissionKind::Attributes,
                &attributes.to_json(),
            ),
            telemetry: self.delivery.submit(
                device_key,
                SubmissionKind::Telemetry,
                &record.to_line(),
            ),
        };

        if attempt.is_delivered() {
            info!(
                "{device_key}: published {} telemetry values and {} attributes",
                record.values.len(),
                attributes.len()
            );
            return PublishResult::Delivered;
        }

        if attempt.has_configuration_error() {
            error!(
                "{device_key}: cannot publish, attributes {}, telemetry {}",
                attempt.attributes, attempt.telemetry
            );
        } else {
            warn!(
                "{device_key}: unable to publish, returned codes: attributes {}, telemetry {} ({})",
                status_label(&attempt.attributes),
                status_label(&attempt.telemetry),
                first_failure(&attempt)
            );
        }

        if !cache_on_error {
            warn!("{device_key}: record not cached, caching disabled for this device");
            return PublishResult::Dropped { attempt };
        }

        match self.cache.append(device_key, &record) {
            Ok(()) => {
                info!("{device_key}: record cached for later delivery");
                PublishResult::Cached { attempt }
            }
            Err(e) => {
                error!("{device_key}: delivery failed and record could not be cached: {e}");
                PublishResult::Lost {
                    attempt: Some(attempt),
                    cache_error: e,
                }
            }
        }
    }
}

fn status_label(outcome: &SubmissionOutcome) -> String {
    outcome
        .status()
        .map_or_else(|| "none".to_string(), |code| code.to_string())
}

fn first_failure(attempt: &Attempt) -> &SubmissionOutcome {
    if attempt.attributes.is_delivered() {
        &attempt.telemetry
    } else {
        &attempt.attributes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::record::Value;

    /// Answers attributes and telemetry with fixed outcomes and records calls.
    struct FixedDelivery {
        attributes: SubmissionOutcome,
        telemetry: SubmissionOutcome,
        calls: Mutex<Vec<(String, SubmissionKind, String)>>,
    }

    impl FixedDelivery {
        fn new(attributes: SubmissionOutcome, telemetry: SubmissionOutcome) -> Self {
            Self {
                attributes,
                telemetry,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, SubmissionKind, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeliveryClient for FixedDelivery {
        fn submit(&self, device_key: &str, kind: SubmissionKind, payload: &str) -> SubmissionOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((device_key.to_string(), kind, payload.to_string()));
            match kind {
                SubmissionKind::Attributes => self.attributes.clone(),
                SubmissionKind::Telemetry => self.telemetry.clone(),
            }
        }
    }

    fn transient(status: Option<u16>) -> SubmissionOutcome {
        SubmissionOutcome::TransientFailure {
            status,
            reason: "test".to_string(),
        }
    }

    fn payloads() -> (Values, Values) {
        let attributes: Values = [("latitude", Value::from(40.1))].into_iter().collect();
        let telemetry: Values = [("temp", Value::from(71.6))].into_iter().collect();
        (attributes, telemetry)
    }

    fn cached_lines(store: &CacheStore, device_key: &str) -> usize {
        store
            .list_files(device_key)
            .unwrap()
            .iter()
            .map(|f| store.read_all(f).unwrap().count())
            .sum()
    }

    #[test]
    fn test_delivered_does_not_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let delivery = FixedDelivery::new(SubmissionOutcome::Delivered, SubmissionOutcome::Delivered);
        let (attrs, tele) = payloads();

        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", true, false);

        assert!(result.is_success());
        assert_eq!(cached_lines(&cache, "dev1"), 0);

        let calls = delivery.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, SubmissionKind::Attributes);
        assert_eq!(calls[0].2, r#"{"latitude":40.1}"#);
        assert_eq!(calls[1].1, SubmissionKind::Telemetry);
        let sent = Record::from_line(&calls[1].2).unwrap();
        assert_eq!(sent.values, tele);
    }

    #[test]
    fn test_failure_with_cache_on_error_caches_telemetry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let delivery = FixedDelivery::new(SubmissionOutcome::Delivered, transient(Some(503)));
        let (attrs, tele) = payloads();

        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", true, false);

        assert!(!result.is_success());
        assert!(result.is_safe());
        assert!(matches!(result, PublishResult::Cached { .. }));

        let files = cache.list_files("dev1").unwrap();
        assert_eq!(files.len(), 1);
        let lines: Vec<_> = cache.read_all(&files[0]).unwrap().collect();
        assert_eq!(lines.len(), 1);
        let cached = lines[0].as_ref().unwrap().record.as_ref().unwrap();
        // Only telemetry is cached.
        assert_eq!(cached.values, tele);
        assert!(cached.values.get("latitude").is_none());
    }

    #[test]
    fn test_attribute_failure_also_caches_telemetry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let delivery = FixedDelivery::new(transient(Some(500)), SubmissionOutcome::Delivered);
        let (attrs, tele) = payloads();

        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", true, false);

        assert!(matches!(result, PublishResult::Cached { .. }));
        assert_eq!(cached_lines(&cache, "dev1"), 1);
    }

    #[test]
    fn test_failure_without_cache_on_error_drops() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let delivery = FixedDelivery::new(SubmissionOutcome::Delivered, transient(None));
        let (attrs, tele) = payloads();

        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", false, false);

        assert!(!result.is_success());
        assert!(!result.is_safe());
        match result {
            PublishResult::Dropped { attempt } => {
                assert!(attempt.attributes.is_delivered());
                assert!(!attempt.telemetry.is_delivered());
            }
            other => panic!("expected Dropped, got {other:?}"),
        }
        assert!(!tmp.path().join("dev1").exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_local_only_never_calls_delivery() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let delivery = FixedDelivery::new(SubmissionOutcome::Delivered, SubmissionOutcome::Delivered);
        let (attrs, tele) = payloads();

        // cache_on_error is irrelevant for local-only devices.
        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", false, true);

        assert!(matches!(result, PublishResult::StoredLocally));
        assert!(delivery.calls().is_empty());
        assert_eq!(cached_lines(&cache, "dev1"), 1);
    }

    #[test]
    fn test_configuration_error_is_reported_and_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let unsupported = SubmissionOutcome::ConfigurationError("unsupported".to_string());
        let delivery = FixedDelivery::new(unsupported.clone(), unsupported);
        let (attrs, tele) = payloads();

        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", true, false);

        assert!(result.is_configuration_error());
        assert!(matches!(result, PublishResult::Cached { .. }));
        assert_eq!(cached_lines(&cache, "dev1"), 1);
    }

    #[test]
    fn test_cache_failure_is_combined_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("cache");
        std::fs::write(&blocker, "not a directory").unwrap();
        let cache = CacheStore::new(&blocker);
        let delivery = FixedDelivery::new(SubmissionOutcome::Delivered, transient(Some(502)));
        let (attrs, tele) = payloads();

        let result = Publisher::new(&delivery, &cache).publish(&attrs, &tele, "dev1", true, false);

        match result {
            PublishResult::Lost {
                attempt: Some(attempt),
                cache_error: CacheError::StorageUnavailable { .. },
            } => assert_eq!(attempt.telemetry.status(), Some(502)),
            other => panic!("expected Lost with attempt, got {other:?}"),
        }
    }

    #[test]
    fn test_sensor_error_sentinel_is_forwarded_as_data() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path());
        let delivery = FixedDelivery::new(SubmissionOutcome::Delivered, SubmissionOutcome::Delivered);
        let mut tele = Values::new();
        tele.insert("temp_porch", crate::record::SENSOR_ERROR);

        let result =
            Publisher::new(&delivery, &cache).publish(&Values::new(), &tele, "dev1", true, false);

        assert!(result.is_success());
        let sent = Record::from_line(&delivery.calls()[1].2).unwrap();
        assert!(sent.values.get("temp_porch").unwrap().is_sensor_error());
    }
}
