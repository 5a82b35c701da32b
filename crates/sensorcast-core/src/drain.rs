//! Replay cached records and remove files the endpoint fully acknowledged.
//!
//! Delivery is at-least-once: a file with any unacknowledged line is kept
//! whole and every line of it is re-sent on the next pass. Malformed lines
//! are never sent. Once every valid line of a file is acknowledged, a file
//! that still holds malformed lines is set aside instead of deleted, and the
//! pass moves on to the next file.

use log::{info, warn};

use crate::cache::{CacheError, CacheFile, CacheStore};
use crate::delivery::{DeliveryClient, SubmissionKind};

/// Counters for one drain pass over one or more devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Files read during the pass.
    pub files_processed: usize,
    /// Lines found in those files, sent or not.
    pub records_replayed: usize,
    /// Lines the endpoint acknowledged.
    pub records_acknowledged: usize,
    /// Lines that could not be decoded and were not sent.
    pub records_malformed: usize,
    pub files_deleted: usize,
    /// Files renamed aside because they still held malformed lines.
    pub files_set_aside: usize,
}

impl DrainReport {
    /// Every replayed record was acknowledged or set aside as malformed.
    pub fn is_complete(&self) -> bool {
        self.records_acknowledged + self.records_malformed == self.records_replayed
    }

    /// Add `other`'s counters to this report.
    pub fn merge(&mut self, other: DrainReport) {
        self.files_processed += other.files_processed;
        self.records_replayed += other.records_replayed;
        self.records_acknowledged += other.records_acknowledged;
        self.records_malformed += other.records_malformed;
        self.files_deleted += other.files_deleted;
        self.files_set_aside += other.files_set_aside;
    }
}

/// Outcome of draining one device as part of [`CacheDrainer::drain_all`].
#[derive(Debug)]
pub struct DeviceDrain {
    pub device_key: String,
    pub result: Result<DrainReport, CacheError>,
}

impl DeviceDrain {
    /// Sum the reports of every device that drained without error.
    pub fn total(drained: &[DeviceDrain]) -> DrainReport {
        let mut total = DrainReport::default();
        for report in drained.iter().filter_map(|d| d.result.as_ref().ok()) {
            total.merge(*report);
        }
        total
    }
}

/// Replays a device's cache files through a [`DeliveryClient`].
pub struct CacheDrainer<'a> {
    delivery: &'a dyn DeliveryClient,
    cache: &'a CacheStore,
}

impl<'a> CacheDrainer<'a> {
    pub fn new(delivery: &'a dyn DeliveryClient, cache: &'a CacheStore) -> Self {
        Self { delivery, cache }
    }

    /// One pass over `device_key`'s files, oldest first.
    ///
    /// Stops at the first file that is not fully acknowledged so a newer file
    /// is never delivered ahead of an older one. Returns `Err` only when the
    /// cache cannot be listed or read, or an acknowledged file cannot be
    /// deleted.
    pub fn drain(&self, device_key: &str) -> Result<DrainReport, CacheError> {
        let _guard = self.cache.lock_device(device_key);
        let mut report = DrainReport::default();

        for file in self.cache.list_files(device_key)? {
            report.files_processed += 1;
            let replay = self.replay_file(device_key, &file)?;
            let lines = replay.lines;
            let acknowledged = replay.acknowledged;
            report.records_replayed += lines;
            report.records_acknowledged += acknowledged;
            report.records_malformed += replay.malformed;

            if acknowledged == lines {
                self.cache.delete(&file)?;
                report.files_deleted += 1;
                info!(
                    "{device_key}: delivered {lines} cached records, removed {}",
                    file.path().display()
                );
            } else if acknowledged + replay.malformed == lines {
                let target = self.cache.set_aside(&file)?;
                report.files_set_aside += 1;
                warn!(
                    "{device_key}: delivered {acknowledged} cached records, {} malformed lines kept in {}",
                    replay.malformed,
                    target.display()
                );
            } else {
                warn!(
                    "{device_key}: {acknowledged}/{lines} cached records acknowledged, keeping {}",
                    file.path().display()
                );
                break;
            }
        }

        if report.files_processed > 0 {
            info!(
                "{device_key}: drain processed {} files, {}/{} records acknowledged, {} files removed",
                report.files_processed,
                report.records_acknowledged,
                report.records_replayed,
                report.files_deleted
            );
        }
        Ok(report)
    }

    /// Drain every device with cache files for which `include` is true.
    ///
    /// Devices are independent: a failing device does not stop the others,
    /// its error is logged and kept in its [`DeviceDrain`]. Returns `Err` only
    /// when the cache directory cannot be listed.
    pub fn drain_all(
        &self,
        include: impl Fn(&str) -> bool,
    ) -> Result<Vec<DeviceDrain>, CacheError> {
        let mut drained = Vec::new();
        for device_key in self.cache.devices()? {
            if !include(&device_key) {
                continue;
            }
            let result = self.drain(&device_key);
            if let Err(e) = &result {
                warn!("{device_key}: drain failed: {e}");
            }
            drained.push(DeviceDrain { device_key, result });
        }
        Ok(drained)
    }

    /// Send every valid line of `file`.
    fn replay_file(&self, device_key: &str, file: &CacheFile) -> Result<FileReplay, CacheError> {
        let mut replay = FileReplay::default();

        for line in self.cache.read_all(file)? {
            let line = line?;
            replay.lines += 1;
            let record = match &line.record {
                Ok(record) => record,
                Err(e) => {
                    replay.malformed += 1;
                    warn!(
                        "{device_key}: {}:{} is not a valid record, not sent: {e}",
                        file.path().display(),
                        line.line_no
                    );
                    continue;
                }
            };

            let outcome = self
                .delivery
                .submit(device_key, SubmissionKind::Telemetry, &record.to_line());
            if outcome.is_delivered() {
                replay.acknowledged += 1;
            } else {
                warn!(
                    "{device_key}: replay of {}:{} failed: {outcome}",
                    file.path().display(),
                    line.line_no
                );
            }
        }
        Ok(replay)
    }
}

/// Line counts for one file of a drain pass.
#[derive(Debug, Default)]
struct FileReplay {
    lines: usize,
    acknowledged: usize,
    malformed: usize,
}
