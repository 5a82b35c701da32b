//! Resource usage of the collector host.
//!
//! Best-effort: metrics the platform does not expose are left out rather
//! than guessed, except `cpu_temp`, which is always present and reads
//! `"N/A"` when no thermal sensor is found.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{Local, TimeDelta};

use super::helpers::{format_bytes, format_uptime, read_trimmed};
use crate::config::SensorConfig;
use crate::record::Values;
use crate::source::{Measurement, MeasurementProducer, ProducerCategory, ProducerInfo};
use crate::units::{c_to_f, round_to};

/// Reported as `cpu_temp` when no thermal sensor is readable.
pub const NOT_AVAILABLE: &str = "N/A";

/// Attribute value for an interface without an IPv4 address.
pub const NO_ADDRESS: &str = "none";

/// Delay between the two `/proc/stat` samples used for `cpu_used`.
pub const DEFAULT_CPU_SAMPLE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// procfs parsing
// ---------------------------------------------------------------------------

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the `cpu ` summary line of `/proc/stat`. Idle includes iowait.
pub fn parse_proc_stat(text: &str) -> Option<CpuTimes> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    // guest time is already counted in user/nice
    let total = fields.iter().take(8).sum();
    Some(CpuTimes { idle, total })
}

/// Busy percentage between two samples.
pub fn cpu_percent(start: CpuTimes, end: CpuTimes) -> Option<f64> {
    let total = end.total.checked_sub(start.total)?;
    let idle = end.idle.checked_sub(start.idle)?;
    if total == 0 {
        return None;
    }
    Some(round_to(100.0 * (total - idle.min(total)) as f64 / total as f64, 1))
}

/// Total and available memory in bytes from `/proc/meminfo`.
pub fn parse_meminfo(text: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    let mut free_ish = 0u64;
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kb) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        let bytes = kb * 1024;
        match key {
            "MemTotal" => total = Some(bytes),
            "MemAvailable" => available = Some(bytes),
            "MemFree" | "Buffers" | "Cached" => free_ish += bytes,
            _ => {}
        }
    }
    // Kernels before 3.14 have no MemAvailable.
    Some((total?, available.unwrap_or(free_ish)))
}

/// Seconds since boot from `/proc/uptime`.
pub fn parse_uptime(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

fn used_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(round_to(100.0 * used as f64 / total as f64, 1))
}

// ---------------------------------------------------------------------------
// Platform probes
// ---------------------------------------------------------------------------

fn read_cpu_times() -> Option<CpuTimes> {
    parse_proc_stat(&std::fs::read_to_string("/proc/stat").ok()?)
}

fn read_memory() -> Option<(u64, u64)> {
    parse_meminfo(&std::fs::read_to_string("/proc/meminfo").ok()?)
}

fn read_uptime_secs() -> Option<f64> {
    parse_uptime(&std::fs::read_to_string("/proc/uptime").ok()?)
}

/// CPU temperature in °C from the first thermal zone, falling back to the
/// first hwmon temperature input.
fn read_cpu_temp_c() -> Option<f64> {
    if let Some(milli) = read_trimmed(Path::new("/sys/class/thermal/thermal_zone0/temp"))
        .and_then(|s| s.parse::<f64>().ok())
    {
        return Some(milli / 1000.0);
    }

    let entries = std::fs::read_dir("/sys/class/hwmon").ok()?;
    for entry in entries.flatten() {
        let dir = entry.path();
        for idx in 1..=8 {
            if let Some(milli) = read_trimmed(&dir.join(format!("temp{idx}_input")))
                .and_then(|s| s.parse::<f64>().ok())
            {
                return Some(milli / 1000.0);
            }
        }
    }
    None
}

fn collect_loadavg_1m() -> Option<f64> {
    #[cfg(unix)]
    {
        let mut values = [0.0_f64; 3];
        // SAFETY: `getloadavg` writes up to `n` doubles to a valid buffer.
        let n = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
        (n > 0).then_some(values[0])
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Total and available bytes of the filesystem holding `/`.
fn root_disk_usage() -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
        // SAFETY: the path is a NUL-terminated literal and `stat` points to
        // writable memory large enough for a `statvfs`.
        let rc = unsafe { libc::statvfs(c"/".as_ptr(), stat.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        // SAFETY: `statvfs` returned 0, so it initialized `stat`.
        let stat = unsafe { stat.assume_init() };
        let frsize = stat.f_frsize as u64;
        let total = stat.f_blocks as u64 * frsize;
        let free = stat.f_bfree as u64 * frsize;
        let avail = stat.f_bavail as u64 * frsize;
        // Match `df`: blocks reserved for root count as neither used nor free.
        let used = total.saturating_sub(free);
        Some((used + avail, avail))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

fn os_release() -> Option<String> {
    #[cfg(unix)]
    {
        let mut uts = std::mem::MaybeUninit::<libc::utsname>::uninit();
        // SAFETY: `uts` points to writable memory large enough for a `utsname`.
        if unsafe { libc::uname(uts.as_mut_ptr()) } != 0 {
            return None;
        }
        // SAFETY: `uname` returned 0, so it initialized `uts`.
        let uts = unsafe { uts.assume_init() };
        // SAFETY: `release` is a NUL-terminated C string inside `uts`.
        let release = unsafe { std::ffi::CStr::from_ptr(uts.release.as_ptr()) };
        Some(release.to_string_lossy().into_owned())
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Every network interface with its first IPv4 address, if any.
#[cfg(unix)]
pub fn interface_addresses() -> BTreeMap<String, Option<Ipv4Addr>> {
    use std::ffi::CStr;

    let mut interfaces = BTreeMap::new();
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: `ifaddrs` is a valid out-pointer. The list it receives is
    // released with `freeifaddrs` below.
    if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
        return interfaces;
    }

    let mut ifa = ifaddrs;
    while !ifa.is_null() {
        // SAFETY: `ifa` is a non-null node of the list, valid until
        // `freeifaddrs`.
        let entry = unsafe { &*ifa };
        // SAFETY: `ifa_name` is a NUL-terminated string owned by the list.
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();

        let mut ipv4 = None;
        if !entry.ifa_addr.is_null() {
            // SAFETY: checked non-null, and only `sa_family` is read.
            let family = unsafe { (*entry.ifa_addr).sa_family } as i32;
            if family == libc::AF_INET {
                let sockaddr_in = entry.ifa_addr as *const libc::sockaddr_in;
                // SAFETY: `AF_INET` means the address is a `sockaddr_in`.
                let raw = unsafe { (*sockaddr_in).sin_addr.s_addr };
                ipv4 = Some(Ipv4Addr::from(u32::from_be(raw)));
            }
        }

        let slot = interfaces.entry(name).or_insert(None);
        if slot.is_none() {
            *slot = ipv4;
        }
        ifa = entry.ifa_next;
    }

    // SAFETY: `ifaddrs` came from a successful `getifaddrs` and is freed once.
    unsafe { libc::freeifaddrs(ifaddrs) };
    interfaces
}

#[cfg(not(unix))]
pub fn interface_addresses() -> BTreeMap<String, Option<Ipv4Addr>> {
    BTreeMap::new()
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Host resource usage as telemetry plus static host facts as attributes.
pub struct SystemStatsSource {
    info: ProducerInfo,
    cpu_sample: Duration,
}

impl SystemStatsSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: ProducerInfo {
                name: name.into(),
                description: "collector host resource usage",
                category: ProducerCategory::System,
            },
            cpu_sample: DEFAULT_CPU_SAMPLE,
        }
    }

    pub fn from_sensor(sensor: &SensorConfig) -> Self {
        Self::new(&sensor.name)
    }

    /// Override how long `read` waits between CPU samples.
    pub fn with_cpu_sample(mut self, cpu_sample: Duration) -> Self {
        self.cpu_sample = cpu_sample;
        self
    }

    fn telemetry(&self) -> Values {
        let mut telemetry = Values::new();

        match read_cpu_temp_c() {
            Some(c) => telemetry.insert_finite("cpu_temp", round_to(c_to_f(c), 1)),
            None => telemetry.insert("cpu_temp", NOT_AVAILABLE),
        }

        if let Some(start) = read_cpu_times() {
            thread::sleep(self.cpu_sample);
            if let Some(pct) = read_cpu_times().and_then(|end| cpu_percent(start, end)) {
                telemetry.insert_finite("cpu_used", pct);
            }
        }
        if let Some(pct) = read_memory().and_then(|(total, avail)| used_percent(total, avail)) {
            telemetry.insert_finite("ram_used", pct);
        }
        if let Some(pct) = root_disk_usage().and_then(|(total, avail)| used_percent(total, avail)) {
            telemetry.insert_finite("disk_used", pct);
        }
        if let Some(load) = collect_loadavg_1m() {
            telemetry.insert_finite("load_1m", round_to(load, 2));
        }
        telemetry
    }

    fn attributes(&self) -> Values {
        let mut attributes = Values::new();
        if let Some((total, _)) = root_disk_usage() {
            attributes.insert("disk_total", format_bytes(total));
        }
        if let Some((total, _)) = read_memory() {
            attributes.insert("ram_total", format_bytes(total));
        }
        attributes.insert("os_type", std::env::consts::FAMILY);
        attributes.insert("os_platform", std::env::consts::OS);
        if let Some(release) = os_release() {
            attributes.insert("os_release", release);
        }
        if let Some(uptime) = read_uptime_secs().filter(|s| s.is_finite() && *s >= 0.0) {
            let secs = uptime as u64;
            let boot = Local::now() - TimeDelta::seconds(secs as i64);
            attributes.insert("last_boot", boot.format("%Y-%m-%d %H:%M:%S").to_string());
            attributes.insert("uptime", format_uptime(secs));
        }
        for (name, ipv4) in interface_addresses() {
            match ipv4 {
                Some(ip) => attributes.insert(name, ip.to_string()),
                None => attributes.insert(name, NO_ADDRESS),
            }
        }
        attributes
    }
}

impl MeasurementProducer for SystemStatsSource {
    fn info(&self) -> &ProducerInfo {
        &self.info
    }

    fn read(&self) -> Measurement {
        Measurement::new(self.telemetry(), self.attributes())
    }
}
