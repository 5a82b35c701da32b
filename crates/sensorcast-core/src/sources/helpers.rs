//! Small parsing and formatting helpers shared by the producers.

use std::path::Path;

/// Contents of a small text file with surrounding whitespace removed, or
/// `None` if it cannot be read or is blank.
pub fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// Human-readable binary size, e.g. `14.8 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    let units = ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} Bytes");
    }
    let mut v = bytes as f64;
    let mut idx = 0usize;
    while v >= 1024.0 && idx < units.len() - 1 {
        v /= 1024.0;
        idx += 1;
    }
    format!("{v:.1} {}", units[idx])
}

/// Uptime as `<d> days, <h> hrs, <m> mins`.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds / 3_600 % 24;
    let minutes = seconds / 60 % 60;
    format!("{days} days, {hours} hrs, {minutes} mins")
}
