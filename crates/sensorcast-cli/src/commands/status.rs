//! `sensorcast status`: summarize the record cache.

use std::path::Path;

use sensorcast_core::{CacheStatus, CacheStore, Config};

use super::{load_config, local_only_keys};

pub fn run(config_path: &Path) {
    let config = load_config(config_path);
    let cache = CacheStore::new(&config.cache.dir);

    let status = match cache.status() {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("Cache directory: {}", config.cache.dir.display());
    print!("{}", render(&config, &status));
}

fn sensor_names(config: &Config, key: &str) -> String {
    let names: Vec<&str> = config
        .sensors
        .iter()
        .filter(|s| s.authkey == key)
        .map(|s| s.name.as_str())
        .collect();
    if names.is_empty() {
        "(not configured)".to_string()
    } else {
        names.join(", ")
    }
}

fn render(config: &Config, status: &CacheStatus) -> String {
    if status.is_empty() {
        return "  empty\n".to_string();
    }
    let local_only = local_only_keys(config);
    let mut out = String::new();
    for (key, device) in &status.per_device {
        let marker = if local_only.contains(key.as_str()) {
            " [local only]"
        } else {
            ""
        };
        out.push_str(&format!(
            "  {key:<24} {:>4} files {:>8} records  {}{marker}\n",
            device.files,
            device.records,
            sensor_names(config, key)
        ));
    }
    out.push_str(&format!(
        "Total: {} files, {} records\n",
        status.files, status.records
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorcast_core::DeviceCacheStatus;

    #[test]
    fn test_render_lists_devices() {
        let config = Config::from_toml(
            "[connection]\nserver = \"x\"\n\n[[sensors]]\nname = \"shed\"\nauthkey = \"k1\"\nkind = \"ds18b20\"\nlocal_only = true\n",
        )
        .unwrap();
        let mut status = CacheStatus {
            files: 3,
            records: 12,
            ..CacheStatus::default()
        };
        status
            .per_device
            .insert("k1".to_string(), DeviceCacheStatus { files: 2, records: 10 });
        status
            .per_device
            .insert("k2".to_string(), DeviceCacheStatus { files: 1, records: 2 });

        let text = render(&config, &status);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("shed [local only]"));
        assert!(lines[1].contains("(not configured)"));
        assert_eq!(lines[2], "Total: 3 files, 12 records");
    }

    #[test]
    fn test_render_empty() {
        let config = Config::from_toml("[connection]\nserver = \"x\"\n").unwrap();
        assert_eq!(render(&config, &CacheStatus::default()), "  empty\n");
    }
}
