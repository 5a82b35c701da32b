//! Current conditions from remote weather services, keyed by ZIP code.
//!
//! Both services are queried with a blocking `reqwest` client that shares the
//! connection timeout and proxy settings of the telemetry delivery client.

use log::warn;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;

use crate::config::{Config, SensorConfig};
use crate::delivery::{DeliveryError, client_builder};
use crate::record::{SENSOR_ERROR, Values};
use crate::source::{Measurement, MeasurementProducer, ProducerCategory, ProducerInfo};
use crate::units::{k_to_f, wind_chill_f};

/// Why a weather lookup produced no data.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("{0} URL is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response is missing '{0}'")]
    MissingField(&'static str),
}

fn build_client(config: &Config) -> Result<Client, DeliveryError> {
    client_builder(&config.connection, &config.proxies)?
        .build()
        .map_err(DeliveryError::Client)
}

fn fetch(client: &Client, url: &str) -> Result<String, WeatherError> {
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(WeatherError::Status(status.as_u16()));
    }
    Ok(response.text()?)
}

fn rounded(v: f64) -> i64 {
    v.round() as i64
}

// ---------------------------------------------------------------------------
// OpenWeatherMap
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OwmResponse {
    main: OwmMain,
    wind: OwmWind,
    visibility: Option<f64>,
    coord: Option<OwmCoord>,
}

#[derive(Deserialize)]
struct OwmMain {
    /// Kelvin.
    temp: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Deserialize)]
struct OwmWind {
    speed: f64,
    deg: Option<f64>,
}

#[derive(Deserialize)]
struct OwmCoord {
    lat: f64,
    lon: f64,
}

/// Turn an OpenWeatherMap `weather` response into a measurement.
///
/// Only the temperature key carries `label`; the other metrics are shared by
/// every OpenWeatherMap sensor of a device.
pub fn parse_owm(body: &str, label: &str) -> Result<Measurement, WeatherError> {
    let parsed: OwmResponse = serde_json::from_str(body)?;
    let temp_f = k_to_f(parsed.main.temp);
    let wind_chill = wind_chill_f(temp_f, parsed.wind.speed);

    let mut telemetry = Values::new();
    telemetry.insert(format!("temp{label}"), rounded(temp_f));
    telemetry.insert("humidity", rounded(parsed.main.humidity));
    telemetry.insert_finite("wind_speed", parsed.wind.speed);
    if let Some(deg) = parsed.wind.deg {
        telemetry.insert_finite("wind_direction", deg);
    }
    telemetry.insert("wind_chill", rounded(wind_chill));
    if let Some(visibility) = parsed.visibility {
        telemetry.insert_finite("visibility", visibility);
    }
    telemetry.insert("pressure", rounded(parsed.main.pressure));

    let mut attributes = Values::new();
    if let Some(coord) = parsed.coord {
        attributes.insert_finite("latitude", coord.lat);
        attributes.insert_finite("longitude", coord.lon);
    }
    Ok(Measurement::new(telemetry, attributes))
}

pub struct OpenWeatherMapSource {
    info: ProducerInfo,
    client: Client,
    url: Option<String>,
    label: String,
}

impl OpenWeatherMapSource {
    pub fn new(sensor: &SensorConfig, config: &Config) -> Result<Self, DeliveryError> {
        Ok(Self {
            info: ProducerInfo {
                name: sensor.name.clone(),
                description: "OpenWeatherMap current conditions",
                category: ProducerCategory::Weather,
            },
            client: build_client(config)?,
            url: config
                .weather
                .owm_url
                .as_ref()
                .map(|base| format!("{base}&zip={}", sensor.device)),
            label: sensor.label.clone(),
        })
    }

    /// Request URL: the configured base URL with the ZIP code appended.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn lookup(&self) -> Result<Measurement, WeatherError> {
        let url = self
            .url
            .as_deref()
            .ok_or(WeatherError::NotConfigured("owm_url"))?;
        parse_owm(&fetch(&self.client, url)?, &self.label)
    }
}

impl MeasurementProducer for OpenWeatherMapSource {
    fn info(&self) -> &ProducerInfo {
        &self.info
    }

    fn read(&self) -> Measurement {
        self.lookup().unwrap_or_else(|e| {
            warn!("{}: OpenWeatherMap lookup failed: {e}", self.info.name);
            Measurement::sensor_error(format!("temp{}", self.label))
        })
    }
}

// ---------------------------------------------------------------------------
// Weather Underground
// ---------------------------------------------------------------------------

/// Number from a JSON value that may be a number or a numeric string such
/// as `"65%"`. `"NA"` and `"-999"`-style placeholders are not numbers.
fn number(value: Option<&Json>) -> Option<f64> {
    let v = match value? {
        Json::Number(n) => n.as_f64()?,
        Json::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
        _ => return None,
    };
    (v.is_finite() && v > -999.0).then_some(v)
}

/// Weather Underground `current_observation` fields: source name, metric
/// name, and whether the value is reported as a whole number.
const WUND_FIELDS: &[(&str, &str, bool)] = &[
    ("relative_humidity", "humidity", true),
    ("wind_mph", "wind_speed", false),
    ("wind_degrees", "wind_direction", false),
    ("windchill_f", "wind_chill", true),
    ("wind_gust_mph", "wind_gusts", true),
    ("visibility_mi", "visibility", false),
    ("pressure_mb", "pressure", true),
    ("precip_today_in", "precip_today", false),
    ("dewpoint_f", "dewpoint", true),
    ("UV", "uv_index", true),
];

/// Turn a Weather Underground `conditions` response into a measurement.
///
/// Every metric name carries `label`. Fields the station does not report are
/// left out; a missing temperature is an error.
pub fn parse_wund(body: &str, label: &str) -> Result<Measurement, WeatherError> {
    let parsed: Json = serde_json::from_str(body)?;
    let obs = parsed
        .get("current_observation")
        .ok_or(WeatherError::MissingField("current_observation"))?;

    let temp = number(obs.get("temp_f")).ok_or(WeatherError::MissingField("temp_f"))?;
    let mut telemetry = Values::new();
    telemetry.insert(format!("temp{label}"), rounded(temp));
    for &(field, metric, whole) in WUND_FIELDS {
        let Some(v) = number(obs.get(field)) else {
            continue;
        };
        let key = format!("{metric}{label}");
        if whole {
            telemetry.insert(key, rounded(v));
        } else {
            telemetry.insert(key, v);
        }
    }

    let mut attributes = Values::new();
    if let Some(location) = obs.get("observation_location") {
        if let Some(lat) = number(location.get("latitude")) {
            attributes.insert("latitude", lat);
        }
        if let Some(lon) = number(location.get("longitude")) {
            attributes.insert("longitude", lon);
        }
    }
    Ok(Measurement::new(telemetry, attributes))
}

pub struct WeatherUndergroundSource {
    info: ProducerInfo,
    client: Client,
    url: Option<String>,
    label: String,
}

impl WeatherUndergroundSource {
    pub fn new(sensor: &SensorConfig, config: &Config) -> Result<Self, DeliveryError> {
        let weather = &config.weather;
        Ok(Self {
            info: ProducerInfo {
                name: sensor.name.clone(),
                description: "Weather Underground current conditions",
                category: ProducerCategory::Weather,
            },
            client: build_client(config)?,
            url: weather
                .wund_url
                .as_ref()
                .map(|base| format!("{base}{}.{}", sensor.device, weather.wund_format)),
            label: sensor.label.clone(),
        })
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn lookup(&self) -> Result<Measurement, WeatherError> {
        let url = self
            .url
            .as_deref()
            .ok_or(WeatherError::NotConfigured("wund_url"))?;
        parse_wund(&fetch(&self.client, url)?, &self.label)
    }
}

impl MeasurementProducer for WeatherUndergroundSource {
    fn info(&self) -> &ProducerInfo {
        &self.info
    }

    fn read(&self) -> Measurement {
        self.lookup().unwrap_or_else(|e| {
            warn!("{}: Weather Underground lookup failed: {e}", self.info.name);
            let mut m = Measurement::sensor_error(format!("temp{}", self.label));
            m.attributes.insert("weather_status", SENSOR_ERROR);
            m
        })
    }
}
