//! Temperature conversions and derived weather quantities.

const KELVIN_OFFSET: f64 = 273.15;

pub fn c_to_f(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn c_to_k(c: f64) -> f64 {
    c + KELVIN_OFFSET
}

pub fn f_to_c(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn f_to_k(f: f64) -> f64 {
    c_to_k(f_to_c(f))
}

pub fn k_to_c(k: f64) -> f64 {
    k - KELVIN_OFFSET
}

pub fn k_to_f(k: f64) -> f64 {
    k * 9.0 / 5.0 - 459.67
}

/// Round to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// NWS wind chill in °F.
///
/// Only defined for wind of at least 3 mph and air at or below 50 °F; outside
/// that range, and whenever the formula would exceed it, the air temperature
/// is returned.
pub fn wind_chill_f(temp_f: f64, wind_mph: f64) -> f64 {
    if wind_mph < 3.0 || temp_f > 50.0 {
        return temp_f;
    }
    let v = wind_mph.powf(0.16);
    let chill = 35.74 + 0.6215 * temp_f - 35.75 * v + 0.4275 * temp_f * v;
    chill.min(temp_f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_fixed_points() {
        assert!(close(c_to_f(100.0), 212.0));
        assert!(close(c_to_f(-40.0), -40.0));
        assert!(close(f_to_c(32.0), 0.0));
        assert!(close(c_to_k(0.0), 273.15));
        assert!(close(k_to_c(0.0), -273.15));
        assert!(close(k_to_f(273.15), 32.0));
        assert!(close(f_to_k(212.0), 373.15));
    }

    #[test]
    fn test_round_to() {
        assert!(close(round_to(71.5625, 1), 71.6));
        assert!(close(round_to(-3.14159, 2), -3.14));
    }

    #[test]
    fn test_wind_chill_range() {
        // Warm or calm air has no wind chill.
        assert!(close(wind_chill_f(60.0, 20.0), 60.0));
        assert!(close(wind_chill_f(30.0, 2.0), 30.0));

        // NWS table: 30 °F at 10 mph is about 21 °F.
        let chill = wind_chill_f(30.0, 10.0);
        assert!((chill - 21.2).abs() < 0.1, "got {chill}");
        assert!(chill < 30.0);
    }
}
