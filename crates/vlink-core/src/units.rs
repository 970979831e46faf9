//! Unit conversions applied to raw snapshot values.

use serde::{Deserialize, Serialize};

/// How average fuel consumption is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelUnit {
    #[default]
    #[serde(rename = "l_100km")]
    LiterPer100Km,
    MpgUk,
    MpgUs,
}

const MPG_UK_PER_L_100KM: f64 = 282.481;
const MPG_US_PER_L_100KM: f64 = 235.215;

/// Convert an average consumption reported in L/100km.
///
/// MPG values are rounded to two decimals.
pub fn convert_fuel_consumption(l_per_100km: f64, unit: FuelUnit) -> f64 {
    match unit {
        FuelUnit::LiterPer100Km => l_per_100km,
        FuelUnit::MpgUk => round2(MPG_UK_PER_L_100KM / l_per_100km),
        FuelUnit::MpgUs => round2(MPG_US_PER_L_100KM / l_per_100km),
    }
}

/// Service intervals arrive in mixed units; express them in days.
pub fn service_time_in_days(value: f64, unit: Option<&str>) -> i64 {
    match unit {
        Some("months") => (value * 30.0) as i64,
        _ => value as i64,
    }
}

/// Engine service intervals arrive in hours; express them in days.
pub fn engine_service_time_in_days(hours: f64) -> i64 {
    (hours / 24.0).round() as i64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuel_consumption_conversion() {
        assert_eq!(
            convert_fuel_consumption(9.0, FuelUnit::LiterPer100Km),
            9.0
        );
        assert_eq!(convert_fuel_consumption(9.0, FuelUnit::MpgUk), 31.39);
        assert_eq!(convert_fuel_consumption(9.0, FuelUnit::MpgUs), 26.13);
    }

    #[test]
    fn service_time_normalisation() {
        assert_eq!(service_time_in_days(2.0, Some("months")), 60);
        assert_eq!(service_time_in_days(45.0, Some("days")), 45);
        assert_eq!(service_time_in_days(45.0, None), 45);
        assert_eq!(engine_service_time_in_days(310.0), 13);
    }

    #[test]
    fn fuel_unit_serde_keys() {
        assert_eq!(
            serde_json::to_string(&FuelUnit::LiterPer100Km).unwrap(),
            "\"l_100km\""
        );
        assert_eq!(serde_json::to_string(&FuelUnit::MpgUk).unwrap(), "\"mpg_uk\"");
        let unit: FuelUnit = serde_json::from_str("\"mpg_us\"").unwrap();
        assert_eq!(unit, FuelUnit::MpgUs);
    }
}
