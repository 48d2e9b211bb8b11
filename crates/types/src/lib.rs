use std::fmt;

use serde::{Deserialize, Serialize};

/// Decoded readings of one poll cycle. A field is `None` when its source frame
/// could not be decoded.
///
/// Serializes to a flat object with stable keys in the order the broker
/// consumers expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    #[serde(rename = "Solar_Input")]
    pub solar_input: Option<f64>,
    #[serde(rename = "Inverter_Power")]
    pub inverter_power: Option<f64>,
    #[serde(rename = "Peak_Power")]
    pub peak_power: Option<f64>,
    #[serde(rename = "Active_Power")]
    pub active_power: Option<f64>,
    #[serde(rename = "L1_Voltage")]
    pub l1_voltage: Option<f64>,
    #[serde(rename = "L1_Current")]
    pub l1_current: Option<f64>,
    #[serde(rename = "Temperature")]
    pub temperature: Option<f64>,
    #[serde(rename = "E_Today")]
    pub e_today: Option<f64>,
    #[serde(rename = "E_Total")]
    pub e_total: Option<f64>,
}

impl MeasurementRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_complete(&self) -> bool {
        [
            self.solar_input,
            self.inverter_power,
            self.peak_power,
            self.active_power,
            self.l1_voltage,
            self.l1_current,
            self.temperature,
            self.e_today,
            self.e_total,
        ]
        .iter()
        .all(Option::is_some)
    }
}

/// Link-layer address of the inverter's wireless module, as reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Addresses compare case-insensitively because platforms differ in how they print them.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_stable_keys_and_nulls() {
        let record = MeasurementRecord {
            solar_input: Some(300.0),
            e_total: Some(12.345),
            ..MeasurementRecord::default()
        };

        let json = serde_json::to_string(&record).expect("serialize");
        assert_eq!(
            json,
            "{\"Solar_Input\":300.0,\"Inverter_Power\":null,\"Peak_Power\":null,\
             \"Active_Power\":null,\"L1_Voltage\":null,\"L1_Current\":null,\
             \"Temperature\":null,\"E_Today\":null,\"E_Total\":12.345}"
        );
    }

    #[test]
    fn address_matching_ignores_case() {
        let address = DeviceAddress::new("AA:BB:CC:DD:EE:FF");
        assert!(address.matches("aa:bb:cc:dd:ee:ff"));
        assert!(!address.matches("aa:bb:cc:dd:ee:00"));
    }
}
