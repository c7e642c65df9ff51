//! Read-only sensor catalog: maps manufacturer/model pairs to a default
//! sensor type and a friendly display label.

use crate::model::SensorType;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct CatalogEntry {
    /// Composite key: `manufacturer:model`, lowercase
    pub model_key: &'static str,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub sensor_kind: &'static str,
}

/// Known sensor models shipped with FrostGuard kits.
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        model_key: "dragino:lht65",
        manufacturer: "Dragino",
        model: "LHT65",
        sensor_kind: "temp_humidity",
    },
    CatalogEntry {
        model_key: "dragino:lds02",
        manufacturer: "Dragino",
        model: "LDS02",
        sensor_kind: "door",
    },
    CatalogEntry {
        model_key: "milesight:em300-th",
        manufacturer: "Milesight",
        model: "EM300-TH",
        sensor_kind: "temp_humidity",
    },
    CatalogEntry {
        model_key: "milesight:em500-pt100",
        manufacturer: "Milesight",
        model: "EM500-PT100",
        sensor_kind: "temp",
    },
    CatalogEntry {
        model_key: "milesight:em500-co2",
        manufacturer: "Milesight",
        model: "EM500-CO2",
        sensor_kind: "co2",
    },
    CatalogEntry {
        model_key: "milesight:ws523",
        manufacturer: "Milesight",
        model: "WS523",
        sensor_kind: "power",
    },
];

pub fn lookup(model_key: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.model_key == model_key)
}

/// Map a catalog `sensor_kind` string to the default sensor type.
pub fn sensor_type_for_kind(kind: &str) -> Option<SensorType> {
    match kind {
        "temp" | "temperature" => Some(SensorType::Temperature),
        "temp_humidity" | "humidity" => Some(SensorType::TemperatureHumidity),
        "door" => Some(SensorType::DoorContact),
        "co2" => Some(SensorType::AirQuality),
        "power" => Some(SensorType::PowerMeter),
        _ => None,
    }
}

/// Friendly label for a sensor type, used in device lists and QR intake.
pub fn display_label(sensor_type: SensorType) -> &'static str {
    match sensor_type {
        SensorType::Temperature => "Temperature Sensor",
        SensorType::TemperatureHumidity => "Temperature / Humidity Sensor",
        SensorType::DoorContact => "Door Contact Sensor",
        SensorType::AirQuality => "CO₂ / Air Quality Sensor",
        SensorType::PowerMeter => "Power Meter",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn co2_kind_maps_to_air_quality() {
        let sensor_type = sensor_type_for_kind("co2").unwrap();
        assert_eq!(sensor_type, SensorType::AirQuality);
        assert_eq!(display_label(sensor_type), "CO₂ / Air Quality Sensor");
    }

    #[test]
    fn unknown_kind_maps_to_none() {
        assert!(sensor_type_for_kind("vibration").is_none());
    }

    #[test]
    fn lookup_finds_known_models() {
        let entry = lookup("milesight:em500-co2").unwrap();
        assert_eq!(entry.manufacturer, "Milesight");
        assert_eq!(entry.sensor_kind, "co2");
    }

    #[test]
    fn lookup_misses_unknown_models() {
        assert!(lookup("acme:frostotron").is_none());
    }

    #[test]
    fn every_catalog_kind_has_a_sensor_type() {
        for entry in CATALOG {
            assert!(
                sensor_type_for_kind(entry.sensor_kind).is_some(),
                "catalog entry {} has unmapped kind {}",
                entry.model_key,
                entry.sensor_kind
            );
        }
    }
}
