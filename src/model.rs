//! Client-observed data model for sensors, gateways, locations and the
//! organization TTN configuration. Persistence lives in Supabase; these are
//! the typed row shapes plus the few consistency rules enforced on this side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    #[default]
    Pending,
    Joining,
    Active,
    Offline,
    Fault,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    #[default]
    Pending,
    Online,
    Degraded,
    Offline,
    Maintenance,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtnProvisioningStatus {
    #[default]
    Idle,
    Provisioning,
    Ready,
    Failed,
}

/// TTN registration state of a single sensor as last observed by a check or
/// provisioning action. The server side is authoritative; see
/// `provisioning::state` for the transition function.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    #[default]
    NotConfigured,
    MissingInTtn,
    ExistsInTtn,
    Unknown,
    Error,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    TemperatureHumidity,
    DoorContact,
    AirQuality,
    PowerMeter,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Sensor {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub sensor_type: SensorType,
    pub status: SensorStatus,
    pub provisioning_state: ProvisioningState,
    /// Immutable after creation (16 hex chars, stored uppercase, no separators)
    pub dev_eui: String,
    /// Immutable after creation (16 hex chars, stored uppercase, no separators)
    pub app_eui: String,
    /// Secret; read from the store for provisioning but never sent to clients
    #[serde(skip_serializing)]
    pub app_key: Option<String>,
    pub ttn_device_id: Option<String>,
    pub site_id: Option<String>,
    pub unit_id: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Sensor {
    /// The id the device is addressed by in TTN, falling back to the
    /// deterministic DevEUI-derived id before the server has assigned one.
    pub fn device_id(&self) -> String {
        match &self.ttn_device_id {
            Some(id) => id.clone(),
            None => crate::credentials::derive_device_id(&self.dev_eui),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Gateway {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    /// Immutable after creation
    pub gateway_eui: String,
    pub ttn_gateway_id: Option<String>,
    pub status: GatewayStatus,
    pub site_id: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Site {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Unit {
    pub id: String,
    pub site_id: String,
    pub name: String,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Organization-level TTN configuration as reported by the settings edge
/// function. Secrets are represented by presence flags only; the API key and
/// webhook secret themselves are never round-tripped.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TtnConfig {
    pub is_enabled: bool,
    pub cluster: String,
    pub application_id: Option<String>,
    pub has_api_key: bool,
    pub api_key_last4: Option<String>,
    pub provisioning_status: TtnProvisioningStatus,
    pub provisioning_step: Option<String>,
    pub webhook_url: Option<String>,
    pub has_webhook_secret: bool,
    #[serde(default)]
    pub webhook_events: Vec<String>,
    pub functions_version: Option<String>,
}

/// A Unit must belong to a Site. When a sensor moves to a new site, its unit
/// assignment is kept only if that unit belongs to the new site; otherwise it
/// is cleared before persisting.
pub fn reconcile_unit(new_site_id: Option<&str>, unit: Option<&Unit>) -> Option<String> {
    match (new_site_id, unit) {
        (Some(site_id), Some(unit)) if unit.site_id == site_id => Some(unit.id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, site_id: &str) -> Unit {
        Unit {
            id: id.to_string(),
            site_id: site_id.to_string(),
            name: "Walk-in Freezer".to_string(),
            archived_at: None,
        }
    }

    mod unit_reconciliation {
        use super::*;

        #[test]
        fn unit_in_new_site_is_kept() {
            let unit = unit("unit-1", "site-a");
            assert_eq!(
                reconcile_unit(Some("site-a"), Some(&unit)),
                Some("unit-1".to_string())
            );
        }

        #[test]
        fn unit_outside_new_site_is_cleared() {
            let unit = unit("unit-1", "site-a");
            assert_eq!(reconcile_unit(Some("site-b"), Some(&unit)), None);
        }

        #[test]
        fn clearing_the_site_clears_the_unit() {
            let unit = unit("unit-1", "site-a");
            assert_eq!(reconcile_unit(None, Some(&unit)), None);
        }

        #[test]
        fn no_unit_stays_unassigned() {
            assert_eq!(reconcile_unit(Some("site-a"), None), None);
        }
    }

    mod serialization {
        use super::*;
        use chrono::TimeZone;

        fn sensor() -> Sensor {
            Sensor {
                id: "sensor-row-1".to_string(),
                organization_id: "org-1".to_string(),
                name: "Freezer 1".to_string(),
                sensor_type: SensorType::Temperature,
                status: SensorStatus::Active,
                provisioning_state: ProvisioningState::ExistsInTtn,
                dev_eui: "A1B2C3D4E5F67890".to_string(),
                app_eui: "0000000000000001".to_string(),
                app_key: Some("00112233445566778899AABBCCDDEEFF".to_string()),
                ttn_device_id: Some("freezer-1".to_string()),
                site_id: None,
                unit_id: None,
                last_seen_at: None,
                archived_at: None,
                created_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            }
        }

        #[test]
        fn app_key_is_never_serialized() {
            let json = serde_json::to_string(&sensor()).unwrap();
            assert!(!json.contains("app_key"));
            assert!(!json.contains("00112233445566778899AABBCCDDEEFF"));
        }

        #[test]
        fn status_enums_use_snake_case() {
            assert_eq!(
                serde_json::to_string(&ProvisioningState::ExistsInTtn).unwrap(),
                "\"exists_in_ttn\""
            );
            assert_eq!(
                serde_json::to_string(&SensorType::AirQuality).unwrap(),
                "\"air_quality\""
            );
            assert_eq!(
                serde_json::to_string(&GatewayStatus::Maintenance).unwrap(),
                "\"maintenance\""
            );
        }

        #[test]
        fn device_id_falls_back_to_derived_id() {
            let mut sensor = sensor();
            assert_eq!(sensor.device_id(), "freezer-1");

            sensor.ttn_device_id = None;
            assert_eq!(sensor.device_id(), "sensor-a1b2c3d4e5f67890");
        }
    }
}
