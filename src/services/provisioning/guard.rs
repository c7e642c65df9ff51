//! Pre-flight checks for provisioning actions.
//!
//! Mirrors the remote-side preconditions without calling the remote service,
//! so doomed requests are never fired and the dashboard can disable buttons
//! with an explanation. The TTN config snapshot is always injected, never
//! read from ambient state.

use super::{Decline, DeclineCode};
use crate::model::{Sensor, TtnConfig};

/// Decide whether a provision action is currently permitted.
///
/// Checks run in a fixed order; the first failing check wins.
pub fn can_provision(sensor: &Sensor, ttn: Option<&TtnConfig>) -> Result<(), Decline> {
    let Some(ttn) = ttn.filter(|ttn| ttn.is_enabled) else {
        return Err(Decline::new(
            DeclineCode::TtnNotConfigured,
            "TTN integration is not configured for this organization",
        )
        .with_hint("enable TTN under Settings before provisioning devices"));
    };

    if !ttn.has_api_key {
        return Err(Decline::new(
            DeclineCode::TtnMissingApiKey,
            "TTN configuration has no API key",
        ));
    }

    if ttn
        .application_id
        .as_deref()
        .unwrap_or_default()
        .is_empty()
    {
        return Err(Decline::new(
            DeclineCode::TtnMissingApplication,
            "TTN configuration has no application",
        ));
    }

    if sensor.dev_eui.is_empty() {
        return Err(Decline::new(
            DeclineCode::MissingDevEui,
            "sensor has no DevEUI",
        ));
    }

    if sensor.app_key.as_deref().unwrap_or_default().is_empty() {
        return Err(Decline::new(
            DeclineCode::MissingAppKey,
            "sensor has no AppKey",
        ));
    }

    if sensor.ttn_device_id.is_some() {
        return Err(Decline::new(
            DeclineCode::AlreadyProvisioned,
            "sensor is already provisioned in TTN",
        ));
    }

    Ok(())
}

/// Gate for check/diagnose style actions: only requires a usable TTN config.
pub fn can_reach_ttn(ttn: Option<&TtnConfig>) -> Result<(), Decline> {
    match ttn.filter(|ttn| ttn.is_enabled) {
        Some(_) => Ok(()),
        None => Err(Decline::new(
            DeclineCode::TtnNotConfigured,
            "TTN integration is not configured for this organization",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProvisioningState, SensorStatus, SensorType, TtnProvisioningStatus};
    use chrono::Utc;

    fn sensor() -> Sensor {
        Sensor {
            id: "sensor-row-1".to_string(),
            organization_id: "org-1".to_string(),
            name: "Freezer 1".to_string(),
            sensor_type: SensorType::Temperature,
            status: SensorStatus::Pending,
            provisioning_state: ProvisioningState::MissingInTtn,
            dev_eui: "A1B2C3D4E5F67890".to_string(),
            app_eui: "0000000000000001".to_string(),
            app_key: Some("00112233445566778899AABBCCDDEEFF".to_string()),
            ttn_device_id: None,
            site_id: None,
            unit_id: None,
            last_seen_at: None,
            archived_at: None,
            created_at: Utc::now(),
        }
    }

    fn ttn_config() -> TtnConfig {
        TtnConfig {
            is_enabled: true,
            cluster: "eu1".to_string(),
            application_id: Some("frostguard-org-1".to_string()),
            has_api_key: true,
            api_key_last4: Some("4F2A".to_string()),
            provisioning_status: TtnProvisioningStatus::Ready,
            provisioning_step: None,
            webhook_url: None,
            has_webhook_secret: true,
            webhook_events: vec![],
            functions_version: Some("1.4.2".to_string()),
        }
    }

    fn decline_code(result: Result<(), Decline>) -> DeclineCode {
        result.unwrap_err().code
    }

    #[test]
    fn fully_configured_sensor_is_allowed() {
        assert!(can_provision(&sensor(), Some(&ttn_config())).is_ok());
    }

    #[test]
    fn missing_config_declines_first() {
        assert_eq!(
            decline_code(can_provision(&sensor(), None)),
            DeclineCode::TtnNotConfigured
        );
    }

    #[test]
    fn disabled_config_counts_as_not_configured() {
        let mut ttn = ttn_config();
        ttn.is_enabled = false;
        assert_eq!(
            decline_code(can_provision(&sensor(), Some(&ttn))),
            DeclineCode::TtnNotConfigured
        );
    }

    #[test]
    fn missing_api_key_declines_before_application() {
        let mut ttn = ttn_config();
        ttn.has_api_key = false;
        ttn.application_id = None;
        assert_eq!(
            decline_code(can_provision(&sensor(), Some(&ttn))),
            DeclineCode::TtnMissingApiKey
        );
    }

    #[test]
    fn missing_application_declines() {
        let mut ttn = ttn_config();
        ttn.application_id = None;
        assert_eq!(
            decline_code(can_provision(&sensor(), Some(&ttn))),
            DeclineCode::TtnMissingApplication
        );
    }

    #[test]
    fn missing_dev_eui_declines_before_app_key() {
        let mut sensor = sensor();
        sensor.dev_eui.clear();
        sensor.app_key = None;
        assert_eq!(
            decline_code(can_provision(&sensor, Some(&ttn_config()))),
            DeclineCode::MissingDevEui
        );
    }

    #[test]
    fn missing_app_key_declines() {
        let mut sensor = sensor();
        sensor.app_key = Some(String::new());
        assert_eq!(
            decline_code(can_provision(&sensor, Some(&ttn_config()))),
            DeclineCode::MissingAppKey
        );
    }

    #[test]
    fn already_provisioned_sensor_declines_instead_of_redundant_call() {
        let mut sensor = sensor();
        sensor.ttn_device_id = Some("freezer-1".to_string());
        assert_eq!(
            decline_code(can_provision(&sensor, Some(&ttn_config()))),
            DeclineCode::AlreadyProvisioned
        );
    }

    #[test]
    fn reachability_gate_only_needs_an_enabled_config() {
        assert!(can_reach_ttn(Some(&ttn_config())).is_ok());
        assert_eq!(
            decline_code(can_reach_ttn(None)),
            DeclineCode::TtnNotConfigured
        );
    }
}
