//! Maps user-initiated provisioning actions onto remote calls.
//!
//! The dispatcher owns the only mutual-exclusion discipline in the service:
//! per-row pending flags (a second concurrent action on the same sensor is
//! declined, not queued) and a single batch flag for organization-wide
//! actions. Flags are RAII guards, so every exit path releases them; the
//! remote client's request timeout bounds how long one can stay set.

use super::guard;
use super::state::ProvisioningEvent;
use super::{ActionOutcome, Decline, DeclineCode};
use crate::model::{Sensor, TtnConfig};
use crate::ttn_client::{ProvisionDeviceRequest, TtnProvisioning};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Organization-level provisioning actions with no per-sensor target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigAction {
    Retry,
    StartFresh,
    DeepClean,
    RegenerateWebhookSecret,
}

pub struct ActionDispatcher<Ttn: TtnProvisioning> {
    ttn: Ttn,
    row_pending: Mutex<HashSet<String>>,
    batch_pending: AtomicBool,
}

struct RowGuard<'a> {
    pending: &'a Mutex<HashSet<String>>,
    sensor_id: String,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.sensor_id);
        }
    }
}

struct BatchGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn row_busy(sensor_id: &str) -> Decline {
    Decline::new(
        DeclineCode::RowBusy,
        format!("another action for sensor {sensor_id} is still in flight"),
    )
}

fn batch_busy() -> Decline {
    Decline::new(
        DeclineCode::RowBusy,
        "another organization-wide provisioning action is still in flight",
    )
}

impl<Ttn: TtnProvisioning> ActionDispatcher<Ttn> {
    pub fn new(ttn: Ttn) -> Self {
        Self {
            ttn,
            row_pending: Mutex::new(HashSet::new()),
            batch_pending: AtomicBool::new(false),
        }
    }

    /// Direct access to the underlying client for non-action calls (settings).
    pub fn client(&self) -> &Ttn {
        &self.ttn
    }

    fn begin_row(&self, sensor_id: &str) -> Option<RowGuard<'_>> {
        let mut pending = self.row_pending.lock().ok()?;
        if !pending.insert(sensor_id.to_string()) {
            return None;
        }
        Some(RowGuard {
            pending: &self.row_pending,
            sensor_id: sensor_id.to_string(),
        })
    }

    fn begin_batch(&self) -> Option<BatchGuard<'_>> {
        if self
            .batch_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        Some(BatchGuard {
            flag: &self.batch_pending,
        })
    }

    pub async fn provision(
        &self,
        sensor: &Sensor,
        ttn_config: Option<&TtnConfig>,
    ) -> Result<ActionOutcome> {
        let Some(_guard) = self.begin_row(&sensor.id) else {
            return Ok(ActionOutcome::Declined(row_busy(&sensor.id)));
        };

        if let Err(decline) = guard::can_provision(sensor, ttn_config) {
            return Ok(ActionOutcome::Declined(decline));
        }

        let request = ProvisionDeviceRequest {
            device_id: sensor.device_id(),
            dev_eui: sensor.dev_eui.clone(),
            app_eui: sensor.app_eui.clone(),
            app_key: sensor.app_key.clone().unwrap_or_default(),
            name: sensor.name.clone(),
        };

        self.ttn.provision_device(request).await
    }

    pub async fn check(
        &self,
        sensor: &Sensor,
        ttn_config: Option<&TtnConfig>,
    ) -> Result<ActionOutcome> {
        let Some(_guard) = self.begin_row(&sensor.id) else {
            return Ok(ActionOutcome::Declined(row_busy(&sensor.id)));
        };

        if let Err(decline) = guard::can_reach_ttn(ttn_config) {
            return Ok(ActionOutcome::Declined(decline));
        }

        self.ttn.check_devices(vec![sensor.device_id()]).await
    }

    pub async fn diagnose(
        &self,
        sensor: &Sensor,
        ttn_config: Option<&TtnConfig>,
    ) -> Result<ActionOutcome> {
        let Some(_guard) = self.begin_row(&sensor.id) else {
            return Ok(ActionOutcome::Declined(row_busy(&sensor.id)));
        };

        if let Err(decline) = guard::can_reach_ttn(ttn_config) {
            return Ok(ActionOutcome::Declined(decline));
        }

        self.ttn.diagnose_device(sensor.device_id()).await
    }

    /// Unprovisioning has no remote contract yet; it is declined locally and
    /// never dispatched, rather than guessing the wire shape.
    pub async fn unprovision(&self, sensor: &Sensor) -> Result<ActionOutcome> {
        Ok(ActionOutcome::Declined(
            Decline::new(
                DeclineCode::UnprovisionUnsupported,
                format!(
                    "unprovisioning is not supported yet for sensor {}",
                    sensor.id
                ),
            )
            .with_hint("remove the device in the TTN console if it must go"),
        ))
    }

    /// Check all eligible sensors. One remote call carries every device id
    /// (avoiding a thundering herd); with `batch` disabled it falls back to
    /// sequential per-row calls and merges the reports. With TTN not
    /// configured the whole batch is declined locally without a remote call.
    pub async fn check_batch(
        &self,
        sensors: &[Sensor],
        ttn_config: Option<&TtnConfig>,
        batch: bool,
    ) -> Result<ActionOutcome> {
        let Some(_guard) = self.begin_batch() else {
            return Ok(ActionOutcome::Declined(batch_busy()));
        };

        if let Err(decline) = guard::can_reach_ttn(ttn_config) {
            return Ok(ActionOutcome::Declined(decline));
        }

        let device_ids: Vec<String> = sensors
            .iter()
            .filter(|sensor| sensor.archived_at.is_none() && !sensor.dev_eui.is_empty())
            .map(Sensor::device_id)
            .collect();

        if device_ids.is_empty() {
            return Ok(ActionOutcome::Accepted(
                serde_json::to_value(CheckReport::default())?,
            ));
        }

        if batch {
            return self.ttn.check_devices(device_ids).await;
        }

        // Per-row fallback: merge the individual reports into one
        let mut report = CheckReport::default();
        for device_id in device_ids {
            match self.ttn.check_devices(vec![device_id.clone()]).await? {
                ActionOutcome::Accepted(value) => {
                    let partial = CheckReport::from_value(&value)
                        .context(format!("check report for {device_id}"))?;
                    report.results.extend(partial.results);
                }
                ActionOutcome::Declined(decline) => {
                    report.results.push(DeviceCheckResult {
                        device_id,
                        exists: None,
                        code: Some(decline.code.as_str().to_string()),
                        message: Some(decline.message),
                    });
                }
            }
        }

        Ok(ActionOutcome::Accepted(serde_json::to_value(report)?))
    }

    pub async fn config_action(
        &self,
        action: ConfigAction,
        ttn_config: Option<&TtnConfig>,
    ) -> Result<ActionOutcome> {
        let Some(_guard) = self.begin_batch() else {
            return Ok(ActionOutcome::Declined(batch_busy()));
        };

        if let Err(decline) = guard::can_reach_ttn(ttn_config) {
            return Ok(ActionOutcome::Declined(decline));
        }

        match action {
            ConfigAction::Retry => self.ttn.retry_provisioning().await,
            ConfigAction::StartFresh => self.ttn.start_fresh().await,
            ConfigAction::DeepClean => self.ttn.deep_clean().await,
            ConfigAction::RegenerateWebhookSecret => self.ttn.regenerate_webhook_secret().await,
        }
    }
}

/// Per-device verdicts carried by an accepted check response.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CheckReport {
    #[serde(default)]
    pub results: Vec<DeviceCheckResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeviceCheckResult {
    pub device_id: String,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckReport {
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).context("failed to parse check report")
    }

    /// Fold each verdict into a state machine event.
    pub fn events(&self) -> Vec<(String, ProvisioningEvent)> {
        self.results
            .iter()
            .map(|result| {
                let event = match result.exists {
                    Some(true) => ProvisioningEvent::CheckedPresent,
                    Some(false) => ProvisioningEvent::CheckedAbsent,
                    None => ProvisioningEvent::CheckFailed,
                };
                (result.device_id.clone(), event)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod report {
        use super::*;

        #[test]
        fn parses_results_and_maps_events() {
            let value = serde_json::json!({
                "success": true,
                "results": [
                    { "device_id": "sensor-a", "exists": true },
                    { "device_id": "sensor-b", "exists": false, "code": "DEVICE_NOT_FOUND" },
                    { "device_id": "sensor-c", "message": "cluster unreachable" },
                ]
            });

            let report = CheckReport::from_value(&value).unwrap();
            let events = report.events();

            assert_eq!(
                events,
                vec![
                    ("sensor-a".to_string(), ProvisioningEvent::CheckedPresent),
                    ("sensor-b".to_string(), ProvisioningEvent::CheckedAbsent),
                    ("sensor-c".to_string(), ProvisioningEvent::CheckFailed),
                ]
            );
        }

        #[test]
        fn missing_results_array_parses_as_empty() {
            let report = CheckReport::from_value(&serde_json::json!({ "success": true })).unwrap();
            assert!(report.results.is_empty());
        }
    }
}
