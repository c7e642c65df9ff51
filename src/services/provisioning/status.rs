//! Effective status resolution for sensors and gateways.
//!
//! The stored status is whatever the ingest pipeline last wrote; the
//! dashboard shows the *effective* status, re-derived on every read since
//! "now" moves. Nothing here is cached or persisted.

use crate::config::AppConfig;
use crate::model::{Gateway, GatewayStatus, ProvisioningState, Sensor, SensorStatus};
use chrono::{DateTime, Duration, Utc};

/// Staleness policy applied when deriving effective statuses.
#[derive(Clone, Copy, Debug)]
pub struct StatusPolicy {
    pub stale_after: Duration,
}

impl StatusPolicy {
    pub fn from_config() -> Self {
        Self {
            stale_after: AppConfig::get().status.stale_after,
        }
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::seconds(300),
        }
    }
}

fn is_stale(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>, policy: &StatusPolicy) -> bool {
    match last_seen_at {
        // Exactly at the threshold still counts as fresh
        Some(last_seen) => now - last_seen > policy.stale_after,
        // Marked live but never heard from
        None => true,
    }
}

/// Derive the status a sensor should display right now.
///
/// Rules, applied in order:
/// 1. pending but already present in TTN -> joining (provisioned out-of-band,
///    awaiting first uplink)
/// 2. active with a stale last uplink -> offline
/// 3. otherwise the stored status stands
pub fn effective_sensor_status(
    sensor: &Sensor,
    now: DateTime<Utc>,
    policy: &StatusPolicy,
) -> SensorStatus {
    if sensor.status == SensorStatus::Pending
        && sensor.provisioning_state == ProvisioningState::ExistsInTtn
    {
        return SensorStatus::Joining;
    }

    if sensor.status == SensorStatus::Active && is_stale(sensor.last_seen_at, now, policy) {
        return SensorStatus::Offline;
    }

    sensor.status
}

/// Gateway variant: a gateway reported online or degraded with a stale
/// heartbeat is shown offline.
pub fn effective_gateway_status(
    gateway: &Gateway,
    now: DateTime<Utc>,
    policy: &StatusPolicy,
) -> GatewayStatus {
    if matches!(
        gateway.status,
        GatewayStatus::Online | GatewayStatus::Degraded
    ) && is_stale(gateway.last_seen_at, now, policy)
    {
        return GatewayStatus::Offline;
    }

    gateway.status
}
