#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

//! PostgREST-style table client for sensor, gateway and location rows.
//!
//! Rows are soft-deleted by stamping `archived_at`; list queries filter
//! archived rows out. There is no optimistic concurrency: PATCH is last
//! write wins.

use crate::{
    config::AppConfig,
    http_client::edge_function_client,
    model::{Gateway, GatewayStatus, ProvisioningState, Sensor, SensorStatus, SensorType, Site, Unit},
};
use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use log::info;
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trait_variant::make;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewSensor {
    pub organization_id: String,
    pub name: String,
    pub sensor_type: SensorType,
    pub status: SensorStatus,
    pub provisioning_state: ProvisioningState,
    pub dev_eui: String,
    pub app_eui: String,
    pub app_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

/// Partial sensor update. Credentials are immutable post-creation, so this
/// type simply has no `dev_eui`/`app_eui`/`app_key` fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SensorPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<SensorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<ProvisioningState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttn_device_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewGateway {
    pub organization_id: String,
    pub name: String,
    pub gateway_eui: String,
    pub status: GatewayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttn_gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GatewayPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GatewayStatus>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewSite {
    pub organization_id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SitePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewUnit {
    pub site_id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UnitPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait SensorStore {
    async fn list_sensors(&self, organization_id: String) -> Result<Vec<Sensor>>;
    async fn get_sensor(&self, id: String) -> Result<Sensor>;
    async fn insert_sensor(&self, row: NewSensor) -> Result<Sensor>;
    async fn update_sensor(&self, id: String, patch: SensorPatch) -> Result<Sensor>;
    async fn archive_sensor(&self, id: String) -> Result<()>;
    async fn list_gateways(&self, organization_id: String) -> Result<Vec<Gateway>>;
    async fn insert_gateway(&self, row: NewGateway) -> Result<Gateway>;
    async fn update_gateway(&self, id: String, patch: GatewayPatch) -> Result<Gateway>;
    async fn archive_gateway(&self, id: String) -> Result<()>;
    async fn list_sites(&self, organization_id: String) -> Result<Vec<Site>>;
    async fn insert_site(&self, row: NewSite) -> Result<Site>;
    async fn update_site(&self, id: String, patch: SitePatch) -> Result<Site>;
    async fn archive_site(&self, id: String) -> Result<()>;
    async fn list_units(&self, site_id: String) -> Result<Vec<Unit>>;
    async fn insert_unit(&self, row: NewUnit) -> Result<Unit>;
    async fn update_unit(&self, id: String, patch: UnitPatch) -> Result<Unit>;
    async fn archive_unit(&self, id: String) -> Result<()>;
    async fn get_unit(&self, id: String) -> Result<Option<Unit>>;
}

#[derive(Clone)]
pub struct SupabaseRestClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseRestClient {
    const SENSORS_TABLE: &str = "sensors";
    const GATEWAYS_TABLE: &str = "gateways";
    const SITES_TABLE: &str = "sites";
    const UNITS_TABLE: &str = "units";

    pub fn new() -> Result<Self> {
        let config = AppConfig::get();

        Ok(SupabaseRestClient {
            client: edge_function_client(config.actions.request_timeout)?,
            base_url: config.supabase.url.clone(),
            service_role_key: config.supabase.service_role_key.clone(),
        })
    }

    fn build_url(&self, table: &str, filter: &str) -> String {
        if filter.is_empty() {
            format!("{}/rest/v1/{table}", self.base_url)
        } else {
            format!("{}/rest/v1/{table}?{filter}", self.base_url)
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    async fn select<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        filter: &str,
    ) -> Result<Vec<T>> {
        let url = self.build_url(table, filter);
        info!("GET {url}");

        let res = self
            .request(self.client.get(&url))
            .send()
            .await
            .context(format!("failed to send GET request to {url}"))?;

        let body = Self::successful_body(res).await.context(format!("GET {url}"))?;
        serde_json::from_str(&body).context(format!("failed to parse rows from {table}"))
    }

    async fn insert<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        row: impl Serialize,
    ) -> Result<T> {
        let url = self.build_url(table, "");
        info!("POST {url}");

        let res = self
            .request(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .context(format!("failed to send POST request to {url}"))?;

        let body = Self::successful_body(res).await.context(format!("POST {url}"))?;
        Self::single_row(&body, table)
    }

    async fn patch<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
        patch: impl Serialize,
    ) -> Result<T> {
        let url = self.build_url(table, &format!("id=eq.{id}"));
        info!("PATCH {url}");

        let res = self
            .request(self.client.patch(&url))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .context(format!("failed to send PATCH request to {url}"))?;

        let body = Self::successful_body(res).await.context(format!("PATCH {url}"))?;
        Self::single_row(&body, table)
    }

    async fn archive(&self, table: &str, id: &str) -> Result<()> {
        let url = self.build_url(table, &format!("id=eq.{id}"));
        info!("PATCH {url} (archive)");

        let res = self
            .request(self.client.patch(&url))
            .json(&serde_json::json!({ "archived_at": Utc::now() }))
            .send()
            .await
            .context(format!("failed to send PATCH request to {url}"))?;

        Self::successful_body(res).await.context(format!("PATCH {url}"))?;
        Ok(())
    }

    async fn successful_body(res: reqwest::Response) -> Result<String> {
        let status = res.status();
        let body = res.text().await.context("failed to read response body")?;

        if status.is_success() {
            return Ok(body);
        }

        Err(table_error(status, &body))
    }

    fn single_row<T: serde::de::DeserializeOwned>(body: &str, table: &str) -> Result<T> {
        let mut rows: Vec<T> =
            serde_json::from_str(body).context(format!("failed to parse rows from {table}"))?;

        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => bail!("no row returned from {table}"),
            n => bail!("expected one row from {table}, got {n}"),
        }
    }
}

/// Turn a PostgREST error body into a structured error. Unique constraint
/// violations get a recognizable message for the API layer to map to 409.
fn table_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    if let Ok(error) = serde_json::from_str::<Value>(body) {
        let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("table request failed");

        if code == "23505" {
            return anyhow!("duplicate row: {message}");
        }
        if code == "23503" {
            return anyhow!("referenced row does not exist: {message}");
        }

        return anyhow!("table request failed with status {status}: {message}");
    }

    anyhow!("table request failed with status {status} and body: {body}")
}

/// True when an error came from a unique constraint violation.
pub fn is_duplicate(error: &anyhow::Error) -> bool {
    error.to_string().starts_with("duplicate row")
}

/// True when an error came from a foreign key violation, e.g. creating a
/// unit under a site that does not exist.
pub fn is_missing_reference(error: &anyhow::Error) -> bool {
    error.to_string().starts_with("referenced row")
}

impl SensorStore for SupabaseRestClient {
    async fn list_sensors(&self, organization_id: String) -> Result<Vec<Sensor>> {
        self.select(
            Self::SENSORS_TABLE,
            &format!("organization_id=eq.{organization_id}&archived_at=is.null&select=*"),
        )
        .await
    }

    async fn get_sensor(&self, id: String) -> Result<Sensor> {
        let rows: Vec<Sensor> = self
            .select(Self::SENSORS_TABLE, &format!("id=eq.{id}&select=*"))
            .await?;

        rows.into_iter()
            .next()
            .context(format!("sensor {id} not found"))
    }

    async fn insert_sensor(&self, row: NewSensor) -> Result<Sensor> {
        self.insert(Self::SENSORS_TABLE, row).await
    }

    async fn update_sensor(&self, id: String, patch: SensorPatch) -> Result<Sensor> {
        self.patch(Self::SENSORS_TABLE, &id, patch).await
    }

    async fn archive_sensor(&self, id: String) -> Result<()> {
        self.archive(Self::SENSORS_TABLE, &id).await
    }

    async fn list_gateways(&self, organization_id: String) -> Result<Vec<Gateway>> {
        self.select(
            Self::GATEWAYS_TABLE,
            &format!("organization_id=eq.{organization_id}&archived_at=is.null&select=*"),
        )
        .await
    }

    async fn insert_gateway(&self, row: NewGateway) -> Result<Gateway> {
        self.insert(Self::GATEWAYS_TABLE, row).await
    }

    async fn update_gateway(&self, id: String, patch: GatewayPatch) -> Result<Gateway> {
        self.patch(Self::GATEWAYS_TABLE, &id, patch).await
    }

    async fn archive_gateway(&self, id: String) -> Result<()> {
        self.archive(Self::GATEWAYS_TABLE, &id).await
    }

    async fn list_sites(&self, organization_id: String) -> Result<Vec<Site>> {
        self.select(
            Self::SITES_TABLE,
            &format!("organization_id=eq.{organization_id}&archived_at=is.null&select=*"),
        )
        .await
    }

    async fn insert_site(&self, row: NewSite) -> Result<Site> {
        self.insert(Self::SITES_TABLE, row).await
    }

    async fn update_site(&self, id: String, patch: SitePatch) -> Result<Site> {
        self.patch(Self::SITES_TABLE, &id, patch).await
    }

    async fn archive_site(&self, id: String) -> Result<()> {
        self.archive(Self::SITES_TABLE, &id).await
    }

    async fn list_units(&self, site_id: String) -> Result<Vec<Unit>> {
        self.select(
            Self::UNITS_TABLE,
            &format!("site_id=eq.{site_id}&archived_at=is.null&select=*"),
        )
        .await
    }

    async fn insert_unit(&self, row: NewUnit) -> Result<Unit> {
        self.insert(Self::UNITS_TABLE, row).await
    }

    async fn update_unit(&self, id: String, patch: UnitPatch) -> Result<Unit> {
        self.patch(Self::UNITS_TABLE, &id, patch).await
    }

    async fn archive_unit(&self, id: String) -> Result<()> {
        self.archive(Self::UNITS_TABLE, &id).await
    }

    async fn get_unit(&self, id: String) -> Result<Option<Unit>> {
        let rows: Vec<Unit> = self
            .select(Self::UNITS_TABLE, &format!("id=eq.{id}&select=*"))
            .await?;

        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    mod build_url {
        use super::*;

        fn create_test_client() -> SupabaseRestClient {
            SupabaseRestClient {
                client: reqwest::Client::new(),
                base_url: "http://127.0.0.1:54321".to_string(),
                service_role_key: "test-key".to_string(),
            }
        }

        #[test]
        fn joins_table_and_filter() {
            let client = create_test_client();
            assert_eq!(
                client.build_url("sensors", "id=eq.row-1"),
                "http://127.0.0.1:54321/rest/v1/sensors?id=eq.row-1"
            );
        }

        #[test]
        fn omits_question_mark_without_filter() {
            let client = create_test_client();
            assert_eq!(
                client.build_url("sensors", ""),
                "http://127.0.0.1:54321/rest/v1/sensors"
            );
        }
    }

    mod error_mapping {
        use super::*;

        #[test]
        fn unique_violation_is_recognized_as_duplicate() {
            let error = table_error(
                StatusCode::CONFLICT,
                r#"{"code":"23505","message":"duplicate key value violates unique constraint \"sensors_org_dev_eui_key\""}"#,
            );
            assert!(is_duplicate(&error));
        }

        #[test]
        fn foreign_key_violation_is_a_missing_reference() {
            let error = table_error(
                StatusCode::CONFLICT,
                r#"{"code":"23503","message":"insert violates foreign key constraint \"units_site_id_fkey\""}"#,
            );
            assert!(!is_duplicate(&error));
            assert!(is_missing_reference(&error));
        }

        #[test]
        fn unstructured_body_keeps_the_status() {
            let error = table_error(StatusCode::BAD_GATEWAY, "upstream unavailable");
            assert!(error.to_string().contains("502"));
        }
    }

    mod row_extraction {
        use super::*;
        use crate::model::Unit;

        #[test]
        fn single_row_returns_the_row() {
            let unit: Unit = SupabaseRestClient::single_row(
                r#"[{"id":"unit-1","site_id":"site-a","name":"Walk-in Freezer"}]"#,
                "units",
            )
            .unwrap();
            assert_eq!(unit.id, "unit-1");
        }

        #[test]
        fn empty_result_is_an_error() {
            let result: Result<Unit> = SupabaseRestClient::single_row("[]", "units");
            assert!(result.unwrap_err().to_string().contains("no row returned"));
        }
    }

    mod patch_shapes {
        use super::*;

        #[test]
        fn sensor_patch_cannot_express_credential_changes() {
            // Field list is the whole contract: no dev_eui/app_eui/app_key
            let patch = SensorPatch {
                name: Some("Freezer 2".to_string()),
                ..Default::default()
            };
            let json = serde_json::to_string(&patch).unwrap();
            assert_eq!(json, r#"{"name":"Freezer 2"}"#);
        }

        #[test]
        fn clearing_the_unit_serializes_null() {
            let patch = SensorPatch {
                unit_id: Some(None),
                ..Default::default()
            };
            let json = serde_json::to_string(&patch).unwrap();
            assert_eq!(json, r#"{"unit_id":null}"#);
        }
    }
}
