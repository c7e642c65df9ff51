#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

//! Client for the TTN provisioning edge functions.
//!
//! The edge functions are an opaque JSON surface with historically uneven
//! response shapes (`success` vs `ok`, nested vs flat errors). All of that is
//! normalized here, at one boundary, into [`ActionOutcome`]; call sites never
//! branch on raw shapes.

use crate::{
    config::AppConfig,
    http_client::edge_function_client,
    model::TtnConfig,
    services::provisioning::{ActionOutcome, Decline, DeclineCode},
};
use anyhow::{Context, Result, bail, ensure};
use log::info;
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::{Client, StatusCode};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use trait_variant::make;

/// Minimum edge functions release this service can talk to.
pub const REQUIRED_FUNCTIONS_VERSION: &str = ">=1.4.0";

#[derive(Clone, Serialize)]
pub struct ProvisionDeviceRequest {
    pub device_id: String,
    pub dev_eui: String,
    pub app_eui: String,
    pub app_key: String,
    pub name: String,
}

// Manual Debug so the AppKey never reaches a log line
impl std::fmt::Debug for ProvisionDeviceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionDeviceRequest")
            .field("device_id", &self.device_id)
            .field("dev_eui", &self.dev_eui)
            .field("app_eui", &self.app_eui)
            .field("app_key", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

/// Partial settings patch. The API key is only ever transmitted when the user
/// supplies a new value; it is never round-tripped from server state.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct TtnSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_events: Option<Vec<String>>,
}

// Manual Debug so a freshly supplied API key never reaches a log line
impl std::fmt::Debug for TtnSettingsPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtnSettingsPatch")
            .field("is_enabled", &self.is_enabled)
            .field("cluster", &self.cluster)
            .field("application_id", &self.application_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("webhook_events", &self.webhook_events)
            .finish()
    }
}

/// Marker error: the remote side rejected our credentials. The HTTP layer
/// maps this to 401 so the frontend can redirect to sign-in.
#[derive(Debug)]
pub struct SessionExpired;

impl std::fmt::Display for SessionExpired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("remote session expired")
    }
}

impl std::error::Error for SessionExpired {}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionsVersionInfo {
    pub required: String,
    pub current: String,
    pub mismatch: bool,
}

#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait TtnProvisioning {
    async fn provision_device(&self, request: ProvisionDeviceRequest) -> Result<ActionOutcome>;
    async fn check_devices(&self, device_ids: Vec<String>) -> Result<ActionOutcome>;
    async fn diagnose_device(&self, device_id: String) -> Result<ActionOutcome>;
    async fn retry_provisioning(&self) -> Result<ActionOutcome>;
    async fn start_fresh(&self) -> Result<ActionOutcome>;
    async fn deep_clean(&self) -> Result<ActionOutcome>;
    async fn regenerate_webhook_secret(&self) -> Result<ActionOutcome>;
    async fn get_settings(&self) -> Result<TtnConfig>;
    async fn update_settings(&self, patch: TtnSettingsPatch) -> Result<TtnConfig>;
    async fn test_settings(&self) -> Result<ActionOutcome>;
}

#[derive(Clone)]
pub struct TtnEdgeClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl TtnEdgeClient {
    // Edge function names
    const PROVISION_ENDPOINT: &str = "ttn-provision-device";
    const CHECK_ENDPOINT: &str = "ttn-check-devices";
    const DIAGNOSE_ENDPOINT: &str = "ttn-diagnose-device";
    const RETRY_ENDPOINT: &str = "ttn-retry";
    const START_FRESH_ENDPOINT: &str = "ttn-start-fresh";
    const DEEP_CLEAN_ENDPOINT: &str = "ttn-deep-clean";
    const WEBHOOK_SECRET_ENDPOINT: &str = "ttn-regenerate-webhook-secret";
    const SETTINGS_ENDPOINT: &str = "ttn-settings";
    const SETTINGS_TEST_ENDPOINT: &str = "ttn-settings-test";

    pub fn new() -> Result<Self> {
        let config = AppConfig::get();

        Ok(TtnEdgeClient {
            client: edge_function_client(config.actions.request_timeout)?,
            base_url: config.supabase.url.clone(),
            service_role_key: config.supabase.service_role_key.clone(),
        })
    }

    fn build_url(&self, function: &str) -> String {
        let normalized = function.trim_start_matches('/');
        format!("{}/functions/v1/{normalized}", self.base_url)
    }

    /// GET request to an edge function
    async fn get(&self, function: &str) -> Result<(StatusCode, String)> {
        let url = self.build_url(function);
        info!("GET {url}");

        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.service_role_key)
            .send()
            .await
            .context(format!("failed to send GET request to {url}"))?;

        Self::split_response(res).await
    }

    /// POST request to an edge function with JSON body
    async fn post_json(
        &self,
        function: &str,
        body: impl std::fmt::Debug + Serialize,
    ) -> Result<(StatusCode, String)> {
        let url = self.build_url(function);
        info!("POST {url} with body: {body:?}");

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.service_role_key)
            .json(&body)
            .send()
            .await
            .context(format!("failed to send POST request to {url}"))?;

        Self::split_response(res).await
    }

    async fn split_response(res: reqwest::Response) -> Result<(StatusCode, String)> {
        let status = res.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(anyhow::Error::new(SessionExpired));
        }

        let body = res.text().await.context("failed to read response body")?;
        Ok((status, body))
    }

    async fn post_action(
        &self,
        function: &str,
        body: impl std::fmt::Debug + Serialize,
    ) -> Result<ActionOutcome> {
        let (status, body) = self.post_json(function, body).await?;
        interpret_response(status, &body).context(format!("POST {}", self.build_url(function)))
    }

    fn settings_from_body(status: StatusCode, body: &str) -> Result<TtnConfig> {
        ensure!(
            status.is_success(),
            "settings request failed with status {status} and body: {body}"
        );

        let value: Value =
            serde_json::from_str(body).context("failed to parse settings response")?;

        // Newer releases wrap the config; older ones return it flat
        let config = match value.get("config") {
            Some(config) => config.clone(),
            None => value,
        };

        serde_json::from_value(config).context("failed to parse TTN configuration")
    }
}

impl TtnProvisioning for TtnEdgeClient {
    async fn provision_device(&self, request: ProvisionDeviceRequest) -> Result<ActionOutcome> {
        self.post_action(Self::PROVISION_ENDPOINT, request).await
    }

    async fn check_devices(&self, device_ids: Vec<String>) -> Result<ActionOutcome> {
        self.post_action(
            Self::CHECK_ENDPOINT,
            serde_json::json!({ "device_ids": device_ids }),
        )
        .await
    }

    async fn diagnose_device(&self, device_id: String) -> Result<ActionOutcome> {
        self.post_action(
            Self::DIAGNOSE_ENDPOINT,
            serde_json::json!({ "device_id": device_id }),
        )
        .await
    }

    async fn retry_provisioning(&self) -> Result<ActionOutcome> {
        self.post_action(Self::RETRY_ENDPOINT, serde_json::json!({})).await
    }

    async fn start_fresh(&self) -> Result<ActionOutcome> {
        self.post_action(Self::START_FRESH_ENDPOINT, serde_json::json!({}))
            .await
    }

    async fn deep_clean(&self) -> Result<ActionOutcome> {
        self.post_action(Self::DEEP_CLEAN_ENDPOINT, serde_json::json!({}))
            .await
    }

    async fn regenerate_webhook_secret(&self) -> Result<ActionOutcome> {
        self.post_action(Self::WEBHOOK_SECRET_ENDPOINT, serde_json::json!({}))
            .await
    }

    async fn get_settings(&self) -> Result<TtnConfig> {
        let (status, body) = self.get(Self::SETTINGS_ENDPOINT).await?;
        Self::settings_from_body(status, &body)
    }

    async fn update_settings(&self, patch: TtnSettingsPatch) -> Result<TtnConfig> {
        let (status, body) = self.post_json(Self::SETTINGS_ENDPOINT, patch).await?;
        Self::settings_from_body(status, &body)
    }

    async fn test_settings(&self) -> Result<ActionOutcome> {
        self.post_action(Self::SETTINGS_TEST_ENDPOINT, serde_json::json!({}))
            .await
    }
}

fn required_version() -> &'static VersionReq {
    static REQUIRED_VERSION: OnceLock<VersionReq> = OnceLock::new();
    REQUIRED_VERSION.get_or_init(|| {
        VersionReq::parse(REQUIRED_FUNCTIONS_VERSION)
            .expect("invalid REQUIRED_FUNCTIONS_VERSION constant")
    })
}

/// Compare the functions version reported by the settings endpoint against
/// the release this service requires.
pub fn functions_version_info(config: &TtnConfig) -> Result<FunctionsVersionInfo> {
    let Some(current) = &config.functions_version else {
        bail!("settings did not report a functions version");
    };

    let parsed = Version::parse(current).context("failed to parse functions version")?;

    Ok(FunctionsVersionInfo {
        required: REQUIRED_FUNCTIONS_VERSION.to_string(),
        current: current.clone(),
        mismatch: !required_version().matches(&parsed),
    })
}

/// Normalize a raw edge-function response into an [`ActionOutcome`].
///
/// A structurally valid body declaring `success:false` (or `ok:false`) is a
/// decline regardless of HTTP status. Malformed JSON, non-2xx without a
/// verdict, or a claimed success on a failing status are transport errors.
pub fn interpret_response(status: StatusCode, body: &str) -> Result<ActionOutcome> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        bail!("request failed with status {status} and non-JSON body: {body}");
    };

    let verdict = value
        .get("success")
        .or_else(|| value.get("ok"))
        .and_then(Value::as_bool);

    match verdict {
        Some(true) if status.is_success() => Ok(ActionOutcome::Accepted(value)),
        Some(true) => bail!("remote reported success with failing status {status}"),
        Some(false) => Ok(ActionOutcome::Declined(decline_from_body(&value))),
        // Plain payloads without a verdict field (e.g. report bodies)
        None if status.is_success() => Ok(ActionOutcome::Accepted(value)),
        None => bail!("request failed with status {status} and body: {body}"),
    }
}

fn decline_from_body(value: &Value) -> Decline {
    let use_start_fresh = value
        .get("use_start_fresh")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (code, message) = match value.get("error") {
        Some(Value::String(message)) => (None, message.clone()),
        Some(Value::Object(error)) => (
            error
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string),
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("action declined")
                .to_string(),
        ),
        _ => (None, "action declined".to_string()),
    };

    let hint = value
        .get("hint")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("error")
                .and_then(|error| error.get("hint"))
                .and_then(Value::as_str)
        })
        .map(str::to_string);

    // An unowned application makes retry deterministic failure; that gets its
    // own code so the UI can steer to Start Fresh
    let code = if use_start_fresh {
        DeclineCode::ApplicationUnowned
    } else {
        match code {
            Some(code) => DeclineCode::from_remote(&code),
            None => DeclineCode::Remote("REMOTE_DECLINED".to_string()),
        }
    };

    Decline {
        code,
        message,
        hint,
        use_start_fresh,
    }
}
