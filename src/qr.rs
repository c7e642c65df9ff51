//! Kit QR payload decoding.
//!
//! Sensor kits ship with a QR code containing a base64url-encoded JSON object
//! `{dev_eui, app_eui, app_key, model_key}`; `model_key` is the catalog's
//! composite `manufacturer:model` key.

use anyhow::{Context, Result, anyhow, ensure};
use base64::{Engine, prelude::BASE64_URL_SAFE, prelude::BASE64_URL_SAFE_NO_PAD};
use serde::Deserialize;
use serde_valid::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct QrPayload {
    #[validate(pattern = r"^[0-9A-Fa-f:\- ]{16,23}$")]
    pub dev_eui: String,
    #[validate(pattern = r"^[0-9A-Fa-f:\- ]{16,23}$")]
    pub app_eui: String,
    #[validate(pattern = r"^[0-9A-Fa-f:\- ]{32,47}$")]
    pub app_key: String,
    #[validate(min_length = 3)]
    pub model_key: String,
}

/// Decode a scanned QR string into a validated payload.
///
/// Both padded and unpadded base64url are accepted; scanner apps disagree.
pub fn decode_qr_payload(encoded: &str) -> Result<QrPayload> {
    let raw = BASE64_URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .or_else(|_| BASE64_URL_SAFE.decode(encoded.trim()))
        .context("failed to decode QR payload: not base64url")?;

    let payload: QrPayload =
        serde_json::from_slice(&raw).context("failed to decode QR payload: not a payload object")?;

    payload
        .validate()
        .map_err(|e| anyhow!("failed to validate QR payload: {e}"))?;

    Ok(payload)
}

/// Split a `manufacturer:model` catalog key into its parts.
pub fn split_model_key(model_key: &str) -> Result<(String, String)> {
    let (manufacturer, model) = model_key
        .split_once(':')
        .context("failed to parse model_key: expected manufacturer:model")?;

    ensure!(
        !manufacturer.is_empty() && !model.is_empty(),
        "failed to parse model_key: empty manufacturer or model"
    );

    Ok((manufacturer.to_lowercase(), model.to_lowercase()))
}
