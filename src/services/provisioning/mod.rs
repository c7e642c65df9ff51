//! Provisioning core: status reconciliation, action gating, dispatch and
//! outcome normalization for the TTN provisioning surface.

pub mod dispatch;
pub mod guard;
pub mod state;
pub mod status;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Outcome of a provisioning action that reached a verdict.
///
/// Transport failures (network errors, malformed payloads, unexpected non-2xx)
/// are *not* outcomes; they travel as `Err` on the surrounding `Result`. A
/// decline is an expected result, not a system error.
#[derive(Clone, Debug)]
pub enum ActionOutcome {
    /// The remote side accepted the action; payload is its response body.
    Accepted(Value),
    /// The remote side (or a local precondition) refused the action.
    Declined(Decline),
}

impl ActionOutcome {
    pub fn is_declined(&self) -> bool {
        matches!(self, ActionOutcome::Declined(_))
    }
}

/// Why an action was refused.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeclineCode {
    TtnNotConfigured,
    TtnMissingApiKey,
    TtnMissingApplication,
    MissingDevEui,
    MissingAppKey,
    AlreadyProvisioned,
    /// The remote application is not owned by the current credentials; a
    /// retry will deterministically fail again and only "start fresh" helps.
    ApplicationUnowned,
    /// Unprovisioning has no remote contract yet.
    UnprovisionUnsupported,
    /// Another action on the same row (or batch) is still in flight.
    RowBusy,
    /// Any other code reported by the remote side, passed through verbatim.
    Remote(String),
}

impl DeclineCode {
    pub fn as_str(&self) -> &str {
        match self {
            DeclineCode::TtnNotConfigured => "TTN_NOT_CONFIGURED",
            DeclineCode::TtnMissingApiKey => "TTN_MISSING_API_KEY",
            DeclineCode::TtnMissingApplication => "TTN_MISSING_APPLICATION",
            DeclineCode::MissingDevEui => "MISSING_DEV_EUI",
            DeclineCode::MissingAppKey => "MISSING_APP_KEY",
            DeclineCode::AlreadyProvisioned => "ALREADY_PROVISIONED",
            DeclineCode::ApplicationUnowned => "APPLICATION_UNOWNED",
            DeclineCode::UnprovisionUnsupported => "UNPROVISION_UNSUPPORTED",
            DeclineCode::RowBusy => "ROW_BUSY",
            DeclineCode::Remote(code) => code,
        }
    }

    /// Map a code string reported by the remote side back onto the local
    /// taxonomy where it matches, keeping unknown codes verbatim.
    pub fn from_remote(code: &str) -> Self {
        match code {
            "TTN_NOT_CONFIGURED" => DeclineCode::TtnNotConfigured,
            "TTN_MISSING_API_KEY" => DeclineCode::TtnMissingApiKey,
            "TTN_MISSING_APPLICATION" => DeclineCode::TtnMissingApplication,
            "MISSING_DEV_EUI" => DeclineCode::MissingDevEui,
            "MISSING_APP_KEY" => DeclineCode::MissingAppKey,
            "ALREADY_PROVISIONED" => DeclineCode::AlreadyProvisioned,
            "APPLICATION_UNOWNED" => DeclineCode::ApplicationUnowned,
            other => DeclineCode::Remote(other.to_string()),
        }
    }
}

impl Serialize for DeclineCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl std::fmt::Display for DeclineCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refusal with the detail the dashboard needs to explain it.
#[derive(Clone, Debug, Serialize)]
pub struct Decline {
    pub code: DeclineCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// When set, retrying is pointless; the UI hides "Retry" and offers
    /// "Start Fresh" instead.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_start_fresh: bool,
}

impl Decline {
    pub fn new(code: DeclineCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
            use_start_fresh: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
