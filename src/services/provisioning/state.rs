//! Transition function for the client-observed TTN registration state of a
//! sensor.
//!
//! The state is owned by the server; this machine only folds observed events
//! (check results, action results) into the last-known state. Events that do
//! not apply to the current state leave it unchanged, and there are no
//! terminal states: `error` and `unknown` always recover through a re-check.

use crate::model::ProvisioningState;

/// An observation that can move the registration state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningEvent {
    /// A check reported the device present in TTN
    CheckedPresent,
    /// A check reported the device absent from TTN
    CheckedAbsent,
    /// A check could not produce a verdict
    CheckFailed,
    /// A provision action was accepted
    Provisioned,
    /// An unprovision action was accepted (no remote contract yet, kept for
    /// when it lands)
    Unprovisioned,
}

pub fn transition(state: ProvisioningState, event: ProvisioningEvent) -> ProvisioningState {
    use ProvisioningEvent::*;
    use ProvisioningState::*;

    match (state, event) {
        // A check verdict overrides whatever we believed before
        (_, CheckedPresent) => ExistsInTtn,
        (_, CheckedAbsent) => MissingInTtn,
        (_, CheckFailed) => Error,

        // Provisioning only moves a device known to be absent; a device that
        // was never checked (or errored) must be re-checked first
        (MissingInTtn, Provisioned) => ExistsInTtn,
        (ExistsInTtn, Provisioned) => ExistsInTtn,
        (NotConfigured | Unknown | Error, Provisioned) => state,

        // Unprovisioning only applies to a device known to be present
        (ExistsInTtn, Unprovisioned) => MissingInTtn,
        (NotConfigured | MissingInTtn | Unknown | Error, Unprovisioned) => state,
    }
}
