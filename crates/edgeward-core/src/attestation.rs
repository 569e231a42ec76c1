//! Attestation policy engine
//!
//! Devices prove their boot state by reporting PCR measurements in answer to
//! a controller-issued nonce. The reported measurements are compared against
//! the policy's templates; a device is attested when some template matches.
//!
//! ## State machine
//!
//! ```text
//! Unchallenged ──issue_nonce──▶ NonceIssued ──record_measurement──▶ MeasurementReceived
//!                                   ▲                                  │
//!                                   │                               evaluate
//!                                   │                                  ▼
//!                               Rejected ◀──────── no match ──── (template scan)
//!                                   ▲                                  │ match
//!                                   └──── reevaluate, no match ──── Attested
//! ```
//!
//! `Attested` is sticky: it accepts neither new nonces nor new measurements.
//! Only a caller-driven `reevaluate` against a changed policy can move a
//! device out of it.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::{generate_nonce, IntegrityGrant, KeyPair};
use crate::error::{EdgewardError, Result};
use crate::types::{DeviceOptions, GlobalOptions, PcrTemplate, TpmEventLogEntry};

/// Where a device stands in the attestation handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttestationState {
    #[default]
    Unchallenged,
    NonceIssued,
    MeasurementReceived,
    Attested,
    Rejected,
}

impl std::fmt::Display for AttestationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttestationState::Unchallenged => "unchallenged",
            AttestationState::NonceIssued => "nonce issued",
            AttestationState::MeasurementReceived => "measurement received",
            AttestationState::Attested => "attested",
            AttestationState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Check whether a reported measurement set satisfies a template
///
/// Versions must be equal and every template value must be satisfied by the
/// value the device reported at the same index: exact equality, or the
/// template holds the `*` wildcard. An index the device did not report
/// satisfies nothing. Extra reported indices are ignored.
pub fn template_matches(template: &PcrTemplate, reported: &PcrTemplate) -> bool {
    if !template.same_versions(reported) {
        return false;
    }

    template.values.iter().all(|expected| {
        reported
            .value_at(expected.index)
            .map_or(false, |actual| expected.is_satisfied_by(actual))
    })
}

/// Find the first template, in policy order, matching the reported measurements
pub fn find_matching_template<'a>(
    templates: &'a [PcrTemplate],
    reported: &PcrTemplate,
) -> Option<(usize, &'a PcrTemplate)> {
    templates
        .iter()
        .enumerate()
        .find(|(_, template)| template_matches(template, reported))
}

/// One device's attestation handshake over its stored options
///
/// The session borrows the decoded options exclusively, so a caller holding
/// it holds the device's attestation state for the duration of a transition.
pub struct AttestationSession<'a> {
    device: Uuid,
    options: &'a mut DeviceOptions,
}

impl<'a> AttestationSession<'a> {
    pub fn new(device: Uuid, options: &'a mut DeviceOptions) -> Self {
        Self { device, options }
    }

    pub fn device(&self) -> Uuid {
        self.device
    }

    pub fn state(&self) -> AttestationState {
        self.options.state
    }

    pub fn options(&self) -> &DeviceOptions {
        self.options
    }

    fn require(&self, operation: &'static str, allowed: &[AttestationState]) -> Result<()> {
        let state = self.options.state;
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(EdgewardError::InvalidState { operation, state })
        }
    }

    /// Issue a fresh challenge, invalidating any earlier one
    pub fn issue_nonce(&mut self) -> Result<String> {
        self.require(
            "issue nonce",
            &[
                AttestationState::Unchallenged,
                AttestationState::NonceIssued,
                AttestationState::MeasurementReceived,
                AttestationState::Rejected,
            ],
        )?;

        let nonce = generate_nonce();
        self.options.nonce = nonce.clone();
        self.options.state = AttestationState::NonceIssued;

        info!(device = %self.device, "Issued attestation nonce");
        Ok(nonce)
    }

    /// Store the device's reported measurements and supporting event log
    ///
    /// Accepted once per nonce.
    pub fn record_measurement(
        &mut self,
        reported: PcrTemplate,
        events: Vec<TpmEventLogEntry>,
    ) -> Result<()> {
        self.require("record measurement", &[AttestationState::NonceIssued])?;

        info!(
            device = %self.device,
            eve_version = %reported.eve_version,
            firmware_version = %reported.firmware_version,
            pcr_count = reported.values.len(),
            event_count = events.len(),
            "Recorded attestation measurement"
        );

        self.options.received_pcr_template = Some(reported);
        self.options.event_log.extend(events);
        self.options.state = AttestationState::MeasurementReceived;
        Ok(())
    }

    /// Evaluate the recorded measurements against the policy
    ///
    /// Returns whether the device is now attested.
    pub fn evaluate(&mut self, global: &GlobalOptions, issuer: &KeyPair) -> Result<bool> {
        self.require("evaluate", &[AttestationState::MeasurementReceived])?;
        self.apply_policy(global, issuer)
    }

    /// Re-run the policy for an attested device after a policy change
    pub fn reevaluate(&mut self, global: &GlobalOptions, issuer: &KeyPair) -> Result<bool> {
        self.require("reevaluate", &[AttestationState::Attested])?;
        self.apply_policy(global, issuer)
    }

    fn apply_policy(&mut self, global: &GlobalOptions, issuer: &KeyPair) -> Result<bool> {
        let reported = self
            .options
            .received_pcr_template
            .clone()
            .ok_or_else(|| EdgewardError::MissingField("receivedPCRTemplate".into()))?;

        let template_index = if global.enforce_template_attestation {
            match find_matching_template(&global.templates, &reported) {
                Some((index, _)) => Some(index),
                None => {
                    warn!(
                        device = %self.device,
                        eve_version = %reported.eve_version,
                        firmware_version = %reported.firmware_version,
                        template_count = global.templates.len(),
                        "SECURITY: Attestation rejected, no template matched"
                    );
                    self.options.attested = false;
                    self.options.integrity_token.clear();
                    self.options.state = AttestationState::Rejected;
                    return Ok(false);
                }
            }
        } else {
            None
        };

        let grant = IntegrityGrant::new(
            self.device,
            self.options.nonce.clone(),
            template_index,
            reported.eve_version,
            reported.firmware_version,
        );
        let token = issuer.issue_token(&grant)?;

        self.options.integrity_token = token;
        self.options.attested = true;
        self.options.state = AttestationState::Attested;

        info!(
            device = %self.device,
            template = ?template_index,
            enforced = global.enforce_template_attestation,
            "Device attested"
        );
        Ok(true)
    }
}
