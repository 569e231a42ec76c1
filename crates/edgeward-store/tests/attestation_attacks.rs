//! Attestation Attack Scenario Tests
//!
//! Each test plays a misbehaving device (or a replaying intermediary)
//! against the registry and checks that it does not end up trusted.

use std::collections::HashSet;
use std::sync::Arc;

use edgeward_core::{
    AttestationState, DeviceIdentity, EdgewardError, GlobalOptions, KeyPair, PcrTemplate,
};
use edgeward_store::{DeviceError, DeviceRegistry, StoreConfig};
use uuid::Uuid;

// =============================================================================
// Test Helpers
// =============================================================================

fn golden() -> PcrTemplate {
    PcrTemplate::new("12.4.0-kvm-amd64", "fw-2024.1")
        .with_value(0, "a1b2c3")
        .with_value(1, "*")
        .with_value(7, "d4e5f6")
}

fn registry_with_policy() -> DeviceRegistry {
    let registry = DeviceRegistry::in_memory(&StoreConfig::default());
    registry.set_global_options(GlobalOptions::enforcing(vec![golden()]));
    registry
}

fn provisioned(registry: &DeviceRegistry) -> Uuid {
    let id = Uuid::new_v4();
    registry
        .provision(id, DeviceIdentity::new().with_serial(id.to_string()))
        .expect("Failed to provision device");
    id
}

fn honest_report() -> PcrTemplate {
    PcrTemplate::new("12.4.0-kvm-amd64", "fw-2024.1")
        .with_value(0, "a1b2c3")
        .with_value(1, "0f0f0f")
        .with_value(7, "d4e5f6")
}

fn is_invalid_state(result: &Result<impl std::fmt::Debug, DeviceError>) -> bool {
    matches!(
        result,
        Err(DeviceError::Attestation(EdgewardError::InvalidState { .. }))
    )
}

// =============================================================================
// ATTACK: Skipping the Challenge
// =============================================================================

/// A device reports measurements without ever being challenged, hoping
/// to be evaluated against a stale or absent nonce.
#[test]
fn attack_measurement_without_nonce_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    let result = registry.record_measurement(id, honest_report(), vec![]);
    assert!(is_invalid_state(&result));

    let result = registry.evaluate(id);
    assert!(is_invalid_state(&result));
    assert!(!registry.get(id).unwrap().is_attested());
}

// =============================================================================
// ATTACK: Nonce Replay
// =============================================================================

/// A captured measurement is replayed against the same nonce.
#[test]
fn attack_second_measurement_for_one_nonce_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, honest_report(), vec![]).unwrap();

    let replay = registry.record_measurement(id, honest_report(), vec![]);
    assert!(is_invalid_state(&replay));
}

/// Issuing a new nonce invalidates the previous one.
#[test]
fn attack_old_nonce_superseded() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    let first = registry.issue_nonce(id).unwrap();
    let second = registry.issue_nonce(id).unwrap();
    assert_ne!(first, second);

    let options = registry.get(id).unwrap().device_options().unwrap();
    assert_eq!(options.nonce, second);
    assert_eq!(options.state, AttestationState::NonceIssued);
}

// =============================================================================
// ATTACK: Tampered Measurements
// =============================================================================

/// One altered PCR is enough to fail the template.
#[test]
fn attack_modified_pcr_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    let tampered = PcrTemplate::new("12.4.0-kvm-amd64", "fw-2024.1")
        .with_value(0, "a1b2c3")
        .with_value(1, "0f0f0f")
        .with_value(7, "badbad");

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, tampered, vec![]).unwrap();
    assert!(!registry.evaluate(id).unwrap());

    let options = registry.get(id).unwrap().device_options().unwrap();
    assert!(!options.attested);
    assert!(options.integrity_token.is_empty());
    assert_eq!(options.state, AttestationState::Rejected);
}

/// Omitting a PCR the template requires does not satisfy it, even where
/// the template expects a wildcard.
#[test]
fn attack_omitted_pcr_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    let partial = PcrTemplate::new("12.4.0-kvm-amd64", "fw-2024.1")
        .with_value(0, "a1b2c3")
        .with_value(7, "d4e5f6");

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, partial, vec![]).unwrap();
    assert!(!registry.evaluate(id).unwrap());
}

/// Claiming a different firmware version to land on a laxer template.
#[test]
fn attack_version_spoof_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    let spoofed = PcrTemplate::new("12.4.0-kvm-amd64", "fw-2023.9")
        .with_value(0, "a1b2c3")
        .with_value(1, "0f0f0f")
        .with_value(7, "d4e5f6");

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, spoofed, vec![]).unwrap();
    assert!(!registry.evaluate(id).unwrap());
}

// =============================================================================
// ATTACK: Token Misuse
// =============================================================================

/// A rejected device can retry the full handshake and attest honestly.
#[test]
fn rejected_device_can_retry() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    registry.issue_nonce(id).unwrap();
    registry
        .record_measurement(id, PcrTemplate::new("0", "0"), vec![])
        .unwrap();
    assert!(!registry.evaluate(id).unwrap());

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, honest_report(), vec![]).unwrap();
    assert!(registry.evaluate(id).unwrap());
}

/// A token signed by some other key is worthless.
#[test]
fn attack_forged_token_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, honest_report(), vec![]).unwrap();
    assert!(registry.evaluate(id).unwrap());
    let grant_nonce = registry.get(id).unwrap().device_options().unwrap().nonce;

    let forger = KeyPair::generate(registry.token_public_key().kid().to_string());
    let forged = forger
        .issue_token(&edgeward_core::IntegrityGrant::new(
            id,
            grant_nonce,
            Some(0),
            "12.4.0-kvm-amd64",
            "fw-2024.1",
        ))
        .unwrap();

    let result = registry.verify_integrity_token(id, &forged);
    assert!(matches!(
        result,
        Err(DeviceError::Attestation(EdgewardError::InvalidToken(_)))
    ));
}

/// An attested device cannot be pushed back through the handshake to
/// overwrite its recorded measurements.
#[test]
fn attack_reattest_while_attested_rejected() {
    let registry = registry_with_policy();
    let id = provisioned(&registry);

    registry.issue_nonce(id).unwrap();
    registry.record_measurement(id, honest_report(), vec![]).unwrap();
    assert!(registry.evaluate(id).unwrap());

    assert!(is_invalid_state(&registry.issue_nonce(id)));
    assert!(is_invalid_state(
        &registry.record_measurement(id, PcrTemplate::new("0", "0"), vec![])
    ));

    let options = registry.get(id).unwrap().device_options().unwrap();
    assert_eq!(options.received_pcr_template, Some(honest_report()));
    assert!(options.attested);
}

/// Disabling enforcement trusts any report, and the token records that no
/// template was consulted.
#[test]
fn enforcement_disabled_accepts_anything() {
    let registry = registry_with_policy();
    registry.set_global_options(GlobalOptions::default());
    let id = provisioned(&registry);

    registry.issue_nonce(id).unwrap();
    registry
        .record_measurement(id, PcrTemplate::new("any", "thing"), vec![])
        .unwrap();
    assert!(registry.evaluate(id).unwrap());

    let token = registry.get(id).unwrap().device_options().unwrap().integrity_token;
    let grant = registry.verify_integrity_token(id, &token).unwrap();
    assert_eq!(grant.template_index, None);
}

// =============================================================================
// ATTACK: Racing Handshakes
// =============================================================================

fn tampered_report() -> PcrTemplate {
    PcrTemplate::new("12.4.0-kvm-amd64", "fw-2024.1")
        .with_value(0, "a1b2c3")
        .with_value(1, "0f0f0f")
        .with_value(7, "badbad")
}

/// Challenges, reports and evaluations from concurrent callers interleave
/// on one device. Each transition lands whole: the stored token always
/// belongs to the stored nonce and the measurement that earned it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn attack_racing_handshakes_never_mix_transitions() {
    let registry = Arc::new(registry_with_policy());
    let id = provisioned(&registry);

    let mut handles = Vec::new();
    for worker in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let report = if worker % 2 == 0 {
                honest_report()
            } else {
                tampered_report()
            };
            let mut issued = Vec::new();
            let mut attestations = 0;

            for _ in 0..50 {
                match registry.issue_nonce(id) {
                    Ok(nonce) => issued.push(nonce),
                    result => assert!(is_invalid_state(&result), "{:?}", result),
                }
                tokio::task::yield_now().await;

                let result = registry.record_measurement(id, report.clone(), vec![]);
                assert!(result.is_ok() || is_invalid_state(&result), "{:?}", result);
                tokio::task::yield_now().await;

                match registry.evaluate(id) {
                    Ok(true) => attestations += 1,
                    Ok(false) => {}
                    result => assert!(is_invalid_state(&result), "{:?}", result),
                }
            }
            (issued, attestations)
        }));
    }

    let mut issued = Vec::new();
    let mut attestations = 0;
    for handle in handles {
        let (nonces, count) = handle.await.expect("Task panicked");
        issued.extend(nonces);
        attestations += count;
    }

    let unique: HashSet<&String> = issued.iter().collect();
    assert_eq!(unique.len(), issued.len(), "nonce issued twice");

    let options = registry.get(id).unwrap().device_options().unwrap();
    assert!(unique.contains(&options.nonce));

    if options.state == AttestationState::Attested {
        // attested is sticky, so only one evaluation could have won
        assert_eq!(attestations, 1);
        assert!(options.attested);
        assert_eq!(options.received_pcr_template, Some(honest_report()));

        let grant = registry
            .verify_integrity_token(id, &options.integrity_token)
            .unwrap();
        assert_eq!(grant.device, id);
        assert_eq!(grant.nonce, options.nonce);
        assert!(is_invalid_state(&registry.issue_nonce(id)));
    } else {
        assert_eq!(attestations, 0);
        assert!(!options.attested);
        assert!(options.integrity_token.is_empty());
    }
}
