//! Property-Based Tests for Common Name Sanitization
//!
//! 1. SAFETY: a sanitized name only contains `[A-Za-z0-9.-_]` and never a separator
//! 2. IDEMPOTENCE: sanitizing twice changes nothing
//! 3. DETERMINISM: one common name always maps to the same file pair
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use proptest::prelude::*;
use edgeward_identity::{sanitize_common_name, IdentityPaths};

// =============================================================================
// INVARIANT 1: SAFETY
// =============================================================================

proptest! {
    #[test]
    fn prop_sanitized_chars_are_safe(cn in any::<String>()) {
        let name = sanitize_common_name(&cn);
        prop_assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'));
        prop_assert!(!name.contains('/'));
        prop_assert!(!name.contains('\\'));
    }

    /// One output character per input character
    #[test]
    fn prop_length_preserved(cn in any::<String>()) {
        prop_assert_eq!(sanitize_common_name(&cn).chars().count(), cn.chars().count());
    }

    /// Names already in the safe alphabet pass through untouched
    #[test]
    fn prop_safe_names_unchanged(cn in "[A-Za-z0-9.-]{0,32}") {
        prop_assert_eq!(sanitize_common_name(&cn), cn);
    }
}

// =============================================================================
// INVARIANT 2: IDEMPOTENCE
// =============================================================================

proptest! {
    #[test]
    fn prop_sanitize_idempotent(cn in any::<String>()) {
        let once = sanitize_common_name(&cn);
        prop_assert_eq!(sanitize_common_name(&once), once);
    }
}

// =============================================================================
// INVARIANT 3: DETERMINISM
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Files always land directly inside the target directory
    #[test]
    fn prop_paths_stay_in_directory(cn in any::<String>()) {
        let dir = tempfile::tempdir().unwrap();
        let paths = IdentityPaths::in_directory(dir.path(), &cn).unwrap();

        prop_assert_eq!(paths.cert.parent(), Some(dir.path()));
        prop_assert_eq!(paths.key.parent(), Some(dir.path()));
        prop_assert_eq!(paths.clone(), IdentityPaths::in_directory(dir.path(), &cn).unwrap());
    }
}
