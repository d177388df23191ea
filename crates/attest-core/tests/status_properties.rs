//! Property-Based Tests for the Certificate Lifecycle
//!
//! These tests verify two core guarantees for arbitrary inputs:
//! 1. TOTALITY: every provider status code maps to exactly one of the
//!    six known statuses
//! 2. LEGALITY: no transition outside the lifecycle table is accepted
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use proptest::prelude::*;
use attest_core::{map_provider_status, CertificateStatus};

const ALL_STATUSES: [CertificateStatus; 6] = [
    CertificateStatus::Pending,
    CertificateStatus::Processing,
    CertificateStatus::Completed,
    CertificateStatus::Failed,
    CertificateStatus::Cancelled,
    CertificateStatus::Suspended,
];

// =============================================================================
// TOTALITY: map_provider_status is defined for every integer
// =============================================================================

proptest! {
    /// Every sampled code maps onto one of the six known statuses
    #[test]
    fn prop_status_mapping_total(code in any::<i64>()) {
        let mapped = map_provider_status(code);
        prop_assert!(ALL_STATUSES.contains(&mapped));
    }

    /// Negative codes always mean failure, never an active status
    #[test]
    fn prop_negative_codes_never_active(code in i64::MIN..0i64) {
        prop_assert_eq!(map_provider_status(code), CertificateStatus::Failed);
    }

    /// Unmapped positive codes degrade to pending rather than inventing
    /// progress
    #[test]
    fn prop_unknown_positive_codes_pend(code in 1i64..i64::MAX) {
        prop_assume!(![121, 122, 123, 124].contains(&code));
        prop_assert_eq!(map_provider_status(code), CertificateStatus::Pending);
    }
}

// =============================================================================
// LEGALITY: the transition table is closed
// =============================================================================

/// Enumerate the full 6x6 edge matrix and verify only the five lifecycle
/// edges are accepted
#[test]
fn test_transition_table_is_closed() {
    use CertificateStatus::*;
    let legal = [
        (Pending, Processing),
        (Processing, Completed),
        (Processing, Failed),
        (Completed, Cancelled),
        (Completed, Suspended),
    ];

    let mut accepted = 0;
    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let allowed = from.can_transition_to(to);
            assert_eq!(
                allowed,
                legal.contains(&(from, to)),
                "unexpected verdict for {from} -> {to}"
            );
            if allowed {
                accepted += 1;
            }
        }
    }
    assert_eq!(accepted, legal.len());
}

/// Self-transitions are never part of the lifecycle
#[test]
fn test_no_self_transitions() {
    for status in ALL_STATUSES {
        assert!(!status.can_transition_to(status));
    }
}
