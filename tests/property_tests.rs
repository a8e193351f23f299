//! Property-based tests for the significance math and definition parsing.
//!
//! Mathematical invariants only; run with `ProptestConfig::with_cases(100)`
//! so the suite stays fast enough for a pre-commit hook.

use proptest::prelude::*;
use repartir::{z_score, Alternative, AlternativeSpec, Significance};

// ============================================================================
// Strategies
// ============================================================================

fn arb_rate() -> impl Strategy<Value = f64> {
    0.0f64..=1.0
}

fn arb_sample() -> impl Strategy<Value = u64> {
    0u64..100_000
}

// ============================================================================
// Significance properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: every input yields a finite score or the explicit sentinel,
    /// never NaN/infinity.
    #[test]
    fn prop_z_score_is_finite_or_na(
        p_a in arb_rate(), n_a in arb_sample(),
        p_c in arb_rate(), n_c in arb_sample(),
    ) {
        match z_score(p_a, n_a, p_c, n_c) {
            Significance::Score(z) => prop_assert!(z.is_finite()),
            Significance::NotApplicable => {}
        }
    }

    /// Property: swapping the two samples flips the sign.
    #[test]
    fn prop_z_score_antisymmetric(
        p_a in arb_rate(), n_a in 1u64..100_000,
        p_c in arb_rate(), n_c in 1u64..100_000,
    ) {
        let forward = z_score(p_a, n_a, p_c, n_c);
        let backward = z_score(p_c, n_c, p_a, n_a);
        match (forward, backward) {
            (Significance::Score(f), Significance::Score(b)) => {
                prop_assert!((f + b).abs() < 1e-9, "f={f} b={b}");
            }
            (Significance::NotApplicable, Significance::NotApplicable) => {}
            other => prop_assert!(false, "asymmetric definedness: {other:?}"),
        }
    }

    /// Property: identical samples score zero (or collapse to the sentinel
    /// at the extremes).
    #[test]
    fn prop_z_score_identical_samples_score_zero(
        p in arb_rate(), n in 1u64..100_000,
    ) {
        match z_score(p, n, p, n) {
            Significance::Score(z) => prop_assert!(z.abs() < 1e-9),
            Significance::NotApplicable => {
                // Only the zero-variance extremes are undefined.
                prop_assert!(p == 0.0 || p == 1.0);
            }
        }
    }

    /// Property: zero samples are never scored.
    #[test]
    fn prop_z_score_zero_samples_na(p_a in arb_rate(), p_c in arb_rate(), n in arb_sample()) {
        prop_assert_eq!(z_score(p_a, 0, p_c, n), Significance::NotApplicable);
        prop_assert_eq!(z_score(p_a, n, p_c, 0), Significance::NotApplicable);
    }
}

// ============================================================================
// Definition parsing properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a bare name always carries weight 1 and validates iff
    /// non-empty.
    #[test]
    fn prop_bare_name_weight_is_one(name in "[a-z]{0,12}") {
        let spec = AlternativeSpec::from(name.as_str());
        prop_assert!((spec.weight() - 1.0).abs() < f64::EPSILON);

        let alternative = Alternative::new(spec, "exp");
        prop_assert_eq!(alternative.validate().is_ok(), !name.is_empty());
    }

    /// Property: weighted specs validate iff the weight is positive and
    /// finite.
    #[test]
    fn prop_weight_validation(weight in prop::num::f64::ANY) {
        let alternative = Alternative::new(("variant", weight), "exp");
        let valid = weight.is_finite() && weight > 0.0;
        prop_assert_eq!(alternative.validate().is_ok(), valid);
    }

    /// Property: JSON round trip preserves the definition.
    #[test]
    fn prop_spec_json_round_trip(name in "[a-z]{1,12}", weight in 0.001f64..1000.0) {
        let json = format!("{{\"{name}\": {weight}}}");
        let spec: AlternativeSpec = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(spec.name(), name.as_str());
        prop_assert!((spec.weight() - weight).abs() < 1e-9);
    }
}
