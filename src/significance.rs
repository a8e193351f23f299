//! Two-proportion z-test for experiment reporting.
//!
//! The degenerate conditions (zero samples, zero pooled variance, control
//! compared to itself) are checked up front and reported as an explicit
//! [`Significance::NotApplicable`] value. Callers never see an arithmetic
//! failure.

use std::fmt;

/// Outcome of a significance calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Significance {
    /// z-score of the alternative's conversion rate against the control's.
    Score(f64),
    /// The comparison is undefined: self-comparison, zero sample size, or
    /// zero pooled variance.
    NotApplicable,
}

impl Significance {
    /// The numeric score, if the comparison was defined.
    #[must_use]
    pub const fn score(self) -> Option<f64> {
        match self {
            Self::Score(z) => Some(z),
            Self::NotApplicable => None,
        }
    }
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Score(z) => write!(f, "{z:.3}"),
            Self::NotApplicable => write!(f, "N/A"),
        }
    }
}

/// Compute the two-sample proportion z-score.
///
/// * `p_a` - conversion rate of the alternative
/// * `n_a` - sample size (participants) of the alternative
/// * `p_c` - conversion rate of the control
/// * `n_c` - sample size of the control
///
/// Returns [`Significance::NotApplicable`] whenever the pooled standard
/// error is zero or either sample is empty.
#[must_use]
pub fn z_score(p_a: f64, n_a: u64, p_c: f64, n_c: u64) -> Significance {
    if n_a == 0 || n_c == 0 {
        return Significance::NotApplicable;
    }

    #[allow(clippy::cast_precision_loss)]
    let (n_a, n_c) = (n_a as f64, n_c as f64);
    let variance = p_a * (1.0 - p_a) / n_a + p_c * (1.0 - p_c) / n_c;

    if variance <= 0.0 || !variance.is_finite() {
        return Significance::NotApplicable;
    }

    Significance::Score((p_a - p_c) / variance.sqrt())
}
