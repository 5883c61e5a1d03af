// Abramowitz & Stegun 7.1.26 coefficients
const A1: f64 = 0.254829592;
const A2: f64 = -0.284496736;
const A3: f64 = 1.421413741;
const A4: f64 = -1.453152027;
const A5: f64 = 1.061405429;
const P: f64 = 0.3275911;

/// Standard normal CDF via the Abramowitz & Stegun 7.1.26 rational
/// approximation to erf. Maximum absolute error of Phi is about 7.5e-8.
///
/// Total over finite inputs. The coefficients sum to 0.999999999, so
/// Phi(0) comes out as 0.5 + 5e-10; large |x| saturates to 0 or 1.
/// NaN in, NaN out.
#[inline]
pub fn norm_cdf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let z = x.abs() / std::f64::consts::SQRT_2;

    let t = 1.0 / (1.0 + P * z);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    let erf = 1.0 - poly * (-z * z).exp();

    0.5 * (1.0 + sign * erf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use statrs::distribution::{ContinuousCDF, Normal};

    #[test]
    fn test_zero_is_half() {
        assert_abs_diff_eq!(norm_cdf(0.0), 0.5, epsilon = 1e-9);
        assert_eq!(norm_cdf(-0.0), norm_cdf(0.0));
    }

    #[test]
    fn test_saturates_in_tails() {
        assert_abs_diff_eq!(norm_cdf(40.0), 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(norm_cdf(-40.0), 0.0, epsilon = 1e-15);
        assert_eq!(norm_cdf(f64::INFINITY), 1.0);
        assert_eq!(norm_cdf(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_known_quantiles() {
        assert_abs_diff_eq!(norm_cdf(1.0), 0.841_344_746, epsilon = 1e-7);
        assert_abs_diff_eq!(norm_cdf(-1.959_963_985), 0.025, epsilon = 1e-7);
    }

    #[test]
    fn test_within_documented_error_of_exact_cdf() {
        let exact = Normal::new(0.0, 1.0).unwrap();
        let mut worst: f64 = 0.0;
        for i in -8000..=8000 {
            let x = i as f64 / 1000.0;
            worst = worst.max((norm_cdf(x) - exact.cdf(x)).abs());
        }
        assert!(worst < 1e-7, "max abs error {worst}");
    }

    #[test]
    fn test_nan_propagates() {
        assert!(norm_cdf(f64::NAN).is_nan());
    }

    proptest! {
        #[test]
        fn prop_symmetry(x in -50.0f64..50.0) {
            prop_assert!((norm_cdf(x) + norm_cdf(-x) - 1.0).abs() < 1e-7);
        }

        #[test]
        fn prop_stays_in_unit_interval(x in -1e6f64..1e6) {
            let p = norm_cdf(x);
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }
}
