use super::normal::norm_cdf;

/// Black-Scholes price of a European call.
///
/// d1 = (ln(S/K) + (r + sigma^2/2)*T) / (sigma * sqrt(T))
/// d2 = d1 - sigma * sqrt(T)
/// C  = S*Phi(d1) - K*e^(-rT)*Phi(d2)
///
/// `r` and `sigma` are decimal fractions. Inputs are not validated here and
/// the result is not clamped: sigma = 0 or T = 0 can yield NaN, so callers
/// must go through `PricingInputs::validate` first.
#[inline]
pub fn call_price(s: f64, k: f64, r: f64, t: f64, sigma: f64) -> f64 {
    let sigma_sqrt_t = sigma * t.sqrt();
    let d1 = ((s / k).ln() + (r + sigma * sigma / 2.0) * t) / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;

    s * norm_cdf(d1) - k * (-r * t).exp() * norm_cdf(d2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use statrs::distribution::{ContinuousCDF, Normal};

    fn exact_call(s: f64, k: f64, r: f64, t: f64, sigma: f64) -> f64 {
        let n = Normal::new(0.0, 1.0).unwrap();
        let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt());
        let d2 = d1 - sigma * t.sqrt();
        s * n.cdf(d1) - k * (-r * t).exp() * n.cdf(d2)
    }

    #[test]
    fn test_textbook_atm_call() {
        let c = call_price(100.0, 100.0, 0.05, 1.0, 0.20);
        assert_abs_diff_eq!(c, 10.4506, epsilon = 0.01);
    }

    #[test]
    fn test_negative_rate_is_priced() {
        let c = call_price(100.0, 100.0, -0.01, 1.0, 0.20);
        assert!(c.is_finite() && c > 0.0, "price={c}");
        assert!(c < call_price(100.0, 100.0, 0.05, 1.0, 0.20));
    }

    #[test]
    fn test_deep_itm_approaches_forward_intrinsic() {
        let c = call_price(200.0, 100.0, 0.05, 1.0, 0.10);
        let intrinsic = 200.0 - 100.0 * (-0.05f64).exp();
        assert_abs_diff_eq!(c, intrinsic, epsilon = 1e-4);
    }

    #[test]
    fn test_deep_otm_is_near_zero() {
        let c = call_price(50.0, 100.0, 0.05, 0.25, 0.10);
        assert!(c.abs() < 1e-6, "price={c}");
    }

    #[test]
    fn test_zero_volatility_at_the_money_is_not_finite() {
        assert!(call_price(100.0, 100.0, 0.0, 1.0, 0.0).is_nan());
    }

    #[test]
    fn test_matches_exact_cdf_pricing() {
        for &(s, k, r, t, sigma) in &[
            (100.0, 100.0, 0.05, 1.0, 0.2),
            (120.0, 100.0, 0.01, 0.5, 0.35),
            (80.0, 100.0, 0.03, 2.0, 0.25),
            (42.0, 40.0, 0.10, 0.5, 0.20),
        ] {
            let diff = (call_price(s, k, r, t, sigma) - exact_call(s, k, r, t, sigma)).abs();
            assert!(diff <= 1e-7 * (s + k), "({s},{k},{r},{t},{sigma}) diff={diff}");
        }
    }

    proptest! {
        #[test]
        fn prop_increasing_in_spot(
            s in 1.0f64..500.0,
            bump in 0.001f64..0.5,
            k in 1.0f64..500.0,
            r in -0.05f64..0.15,
            t in 0.01f64..5.0,
            sigma in 0.01f64..1.5,
        ) {
            let s_hi = s * (1.0 + bump);
            let lo = call_price(s, k, r, t, sigma);
            let hi = call_price(s_hi, k, r, t, sigma);
            // exact price is strictly increasing; allow for the CDF approximation error
            let tol = 2e-7 * (s + s_hi + 2.0 * k);
            prop_assert!(hi >= lo - tol, "C({s_hi})={hi} < C({s})={lo}");
        }

        #[test]
        fn prop_finite_and_non_negative(
            s in 1.0f64..500.0,
            k in 1.0f64..500.0,
            r in -0.05f64..0.15,
            t in 0.01f64..5.0,
            sigma in 0.01f64..1.5,
        ) {
            let c = call_price(s, k, r, t, sigma);
            prop_assert!(c.is_finite());
            prop_assert!(c >= -2e-7 * (s + k));
        }
    }
}
