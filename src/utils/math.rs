//! Shared numeric helpers for metric computation.

/// Logistic function, stable for large negative inputs.
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Divide, returning `fallback` when the denominator is zero.
pub fn ratio_or(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator == 0.0 {
        fallback
    } else {
        numerator / denominator
    }
}

/// Area under a piecewise-linear curve by the trapezoidal rule.
///
/// `x` must be monotonic. Any NaN coordinate makes the result NaN.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_sigmoid_saturates_without_nan() {
        assert!((sigmoid(100.0) - 1.0).abs() < 1e-7);
        assert!(sigmoid(-100.0) >= 0.0);
        assert!(sigmoid(-100.0) < 1e-30);
        assert!(!sigmoid(-1000.0).is_nan());
    }

    #[test]
    fn test_sigmoid_symmetry() {
        for x in [0.1f32, 1.0, 3.5, 10.0] {
            assert!((sigmoid(x) + sigmoid(-x) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ratio_or_fallback() {
        assert_eq!(ratio_or(1.0, 0.0, 0.0), 0.0);
        assert_eq!(ratio_or(1.0, 0.0, 1.0), 1.0);
        assert_eq!(ratio_or(1.0, 4.0, 0.0), 0.25);
    }

    #[test]
    fn test_trapezoid_diagonal() {
        let x = [0.0, 0.5, 1.0];
        assert!((trapezoid(&x, &x) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoid_unit_square() {
        assert!((trapezoid(&[0.0, 0.0, 1.0], &[0.0, 1.0, 1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoid_nan_propagates() {
        assert!(trapezoid(&[0.0, 1.0], &[f64::NAN, f64::NAN]).is_nan());
    }

    #[test]
    fn test_trapezoid_single_point() {
        assert_eq!(trapezoid(&[0.3], &[0.7]), 0.0);
    }
}
