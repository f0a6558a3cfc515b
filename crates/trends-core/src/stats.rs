//! Small descriptive-statistics helpers shared by the analytics engine.

// ── Percentile helper ─────────────────────────────────────────────────────────

/// Compute the `p`-th percentile of a **sorted** slice using standard linear
/// interpolation (the same algorithm used by NumPy's `percentile` function).
///
/// Returns `0.0` for an empty slice.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let len = sorted_data.len();
    if len == 1 {
        return sorted_data[0];
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted_data[lo];
    }
    let frac = rank - lo as f64;
    sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo])
}

// ── Moments ───────────────────────────────────────────────────────────────────

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n − 1 denominator).
///
/// `None` when fewer than two values are given, since the statistic is
/// undefined there.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

// ── LinearFit ─────────────────────────────────────────────────────────────────

/// Ordinary least-squares fit of `y = intercept + slope * x`.
///
/// Stored around the sample means so that predictions at large `x` (ordinal
/// day numbers are ~7e5) do not lose precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    x_mean: f64,
    y_mean: f64,
}

impl LinearFit {
    /// Fit `ys` against `xs`.
    ///
    /// Returns `None` when the inputs differ in length, are empty, or all
    /// `xs` are equal.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Option<Self> {
        if xs.len() != ys.len() {
            return None;
        }
        let x_mean = mean(xs)?;
        let y_mean = mean(ys)?;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (x, y) in xs.iter().zip(ys) {
            let dx = x - x_mean;
            sxx += dx * dx;
            sxy += dx * (y - y_mean);
        }
        if sxx == 0.0 {
            return None;
        }

        Some(Self {
            slope: sxy / sxx,
            x_mean,
            y_mean,
        })
    }

    /// Value of the fitted line at `x = 0`.
    pub fn intercept(&self) -> f64 {
        self.y_mean - self.slope * self.x_mean
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.y_mean + self.slope * (x - self.x_mean)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── percentile ───────────────────────────────────────────────────────────

    #[test]
    fn test_percentile_empty_returns_zero() {
        assert_eq!(percentile(&[], 90.0), 0.0);
    }

    #[test]
    fn test_percentile_single_element() {
        assert_eq!(percentile(&[42.0], 95.0), 42.0);
    }

    #[test]
    fn test_percentile_p95_twenty_elements() {
        // rank = 0.95 * 19 = 18.05 → 19 + 0.05 * (20 - 19) = 19.05
        let data: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!((percentile(&data, 95.0) - 19.05).abs() < 1e-9);
    }

    // ── mean / sample_std ────────────────────────────────────────────────────

    #[test]
    fn test_mean_and_std() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&data), Some(5.0));
        // Sum of squares = 32, n - 1 = 7.
        let std = sample_std(&data).unwrap();
        assert!((std - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_std_undefined_below_two_values() {
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std(&[3.0]), None);
    }

    #[test]
    fn test_std_of_flat_series_is_zero() {
        assert_eq!(sample_std(&[7.0, 7.0, 7.0]), Some(0.0));
    }

    // ── LinearFit ────────────────────────────────────────────────────────────

    #[test]
    fn test_fit_recovers_exact_line() {
        let xs: Vec<f64> = (0..10).map(|x| 738_000.0 + x as f64).collect();
        let ys: Vec<f64> = (0..10).map(|x| 100.0 + 2.0 * x as f64).collect();
        let fit = LinearFit::fit(&xs, &ys).unwrap();

        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.predict(738_010.0) - 120.0).abs() < 1e-6);
        assert!((fit.intercept() - (100.0 - 2.0 * 738_000.0)).abs() < 1e-3);
    }

    #[test]
    fn test_fit_rejects_degenerate_input() {
        assert!(LinearFit::fit(&[], &[]).is_none());
        assert!(LinearFit::fit(&[1.0, 1.0], &[2.0, 3.0]).is_none());
        assert!(LinearFit::fit(&[1.0, 2.0], &[2.0]).is_none());
    }
}
