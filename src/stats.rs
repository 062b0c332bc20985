use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

use crate::codec::{self, VariableSchema};
use crate::error::{ensure_same_shape, DiagnosticsError, Result};

/// Which per-level moment [`mean_or_std`] computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Mean,
    Std,
}

impl StatKind {
    pub fn title(self) -> &'static str {
        match self {
            StatKind::Mean => "Mean",
            StatKind::Std => "Standard Deviation",
        }
    }
}

/// Options for [`mse`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MseOptions<'a> {
    /// Divide squared errors by the spread of each true example.
    pub relative: bool,
    /// Ignore levels above this one (`lev < min_level`). Needs `levels`.
    pub min_level: Option<f64>,
    pub levels: Option<&'a [f64]>,
}

/// Per-level mean or population standard deviation of one variable, for the
/// true and the predicted arrays.
pub fn mean_or_std(
    schema: &VariableSchema,
    kind: StatKind,
    variable: &str,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
) -> Result<(Array1<f64>, Array1<f64>)> {
    ensure_same_shape("mean_or_std", y_true.shape(), y_pred.shape())?;
    let t = codec::unpack(schema, y_true, variable)?;
    let p = codec::unpack(schema, y_pred, variable)?;
    let stat = |a: &Array2<f64>| -> Result<Array1<f64>> {
        match kind {
            StatKind::Mean => a
                .mean_axis(Axis(0))
                .ok_or_else(|| DiagnosticsError::EmptyInput("mean over zero examples".to_string())),
            StatKind::Std => {
                if a.nrows() == 0 {
                    return Err(DiagnosticsError::EmptyInput(
                        "standard deviation over zero examples".to_string(),
                    ));
                }
                Ok(a.std_axis(Axis(0), 0.0))
            }
        }
    };
    Ok((stat(&t)?, stat(&p)?))
}

/// Pearson r of every column pair. Constant columns give NaN.
pub fn pearson_correlation(y_true: ArrayView2<'_, f64>, y_pred: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    ensure_same_shape("pearson_correlation", y_true.shape(), y_pred.shape())?;
    Ok(Zip::from(y_true.columns())
        .and(y_pred.columns())
        .map_collect(|t, p| pearson_r(t, p)))
}

/// Pearson r of two equally long series, clipped to [-1, 1].
pub fn pearson_r(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let mx = x.sum() / n as f64;
    let my = y.sum() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0)
}

/// Root-mean-squared error of every column divided by that column's true mean.
///
/// A zero true mean gives an infinite (or NaN) value that is passed through.
pub fn rmse(y_true: ArrayView2<'_, f64>, y_pred: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    ensure_same_shape("rmse", y_true.shape(), y_pred.shape())?;
    if y_true.nrows() == 0 {
        return Err(DiagnosticsError::EmptyInput("rmse over zero examples".to_string()));
    }
    let n = y_true.nrows() as f64;
    Ok(Zip::from(y_true.columns())
        .and(y_pred.columns())
        .map_collect(|t, p| {
            let sq: f64 = t.iter().zip(p.iter()).map(|(a, b)| (a - b).powi(2)).sum();
            (sq / n).sqrt() / (t.sum() / n)
        }))
}

/// Explained-variance regression score of every column.
///
/// A constant true column scores 1.0 when predicted perfectly and 0.0
/// otherwise, so the score stays finite.
pub fn explained_variance(y_true: ArrayView2<'_, f64>, y_pred: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    ensure_same_shape("explained_variance", y_true.shape(), y_pred.shape())?;
    if y_true.nrows() == 0 {
        return Err(DiagnosticsError::EmptyInput(
            "explained variance over zero examples".to_string(),
        ));
    }
    Ok(Zip::from(y_true.columns())
        .and(y_pred.columns())
        .map_collect(|t, p| {
            let residual = &t - &p;
            let numerator = variance(residual.view());
            let denominator = variance(t);
            if denominator == 0.0 {
                if numerator == 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                1.0 - numerator / denominator
            }
        }))
}

fn variance(x: ArrayView1<'_, f64>) -> f64 {
    let n = x.len() as f64;
    let mean = x.sum() / n;
    x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Mean squared error over every finite entry of two packed arrays.
pub fn mse(
    schema: &VariableSchema,
    y_pred: ArrayView2<'_, f64>,
    y_true: ArrayView2<'_, f64>,
    options: MseOptions<'_>,
) -> Result<f64> {
    ensure_same_shape("mse", y_pred.shape(), y_true.shape())?;

    let (pred, truth) = match options.min_level {
        Some(min_level) => {
            let levels = options.levels.ok_or(DiagnosticsError::MissingArgument(
                "levels are required when min_level is set",
            ))?;
            let keep = codec::levels_at_or_above(levels, min_level);
            let (_, pred) = codec::select_levels(schema, y_pred, &keep)?;
            let (_, truth) = codec::select_levels(schema, y_true, &keep)?;
            (pred, truth)
        }
        None => (y_pred.to_owned(), y_true.to_owned()),
    };

    let mut sq = (&pred - &truth).mapv(|d| d * d);
    if options.relative {
        let spread = truth.std_axis(Axis(1), 0.0).mapv(f64::abs);
        for (mut row, s) in sq.rows_mut().into_iter().zip(spread.iter()) {
            row.mapv_inplace(|v| v / s);
        }
    }

    let (sum, count) = sq
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return Ok(f64::NAN);
    }
    Ok(sum / count as f64)
}

/// Linearly interpolated percentile (`pct` in 0..=100) of the finite values.
pub fn percentile<'a>(values: impl IntoIterator<Item = &'a f64>, pct: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// `n` evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Counts per bin for the given (ascending) edges.
///
/// Bins are closed on the left; the last one is closed on both sides.
/// Values outside the edges and non-finite values are ignored.
pub fn histogram<'a>(values: impl IntoIterator<Item = &'a f64>, edges: &[f64]) -> Vec<usize> {
    let bins = edges.len().saturating_sub(1);
    let mut counts = vec![0usize; bins];
    if bins == 0 {
        return counts;
    }
    let (first, last) = (edges[0], edges[bins]);
    for &v in values {
        if !v.is_finite() || v < first || v > last {
            continue;
        }
        let idx = if v == last {
            bins - 1
        } else {
            edges.partition_point(|&e| e <= v) - 1
        };
        counts[idx.min(bins - 1)] += 1;
    }
    counts
}

/// Smallest and largest finite value, if any.
pub fn finite_bounds<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{HUMIDITY, TEMPERATURE};
    use ndarray::array;

    fn sample() -> Array2<f64> {
        array![
            [1.0, 2.0, 0.5, 4.0],
            [2.0, 1.0, 0.7, 3.0],
            [4.0, 5.0, 0.2, 8.0],
            [3.0, 2.5, 0.9, 1.0],
        ]
    }

    #[test]
    fn correlation_with_itself_is_one() {
        let y = sample();
        let r = pearson_correlation(y.view(), y.view()).unwrap();
        for value in r.iter() {
            assert!((value - 1.0).abs() < 1e-12, "r = {value}");
        }
    }

    #[test]
    fn constant_columns_have_undefined_correlation() {
        let a = Array2::from_elem((5, 2), 3.0);
        let b = Array2::from_elem((5, 2), -1.0);
        let r = pearson_correlation(a.view(), b.view()).unwrap();
        assert!(r.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn anti_correlated_columns_give_minus_one() {
        let t = array![[1.0], [2.0], [3.0]];
        let p = array![[3.0], [2.0], [1.0]];
        let r = pearson_correlation(t.view(), p.view()).unwrap();
        assert!((r[0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn mse_of_identical_arrays_is_zero() {
        let schema = VariableSchema::temperature_humidity(2);
        let y = sample();
        assert_eq!(mse(&schema, y.view(), y.view(), MseOptions::default()).unwrap(), 0.0);
    }

    #[test]
    fn mse_needs_levels_when_truncating() {
        let schema = VariableSchema::temperature_humidity(2);
        let y = sample();
        let options = MseOptions {
            min_level: Some(0.5),
            ..MseOptions::default()
        };
        let err = mse(&schema, y.view(), y.view(), options).unwrap_err();
        assert!(matches!(err, DiagnosticsError::MissingArgument(_)));
    }

    #[test]
    fn mse_truncation_drops_upper_levels() {
        let schema = VariableSchema::temperature_humidity(2);
        let truth = Array2::<f64>::zeros((2, 4));
        // Errors only at level 0 (the upper one), which gets cut.
        let pred = array![[5.0, 0.0, 5.0, 0.0], [5.0, 0.0, 5.0, 0.0]];
        let levels = [0.2, 0.8];
        let options = MseOptions {
            min_level: Some(0.5),
            levels: Some(&levels),
            ..MseOptions::default()
        };
        assert_eq!(mse(&schema, pred.view(), truth.view(), options).unwrap(), 0.0);
        assert_eq!(
            mse(&schema, pred.view(), truth.view(), MseOptions::default()).unwrap(),
            12.5
        );
    }

    #[test]
    fn mse_skips_non_finite_entries() {
        let schema = VariableSchema::temperature_humidity(1);
        let truth = array![[0.0, 0.0], [0.0, 0.0]];
        let pred = array![[f64::NAN, 2.0], [f64::INFINITY, 2.0]];
        assert_eq!(mse(&schema, pred.view(), truth.view(), MseOptions::default()).unwrap(), 4.0);
    }

    #[test]
    fn relative_mse_divides_by_row_spread() {
        let schema = VariableSchema::temperature_humidity(1);
        let truth = array![[0.0, 4.0]]; // row std = 2
        let pred = array![[2.0, 4.0]];
        let options = MseOptions {
            relative: true,
            ..MseOptions::default()
        };
        assert_eq!(mse(&schema, pred.view(), truth.view(), options).unwrap(), 1.0);
    }

    #[test]
    fn rmse_with_zero_mean_is_not_finite() {
        let truth = Array2::<f64>::zeros((6, 3));
        let pred = Array2::from_elem((6, 3), 0.1);
        let r = rmse(truth.view(), pred.view()).unwrap();
        assert!(r.iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn rmse_is_normalised_by_true_mean() {
        let truth = array![[2.0], [2.0]];
        let pred = array![[2.5], [1.5]];
        let r = rmse(truth.view(), pred.view()).unwrap();
        assert!((r[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn explained_variance_is_one_for_perfect_prediction() {
        let y = sample();
        let ev = explained_variance(y.view(), y.view()).unwrap();
        assert!(ev.iter().all(|&v| v == 1.0));

        let constant = Array2::from_elem((3, 2), 7.0);
        let ev = explained_variance(constant.view(), constant.view()).unwrap();
        assert!(ev.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let a = Array2::<f64>::zeros((3, 4));
        let b = Array2::<f64>::zeros((4, 4));
        assert!(matches!(
            pearson_correlation(a.view(), b.view()),
            Err(DiagnosticsError::ShapeMismatch(_))
        ));
        assert!(rmse(a.view(), b.view()).is_err());
    }

    #[test]
    fn mean_and_std_per_level() {
        let schema = VariableSchema::temperature_humidity(2);
        let truth = array![[1.0, 2.0, 10.0, 20.0], [3.0, 2.0, 30.0, 20.0]];
        let pred = truth.mapv(|v| v * 2.0);

        let (mt, mp) = mean_or_std(&schema, StatKind::Mean, TEMPERATURE, truth.view(), pred.view()).unwrap();
        assert_eq!(mt, array![2.0, 2.0]);
        assert_eq!(mp, array![4.0, 4.0]);

        let (st, _) = mean_or_std(&schema, StatKind::Std, HUMIDITY, truth.view(), pred.view()).unwrap();
        assert_eq!(st, array![10.0, 0.0]);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 50.0), Some(3.0));
        assert_eq!(percentile(&v, 100.0), Some(5.0));
        assert_eq!(percentile(&v, 12.5), Some(1.5));
        assert_eq!(percentile(&[f64::NAN], 50.0), None);
    }

    #[test]
    fn histogram_closes_the_last_bin() {
        let edges = [0.0, 1.0, 2.0];
        let counts = histogram(&[0.0, 0.5, 1.0, 2.0, 2.5, -1.0], &edges);
        assert_eq!(counts, vec![2, 2]);
    }

    #[test]
    fn linspace_hits_both_ends() {
        let v = linspace(-1.0, 1.0, 5);
        assert_eq!(v, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    }
}
