use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::codec::{self, VariableSchema, HUMIDITY, TEMPERATURE};
use crate::error::{DiagnosticsError, Result};
use crate::stats::pearson_r;

/// Latitude × level fields for one variable, each shaped [levels, latitudes].
#[derive(Debug, Clone)]
pub struct LatLevFields {
    pub true_mean: Array2<f64>,
    pub bias: Array2<f64>,
    pub rmse: Array2<f64>,
    pub correlation: Array2<f64>,
}

/// [`LatLevFields`] for temperature and humidity tendencies.
#[derive(Debug, Clone)]
pub struct LatLevStats {
    pub temperature: LatLevFields,
    pub humidity: LatLevFields,
}

/// Index of the grid latitude closest to `lat`.
fn nearest(lat_axis: &[f64], lat: f64) -> Option<usize> {
    lat_axis
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|(_, a), (_, b)| (*a - lat).abs().total_cmp(&(*b - lat).abs()))
        .map(|(idx, _)| idx)
}

/// Group examples by their nearest grid latitude and compute, per level and
/// latitude, the true mean, the mean bias, the RMSE and the correlation.
///
/// Latitudes without examples are left NaN.
pub fn stats_by_latlev(
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    example_lat: ArrayView1<'_, f64>,
    lat_axis: &[f64],
) -> Result<LatLevStats> {
    if y_true.shape() != y_pred.shape() || example_lat.len() != y_true.nrows() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "stats_by_latlev: true {:?}, pred {:?}, {} latitudes",
            y_true.shape(),
            y_pred.shape(),
            example_lat.len()
        )));
    }
    if lat_axis.is_empty() {
        return Err(DiagnosticsError::EmptyInput("latitude axis is empty".to_string()));
    }

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); lat_axis.len()];
    for (row, &lat) in example_lat.iter().enumerate() {
        if let Some(idx) = nearest(lat_axis, lat) {
            groups[idx].push(row);
        }
    }
    log::debug!(
        "examples per latitude: {:?}",
        groups.iter().map(Vec::len).collect::<Vec<_>>()
    );

    let fields = |name: &str| -> Result<LatLevFields> {
        let t = codec::unpack(schema, y_true, name)?;
        let p = codec::unpack(schema, y_pred, name)?;
        let levels = t.ncols();
        let mut out = LatLevFields {
            true_mean: Array2::from_elem((levels, lat_axis.len()), f64::NAN),
            bias: Array2::from_elem((levels, lat_axis.len()), f64::NAN),
            rmse: Array2::from_elem((levels, lat_axis.len()), f64::NAN),
            correlation: Array2::from_elem((levels, lat_axis.len()), f64::NAN),
        };
        for (j, rows) in groups.iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            let tg = t.select(Axis(0), rows);
            let pg = p.select(Axis(0), rows);
            let n = rows.len() as f64;
            for k in 0..levels {
                let tc = tg.column(k);
                let pc = pg.column(k);
                let mean_t = tc.sum() / n;
                let mean_p = pc.sum() / n;
                let sq: f64 = tc.iter().zip(pc.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                out.true_mean[[k, j]] = mean_t;
                out.bias[[k, j]] = mean_p - mean_t;
                out.rmse[[k, j]] = (sq / n).sqrt();
                out.correlation[[k, j]] = pearson_r(tc, pc);
            }
        }
        Ok(out)
    };

    Ok(LatLevStats {
        temperature: fields(TEMPERATURE)?,
        humidity: fields(HUMIDITY)?,
    })
}

/// Fold a [levels, latitudes] field onto its northern half by averaging each
/// latitude with its mirror image across the equator.
pub fn average_hemispheres(field: ArrayView2<'_, f64>, lat: &[f64]) -> Result<(Array2<f64>, Vec<f64>)> {
    if field.ncols() != lat.len() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "field has {} latitudes, axis has {}",
            field.ncols(),
            lat.len()
        )));
    }
    let mut north: Vec<usize> = (0..lat.len()).filter(|&j| lat[j] >= 0.0).collect();
    north.sort_by(|&a, &b| lat[a].total_cmp(&lat[b]));
    if north.is_empty() {
        return Err(DiagnosticsError::EmptyInput(
            "no latitudes at or north of the equator".to_string(),
        ));
    }

    let mut folded = Array2::zeros((field.nrows(), north.len()));
    for (col, &j) in north.iter().enumerate() {
        let mirror = nearest(lat, -lat[j]).unwrap_or(j);
        for k in 0..field.nrows() {
            folded[[k, col]] = 0.5 * (field[[k, j]] + field[[k, mirror]]);
        }
    }
    Ok((folded, north.iter().map(|&j| lat[j]).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn examples_are_binned_to_nearest_latitude() {
        let schema = VariableSchema::temperature_humidity(1);
        let truth = array![[1.0, 0.1], [3.0, 0.3], [10.0, 1.0], [12.0, 1.2]];
        let pred = truth.mapv(|v| v + 0.5);
        let example_lat = Array1::from_vec(vec![-29.0, -31.0, 1.0, -2.0]);

        let stats = stats_by_latlev(&schema, truth.view(), pred.view(), example_lat.view(), &[-30.0, 0.0, 30.0]).unwrap();
        let t = &stats.temperature;

        assert_eq!(t.true_mean[[0, 0]], 2.0);
        assert_eq!(t.true_mean[[0, 1]], 11.0);
        assert!((t.bias[[0, 1]] - 0.5).abs() < 1e-12);
        assert!((t.rmse[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((t.correlation[[0, 0]] - 1.0).abs() < 1e-12);
        // Nothing near 30N.
        assert!(t.true_mean[[0, 2]].is_nan());
    }

    #[test]
    fn hemispheres_fold_onto_the_north() {
        let field = array![[1.0, 5.0, 3.0], [2.0, 6.0, 4.0]];
        let (folded, lat) = average_hemispheres(field.view(), &[-45.0, 0.0, 45.0]).unwrap();
        assert_eq!(lat, vec![0.0, 45.0]);
        assert_eq!(folded, array![[5.0, 2.0], [6.0, 3.0]]);
    }
}
