//! Column physics used by the precipitation, enthalpy and profile figures.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::error::{DiagnosticsError, Result};

/// Specific heat of dry air at constant pressure [J/kg/K].
pub const CP: f64 = 1005.7;
/// Latent heat of vaporization [J/kg].
pub const LATENT_HEAT: f64 = 2.5e6;
/// Gravitational acceleration [m/s^2].
pub const GRAVITY: f64 = 9.81;
/// Reference surface pressure [Pa].
pub const SURFACE_PRESSURE: f64 = 1.0e5;
/// Dry-air gas constant over cp.
pub const KAPPA: f64 = 0.286;

fn check_levels(what: &str, got: usize, dlev: &[f64]) -> Result<()> {
    if got != dlev.len() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "{what}: {got} levels but {} level spacings",
            dlev.len()
        )));
    }
    Ok(())
}

/// Precipitation rate [mm/day] implied by humidity tendencies [g/kg/day].
///
/// Moisture removed from the column falls out as rain, so a drying column
/// gives positive precipitation.
pub fn calc_precip(dq: ArrayView2<'_, f64>, dlev: &[f64]) -> Result<Array1<f64>> {
    check_levels("calc_precip", dq.ncols(), dlev)?;
    let column_mass = SURFACE_PRESSURE / GRAVITY;
    Ok(dq.map_axis(Axis(1), |row| {
        -column_mass * row.iter().zip(dlev).map(|(q, d)| q / 1000.0 * d).sum::<f64>()
    }))
}

/// Uniform column heating [K/day] that would restore the column's moist
/// enthalpy given temperature [K/day] and humidity [g/kg/day] tendencies.
pub fn calc_enthalpy(dt: ArrayView2<'_, f64>, dq: ArrayView2<'_, f64>, dlev: &[f64]) -> Result<Array1<f64>> {
    check_levels("calc_enthalpy", dt.ncols(), dlev)?;
    check_levels("calc_enthalpy", dq.ncols(), dlev)?;
    if dt.nrows() != dq.nrows() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "calc_enthalpy: {} temperature rows vs {} humidity rows",
            dt.nrows(),
            dq.nrows()
        )));
    }
    let thickness: f64 = dlev.iter().sum();
    Ok(dt
        .outer_iter()
        .zip(dq.outer_iter())
        .map(|(t, q)| {
            let column: f64 = t
                .iter()
                .zip(q.iter())
                .zip(dlev)
                .map(|((t, q), d)| (t + LATENT_HEAT / CP * q / 1000.0) * d)
                .sum();
            -column / thickness
        })
        .collect())
}

/// Potential temperature [K] on sigma levels.
pub fn calc_theta(t: ArrayView1<'_, f64>, sigma: &[f64]) -> Result<Array1<f64>> {
    check_levels("calc_theta", t.len(), sigma)?;
    Ok(t.iter()
        .zip(sigma)
        .map(|(t, s)| t * (1.0 / s).powf(KAPPA))
        .collect())
}

/// Equivalent potential temperature [K] from temperature [K], potential
/// temperature [K] and humidity [g/kg].
pub fn calc_theta_e(
    t: ArrayView1<'_, f64>,
    theta: ArrayView1<'_, f64>,
    q: ArrayView1<'_, f64>,
) -> Result<Array1<f64>> {
    if t.len() != theta.len() || t.len() != q.len() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "calc_theta_e: {} / {} / {} levels",
            t.len(),
            theta.len(),
            q.len()
        )));
    }
    Ok(t.iter()
        .zip(theta.iter())
        .zip(q.iter())
        .map(|((t, th), q)| th * (LATENT_HEAT * q / 1000.0 / (CP * t)).exp())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn drying_column_rains() {
        let dq = array![[-1.0, -1.0], [1.0, 1.0]];
        let p = calc_precip(dq.view(), &[0.5, 0.5]).unwrap();
        let expected = SURFACE_PRESSURE / GRAVITY / 1000.0;
        assert!((p[0] - expected).abs() < 1e-9);
        assert!((p[1] + expected).abs() < 1e-9);
    }

    #[test]
    fn condensation_heating_balances_drying() {
        // Latent heating that exactly matches the moisture sink.
        let dq = array![[-1.0, -1.0]];
        let dt = dq.mapv(|q| -LATENT_HEAT / CP * q / 1000.0);
        let k = calc_enthalpy(dt.view(), dq.view(), &[0.4, 0.6]).unwrap();
        assert!(k[0].abs() < 1e-12);
    }

    #[test]
    fn theta_equals_t_at_surface() {
        let t = array![300.0, 250.0];
        let theta = calc_theta(t.view(), &[1.0, 0.5]).unwrap();
        assert_eq!(theta[0], 300.0);
        assert!(theta[1] > 250.0);

        let theta_e = calc_theta_e(t.view(), theta.view(), array![0.0, 5.0].view()).unwrap();
        assert_eq!(theta_e[0], theta[0]);
        assert!(theta_e[1] > theta[1]);
    }

    #[test]
    fn spacing_must_match_levels() {
        let dq = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            calc_precip(dq.view(), &[0.5, 0.5]),
            Err(DiagnosticsError::ShapeMismatch(_))
        ));
    }
}
