//! # Material effects
//!
//! The highly simplified Gaussian material model of the propagator: Highland multiple
//! scattering, Bethe mean energy loss, and a capped Gaussian approximation of energy-loss
//! straggling. All formulas work in the crate units (cm, GeV, g/cm³).

use crate::constants::{
    BETHE_K, Centimeter, ELECTRON_MASS, Gev, HIGHLAND_CONSTANT, HIGHLAND_LOG_COEFF,
};
use crate::material::Material;

/// Velocity β for a momentum/mass pair.
pub(crate) fn beta(p: Gev, mass: Gev) -> f64 {
    p / (p * p + mass * mass).sqrt()
}

/// Highland multiple-scattering variance (rad²) over a step of traversed material.
///
/// `variance = (13.6 MeV / (p·β))² · x/X₀ · [1 + 0.038 ln(x/X₀)]`, clamped at zero where
/// the logarithmic correction would turn negative for very thin material.
pub(crate) fn highland_variance(
    p: Gev,
    beta: f64,
    step: Centimeter,
    radiation_length: Centimeter,
) -> f64 {
    if !radiation_length.is_finite() || radiation_length <= 0.0 {
        return 0.0;
    }
    let x_over_x0 = step / radiation_length;
    if x_over_x0 < 1e-12 {
        return 0.0;
    }
    let theta0 = HIGHLAND_CONSTANT / (p * beta);
    let log_correction = (1.0 + HIGHLAND_LOG_COEFF * x_over_x0.ln()).max(0.0);
    theta0 * theta0 * x_over_x0 * log_correction
}

/// Maximum energy transfer entering the Bethe bracket (GeV).
///
/// The recoil denominator is dropped, which overshoots for light projectiles; the
/// straggling cap below keeps that harmless.
fn t_max(p: Gev, mass: Gev) -> Gev {
    let beta_gamma_sq = (p / mass) * (p / mass);
    2.0 * ELECTRON_MASS * beta_gamma_sq
}

/// Mean energy loss (GeV, positive) over a step, from the Bethe formula.
pub(crate) fn mean_energy_loss(p: Gev, mass: Gev, material: &Material, step: Centimeter) -> Gev {
    if material.is_vacuum() || step <= 0.0 {
        return 0.0;
    }
    let b = beta(p, mass);
    let beta_sq = b * b;
    let beta_gamma_sq = (p / mass) * (p / mass);
    let tm = t_max(p, mass);
    let i = material.mean_excitation_energy;

    let bracket = 0.5 * (2.0 * ELECTRON_MASS * beta_gamma_sq * tm / (i * i)).ln() - beta_sq;
    let dedx = BETHE_K * material.z_over_a * material.density / beta_sq * bracket;
    (dedx * step).max(0.0)
}

/// Gaussian energy-loss straggling variance (GeV²) over a step.
///
/// Bohr-style `ξ·Tmax·(1 − β²/2)`, capped at the squared mean loss so the light-particle
/// overshoot of `Tmax` cannot dominate the process noise.
pub(crate) fn straggling_variance(p: Gev, mass: Gev, material: &Material, step: Centimeter) -> f64 {
    if material.is_vacuum() || step <= 0.0 {
        return 0.0;
    }
    let b = beta(p, mass);
    let beta_sq = b * b;
    let xi = 0.5 * BETHE_K * material.z_over_a * material.density * step / beta_sq;
    let raw = xi * t_max(p, mass) * (1.0 - 0.5 * beta_sq);

    let mean = mean_energy_loss(p, mass, material, step);
    raw.min(mean * mean)
}

#[cfg(test)]
mod material_effects_test {
    use super::*;

    #[test]
    fn test_vacuum_is_inert() {
        let vac = Material::vacuum();
        assert_eq!(highland_variance(0.1, 1.0, 1.0, vac.radiation_length), 0.0);
        assert_eq!(mean_energy_loss(0.1, ELECTRON_MASS, &vac, 1.0), 0.0);
        assert_eq!(straggling_variance(0.1, ELECTRON_MASS, &vac, 1.0), 0.0);
    }

    #[test]
    fn test_highland_scale_for_thin_silicon() {
        let si = Material::silicon();
        let p = 0.1;
        let b = beta(p, ELECTRON_MASS);
        let var = highland_variance(p, b, 0.1, si.radiation_length);

        // θ0 ≈ 14 mrad for 100 MeV through 0.1 cm of silicon
        assert!(var > 1.0e-5, "variance too small: {var:e}");
        assert!(var < 1.0e-3, "variance too large: {var:e}");

        // Thicker material scatters more
        let var_thick = highland_variance(p, b, 1.0, si.radiation_length);
        assert!(var_thick > var);
    }

    #[test]
    fn test_bethe_scale_for_thin_silicon() {
        let si = Material::silicon();
        let loss = mean_energy_loss(0.1, ELECTRON_MASS, &si, 0.1);

        // A fraction of an MeV across a 1 mm silicon sensor
        assert!(loss > 1.0e-4, "loss too small: {loss:e}");
        assert!(loss < 2.0e-3, "loss too large: {loss:e}");
    }

    #[test]
    fn test_straggling_capped_by_mean_loss() {
        let si = Material::silicon();
        let mean = mean_energy_loss(0.1, ELECTRON_MASS, &si, 0.1);
        let var = straggling_variance(0.1, ELECTRON_MASS, &si, 0.1);
        assert!(var > 0.0);
        assert!(var <= mean * mean + 1e-18);
    }
}
