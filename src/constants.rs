//! # Constants and type definitions for gblfit
//!
//! This module centralizes the **physical constants**, **unit conventions**, and **common type
//! definitions** used throughout the `gblfit` library.
//!
//! ## Unit conventions
//!
//! - Lengths in centimeters
//! - Momenta and energies in GeV
//! - Magnetic field in kilogauss
//!
//! Every public quantity in the crate follows these conventions.

use crate::trajectory::TrajectoryPoint;
use nalgebra::{SMatrix, SVector};
use smallvec::SmallVec;

// -------------------------------------------------------------------------------------------------
// Physical constants
// -------------------------------------------------------------------------------------------------

/// Curvature constant: GeV c⁻¹ per kilogauss·centimeter.
///
/// For a particle of momentum `p` (GeV) and charge `q` (elementary charges) in a field `B`
/// (kilogauss), the direction evolves as `dt/ds = KAPPA_FIELD * (q/p) * (t × B)`.
pub const KAPPA_FIELD: f64 = 2.99792458e-4;

/// Highland multiple-scattering constant (GeV).
pub const HIGHLAND_CONSTANT: f64 = 13.6e-3;

/// Logarithmic correction coefficient of the Highland formula.
pub const HIGHLAND_LOG_COEFF: f64 = 0.038;

/// Electron rest mass (GeV).
pub const ELECTRON_MASS: f64 = 0.510_998_95e-3;

/// Muon rest mass (GeV).
pub const MUON_MASS: f64 = 0.105_658_375;

/// Bethe stopping-power constant K (GeV·cm²/g, to be multiplied by Z/A and density).
pub const BETHE_K: f64 = 0.307_075e-3;

/// Radiation length of silicon (cm).
pub const SILICON_RADIATION_LENGTH: f64 = 9.37;

/// Density of silicon (g/cm³).
pub const SILICON_DENSITY: f64 = 2.329;

/// Mean excitation energy of silicon (GeV).
pub const SILICON_EXCITATION_ENERGY: f64 = 173.0e-9;

/// Z/A ratio of silicon.
pub const SILICON_Z_OVER_A: f64 = 0.498_5;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-9;

/// Tolerance (cm) below which a propagated state is considered to sit on the target plane.
pub const PLANE_TOLERANCE: f64 = 1e-7;

/// Relative floor below which an eigenvalue of a measurement covariance is clamped.
pub const COVARIANCE_EIGEN_FLOOR: f64 = 1e-12;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in centimeters
pub type Centimeter = f64;

/// Momentum or energy in GeV
pub type Gev = f64;

/// Magnetic field strength in kilogauss
pub type KiloGauss = f64;

/// Local 5-parameter track vector: `(q/p, u', v', u, v)`.
pub type Vector5 = SVector<f64, 5>;

/// 5×5 matrix (local covariances and Jacobians).
pub type Matrix5 = SMatrix<f64, 5, 5>;

/// 7×7 matrix over the global state `(x, y, z, tx, ty, tz, q/p)`.
pub type Matrix7 = SMatrix<f64, 7, 7>;

/// Projection from the global 7-state onto local plane coordinates.
pub type Matrix5x7 = SMatrix<f64, 5, 7>;

/// Embedding of local plane coordinates into the global 7-state.
pub type Matrix7x5 = SMatrix<f64, 7, 5>;

/// Per-trajectory point storage.
///
/// Most tracks cross a handful of planes, so the points live inline up to 8 entries.
pub type TrajectoryPoints = SmallVec<[TrajectoryPoint; 8]>;
