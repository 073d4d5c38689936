//! # Planar measurements
//!
//! A [`Measurement`] is an observed 2-D hit on a plane: local `(u, v)` position plus a
//! 2×2 covariance, bound to its plane by handle identity. The covariance is validated at
//! construction — positive semi-definite with an eigenvalue floor for numerical
//! stability — so the weight matrix used during fitting is always invertible.

use nalgebra::{Matrix2, SymmetricEigen, Vector2};
use serde::{Deserialize, Serialize};

use crate::constants::COVARIANCE_EIGEN_FLOOR;
use crate::gblfit_errors::GblFitError;
use crate::geometry::PlaneId;
use crate::track_state::TrackState;

/// An observed 2-D hit on a plane, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    plane: PlaneId,
    position: Vector2<f64>,
    cov: Matrix2<f64>,
}

impl Measurement {
    /// Build a measurement from a raw position and covariance.
    ///
    /// The covariance is symmetrized, then eigen-checked: a smallest eigenvalue below
    /// `-tol` (with `tol` scaled to the matrix magnitude) fails with
    /// [`GblFitError::NonPositiveDefiniteCovariance`]; otherwise eigenvalues are floored
    /// at a small positive value and the matrix recomposed.
    ///
    /// Arguments
    /// -----------------
    /// * `plane`: handle of the plane this hit was taken on.
    /// * `position`: measured local `(u, v)` position (cm).
    /// * `cov`: measurement covariance (cm²).
    pub fn new(
        plane: PlaneId,
        position: Vector2<f64>,
        cov: Matrix2<f64>,
    ) -> Result<Self, GblFitError> {
        let sym = (cov + cov.transpose()) * 0.5;
        let scale = sym.trace().abs().max(1.0);
        let eigen = SymmetricEigen::new(sym);

        let min_eigen = eigen.eigenvalues.min();
        if min_eigen < -COVARIANCE_EIGEN_FLOOR * scale {
            return Err(GblFitError::NonPositiveDefiniteCovariance(min_eigen));
        }

        let floor = COVARIANCE_EIGEN_FLOOR * scale;
        let mut eigen = eigen;
        for value in eigen.eigenvalues.iter_mut() {
            if *value < floor {
                *value = floor;
            }
        }

        Ok(Measurement {
            plane,
            position,
            cov: eigen.recompose(),
        })
    }

    pub fn plane(&self) -> PlaneId {
        self.plane
    }

    pub fn position(&self) -> &Vector2<f64> {
        &self.position
    }

    pub fn cov(&self) -> &Matrix2<f64> {
        &self.cov
    }

    /// Residual of a track state against this hit: measured minus predicted `(u, v)`.
    ///
    /// Fails with [`GblFitError::MeasurementPlaneMismatch`] if the state lives on a
    /// different plane.
    pub fn residual(&self, state: &TrackState) -> Result<Vector2<f64>, GblFitError> {
        if state.plane() != self.plane {
            return Err(GblFitError::MeasurementPlaneMismatch {
                bound: self.plane,
                used: state.plane(),
            });
        }
        Ok(self.position - state.local_position())
    }

    /// Inverse covariance used to weight the residual.
    ///
    /// Always well-defined thanks to the eigenvalue floor applied at construction.
    pub fn weight(&self) -> Matrix2<f64> {
        self.cov
            .try_inverse()
            .unwrap_or_else(|| Matrix2::identity() / (COVARIANCE_EIGEN_FLOOR))
    }
}

#[cfg(test)]
mod measurement_test {
    use super::*;
    use crate::constants::Matrix5;
    use crate::geometry::Plane;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_rejects_indefinite_covariance() {
        let cov = Matrix2::new(1.0, 0.0, 0.0, -0.5);
        let result = Measurement::new(0, Vector2::new(0.0, 0.0), cov);
        assert!(matches!(
            result,
            Err(GblFitError::NonPositiveDefiniteCovariance(_))
        ));
    }

    #[test]
    fn test_floors_semi_definite_covariance() {
        // Rank-1: perfectly correlated u/v
        let cov = Matrix2::new(1.0, 1.0, 1.0, 1.0);
        let m = Measurement::new(0, Vector2::new(0.1, 0.2), cov).unwrap();

        // The floored covariance must be invertible
        let w = m.weight();
        assert!(w.iter().all(|x| x.is_finite()));

        // And still close to the input
        assert_relative_eq!(m.cov()[(0, 0)], 1.0, max_relative = 1e-9);
        assert_relative_eq!(m.cov()[(0, 1)], 1.0, max_relative = 1e-9);
    }

    #[test]
    fn test_residual_checks_plane_identity() {
        let plane = Plane::new(
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        let state = TrackState::from_global(
            3,
            &plane,
            &Vector3::new(0.5, -0.25, 10.0),
            &Vector3::new(0.0, 0.0, 0.1),
            -1.0,
            Matrix5::identity(),
        );

        let m = Measurement::new(3, Vector2::new(0.6, -0.2), Matrix2::identity()).unwrap();
        let r = m.residual(&state).unwrap();
        assert_relative_eq!(r.x, 0.1, max_relative = 1e-12);
        assert_relative_eq!(r.y, 0.05, max_relative = 1e-12);

        let other = Measurement::new(4, Vector2::new(0.6, -0.2), Matrix2::identity()).unwrap();
        assert_eq!(
            other.residual(&state).unwrap_err(),
            GblFitError::MeasurementPlaneMismatch { bound: 4, used: 3 }
        );
    }
}
