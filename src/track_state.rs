//! # Local track states
//!
//! A [`TrackState`] is the 5-parameter description of a charged particle on a plane:
//! `(q/p, u', v', u, v)` — curvature signed by charge, two direction slopes, two in-plane
//! offsets — together with its 5×5 covariance. The `side` sign records which face of the
//! plane the track crosses (the sign of `t·n`), so flipped plane orientations round-trip
//! correctly between local and global pictures.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::{Gev, Matrix5, Vector5};
use crate::geometry::{Plane, PlaneId};

/// Default floor on `|t·n|` when converting a global direction to local slopes.
///
/// Directions closer to grazing incidence than this are treated as directionally
/// singular and clamped.
pub const DEFAULT_SLOPE_FLOOR: f64 = 1e-6;

/// The 5-parameter local state of a track on one plane, with covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    plane: PlaneId,
    params: Vector5,
    cov: Matrix5,
    side: f64,
    degraded: bool,
}

impl TrackState {
    /// Build a state from raw local parameters.
    ///
    /// `side` is normalized to ±1 (the sign of the track direction along the plane
    /// normal).
    pub fn new(plane: PlaneId, params: Vector5, cov: Matrix5, side: f64) -> Self {
        TrackState {
            plane,
            params,
            cov,
            side: if side < 0.0 { -1.0 } else { 1.0 },
            degraded: false,
        }
    }

    /// Build a state from a global position and momentum, projected onto `plane`.
    ///
    /// The position is projected into the plane (any out-of-plane component is dropped);
    /// the direction is converted to slopes with `|t·n|` clamped at
    /// [`DEFAULT_SLOPE_FLOOR`].
    ///
    /// Arguments
    /// -----------------
    /// * `plane_id`: handle of `plane` in the registry the caller fits against.
    /// * `plane`: the resolved plane geometry.
    /// * `position`: global position (cm).
    /// * `momentum`: global momentum (GeV); must be non-zero.
    /// * `charge`: particle charge in elementary charges (sign matters).
    /// * `cov`: initial 5×5 covariance of the local parameters.
    pub fn from_global(
        plane_id: PlaneId,
        plane: &Plane,
        position: &Vector3<f64>,
        momentum: &Vector3<f64>,
        charge: f64,
        cov: Matrix5,
    ) -> Self {
        let p = momentum.norm();
        let t = momentum / p;
        let tw_raw = t.dot(plane.normal());
        let side = if tw_raw < 0.0 { -1.0 } else { 1.0 };
        let tw = if tw_raw.abs() < DEFAULT_SLOPE_FLOOR {
            side * DEFAULT_SLOPE_FLOOR
        } else {
            tw_raw
        };

        let local = plane.to_local(position);
        let params = Vector5::new(
            charge / p,
            t.dot(plane.u_axis()) / tw,
            t.dot(plane.v_axis()) / tw,
            local.x,
            local.y,
        );

        TrackState {
            plane: plane_id,
            params,
            cov,
            side,
            degraded: false,
        }
    }

    pub fn plane(&self) -> PlaneId {
        self.plane
    }

    pub fn params(&self) -> &Vector5 {
        &self.params
    }

    pub fn cov(&self) -> &Matrix5 {
        &self.cov
    }

    /// Curvature parameter q/p (GeV⁻¹, signed by charge).
    pub fn qop(&self) -> f64 {
        self.params[0]
    }

    /// Direction slopes `(u', v')`.
    pub fn slopes(&self) -> (f64, f64) {
        (self.params[1], self.params[2])
    }

    /// In-plane position `(u, v)` (cm).
    pub fn local_position(&self) -> Vector2<f64> {
        Vector2::new(self.params[3], self.params[4])
    }

    /// Sign of the track direction along the plane normal.
    pub fn side(&self) -> f64 {
        self.side
    }

    /// Whether this state was produced through the vacuum/zero-field lookup fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub(crate) fn set_degraded(&mut self, degraded: bool) {
        self.degraded = degraded;
    }

    /// Global position of the state (cm).
    pub fn global_position(&self, plane: &Plane) -> Vector3<f64> {
        plane.to_global(&self.local_position())
    }

    /// Global unit direction of the state.
    pub fn global_direction(&self, plane: &Plane) -> Vector3<f64> {
        let (tu, tv) = self.slopes();
        let g = tu * plane.u_axis() + tv * plane.v_axis() + plane.normal();
        self.side * g / g.norm()
    }

    /// Global momentum vector (GeV).
    ///
    /// `charge` must carry the same sign convention used to build q/p.
    pub fn global_momentum(&self, plane: &Plane, charge: f64) -> Vector3<f64> {
        let p: Gev = charge / self.qop();
        self.global_direction(plane) * p
    }
}

#[cfg(test)]
mod track_state_test {
    use super::*;
    use crate::constants::Matrix5;
    use approx::assert_relative_eq;

    fn flipped_plane() -> Plane {
        Plane::new(
            Vector3::new(0.0, 0.0, 30.0),
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .unwrap()
    }

    #[test]
    fn test_global_round_trip_on_flipped_plane() {
        let plane = flipped_plane();
        let position = Vector3::new(0.4, -0.2, 30.0);
        let momentum = Vector3::new(-0.01, 0.003, 0.1);

        let state = TrackState::from_global(
            1,
            &plane,
            &position,
            &momentum,
            -1.0,
            Matrix5::identity(),
        );

        // The flipped plane normal points along -z while the track moves along +z
        assert_relative_eq!(state.side(), -1.0);

        let pos = state.global_position(&plane);
        let mom = state.global_momentum(&plane, -1.0);
        assert_relative_eq!(pos.x, position.x, max_relative = 1e-12);
        assert_relative_eq!(pos.y, position.y, max_relative = 1e-12);
        assert_relative_eq!(pos.z, 30.0, max_relative = 1e-12);
        assert_relative_eq!(mom.x, momentum.x, max_relative = 1e-10);
        assert_relative_eq!(mom.y, momentum.y, max_relative = 1e-10);
        assert_relative_eq!(mom.z, momentum.z, max_relative = 1e-10);
    }

    #[test]
    fn test_qop_sign_follows_charge() {
        let plane = Plane::new(
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        let momentum = Vector3::new(0.0, 0.0, 0.2);

        let electron = TrackState::from_global(
            0,
            &plane,
            &Vector3::zeros(),
            &momentum,
            -1.0,
            Matrix5::identity(),
        );
        assert_relative_eq!(electron.qop(), -5.0, max_relative = 1e-12);

        let positron = TrackState::from_global(
            0,
            &plane,
            &Vector3::zeros(),
            &momentum,
            1.0,
            Matrix5::identity(),
        );
        assert_relative_eq!(positron.qop(), 5.0, max_relative = 1e-12);
    }
}
