//! # State propagation between planes
//!
//! The [`Propagator`] advances a [`TrackState`] from one plane to the next through a
//! magnetic field and a material map, producing the new state together with a
//! [`Segment`]: the 5×5 transport Jacobian and the additive process-noise covariance in
//! local coordinates. Numerical integration is an adaptive embedded Runge-Kutta 4(5)
//! ([`rk_integrator`]); the material model is the simplified Gaussian one of
//! [`material_effects`].
//!
//! The field and material collaborators are passed in at construction — there are no
//! process-wide managers. Lookup gaps (queries outside the modeled volume) degrade to
//! vacuum/zero-field propagation and flag the resulting state as low-confidence, unless
//! `strict_lookup` is set, in which case they fail with
//! [`GblFitError::OutOfFieldRange`].

pub mod material_effects;
mod rk_integrator;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{
    Centimeter, ELECTRON_MASS, Gev, KAPPA_FIELD, Matrix5, Matrix5x7, Matrix7x5, Vector5,
};
use crate::field::FieldLookup;
use crate::gblfit_errors::GblFitError;
use crate::geometry::{Plane, PlaneId};
use crate::material::MaterialLookup;
use crate::track_state::{TrackState, DEFAULT_SLOPE_FLOOR};

use rk_integrator::GlobalState;

/// Transport of one adjacent plane pair: the Jacobian mapping a local state at plane *i*
/// to plane *i+1*, and the process noise picked up in between. Rebuilt on every fit
/// pass, never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub jacobian: Matrix5,
    pub noise: Matrix5,
}

/// Configuration of the [`Propagator`].
///
/// Tunable parameters for the particle hypothesis, the adaptive integrator, and the
/// lookup-gap policy. Build with [`PropagatorParams::builder`]; defaults describe an
/// electron in a cm-scale tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagatorParams {
    /// Particle rest mass (GeV).
    pub mass: Gev,
    /// Particle charge (elementary charges, signed).
    pub charge: f64,
    /// Absolute local error tolerance of one Runge-Kutta step.
    pub rk_tolerance: f64,
    /// Step length tried first (cm).
    pub initial_step: Centimeter,
    /// Smallest step the controller may choose (cm).
    pub min_step: Centimeter,
    /// Largest step the controller may choose (cm).
    pub max_step: Centimeter,
    /// Step budget per extrapolation, counting rejected attempts.
    pub max_steps: usize,
    /// Path-length budget per extrapolation (cm).
    pub max_path: Centimeter,
    /// Floor on |t·n|: directions closer to grazing are treated as singular.
    pub slope_floor: f64,
    /// Fail with [`GblFitError::OutOfFieldRange`] on lookup gaps instead of degrading.
    pub strict_lookup: bool,
}

impl Default for PropagatorParams {
    fn default() -> Self {
        PropagatorParams {
            mass: ELECTRON_MASS,
            charge: -1.0,
            rk_tolerance: 1.0e-8,
            initial_step: 1.0,
            min_step: 1.0e-4,
            max_step: 5.0,
            max_steps: 10_000,
            max_path: 1.0e3,
            slope_floor: DEFAULT_SLOPE_FLOOR,
            strict_lookup: false,
        }
    }
}

impl PropagatorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PropagatorParamsBuilder {
        PropagatorParamsBuilder::new()
    }

    /// Check the parameters for consistency.
    ///
    /// Called by the builder, and again by the propagator on use: the fields are
    /// public, so a literal struct can carry values the builder would have refused.
    pub fn validate(&self) -> Result<(), GblFitError> {
        if !(self.mass > 0.0) {
            return Err(GblFitError::InvalidParameter("mass must be > 0".into()));
        }
        if self.charge == 0.0 || !self.charge.is_finite() {
            return Err(GblFitError::InvalidParameter(
                "charge must be non-zero and finite".into(),
            ));
        }
        if !(self.rk_tolerance > 0.0) {
            return Err(GblFitError::InvalidParameter(
                "rk_tolerance must be > 0".into(),
            ));
        }
        if !(self.min_step > 0.0) || self.min_step > self.max_step {
            return Err(GblFitError::InvalidParameter(
                "need 0 < min_step <= max_step".into(),
            ));
        }
        if !(self.initial_step > 0.0) {
            return Err(GblFitError::InvalidParameter(
                "initial_step must be > 0".into(),
            ));
        }
        if self.max_steps == 0 {
            return Err(GblFitError::InvalidParameter(
                "max_steps must be >= 1".into(),
            ));
        }
        if !(self.max_path > 0.0) {
            return Err(GblFitError::InvalidParameter("max_path must be > 0".into()));
        }
        if !(self.slope_floor > 0.0) {
            return Err(GblFitError::InvalidParameter(
                "slope_floor must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PropagatorParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct PropagatorParamsBuilder {
    params: PropagatorParams,
}

impl PropagatorParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: PropagatorParams::default(),
        }
    }

    pub fn mass(mut self, v: Gev) -> Self {
        self.params.mass = v;
        self
    }

    pub fn charge(mut self, v: f64) -> Self {
        self.params.charge = v;
        self
    }

    pub fn rk_tolerance(mut self, v: f64) -> Self {
        self.params.rk_tolerance = v;
        self
    }

    pub fn initial_step(mut self, v: Centimeter) -> Self {
        self.params.initial_step = v;
        self
    }

    pub fn min_step(mut self, v: Centimeter) -> Self {
        self.params.min_step = v;
        self
    }

    pub fn max_step(mut self, v: Centimeter) -> Self {
        self.params.max_step = v;
        self
    }

    pub fn max_steps(mut self, v: usize) -> Self {
        self.params.max_steps = v;
        self
    }

    pub fn max_path(mut self, v: Centimeter) -> Self {
        self.params.max_path = v;
        self
    }

    pub fn slope_floor(mut self, v: f64) -> Self {
        self.params.slope_floor = v;
        self
    }

    pub fn strict_lookup(mut self, v: bool) -> Self {
        self.params.strict_lookup = v;
        self
    }

    pub fn build(self) -> Result<PropagatorParams, GblFitError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// Advances track states between planes through a field and a material map.
#[derive(Debug, Clone)]
pub struct Propagator<F, M> {
    field: F,
    material: M,
    params: PropagatorParams,
}

impl<F: FieldLookup, M: MaterialLookup> Propagator<F, M> {
    pub fn new(field: F, material: M, params: PropagatorParams) -> Self {
        Propagator {
            field,
            material,
            params,
        }
    }

    pub fn params(&self) -> &PropagatorParams {
        &self.params
    }

    /// Extrapolate a state from its plane to a target plane.
    ///
    /// Arguments
    /// -----------------
    /// * `state`: the state to advance; must live on `from`.
    /// * `from`: resolved geometry of the state's plane.
    /// * `to_id`: handle of the target plane (recorded on the output state).
    /// * `to`: resolved geometry of the target plane.
    ///
    /// Return
    /// ----------
    /// * The state on the target plane (covariance transported and inflated by the
    ///   process noise) and the [`Segment`] for this plane pair.
    pub fn extrapolate_to_plane(
        &self,
        state: &TrackState,
        from: &Plane,
        to_id: PlaneId,
        to: &Plane,
    ) -> Result<(TrackState, Segment), GblFitError> {
        self.params.validate()?;

        let start = GlobalState {
            pos: state.global_position(from),
            dir: state.global_direction(from),
            qop: state.qop(),
        };
        let embed = local_to_global_jacobian(from, state);

        let (end, transport) =
            rk_integrator::propagate_to_plane(&self.field, &self.material, &self.params, start, to)?;

        let field_at_end = self.field.field_at(&end.pos).unwrap_or_else(Vector3::zeros);
        let (params_new, side, project) =
            global_to_local_jacobian(to, &end, &field_at_end, self.params.slope_floor);

        let jacobian: Matrix5 = project * transport.jacobian * embed;
        let noise_raw = project * transport.noise * project.transpose();
        let noise = (noise_raw + noise_raw.transpose()) * 0.5;

        let cov_raw = jacobian * state.cov() * jacobian.transpose() + noise;
        let cov = (cov_raw + cov_raw.transpose()) * 0.5;

        let mut new_state = TrackState::new(to_id, params_new, cov, side);
        new_state.set_degraded(state.is_degraded() || transport.degraded);

        Ok((new_state, Segment { jacobian, noise }))
    }
}

/// Jacobian of the global 7-state with respect to the local parameters at the start
/// plane, evaluated at `state`.
fn local_to_global_jacobian(plane: &Plane, state: &TrackState) -> Matrix7x5 {
    let (tu, tv) = state.slopes();
    let side = state.side();
    let u = plane.u_axis();
    let v = plane.v_axis();
    let n = plane.normal();

    let g = tu * u + tv * v + n;
    let c = g.norm();
    let c3 = c * c * c;

    // t = side · g/|g|
    let dt_dtu = side * (u / c - g * (tu / c3));
    let dt_dtv = side * (v / c - g * (tv / c3));

    let mut m = Matrix7x5::zeros();
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(u);
    m.fixed_view_mut::<3, 1>(0, 4).copy_from(v);
    m.fixed_view_mut::<3, 1>(3, 1).copy_from(&dt_dtu);
    m.fixed_view_mut::<3, 1>(3, 2).copy_from(&dt_dtv);
    m[(6, 0)] = 1.0;
    m
}

/// Local parameters at the arrival plane plus the Jacobian of the local parameters with
/// respect to the global 7-state, including the arrival-constraint fold: a variation
/// `δx` off the plane shifts the crossing point along the track by
/// `δs = −(n·δx)/(t·n)`, which feeds both the position and (through the field curvature)
/// the direction rows.
fn global_to_local_jacobian(
    plane: &Plane,
    state: &GlobalState,
    field: &Vector3<f64>,
    slope_floor: f64,
) -> (Vector5, f64, Matrix5x7) {
    let u = plane.u_axis();
    let v = plane.v_axis();
    let n = plane.normal();
    let t = state.dir;

    let tw_raw = t.dot(n);
    let side = if tw_raw < 0.0 { -1.0 } else { 1.0 };
    let tw = if tw_raw.abs() < slope_floor {
        side * slope_floor
    } else {
        tw_raw
    };

    let local = plane.to_local(&state.pos);
    let tu = t.dot(u) / tw;
    let tv = t.dot(v) / tw;
    let params = Vector5::new(state.qop, tu, tv, local.x, local.y);

    let dtds = KAPPA_FIELD * state.qop * t.cross(field);

    // Slope gradients with respect to the (projected) direction
    let a_tu = (u - tu * n) / tw;
    let a_tv = (v - tv * n) / tw;

    let mut m = Matrix5x7::zeros();
    m[(0, 6)] = 1.0;

    // Position rows: in-plane projection of δx along the track direction
    let row_u = u - (u.dot(&t) / tw) * n;
    let row_v = v - (v.dot(&t) / tw) * n;
    m.fixed_view_mut::<1, 3>(3, 0).copy_from(&row_u.transpose());
    m.fixed_view_mut::<1, 3>(4, 0).copy_from(&row_v.transpose());

    // Slope rows: direct δt term plus the curvature picked up over the shifted path
    let tu_dx = -(a_tu.dot(&dtds) / tw) * n;
    let tv_dx = -(a_tv.dot(&dtds) / tw) * n;
    m.fixed_view_mut::<1, 3>(1, 0).copy_from(&tu_dx.transpose());
    m.fixed_view_mut::<1, 3>(2, 0).copy_from(&tv_dx.transpose());
    m.fixed_view_mut::<1, 3>(1, 3).copy_from(&a_tu.transpose());
    m.fixed_view_mut::<1, 3>(2, 3).copy_from(&a_tv.transpose());

    (params, side, m)
}
