//! # Adaptive Runge-Kutta core
//!
//! Integrates the equations of motion of a charged particle through field and material
//! from a global state to a target plane, with an embedded Cash-Karp 4(5) error estimate
//! driving the step size. Alongside the state it transports the 7×7 Jacobian of the
//! global flow and accumulates process noise (multiple scattering, energy-loss
//! straggling) through the same per-step transport matrices.
//!
//! The step length is clamped to the straight-line distance to the target plane, so the
//! integration lands on the plane to within [`PLANE_TOLERANCE`](crate::constants::PLANE_TOLERANCE).

use log::trace;
use nalgebra::{Matrix3, Vector3};

use super::material_effects::{beta, highland_variance, mean_energy_loss, straggling_variance};
use super::PropagatorParams;
use crate::constants::{Centimeter, KAPPA_FIELD, Matrix7, PLANE_TOLERANCE};
use crate::field::FieldLookup;
use crate::gblfit_errors::GblFitError;
use crate::geometry::Plane;
use crate::material::{Material, MaterialLookup};

/// Global track state carried through the integration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GlobalState {
    pub pos: Vector3<f64>,
    pub dir: Vector3<f64>,
    pub qop: f64,
}

/// Accumulated transport of one plane-to-plane extrapolation, in global coordinates.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    pub jacobian: Matrix7,
    pub noise: Matrix7,
    pub degraded: bool,
    pub path: Centimeter,
}

// Cash-Karp tableau
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 3.0 / 10.0;
const A42: f64 = -9.0 / 10.0;
const A43: f64 = 6.0 / 5.0;
const A51: f64 = -11.0 / 54.0;
const A52: f64 = 5.0 / 2.0;
const A53: f64 = -70.0 / 27.0;
const A54: f64 = 35.0 / 27.0;
const A61: f64 = 1631.0 / 55296.0;
const A62: f64 = 175.0 / 512.0;
const A63: f64 = 575.0 / 13824.0;
const A64: f64 = 44275.0 / 110592.0;
const A65: f64 = 253.0 / 4096.0;
const B1: f64 = 37.0 / 378.0;
const B3: f64 = 250.0 / 621.0;
const B4: f64 = 125.0 / 594.0;
const B6: f64 = 512.0 / 1771.0;
const D1: f64 = 2825.0 / 27648.0;
const D3: f64 = 18575.0 / 48384.0;
const D4: f64 = 13525.0 / 55296.0;
const D5: f64 = 277.0 / 14336.0;
const D6: f64 = 1.0 / 4.0;

/// Right-hand side of the equations of motion at fixed q/p:
/// `dx/ds = t`, `dt/ds = KAPPA_FIELD · (q/p) · (t × B)`.
fn derivative(dir: &Vector3<f64>, qop: f64, field: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    (*dir, KAPPA_FIELD * qop * dir.cross(field))
}

/// One embedded Cash-Karp step of length `h`; returns the 5th-order solution and the
/// error estimate against the embedded 4th-order one.
fn cash_karp_step(
    state: &GlobalState,
    h: f64,
    field: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>, f64) {
    let (kx1, kt1) = derivative(&state.dir, state.qop, field);

    let d2 = state.dir + h * A21 * kt1;
    let (kx2, kt2) = derivative(&d2, state.qop, field);

    let d3 = state.dir + h * (A31 * kt1 + A32 * kt2);
    let (kx3, kt3) = derivative(&d3, state.qop, field);

    let d4 = state.dir + h * (A41 * kt1 + A42 * kt2 + A43 * kt3);
    let (kx4, kt4) = derivative(&d4, state.qop, field);

    let d5 = state.dir + h * (A51 * kt1 + A52 * kt2 + A53 * kt3 + A54 * kt4);
    let (kx5, kt5) = derivative(&d5, state.qop, field);

    let d6 = state.dir + h * (A61 * kt1 + A62 * kt2 + A63 * kt3 + A64 * kt4 + A65 * kt5);
    let (kx6, kt6) = derivative(&d6, state.qop, field);

    let pos5 = state.pos + h * (B1 * kx1 + B3 * kx3 + B4 * kx4 + B6 * kx6);
    let dir5 = state.dir + h * (B1 * kt1 + B3 * kt3 + B4 * kt4 + B6 * kt6);

    let pos4 = state.pos + h * (D1 * kx1 + D3 * kx3 + D4 * kx4 + D5 * kx5 + D6 * kx6);
    let dir4 = state.dir + h * (D1 * kt1 + D3 * kt3 + D4 * kt4 + D5 * kt5 + D6 * kt6);

    let err = ((pos5 - pos4).norm_squared() + (dir5 - dir4).norm_squared()).sqrt();
    (pos5, dir5, err)
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Second-order transport matrix of one step: `T = I + hA + h²A²/2` with `A` the
/// Jacobian of the equations of motion at the step start.
fn step_transport(state: &GlobalState, h: f64, field: &Vector3<f64>) -> Matrix7 {
    let mut a = Matrix7::zeros();
    a.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&Matrix3::identity());
    a.fixed_view_mut::<3, 3>(3, 3)
        .copy_from(&(-KAPPA_FIELD * state.qop * skew(field)));
    a.fixed_view_mut::<3, 1>(3, 6)
        .copy_from(&(KAPPA_FIELD * state.dir.cross(field)));

    Matrix7::identity() + h * a + (h * h / 2.0) * (a * a)
}

/// Resolve the field at `point`, applying the configured lookup-gap policy.
fn field_with_policy<F: FieldLookup>(
    field: &F,
    point: &Vector3<f64>,
    params: &PropagatorParams,
    degraded: &mut bool,
) -> Result<Vector3<f64>, GblFitError> {
    match field.field_at(point) {
        Some(b) => Ok(b),
        None if params.strict_lookup => Err(GblFitError::OutOfFieldRange {
            x: point.x,
            y: point.y,
            z: point.z,
        }),
        None => {
            *degraded = true;
            Ok(Vector3::zeros())
        }
    }
}

fn material_with_policy<M: MaterialLookup>(
    material: &M,
    point: &Vector3<f64>,
    params: &PropagatorParams,
    degraded: &mut bool,
) -> Result<Material, GblFitError> {
    match material.material_at(point) {
        Some(m) => Ok(m),
        None if params.strict_lookup => Err(GblFitError::OutOfFieldRange {
            x: point.x,
            y: point.y,
            z: point.z,
        }),
        None => {
            *degraded = true;
            Ok(Material::vacuum())
        }
    }
}

/// Integrate from `start` to the target plane.
pub(crate) fn propagate_to_plane<F: FieldLookup, M: MaterialLookup>(
    field: &F,
    material: &M,
    params: &PropagatorParams,
    start: GlobalState,
    target: &Plane,
) -> Result<(GlobalState, Transport), GblFitError> {
    let mut y = start;
    let mut jacobian = Matrix7::identity();
    let mut noise = Matrix7::zeros();
    let mut degraded = false;
    let mut path: Centimeter = 0.0;
    let mut h = params.initial_step.min(params.max_step);
    let mut last_step: Centimeter = 0.0;
    let mut attempts = 0usize;

    let p_start = params.charge / y.qop;
    if !(p_start > 0.0) || !p_start.is_finite() {
        return Err(GblFitError::Propagation(format!(
            "charge hypothesis {} is inconsistent with q/p = {}",
            params.charge, y.qop
        )));
    }

    loop {
        let dist = target.signed_distance(&y.pos);
        if dist.abs() < PLANE_TOLERANCE {
            break;
        }

        let tn = y.dir.dot(target.normal());
        if tn.abs() < params.slope_floor {
            return Err(GblFitError::NoIntersection(params.max_path));
        }
        let s_to_plane = -dist / tn;
        // A curved step clamped to the straight-line estimate can land slightly past
        // the plane; the crossing then lies inside the step just taken and a signed
        // Newton step walks back to it. A plane farther behind than that step was
        // never on the path.
        if s_to_plane < 0.0 && -s_to_plane > last_step.max(params.min_step) {
            return Err(GblFitError::NoIntersection(params.max_path));
        }

        let landing = s_to_plane.abs() <= params.min_step || s_to_plane < 0.0;
        let step = if landing {
            s_to_plane
        } else {
            h.min(params.max_step).min(s_to_plane)
        };

        if path + step.abs() > params.max_path {
            return Err(GblFitError::NoIntersection(params.max_path));
        }

        attempts += 1;
        if attempts > params.max_steps {
            return Err(GblFitError::Propagation(format!(
                "adaptive integrator did not reach the target plane within {} steps",
                params.max_steps
            )));
        }

        let b = field_with_policy(field, &y.pos, params, &mut degraded)?;
        let (pos_new, dir_new, err) = cash_karp_step(&y, step, &b);

        if !landing && err > params.rk_tolerance && step > params.min_step {
            let shrink = 0.9 * (params.rk_tolerance / err).powf(0.25);
            h = (step * shrink.max(0.2)).max(params.min_step);
            trace!("step rejected: err={err:e}, retrying with h={h:e}");
            continue;
        }

        // Accepted: transport the Jacobian and the accumulated noise through this step
        let transport = step_transport(&y, step, &b);
        jacobian = transport * jacobian;
        noise = transport * noise * transport.transpose();

        // Material effects at the step midpoint
        let midpoint = y.pos + (0.5 * step) * y.dir;
        let mat = material_with_policy(material, &midpoint, params, &mut degraded)?;
        if !mat.is_vacuum() {
            let p = params.charge / y.qop;
            let bta = beta(p, params.mass);

            let theta2 = highland_variance(p, bta, step, mat.radiation_length);
            if theta2 > 0.0 {
                let transverse = Matrix3::identity() - y.dir * y.dir.transpose();
                let mut dir_block = noise.fixed_view_mut::<3, 3>(3, 3);
                dir_block += theta2 * transverse;
            }

            let energy = (p * p + params.mass * params.mass).sqrt();
            let var_e = straggling_variance(p, params.mass, &mat, step);
            if var_e > 0.0 {
                let dqop_de = energy / (p * p * p);
                noise[(6, 6)] += dqop_de * dqop_de * var_e;
            }

            let de = mean_energy_loss(p, params.mass, &mat, step);
            if de > 0.0 {
                let energy_new = energy - de;
                if energy_new <= params.mass * (1.0 + 1e-9) {
                    return Err(GblFitError::Propagation(
                        "particle stopped in material".into(),
                    ));
                }
                let p_new = (energy_new * energy_new - params.mass * params.mass).sqrt();
                let scale = p / p_new;
                y.qop *= scale;
                // Fold the momentum rescale into the q/p row/column of the transport
                for col in 0..7 {
                    jacobian[(6, col)] *= scale;
                }
                for k in 0..7 {
                    noise[(6, k)] *= scale;
                    noise[(k, 6)] *= scale;
                }
            }
        }

        y.pos = pos_new;
        y.dir = dir_new.normalize();
        path += step.abs();
        last_step = step.abs();

        if !landing {
            h = if err > 0.0 {
                (step * 0.9 * (params.rk_tolerance / err).powf(0.2))
                    .clamp(params.min_step, params.max_step)
            } else {
                params.max_step
            };
        }
    }

    trace!(
        "reached plane after {path:.3} cm in {attempts} steps (degraded: {degraded})"
    );

    Ok((
        y,
        Transport {
            jacobian,
            noise,
            degraded,
            path,
        },
    ))
}
