use thiserror::Error;

/// Errors produced while building detector objects, propagating track states, or fitting
/// trajectories.
///
/// Construction-phase and propagation-phase errors are fatal to the current fit attempt:
/// the engine surfaces the specific variant and aborts without publishing a partial
/// [`FitResult`](crate::fit::FitResult).
#[derive(Error, Debug)]
pub enum GblFitError {
    #[error("Degenerate plane frame: {0}")]
    DegenerateFrame(String),

    #[error("No intersection with target plane within {0} cm of path")]
    NoIntersection(f64),

    #[error("Propagation failed: {0}")]
    Propagation(String),

    #[error("Field or material lookup has no data at ({x:.3}, {y:.3}, {z:.3}) cm")]
    OutOfFieldRange { x: f64, y: f64, z: f64 },

    #[error("Measurement covariance is not positive semi-definite (smallest eigenvalue {0:e})")]
    NonPositiveDefiniteCovariance(f64),

    #[error("A measurement already exists at plane index {0}")]
    DuplicateMeasurement(usize),

    #[error("Plane index {index} out of range (have {len} planes)")]
    PlaneIndexOutOfRange { index: usize, len: usize },

    #[error("Normal-equations system is singular at plane {0}; too few measurements to constrain all degrees of freedom")]
    SingularSystem(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Measurement is bound to plane {bound} but was used with plane {used}")]
    MeasurementPlaneMismatch { bound: u16, used: u16 },

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjection(rand_distr::NormalError),
}

impl From<rand_distr::NormalError> for GblFitError {
    fn from(err: rand_distr::NormalError) -> Self {
        GblFitError::NoiseInjection(err)
    }
}

impl PartialEq for GblFitError {
    fn eq(&self, other: &Self) -> bool {
        use GblFitError::*;
        match (self, other) {
            (DegenerateFrame(a), DegenerateFrame(b)) => a == b,
            (NoIntersection(a), NoIntersection(b)) => a == b,
            (Propagation(a), Propagation(b)) => a == b,
            (
                OutOfFieldRange { x, y, z },
                OutOfFieldRange {
                    x: x2,
                    y: y2,
                    z: z2,
                },
            ) => x == x2 && y == y2 && z == z2,

            // Payload is diagnostic only: equality on the variant
            (NonPositiveDefiniteCovariance(_), NonPositiveDefiniteCovariance(_)) => true,
            (NoiseInjection(_), NoiseInjection(_)) => true,

            (DuplicateMeasurement(a), DuplicateMeasurement(b)) => a == b,
            (
                PlaneIndexOutOfRange { index, len },
                PlaneIndexOutOfRange {
                    index: i2,
                    len: l2,
                },
            ) => index == i2 && len == l2,
            (SingularSystem(a), SingularSystem(b)) => a == b,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (
                MeasurementPlaneMismatch { bound, used },
                MeasurementPlaneMismatch {
                    bound: b2,
                    used: u2,
                },
            ) => bound == b2 && used == u2,

            _ => false,
        }
    }
}
