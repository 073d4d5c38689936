//! # Trajectories
//!
//! A [`Trajectory`] is the unit of fitting: an ordered sequence of plane handles with at
//! most one [`Measurement`] per plane, plus a seed [`TrackState`] at the first plane.
//! Measurements are inserted before fitting; fitted states are attached by the engine
//! after a successful solve and are overwritten wholesale by later fits. A failed fit
//! leaves previously attached results untouched.

use serde::{Deserialize, Serialize};

use crate::constants::TrajectoryPoints;
use crate::gblfit_errors::GblFitError;
use crate::geometry::PlaneId;
use crate::measurement::Measurement;
use crate::track_state::TrackState;

/// One plane crossing of a trajectory: the plane handle, an optional hit, and the
/// fitted state once a fit has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    plane: PlaneId,
    measurement: Option<Measurement>,
    fitted: Option<TrackState>,
}

impl TrajectoryPoint {
    fn new(plane: PlaneId) -> Self {
        TrajectoryPoint {
            plane,
            measurement: None,
            fitted: None,
        }
    }

    pub fn plane(&self) -> PlaneId {
        self.plane
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        self.measurement.as_ref()
    }

    pub fn fitted(&self) -> Option<&TrackState> {
        self.fitted.as_ref()
    }
}

/// An ordered sequence of planes with measurements and a seed state.
///
/// The planes must be listed in traversal order: propagation runs forward from the seed,
/// and a plane that lies behind the running state surfaces as
/// [`GblFitError::NoIntersection`] during the fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    points: TrajectoryPoints,
    seed: TrackState,
    summary: Option<FitSummary>,
}

/// Chi-square and degrees of freedom of the last successful fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub chi2: f64,
    pub ndf: usize,
}

impl Trajectory {
    /// Build a trajectory over an ordered sequence of planes.
    ///
    /// Arguments
    /// -----------------
    /// * `plane_ids`: plane handles in traversal order; must be non-empty.
    /// * `seed`: seed state; must sit on the first plane of the sequence.
    pub fn new(
        plane_ids: impl IntoIterator<Item = PlaneId>,
        seed: TrackState,
    ) -> Result<Self, GblFitError> {
        let points: TrajectoryPoints = plane_ids.into_iter().map(TrajectoryPoint::new).collect();
        if points.is_empty() {
            return Err(GblFitError::InvalidParameter(
                "trajectory needs at least one plane".into(),
            ));
        }
        if seed.plane() != points[0].plane {
            return Err(GblFitError::InvalidParameter(format!(
                "seed state sits on plane {} but the trajectory starts at plane {}",
                seed.plane(),
                points[0].plane
            )));
        }
        Ok(Trajectory {
            points,
            seed,
            summary: None,
        })
    }

    /// Attach a measurement to the plane at ordinal `plane_index`.
    ///
    /// Fails with [`GblFitError::PlaneIndexOutOfRange`] for an invalid index,
    /// [`GblFitError::DuplicateMeasurement`] if the plane already carries a hit, and
    /// [`GblFitError::MeasurementPlaneMismatch`] if the measurement is bound to a
    /// different plane than the one at that index.
    pub fn insert_measurement(
        &mut self,
        measurement: Measurement,
        plane_index: usize,
    ) -> Result<(), GblFitError> {
        let len = self.points.len();
        let point = self
            .points
            .get_mut(plane_index)
            .ok_or(GblFitError::PlaneIndexOutOfRange {
                index: plane_index,
                len,
            })?;
        if measurement.plane() != point.plane {
            return Err(GblFitError::MeasurementPlaneMismatch {
                bound: measurement.plane(),
                used: point.plane,
            });
        }
        if point.measurement.is_some() {
            return Err(GblFitError::DuplicateMeasurement(plane_index));
        }
        point.measurement = Some(measurement);
        Ok(())
    }

    /// Replace the seed state; subsequent fits start from the new seed.
    pub fn set_seed_state(&mut self, seed: TrackState) -> Result<(), GblFitError> {
        if seed.plane() != self.points[0].plane {
            return Err(GblFitError::InvalidParameter(format!(
                "seed state sits on plane {} but the trajectory starts at plane {}",
                seed.plane(),
                self.points[0].plane
            )));
        }
        self.seed = seed;
        Ok(())
    }

    pub fn seed(&self) -> &TrackState {
        &self.seed
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of planes carrying a measurement.
    pub fn n_measurements(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.measurement.is_some())
            .count()
    }

    /// Ordered, lazy, restartable view of the plane sequence with its hits.
    pub fn points(&self) -> impl Iterator<Item = (PlaneId, Option<&Measurement>)> + '_ {
        self.points.iter().map(|p| (p.plane, p.measurement.as_ref()))
    }

    pub fn point(&self, plane_index: usize) -> Option<&TrajectoryPoint> {
        self.points.get(plane_index)
    }

    pub fn measurement(&self, plane_index: usize) -> Option<&Measurement> {
        self.points.get(plane_index).and_then(|p| p.measurement.as_ref())
    }

    /// Fitted state at `plane_index`, if a fit has succeeded.
    pub fn fitted_state(&self, plane_index: usize) -> Option<&TrackState> {
        self.points.get(plane_index).and_then(|p| p.fitted.as_ref())
    }

    /// Summary of the last successful fit.
    pub fn fit_summary(&self) -> Option<&FitSummary> {
        self.summary.as_ref()
    }

    /// Overwrite fitted states and summary after a successful solve.
    pub(crate) fn attach_fit(&mut self, states: &[TrackState], summary: FitSummary) {
        for (point, state) in self.points.iter_mut().zip(states) {
            point.fitted = Some(state.clone());
        }
        self.summary = Some(summary);
    }
}
