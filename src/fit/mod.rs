//! # The broken-lines fit engine
//!
//! [`FitEngine`] consumes a [`Trajectory`] and produces a globally consistent fit: it
//! propagates the seed across every plane, assembles the banded normal equations of the
//! broken-lines formulation — measurement residuals weighted by inverse hit covariances,
//! angular "kinks" between segments weighted by inverse process noise — solves them in
//! one pass, and attaches a fitted [`TrackState`] with full covariance to every plane.
//!
//! Unlike a sequential filter, the simultaneous solve lets measurements at later planes
//! pull on earlier states. Each `process` call is independent: fitted states are
//! overwritten wholesale, and a failed call leaves earlier results untouched.

mod band_solver;

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::constants::{Matrix5, Vector5};
use crate::field::FieldLookup;
use crate::gblfit_errors::GblFitError;
use crate::geometry::{Plane, PlaneId, PlaneRegistry};
use crate::material::MaterialLookup;
use crate::propagation::{Propagator, Segment};
use crate::track_state::TrackState;
use crate::trajectory::{FitSummary, Trajectory};

use band_solver::BlockTridiagonalSystem;

/// Engine state machine. Every `process` call walks
/// `Idle → Propagating → Assembling → Solving → Done`, or drops into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitPhase {
    Idle,
    Propagating,
    Assembling,
    Solving,
    Done,
    Failed,
}

/// Result of one fit: a fitted state with covariance per plane, the global chi-square,
/// and the degrees of freedom. Regenerated wholesale on each invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub states: Vec<TrackState>,
    pub chi2: f64,
    pub ndf: usize,
}

/// Configuration of the [`FitEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    /// Diagonal floor added to each segment's process noise before inversion, making
    /// the kink weights well-defined along noise-free directions.
    pub noise_floor: f64,
    /// Weight the seed covariance into the first plane as a prior. Off by default;
    /// turning it on is the standard way to rescue an underconstrained fit.
    pub use_seed_prior: bool,
    /// Number of fit passes; passes after the first re-seed from the fitted state at
    /// the first plane (iterative refinement).
    pub iterations: usize,
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            noise_floor: 1.0e-8,
            use_seed_prior: false,
            iterations: 1,
        }
    }
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::new()
    }

    /// Check the parameters for consistency.
    ///
    /// Called by the builder, and again by [`FitEngine::process`]: the fields are
    /// public, so a literal struct can carry values the builder would have refused.
    pub fn validate(&self) -> Result<(), GblFitError> {
        if !(self.noise_floor > 0.0) {
            return Err(GblFitError::InvalidParameter(
                "noise_floor must be > 0".into(),
            ));
        }
        if self.iterations == 0 {
            return Err(GblFitError::InvalidParameter(
                "iterations must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`FitParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct FitParamsBuilder {
    params: FitParams,
}

impl FitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
        }
    }

    pub fn noise_floor(mut self, v: f64) -> Self {
        self.params.noise_floor = v;
        self
    }

    pub fn use_seed_prior(mut self, v: bool) -> Self {
        self.params.use_seed_prior = v;
        self
    }

    pub fn iterations(mut self, v: usize) -> Self {
        self.params.iterations = v;
        self
    }

    pub fn build(self) -> Result<FitParams, GblFitError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// The trajectory fit engine: one instance per fit context, holding its propagator
/// (with the field/material collaborators) and the fit configuration.
#[derive(Debug, Clone)]
pub struct FitEngine<F, M> {
    propagator: Propagator<F, M>,
    params: FitParams,
    phase: FitPhase,
}

impl<F: FieldLookup, M: MaterialLookup> FitEngine<F, M> {
    pub fn new(propagator: Propagator<F, M>, params: FitParams) -> Self {
        FitEngine {
            propagator,
            params,
            phase: FitPhase::Idle,
        }
    }

    pub fn phase(&self) -> FitPhase {
        self.phase
    }

    pub fn propagator(&self) -> &Propagator<F, M> {
        &self.propagator
    }

    /// Fit a trajectory.
    ///
    /// Runs the configured number of passes, attaches the fitted states and summary to
    /// the trajectory on success, and returns the final [`FitResult`]. On error the
    /// trajectory is left exactly as it was — in particular, fitted states from an
    /// earlier successful call survive.
    pub fn process(
        &mut self,
        registry: &PlaneRegistry,
        trajectory: &mut Trajectory,
    ) -> Result<FitResult, GblFitError> {
        if let Err(e) = self.params.validate() {
            self.phase = FitPhase::Failed;
            return Err(e);
        }

        let mut seed = trajectory.seed().clone();
        let mut result = None;

        for pass in 0..self.params.iterations {
            match self.single_pass(registry, trajectory, &seed) {
                Ok(r) => {
                    debug!(
                        "fit pass {}: chi2 = {:.4}, ndf = {}",
                        pass + 1,
                        r.chi2,
                        r.ndf
                    );
                    seed = r.states[0].clone();
                    result = Some(r);
                }
                Err(e) => {
                    self.phase = FitPhase::Failed;
                    return Err(e);
                }
            }
        }

        // iterations >= 1 was just validated
        let result = result.expect("at least one fit pass");
        trajectory.attach_fit(
            &result.states,
            FitSummary {
                chi2: result.chi2,
                ndf: result.ndf,
            },
        );
        self.phase = FitPhase::Done;
        Ok(result)
    }

    fn single_pass(
        &mut self,
        registry: &PlaneRegistry,
        trajectory: &Trajectory,
        seed: &TrackState,
    ) -> Result<FitResult, GblFitError> {
        self.phase = FitPhase::Propagating;

        let planes: Vec<(PlaneId, &Plane)> = trajectory
            .points()
            .map(|(id, _)| registry.get(id).map(|p| (id, p)))
            .collect::<Result<_, _>>()?;
        let n = planes.len();

        let mut predictions: Vec<TrackState> = Vec::with_capacity(n);
        let mut segments: Vec<Segment> = Vec::with_capacity(n.saturating_sub(1));
        predictions.push(seed.clone());
        for ((_, from), (to_id, to)) in planes.iter().tuple_windows() {
            let previous = predictions.last().expect("seed present");
            let (next, segment) = self
                .propagator
                .extrapolate_to_plane(previous, from, *to_id, to)?;
            predictions.push(next);
            segments.push(segment);
        }

        self.phase = FitPhase::Assembling;

        let n_meas = trajectory.n_measurements();
        let prior_dof = if self.params.use_seed_prior { 5 } else { 0 };
        if 2 * n_meas + prior_dof < 5 {
            return Err(GblFitError::SingularSystem(0));
        }

        let mut system = BlockTridiagonalSystem::new(n);

        let seed_weight = if self.params.use_seed_prior {
            let w = (*seed.cov()).cholesky().map(|c| c.inverse()).ok_or_else(|| {
                GblFitError::InvalidParameter("seed covariance is not positive definite".into())
            })?;
            system.diag[0] += w;
            Some(w)
        } else {
            None
        };

        // Measurement terms: residual r against the prediction, weight V⁻¹, acting on
        // the (u, v) components of the correction
        let mut residuals: Vec<Option<(nalgebra::Vector2<f64>, nalgebra::Matrix2<f64>)>> =
            vec![None; n];
        for (i, (_, measurement)) in trajectory.points().enumerate() {
            if let Some(m) = measurement {
                let r = m.residual(&predictions[i])?;
                let w = m.weight();
                let mut block = system.diag[i].fixed_view_mut::<2, 2>(3, 3);
                block += w;
                let wr = w * r;
                system.rhs[i][3] += wr.x;
                system.rhs[i][4] += wr.y;
                residuals[i] = Some((r, w));
            }
        }

        // Kink terms: δ_{i+1} − J_i δ_i ~ N(0, Q_i + floor·I)
        let mut kink_weights: Vec<Matrix5> = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let q = segment.noise + Matrix5::identity() * self.params.noise_floor;
            let w = q
                .cholesky()
                .map(|c| c.inverse())
                .ok_or(GblFitError::SingularSystem(i))?;

            system.diag[i] += segment.jacobian.transpose() * w * segment.jacobian;
            system.diag[i + 1] += w;
            system.sub[i] -= w * segment.jacobian;
            kink_weights.push(w);
        }

        self.phase = FitPhase::Solving;

        let solution = system.solve()?;

        let mut chi2 = 0.0;
        for (i, entry) in residuals.iter().enumerate() {
            if let Some((r, w)) = entry {
                let d = solution.corrections[i];
                let post = nalgebra::Vector2::new(r.x - d[3], r.y - d[4]);
                chi2 += (post.transpose() * w * post)[(0, 0)];
            }
        }
        for (i, w) in kink_weights.iter().enumerate() {
            let kink: Vector5 = solution.corrections[i + 1]
                - segments[i].jacobian * solution.corrections[i];
            chi2 += (kink.transpose() * w * kink)[(0, 0)];
        }
        if let Some(w) = seed_weight {
            let d = solution.corrections[0];
            chi2 += (d.transpose() * w * d)[(0, 0)];
        }

        let ndf = (2 * n_meas + prior_dof).saturating_sub(5);

        let states: Vec<TrackState> = predictions
            .iter()
            .zip(solution.corrections.iter().zip(solution.covariances.iter()))
            .map(|(pred, (delta, cov))| {
                let mut state = TrackState::new(
                    pred.plane(),
                    pred.params() + delta,
                    *cov,
                    pred.side(),
                );
                state.set_degraded(pred.is_degraded());
                state
            })
            .collect();

        Ok(FitResult { states, chi2, ndf })
    }
}
