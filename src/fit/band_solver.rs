//! # Block-tridiagonal solver
//!
//! The broken-lines normal equations couple each plane's corrections only to its
//! immediate neighbors, so the system is symmetric block tridiagonal with 5×5 blocks.
//! Forward block elimination followed by back-substitution solves it in one sweep; the
//! same sweep yields the diagonal blocks of the inverse, which are the covariances of
//! the fitted corrections.

use crate::constants::{Matrix5, Vector5};
use crate::gblfit_errors::GblFitError;

/// Symmetric block-tridiagonal system. `sub[i]` is the block at row `i+1`, column `i`;
/// the superdiagonal is its transpose.
#[derive(Debug, Clone)]
pub(crate) struct BlockTridiagonalSystem {
    pub diag: Vec<Matrix5>,
    pub sub: Vec<Matrix5>,
    pub rhs: Vec<Vector5>,
}

/// Corrections and their covariances, one per plane.
#[derive(Debug, Clone)]
pub(crate) struct BandSolution {
    pub corrections: Vec<Vector5>,
    pub covariances: Vec<Matrix5>,
}

impl BlockTridiagonalSystem {
    pub fn new(n: usize) -> Self {
        BlockTridiagonalSystem {
            diag: vec![Matrix5::zeros(); n],
            sub: vec![Matrix5::zeros(); n.saturating_sub(1)],
            rhs: vec![Vector5::zeros(); n],
        }
    }

    /// Solve by block Thomas elimination.
    ///
    /// Fails with [`GblFitError::SingularSystem`] at the first plane whose eliminated
    /// diagonal block is not positive definite — the signature of unconstrained degrees
    /// of freedom.
    pub fn solve(self) -> Result<BandSolution, GblFitError> {
        let n = self.diag.len();
        assert!(n > 0, "empty system");

        // Forward elimination: D̃_i = D_i − L_i D̃_{i−1}⁻¹ L_iᵀ
        let mut inv: Vec<Matrix5> = Vec::with_capacity(n);
        let mut rhs = self.rhs.clone();
        for i in 0..n {
            let mut d = self.diag[i];
            if i > 0 {
                let gain = self.sub[i - 1] * inv[i - 1];
                d -= gain * self.sub[i - 1].transpose();
                let correction = gain * rhs[i - 1];
                rhs[i] -= correction;
            }
            inv.push(invert_positive_definite(&d, i)?);
        }

        // Back-substitution
        let mut corrections = vec![Vector5::zeros(); n];
        corrections[n - 1] = inv[n - 1] * rhs[n - 1];
        for i in (0..n - 1).rev() {
            corrections[i] = inv[i] * (rhs[i] - self.sub[i].transpose() * corrections[i + 1]);
        }

        // Diagonal blocks of the inverse
        let mut covariances = vec![Matrix5::zeros(); n];
        covariances[n - 1] = inv[n - 1];
        for i in (0..n - 1).rev() {
            let coupling = inv[i] * self.sub[i].transpose();
            let c = inv[i] + coupling * covariances[i + 1] * coupling.transpose();
            covariances[i] = (c + c.transpose()) * 0.5;
        }

        Ok(BandSolution {
            corrections,
            covariances,
        })
    }
}

fn invert_positive_definite(m: &Matrix5, plane: usize) -> Result<Matrix5, GblFitError> {
    (*m).cholesky()
        .map(|c| c.inverse())
        .ok_or(GblFitError::SingularSystem(plane))
}
