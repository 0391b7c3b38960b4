//! The three-parameter generative noise model.
//!
//! A hypothesized set of present proteins "emits" its associated peptides:
//! each present protein fails to emit an associated peptide with probability
//! `1 - alpha`, any peptide may be emitted spontaneously with probability
//! `beta`, and each protein is present a priori with probability `gamma`.
//!
//! Serang, 2010 [https://pubmed.ncbi.nlm.nih.gov/20712337/]

use crate::matrix::Matrix;
use crate::numeric::log_binomial;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Associated-emission rate: P(peptide emitted | associated protein present)
    pub alpha: f64,
    /// Spontaneous-emission (noise) rate
    pub beta: f64,
    /// Prior probability that any one protein is present
    pub gamma: f64,
}

/// Bit-exact key for memoizing per-model computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelKey([u64; 3]);

impl Model {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    pub fn key(&self) -> ModelKey {
        ModelKey([
            self.alpha.to_bits(),
            self.beta.to_bits(),
            self.gamma.to_bits(),
        ])
    }

    /// P(a given peptide is not emitted | `active` associated proteins
    /// present) = `(1-beta) * (1-alpha)^active`, evaluated in log2 space.
    pub fn no_emission_probability(&self, active: u32) -> f64 {
        ((1.0 - self.beta).log2() + active as f64 * (1.0 - self.alpha).log2()).exp2()
    }

    /// Binomial(total, active; gamma) prior mass on the number of
    /// simultaneously present proteins.
    pub fn activation_prior(&self, total: u32, active: u32) -> f64 {
        self.log_activation_prior(total, active).exp2()
    }

    /// `log2` Binomial(total, active; gamma). Evaluated entirely in log
    /// space so large `total` cannot underflow; the `0 * log2(0)` corner at
    /// gamma in {0, 1} contributes 0 where the mass is defined.
    pub fn log_activation_prior(&self, total: u32, active: u32) -> f64 {
        debug_assert!(active <= total);
        log_binomial(total, active)
            + xlog2(active, self.gamma)
            + xlog2(total - active, 1.0 - self.gamma)
    }
}

/// `k * log2(p)` with the convention `0 * log2(0) = 0`.
fn xlog2(k: u32, p: f64) -> f64 {
    if k == 0 {
        0.0
    } else {
        k as f64 * p.log2()
    }
}

/// An arithmetic progression `min, min + resolution, ...` up to `max`
/// (exclusive, with a small slack against accumulated float error).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealRange {
    pub min: f64,
    pub resolution: f64,
    pub max: f64,
}

impl RealRange {
    pub fn new(min: f64, resolution: f64, max: f64) -> Self {
        Self {
            min,
            resolution,
            max,
        }
    }

    pub fn count(&self) -> usize {
        let mut n = 0;
        let mut v = self.min;
        while v < self.max - 1e-5 {
            n += 1;
            v += self.resolution;
        }
        n
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let mut v = self.min;
        std::iter::from_fn(move || {
            if v < self.max - 1e-5 {
                let out = v;
                v += self.resolution;
                Some(out)
            } else {
                None
            }
        })
    }
}

/// A rectangular (alpha, beta) grid at fixed gamma, enumerated row-major
/// (one row per beta value) for hyperparameter scanning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridModel {
    pub alpha_range: RealRange,
    pub beta_range: RealRange,
    pub gamma: f64,
}

impl GridModel {
    pub fn new(alpha_range: RealRange, beta_range: RealRange, gamma: f64) -> Self {
        Self {
            alpha_range,
            beta_range,
            gamma,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.beta_range.count(), self.alpha_range.count())
    }

    /// Every grid cell as `(row, col, Model)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, Model)> + '_ {
        self.beta_range
            .values()
            .enumerate()
            .flat_map(move |(row, beta)| {
                self.alpha_range
                    .values()
                    .enumerate()
                    .map(move |(col, alpha)| (row, col, Model::new(alpha, beta, self.gamma)))
            })
    }

    /// Evaluate `f` at every cell into a dense surface; the external search
    /// driver picks its optimum with [`Matrix::max_cell`].
    pub fn log_likelihood_surface<F>(&self, mut f: F) -> Matrix
    where
        F: FnMut(&Model) -> f64,
    {
        let (rows, cols) = self.shape();
        let mut surface = Matrix::zeros(rows, cols);
        for (row, col, model) in self.cells() {
            surface[(row, col)] = f(&model);
        }
        surface
    }
}
