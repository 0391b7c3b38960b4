//! The inference orchestrator.
//!
//! Builds the evidence graph and partitions it into probabilistically
//! independent subgraphs small enough to enumerate. The group-level marginal
//! computation runs on each subgraph independently and the results are
//! aggregated into one ranked posterior list.
//! The adaptive re-partitioning loop is the hard bound on runtime: a
//! subgraph whose joint state space exceeds the configured ceiling is
//! re-pruned at an escalating peptide threshold until it fragments, at the
//! price of coarser resolution in dense regions.

use crate::bigraph::{Bigraph, DecoyPolicy, ScoredPsm, Thresholds};
use crate::grouping::{GroupedBigraph, GroupingPolicy};
use crate::model::Model;
use crate::numeric::{log_add, Precision};
use crate::Error;
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Everything tunable about a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub thresholds: Thresholds,
    /// Prior probability that any one peptide is present in the sample
    pub peptide_prior: f64,
    /// Ceiling on `log2(number of joint activation states)` per subgraph
    pub max_log_states: f64,
    pub grouping: GroupingPolicy,
    pub decoys: DecoyPolicy,
    /// Tolerance for treating float overshoot of the [0, 1] probability
    /// range as rounding noise
    pub precision: Precision,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            beta: 0.01,
            gamma: 0.5,
            thresholds: Thresholds::default(),
            peptide_prior: 0.1,
            max_log_states: 18.0,
            grouping: GroupingPolicy::default(),
            decoys: DecoyPolicy::default(),
            precision: Precision::default(),
        }
    }
}

impl Params {
    pub fn model(&self) -> Model {
        Model::new(self.alpha, self.beta, self.gamma)
    }
}

/// One reported entry: a group of indistinguishable proteins and their
/// shared posterior presence probability.
#[derive(Debug, Clone)]
pub struct GroupPosterior {
    pub names: Vec<Arc<str>>,
    pub probability: f64,
}

impl GroupPosterior {
    pub fn name(&self) -> String {
        self.names.iter().join("/")
    }
}

#[derive(Debug, Clone)]
pub struct Posteriors {
    /// Descending by probability
    pub groups: Vec<GroupPosterior>,
    /// Proteins with zero surviving evidence; never entered the
    /// combinatorial state space and carry no posterior
    pub severed: Vec<Arc<str>>,
}

pub struct InferenceEngine {
    subgraphs: Vec<GroupedBigraph>,
    severed: Vec<Arc<str>>,
    clone_count: usize,
    model: Model,
    precision: Precision,
}

/// Repair rounding overshoot of the probability range; anything that is not
/// rounding noise is a degenerate computation the caller must see.
fn finalize_probability(p: f64, precision: Precision) -> Result<f64, Error> {
    if !p.is_finite() {
        return Err(Error::DegeneratePartition {
            log_likelihood: f64::NAN,
        });
    }
    debug_assert!(
        precision.is_nonneg(p) && precision.is_nonneg(1.0 - p),
        "probability {} exceeds rounding tolerance",
        p
    );
    Ok(p.clamp(0.0, 1.0))
}

impl InferenceEngine {
    /// Read, prune and partition the evidence graph, re-partitioning any
    /// section whose state space exceeds the ceiling.
    pub fn build(psms: &[ScoredPsm], params: &Params) -> Result<Self, Error> {
        let start = Instant::now();
        let mut graph = Bigraph::from_psms(psms, params.decoys)?;
        graph.thresholds = params.thresholds;

        let mut severed: Vec<Arc<str>> = Vec::new();
        let mut clone_count = 0;
        let mut accepted: Vec<GroupedBigraph> = Vec::new();

        let mut work = vec![(graph, params.thresholds.peptide)];
        while let Some((mut subgraph, threshold)) = work.pop() {
            subgraph.thresholds.peptide = threshold;
            subgraph.prune();
            severed.extend(subgraph.severed.drain(..));
            clone_count += subgraph.clone_count;

            for section in subgraph.partition_sections() {
                let grouped =
                    GroupedBigraph::new(&section, params.grouping, params.peptide_prior)?;
                let log_states = grouped.log_config_count();

                if log_states <= params.max_log_states {
                    accepted.push(grouped);
                } else if (grouped.peptide_count() as f64).log2()
                    + (grouped.max_group_size() as f64 + 1.0).log2()
                    <= params.max_log_states
                {
                    // a finer partition can still meet the ceiling
                    work.push((section, 1.25 * (threshold + 1e-6)));
                } else if threshold < section.max_peptide_weight() {
                    // fragment as far as the evidence allows
                    let max_weight = section.max_peptide_weight();
                    work.push((section, max_weight));
                } else {
                    // maximally pruned and still over the ceiling
                    return Err(Error::StateSpaceOverflow {
                        log_states,
                        limit: params.max_log_states,
                    });
                }
            }
        }

        let engine = Self {
            subgraphs: accepted,
            severed,
            clone_count,
            model: params.model(),
            precision: params.precision,
        };
        info!(
            "partitioned evidence into {} subgraphs holding 2^{:.1} joint states \
             ({} severed proteins, {} peptide clones) in {}ms",
            engine.subgraphs.len(),
            engine.log_state_count(),
            engine.severed.len(),
            engine.clone_count,
            start.elapsed().as_millis()
        );
        Ok(engine)
    }

    /// `log2` of the total number of joint activation states across all
    /// subgraphs.
    pub fn log_state_count(&self) -> f64 {
        self.subgraphs
            .iter()
            .fold(f64::NEG_INFINITY, |acc, g| log_add(acc, g.log_config_count()))
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Swap model parameters for the next query; cached per-model partition
    /// functions for earlier parameters stay valid.
    pub fn set_model(&mut self, model: Model) {
        self.model = model;
    }

    pub fn subgraphs(&self) -> &[GroupedBigraph] {
        &self.subgraphs
    }

    /// Every surviving peptide's graph key, concatenated in subgraph order.
    pub fn peptide_names(&self) -> Vec<Arc<str>> {
        self.subgraphs
            .iter()
            .flat_map(|g| g.peptide_names().iter().cloned())
            .collect()
    }

    pub fn severed(&self) -> &[Arc<str>] {
        &self.severed
    }

    pub fn clone_count(&self) -> usize {
        self.clone_count
    }

    /// Marginal posterior per protein group under the current model, ranked
    /// descending. Subgraphs share no nodes and are evaluated in parallel.
    pub fn posteriors(&mut self) -> Result<Posteriors, Error> {
        let start = Instant::now();
        let model = self.model;

        let per_subgraph: Result<Vec<Vec<f64>>, Error> = self
            .subgraphs
            .par_iter_mut()
            .map(|g| g.group_posteriors(&model))
            .collect();
        let per_subgraph = per_subgraph?;

        let precision = self.precision;
        let mut groups = Vec::new();
        for (g, probs) in self.subgraphs.iter().zip(per_subgraph) {
            for (names, p) in g.group_names().iter().zip(probs) {
                groups.push(GroupPosterior {
                    names: names.clone(),
                    probability: finalize_probability(p, precision)?,
                });
            }
        }
        groups.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        info!(
            "computed {} group posteriors over {} subgraphs in {}ms",
            groups.len(),
            self.subgraphs.len(),
            start.elapsed().as_millis()
        );

        Ok(Posteriors {
            groups,
            severed: self.severed.clone(),
        })
    }

    /// Posterior probability that each peptide was genuinely emitted, in
    /// subgraph order, paired with the peptide's graph key (clone copies
    /// keep their derived names).
    pub fn peptide_posteriors(&mut self) -> Result<Vec<(Arc<str>, f64)>, Error> {
        let model = self.model;
        let per_subgraph: Result<Vec<Vec<f64>>, Error> = self
            .subgraphs
            .par_iter_mut()
            .map(|g| g.peptide_posteriors(&model))
            .collect();
        let per_subgraph = per_subgraph?;

        let precision = self.precision;
        let mut peptides = Vec::new();
        for (g, probs) in self.subgraphs.iter().zip(per_subgraph) {
            for (name, p) in g.peptide_names().iter().zip(probs) {
                peptides.push((name.clone(), finalize_probability(p, precision)?));
            }
        }
        Ok(peptides)
    }

    /// Joint log2-likelihood of the observed evidence under `model`: the sum
    /// of per-subgraph partition functions, corrected for the peptides
    /// duplicated by boundary cloning (each clone would otherwise count its
    /// spontaneous-emission term once per copy). This is the quantity an
    /// external hyperparameter search evaluates repeatedly.
    pub fn log_likelihood(&mut self, model: &Model) -> Result<f64, Error> {
        let m = *model;
        let total: f64 = self
            .subgraphs
            .par_iter_mut()
            .map(|g| g.log_partition_function(&m))
            .sum();

        if !total.is_finite() {
            return Err(Error::DegeneratePartition {
                log_likelihood: total,
            });
        }
        Ok(total - self.clone_count as f64 * (1.0 - m.beta).log2())
    }
}
