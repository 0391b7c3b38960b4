//! Protein groups and the combinatorial activation state space.
//!
//! Proteins that share an identical peptide-evidence set are statistically
//! indistinguishable: no assignment of the observed evidence can favor one
//! member over another. They are collapsed into a single group node whose
//! state is the number of members hypothesized present, in `0..=size`. The
//! joint state space over all groups in a subgraph is the domain of the
//! partition function; its size is exponential in the number of groups and
//! polynomial in group size, which is why subgraphs must be kept small by
//! partitioning upstream.
//!
//! Serang, 2010 [https://pubmed.ncbi.nlm.nih.gov/20712337/]

use crate::bigraph::{Bigraph, PeptideIx, ProteinIx};
use crate::cache::MemoCache;
use crate::model::{GridModel, Model, ModelKey};
use crate::numeric::log_add;
use crate::sparse::SparseVector;
use crate::Error;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether proteins with identical evidence are collapsed into groups, or
/// every protein stands as its own singleton group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingPolicy {
    #[default]
    Grouped,
    Singletons,
}

/// Activation count of one group: `state` of `size` members present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub size: u32,
    pub state: u32,
}

impl Counter {
    pub fn new(size: u32) -> Self {
        Self { size, state: 0 }
    }

    pub fn active_fraction(&self) -> f64 {
        self.state as f64 / self.size as f64
    }
}

/// Odometer over the Cartesian product of per-group activation counts: a
/// lazy and restartable finite sequence of joint states. The first group
/// advances fastest. A state is handed out as a borrowed slice, so this is
/// a streaming sequence rather than an `Iterator`.
#[derive(Debug, Clone)]
pub struct StateSpace {
    counters: Vec<Counter>,
    fresh: bool,
    exhausted: bool,
}

impl StateSpace {
    pub fn new<I: IntoIterator<Item = u32>>(sizes: I) -> Self {
        Self {
            counters: sizes.into_iter().map(Counter::new).collect(),
            fresh: true,
            exhausted: false,
        }
    }

    pub fn reset(&mut self) {
        for c in self.counters.iter_mut() {
            c.state = 0;
        }
        self.fresh = true;
        self.exhausted = false;
    }

    /// The next joint state, starting from all-zero. An empty product still
    /// has exactly one (empty) state.
    pub fn next_state(&mut self) -> Option<&[Counter]> {
        if self.exhausted {
            return None;
        }
        if self.fresh {
            self.fresh = false;
            return Some(&self.counters);
        }
        for k in 0..self.counters.len() {
            self.counters[k].state += 1;
            if self.counters[k].state <= self.counters[k].size {
                return Some(&self.counters);
            }
            self.counters[k].state = 0;
        }
        self.exhausted = true;
        None
    }

    /// `log2` of the number of joint states.
    pub fn log_len(&self) -> f64 {
        self.counters
            .iter()
            .map(|c| (c.size as f64 + 1.0).log2())
            .sum()
    }
}

/// A pruned subgraph with indistinguishable proteins collapsed into groups,
/// and the probability machinery evaluated over its joint activation states.
#[derive(Debug, Clone)]
pub struct GroupedBigraph {
    peptide_names: Vec<Arc<str>>,
    peptide_weights: Vec<f64>,
    /// Sorted group indices adjacent to each peptide
    peptide_groups: Vec<Vec<u32>>,
    group_names: Vec<Vec<Arc<str>>>,
    group_sizes: Vec<u32>,
    peptide_prior: f64,
    cache: MemoCache<ModelKey, f64>,
}

impl GroupedBigraph {
    /// Collapse the graph's proteins into groups keyed by their exact
    /// peptide-association set. Group order follows first appearance in
    /// protein index order, so the result does not depend on map iteration.
    pub fn new(
        graph: &Bigraph,
        policy: GroupingPolicy,
        peptide_prior: f64,
    ) -> Result<Self, Error> {
        let mut group_of = vec![u32::MAX; graph.protein_count()];
        let mut group_names: Vec<Vec<Arc<str>>> = Vec::new();
        let mut group_sizes: Vec<u32> = Vec::new();

        let mut by_evidence: FnvHashMap<Vec<PeptideIx>, u32> = FnvHashMap::default();
        for k in 0..graph.protein_count() {
            let ix = ProteinIx(k as u32);
            let assoc = graph.protein_associations(ix);
            let name = &graph.protein_names()[k];
            if assoc.is_empty() {
                return Err(Error::OrphanProtein(name.to_string()));
            }
            let group = match policy {
                GroupingPolicy::Singletons => {
                    group_names.push(Vec::new());
                    group_sizes.push(0);
                    (group_names.len() - 1) as u32
                }
                GroupingPolicy::Grouped => {
                    *by_evidence.entry(assoc.to_vec()).or_insert_with(|| {
                        group_names.push(Vec::new());
                        group_sizes.push(0);
                        (group_names.len() - 1) as u32
                    })
                }
            };
            group_of[k] = group;
            group_names[group as usize].push(name.clone());
            group_sizes[group as usize] += 1;
        }

        let peptide_groups = (0..graph.peptide_count())
            .map(|p| {
                let mut groups: Vec<u32> = graph
                    .peptide_associations(PeptideIx(p as u32))
                    .iter()
                    .map(|r| group_of[r.0 as usize])
                    .collect();
                groups.sort_unstable();
                groups.dedup();
                groups
            })
            .collect();

        Ok(Self {
            peptide_names: graph.peptide_names().to_vec(),
            peptide_weights: graph.peptide_weights().to_vec(),
            peptide_groups,
            group_names,
            group_sizes,
            peptide_prior,
            cache: MemoCache::new(),
        })
    }

    pub fn group_count(&self) -> usize {
        self.group_sizes.len()
    }

    pub fn peptide_count(&self) -> usize {
        self.peptide_names.len()
    }

    pub fn peptide_names(&self) -> &[Arc<str>] {
        &self.peptide_names
    }

    pub fn group_names(&self) -> &[Vec<Arc<str>>] {
        &self.group_names
    }

    pub fn group_sizes(&self) -> &[u32] {
        &self.group_sizes
    }

    pub fn max_group_size(&self) -> u32 {
        self.group_sizes.iter().copied().max().unwrap_or(0)
    }

    pub fn state_space(&self) -> StateSpace {
        StateSpace::new(self.group_sizes.iter().copied())
    }

    /// `log2` of the number of joint activation states; the quantity the
    /// partitioning ceiling is measured against.
    pub fn log_config_count(&self) -> f64 {
        self.state_space().log_len()
    }

    /// Total member count over the groups associated with one peptide.
    fn total_associated(&self, pep: usize) -> u32 {
        self.peptide_groups[pep]
            .iter()
            .map(|&g| self.group_sizes[g as usize])
            .sum()
    }

    /// Active member count over the peptide's groups under a joint state.
    fn active_associated(&self, pep: usize, state: &[Counter]) -> u32 {
        self.peptide_groups[pep]
            .iter()
            .map(|&g| state[g as usize].state)
            .sum()
    }

    /// Marginal probability that a peptide is emitted at all (correctly or
    /// spontaneously), with the activation counts integrated out under the
    /// model prior.
    pub fn peptide_emission_probability(&self, m: &Model, pep: usize) -> f64 {
        let total = self.total_associated(pep);
        (0..=total)
            .map(|active| {
                (1.0 - m.no_emission_probability(active)) * m.activation_prior(total, active)
            })
            .sum()
    }

    /// [`Self::peptide_emission_probability`] for every peptide at once.
    pub fn peptide_emission_probabilities(&self, m: &Model) -> Vec<f64> {
        (0..self.peptide_count())
            .map(|pep| self.peptide_emission_probability(m, pep))
            .collect()
    }

    /// One peptide's evidence blended against the model's prediction: the
    /// observed posterior weight re-weighted by how well this activation
    /// state explains it. Degenerate inputs surface as infinities, which
    /// the partition-function consumer reports as a typed error.
    fn likelihood_term(&self, weight: f64, emission: f64) -> f64 {
        let prior = self.peptide_prior;
        weight / prior * emission + (1.0 - weight) / (1.0 - prior) * (1.0 - emission)
    }

    pub fn log_likelihood_given_state(&self, m: &Model, state: &[Counter]) -> f64 {
        (0..self.peptide_count())
            .map(|pep| {
                let active = self.active_associated(pep, state);
                let emission = 1.0 - m.no_emission_probability(active);
                self.likelihood_term(self.peptide_weights[pep], emission).log2()
            })
            .sum()
    }

    fn log_state_prior(&self, m: &Model, state: &[Counter]) -> f64 {
        state
            .iter()
            .map(|c| m.log_activation_prior(c.size, c.state))
            .sum()
    }

    /// The partition function: `log2` of the sum over every joint activation
    /// state of `likelihood * prior`. Memoized per model; this is the single
    /// most expensive computation in the engine.
    pub fn log_partition_function(&mut self, m: &Model) -> f64 {
        let key = m.key();
        if let Some(&cached) = self.cache.get(&key) {
            return cached;
        }
        let value = self.compute_log_partition(m);
        self.cache.insert(key, value);
        value
    }

    fn compute_log_partition(&self, m: &Model) -> f64 {
        let mut space = self.state_space();
        let mut result = f64::NEG_INFINITY;
        while let Some(state) = space.next_state() {
            let term = self.log_likelihood_given_state(m, state) + self.log_state_prior(m, state);
            result = log_add(result, term);
        }
        result
    }

    /// Direct non-log partition function. Only feasible on graphs small
    /// enough to enumerate without underflow; kept as the reference for the
    /// log-stable path.
    pub fn likelihood_constant(&self, m: &Model) -> f64 {
        let mut space = self.state_space();
        let mut result = 0.0;
        while let Some(state) = space.next_state() {
            let likelihood: f64 = (0..self.peptide_count())
                .map(|pep| {
                    let active = self.active_associated(pep, state);
                    let emission = 1.0 - m.no_emission_probability(active);
                    self.likelihood_term(self.peptide_weights[pep], emission)
                })
                .product();
            let prior: f64 = state
                .iter()
                .map(|c| m.activation_prior(c.size, c.state))
                .product();
            result += likelihood * prior;
        }
        result
    }

    /// Fraction of one peptide's blended evidence term owed to genuine
    /// emission rather than the no-emission branch, under a fixed state.
    fn emission_correction(&self, m: &Model, pep: usize, state: &[Counter]) -> f64 {
        let weight = self.peptide_weights[pep];
        let prior = self.peptide_prior;
        let active = self.active_associated(pep, state);
        let emission = 1.0 - m.no_emission_probability(active);
        let term_emitted = weight / prior * emission;
        let term_silent = (1.0 - weight) / (1.0 - prior) * (1.0 - emission);
        term_emitted / (term_emitted + term_silent)
    }

    /// Posterior probability that each peptide was genuinely emitted, given
    /// all of the observed data: the per-state emission correction averaged
    /// under the joint-state posterior.
    pub fn peptide_posteriors(&mut self, m: &Model) -> Result<Vec<f64>, Error> {
        let log_z = self.log_partition_function(m);
        if !log_z.is_finite() {
            return Err(Error::DegeneratePartition {
                log_likelihood: log_z,
            });
        }

        let mut acc = SparseVector::new(self.peptide_count());
        let mut space = self.state_space();
        while let Some(state) = space.next_state() {
            let log_posterior = self.log_likelihood_given_state(m, state)
                + self.log_state_prior(m, state)
                - log_z;
            let weight = log_posterior.exp2();
            if weight == 0.0 {
                continue;
            }
            let corrections = SparseVector::from_pairs(
                self.peptide_count(),
                (0..self.peptide_count()).map(|pep| (pep, self.emission_correction(m, pep, state))),
            );
            acc.add_scaled(weight, &corrections);
        }
        Ok(acc.unpack())
    }

    /// The marginal emission probability of one peptide averaged over every
    /// cell of an (alpha, beta) grid, for consumers that have not yet fixed
    /// the noise parameters.
    pub fn peptide_emission_probability_over_grid(&self, grid: &GridModel, pep: usize) -> f64 {
        let mut total = 0.0;
        let mut cells = 0usize;
        for (_, _, model) in grid.cells() {
            total += self.peptide_emission_probability(&model, pep);
            cells += 1;
        }
        total / cells as f64
    }

    /// Marginal expected active fraction per group: each joint state's
    /// active fraction weighted by its posterior probability. All members of
    /// a group share the value. A non-finite partition function means the
    /// posterior is undefined for this model.
    pub fn group_posteriors(&mut self, m: &Model) -> Result<Vec<f64>, Error> {
        let log_z = self.log_partition_function(m);
        if !log_z.is_finite() {
            return Err(Error::DegeneratePartition {
                log_likelihood: log_z,
            });
        }

        let mut acc = SparseVector::new(self.group_count());
        let mut space = self.state_space();
        while let Some(state) = space.next_state() {
            let log_posterior = self.log_likelihood_given_state(m, state)
                + self.log_state_prior(m, state)
                - log_z;
            let weight = log_posterior.exp2();
            if weight == 0.0 {
                continue;
            }
            let fractions = SparseVector::from_pairs(
                state.len(),
                state
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.state > 0)
                    .map(|(g, c)| (g, c.active_fraction())),
            );
            acc.add_scaled(weight, &fractions);
        }
        Ok(acc.unpack())
    }
}
