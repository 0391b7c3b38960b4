//! The peptide/protein bipartite evidence graph.
//!
//! Nodes live in two owned arenas addressed by integer index; the edge
//! relation is stored symmetrically (each peptide lists its proteins, each
//! protein lists its peptides) and that symmetry must hold after every
//! mutation. Pruning, connected-component ("section") marking and
//! boundary-peptide cloning all happen here; everything probabilistic lives
//! downstream in [`crate::grouping`].

use crate::sparse::SparseVector;
use crate::Error;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One scored peptide-spectrum match from the external scoring pipeline.
#[derive(Debug, Clone)]
pub struct ScoredPsm {
    /// Peptide sequence, possibly with flanking-residue markers (`K.PEPK.R`)
    pub peptide: String,
    /// Identifiers of every protein this peptide maps to
    pub proteins: Vec<Arc<str>>,
    /// Posterior error probability assigned by the scoring pipeline
    pub posterior_error: f64,
    pub decoy: bool,
}

/// Whether a decoy PSM whose cleaved sequence collides with a target peptide
/// shares that peptide's node or gets its own. Affects downstream node and
/// component counts, so it is the caller's choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoyPolicy {
    #[default]
    Shared,
    Distinct,
}

/// Pruning thresholds for the three node classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// PSMs below this weight are disconnected outright
    pub psm: f64,
    /// Peptides at or below this weight stop section traversal (and may be
    /// cloned across section boundaries)
    pub peptide: f64,
    /// Proteins whose best remaining peptide weight is below this are severed
    pub protein: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            psm: 0.0,
            peptide: 1e-3,
            protein: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeptideIx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProteinIx(pub u32);

#[derive(Debug, Clone, Default)]
struct PeptideLayer {
    names: Vec<Arc<str>>,
    assoc: Vec<Vec<ProteinIx>>,
    weights: Vec<f64>,
    sections: Vec<Option<u32>>,
    /// Sections that reached this peptide during traversal; more than one
    /// entry is possible only for boundary (at-or-below-threshold) peptides
    marks: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Default)]
struct ProteinLayer {
    names: Vec<Arc<str>>,
    assoc: Vec<Vec<PeptideIx>>,
    sections: Vec<Option<u32>>,
}

#[derive(Debug, Clone, Default)]
pub struct Bigraph {
    peptides: PeptideLayer,
    proteins: ProteinLayer,
    pub thresholds: Thresholds,
    /// Proteins left with zero peptide edges by the most recent prune
    pub severed: Vec<Arc<str>>,
    /// Extra copies introduced by the most recent prune's boundary-peptide
    /// cloning; feeds the partition-function correction
    pub clone_count: usize,
}

fn insert_sorted<T: Ord>(set: &mut Vec<T>, x: T) {
    if let Err(pos) = set.binary_search(&x) {
        set.insert(pos, x);
    }
}

fn remove_sorted<T: Ord>(set: &mut Vec<T>, x: &T) {
    if let Ok(pos) = set.binary_search(x) {
        set.remove(pos);
    }
}

/// Strip flanking-residue markers: `K.PEPTIDEK.R` -> `PEPTIDEK`.
fn cleave_flanking(seq: &str) -> &str {
    let b = seq.as_bytes();
    if b.len() >= 5 && b[1] == b'.' && b[b.len() - 2] == b'.' {
        &seq[2..seq.len() - 2]
    } else {
        seq
    }
}

impl Bigraph {
    /// Build the raw graph from scored PSMs.
    ///
    /// The peptide node's weight is the maximum observed `1 - posterior_error`
    /// across duplicate observations. A PSM with no protein associations is a
    /// data error: its evidence is unattributable and would corrupt component
    /// counts downstream.
    pub fn from_psms(psms: &[ScoredPsm], decoys: DecoyPolicy) -> Result<Self, Error> {
        let mut graph = Bigraph::default();
        let mut pep_table: FnvHashMap<Arc<str>, PeptideIx> = FnvHashMap::default();
        let mut prot_table: FnvHashMap<Arc<str>, ProteinIx> = FnvHashMap::default();

        for psm in psms {
            if psm.proteins.is_empty() {
                return Err(Error::OrphanPeptide(psm.peptide.clone()));
            }

            let seq = cleave_flanking(&psm.peptide);
            let key: Arc<str> = match decoys {
                DecoyPolicy::Distinct if psm.decoy => Arc::from(format!("{}#decoy", seq)),
                _ => Arc::from(seq),
            };

            let pep = match pep_table.get(&key) {
                Some(&ix) => ix,
                None => {
                    let ix = PeptideIx(graph.peptides.names.len() as u32);
                    graph.peptides.names.push(key.clone());
                    graph.peptides.assoc.push(Vec::new());
                    graph.peptides.weights.push(0.0);
                    graph.peptides.sections.push(None);
                    graph.peptides.marks.push(Vec::new());
                    pep_table.insert(key, ix);
                    ix
                }
            };

            for name in &psm.proteins {
                let prot = match prot_table.get(name) {
                    Some(&ix) => ix,
                    None => {
                        let ix = ProteinIx(graph.proteins.names.len() as u32);
                        graph.proteins.names.push(name.clone());
                        graph.proteins.assoc.push(Vec::new());
                        graph.proteins.sections.push(None);
                        prot_table.insert(name.clone(), ix);
                        ix
                    }
                };
                insert_sorted(&mut graph.peptides.assoc[pep.0 as usize], prot);
                insert_sorted(&mut graph.proteins.assoc[prot.0 as usize], pep);
            }

            let weight = (1.0 - psm.posterior_error).clamp(0.0, 1.0);
            let w = &mut graph.peptides.weights[pep.0 as usize];
            *w = w.max(weight);
        }

        log::debug!(
            "read evidence graph: {} peptides, {} proteins, {} edges",
            graph.peptide_count(),
            graph.protein_count(),
            graph.edge_count()
        );
        debug_assert!(graph.is_symmetric());
        Ok(graph)
    }

    pub fn peptide_count(&self) -> usize {
        self.peptides.names.len()
    }

    pub fn protein_count(&self) -> usize {
        self.proteins.names.len()
    }

    pub fn edge_count(&self) -> usize {
        self.peptides.assoc.iter().map(Vec::len).sum()
    }

    pub fn peptide_names(&self) -> &[Arc<str>] {
        &self.peptides.names
    }

    pub fn peptide_weights(&self) -> &[f64] {
        &self.peptides.weights
    }

    pub fn peptide_associations(&self, ix: PeptideIx) -> &[ProteinIx] {
        &self.peptides.assoc[ix.0 as usize]
    }

    pub fn protein_names(&self) -> &[Arc<str>] {
        &self.proteins.names
    }

    pub fn protein_associations(&self, ix: ProteinIx) -> &[PeptideIx] {
        &self.proteins.assoc[ix.0 as usize]
    }

    pub fn max_peptide_weight(&self) -> f64 {
        self.peptides
            .weights
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Edge symmetry: `protein in peptide.assoc <=> peptide in protein.assoc`.
    pub fn is_symmetric(&self) -> bool {
        self.peptides.assoc.iter().enumerate().all(|(p, prots)| {
            prots.iter().all(|r| {
                self.proteins.assoc[r.0 as usize]
                    .binary_search(&PeptideIx(p as u32))
                    .is_ok()
            })
        }) && self.proteins.assoc.iter().enumerate().all(|(r, peps)| {
            peps.iter().all(|p| {
                self.peptides.assoc[p.0 as usize]
                    .binary_search(&ProteinIx(r as u32))
                    .is_ok()
            })
        })
    }

    /// Disconnect weak nodes and record severed proteins, then split
    /// boundary peptides and compact the arenas.
    pub fn prune(&mut self) {
        self.remove_poor_psms();
        self.remove_poor_proteins();
        self.save_severed();
        self.reindex();
        self.mark_sections();
        self.clone_marked();
        self.reindex();
        log::debug!(
            "pruned graph: {} peptides, {} proteins, {} severed, {} clones",
            self.peptide_count(),
            self.protein_count(),
            self.severed.len(),
            self.clone_count
        );
        debug_assert!(self.is_symmetric());
    }

    fn disconnect_peptide(&mut self, k: usize) {
        let assoc = std::mem::take(&mut self.peptides.assoc[k]);
        for r in assoc {
            remove_sorted(&mut self.proteins.assoc[r.0 as usize], &PeptideIx(k as u32));
        }
    }

    fn disconnect_protein(&mut self, k: usize) {
        let assoc = std::mem::take(&mut self.proteins.assoc[k]);
        for p in assoc {
            remove_sorted(&mut self.peptides.assoc[p.0 as usize], &ProteinIx(k as u32));
        }
    }

    fn remove_poor_psms(&mut self) {
        for k in 0..self.peptide_count() {
            if self.peptides.weights[k] < self.thresholds.psm {
                self.disconnect_peptide(k);
            }
        }
    }

    fn remove_poor_proteins(&mut self) {
        for k in 0..self.protein_count() {
            let weights = SparseVector::from_pairs(
                self.proteins.assoc[k].len(),
                self.proteins.assoc[k]
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, self.peptides.weights[p.0 as usize])),
            );
            if weights.max() < self.thresholds.protein {
                self.disconnect_protein(k);
            }
        }
    }

    fn save_severed(&mut self) {
        self.severed = self
            .proteins
            .assoc
            .iter()
            .zip(&self.proteins.names)
            .filter(|(assoc, _)| assoc.is_empty())
            .map(|(_, name)| name.clone())
            .collect();
    }

    /// Drop disconnected nodes and renumber the survivors. Severed proteins,
    /// the clone count and the thresholds survive compaction.
    fn reindex(&mut self) {
        let keep_peps: Vec<usize> = (0..self.peptide_count())
            .filter(|&k| !self.peptides.assoc[k].is_empty())
            .collect();
        let keep_prots: Vec<usize> = (0..self.protein_count())
            .filter(|&k| !self.proteins.assoc[k].is_empty())
            .collect();

        let mut pep_map = vec![u32::MAX; self.peptide_count()];
        for (new, &old) in keep_peps.iter().enumerate() {
            pep_map[old] = new as u32;
        }
        let mut prot_map = vec![u32::MAX; self.protein_count()];
        for (new, &old) in keep_prots.iter().enumerate() {
            prot_map[old] = new as u32;
        }

        let mut peptides = PeptideLayer::default();
        for &old in &keep_peps {
            peptides.names.push(self.peptides.names[old].clone());
            peptides.assoc.push(
                self.peptides.assoc[old]
                    .iter()
                    .map(|r| ProteinIx(prot_map[r.0 as usize]))
                    .collect(),
            );
            peptides.weights.push(self.peptides.weights[old]);
            peptides.sections.push(self.peptides.sections[old]);
            peptides.marks.push(self.peptides.marks[old].clone());
        }

        let mut proteins = ProteinLayer::default();
        for &old in &keep_prots {
            proteins.names.push(self.proteins.names[old].clone());
            proteins.assoc.push(
                self.proteins.assoc[old]
                    .iter()
                    .map(|p| PeptideIx(pep_map[p.0 as usize]))
                    .collect(),
            );
            proteins.sections.push(self.proteins.sections[old]);
        }

        self.peptides = peptides;
        self.proteins = proteins;
    }

    /// Mark connected components, seeded per protein. Traversal does not
    /// expand through peptides at or below the peptide threshold: those are
    /// marked by every touching section but join none, which is what later
    /// makes them cloneable boundaries. Returns the number of sections.
    pub fn mark_sections(&mut self) -> usize {
        self.peptides.sections = vec![None; self.peptide_count()];
        self.peptides.marks = vec![Vec::new(); self.peptide_count()];
        self.proteins.sections = vec![None; self.protein_count()];

        enum Node {
            Protein(usize),
            Peptide(usize),
        }

        let mut section = 0u32;
        let mut stack = Vec::new();
        for seed in 0..self.protein_count() {
            if self.proteins.sections[seed].is_some() {
                continue;
            }
            stack.push(Node::Protein(seed));
            while let Some(node) = stack.pop() {
                match node {
                    Node::Protein(k) => {
                        if self.proteins.sections[k] == Some(section) {
                            continue;
                        }
                        self.proteins.sections[k] = Some(section);
                        stack.extend(
                            self.proteins.assoc[k]
                                .iter()
                                .map(|p| Node::Peptide(p.0 as usize)),
                        );
                    }
                    Node::Peptide(k) => {
                        if self.peptides.sections[k] == Some(section) {
                            continue;
                        }
                        self.peptides.sections[k] = Some(section);
                        insert_sorted(&mut self.peptides.marks[k], section);
                        if self.peptides.weights[k] <= self.thresholds.peptide {
                            continue;
                        }
                        stack.extend(
                            self.peptides.assoc[k]
                                .iter()
                                .map(|r| Node::Protein(r.0 as usize)),
                        );
                    }
                }
            }
            section += 1;
        }
        section as usize
    }

    /// Split every peptide marked by more than one section into one copy per
    /// touching section, each inheriting only that section's protein edges.
    fn clone_marked(&mut self) {
        self.clone_count = 0;
        let n = self.peptide_count();
        for k in 0..n {
            if self.peptides.marks[k].len() > 1 {
                self.clone_peptide(k);
            }
        }
    }

    fn clone_peptide(&mut self, k: usize) {
        // bucket the peptide's proteins by their section
        let mut sections: Vec<u32> = Vec::new();
        let mut buckets: Vec<Vec<ProteinIx>> = Vec::new();
        for &r in &self.peptides.assoc[k] {
            let sect = self.proteins.sections[r.0 as usize]
                .expect("sections must be marked before cloning");
            match sections.binary_search(&sect) {
                Ok(pos) => buckets[pos].push(r),
                Err(pos) => {
                    sections.insert(pos, sect);
                    buckets.insert(pos, vec![r]);
                }
            }
        }

        let base_name = self.peptides.names[k].clone();
        let weight = self.peptides.weights[k];
        for (sect, bucket) in sections.iter().zip(buckets.iter()) {
            let copy = PeptideIx(self.peptide_count() as u32);
            self.peptides
                .names
                .push(Arc::from(format!("{}#clone{}", base_name, sect)));
            self.peptides.assoc.push(bucket.clone());
            self.peptides.weights.push(weight);
            self.peptides.sections.push(Some(*sect));
            self.peptides.marks.push(vec![*sect]);

            for r in bucket {
                let assoc = &mut self.proteins.assoc[r.0 as usize];
                remove_sorted(assoc, &PeptideIx(k as u32));
                insert_sorted(assoc, copy);
            }
        }

        self.peptides.assoc[k].clear();
        self.clone_count += sections.len() - 1;
    }

    /// Decompose into one independent subgraph per section. Sections are
    /// re-marked first so the result reflects the current topology.
    pub fn partition_sections(&mut self) -> Vec<Bigraph> {
        let count = self.mark_sections();

        let mut prot_subsets: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut pep_subsets: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (k, sect) in self.proteins.sections.iter().enumerate() {
            if let Some(s) = sect {
                prot_subsets[*s as usize].push(k);
            }
        }
        for (k, sect) in self.peptides.sections.iter().enumerate() {
            if let Some(s) = sect {
                pep_subsets[*s as usize].push(k);
            }
        }

        prot_subsets
            .iter()
            .zip(pep_subsets.iter())
            .map(|(prots, peps)| self.subgraph(prots, peps))
            .collect()
    }

    /// Extract the induced subgraph on the given (sorted, old-index) node
    /// subsets, remapping edges to the new dense indices.
    fn subgraph(&self, prots: &[usize], peps: &[usize]) -> Bigraph {
        let mut pep_map = vec![u32::MAX; self.peptide_count()];
        for (new, &old) in peps.iter().enumerate() {
            pep_map[old] = new as u32;
        }
        let mut prot_map = vec![u32::MAX; self.protein_count()];
        for (new, &old) in prots.iter().enumerate() {
            prot_map[old] = new as u32;
        }

        let mut out = Bigraph {
            thresholds: self.thresholds,
            ..Bigraph::default()
        };
        for &old in peps {
            out.peptides.names.push(self.peptides.names[old].clone());
            out.peptides.assoc.push(
                self.peptides.assoc[old]
                    .iter()
                    .map(|r| ProteinIx(prot_map[r.0 as usize]))
                    .collect(),
            );
            out.peptides.weights.push(self.peptides.weights[old]);
            out.peptides.sections.push(self.peptides.sections[old]);
            out.peptides.marks.push(self.peptides.marks[old].clone());
        }
        for &old in prots {
            out.proteins.names.push(self.proteins.names[old].clone());
            out.proteins.assoc.push(
                self.proteins.assoc[old]
                    .iter()
                    .map(|p| PeptideIx(pep_map[p.0 as usize]))
                    .collect(),
            );
            out.proteins.sections.push(self.proteins.sections[old]);
        }
        debug_assert!(out.is_symmetric());
        out
    }
}

impl std::fmt::Display for Bigraph {
    /// Both layers with their adjacency, one node per line. Intended for
    /// debugging small graphs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "peptides:")?;
        for (k, name) in self.peptides.names.iter().enumerate() {
            let neighbors: Vec<&str> = self.peptides.assoc[k]
                .iter()
                .map(|r| &*self.proteins.names[r.0 as usize])
                .collect();
            writeln!(
                f,
                "  {} ({:.4}) -> {}",
                name,
                self.peptides.weights[k],
                neighbors.join(" ")
            )?;
        }
        writeln!(f, "proteins:")?;
        for (k, name) in self.proteins.names.iter().enumerate() {
            let neighbors: Vec<&str> = self.proteins.assoc[k]
                .iter()
                .map(|p| &*self.peptides.names[p.0 as usize])
                .collect();
            writeln!(f, "  {} -> {}", name, neighbors.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn psm(peptide: &str, proteins: &[&str], pep_err: f64) -> ScoredPsm {
        ScoredPsm {
            peptide: peptide.into(),
            proteins: proteins.iter().map(|s| Arc::from(*s)).collect(),
            posterior_error: pep_err,
            decoy: false,
        }
    }

    #[test]
    fn flanking_residues_are_cleaved() {
        assert_eq!(cleave_flanking("K.PEPTIDEK.R"), "PEPTIDEK");
        assert_eq!(cleave_flanking("-.PEPTIDEK.-"), "PEPTIDEK");
        assert_eq!(cleave_flanking("PEPTIDEK"), "PEPTIDEK");
        assert_eq!(cleave_flanking("A.B"), "A.B");
    }

    #[test]
    fn duplicate_observations_keep_max_weight() {
        let graph = Bigraph::from_psms(
            &[
                psm("K.AAAK.R", &["P1"], 0.4),
                psm("R.AAAK.K", &["P1"], 0.1),
                psm("AAAK", &["P1"], 0.7),
            ],
            DecoyPolicy::Shared,
        )
        .unwrap();
        assert_eq!(graph.peptide_count(), 1);
        assert!((graph.peptide_weights()[0] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn decoy_policy_splits_nodes() {
        let target = psm("AAAK", &["P1"], 0.1);
        let decoy = {
            let mut d = psm("AAAK", &["rev_P1"], 0.5);
            d.decoy = true;
            d
        };

        let shared =
            Bigraph::from_psms(&[target.clone(), decoy.clone()], DecoyPolicy::Shared).unwrap();
        assert_eq!(shared.peptide_count(), 1);

        let split = Bigraph::from_psms(&[target, decoy], DecoyPolicy::Distinct).unwrap();
        assert_eq!(split.peptide_count(), 2);
    }

    #[test]
    fn orphan_peptide_is_an_error() {
        let err = Bigraph::from_psms(&[psm("AAAK", &[], 0.1)], DecoyPolicy::Shared).unwrap_err();
        assert!(matches!(err, Error::OrphanPeptide(_)));
    }

    #[test]
    fn prune_severs_weak_proteins() {
        // P2's only peptide is far below the protein threshold
        let mut graph = Bigraph::from_psms(
            &[psm("AAAK", &["P1"], 0.05), psm("CCCK", &["P2"], 0.9999)],
            DecoyPolicy::Shared,
        )
        .unwrap();
        graph.prune();
        assert_eq!(graph.protein_count(), 1);
        assert_eq!(graph.peptide_count(), 1);
        assert_eq!(graph.severed.len(), 1);
        assert_eq!(&*graph.severed[0], "P2");
    }

    #[test]
    fn sections_split_independent_evidence() {
        let mut graph = Bigraph::from_psms(
            &[
                psm("AAAK", &["P1", "P2"], 0.1),
                psm("CCCK", &["P2"], 0.2),
                psm("DDDK", &["P3"], 0.1),
            ],
            DecoyPolicy::Shared,
        )
        .unwrap();
        graph.prune();
        let parts = graph.partition_sections();
        assert_eq!(parts.len(), 2);
        let mut sizes: Vec<(usize, usize)> = parts
            .iter()
            .map(|g| (g.protein_count(), g.peptide_count()))
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![(1, 1), (2, 2)]);
        for part in &parts {
            assert!(part.is_symmetric());
        }
    }

    #[test]
    fn boundary_peptide_is_cloned_per_section() {
        // ZZZK carries no usable weight and bridges two otherwise
        // independent sections; it must be split, one copy per section
        let mut graph = Bigraph::from_psms(
            &[
                psm("AAAK", &["P1"], 0.1),
                psm("CCCK", &["P2"], 0.2),
                psm("ZZZK", &["P1", "P2"], 1.0),
            ],
            DecoyPolicy::Shared,
        )
        .unwrap();
        graph.prune();
        assert_eq!(graph.clone_count, 1);
        assert_eq!(graph.peptide_count(), 4);
        let parts = graph.partition_sections();
        assert_eq!(parts.len(), 2);
        for part in &parts {
            assert_eq!(part.protein_count(), 1);
            assert_eq!(part.peptide_count(), 2);
        }
    }

    #[test]
    fn psm_threshold_disconnects_outright() {
        let mut graph = Bigraph::from_psms(
            &[
                psm("AAAK", &["P1"], 0.1),
                psm("CCCK", &["P1"], 0.8),
                psm("DDDK", &["P2"], 0.9),
            ],
            DecoyPolicy::Shared,
        )
        .unwrap();
        graph.thresholds.psm = 0.5;
        graph.prune();
        // CCCK (0.2) and DDDK (0.1) fall below the PSM cutoff; P2 loses all
        // of its evidence and is severed
        assert_eq!(graph.peptide_count(), 1);
        assert_eq!(graph.protein_count(), 1);
        assert_eq!(graph.severed.len(), 1);
        assert_eq!(&*graph.severed[0], "P2");
    }

    #[test]
    fn display_lists_both_layers() {
        let graph = Bigraph::from_psms(
            &[psm("AAAK", &["P1", "P2"], 0.25)],
            DecoyPolicy::Shared,
        )
        .unwrap();
        let text = graph.to_string();
        assert!(text.contains("AAAK (0.7500) -> P1 P2"));
        assert!(text.contains("P1 -> AAAK"));
        assert!(text.contains("P2 -> AAAK"));
    }

    #[test]
    fn high_weight_shared_peptide_is_not_cloned() {
        let mut graph = Bigraph::from_psms(
            &[
                psm("AAAK", &["P1"], 0.1),
                psm("CCCK", &["P2"], 0.2),
                psm("ZZZK", &["P1", "P2"], 0.5),
            ],
            DecoyPolicy::Shared,
        )
        .unwrap();
        graph.prune();
        assert_eq!(graph.clone_count, 0);
        let parts = graph.partition_sections();
        assert_eq!(parts.len(), 1);
    }
}
