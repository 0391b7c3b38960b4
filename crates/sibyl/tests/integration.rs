//! End-to-end properties of the inference engine: closed-form agreement on
//! enumerable graphs, grouping and partitioning invariants, and behavior of
//! the posterior under parameter changes.

use quickcheck_macros::quickcheck;
use sibyl_core::bigraph::{Bigraph, ScoredPsm, Thresholds};
use sibyl_core::inference::{InferenceEngine, Params};
use sibyl_core::model::Model;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn psm(peptide: &str, proteins: &[&str], pep_err: f64) -> ScoredPsm {
    ScoredPsm {
        peptide: peptide.into(),
        proteins: proteins.iter().map(|s| Arc::from(*s)).collect(),
        posterior_error: pep_err,
        decoy: false,
    }
}

fn posterior_by_name(engine: &mut InferenceEngine) -> HashMap<String, f64> {
    engine
        .posteriors()
        .unwrap()
        .groups
        .into_iter()
        .map(|g| (g.name(), g.probability))
        .collect()
}

#[test]
fn single_protein_matches_closed_form_bayes() {
    // Scenario A: one protein, one peptide with weight 0.9
    let (w, alpha, beta, gamma, prior) = (0.9, 0.1, 0.01, 0.5, 0.1);
    let params = Params {
        alpha,
        beta,
        gamma,
        peptide_prior: prior,
        ..Params::default()
    };
    let mut engine = InferenceEngine::build(&[psm("AAAK", &["P1"], 1.0 - w)], &params).unwrap();
    let posteriors = engine.posteriors().unwrap();
    assert_eq!(posteriors.groups.len(), 1);

    // two-state Bayes over the same evidence blend
    let term = |e: f64| w / prior * e + (1.0 - w) / (1.0 - prior) * (1.0 - e);
    let e_inactive = 1.0 - (1.0 - beta);
    let e_active = 1.0 - (1.0 - beta) * (1.0 - alpha);
    let joint0 = term(e_inactive) * (1.0 - gamma);
    let joint1 = term(e_active) * gamma;
    let expected = joint1 / (joint0 + joint1);

    assert!(
        (posteriors.groups[0].probability - expected).abs() < 1e-12,
        "engine {} vs closed form {}",
        posteriors.groups[0].probability,
        expected
    );
}

#[test]
fn indistinguishable_proteins_share_one_group_and_probability() {
    // Scenario B: two proteins with 100% shared peptide evidence
    let psms = vec![
        psm("AAAK", &["P1", "P2"], 0.1),
        psm("CCCK", &["P1", "P2"], 0.2),
        psm("DDDK", &["P1", "P2"], 0.15),
    ];
    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();
    let posteriors = engine.posteriors().unwrap();

    assert_eq!(posteriors.groups.len(), 1);
    let group = &posteriors.groups[0];
    assert_eq!(group.names.len(), 2);
    assert_eq!(group.name(), "P1/P2");
    assert!((0.0..=1.0).contains(&group.probability));
}

#[test]
fn fully_subthreshold_protein_is_only_severed() {
    // Scenario C: all of GHOST's peptides fall below the pruning threshold
    let psms = vec![
        psm("AAAK", &["P1"], 0.1),
        psm("CCCK", &["GHOST"], 0.9995),
        psm("DDDK", &["GHOST"], 0.9999),
    ];
    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();
    let posteriors = engine.posteriors().unwrap();

    assert_eq!(posteriors.severed, vec![Arc::from("GHOST")]);
    assert!(posteriors.groups.iter().all(|g| g.name() != "GHOST"));
    for subgraph in engine.subgraphs() {
        assert!(subgraph
            .group_names()
            .iter()
            .flatten()
            .all(|name| &**name != "GHOST"));
    }
}

#[test]
fn posterior_is_monotone_in_gamma() {
    // Scenario D: raising the prior must never lower a reported probability
    let psms = vec![
        psm("AAAK", &["P1", "P2"], 0.1),
        psm("CCCK", &["P2", "P3"], 0.3),
        psm("DDDK", &["P3"], 0.2),
        psm("EEEK", &["P4"], 0.5),
    ];
    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();

    let mut previous: Option<HashMap<String, f64>> = None;
    for gamma in [0.1, 0.3, 0.5, 0.7, 0.9] {
        engine.set_model(Model::new(0.1, 0.01, gamma));
        let current = posterior_by_name(&mut engine);
        if let Some(prev) = &previous {
            for (name, p) in &current {
                let q = prev[name];
                assert!(
                    *p >= q - 1e-9,
                    "{} dropped from {} to {} as gamma rose",
                    name,
                    q,
                    p
                );
            }
        }
        previous = Some(current);
    }
}

#[test]
fn grouping_is_permutation_invariant() {
    let mut psms = vec![
        psm("AAAK", &["P1", "P2"], 0.1),
        psm("CCCK", &["P1", "P2"], 0.2),
        psm("DDDK", &["P3"], 0.15),
        psm("EEEK", &["P3", "P4"], 0.4),
        psm("FFFK", &["P5"], 0.25),
    ];

    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();
    let forward = posterior_by_name(&mut engine);

    psms.reverse();
    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();
    let reversed = posterior_by_name(&mut engine);

    assert_eq!(forward.len(), reversed.len());
    for (name, p) in &forward {
        let q = reversed[name];
        assert!(
            (p - q).abs() < 1e-10,
            "{}: {} (forward) vs {} (reversed)",
            name,
            p,
            q
        );
    }
}

#[test]
fn partition_covers_the_pruned_graph_exactly_once() {
    let psms = vec![
        psm("AAAK", &["P1", "P2"], 0.1),
        psm("CCCK", &["P2"], 0.2),
        psm("DDDK", &["P3"], 0.15),
        psm("EEEK", &["P4", "P5"], 0.3),
        psm("ZZZK", &["P1", "P3"], 1.0), // boundary peptide, will be cloned
    ];

    // the engine's subgraphs...
    let engine = InferenceEngine::build(&psms, &Params::default()).unwrap();

    // ...must jointly hold exactly the nodes of an independently pruned graph
    let mut reference = Bigraph::from_psms(&psms, Default::default()).unwrap();
    reference.thresholds = Thresholds::default();
    reference.prune();

    let mut expected_peptides: Vec<String> = reference
        .peptide_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    expected_peptides.sort();

    let mut actual_peptides: Vec<String> = engine
        .peptide_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let mut actual_proteins: Vec<String> = Vec::new();
    for subgraph in engine.subgraphs() {
        actual_proteins.extend(
            subgraph
                .group_names()
                .iter()
                .flatten()
                .map(|n| n.to_string()),
        );
    }
    actual_peptides.sort();

    assert_eq!(actual_peptides, expected_peptides);

    let mut expected_proteins: Vec<String> = reference
        .protein_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    expected_proteins.sort();
    actual_proteins.sort();
    assert_eq!(actual_proteins, expected_proteins);

    // no protein appears in two subgraphs
    let unique: HashSet<&String> = actual_proteins.iter().collect();
    assert_eq!(unique.len(), actual_proteins.len());
}

#[test]
fn engine_log_likelihood_matches_direct_product() {
    // no boundary peptides here, so no clone correction applies and the
    // joint likelihood is the plain product of per-subgraph constants
    let psms = vec![
        psm("AAAK", &["P1", "P2"], 0.1),
        psm("CCCK", &["P2"], 0.3),
        psm("DDDK", &["P3"], 0.2),
    ];
    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();
    assert_eq!(engine.clone_count(), 0);

    let model = Model::new(0.1, 0.01, 0.5);
    let direct: f64 = engine
        .subgraphs()
        .iter()
        .map(|g| g.likelihood_constant(&model))
        .product();
    let logged = engine.log_likelihood(&model).unwrap();

    assert!(
        (logged.exp2() - direct).abs() / direct < 1e-10,
        "direct={} exp2(log)={}",
        direct,
        logged.exp2()
    );
}

#[test]
fn degenerate_peptide_prior_is_a_typed_error() {
    // a peptide prior of 1 divides the silent branch by zero; the engine
    // must hand back a typed error, not a panic or a NaN probability
    let params = Params {
        peptide_prior: 1.0,
        ..Params::default()
    };
    let mut engine = InferenceEngine::build(&[psm("AAAK", &["P1"], 0.1)], &params).unwrap();
    match engine.posteriors() {
        Err(sibyl_core::Error::DegeneratePartition { .. }) => {}
        other => panic!("expected a degenerate-partition error, got {:?}", other.map(|p| p.groups)),
    }
}

#[test]
fn unreducible_state_space_is_a_typed_error() {
    // with a sub-1-bit ceiling, even maximal fragmentation (one protein per
    // subgraph, two states) cannot satisfy the limit
    let params = Params {
        max_log_states: 0.5,
        ..Params::default()
    };
    let psms = vec![
        psm("AAAK", &["P1", "P2"], 0.1),
        psm("CCCK", &["P1", "P2"], 0.2),
    ];
    match InferenceEngine::build(&psms, &params) {
        Err(sibyl_core::Error::StateSpaceOverflow { log_states, limit }) => {
            assert!(log_states > limit);
        }
        other => panic!(
            "expected a state-space overflow, got {:?}",
            other.map(|e| e.subgraphs().len())
        ),
    }
}

#[test]
fn peptide_posteriors_cover_every_surviving_peptide() {
    let psms = vec![
        psm("AAAK", &["P1", "P2"], 0.05),
        psm("CCCK", &["P2"], 0.3),
        psm("DDDK", &["P3"], 0.4),
    ];
    let mut engine = InferenceEngine::build(&psms, &Params::default()).unwrap();
    let peptides = engine.peptide_posteriors().unwrap();

    let surviving: usize = engine.subgraphs().iter().map(|g| g.peptide_count()).sum();
    assert_eq!(peptides.len(), surviving);
    for (name, p) in &peptides {
        assert!(
            (0.0..=1.0).contains(p),
            "peptide {} posterior {} out of range",
            name,
            p
        );
    }
    assert!(engine.log_state_count().is_finite());
}

#[quickcheck]
fn posteriors_stay_in_range(edges: Vec<(u8, u8)>, weights: Vec<u8>) -> bool {
    // arbitrary small bipartite topologies; every reported probability must
    // be a probability
    let edges: Vec<(u8, u8)> = edges.into_iter().take(40).collect();
    if edges.is_empty() {
        return true;
    }

    let psms: Vec<ScoredPsm> = edges
        .iter()
        .enumerate()
        .map(|(k, (pep, prot))| {
            let weight = weights
                .get(k % weights.len().max(1))
                .copied()
                .unwrap_or(50) as f64
                % 100.0
                / 100.0;
            psm(
                &format!("PEP{}K", pep % 12),
                &[&format!("PROT{}", prot % 12)],
                1.0 - weight,
            )
        })
        .collect();

    let mut engine = match InferenceEngine::build(&psms, &Params::default()) {
        Ok(engine) => engine,
        Err(_) => return true, // typed rejection is acceptable, panics are not
    };
    match engine.posteriors() {
        Ok(posteriors) => posteriors
            .groups
            .iter()
            .all(|g| (0.0..=1.0).contains(&g.probability)),
        Err(_) => true,
    }
}
