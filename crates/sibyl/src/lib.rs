pub mod bigraph;
pub mod cache;
pub mod grouping;
pub mod inference;
pub mod matrix;
pub mod model;
pub mod numeric;
pub mod sparse;

/// Recoverable failure conditions surfaced to the caller.
///
/// Malformed input and numerical degeneracy are data-dependent: a caller
/// scanning many (alpha, beta, gamma) combinations must be able to treat a
/// single failed combination as "undefined here" and continue. Violations of
/// internal graph invariants are programmer errors and are debug-asserted
/// instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A PSM arrived with an empty protein set; its evidence cannot be
    /// attributed and would corrupt component counts.
    OrphanPeptide(String),
    /// A protein reached the grouping stage with no peptide associations.
    /// Proteins severed by pruning are legal; this one never had evidence.
    OrphanProtein(String),
    /// The partition function evaluated to zero or failed to stay finite,
    /// so posteriors are undefined for this model.
    DegeneratePartition { log_likelihood: f64 },
    /// A subgraph's joint activation state space could not be reduced below
    /// the configured ceiling even after maximal pruning.
    StateSpaceOverflow { log_states: f64, limit: f64 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrphanPeptide(pep) => {
                write!(f, "peptide '{}' is associated with no proteins", pep)
            }
            Self::OrphanProtein(prot) => {
                write!(f, "protein '{}' is associated with no peptides", prot)
            }
            Self::DegeneratePartition { log_likelihood } => write!(
                f,
                "degenerate partition function (log2 = {})",
                log_likelihood
            ),
            Self::StateSpaceOverflow { log_states, limit } => write!(
                f,
                "subgraph has 2^{:.2} activation states, exceeding the 2^{:.2} ceiling",
                log_states, limit
            ),
        }
    }
}

impl std::error::Error for Error {}
