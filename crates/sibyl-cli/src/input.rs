//! Evidence-graph input.
//!
//! The graph file is headerless tab-separated text, one scored PSM per
//! line, four fields:
//!
//! ```text
//! peptide <TAB> posterior_error <TAB> target|decoy <TAB> protein[;protein...]
//! ```
//!
//! - `peptide` may carry flanking-residue markers (`K.PEPTIDEK.R`); they are
//!   stripped by the engine.
//! - `posterior_error` is the scoring pipeline's posterior error probability
//!   in [0, 1].
//! - the protein field lists every protein the peptide maps to, separated by
//!   semicolons.
//!
//! Repeated observations of the same peptide are legal; the engine keeps the
//! best one.

use anyhow::{bail, ensure, Context};
use sibyl_core::bigraph::ScoredPsm;
use sibyl_core::model::RealRange;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Parse a `min:step:max` range specification, as used by the grid flags.
pub fn parse_range(spec: &str) -> anyhow::Result<RealRange> {
    let parts: Vec<&str> = spec.split(':').collect();
    ensure!(
        parts.len() == 3,
        "range '{}' must have the form min:step:max",
        spec
    );
    let min: f64 = parts[0]
        .parse()
        .with_context(|| format!("bad range minimum '{}'", parts[0]))?;
    let step: f64 = parts[1]
        .parse()
        .with_context(|| format!("bad range step '{}'", parts[1]))?;
    let max: f64 = parts[2]
        .parse()
        .with_context(|| format!("bad range maximum '{}'", parts[2]))?;
    ensure!(step > 0.0, "range step must be positive, got {}", step);
    ensure!(min <= max, "range minimum {} exceeds maximum {}", min, max);
    Ok(RealRange::new(min, step, max))
}

pub fn read_graph<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<ScoredPsm>> {
    let file = std::fs::File::open(path.as_ref())
        .with_context(|| format!("failed to open graph file {:?}", path.as_ref()))?;
    read_psms(file)
}

pub fn read_psms<R: Read>(rdr: R) -> anyhow::Result<Vec<ScoredPsm>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(rdr);

    let mut psms = Vec::new();
    for (ix, record) in rdr.records().enumerate() {
        let line = ix + 1;
        let record = record.with_context(|| format!("line {}: unreadable record", line))?;
        ensure!(
            record.len() == 4,
            "line {}: expected 4 tab-separated fields, found {}",
            line,
            record.len()
        );

        let peptide = record[0].to_string();
        ensure!(!peptide.is_empty(), "line {}: empty peptide field", line);

        let posterior_error: f64 = record[1]
            .parse()
            .with_context(|| format!("line {}: bad posterior error '{}'", line, &record[1]))?;
        ensure!(
            (0.0..=1.0).contains(&posterior_error),
            "line {}: posterior error {} outside [0, 1]",
            line,
            posterior_error
        );

        let decoy = match &record[2] {
            "target" => false,
            "decoy" => true,
            other => bail!("line {}: expected 'target' or 'decoy', found '{}'", line, other),
        };

        let proteins: Vec<Arc<str>> = record[3]
            .split(';')
            .filter(|s| !s.is_empty())
            .map(Arc::from)
            .collect();
        ensure!(!proteins.is_empty(), "line {}: no proteins listed", line);

        psms.push(ScoredPsm {
            peptide,
            proteins,
            posterior_error,
            decoy,
        });
    }
    Ok(psms)
}
