//! Ranked posterior output: tab-separated `probability, proteins`, one line
//! per protein group in descending probability order, group members joined
//! by `/`. Severed proteins follow with probability 0. A JSON rendering of
//! the same list and a long-format likelihood surface are also available.

use serde::Serialize;
use sibyl_core::inference::Posteriors;
use sibyl_core::matrix::Matrix;
use sibyl_core::model::GridModel;
use std::io::Write;

pub fn write_posteriors<W: Write>(wtr: W, posteriors: &Posteriors) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(wtr);

    wtr.write_record(["probability", "proteins"])?;
    for group in &posteriors.groups {
        let mut record = csv::ByteRecord::new();
        record.push_field(ryu::Buffer::new().format(group.probability).as_bytes());
        record.push_field(group.name().as_bytes());
        wtr.write_byte_record(&record)?;
    }
    for name in &posteriors.severed {
        let mut record = csv::ByteRecord::new();
        record.push_field(ryu::Buffer::new().format(0.0f64).as_bytes());
        record.push_field(name.as_bytes());
        wtr.write_byte_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct JsonEntry {
    proteins: Vec<String>,
    probability: f64,
}

/// The same ranked list as [`write_posteriors`], as a JSON document with
/// `groups` and `severed` arrays.
pub fn write_posteriors_json<W: Write>(wtr: W, posteriors: &Posteriors) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct Document {
        groups: Vec<JsonEntry>,
        severed: Vec<String>,
    }

    let document = Document {
        groups: posteriors
            .groups
            .iter()
            .map(|g| JsonEntry {
                proteins: g.names.iter().map(|n| n.to_string()).collect(),
                probability: g.probability,
            })
            .collect(),
        severed: posteriors.severed.iter().map(|n| n.to_string()).collect(),
    };
    serde_json::to_writer_pretty(wtr, &document)?;
    Ok(())
}

/// Long-format likelihood surface: one `alpha, beta, log2_likelihood` line
/// per grid cell. Cells where the likelihood was undefined hold NaN.
pub fn write_surface<W: Write>(
    wtr: W,
    grid: &GridModel,
    surface: &Matrix,
) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(wtr);

    wtr.write_record(["alpha", "beta", "log2_likelihood"])?;
    for (row, col, model) in grid.cells() {
        let mut record = csv::ByteRecord::new();
        record.push_field(ryu::Buffer::new().format(model.alpha).as_bytes());
        record.push_field(ryu::Buffer::new().format(model.beta).as_bytes());
        record.push_field(ryu::Buffer::new().format(surface[(row, col)]).as_bytes());
        wtr.write_byte_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Peptide-level posterior output: `probability, peptide` per line, in
/// subgraph order.
pub fn write_peptide_posteriors<W: Write>(
    wtr: W,
    peptides: &[(std::sync::Arc<str>, f64)],
) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(wtr);

    wtr.write_record(["probability", "peptide"])?;
    for (name, probability) in peptides {
        let mut record = csv::ByteRecord::new();
        record.push_field(ryu::Buffer::new().format(*probability).as_bytes());
        record.push_field(name.as_bytes());
        wtr.write_byte_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
