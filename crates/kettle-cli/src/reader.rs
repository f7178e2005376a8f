//! Tab-delimited PSM tables (Percolator `.pin`-like)
//!
//! Every file starts with a header row. `SpecId`, `Label` (1 for targets, -1
//! for decoys) and `Peptide` are required; `ScanNr`, `Proteins` and `Group`
//! are kept as metadata, and every other column is a numeric feature.
//! Rows with more fields than the header carry additional protein
//! accessions, and are accepted as-is.

use anyhow::{anyhow, bail, ensure, Context};
use kettle_core::{Dataset, Psm};
use std::path::Path;

const SPEC_ID: &str = "SpecId";
const LABEL: &str = "Label";
const PEPTIDE: &str = "Peptide";
const METADATA: [&str; 3] = ["ScanNr", "Proteins", "Group"];

struct Columns {
    spec_id: usize,
    label: usize,
    peptide: usize,
    group: Option<usize>,
    /// (column index, name) of every feature
    features: Vec<(usize, String)>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> anyhow::Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let required =
            |name: &str| find(name).ok_or_else(|| anyhow!("missing required column `{}`", name));

        let spec_id = required(SPEC_ID)?;
        let label = required(LABEL)?;
        let peptide = required(PEPTIDE)?;
        let group = find("Group");

        let features = headers
            .iter()
            .enumerate()
            .filter(|&(ix, name)| {
                ix != spec_id
                    && ix != label
                    && ix != peptide
                    && !METADATA.iter().any(|m| m.eq_ignore_ascii_case(name))
            })
            .map(|(ix, name)| (ix, name.to_string()))
            .collect::<Vec<_>>();
        ensure!(!features.is_empty(), "no feature columns");

        Ok(Columns {
            spec_id,
            label,
            peptide,
            group,
            features,
        })
    }

    fn parse(&self, record: &csv::StringRecord, file_id: usize) -> anyhow::Result<(Psm, Vec<f64>)> {
        let field = |ix: usize| record.get(ix).unwrap_or("");

        let decoy = match field(self.label).trim() {
            "1" | "+1" => false,
            "-1" => true,
            label => bail!("`{}` must be 1 or -1, got `{}`", LABEL, label),
        };

        let features = self
            .features
            .iter()
            .map(|(ix, name)| {
                let value = field(*ix).trim();
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| anyhow!("feature `{}` has invalid value `{}`", name, value))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let psm = Psm {
            spec_id: field(self.spec_id).into(),
            peptide: field(self.peptide).into(),
            file_id,
            group: self
                .group
                .map(|ix| field(ix).to_string())
                .filter(|g| !g.is_empty()),
            decoy,
        };
        Ok((psm, features))
    }
}

/// Read a single PSM table into a [`Dataset`]
pub fn read_pin<P: AsRef<Path>>(path: P) -> anyhow::Result<Dataset> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open `{}`", path.display()))?;

    let headers = rdr.headers()?.clone();
    let columns =
        Columns::from_headers(&headers).with_context(|| format!("Invalid header in `{}`", path.display()))?;

    let mut records = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        // Percolator's optional second row lists default feature directions
        if record
            .get(columns.spec_id)
            .map_or(false, |s| s.eq_ignore_ascii_case("DefaultDirection"))
        {
            continue;
        }
        records.push(
            columns
                .parse(&record, 0)
                .with_context(|| format!("{}: line {}", path.display(), line + 2))?,
        );
    }

    log::info!("- read {} PSMs from {}", records.len(), path.display());
    let feature_names = columns.features.into_iter().map(|(_, name)| name).collect();
    Ok(Dataset::new(
        feature_names,
        vec![path.display().to_string()],
        records,
    )?)
}

/// Read and concatenate PSM tables, which must share their feature columns
pub fn read_all<S: AsRef<str>>(paths: &[S]) -> anyhow::Result<Dataset> {
    let datasets = paths
        .iter()
        .map(|path| read_pin(path.as_ref()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Dataset::merge(datasets).context("Failed to combine input files")
}
