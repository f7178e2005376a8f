use crate::Runner;
use anyhow::Context;
use kettle_core::Confidence;

impl Runner {
    /// Write PSM and peptide tables, returning their paths
    pub fn write_tables(&self, confidence: &Confidence<'_>) -> anyhow::Result<Vec<String>> {
        let paths = confidence
            .write(
                &self.parameters.dest_dir,
                self.parameters.file_root.as_deref(),
                self.parameters.grouping,
            )
            .with_context(|| {
                format!(
                    "Failed to write results to `{}`",
                    self.parameters.dest_dir.display()
                )
            })?;
        Ok(paths.iter().map(|p| p.display().to_string()).collect())
    }

    /// Record the run parameters and every output path in `results.json`
    pub fn write_parameters(&mut self) -> anyhow::Result<String> {
        let name = match self.parameters.file_root.as_deref() {
            Some(root) if !root.is_empty() => format!("{}.results.json", root),
            _ => "results.json".to_string(),
        };
        let path = self.make_path(name);
        self.parameters
            .output_paths
            .push(path.display().to_string());

        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;
        Ok(path.display().to_string())
    }
}
