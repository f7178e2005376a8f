use super::input::Search;
use super::reader;
use anyhow::Context;
use kettle_core::{brew, Confidence, Dataset, DistributedModel, Level, LocalModel};
use log::info;
use rayon::ThreadPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub struct Runner {
    pub parameters: Search,
    pool: Option<Arc<ThreadPool>>,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Search) -> anyhow::Result<Self> {
        let start = Instant::now();
        let pool = match parameters.workers {
            Some(workers) => {
                info!("using a distributed model with {} workers", workers);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|ix| format!("kettle-worker-{}", ix))
                    .build()
                    .context("Failed to start worker pool")?;
                Some(Arc::new(pool))
            }
            None => None,
        };
        Ok(Runner {
            parameters,
            pool,
            start,
        })
    }

    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.dest_dir.join(file_name.as_ref())
    }

    fn brew<'a>(&self, dataset: &'a Dataset) -> kettle_core::Result<Confidence<'a>> {
        let shrinkage = self.parameters.shrinkage.clone();
        match &self.pool {
            Some(pool) => {
                let shards = pool.current_num_threads();
                let model = DistributedModel::new(pool.clone(), shards, shrinkage)?;
                brew(dataset, &model, &self.parameters.brew)
            }
            None => brew(dataset, &LocalModel::new(shrinkage)?, &self.parameters.brew),
        }
    }

    pub fn run(mut self) -> anyhow::Result<Search> {
        let dataset = reader::read_all(&self.parameters.pin_paths)?;
        info!(
            "read {} PSMs ({} decoys) with {} features from {} files in {:#?}",
            dataset.len(),
            dataset.decoys(),
            dataset.feature_names().len(),
            dataset.filenames().len(),
            self.start.elapsed()
        );

        let confidence = self.brew(&dataset).context("Failed to assign confidence")?;
        let threshold = self.parameters.brew.test_fdr;
        info!(
            "{} PSMs and {} peptides pass {} FDR",
            confidence.passing(Level::Psm, threshold),
            confidence.passing(Level::Peptide, threshold),
            threshold
        );

        let paths = self.write_tables(&confidence)?;
        self.parameters.output_paths.extend(paths);
        self.write_parameters()?;

        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(self.parameters)
    }
}
