use anyhow::{ensure, Context};
use clap::ArgMatches;
use kettle_core::{BrewParameters, Direction, GroupBy, Grouping};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual run parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub brew: BrewParameters,
    pub shrinkage: Vec<f64>,
    pub grouping: Grouping,
    /// Worker threads for the distributed model; `None` trains in-process
    pub workers: Option<usize>,
    pub file_root: Option<String>,
    pub pin_paths: Vec<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub dest_dir: PathBuf,
}

#[derive(Deserialize, Default, Debug)]
/// Input parameters deserialized from JSON file
pub struct Input {
    train_fdr: Option<f64>,
    test_fdr: Option<f64>,
    max_iter: Option<usize>,
    direction: Option<Direction>,
    folds: Option<usize>,
    group_by: Option<GroupBy>,
    seed: Option<u64>,
    inner_folds: Option<usize>,
    shrinkage: Option<Vec<f64>>,
    aggregate: Option<bool>,
    workers: Option<usize>,
    dest_dir: Option<String>,
    file_root: Option<String>,
    pin_paths: Option<Vec<String>>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let mut input = match matches.get_one::<String>("parameters") {
            Some(path) => Input::load(path)
                .with_context(|| format!("Failed to read parameters from `{path}`"))?,
            None => Input::default(),
        };

        // Handle JSON configuration overrides
        if let Some(pin_paths) = matches.get_many::<String>("pin_paths") {
            log::trace!("overriding `pin_paths` parameter.");
            input.pin_paths = Some(pin_paths.cloned().collect());
        }
        if let Some(dest_dir) = matches.get_one::<String>("dest_dir") {
            log::trace!("overriding `dest_dir` parameter.");
            input.dest_dir = Some(dest_dir.into());
        }
        if let Some(file_root) = matches.get_one::<String>("file_root") {
            input.file_root = Some(file_root.into());
        }
        if let Some(train_fdr) = matches.get_one::<f64>("train_fdr").copied() {
            input.train_fdr = Some(train_fdr);
        }
        if let Some(test_fdr) = matches.get_one::<f64>("test_fdr").copied() {
            input.test_fdr = Some(test_fdr);
        }
        if let Some(max_iter) = matches.get_one::<usize>("max_iter").copied() {
            input.max_iter = Some(max_iter);
        }
        if let Some(direction) = matches.get_one::<String>("direction") {
            log::trace!("overriding `direction` parameter.");
            input.direction = direction.parse().ok();
        }
        if let Some(folds) = matches.get_one::<usize>("folds").copied() {
            input.folds = Some(folds);
        }
        if let Some(seed) = matches.get_one::<u64>("seed").copied() {
            input.seed = Some(seed);
        }
        if let Some(workers) = matches.get_one::<usize>("workers").copied() {
            input.workers = Some(workers);
        }
        if matches.get_flag("aggregate") {
            input.aggregate = Some(true);
        }

        ensure!(
            input.pin_paths.as_ref().map_or(false, |p| !p.is_empty()),
            "`pin_paths` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    /// `--workers` without a value asks for one worker per CPU
    pub fn resolve_workers(&mut self, cpus: usize) {
        if self.workers == Some(0) {
            self.workers = Some(cpus.max(1));
        }
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let defaults = BrewParameters::default();
        let brew = BrewParameters {
            train_fdr: self.train_fdr.unwrap_or(defaults.train_fdr),
            test_fdr: self.test_fdr.unwrap_or(defaults.test_fdr),
            max_iter: self.max_iter.unwrap_or(defaults.max_iter),
            direction: self.direction.unwrap_or(defaults.direction),
            folds: self.folds.unwrap_or(defaults.folds),
            group_by: self.group_by.unwrap_or(defaults.group_by),
            seed: self.seed.unwrap_or(defaults.seed),
            inner_folds: self.inner_folds.unwrap_or(defaults.inner_folds),
        };
        if brew.train_fdr > brew.test_fdr {
            log::warn!(
                "`train_fdr` ({}) is looser than `test_fdr` ({})",
                brew.train_fdr,
                brew.test_fdr
            );
        }

        let shrinkage = self
            .shrinkage
            .unwrap_or_else(|| vec![kettle_core::model::DEFAULT_SHRINKAGE]);
        ensure!(
            !shrinkage.is_empty() && shrinkage.iter().all(|s| s.is_finite() && *s >= 0.0),
            "`shrinkage` values must be finite and non-negative"
        );
        if let Some(workers) = self.workers {
            ensure!(workers >= 1, "`workers` must be at least 1");
        }

        let pin_paths = self
            .pin_paths
            .context("`pin_paths` must be provided")?;

        let dest_dir = match self.dest_dir {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&dest_dir)
            .with_context(|| format!("Failed to create `{}`", dest_dir.display()))?;

        let grouping = match self.aggregate.unwrap_or(false) || pin_paths.len() == 1 {
            true => Grouping::Aggregate,
            false => Grouping::PerFile,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            brew,
            shrinkage,
            grouping,
            workers: self.workers,
            file_root: self.file_root,
            pin_paths,
            output_paths: Vec::new(),
            dest_dir,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let input: Input = serde_json::from_str(
            r#"{
                "train_fdr": 0.05,
                "direction": { "feature": "hyperscore" },
                "group_by": "peptide",
                "pin_paths": ["a.pin", "b.pin"]
            }"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = Input {
            dest_dir: Some(dir.path().join("out").display().to_string()),
            ..input
        };

        let search = input.build().unwrap();
        assert_eq!(search.brew.train_fdr, 0.05);
        assert_eq!(search.brew.test_fdr, 0.01);
        assert_eq!(search.brew.direction, Direction::Feature("hyperscore".into()));
        assert_eq!(search.brew.group_by, GroupBy::Peptide);
        assert_eq!(search.brew.seed, 1);
        assert_eq!(search.grouping, Grouping::PerFile);
        assert!(search.dest_dir.exists());

        let json = serde_json::to_value(&search).unwrap();
        assert_eq!(json["brew"]["max_iter"], 10);
        assert!(json.get("dest_dir").is_none());
    }

    #[test]
    fn invalid_shrinkage() {
        let input = Input {
            shrinkage: Some(vec![-1.0]),
            pin_paths: Some(vec!["a.pin".into()]),
            ..Default::default()
        };
        assert!(input.build().is_err());
    }
}
