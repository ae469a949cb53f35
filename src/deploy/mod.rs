//! Deploy driver: diff rendered output against a destination and apply it.
//!
//! A deploy runs these steps in order. Any failure stops it before the
//! destination's index is replaced.
//!
//! 1. `prelaunch` hook
//! 2. destination test: write, read back and delete `/.grow/test.tmp`
//! 3. read the deployed index (`/.grow/index.proto.json`, empty when absent)
//! 4. diff against the rendered output, minus paths the filters reject
//! 5. confirm gate
//! 6. writes (adds, then edits), then deletes, in a worker pool
//! 7. write the new index, the diff and optional stats
//! 8. `postlaunch` hook
//!
//! `dry_run` stops after step 4 and `test_only` after step 2.

pub mod local;
pub mod s3;

pub use local::LocalDestination;
pub use s3::S3Destination;

use crate::catalogs::StatsExport;
use crate::indexes::{DIFF_BASENAME, Diff, INDEX_BASENAME, Index, IndexError, STATS_BASENAME};
use crate::path_filter::PathFilter;
use crate::podspec::Env;
use crate::render::RenderedDocument;
use crate::storage::{S3Config, StorageError};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Destination-local area for control files.
pub const CONTROL_DIR: &str = "/.grow";

/// Written and removed to check the destination before deploying.
pub const TEST_FILE: &str = "/.grow/test.tmp";

/// Default worker count for the apply stage.
pub const POOL_SIZE: usize = 10;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Index(#[from] IndexError),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unable to read rendered output: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),
    #[error("No deployment named '{0}' in the podspec")]
    UnknownDeployment(String),
    #[error("Unsupported destination '{0}'")]
    UnknownDestination(String),
    #[error("Invalid deployment configuration: {0}")]
    Config(String),
    #[error("Destination test failed: {0}")]
    TestFailed(String),
    #[error("{0}")]
    Apply(#[from] DeploymentErrors),
}

/// Files the apply stage failed to write or delete.
#[derive(Error, Debug)]
pub struct DeploymentErrors {
    /// `(path, message)` pairs, sorted by path.
    pub failures: Vec<(String, String)>,
}

impl fmt::Display for DeploymentErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s) failed to deploy:", self.failures.len())?;
        for (path, message) in &self.failures {
            write!(f, "\n  {}: {}", path, message)?;
        }
        Ok(())
    }
}

/// Where rendered output goes.
pub trait Destination: Send + Sync {
    /// Short identifier, e.g. `local` or `s3`.
    fn kind(&self) -> &'static str;

    /// Human-readable location, shown before deploying.
    fn label(&self) -> String;

    /// Contents of `path`, or `None` when it does not exist.
    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, DeployError>;

    fn write_file(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), DeployError>;

    fn delete_file(&self, path: &str) -> Result<(), DeployError>;

    fn prelaunch(&self) -> Result<(), DeployError> {
        Ok(())
    }

    fn postlaunch(&self) -> Result<(), DeployError> {
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// `filters` of a deployment: regexes over serving paths.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployFilters {
    pub ignore: Vec<String>,
    pub include: Vec<String>,
}

/// One entry of the podspec's `deployments`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub destination: String,
    pub out_dir: Option<String>,
    #[serde(flatten)]
    pub s3: S3Config,
    pub filters: DeployFilters,
    pub env: Option<Env>,
}

impl DeploymentConfig {
    /// The named deployment from the podspec's `deployments`.
    pub fn named(deployments: &serde_json::Map<String, serde_json::Value>, name: &str) -> Result<Self, DeployError> {
        let raw = deployments
            .get(name)
            .ok_or_else(|| DeployError::UnknownDeployment(name.to_string()))?;
        serde_json::from_value(raw.clone()).map_err(|e| DeployError::Config(format!("{name}: {e}")))
    }

    /// Explicit `ignore` patterns replace the dotfile default.
    pub fn path_filter(&self) -> Result<PathFilter, DeployError> {
        Ok(PathFilter::new(&self.filters.ignore, &self.filters.include)?)
    }

    /// Open the configured destination. A relative `out_dir` is resolved
    /// against `pod_root`.
    pub fn open(&self, pod_root: Option<&Path>) -> Result<Box<dyn Destination>, DeployError> {
        match self.destination.as_str() {
            "local" => {
                let out_dir = self
                    .out_dir
                    .as_deref()
                    .ok_or_else(|| DeployError::Config("local destination needs out_dir".to_string()))?;
                let mut path = PathBuf::from(out_dir);
                if path.is_relative()
                    && let Some(root) = pod_root
                {
                    path = root.join(path);
                }
                Ok(Box::new(LocalDestination::new(path)))
            }
            "s3" => Ok(Box::new(S3Destination::connect(&self.s3)?)),
            other => Err(DeployError::UnknownDestination(other.to_string())),
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub confirm: bool,
    pub dry_run: bool,
    pub test: bool,
    pub test_only: bool,
    /// Partial deploys never delete.
    pub is_partial: bool,
    pub threads: usize,
    /// Pod directory, for commit metadata.
    pub repo: Option<PathBuf>,
    pub stats: Option<StatsExport>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            confirm: true,
            dry_run: false,
            test: true,
            test_only: false,
            is_partial: false,
            threads: POOL_SIZE,
            repo: None,
            stats: None,
        }
    }
}

#[derive(Debug)]
pub enum DeployOutcome {
    Tested,
    NoChanges(Diff),
    DryRun(Diff),
    Declined(Diff),
    Deployed(Diff),
}

impl DeployOutcome {
    pub fn diff(&self) -> Option<&Diff> {
        match self {
            DeployOutcome::Tested => None,
            DeployOutcome::NoChanges(d)
            | DeployOutcome::DryRun(d)
            | DeployOutcome::Declined(d)
            | DeployOutcome::Deployed(d) => Some(d),
        }
    }
}

fn control_path(basename: &str) -> String {
    format!("{CONTROL_DIR}/{basename}")
}

pub struct Deployment {
    destination: Box<dyn Destination>,
    filter: PathFilter,
}

impl Deployment {
    pub fn new(destination: Box<dyn Destination>) -> Self {
        Self {
            destination,
            filter: PathFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn destination(&self) -> &dyn Destination {
        self.destination.as_ref()
    }

    /// Write, read back and delete a test file.
    pub fn test(&self) -> Result<(), DeployError> {
        let sample = b"This is a test file.";
        self.destination.write_file(TEST_FILE, sample, "text/plain")?;
        let read = self.destination.read_file(TEST_FILE)?;
        if read.as_deref() != Some(sample.as_slice()) {
            return Err(DeployError::TestFailed(format!(
                "{} did not read back from {}",
                TEST_FILE,
                self.destination.label()
            )));
        }
        self.destination.delete_file(TEST_FILE)?;
        log::debug!("Destination test passed: {}", self.destination.label());
        Ok(())
    }

    /// The index currently deployed, or an empty one.
    pub fn deployed_index(&self) -> Result<Index, DeployError> {
        match self.destination.read_file(&control_path(INDEX_BASENAME))? {
            Some(bytes) => Ok(Index::from_json(&String::from_utf8_lossy(&bytes))?),
            None => Ok(Index::default()),
        }
    }

    /// Deploy `docs`. `confirm` is asked once, with the diff, when
    /// `options.confirm` is set.
    pub fn deploy(
        &self,
        docs: Vec<RenderedDocument>,
        options: &DeployOptions,
        confirm: &mut dyn FnMut(&Diff) -> bool,
    ) -> Result<DeployOutcome, DeployError> {
        self.destination.prelaunch()?;
        if options.test || options.test_only {
            self.test()?;
        }
        if options.test_only {
            return Ok(DeployOutcome::Tested);
        }

        let theirs = self.deployed_index()?;
        let docs: Vec<RenderedDocument> = docs
            .into_iter()
            .filter(|d| self.filter.is_valid(&d.path))
            .collect();
        let (diff, index, changed) =
            Diff::from_rendered(&theirs, docs, options.is_partial, options.repo.as_deref());

        if diff.is_empty() {
            log::info!("No changes to deploy.");
            return Ok(DeployOutcome::NoChanges(diff));
        }
        if options.dry_run {
            return Ok(DeployOutcome::DryRun(diff));
        }
        if options.confirm && !confirm(&diff) {
            return Ok(DeployOutcome::Declined(diff));
        }

        self.apply(&diff, &changed, options.threads)?;
        self.write_control_files(&diff, &index, options.stats.as_ref())?;
        self.destination.postlaunch()?;
        log::info!("Deployed to {}", self.destination.label());
        Ok(DeployOutcome::Deployed(diff))
    }

    /// Writes, then deletes. Stops before deleting when any write failed.
    pub fn apply(
        &self,
        diff: &Diff,
        changed: &BTreeMap<String, RenderedDocument>,
        threads: usize,
    ) -> Result<(), DeployError> {
        let writes: Vec<&RenderedDocument> = diff
            .adds
            .iter()
            .chain(diff.edits.iter())
            .filter_map(|f| changed.get(&f.path))
            .collect();
        let deletes: Vec<&str> = diff.deletes.iter().map(|f| f.path.as_str()).collect();

        let run = || -> Result<(), DeploymentErrors> {
            collect_failures(writes.par_iter().map(|doc| {
                let result = doc
                    .bytes()
                    .map_err(DeployError::from)
                    .and_then(|bytes| self.destination.write_file(&doc.path, &bytes, doc.content_type));
                log::debug!("Wrote {}", doc.path);
                (doc.path.as_str(), result)
            }))?;
            collect_failures(deletes.par_iter().map(|path| {
                log::debug!("Deleted {}", path);
                (*path, self.destination.delete_file(path))
            }))
        };

        let result = match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                log::warn!("Falling back to the global thread pool: {}", e);
                run()
            }
        };
        Ok(result?)
    }

    fn write_control_files(
        &self,
        diff: &Diff,
        index: &Index,
        stats: Option<&StatsExport>,
    ) -> Result<(), DeployError> {
        let json = "application/json";
        self.destination
            .write_file(&control_path(INDEX_BASENAME), index.to_json()?.as_bytes(), json)?;
        self.destination
            .write_file(&control_path(DIFF_BASENAME), diff.to_json()?.as_bytes(), json)?;
        if let Some(stats) = stats {
            let bytes = serde_json::to_vec_pretty(stats)?;
            self.destination.write_file(&control_path(STATS_BASENAME), &bytes, json)?;
        }
        Ok(())
    }
}

fn collect_failures<'a, I>(results: I) -> Result<(), DeploymentErrors>
where
    I: ParallelIterator<Item = (&'a str, Result<(), DeployError>)>,
{
    let mut failures: Vec<(String, String)> = results
        .filter_map(|(path, result)| result.err().map(|e| (path.to_string(), e.to_string())))
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort();
    Err(DeploymentErrors { failures })
}
