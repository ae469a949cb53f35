//! Process-wide configuration.
//!
//! Built once in `main` and passed explicitly to the stages that need it.
//! Values come from `GROW_*` environment variables layered over an optional
//! TOML RC file: `$GROW_RC` when set, else `~/.growrc.toml`. Pod-level
//! settings live in `podspec.yaml` instead.
//!
//! ## RC File
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! # environment_name = "prod"   # GROW_ENVIRONMENT_NAME
//! # auth = "..."                # GROW_AUTH
//! # key_file = "..."            # GROW_KEY_FILE
//! interactive_auth = false      # INTERACTIVE_AUTH
//!
//! [render]
//! # threads = 8                 # GROW_RENDER_THREADS (omit for auto = CPU cores)
//! spill_threshold_bytes = 67108864
//!
//! [deploy]
//! threads = 10                  # GROW_DEPLOY_THREADS
//! ```
//!
//! Environment variables win over the RC file.

use confique::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Names the RC file explicitly.
pub const RC_ENV: &str = "GROW_RC";

pub const RC_FILENAME: &str = ".growrc.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    Load(#[from] confique::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

#[derive(Config, Debug, Clone)]
pub struct GrowConfig {
    /// Environment selected for `@env.<name>` keys when the CLI names none.
    #[config(env = "GROW_ENVIRONMENT_NAME")]
    pub environment_name: Option<String>,

    /// Credentials passed to remote destinations and translator services.
    #[config(env = "GROW_AUTH")]
    pub auth: Option<String>,

    #[config(env = "GROW_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    #[config(env = "INTERACTIVE_AUTH", default = false)]
    pub interactive_auth: bool,

    #[config(nested)]
    pub render: RenderConfig,

    #[config(nested)]
    pub deploy: DeployConfig,
}

#[derive(Config, Debug, Clone)]
pub struct RenderConfig {
    /// Render workers. Absent means one per core; larger values are clamped
    /// down to the core count.
    #[config(env = "GROW_RENDER_THREADS")]
    pub threads: Option<usize>,

    /// Rendered bytes held in memory before bodies spill to disk.
    #[config(default = 67108864)]
    pub spill_threshold_bytes: u64,
}

#[derive(Config, Debug, Clone)]
pub struct DeployConfig {
    /// Workers for the deploy apply stage.
    #[config(env = "GROW_DEPLOY_THREADS", default = 10)]
    pub threads: usize,
}

impl GrowConfig {
    /// Load from the environment and the RC file, if one exists.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Self::builder().env();
        let config = match rc_path() {
            Some(path) => builder.file(path).load()?,
            None => builder.load()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` only, ignoring the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::builder().file(path).load()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.threads == Some(0) {
            return Err(ConfigError::Validation("render.threads must be at least 1".into()));
        }
        if self.deploy.threads == 0 {
            return Err(ConfigError::Validation("deploy.threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn render_threads(&self) -> usize {
        effective_threads(self.render.threads)
    }
}

/// `$GROW_RC`, else `~/.growrc.toml`.
fn rc_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(RC_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(RC_FILENAME))
}

/// Resolve the effective thread count.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(requested: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    requested.map(|n| n.min(cores)).unwrap_or(cores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cores() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    #[test]
    fn effective_threads_auto() {
        assert_eq!(effective_threads(None), cores());
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        assert_eq!(effective_threads(Some(99999)), cores());
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        assert_eq!(effective_threads(Some(1)), 1);
    }

    #[test]
    fn empty_rc_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(RC_FILENAME);
        std::fs::write(&path, "").unwrap();
        let config = GrowConfig::from_file(&path).unwrap();
        assert_eq!(config.environment_name, None);
        assert!(!config.interactive_auth);
        assert_eq!(config.render.threads, None);
        assert_eq!(config.render.spill_threshold_bytes, 64 * 1024 * 1024);
        assert_eq!(config.deploy.threads, 10);
    }

    #[test]
    fn rc_file_overrides_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(RC_FILENAME);
        std::fs::write(
            &path,
            "environment_name = \"prod\"\n[render]\nthreads = 1\n[deploy]\nthreads = 4\n",
        )
        .unwrap();
        let config = GrowConfig::from_file(&path).unwrap();
        assert_eq!(config.environment_name.as_deref(), Some("prod"));
        assert_eq!(config.render_threads(), 1);
        assert_eq!(config.deploy.threads, 4);
    }

    #[test]
    fn unknown_types_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(RC_FILENAME);
        std::fs::write(&path, "[deploy]\nthreads = \"many\"\n").unwrap();
        assert!(matches!(GrowConfig::from_file(&path), Err(ConfigError::Load(_))));
    }

    #[test]
    fn zero_threads_fail_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(RC_FILENAME);
        std::fs::write(&path, "[deploy]\nthreads = 0\n").unwrap();
        assert!(matches!(
            GrowConfig::from_file(&path),
            Err(ConfigError::Validation(_))
        ));
    }
}
