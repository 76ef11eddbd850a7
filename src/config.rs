use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alphabet::SearchSpace;
use crate::candidate_generator::{GeneratorOptions, ResumeMode};
use crate::coordinator::CoordinatorConfig;
use crate::error::{Result, SearchError};
use crate::report::ReportFormat;

/// Engine settings, loadable from a JSON file. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub charset: String,
    pub min_length: usize,
    pub max_length: usize,
    pub threads: usize,
    pub checkpoint_interval: u64,
    pub checkpoint_dir: String,
    /// Run identity, used to name checkpoint files.
    pub method: String,
    pub progress_interval_secs: u64,
    pub grace_period_secs: u64,
    pub max_consecutive_oracle_errors: u32,
    pub purge_after_days: u64,
    pub report_dir: String,
    pub report_format: ReportFormat,
    /// Keep the recovered password unmasked in reports.
    pub show_password: bool,
    /// Log records are appended here as well as to stderr. Empty disables the file.
    pub log_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            charset: "0123456789".to_string(),
            min_length: 4,
            max_length: 16,
            threads: 4,
            checkpoint_interval: 1000,
            checkpoint_dir: "logs/checkpoints".to_string(),
            method: "brute-force".to_string(),
            progress_interval_secs: 5,
            grace_period_secs: 5,
            max_consecutive_oracle_errors: 5,
            purge_after_days: 7,
            report_dir: "logs/reports".to_string(),
            report_format: ReportFormat::Text,
            show_password: false,
            log_file: "logs/keyspace-finder.log".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    ///
    /// Keys missing from the file take their default value, so a file holding
    /// only `{ "charset": "abc" }` is accepted. The result is not validated.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Returns
    ///
    /// `Ok(EngineConfig)` if the load succeeded, `Err(std::io::Error)` if the file
    /// could not be read or parsed
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::EngineConfig;
    ///
    /// let path = std::env::temp_dir().join("keyspace_doc_config_load.json");
    /// std::fs::write(&path, r#"{ "charset": "abc", "max_length": 6 }"#).unwrap();
    ///
    /// let config = EngineConfig::load_from_file(&path).unwrap();
    /// assert_eq!(config.charset, "abc");
    /// assert_eq!(config.threads, 4);
    /// # std::fs::remove_file(&path).unwrap();
    /// ```
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        crate::io_utils::load_from_file(path)
    }

    /// Save configuration to a JSON file
    ///
    /// # Arguments
    ///
    /// * `path` - Destination file; its parent directory must exist
    ///
    /// # Returns
    ///
    /// `Ok(())` if the save succeeded, `Err(std::io::Error)` if it failed
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::EngineConfig;
    ///
    /// let path = std::env::temp_dir().join("keyspace_doc_config_save.json");
    /// EngineConfig::default().save_to_file(&path).unwrap();
    /// assert_eq!(EngineConfig::load_from_file(&path).unwrap(), EngineConfig::default());
    /// # std::fs::remove_file(&path).unwrap();
    /// ```
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        crate::io_utils::save_to_file(self, path)
    }

    /// Reject settings a run cannot start with
    ///
    /// # Returns
    ///
    /// `Ok(())`, or `SearchError::Configuration` naming the first bad field
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::EngineConfig;
    ///
    /// assert!(EngineConfig::default().validate().is_ok());
    ///
    /// let config = EngineConfig { threads: 0, ..EngineConfig::default() };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        self.search_space()?;
        if self.threads == 0 {
            return Err(SearchError::Configuration(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.method.trim().is_empty() {
            return Err(SearchError::Configuration(
                "method must not be empty".to_string(),
            ));
        }
        if self.max_consecutive_oracle_errors == 0 {
            return Err(SearchError::Configuration(
                "max_consecutive_oracle_errors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The space described by `charset`, `min_length` and `max_length`
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::EngineConfig;
    ///
    /// let config = EngineConfig { charset: "ab".into(), min_length: 1, max_length: 3, ..EngineConfig::default() };
    /// let space = config.search_space().unwrap();
    /// assert_eq!(space.radix(), 2);
    /// ```
    pub fn search_space(&self) -> Result<SearchSpace> {
        SearchSpace::new(&self.charset, self.min_length, self.max_length)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from(&self.checkpoint_dir)
    }

    pub fn generator_options(&self, resume: ResumeMode) -> GeneratorOptions {
        GeneratorOptions {
            run_identity: self.method.clone(),
            checkpoint_interval: self.checkpoint_interval,
            resume,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            concurrency: self.threads,
            grace_period: Duration::from_secs(self.grace_period_secs),
            max_consecutive_errors: self.max_consecutive_oracle_errors,
            progress_interval: Duration::from_secs(self.progress_interval_secs),
            ..CoordinatorConfig::default()
        }
    }

    pub fn purge_age(&self) -> Duration {
        Duration::from_secs(self.purge_after_days.saturating_mul(24 * 60 * 60))
    }

    pub fn report_dir(&self) -> PathBuf {
        PathBuf::from(&self.report_dir)
    }

    /// Log file path, `None` when file logging is disabled.
    pub fn log_file(&self) -> Option<PathBuf> {
        let path = self.log_file.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}
