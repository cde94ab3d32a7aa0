//! Subscriber setup and run lifecycle events for the featurization CLI.

use std::error::Error;
use std::path::Path;

use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::count::CountFeaturizerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    /// Single-line human readable output.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `ehr_featurize=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Tag events with the emitting thread so partition work on the rayon
    /// pool can be told apart.
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            thread_ids: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("invalid log filter '{directive}': {source}")]
    InvalidFilter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// piping.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(&config.level).map_err(|source| LoggingInitError::InvalidFilter {
            directive: config.level.clone(),
            source,
        })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_thread_ids(config.thread_ids)
        .with_ansi(false);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.compact().finish())?,
    }

    Ok(())
}

pub fn log_run_start(logging: &LoggingConfig, count: &CountFeaturizerConfig, partitions: usize) {
    info!(
        component = "count_featurize",
        event = "app.start",
        log_level = %logging.level,
        log_format = ?logging.format,
        partitions,
        ontology_expansion = count.is_ontology_expansion,
        excluded_codes = count.excluded_codes.len(),
        time_bins = ?count.time_bins,
        numeric_value_decile = count.numeric_value_decile,
        string_value_combination = count.string_value_combination,
        text_prefix_chars = count.characters_for_string_values
    );
}

pub fn log_outputs_written(features_path: &Path, manifest_path: &Path, rows: usize, nnz: usize) {
    info!(
        component = "count_featurize",
        event = "app.outputs_written",
        features_path = %features_path.display(),
        manifest_path = %manifest_path.display(),
        rows,
        nnz
    );
}

pub fn log_run_failed(err: &dyn Error) {
    error!(
        component = "count_featurize",
        event = "app.failed",
        error = %err
    );
}
