//! Sparse count features from clinical event streams.
//!
//! Featurization runs in three phases:
//! - preprocess: each partition of subjects builds a summary of observed
//!   codes, (code, text) pairs and sampled numeric values
//! - finalize: summaries merge into one frozen column vocabulary
//! - featurize: one forward pass per subject emits a sparse vector per label,
//!   optionally split into label-relative time bins

mod age;
mod config;
mod count;
mod csv_io;
mod event;
mod featurizer;
mod observability;
mod ontology;
mod pipeline;
mod reservoir;
mod time_bins;
mod vocabulary;

pub use age::{AgeFeaturizer, OnlineStatistics};
pub use config::{
    count_config_from_env, logging_config_from_env, parse_time_bins, partitions_from_env,
    ConfigError, DEFAULT_PARTITIONS,
};
pub use count::{
    CountFeaturizer, CountFeaturizerConfig, EventPredicate, ExclusionFilter,
    DEFAULT_TEXT_PREFIX_CHARS,
};
pub use csv_io::{
    join_labels, load_labels_csv, load_ontology_csv, load_subjects_csv, write_features_csv,
    write_manifest_json, CsvIoError,
};
pub use event::{ColumnValue, Event, EventValue, Label, Subject, BIRTH_CODE};
pub use featurizer::{Featurizer, FeaturizerError};
pub use observability::{
    init_logging, log_outputs_written, log_run_failed, log_run_start, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use ontology::{InMemoryOntology, Ontology};
pub use pipeline::{
    column_manifest, featurize_all, partition, preprocess, run, ColumnManifest, CsrParts,
    FeatureMatrix, FeatureRow, LabeledSubject,
};
pub use reservoir::{ReservoirSampler, DEFAULT_RESERVOIR_CAPACITY, DEFAULT_RESERVOIR_SEED};
pub use time_bins::{TimeBinEdge, TimeBinWindow, TimeBins};
pub use vocabulary::{
    decile_boundaries, fingerprint_columns, ColumnVocabulary, CountPreprocessState,
    NumericColumns, VocabularyBuilder,
};
