//! Two-phase featurizer contract: preprocess partitions, merge, featurize.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::event::{ColumnValue, Label, Subject};

#[derive(Debug, Error, PartialEq)]
pub enum FeaturizerError {
    #[error("invalid featurizer config: {0}")]
    InvalidConfig(String),
    #[error("duplicate time bin edge: {0}")]
    DuplicateTimeBin(String),
    #[error("ontology expansion requested but no ontology was supplied")]
    MissingOntology,
    #[error("featurizer used before finalize")]
    NotFinalized,
    #[error("finalize called without any preprocessing data")]
    NoPreprocessData,
    #[error("labels for subject {subject_id} are not sorted by prediction time")]
    UnsortedLabels { subject_id: u64 },
    #[error("events for subject {subject_id} go back in time at {time}")]
    EventsOutOfOrder { subject_id: u64, time: NaiveDateTime },
    #[error("subject {subject_id} has no birth date")]
    MissingBirthDate { subject_id: u64 },
    #[error("cannot normalize with degenerate statistics: {0}")]
    DegenerateStatistics(String),
    #[error("column {column} is outside the vocabulary ({num_columns} columns)")]
    UnknownColumn { column: usize, num_columns: usize },
}

/// A featurizer maps a subject and its sorted labels to one sparse vector per label.
///
/// Featurizers that need a vocabulary or statistics first run
/// [`Featurizer::accumulate`] over every partition of the corpus, starting from
/// [`Featurizer::initial_preprocess_state`], then receive all partition states in
/// [`Featurizer::finalize`]. `accumulate` must not mutate the featurizer so that
/// partitions can run on separate workers.
pub trait Featurizer {
    type State: Send;

    fn needs_preprocessing(&self) -> bool;

    /// Total width of the emitted vectors.
    fn num_columns(&self) -> Result<usize, FeaturizerError>;

    fn initial_preprocess_state(&self) -> Self::State;

    fn accumulate(
        &self,
        state: &mut Self::State,
        subject: &Subject,
        labels: &[Label],
    ) -> Result<(), FeaturizerError>;

    fn finalize(&mut self, states: Vec<Self::State>) -> Result<(), FeaturizerError>;

    /// Returns exactly `labels.len()` vectors, in label order.
    fn featurize(
        &self,
        subject: &Subject,
        labels: &[Label],
    ) -> Result<Vec<Vec<ColumnValue>>, FeaturizerError>;

    fn column_name(&self, column: usize) -> Result<String, FeaturizerError>;
}

pub(crate) fn ensure_labels_sorted(subject_id: u64, labels: &[Label]) -> Result<(), FeaturizerError> {
    if labels
        .windows(2)
        .any(|pair| pair[1].prediction_time < pair[0].prediction_time)
    {
        return Err(FeaturizerError::UnsortedLabels { subject_id });
    }
    Ok(())
}
