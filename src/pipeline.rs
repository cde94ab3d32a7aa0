//! Three-phase driver: parallel preprocessing over partitions, a single
//! merge, then parallel featurization over subjects.

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::event::{ColumnValue, Label, Subject};
use crate::featurizer::{Featurizer, FeaturizerError};
use crate::vocabulary::fingerprint_columns;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSubject {
    pub subject: Subject,
    pub labels: Vec<Label>,
}

impl LabeledSubject {
    pub fn new(subject: Subject, labels: Vec<Label>) -> Self {
        Self { subject, labels }
    }
}

/// One output row: the sparse vector for a single label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub subject_id: u64,
    pub prediction_time: NaiveDateTime,
    pub values: Vec<ColumnValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub num_columns: usize,
    pub rows: Vec<FeatureRow>,
}

/// Compressed sparse row layout of a [`FeatureMatrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrParts {
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
    pub data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|row| row.values.len()).sum()
    }

    pub fn to_csr(&self) -> CsrParts {
        let mut indptr = Vec::with_capacity(self.rows.len() + 1);
        let mut indices = Vec::with_capacity(self.nnz());
        let mut data = Vec::with_capacity(self.nnz());
        indptr.push(0);
        for row in &self.rows {
            for value in &row.values {
                indices.push(value.column);
                data.push(value.value);
            }
            indptr.push(indices.len());
        }
        CsrParts {
            indptr,
            indices,
            data,
        }
    }
}

/// Column names and a fingerprint of the fitted featurizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnManifest {
    pub num_columns: usize,
    pub fingerprint: String,
    pub columns: Vec<String>,
}

pub fn column_manifest<F: Featurizer>(featurizer: &F) -> Result<ColumnManifest, FeaturizerError> {
    let num_columns = featurizer.num_columns()?;
    let columns = (0..num_columns)
        .map(|column| featurizer.column_name(column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ColumnManifest {
        num_columns,
        fingerprint: fingerprint_columns(&columns),
        columns,
    })
}

/// Splits subjects into at most `partitions` contiguous chunks. Always returns
/// at least one (possibly empty) partition.
pub fn partition(subjects: &[LabeledSubject], partitions: usize) -> Vec<&[LabeledSubject]> {
    if subjects.is_empty() {
        return vec![subjects];
    }
    let chunk_size = subjects.len().div_ceil(partitions.max(1));
    subjects.chunks(chunk_size).collect()
}

/// Phase 1: one preprocessing state per partition, in partition order.
pub fn preprocess<F>(
    featurizer: &F,
    partitions: &[&[LabeledSubject]],
) -> Result<Vec<F::State>, FeaturizerError>
where
    F: Featurizer + Sync,
{
    partitions
        .par_iter()
        .enumerate()
        .map(|(index, partition)| {
            let mut state = featurizer.initial_preprocess_state();
            for item in partition.iter() {
                featurizer.accumulate(&mut state, &item.subject, &item.labels)?;
            }
            info!(
                component = "pipeline",
                event = "preprocess.partition.finish",
                partition = index,
                subjects = partition.len()
            );
            Ok::<_, FeaturizerError>(state)
        })
        .collect()
}

/// Phase 3: featurizes every subject, keeping input order.
pub fn featurize_all<F>(
    featurizer: &F,
    subjects: &[LabeledSubject],
) -> Result<FeatureMatrix, FeaturizerError>
where
    F: Featurizer + Sync,
{
    let num_columns = featurizer.num_columns()?;
    let per_subject = subjects
        .par_iter()
        .map(|item| featurizer.featurize(&item.subject, &item.labels))
        .collect::<Result<Vec<_>, _>>()?;

    let rows: Vec<FeatureRow> = subjects
        .iter()
        .zip(per_subject)
        .flat_map(|(item, vectors)| {
            let subject_id = item.subject.subject_id;
            item.labels
                .iter()
                .zip(vectors)
                .map(move |(label, values)| FeatureRow {
                    subject_id,
                    prediction_time: label.prediction_time,
                    values,
                })
        })
        .collect();

    let matrix = FeatureMatrix { num_columns, rows };
    info!(
        component = "pipeline",
        event = "featurize.finish",
        subjects = subjects.len(),
        rows = matrix.rows.len(),
        num_columns,
        nnz = matrix.nnz()
    );
    Ok(matrix)
}

/// Runs all phases. Preprocessing is skipped when the featurizer does not need it.
pub fn run<F>(
    featurizer: &mut F,
    subjects: &[LabeledSubject],
    partitions: usize,
) -> Result<FeatureMatrix, FeaturizerError>
where
    F: Featurizer + Sync,
{
    info!(
        component = "pipeline",
        event = "pipeline.start",
        subjects = subjects.len(),
        partitions,
        needs_preprocessing = featurizer.needs_preprocessing()
    );
    if featurizer.needs_preprocessing() {
        let chunks = partition(subjects, partitions);
        let states = preprocess(featurizer, &chunks)?;
        featurizer.finalize(states)?;
    }
    featurize_all(featurizer, subjects)
}
