//! CSV loading of events, labels and ontology edges, and CSV/JSON output of
//! featurization results.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::event::{Event, EventValue, Label, Subject};
use crate::ontology::InMemoryOntology;
use crate::pipeline::{ColumnManifest, FeatureMatrix, LabeledSubject};

#[derive(Debug, Error)]
pub enum CsvIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event for subject {subject_id} code {code} has both a numeric and a text value")]
    ConflictingValues { subject_id: u64, code: String },
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    subject_id: u64,
    time: Option<NaiveDateTime>,
    code: String,
    numeric_value: Option<f64>,
    text_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelRecord {
    subject_id: u64,
    prediction_time: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct OntologyRecord {
    code: String,
    parent: String,
}

#[derive(Debug, Serialize)]
struct FeatureRecord {
    subject_id: u64,
    prediction_time: NaiveDateTime,
    column: usize,
    value: f64,
}

/// Reads `subject_id,time,code,numeric_value,text_value` rows.
///
/// Rows keep file order within a subject; subjects come back sorted by id.
pub fn load_subjects_csv(path: &Path) -> Result<Vec<Subject>, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut by_subject: BTreeMap<u64, Vec<Event>> = BTreeMap::new();
    let mut rows = 0u64;

    for record in reader.deserialize() {
        let record: EventRecord = record?;
        let value = match (record.numeric_value, record.text_value) {
            (Some(_), Some(_)) => {
                return Err(CsvIoError::ConflictingValues {
                    subject_id: record.subject_id,
                    code: record.code,
                })
            }
            (Some(numeric), None) => EventValue::Numeric(numeric),
            (None, Some(text)) => EventValue::Text(text),
            (None, None) => EventValue::Plain,
        };
        by_subject.entry(record.subject_id).or_default().push(Event {
            code: record.code,
            time: record.time,
            value,
        });
        rows += 1;
    }

    info!(
        component = "csv_io",
        event = "events.loaded",
        path = %path.display(),
        rows,
        subjects = by_subject.len()
    );

    Ok(by_subject
        .into_iter()
        .map(|(subject_id, events)| Subject::new(subject_id, events))
        .collect())
}

/// Reads `subject_id,prediction_time` rows, sorted per subject.
pub fn load_labels_csv(path: &Path) -> Result<BTreeMap<u64, Vec<Label>>, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut by_subject: BTreeMap<u64, Vec<Label>> = BTreeMap::new();
    for record in reader.deserialize() {
        let record: LabelRecord = record?;
        by_subject
            .entry(record.subject_id)
            .or_default()
            .push(Label::new(record.prediction_time));
    }
    for labels in by_subject.values_mut() {
        labels.sort();
    }
    Ok(by_subject)
}

/// Reads `code,parent` edges.
pub fn load_ontology_csv(path: &Path) -> Result<InMemoryOntology, CsvIoError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut ontology = InMemoryOntology::new();
    for record in reader.deserialize() {
        let record: OntologyRecord = record?;
        ontology.add_parent(record.code, record.parent);
    }
    Ok(ontology)
}

/// Pairs subjects with their labels, ordered by subject id.
///
/// Subjects without labels get none. Labels whose subject has no events get
/// a subject with an empty event list, so every label yields one output row.
pub fn join_labels(
    subjects: Vec<Subject>,
    mut labels: BTreeMap<u64, Vec<Label>>,
) -> Vec<LabeledSubject> {
    let mut joined: Vec<LabeledSubject> = subjects
        .into_iter()
        .map(|subject| {
            let subject_labels = labels.remove(&subject.subject_id).unwrap_or_default();
            LabeledSubject::new(subject, subject_labels)
        })
        .collect();

    if !labels.is_empty() {
        info!(
            component = "csv_io",
            event = "labels.subjects_without_events",
            subjects = labels.len()
        );
    }
    joined.extend(labels.into_iter().map(|(subject_id, subject_labels)| {
        LabeledSubject::new(Subject::new(subject_id, Vec::new()), subject_labels)
    }));
    joined.sort_by_key(|item| item.subject.subject_id);
    joined
}

/// Writes one `subject_id,prediction_time,column,value` row per non-zero entry.
pub fn write_features_csv(path: &Path, matrix: &FeatureMatrix) -> Result<(), CsvIoError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in &matrix.rows {
        for entry in &row.values {
            writer.serialize(FeatureRecord {
                subject_id: row.subject_id,
                prediction_time: row.prediction_time,
                column: entry.column,
                value: entry.value,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_manifest_json(path: &Path, manifest: &ColumnManifest) -> Result<(), CsvIoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, manifest)?;
    writer.flush()?;
    Ok(())
}
