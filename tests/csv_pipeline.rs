use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use ehr_featurize::{
    column_manifest, join_labels, load_labels_csv, load_ontology_csv, load_subjects_csv, run,
    write_features_csv, write_manifest_json, ColumnManifest, CountFeaturizer,
    CountFeaturizerConfig, CsvIoError, EventValue, Ontology,
};
use serde::Deserialize;
use tempfile::tempdir;

const EVENTS: &str = "\
subject_id,time,code,numeric_value,text_value
1,,ADMIN,,
1,2024-01-01T00:00:00,ICD/C,,
1,2024-01-03T00:00:00,LAB,,negative
1,2024-01-05T00:00:00,ICD/C,,
2,2024-01-02T00:00:00,LAB,,negative
2,2024-01-04T00:00:00,HR,72.5,
";

const LABELS: &str = "\
subject_id,prediction_time
1,2024-01-10T00:00:00
1,2024-01-02T00:00:00
2,2024-01-03T00:00:00
";

const ONTOLOGY: &str = "\
code,parent
ICD/C,ICD/B
ICD/B,ICD/A
";

#[derive(Debug, Deserialize)]
struct FeatureLine {
    subject_id: u64,
    prediction_time: NaiveDateTime,
    column: usize,
    value: f64,
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

#[test]
fn loads_events_grouped_by_subject_with_values() {
    let dir = tempdir().expect("tempdir");
    let subjects = load_subjects_csv(&write(dir.path(), "events.csv", EVENTS)).expect("load");

    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0].subject_id, 1);
    assert_eq!(subjects[0].events.len(), 4);
    assert_eq!(subjects[0].events[0].time, None);
    assert_eq!(
        subjects[0].events[2].value,
        EventValue::Text("negative".to_string())
    );
    assert_eq!(subjects[1].events[1].value, EventValue::Numeric(72.5));
}

#[test]
fn labels_are_sorted_per_subject() {
    let dir = tempdir().expect("tempdir");
    let labels = load_labels_csv(&write(dir.path(), "labels.csv", LABELS)).expect("load");
    let first = &labels[&1];
    assert_eq!(first.len(), 2);
    assert!(first[0].prediction_time < first[1].prediction_time);
}

#[test]
fn rows_with_numeric_and_text_values_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = write(
        dir.path(),
        "events.csv",
        "subject_id,time,code,numeric_value,text_value\n3,2024-01-01T00:00:00,LAB,1.0,high\n",
    );
    let err = load_subjects_csv(&path).expect_err("must fail");
    assert!(matches!(
        err,
        CsvIoError::ConflictingValues { subject_id: 3, ref code } if code == "LAB"
    ));
}

#[test]
fn end_to_end_writes_features_and_manifest() {
    let dir = tempdir().expect("tempdir");
    let subjects = load_subjects_csv(&write(dir.path(), "events.csv", EVENTS)).expect("events");
    let labels = load_labels_csv(&write(dir.path(), "labels.csv", LABELS)).expect("labels");
    let ontology: Arc<dyn Ontology> = Arc::new(
        load_ontology_csv(&write(dir.path(), "ontology.csv", ONTOLOGY)).expect("ontology"),
    );
    let labeled = join_labels(subjects, labels);

    let mut featurizer = CountFeaturizer::new(
        CountFeaturizerConfig {
            is_ontology_expansion: true,
            string_value_combination: true,
            ..CountFeaturizerConfig::default()
        },
        Some(ontology),
    )
    .expect("valid config");
    let matrix = run(&mut featurizer, &labeled, 2).expect("run");
    let manifest = column_manifest(&featurizer).expect("manifest");

    assert_eq!(
        manifest.columns,
        vec!["ADMIN", "ICD/A", "ICD/B", "ICD/C", "LAB negative"]
    );
    assert_eq!(matrix.rows.len(), 3);

    let features_path = dir.path().join("features.csv");
    let manifest_path = dir.path().join("columns.json");
    write_features_csv(&features_path, &matrix).expect("write features");
    write_manifest_json(&manifest_path, &manifest).expect("write manifest");

    let mut reader = csv::Reader::from_path(&features_path).expect("open features");
    let lines: Vec<FeatureLine> = reader
        .deserialize()
        .collect::<Result<_, _>>()
        .expect("parse features");
    assert_eq!(lines.len(), matrix.nnz());

    let late_label: Vec<(usize, f64)> = lines
        .iter()
        .filter(|line| line.subject_id == 1 && line.prediction_time.format("%d").to_string() == "10")
        .map(|line| (line.column, line.value))
        .collect();
    assert_eq!(
        late_label,
        vec![(0, 1.0), (1, 2.0), (2, 2.0), (3, 2.0), (4, 1.0)]
    );

    let subject_two: Vec<(usize, f64)> = lines
        .iter()
        .filter(|line| line.subject_id == 2)
        .map(|line| (line.column, line.value))
        .collect();
    assert_eq!(subject_two, vec![(4, 1.0)]);

    let written: ColumnManifest =
        serde_json::from_str(&fs::read_to_string(&manifest_path).expect("read manifest"))
            .expect("parse manifest");
    assert_eq!(written, manifest);
}

#[test]
fn labels_without_events_still_produce_rows() {
    let dir = tempdir().expect("tempdir");
    let subjects = load_subjects_csv(&write(
        dir.path(),
        "events.csv",
        "subject_id,time,code,numeric_value,text_value\n3,2024-01-01T00:00:00,A,,\n",
    ))
    .expect("events");
    let labels = load_labels_csv(&write(
        dir.path(),
        "labels.csv",
        "subject_id,prediction_time\n3,2024-01-02T00:00:00\n1,2024-01-05T00:00:00\n1,2024-01-06T00:00:00\n",
    ))
    .expect("labels");
    let labeled = join_labels(subjects, labels);

    let ids: Vec<u64> = labeled.iter().map(|item| item.subject.subject_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(labeled[0].subject.events.is_empty());

    let mut featurizer =
        CountFeaturizer::new(CountFeaturizerConfig::default(), None).expect("valid config");
    let matrix = run(&mut featurizer, &labeled, 2).expect("run");
    assert_eq!(matrix.rows.len(), 3);
    assert!(matrix.rows[..2].iter().all(|row| row.subject_id == 1 && row.values.is_empty()));
    assert_eq!(matrix.rows[2].values.len(), 1);
}
