use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use ehr_featurize::{
    column_manifest, count_config_from_env, init_logging, join_labels, load_labels_csv,
    load_ontology_csv, load_subjects_csv, log_outputs_written, log_run_failed, log_run_start,
    logging_config_from_env, partitions_from_env, run, write_features_csv, write_manifest_json,
    CountFeaturizer, LoggingConfig, Ontology,
};

const USAGE: &str = "usage: count_featurize <events.csv> <labels.csv> <output_dir>";

fn main() -> Result<(), Box<dyn Error>> {
    let logging_cfg = logging_config_from_env()?;
    init_logging(&logging_cfg)?;

    featurize_files(&logging_cfg).inspect_err(|err| log_run_failed(err.as_ref()))
}

fn featurize_files(logging_cfg: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(events_path), Some(labels_path), Some(output_dir)) =
        (args.next(), args.next(), args.next())
    else {
        return Err(USAGE.into());
    };
    let output_dir = PathBuf::from(output_dir);

    let count_cfg = count_config_from_env()?;
    let partitions = partitions_from_env()?;
    log_run_start(logging_cfg, &count_cfg, partitions);

    let ontology: Option<Arc<dyn Ontology>> = match std::env::var("EHR_FEATURIZE_ONTOLOGY_PATH") {
        Ok(path) if !path.trim().is_empty() => {
            let loaded: Arc<dyn Ontology> =
                Arc::new(load_ontology_csv(&PathBuf::from(path.trim()))?);
            Some(loaded)
        }
        _ => None,
    };

    let subjects = load_subjects_csv(&PathBuf::from(events_path))?;
    let labels = load_labels_csv(&PathBuf::from(labels_path))?;
    let labeled = join_labels(subjects, labels);

    let mut featurizer = CountFeaturizer::new(count_cfg, ontology)?;
    let matrix = run(&mut featurizer, &labeled, partitions)?;
    let manifest = column_manifest(&featurizer)?;

    std::fs::create_dir_all(&output_dir)?;
    let features_path = output_dir.join("features.csv");
    let manifest_path = output_dir.join("columns.json");
    write_features_csv(&features_path, &matrix)?;
    write_manifest_json(&manifest_path, &manifest)?;
    log_outputs_written(&features_path, &manifest_path, matrix.rows.len(), matrix.nnz());

    Ok(())
}
