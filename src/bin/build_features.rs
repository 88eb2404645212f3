use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use favorita_features::{
    add_target, data_signature, init_logging, load_observations, log_artifact_written,
    log_run_start, logging_config_from_env, pipeline_config_from_env, split_train_gap_test,
    write_feature_csv, FeaturePipeline, FileSignature, FitSummary, SplitConfig, SplitInfo,
};
use serde::Serialize;

const HISTORY_FILE: &str = "train.csv";

#[derive(Debug, Serialize)]
struct RunMetadata {
    built_at: String,
    schema_version: u32,
    schema_fingerprint: String,
    missing_fill: f64,
    split: SplitInfo,
    fit: FitSummary,
    pipeline_file: String,
    data_signature: Vec<FileSignature>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    let pipeline_cfg = pipeline_config_from_env();
    log_run_start(&logging_cfg, &pipeline_cfg);

    let history_path = std::env::var("FAV_HISTORY_CSV")
        .map(PathBuf::from)
        .unwrap_or_else(|_| pipeline_cfg.data_dir.join(HISTORY_FILE));
    let output_dir = std::env::var("FAV_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("out"));
    let missing_fill = match std::env::var("FAV_MISSING_FILL") {
        Ok(raw) => raw.trim().parse::<f64>()?,
        Err(_) => 0.0,
    };
    fs::create_dir_all(&output_dir)?;

    let mut rows = load_observations(&history_path)?;
    add_target(&mut rows);

    let split = split_train_gap_test(&rows, &SplitConfig::default())?;
    let fitted = FeaturePipeline::new(pipeline_cfg.clone()).fit(&split.train_fit)?;
    let schema = fitted.schema().clone();

    let train_features = fitted.transform(&split.train_fit);
    let test_features = fitted.transform(&split.test);

    let train_path = output_dir.join("features_train.csv");
    write_feature_csv(&train_path, &schema, &train_features, missing_fill)?;
    log_artifact_written("features_train", &train_path);

    let test_path = output_dir.join("features_test.csv");
    write_feature_csv(&test_path, &schema, &test_features, missing_fill)?;
    log_artifact_written("features_test", &test_path);

    let pipeline_path = output_dir.join("feature_pipeline.json");
    fitted.save(&pipeline_path)?;
    log_artifact_written("pipeline", &pipeline_path);

    let schema_path = output_dir.join("features.json");
    fs::write(&schema_path, serde_json::to_string_pretty(&schema)?)?;
    log_artifact_written("schema", &schema_path);

    let metadata = RunMetadata {
        built_at: Utc::now().to_rfc3339(),
        schema_version: schema.version,
        schema_fingerprint: schema.fingerprint.clone(),
        missing_fill,
        split: split.info,
        fit: fitted.summary().clone(),
        pipeline_file: pipeline_path.display().to_string(),
        data_signature: data_signature(&pipeline_cfg.data_dir, &[history_path.as_path()])?,
    };
    let metadata_path = output_dir.join("metadata.json");
    fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
    log_artifact_written("metadata", &metadata_path);

    Ok(())
}
