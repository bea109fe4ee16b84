//! Integration tests for `verdant pipeline`, with shell scripts standing in
//! for the training framework.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const FAKE_TRAIN: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --train_dir=*) dir="${arg#*=}" ;;
    --max_number_of_steps=*) step="${arg#*=}" ;;
  esac
done
mkdir -p "$dir"
: > "$dir/model.ckpt-$step.index"
printf 'model_checkpoint_path: "model.ckpt-%s"\n' "$step" > "$dir/checkpoint"
echo "trained to $step"
"#;

const FAKE_EXPORT: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --output_file=*|--output_graph=*|--mlmodel_path=*) echo "model" > "${arg#*=}" ;;
  esac
done
"#;

fn write_config(temp: &TempDir, extra: &str) -> std::path::PathBuf {
    let root = temp.path();
    let config = format!(
        "pretrained_checkpoint_path: {root}/pretrained.ckpt\n\
         checkpoint_path: {root}/run\n\
         dataset_dir: {root}/data\n\
         model_name: mobilenet_v1\n\
         python: sh\n{extra}",
        root = root.display()
    );
    let path = root.join("pipeline.yaml");
    fs::write(&path, config).unwrap();
    path
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[test]
fn test_pipeline_missing_config() {
    let temp = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(temp.path().join("missing.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load pipeline config"));
}

#[test]
fn test_pipeline_rejects_unknown_model() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, "");
    let yaml = fs::read_to_string(&config).unwrap().replace("mobilenet_v1", "vgg_16");
    fs::write(&config, yaml).unwrap();

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline").arg(&config).assert().failure();
}

#[test]
fn test_export_plot_renders_chart_from_log() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, "");
    let run = temp.path().join("run");
    fs::create_dir_all(&run).unwrap();
    fs::write(
        run.join("accuracy.log"),
        "{\"step\":50,\"time\":1.0,\"accuracy\":0.4,\"recall_5\":0.8,\"training\":{\"accuracy\":0.5,\"recall_5\":0.9}}\n\
         not a record\n\
         {\"step\":100,\"time\":2.0,\"accuracy\":0.6,\"recall_5\":0.9,\"training\":{\"accuracy\":0.7,\"recall_5\":0.95}}\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(&config)
        .arg("--export-plot")
        .assert()
        .success()
        .stdout(predicate::str::contains("Chart written to"));

    let svg = fs::read_to_string(run.join("accuracy.svg")).unwrap();
    assert!(svg.contains("Validation Top-5"));
}

#[test]
fn test_export_plot_takes_precedence_over_export_models() {
    let temp = TempDir::new().unwrap();
    let run = temp.path().join("run");
    fs::create_dir_all(&run).unwrap();
    fs::write(run.join("accuracy.log"), "{\"step\":50,\"time\":1.0,\"accuracy\":0.4,\"recall_5\":0.8}\n").unwrap();
    let config = write_config(&temp, "freeze_graph_path: freeze_graph.py\n");

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(&config)
        .arg("--export-plot")
        .arg("--export-models")
        .assert()
        .success()
        .stdout(predicate::str::contains("Chart written to"))
        .stdout(predicate::str::contains("Models exported").not())
        .stderr(predicate::str::contains("no checkpoint found").not());

    assert!(run.join("accuracy.svg").exists());
    assert!(!run.join("export_manifest.json").exists());
}

#[cfg(unix)]
#[test]
fn test_train_eval_loop_until_step_budget() {
    let temp = TempDir::new().unwrap();
    let train = temp.path().join("train.sh");
    let eval = temp.path().join("eval.sh");
    write_script(&train, FAKE_TRAIN);
    write_script(&eval, "echo evaluating\n");
    let config = write_config(
        &temp,
        &format!(
            "train_script: {}\neval_script: {}\nmax_number_of_steps: 100\n",
            train.display(),
            eval.display()
        ),
    );

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("T| trained to 50"))
        .stdout(predicate::str::contains("T| trained to 100"))
        .stdout(predicate::str::contains("E| evaluating"))
        .stdout(predicate::str::contains("Step budget reached"));

    let log = fs::read_to_string(temp.path().join("run/accuracy.log")).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(temp.path().join("run/accuracy.svg").exists());
    assert!(temp.path().join("run/eval_events").is_dir());
}

#[cfg(unix)]
#[test]
fn test_failing_trainer_fails_the_loop() {
    let temp = TempDir::new().unwrap();
    let train = temp.path().join("train.sh");
    write_script(&train, "echo boom 1>&2\nexit 1\n");
    let config = write_config(&temp, &format!("train_script: {}\n", train.display()));

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("T| boom"))
        .stderr(predicate::str::contains("Train/eval loop failed"));
}

#[cfg(unix)]
#[test]
fn test_export_models_writes_manifest() {
    let temp = TempDir::new().unwrap();
    let export = temp.path().join("export.sh");
    write_script(&export, FAKE_EXPORT);
    let run = temp.path().join("run");
    fs::create_dir_all(&run).unwrap();
    fs::write(run.join("model.ckpt-300.index"), "").unwrap();
    fs::write(run.join("checkpoint"), "model_checkpoint_path: \"model.ckpt-300\"\n").unwrap();

    let script = export.display().to_string();
    let config = write_config(
        &temp,
        &format!(
            "export_inference_graph_script: {script}\nfreeze_graph_path: {script}\n\
             coreml_convert_script: {script}\ntoco_path: {script}\n"
        ),
    );

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(&config)
        .arg("--export-models")
        .arg("--enable-saliency-maps")
        .assert()
        .success()
        .stdout(predicate::str::contains("Models exported"));

    for file in ["inference_graph.pb", "frozen_graph.pb", "plant.mlmodel", "plant.tflite"] {
        assert!(run.join(file).exists(), "missing {file}");
    }
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run.join("export_manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["artifacts"].as_array().unwrap().len(), 4);
    assert_eq!(manifest["saliency_maps"], serde_json::Value::Bool(true));
}

#[test]
fn test_export_models_without_checkpoint() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, "freeze_graph_path: freeze_graph.py\n");

    let mut cmd = Command::cargo_bin("verdant").unwrap();
    cmd.arg("pipeline")
        .arg(&config)
        .arg("--export-models")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no checkpoint found"));
}
