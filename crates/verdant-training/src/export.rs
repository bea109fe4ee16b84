//! Export of a trained checkpoint to deployable model formats.
//!
//! Each format is produced by an external tool run as a subprocess:
//! inference graph, frozen graph, CoreML model (optional) and TFLite flatbuffer.
//! Produced files are hashed into `export_manifest.json`.

use crate::artifacts::{make_artifact, ArtifactKind, ExportManifest};
use crate::checkpoint::latest_checkpoint;
use crate::config::PipelineConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::process::{CommandParams, CommandSpec};
use crate::runner::ScriptRunner;
use chrono::Utc;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const INPUT_NODE: &str = "input";
pub const INPUT_SHAPE: [u32; 4] = [1, 224, 224, 3];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Also export the input-gradient node used to draw saliency maps.
    pub enable_saliency_maps: bool,
}

fn input_shape_csv() -> String {
    INPUT_SHAPE.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// Export commands for `checkpoint`, in the order they must run.
#[must_use]
pub fn export_commands(config: &PipelineConfig, checkpoint: &Path, options: ExportOptions) -> Vec<(ArtifactKind, CommandSpec)> {
    let layout = config.layout();
    let profile = config.profile();
    let output_nodes = profile.output_node_names(options.enable_saliency_maps);
    let inference_graph = layout.inference_graph_path();
    let frozen_graph = layout.frozen_graph_path();

    let mut inference_params = CommandParams::new()
        .with("model_name", config.model_name.as_str())
        .with("dataset_name", config.dataset_name.as_str())
        .with("dataset_dir", config.dataset_dir.as_path())
        .with("output_file", inference_graph.as_path());
    if options.enable_saliency_maps {
        inference_params.set("enable_saliency_maps", true);
    }

    let mut commands = vec![
        (
            ArtifactKind::InferenceGraph,
            CommandSpec::new("G", config.python.as_str())
                .arg(config.export_inference_graph_script.display().to_string())
                .params(inference_params),
        ),
        (
            ArtifactKind::FrozenGraph,
            CommandSpec::new("F", config.python.as_str())
                .arg(config.freeze_graph_path.as_deref().unwrap_or(Path::new("")).display().to_string())
                .params(
                    CommandParams::new()
                        .with("input_graph", inference_graph.as_path())
                        .with("output_graph", frozen_graph.as_path())
                        .with("input_checkpoint", checkpoint)
                        .with("output_node_names", output_nodes.as_str())
                        .with("input_binary", "true"),
                ),
        ),
    ];

    if let Some(script) = &config.coreml_convert_script {
        let feature_names =
            output_nodes.split(',').map(|node| format!("{node}:0")).collect::<Vec<_>>().join(",");
        let shape_dict = format!("{{\"{INPUT_NODE}:0\":[{}]}}", input_shape_csv());
        let coreml = profile.coreml;
        let mut params = CommandParams::new()
            .with("tf_model_path", frozen_graph.as_path())
            .with("mlmodel_path", layout.coreml_path().as_path())
            .with("output_feature_names", feature_names)
            .with("image_input_names", format!("{INPUT_NODE}:0"))
            .with("input_name_shape_dict", shape_dict)
            .with("red_bias", coreml.red_bias.to_string())
            .with("green_bias", coreml.green_bias.to_string())
            .with("blue_bias", coreml.blue_bias.to_string());
        if let Some(scale) = coreml.image_scale {
            params.set("image_scale", scale.to_string());
        }
        commands.push((
            ArtifactKind::CoreMl,
            CommandSpec::new("C", config.python.as_str()).arg(script.display().to_string()).params(params),
        ));
    }

    commands.push((
        ArtifactKind::TfLite,
        CommandSpec::new("L", config.toco_path.as_str()).params(
            CommandParams::new()
                .with("input_file", frozen_graph.as_path())
                .with("input_format", "TENSORFLOW_GRAPHDEF")
                .with("output_format", "TFLITE")
                .with("output_file", layout.tflite_path().as_path())
                .with("inference_type", "FLOAT")
                .with("input_type", "FLOAT")
                .with("input_arrays", INPUT_NODE)
                .with("output_arrays", output_nodes.as_str())
                .with("input_shapes", input_shape_csv()),
        ),
    ));
    commands
}

fn artifact_path(config: &PipelineConfig, kind: ArtifactKind) -> std::path::PathBuf {
    let layout = config.layout();
    match kind {
        ArtifactKind::InferenceGraph => layout.inference_graph_path(),
        ArtifactKind::FrozenGraph => layout.frozen_graph_path(),
        ArtifactKind::CoreMl => layout.coreml_path(),
        ArtifactKind::TfLite => layout.tflite_path(),
    }
}

/// Export the latest checkpoint under `config.checkpoint_path`.
pub async fn export_models(
    config: &PipelineConfig,
    runner: &dyn ScriptRunner,
    cancel: &CancellationToken,
    options: ExportOptions,
) -> TrainingResult<ExportManifest> {
    if config.freeze_graph_path.is_none() {
        return Err(TrainingError::Export("freeze_graph_path is not configured".to_string()));
    }
    let checkpoint = latest_checkpoint(&config.checkpoint_path)?
        .ok_or_else(|| TrainingError::MissingCheckpoint(config.checkpoint_path.clone()))?;
    if config.coreml_convert_script.is_none() {
        warn!("coreml_convert_script is not configured; skipping CoreML export");
    }

    info!(checkpoint = %checkpoint.display(), runner = runner.id(), ?options, "exporting models");
    let mut artifacts = Vec::new();
    for (kind, spec) in export_commands(config, &checkpoint, options) {
        let outcome = runner.run(&spec, cancel).await?;
        if outcome.cancelled {
            return Err(TrainingError::Export(format!("{kind:?} export was cancelled")));
        }
        outcome
            .check(&spec.program)
            .map_err(|e| TrainingError::Export(format!("{kind:?} export failed: {e}")))?;
        let artifact = make_artifact(kind, artifact_path(config, kind))?;
        info!(kind = ?kind, path = %artifact.path.display(), sha256 = %artifact.sha256, "exported");
        artifacts.push(artifact);
    }

    let manifest = ExportManifest {
        created_at: Utc::now(),
        model_name: config.model_name,
        checkpoint,
        saliency_maps: options.enable_saliency_maps,
        artifacts,
    };
    manifest.write(&config.layout().export_manifest_path())?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::write_checkpoint_index;
    use crate::process::CommandOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes whatever output file each export command names.
    #[derive(Default)]
    struct FakeExporter {
        fail_label: Option<&'static str>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl ScriptRunner for FakeExporter {
        fn id(&self) -> &'static str {
            "fake"
        }

        async fn run(&self, spec: &CommandSpec, _cancel: &CancellationToken) -> TrainingResult<CommandOutcome> {
            self.calls.lock().unwrap().push(spec.clone());
            let failed = self.fail_label == Some(spec.label.as_str());
            if !failed {
                for key in ["output_file", "output_graph", "mlmodel_path"] {
                    if let Some(path) = spec.params.value(key) {
                        std::fs::write(path, spec.label.as_bytes())?;
                    }
                }
            }
            Ok(CommandOutcome { code: Some(i32::from(failed)), success: !failed, lines: 0, cancelled: false })
        }
    }

    fn config(root: &Path, coreml: bool) -> PipelineConfig {
        let mut yaml = format!(
            "pretrained_checkpoint_path: /models/mobilenet_v1.ckpt\ncheckpoint_path: {}\ndataset_dir: /data/plants\n\
             model_name: mobilenet_v1\nfreeze_graph_path: tools/freeze_graph.py\n",
            root.display()
        );
        if coreml {
            yaml.push_str("coreml_convert_script: tools/convert_coreml.py\n");
        }
        PipelineConfig::from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_export_runs_all_steps_and_writes_manifest() {
        let temp = TempDir::new().unwrap();
        let checkpoint = write_checkpoint_index(temp.path(), 300).unwrap();
        let config = config(temp.path(), true);
        let runner = FakeExporter::default();

        let manifest = export_models(&config, &runner, &CancellationToken::new(), ExportOptions::default())
            .await
            .unwrap();

        assert_eq!(manifest.checkpoint, checkpoint);
        assert_eq!(manifest.artifacts.len(), 4);
        assert!(config.layout().export_manifest_path().exists());

        let calls = runner.calls.lock().unwrap();
        let labels: Vec<_> = calls.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["G", "F", "C", "L"]);
        assert_eq!(calls[1].params.value("input_checkpoint"), Some(checkpoint.display().to_string().as_str()));
        assert_eq!(calls[1].params.value("output_node_names"), Some("MobilenetV1/Predictions/Reshape_1"));
        assert_eq!(calls[2].params.value("input_name_shape_dict"), Some(r#"{"input:0":[1,224,224,3]}"#));
        assert_eq!(calls[2].params.value("image_scale"), Some((2.0_f64 / 255.0).to_string().as_str()));
        assert_eq!(calls[3].program, "toco");
        assert_eq!(calls[3].params.value("input_shapes"), Some("1,224,224,3"));
    }

    #[test]
    fn test_saliency_maps_extend_output_nodes() {
        let temp = TempDir::new().unwrap();
        write_checkpoint_index(temp.path(), 10).unwrap();
        let config = config(temp.path(), true);
        let options = ExportOptions { enable_saliency_maps: true };

        let commands = export_commands(&config, temp.path(), options);
        let (_, graph) = &commands[0];
        assert_eq!(graph.params.get("enable_saliency_maps"), Some(&crate::process::ParamValue::Flag));
        let (_, coreml) = &commands[2];
        let features = coreml.params.value("output_feature_names").unwrap();
        assert_eq!(features.split(',').count(), 2);
        assert!(features.split(',').all(|f| f.ends_with(":0")));
    }

    #[tokio::test]
    async fn test_coreml_is_skipped_without_script() {
        let temp = TempDir::new().unwrap();
        write_checkpoint_index(temp.path(), 10).unwrap();
        let config = config(temp.path(), false);
        let runner = FakeExporter::default();

        let manifest = export_models(&config, &runner, &CancellationToken::new(), ExportOptions::default())
            .await
            .unwrap();
        assert!(manifest.artifact(ArtifactKind::CoreMl).is_none());
        assert_eq!(manifest.artifacts.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_step_is_named() {
        let temp = TempDir::new().unwrap();
        write_checkpoint_index(temp.path(), 10).unwrap();
        let config = config(temp.path(), false);
        let runner = FakeExporter { fail_label: Some("F"), ..FakeExporter::default() };

        let err = export_models(&config, &runner, &CancellationToken::new(), ExportOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("FrozenGraph"), "{err}");
        assert!(!config.layout().export_manifest_path().exists());
    }

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), false);
        let err = export_models(&config, &FakeExporter::default(), &CancellationToken::new(), ExportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::MissingCheckpoint(_)));
    }
}
