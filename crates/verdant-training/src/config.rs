//! Pipeline configuration (YAML).

use crate::error::{TrainingError, TrainingResult};
use crate::layout::CheckpointLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SALIENCY_NODE: &str = "gradients/MobilenetV1/MobilenetV1/Conv2d_0/Conv2D_grad/Conv2DBackpropInput";

/// Networks the external trainer knows how to fine-tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelName {
    #[serde(rename = "resnet_v2_50")]
    ResNet50V2,
    #[serde(rename = "mobilenet_v1")]
    MobileNetV1,
}

/// Channel biases and scale baked into the CoreML image input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreMlPreprocessing {
    pub red_bias: f64,
    pub green_bias: f64,
    pub blue_bias: f64,
    pub image_scale: Option<f64>,
}

/// Per-network constants used when training and exporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub name: ModelName,
    pub trainable_scopes: &'static str,
    pub output_node: &'static str,
    pub coreml: CoreMlPreprocessing,
}

impl ModelName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResNet50V2 => "resnet_v2_50",
            Self::MobileNetV1 => "mobilenet_v1",
        }
    }

    #[must_use]
    pub fn profile(self) -> ModelProfile {
        match self {
            Self::ResNet50V2 => ModelProfile {
                name: self,
                trainable_scopes: "resnet_v2_50/logits",
                output_node: "resnet_v2_50/predictions/Reshape_1",
                coreml: CoreMlPreprocessing {
                    red_bias: -123.68,
                    green_bias: -116.78,
                    blue_bias: -103.94,
                    image_scale: None,
                },
            },
            Self::MobileNetV1 => ModelProfile {
                name: self,
                trainable_scopes: "MobilenetV1/Logits",
                output_node: "MobilenetV1/Predictions/Reshape_1",
                coreml: CoreMlPreprocessing {
                    red_bias: -1.0,
                    green_bias: -1.0,
                    blue_bias: -1.0,
                    image_scale: Some(2.0 / 255.0),
                },
            },
        }
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ModelProfile {
    /// Comma-separated graph outputs, including the input-gradient node for saliency maps.
    #[must_use]
    pub fn output_node_names(&self, enable_saliency_maps: bool) -> String {
        if enable_saliency_maps {
            format!("{},{SALIENCY_NODE}", self.output_node)
        } else {
            self.output_node.to_string()
        }
    }
}

/// Stop the loop once validation accuracy has plateaued above a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStop {
    pub min_accuracy: f32,
    #[serde(default = "default_patience_secs")]
    pub patience_secs: u64,
}

fn default_patience_secs() -> u64 {
    60 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pretrained_checkpoint_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub dataset_dir: PathBuf,
    pub model_name: ModelName,

    #[serde(default = "default_eval_every_n_step")]
    pub eval_every_n_step: u64,

    /// Step budget; the loop ends once the trainer reaches it.
    #[serde(default)]
    pub max_number_of_steps: Option<u64>,

    /// Extra trainer flags, applied after the defaults.
    #[serde(default)]
    pub extra_train_params: serde_yaml::Mapping,

    #[serde(default)]
    pub freeze_graph_path: Option<PathBuf>,

    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_train_script")]
    pub train_script: PathBuf,

    #[serde(default = "default_eval_script")]
    pub eval_script: PathBuf,

    #[serde(default = "default_export_inference_graph_script")]
    pub export_inference_graph_script: PathBuf,

    /// CoreML conversion is skipped when unset.
    #[serde(default)]
    pub coreml_convert_script: Option<PathBuf>,

    #[serde(default = "default_toco_path")]
    pub toco_path: String,

    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,

    #[serde(default)]
    pub early_stop: Option<EarlyStop>,

    /// Pause between rounds.
    #[serde(default)]
    pub eval_interval_secs: u64,
}

fn default_eval_every_n_step() -> u64 {
    50
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_train_script() -> PathBuf {
    PathBuf::from("research/slim/train_image_classifier.py")
}

fn default_eval_script() -> PathBuf {
    PathBuf::from("research/slim/eval_image_classifier.py")
}

fn default_export_inference_graph_script() -> PathBuf {
    PathBuf::from("research/slim/export_inference_graph.py")
}

fn default_toco_path() -> String {
    "toco".to_string()
}

fn default_dataset_name() -> String {
    "plants".to_string()
}

impl PipelineConfig {
    pub fn load(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> TrainingResult<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        let required = [
            ("pretrained_checkpoint_path", &self.pretrained_checkpoint_path),
            ("checkpoint_path", &self.checkpoint_path),
            ("dataset_dir", &self.dataset_dir),
        ];
        for (key, value) in required {
            if value.as_os_str().is_empty() {
                return Err(TrainingError::InvalidConfig(format!("{key} is required")));
            }
        }
        if self.eval_every_n_step == 0 {
            return Err(TrainingError::InvalidConfig("eval_every_n_step must be >= 1".to_string()));
        }
        if self.python.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("python must not be empty".to_string()));
        }
        if let Some(early_stop) = &self.early_stop {
            if !early_stop.min_accuracy.is_finite() {
                return Err(TrainingError::InvalidConfig("early_stop.min_accuracy must be finite".to_string()));
            }
        }
        for key in self.extra_train_params.keys() {
            if key.as_str().is_none() {
                return Err(TrainingError::InvalidConfig(format!(
                    "extra_train_params keys must be strings, got {key:?}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn profile(&self) -> ModelProfile {
        self.model_name.profile()
    }

    #[must_use]
    pub fn layout(&self) -> CheckpointLayout {
        CheckpointLayout::new(self.checkpoint_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
pretrained_checkpoint_path: /models/mobilenet_v1_1.0_224.ckpt
checkpoint_path: /runs/plants
dataset_dir: /data/plants
model_name: mobilenet_v1
";

    #[test]
    fn test_minimal_config_defaults() {
        let config = PipelineConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.model_name, ModelName::MobileNetV1);
        assert_eq!(config.eval_every_n_step, 50);
        assert_eq!(config.python, "python3");
        assert_eq!(config.toco_path, "toco");
        assert_eq!(config.dataset_name, "plants");
        assert!(config.max_number_of_steps.is_none());
        assert!(config.extra_train_params.is_empty());
        assert!(config.coreml_convert_script.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = format!(
            "{MINIMAL}eval_every_n_step: 200\nmax_number_of_steps: 1000\nfreeze_graph_path: tools/freeze_graph.py\n\
             extra_train_params:\n  learning_rate: 0.01\n  batch_size: 16\n\
             early_stop:\n  min_accuracy: 0.95\n"
        );
        let config = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.eval_every_n_step, 200);
        assert_eq!(config.max_number_of_steps, Some(1000));
        assert_eq!(config.freeze_graph_path, Some(PathBuf::from("tools/freeze_graph.py")));
        assert_eq!(config.extra_train_params.len(), 2);
        let early_stop = config.early_stop.unwrap();
        assert!((early_stop.min_accuracy - 0.95).abs() < f32::EPSILON);
        assert_eq!(early_stop.patience_secs, 3600);
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let yaml = MINIMAL.replace("mobilenet_v1", "vgg_16");
        assert!(PipelineConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let yaml = MINIMAL.replace("dataset_dir: /data/plants\n", "");
        assert!(PipelineConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_zero_eval_step_is_rejected() {
        let yaml = format!("{MINIMAL}eval_every_n_step: 0\n");
        assert!(matches!(PipelineConfig::from_yaml(&yaml), Err(TrainingError::InvalidConfig(_))));
    }

    #[test]
    fn test_output_node_names() {
        let profile = ModelName::MobileNetV1.profile();
        assert_eq!(profile.output_node_names(false), "MobilenetV1/Predictions/Reshape_1");
        assert_eq!(
            profile.output_node_names(true),
            format!("MobilenetV1/Predictions/Reshape_1,{SALIENCY_NODE}")
        );
        assert_eq!(ModelName::ResNet50V2.profile().trainable_scopes, "resnet_v2_50/logits");
    }
}
