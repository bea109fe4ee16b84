use crate::config::ModelName;
use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    InferenceGraph,
    FrozenGraph,
    CoreMl,
    TfLite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Written next to the exported models as `export_manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub created_at: DateTime<Utc>,
    pub model_name: ModelName,
    pub checkpoint: PathBuf,
    pub saliency_maps: bool,
    pub artifacts: Vec<ExportArtifact>,
}

impl ExportManifest {
    #[must_use]
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ExportArtifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<ExportArtifact> {
    if !path.exists() {
        return Err(TrainingError::Export(format!(
            "{kind:?} artifact was not produced: {}",
            path.display()
        )));
    }

    let sha256 = sha256_file(&path)?;
    Ok(ExportArtifact { kind, path, sha256 })
}
