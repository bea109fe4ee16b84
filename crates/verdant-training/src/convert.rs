//! Dataset conversion: manifest + image folders -> sharded record files.

use crate::error::{TrainingError, TrainingResult};
use crate::labels::{write_label_file, ClassIndex, DEFAULT_OTHERS_CLASS};
use crate::layout::DatasetLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::split::{split_by_directory, LabeledImage, SplitName, DEFAULT_SPLIT_SEED, DEFAULT_VALIDATION_RATIO};
use image::ImageFormat;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use verdant_records::{image_example, RecordWriter};

pub const DEFAULT_NUM_SHARDS: usize = 5;
pub const DEFAULT_DATASET_NAME: &str = "plants";
const IMAGE_FORMAT: &str = "jpg";

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub num_shards: usize,
    pub validation_ratio: f64,
    pub seed: u64,
    pub dataset_name: String,
    /// Class pinned to label 0; `None` disables the reserved class.
    pub others_class: Option<String>,
    /// Leave the directory untouched when every shard file is already present.
    pub skip_existing: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            num_shards: DEFAULT_NUM_SHARDS,
            validation_ratio: DEFAULT_VALIDATION_RATIO,
            seed: DEFAULT_SPLIT_SEED,
            dataset_name: DEFAULT_DATASET_NAME.to_string(),
            others_class: Some(DEFAULT_OTHERS_CLASS.to_string()),
            skip_existing: false,
        }
    }
}

impl ConvertOptions {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.num_shards == 0 {
            return Err(TrainingError::Dataset("num_shards must be >= 1".to_string()));
        }
        if !self.validation_ratio.is_finite() || self.validation_ratio <= 0.0 || self.validation_ratio > 1.0 {
            return Err(TrainingError::Dataset("validation_ratio must be in (0, 1]".to_string()));
        }
        if self.dataset_name.trim().is_empty() {
            return Err(TrainingError::Dataset("dataset_name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub num_classes: usize,
    pub train: usize,
    pub validation: usize,
    pub validation_classes: usize,
    pub shards: Vec<PathBuf>,
    pub skipped: bool,
}

/// Per-split example counts, read by the framework's dataset provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub train: usize,
    pub validation: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenamesBySplit {
    pub train: Vec<String>,
    pub validation: Vec<String>,
}

/// Number of records per shard so that `num_shards` shards cover `total`.
#[must_use]
pub fn per_shard(total: usize, num_shards: usize) -> usize {
    total.div_ceil(num_shards.max(1))
}

/// Convert `<dataset_dir>/result.csv` and the folders it lists into shards.
pub fn convert_dataset(
    dataset_dir: &Path,
    options: &ConvertOptions,
    progress: &dyn ProgressSink,
) -> TrainingResult<ConversionReport> {
    options.validate()?;
    std::fs::create_dir_all(dataset_dir)?;
    let layout = DatasetLayout::new(dataset_dir.to_path_buf(), options.dataset_name.clone(), options.num_shards);

    if options.skip_existing && layout.shards_exist() {
        info!(dir = %dataset_dir.display(), "dataset files already exist, skipping conversion");
        return Ok(ConversionReport {
            num_classes: 0,
            train: 0,
            validation: 0,
            validation_classes: 0,
            shards: Vec::new(),
            skipped: true,
        });
    }

    let images = collect_images(&layout)?;
    if images.is_empty() {
        return Err(TrainingError::Dataset(format!(
            "no .jpg images found via {}",
            layout.manifest_path().display()
        )));
    }
    let classes = ClassIndex::normalize(
        images.iter().map(|i| i.class_name.as_str()),
        options.others_class.as_deref(),
    );
    info!(images = images.len(), classes = classes.len(), "collected images");

    let split = split_by_directory(&images, options.validation_ratio, options.seed);
    write_json(
        &layout.filenames_by_split_path(),
        &FilenamesBySplit {
            train: relative_names(dataset_dir, &split.train),
            validation: relative_names(dataset_dir, &split.validation),
        },
    )?;

    let validation_classes: BTreeSet<&str> = split.validation.iter().map(|i| i.class_name.as_str()).collect();
    info!(
        train = split.train.len(),
        validation = split.validation.len(),
        validation_classes = validation_classes.len(),
        "split dataset by directory"
    );

    write_label_file(&layout.labels_path(), &classes)?;
    write_json(
        &layout.dataset_info_path(),
        &DatasetInfo { train: split.train.len(), validation: split.validation.len() },
    )?;

    let mut shards = Vec::new();
    for name in SplitName::ALL {
        shards.extend(write_split(&layout, name, split.get(name), &classes, progress)?);
    }

    progress.on_event(ProgressEvent::Message {
        message: format!("Finished converting the {} dataset!", options.dataset_name),
    });

    Ok(ConversionReport {
        num_classes: classes.len(),
        train: split.train.len(),
        validation: split.validation.len(),
        validation_classes: validation_classes.len(),
        shards,
        skipped: false,
    })
}

/// Read `(class_folder, class_name)` rows and list the images of each folder.
fn collect_images(layout: &DatasetLayout) -> TrainingResult<Vec<LabeledImage>> {
    let manifest = layout.manifest_path();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(&manifest)
        .map_err(|e| TrainingError::Dataset(format!("failed to open {}: {e}", manifest.display())))?;

    let mut images = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() != 2 {
            return Err(TrainingError::Dataset(format!(
                "{} row {}: expected 2 columns (class_folder, class_name), got {}",
                manifest.display(),
                idx + 1,
                row.len()
            )));
        }
        let folder = layout.root().join(&row[0]);
        let class_name = &row[1];
        let files = list_jpgs(&folder)?;
        debug!(folder = %folder.display(), class = class_name, files = files.len(), "listed class folder");
        images.extend(files.into_iter().map(|path| LabeledImage::new(path, class_name)));
    }
    Ok(images)
}

fn list_jpgs(dir: &Path) -> TrainingResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| TrainingError::Dataset(format!("failed to list {}: {e}", dir.display())))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let is_jpg = entry.file_name().to_string_lossy().to_lowercase().ends_with(".jpg");
        if is_jpg {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn relative_names(root: &Path, images: &[LabeledImage]) -> Vec<String> {
    images
        .iter()
        .map(|i| i.path.strip_prefix(root).unwrap_or(&i.path).to_string_lossy().into_owned())
        .collect()
}

fn write_split(
    layout: &DatasetLayout,
    split: SplitName,
    images: &[LabeledImage],
    classes: &ClassIndex,
    progress: &dyn ProgressSink,
) -> TrainingResult<Vec<PathBuf>> {
    let total = images.len();
    let per_shard = per_shard(total, layout.num_shards());
    let mut paths = Vec::with_capacity(layout.num_shards());

    for shard_id in 0..layout.num_shards() {
        let path = layout.shard_path(split, shard_id);
        let start = (shard_id * per_shard).min(total);
        let end = ((shard_id + 1) * per_shard).min(total);

        let mut writer = RecordWriter::create(&path)?;
        for (index, image) in images.iter().enumerate().take(end).skip(start) {
            progress.on_event(ProgressEvent::Converted { split, index, total, shard: shard_id });

            let class_id = classes.id(&image.class_name).ok_or_else(|| {
                TrainingError::Dataset(format!("class {:?} has no label id", image.class_name))
            })?;
            let encoded = std::fs::read(&image.path)
                .map_err(|e| TrainingError::Dataset(format!("failed to read {}: {e}", image.path.display())))?;
            let (height, width) = jpeg_dimensions(&image.path, &encoded)?;

            let example = image_example(encoded, IMAGE_FORMAT, height, width, class_id);
            writer.write_record(&example.encode_to_vec())?;
        }
        writer.flush()?;
        debug!(shard = %path.display(), records = writer.records_written(), "wrote shard");
        paths.push(path);
    }
    Ok(paths)
}

/// Fully decodes the image as RGB; corrupt or non-JPEG files are rejected.
/// Grayscale and CMYK sources are converted, matching what the trainer's
/// three-channel decoder sees.
fn jpeg_dimensions(path: &Path, bytes: &[u8]) -> TrainingResult<(u32, u32)> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|source| TrainingError::Image { path: path.to_path_buf(), source })?
        .to_rgb8();
    Ok((image.height(), image.width()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    let json = serde_json::to_string(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_shard_covers_total() {
        for total in [0usize, 1, 4, 5, 6, 23, 100] {
            for shards in 1..8 {
                assert!(per_shard(total, shards) * shards >= total);
            }
        }
        assert_eq!(per_shard(11, 5), 3);
        assert_eq!(per_shard(10, 5), 2);
    }

    #[test]
    fn test_options_validate() {
        assert!(ConvertOptions::default().validate().is_ok());
        assert!(ConvertOptions { num_shards: 0, ..Default::default() }.validate().is_err());
        assert!(ConvertOptions { validation_ratio: 0.0, ..Default::default() }.validate().is_err());
        assert!(ConvertOptions { validation_ratio: f64::NAN, ..Default::default() }.validate().is_err());
    }
}
