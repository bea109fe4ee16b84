use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_VALIDATION_RATIO: f64 = 1.0 / 6.0;
pub const DEFAULT_SPLIT_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitName {
    Train,
    Validation,
}

impl SplitName {
    pub const ALL: [Self; 2] = [Self::Train, Self::Validation];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for SplitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image file and the class it was listed under in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub class_name: String,
}

impl LabeledImage {
    #[must_use]
    pub fn new(path: PathBuf, class_name: impl Into<String>) -> Self {
        Self { path, class_name: class_name.into() }
    }

    fn directory(&self) -> PathBuf {
        self.path.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<LabeledImage>,
    pub validation: Vec<LabeledImage>,
}

impl DatasetSplit {
    #[must_use]
    pub fn get(&self, split: SplitName) -> &[LabeledImage] {
        match split {
            SplitName::Train => &self.train,
            SplitName::Validation => &self.validation,
        }
    }
}

/// Split a shuffled copy of `items` into `(train, validation)`.
///
/// The generator is seeded afresh on every call. At least one item goes to
/// validation whenever `items` is non-empty.
pub fn seeded_split<T: Clone>(items: &[T], ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut shuffled = items.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let num_validation = ((ratio * shuffled.len() as f64) as usize).max(1).min(shuffled.len());
    let train = shuffled.split_off(num_validation);
    (train, shuffled)
}

/// Assign whole directories to train or validation, class by class.
///
/// Images that share a directory always land in the same split. Classes and
/// directories are visited in sorted order and each class re-seeds the
/// generator, so the result depends only on the input set and the seed.
#[must_use]
pub fn split_by_directory(images: &[LabeledImage], ratio: f64, seed: u64) -> DatasetSplit {
    let mut by_class: BTreeMap<&str, BTreeMap<PathBuf, Vec<&LabeledImage>>> = BTreeMap::new();
    for image in images {
        by_class
            .entry(image.class_name.as_str())
            .or_default()
            .entry(image.directory())
            .or_default()
            .push(image);
    }

    let mut split = DatasetSplit::default();
    for (class_name, dirs) in &by_class {
        let directories: Vec<&PathBuf> = dirs.keys().collect();
        let (train_dirs, validation_dirs) = seeded_split(&directories, ratio, seed);
        tracing::debug!(
            class = class_name,
            train_dirs = train_dirs.len(),
            validation_dirs = validation_dirs.len(),
            "split class directories"
        );

        for dir in train_dirs {
            split.train.extend(dirs[dir].iter().map(|image| (*image).clone()));
        }
        for dir in validation_dirs {
            split.validation.extend(dirs[dir].iter().map(|image| (*image).clone()));
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> Vec<LabeledImage> {
        let mut out = Vec::new();
        for class in ["rose", "tulip"] {
            for dir in 0..12 {
                for file in 0..3 {
                    out.push(LabeledImage::new(
                        PathBuf::from(format!("/data/{class}_{dir}/{file}.jpg")),
                        class,
                    ));
                }
            }
        }
        out
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = split_by_directory(&images(), DEFAULT_VALIDATION_RATIO, 0);
        let b = split_by_directory(&images(), DEFAULT_VALIDATION_RATIO, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_covers_every_image_once() {
        let input = images();
        let split = split_by_directory(&input, DEFAULT_VALIDATION_RATIO, 7);
        assert_eq!(split.train.len() + split.validation.len(), input.len());

        let mut seen: Vec<&PathBuf> =
            split.train.iter().chain(split.validation.iter()).map(|i| &i.path).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), input.len());
    }

    #[test]
    fn test_directories_are_not_shared_between_splits() {
        let split = split_by_directory(&images(), 0.25, 3);
        for val in &split.validation {
            assert!(split.train.iter().all(|t| t.directory() != val.directory()));
        }
        // 12 directories per class at 0.25 -> 3 validation directories of 3 images each.
        assert_eq!(split.validation.len(), 2 * 3 * 3);
    }

    #[test]
    fn test_single_directory_goes_to_validation() {
        let input = vec![
            LabeledImage::new(PathBuf::from("/data/a/1.jpg"), "a"),
            LabeledImage::new(PathBuf::from("/data/a/2.jpg"), "a"),
        ];
        let split = split_by_directory(&input, DEFAULT_VALIDATION_RATIO, 0);
        assert!(split.train.is_empty());
        assert_eq!(split.validation.len(), 2);
    }

    #[test]
    fn test_seeded_split_empty_input() {
        let (train, validation) = seeded_split::<u32>(&[], DEFAULT_VALIDATION_RATIO, 0);
        assert!(train.is_empty());
        assert!(validation.is_empty());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut reversed = images();
        reversed.reverse();
        let a = split_by_directory(&images(), DEFAULT_VALIDATION_RATIO, 0);
        let b = split_by_directory(&reversed, DEFAULT_VALIDATION_RATIO, 0);

        let dirs = |v: &[LabeledImage]| {
            let mut d: Vec<PathBuf> = v.iter().map(LabeledImage::directory).collect();
            d.sort();
            d.dedup();
            d
        };
        assert_eq!(dirs(&a.validation), dirs(&b.validation));
    }
}
