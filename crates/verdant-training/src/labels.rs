use crate::error::{TrainingError, TrainingResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;

/// Class that always takes id 0 and collects images that fit nowhere else.
pub const DEFAULT_OTHERS_CLASS: &str = "其他";

/// Ordered class names; a name's index is its label id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndex {
    names: Vec<String>,
    ids: HashMap<String, i64>,
}

impl ClassIndex {
    /// Distinct names in sorted order, with `others` pinned to id 0 when given.
    ///
    /// `others` is reserved even when no image carries it.
    pub fn normalize<'a>(class_names: impl IntoIterator<Item = &'a str>, others: Option<&str>) -> Self {
        let distinct: BTreeSet<&str> =
            class_names.into_iter().filter(|name| Some(*name) != others).collect();

        let mut names = Vec::with_capacity(distinct.len() + 1);
        if let Some(others) = others {
            names.push(others.to_string());
        }
        names.extend(distinct.into_iter().map(str::to_string));

        let ids = names.iter().enumerate().map(|(i, n)| (n.clone(), i as i64)).collect();
        Self { names, ids }
    }

    #[must_use]
    pub fn id(&self, class_name: &str) -> Option<i64> {
        self.ids.get(class_name).copied()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Write `<id>:<name>` lines.
pub fn write_label_file(path: &Path, classes: &ClassIndex) -> TrainingResult<()> {
    let mut out = String::new();
    for (id, name) in classes.names().iter().enumerate() {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{id}:{name}");
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn read_label_file(path: &Path) -> TrainingResult<BTreeMap<i64, String>> {
    let contents = std::fs::read_to_string(path)?;
    let mut labels = BTreeMap::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (id, name) = line.split_once(':').ok_or_else(|| {
            TrainingError::Dataset(format!("label file line {} has no ':' separator", idx + 1))
        })?;
        let id = id.trim().parse::<i64>().map_err(|e| {
            TrainingError::Dataset(format!("label file line {}: invalid id: {e}", idx + 1))
        })?;
        labels.insert(id, name.to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_others_class_is_always_first() {
        let classes = ClassIndex::normalize(["tulip", "rose", "rose"], Some(DEFAULT_OTHERS_CLASS));
        assert_eq!(classes.names(), &[DEFAULT_OTHERS_CLASS, "rose", "tulip"]);
        assert_eq!(classes.id(DEFAULT_OTHERS_CLASS), Some(0));
        assert_eq!(classes.id("rose"), Some(1));
        assert_eq!(classes.id("tulip"), Some(2));
    }

    #[test]
    fn test_others_class_present_in_data_is_not_duplicated() {
        let classes = ClassIndex::normalize(["zinnia", "其他", "aster"], Some("其他"));
        assert_eq!(classes.names(), &["其他", "aster", "zinnia"]);
    }

    #[test]
    fn test_without_others_class() {
        let classes = ClassIndex::normalize(["b", "a"], None);
        assert_eq!(classes.names(), &["a", "b"]);
        assert_eq!(classes.id("missing"), None);
    }

    #[test]
    fn test_label_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("labels.txt");
        let classes = ClassIndex::normalize(["rose", "tulip"], Some(DEFAULT_OTHERS_CLASS));
        write_label_file(&path, &classes).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0:其他\n1:rose\n2:tulip\n");
        let labels = read_label_file(&path).unwrap();
        assert_eq!(labels.get(&2).map(String::as_str), Some("tulip"));
    }
}
