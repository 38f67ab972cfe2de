use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{PreprocessError, Result};

/// Mapping between class names and the output indices of the classifier.
///
/// Names are kept in index order, which is also the order the mapping was
/// built in; ranking ties are resolved by that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndex {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ClassIndex {
    /// Build from names in index order. Duplicate names are rejected.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut lookup = HashMap::with_capacity(names.len());

        for (idx, name) in names.iter().enumerate() {
            if lookup.insert(name.clone(), idx).is_some() {
                return Err(PreprocessError::ClassIndex(format!("duplicate class '{name}'")));
            }
        }

        Ok(Self { names, lookup })
    }

    /// Build from a name -> index mapping. Indices must cover `0..len` exactly once.
    pub fn from_mapping(mapping: &BTreeMap<String, usize>) -> Result<Self> {
        let mut slots: Vec<Option<String>> = vec![None; mapping.len()];

        for (name, &idx) in mapping {
            let slot = slots.get_mut(idx).ok_or_else(|| {
                PreprocessError::ClassIndex(format!("index {idx} of '{name}' is out of range"))
            })?;
            if let Some(existing) = slot.replace(name.clone()) {
                return Err(PreprocessError::ClassIndex(format!(
                    "index {idx} assigned to both '{existing}' and '{name}'"
                )));
            }
        }

        // Every slot is filled: the mapping has len entries and no index repeats.
        Self::from_names(slots.into_iter().flatten())
    }

    /// Load the JSON object `{ "class_name": index, ... }`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let mapping: BTreeMap<String, usize> = serde_json::from_str(&content)?;
        if mapping.is_empty() {
            return Err(PreprocessError::ClassIndex("no classes defined".into()));
        }
        Self::from_mapping(&mapping)
    }

    /// Write the mapping as a JSON object.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.to_mapping())?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn to_mapping(&self) -> BTreeMap<String, usize> {
        self.lookup.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_mapping() {
        let mut mapping = BTreeMap::new();
        mapping.insert("healthy".to_string(), 1);
        mapping.insert("diseased".to_string(), 0);

        let index = ClassIndex::from_mapping(&mapping).unwrap();
        assert_eq!(index.name(0), Some("diseased"));
        assert_eq!(index.name(1), Some("healthy"));
        assert_eq!(index.index("healthy"), Some(1));
        assert_eq!(index.name(2), None);
    }

    #[test]
    fn test_rejects_gaps_and_duplicates() {
        let mut gap = BTreeMap::new();
        gap.insert("a".to_string(), 0);
        gap.insert("b".to_string(), 2);
        assert!(ClassIndex::from_mapping(&gap).is_err());

        let mut dup = BTreeMap::new();
        dup.insert("a".to_string(), 0);
        dup.insert("b".to_string(), 0);
        assert!(ClassIndex::from_mapping(&dup).is_err());

        assert!(ClassIndex::from_names(["x", "x"]).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/class_indices.json");

        let index = ClassIndex::from_names(["cats", "dogs"]).unwrap();
        index.save(&path).unwrap();

        let loaded = ClassIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_indices.json");

        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(ClassIndex::load(&path), Err(PreprocessError::Json(_))));

        fs::write(&path, "{}").unwrap();
        assert!(matches!(ClassIndex::load(&path), Err(PreprocessError::ClassIndex(_))));
    }
}
