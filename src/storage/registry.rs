use crate::common::{FacesetError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const REGISTRY_FILENAME: &str = "registry.json";

/// Persisted per-subject count of accepted captures, kept at the dataset
/// root. Counts are monotonically non-decreasing and always equal the number
/// of photo files on disk for the subject, which is what makes capture
/// sessions resumable.
///
/// The `&mut` receiver on [`Registry::record_accept`] is the process-local
/// single-writer guarantee; running concurrent writer processes against the
/// same file is out of contract and must be prevented by the caller.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    counts: BTreeMap<String, u64>,
}

impl Registry {
    /// Loads the registry from `dataset_root`. A missing file is a fresh
    /// dataset, not an error.
    pub fn load(dataset_root: &Path) -> Result<Self> {
        let path = dataset_root.join(REGISTRY_FILENAME);

        let counts = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data).map_err(|e| {
                FacesetError::Storage(format!("corrupt registry {}: {}", path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, counts })
    }

    /// Increments the subject's count and durably persists the whole mapping
    /// before returning the new value. The write goes to a temporary file
    /// that is renamed over the registry, so a crash mid-write leaves the
    /// previous state intact.
    pub fn record_accept(&mut self, subject: &str) -> Result<u64> {
        let count = self.counts.entry(subject.to_string()).or_insert(0);
        *count += 1;
        let new_count = *count;

        self.persist()?;
        Ok(new_count)
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.counts)
            .map_err(|e| FacesetError::Storage(format!("failed to serialize registry: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn count(&self, subject: &str) -> u64 {
        self.counts.get(subject).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn total_photos(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
