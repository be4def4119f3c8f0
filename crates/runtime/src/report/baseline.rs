//! Per-engine artifact count baseline
//!
//! The only durable state the pipeline owns: a JSON map of engine name to
//! `.md` file count, captured when a run begins. Readiness requires a strict
//! net increase in every engine's directory. The file is rewritten
//! atomically (write temp, rename) to avoid torn reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::types::ReportError;

/// Result of a readiness check.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    /// True iff every engine's current count strictly exceeds its baseline.
    pub ready: bool,
    pub baseline_counts: BTreeMap<String, usize>,
    pub current_counts: BTreeMap<String, usize>,
    pub new_files_found: BTreeMap<String, usize>,
    /// Engines with no net-new files.
    pub missing_engines: Vec<String>,
}

/// Persisted file-count baseline manager.
pub struct FileCountBaseline {
    baseline_file: PathBuf,
    data: Mutex<BTreeMap<String, usize>>,
}

impl FileCountBaseline {
    /// Load (or start empty) from `<log_dir>/report_baseline.json`.
    pub fn new(log_dir: &Path) -> Self {
        let baseline_file = log_dir.join("report_baseline.json");
        let data = Self::load(&baseline_file);
        Self {
            baseline_file,
            data: Mutex::new(data),
        }
    }

    fn load(path: &Path) -> BTreeMap<String, usize> {
        if !path.exists() {
            return BTreeMap::new();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to load baseline data: {e}");
                BTreeMap::new()
            }
        }
    }

    fn save(&self, data: &BTreeMap<String, usize>) -> Result<(), ReportError> {
        if let Some(parent) = self.baseline_file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReportError::Baseline(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| ReportError::Baseline(e.to_string()))?;
        let tmp = self.baseline_file.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| ReportError::Baseline(e.to_string()))?;
        std::fs::rename(&tmp, &self.baseline_file)
            .map_err(|e| ReportError::Baseline(e.to_string()))
    }

    fn count_md_files(directory: &Path) -> usize {
        std::fs::read_dir(directory)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|entry| {
                        entry.path().extension().and_then(|e| e.to_str()) == Some("md")
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Record current `.md` counts as the new baseline, overwriting any
    /// persisted one.
    pub fn initialize_baseline(
        &self,
        directories: &BTreeMap<String, PathBuf>,
    ) -> Result<BTreeMap<String, usize>, ReportError> {
        let counts: BTreeMap<String, usize> = directories
            .iter()
            .map(|(engine, dir)| (engine.clone(), Self::count_md_files(dir)))
            .collect();

        self.save(&counts)?;
        *self.data.lock() = counts.clone();
        tracing::info!("File count baseline initialized: {:?}", counts);
        Ok(counts)
    }

    /// Compare current counts against the baseline.
    pub fn check_new_files(&self, directories: &BTreeMap<String, PathBuf>) -> ReadinessCheck {
        let baseline = self.data.lock().clone();
        let mut current_counts = BTreeMap::new();
        let mut new_files_found = BTreeMap::new();
        let mut missing_engines = Vec::new();
        let mut ready = true;

        for (engine, dir) in directories {
            let current = Self::count_md_files(dir);
            let base = baseline.get(engine).copied().unwrap_or(0);
            let delta = current.saturating_sub(base);
            if delta == 0 {
                ready = false;
                missing_engines.push(engine.clone());
            }
            current_counts.insert(engine.clone(), current);
            new_files_found.insert(engine.clone(), delta);
        }

        ReadinessCheck {
            ready,
            baseline_counts: baseline,
            current_counts,
            new_files_found,
            missing_engines,
        }
    }

    /// The most recently modified `.md` file in each directory.
    pub fn get_latest_files(
        &self,
        directories: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, PathBuf> {
        let mut latest = BTreeMap::new();
        for (engine, dir) in directories {
            let newest = std::fs::read_dir(dir)
                .ok()
                .into_iter()
                .flatten()
                .flatten()
                .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("md"))
                .max_by_key(|entry| {
                    entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
                });
            if let Some(entry) = newest {
                latest.insert(engine.clone(), entry.path());
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(counts: &[(&str, usize)]) -> (tempfile::TempDir, BTreeMap<String, PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let mut directories = BTreeMap::new();
        for (engine, count) in counts {
            let engine_dir = dir.path().join(format!("{engine}_engine_streamlit_reports"));
            std::fs::create_dir_all(&engine_dir).unwrap();
            for i in 0..*count {
                std::fs::write(engine_dir.join(format!("report_{i}.md")), "body").unwrap();
            }
            directories.insert((*engine).to_string(), engine_dir);
        }
        (dir, directories)
    }

    #[test]
    fn readiness_requires_strict_increase_everywhere() {
        let (dir, directories) = setup(&[("insight", 3), ("media", 3), ("query", 3)]);
        let baseline = FileCountBaseline::new(dir.path());
        baseline.initialize_baseline(&directories).unwrap();

        // Two new media files only: not ready.
        for i in 0..2 {
            std::fs::write(directories["media"].join(format!("new_{i}.md")), "body").unwrap();
        }
        let check = baseline.check_new_files(&directories);
        assert!(!check.ready);
        assert_eq!(check.new_files_found["media"], 2);
        assert_eq!(
            check.missing_engines,
            vec!["insight".to_string(), "query".to_string()]
        );

        // One more in each of query and insight: ready.
        std::fs::write(directories["query"].join("new.md"), "body").unwrap();
        std::fs::write(directories["insight"].join("new.md"), "body").unwrap();
        let check = baseline.check_new_files(&directories);
        assert!(check.ready);
        for engine in ["insight", "media", "query"] {
            assert!(check.current_counts[engine] > check.baseline_counts[engine]);
        }
    }

    #[test]
    fn consecutive_initializations_are_idempotent() {
        let (dir, directories) = setup(&[("insight", 2), ("media", 0), ("query", 1)]);
        let baseline = FileCountBaseline::new(dir.path());

        baseline.initialize_baseline(&directories).unwrap();
        let first = std::fs::read_to_string(dir.path().join("report_baseline.json")).unwrap();
        baseline.initialize_baseline(&directories).unwrap();
        let second = std::fs::read_to_string(dir.path().join("report_baseline.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn baseline_survives_restart() {
        let (dir, directories) = setup(&[("insight", 2), ("media", 1), ("query", 1)]);
        {
            let baseline = FileCountBaseline::new(dir.path());
            baseline.initialize_baseline(&directories).unwrap();
        }
        // A fresh instance must see the persisted counts.
        let reloaded = FileCountBaseline::new(dir.path());
        let check = reloaded.check_new_files(&directories);
        assert_eq!(check.baseline_counts["insight"], 2);
        assert!(!check.ready);
    }

    #[test]
    fn only_markdown_files_are_counted() {
        let (dir, directories) = setup(&[("insight", 1), ("media", 1), ("query", 1)]);
        std::fs::write(directories["insight"].join("notes.txt"), "x").unwrap();
        let baseline = FileCountBaseline::new(dir.path());
        let counts = baseline.initialize_baseline(&directories).unwrap();
        assert_eq!(counts["insight"], 1);
    }

    #[test]
    fn latest_file_is_picked_by_mtime() {
        let (dir, directories) = setup(&[("insight", 1), ("media", 1), ("query", 1)]);
        let newer = directories["insight"].join("zz_newer.md");
        std::fs::write(&newer, "newest").unwrap();
        let older = directories["insight"].join("report_0.md");
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        // Push the original file's mtime into the past so ordering is stable.
        let file = std::fs::OpenOptions::new().write(true).open(&older).unwrap();
        let _ = file.set_times(
            std::fs::FileTimes::new()
                .set_accessed(past)
                .set_modified(past),
        );

        let baseline = FileCountBaseline::new(dir.path());
        let latest = baseline.get_latest_files(&directories);
        assert_eq!(latest["insight"], newer);
    }
}
