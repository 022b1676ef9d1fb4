//! Schedule manifests: which snapshot files each worker runs.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use lt_types::{Device, LtError, LtResult, ScheduleError};

/// Suffix of the manifest written beside an input directory.
pub const MANIFEST_SUFFIX: &str = "schedule.json";

/// Buckets keyed `"<device>:<worker-index>"`, in worker order.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    buckets: Vec<(String, Vec<PathBuf>)>,
    created_at: DateTime<Utc>,
}

impl Schedule {
    /// Deal every `*.json` file of `input_dir` round-robin over `num_workers`
    /// buckets. Files are sorted first so the plan is reproducible.
    pub fn build(input_dir: &Path, device_name: &str, num_workers: usize) -> LtResult<Self> {
        if num_workers == 0 {
            return Err(ScheduleError::NoWorkers.into());
        }
        let files = snapshot_files(input_dir)?;
        if files.is_empty() {
            return Err(ScheduleError::EmptyInput {
                path: input_dir.display().to_string(),
            }
            .into());
        }

        let mut buckets: Vec<(String, Vec<PathBuf>)> = (0..num_workers)
            .map(|i| (bucket_key(device_name, i), Vec::new()))
            .collect();
        for (i, file) in files.into_iter().enumerate() {
            buckets[i % num_workers].1.push(file);
        }
        Ok(Self {
            buckets,
            created_at: Utc::now(),
        })
    }

    /// `runs/search/amused-frog` -> `runs/search/amused-frog.schedule.json`.
    /// Paths without a final name (`.`, `sub/..`) are resolved first so the
    /// manifest never lands inside the directory it describes.
    pub fn manifest_path(input_dir: &Path) -> PathBuf {
        let resolved;
        let input_dir = if input_dir.file_name().is_none() {
            resolved = std::fs::canonicalize(input_dir).unwrap_or_else(|_| input_dir.to_path_buf());
            resolved.as_path()
        } else {
            input_dir
        };
        let name = input_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let file = format!("{name}.{MANIFEST_SUFFIX}");
        match input_dir.parent() {
            Some(parent) => parent.join(file),
            None => PathBuf::from(file),
        }
    }

    pub fn save(&self, path: &Path) -> LtResult<()> {
        let mut map = Map::new();
        for (key, files) in &self.buckets {
            let paths = files
                .iter()
                .map(|p| Value::String(p.display().to_string()))
                .collect();
            map.insert(key.clone(), Value::Array(paths));
        }
        std::fs::write(path, serde_json::to_string_pretty(&Value::Object(map))?)?;
        debug!("Saved schedule manifest {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> LtResult<Self> {
        if !path.exists() {
            return Err(ScheduleError::ManifestNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let text = std::fs::read_to_string(path)?;
        let map: Map<String, Value> = serde_json::from_str(&text)?;
        let buckets = map
            .into_iter()
            .map(|(key, files)| -> LtResult<(String, Vec<PathBuf>)> {
                let files: Vec<PathBuf> = serde_json::from_value(files)?;
                Ok((key, files))
            })
            .collect::<LtResult<Vec<_>>>()?;
        let created_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Self { buckets, created_at })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|(k, _)| k.as_str())
    }

    pub fn buckets(&self) -> &[(String, Vec<PathBuf>)] {
        &self.buckets
    }

    pub fn bucket(&self, key: &str) -> LtResult<&[PathBuf]> {
        self.buckets
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, files)| files.as_slice())
            .ok_or_else(|| {
                ScheduleError::UnknownBucket {
                    bucket: key.to_string(),
                }
                .into()
            })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_files(&self) -> usize {
        self.buckets.iter().map(|(_, files)| files.len()).sum()
    }
}

pub fn bucket_key(device_name: &str, index: usize) -> String {
    format!("{device_name}:{index}")
}

/// The device a bucket is pinned to; its key is the device string.
pub fn bucket_device(key: &str) -> LtResult<Device> {
    key.parse().map_err(|e: LtError| {
        LtError::Schedule(ScheduleError::UnknownBucket {
            bucket: format!("{key} ({e})"),
        })
    })
}

fn snapshot_files(dir: &Path) -> LtResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_manifest = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(&format!(".{MANIFEST_SUFFIX}")));
        if path.is_file() && !is_manifest && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
