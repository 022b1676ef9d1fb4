//! Writes compiled snapshots to disk, one `<id>.json` per combination.

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::info;

use lt_config::ConfigTree;
use lt_types::LtResult;

use crate::parameter::Snapshot;
use crate::search::SearchSpace;

const ADJECTIVES: &[&str] = &[
    "amused", "brave", "calm", "clever", "curious", "eager", "fancy", "gentle", "happy", "jolly",
    "keen", "lively", "lucky", "merry", "nimble", "proud", "quiet", "rapid", "shiny", "swift",
    "tidy", "witty", "zealous", "bold",
];

const ANIMALS: &[&str] = &[
    "frog", "otter", "badger", "falcon", "heron", "lynx", "marten", "newt", "owl", "panda",
    "quail", "raven", "seal", "tapir", "walrus", "yak", "zebra", "bison", "crane", "dingo",
    "ferret", "gecko", "ibis", "koala",
];

/// Random `adjective-animal` name for a compiled run, e.g. `amused-frog`.
pub fn generate_run_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    format!("{adjective}-{animal}")
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    output_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Writer targeting a fresh `<root>/<run-name>` directory.
    pub fn with_run_name(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(generate_run_name()))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write(&self, snapshots: &[Snapshot]) -> LtResult<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.output_dir)?;
        snapshots.iter().map(|s| s.save(&self.output_dir)).collect()
    }

    /// Compile every group of `space` over `base` and write the results.
    pub fn write_space(&self, space: &SearchSpace, base: &ConfigTree) -> LtResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (group, snapshots) in space.compile_all(base)? {
            let paths = self.write(&snapshots)?;
            info!(
                "Search group '{}': wrote {} snapshot(s) to {}",
                group,
                paths.len(),
                self.output_dir.display()
            );
            written.extend(paths);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{Parameter, EXPERIMENT_ID_KEY};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_run_names_are_two_words() {
        let name = generate_run_name();
        let (adjective, animal) = name.split_once('-').unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(ANIMALS.contains(&animal));
    }

    #[test]
    fn test_writes_one_file_per_snapshot() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::with_run_name(dir.path());

        let mut space = SearchSpace::new();
        space.register("sweep", "units", Parameter::list("model.units", vec![json!(8), json!(16)]));
        space.register("sweep", "pretrained", Parameter::binary("model.pretrained"));

        let base = ConfigTree::from_json(json!({"epochs": 2})).unwrap();
        let paths = writer.write_space(&space, &base).unwrap();
        assert_eq!(paths.len(), 4);

        for path in &paths {
            assert_eq!(path.parent().unwrap(), writer.output_dir());
            let loaded = ConfigTree::load(path).unwrap();
            let id: String = loaded.get(EXPERIMENT_ID_KEY).unwrap();
            assert_eq!(path.file_stem().unwrap().to_str().unwrap(), id);
            assert_eq!(loaded.get::<i64>("epochs"), Some(2));
        }
    }
}
