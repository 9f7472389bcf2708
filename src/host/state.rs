use std::{collections::BTreeMap, fs, io::Write, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// The mutable part of a local repository, stored in state.yaml
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct RepoState {
    /// Maps ref names (refs/heads/main) to commit SHA-1s
    #[serde(default)]
    pub refs: BTreeMap<String, String>,

    #[serde(default)]
    pub default_branch: Option<String>,
}

impl RepoState {
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| HostError::Decode(format!("{}: {}", path.display(), e)))
    }

    /// Write atomically: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let dir = path
            .parent()
            .ok_or_else(|| HostError::Rejected(format!("no parent for {}", path.display())))?;
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| HostError::Decode(format!("serialize state: {}", e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(yaml.as_bytes())?;
        temp.persist(path).map_err(|e| HostError::Io(e.error))?;

        Ok(())
    }
}
