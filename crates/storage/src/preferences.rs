use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// String key/value settings, persisted as a flat JSON object.
///
/// Every `set` writes the whole file back. An in-memory instance never
/// touches the disk and is what tests use.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    path: Option<PathBuf>,
    values: BTreeMap<String, String>,
}

impl Preferences {
    /// Load preferences from `path`, creating an empty file if it is missing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let values = if path.exists() {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading preferences {}", path.display()))?;
            if json.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&json)
                    .with_context(|| format!("parsing preferences {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        tracing::info!("Loading preferences from {}", path.display());
        let prefs = Self { path: Some(path.to_path_buf()), values };
        if !path.exists() {
            prefs.store()?;
        }
        Ok(prefs)
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.store()
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<String>> {
        let old = self.values.remove(key);
        self.store()?;
        Ok(old)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn store(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(path, json)
            .with_context(|| format!("writing preferences {}", path.display()))?;
        Ok(())
    }
}
