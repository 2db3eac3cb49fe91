use std::path::PathBuf;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use storage::Preferences;

pub const KEY_INSTANCE_ID: &str = "instanceId";
pub const KEY_OUTPUT_PATH: &str = "outputPath";
pub const KEY_LISTEN_PORT: &str = "listenPort";

pub const DEFAULT_LISTEN_PORT: u16 = 8090;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShootConfig {
    /// Label advertised in greetings, `user@hostname` unless overridden
    pub instance_id: String,

    /// Where received files are written; `None` refuses all inbound files
    pub output_dir: Option<PathBuf>,

    /// Port the overlay listens on
    pub listen_port: u16,

    /// mDNS service type
    pub service_type: String,

    /// Directory holding preferences
    pub data_dir: PathBuf,
}

impl Default for ShootConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            output_dir: None,
            listen_port: DEFAULT_LISTEN_PORT,
            service_type: "_shoot._tcp.local.".to_string(),
            data_dir: default_data_dir(),
        }
    }
}

impl ShootConfig {
    /// Build a config from stored preferences. An empty `outputPath` means
    /// no output directory.
    pub fn from_preferences(prefs: &Preferences, data_dir: PathBuf) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let instance_id = prefs.get(KEY_INSTANCE_ID, &defaults.instance_id);
        let output = prefs.get(KEY_OUTPUT_PATH, "");
        let output_dir = (!output.trim().is_empty()).then(|| PathBuf::from(output));
        let listen_port = prefs
            .get(KEY_LISTEN_PORT, &DEFAULT_LISTEN_PORT.to_string())
            .parse()
            .with_context(|| format!("{} must be a port number", KEY_LISTEN_PORT))?;

        Ok(Self {
            instance_id,
            output_dir,
            listen_port,
            data_dir,
            ..defaults
        })
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_dir = output_dir;
        self
    }

    pub fn ensure_data_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if let Some(dir) = &self.output_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// `~/.shoot`, or `./.shoot` when there is no home directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shoot")
}

/// `user@hostname` from the environment.
pub fn default_instance_id() -> String {
    let user = env_any(&["USER", "USERNAME"]);
    let host = env_any(&["HOSTNAME", "COMPUTERNAME"]);
    format!("{}@{}", user, host)
}

fn env_any(keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_preferences_defaults() -> anyhow::Result<()> {
        let prefs = Preferences::in_memory();
        let cfg = ShootConfig::from_preferences(&prefs, PathBuf::from("/tmp/shoot"))?;

        assert_eq!(cfg.output_dir, None);
        assert_eq!(cfg.listen_port, DEFAULT_LISTEN_PORT);
        assert!(cfg.instance_id.contains('@'));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/shoot"));
        Ok(())
    }

    #[test]
    fn test_default_data_dir_is_under_home() {
        let cfg = ShootConfig::default();
        assert_eq!(cfg.data_dir, default_data_dir());
        assert!(cfg.data_dir.ends_with(".shoot"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(cfg.data_dir, home.join(".shoot"));
        }
    }

    #[test]
    fn test_from_preferences_overrides() -> anyhow::Result<()> {
        let mut prefs = Preferences::in_memory();
        prefs.set(KEY_INSTANCE_ID, "alice@desk")?;
        prefs.set(KEY_OUTPUT_PATH, "/tmp/received")?;
        prefs.set(KEY_LISTEN_PORT, "9100")?;

        let cfg = ShootConfig::from_preferences(&prefs, PathBuf::from("."))?;
        assert_eq!(cfg.instance_id, "alice@desk");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/tmp/received")));
        assert_eq!(cfg.listen_port, 9100);

        prefs.set(KEY_LISTEN_PORT, "nope")?;
        assert!(ShootConfig::from_preferences(&prefs, PathBuf::from(".")).is_err());
        Ok(())
    }
}
