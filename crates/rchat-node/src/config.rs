//! Non-secret, user-visible settings (`config.toml`).
//!
//! Secrets never land here; they live in the vault. The config file is
//! read once at startup and rewritten whole on every change.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::theme::ThemeConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Whether rendezvous publish/poll starts enabled after unlock.
    #[serde(default)]
    pub online_by_default: bool,

    /// Key of the active theme preset, if one was applied.
    #[serde(default)]
    pub selected_preset: Option<String>,

    /// Full theme override; takes precedence over the preset default.
    #[serde(default)]
    pub theme: Option<ThemeConfig>,
}

impl NodeConfig {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("config.toml")
    }

    pub fn load(data_dir: &Path) -> Self {
        let path = Self::path(data_dir);
        match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::create_dir_all(data_dir)?;
        std::fs::write(Self::path(data_dir), raw)
    }
}

/// Per-OS application data directory for a production node.
pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.github", "rchat", "rchat")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = NodeConfig::load(dir.path());
        assert!(!config.online_by_default);

        config.online_by_default = true;
        config.selected_preset = Some("midnight_neon".into());
        config.save(dir.path()).unwrap();

        let loaded = NodeConfig::load(dir.path());
        assert!(loaded.online_by_default);
        assert_eq!(loaded.selected_preset.as_deref(), Some("midnight_neon"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load(dir.path());
        assert!(config.selected_preset.is_none());
        assert!(config.theme.is_none());
    }
}
