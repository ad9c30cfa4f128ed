use serde::Serialize;

use crate::error::NodeError;
use crate::node::Node;
use crate::theme::{ThemeConfig, ThemeManager};

#[derive(Debug, Clone, Serialize)]
pub struct PresetInfo {
    pub key: String,
    pub name: String,
    pub description: String,
}

impl Node {
    pub async fn get_theme(&self) -> Result<ThemeConfig, NodeError> {
        let config = self.inner.config.lock().await;
        Ok(config.theme.clone().unwrap_or_default())
    }

    pub async fn update_theme(&self, theme: ThemeConfig) -> Result<(), NodeError> {
        let mut config = self.inner.config.lock().await;
        config.theme = Some(theme);
        config.save(&self.inner.data_dir)?;
        Ok(())
    }

    pub async fn list_theme_presets(&self) -> Result<Vec<PresetInfo>, NodeError> {
        Ok(ThemeManager::list_presets_info()
            .into_iter()
            .map(|(key, name, description)| PresetInfo {
                key,
                name,
                description,
            })
            .collect())
    }

    /// Apply a preset: expand it to a full theme, persist both the theme
    /// and the preset key, and return the expanded config.
    pub async fn apply_preset(&self, name: &str) -> Result<ThemeConfig, NodeError> {
        let theme = ThemeManager::load_preset(name)?;

        let mut config = self.inner.config.lock().await;
        config.theme = Some(theme.clone());
        config.selected_preset = Some(name.to_string());
        config.save(&self.inner.data_dir)?;

        Ok(theme)
    }

    pub async fn get_selected_preset(&self) -> Result<Option<String>, NodeError> {
        let config = self.inner.config.lock().await;
        Ok(config.selected_preset.clone())
    }
}
