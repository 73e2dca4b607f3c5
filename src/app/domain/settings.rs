use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::infrastructure::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Turn bare http(s) URLs in prose into links
    #[serde(default = "default_linkify")]
    pub linkify: bool,

    /// Smart quotes and dashes
    #[serde(default = "default_typographer")]
    pub typographer: bool,

    #[serde(default = "default_highlight_code")]
    pub highlight_code: bool,

    /// Lua VM instructions a single plugin call may execute. `None` means
    /// unbounded; the host is expected to guard the thread itself.
    #[serde(default)]
    pub plugin_instruction_limit: Option<u64>,

    /// Upper bound for the plugin runtime heap, in bytes.
    #[serde(default)]
    pub plugin_memory_limit: Option<usize>,
}

fn default_linkify() -> bool {
    true
}

fn default_typographer() -> bool {
    true
}

fn default_highlight_code() -> bool {
    true
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            linkify: default_linkify(),
            typographer: default_typographer(),
            highlight_code: default_highlight_code(),
            plugin_instruction_limit: None,
            plugin_memory_limit: None,
        }
    }
}

impl RenderSettings {
    /// Load settings from the default location, or fall back to defaults
    pub fn load() -> Self {
        let config_path = Self::get_config_path();
        if !config_path.exists() {
            return Self::default();
        }

        match Self::load_from(&config_path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to parse settings: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load settings from a TOML file, or JSON when the extension says so.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let settings: Self = if is_json {
            serde_json::from_str(&contents)?
        } else {
            toml::from_str(&contents)?
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.plugin_instruction_limit == Some(0) {
            return Err(AppError::Settings(
                "plugin_instruction_limit must be greater than zero".to_string(),
            ));
        }
        if self.plugin_memory_limit == Some(0) {
            return Err(AppError::Settings(
                "plugin_memory_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get config file path (cross-platform)
    pub fn get_config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("notemark");
        path.push("settings.toml");
        path
    }
}
