use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Stacks whose hooks are never written to a save. These are bound to pilots that do not
/// survive a reload.
pub const DEFAULT_NO_SAVE_STACKS: &[&str] = &["death", "board", "disable", "jump", "attacked", "idle"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default = "HookConfig::default_no_save_stacks")]
    pub no_save_stacks: Vec<String>,
    #[serde(default = "HookConfig::default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, Default)]
pub struct HookConfigOverrides {
    pub log_filter: Option<String>,
    pub extra_no_save: Vec<String>,
}

impl HookConfig {
    fn default_no_save_stacks() -> Vec<String> {
        DEFAULT_NO_SAVE_STACKS.iter().map(|stack| (*stack).to_string()).collect()
    }

    fn default_log_filter() -> String {
        "info".to_string()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &HookConfigOverrides) {
        if let Some(filter) = &overrides.log_filter {
            self.log_filter = filter.clone();
        }
        for stack in &overrides.extra_no_save {
            if !self.no_save_stacks.contains(stack) {
                self.no_save_stacks.push(stack.clone());
            }
        }
    }

    pub fn is_saved_stack(&self, stack: &str) -> bool {
        !self.no_save_stacks.iter().any(|excluded| excluded == stack)
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self { no_save_stacks: Self::default_no_save_stacks(), log_filter: Self::default_log_filter() }
    }
}

impl HookConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.log_filter.is_none() && self.extra_no_save.is_empty()
    }
}
