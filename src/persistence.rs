use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::HookConfig;
use crate::error::LoadError;
use crate::ids::InstanceId;
use crate::registry::{Hook, HookRegistry, HookTarget};

pub const KIND_MISSION: &str = "mission";
pub const KIND_MISSION_LEGACY: &str = "misn";
pub const KIND_EVENT: &str = "event";

/// Saved hook state: a `hooks` container holding one element per persisted hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDocument {
    #[serde(default)]
    pub hooks: Vec<HookElement>,
}

/// One saved hook. Every field is optional on read so that a malformed element is reported
/// as a [`LoadError`] naming the missing piece rather than as a generic parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_instance_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
}

impl HookElement {
    pub fn mission(instance: u32, entry: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            kind: Some(KIND_MISSION.to_string()),
            owning_instance_id: Some(instance),
            entry_name: Some(entry.into()),
            stack_name: Some(stack.into()),
        }
    }

    pub fn event(instance: u32, entry: impl Into<String>, stack: impl Into<String>) -> Self {
        Self { kind: Some(KIND_EVENT.to_string()), ..Self::mission(instance, entry, stack) }
    }
}

impl HookDocument {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing hook document")
    }

    pub fn from_json(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Creating save directory {}", parent.display()))?;
            }
        }
        let json = self.to_json()?;
        fs::write(path, json.as_bytes()).with_context(|| format!("Writing hook file {}", path.display()))?;
        Ok(())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|err| LoadError::Io { path: path.to_path_buf(), message: err.to_string() })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Only mission hooks outside the configured exclusion list are persisted. Native hooks cannot
/// be saved and events are not resumable.
pub fn needs_save(hook: &Hook, config: &HookConfig) -> bool {
    matches!(hook.target(), HookTarget::Mission { .. }) && config.is_saved_stack(hook.stack())
}

pub(crate) fn save(registry: &HookRegistry, config: &HookConfig) -> HookDocument {
    let hooks = registry
        .iter()
        .filter(|hook| !hook.is_retired() && needs_save(hook, config))
        .filter_map(|hook| match hook.target() {
            HookTarget::Mission { instance, entry } => Some(HookElement {
                kind: Some(KIND_MISSION.to_string()),
                owning_instance_id: Some(instance.get()),
                entry_name: Some(entry.clone()),
                stack_name: Some(hook.stack().to_string()),
            }),
            _ => None,
        })
        .collect();
    HookDocument { hooks }
}

struct RestoredHook {
    stack: String,
    target: HookTarget,
}

fn parse_element(index: usize, element: &HookElement) -> Result<RestoredHook, LoadError> {
    let missing = |field| LoadError::MissingField { index, field };
    let is_event = match element.kind.as_deref() {
        // Old saves predate event hooks and carry no kind.
        None | Some(KIND_MISSION) | Some(KIND_MISSION_LEGACY) => false,
        Some(KIND_EVENT) => true,
        Some(other) => return Err(LoadError::UnknownKind { index, kind: other.to_string() }),
    };
    let instance = element.owning_instance_id.ok_or_else(|| missing("owning_instance_id"))?;
    if instance == 0 {
        return Err(LoadError::InvalidInstance { index });
    }
    let entry = element.entry_name.clone().ok_or_else(|| missing("entry_name"))?;
    let stack = element.stack_name.clone().ok_or_else(|| missing("stack_name"))?;
    let instance = InstanceId(instance);
    let target = if is_event {
        HookTarget::Event { instance, entry }
    } else {
        HookTarget::Mission { instance, entry }
    };
    Ok(RestoredHook { stack, target })
}

/// Validates the whole document, then replaces the registry contents with it. Every hook
/// gets a fresh id from the allocator. Any error leaves the registry as it was.
pub(crate) fn restore(registry: &mut HookRegistry, document: &HookDocument) -> Result<(), LoadError> {
    let parsed = match validate(registry, document) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "rejecting hook document");
            return Err(err);
        }
    };

    registry.clear();
    for hook in parsed {
        let inserted = registry.insert(hook.stack, hook.target);
        debug_assert!(inserted.is_ok(), "validated hook document failed to restore");
    }
    info!(hooks = registry.len(), high_water = registry.ids().high_water(), "hooks loaded");
    Ok(())
}

// Parses every element and checks the id space can hold them, before the registry is touched.
fn validate(registry: &HookRegistry, document: &HookDocument) -> Result<Vec<RestoredHook>, LoadError> {
    let parsed = document
        .hooks
        .iter()
        .enumerate()
        .map(|(index, element)| parse_element(index, element))
        .collect::<Result<Vec<_>, _>>()?;
    let needed = u32::try_from(parsed.len()).map_err(|_| LoadError::Exhausted)?;
    registry.ids().high_water().checked_add(needed).ok_or(LoadError::Exhausted)?;
    Ok(parsed)
}
