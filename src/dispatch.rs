//! Hook dispatch: registration, broadcasting and deferred removal.
//!
//! [`HookEngine`] is driven from the single simulation thread. Script and native callbacks
//! receive `&HookEngine` while they run and may register, remove or broadcast re-entrantly.
//! No registry borrow is ever held across a callback, and while any broadcast is active
//! removals only retire hooks; the outermost broadcast flushes them on exit.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use tracing::{debug, warn};

use crate::config::HookConfig;
use crate::error::{HookError, LoadError};
use crate::events::HookEvent;
use crate::ids::{HookId, InstanceId};
use crate::persistence::{self, HookDocument};
use crate::registry::{Hook, HookRegistry, HookTarget, InstanceKind, Removal};
use crate::resolver::{self, HookCall, HookHosts, HookStatus, NativeFlow};

/// One invoked hook within a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRun {
    pub id: HookId,
    pub stack: String,
    pub target: String,
    #[serde(flatten)]
    pub status: HookStatus,
    /// The hook was scheduled for removal as a consequence of this run.
    #[serde(default)]
    pub retired: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub runs: Vec<HookRun>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn ids(&self) -> Vec<HookId> {
        self.runs.iter().map(|run| run.id).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HookRun> {
        self.runs.iter().filter(|run| !run.status.is_success())
    }

    pub fn extend(&mut self, other: DispatchReport) {
        self.runs.extend(other.runs);
    }
}

/// Read-only snapshot of a registered hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookInfo {
    pub id: HookId,
    pub stack: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(default)]
    pub retired: bool,
}

impl From<&Hook> for HookInfo {
    fn from(hook: &Hook) -> Self {
        let target = hook.target();
        Self {
            id: hook.id(),
            stack: hook.stack().to_string(),
            target: target.label().to_string(),
            instance: target.owner().map(|(_, instance)| instance),
            entry: target.entry().map(str::to_string),
            retired: hook.is_retired(),
        }
    }
}

pub struct HookEngine {
    registry: RefCell<HookRegistry>,
    depth: Cell<u32>,
    config: HookConfig,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HookEngine {
    pub fn new() -> Self {
        Self::with_config(HookConfig::default())
    }

    pub fn with_config(config: HookConfig) -> Self {
        Self { registry: RefCell::new(HookRegistry::new()), depth: Cell::new(0), config }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// Number of broadcasts currently on the call stack.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn is_dispatching(&self) -> bool {
        self.depth.get() > 0
    }

    pub fn register_mission_hook(
        &self,
        instance: InstanceId,
        entry: impl Into<String>,
        stack: impl Into<String>,
    ) -> Result<HookId, HookError> {
        self.register(stack, HookTarget::Mission { instance, entry: entry.into() })
    }

    pub fn register_event_hook(
        &self,
        instance: InstanceId,
        entry: impl Into<String>,
        stack: impl Into<String>,
    ) -> Result<HookId, HookError> {
        self.register(stack, HookTarget::Event { instance, entry: entry.into() })
    }

    /// Registers a Rust callback. Returning [`NativeFlow::Remove`] unregisters it.
    pub fn register_native_hook<F>(&self, func: F, stack: impl Into<String>) -> Result<HookId, HookError>
    where
        F: Fn(&HookEngine, &HookHosts<'_>) -> NativeFlow + 'static,
    {
        self.register(stack, HookTarget::native(func))
    }

    /// Hooks registered while a broadcast is running are first seen by the next broadcast.
    pub fn register(&self, stack: impl Into<String>, target: HookTarget) -> Result<HookId, HookError> {
        let stack = stack.into();
        let id = self.registry.borrow_mut().insert(stack.as_str(), target)?;
        debug!(hook_id = %id, stack = %stack, "hook registered");
        Ok(id)
    }

    /// Removes a hook, or retires it if a broadcast is running. Returns `false` when the id
    /// is unknown or already pending removal.
    pub fn unregister(&self, id: HookId) -> bool {
        let mut registry = self.registry.borrow_mut();
        if self.is_dispatching() {
            registry.retire(id)
        } else {
            registry.remove(id) == Removal::Removed
        }
    }

    pub fn unregister_all_for_mission(&self, instance: InstanceId) -> usize {
        self.unregister_owned(InstanceKind::Mission, instance)
    }

    pub fn unregister_all_for_event(&self, instance: InstanceId) -> usize {
        self.unregister_owned(InstanceKind::Event, instance)
    }

    fn unregister_owned(&self, kind: InstanceKind, instance: InstanceId) -> usize {
        let defer = self.is_dispatching();
        let count = self.registry.borrow_mut().remove_all_for_instance(kind, instance, defer);
        if count > 0 {
            debug!(kind = kind.label(), %instance, count, deferred = defer, "instance hooks removed");
        }
        count
    }

    /// Runs every live hook on `stack` in registration order.
    pub fn run_stack(&self, hosts: &HookHosts<'_>, stack: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !hosts.player.is_player_active() {
            debug!(stack, "player inactive, not running hooks");
            return report;
        }

        let _broadcast = Broadcast::enter(self);
        // Hooks appended from here on sit past `bound` and wait for the next broadcast.
        // Nothing is physically removed while `depth > 0`, so positions below `bound` stay put.
        let bound = self.registry.borrow().len();
        for index in 0..bound {
            let Some(call) = self.call_at(index, stack) else {
                continue;
            };
            report.runs.push(self.dispatch(hosts, call));
        }
        debug!(stack, ran = report.len(), depth = self.depth(), "hook stack finished");
        report
    }

    /// Runs one hook by id, whatever its stack.
    pub fn run_single(&self, hosts: &HookHosts<'_>, id: HookId) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !hosts.player.is_player_active() {
            return report;
        }

        let call = {
            let registry = self.registry.borrow();
            match registry.find(id) {
                Some(hook) if hook.is_retired() => return report,
                Some(hook) => HookCall::from(hook),
                None => {
                    warn!(hook_id = %id, "{}", HookError::NotFound(id));
                    return report;
                }
            }
        };

        let _broadcast = Broadcast::enter(self);
        report.runs.push(self.dispatch(hosts, call));
        report
    }

    /// Broadcasts each event's stacks in order.
    pub fn run_events<I>(&self, hosts: &HookHosts<'_>, events: I) -> DispatchReport
    where
        I: IntoIterator<Item = HookEvent>,
    {
        let mut report = DispatchReport::default();
        for event in events {
            for stack in event.stacks() {
                report.extend(self.run_stack(hosts, stack));
            }
        }
        report
    }

    fn call_at(&self, index: usize, stack: &str) -> Option<HookCall> {
        let registry = self.registry.borrow();
        registry.get(index).filter(|hook| hook.listens_to(stack)).map(HookCall::from)
    }

    fn dispatch(&self, hosts: &HookHosts<'_>, call: HookCall) -> HookRun {
        let resolution = resolver::invoke(self, hosts, &call);
        let retired = {
            let mut registry = self.registry.borrow_mut();
            if resolution.retire {
                registry.retire(call.id);
            }
            // Covers hooks that unregistered themselves or whose owner finished.
            registry.find(call.id).map_or(true, Hook::is_retired)
        };
        HookRun {
            id: call.id,
            stack: call.stack,
            target: call.target.label().to_string(),
            status: resolution.status,
            retired,
        }
    }

    fn flush(&self) {
        let Ok(mut registry) = self.registry.try_borrow_mut() else {
            warn!("registry busy at broadcast exit, retired hooks not flushed");
            return;
        };
        let removed = registry.flush_retired();
        if removed > 0 {
            debug!(removed, "flushed retired hooks");
        }
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.borrow().is_empty()
    }

    /// True while the hook is addressable, including retired hooks awaiting a flush.
    pub fn contains(&self, id: HookId) -> bool {
        self.registry.borrow().find(id).is_some()
    }

    pub fn hook(&self, id: HookId) -> Option<HookInfo> {
        self.registry.borrow().find(id).map(HookInfo::from)
    }

    pub fn hooks(&self) -> Vec<HookInfo> {
        self.registry.borrow().iter().map(HookInfo::from).collect()
    }

    /// Read access to the registry. `f` must not call back into the engine.
    pub fn with_registry<R>(&self, f: impl FnOnce(&HookRegistry) -> R) -> R {
        f(&self.registry.borrow())
    }

    /// Drops every hook. During a broadcast the hooks are retired and go at the flush.
    pub fn shutdown(&self) {
        let mut registry = self.registry.borrow_mut();
        if self.is_dispatching() {
            let ids: Vec<HookId> = registry.iter().map(Hook::id).collect();
            for id in ids {
                registry.retire(id);
            }
        } else {
            registry.clear();
        }
    }

    pub fn save(&self) -> HookDocument {
        persistence::save(&self.registry.borrow(), &self.config)
    }

    /// Replaces every hook with the document's contents. On error nothing changes.
    pub fn load(&self, document: &HookDocument) -> Result<(), LoadError> {
        if self.is_dispatching() {
            return Err(LoadError::DispatchInProgress);
        }
        persistence::restore(&mut self.registry.borrow_mut(), document)
    }
}

/// Broadcast depth guard. Dropping the outermost guard flushes retired hooks, including
/// when a callback unwinds.
struct Broadcast<'a> {
    engine: &'a HookEngine,
}

impl<'a> Broadcast<'a> {
    fn enter(engine: &'a HookEngine) -> Self {
        engine.depth.set(engine.depth.get() + 1);
        Self { engine }
    }
}

impl Drop for Broadcast<'_> {
    fn drop(&mut self) {
        let depth = self.engine.depth.get().saturating_sub(1);
        self.engine.depth.set(depth);
        if depth == 0 {
            self.engine.flush();
        }
    }
}
