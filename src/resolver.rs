use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

use crate::dispatch::HookEngine;
use crate::error::HookError;
use crate::ids::{HookId, InstanceId};
use crate::registry::{Hook, HookTarget};

/// Host-defined reference to a running mission, returned by [`MissionHost::resolve_mission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MissionHandle(pub u32);

/// Host-defined reference to a running event, returned by [`EventHost::resolve_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u32);

/// How a script entry point ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Normal return, including an early `finish()` that does not end the instance.
    Returned,
    /// The script asked for its instance to be finished and torn down.
    Finished,
    /// The script terminated abnormally.
    Failed(String),
}

/// Result of a native hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFlow {
    Keep,
    Remove,
}

pub trait MissionHost {
    fn resolve_mission(&self, instance: InstanceId) -> Option<MissionHandle>;

    /// Runs `entry` on the mission. `hooks` and `hosts` may be used re-entrantly.
    fn invoke_entry(
        &self,
        hooks: &HookEngine,
        hosts: &HookHosts<'_>,
        mission: MissionHandle,
        entry: &str,
    ) -> ScriptOutcome;

    fn teardown(&self, mission: MissionHandle);
}

pub trait EventHost {
    fn resolve_event(&self, instance: InstanceId) -> Option<EventHandle>;

    /// Runs `entry` on the event. `hooks` and `hosts` may be used re-entrantly.
    fn invoke_entry(&self, hooks: &HookEngine, hosts: &HookHosts<'_>, event: EventHandle, entry: &str)
        -> ScriptOutcome;

    fn teardown(&self, event: EventHandle);
}

/// Gate checked before every broadcast.
pub trait PlayerGate {
    fn is_player_active(&self) -> bool;
}

/// Collaborators a broadcast needs. Cheap to copy and passed down into every callback.
#[derive(Clone, Copy)]
pub struct HookHosts<'a> {
    pub missions: &'a dyn MissionHost,
    pub events: &'a dyn EventHost,
    pub player: &'a dyn PlayerGate,
}

impl<'a> HookHosts<'a> {
    pub fn new(missions: &'a dyn MissionHost, events: &'a dyn EventHost, player: &'a dyn PlayerGate) -> Self {
        Self { missions, events, player }
    }
}

/// Host with no running missions or events. Useful when only native hooks are in play.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstances;

impl MissionHost for NoInstances {
    fn resolve_mission(&self, _instance: InstanceId) -> Option<MissionHandle> {
        None
    }

    fn invoke_entry(&self, _: &HookEngine, _: &HookHosts<'_>, _: MissionHandle, _: &str) -> ScriptOutcome {
        ScriptOutcome::Failed("no mission host".to_string())
    }

    fn teardown(&self, _mission: MissionHandle) {}
}

impl EventHost for NoInstances {
    fn resolve_event(&self, _instance: InstanceId) -> Option<EventHandle> {
        None
    }

    fn invoke_entry(&self, _: &HookEngine, _: &HookHosts<'_>, _: EventHandle, _: &str) -> ScriptOutcome {
        ScriptOutcome::Failed("no event host".to_string())
    }

    fn teardown(&self, _event: EventHandle) {}
}

/// Per-hook result recorded in a dispatch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HookStatus {
    Success,
    InvalidTarget,
    RuntimeFailure { message: String },
}

impl HookStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, HookStatus::Success)
    }
}

/// Owned copy of a hook taken before its target runs, so no registry borrow is held
/// while script or native code executes.
#[derive(Debug, Clone)]
pub(crate) struct HookCall {
    pub id: HookId,
    pub stack: String,
    pub target: HookTarget,
}

impl From<&Hook> for HookCall {
    fn from(hook: &Hook) -> Self {
        Self { id: hook.id(), stack: hook.stack().to_string(), target: hook.target().clone() }
    }
}

pub(crate) struct Resolution {
    pub status: HookStatus,
    /// The hook asked to be removed (or must be, because its owner is gone).
    pub retire: bool,
}

impl Resolution {
    fn success() -> Self {
        Self { status: HookStatus::Success, retire: false }
    }

    fn invalid_target() -> Self {
        Self { status: HookStatus::InvalidTarget, retire: true }
    }

    fn failure(message: String, retire: bool) -> Self {
        Self { status: HookStatus::RuntimeFailure { message }, retire }
    }
}

pub(crate) fn invoke(hooks: &HookEngine, hosts: &HookHosts<'_>, call: &HookCall) -> Resolution {
    match &call.target {
        HookTarget::Mission { instance, entry } => invoke_mission(hooks, hosts, call, *instance, entry),
        HookTarget::Event { instance, entry } => invoke_event(hooks, hosts, call, *instance, entry),
        HookTarget::Native(func) => {
            let func = func.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| func(hooks, hosts))) {
                Ok(NativeFlow::Keep) => Resolution::success(),
                Ok(NativeFlow::Remove) => Resolution { status: HookStatus::Success, retire: true },
                Err(payload) => {
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    report_failure(call, "<native>", &message);
                    Resolution::failure(message, true)
                }
            }
        }
    }
}

fn invoke_mission(
    hooks: &HookEngine,
    hosts: &HookHosts<'_>,
    call: &HookCall,
    instance: InstanceId,
    entry: &str,
) -> Resolution {
    let Some(mission) = hosts.missions.resolve_mission(instance) else {
        let err = HookError::InvalidTarget { id: call.id, instance };
        warn!(stack = %call.stack, hook_id = %call.id, "{err}; deleting");
        return Resolution::invalid_target();
    };
    match hosts.missions.invoke_entry(hooks, hosts, mission, entry) {
        ScriptOutcome::Returned => Resolution::success(),
        ScriptOutcome::Finished => {
            hosts.missions.teardown(mission);
            hooks.unregister_all_for_mission(instance);
            Resolution::success()
        }
        ScriptOutcome::Failed(message) => {
            report_failure(call, entry, &message);
            Resolution::failure(message, false)
        }
    }
}

// Unlike missions, a failing event hook is dropped.
fn invoke_event(
    hooks: &HookEngine,
    hosts: &HookHosts<'_>,
    call: &HookCall,
    instance: InstanceId,
    entry: &str,
) -> Resolution {
    let Some(event) = hosts.events.resolve_event(instance) else {
        let err = HookError::InvalidTarget { id: call.id, instance };
        warn!(stack = %call.stack, hook_id = %call.id, "{err}; deleting");
        return Resolution::invalid_target();
    };
    match hosts.events.invoke_entry(hooks, hosts, event, entry) {
        ScriptOutcome::Returned => Resolution::success(),
        ScriptOutcome::Finished => {
            hosts.events.teardown(event);
            hooks.unregister_all_for_event(instance);
            Resolution::success()
        }
        ScriptOutcome::Failed(message) => {
            report_failure(call, entry, &message);
            Resolution::failure(message, true)
        }
    }
}

fn report_failure(call: &HookCall, entry: &str, message: &str) {
    let err = HookError::RuntimeFailure {
        id: call.id,
        stack: call.stack.clone(),
        entry: entry.to_string(),
        message: message.to_string(),
    };
    warn!(stack = %call.stack, hook_id = %call.id, entry, "{err}");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
