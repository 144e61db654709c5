use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use crate::dispatch::HookEngine;
use crate::error::HookError;
use crate::ids::{HookId, IdAllocator, InstanceId};
use crate::resolver::{HookHosts, NativeFlow};

/// Callable behind a native hook. Any context it needs is captured by the closure.
pub type NativeHookFn = dyn Fn(&HookEngine, &HookHosts<'_>) -> NativeFlow;

/// Owner kinds whose hooks can be torn down together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Mission,
    Event,
}

impl InstanceKind {
    pub fn label(self) -> &'static str {
        match self {
            InstanceKind::Mission => "mission",
            InstanceKind::Event => "event",
        }
    }
}

/// What a hook runs when its stack is broadcast.
#[derive(Clone)]
pub enum HookTarget {
    Mission { instance: InstanceId, entry: String },
    Event { instance: InstanceId, entry: String },
    Native(Rc<NativeHookFn>),
}

impl HookTarget {
    pub fn native<F>(func: F) -> Self
    where
        F: Fn(&HookEngine, &HookHosts<'_>) -> NativeFlow + 'static,
    {
        HookTarget::Native(Rc::new(func))
    }

    pub fn label(&self) -> &'static str {
        match self {
            HookTarget::Mission { .. } => "mission",
            HookTarget::Event { .. } => "event",
            HookTarget::Native(_) => "native",
        }
    }

    pub fn owner(&self) -> Option<(InstanceKind, InstanceId)> {
        match self {
            HookTarget::Mission { instance, .. } => Some((InstanceKind::Mission, *instance)),
            HookTarget::Event { instance, .. } => Some((InstanceKind::Event, *instance)),
            HookTarget::Native(_) => None,
        }
    }

    pub fn entry(&self) -> Option<&str> {
        match self {
            HookTarget::Mission { entry, .. } | HookTarget::Event { entry, .. } => Some(entry),
            HookTarget::Native(_) => None,
        }
    }

    fn is_owned_by(&self, kind: InstanceKind, instance: InstanceId) -> bool {
        self.owner() == Some((kind, instance))
    }
}

impl fmt::Debug for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookTarget::Mission { instance, entry } => {
                f.debug_struct("Mission").field("instance", instance).field("entry", entry).finish()
            }
            HookTarget::Event { instance, entry } => {
                f.debug_struct("Event").field("instance", instance).field("entry", entry).finish()
            }
            HookTarget::Native(_) => f.write_str("Native(<fn>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hook {
    id: HookId,
    stack: String,
    retired: bool,
    target: HookTarget,
}

impl Hook {
    pub fn id(&self) -> HookId {
        self.id
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Retired hooks are logically removed and wait for the next flush.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn target(&self) -> &HookTarget {
        &self.target
    }

    pub fn listens_to(&self, stack: &str) -> bool {
        !self.retired && self.stack == stack
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
}

/// Hooks ordered by ascending id. Ids come from a single monotonic allocator and hooks are
/// only ever appended, so the backing vector stays sorted without an explicit sort.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<Hook>,
    ids: IdAllocator,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { hooks: Vec::new(), ids: IdAllocator::new() }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn insert(&mut self, stack: impl Into<String>, target: HookTarget) -> Result<HookId, HookError> {
        let id = self.ids.next_id()?;
        self.hooks.push(Hook { id, stack: stack.into(), retired: false, target });
        Ok(id)
    }

    fn position(&self, id: HookId) -> Option<usize> {
        self.hooks.binary_search_by_key(&id, |hook| hook.id).ok()
    }

    pub fn find(&self, id: HookId) -> Option<&Hook> {
        let idx = self.position(id)?;
        self.hooks.get(idx)
    }

    pub fn find_mut(&mut self, id: HookId) -> Option<&mut Hook> {
        let idx = self.position(id)?;
        self.hooks.get_mut(idx)
    }

    /// Hook at a raw position, for index-bounded iteration during a broadcast.
    pub fn get(&self, index: usize) -> Option<&Hook> {
        self.hooks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hook> {
        self.hooks.iter()
    }

    pub fn remove(&mut self, id: HookId) -> Removal {
        match self.position(id) {
            Some(idx) => {
                self.hooks.remove(idx);
                Removal::Removed
            }
            None => Removal::NotFound,
        }
    }

    /// Flags a hook for removal at the next flush. Returns `false` for unknown or
    /// already retired ids.
    pub fn retire(&mut self, id: HookId) -> bool {
        match self.find_mut(id) {
            Some(hook) if !hook.retired => {
                hook.retired = true;
                true
            }
            _ => false,
        }
    }

    /// Drops every retired hook in a single compaction pass.
    pub fn flush_retired(&mut self) -> usize {
        let before = self.hooks.len();
        self.hooks.retain(|hook| !hook.retired);
        before - self.hooks.len()
    }

    /// Live hooks on `stack`, in id order.
    pub fn matching<'a>(&'a self, stack: &'a str) -> impl Iterator<Item = &'a Hook> + 'a {
        self.hooks.iter().filter(move |hook| hook.listens_to(stack))
    }

    pub fn for_each_matching(&self, stack: &str, mut f: impl FnMut(&Hook)) {
        for hook in self.matching(stack) {
            f(hook);
        }
    }

    /// Removes (or, when `defer` is set, retires) every hook owned by the given instance.
    pub fn remove_all_for_instance(&mut self, kind: InstanceKind, instance: InstanceId, defer: bool) -> usize {
        if defer {
            let mut retired = 0;
            for hook in self.hooks.iter_mut().filter(|hook| !hook.retired) {
                if hook.target.is_owned_by(kind, instance) {
                    hook.retired = true;
                    retired += 1;
                }
            }
            retired
        } else {
            let before = self.hooks.len();
            self.hooks.retain(|hook| !hook.target.is_owned_by(kind, instance));
            before - self.hooks.len()
        }
    }

    /// Drops every hook. The allocator keeps its high-water mark so ids are never reissued.
    pub fn clear(&mut self) {
        self.hooks.clear();
    }
}
