use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use kestrel_hooks::resolver::{EventHandle, EventHost, MissionHandle, MissionHost, NoInstances};
use kestrel_hooks::{
    HookEngine, HookEvent, HookHosts, HookId, HookStatus, InstanceId, NativeFlow, PlayerStatus, ScriptOutcome,
};

type EntryFn = Rc<dyn Fn(&HookEngine, &HookHosts<'_>) -> ScriptOutcome>;

/// Scriptable stand-in for the mission and event runtimes. Entry points without a
/// registered behaviour just return.
#[derive(Default)]
struct Scripts {
    missions: RefCell<Vec<InstanceId>>,
    events: RefCell<Vec<InstanceId>>,
    entries: RefCell<HashMap<String, EntryFn>>,
    calls: RefCell<Vec<String>>,
    torn_down: RefCell<Vec<InstanceId>>,
}

impl Scripts {
    fn with_instances(missions: &[u32], events: &[u32]) -> Self {
        let scripts = Scripts::default();
        scripts.missions.borrow_mut().extend(missions.iter().copied().map(InstanceId));
        scripts.events.borrow_mut().extend(events.iter().copied().map(InstanceId));
        scripts
    }

    fn on<F>(&self, entry: &str, f: F)
    where
        F: Fn(&HookEngine, &HookHosts<'_>) -> ScriptOutcome + 'static,
    {
        self.entries.borrow_mut().insert(entry.to_string(), Rc::new(f));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn run(&self, hooks: &HookEngine, hosts: &HookHosts<'_>, entry: &str) -> ScriptOutcome {
        self.calls.borrow_mut().push(entry.to_string());
        let behaviour = self.entries.borrow().get(entry).cloned();
        match behaviour {
            Some(f) => f(hooks, hosts),
            None => ScriptOutcome::Returned,
        }
    }
}

impl MissionHost for Scripts {
    fn resolve_mission(&self, instance: InstanceId) -> Option<MissionHandle> {
        self.missions.borrow().contains(&instance).then_some(MissionHandle(instance.get()))
    }

    fn invoke_entry(&self, hooks: &HookEngine, hosts: &HookHosts<'_>, _: MissionHandle, entry: &str) -> ScriptOutcome {
        self.run(hooks, hosts, entry)
    }

    fn teardown(&self, mission: MissionHandle) {
        self.missions.borrow_mut().retain(|id| id.get() != mission.0);
        self.torn_down.borrow_mut().push(InstanceId(mission.0));
    }
}

impl EventHost for Scripts {
    fn resolve_event(&self, instance: InstanceId) -> Option<EventHandle> {
        self.events.borrow().contains(&instance).then_some(EventHandle(instance.get()))
    }

    fn invoke_entry(&self, hooks: &HookEngine, hosts: &HookHosts<'_>, _: EventHandle, entry: &str) -> ScriptOutcome {
        self.run(hooks, hosts, entry)
    }

    fn teardown(&self, event: EventHandle) {
        self.events.borrow_mut().retain(|id| id.get() != event.0);
        self.torn_down.borrow_mut().push(InstanceId(event.0));
    }
}

fn hosts<'a>(scripts: &'a Scripts, player: &'a PlayerStatus) -> HookHosts<'a> {
    HookHosts::new(scripts, scripts, player)
}

fn ids(hooks: &HookEngine) -> Vec<HookId> {
    hooks.hooks().iter().map(|hook| hook.id).collect()
}

const MISSION: InstanceId = InstanceId(1);

#[test]
fn removal_during_broadcast_skips_the_removed_hook() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    let first = hooks.register_mission_hook(MISSION, "first", "land").expect("register");
    let second = hooks.register_mission_hook(MISSION, "second", "land").expect("register");
    let third = hooks.register_mission_hook(MISSION, "third", "land").expect("register");
    assert_eq!((first, second, third), (HookId(1), HookId(2), HookId(3)));
    scripts.on("first", move |hooks, _| {
        assert!(hooks.unregister(second), "second hook should be retired");
        assert!(hooks.contains(second), "retired hooks stay addressable until the flush");
        ScriptOutcome::Returned
    });

    let report = hooks.run_stack(&hosts(&scripts, &player), "land");

    assert_eq!(report.ids(), vec![first, third]);
    assert_eq!(scripts.calls(), vec!["first", "third"]);
    assert!(!hooks.contains(second));
    assert_eq!(ids(&hooks), vec![first, third]);
    assert!(!hooks.is_dispatching());
}

#[test]
fn empty_stack_runs_nothing() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    hooks.register_mission_hook(MISSION, "on_land", "land").expect("register");

    let report = hooks.run_stack(&hosts(&scripts, &player), "takeoff");

    assert!(report.is_empty());
    assert!(scripts.calls().is_empty());
    assert_eq!(hooks.len(), 1);
}

#[test]
fn hooks_added_during_broadcast_wait_for_the_next_one() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    let added = Rc::new(Cell::new(None));
    hooks.register_mission_hook(MISSION, "spawner", "land").expect("register");
    let slot = added.clone();
    scripts.on("spawner", move |hooks, _| {
        if slot.get().is_none() {
            slot.set(Some(hooks.register_mission_hook(MISSION, "late", "land").expect("register late")));
        }
        ScriptOutcome::Returned
    });

    let first = hooks.run_stack(&hosts(&scripts, &player), "land");
    assert_eq!(first.ids(), vec![HookId(1)]);
    let late = added.get().expect("late hook registered");
    assert_eq!(late, HookId(2));

    let second = hooks.run_stack(&hosts(&scripts, &player), "land");
    assert_eq!(second.ids(), vec![HookId(1), late]);
    assert_eq!(scripts.calls(), vec!["spawner", "spawner", "late"]);
}

#[test]
fn hook_can_unregister_itself() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    let once = hooks.register_mission_hook(MISSION, "once", "enter").expect("register");
    let next = hooks.register_mission_hook(MISSION, "next", "enter").expect("register");
    scripts.on("once", move |hooks, _| {
        hooks.unregister(once);
        ScriptOutcome::Returned
    });

    let report = hooks.run_stack(&hosts(&scripts, &player), "enter");
    assert_eq!(report.ids(), vec![once, next]);
    assert!(report.runs.iter().all(|run| run.status.is_success()));
    assert!(report.runs[0].retired);
    assert!(!report.runs[1].retired);
    assert_eq!(scripts.calls(), vec!["once", "next"]);
    assert!(!hooks.contains(once));
    assert_eq!(ids(&hooks), vec![next]);

    assert_eq!(hooks.run_stack(&hosts(&scripts, &player), "enter").ids(), vec![next]);
}

#[test]
fn nested_broadcast_defers_removal_to_the_outermost_exit() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    let outer = hooks.register_mission_hook(MISSION, "outer", "takeoff").expect("register");
    let inner = hooks.register_mission_hook(MISSION, "inner", "custom").expect("register");
    let depths = Rc::new(RefCell::new(Vec::new()));

    let seen = depths.clone();
    scripts.on("outer", move |hooks, hosts| {
        seen.borrow_mut().push(hooks.depth());
        let nested = hooks.run_stack(hosts, "custom");
        assert_eq!(nested.ids(), vec![inner]);
        assert!(hooks.contains(outer), "the inner broadcast exit must not flush");
        ScriptOutcome::Returned
    });
    let seen = depths.clone();
    scripts.on("inner", move |hooks, _| {
        seen.borrow_mut().push(hooks.depth());
        assert!(hooks.unregister(outer));
        ScriptOutcome::Returned
    });

    let report = hooks.run_stack(&hosts(&scripts, &player), "takeoff");

    assert_eq!(report.ids(), vec![outer]);
    assert!(report.runs[0].retired);
    assert_eq!(*depths.borrow(), vec![1, 2]);
    assert_eq!(hooks.depth(), 0);
    assert_eq!(ids(&hooks), vec![inner]);
}

#[test]
fn inactive_player_blocks_every_hook() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let id = hooks.register_mission_hook(MISSION, "on_land", "land").expect("register");

    for player in [PlayerStatus::absent(), PlayerStatus::destroyed()] {
        assert!(hooks.run_stack(&hosts(&scripts, &player), "land").is_empty());
        assert!(hooks.run_single(&hosts(&scripts, &player), id).is_empty());
    }
    assert!(scripts.calls().is_empty());
    assert!(hooks.contains(id));
}

#[test]
fn run_single_targets_one_hook() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    hooks.register_mission_hook(MISSION, "a", "land").expect("register");
    let b = hooks.register_mission_hook(MISSION, "b", "land").expect("register");

    let report = hooks.run_single(&hosts(&scripts, &player), b);
    assert_eq!(report.ids(), vec![b]);
    assert_eq!(scripts.calls(), vec!["b"]);

    assert!(hooks.run_single(&hosts(&scripts, &player), HookId(99)).is_empty());
}

#[test]
fn run_events_fires_jump_stacks_in_order() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    hooks.register_mission_hook(MISSION, "entered", "enter").expect("register");
    hooks.register_mission_hook(MISSION, "arrived", "jumpin").expect("register");
    hooks.register_mission_hook(MISSION, "left", "jumpout").expect("register");

    hooks.run_events(&hosts(&scripts, &player), [HookEvent::Jump]);

    assert_eq!(scripts.calls(), vec!["left", "arrived", "entered"]);
}

#[test]
fn orphaned_mission_hook_is_reported_and_deleted() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    let orphan = hooks.register_mission_hook(InstanceId(9), "gone", "land").expect("register");

    let report = hooks.run_stack(&hosts(&scripts, &player), "land");

    assert_eq!(report.runs[0].status, HookStatus::InvalidTarget);
    assert!(report.runs[0].retired);
    assert!(!hooks.contains(orphan));
    assert!(scripts.calls().is_empty());
}

#[test]
fn failing_mission_hook_is_kept_but_failing_event_hook_is_dropped() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[7]);
    let player = PlayerStatus::alive();
    let mission = hooks.register_mission_hook(MISSION, "broken", "land").expect("register");
    let event = hooks.register_event_hook(InstanceId(7), "broken", "land").expect("register");
    scripts.on("broken", |_, _| ScriptOutcome::Failed("engine fire".to_string()));

    let report = hooks.run_stack(&hosts(&scripts, &player), "land");

    assert_eq!(report.failures().count(), 2);
    for run in &report.runs {
        assert_eq!(run.status, HookStatus::RuntimeFailure { message: "engine fire".to_string() });
    }
    assert!(hooks.contains(mission));
    assert!(!hooks.contains(event));
}

#[test]
fn finishing_tears_down_the_owner_and_its_hooks() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1, 2], &[]);
    let player = PlayerStatus::alive();
    let done = hooks.register_mission_hook(MISSION, "done", "land").expect("register");
    let sibling = hooks.register_mission_hook(MISSION, "sibling", "enter").expect("register");
    let other = hooks.register_mission_hook(InstanceId(2), "other", "land").expect("register");
    scripts.on("done", |_, _| ScriptOutcome::Finished);

    let report = hooks.run_stack(&hosts(&scripts, &player), "land");

    assert_eq!(report.ids(), vec![done, other]);
    assert!(report.runs[0].retired);
    assert!(!report.runs[1].retired);
    assert_eq!(*scripts.torn_down.borrow(), vec![MISSION]);
    assert!(!hooks.contains(sibling));
    assert_eq!(ids(&hooks), vec![other]);
}

#[test]
fn native_hooks_run_and_can_remove_themselves() {
    let hooks = HookEngine::new();
    let player = PlayerStatus::alive();
    let hosts = HookHosts::new(&NoInstances, &NoInstances, &player);
    let count = Rc::new(Cell::new(0));
    let counter = count.clone();
    let keep = hooks
        .register_native_hook(
            move |_, _| {
                counter.set(counter.get() + 1);
                NativeFlow::Keep
            },
            "idle",
        )
        .expect("register");
    let once = hooks.register_native_hook(|_, _| NativeFlow::Remove, "idle").expect("register");

    let report = hooks.run_stack(&hosts, "idle");
    assert_eq!(report.ids(), vec![keep, once]);
    assert!(report.runs.iter().all(|run| run.status.is_success()));
    assert!(hooks.contains(keep));
    assert!(!hooks.contains(once));

    hooks.run_stack(&hosts, "idle");
    assert_eq!(count.get(), 2);
}

#[test]
fn panicking_native_hook_is_contained() {
    let hooks = HookEngine::new();
    let player = PlayerStatus::alive();
    let hosts = HookHosts::new(&NoInstances, &NoInstances, &player);
    let bad = hooks.register_native_hook(|_, _| panic!("boom"), "land").expect("register");
    let good = hooks.register_native_hook(|_, _| NativeFlow::Keep, "land").expect("register");

    let report = hooks.run_stack(&hosts, "land");

    assert_eq!(report.ids(), vec![bad, good]);
    match &report.runs[0].status {
        HookStatus::RuntimeFailure { message } => assert!(message.contains("boom"), "message was {message}"),
        other => panic!("expected a runtime failure, got {other:?}"),
    }
    assert!(report.runs[1].status.is_success());
    assert!(!hooks.contains(bad));
    assert_eq!(hooks.depth(), 0);
}

#[test]
fn ids_are_never_reused() {
    let hooks = HookEngine::new();
    let a = hooks.register_mission_hook(MISSION, "a", "land").expect("register");
    let b = hooks.register_mission_hook(MISSION, "b", "land").expect("register");
    assert!(hooks.unregister(b));
    assert!(hooks.unregister(a));
    let c = hooks.register_mission_hook(MISSION, "c", "land").expect("register");
    assert_eq!(c, HookId(3));
}

#[test]
fn unregister_is_idempotent() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    let id = hooks.register_mission_hook(MISSION, "twice", "land").expect("register");
    scripts.on("twice", move |hooks, _| {
        assert!(hooks.unregister(id));
        assert!(!hooks.unregister(id), "a retired hook cannot be removed again");
        ScriptOutcome::Returned
    });

    hooks.run_stack(&hosts(&scripts, &player), "land");
    assert!(!hooks.unregister(id));
    assert!(!hooks.unregister(HookId(42)));
}

#[test]
fn registry_stays_sorted_across_mixed_operations() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1, 2], &[]);
    let player = PlayerStatus::alive();
    for stack in ["land", "enter", "land", "takeoff", "land"] {
        hooks.register_mission_hook(MISSION, "noop", stack).expect("register");
    }
    hooks.unregister(HookId(2));
    hooks.register_mission_hook(InstanceId(2), "noop", "enter").expect("register");
    hooks.unregister_all_for_mission(MISSION);
    hooks.register_mission_hook(InstanceId(2), "noop", "land").expect("register");
    hooks.run_stack(&hosts(&scripts, &player), "land");

    let ids = ids(&hooks);
    assert_eq!(ids, vec![HookId(6), HookId(7)]);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn shutdown_during_broadcast_empties_the_registry_on_exit() {
    let hooks = HookEngine::new();
    let scripts = Scripts::with_instances(&[1], &[]);
    let player = PlayerStatus::alive();
    hooks.register_mission_hook(MISSION, "quit", "land").expect("register");
    hooks.register_mission_hook(MISSION, "after", "land").expect("register");
    scripts.on("quit", |hooks, _| {
        hooks.shutdown();
        ScriptOutcome::Returned
    });

    let report = hooks.run_stack(&hosts(&scripts, &player), "land");

    assert_eq!(report.ids(), vec![HookId(1)]);
    assert!(hooks.is_empty());
    assert_eq!(scripts.calls(), vec!["quit"]);
}

#[test]
fn broadcast_under_a_registry_read_skips_the_flush() {
    let hooks = HookEngine::new();
    let player = PlayerStatus::alive();
    let hosts = HookHosts::new(&NoInstances, &NoInstances, &player);
    let id = hooks.register_native_hook(|_, _| NativeFlow::Keep, "land").expect("register");

    let report = hooks.with_registry(|registry| {
        assert_eq!(registry.len(), 1);
        hooks.run_stack(&hosts, "takeoff")
    });

    assert!(report.is_empty());
    assert_eq!(hooks.depth(), 0);
    assert!(hooks.contains(id));
    assert_eq!(hooks.run_stack(&hosts, "land").ids(), vec![id]);
}
