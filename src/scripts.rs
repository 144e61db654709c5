use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST};
use tracing::{debug, info};

use crate::dispatch::{DispatchReport, HookEngine};
use crate::events::{EventQueue, HookEvent};
use crate::ids::{HookId, InstanceId};
use crate::player::PlayerStatus;
use crate::registry::InstanceKind;
use crate::resolver::{
    EventHandle, EventHost, HookHosts, MissionHandle, MissionHost, PlayerGate, ScriptOutcome,
};

/// Error value thrown by `finish` to unwind out of the running entry point.
const FINISH_SIGNAL: &str = "Mission Done";

#[derive(Debug, Clone, Copy)]
struct Owner {
    kind: InstanceKind,
    instance: InstanceId,
}

#[derive(Debug, Clone, Copy)]
enum FinishRequest {
    /// `finish()`: leave the entry point, keep the instance.
    Return,
    /// `finish(properly)`: end the instance; `completed` records it as done.
    Instance { completed: bool },
}

#[derive(Debug)]
struct ScriptFrame {
    owner: Owner,
    finish: Option<FinishRequest>,
}

/// State reachable from functions registered with rhai.
struct ScriptBridge {
    hooks: Rc<HookEngine>,
    frames: RefCell<Vec<ScriptFrame>>,
    logs: RefCell<Vec<String>>,
    queue: RefCell<EventQueue>,
}

impl ScriptBridge {
    fn push_frame(&self, owner: Owner) {
        self.frames.borrow_mut().push(ScriptFrame { owner, finish: None });
    }

    fn pop_frame(&self) -> Option<FinishRequest> {
        self.frames.borrow_mut().pop().and_then(|frame| frame.finish)
    }

    fn current(&self) -> Option<Owner> {
        self.frames.borrow().last().map(|frame| frame.owner)
    }

    fn add_hook(&self, stack: &str, entry: &str) -> Result<rhai::INT, Box<EvalAltResult>> {
        let owner = self.current().ok_or_else(|| runtime_error("hook_add called outside of a script call"))?;
        let registered = match owner.kind {
            InstanceKind::Mission => self.hooks.register_mission_hook(owner.instance, entry, stack),
            InstanceKind::Event => self.hooks.register_event_hook(owner.instance, entry, stack),
        };
        registered.map(|id| rhai::INT::from(id.get())).map_err(|err| runtime_error(err.to_string()))
    }

    fn remove_hook(&self, id: rhai::INT) -> bool {
        match u32::try_from(id) {
            Ok(id) => self.hooks.unregister(HookId(id)),
            Err(_) => false,
        }
    }

    fn finish(&self, request: FinishRequest) -> Result<(), Box<EvalAltResult>> {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.finish = Some(request);
        }
        Err(runtime_error(FINISH_SIGNAL))
    }

    fn emit(&self, stack: &str) {
        self.queue.borrow_mut().push(HookEvent::from_stack(stack));
    }

    fn log(&self, message: &str) {
        let line = match self.current() {
            Some(owner) => format!("[{} {}] {message}", owner.kind.label(), owner.instance),
            None => format!("[script] {message}"),
        };
        debug!("{line}");
        self.logs.borrow_mut().push(line);
    }
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(message.into()), Position::NONE).into()
}

struct ScriptInstance {
    id: InstanceId,
    name: String,
    ast: AST,
    scope: Scope<'static>,
    /// Bound as `this` in every entry point.
    memory: Dynamic,
}

/// Runs mission and event scripts written in Rhai and serves them to the hook engine.
///
/// Scripts see `hook_add(stack, entry)`, `hook_rm(id)`, `finish()`, `finish(properly)`,
/// `emit(stack)` and `log(message)`. Entry points keep state in `this`, a map owned by
/// the instance.
pub struct ScriptRuntime {
    engine: Engine,
    bridge: Rc<ScriptBridge>,
    missions: RefCell<Vec<ScriptInstance>>,
    events: RefCell<Vec<ScriptInstance>>,
    next_instance: Cell<u32>,
    player: Cell<PlayerStatus>,
    completed: RefCell<Vec<String>>,
}

impl ScriptRuntime {
    pub fn new(hooks: Rc<HookEngine>) -> Self {
        let bridge = Rc::new(ScriptBridge {
            hooks,
            frames: RefCell::new(Vec::new()),
            logs: RefCell::new(Vec::new()),
            queue: RefCell::new(EventQueue::default()),
        });
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        register_api(&mut engine, &bridge);
        Self {
            engine,
            bridge,
            missions: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            next_instance: Cell::new(1),
            player: Cell::new(PlayerStatus::alive()),
            completed: RefCell::new(Vec::new()),
        }
    }

    pub fn hooks(&self) -> &HookEngine {
        &self.bridge.hooks
    }

    /// The runtime serves as mission host, event host and player gate at once.
    pub fn hosts(&self) -> HookHosts<'_> {
        HookHosts::new(self, self, self)
    }

    pub fn broadcast(&self, stack: &str) -> DispatchReport {
        self.hooks().run_stack(&self.hosts(), stack)
    }

    pub fn run_hook(&self, id: HookId) -> DispatchReport {
        self.hooks().run_single(&self.hosts(), id)
    }

    /// Broadcasts everything scripts emitted since the last drain. Occurrences emitted while
    /// draining wait for the next call.
    pub fn drain_events(&self) -> DispatchReport {
        let events = self.bridge.queue.borrow_mut().drain();
        self.hooks().run_events(&self.hosts(), events)
    }

    pub fn pending_events(&self) -> bool {
        !self.bridge.queue.borrow().is_empty()
    }

    pub fn player(&self) -> PlayerStatus {
        self.player.get()
    }

    pub fn set_player(&self, status: PlayerStatus) {
        self.player.set(status);
    }

    pub fn take_logs(&self) -> Vec<String> {
        self.bridge.logs.borrow_mut().drain(..).collect()
    }

    /// Names of missions that ended with `finish(true)`.
    pub fn completed_missions(&self) -> Vec<String> {
        self.completed.borrow().clone()
    }

    pub fn mission_ids(&self) -> Vec<InstanceId> {
        self.missions.borrow().iter().map(|script| script.id).collect()
    }

    pub fn event_ids(&self) -> Vec<InstanceId> {
        self.events.borrow().iter().map(|script| script.id).collect()
    }

    pub fn is_running(&self, kind: InstanceKind, instance: InstanceId) -> bool {
        self.instances(kind).borrow().iter().any(|script| script.id == instance)
    }

    pub fn start_mission(&self, name: &str, source: &str) -> Result<InstanceId> {
        let id = self.allocate_instance();
        self.start(InstanceKind::Mission, id, name, source, true)?;
        Ok(id)
    }

    pub fn start_event(&self, name: &str, source: &str) -> Result<InstanceId> {
        let id = self.allocate_instance();
        self.start(InstanceKind::Event, id, name, source, true)?;
        Ok(id)
    }

    pub fn start_mission_file(&self, path: impl AsRef<Path>) -> Result<InstanceId> {
        let (name, source) = read_script(path.as_ref())?;
        self.start_mission(&name, &source)
    }

    pub fn start_event_file(&self, path: impl AsRef<Path>) -> Result<InstanceId> {
        let (name, source) = read_script(path.as_ref())?;
        self.start_event(&name, &source)
    }

    /// Brings back a mission from a save under its original instance id, without calling
    /// `create`. Its hooks are expected to come back through [`HookEngine::load`].
    pub fn restore_mission(&self, instance: InstanceId, name: &str, source: &str) -> Result<()> {
        if !instance.is_valid() {
            bail!("Cannot restore mission '{name}' under instance 0");
        }
        if self.is_running(InstanceKind::Mission, instance) {
            bail!("Mission instance {instance} is already running");
        }
        self.next_instance.set(self.next_instance.get().max(instance.get().saturating_add(1)));
        self.start(InstanceKind::Mission, instance, name, source, false)
    }

    /// Ends a mission from outside its script (e.g. the player abandons it) and drops its hooks.
    pub fn abort_mission(&self, instance: InstanceId) -> bool {
        self.end_instance(InstanceKind::Mission, instance)
    }

    pub fn abort_event(&self, instance: InstanceId) -> bool {
        self.end_instance(InstanceKind::Event, instance)
    }

    fn end_instance(&self, kind: InstanceKind, instance: InstanceId) -> bool {
        if !self.remove_instance(kind, instance) {
            return false;
        }
        match kind {
            InstanceKind::Mission => self.hooks().unregister_all_for_mission(instance),
            InstanceKind::Event => self.hooks().unregister_all_for_event(instance),
        };
        true
    }

    fn allocate_instance(&self) -> InstanceId {
        let id = self.next_instance.get();
        self.next_instance.set(id.saturating_add(1));
        InstanceId(id)
    }

    fn instances(&self, kind: InstanceKind) -> &RefCell<Vec<ScriptInstance>> {
        match kind {
            InstanceKind::Mission => &self.missions,
            InstanceKind::Event => &self.events,
        }
    }

    fn start(&self, kind: InstanceKind, id: InstanceId, name: &str, source: &str, create: bool) -> Result<()> {
        let ast = self.engine.compile(source).with_context(|| format!("Compiling script '{name}'"))?;
        let mut script = ScriptInstance {
            id,
            name: name.to_string(),
            ast,
            scope: Scope::new(),
            memory: Dynamic::from_map(Map::new()),
        };

        self.bridge.push_frame(Owner { kind, instance: id });
        let top_level = self.engine.run_ast_with_scope(&mut script.scope, &script.ast);
        self.bridge.pop_frame();
        if let Err(err) = top_level {
            self.discard_hooks(kind, id);
            return Err(anyhow!("Running script '{name}': {err}"));
        }
        self.instances(kind).borrow_mut().push(script);
        info!(kind = kind.label(), instance = %id, name, "script instance started");

        if !create {
            return Ok(());
        }
        match self.call(kind, id, "create", true) {
            ScriptOutcome::Returned => Ok(()),
            ScriptOutcome::Finished => {
                self.end_instance(kind, id);
                Ok(())
            }
            ScriptOutcome::Failed(message) => {
                self.end_instance(kind, id);
                Err(anyhow!("Script '{name}' failed in create: {message}"))
            }
        }
    }

    fn discard_hooks(&self, kind: InstanceKind, id: InstanceId) {
        match kind {
            InstanceKind::Mission => self.hooks().unregister_all_for_mission(id),
            InstanceKind::Event => self.hooks().unregister_all_for_event(id),
        };
    }

    fn remove_instance(&self, kind: InstanceKind, instance: InstanceId) -> bool {
        let mut instances = self.instances(kind).borrow_mut();
        let before = instances.len();
        instances.retain(|script| script.id != instance);
        instances.len() != before
    }

    fn call(&self, kind: InstanceKind, instance: InstanceId, entry: &str, optional: bool) -> ScriptOutcome {
        let mut instances = self.instances(kind).borrow_mut();
        let Some(script) = instances.iter_mut().find(|script| script.id == instance) else {
            return ScriptOutcome::Failed(format!("{} {instance} is not running", kind.label()));
        };

        self.bridge.push_frame(Owner { kind, instance });
        let options = CallFnOptions::new().eval_ast(false).bind_this_ptr(&mut script.memory);
        let result =
            self.engine.call_fn_with_options::<Dynamic>(options, &mut script.scope, &script.ast, entry, ());
        let finish = self.bridge.pop_frame();
        let name = script.name.clone();
        drop(instances);

        match (finish, result) {
            (Some(FinishRequest::Instance { completed }), _) => {
                if completed && kind == InstanceKind::Mission {
                    self.completed.borrow_mut().push(name);
                }
                ScriptOutcome::Finished
            }
            (Some(FinishRequest::Return), _) | (None, Ok(_)) => ScriptOutcome::Returned,
            (None, Err(err)) if optional && matches!(err.as_ref(), EvalAltResult::ErrorFunctionNotFound(..)) => {
                ScriptOutcome::Returned
            }
            (None, Err(err)) => ScriptOutcome::Failed(format!("{name}: {err}")),
        }
    }
}

impl MissionHost for ScriptRuntime {
    fn resolve_mission(&self, instance: InstanceId) -> Option<MissionHandle> {
        self.is_running(InstanceKind::Mission, instance).then_some(MissionHandle(instance.get()))
    }

    fn invoke_entry(&self, _: &HookEngine, _: &HookHosts<'_>, mission: MissionHandle, entry: &str) -> ScriptOutcome {
        self.call(InstanceKind::Mission, InstanceId(mission.0), entry, false)
    }

    fn teardown(&self, mission: MissionHandle) {
        self.remove_instance(InstanceKind::Mission, InstanceId(mission.0));
    }
}

impl EventHost for ScriptRuntime {
    fn resolve_event(&self, instance: InstanceId) -> Option<EventHandle> {
        self.is_running(InstanceKind::Event, instance).then_some(EventHandle(instance.get()))
    }

    fn invoke_entry(&self, _: &HookEngine, _: &HookHosts<'_>, event: EventHandle, entry: &str) -> ScriptOutcome {
        self.call(InstanceKind::Event, InstanceId(event.0), entry, false)
    }

    fn teardown(&self, event: EventHandle) {
        self.remove_instance(InstanceKind::Event, InstanceId(event.0));
    }
}

impl PlayerGate for ScriptRuntime {
    fn is_player_active(&self) -> bool {
        self.player.get().is_player_active()
    }
}

fn read_script(path: &Path) -> Result<(String, String)> {
    let source = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
    Ok((name, source))
}

fn register_api(engine: &mut Engine, bridge: &Rc<ScriptBridge>) {
    let api = bridge.clone();
    engine.register_fn("hook_add", move |stack: &str, entry: &str| api.add_hook(stack, entry));
    let api = bridge.clone();
    engine.register_fn("hook_rm", move |id: rhai::INT| api.remove_hook(id));
    let api = bridge.clone();
    engine.register_fn("finish", move || api.finish(FinishRequest::Return));
    let api = bridge.clone();
    engine.register_fn("finish", move |properly: bool| {
        api.finish(FinishRequest::Instance { completed: properly })
    });
    let api = bridge.clone();
    engine.register_fn("emit", move |stack: &str| api.emit(stack));
    let api = bridge.clone();
    engine.register_fn("log", move |message: &str| api.log(message));
    let api = bridge.clone();
    engine.on_print(move |text| api.log(text));
}
