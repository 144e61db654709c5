use std::fs::File;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::HookConfig;
use crate::dispatch::{DispatchReport, HookEngine, HookInfo, HookRun};
use crate::events::HookEvent;
use crate::ids::{HookId, InstanceId};
use crate::player::PlayerStatus;
use crate::registry::InstanceKind;
use crate::scripts::ScriptRuntime;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    #[serde(default)]
    pub no_save_stacks: Option<Vec<String>>,
    #[serde(default)]
    pub missions: Vec<FixtureScript>,
    #[serde(default)]
    pub events: Vec<FixtureScript>,
    pub steps: Vec<HarnessStep>,
}

/// A script given inline (`source`) or by file (`path`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureScript {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HarnessStep {
    Broadcast { stack: String },
    RunHook { id: u32 },
    Event { event: HookEvent },
    Drain,
    SaveReload,
    KillPlayer,
    RevivePlayer,
    AbortMission { instance: u32 },
}

impl HarnessStep {
    fn label(&self) -> String {
        match self {
            HarnessStep::Broadcast { stack } => format!("broadcast {stack}"),
            HarnessStep::RunHook { id } => format!("run_hook {id}"),
            HarnessStep::Event { event } => format!("event {event}"),
            HarnessStep::Drain => "drain".to_string(),
            HarnessStep::SaveReload => "save_reload".to_string(),
            HarnessStep::KillPlayer => "kill_player".to_string(),
            HarnessStep::RevivePlayer => "revive_player".to_string(),
            HarnessStep::AbortMission { instance } => format!("abort_mission {instance}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub started: Vec<StartedScript>,
    pub results: Vec<StepResult>,
    pub final_hooks: Vec<HookInfo>,
    pub running_missions: Vec<InstanceId>,
    pub running_events: Vec<InstanceId>,
    pub completed_missions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartedScript {
    pub name: String,
    pub kind: InstanceKind,
    pub instance: InstanceId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub action: String,
    pub runs: Vec<HookRun>,
    pub logs: Vec<String>,
    /// Hooks written by a `save_reload` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved: Option<usize>,
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    run_fixture_with_config(fixture, HookConfig::default())
}

pub fn run_fixture_with_config(fixture: &HarnessFixture, mut config: HookConfig) -> Result<HarnessOutput> {
    if let Some(stacks) = &fixture.no_save_stacks {
        config.no_save_stacks = stacks.clone();
    }
    let hooks = Rc::new(HookEngine::with_config(config));
    let runtime = ScriptRuntime::new(hooks.clone());

    let mut started = Vec::new();
    for script in &fixture.missions {
        let source = fixture_source(script)?;
        let instance = runtime
            .start_mission(&script.name, &source)
            .with_context(|| format!("starting mission '{}'", script.name))?;
        started.push(StartedScript { name: script.name.clone(), kind: InstanceKind::Mission, instance });
    }
    for script in &fixture.events {
        let source = fixture_source(script)?;
        let instance = runtime
            .start_event(&script.name, &source)
            .with_context(|| format!("starting event '{}'", script.name))?;
        started.push(StartedScript { name: script.name.clone(), kind: InstanceKind::Event, instance });
    }
    runtime.take_logs();

    let mut results = Vec::with_capacity(fixture.steps.len());
    for (step, action) in fixture.steps.iter().enumerate() {
        let mut saved = None;
        let report = match action {
            HarnessStep::Broadcast { stack } => runtime.broadcast(stack),
            HarnessStep::RunHook { id } => runtime.run_hook(HookId(*id)),
            HarnessStep::Event { event } => hooks.run_events(&runtime.hosts(), [event.clone()]),
            HarnessStep::Drain => runtime.drain_events(),
            HarnessStep::SaveReload => {
                let document = hooks.save();
                saved = Some(document.hooks.len());
                hooks.load(&document).with_context(|| format!("reloading hooks at step {step}"))?;
                DispatchReport::default()
            }
            HarnessStep::KillPlayer => {
                runtime.set_player(PlayerStatus::destroyed());
                DispatchReport::default()
            }
            HarnessStep::RevivePlayer => {
                runtime.set_player(PlayerStatus::alive());
                DispatchReport::default()
            }
            HarnessStep::AbortMission { instance } => {
                runtime.abort_mission(InstanceId(*instance));
                DispatchReport::default()
            }
        };
        results.push(StepResult { step, action: action.label(), runs: report.runs, logs: runtime.take_logs(), saved });
    }

    Ok(HarnessOutput {
        started,
        results,
        final_hooks: hooks.hooks(),
        running_missions: runtime.mission_ids(),
        running_events: runtime.event_ids(),
        completed_missions: runtime.completed_missions(),
    })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

fn fixture_source(script: &FixtureScript) -> Result<String> {
    match (&script.source, &script.path) {
        (Some(source), _) => Ok(source.clone()),
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("reading script '{path}'"))
        }
        (None, None) => bail!("script '{}' needs either `source` or `path`", script.name),
    }
}
