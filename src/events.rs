use serde::{Deserialize, Serialize};
use std::fmt;

/// Occurrences raised by the simulation, each firing one or more hook stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    Land,
    Takeoff,
    /// Arrival in a new system: `jumpout`, then `jumpin`, then `enter`. Order matters.
    Jump,
    Enter,
    Death,
    Board,
    Disable,
    Attacked,
    Idle,
    Custom(String),
}

impl HookEvent {
    pub fn stacks(&self) -> Vec<&str> {
        match self {
            HookEvent::Land => vec!["land"],
            HookEvent::Takeoff => vec!["takeoff"],
            HookEvent::Jump => vec!["jumpout", "jumpin", "enter"],
            HookEvent::Enter => vec!["enter"],
            HookEvent::Death => vec!["death"],
            HookEvent::Board => vec!["board"],
            HookEvent::Disable => vec!["disable"],
            HookEvent::Attacked => vec!["attacked"],
            HookEvent::Idle => vec!["idle"],
            HookEvent::Custom(stack) => vec![stack.as_str()],
        }
    }

    /// Maps a stack name back to an occurrence; unknown names become [`HookEvent::Custom`].
    pub fn from_stack(stack: &str) -> Self {
        match stack {
            "land" => HookEvent::Land,
            "takeoff" => HookEvent::Takeoff,
            "enter" => HookEvent::Enter,
            "death" => HookEvent::Death,
            "board" => HookEvent::Board,
            "disable" => HookEvent::Disable,
            "attacked" => HookEvent::Attacked,
            "idle" => HookEvent::Idle,
            other => HookEvent::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::Custom(stack) => write!(f, "Custom stack={stack}"),
            other => write!(f, "{:?} stacks={}", other, other.stacks().join(",")),
        }
    }
}

/// Occurrences queued during a frame and broadcast when drained.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<HookEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: HookEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<HookEvent> {
        self.events.drain(..).collect()
    }
}
