//! Named hook stacks for mission and event scripts.
//!
//! Scripts and native code subscribe callbacks to stacks such as `land` or `enter`; the
//! simulation broadcasts a stack when the matching occurrence happens. See [`HookEngine`].

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod ids;
pub mod persistence;
pub mod player;
pub mod registry;
pub mod resolver;
pub mod script_harness;
pub mod scripts;

pub use config::HookConfig;
pub use dispatch::{DispatchReport, HookEngine, HookInfo, HookRun};
pub use error::{HookError, LoadError};
pub use events::HookEvent;
pub use ids::{HookId, InstanceId};
pub use persistence::{HookDocument, HookElement};
pub use player::PlayerStatus;
pub use registry::{HookTarget, InstanceKind};
pub use resolver::{HookHosts, HookStatus, NativeFlow, ScriptOutcome};
pub use scripts::ScriptRuntime;
