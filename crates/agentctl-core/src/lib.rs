pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod slug;
pub mod types;

pub use config::DaemonConfig;
pub use error::EngineError;
pub use events::{Event, EventType};
pub use ids::{PlanId, RunId, ToolCallId};
pub use types::{InvalidTransition, Plan, PlanStatus, Run, RunStatus, StateDocument, Worktree};
