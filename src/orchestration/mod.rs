// Sub-agent orchestration
//
// Optional mode that replaces the primary adapter invocation with a typed
// specialist sub-agent, coordinated through the filesystem.

mod coordination;
mod orchestrator;
mod profiles;

pub use coordination::{CoordinationResult, CoordinationStore, StatusSnapshot};
pub use orchestrator::{SubAgentOrchestrator, ToolCatalog};
pub use profiles::{extract_criteria, profile, select_kind, SubAgentKind, SubAgentProfile};
