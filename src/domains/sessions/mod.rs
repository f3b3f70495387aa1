pub mod branch_namer;
pub mod cleanup;
pub mod discoverer;
pub mod entity;
pub mod orchestrator;
pub mod reconciler;
pub mod state_machine;
pub mod store;

pub use branch_namer::BranchNamer;
pub use entity::{AgentSession, ConflictState, Issue, IssueStatus, Project, SessionStatus, SessionType};
pub use orchestrator::LifecycleOrchestrator;
pub use reconciler::Reconciler;
pub use state_machine::{CloseTarget, IssueCascade, SessionStateMachine};
pub use store::SessionStore;
