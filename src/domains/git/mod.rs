pub mod adapter;
pub mod github_adapter;
pub mod process_detector;
pub mod worktree_adapter;

pub use adapter::{AheadBehind, DiffStat, GitAdapter, Git2Adapter};
pub use github_adapter::{CommandOutput, CommandRunner, GitHubAdapter, SystemCommandRunner};
pub use process_detector::{ProcessDetector, SystemProcessDetector};
pub use worktree_adapter::{Git2WorktreeAdapter, WorktreeAdapter, WorktreeInfo};
