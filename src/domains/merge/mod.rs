pub mod sync_merge_engine;

pub use sync_merge_engine::{
    MergeOptions, MergeOutcome, SyncMergeEngine, SyncOptions, SyncOutcome,
};
