pub mod cache;
pub mod diff;
pub mod progress;
pub mod replicator;
pub mod retry;
pub mod scanner;

pub use cache::ExistenceCache;
pub use diff::{diff, DiffEntry, DiffResult, SizeDifference};
pub use progress::{FileOutcome, ProgressLog};
pub use replicator::{ReplicateConfig, ReplicationSummary, Replicator, RootFolderPolicy};
pub use retry::{RetryPolicy, RetryStore};
pub use scanner::{list_children_all, FileRecord, LargestFile, ScanConfig, ScanStats, TreeScanner};
