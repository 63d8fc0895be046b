use std::fmt::Debug;
use std::sync::Arc;

use kflow_common::Result;
use kflow_execution::ExecNode;
use kflow_planner::ScanNode;

/// Type-erased storage execution node.
pub type StorageExecNode = Arc<dyn ExecNode>;

/// Storage abstraction for dataset scans.
///
/// Implementations are format-specific; resolution and file discovery happen
/// when `scan` is called, i.e. at materialization time.
pub trait StorageProvider: Send + Sync + Debug {
    /// Builds the scan node for `scan`.
    ///
    /// # Errors
    /// Returns an error for unresolvable locations, unsupported schemes or an
    /// inconsistent partition layout.
    fn scan(&self, scan: &ScanNode) -> Result<StorageExecNode>;
}
