//! Local storage for kflow: filesystem access, hive partition naming, and the
//! parquet dataset scan and writer.

pub mod dataset_scan;
pub mod dataset_writer;
pub mod filesystem;
pub mod partitioning;
pub mod provider;

pub use dataset_scan::{DatasetScanNode, ParquetDatasetProvider};
pub use dataset_writer::{DatasetWriteSummary, write_dataset};
pub use filesystem::{FileSystem, LocalFileSystem, resolve_uri};
pub use partitioning::HIVE_DEFAULT_PARTITION;
pub use provider::{StorageExecNode, StorageProvider};
