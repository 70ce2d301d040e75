//! Service layer: the top-level operations exposed to the surrounding
//! application. Each service call is one single-worker operation; batch
//! loops isolate per-item failures and continue.

pub mod archive;
pub mod download;
pub mod status;
pub mod sync;

pub use archive::ArchiveService;
pub use download::DownloadService;
pub use status::StatusService;
pub use sync::SyncService;
