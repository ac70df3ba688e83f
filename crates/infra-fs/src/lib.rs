// Gradekeep Infrastructure - Filesystem Adapter
// Implements: JobQueue, LogStore, UploadStore, ContentResolver

mod codec;
mod content;
mod layout;
mod lockfile;
mod log_store;
mod queue;
mod uploads;

pub use content::FsContentResolver;
pub use layout::DataRoot;
pub use lockfile::Lockfile;
pub use log_store::FsLogStore;
pub use queue::FsJobQueue;
pub use uploads::FsUploadStore;
