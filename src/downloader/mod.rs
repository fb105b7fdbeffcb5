pub mod core;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod merger;
pub mod progress;
pub mod task;

pub use error::{DownloadError, FetchError, MergeError};
pub use manager::{DownloadRequest, RegistryError, RetainedFile, TaskRegistry};
pub use merger::{MediaMerger, MergeTool};
pub use progress::{ProgressEvent, ProgressPublisher, ProgressSubscription};
pub use task::{Phase, TaskSnapshot, TaskState};
