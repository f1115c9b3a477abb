//! Narrow interfaces to the collaborators around the core: analytics,
//! progress reporting and artifact upload.

pub mod analytics;
pub mod progress;
pub mod upload;

pub use analytics::{
    AnalyticsSink, AnalyticsStats, GenerationRecord, GenerationStatus, JsonlAnalytics,
    MemoryAnalytics,
};
pub use progress::{ProgressEvent, ProgressSink, TracingProgress};
pub use upload::{ArtifactUploader, DirectoryUploader, NoUpload};
