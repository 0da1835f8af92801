//! Mention-driven reply service.

pub mod artifact;
pub mod filter;
pub mod mention;
pub mod reply;
pub mod watermark;

#[cfg(feature = "http")]
pub use artifact::HttpArtifactStore;
pub use artifact::{ArtifactStore, DirectoryArtifactStore, MockArtifactStore, Publisher, UploadArtifact};
pub use filter::{MentionFilter, Rejection};
#[cfg(feature = "http")]
pub use mention::HttpMentionStream;
pub use mention::{Mention, MentionStream, MockMentionStream};
pub use reply::{MentionOutcome, PollReport, ReplyService, RestartPolicy, RunSummary, ServiceSettings};
pub use watermark::Watermark;
