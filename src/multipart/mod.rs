//! Large-file multipart upload pipeline
//!
//! A large file is uploaded in parts: the planner splits the source into
//! contiguous byte ranges, a bounded pool of tasks streams each range to its
//! own upload URL (hashing on the fly and appending the SHA-1 trailer), and
//! the coordinator finalizes the file with the per-part digests in index
//! order once every range is confirmed.

mod coordinator;
mod hashing;
mod part;
mod planner;
mod source;
mod transport;

/// Content type that asks the server to sniff from the file name and bytes
pub const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

pub use coordinator::{
    CancelHandle, LargeFileUploader, ProgressCallback, UploadOptions, UploadProgress,
};
pub use hashing::{DigestHandle, HashingStream, ProgressFn, SHA1_HEX_LEN};
pub use part::PartResult;
pub use planner::{plan_parts, PartRange};
pub use source::{BytesSource, ContentSource, FileSource, SourceStream};
pub use transport::LargeFileTransport;
