//! Transport seam between the upload pipeline and the HTTP client

use async_trait::async_trait;

use crate::error::Result;
use crate::multipart::source::SourceStream;
use crate::types::{FileInfo, PartUploadResponse, UploadPartUrl};

/// The wire operations the large-file pipeline needs from the session.
///
/// [`B2Client`](crate::B2Client) implements this against the real API;
/// pipeline tests substitute in-memory doubles.
#[async_trait]
pub trait LargeFileTransport: Send + Sync {
    /// Part size the session recommends when the caller does not pick one.
    async fn recommended_part_size(&self) -> Result<u64>;

    /// `b2_start_large_file`: register the file and obtain its `file_id`.
    async fn start_large_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> Result<FileInfo>;

    /// `b2_get_upload_part_url`: obtain a part upload target.
    ///
    /// Must be called fresh for every attempt — tokens are short-lived and
    /// the server takes upload URLs out of rotation after errors.
    async fn get_upload_part_url(&self, file_id: &str) -> Result<UploadPartUrl>;

    /// Upload one part body (content plus digest trailer) to `upload`.
    /// `content_length` includes the 40-byte trailer; `part_number` is 1-based.
    async fn upload_part(
        &self,
        upload: &UploadPartUrl,
        part_number: u32,
        content_length: u64,
        body: SourceStream,
    ) -> Result<PartUploadResponse>;

    /// `b2_finish_large_file`: assemble the parts into the final file.
    /// `part_sha1_array` is ordered by part index.
    async fn finish_large_file(&self, file_id: &str, part_sha1_array: &[String])
        -> Result<FileInfo>;
}
