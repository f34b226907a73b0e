//! Upload of a single part

use futures::StreamExt;
use tracing::debug;

use crate::error::{B2Error, Result};
use crate::multipart::hashing::{HashingStream, ProgressFn, SHA1_HEX_LEN};
use crate::multipart::planner::PartRange;
use crate::multipart::source::ContentSource;
use crate::multipart::transport::LargeFileTransport;

/// Outcome of one successfully uploaded part.
#[derive(Clone, Debug)]
pub struct PartResult {
    /// 0-based part index
    pub index: u32,
    /// Hex SHA-1 of the part content, computed locally while streaming
    pub content_sha1: String,
    /// Content bytes uploaded, trailer excluded
    pub size: u64,
}

/// One upload attempt for `range`.
///
/// Requests a fresh upload target, streams the sub-range through a
/// [`HashingStream`], and checks the server's digest echo against the local
/// one. The local digest is authoritative and is what ends up in the
/// [`PartResult`]; a disagreeing echo means the bytes were corrupted in
/// flight and fails the whole upload rather than being retried.
pub(crate) async fn upload_one_part(
    transport: &dyn LargeFileTransport,
    source: &dyn ContentSource,
    file_id: &str,
    range: PartRange,
    progress: Option<ProgressFn>,
) -> Result<PartResult> {
    let upload = transport.get_upload_part_url(file_id).await?;

    let inner = source.open_range(range.offset, range.length).await?;
    let mut hashing = HashingStream::new(inner);
    if let Some(progress) = progress {
        hashing = hashing.with_progress(progress);
    }
    let digest = hashing.digest_handle();

    let response = transport
        .upload_part(
            &upload,
            range.part_number(),
            range.length + SHA1_HEX_LEN,
            hashing.boxed(),
        )
        .await?;

    let local = digest.get().ok_or_else(|| {
        B2Error::UploadFailed(format!(
            "part {} body was not fully consumed",
            range.part_number()
        ))
    })?;
    if response.content_sha1 != local {
        return Err(B2Error::PartIntegrity {
            index: range.index,
            local,
            remote: response.content_sha1,
        });
    }

    debug!(part = range.part_number(), sha1 = %local, size = range.length, "part uploaded");
    Ok(PartResult {
        index: range.index,
        content_sha1: local,
        size: range.length,
    })
}
