//! Typed records for the B2 wire protocol
//!
//! Every response body is mapped onto one of these structs up front; a
//! missing expected field surfaces as [`B2Error::MalformedResponse`] instead
//! of an access failure deep in caller code.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{B2Error, Result};

/// Decode a JSON response body into a typed record.
pub(crate) fn from_response<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|err| B2Error::MalformedResponse(err.to_string()))
}

/// A bucket
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Server-assigned bucket ID
    pub bucket_id: String,
    /// Bucket name, unique within the account
    pub bucket_name: String,
    /// Access class, `allPublic` or `allPrivate`
    pub bucket_type: String,
    /// User-defined bucket metadata
    #[serde(default)]
    pub bucket_info: HashMap<String, String>,
    #[serde(default)]
    pub lifecycle_rules: Vec<Value>,
    #[serde(default)]
    pub cors_rules: Vec<Value>,
    /// Revision counter, bumped on every bucket update
    pub revision: u64,
}

/// A file version
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Server-assigned file ID
    pub file_id: String,
    /// Full file name within the bucket
    pub file_name: String,
    /// SHA-1 of the content; `none` for large files, whose digest lives per part
    #[serde(default)]
    pub content_sha1: Option<String>,
    /// Size in bytes
    pub content_length: u64,
    /// MIME type
    pub content_type: String,
    /// User-defined file metadata
    #[serde(default)]
    pub file_info: HashMap<String, String>,
    /// What this version represents: `upload`, `start`, `hide`, or `folder`
    #[serde(default)]
    pub action: Option<String>,
    /// Milliseconds since the epoch
    pub upload_timestamp: u64,
}

impl FileInfo {
    /// Upload time as a UTC timestamp.
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.upload_timestamp as i64)
    }
}

/// One page of file names
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    /// Files in this page, ordered by name
    pub files: Vec<FileInfo>,
    /// Name to resume from, absent on the last page
    #[serde(default)]
    pub next_file_name: Option<String>,
}

/// Options for listing file names
#[derive(Clone, Debug, Default)]
pub struct ListFilesOptions {
    /// Only names with this prefix
    pub prefix: Option<String>,
    /// First name to return, for pagination
    pub start_file_name: Option<String>,
    /// Page size, server default 100
    pub max_file_count: Option<u32>,
    /// Folder delimiter
    pub delimiter: Option<String>,
}

/// Upload target for a single-shot file upload, from `b2_get_upload_url`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// Upload target for one part of a large file, from `b2_get_upload_part_url`.
/// Tokens are short-lived and URLs rotate, so this is fetched fresh per attempt.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartUrl {
    pub file_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// Server acknowledgement of one uploaded part
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUploadResponse {
    pub file_id: String,
    /// 1-based part number as stored by the server
    pub part_number: u32,
    pub content_length: u64,
    /// Digest the server computed over the received bytes
    pub content_sha1: String,
}

/// `b2_authorize_account` response
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorizeAccountResponse {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    pub recommended_part_size: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ListBucketsResponse {
    pub buckets: Vec<Bucket>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_info() {
        let body = br#"{
            "fileId": "4_z27c88f1d182b150646ff0b16_f200ec353a2184825_d20260101_m000000_c001_v0001000_t0000",
            "fileName": "photos/cat.jpg",
            "contentSha1": "a9993e364706816aba3e25717850c26c9cd0d89d",
            "contentLength": 3,
            "contentType": "image/jpeg",
            "fileInfo": {"src_last_modified_millis": "1750000000000"},
            "action": "upload",
            "uploadTimestamp": 1750000000000
        }"#;

        let info: FileInfo = from_response(body).unwrap();
        assert_eq!(info.file_name, "photos/cat.jpg");
        assert_eq!(info.content_length, 3);
        assert_eq!(info.action.as_deref(), Some("upload"));
        assert!(info.uploaded_at().is_some());
    }

    #[test]
    fn test_missing_field_is_malformed_response() {
        // No fileId
        let body = br#"{"fileName": "cat.jpg", "contentLength": 3, "contentType": "image/jpeg", "uploadTimestamp": 0}"#;
        let result: Result<FileInfo> = from_response(body);

        match result {
            Err(B2Error::MalformedResponse(msg)) => assert!(msg.contains("fileId")),
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bucket_with_defaults() {
        let body = br#"{
            "bucketId": "27c88f1d182b150646ff0b16",
            "bucketName": "kitten-pictures",
            "bucketType": "allPrivate",
            "revision": 2
        }"#;

        let bucket: Bucket = from_response(body).unwrap();
        assert_eq!(bucket.bucket_name, "kitten-pictures");
        assert!(bucket.bucket_info.is_empty());
        assert!(bucket.lifecycle_rules.is_empty());
    }
}
