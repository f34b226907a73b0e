//! # b2-client
//!
//! An async client SDK for the Backblaze B2 cloud storage API.
//!
//! ## Features
//!
//! - **Account sessions**: authorize once, automatic token refresh
//! - **Buckets and files**: create, list, find, hide, delete, download
//! - **Streaming uploads**: bodies are hashed while they stream, with the
//!   SHA-1 digest appended as a trailer
//! - **Large files**: concurrent multipart upload with bounded parallelism,
//!   per-part retries, and cancellation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use b2_client::{B2Client, BytesSource, Config, Credentials, UploadOptions};
//!
//! #[tokio::main]
//! async fn main() -> b2_client::Result<()> {
//!     let client = Arc::new(
//!         B2Client::connect(Credentials::from_env()?, Config::default()).await?,
//!     );
//!
//!     let bucket = client.create_bucket("my-backups-2026", "allPrivate").await?;
//!
//!     // Small file, one request
//!     let source = BytesSource::new(&b"hello, world"[..]);
//!     client.upload_file(&bucket.bucket_id, "hello.txt", &source, None).await?;
//!
//!     // Big file, concurrent parts
//!     let source = Arc::new(b2_client::FileSource::open("backup.tar").await?);
//!     let file = client
//!         .upload_large_file(source, &bucket.bucket_id, "backup.tar", UploadOptions::default())
//!         .await?;
//!     println!("uploaded {} ({} bytes)", file.file_name, file.content_length);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
pub mod multipart;
mod types;

pub use client::B2Client;
pub use config::{Config, Credentials};
pub use error::{B2Error, Result};
pub use multipart::{
    BytesSource, CancelHandle, ContentSource, FileSource, LargeFileUploader, PartRange,
    PartResult, UploadOptions, UploadProgress, AUTO_CONTENT_TYPE,
};
pub use types::{
    Bucket, FileInfo, FileList, ListFilesOptions, PartUploadResponse, UploadPartUrl, UploadUrl,
};
