//! Main client implementation

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, Response};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::{Config, Credentials};
use crate::error::{B2Error, Result};
use crate::multipart::{
    ContentSource, FileSource, HashingStream, LargeFileTransport, LargeFileUploader,
    SourceStream, UploadOptions, AUTO_CONTENT_TYPE, SHA1_HEX_LEN,
};
use crate::types::{
    from_response, AuthorizeAccountResponse, Bucket, FileInfo, FileList, ListBucketsResponse,
    ListFilesOptions, PartUploadResponse, UploadPartUrl, UploadUrl,
};

/// Versioned path segment between a base URL and an endpoint name
const API_SUFFIX: &str = "/b2api/v2";

/// Header value announcing the hex digest trailer at the end of the body
const SHA1_AT_END: &str = "hex_digits_at_end";

/// Auth tokens are valid for 24 hours; refresh a little earlier.
const AUTH_TTL_HOURS: i64 = 23;

/// Largest page the list-file-names call accepts
const MAX_FILES_PER_PAGE: u32 = 1000;

mod endpoints {
    pub const AUTHORIZE_ACCOUNT: &str = "b2_authorize_account";
    pub const LIST_BUCKETS: &str = "b2_list_buckets";
    pub const CREATE_BUCKET: &str = "b2_create_bucket";
    pub const DELETE_BUCKET: &str = "b2_delete_bucket";
    pub const LIST_FILE_NAMES: &str = "b2_list_file_names";
    pub const GET_FILE_INFO: &str = "b2_get_file_info";
    pub const DELETE_FILE_VERSION: &str = "b2_delete_file_version";
    pub const HIDE_FILE: &str = "b2_hide_file";
    pub const GET_UPLOAD_URL: &str = "b2_get_upload_url";
    pub const START_LARGE_FILE: &str = "b2_start_large_file";
    pub const GET_UPLOAD_PART_URL: &str = "b2_get_upload_part_url";
    pub const FINISH_LARGE_FILE: &str = "b2_finish_large_file";
    pub const CANCEL_LARGE_FILE: &str = "b2_cancel_large_file";
    pub const DOWNLOAD_FILE_BY_ID: &str = "b2_download_file_by_id";
}

/// Session state from the authorize call, replaced wholesale on refresh
#[derive(Debug)]
struct AuthState {
    account_id: String,
    token: String,
    api_url: String,
    download_url: String,
    recommended_part_size: u64,
    authorized_at: DateTime<Utc>,
}

impl AuthState {
    fn is_stale(&self) -> bool {
        Utc::now() - self.authorized_at > chrono::Duration::hours(AUTH_TTL_HOURS)
    }
}

/// B2 storage client
#[derive(Debug)]
pub struct B2Client {
    http: Client,
    credentials: Credentials,
    config: Config,
    auth: RwLock<AuthState>,
}

impl B2Client {
    /// Authorize against the account endpoint and return a ready client.
    pub async fn connect(credentials: Credentials, config: Config) -> Result<Self> {
        url::Url::parse(&config.auth_url)
            .map_err(|_| B2Error::Config(format!("invalid auth URL: {}", config.auth_url)))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| B2Error::Config("invalid user agent".to_string()))?,
        );

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(B2Error::Http)?;

        let auth = Self::authorize(&http, &config, &credentials).await?;
        Ok(Self {
            http,
            credentials,
            config,
            auth: RwLock::new(auth),
        })
    }

    /// Account the session is authorized for
    pub async fn account_id(&self) -> String {
        self.auth.read().await.account_id.clone()
    }

    // ==================== Bucket Operations ====================

    /// Create a bucket; `bucket_type` is `allPublic` or `allPrivate`
    #[instrument(skip(self))]
    pub async fn create_bucket(&self, bucket_name: &str, bucket_type: &str) -> Result<Bucket> {
        if bucket_name.len() < 6
            || bucket_name.len() > 50
            || !bucket_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(B2Error::Config(format!(
                "bucket name must be 6-50 alphanumeric-or-dash characters: {bucket_name}"
            )));
        }

        let account_id = self.account_id().await;
        let body = self
            .api_call(
                endpoints::CREATE_BUCKET,
                json!({
                    "accountId": account_id,
                    "bucketName": bucket_name,
                    "bucketType": bucket_type,
                }),
            )
            .await?;
        from_response(&body)
    }

    /// List all buckets in the account
    #[instrument(skip(self))]
    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let account_id = self.account_id().await;
        let body = self
            .api_call(endpoints::LIST_BUCKETS, json!({ "accountId": account_id }))
            .await?;
        let response: ListBucketsResponse = from_response(&body)?;
        Ok(response.buckets)
    }

    /// Look a bucket up by name. Absence is `None`, not an error.
    #[instrument(skip(self))]
    pub async fn find_bucket(&self, bucket_name: &str) -> Result<Option<Bucket>> {
        let account_id = self.account_id().await;
        let body = self
            .api_call(
                endpoints::LIST_BUCKETS,
                json!({ "accountId": account_id, "bucketName": bucket_name }),
            )
            .await?;
        let response: ListBucketsResponse = from_response(&body)?;
        Ok(response
            .buckets
            .into_iter()
            .find(|bucket| bucket.bucket_name == bucket_name))
    }

    /// Delete a bucket, returning its final state
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, bucket_id: &str) -> Result<Bucket> {
        let account_id = self.account_id().await;
        let body = self
            .api_call(
                endpoints::DELETE_BUCKET,
                json!({ "accountId": account_id, "bucketId": bucket_id }),
            )
            .await?;
        from_response(&body)
    }

    // ==================== File Operations ====================

    /// List one page of file names
    #[instrument(skip(self, options))]
    pub async fn list_file_names(
        &self,
        bucket_id: &str,
        options: ListFilesOptions,
    ) -> Result<FileList> {
        let mut params = json!({ "bucketId": bucket_id });
        if let Some(prefix) = &options.prefix {
            params["prefix"] = json!(prefix);
        }
        if let Some(start_file_name) = &options.start_file_name {
            params["startFileName"] = json!(start_file_name);
        }
        if let Some(max_file_count) = options.max_file_count {
            params["maxFileCount"] = json!(max_file_count.min(MAX_FILES_PER_PAGE));
        }
        if let Some(delimiter) = &options.delimiter {
            params["delimiter"] = json!(delimiter);
        }

        let body = self.api_call(endpoints::LIST_FILE_NAMES, params).await?;
        from_response(&body)
    }

    /// List every file name under an optional prefix, following pagination
    #[instrument(skip(self))]
    pub async fn list_all_file_names(
        &self,
        bucket_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut start_file_name: Option<String> = None;
        loop {
            let page = self
                .list_file_names(
                    bucket_id,
                    ListFilesOptions {
                        prefix: prefix.map(str::to_string),
                        start_file_name: start_file_name.take(),
                        max_file_count: Some(MAX_FILES_PER_PAGE),
                        delimiter: None,
                    },
                )
                .await?;
            files.extend(page.files);
            match page.next_file_name {
                Some(next) => start_file_name = Some(next),
                None => break,
            }
        }
        Ok(files)
    }

    /// Look a file up by exact name. Absence is `None`, not an error.
    #[instrument(skip(self))]
    pub async fn find_file(&self, bucket_id: &str, file_name: &str) -> Result<Option<FileInfo>> {
        let page = self
            .list_file_names(
                bucket_id,
                ListFilesOptions {
                    start_file_name: Some(file_name.to_string()),
                    max_file_count: Some(1),
                    ..Default::default()
                },
            )
            .await?;
        Ok(page
            .files
            .into_iter()
            .find(|file| file.file_name == file_name))
    }

    /// Fetch metadata for a file version
    #[instrument(skip(self))]
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileInfo> {
        let body = self
            .api_call(endpoints::GET_FILE_INFO, json!({ "fileId": file_id }))
            .await?;
        from_response(&body)
    }

    /// Delete one file version. Earlier versions of the same name survive.
    #[instrument(skip(self))]
    pub async fn delete_file_version(&self, file_id: &str, file_name: &str) -> Result<()> {
        self.api_call(
            endpoints::DELETE_FILE_VERSION,
            json!({ "fileId": file_id, "fileName": file_name }),
        )
        .await?;
        Ok(())
    }

    /// Hide a file: it disappears from listings but versions remain
    #[instrument(skip(self))]
    pub async fn hide_file(&self, bucket_id: &str, file_name: &str) -> Result<FileInfo> {
        let body = self
            .api_call(
                endpoints::HIDE_FILE,
                json!({ "bucketId": bucket_id, "fileName": file_name }),
            )
            .await?;
        from_response(&body)
    }

    /// Download a file's latest content by ID
    #[instrument(skip(self))]
    pub async fn download_file_by_id(&self, file_id: &str) -> Result<Bytes> {
        match self.download_once(file_id).await {
            Err(err) if err.is_auth_expired() => {
                warn!("auth token expired, re-authorizing");
                self.reauthorize().await?;
                self.download_once(file_id).await
            }
            other => other,
        }
    }

    /// URL the latest version of a file can be fetched from (with the
    /// session token in an `Authorization` header)
    pub async fn file_download_url(&self, file_id: &str) -> String {
        let auth = self.auth.read().await;
        format!(
            "{}{}/{}?fileId={}",
            auth.download_url,
            API_SUFFIX,
            endpoints::DOWNLOAD_FILE_BY_ID,
            file_id
        )
    }

    // ==================== Uploads ====================

    /// Upload a whole file in one request, hashing while streaming and
    /// appending the digest trailer.
    #[instrument(skip(self, source))]
    pub async fn upload_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        source: &dyn ContentSource,
        content_type: Option<&str>,
    ) -> Result<FileInfo> {
        let file_name = sanitize_file_name(file_name);
        let content_length = source.content_length().await?;
        let upload = self.get_upload_url(bucket_id).await?;

        let inner = source.open_range(0, content_length).await?;
        let hashing = HashingStream::new(inner);

        let response = self
            .http
            .post(&upload.upload_url)
            .header(header::AUTHORIZATION, &upload.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(file_name))
            .header("X-Bz-Content-Sha1", SHA1_AT_END)
            .header(
                header::CONTENT_TYPE,
                content_type.unwrap_or(AUTO_CONTENT_TYPE),
            )
            .header(header::CONTENT_LENGTH, content_length + SHA1_HEX_LEN)
            .body(reqwest::Body::wrap_stream(hashing))
            .send()
            .await?;
        let body = check_status(response).await?;
        from_response(&body)
    }

    /// Upload a file from disk, guessing the content type from the extension
    #[instrument(skip(self))]
    pub async fn upload_file_from_path(
        &self,
        bucket_id: &str,
        path: impl AsRef<std::path::Path> + std::fmt::Debug,
    ) -> Result<FileInfo> {
        let path = path.as_ref();
        let source = FileSource::open(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| B2Error::Config(format!("path has no usable file name: {path:?}")))?
            .to_string();
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(AUTO_CONTENT_TYPE);
        self.upload_file(bucket_id, &file_name, &source, Some(content_type))
            .await
    }

    /// Upload a large file as concurrent parts.
    ///
    /// See [`LargeFileUploader`] for the pipeline; construct one directly to
    /// keep a [`CancelHandle`](crate::multipart::CancelHandle) for aborting.
    pub async fn upload_large_file(
        self: &Arc<Self>,
        source: Arc<dyn ContentSource>,
        bucket_id: &str,
        file_name: &str,
        options: UploadOptions,
    ) -> Result<FileInfo> {
        let file_name = sanitize_file_name(file_name).to_string();
        let transport: Arc<dyn LargeFileTransport> = Arc::clone(self) as _;
        LargeFileUploader::new(transport, options)
            .upload(source, bucket_id, &file_name)
            .await
    }

    /// Abandon an unfinished large file, discarding its uploaded parts
    #[instrument(skip(self))]
    pub async fn cancel_large_file(&self, file_id: &str) -> Result<()> {
        self.api_call(endpoints::CANCEL_LARGE_FILE, json!({ "fileId": file_id }))
            .await?;
        Ok(())
    }

    // ==================== Helper Methods ====================

    async fn authorize(
        http: &Client,
        config: &Config,
        credentials: &Credentials,
    ) -> Result<AuthState> {
        let url = format!(
            "{}{}/{}",
            config.auth_url,
            API_SUFFIX,
            endpoints::AUTHORIZE_ACCOUNT
        );
        let response = http
            .get(&url)
            .header(header::AUTHORIZATION, credentials.basic_auth())
            .send()
            .await?;
        let body = check_status(response).await?;
        let authorized: AuthorizeAccountResponse = from_response(&body)?;

        debug!(api_url = %authorized.api_url, "account authorized");
        Ok(AuthState {
            account_id: authorized.account_id,
            token: authorized.authorization_token,
            api_url: authorized.api_url,
            download_url: authorized.download_url,
            recommended_part_size: authorized.recommended_part_size,
            authorized_at: Utc::now(),
        })
    }

    async fn reauthorize(&self) -> Result<()> {
        let fresh = Self::authorize(&self.http, &self.config, &self.credentials).await?;
        *self.auth.write().await = fresh;
        Ok(())
    }

    /// POST a JSON call to the API base, re-authorizing once if the session
    /// token has expired.
    async fn api_call(&self, endpoint: &str, params: Value) -> Result<Bytes> {
        if self.auth.read().await.is_stale() {
            self.reauthorize().await?;
        }
        match self.api_call_once(endpoint, &params).await {
            Err(err) if err.is_auth_expired() => {
                warn!(endpoint, "auth token expired, re-authorizing");
                self.reauthorize().await?;
                self.api_call_once(endpoint, &params).await
            }
            other => other,
        }
    }

    async fn api_call_once(&self, endpoint: &str, params: &Value) -> Result<Bytes> {
        let (url, token) = {
            let auth = self.auth.read().await;
            (
                format!("{}{}/{}", auth.api_url, API_SUFFIX, endpoint),
                auth.token.clone(),
            )
        };

        debug!(endpoint, "api call");
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, token)
            .json(params)
            .send()
            .await?;
        check_status(response).await
    }

    async fn download_once(&self, file_id: &str) -> Result<Bytes> {
        let (url, token) = {
            let auth = self.auth.read().await;
            (
                format!(
                    "{}{}/{}",
                    auth.download_url,
                    API_SUFFIX,
                    endpoints::DOWNLOAD_FILE_BY_ID
                ),
                auth.token.clone(),
            )
        };
        let response = self
            .http
            .get(&url)
            .query(&[("fileId", file_id)])
            .header(header::AUTHORIZATION, token)
            .send()
            .await?;
        check_status(response).await
    }

    async fn get_upload_url(&self, bucket_id: &str) -> Result<UploadUrl> {
        let body = self
            .api_call(endpoints::GET_UPLOAD_URL, json!({ "bucketId": bucket_id }))
            .await?;
        from_response(&body)
    }
}

#[async_trait]
impl LargeFileTransport for B2Client {
    async fn recommended_part_size(&self) -> Result<u64> {
        Ok(self.auth.read().await.recommended_part_size)
    }

    async fn start_large_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> Result<FileInfo> {
        let body = self
            .api_call(
                endpoints::START_LARGE_FILE,
                json!({
                    "bucketId": bucket_id,
                    "fileName": file_name,
                    "contentType": content_type,
                }),
            )
            .await?;
        from_response(&body)
    }

    async fn get_upload_part_url(&self, file_id: &str) -> Result<UploadPartUrl> {
        let body = self
            .api_call(endpoints::GET_UPLOAD_PART_URL, json!({ "fileId": file_id }))
            .await?;
        from_response(&body)
    }

    async fn upload_part(
        &self,
        upload: &UploadPartUrl,
        part_number: u32,
        content_length: u64,
        body: SourceStream,
    ) -> Result<PartUploadResponse> {
        let response = self
            .http
            .post(&upload.upload_url)
            .header(header::AUTHORIZATION, &upload.authorization_token)
            .header("X-Bz-Part-Number", part_number)
            .header("X-Bz-Content-Sha1", SHA1_AT_END)
            .header(header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        let bytes = check_status(response).await?;
        from_response(&bytes)
    }

    async fn finish_large_file(
        &self,
        file_id: &str,
        part_sha1_array: &[String],
    ) -> Result<FileInfo> {
        let body = self
            .api_call(
                endpoints::FINISH_LARGE_FILE,
                json!({ "fileId": file_id, "partSha1Array": part_sha1_array }),
            )
            .await?;
        from_response(&body)
    }
}

async fn check_status(response: Response) -> Result<Bytes> {
    let status = response.status();
    if status.is_success() {
        Ok(response.bytes().await?)
    } else {
        let body = response.bytes().await.unwrap_or_default();
        Err(B2Error::from_response_body(status.as_u16(), &body))
    }
}

/// File names are stored without a leading slash
fn sanitize_file_name(file_name: &str) -> &str {
    file_name.strip_prefix('/').unwrap_or(file_name)
}

/// Percent-encode a file name for the `X-Bz-File-Name` header.
/// Unreserved characters and `/` stay literal.
const FILE_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

fn encode_file_name(file_name: &str) -> String {
    utf8_percent_encode(file_name, FILE_NAME_ENCODE_SET).to_string()
}
