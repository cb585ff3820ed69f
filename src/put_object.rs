// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The request builder for object uploads.

use crate::checksum::{ChecksummingSource, md5_base64_of_file};
use crate::model::{AccessControlList, CannedAcl, Grant, ObjectMetadata};
use crate::options::UploadOptions;
use crate::upload_source::{BufferedSource, FileSource, Reset, StreamingSource};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

const CONTENT_TYPE: &str = "Content-Type";
const CACHE_CONTROL: &str = "Cache-Control";
const CONTENT_DISPOSITION: &str = "Content-Disposition";
const CONTENT_ENCODING: &str = "Content-Encoding";
const CONTENT_LENGTH: &str = "Content-Length";
const EXPIRES: &str = "Expires";
const CONTENT_MD5: &str = "Content-MD5";
const CANNED_ACL: &str = "x-kss-acl";
const WEBSITE_REDIRECT_LOCATION: &str = "x-kss-website-redirect-location";

/// A caller-supplied byte stream for uploads with no backing file.
pub type DynStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// The body source for an upload, before construction.
enum PayloadSpec {
    File(PathBuf),
    Stream(DynStream),
}

impl std::fmt::Debug for PayloadSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// A request builder for object uploads.
///
/// Composes a logical "upload this object" description into a validated,
/// streaming HTTP request. Validation runs before any network I/O; the body
/// is wrapped so the transport can replay it (redirects, retries) and so
/// the content digest can be computed without consuming the stream
/// irrecoverably.
///
/// # Example
/// ```no_run
/// # tokio_test::block_on(async {
/// use ks3_client::PutObject;
/// let request = PutObject::new("my-bucket", "backups/2026-08.tar", "/var/data/backup.tar")
///     .build()
///     .await?;
/// assert_eq!(request.method(), http::Method::PUT);
/// assert!(request.header("Content-MD5").is_some());
/// # anyhow::Result::<()>::Ok(()) });
/// ```
///
/// For stream-sourced uploads declare the content length in the metadata
/// whenever it is known; without it the size ceiling cannot be validated
/// and the transport must handle a length-unknown body.
#[derive(Debug)]
pub struct PutObject {
    bucket: String,
    key: String,
    payload: Option<PayloadSpec>,
    metadata: ObjectMetadata,
    canned_acl: Option<CannedAcl>,
    acl: AccessControlList,
    redirect_location: Option<String>,
    options: UploadOptions,
}

impl PutObject {
    /// Creates an upload request sourced from a file.
    ///
    /// The file is opened during [build()][PutObject::build]: its length
    /// becomes the content length, its extension drives the content type if
    /// none was set, and its MD5 digest is computed in a full streaming
    /// pass before transmission.
    pub fn new<B, K, P>(bucket: B, key: K, path: P) -> Self
    where
        B: Into<String>,
        K: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            payload: Some(PayloadSpec::File(path.into())),
            metadata: ObjectMetadata::new(),
            canned_acl: None,
            acl: AccessControlList::new(),
            redirect_location: None,
            options: UploadOptions::default(),
        }
    }

    /// Creates an upload request sourced from a caller-supplied stream.
    ///
    /// The stream is buffered up to the configured limit so it can be
    /// replayed; past that limit a transport-requested replay fails with
    /// [Error::ReplayNotSupported]. Prefer file-sourced uploads when
    /// guaranteed replay matters.
    pub fn from_stream<B, K, R>(bucket: B, key: K, reader: R, metadata: ObjectMetadata) -> Self
    where
        B: Into<String>,
        K: Into<String>,
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            payload: Some(PayloadSpec::Stream(Box::new(reader))),
            metadata,
            canned_acl: None,
            acl: AccessControlList::new(),
            redirect_location: None,
            options: UploadOptions::default(),
        }
    }

    /// Replaces the object metadata.
    pub fn with_metadata(mut self, v: ObjectMetadata) -> Self {
        self.metadata = v;
        self
    }

    /// Sets a canned access-control policy for the new object.
    ///
    /// Independent of [with_grant][PutObject::with_grant]: when both are
    /// set, both header groups are emitted.
    pub fn with_canned_acl(mut self, v: CannedAcl) -> Self {
        self.canned_acl = Some(v);
        self
    }

    /// Replaces the explicit grant list for the new object.
    pub fn with_acl(mut self, v: AccessControlList) -> Self {
        self.acl = v;
        self
    }

    /// Appends one explicit grant for the new object.
    pub fn with_grant(mut self, v: Grant) -> Self {
        self.acl = self.acl.add_grant(v);
        self
    }

    /// Sets the website redirect target stored with the object.
    ///
    /// Must begin with `/`, `http://`, or `https://`.
    pub fn with_redirect_location<T: Into<String>>(mut self, v: T) -> Self {
        self.redirect_location = Some(v.into());
        self
    }

    /// Overrides the upload configuration.
    pub fn with_options(mut self, v: UploadOptions) -> Self {
        self.options = v;
        self
    }

    /// The target bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The target object key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The object metadata as currently configured.
    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    /// Validates the request and assembles headers and a streaming body.
    ///
    /// Validation evaluates in a fixed order, first failure wins: bucket,
    /// key, body source, redirect target shape, size ceiling. For
    /// file-sourced uploads this opens the file and performs a full read
    /// pass to compute the content digest; treat it as a blocking
    /// operation.
    pub async fn build(self) -> Result<UploadRequest> {
        if self.bucket.trim().is_empty() {
            return Err(Error::invalid_argument("bucket name can not be blank"));
        }
        if self.key.trim().is_empty() {
            return Err(Error::invalid_argument("object key can not be blank"));
        }
        let Some(payload) = self.payload else {
            return Err(Error::invalid_argument(
                "upload body can not be empty, supply a file or an input stream",
            ));
        };
        if let Some(redirect) = self.redirect_location.as_deref() {
            if !redirect.starts_with('/')
                && !redirect.starts_with("http://")
                && !redirect.starts_with("https://")
            {
                return Err(Error::invalid_argument(
                    "redirect location should start with /, http:// or https://",
                ));
            }
        }

        let max = self.options.max_single_upload_size();
        let mut metadata = self.metadata;
        let body = match payload {
            PayloadSpec::File(path) => {
                let source = FileSource::open(&path).await.map_err(|e| {
                    Error::io(format!("opening upload file {}", path.display()), e)
                })?;
                if source.len() > max {
                    return Err(Error::invalid_argument(format!(
                        "upload file too large, max bytes: {max}"
                    )));
                }
                if metadata.content_type().is_none() {
                    metadata = metadata.set_content_type(crate::mime::content_type_for(&path));
                }
                metadata = metadata.set_content_length(source.len());
                if metadata.content_md5().is_none() {
                    let digest = md5_base64_of_file(&path).await.map_err(|e| {
                        Error::io(format!("computing MD5 of {}", path.display()), e)
                    })?;
                    metadata = metadata.set_content_md5(digest);
                }
                UploadBody::File(source)
            }
            PayloadSpec::Stream(reader) => {
                if metadata.content_length().is_some_and(|len| len > max) {
                    return Err(Error::invalid_argument(format!(
                        "declared content-length too large, max bytes: {max}"
                    )));
                }
                UploadBody::Stream(BufferedSource::new(
                    reader,
                    self.options.stream_buffer_size(),
                ))
            }
        };

        let headers = build_headers(
            &metadata,
            self.canned_acl,
            &self.acl,
            self.redirect_location.as_deref(),
        );
        tracing::debug!(
            bucket = %self.bucket,
            key = %self.key,
            headers = headers.len(),
            "upload request assembled"
        );
        Ok(UploadRequest {
            method: http::Method::PUT,
            headers,
            content_md5: metadata.content_md5().map(str::to_string),
            body: ChecksummingSource::new(body),
        })
    }
}

/// Translates the request description into the outbound header mapping.
///
/// A pure transformation, run in one pass; headers are only emitted for
/// fields that are set and non-empty. Canned policy and explicit grants are
/// independent groups and may both appear.
fn build_headers(
    metadata: &ObjectMetadata,
    canned_acl: Option<CannedAcl>,
    acl: &AccessControlList,
    redirect_location: Option<&str>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let mut insert = |name: &str, value: String| {
        if !value.is_empty() {
            headers.insert(name.to_string(), value);
        }
    };
    if let Some(v) = metadata.content_type() {
        insert(CONTENT_TYPE, v.to_string());
    }
    if let Some(v) = metadata.cache_control() {
        insert(CACHE_CONTROL, v.to_string());
    }
    if let Some(v) = metadata.content_disposition() {
        insert(CONTENT_DISPOSITION, v.to_string());
    }
    if let Some(v) = metadata.content_encoding() {
        insert(CONTENT_ENCODING, v.to_string());
    }
    if let Some(v) = metadata.content_length().filter(|v| *v > 0) {
        insert(CONTENT_LENGTH, v.to_string());
    }
    if let Some(v) = metadata.expires() {
        insert(EXPIRES, v.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
    }
    if let Some(v) = metadata.content_md5() {
        insert(CONTENT_MD5, v.to_string());
    }
    for (name, value) in metadata.transmitted_user_metadata() {
        headers.insert(name.to_string(), value.to_string());
    }
    if let Some(v) = canned_acl {
        headers.insert(CANNED_ACL.to_string(), v.as_str().to_string());
    }
    for (name, value) in acl.to_headers() {
        headers.insert(name, value);
    }
    if let Some(v) = redirect_location {
        headers.insert(WEBSITE_REDIRECT_LOCATION.to_string(), v.to_string());
    }
    headers
}

/// The body of a validated upload, exactly one of two sources.
#[derive(Debug)]
pub enum UploadBody {
    /// A file-backed body; replay reopens the file.
    File(FileSource),
    /// A caller-supplied stream, buffered for replay up to a limit.
    Stream(BufferedSource<DynStream>),
}

impl StreamingSource for UploadBody {
    type Error = Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes>> {
        match self {
            Self::File(source) => source
                .next()
                .await
                .map(|r| r.map_err(|e| Error::io("reading upload file", e))),
            Self::Stream(source) => source.next().await,
        }
    }

    fn size_hint(&self) -> (u64, Option<u64>) {
        match self {
            Self::File(source) => source.size_hint(),
            Self::Stream(source) => source.size_hint(),
        }
    }
}

impl Reset for UploadBody {
    type Error = Error;

    async fn reset(&mut self) -> Result<()> {
        match self {
            Self::File(source) => source
                .reset()
                .await
                .map_err(|e| Error::io("reopening upload file", e)),
            Self::Stream(source) => source.reset().await,
        }
    }
}

/// A fully-formed outbound upload: method, headers, and streaming body.
///
/// The transport layer takes ownership of this value for the lifetime of
/// the HTTP exchange, including any transport-level retry that requires a
/// [reset][Reset] of the body.
#[derive(Debug)]
pub struct UploadRequest {
    method: http::Method,
    headers: BTreeMap<String, String>,
    content_md5: Option<String>,
    body: ChecksummingSource<UploadBody>,
}

impl UploadRequest {
    /// The HTTP method, fixed to the object-creation verb.
    pub fn method(&self) -> http::Method {
        self.method.clone()
    }

    /// The outbound headers, keys case-preserving.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Looks up a single header by its exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The body length, if known.
    pub fn content_length(&self) -> Option<u64> {
        let (min, max) = self.body.size_hint();
        max.filter(|max| *max == min)
    }

    /// The base64 MD5 digest of the body.
    ///
    /// Returns the explicit or file-computed metadata value when present.
    /// Otherwise returns the digest accumulated by the transmission read
    /// pass, which is only available once the body has been read to
    /// completion at least once.
    pub fn content_md5(&self) -> Option<String> {
        self.content_md5
            .clone()
            .or_else(|| self.body.digest_base64())
    }

    /// Mutable access to the streaming body, for transmission.
    pub fn body_mut(&mut self) -> &mut ChecksummingSource<UploadBody> {
        &mut self.body
    }

    /// Consumes the request, returning the streaming body.
    pub fn into_body(self) -> ChecksummingSource<UploadBody> {
        self.body
    }
}
