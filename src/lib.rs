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

//! KS3 object storage client primitives.
//!
//! This crate provides the transport-security and upload-request layers of
//! a KS3 client: hardened TLS connection establishment, and the
//! construction of single-request object uploads from files or in-memory
//! streams.
//!
//! Uploads start from a [PutObject] builder. For files, the content type,
//! length, and MD5 digest are derived automatically; for streams, the
//! caller supplies metadata and the digest is computed as the body is
//! consumed:
//!
//! ```
//! # tokio_test::block_on(async {
//! use ks3_client::PutObject;
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("report.pdf");
//! # std::fs::write(&path, b"contents")?;
//! let request = PutObject::new("my-bucket", "reports/2026/q3.pdf", &path)
//!     .build()
//!     .await?;
//! assert_eq!(request.header("Content-Type"), Some("application/pdf"));
//! assert!(request.content_md5().is_some());
//! # anyhow::Result::<()>::Ok(()) });
//! ```
//!
//! Connections go through [tls::TlsConnector], which narrows the protocol
//! versions each handshake may use and verifies that the session derived
//! key material before handing the channel back.
//!
//! # Features
//!
//! The crate has no optional features. All functionality is available with
//! the default build.

pub mod checksum;
mod error;
pub mod mime;
pub mod model;
mod options;
mod put_object;
pub mod tls;
pub mod upload_source;

pub use error::{Error, Result};
pub use options::{
    DEFAULT_STREAM_BUFFER_SIZE, MAX_SINGLE_UPLOAD_SIZE, USER_META_PREFIX, UploadOptions,
};
pub use put_object::{DynStream, PutObject, UploadBody, UploadRequest};
