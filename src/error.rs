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

//! The error types used by the KS3 client.

/// A `Result` alias where the `Err` case is [Error].
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type for the transport-security and upload-request layer.
///
/// Invalid arguments are detected during request validation, before any I/O
/// takes place. I/O errors wrap the underlying cause (file not found, read
/// failures, connect failures). Security errors are fatal and indicate the
/// TLS handshake did not establish usable key material; they must never be
/// downgraded or retried.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// use ks3_client::{Error, PutObject};
/// let err = PutObject::new("", "key", "/tmp/missing").build().await.unwrap_err();
/// assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");
/// # });
/// ```
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The request failed validation before any I/O took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A client-side I/O failure, wrapping the underlying cause.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the client was doing when the error occurred.
        context: String,
        #[source]
        source: BoxError,
    },

    /// A confirmed absence of TLS session key material. Fatal.
    #[error("TLS security error: {0}")]
    Security(String),

    /// A streaming body was asked to replay past its buffered threshold.
    #[error("stream replay is not supported beyond {limit} buffered bytes")]
    ReplayNotSupported {
        /// The configured buffering threshold in bytes.
        limit: usize,
    },
}

impl Error {
    /// Creates an invalid-argument error naming the violated rule.
    pub fn invalid_argument<T: Into<String>>(msg: T) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wraps a client-side I/O error with a short description of the
    /// operation that failed.
    pub fn io<C, E>(context: C, source: E) -> Self
    where
        C: Into<String>,
        E: Into<BoxError>,
    {
        Self::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Creates a fatal security error.
    pub fn security<T: Into<String>>(msg: T) -> Self {
        Self::Security(msg.into())
    }

    /// Returns true if this error was detected during request validation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true if this error is a fatal transport-security error.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}
