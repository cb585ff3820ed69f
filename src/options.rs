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

//! Configuration for upload request construction.

/// The prefix for user-defined metadata keys.
///
/// Only metadata entries whose key carries this prefix are transmitted as
/// headers; other entries remain in the in-memory metadata map and are
/// silently skipped during header emission.
pub const USER_META_PREFIX: &str = "x-kss-meta-";

/// The default number of bytes a caller-supplied stream buffers to support
/// replay.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 128 * 1024;

/// The largest object accepted by a single (non-multipart) upload.
pub const MAX_SINGLE_UPLOAD_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Per-request configuration for uploads.
///
/// The defaults work for most applications. Callers that need guaranteed
/// replay of large caller-supplied streams (for transport retries or
/// redirects) should raise the buffer limit, or prefer file-backed uploads
/// where replay is always available.
///
/// # Example
/// ```
/// use ks3_client::UploadOptions;
/// let options = UploadOptions::new().with_stream_buffer_size(1024 * 1024);
/// assert_eq!(options.stream_buffer_size(), 1024 * 1024);
/// ```
#[derive(Clone, Debug)]
pub struct UploadOptions {
    stream_buffer_size: usize,
    max_single_upload_size: u64,
}

impl UploadOptions {
    /// Creates options with the default buffer limit and size ceiling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the replay buffer limit for caller-supplied streams.
    pub fn with_stream_buffer_size(mut self, v: usize) -> Self {
        self.stream_buffer_size = v;
        self
    }

    /// Sets the maximum single-upload size in bytes.
    pub fn with_max_single_upload_size(mut self, v: u64) -> Self {
        self.max_single_upload_size = v;
        self
    }

    /// The replay buffer limit for caller-supplied streams.
    pub fn stream_buffer_size(&self) -> usize {
        self.stream_buffer_size
    }

    /// The maximum single-upload size in bytes.
    pub fn max_single_upload_size(&self) -> u64 {
        self.max_single_upload_size
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            max_single_upload_size: MAX_SINGLE_UPLOAD_SIZE,
        }
    }
}
