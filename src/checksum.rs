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

//! Content integrity checksums for uploads.
//!
//! The service verifies object integrity through the `Content-MD5` header,
//! a base64-encoded MD5 digest of the body. File uploads compute the digest
//! in a dedicated streaming pass before transmission; stream uploads can
//! accumulate it lazily during the transmission pass itself via
//! [ChecksummingSource].

use crate::upload_source::{FileSource, Reset, StreamingSource};
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use std::path::Path;

/// Computes the base64-encoded MD5 digest of a file.
///
/// Streams through the file once in fixed-size chunks; the file is not held
/// open afterwards.
pub async fn md5_base64_of_file<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let mut source = FileSource::open(path.as_ref()).await?;
    let mut context = md5::Context::new();
    while let Some(data) = source.next().await.transpose()? {
        context.consume(&data);
    }
    Ok(BASE64_STANDARD.encode(context.finalize().0))
}

/// Decorates a source, feeding every byte read through a running MD5
/// accumulator.
///
/// The digest is only available once the inner source reports end of
/// stream: reading partially and abandoning the source yields no digest.
/// A [reset][Reset] restarts the accumulator along with the inner source,
/// so a replayed transmission produces a digest for the replayed pass.
pub struct ChecksummingSource<S> {
    inner: S,
    context: md5::Context,
    digest: Option<md5::Digest>,
}

impl<S> ChecksummingSource<S> {
    /// Wraps `inner` with a running MD5 accumulator.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
            digest: None,
        }
    }

    /// The finalized digest, or `None` if end of stream was not reached.
    pub fn digest(&self) -> Option<[u8; 16]> {
        self.digest.map(|d| d.0)
    }

    /// The finalized digest rendered for the `Content-MD5` header.
    pub fn digest_base64(&self) -> Option<String> {
        self.digest.map(|d| BASE64_STANDARD.encode(d.0))
    }

    /// Returns the inner source.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> StreamingSource for ChecksummingSource<S>
where
    S: StreamingSource + Send,
{
    type Error = S::Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        match self.inner.next().await {
            None => {
                if self.digest.is_none() {
                    self.digest = Some(self.context.clone().finalize());
                }
                None
            }
            Some(Ok(data)) => {
                self.context.consume(&data);
                Some(Ok(data))
            }
            Some(Err(e)) => Some(Err(e)),
        }
    }

    fn size_hint(&self) -> (u64, Option<u64>) {
        self.inner.size_hint()
    }
}

impl<S> Reset for ChecksummingSource<S>
where
    S: Reset + Send,
{
    type Error = S::Error;

    async fn reset(&mut self) -> Result<(), Self::Error> {
        self.inner.reset().await?;
        self.context = md5::Context::new();
        self.digest = None;
        Ok(())
    }
}

impl<S> std::fmt::Debug for ChecksummingSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksummingSource")
            .field("finalized", &self.digest.is_some())
            .finish_non_exhaustive()
    }
}
