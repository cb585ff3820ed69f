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

//! Defines repeatable upload data sources.
//!
//! Upload bodies may need to be consumed more than once: the content digest
//! is computed by streaming through the data, and transports may replay a
//! request after a redirect or retry. The sources in this module support
//! [reset-to-origin][Reset] in addition to sequential consumption.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Provides bytes for an upload from single-pass sources.
pub trait StreamingSource {
    /// The error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Gets the next set of data to upload.
    fn next(&mut self) -> impl Future<Output = Option<std::result::Result<bytes::Bytes, Self::Error>>> + Send;

    /// An estimate of the upload size.
    ///
    /// Returns the expected size as a [min, max) range. Where `None`
    /// represents an unknown limit for the upload.
    fn size_hint(&self) -> (u64, Option<u64>) {
        (0_u64, None)
    }
}

/// Provides bytes for an upload from sources that can restart from origin.
///
/// The client library assumes that after a successful `reset()` the source
/// reproduces the identical byte sequence it produced from its first read.
pub trait Reset {
    /// The error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Repositions consumption to the start of the data.
    fn reset(&mut self) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send;
}

const READ_SIZE: usize = 256 * 1024;

impl<S> StreamingSource for S
where
    S: tokio::io::AsyncRead + Unpin + Send,
{
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<std::result::Result<bytes::Bytes, Self::Error>> {
        let mut buffer = vec![0_u8; READ_SIZE];
        match tokio::io::AsyncReadExt::read(self, &mut buffer).await {
            Err(e) => Some(Err(e)),
            Ok(0) => None,
            Ok(n) => {
                buffer.resize(n, 0_u8);
                Some(Ok(bytes::Bytes::from_owner(buffer)))
            }
        }
    }
}

/// A file-backed upload source.
///
/// Reset is always available: it reopens the file, so the data can be read
/// any number of times (once for the checksum pass and once for
/// transmission). The file length is captured at open time and reported as
/// an exact size hint.
///
/// # Example
/// ```no_run
/// # tokio_test::block_on(async {
/// use ks3_client::upload_source::{FileSource, Reset, StreamingSource};
/// let mut source = FileSource::open("/var/data/backup.tar").await?;
/// while let Some(chunk) = source.next().await.transpose()? {
///     // first pass, e.g. checksum
/// }
/// source.reset().await?;
/// // second pass, e.g. transmission
/// # anyhow::Result::<()>::Ok(()) });
/// ```
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
    file: Option<tokio::fs::File>,
}

impl FileSource {
    /// Opens `path` and captures its current length.
    pub async fn open<P: Into<PathBuf>>(path: P) -> std::io::Result<Self> {
        let path = path.into();
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            path,
            len,
            file: Some(file),
        })
    }

    /// The path backing this source.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file length captured at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the file was empty at open time.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl StreamingSource for FileSource {
    type Error = std::io::Error;

    async fn next(&mut self) -> Option<std::result::Result<bytes::Bytes, Self::Error>> {
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => match tokio::fs::File::open(&self.path).await {
                Ok(f) => self.file.insert(f),
                Err(e) => return Some(Err(e)),
            },
        };
        let mut buffer = vec![0_u8; READ_SIZE];
        match tokio::io::AsyncReadExt::read(file, &mut buffer).await {
            Err(e) => Some(Err(e)),
            Ok(0) => None,
            Ok(n) => {
                buffer.resize(n, 0_u8);
                Some(Ok(bytes::Bytes::from_owner(buffer)))
            }
        }
    }

    fn size_hint(&self) -> (u64, Option<u64>) {
        (self.len, Some(self.len))
    }
}

impl Reset for FileSource {
    type Error = std::io::Error;

    async fn reset(&mut self) -> std::io::Result<()> {
        // Reopening (rather than seeking) also restores sources whose handle
        // was lost to a previous I/O error.
        self.file = Some(tokio::fs::File::open(&self.path).await?);
        Ok(())
    }
}

/// Wraps a caller-supplied source to make it repeatable, up to a limit.
///
/// Bytes are buffered as they are first read. A [reset][Reset] within the
/// buffer limit replays the identical byte sequence and then continues the
/// inner source. Once consumption passes the limit the buffer is discarded
/// and any reset fails with [Error::ReplayNotSupported]; callers that need
/// guaranteed replay should prefer [FileSource] or raise the limit.
pub struct BufferedSource<S> {
    inner: S,
    limit: usize,
    buffer: Vec<bytes::Bytes>,
    buffered: usize,
    overflowed: bool,
    replay: Option<usize>,
}

impl<S> BufferedSource<S>
where
    S: StreamingSource,
{
    /// Wraps `inner`, buffering up to `limit` bytes for replay.
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            limit,
            buffer: Vec::new(),
            buffered: 0,
            overflowed: false,
            replay: None,
        }
    }

    /// The replay buffer limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl<S> StreamingSource for BufferedSource<S>
where
    S: StreamingSource + Send,
{
    type Error = Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes>> {
        if let Some(i) = self.replay {
            if i < self.buffer.len() {
                self.replay = Some(i + 1);
                return Some(Ok(self.buffer[i].clone()));
            }
            // Replay exhausted, continue draining the inner source.
            self.replay = None;
        }
        match self.inner.next().await {
            None => None,
            Some(Err(e)) => Some(Err(Error::io("reading upload stream", e))),
            Some(Ok(data)) => {
                if !self.overflowed {
                    if self.buffered + data.len() <= self.limit {
                        self.buffered += data.len();
                        self.buffer.push(data.clone());
                    } else {
                        self.overflowed = true;
                        self.buffer.clear();
                        self.buffer.shrink_to_fit();
                    }
                }
                Some(Ok(data))
            }
        }
    }

    fn size_hint(&self) -> (u64, Option<u64>) {
        self.inner.size_hint()
    }
}

impl<S> Reset for BufferedSource<S>
where
    S: StreamingSource + Send,
{
    type Error = Error;

    async fn reset(&mut self) -> Result<()> {
        if self.overflowed {
            return Err(Error::ReplayNotSupported { limit: self.limit });
        }
        self.replay = Some(0);
        Ok(())
    }
}

impl<S> std::fmt::Debug for BufferedSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSource")
            .field("limit", &self.limit)
            .field("buffered", &self.buffered)
            .field("overflowed", &self.overflowed)
            .field("replay", &self.replay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use tempfile::NamedTempFile;

    type TestResult = anyhow::Result<()>;

    const CONTENTS: &[u8] = b"how vexingly quick daft zebras jump";

    /// A helper function to simplify the tests.
    pub(crate) async fn collect<S>(mut source: S) -> anyhow::Result<Vec<u8>>
    where
        S: StreamingSource,
    {
        let mut vec = Vec::new();
        while let Some(bytes) = source.next().await.transpose()? {
            vec.extend_from_slice(&bytes);
        }
        Ok(vec)
    }

    pub(crate) fn temp_file_with(contents: &[u8]) -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(contents)?;
        file.flush()?;
        Ok(file)
    }

    #[tokio::test]
    async fn file_source_reports_exact_size() -> TestResult {
        let file = temp_file_with(CONTENTS)?;
        let source = FileSource::open(file.path()).await?;
        assert_eq!(source.len(), CONTENTS.len() as u64);
        assert_eq!(
            source.size_hint(),
            (CONTENTS.len() as u64, Some(CONTENTS.len() as u64))
        );
        let got = collect(source).await?;
        assert_eq!(got[..], CONTENTS[..]);
        Ok(())
    }

    #[tokio::test]
    async fn file_source_empty() -> TestResult {
        let file = NamedTempFile::new()?;
        let source = FileSource::open(file.path()).await?;
        assert!(source.is_empty());
        let got = collect(source).await?;
        assert!(got.is_empty(), "{got:?}");
        Ok(())
    }

    #[tokio::test]
    async fn file_source_resets_to_origin() -> TestResult {
        let file = temp_file_with(CONTENTS)?;
        let mut source = FileSource::open(file.path()).await?;
        let first = collect(PassThrough(&mut source)).await?;
        source.reset().await?;
        let second = collect(source).await?;
        assert_eq!(first, second);
        assert_eq!(second[..], CONTENTS[..]);
        Ok(())
    }

    #[tokio::test]
    async fn file_source_missing_file() {
        let err = FileSource::open("/this/path/does/not/exist").await;
        assert!(err.is_err(), "{err:?}");
    }

    #[tokio::test]
    async fn buffered_source_replays_identical_bytes() -> TestResult {
        let chunks = ["how ", "vexingly ", "quick ", "daft ", "zebras ", "jump"]
            .map(|v| bytes::Bytes::from_static(v.as_bytes()))
            .to_vec();
        let mut source = BufferedSource::new(VecStream::new(chunks), 1024);
        let first = collect(PassThrough(&mut source)).await?;
        assert_eq!(first[..], CONTENTS[..]);
        source.reset().await?;
        let second = collect(source).await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn buffered_source_partial_read_then_reset() -> TestResult {
        let chunks = ["how ", "vexingly ", "quick "]
            .map(|v| bytes::Bytes::from_static(v.as_bytes()))
            .to_vec();
        let mut source = BufferedSource::new(VecStream::new(chunks), 1024);
        // Read fewer bytes than the threshold, then reset.
        let chunk = source.next().await.transpose()?;
        assert_eq!(chunk.as_deref(), Some(b"how ".as_slice()));
        source.reset().await?;
        let got = collect(source).await?;
        assert_eq!(got, b"how vexingly quick ");
        Ok(())
    }

    #[tokio::test]
    async fn buffered_source_past_threshold_fails_deterministically() -> TestResult {
        let chunks = ["how ", "vexingly ", "quick "]
            .map(|v| bytes::Bytes::from_static(v.as_bytes()))
            .to_vec();
        let mut source = BufferedSource::new(VecStream::new(chunks), 8);
        while source.next().await.transpose()?.is_some() {}
        let err = source.reset().await.unwrap_err();
        assert!(
            matches!(err, Error::ReplayNotSupported { limit: 8 }),
            "{err:?}"
        );
        // A second attempt fails the same way.
        let err = source.reset().await.unwrap_err();
        assert!(
            matches!(err, Error::ReplayNotSupported { limit: 8 }),
            "{err:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn buffered_source_exactly_at_threshold_still_replays() -> TestResult {
        let chunks = [bytes::Bytes::from_static(b"12345678")].to_vec();
        let mut source = BufferedSource::new(VecStream::new(chunks), 8);
        while source.next().await.transpose()?.is_some() {}
        source.reset().await?;
        let got = collect(source).await?;
        assert_eq!(got, b"12345678");
        Ok(())
    }

    #[tokio::test]
    async fn buffered_source_propagates_size_hint() {
        let chunks = [bytes::Bytes::from_static(b"12345678")].to_vec();
        let source = BufferedSource::new(VecStream::new(chunks), 1024);
        assert_eq!(source.size_hint(), (8, Some(8)));
    }

    #[tokio::test]
    async fn async_read_blanket_impl() -> TestResult {
        let file = temp_file_with(CONTENTS)?;
        let read = tokio::fs::File::open(file.path()).await?;
        let got = collect(read).await?;
        assert_eq!(got[..], CONTENTS[..]);
        Ok(())
    }

    /// Adapts `&mut S` so `collect()` can borrow without consuming.
    pub(crate) struct PassThrough<'a, S>(pub &'a mut S);

    impl<S> StreamingSource for PassThrough<'_, S>
    where
        S: StreamingSource + Send,
    {
        type Error = S::Error;

        async fn next(&mut self) -> Option<std::result::Result<bytes::Bytes, Self::Error>> {
            self.0.next().await
        }

        fn size_hint(&self) -> (u64, Option<u64>) {
            self.0.size_hint()
        }
    }

    pub(crate) struct VecStream {
        contents: Vec<bytes::Bytes>,
        current: VecDeque<std::io::Result<bytes::Bytes>>,
    }

    impl VecStream {
        pub(crate) fn new(contents: Vec<bytes::Bytes>) -> Self {
            let current: VecDeque<std::io::Result<_>> =
                contents.iter().map(|x| Ok(x.clone())).collect();
            Self { contents, current }
        }
    }

    impl StreamingSource for VecStream {
        type Error = std::io::Error;

        async fn next(&mut self) -> Option<std::io::Result<bytes::Bytes>> {
            self.current.pop_front()
        }

        fn size_hint(&self) -> (u64, Option<u64>) {
            let s = self.contents.iter().fold(0_u64, |a, i| a + i.len() as u64);
            (s, Some(s))
        }
    }
}
