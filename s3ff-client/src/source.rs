use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::{ByteStream, UploadError, UploadResult};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A file to be uploaded
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Name sent to the backend as `file_name`
    fn name(&self) -> &str;

    /// Total size in bytes
    fn size(&self) -> u64;

    /// Stream exactly `len` bytes starting at `offset`.
    ///
    /// The stream yields an `UnexpectedEof` error if the source ends early.
    async fn open_range(&self, offset: u64, len: u64) -> UploadResult<ByteStream>;
}

/// A file on local disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
    chunk_size: usize,
}

impl FileSource {
    /// Open `path`, taking its size now and its file name as the upload name
    pub async fn open<P: AsRef<Path>>(path: P) -> UploadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(UploadError::config(format!("{} is not a regular file", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::config(format!("{} has no file name", path.display())))?;

        Ok(Self {
            path,
            name,
            size: metadata.len(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Upload under a different name than the one on disk
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn open_range(&self, offset: u64, len: u64) -> UploadResult<ByteStream> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let reader = ReaderStream::with_capacity(file.take(len), self.chunk_size);
        Ok(exact_len(Box::pin(reader), len))
    }
}

/// An in-memory file
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    data: Bytes,
    chunk_size: usize,
}

impl BytesSource {
    pub fn new<S: Into<String>, B: Into<Bytes>>(name: S, data: B) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn open_range(&self, offset: u64, len: u64) -> UploadResult<ByteStream> {
        let available = self.size().saturating_sub(offset).min(len);
        let start = offset.min(self.size()) as usize;
        let slice = self.data.slice(start..start + available as usize);
        let chunk_size = self.chunk_size;

        let stream = async_stream::stream! {
            let mut rest = slice;
            while !rest.is_empty() {
                let chunk = rest.split_to(chunk_size.min(rest.len()));
                yield Ok(chunk);
            }
        };
        Ok(exact_len(Box::pin(stream), len))
    }
}

/// Fail the stream if it ends before `len` bytes were produced
fn exact_len(inner: ByteStream, len: u64) -> ByteStream {
    let stream = async_stream::stream! {
        let mut inner = inner;
        let mut produced = 0u64;
        while let Some(chunk) = inner.next().await {
            if let Ok(bytes) = &chunk {
                produced += bytes.len() as u64;
            }
            yield chunk;
        }
        if produced < len {
            yield Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("source ended after {produced} of {len} bytes"),
            ));
        }
    };
    Box::pin(stream)
}

/// Re-slice `inner` into chunks of exactly `chunk_size` bytes, except the last
pub(crate) fn rechunk(inner: ByteStream, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let stream = async_stream::stream! {
        let mut inner = inner;
        let mut pending = BytesMut::new();
        while let Some(chunk) = inner.next().await {
            match chunk {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    while pending.len() >= chunk_size {
                        yield Ok(pending.split_to(chunk_size).freeze());
                    }
                }
                Err(err) => {
                    pending.clear();
                    yield Err(err);
                    break;
                }
            }
        }
        if !pending.is_empty() {
            yield Ok(pending.freeze());
        }
    };
    Box::pin(stream)
}
