//! File store — the byte source behind a sender and the sink behind a
//! receiver.
//!
//! Access is strictly sequential. Sources are anything that implements
//! `AsyncRead`; the on-disk sink stages writes to a `.part` file and renames
//! it into place only once the last segment has been flushed, so a failed
//! transfer never leaves a truncated file under the destination name.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

/// Sequential reader of file segments.
pub trait SegmentSource: Send {
    /// Read exactly `len` bytes. Running out early is an error.
    fn read_next(&mut self, len: usize) -> impl Future<Output = io::Result<Bytes>> + Send;
}

impl<R: AsyncRead + Unpin + Send> SegmentSource for R {
    async fn read_next(&mut self, len: usize) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        self.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }
}

/// Sequential writer of file segments.
pub trait SegmentSink: Send {
    fn write_next(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Called once, after the final segment has been written.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

impl SegmentSink for Vec<u8> {
    async fn write_next(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Source handed out by [`FileStore::open_for_read`].
pub type FileSource = BufReader<File>;

/// Serves files from a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a requested name onto a path under the root.
    ///
    /// Only plain relative names are served: absolute paths, `..` and the
    /// empty name resolve to nothing.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let requested = Path::new(name);
        let mut parts = requested.components().peekable();
        parts.peek()?;
        if !parts.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(requested))
    }

    /// Open a served file, returning its length and a sequential reader.
    pub async fn open_for_read(&self, name: &str) -> Result<(u64, FileSource), StoreError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        tracing::debug!(path = %path.display(), len = meta.len(), "opened file for serving");
        Ok((meta.len(), BufReader::new(file)))
    }

    /// Open a destination for a fetched file. Unlike reads, `dest` is taken
    /// as given and is not confined to the root.
    pub async fn open_for_write(dest: impl Into<PathBuf>) -> Result<StagedFile, StoreError> {
        StagedFile::create(dest).await
    }
}

/// A destination file that only appears under its final name once complete.
#[derive(Debug)]
pub struct StagedFile {
    file: BufWriter<File>,
    part_path: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Create `<dest>.part`, creating parent directories as needed.
    pub async fn create(dest: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dest = dest.into();
        let file_name = dest
            .file_name()
            .ok_or_else(|| StoreError::InvalidDestination(dest.clone()))?
            .to_string_lossy()
            .into_owned();
        let part_path = dest.with_file_name(format!("{file_name}.part"));

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&part_path).await?;

        Ok(Self {
            file: BufWriter::new(file),
            part_path,
            dest,
            committed: false,
        })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

impl SegmentSink for StagedFile {
    async fn write_next(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        tokio::fs::rename(&self.part_path, &self.dest).await?;
        self.committed = true;
        tracing::debug!(path = %self.dest.display(), "staged file committed");
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid destination path: {}", .0.display())]
    InvalidDestination(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}
