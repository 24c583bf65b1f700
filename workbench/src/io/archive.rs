//! Streams a project tree as a zip archive.
//!
//! The archive is produced on a blocking worker and handed over in chunks
//! through a bounded channel, so a download never holds the whole archive in
//! memory. An error after the first chunk ends the stream with an `Err` item;
//! the transport is expected to abort the response.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::{Result, WorkbenchError};
use crate::io::store::walk_files;

pub const CONTENT_TYPE: &str = "application/zip";

/// Chunks in flight between the zip worker and the consumer.
const CHANNEL_DEPTH: usize = 8;

/// Incremental archive body.
pub struct ArchiveStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Start streaming `root` as a zip archive.
///
/// Fails with `NotFound` before producing anything if `root` is not a
/// directory. Must be called from within a Tokio runtime.
pub fn stream(root: &Path, chunk_bytes: usize) -> Result<ArchiveStream> {
    if !root.is_dir() {
        return Err(WorkbenchError::NotFound {
            path: root.to_path_buf(),
        });
    }
    let (stream, _worker) = spawn_archive(root.to_path_buf(), chunk_bytes);
    Ok(stream)
}

fn spawn_archive(root: PathBuf, chunk_bytes: usize) -> (ArchiveStream, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let worker = tokio::task::spawn_blocking(move || {
        let err_tx = tx.clone();
        if let Err(e) = write_archive(&root, ChunkWriter::new(tx, chunk_bytes)) {
            warn!(root = %root.display(), err = %e, "archive aborted");
            let _ = err_tx.blocking_send(Err(e));
        }
    });
    (ArchiveStream { rx }, worker)
}

fn write_archive(root: &Path, writer: ChunkWriter) -> io::Result<()> {
    let mut zip = ZipWriter::new_stream(writer);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated);

    let mut entries = 0usize;
    for file in walk_files(root) {
        let (name, path) = file.map_err(io::Error::other)?;
        zip.start_file(name.as_str(), options)
            .map_err(io::Error::other)?;
        let mut source = File::open(&path)?;
        io::copy(&mut source, &mut zip)?;
        zip.flush()?;
        entries += 1;
    }

    let mut inner = zip.finish().map_err(io::Error::other)?;
    inner.flush()?;
    debug!(root = %root.display(), entries, "archive complete");
    Ok(())
}

/// `Write` adapter that forwards buffered bytes to the archive channel.
struct ChunkWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    chunk_bytes: usize,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>, chunk_bytes: usize) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(chunk_bytes),
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::take(&mut self.buf));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.chunk_bytes {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        let _ = self.send_buffered();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::io::store;

    async fn collect(mut stream: ArchiveStream) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn archive_contains_relative_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("proj");
        store::write(&root.join("a.txt"), b"alpha").expect("write");
        store::write(&root.join("sub/b.txt"), b"beta").expect("write");

        let bytes = collect(stream(&root, 16).expect("stream")).await.expect("collect");
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("open zip");

        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);

        let mut contents = String::new();
        archive
            .by_name("sub/b.txt")
            .expect("entry")
            .read_to_string(&mut contents)
            .expect("read entry");
        assert_eq!(contents, "beta");
    }

    #[tokio::test]
    async fn empty_project_is_a_valid_empty_archive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bytes = collect(stream(temp.path(), 1024).expect("stream"))
            .await
            .expect("collect");
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("open zip");
        assert_eq!(archive.len(), 0);
    }

    #[test]
    fn missing_root_fails_before_streaming() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = stream(&temp.path().join("absent"), 1024)
            .err()
            .expect("missing root must fail");
        assert!(matches!(err, WorkbenchError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn walk_error_after_first_chunk_ends_with_err() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("proj");
        store::write(&root.join("a.txt"), b"alpha").expect("write");
        std::os::unix::fs::symlink(root.join("missing"), root.join("zz-dangling"))
            .expect("symlink");

        let mut stream = stream(&root, 16).expect("stream");
        let mut chunks = 0usize;
        let err = loop {
            match stream.next().await.expect("stream ends with an error item") {
                Ok(_) => chunks += 1,
                Err(err) => break err,
            }
        };
        assert!(chunks > 0, "bytes were streamed before the failure");
        assert!(err.to_string().contains("zz-dangling"), "unexpected error: {err}");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_stops_the_worker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("big");
        for i in 0..32 {
            store::write(&root.join(format!("f{i}.bin")), &vec![i as u8; 4096]).expect("write");
        }
        let (mut stream, worker) = spawn_archive(root, 64);
        let first = stream.next().await.expect("first chunk").expect("ok chunk");
        assert!(!first.is_empty());
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker exits once the consumer is gone")
            .expect("worker did not panic");
    }
}
