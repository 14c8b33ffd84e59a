use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::TransferError;

/// Random-access byte source for an upload payload.
///
/// Reads are addressed by absolute offset, so a driver can re-read a range
/// it already sent after the server reports a lower offset.
pub trait ByteSource: Send + Sync {
    /// Total length of the payload in bytes.
    fn len(&self) -> u64;

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_range(offset: u64, len: usize, total: u64) -> Result<(), TransferError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= total => Ok(()),
        _ => Err(TransferError::RangeOutOfBounds { offset, len, total }),
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on disk, read with seek-then-read.
///
/// The length is captured when the file is opened; the file must not
/// change size while an upload is running.
pub struct FileSource {
    file: Mutex<File>,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
        check_range(offset, len, self.len)?;
        let mut file = self.file.lock().map_err(|_| TransferError::Poisoned)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory payload.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
        check_range(offset, len, self.len())?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }
}

// ---------------------------------------------------------------------------
// WindowSource
// ---------------------------------------------------------------------------

/// A view of `[start, start + len)` of another source, re-based at zero.
///
/// Used to hand each parallel worker its own disjoint slice of the payload.
pub struct WindowSource {
    inner: Arc<dyn ByteSource>,
    start: u64,
    len: u64,
}

impl WindowSource {
    pub fn new(inner: Arc<dyn ByteSource>, start: u64, len: u64) -> Result<Self, TransferError> {
        let total = inner.len();
        if start.checked_add(len).is_none_or(|end| end > total) {
            return Err(TransferError::RangeOutOfBounds {
                offset: start,
                len: len as usize,
                total,
            });
        }
        Ok(Self { inner, start, len })
    }

    /// Offset of this window within the underlying source.
    pub fn start(&self) -> u64 {
        self.start
    }
}

impl ByteSource for WindowSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
        check_range(offset, len, self.len)?;
        self.inner.read_range(self.start + offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn file_source_reads_ranges_out_of_order() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.path(), path.as_path());
        assert_eq!(source.read_range(6, 4).unwrap(), b"6789");
        // Going backwards is what resuming after a conflict needs.
        assert_eq!(source.read_range(2, 3).unwrap(), b"234");
        assert_eq!(source.read_range(10, 0).unwrap(), b"");
    }

    #[test]
    fn file_source_rejects_out_of_bounds() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"abc");
        let source = FileSource::open(&path).unwrap();
        let err = source.read_range(2, 5).unwrap_err();
        assert!(matches!(
            err,
            TransferError::RangeOutOfBounds { offset: 2, len: 5, total: 3 }
        ));
    }

    #[test]
    fn empty_file_source() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let source = FileSource::open(&path).unwrap();
        assert!(source.is_empty());
    }

    #[test]
    fn file_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = FileSource::open(&dir.path().join("nope.bin"));
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn memory_source_reads() {
        let source = MemorySource::new(b"hello world".to_vec());
        assert_eq!(source.len(), 11);
        assert_eq!(source.read_range(6, 5).unwrap(), b"world");
        assert!(source.read_range(u64::MAX, 1).is_err());
    }

    #[test]
    fn window_source_rebases_offsets() {
        let inner: Arc<dyn ByteSource> = Arc::new(MemorySource::new(b"AABBCCDDEE".to_vec()));
        let window = WindowSource::new(Arc::clone(&inner), 4, 4).unwrap();
        assert_eq!(window.start(), 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window.read_range(0, 4).unwrap(), b"CCDD");
        assert_eq!(window.read_range(2, 2).unwrap(), b"DD");
        // Cannot read past the window even though the inner source has more.
        assert!(window.read_range(2, 3).is_err());
    }

    #[test]
    fn window_source_must_fit() {
        let inner: Arc<dyn ByteSource> = Arc::new(MemorySource::new(vec![0u8; 8]));
        assert!(WindowSource::new(Arc::clone(&inner), 4, 5).is_err());
        assert!(WindowSource::new(inner, 8, 0).is_ok());
    }
}
