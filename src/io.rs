use crate::{BlockSource, ProbeError, Result};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

#[cfg(target_os = "linux")]
mod blkdev {
    use rustix::fs::{FileType, fstat, ioctl_blksszget};
    use rustix::ioctl::{Getter, Opcode, ioctl, opcode};
    use std::fs::File;
    use std::io;

    /// `_IOR(0x12, 114, size_t)`
    const BLKGETSIZE64: Opcode = opcode::read::<usize>(0x12, 114);

    pub(super) fn is_block_device(file: &File) -> bool {
        fstat(file).is_ok_and(|st| FileType::from_raw_mode(st.st_mode).is_block_device())
    }

    pub(super) fn size(file: &File) -> io::Result<u64> {
        // SAFETY: BLKGETSIZE64 writes a single u64.
        let size = unsafe { ioctl(file, Getter::<BLKGETSIZE64, u64>::new())? };
        Ok(size)
    }

    pub(super) fn sector_size(file: &File) -> Option<u32> {
        ioctl_blksszget(file).ok().filter(|&s| s > 0)
    }
}

#[cfg(not(target_os = "linux"))]
mod blkdev {
    use std::fs::File;
    use std::io;

    pub(super) fn is_block_device(_file: &File) -> bool {
        false
    }

    pub(super) fn size(_file: &File) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "block device size not supported on this platform",
        ))
    }

    pub(super) fn sector_size(_file: &File) -> Option<u32> {
        None
    }
}

/// Positional reader over a regular file or a block device node.
pub struct DiskReader {
    file: File,
    size: Option<u64>,
    sector_size: Option<u32>,
}

impl DiskReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(false)
            .open(path)
            .map_err(|e| ProbeError::from_open(e, path))?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};
            let _ = fadvise(&file, 0, None, Advice::Random);
        }

        let (size, sector_size) = if blkdev::is_block_device(&file) {
            (
                blkdev::size(&file).ok().filter(|&s| s > 0),
                blkdev::sector_size(&file),
            )
        } else {
            let size = file.seek(SeekFrom::End(0)).ok().filter(|&s| s > 0);
            file.seek(SeekFrom::Start(0))?;
            (size, None)
        };
        tracing::debug!(path = %path.display(), ?size, ?sector_size, "opened disk reader");

        Ok(Self {
            file,
            size,
            sector_size,
        })
    }
}

impl BlockSource for DiskReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buffer.len() {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn size(&self) -> Result<u64> {
        self.size.ok_or_else(|| {
            ProbeError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "device size could not be determined",
            ))
        })
    }

    fn logical_sector_size(&self) -> Option<u32> {
        self.sector_size
    }
}

/// Memory-mapped image reader. Block device nodes cannot be mapped;
/// `Reader::new` falls back to `DiskReader` for those.
pub struct MmapReader {
    mmap: Mmap,
}

impl MmapReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| ProbeError::from_open(e, path))?;
        let size = file.seek(SeekFrom::End(0))?;

        if size == 0 {
            return Err(ProbeError::InvalidRequest("cannot mmap empty file".into()));
        }

        let mmap = unsafe { Mmap::map(&file) }?;

        if mmap.is_empty() {
            return Err(ProbeError::InvalidRequest(
                "mmap returned empty mapping (block device not supported)".into(),
            ));
        }

        #[cfg(target_os = "linux")]
        {
            let _ = mmap.advise(memmap2::Advice::Random);
        }

        Ok(Self { mmap })
    }

    #[inline]
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        if start >= self.mmap.len() {
            return None;
        }
        let end = start.saturating_add(len).min(self.mmap.len());
        Some(&self.mmap[start..end])
    }
}

impl BlockSource for MmapReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if let Some(slice) = self.slice(offset, buffer.len()) {
            let len = slice.len();
            buffer[..len].copy_from_slice(slice);
            Ok(len)
        } else {
            Ok(0)
        }
    }

    #[inline]
    fn size(&self) -> Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

/// In-memory image, used for buffers already read by the caller.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    data: Vec<u8>,
    size_known: bool,
    sector_size: Option<u32>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            size_known: true,
            sector_size: None,
        }
    }

    /// Hides the size from the engine, as with a pipe or a device whose
    /// size query failed.
    pub fn with_unknown_size(mut self) -> Self {
        self.size_known = false;
        self
    }

    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = Some(sector_size);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl BlockSource for MemoryReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.data.get(start..) else {
            return Ok(0);
        };
        let len = available.len().min(buffer.len());
        buffer[..len].copy_from_slice(&available[..len]);
        Ok(len)
    }

    fn size(&self) -> Result<u64> {
        if self.size_known {
            Ok(self.data.len() as u64)
        } else {
            Err(ProbeError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "size not available",
            )))
        }
    }

    fn logical_sector_size(&self) -> Option<u32> {
        self.sector_size
    }
}

pub enum Reader {
    Mmap(MmapReader),
    Disk(DiskReader),
}

impl Reader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        match MmapReader::new(path_ref) {
            Ok(r) => Ok(Reader::Mmap(r)),
            Err(ProbeError::NotFound(p)) => Err(ProbeError::NotFound(p)),
            Err(ProbeError::PermissionDenied(p)) => Err(ProbeError::PermissionDenied(p)),
            Err(_) => Ok(Reader::Disk(DiskReader::new(path_ref)?)),
        }
    }

    #[inline]
    pub fn is_mmap(&self) -> bool {
        matches!(self, Reader::Mmap(_))
    }
}

impl BlockSource for Reader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        match self {
            Reader::Mmap(r) => r.read_chunk(offset, buffer),
            Reader::Disk(r) => r.read_chunk(offset, buffer),
        }
    }

    #[inline]
    fn size(&self) -> Result<u64> {
        match self {
            Reader::Mmap(r) => r.size(),
            Reader::Disk(r) => r.size(),
        }
    }

    fn logical_sector_size(&self) -> Option<u32> {
        match self {
            Reader::Mmap(r) => r.logical_sector_size(),
            Reader::Disk(r) => r.logical_sector_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_reader_basic() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let test_data = b"Hello, World! This is test data for DiskReader.";
        temp_file.write_all(test_data).unwrap();
        temp_file.flush().unwrap();
        let mut reader = DiskReader::new(temp_file.path()).unwrap();

        assert_eq!(reader.size().unwrap(), test_data.len() as u64);

        let mut buffer = vec![0u8; 13];
        let bytes_read = reader.read_chunk(0, &mut buffer).unwrap();
        assert_eq!(bytes_read, 13);
        assert_eq!(&buffer, b"Hello, World!");
    }

    #[test]
    fn test_disk_reader_past_end() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"short").unwrap();
        temp_file.flush().unwrap();
        let mut reader = DiskReader::new(temp_file.path()).unwrap();

        let mut buffer = vec![0u8; 16];
        assert_eq!(reader.read_chunk(2, &mut buffer).unwrap(), 3);
        assert_eq!(reader.read_chunk(100, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_regular_file_is_not_a_block_device() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0u8; 4096]).unwrap();
        temp_file.flush().unwrap();
        assert!(!blkdev::is_block_device(temp_file.as_file()));
        assert!(blkdev::size(temp_file.as_file()).is_err());

        let reader = DiskReader::new(temp_file.path()).unwrap();
        assert_eq!(reader.size().unwrap(), 4096);
        assert_eq!(reader.logical_sector_size(), None);
    }

    #[test]
    fn test_empty_file_has_no_size() {
        let temp_file = NamedTempFile::new().unwrap();
        let reader = DiskReader::new(temp_file.path()).unwrap();
        assert!(reader.size().is_err());
    }

    #[test]
    fn test_disk_reader_missing_path() {
        let result = DiskReader::new("/nonexistent/blkprobe/device.img");
        assert!(matches!(result, Err(ProbeError::NotFound(_))));
    }

    #[test]
    fn test_mmap_reader_basic() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let test_data = b"Hello, World! This is test data for MmapReader.";
        temp_file.write_all(test_data).unwrap();
        temp_file.flush().unwrap();

        let reader = MmapReader::new(temp_file.path()).unwrap();
        assert_eq!(reader.size().unwrap(), test_data.len() as u64);

        let slice = reader.slice(0, 13).unwrap();
        assert_eq!(slice, b"Hello, World!");
    }

    #[test]
    fn test_mmap_reader_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let result = MmapReader::new(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_reader_falls_back_to_disk_for_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let reader = Reader::new(temp_file.path()).unwrap();
        assert!(!reader.is_mmap());
    }

    #[test]
    fn test_memory_reader_unknown_size() {
        let mut reader = MemoryReader::new(vec![7u8; 64]).with_unknown_size();
        assert!(reader.size().is_err());

        let mut buffer = [0u8; 8];
        assert_eq!(reader.read_chunk(60, &mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], &[7, 7, 7, 7]);
    }
}
