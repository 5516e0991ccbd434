//! Probe context: the device under examination plus its buffer cache.

use crate::{BlockSource, ProbeError, Result};

/// Upper bound on a single fetch. Header sizes derived from on-disk fields
/// are clamped well below this by the probes; this only stops a corrupt
/// value from turning into a huge allocation.
pub const MAX_FETCH_LEN: u64 = 16 * 1024 * 1024;

/// Cache limits for one pass. Past either one the oldest buffers are
/// dropped, so long directory walks cannot pin the whole device in memory.
pub const MAX_CACHED_BUFFERS: usize = 64;
pub const MAX_CACHED_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug)]
struct CachedBuffer {
    offset: u64,
    data: Vec<u8>,
}

impl CachedBuffer {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    fn covers(&self, offset: u64, end: u64) -> bool {
        offset >= self.offset && end <= self.end()
    }
}

/// State carried through one probe pass over one device.
///
/// Byte ranges read from the device are kept for the rest of the pass, so
/// probes that look at the same sectors (all the boot-sector formats do)
/// cost a single read. The cache is bounded by [`MAX_CACHED_BUFFERS`] and
/// [`MAX_CACHED_BYTES`]; the oldest buffers go first.
pub struct ProbeContext<'a> {
    source: &'a mut dyn BlockSource,
    size: Option<u64>,
    sector_size: Option<u32>,
    buffers: Vec<CachedBuffer>,
    reads: usize,
    verify_checksums: bool,
}

impl<'a> ProbeContext<'a> {
    pub fn new(source: &'a mut dyn BlockSource) -> Self {
        let size = match source.size() {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::warn!(error = %e, "device size unavailable, end-relative probes disabled");
                None
            }
        };
        let sector_size = source.logical_sector_size();
        Self {
            source,
            size,
            sector_size,
            buffers: Vec::new(),
            reads: 0,
            verify_checksums: true,
        }
    }

    pub(crate) fn with_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Device size in bytes, if the source could report it.
    #[inline]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    #[inline]
    pub fn sector_size(&self) -> Option<u32> {
        self.sector_size
    }

    /// Number of reads issued to the underlying source so far.
    #[inline]
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn cached_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len()).sum()
    }

    /// Drops every cached buffer; the next fetch goes to the device.
    pub fn reset(&mut self) {
        self.buffers.clear();
    }

    /// Accepts a checksum comparison, or anything when verification has
    /// been switched off in the options.
    #[inline]
    pub fn checksum_ok(&self, matches: bool) -> bool {
        matches || !self.verify_checksums
    }

    /// Returns `len` bytes at `offset`, reading the device only if no
    /// cached buffer already covers the range.
    pub fn fetch(&mut self, offset: u64, len: u64) -> Result<&[u8]> {
        if len == 0 {
            return Err(ProbeError::InvalidRequest(format!(
                "zero-length read at offset {offset}"
            )));
        }
        if len > MAX_FETCH_LEN {
            return Err(ProbeError::InvalidRequest(format!(
                "read of {len} bytes exceeds the {MAX_FETCH_LEN} byte limit"
            )));
        }
        let end = offset.checked_add(len).ok_or_else(|| {
            ProbeError::InvalidRequest(format!("offset {offset} + {len} overflows"))
        })?;
        if let Some(size) = self.size {
            if end > size {
                return Err(ProbeError::OutOfRange { offset, len, size });
            }
        }

        let idx = match self.buffers.iter().rposition(|b| b.covers(offset, end)) {
            Some(idx) => idx,
            None => self.read_range(offset, len)?,
        };

        let buffer = &self.buffers[idx];
        let start = (offset - buffer.offset) as usize;
        Ok(&buffer.data[start..start + len as usize])
    }

    /// Like [`fetch`](Self::fetch), but a range that is simply not there
    /// (past the end, short read) comes back as `None`. Only genuine I/O
    /// failures remain errors.
    pub fn try_fetch(&mut self, offset: u64, len: u64) -> Result<Option<&[u8]>> {
        match self.fetch(offset, len) {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.is_soft() => {
                tracing::trace!(offset, len, error = %e, "range not available");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// `len` bytes starting `back` bytes before the end of the device.
    pub fn try_fetch_from_end(&mut self, back: u64, len: u64) -> Result<Option<&[u8]>> {
        let Some(offset) = self.size.and_then(|s| s.checked_sub(back)) else {
            return Ok(None);
        };
        self.try_fetch(offset, len)
    }

    fn read_range(&mut self, offset: u64, len: u64) -> Result<usize> {
        let mut data = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = self
                .source
                .read_chunk(offset + filled as u64, &mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.reads += 1;
        tracing::trace!(offset, len, filled, "device read");

        if filled < data.len() {
            return Err(ProbeError::ShortRead {
                offset,
                expected: data.len(),
                actual: filled,
            });
        }

        let end = offset + len;
        self.buffers
            .retain(|b| !(b.offset >= offset && b.end() <= end));
        self.evict_for(data.len());
        self.buffers.push(CachedBuffer { offset, data });
        Ok(self.buffers.len() - 1)
    }

    /// Makes room for a new buffer of `incoming` bytes.
    fn evict_for(&mut self, incoming: usize) {
        let mut total = self.cached_bytes() + incoming;
        let mut evicted = 0;
        while evicted < self.buffers.len()
            && (self.buffers.len() - evicted >= MAX_CACHED_BUFFERS || total > MAX_CACHED_BYTES)
        {
            total -= self.buffers[evicted].data.len();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::trace!(evicted, "buffer cache full");
            self.buffers.drain(..evicted);
        }
    }
}
