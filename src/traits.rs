//! The port through which the engine reaches storage.
//!
//! Opening devices, measuring them and dropping privileges are the
//! caller's business; the engine only asks for bytes at an offset.

use crate::error::Result;

/// A source of raw block data, typically a disk, a partition or an image file.
///
/// # Example
///
/// ```ignore
/// struct DiskDevice { /* ... */ }
///
/// impl BlockSource for DiskDevice {
///     fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
///         // Read from the device at offset
///     }
///
///     fn size(&self) -> Result<u64> {
///         // Total size in bytes
///     }
/// }
/// ```
pub trait BlockSource {
    /// Reads data from the source at the specified offset.
    ///
    /// # Returns
    ///
    /// The number of bytes actually read. Fewer than `buffer.len()` bytes
    /// (including zero) means the end of the source was reached.
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Returns the total size of the source in bytes.
    ///
    /// An error here is not fatal to a probe pass: end-relative
    /// signatures are skipped and everything else is still tried.
    fn size(&self) -> Result<u64>;

    /// Logical sector size reported by the device, if any.
    fn logical_sector_size(&self) -> Option<u32> {
        None
    }
}

impl<T: BlockSource + ?Sized> BlockSource for &mut T {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_chunk(offset, buffer)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn logical_sector_size(&self) -> Option<u32> {
        (**self).logical_sector_size()
    }
}

impl<T: BlockSource + ?Sized> BlockSource for Box<T> {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_chunk(offset, buffer)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn logical_sector_size(&self) -> Option<u32> {
        (**self).logical_sector_size()
    }
}
