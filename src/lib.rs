//! Identification of filesystems, RAID members and encrypted containers
//! from the raw contents of a block device or image.

pub mod checksum;
pub mod codec;
pub mod context;
mod error;
pub mod io;
pub mod matcher;
pub mod options;
pub mod probe;
pub mod signature;
pub mod superblocks;
mod traits;
mod types;

pub use context::ProbeContext;
pub use error::{ProbeError, Result};
pub use io::{DiskReader, MemoryReader, MmapReader, Reader};
pub use matcher::Candidate;
pub use options::{ProbeOptions, TypeFilter, UsageFilter};
pub use probe::{probe_bytes, Prober};
pub use signature::{lookup, registry, Descriptor, Magic, MagicBase};
pub use superblocks::Findings;
pub use traits::BlockSource;
pub use types::{Endianness, MagicLocation, ProbeRecord, Usage, Verdict, VolumeId};
