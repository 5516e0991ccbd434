//! Compiled-in signature table.
//!
//! The order of [`registry`] is part of the contract: a format whose
//! header can be mistaken for another's is listed before it, and the
//! first candidate whose probe accepts the device wins.

use crate::superblocks::{self, Format};
use crate::types::{Endianness, Usage};

/// How the offset of a magic pattern is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicBase {
    /// The in-block offset is a plain byte offset from the device start.
    Absolute,
    /// Header starts this many KiB from the device start.
    KbFromStart(u64),
    /// Header starts this many KiB before the device end.
    KbFromEnd(u64),
}

/// One byte pattern that identifies a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Magic {
    pub bytes: &'static [u8],
    pub base: MagicBase,
    /// Byte offset of the pattern from the header base.
    pub sb_offset: u64,
    /// Byte order implied by this particular pattern, for formats that
    /// exist in both orders.
    pub hint: Option<Endianness>,
}

impl Magic {
    pub const fn at(bytes: &'static [u8], offset: u64) -> Self {
        Self {
            bytes,
            base: MagicBase::Absolute,
            sb_offset: offset,
            hint: None,
        }
    }

    pub const fn kb(bytes: &'static [u8], kb: u64, sb_offset: u64) -> Self {
        Self {
            bytes,
            base: MagicBase::KbFromStart(kb),
            sb_offset,
            hint: None,
        }
    }

    pub const fn kb_from_end(bytes: &'static [u8], kb: u64, sb_offset: u64) -> Self {
        Self {
            bytes,
            base: MagicBase::KbFromEnd(kb),
            sb_offset,
            hint: None,
        }
    }

    pub const fn with_hint(mut self, order: Endianness) -> Self {
        self.hint = Some(order);
        self
    }

    /// Start of the header this magic belongs to. End-relative magics need
    /// the device size; `None` means the magic cannot be located.
    pub fn header_base(&self, size: Option<u64>) -> Option<u64> {
        match self.base {
            MagicBase::Absolute => Some(0),
            MagicBase::KbFromStart(kb) => kb.checked_mul(1024),
            MagicBase::KbFromEnd(kb) => size?.checked_sub(kb.checked_mul(1024)?),
        }
    }

    /// Absolute device offset of the pattern.
    pub fn location(&self, size: Option<u64>) -> Option<u64> {
        self.header_base(size)?.checked_add(self.sb_offset)
    }
}

/// A recognized format: its name, what it is used for, how to spot it and
/// which probe confirms it.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub usage: Usage,
    /// Empty for formats found by size alone.
    pub magics: &'static [Magic],
    /// Devices smaller than this are never handed to the probe.
    pub min_size: u64,
    /// May legitimately coexist with another filesystem signature.
    pub tolerant: bool,
    pub(crate) format: Format,
}

impl Descriptor {
    pub(crate) const fn new(
        name: &'static str,
        usage: Usage,
        magics: &'static [Magic],
        format: Format,
    ) -> Self {
        Self {
            name,
            usage,
            magics,
            min_size: 0,
            tolerant: false,
            format,
        }
    }

    pub(crate) const fn min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    pub(crate) const fn tolerant(mut self) -> Self {
        self.tolerant = true;
        self
    }

    /// Size-gated descriptor with no magic of its own.
    #[must_use]
    pub fn is_magicless(&self) -> bool {
        self.magics.is_empty()
    }
}

static REGISTRY: [Descriptor; 31] = [
    superblocks::silicon::DESCRIPTOR,
    superblocks::nvidia::DESCRIPTOR,
    superblocks::jmicron::DESCRIPTOR,
    superblocks::drbd::DESCRIPTOR,
    superblocks::lvm::DESCRIPTOR,
    superblocks::lvm::LVM1_DESCRIPTOR,
    superblocks::dm::SNAPSHOT_COW_DESCRIPTOR,
    superblocks::dm::VERITY_DESCRIPTOR,
    superblocks::dm::INTEGRITY_DESCRIPTOR,
    superblocks::ubi::DESCRIPTOR,
    superblocks::bitlocker::DESCRIPTOR,
    superblocks::vfat::DESCRIPTOR,
    superblocks::swap::SWSUSPEND_DESCRIPTOR,
    superblocks::swap::DESCRIPTOR,
    superblocks::xfs::DESCRIPTOR,
    superblocks::xfs::LOG_DESCRIPTOR,
    superblocks::xfs::EXFS_DESCRIPTOR,
    superblocks::ext::EXT4_DESCRIPTOR,
    superblocks::ext::EXT3_DESCRIPTOR,
    superblocks::ext::EXT2_DESCRIPTOR,
    superblocks::ext::JBD_DESCRIPTOR,
    superblocks::udf::DESCRIPTOR,
    superblocks::iso9660::DESCRIPTOR,
    superblocks::zfs::DESCRIPTOR,
    superblocks::ntfs::DESCRIPTOR,
    superblocks::minix::DESCRIPTOR,
    superblocks::btrfs::DESCRIPTOR,
    superblocks::befs::DESCRIPTOR,
    superblocks::nilfs::DESCRIPTOR,
    superblocks::exfat::DESCRIPTOR,
    superblocks::f2fs::DESCRIPTOR,
];

/// Every known format, in probing order.
pub fn registry() -> &'static [Descriptor] {
    &REGISTRY
}

/// Finds a descriptor by its format name.
pub fn lookup(name: &str) -> Option<&'static Descriptor> {
    REGISTRY.iter().find(|d| d.name == name)
}
