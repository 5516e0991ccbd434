//! ext2/ext3/ext4 and external ext journals (jbd).
//!
//! All four share one superblock and one magic; the flavour is decided by
//! feature bits, and the descriptors are registered newest first.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::Usage;

const EXT_MAGIC: &[Magic] = &[Magic::kb(&[0x53, 0xEF], 1, 0x38)];

pub(crate) const EXT4_DESCRIPTOR: Descriptor =
    Descriptor::new("ext4", Usage::Filesystem, EXT_MAGIC, Format::Ext4);
pub(crate) const EXT3_DESCRIPTOR: Descriptor =
    Descriptor::new("ext3", Usage::Filesystem, EXT_MAGIC, Format::Ext3);
pub(crate) const EXT2_DESCRIPTOR: Descriptor =
    Descriptor::new("ext2", Usage::Filesystem, EXT_MAGIC, Format::Ext2);
pub(crate) const JBD_DESCRIPTOR: Descriptor =
    Descriptor::new("jbd", Usage::Other, EXT_MAGIC, Format::Jbd);

/// Superblock magic, also checked by formats that must not claim an ext
/// volume.
pub(crate) const EXT_SUPER_MAGIC: u16 = 0xEF53;
pub(crate) const SUPERBLOCK_OFFSET: u64 = 1024;
const SUPERBLOCK_SIZE: u64 = 1024;

const COMPAT_HAS_JOURNAL: u32 = 0x0004;

const INCOMPAT_FILETYPE: u32 = 0x0002;
const INCOMPAT_RECOVER: u32 = 0x0004;
const INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
const INCOMPAT_META_BG: u32 = 0x0010;
const INCOMPAT_64BIT: u32 = 0x0080;

const RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
const RO_COMPAT_LARGE_FILE: u32 = 0x0002;
const RO_COMPAT_BTREE_DIR: u32 = 0x0004;

const EXT2_INCOMPAT_SUPP: u32 = INCOMPAT_FILETYPE | INCOMPAT_META_BG;
const EXT3_INCOMPAT_SUPP: u32 = INCOMPAT_FILETYPE | INCOMPAT_RECOVER | INCOMPAT_META_BG;
const EXT23_RO_COMPAT_SUPP: u32 =
    RO_COMPAT_SPARSE_SUPER | RO_COMPAT_LARGE_FILE | RO_COMPAT_BTREE_DIR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    Ext4,
    Ext3,
    Ext2,
    Jbd,
}

#[derive(Debug, Clone)]
struct ExtSuperblock {
    block_count: u64,
    log_block_size: u32,
    minor_rev_level: u16,
    rev_level: u32,
    feature_compat: u32,
    feature_incompat: u32,
    feature_ro_compat: u32,
    uuid: [u8; 16],
    volume_name: [u8; 16],
    journal_uuid: [u8; 16],
}

impl ExtSuperblock {
    fn parse(data: &[u8]) -> Option<Self> {
        let f = Fields::le(data);
        if f.u16(0x38)? != EXT_SUPER_MAGIC {
            return None;
        }
        let incompat = f.u32(0x60)?;
        let lo = u64::from(f.u32(0x04)?);
        let hi = if incompat & INCOMPAT_64BIT != 0 {
            u64::from(f.u32(0x150)?)
        } else {
            0
        };
        Some(Self {
            block_count: hi << 32 | lo,
            log_block_size: f.u32(0x18)?,
            minor_rev_level: f.u16(0x3E)?,
            rev_level: f.u32(0x4C)?,
            feature_compat: f.u32(0x5C)?,
            feature_incompat: incompat,
            feature_ro_compat: f.u32(0x64)?,
            uuid: f.array(0x68)?,
            volume_name: f.array(0x78)?,
            journal_uuid: f.array(0xD0)?,
        })
    }

    fn block_size(&self) -> Option<u32> {
        (self.log_block_size <= 6).then(|| 1024u32 << self.log_block_size)
    }

    fn has_journal(&self) -> bool {
        self.feature_compat & COMPAT_HAS_JOURNAL != 0
    }

    fn needs_newer_than(&self, incompat_supp: u32) -> bool {
        self.feature_ro_compat & !EXT23_RO_COMPAT_SUPP != 0
            || self.feature_incompat & !incompat_supp != 0
    }

    fn is(&self, flavor: Flavor) -> bool {
        let journal_dev = self.feature_incompat & INCOMPAT_JOURNAL_DEV != 0;
        match flavor {
            Flavor::Jbd => journal_dev,
            Flavor::Ext4 => !journal_dev && self.needs_newer_than(EXT3_INCOMPAT_SUPP),
            Flavor::Ext3 => self.has_journal() && !self.needs_newer_than(EXT3_INCOMPAT_SUPP),
            Flavor::Ext2 => !self.has_journal() && !self.needs_newer_than(EXT2_INCOMPAT_SUPP),
        }
    }
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate, flavor: Flavor) -> Outcome {
    let Some(sb) = ctx
        .try_fetch(hit.base, SUPERBLOCK_SIZE)?
        .and_then(ExtSuperblock::parse)
    else {
        return Ok(None);
    };
    if !sb.is(flavor) {
        return Ok(None);
    }
    let Some(block_size) = sb.block_size() else {
        tracing::debug!(log = sb.log_block_size, "ext: block size out of range");
        return Ok(None);
    };

    let mut out = Findings::new();
    out.set_label(&sb.volume_name);
    out.set_uuid(&sb.uuid);
    if sb.has_journal() {
        out.log_uuid = super::dce_uuid(&sb.journal_uuid);
    }
    out.set_version(format!("{}.{}", sb.rev_level, sb.minor_rev_level));
    out.block_size = Some(block_size);
    out.fs_size = sb.block_count.checked_mul(u64::from(block_size));
    match flavor {
        Flavor::Ext3 => out.set_extra("SEC_TYPE", "ext2"),
        Flavor::Jbd => out.log_uuid = super::dce_uuid(&sb.uuid),
        _ => {}
    }
    Ok(Some(out))
}

/// True if an ext superblock magic sits where ext would put it.
pub(crate) fn has_ext_magic(ctx: &mut ProbeContext<'_>) -> crate::Result<bool> {
    Ok(ctx
        .try_fetch(SUPERBLOCK_OFFSET + 0x38, 2)?
        .and_then(|b| Fields::le(b).u16(0))
        == Some(EXT_SUPER_MAGIC))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn superblock(compat: u32, incompat: u32, ro_compat: u32) -> Vec<u8> {
        let mut sb = vec![0u8; 1024];
        sb[0x38..0x3A].copy_from_slice(&EXT_SUPER_MAGIC.to_le_bytes());
        sb[0x5C..0x60].copy_from_slice(&compat.to_le_bytes());
        sb[0x60..0x64].copy_from_slice(&incompat.to_le_bytes());
        sb[0x64..0x68].copy_from_slice(&ro_compat.to_le_bytes());
        sb
    }

    fn flavors(raw: &[u8]) -> Vec<Flavor> {
        let sb = ExtSuperblock::parse(raw).unwrap();
        [Flavor::Ext4, Flavor::Ext3, Flavor::Ext2, Flavor::Jbd]
            .into_iter()
            .filter(|f| sb.is(*f))
            .collect()
    }

    #[test]
    fn test_feature_classification() {
        assert_eq!(flavors(&superblock(0, INCOMPAT_FILETYPE, 0x3)), vec![Flavor::Ext2]);
        assert_eq!(
            flavors(&superblock(COMPAT_HAS_JOURNAL, INCOMPAT_FILETYPE, 0x3)),
            vec![Flavor::Ext3]
        );
        // extents + flex_bg
        assert_eq!(
            flavors(&superblock(COMPAT_HAS_JOURNAL, INCOMPAT_FILETYPE | 0x40 | 0x200, 0x3)),
            vec![Flavor::Ext4]
        );
        assert_eq!(
            flavors(&superblock(0, INCOMPAT_JOURNAL_DEV, 0)),
            vec![Flavor::Jbd]
        );
    }

    #[test]
    fn test_block_size_bounds() {
        let mut raw = superblock(0, 0, 0);
        raw[0x18] = 2;
        assert_eq!(ExtSuperblock::parse(&raw).unwrap().block_size(), Some(4096));
        raw[0x18] = 40;
        assert_eq!(ExtSuperblock::parse(&raw).unwrap().block_size(), None);
    }

    #[test]
    fn test_wrong_magic() {
        let mut raw = superblock(0, 0, 0);
        raw[0x38] = 0;
        assert!(ExtSuperblock::parse(&raw).is_none());
    }
}
