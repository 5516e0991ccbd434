//! F2FS superblock.

use super::{Findings, Format, Outcome};
use crate::checksum::crc32_raw;
use crate::codec::{le32, Fields};
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

const F2FS_MAGIC: u32 = 0xF2F5_2010;

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "f2fs",
    Usage::Filesystem,
    &[Magic::kb(&[0x10, 0x20, 0xF5, 0xF2], 1, 0)],
    Format::F2fs,
);

const SUPERBLOCK_SIZE: u64 = 0x47C;
const CHECKSUM_LIMIT: u64 = 4096;

#[derive(Debug, Clone)]
struct F2fsSuperblock {
    major_ver: u16,
    minor_ver: u16,
    log_blocksize: u32,
    checksum_offset: u32,
    block_count: u64,
    uuid: [u8; 16],
    volume_name: [u8; 1024],
}

impl F2fsSuperblock {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        Some(Self {
            major_ver: f.u16(0x04)?,
            minor_ver: f.u16(0x06)?,
            log_blocksize: f.u32(0x10)?,
            checksum_offset: f.u32(0x20)?,
            block_count: f.u64(0x24)?,
            uuid: f.array(0x6C)?,
            volume_name: f.array(0x7C)?,
        })
    }

    /// Version 1.0 predates the layout the remaining fields assume.
    fn is_legacy(&self) -> bool {
        self.major_ver == 1 && self.minor_ver == 0
    }
}

/// CRC over the superblock up to `checksum_offset`, compared with the
/// value stored there. No checksum offset means nothing to verify.
fn checksum_matches(ctx: &mut ProbeContext<'_>, base: u64, csum_off: u32) -> crate::Result<bool> {
    let csum_off = u64::from(csum_off);
    if csum_off == 0 {
        return Ok(true);
    }
    if csum_off % 4 != 0 || csum_off + 4 > CHECKSUM_LIMIT {
        return Ok(false);
    }
    let Some(raw) = ctx.try_fetch(base, csum_off + 4)? else {
        return Ok(false);
    };
    let (covered, stored) = raw.split_at(csum_off as usize);
    Ok(le32(stored, 0) == Some(crc32_raw(F2FS_MAGIC, covered)))
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(sb) = ctx
        .try_fetch(hit.base, SUPERBLOCK_SIZE)?
        .and_then(F2fsSuperblock::parse)
    else {
        return Ok(None);
    };
    if sb.is_legacy() {
        return Ok(Some(Findings::new()));
    }
    let matches = checksum_matches(ctx, hit.base, sb.checksum_offset)?;
    if !ctx.checksum_ok(matches) {
        tracing::debug!(offset = sb.checksum_offset, "f2fs: checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_utf16_label(&sb.volume_name, Endianness::Little);
    out.set_uuid(&sb.uuid);
    out.set_version(format!("{}.{}", sb.major_ver, sb.minor_ver));
    if sb.log_blocksize < 32 {
        let block_size = 1u32 << sb.log_blocksize;
        out.block_size = Some(block_size);
        out.fs_size = sb.block_count.checked_mul(u64::from(block_size));
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        let mut raw = vec![0u8; SUPERBLOCK_SIZE as usize];
        raw[0..4].copy_from_slice(&F2FS_MAGIC.to_le_bytes());
        raw[4..6].copy_from_slice(&1u16.to_le_bytes());
        let sb = F2fsSuperblock::parse(&raw).unwrap();
        assert!(sb.is_legacy());

        raw[6..8].copy_from_slice(&15u16.to_le_bytes());
        raw[0x10..0x14].copy_from_slice(&12u32.to_le_bytes());
        let sb = F2fsSuperblock::parse(&raw).unwrap();
        assert!(!sb.is_legacy());
        assert_eq!(sb.log_blocksize, 12);
    }
}
