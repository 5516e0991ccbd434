//! NILFS2. The probe has no magic of its own: it reads the primary
//! superblock and the backup near the device end and keeps the newer
//! valid one.

use super::{Findings, Format, Outcome};
use crate::checksum::crc32_raw;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::Descriptor;
use crate::types::Usage;

pub(crate) const DESCRIPTOR: Descriptor =
    Descriptor::new("nilfs2", Usage::Filesystem, &[], Format::Nilfs2).min_size(1024 * 1024);

const NILFS_SB_MAGIC: u16 = 0x3434;
const PRIMARY_OFFSET: u64 = 0x400;
const SUPERBLOCK_SIZE: usize = 1024;

const MAGIC_OFFSET: usize = 6;
const SUM_OFFSET: usize = 16;

fn backup_offset(size: u64) -> Option<u64> {
    (size / 0x200).checked_sub(8).map(|n| n * 0x200)
}

#[derive(Debug, Clone)]
struct NilfsSuperblock {
    rev_level: u32,
    log_block_size: u32,
    dev_size: u64,
    last_cno: u64,
    uuid: [u8; 16],
    volume_name: [u8; 80],
}

impl NilfsSuperblock {
    /// Parses and checks magic and checksum. `verify` decides what a
    /// checksum mismatch means.
    fn parse_valid(raw: &[u8], verify: impl Fn(bool) -> bool) -> Option<Self> {
        let f = Fields::le(raw);
        if f.u16(MAGIC_OFFSET)? != NILFS_SB_MAGIC {
            return None;
        }
        let bytes = usize::from(f.u16(8)?);
        let crc_start = SUM_OFFSET + 4;
        if bytes < crc_start || bytes > SUPERBLOCK_SIZE {
            return None;
        }
        // s_sum itself is summed as zeros
        let mut crc = crc32_raw(f.u32(12)?, raw.get(..SUM_OFFSET)?);
        crc = crc32_raw(crc, &[0; 4]);
        crc = crc32_raw(crc, raw.get(crc_start..bytes)?);
        if !verify(crc == f.u32(SUM_OFFSET)?) {
            return None;
        }
        Some(Self {
            rev_level: f.u32(0)?,
            log_block_size: f.u32(20)?,
            dev_size: f.u64(32)?,
            last_cno: f.u64(56)?,
            uuid: f.array(152)?,
            volume_name: f.array(168)?,
        })
    }
}

fn read_valid(ctx: &mut ProbeContext<'_>, offset: u64) -> crate::Result<Option<NilfsSuperblock>> {
    let unverified = ctx.checksum_ok(false);
    Ok(ctx
        .try_fetch(offset, SUPERBLOCK_SIZE as u64)?
        .and_then(|raw| NilfsSuperblock::parse_valid(raw, |ok| ok || unverified)))
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let primary = read_valid(ctx, PRIMARY_OFFSET)?;
    let backup_at = ctx.size().and_then(backup_offset);
    let backup = match backup_at {
        Some(off) => read_valid(ctx, off)?,
        None => None,
    };
    tracing::debug!(
        primary = primary.is_some(),
        backup = backup.is_some(),
        "nilfs2: superblock validity"
    );

    // Both copies valid: the one with the later checkpoint number is
    // current, since the backup is only rewritten at segment boundaries.
    let (sb, offset) = match (primary, backup, backup_at) {
        (Some(p), Some(b), Some(off)) if b.last_cno > p.last_cno => (b, off),
        (Some(p), _, _) => (p, PRIMARY_OFFSET),
        (None, Some(b), Some(off)) => (b, off),
        _ => return Ok(None),
    };

    let mut out = Findings::new();
    out.set_label(&sb.volume_name);
    out.set_uuid(&sb.uuid);
    out.set_version(sb.rev_level.to_string());
    out.set_magic(offset + MAGIC_OFFSET as u64, &NILFS_SB_MAGIC.to_le_bytes());
    if sb.log_block_size < 22 {
        out.block_size = Some(1024 << sb.log_block_size);
    }
    if sb.dev_size != 0 {
        out.fs_size = Some(sb.dev_size);
    }
    Ok(Some(out))
}
