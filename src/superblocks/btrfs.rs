//! Btrfs primary superblock.

use super::{Findings, Format, Outcome};
use crate::checksum::crc32c;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::Usage;

const BTRFS_MAGIC: &[u8] = b"_BHRfS_M";

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "btrfs",
    Usage::Filesystem,
    &[Magic::kb(BTRFS_MAGIC, 64, 0x40)],
    Format::Btrfs,
)
.min_size(1024 * 1024);

pub const SUPERBLOCK_SIZE: u64 = 4096;

const CSUM_SIZE: usize = 32;
const CSUM_TYPE_CRC32C: u16 = 0;

#[derive(Debug, Clone)]
pub struct BtrfsSuperblock {
    pub csum: u32,
    pub fsid: [u8; 16],
    pub total_bytes: u64,
    pub sectorsize: u32,
    pub nodesize: u32,
    pub csum_type: u16,
    pub dev_uuid: [u8; 16],
    pub label: [u8; 256],
}

impl BtrfsSuperblock {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let f = Fields::le(data);
        Some(Self {
            csum: f.u32(0)?,
            fsid: f.array(32)?,
            total_bytes: f.u64(112)?,
            sectorsize: f.u32(144)?,
            nodesize: f.u32(148)?,
            csum_type: f.u16(196)?,
            dev_uuid: f.array(267)?,
            label: f.array(299)?,
        })
    }
}

/// Only crc32c superblocks can be verified; other checksum types pass.
fn checksum_matches(sb: &BtrfsSuperblock, raw: &[u8]) -> bool {
    sb.csum_type != CSUM_TYPE_CRC32C || raw.get(CSUM_SIZE..).map(crc32c) == Some(sb.csum)
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(raw) = ctx.try_fetch(hit.base, SUPERBLOCK_SIZE)? else {
        return Ok(None);
    };
    let Some(sb) = BtrfsSuperblock::parse(raw) else {
        return Ok(None);
    };
    let csum_ok = checksum_matches(&sb, raw);
    if !ctx.checksum_ok(csum_ok) {
        tracing::debug!(csum = sb.csum, "btrfs: superblock checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_label(&sb.label);
    out.set_uuid(&sb.fsid);
    out.uuid_sub = super::dce_uuid(&sb.dev_uuid);
    out.block_size = Some(sb.sectorsize);
    out.fs_size = Some(sb.total_bytes);
    Ok(Some(out))
}
