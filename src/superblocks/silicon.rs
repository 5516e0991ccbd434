//! Silicon Image Medley RAID member metadata in the last sector.

use super::{Findings, Format, Outcome};
use crate::checksum::sum16_le;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::Descriptor;
use crate::types::Usage;

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "silicon_medley_raid_member",
    Usage::Raid,
    &[],
    Format::SiliconRaid,
)
.min_size(0x10000);

const SILICON_MAGIC: u32 = 0x2F00_0000;
const SECTOR: u64 = 0x200;

const MAGIC_OFFSET: usize = 0x60;
const CHECKSUM_OFFSET: usize = 0x16E;
const MAX_DISKS: u8 = 8;

#[derive(Debug, Clone)]
struct SilMetadata {
    magic: u32,
    minor_ver: u16,
    major_ver: u16,
    disk_number: u8,
    checksum1: u16,
}

impl SilMetadata {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        Some(Self {
            magic: f.u32(MAGIC_OFFSET)?,
            minor_ver: f.u16(0x11A)?,
            major_ver: f.u16(0x11C)?,
            disk_number: f.u8(0x139)?,
            checksum1: f.u16(CHECKSUM_OFFSET)?,
        })
    }
}

/// Two's complement of the 16-bit sum of the words before `checksum1`.
fn expected_checksum(raw: &[u8]) -> u16 {
    sum16_le(&raw[..CHECKSUM_OFFSET]).wrapping_neg()
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(off) = ctx
        .size()
        .and_then(|s| (s / SECTOR).checked_sub(1))
        .map(|n| n * SECTOR)
    else {
        return Ok(None);
    };
    let Some(raw) = ctx.try_fetch(off, SECTOR)? else {
        return Ok(None);
    };
    let Some(sil) = SilMetadata::parse(raw) else {
        return Ok(None);
    };
    if sil.magic != SILICON_MAGIC || sil.disk_number >= MAX_DISKS {
        return Ok(None);
    }
    let expected = expected_checksum(raw);
    if !ctx.checksum_ok(expected == sil.checksum1) {
        tracing::debug!(expected, stored = sil.checksum1, "silicon raid: checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_version(format!("{}.{}", sil.major_ver, sil.minor_ver));
    out.set_magic(off + MAGIC_OFFSET as u64, &SILICON_MAGIC.to_le_bytes());
    Ok(Some(out))
}
