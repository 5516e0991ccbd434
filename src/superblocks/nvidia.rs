//! NVIDIA MediaShield RAID member metadata, two sectors before the end.

use super::{Findings, Format, Outcome};
use crate::checksum::sum32_le;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::Descriptor;
use crate::types::Usage;

pub(crate) const DESCRIPTOR: Descriptor =
    Descriptor::new("nvidia_raid_member", Usage::Raid, &[], Format::NvidiaRaid).min_size(0x10000);

const SIGNATURE: &[u8] = b"NVIDIA  ";
const SECTOR: u64 = 0x200;
/// Metadata size in bytes; the header stores it in dwords.
const METADATA_SIZE: u64 = 120;

#[derive(Debug, Clone)]
struct NvMetadata {
    size: u32,
    version: u16,
}

impl NvMetadata {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        if f.bytes(0, SIGNATURE.len())? != SIGNATURE {
            return None;
        }
        Some(Self {
            size: f.u32(8)?,
            version: f.u16(16)?,
        })
    }
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(off) = ctx
        .size()
        .and_then(|s| (s / SECTOR).checked_sub(2))
        .map(|n| n * SECTOR)
    else {
        return Ok(None);
    };
    let Some(raw) = ctx.try_fetch(off, METADATA_SIZE)? else {
        return Ok(None);
    };
    let Some(nv) = NvMetadata::parse(raw) else {
        return Ok(None);
    };
    if u64::from(nv.size) != METADATA_SIZE / 4 {
        return Ok(None);
    }
    // dwords including the checksum field sum to zero
    let sum = sum32_le(raw);
    if !ctx.checksum_ok(sum == 0) {
        tracing::debug!(sum, "nvidia raid: checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_version(nv.version.to_string());
    out.set_magic(off, SIGNATURE);
    Ok(Some(out))
}
