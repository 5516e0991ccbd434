//! JMicron RAID member metadata in the last sector.

use super::{Findings, Format, Outcome};
use crate::checksum::sum16_le;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::Descriptor;
use crate::types::Usage;

pub(crate) const DESCRIPTOR: Descriptor =
    Descriptor::new("jmicron_raid_member", Usage::Raid, &[], Format::JmicronRaid)
        .min_size(0x10000);

const SIGNATURE: &[u8] = b"JM";
const SECTOR: u64 = 0x200;
/// Highest defined array mode (JBOD spanning).
const MAX_MODE: u8 = 5;

#[derive(Debug, Clone)]
struct JmMetadata {
    minor_version: u8,
    major_version: u8,
    mode: u8,
}

impl JmMetadata {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        if f.bytes(0, SIGNATURE.len())? != SIGNATURE {
            return None;
        }
        let version = f.u16(2)?;
        Some(Self {
            minor_version: (version & 0xff) as u8,
            major_version: (version >> 8) as u8,
            mode: f.u8(0x30)?,
        })
    }
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
    let Some(jm) = JmMetadata::parse(raw) else {
        return Ok(None);
    };
    let sum = sum16_le(&raw[..128]);
    if !ctx.checksum_ok(sum <= 1) {
        tracing::debug!(sum, "jmicron raid: checksum mismatch");
        return Ok(None);
    }
    if jm.mode > MAX_MODE {
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_version(format!("{}.{}", jm.major_version, jm.minor_version));
    out.set_magic(off, SIGNATURE);
    Ok(Some(out))
}
