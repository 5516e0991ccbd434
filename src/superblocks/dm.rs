//! Device-mapper on-disk targets: snapshot exception stores, dm-verity
//! hash devices and dm-integrity.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::Usage;

pub(crate) const SNAPSHOT_COW_DESCRIPTOR: Descriptor = Descriptor::new(
    "DM_snapshot_cow",
    Usage::Other,
    &[Magic::at(b"SnAp", 0)],
    Format::SnapshotCow,
);

pub(crate) const VERITY_DESCRIPTOR: Descriptor = Descriptor::new(
    "DM_verity_hash",
    Usage::Crypto,
    &[Magic::at(b"verity\0\0", 0)],
    Format::VerityHash,
);

pub(crate) const INTEGRITY_DESCRIPTOR: Descriptor = Descriptor::new(
    "DM_integrity",
    Usage::Crypto,
    &[Magic::at(b"integrt\0", 0)],
    Format::Integrity,
);

const VERITY_SB_SIZE: u64 = 512;
const INTEGRITY_SB_SIZE: u64 = 25;

/// The exception store header carries nothing worth reporting.
pub(crate) fn probe_snapshot_cow(_ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    Ok(Some(Findings::new()))
}

#[derive(Debug, Clone)]
struct VeritySuperblock {
    version: u32,
    uuid: [u8; 16],
}

impl VeritySuperblock {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        Some(Self {
            version: f.u32(8)?,
            uuid: f.array(16)?,
        })
    }
}

pub(crate) fn probe_verity(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(sb) = ctx
        .try_fetch(hit.base, VERITY_SB_SIZE)?
        .and_then(VeritySuperblock::parse)
    else {
        return Ok(None);
    };
    if sb.version != 1 {
        tracing::debug!(version = sb.version, "verity: unsupported superblock version");
        return Ok(None);
    }
    let mut out = Findings::new();
    out.set_uuid(&sb.uuid);
    out.set_version(sb.version.to_string());
    Ok(Some(out))
}

pub(crate) fn probe_integrity(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(version) = ctx
        .try_fetch(hit.base, INTEGRITY_SB_SIZE)?
        .and_then(|b| Fields::le(b).u8(8))
    else {
        return Ok(None);
    };
    if version == 0 {
        return Ok(None);
    }
    let mut out = Findings::new();
    out.set_version(version.to_string());
    Ok(Some(out))
}
