//! DRBD 8.4 and 9 internal metadata, kept 4 KiB before the device end.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::Descriptor;
use crate::types::Usage;

pub(crate) const DESCRIPTOR: Descriptor =
    Descriptor::new("drbd", Usage::Raid, &[], Format::Drbd).min_size(0x10000);

const DRBD_MAGIC: u32 = 0x8374_0267;
const MD_MAGIC_08: u32 = DRBD_MAGIC + 4;
const MD_MAGIC_84_UNCLEAN: u32 = DRBD_MAGIC + 5;
const MD_MAGIC_09: u32 = DRBD_MAGIC + 6;

const MD_OFFSET: u64 = 4096;
const MAGIC_OFFSET: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataVersion {
    V08,
    V09,
}

impl MetadataVersion {
    fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            MD_MAGIC_08 | MD_MAGIC_84_UNCLEAN => Some(Self::V08),
            MD_MAGIC_09 => Some(Self::V09),
            _ => None,
        }
    }

    fn device_uuid_offset(self) -> usize {
        match self {
            Self::V08 => 40,
            Self::V09 => 48,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::V08 => "v08",
            Self::V09 => "v09",
        }
    }
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(off) = ctx.size().and_then(|s| s.checked_sub(MD_OFFSET)) else {
        return Ok(None);
    };
    let Some(md) = ctx.try_fetch(off, 64)? else {
        return Ok(None);
    };
    let f = Fields::be(md);
    let Some(version) = f.u32(MAGIC_OFFSET).and_then(MetadataVersion::from_magic) else {
        return Ok(None);
    };
    let uuid_at = version.device_uuid_offset();
    let (Some(raw), Some(device_uuid), Some(magic)) = (
        f.bytes(uuid_at, 8),
        f.u64(uuid_at),
        f.bytes(MAGIC_OFFSET, 4),
    ) else {
        return Ok(None);
    };

    let mut out = Findings::new();
    out.set_uuid_text(raw, format!("{device_uuid:x}"));
    out.set_version(version.name());
    out.set_magic(off + MAGIC_OFFSET as u64, magic);
    Ok(Some(out))
}
