//! UBI erase-counter headers.

use super::{Findings, Format, Outcome};
use crate::checksum::crc32_raw;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "ubi",
    Usage::Raid,
    &[Magic::at(b"UBI#", 0)],
    Format::Ubi,
);

const EC_HEADER_SIZE: u64 = 64;
const CRC_OFFSET: usize = 60;

#[derive(Debug, Clone)]
struct EcHeader {
    version: u8,
    image_seq: u32,
    hdr_crc: u32,
}

impl EcHeader {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::be(buf);
        Some(Self {
            version: f.u8(4)?,
            image_seq: f.u32(24)?,
            hdr_crc: f.u32(CRC_OFFSET)?,
        })
    }
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(raw) = ctx.try_fetch(hit.base, EC_HEADER_SIZE)? else {
        return Ok(None);
    };
    let Some(hdr) = EcHeader::parse(raw) else {
        return Ok(None);
    };
    let crc = crc32_raw(!0, &raw[..CRC_OFFSET]);
    if !ctx.checksum_ok(crc == hdr.hdr_crc) {
        tracing::debug!(crc, stored = hdr.hdr_crc, "ubi: header checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_version(hdr.version.to_string());
    out.set_uuid_text(&hdr.image_seq.to_be_bytes(), hdr.image_seq.to_string());
    out.endianness = Some(Endianness::Big);
    Ok(Some(out))
}
