//! LVM physical volume labels, both the LVM2 `LABELONE` sector and the
//! older LVM1 `HM` header.

use super::{Findings, Format, Outcome};
use crate::checksum::{lvm2_crc, LVM2_CRC_SEED};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::Usage;

const LVM2_TYPE: &[u8] = b"LVM2 001";

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "LVM2_member",
    Usage::Raid,
    &[
        Magic::kb(LVM2_TYPE, 0, 0x218),
        Magic::kb(LVM2_TYPE, 0, 0x018),
        Magic::kb(LVM2_TYPE, 1, 0x018),
        Magic::kb(LVM2_TYPE, 1, 0x218),
    ],
    Format::Lvm2,
);

pub(crate) const LVM1_DESCRIPTOR: Descriptor = Descriptor::new(
    "LVM1_member",
    Usage::Raid,
    &[Magic::at(b"HM", 0)],
    Format::Lvm1,
);

const LABEL_ID: &[u8] = b"LABELONE";
const LABEL_SIZE: usize = 512;
const SECTOR_SIZE: u64 = 512;
/// The CRC covers everything from `offset_xl` to the end of the sector.
const CRC_START: usize = 20;
const PV_ID_LEN: usize = 32;

#[derive(Debug, Clone)]
struct LabelHeader {
    sector_xl: u64,
    crc_xl: u32,
    pv_uuid: [u8; PV_ID_LEN],
}

impl LabelHeader {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        if f.bytes(0, LABEL_ID.len())? != LABEL_ID {
            return None;
        }
        Some(Self {
            sector_xl: f.u64(8)?,
            crc_xl: f.u32(16)?,
            pv_uuid: f.array(32)?,
        })
    }
}

/// `6-4-4-4-4-4-6` grouping of the 32-character PV id.
fn format_pv_uuid(id: &[u8; PV_ID_LEN]) -> String {
    const DASH_BEFORE: [usize; 6] = [6, 10, 14, 18, 22, 26];
    let mut out = String::with_capacity(PV_ID_LEN + DASH_BEFORE.len());
    for (i, &b) in id.iter().enumerate() {
        if DASH_BEFORE.contains(&i) {
            out.push('-');
        }
        out.push(char::from(b));
    }
    out
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let unverified = ctx.checksum_ok(false);
    let Some(buf) = ctx.try_fetch(hit.base, 2 * SECTOR_SIZE)? else {
        return Ok(None);
    };
    // the label is in either of the two sectors at the base
    let mut sector = hit.base / SECTOR_SIZE;
    let raw = if buf.starts_with(LABEL_ID) {
        &buf[..LABEL_SIZE]
    } else if buf[LABEL_SIZE..].starts_with(LABEL_ID) {
        sector += 1;
        &buf[LABEL_SIZE..]
    } else {
        return Ok(None);
    };
    let Some(label) = LabelHeader::parse(raw) else {
        return Ok(None);
    };
    if label.sector_xl != sector {
        tracing::debug!(sector, stored = label.sector_xl, "lvm2: label sector mismatch");
        return Ok(None);
    }
    let crc = lvm2_crc(LVM2_CRC_SEED, &raw[CRC_START..LABEL_SIZE]);
    if crc != label.crc_xl && !unverified {
        tracing::debug!("lvm2: label checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_uuid_text(&label.pv_uuid, format_pv_uuid(&label.pv_uuid));
    out.set_version(String::from_utf8_lossy(LVM2_TYPE));
    Ok(Some(out))
}

/// LVM1 keeps the PV id after forty bytes of volume group bookkeeping.
#[derive(Debug, Clone)]
struct Lvm1Header {
    version: u16,
    pv_uuid: [u8; PV_ID_LEN],
}

impl Lvm1Header {
    const SIZE: u64 = 44 + PV_ID_LEN as u64;

    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        Some(Self {
            version: f.u16(2)?,
            pv_uuid: f.array(44)?,
        })
    }
}

pub(crate) fn probe_lvm1(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(hdr) = ctx
        .try_fetch(hit.base, Lvm1Header::SIZE)?
        .and_then(Lvm1Header::parse)
    else {
        return Ok(None);
    };
    if !(1..=2).contains(&hdr.version) {
        return Ok(None);
    }
    let mut out = Findings::new();
    out.set_uuid_text(&hdr.pv_uuid, format_pv_uuid(&hdr.pv_uuid));
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pv_uuid() {
        let id = *b"abcdefghijklmnopqrstuvwxyz012345";
        assert_eq!(
            format_pv_uuid(&id),
            "abcdef-ghij-klmn-opqr-stuv-wxyz-012345"
        );
    }

    #[test]
    fn test_label_header() {
        let mut raw = vec![0u8; LABEL_SIZE];
        raw[..8].copy_from_slice(LABEL_ID);
        raw[8..16].copy_from_slice(&1u64.to_le_bytes());
        let label = LabelHeader::parse(&raw).unwrap();
        assert_eq!(label.sector_xl, 1);
        assert!(LabelHeader::parse(&raw[1..]).is_none());
    }

    #[test]
    fn test_lvm1_header() {
        let mut raw = vec![0u8; Lvm1Header::SIZE as usize];
        raw[..2].copy_from_slice(b"HM");
        raw[2..4].copy_from_slice(&2u16.to_le_bytes());
        raw[44..76].copy_from_slice(b"abcdefghijklmnopqrstuvwxyz012345");
        let hdr = Lvm1Header::parse(&raw).unwrap();
        assert_eq!(hdr.version, 2);
        assert_eq!(format_pv_uuid(&hdr.pv_uuid), "abcdef-ghij-klmn-opqr-stuv-wxyz-012345");
        assert!(Lvm1Header::parse(&raw[..60]).is_none());
    }
}
