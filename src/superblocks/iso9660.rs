//! ISO 9660 and High Sierra CD-ROM filesystems.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

const ISO_MAGIC: &[u8] = b"CD001";
const HIGH_SIERRA_MAGIC: &[u8] = b"CDROM";

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "iso9660",
    Usage::Filesystem,
    &[Magic::kb(ISO_MAGIC, 32, 1), Magic::kb(HIGH_SIERRA_MAGIC, 32, 9)],
    Format::Iso9660,
)
.tolerant();

const SECTOR_SIZE: u64 = 0x800;
const DESCRIPTOR_SIZE: u64 = 0x370;
const MAX_DESCRIPTORS: u64 = 16;

const VD_BOOT_RECORD: u8 = 0x0;
const VD_SUPPLEMENTARY: u8 = 0x2;
const VD_END: u8 = 0xff;

const JOLIET_ESCAPES: [&[u8]; 3] = [b"%/@", b"%/C", b"%/E"];

/// Primary, supplementary or boot record volume descriptor. A boot
/// record has no unused byte after the version, so its system id starts
/// one byte earlier than a primary descriptor's.
#[derive(Debug, Clone)]
struct VolumeDescriptor {
    vd_type: u8,
    boot_system_id: [u8; 32],
    system_id: [u8; 32],
    volume_id: [u8; 32],
    escape_sequences: [u8; 8],
    publisher_id: [u8; 128],
    application_id: [u8; 128],
    created: [u8; 17],
    modified: [u8; 17],
}

impl VolumeDescriptor {
    fn parse(data: &[u8]) -> Option<Self> {
        let f = Fields::le(data);
        Some(Self {
            vd_type: f.u8(0)?,
            boot_system_id: f.array(7)?,
            system_id: f.array(8)?,
            volume_id: f.array(40)?,
            escape_sequences: f.array(88)?,
            publisher_id: f.array(318)?,
            application_id: f.array(574)?,
            created: f.array(813)?,
            modified: f.array(830)?,
        })
    }

    fn is_joliet(&self) -> bool {
        JOLIET_ESCAPES
            .iter()
            .any(|esc| self.escape_sequences.starts_with(esc))
    }
}

fn text_field(raw: &[u8]) -> Option<String> {
    super::normalize_label(&String::from_utf8_lossy(super::until_nul(raw)))
}

/// `YYYY-MM-DD-HH-MM-SS-CC` from a descriptor date, or `None` when the
/// date is unset (all digits '0' and a zero timezone offset).
fn date_uuid(date: &[u8; 17]) -> Option<(Vec<u8>, String)> {
    let digits = &date[..16];
    if digits.iter().all(|&b| b == b'0') && date[16] == 0 {
        return None;
    }
    let s = |r: std::ops::Range<usize>| String::from_utf8_lossy(&digits[r]).into_owned();
    let text = format!(
        "{}-{}-{}-{}-{}-{}-{}",
        s(0..4),
        s(4..6),
        s(6..8),
        s(8..10),
        s(10..12),
        s(12..14),
        s(14..16)
    );
    Some((digits.to_vec(), text))
}

/// True when a UTF-16BE Joliet label spells exactly the ASCII one.
fn ascii_eq_utf16be(ascii: &[u8], utf16: &[u8]) -> bool {
    utf16
        .chunks_exact(2)
        .zip(ascii)
        .all(|(u, &a)| u[0] == 0 && u[1] == a)
}

fn probe_high_sierra(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(volume_id) = ctx
        .try_fetch(hit.base, 80)?
        .and_then(|b| Fields::le(b).array::<32>(48))
    else {
        return Ok(None);
    };
    let mut out = Findings::new();
    out.set_version("High Sierra");
    out.set_label(&volume_id);
    Ok(Some(out))
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    if hit.magic.is_some_and(|m| m.bytes == HIGH_SIERRA_MAGIC) {
        return probe_high_sierra(ctx, hit);
    }
    let Some(pvd) = ctx
        .try_fetch(hit.base, DESCRIPTOR_SIZE)?
        .and_then(VolumeDescriptor::parse)
    else {
        return Ok(None);
    };

    let mut out = Findings::new();
    for (key, raw) in [
        ("SYSTEM_ID", &pvd.system_id[..]),
        ("PUBLISHER_ID", &pvd.publisher_id[..]),
        ("APPLICATION_ID", &pvd.application_id[..]),
    ] {
        if let Some(text) = text_field(raw) {
            out.set_extra(key, text);
        }
    }
    if let Some((raw, text)) = date_uuid(&pvd.modified).or_else(|| date_uuid(&pvd.created)) {
        out.set_uuid_text(&raw, text);
    }

    let mut joliet_label = None;
    let mut off = hit.base + SECTOR_SIZE;
    for _ in 0..MAX_DESCRIPTORS {
        let Some(vd) = ctx
            .try_fetch(off, DESCRIPTOR_SIZE)?
            .and_then(VolumeDescriptor::parse)
        else {
            break;
        };
        off += SECTOR_SIZE;
        match vd.vd_type {
            VD_END => break,
            VD_BOOT_RECORD => {
                if let Some(text) = text_field(&vd.boot_system_id[..]) {
                    out.set_extra("BOOT_SYSTEM_ID", text);
                }
            }
            VD_SUPPLEMENTARY if vd.is_joliet() => {
                out.set_version("Joliet Extension");
                if !ascii_eq_utf16be(&pvd.volume_id, &vd.volume_id) {
                    joliet_label = Some(vd.volume_id);
                }
                break;
            }
            _ => {}
        }
    }

    match joliet_label {
        Some(raw) => out.set_utf16_label(&raw, Endianness::Big),
        None => out.set_label(&pvd.volume_id),
    }
    out.block_size = Some(SECTOR_SIZE as u32);
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_uuid() {
        let mut date = [0u8; 17];
        date[..16].copy_from_slice(b"2021031512304599");
        let (raw, text) = date_uuid(&date).unwrap();
        assert_eq!(text, "2021-03-15-12-30-45-99");
        assert_eq!(raw.len(), 16);

        date[..16].copy_from_slice(b"0000000000000000");
        assert!(date_uuid(&date).is_none());
        date[16] = 4;
        assert!(date_uuid(&date).is_some());
    }

    #[test]
    fn test_boot_record_system_id_offset() {
        let mut raw = vec![0u8; DESCRIPTOR_SIZE as usize];
        raw[0] = VD_BOOT_RECORD;
        raw[1..6].copy_from_slice(ISO_MAGIC);
        raw[6] = 1;
        raw[7..30].copy_from_slice(b"EL TORITO SPECIFICATION");
        let vd = VolumeDescriptor::parse(&raw).unwrap();
        assert_eq!(
            text_field(&vd.boot_system_id).as_deref(),
            Some("EL TORITO SPECIFICATION")
        );
    }

    #[test]
    fn test_ascii_eq_utf16be() {
        let ascii = b"CDROM";
        let same: Vec<u8> = "CDROM".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let other: Vec<u8> = "CDRÖM".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        assert!(ascii_eq_utf16be(ascii, &same));
        assert!(!ascii_eq_utf16be(ascii, &other));
    }
}
