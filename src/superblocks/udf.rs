//! UDF (ECMA-167), the DVD and packet-writing filesystem.

use super::{Findings, Format, Outcome, decode_utf16, normalize_label};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "udf",
    Usage::Filesystem,
    &[
        Magic::kb(b"BEA01", 32, 1),
        Magic::kb(b"BOOT2", 32, 1),
        Magic::kb(b"CD001", 32, 1),
        Magic::kb(b"CDW02", 32, 1),
        Magic::kb(b"NSR02", 32, 1),
        Magic::kb(b"NSR03", 32, 1),
        Magic::kb(b"TEA01", 32, 1),
    ],
    Format::Udf,
)
.tolerant();

const VSD_OFFSET: u64 = 0x8000;
const VSD_SIZE: u64 = 0x800;
const VSD_HEADER_LEN: u64 = 7;
const MAX_NSR_SEARCH: u64 = 64;
const NSR_IDS: [&[u8]; 2] = [b"NSR02", b"NSR03"];

/// Bytes of a tagged descriptor up to and including the LVD fields read.
const VD_SIZE: u64 = 440;
const ANCHOR_BLOCK: u64 = 256;
const MAX_SEQUENCE_BLOCKS: u32 = 64;

const TAG_PVD: u16 = 1;
const TAG_AVDP: u16 = 2;
const TAG_LVD: u16 = 6;
const TAG_LVID: u16 = 9;

/// A `dstring`: compression id, characters, and the used length in the
/// last byte.
#[derive(Debug, Clone, Copy)]
struct Dstring<'a> {
    raw: &'a [u8],
}

impl<'a> Dstring<'a> {
    fn at(buf: &'a [u8], offset: usize, len: usize) -> Option<Self> {
        buf.get(offset..offset + len).map(|raw| Self { raw })
    }

    fn chars(&self) -> &'a [u8] {
        let body = &self.raw[1..self.raw.len() - 1];
        let used = usize::from(self.raw[self.raw.len() - 1]).saturating_sub(1);
        &body[..used.min(body.len())]
    }

    /// Text in either OSTA compressed encoding; `None` for an unknown
    /// compression id.
    fn decode(&self) -> Option<String> {
        let chars = self.chars();
        match self.raw[0] {
            8 => Some(chars.iter().map(|&b| char::from(b)).collect()),
            16 => Some(decode_utf16(chars, Endianness::Big)),
            _ => None,
        }
    }
}

/// First sixteen UTF-8 bytes of the volume set identifier, as hex when
/// the leading time value is not already hex digits.
fn volume_set_uuid(volset: &str) -> Option<(Vec<u8>, String)> {
    let mut buf = [0u8; 16];
    let mut len = 0;
    for c in volset.chars() {
        let n = c.len_utf8();
        if len + n > buf.len() {
            break;
        }
        c.encode_utf8(&mut buf[len..]);
        len += n;
    }
    if len < 8 {
        return None;
    }
    let nonhex = buf.iter().position(|b| !b.is_ascii_hexdigit()).unwrap_or(16);
    let lower = |r: &[u8]| r.iter().map(|b| char::from(b.to_ascii_lowercase())).collect::<String>();
    let text = if nonhex < 8 {
        hex::encode(&buf[..8])
    } else if nonhex < 16 {
        lower(&buf[..8]) + &hex::encode(&buf[8..12])
    } else {
        lower(&buf[..])
    };
    Some((buf.to_vec(), text))
}

#[derive(Debug, Clone, Copy)]
struct Tag {
    id: u16,
    location: u32,
}

impl Tag {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::le(buf);
        Some(Self {
            id: f.u16(0)?,
            location: f.u32(12)?,
        })
    }
}

/// Where the logical volume integrity sequence lives.
#[derive(Debug, Clone, Copy, Default)]
struct IntegrityExtent {
    partition_maps: u32,
    blocks: u32,
    location: u32,
}

impl IntegrityExtent {
    fn is_set(&self) -> bool {
        self.partition_maps != 0 && self.blocks != 0 && self.location != 0
    }
}

/// A volume structure descriptor other than all zeroes must appear in the
/// recognition area, and one of them must announce NSR.
fn has_nsr(ctx: &mut ProbeContext<'_>) -> crate::Result<bool> {
    let mut any = false;
    for b in (0..VSD_OFFSET).step_by(VSD_SIZE as usize) {
        let Some(vsd) = ctx.try_fetch(VSD_OFFSET + b, VSD_HEADER_LEN)? else {
            return Ok(false);
        };
        if vsd[1] != 0 {
            any = true;
            break;
        }
    }
    if !any {
        return Ok(false);
    }
    for b in 0..MAX_NSR_SEARCH {
        let Some(vsd) = ctx.try_fetch(VSD_OFFSET + b * VSD_SIZE, VSD_HEADER_LEN)? else {
            return Ok(false);
        };
        if NSR_IDS.contains(&&vsd[1..6]) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Finds the anchor at block 256, trying the device sector size and then
/// every block size UDF allows. Returns the block size with the anchor's
/// `(length, location)` extent.
fn find_anchor(ctx: &mut ProbeContext<'_>) -> crate::Result<Option<(u32, u32, u32)>> {
    let sector = ctx.sector_size().unwrap_or(512);
    for bs in [sector, 512, 1024, 2048, 4096] {
        let Some(vd) = ctx.try_fetch(ANCHOR_BLOCK * u64::from(bs), VD_SIZE)? else {
            return Ok(None);
        };
        let f = Fields::le(vd);
        if f.u16(0) == Some(TAG_AVDP) {
            let (Some(length), Some(location)) = (f.u32(16), f.u32(20)) else {
                return Ok(None);
            };
            return Ok(Some((bs, length, location)));
        }
    }
    Ok(None)
}

/// Minimum UDF read revision from the integrity sequence, as `M.mm`.
fn read_revision(ctx: &mut ProbeContext<'_>, bs: u32, lvid: IntegrityExtent) -> crate::Result<Option<String>> {
    for b in 0..lvid.blocks.min(MAX_SEQUENCE_BLOCKS) {
        let block = lvid.location.wrapping_add(b);
        let off = u64::from(block) * u64::from(bs);
        let Some(tag) = ctx.try_fetch(off, VD_SIZE)?.and_then(Tag::parse) else {
            return Ok(None);
        };
        if tag.id == 0 || tag.location != block {
            break;
        }
        if tag.id != TAG_LVID {
            continue;
        }
        // implementation use follows the partition map table
        let imp_use = off + 80 + 8 * u64::from(lvid.partition_maps);
        let Some(rev) = ctx.try_fetch(imp_use + 40, 2)?.and_then(|b| Fields::le(b).u16(0)) else {
            return Ok(None);
        };
        if rev != 0 {
            return Ok(Some(format!("{}.{:02}", rev >> 8, rev & 0xff)));
        }
    }
    Ok(None)
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    if !has_nsr(ctx)? {
        return Ok(None);
    }
    let mut out = Findings::new();
    let Some((bs, length, location)) = find_anchor(ctx)? else {
        // an NSR descriptor without a readable anchor is still UDF
        return Ok(Some(out));
    };
    out.block_size = Some(bs);

    let mut lvid = IntegrityExtent::default();
    for b in 0..(length / bs).min(MAX_SEQUENCE_BLOCKS) {
        let block = location.wrapping_add(b);
        let Some(vd) = ctx.try_fetch(u64::from(block) * u64::from(bs), VD_SIZE)? else {
            return Ok(None);
        };
        let Some(tag) = Tag::parse(vd) else {
            return Ok(None);
        };
        if tag.id == 0 || tag.location != block {
            break;
        }
        match tag.id {
            TAG_PVD => {
                if !out.extra.contains_key("VOLUME_ID") {
                    if let Some(text) = Dstring::at(vd, 24, 32).and_then(|d| d.decode()) {
                        set_id(&mut out, "VOLUME_ID", &text);
                    }
                }
                if let Some(volset) = Dstring::at(vd, 72, 128).and_then(|d| d.decode()) {
                    if out.uuid.is_none() {
                        if let Some((raw, text)) = volume_set_uuid(&volset) {
                            out.set_uuid_text(&raw, text);
                        }
                    }
                    if !out.extra.contains_key("VOLUME_SET_ID") {
                        set_id(&mut out, "VOLUME_SET_ID", &volset);
                    }
                }
            }
            TAG_LVD => {
                let f = Fields::le(vd);
                if !lvid.is_set() {
                    lvid = IntegrityExtent {
                        partition_maps: f.u32(268).unwrap_or(0),
                        blocks: f.u32(432).unwrap_or(0) / bs,
                        location: f.u32(436).unwrap_or(0),
                    };
                }
                if let Some(d) = Dstring::at(vd, 84, 128) {
                    if let Some(text) = d.decode() {
                        if out.label.is_none() {
                            out.set_decoded_label(d.chars(), &text);
                        }
                        if !out.extra.contains_key("LOGICAL_VOLUME_ID") {
                            set_id(&mut out, "LOGICAL_VOLUME_ID", &text);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if lvid.is_set() {
        if let Some(rev) = read_revision(ctx, bs, lvid)? {
            out.set_version(rev);
        }
    }
    Ok(Some(out))
}

fn set_id(out: &mut Findings, key: &'static str, text: &str) {
    if let Some(text) = normalize_label(text) {
        out.set_extra(key, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dstring(cid: u8, text: &[u8], len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; len];
        raw[0] = cid;
        raw[1..1 + text.len()].copy_from_slice(text);
        raw[len - 1] = (text.len() + 1) as u8;
        raw
    }

    #[test]
    fn test_dstring_encodings() {
        let latin = dstring(8, b"Caf\xe9", 32);
        assert_eq!(Dstring { raw: &latin }.decode().as_deref(), Some("Café"));

        let wide: Vec<u8> = "Daten".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let utf16 = dstring(16, &wide, 128);
        assert_eq!(Dstring { raw: &utf16 }.decode().as_deref(), Some("Daten"));

        let unknown = dstring(3, b"x", 32);
        assert_eq!(Dstring { raw: &unknown }.decode(), None);
    }

    #[test]
    fn test_volume_set_uuid_forms() {
        let (_, text) = volume_set_uuid("4D6A2B1Cabcdef01 rest").unwrap();
        assert_eq!(text, "4d6a2b1cabcdef01");

        let (_, text) = volume_set_uuid("4D6A2B1CLinuxUDF").unwrap();
        assert_eq!(text, "4d6a2b1c4c696e75");

        let (_, text) = volume_set_uuid("My volume set").unwrap();
        assert_eq!(text, "4d7920766f6c756d");

        assert!(volume_set_uuid("short").is_none());
    }
}
