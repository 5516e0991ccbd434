//! Linux swap areas.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

const V0_MAGIC: &[u8] = b"SWAP-SPACE";
const V1_MAGIC: &[u8] = b"SWAPSPACE2";

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "swap",
    Usage::Other,
    &[
        Magic::at(V0_MAGIC, 0xff6),
        Magic::at(V1_MAGIC, 0xff6),
        Magic::at(V0_MAGIC, 0x1ff6),
        Magic::at(V1_MAGIC, 0x1ff6),
        Magic::at(V0_MAGIC, 0x3ff6),
        Magic::at(V1_MAGIC, 0x3ff6),
        Magic::at(V0_MAGIC, 0x7ff6),
        Magic::at(V1_MAGIC, 0x7ff6),
        Magic::at(V0_MAGIC, 0xfff6),
        Magic::at(V1_MAGIC, 0xfff6),
    ],
    Format::Swap,
)
.min_size(10 * 4096);

/// TuxOnIce hibernation images keep a valid swap signature at the end of
/// the first page.
const TUXONICE_MAGIC: &[u8] = b"\xed\xc3\x02\xe9\x98\x56\xe5\x0c";

/// Hibernation images written over a swap area, and the version each one
/// is reported with.
const SUSPEND_MAGICS: [(&[u8], &str); 4] = [
    (b"S1SUSPEND", "s1suspend"),
    (b"S2SUSPEND", "s2suspend"),
    (b"ULSUSPEND", "ulsuspend"),
    (b"LINHIB0001", "linhib0001"),
];

const SWSUSPEND_MAGICS: [Magic; 21] = [
    Magic::at(TUXONICE_MAGIC, 0),
    Magic::at(b"S1SUSPEND", 0xff6),
    Magic::at(b"S2SUSPEND", 0xff6),
    Magic::at(b"ULSUSPEND", 0xff6),
    Magic::at(b"LINHIB0001", 0xff6),
    Magic::at(b"S1SUSPEND", 0x1ff6),
    Magic::at(b"S2SUSPEND", 0x1ff6),
    Magic::at(b"ULSUSPEND", 0x1ff6),
    Magic::at(b"LINHIB0001", 0x1ff6),
    Magic::at(b"S1SUSPEND", 0x3ff6),
    Magic::at(b"S2SUSPEND", 0x3ff6),
    Magic::at(b"ULSUSPEND", 0x3ff6),
    Magic::at(b"LINHIB0001", 0x3ff6),
    Magic::at(b"S1SUSPEND", 0x7ff6),
    Magic::at(b"S2SUSPEND", 0x7ff6),
    Magic::at(b"ULSUSPEND", 0x7ff6),
    Magic::at(b"LINHIB0001", 0x7ff6),
    Magic::at(b"S1SUSPEND", 0xfff6),
    Magic::at(b"S2SUSPEND", 0xfff6),
    Magic::at(b"ULSUSPEND", 0xfff6),
    Magic::at(b"LINHIB0001", 0xfff6),
];

pub(crate) const SWSUSPEND_DESCRIPTOR: Descriptor = Descriptor::new(
    "swsuspend",
    Usage::Other,
    &SWSUSPEND_MAGICS,
    Format::Swsuspend,
)
.min_size(10 * 4096);

const HEADER_OFFSET: u64 = 1024;
const HEADER_SIZE: u64 = 512;

/// The v1 header that follows the 1 KiB boot area.
#[derive(Debug, Clone)]
struct SwapHeader {
    /// The version word reads 1 in one of the two byte orders.
    version_ok: bool,
    order: Endianness,
    last_page: u32,
    uuid: [u8; 16],
    volume: [u8; 16],
    has_garbage: bool,
}

impl SwapHeader {
    fn parse(buf: &[u8]) -> Option<Self> {
        let big = Fields::le(buf).u32(0)? != 1 && Fields::be(buf).u32(0)? == 1;
        let order = if big { Endianness::Big } else { Endianness::Little };
        let f = Fields::new(buf, order);
        Some(Self {
            version_ok: f.u32(0)? == 1,
            order,
            last_page: f.u32(4)?,
            uuid: f.array(12)?,
            volume: f.array(28)?,
            // padding[32] and padding[33]
            has_garbage: !f.is_zero(172, 8),
        })
    }
}

/// Reads the header at 1 KiB. The v1 checks apply to `SWAPSPACE2` only;
/// hibernation images just lend the header their label and UUID.
fn read_header(ctx: &mut ProbeContext<'_>, out: &mut Findings, version: &str) -> crate::Result<bool> {
    let Some(hdr) = ctx
        .try_fetch(HEADER_OFFSET, HEADER_SIZE)?
        .and_then(SwapHeader::parse)
    else {
        return Ok(false);
    };
    if version == "1" {
        if !hdr.version_ok {
            tracing::debug!("swap: incorrect header version");
            return Ok(false);
        }
        if hdr.last_page == 0 {
            tracing::debug!("swap: last page not set");
            return Ok(false);
        }
        out.endianness = Some(hdr.order);
        if let Some(page) = out.block_size {
            out.fs_size = (u64::from(hdr.last_page) + 1).checked_mul(u64::from(page));
        }
    }
    if !hdr.has_garbage {
        out.set_label(&hdr.volume);
        out.set_uuid(&hdr.uuid);
    }
    out.set_version(version);
    Ok(true)
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(magic) = hit.magic else {
        return Ok(None);
    };
    if ctx.try_fetch(0, TUXONICE_MAGIC.len() as u64)? == Some(TUXONICE_MAGIC) {
        tracing::debug!("swap: TuxOnIce image, ignoring swap signature");
        return Ok(None);
    }

    let mut out = Findings::new();
    // the signature occupies the last ten bytes of the first page
    if let Some(page) = hit.offset.and_then(|o| o.checked_add(magic.bytes.len() as u64)) {
        out.block_size = u32::try_from(page).ok();
    }
    if magic.bytes == V0_MAGIC {
        out.set_version("0");
        return Ok(Some(out));
    }
    Ok(read_header(ctx, &mut out, "1")?.then_some(out))
}

pub(crate) fn probe_swsuspend(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(magic) = hit.magic else {
        return Ok(None);
    };
    let version = if magic.bytes == TUXONICE_MAGIC {
        "tuxonice"
    } else {
        match SUSPEND_MAGICS.iter().find(|(m, _)| *m == magic.bytes) {
            Some((_, version)) => *version,
            None => return Ok(None),
        }
    };
    let mut out = Findings::new();
    Ok(read_header(ctx, &mut out, version)?.then_some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_order() {
        let mut raw = vec![0u8; 512];
        raw[0..4].copy_from_slice(&1u32.to_be_bytes());
        raw[4..8].copy_from_slice(&9u32.to_be_bytes());
        let hdr = SwapHeader::parse(&raw).unwrap();
        assert_eq!(hdr.order, Endianness::Big);
        assert_eq!(hdr.last_page, 9);
        assert!(!hdr.has_garbage);

        assert!(hdr.version_ok);

        raw[0..4].copy_from_slice(&2u32.to_le_bytes());
        assert!(!SwapHeader::parse(&raw).unwrap().version_ok);
    }

    #[test]
    fn test_padding_garbage() {
        let mut raw = vec![0u8; 512];
        raw[0..4].copy_from_slice(&1u32.to_le_bytes());
        raw[176] = 0xAA;
        assert!(SwapHeader::parse(&raw).unwrap().has_garbage);
    }

    #[test]
    fn test_suspend_magic_table() {
        assert_eq!(SWSUSPEND_MAGICS[0].bytes, TUXONICE_MAGIC);
        assert_eq!(SWSUSPEND_MAGICS[0].sb_offset, 0);
        assert_eq!(SWSUSPEND_MAGICS[1], Magic::at(b"S1SUSPEND", 0xff6));
        assert_eq!(SWSUSPEND_MAGICS[4], Magic::at(b"LINHIB0001", 0xff6));
        assert_eq!(SWSUSPEND_MAGICS[20], Magic::at(b"LINHIB0001", 0xfff6));
    }
}
