//! Minix v1, v2 and v3 filesystems, in either byte order.

use super::{ext, Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

const V1_MAGIC: u16 = 0x137F;
const V1_MAGIC2: u16 = 0x138F;
const V2_MAGIC: u16 = 0x2468;
const V2_MAGIC2: u16 = 0x2478;
const V3_MAGIC: u16 = 0x4D5A;

const LE: Endianness = Endianness::Little;
const BE: Endianness = Endianness::Big;

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "minix",
    Usage::Filesystem,
    &[
        Magic::kb(&[0x7f, 0x13], 1, 0x10).with_hint(LE),
        Magic::kb(&[0x8f, 0x13], 1, 0x10).with_hint(LE),
        Magic::kb(&[0x13, 0x7f], 1, 0x10).with_hint(BE),
        Magic::kb(&[0x13, 0x8f], 1, 0x10).with_hint(BE),
        Magic::kb(&[0x68, 0x24], 1, 0x10).with_hint(LE),
        Magic::kb(&[0x78, 0x24], 1, 0x10).with_hint(LE),
        Magic::kb(&[0x24, 0x68], 1, 0x10).with_hint(BE),
        Magic::kb(&[0x24, 0x78], 1, 0x10).with_hint(BE),
        Magic::kb(&[0x5a, 0x4d], 1, 0x18).with_hint(LE),
        Magic::kb(&[0x4d, 0x5a], 1, 0x18).with_hint(BE),
    ],
    Format::Minix,
);

const BLOCK_SIZE: u64 = 1024;
const SUPERBLOCK_SIZE: u64 = 32;

const STATE_VALID: u16 = 0x0001;
const STATE_ERROR: u16 = 0x0002;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MinixSuperblock {
    version: u8,
    ninodes: u32,
    zones: u32,
    imap_blocks: u16,
    zmap_blocks: u16,
    first_data_zone: u16,
    log_zone_size: u16,
    block_size: u32,
}

impl MinixSuperblock {
    fn parse(buf: &[u8], order: Endianness) -> Option<Self> {
        let f = Fields::new(buf, order);
        let version = match f.u16(0x10)? {
            V1_MAGIC | V1_MAGIC2 => 1,
            V2_MAGIC | V2_MAGIC2 => 2,
            _ if f.u16(0x18)? == V3_MAGIC => 3,
            _ => return None,
        };
        if version == 3 {
            return Some(Self {
                version,
                ninodes: f.u32(0)?,
                imap_blocks: f.u16(6)?,
                zmap_blocks: f.u16(8)?,
                first_data_zone: f.u16(10)?,
                log_zone_size: f.u16(12)?,
                zones: f.u32(20)?,
                block_size: u32::from(f.u16(28)?),
            });
        }
        let state = f.u16(18)?;
        if state & (STATE_VALID | STATE_ERROR) != state {
            return None;
        }
        Some(Self {
            version,
            ninodes: u32::from(f.u16(0)?),
            zones: if version == 2 {
                f.u32(20)?
            } else {
                u32::from(f.u16(2)?)
            },
            imap_blocks: f.u16(4)?,
            zmap_blocks: f.u16(6)?,
            first_data_zone: f.u16(8)?,
            log_zone_size: f.u16(10)?,
            block_size: BLOCK_SIZE as u32,
        })
    }

    /// Same checks fsck.minix applies before trusting a superblock.
    fn is_sane(&self) -> bool {
        let ninodes = u64::from(self.ninodes);
        let zones = u64::from(self.zones);
        let first = u64::from(self.first_data_zone);
        self.log_zone_size == 0
            && self.ninodes != 0
            && self.ninodes != u32::MAX
            && u64::from(self.imap_blocks) * BLOCK_SIZE * 8 >= ninodes + 1
            && first <= zones
            && u64::from(self.zmap_blocks) * BLOCK_SIZE * 8 >= zones - first + 1
    }
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let order = hit.hint().unwrap_or(Endianness::Little);
    let Some(sb) = ctx
        .try_fetch(hit.base, SUPERBLOCK_SIZE)?
        .and_then(|b| MinixSuperblock::parse(b, order))
    else {
        return Ok(None);
    };
    if !sb.is_sane() {
        return Ok(None);
    }
    // parts of an ext3 superblock can look like minix
    if ext::has_ext_magic(ctx)? {
        tracing::debug!("minix: ext magic present, rejecting");
        return Ok(None);
    }

    let mut out = Findings::new();
    out.set_version(sb.version.to_string());
    out.endianness = Some(order);
    if sb.block_size.is_power_of_two() {
        out.block_size = Some(sb.block_size);
        out.fs_size = u64::from(sb.zones).checked_mul(u64::from(sb.block_size));
    }
    Ok(Some(out))
}
