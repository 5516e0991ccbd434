//! XFS superblocks, the EXFS variant and external XFS log devices.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "xfs",
    Usage::Filesystem,
    &[Magic::at(b"XFSB", 0)],
    Format::Xfs,
);

pub(crate) const EXFS_DESCRIPTOR: Descriptor = Descriptor::new(
    "exfs",
    Usage::Filesystem,
    &[Magic::at(b"EXFS", 0)],
    Format::Exfs,
);

/// Log record headers are searched for in this many leading bytes.
const LOG_SCAN_LEN: u64 = 512 * 512;

pub(crate) const LOG_DESCRIPTOR: Descriptor =
    Descriptor::new("xfs_external_log", Usage::Other, &[], Format::XfsLog)
        .min_size(LOG_SCAN_LEN);

const SUPERBLOCK_SIZE: u64 = 512;

const MIN_AG_BLOCKS: u64 = 64;
const MIN_RTEXTSIZE: u64 = 4 * 1024;
const MAX_RTEXTSIZE: u64 = 1024 * 1024 * 1024;

const LOG_MAGIC: u32 = 0xFEED_BABE;
const LOG_SECTOR: usize = 512;

/// The fields of an XFS superblock the probes look at. All big-endian.
#[derive(Debug, Clone)]
struct XfsSuperblock {
    blocksize: u32,
    dblocks: u64,
    uuid: [u8; 16],
    rextsize: u32,
    agblocks: u32,
    agcount: u32,
    sectsize: u16,
    inodesize: u16,
    inopblock: u16,
    fname: [u8; 12],
    blocklog: u8,
    sectlog: u8,
    inodelog: u8,
    inopblog: u8,
    inprogress: u8,
    imax_pct: u8,
}

impl XfsSuperblock {
    fn parse(buf: &[u8]) -> Option<Self> {
        let f = Fields::be(buf);
        Some(Self {
            blocksize: f.u32(4)?,
            dblocks: f.u64(8)?,
            uuid: f.array(32)?,
            rextsize: f.u32(80)?,
            agblocks: f.u32(84)?,
            agcount: f.u32(88)?,
            sectsize: f.u16(102)?,
            inodesize: f.u16(104)?,
            inopblock: f.u16(106)?,
            fname: f.array(108)?,
            blocklog: f.u8(120)?,
            sectlog: f.u8(121)?,
            inodelog: f.u8(122)?,
            inopblog: f.u8(123)?,
            inprogress: f.u8(126)?,
            imax_pct: f.u8(127)?,
        })
    }

    fn has_sane_blocksize(&self) -> bool {
        self.blocksize.is_power_of_two() && (512..=65536).contains(&self.blocksize)
    }

    /// Full geometry cross-check: sizes agree with their logarithms and
    /// the data block count fits the allocation group layout.
    fn has_valid_geometry(&self) -> bool {
        let agcount = u64::from(self.agcount);
        let agblocks = u64::from(self.agblocks);
        let blocksize = u64::from(self.blocksize);
        let rtext = u64::from(self.rextsize) * blocksize;

        let max_dblocks = agcount * agblocks;
        let min_dblocks = agcount.saturating_sub(1) * agblocks + MIN_AG_BLOCKS;

        self.agcount > 0
            && (512..=32768).contains(&self.sectsize)
            && (9..=15).contains(&self.sectlog)
            && u32::from(self.sectsize) == 1u32 << self.sectlog
            && self.has_sane_blocksize()
            && (9..=16).contains(&self.blocklog)
            && self.blocksize == 1u32 << self.blocklog
            && (256..=2048).contains(&self.inodesize)
            && (8..=11).contains(&self.inodelog)
            && u32::from(self.inodesize) == 1u32 << self.inodelog
            && self.blocklog.checked_sub(self.inodelog) == Some(self.inopblog)
            && u32::from(self.inopblock) == self.blocksize / u32::from(self.inodesize)
            && (MIN_RTEXTSIZE..=MAX_RTEXTSIZE).contains(&rtext)
            && self.imax_pct <= 100
            && self.dblocks != 0
            && self.dblocks <= max_dblocks
            && self.dblocks >= min_dblocks
    }

    fn findings(&self) -> Findings {
        let mut out = Findings::new();
        out.set_label(&self.fname);
        out.set_uuid(&self.uuid);
        out.block_size = Some(self.blocksize);
        out.fs_size = self.dblocks.checked_mul(u64::from(self.blocksize));
        out.endianness = Some(Endianness::Big);
        out
    }
}

fn read_superblock(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> crate::Result<Option<XfsSuperblock>> {
    Ok(ctx
        .try_fetch(hit.base, SUPERBLOCK_SIZE)?
        .and_then(XfsSuperblock::parse))
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(sb) = read_superblock(ctx, hit)? else {
        return Ok(None);
    };
    if !sb.has_sane_blocksize() {
        tracing::debug!(blocksize = sb.blocksize, "xfs: implausible block size");
        return Ok(None);
    }
    Ok(Some(sb.findings()))
}

pub(crate) fn probe_exfs(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(sb) = read_superblock(ctx, hit)? else {
        return Ok(None);
    };
    if sb.inprogress != 0 {
        tracing::debug!("exfs: mkfs in progress");
        return Ok(None);
    }
    if !sb.has_valid_geometry() {
        tracing::debug!("exfs: inconsistent geometry");
        return Ok(None);
    }
    Ok(Some(sb.findings()))
}

fn is_valid_log_record(sector: &[u8]) -> bool {
    let f = Fields::be(sector);
    let (Some(magic), Some(version), Some(len), Some(fmt)) =
        (f.u32(0), f.u32(8), f.i32(12), f.u32(300))
    else {
        return false;
    };
    magic == LOG_MAGIC
        && version != 0
        && version & !0x3 == 0
        && len > 0
        && (1..=3).contains(&fmt)
}

/// An external log has no superblock; it is recognized by a log record
/// header in one of its first sectors.
pub(crate) fn probe_log(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(buf) = ctx.try_fetch(0, LOG_SCAN_LEN)? else {
        return Ok(None);
    };
    for (i, sector) in buf.chunks_exact(LOG_SECTOR).enumerate() {
        if sector.starts_with(b"XFSB") {
            return Ok(None);
        }
        if is_valid_log_record(sector) {
            let mut out = Findings::new();
            if let Some(uuid) = Fields::be(sector).bytes(304, 16) {
                out.log_uuid = super::dce_uuid(uuid);
            }
            out.set_magic((i * LOG_SECTOR) as u64, &LOG_MAGIC.to_be_bytes());
            out.endianness = Some(Endianness::Big);
            return Ok(Some(out));
        }
    }
    Ok(None)
}
