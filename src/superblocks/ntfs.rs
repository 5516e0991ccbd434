//! NTFS boot sector and `$Volume` label.

use super::{Findings, Format, Outcome, bitlocker};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "ntfs",
    Usage::Filesystem,
    &[Magic::at(b"NTFS    ", 3)],
    Format::Ntfs,
);

const BOOT_SECTOR_SIZE: u64 = 512;
const MAX_CLUSTER_SIZE: u32 = 64 * 1024;

/// MFT entry signature
const MFT_ENTRY_SIGNATURE: &[u8] = b"FILE";
/// `$Volume` is MFT record 3
const MFT_RECORD_VOLUME: u64 = 3;

const ATTR_VOLUME_NAME: u32 = 0x60;
const ATTR_END: u32 = 0xFFFF_FFFF;
const ATTR_HEADER_SIZE: usize = 24;

/// BIOS Parameter Block fields NTFS keeps (or insists are zero)
#[derive(Debug)]
struct NtfsBootSector {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fats: u8,
    root_entries: u16,
    sectors: u16,
    sectors_per_fat: u16,
    large_sectors: u32,
    number_of_sectors: u64,
    mft_cluster: u64,
    mft_mirror_cluster: u64,
    clusters_per_mft_record: i8,
    volume_serial: [u8; 8],
}

impl NtfsBootSector {
    fn parse(data: &[u8]) -> Option<Self> {
        let f = Fields::le(data);
        Some(Self {
            bytes_per_sector: f.u16(11)?,
            sectors_per_cluster: f.u8(13)?,
            reserved_sectors: f.u16(14)?,
            fats: f.u8(16)?,
            root_entries: f.u16(17)?,
            sectors: f.u16(19)?,
            sectors_per_fat: f.u16(22)?,
            large_sectors: f.u32(32)?,
            number_of_sectors: f.u64(40)?,
            mft_cluster: f.u64(48)?,
            mft_mirror_cluster: f.u64(56)?,
            clusters_per_mft_record: f.i8(64)?,
            volume_serial: f.array(72)?,
        })
    }

    /// Sectors per cluster. Values above 128 encode `2^(256 - v)`.
    fn sectors_per_cluster(&self) -> Option<u32> {
        match self.sectors_per_cluster {
            v @ (1 | 2 | 4 | 8 | 16 | 32 | 64 | 128) => Some(u32::from(v)),
            v @ 0xF4..=0xFF => Some(1u32 << (256 - u32::from(v))),
            _ => None,
        }
    }

    fn cluster_size(&self) -> Option<u32> {
        let size = u32::from(self.bytes_per_sector) * self.sectors_per_cluster()?;
        (size <= MAX_CLUSTER_SIZE).then_some(size)
    }

    /// A negative value `v` in "clusters per MFT record" means a record of
    /// `2^-v` bytes; positive values count clusters.
    fn mft_record_size(&self) -> Option<u64> {
        let cluster = u64::from(self.cluster_size()?);
        match self.clusters_per_mft_record {
            v @ -31..=-9 => Some(1u64 << -(v as i32)),
            v @ (1 | 2 | 4 | 8 | 16 | 32 | 64) => Some(v as u64 * cluster),
            _ => None,
        }
    }

    fn is_valid(&self) -> bool {
        (256..=4096).contains(&self.bytes_per_sector)
            && self.cluster_size().is_some()
            && self.reserved_sectors == 0
            && self.fats == 0
            && self.root_entries == 0
            && self.sectors == 0
            && self.sectors_per_fat == 0
            && self.large_sectors == 0
            && self.mft_record_size().is_some()
    }

    fn nr_clusters(&self) -> u64 {
        self.sectors_per_cluster()
            .map_or(0, |spc| self.number_of_sectors / u64::from(spc))
    }
}

/// Walks the attribute list of the `$Volume` record for the volume name.
fn volume_name(record: &[u8]) -> Option<&[u8]> {
    let f = Fields::le(record);
    let allocated = f.u32(28)? as usize;
    let mut attr_off = usize::from(f.u16(20)?);

    while attr_off + ATTR_HEADER_SIZE <= record.len() && attr_off <= allocated {
        let attr = f.sub(attr_off)?;
        let attr_type = attr.u32(0)?;
        let attr_len = attr.u32(4)? as usize;
        if attr_len == 0 || attr_type == ATTR_END {
            break;
        }
        if attr_type == ATTR_VOLUME_NAME {
            let val_len = attr.u32(16)? as usize;
            let val_off = usize::from(attr.u16(20)?);
            return attr.bytes(val_off, val_len);
        }
        attr_off = attr_off.checked_add(attr_len)?;
    }
    None
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(bs) = ctx
        .try_fetch(0, BOOT_SECTOR_SIZE)?
        .and_then(NtfsBootSector::parse)
    else {
        return Ok(None);
    };
    if !bs.is_valid() {
        tracing::debug!(?bs, "ntfs: invalid BPB");
        return Ok(None);
    }
    let nr_clusters = bs.nr_clusters();
    if bs.mft_cluster > nr_clusters || bs.mft_mirror_cluster > nr_clusters {
        tracing::debug!("ntfs: MFT outside the volume");
        return Ok(None);
    }
    if bitlocker::is_bitlocker(ctx)? {
        return Ok(None);
    }

    let (Some(cluster), Some(record_size)) = (bs.cluster_size(), bs.mft_record_size()) else {
        return Ok(None);
    };
    let Some(mft_off) = bs.mft_cluster.checked_mul(u64::from(cluster)) else {
        return Ok(None);
    };
    match ctx.try_fetch(mft_off, record_size)? {
        Some(rec) if rec.starts_with(MFT_ENTRY_SIGNATURE) => {}
        _ => return Ok(None),
    }

    let Some(vol_off) = MFT_RECORD_VOLUME
        .checked_mul(record_size)
        .and_then(|o| o.checked_add(mft_off))
    else {
        return Ok(None);
    };
    let mut out = Findings::new();
    match ctx.try_fetch(vol_off, record_size)? {
        Some(rec) if rec.starts_with(MFT_ENTRY_SIGNATURE) => {
            if let Some(name) = volume_name(rec) {
                out.set_utf16_label(name, Endianness::Little);
            }
        }
        _ => return Ok(None),
    }

    let serial = u64::from_le_bytes(bs.volume_serial);
    out.set_uuid_text(&bs.volume_serial, format!("{serial:016X}"));
    out.block_size = Some(u32::from(bs.bytes_per_sector));
    out.fs_size = bs
        .number_of_sectors
        .checked_mul(u64::from(bs.bytes_per_sector));
    Ok(Some(out))
}
