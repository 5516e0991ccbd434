//! FAT12/16/32.

use super::{Findings, Format, Outcome, bitlocker, serial_uuid};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::Usage;

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "vfat",
    Usage::Filesystem,
    &[
        Magic::at(b"MSWIN", 0x52),
        Magic::at(b"FAT32   ", 0x52),
        Magic::at(b"MSDOS", 0x36),
        Magic::at(b"FAT16   ", 0x36),
        Magic::at(b"FAT12   ", 0x36),
        Magic::at(b"FAT     ", 0x36),
        Magic::at(b"\xeb", 0),
        Magic::at(b"\xe9", 0),
        Magic::at(b"\x55\xaa", 0x1fe),
    ],
    Format::Vfat,
);

const BOOT_SECTOR_SIZE: u64 = 512;

const FAT12_MAX: u32 = 0xFF4;
const FAT16_MAX: u32 = 0xFFF4;
const FAT32_MAX: u32 = 0x0FFF_FFF6;

const DIR_ENTRY_SIZE: usize = 32;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIR: u8 = 0x10;
const ATTR_LONG_NAME: u8 = 0x0f;
const ATTR_MASK: u8 = 0x3f;
const ENTRY_FREE: u8 = 0xe5;

const NO_NAME: &[u8; 11] = b"NO NAME    ";
const MAX_CHAIN_LINKS: usize = 100;

const FSINFO_SIG1: [&[u8; 4]; 3] = [b"RRaA", b"RRdA", b"\0\0\0\0"];
const FSINFO_SIG2: [&[u8; 4]; 2] = [b"rrAa", b"\0\0\0\0"];

/// Boot sector in both its FAT12/16 and FAT32 readings.
#[derive(Debug, Clone)]
struct BootSector {
    sector_size: u16,
    cluster_size: u8,
    reserved: u16,
    fats: u8,
    dir_entries: u16,
    sectors: u16,
    media: u8,
    fat_length: u16,
    total_sect: u32,
    // FAT12/16 extended BPB
    ext_boot_sign: u8,
    serno: [u8; 4],
    label: [u8; 11],
    magic: [u8; 8],
    // FAT32 extended BPB
    fat32_length: u32,
    root_cluster: u32,
    fsinfo_sector: u16,
    fat32_ext_boot_sign: u8,
    fat32_serno: [u8; 4],
    fat32_label: [u8; 11],
    pmagic: [u8; 2],
}

impl BootSector {
    fn parse(data: &[u8]) -> Option<Self> {
        let f = Fields::le(data);
        Some(Self {
            sector_size: f.u16(0x0b)?,
            cluster_size: f.u8(0x0d)?,
            reserved: f.u16(0x0e)?,
            fats: f.u8(0x10)?,
            dir_entries: f.u16(0x11)?,
            sectors: f.u16(0x13)?,
            media: f.u8(0x15)?,
            fat_length: f.u16(0x16)?,
            total_sect: f.u32(0x20)?,
            ext_boot_sign: f.u8(0x26)?,
            serno: f.array(0x27)?,
            label: f.array(0x2b)?,
            magic: f.array(0x36)?,
            fat32_length: f.u32(0x24)?,
            root_cluster: f.u32(0x2c)?,
            fsinfo_sector: f.u16(0x30)?,
            fat32_ext_boot_sign: f.u8(0x42)?,
            fat32_serno: f.array(0x43)?,
            fat32_label: f.array(0x47)?,
            pmagic: f.array(0x1fe)?,
        })
    }

    fn is_fat32(&self) -> bool {
        self.fat_length == 0 && self.fat32_length != 0
    }

    /// Sectors taken by all FAT copies.
    fn fat_size(&self) -> u32 {
        let per_fat = if self.fat_length != 0 {
            u32::from(self.fat_length)
        } else {
            self.fat32_length
        };
        per_fat.saturating_mul(u32::from(self.fats))
    }

    fn sector_count(&self) -> u32 {
        if self.sectors != 0 {
            u32::from(self.sectors)
        } else {
            self.total_sect
        }
    }

    /// Data cluster count, or `None` when the BPB does not describe a
    /// usable FAT volume.
    fn cluster_count(&self, weak_magic: bool) -> Option<u32> {
        if weak_magic {
            // a bare jump byte or boot signature needs more evidence
            if self.pmagic != [0x55, 0xAA] {
                return None;
            }
            if &self.magic == b"JFS     " || &self.magic == b"HPFS    " {
                return None;
            }
        }
        if self.fats == 0 || self.reserved == 0 {
            return None;
        }
        if !(self.media >= 0xf8 || self.media == 0xf0) {
            return None;
        }
        if !self.cluster_size.is_power_of_two() {
            return None;
        }
        if !self.sector_size.is_power_of_two() || !(512..=4096).contains(&self.sector_size) {
            return None;
        }

        let sector_size = u32::from(self.sector_size);
        let dir_size =
            (u32::from(self.dir_entries) * DIR_ENTRY_SIZE as u32).div_ceil(sector_size);
        let overhead = u32::from(self.reserved)
            .checked_add(self.fat_size())?
            .checked_add(dir_size)?;
        let clusters = self.sector_count().checked_sub(overhead)? / u32::from(self.cluster_size);

        let max = if self.is_fat32() {
            FAT32_MAX
        } else if clusters > FAT12_MAX {
            FAT16_MAX
        } else {
            FAT12_MAX
        };
        (clusters <= max).then_some(clusters)
    }
}

/// Finds the volume-label entry in a run of directory entries.
fn find_volume_label(dir: &[u8]) -> Option<[u8; 11]> {
    for ent in dir.chunks_exact(DIR_ENTRY_SIZE) {
        let f = Fields::le(ent);
        let name: [u8; 11] = f.array(0)?;
        let attr = f.u8(11)?;
        if name[0] == 0 {
            break;
        }
        if name[0] == ENTRY_FREE
            || f.u16(20)? != 0
            || f.u16(26)? != 0
            || attr & ATTR_MASK == ATTR_LONG_NAME
        {
            continue;
        }
        if attr & (ATTR_VOLUME_ID | ATTR_DIR) == ATTR_VOLUME_ID {
            let mut name = name;
            if name[0] == 0x05 {
                name[0] = ENTRY_FREE;
            }
            return Some(name);
        }
    }
    None
}

fn search_label(ctx: &mut ProbeContext<'_>, offset: u64, entries: u32) -> crate::Result<Option<[u8; 11]>> {
    if entries == 0 {
        return Ok(None);
    }
    let len = u64::from(entries) * DIR_ENTRY_SIZE as u64;
    Ok(ctx.try_fetch(offset, len)?.and_then(find_volume_label))
}

/// Follows the FAT32 root directory cluster chain looking for the label.
fn search_fat32_label(ctx: &mut ProbeContext<'_>, bs: &BootSector) -> crate::Result<Option<[u8; 11]>> {
    let sector_size = u64::from(bs.sector_size);
    let cluster_bytes = u64::from(bs.cluster_size) * sector_size;
    let start_data_sect = u64::from(bs.reserved) + u64::from(bs.fat_size());
    let entries = u64::from(bs.fat32_length) * sector_size / 4;
    let fat_start = u64::from(bs.reserved) * sector_size;
    let dir_entries = (cluster_bytes / DIR_ENTRY_SIZE as u64) as u32;

    let mut next = u64::from(bs.root_cluster);
    for _ in 1..MAX_CHAIN_LINKS {
        if next < 2 || next >= entries {
            break;
        }
        let data_off = (start_data_sect + (next - 2) * u64::from(bs.cluster_size)) * sector_size;
        if let Some(label) = search_label(ctx, data_off, dir_entries)? {
            return Ok(Some(label));
        }
        let Some(fat_entry) = ctx.try_fetch(fat_start + next * 4, 4)? else {
            break;
        };
        next = u64::from(Fields::le(fat_entry).u32(0).unwrap_or(0) & 0x0fff_ffff);
    }
    Ok(None)
}

fn fsinfo_ok(ctx: &mut ProbeContext<'_>, bs: &BootSector) -> crate::Result<Option<bool>> {
    if bs.fsinfo_sector == 0 {
        return Ok(Some(true));
    }
    let off = u64::from(bs.fsinfo_sector) * u64::from(bs.sector_size);
    let Some(buf) = ctx.try_fetch(off, 512)? else {
        return Ok(None);
    };
    let f = Fields::le(buf);
    let (Some(sig1), Some(sig2)) = (f.array::<4>(0), f.array::<4>(484)) else {
        return Ok(None);
    };
    Ok(Some(
        FSINFO_SIG1.iter().any(|s| **s == sig1) && FSINFO_SIG2.iter().any(|s| **s == sig2),
    ))
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(bs) = ctx.try_fetch(0, BOOT_SECTOR_SIZE)?.and_then(BootSector::parse) else {
        return Ok(None);
    };
    let weak_magic = hit.magic.is_some_and(|m| m.bytes.len() <= 2);
    let Some(cluster_count) = bs.cluster_count(weak_magic) else {
        tracing::debug!("vfat: invalid BPB");
        return Ok(None);
    };
    if bitlocker::is_bitlocker(ctx)? {
        return Ok(None);
    }

    let mut out = Findings::new();
    let boot_label;
    let serno;
    let vol_label;

    if bs.fat_length != 0 {
        let root_start = (u64::from(bs.reserved) + u64::from(bs.fat_size())) * u64::from(bs.sector_size);
        vol_label = search_label(ctx, root_start, u32::from(bs.dir_entries))?;
        boot_label = (bs.ext_boot_sign == 0x29).then_some(bs.label);
        serno = matches!(bs.ext_boot_sign, 0x28 | 0x29).then_some(bs.serno);
        out.set_extra("SEC_TYPE", "msdos");
        if cluster_count < FAT12_MAX {
            out.set_version("FAT12");
        } else if cluster_count < FAT16_MAX {
            out.set_version("FAT16");
        }
    } else if bs.fat32_length != 0 {
        vol_label = search_fat32_label(ctx, &bs)?;
        boot_label = (bs.fat32_ext_boot_sign == 0x29).then_some(bs.fat32_label);
        serno = Some(bs.fat32_serno);
        if fsinfo_ok(ctx, &bs)? != Some(true) {
            tracing::debug!("vfat: bad FSInfo signature");
            return Ok(None);
        }
        out.set_version("FAT32");
    } else {
        // no FAT size in either BPB layout: a FAT volume, but nothing
        // more can be read from it
        vol_label = None;
        boot_label = None;
        serno = None;
    }

    if let Some(label) = boot_label.filter(|l| l != NO_NAME) {
        if let Some(text) = super::normalize_label(&String::from_utf8_lossy(super::until_nul(&label))) {
            out.set_extra("LABEL_FATBOOT", text);
        }
    }
    if let Some(label) = vol_label {
        out.set_label(&label);
    }
    if let Some(serno) = serno {
        out.set_uuid_text(&serno, serial_uuid(serno));
    }
    out.block_size = Some(u32::from(bs.sector_size));
    out.fs_size = Some(u64::from(bs.sector_count()) * u64::from(bs.sector_size));
    Ok(Some(out))
}
