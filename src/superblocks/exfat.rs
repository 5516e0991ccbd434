//! exFAT.

use super::{Findings, Format, Outcome, serial_uuid};
use crate::checksum::exfat_boot_checksum;
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "exfat",
    Usage::Filesystem,
    &[Magic::at(b"EXFAT   ", 3)],
    Format::Exfat,
);

const BOOT_SECTOR_SIZE: u64 = 512;
const FIRST_DATA_CLUSTER: u32 = 2;
const LAST_DATA_CLUSTER: u32 = 0x0fff_fff6;
const ENTRY_SIZE: usize = 32;
const ENTRY_EOD: u8 = 0x00;
const ENTRY_LABEL: u8 = 0x83;
/// Root directory bytes examined before giving up on a label. The label
/// entry is created with the volume and sits among the first entries.
const MAX_DIR_SCAN: u64 = 4 * 1024 * 1024;
const DIR_CHUNK: u64 = 4096;

#[derive(Debug, Clone)]
struct ExfatBootSector {
    jump_boot: [u8; 3],
    must_be_zero_ok: bool,
    volume_length: u64,
    fat_offset: u32,
    fat_length: u32,
    cluster_heap_offset: u32,
    cluster_count: u32,
    root_cluster: u32,
    serial: [u8; 4],
    vermin: u8,
    vermaj: u8,
    bytes_per_sector_shift: u8,
    sectors_per_cluster_shift: u8,
    number_of_fats: u8,
    boot_signature: u16,
}

impl ExfatBootSector {
    fn parse(data: &[u8]) -> Option<Self> {
        let f = Fields::le(data);
        Some(Self {
            jump_boot: f.array(0)?,
            must_be_zero_ok: f.is_zero(11, 53),
            volume_length: f.u64(72)?,
            fat_offset: f.u32(80)?,
            fat_length: f.u32(84)?,
            cluster_heap_offset: f.u32(88)?,
            cluster_count: f.u32(92)?,
            root_cluster: f.u32(96)?,
            serial: f.array(100)?,
            vermin: f.u8(104)?,
            vermaj: f.u8(105)?,
            bytes_per_sector_shift: f.u8(108)?,
            sectors_per_cluster_shift: f.u8(109)?,
            number_of_fats: f.u8(110)?,
            boot_signature: f.u16(510)?,
        })
    }

    fn sector_size(&self) -> u64 {
        1u64 << self.bytes_per_sector_shift
    }

    fn cluster_size(&self) -> u64 {
        self.sector_size() << self.sectors_per_cluster_shift
    }

    fn is_valid(&self) -> bool {
        let fats_len = u64::from(self.fat_length) * u64::from(self.number_of_fats);
        let heap = u64::from(self.cluster_heap_offset);
        self.boot_signature == 0xAA55
            && self.jump_boot == [0xEB, 0x76, 0x90]
            && self.must_be_zero_ok
            && (1..=2).contains(&self.number_of_fats)
            && (9..=12).contains(&self.bytes_per_sector_shift)
            && self.sectors_per_cluster_shift <= 25 - self.bytes_per_sector_shift
            && heap >= fats_len
            && (24..=heap - fats_len).contains(&u64::from(self.fat_offset))
            && (u64::from(self.fat_offset) + fats_len..=1 << 31).contains(&heap)
            && (2..=u64::from(self.cluster_count) + 1).contains(&u64::from(self.root_cluster))
    }

    fn cluster_offset(&self, cluster: u32) -> Option<u64> {
        let rel = u64::from(cluster.checked_sub(FIRST_DATA_CLUSTER)?);
        let block = u64::from(self.cluster_heap_offset)
            .checked_add(rel.checked_shl(u32::from(self.sectors_per_cluster_shift))?)?;
        block.checked_mul(self.sector_size())
    }
}

/// The boot checksum covers sectors 0..11; sector 11 repeats it.
fn checksum_ok(ctx: &mut ProbeContext<'_>, sb: &ExfatBootSector) -> crate::Result<bool> {
    let sector = sb.sector_size();
    let Some(region) = ctx.try_fetch(0, sector * 12)? else {
        return Ok(false);
    };
    let (covered, stored) = region.split_at((sector * 11) as usize);
    let sum = exfat_boot_checksum(covered);
    let matches = stored
        .chunks_exact(4)
        .all(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) == sum);
    Ok(ctx.checksum_ok(matches))
}

fn next_cluster(ctx: &mut ProbeContext<'_>, sb: &ExfatBootSector, cluster: u32) -> crate::Result<Option<u32>> {
    let off = u64::from(sb.fat_offset) * sb.sector_size() + u64::from(cluster) * 4;
    Ok(ctx.try_fetch(off, 4)?.and_then(|b| Fields::le(b).u32(0)))
}

/// Scans the root directory for the volume label entry.
fn find_label(ctx: &mut ProbeContext<'_>, sb: &ExfatBootSector) -> crate::Result<Option<[u8; ENTRY_SIZE]>> {
    let cluster_size = sb.cluster_size();
    let mut budget = MAX_DIR_SCAN;
    let mut cluster = sb.root_cluster;

    while budget > 0 {
        let Some(base) = sb.cluster_offset(cluster) else {
            return Ok(None);
        };
        let mut pos = 0;
        while pos < cluster_size && budget > 0 {
            let len = DIR_CHUNK.min(cluster_size - pos).min(budget);
            let Some(buf) = ctx.try_fetch(base + pos, len)? else {
                return Ok(None);
            };
            for entry in buf.chunks_exact(ENTRY_SIZE) {
                match entry[0] {
                    ENTRY_EOD => return Ok(None),
                    ENTRY_LABEL => return Ok(entry.try_into().ok()),
                    _ => {}
                }
            }
            pos += len;
            budget -= len;
        }
        match next_cluster(ctx, sb, cluster)? {
            Some(next) if (FIRST_DATA_CLUSTER..=LAST_DATA_CLUSTER).contains(&next) => cluster = next,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(sb) = ctx
        .try_fetch(0, BOOT_SECTOR_SIZE)?
        .and_then(ExfatBootSector::parse)
    else {
        return Ok(None);
    };
    if !sb.is_valid() {
        tracing::debug!("exfat: invalid boot sector");
        return Ok(None);
    }
    if !checksum_ok(ctx, &sb)? {
        tracing::debug!("exfat: boot checksum mismatch");
        return Ok(None);
    }

    let mut out = Findings::new();
    if let Some(entry) = find_label(ctx, &sb)? {
        let len = (usize::from(entry[1]) * 2).min(22);
        out.set_utf16_label(&entry[2..2 + len], Endianness::Little);
    }
    out.set_uuid_text(&sb.serial, serial_uuid(sb.serial));
    out.set_version(format!("{}.{}", sb.vermaj, sb.vermin));
    out.block_size = Some(sb.sector_size() as u32);
    out.fs_size = sb.volume_length.checked_mul(sb.sector_size());
    Ok(Some(out))
}
